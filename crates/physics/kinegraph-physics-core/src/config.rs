//! Integrator configuration.

use serde::{Deserialize, Serialize};

/// Fixed-step sizing. Defaults match a 60 Hz simulation capped at four sub-steps per update.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Seconds per simulation step.
    pub fixed_timestep: f32,
    /// Upper bound on steps per update; backlog beyond it is dropped.
    pub max_steps_per_update: u8,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 60.0,
            max_steps_per_update: 4,
        }
    }
}
