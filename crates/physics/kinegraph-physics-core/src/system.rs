//! World-to-actor time accumulator.

use kinegraph_animation_core::Transform;
use nalgebra::Vector3;

use crate::config::PhysicsConfig;

/// Per-update output consumed by every [`Body`](crate::Body) of the actor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepData {
    /// Root acceleration in model space, refreshed whenever at least one step runs.
    pub root_acceleration: Vector3<f32>,
    /// Leftover time as a fraction of one step, in [0,1].
    pub interpolation_ratio: f32,
    pub required_steps: u8,
}

impl Default for StepData {
    fn default() -> Self {
        Self {
            root_acceleration: Vector3::zeros(),
            interpolation_ratio: 0.0,
            required_steps: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PhysicsIntegrator {
    config: PhysicsConfig,
    accumulated_movement: Vector3<f32>,
    prev_root_velocity: Vector3<f32>,
    accumulated_time: f32,
    movement_time: f32,
    step: StepData,
}

impl Default for PhysicsIntegrator {
    fn default() -> Self {
        Self::new(PhysicsConfig::default())
    }
}

impl PhysicsIntegrator {
    pub fn new(config: PhysicsConfig) -> Self {
        let config = if config.fixed_timestep.is_finite() && config.fixed_timestep > 0.0 {
            config
        } else {
            log::warn!(
                "physics: invalid fixed timestep {}, using default",
                config.fixed_timestep
            );
            PhysicsConfig {
                fixed_timestep: PhysicsConfig::default().fixed_timestep,
                ..config
            }
        };
        Self {
            config,
            accumulated_movement: Vector3::zeros(),
            prev_root_velocity: Vector3::zeros(),
            accumulated_time: 0.0,
            movement_time: 0.0,
            step: StepData::default(),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn step_data(&self) -> &StepData {
        &self.step
    }

    /// Seconds simulated by one step.
    pub fn timestep(&self) -> f32 {
        self.config.fixed_timestep
    }

    /// Forget accumulated time and root motion, e.g. after a teleport.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    /// Advance by `delta_time` seconds given the actor's world root for this and the
    /// previous frame.
    pub fn update(&mut self, delta_time: f32, root: &Transform, prev_root: &Transform) {
        let dt = if delta_time.is_finite() && delta_time > 0.0 {
            delta_time
        } else {
            0.0
        };

        match root.try_inverse() {
            Some(root_inverse) => {
                let world_delta = root.translation - prev_root.translation;
                let movement = root_inverse.transform_vector(&world_delta);
                if movement.iter().all(|c| c.is_finite()) {
                    self.accumulated_movement += movement;
                }
            }
            None => log::warn!("physics: root transform is not invertible, ignoring root motion"),
        }

        self.movement_time += dt;
        self.accumulated_time += dt;

        let step_len = self.config.fixed_timestep;
        let mut steps = 0u32;
        if self.accumulated_time >= step_len {
            let whole = (self.accumulated_time / step_len).floor();
            steps = whole as u32;
            self.accumulated_time -= whole * step_len;
            if self.accumulated_time >= step_len {
                steps += 1;
                self.accumulated_time -= step_len;
            }
            self.accumulated_time = self.accumulated_time.max(0.0);
        }

        self.step.required_steps = steps.min(u32::from(self.config.max_steps_per_update)) as u8;
        self.step.interpolation_ratio = (self.accumulated_time / step_len).clamp(0.0, 1.0);

        if steps > 0 {
            let inv_time = 1.0 / self.movement_time;
            let velocity = self.accumulated_movement * inv_time;
            self.step.root_acceleration = (velocity - self.prev_root_velocity) * inv_time;
            self.prev_root_velocity = velocity;
            self.accumulated_movement = Vector3::zeros();
            self.movement_time = 0.0;
        }
    }
}
