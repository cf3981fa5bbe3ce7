//! Spring math and per-step integration of dynamic properties.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub const STIFFNESS_RANGE: (f32, f32) = (1.0, 10_000.0);
pub const DAMPING_RANGE: (f32, f32) = (0.001, 1.0);
pub const MASS_RANGE: (f32, f32) = (0.1, 2_000.0);

/// Current and previous step values plus velocity. Angular velocity is expressed in the
/// body's own frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicProperty<T> {
    pub current: T,
    pub previous: T,
    pub velocity: Vector3<f32>,
}

impl<T: Copy> DynamicProperty<T> {
    pub fn at_rest(value: T) -> Self {
        Self {
            current: value,
            previous: value,
            velocity: Vector3::zeros(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    /// Velocity first, then position.
    #[default]
    SemiImplicitEuler,
    /// Position Verlet; velocity is derived from the position delta.
    Verlet,
}

/// Hooke spring with linear velocity damping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spring {
    pub stiffness: f32,
    pub damping: f32,
}

impl Spring {
    /// Force pulling `position` toward `rest`.
    pub fn linear_force(
        &self,
        position: &Vector3<f32>,
        velocity: &Vector3<f32>,
        rest: &Vector3<f32>,
    ) -> Vector3<f32> {
        (position - rest) * -self.stiffness - velocity * self.damping
    }

    /// Body-frame torque rotating `rotation` toward `rest`.
    pub fn angular_torque(
        &self,
        rotation: &UnitQuaternion<f32>,
        velocity: &Vector3<f32>,
        rest: &UnitQuaternion<f32>,
    ) -> Vector3<f32> {
        let displacement = (rotation.inverse() * rest).scaled_axis();
        displacement * self.stiffness - velocity * self.damping
    }
}

/// Spring plus the body parameters one spring-bone channel is simulated with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpringProperties {
    pub spring: Spring,
    pub mass: f32,
    /// Model-space acceleration applied to the body (scaled by mass into a force).
    pub gravity: Vector3<f32>,
    /// Body-frame point at which external forces produce torque.
    pub up_axis: Vector3<f32>,
    pub integration: Integration,
}

impl SpringProperties {
    /// Build properties with stiffness, damping and mass clamped to their supported ranges.
    pub fn new(stiffness: f32, damping: f32, mass: f32) -> Self {
        Self {
            spring: Spring {
                stiffness: clamp_or_min(stiffness, STIFFNESS_RANGE),
                damping: clamp_or_min(damping, DAMPING_RANGE),
            },
            mass: clamp_or_min(mass, MASS_RANGE),
            gravity: Vector3::zeros(),
            up_axis: Vector3::zeros(),
            integration: Integration::default(),
        }
    }

    pub fn with_gravity(mut self, gravity: Vector3<f32>) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_up_axis(mut self, up_axis: Vector3<f32>) -> Self {
        self.up_axis = up_axis;
        self
    }

    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.integration = integration;
        self
    }
}

fn clamp_or_min(value: f32, (min, max): (f32, f32)) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

pub(crate) fn integrate_linear(
    prop: &mut DynamicProperty<Vector3<f32>>,
    acceleration: &Vector3<f32>,
    dt: f32,
    integration: Integration,
) {
    let current = prop.current;
    match integration {
        Integration::SemiImplicitEuler => {
            prop.velocity += acceleration * dt;
            prop.current = current + prop.velocity * dt;
        }
        Integration::Verlet => {
            // Velocity holds the last position delta, constraint corrections included.
            prop.current = current + prop.velocity * dt + acceleration * (dt * dt);
            prop.velocity = (prop.current - current) / dt;
        }
    }
    prop.previous = current;
}

pub(crate) fn integrate_angular(
    prop: &mut DynamicProperty<UnitQuaternion<f32>>,
    acceleration: &Vector3<f32>,
    dt: f32,
) {
    let current = prop.current;
    prop.velocity += acceleration * dt;
    let step = prop.velocity * dt;
    if step.norm_squared() > 0.0 {
        prop.current = current * UnitQuaternion::from_scaled_axis(step);
    }
    prop.previous = current;
}
