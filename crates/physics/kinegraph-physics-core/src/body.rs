//! One simulated bone.
//!
//! The body lives in model space. Each fixed step pulls it toward the animated transform with
//! the configured springs, adds gravity and the inertial force from root acceleration, then
//! applies constraints. The output is interpolated between the last two steps and expressed
//! in the parent joint's local space.

use kinegraph_animation_core::{nlerp_shortest, Transform};
use nalgebra::{UnitQuaternion, Vector3};

use crate::constraint::{AngularConstraint, LinearConstraint};
use crate::spring::{integrate_angular, integrate_linear, DynamicProperty, SpringProperties};
use crate::system::StepData;

/// Everything a body needs for one update.
#[derive(Clone, Copy, Debug)]
pub struct BodyInputs<'a> {
    pub step: &'a StepData,
    /// Seconds per step.
    pub timestep: f32,
    /// Translation channel; when `None` position follows the animation.
    pub linear: Option<&'a SpringProperties>,
    /// Rotation channel; when `None` rotation follows the animation.
    pub angular: Option<&'a SpringProperties>,
    pub linear_constraint: Option<&'a LinearConstraint>,
    pub angular_constraint: Option<&'a AngularConstraint>,
    /// Animated model-space transform of the bone.
    pub animated: &'a Transform,
    /// Model-space transform of the bone's parent.
    pub parent: &'a Transform,
}

/// Local-space result written back into the pose.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyOutput {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub position: DynamicProperty<Vector3<f32>>,
    pub rotation: DynamicProperty<UnitQuaternion<f32>>,
}

impl Body {
    /// A body at rest on `seed` (model space).
    pub fn new(seed: &Transform) -> Self {
        Self {
            position: DynamicProperty::at_rest(seed.translation),
            rotation: DynamicProperty::at_rest(seed.rotation),
        }
    }

    /// Run the pending steps and return the interpolated local transform.
    ///
    /// Returns `None` without touching the state when the parent transform cannot be inverted.
    pub fn update(&mut self, inputs: &BodyInputs<'_>) -> Option<BodyOutput> {
        let parent_inverse = inputs.parent.try_inverse()?;
        let dt = inputs.timestep;

        if inputs.linear.is_none() {
            self.position = DynamicProperty::at_rest(inputs.animated.translation);
        }
        if inputs.angular.is_none() {
            self.rotation = DynamicProperty::at_rest(inputs.animated.rotation);
        }

        for _ in 0..inputs.step.required_steps {
            if let Some(props) = inputs.linear {
                self.step_linear(props, inputs, dt);
            }
            if let Some(props) = inputs.angular {
                self.step_angular(props, inputs, dt);
            }
        }

        let ratio = inputs.step.interpolation_ratio.clamp(0.0, 1.0);
        let position = self.position.previous.lerp(&self.position.current, ratio);
        let rotation = nlerp_shortest(&self.rotation.previous, &self.rotation.current, ratio);
        Some(BodyOutput {
            translation: parent_inverse.transform_point(&position),
            rotation: parent_inverse.rotation * rotation,
        })
    }

    fn step_linear(&mut self, props: &SpringProperties, inputs: &BodyInputs<'_>, dt: f32) {
        let rest = inputs.animated.translation;
        let mut force = props
            .spring
            .linear_force(&self.position.current, &self.position.velocity, &rest)
            + external_force(props, inputs.step);
        if let Some(constraint) = inputs.linear_constraint {
            force += constraint.soft_force(&self.position, &rest);
        }
        integrate_linear(&mut self.position, &(force / props.mass), dt, props.integration);
        if let Some(constraint) = inputs.linear_constraint {
            constraint.enforce(&mut self.position, &rest);
        }
    }

    fn step_angular(&mut self, props: &SpringProperties, inputs: &BodyInputs<'_>, dt: f32) {
        let rest = inputs.animated.rotation;
        let current = self.rotation.current;
        let lever = current * props.up_axis;
        let external = external_force(props, inputs.step).cross(&lever);
        let mut torque = props
            .spring
            .angular_torque(&current, &self.rotation.velocity, &rest)
            + current.inverse() * external;
        if let Some(constraint) = inputs.angular_constraint {
            torque += constraint.soft_torque(&self.rotation, &rest);
        }
        integrate_angular(&mut self.rotation, &(torque / props.mass), dt);
        if let Some(constraint) = inputs.angular_constraint {
            constraint.enforce(&mut self.rotation, &rest);
        }
    }
}

fn external_force(props: &SpringProperties, step: &StepData) -> Vector3<f32> {
    (props.gravity - step.root_acceleration) * props.mass
}
