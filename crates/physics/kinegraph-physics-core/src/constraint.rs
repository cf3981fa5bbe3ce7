//! Positional and rotational limits applied after each integration step.
//!
//! A constraint is either hard (the property is projected back inside the limit and the
//! outward velocity is reflected by `bounce`) or soft (a spring pulls toward the limit while
//! the property is outside it).

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::spring::{DynamicProperty, Spring};

const DIRECTION_EPSILON: f32 = 1e-6;

/// Allowed region for the body's offset from its animated position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LinearLimit {
    /// Axis-aligned box in model space.
    Box { min: Vector3<f32>, max: Vector3<f32> },
    Sphere { radius: f32 },
}

impl LinearLimit {
    fn clamp(&self, offset: &Vector3<f32>) -> Vector3<f32> {
        match self {
            LinearLimit::Box { min, max } => Vector3::new(
                offset.x.clamp(min.x.min(max.x), max.x.max(min.x)),
                offset.y.clamp(min.y.min(max.y), max.y.max(min.y)),
                offset.z.clamp(min.z.min(max.z), max.z.max(min.z)),
            ),
            LinearLimit::Sphere { radius } => {
                let radius = radius.max(0.0);
                let len = offset.norm();
                if len > radius && len > DIRECTION_EPSILON {
                    offset * (radius / len)
                } else {
                    *offset
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearConstraint {
    pub limit: LinearLimit,
    /// Fraction of the outward velocity reflected on contact. 0 stops, 1 bounces fully.
    pub bounce: f32,
    /// When set the limit is enforced by this spring instead of projection.
    pub soft: Option<Spring>,
}

impl LinearConstraint {
    pub fn hard(limit: LinearLimit, bounce: f32) -> Self {
        Self {
            limit,
            bounce,
            soft: None,
        }
    }

    pub fn soft(limit: LinearLimit, spring: Spring) -> Self {
        Self {
            limit,
            bounce: 0.0,
            soft: Some(spring),
        }
    }

    /// Extra force while a soft limit is violated; zero otherwise.
    pub(crate) fn soft_force(
        &self,
        prop: &DynamicProperty<Vector3<f32>>,
        rest: &Vector3<f32>,
    ) -> Vector3<f32> {
        let Some(spring) = self.soft else {
            return Vector3::zeros();
        };
        let offset = prop.current - rest;
        let clamped = self.limit.clamp(&offset);
        if offset == clamped {
            return Vector3::zeros();
        }
        spring.linear_force(&offset, &prop.velocity, &clamped)
    }

    /// Project back inside a hard limit. Only `current` and `velocity` change.
    pub(crate) fn enforce(&self, prop: &mut DynamicProperty<Vector3<f32>>, rest: &Vector3<f32>) {
        if self.soft.is_some() {
            return;
        }
        let offset = prop.current - rest;
        let clamped = self.limit.clamp(&offset);
        let penetration = offset - clamped;
        if penetration.norm_squared() <= DIRECTION_EPSILON * DIRECTION_EPSILON {
            return;
        }
        let normal = penetration.normalize();
        prop.current = rest + clamped;
        let outward = prop.velocity.dot(&normal);
        if outward > 0.0 {
            prop.velocity -= normal * (outward * (1.0 + self.bounce.clamp(0.0, 1.0)));
        }
    }
}

/// Cone limit: the body-frame `axis`, carried by the body rotation, must stay within
/// `half_angle` radians of the same axis carried by the animated rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngularConstraint {
    pub axis: Unit<Vector3<f32>>,
    pub half_angle: f32,
    pub bounce: f32,
    pub soft: Option<Spring>,
}

struct ConeViolation {
    /// Rest-frame axis rotating the body back toward the cone.
    correction_axis: Unit<Vector3<f32>>,
    excess: f32,
    relative: UnitQuaternion<f32>,
}

impl AngularConstraint {
    pub fn new(axis: Vector3<f32>, half_angle: f32, bounce: f32, soft: Option<Spring>) -> Self {
        let axis = Unit::try_new(axis, DIRECTION_EPSILON).unwrap_or_else(Vector3::z_axis);
        Self {
            axis,
            half_angle: half_angle.max(0.0),
            bounce,
            soft,
        }
    }

    fn violation(
        &self,
        current: &UnitQuaternion<f32>,
        rest: &UnitQuaternion<f32>,
    ) -> Option<ConeViolation> {
        let relative = rest.inverse() * current;
        let dir = relative * self.axis;
        let angle = dir.dot(&*self.axis).clamp(-1.0, 1.0).acos();
        let excess = angle - self.half_angle;
        if excess <= 0.0 {
            return None;
        }
        let correction_axis = Unit::try_new(dir.cross(&*self.axis), DIRECTION_EPSILON)
            .or_else(|| Unit::try_new(self.axis.cross(&Vector3::x()), DIRECTION_EPSILON))
            .unwrap_or_else(Vector3::y_axis);
        Some(ConeViolation {
            correction_axis,
            excess,
            relative,
        })
    }

    /// Extra body-frame torque while a soft cone is violated; zero otherwise.
    pub(crate) fn soft_torque(
        &self,
        prop: &DynamicProperty<UnitQuaternion<f32>>,
        rest: &UnitQuaternion<f32>,
    ) -> Vector3<f32> {
        let Some(spring) = self.soft else {
            return Vector3::zeros();
        };
        let Some(v) = self.violation(&prop.current, rest) else {
            return Vector3::zeros();
        };
        let body_axis = v.relative.inverse() * v.correction_axis.into_inner();
        body_axis * (spring.stiffness * v.excess) - prop.velocity * spring.damping
    }

    pub(crate) fn enforce(
        &self,
        prop: &mut DynamicProperty<UnitQuaternion<f32>>,
        rest: &UnitQuaternion<f32>,
    ) {
        if self.soft.is_some() {
            return;
        }
        let Some(v) = self.violation(&prop.current, rest) else {
            return;
        };
        let relative = UnitQuaternion::from_axis_angle(&v.correction_axis, v.excess) * v.relative;
        prop.current = rest * relative;
        let normal = relative.inverse() * -v.correction_axis.into_inner();
        let outward = prop.velocity.dot(&normal);
        if outward > 0.0 {
            prop.velocity -= normal * (outward * (1.0 + self.bounce.clamp(0.0, 1.0)));
        }
    }
}
