//! Joint transform representation and the small set of affine helpers the runtime relies on.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Scale components at or below this magnitude make a transform non-invertible.
pub const SCALE_EPSILON: f32 = 1e-6;

/// Translation / rotation / scale triple.
///
/// Composition follows the usual TRS convention: a point `p` maps to
/// `translation + rotation * (scale ⊙ p)`. Inversion is exact for uniform scale, which is
/// what skeletal rigs use in practice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn new(
        translation: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
        scale: Vector3<f32>,
    ) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(1.0),
        }
    }

    pub fn from_translation(translation: Vector3<f32>) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    pub fn from_rotation(rotation: UnitQuaternion<f32>) -> Self {
        Self {
            rotation,
            ..Self::identity()
        }
    }

    /// Map `child` (expressed in this transform's space) into the enclosing space.
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.transform_point(&child.translation),
            rotation: self.rotation * child.rotation,
            scale: self.scale.component_mul(&child.scale),
        }
    }

    pub fn transform_point(&self, point: &Vector3<f32>) -> Vector3<f32> {
        self.translation + self.rotation * self.scale.component_mul(point)
    }

    pub fn transform_vector(&self, vector: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * self.scale.component_mul(vector)
    }

    /// Inverse transform, or `None` when the scale is degenerate or any component is not finite.
    pub fn try_inverse(&self) -> Option<Transform> {
        if !self.is_finite() || self.scale.iter().any(|s| s.abs() <= SCALE_EPSILON) {
            return None;
        }
        let rotation = self.rotation.inverse();
        let scale = self.scale.map(|s| 1.0 / s);
        let translation = scale.component_mul(&(rotation * -self.translation));
        Some(Transform {
            translation,
            rotation,
            scale,
        })
    }

    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.scale.iter().all(|v| v.is_finite())
            && self.rotation.coords.iter().all(|v| v.is_finite())
    }

    /// Component-wise blend: linear for translation and scale, shortest-arc nlerp for rotation.
    pub fn lerp(&self, other: &Transform, t: f32) -> Transform {
        Transform {
            translation: self.translation.lerp(&other.translation, t),
            rotation: nlerp_shortest(&self.rotation, &other.rotation, t),
            scale: self.scale.lerp(&other.scale, t),
        }
    }
}

/// Normalized linear interpolation that flips `to` into the hemisphere of `from` first.
///
/// Falls back to `from` when the blend collapses to a zero-length quaternion.
pub fn nlerp_shortest(
    from: &UnitQuaternion<f32>,
    to: &UnitQuaternion<f32>,
    t: f32,
) -> UnitQuaternion<f32> {
    let a = from.quaternion().coords;
    let mut b = to.quaternion().coords;
    if a.dot(&b) < 0.0 {
        b = -b;
    }
    let blended = a.lerp(&b, t);
    UnitQuaternion::try_new(Quaternion::from_vector(blended), f32::EPSILON).unwrap_or(*from)
}
