//! Weighted pose blending.

use nalgebra::{Quaternion, UnitQuaternion, Vector3, Vector4};

use crate::transform::Transform;

/// Total weight below which a blend is considered empty.
const WEIGHT_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct BlendLayer<'a> {
    pub pose: &'a [Transform],
    pub weight: f32,
}

/// Blend `layers` into `output` by normalized weight.
///
/// Rotations are accumulated in the hemisphere of the first layer and renormalized.
/// Layers with non-positive weight are skipped; if nothing carries weight the first layer
/// is copied through unchanged.
pub fn blend_poses(layers: &[BlendLayer<'_>], output: &mut [Transform]) {
    let Some(first) = layers.first() else {
        return;
    };
    let total: f32 = layers
        .iter()
        .filter(|l| l.weight > 0.0)
        .map(|l| l.weight)
        .sum();
    if total <= WEIGHT_EPSILON {
        for (out, src) in output.iter_mut().zip(first.pose) {
            *out = *src;
        }
        return;
    }
    let inv_total = 1.0 / total;

    for (joint, out) in output.iter_mut().enumerate() {
        let Some(reference) = first.pose.get(joint) else {
            continue;
        };
        let reference_rot = reference.rotation.quaternion().coords;
        let mut translation = Vector3::zeros();
        let mut scale = Vector3::zeros();
        let mut rotation = Vector4::zeros();

        for layer in layers.iter().filter(|l| l.weight > 0.0) {
            let Some(src) = layer.pose.get(joint) else {
                continue;
            };
            let w = layer.weight * inv_total;
            translation += src.translation * w;
            scale += src.scale * w;
            let mut q = src.rotation.quaternion().coords;
            if q.dot(&reference_rot) < 0.0 {
                q = -q;
            }
            rotation += q * w;
        }

        out.translation = translation;
        out.scale = scale;
        out.rotation = UnitQuaternion::try_new(Quaternion::from_vector(rotation), WEIGHT_EPSILON)
            .unwrap_or(reference.rotation);
    }
}
