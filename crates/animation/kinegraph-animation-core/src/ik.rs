//! Two-bone inverse kinematics.
//!
//! The solver works on model-space transforms of a start / mid / end chain and returns
//! corrective rotations expressed in each joint's own frame, ready to be post-multiplied
//! onto the local rotations of the start and mid joints.

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::transform::{nlerp_shortest, Transform};

const LENGTH_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct TwoBoneIk {
    pub start: Transform,
    pub mid: Transform,
    pub end: Transform,
    /// Model-space target position for the end joint.
    pub target: Vector3<f32>,
    /// Model-space direction the mid joint should bend towards. Zero disables pole alignment.
    pub pole: Vector3<f32>,
    /// Bend axis of the mid joint, in the mid joint's frame. Used when the chain is straight.
    pub mid_axis: Vector3<f32>,
    /// Fraction of the chain length after which reach is eased out, in [0,1].
    pub soften: f32,
    /// Blend factor applied to the corrections, in [0,1].
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkCorrections {
    pub start: UnitQuaternion<f32>,
    pub mid: UnitQuaternion<f32>,
    /// Whether the end joint can touch the (unsoftened) target.
    pub reached: bool,
}

fn rotation_between(from: &Vector3<f32>, to: &Vector3<f32>) -> UnitQuaternion<f32> {
    if let Some(rot) = UnitQuaternion::rotation_between(from, to) {
        return rot;
    }
    // Opposite vectors: half turn about any perpendicular axis.
    let helper = if from.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    match Unit::try_new(from.cross(&helper), LENGTH_EPSILON) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, std::f32::consts::PI),
        None => UnitQuaternion::identity(),
    }
}

/// Express a model-space rotation `delta` applied at a joint whose model rotation is
/// `joint` as a rotation in that joint's own frame.
fn to_joint_frame(joint: &UnitQuaternion<f32>, delta: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    joint.inverse() * delta * joint
}

/// Softened reach distance. Past `soften * chain`, reach approaches the chain length
/// asymptotically instead of snapping to full extension.
fn softened_distance(distance: f32, chain: f32, diff: f32, soften: f32) -> f32 {
    let da = chain * soften.clamp(0.0, 1.0);
    let ds = chain - da;
    if distance > da && distance > diff && ds > 0.0 {
        let alpha = (distance - da) / ds;
        let op4 = 3.0_f32.powi(4);
        let ratio = 1.0 - op4 / (alpha + 3.0).powi(4);
        da + ds * ratio
    } else {
        distance
    }
}

impl TwoBoneIk {
    /// Solve the chain. Returns `None` for degenerate chains (zero-length bones, target on the
    /// start joint, non-finite input) so callers can leave the pose untouched.
    pub fn solve(&self) -> Option<IkCorrections> {
        let s = self.start.translation;
        let m = self.mid.translation;
        let e = self.end.translation;
        let t = self.target;
        if ![s, m, e, t].iter().all(|v| v.iter().all(|c| c.is_finite())) {
            return None;
        }

        let start_mid = m - s;
        let mid_end = e - m;
        let start_target = t - s;
        let upper = start_mid.norm();
        let lower = mid_end.norm();
        let reach = start_target.norm();
        if upper < LENGTH_EPSILON || lower < LENGTH_EPSILON || reach < LENGTH_EPSILON {
            return None;
        }

        let chain = upper + lower;
        let diff = (upper - lower).abs();
        let softened = softened_distance(reach, chain, diff, self.soften);
        let reached = reach <= chain && (softened - reach).abs() <= LENGTH_EPSILON;
        let desired = softened.clamp(diff, chain);

        // Mid joint: open or close the interior angle to match the desired reach.
        let to_start = s - m;
        let cos_current = (to_start.dot(&mid_end) / (upper * lower)).clamp(-1.0, 1.0);
        let cos_desired =
            ((upper * upper + lower * lower - desired * desired) / (2.0 * upper * lower))
                .clamp(-1.0, 1.0);
        let delta_angle = cos_desired.acos() - cos_current.acos();

        let hinge = self.mid.rotation * self.mid_axis;
        let bend_axis = Unit::try_new(to_start.cross(&mid_end), LENGTH_EPSILON).or_else(|| {
            // Straight chain: bend about the hinge, projected off the bone direction.
            let bone = start_mid / upper;
            Unit::try_new(hinge - bone * hinge.dot(&bone), LENGTH_EPSILON)
        });
        let mid_delta = match bend_axis {
            Some(axis) => UnitQuaternion::from_axis_angle(&axis, delta_angle),
            None => UnitQuaternion::identity(),
        };
        let bent_end = m + mid_delta * mid_end;

        // Start joint: swing the bent chain onto the target line, then twist towards the pole.
        let swing = rotation_between(&(bent_end - s), &start_target);
        let mut start_delta = swing;
        if self.pole.norm_squared() > LENGTH_EPSILON {
            let k = start_target / reach;
            let swung_mid = swing * start_mid;
            let u = swung_mid - k * swung_mid.dot(&k);
            let p = self.pole - k * self.pole.dot(&k);
            if u.norm() > LENGTH_EPSILON && p.norm() > LENGTH_EPSILON {
                let angle = k.dot(&u.cross(&p)).atan2(u.dot(&p));
                let twist = UnitQuaternion::from_axis_angle(&Unit::new_unchecked(k), angle);
                start_delta = twist * swing;
            }
        }

        let weight = self.weight.clamp(0.0, 1.0);
        let identity = UnitQuaternion::identity();
        let start = nlerp_shortest(
            &identity,
            &to_joint_frame(&self.start.rotation, &start_delta),
            weight,
        );
        let mid = nlerp_shortest(
            &identity,
            &to_joint_frame(&self.mid.rotation, &mid_delta),
            weight,
        );
        Some(IkCorrections {
            start,
            mid,
            reached,
        })
    }
}
