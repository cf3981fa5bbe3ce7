//! Per-node evaluation.

use std::mem;

use kinegraph_animation_core::{
    blend_poses, BlendLayer, EventSink, Skeleton, Transform, TwoBoneIk,
};
use kinegraph_physics_core::{
    AngularConstraint, Body, BodyInputs, LinearConstraint, LinearLimit, PhysicsIntegrator,
    Spring, SpringProperties,
};
use nalgebra::{Quaternion, UnitQuaternion, Vector2, Vector3, Vector4};

use super::instance::NodeInstanceData;
use super::model_space::ModelSpaceCache;
use crate::compiler::Node;
use crate::nodes::{
    BoneAccessOp, BoneChannel, IkTwoBoneOp, NodeOp, RotationOp, SpringBoneOp, SpringPropsOp,
    VectorOp,
};
use crate::pool::{PoseHandle, PoseMut, PosePool};
use crate::value::{DataObject, EvaluationResult};

const QUATERNION_EPSILON: f32 = 1e-6;

/// Everything shared by the nodes of one pass.
pub(crate) struct Frame<'a> {
    pub skeleton: &'a Skeleton,
    pub pool: &'a PosePool,
    pub events: &'a mut dyn EventSink,
    pub model_space: &'a mut ModelSpaceCache,
    pub rest_pose: &'a PoseHandle,
    pub physics: Option<&'a PhysicsIntegrator>,
    /// Incremented once per time advance.
    pub frame: u64,
}

/// Typed view over the results a node reads.
///
/// Disconnected optional slots and slots left `Empty` read as the slot default.
pub(crate) struct NodeInputs<'a> {
    pub node: &'a Node,
    pub results: &'a [EvaluationResult],
    pub rest_pose: &'a PoseHandle,
}

impl<'a> NodeInputs<'a> {
    fn slot(&self, slot: usize) -> Option<&'a EvaluationResult> {
        let idx = self.node.inputs.get(slot)?.index()?;
        self.results.get(idx)
    }

    fn connected(&self, slot: usize) -> bool {
        self.slot(slot).is_some()
    }

    fn float_or(&self, slot: usize, default: f32) -> f32 {
        self.slot(slot)
            .and_then(EvaluationResult::as_float)
            .unwrap_or(default)
    }

    fn float(&self, slot: usize) -> f32 {
        self.float_or(slot, 0.0)
    }

    fn vector(&self, slot: usize) -> Vector4<f32> {
        self.slot(slot)
            .and_then(EvaluationResult::as_vector)
            .unwrap_or_else(Vector4::zeros)
    }

    /// Falls back to the rest pose when the producer could not deliver.
    fn pose(&self, slot: usize) -> &'a PoseHandle {
        self.slot(slot)
            .and_then(EvaluationResult::as_pose)
            .unwrap_or(self.rest_pose)
    }

    fn data(&self, slot: usize) -> Option<&'a DataObject> {
        self.slot(slot).and_then(EvaluationResult::as_data)
    }

    fn spring_properties(&self, slot: usize) -> Option<&'a SpringProperties> {
        self.data(slot).and_then(DataObject::as_spring_properties)
    }
}

fn acquire(frame: &Frame<'_>, node: &Node) -> Option<PoseMut> {
    let buffer = frame.pool.acquire();
    if buffer.is_none() {
        log::warn!(
            "node '{}': pose pool exhausted ({} buffers live)",
            node.id,
            frame.pool.live()
        );
    }
    buffer
}

fn acquire_copy(frame: &Frame<'_>, node: &Node, source: &[Transform]) -> Option<PoseMut> {
    let mut buffer = acquire(frame, node)?;
    buffer.copy_from_slice(source);
    Some(buffer)
}

fn xyz(v: &Vector4<f32>) -> Vector3<f32> {
    v.xyz()
}

/// Reads `(x, y, z, w)`; degenerate input becomes the identity.
fn to_rotation(v: &Vector4<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::try_new(Quaternion::from_vector(*v), QUATERNION_EPSILON)
        .unwrap_or_else(UnitQuaternion::identity)
}

fn from_rotation(q: &UnitQuaternion<f32>) -> Vector4<f32> {
    q.coords
}

fn soft_spring(inputs: &NodeInputs<'_>, slot: usize) -> Option<Spring> {
    inputs.spring_properties(slot).map(|props| props.spring)
}

pub(crate) fn evaluate_node(
    node: &Node,
    inputs: &NodeInputs<'_>,
    state: &mut NodeInstanceData,
    frame: &mut Frame<'_>,
) -> EvaluationResult {
    match &node.op {
        NodeOp::Sample(op) => {
            let sample = state.sample_state_mut();
            if inputs.connected(0) {
                sample.speed_mod = inputs.float(0);
            }
            let Some(mut buffer) = acquire(frame, node) else {
                return EvaluationResult::Empty;
            };
            op.clip
                .sample(sample.local_time, &mut sample.context, &mut buffer);
            let step = mem::take(&mut sample.pending_step);
            op.clip
                .sample_events(sample.local_time, step, &mut *frame.events);
            EvaluationResult::Pose(buffer.freeze())
        }
        NodeOp::StaticPose(op) => {
            let Some(mut buffer) = acquire(frame, node) else {
                return EvaluationResult::Empty;
            };
            op.clip.sample(0.0, state.clip_context_mut(), &mut buffer);
            EvaluationResult::Pose(buffer.freeze())
        }
        NodeOp::RestPose => EvaluationResult::Pose(frame.rest_pose.clone()),
        NodeOp::Blend2D(space) => {
            let query = Vector2::new(inputs.float(0), inputs.float(1));
            let last_triangle = state.last_triangle_mut();
            let located = space.locate(query, *last_triangle);
            *last_triangle = located.triangle;

            let layers: Vec<BlendLayer<'_>> = located
                .samples
                .iter()
                .zip(located.weights)
                .map(|(&sample, weight)| BlendLayer {
                    pose: inputs.pose(2 + sample).pose(),
                    weight,
                })
                .collect();
            let Some(mut buffer) = acquire(frame, node) else {
                return EvaluationResult::Empty;
            };
            blend_poses(&layers, &mut buffer);
            EvaluationResult::Pose(buffer.freeze())
        }
        NodeOp::IkTwoBone(op) => evaluate_ik(node, op, inputs, frame),
        NodeOp::SpringBone(op) => evaluate_spring_bone(node, op, inputs, state, frame),
        NodeOp::SpringProps(op) => spring_properties(op, inputs),
        NodeOp::LinearBox => {
            let limit = LinearLimit::Box {
                min: xyz(&inputs.vector(0)),
                max: xyz(&inputs.vector(1)),
            };
            EvaluationResult::Data(DataObject::LinearConstraint(LinearConstraint {
                limit,
                bounce: inputs.float(2),
                soft: soft_spring(inputs, 3),
            }))
        }
        NodeOp::LinearSphere => {
            let limit = LinearLimit::Sphere {
                radius: inputs.float(0),
            };
            EvaluationResult::Data(DataObject::LinearConstraint(LinearConstraint {
                limit,
                bounce: inputs.float(1),
                soft: soft_spring(inputs, 2),
            }))
        }
        NodeOp::AngleCone => {
            EvaluationResult::Data(DataObject::AngularConstraint(AngularConstraint::new(
                xyz(&inputs.vector(0)),
                inputs.float(1),
                inputs.float(2),
                soft_spring(inputs, 3),
            )))
        }
        NodeOp::Variable(var) => {
            EvaluationResult::Float(state.variable_value().unwrap_or(var.default))
        }
        NodeOp::FixedFloat(value) => EvaluationResult::Float(*value),
        NodeOp::FixedVector(value) => EvaluationResult::Vector(*value),
        NodeOp::MakeVector => EvaluationResult::Vector(Vector4::new(
            inputs.float(0),
            inputs.float(1),
            inputs.float(2),
            inputs.float(3),
        )),
        NodeOp::VectorMath(op) => {
            let (a, b) = (inputs.vector(0), inputs.vector(1));
            EvaluationResult::Vector(match op {
                VectorOp::Add => a + b,
                VectorOp::Sub => a - b,
                VectorOp::Mul => a.component_mul(&b),
                VectorOp::Div => a.zip_map(&b, |x, y| if y == 0.0 { 0.0 } else { x / y }),
            })
        }
        NodeOp::RotationMath(op) => {
            let a = to_rotation(&inputs.vector(0));
            let b = to_rotation(&inputs.vector(1));
            let q = match op {
                RotationOp::Compose => a * b,
                RotationOp::Difference => a * b.inverse(),
            };
            EvaluationResult::Vector(from_rotation(&q))
        }
        NodeOp::Smooth { percent } => {
            let input = inputs.float(0);
            let filter = state.filter_state_mut();
            let dt = mem::take(&mut filter.time_step);
            let value = match filter.value {
                Some(v) => v + (input - v) * (percent * dt).clamp(0.0, 1.0),
                None => input,
            };
            filter.value = Some(value);
            EvaluationResult::Float(value)
        }
        NodeOp::LimitRate { rate } => {
            let input = inputs.float(0);
            let filter = state.filter_state_mut();
            let dt = mem::take(&mut filter.time_step);
            let value = match filter.value {
                Some(v) => {
                    let max_step = rate * dt;
                    v + (input - v).clamp(-max_step, max_step)
                }
                None => input,
            };
            filter.value = Some(value);
            EvaluationResult::Float(value)
        }
        NodeOp::LocalToModel { parent } => {
            let pose = inputs.pose(0);
            let v = inputs.vector(1);
            let model = frame
                .model_space
                .ensure(frame.skeleton, pose.id(), pose, *parent);
            let p = model[*parent].transform_point(&xyz(&v));
            EvaluationResult::Vector(Vector4::new(p.x, p.y, p.z, v.w))
        }
        NodeOp::GetBone(op) => {
            let pose = inputs.pose(0);
            let transform = if op.model_space {
                frame
                    .model_space
                    .ensure(frame.skeleton, pose.id(), pose, op.bone)[op.bone]
            } else {
                pose[op.bone]
            };
            EvaluationResult::Vector(match op.channel {
                BoneChannel::Position => {
                    let t = transform.translation;
                    Vector4::new(t.x, t.y, t.z, 0.0)
                }
                BoneChannel::Rotation => from_rotation(&transform.rotation),
            })
        }
        NodeOp::SetBone(op) => evaluate_set_bone(node, op, inputs, frame),
    }
}

fn spring_properties(op: &SpringPropsOp, inputs: &NodeInputs<'_>) -> EvaluationResult {
    let props = SpringProperties::new(inputs.float(0), inputs.float(1), inputs.float(2))
        .with_gravity(xyz(&inputs.vector(3)))
        .with_up_axis(op.up_axis)
        .with_integration(op.integration);
    EvaluationResult::Data(DataObject::SpringProperties(props))
}

fn evaluate_ik(
    node: &Node,
    op: &IkTwoBoneOp,
    inputs: &NodeInputs<'_>,
    frame: &mut Frame<'_>,
) -> EvaluationResult {
    let pose = inputs.pose(0);
    let weight = inputs.float_or(3, 1.0).clamp(0.0, 1.0);
    if weight <= 0.0 {
        return EvaluationResult::Pose(pose.clone());
    }

    let deepest = op.start.max(op.mid).max(op.end);
    let model = frame
        .model_space
        .ensure(frame.skeleton, pose.id(), pose, deepest);
    let solver = TwoBoneIk {
        start: model[op.start],
        mid: model[op.mid],
        end: model[op.end],
        target: xyz(&inputs.vector(1)),
        pole: xyz(&inputs.vector(2)),
        mid_axis: op.mid_axis,
        soften: op.soften,
        weight,
    };
    let Some(corrections) = solver.solve() else {
        log::trace!("node '{}': degenerate ik chain, pose left untouched", node.id);
        return EvaluationResult::Pose(pose.clone());
    };

    let Some(mut buffer) = acquire_copy(frame, node, pose) else {
        return EvaluationResult::Empty;
    };
    buffer[op.start].rotation *= corrections.start;
    buffer[op.mid].rotation *= corrections.mid;
    frame
        .model_space
        .rebind(pose.id(), buffer.id(), op.start.min(op.mid));
    EvaluationResult::Pose(buffer.freeze())
}

fn evaluate_spring_bone(
    node: &Node,
    op: &SpringBoneOp,
    inputs: &NodeInputs<'_>,
    state: &mut NodeInstanceData,
    frame: &mut Frame<'_>,
) -> EvaluationResult {
    let pose = inputs.pose(0);
    let Some(physics) = frame.physics else {
        return EvaluationResult::Pose(pose.clone());
    };

    let model = frame
        .model_space
        .ensure(frame.skeleton, pose.id(), pose, op.bone);
    let animated = model[op.bone];
    let parent = op.parent.map_or_else(Transform::identity, |p| model[p]);

    let linear = inputs.spring_properties(1);
    let angular = inputs.spring_properties(2);
    let spring = state.spring_bone_state_mut();
    if spring.body.is_none() {
        spring.body = Some(Body::new(&animated));
        spring.stepped_frame = Some(frame.frame);
        spring.last_output = None;
        return EvaluationResult::Pose(pose.clone());
    }
    let stepped = spring.stepped_frame == Some(frame.frame);
    if let Some(body) = spring.body.as_mut().filter(|_| !stepped) {
        let output = body.update(&BodyInputs {
            step: physics.step_data(),
            timestep: physics.timestep(),
            linear,
            angular,
            linear_constraint: inputs.data(3).and_then(DataObject::as_linear_constraint),
            angular_constraint: inputs.data(4).and_then(DataObject::as_angular_constraint),
            animated: &animated,
            parent: &parent,
        });
        if output.is_none() {
            log::warn!(
                "node '{}': parent of bone {} is not invertible, skipping physics",
                node.id,
                op.bone
            );
        }
        spring.stepped_frame = Some(frame.frame);
        spring.last_output = output;
    }

    let Some(output) = spring.last_output else {
        return EvaluationResult::Pose(pose.clone());
    };
    if linear.is_none() && angular.is_none() {
        return EvaluationResult::Pose(pose.clone());
    }
    let Some(mut buffer) = acquire_copy(frame, node, pose) else {
        return EvaluationResult::Empty;
    };
    if linear.is_some() {
        buffer[op.bone].translation = output.translation;
    }
    if angular.is_some() {
        buffer[op.bone].rotation = output.rotation;
    }
    frame.model_space.rebind(pose.id(), buffer.id(), op.bone);
    EvaluationResult::Pose(buffer.freeze())
}

fn evaluate_set_bone(
    node: &Node,
    op: &BoneAccessOp,
    inputs: &NodeInputs<'_>,
    frame: &mut Frame<'_>,
) -> EvaluationResult {
    let pose = inputs.pose(0);
    let value = inputs.vector(1);

    let parent_model = match (op.model_space, op.parent) {
        (true, Some(parent)) => {
            let model = frame
                .model_space
                .ensure(frame.skeleton, pose.id(), pose, parent);
            Some(model[parent])
        }
        _ => None,
    };

    let mut local = pose[op.bone];
    match (op.channel, parent_model) {
        (BoneChannel::Position, None) => local.translation = xyz(&value),
        (BoneChannel::Position, Some(parent)) => {
            let Some(inverse) = parent.try_inverse() else {
                log::warn!(
                    "node '{}': parent of bone {} is not invertible",
                    node.id,
                    op.bone
                );
                return EvaluationResult::Pose(pose.clone());
            };
            local.translation = inverse.transform_point(&xyz(&value));
        }
        (BoneChannel::Rotation, None) => local.rotation = to_rotation(&value),
        (BoneChannel::Rotation, Some(parent)) => {
            local.rotation = parent.rotation.inverse() * to_rotation(&value);
        }
    }

    let Some(mut buffer) = acquire_copy(frame, node, pose) else {
        return EvaluationResult::Empty;
    };
    buffer[op.bone] = local;
    frame.model_space.rebind(pose.id(), buffer.id(), op.bone);
    EvaluationResult::Pose(buffer.freeze())
}
