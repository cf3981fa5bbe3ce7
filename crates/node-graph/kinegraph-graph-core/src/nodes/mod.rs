//! Builtin node kinds: their signatures, literal binding and the bound operation.
//!
//! Input slots are numbered in signature order, followed by the variadic group sorted by
//! index. Evaluation lives in [`crate::eval`]; this module only describes and binds.

use std::sync::Arc;

use kinegraph_animation_core::AnimationSource;
use kinegraph_physics_core::Integration;
use nalgebra::{Vector3, Vector4};

use crate::schema::{BindContext, BindError, LiteralSpec, NodeSignature, PortSpec, VariadicSpec};
use crate::types::{Literal, LiteralType, ValueType};

pub mod blend_space;

pub use blend_space::{BlendSpace, BlendWeights};

#[derive(Debug, Clone)]
pub struct ClipOp {
    pub clip: Arc<dyn AnimationSource>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkTwoBoneOp {
    pub start: usize,
    pub mid: usize,
    pub end: usize,
    pub mid_axis: Vector3<f32>,
    pub soften: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpringBoneOp {
    pub bone: usize,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringPropsOp {
    pub up_axis: Vector3<f32>,
    pub integration: Integration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableOp {
    pub name: String,
    pub default: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Add,
    Sub,
    Mul,
    /// Component-wise; a zero divisor yields zero for that component.
    Div,
}

/// Vectors read as quaternions `(x, y, z, w)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationOp {
    /// `q1 * q2`
    Compose,
    /// `q1 * q2⁻¹`
    Difference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoneChannel {
    Rotation,
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoneAccessOp {
    pub bone: usize,
    pub parent: Option<usize>,
    pub channel: BoneChannel,
    pub model_space: bool,
}

/// A node kind with its literals bound.
#[derive(Debug, Clone)]
pub enum NodeOp {
    Sample(ClipOp),
    StaticPose(ClipOp),
    RestPose,
    Blend2D(BlendSpace),
    IkTwoBone(IkTwoBoneOp),
    SpringBone(SpringBoneOp),
    SpringProps(SpringPropsOp),
    LinearBox,
    LinearSphere,
    AngleCone,
    Variable(VariableOp),
    FixedFloat(f32),
    FixedVector(Vector4<f32>),
    MakeVector,
    VectorMath(VectorOp),
    RotationMath(RotationOp),
    Smooth { percent: f32 },
    LimitRate { rate: f32 },
    LocalToModel { parent: usize },
    GetBone(BoneAccessOp),
    SetBone(BoneAccessOp),
}

impl NodeOp {
    /// Whether evaluating the node takes a buffer from the pose pool.
    pub fn acquires_pose(&self) -> bool {
        matches!(
            self,
            NodeOp::Sample(_)
                | NodeOp::StaticPose(_)
                | NodeOp::Blend2D(_)
                | NodeOp::IkTwoBone(_)
                | NodeOp::SpringBone(_)
                | NodeOp::SetBone(_)
        )
    }

    /// Duration of the sampled clip for time-owning nodes.
    pub fn clip_duration(&self) -> Option<f32> {
        match self {
            NodeOp::Sample(op) => Some(op.clip.duration()),
            _ => None,
        }
    }
}

// Helpers
fn port(id: &'static str, ty: ValueType) -> PortSpec {
    PortSpec {
        id,
        ty,
        optional: false,
    }
}

fn optional(id: &'static str, ty: ValueType) -> PortSpec {
    PortSpec {
        id,
        ty,
        optional: true,
    }
}

fn required_literal(id: &'static str, ty: LiteralType) -> LiteralSpec {
    LiteralSpec {
        id,
        ty,
        default: None,
    }
}

fn literal(id: &'static str, default: Literal) -> LiteralSpec {
    LiteralSpec {
        id,
        ty: default.literal_type(),
        default: Some(default),
    }
}

fn signature(
    name: &'static str,
    category: &'static str,
    inputs: Vec<PortSpec>,
    literals: Vec<LiteralSpec>,
    output: ValueType,
    factory: fn(&BindContext<'_>) -> Result<NodeOp, BindError>,
) -> NodeSignature {
    NodeSignature {
        name,
        category,
        inputs,
        variadic: None,
        literals,
        output,
        factory,
    }
}

fn bind_anim(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    Ok(NodeOp::Sample(ClipOp {
        clip: ctx.clip("file")?,
    }))
}

fn bind_static_pose(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    Ok(NodeOp::StaticPose(ClipOp {
        clip: ctx.clip("file")?,
    }))
}

fn bind_blend_2d(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    let space = BlendSpace::from_flat(ctx.float_array("points")).map_err(BindError::BlendSpace)?;
    if space.points().len() != ctx.variadic_count {
        return Err(BindError::BlendSpace(format!(
            "{} points but {} poses connected",
            space.points().len(),
            ctx.variadic_count
        )));
    }
    Ok(NodeOp::Blend2D(space))
}

fn bind_ik_two_bone(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    Ok(NodeOp::IkTwoBone(IkTwoBoneOp {
        start: ctx.joint("start")?,
        mid: ctx.joint("mid")?,
        end: ctx.joint("end")?,
        mid_axis: Vector3::new(ctx.float("mid_x"), ctx.float("mid_y"), ctx.float("mid_z")),
        soften: ctx.float("soften").clamp(0.0, 1.0),
    }))
}

fn bind_spring_bone(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    let bone = ctx.joint("bone")?;
    Ok(NodeOp::SpringBone(SpringBoneOp {
        bone,
        parent: ctx.skeleton.parent(bone),
    }))
}

fn bind_spring_props(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    Ok(NodeOp::SpringProps(SpringPropsOp {
        up_axis: Vector3::new(ctx.float("up_x"), ctx.float("up_y"), ctx.float("up_z")),
        integration: if ctx.boolean("verlet") {
            Integration::Verlet
        } else {
            Integration::SemiImplicitEuler
        },
    }))
}

fn bind_variable(ctx: &BindContext<'_>) -> Result<NodeOp, BindError> {
    Ok(NodeOp::Variable(VariableOp {
        name: ctx.text("name").to_string(),
        default: ctx.float("defVal"),
    }))
}

fn bind_bone_access(
    ctx: &BindContext<'_>,
    channel: BoneChannel,
    setter: bool,
) -> Result<NodeOp, BindError> {
    let bone = ctx.joint("bone")?;
    let model_space = ctx.boolean("is_ms");
    let parent = ctx.skeleton.parent(bone);
    if setter && model_space && parent.is_none() {
        return Err(BindError::MissingParent(ctx.text("bone").to_string()));
    }
    let op = BoneAccessOp {
        bone,
        parent,
        channel,
        model_space,
    };
    Ok(if setter {
        NodeOp::SetBone(op)
    } else {
        NodeOp::GetBone(op)
    })
}

fn bone_literals() -> Vec<LiteralSpec> {
    vec![
        required_literal("bone", LiteralType::Text),
        literal("is_ms", Literal::Bool(false)),
    ]
}

fn constraint_tail() -> [PortSpec; 2] {
    [
        optional("bounce", ValueType::Float),
        optional("soft", ValueType::Data),
    ]
}

/// Every builtin node kind, in registration order.
pub fn signatures() -> Vec<NodeSignature> {
    use ValueType::*;
    let mut nodes = Vec::new();

    // Pose sources
    nodes.push(signature(
        "anim",
        "Animation",
        vec![optional("speedMod", Float)],
        vec![required_literal("file", LiteralType::Text)],
        Pose,
        bind_anim,
    ));
    nodes.push(signature(
        "static_pose",
        "Animation",
        vec![],
        vec![required_literal("file", LiteralType::Text)],
        Pose,
        bind_static_pose,
    ));
    nodes.push(signature(
        "rest_pose",
        "Animation",
        vec![],
        vec![],
        Pose,
        |_| Ok(NodeOp::RestPose),
    ));
    nodes.push(NodeSignature {
        variadic: Some(VariadicSpec {
            prefix: "pose",
            ty: Pose,
            min: 3,
        }),
        ..signature(
            "blend_2d",
            "Animation",
            vec![port("x", Float), port("y", Float)],
            vec![required_literal("points", LiteralType::FloatArray)],
            Pose,
            bind_blend_2d,
        )
    });

    // Pose modifiers
    nodes.push(signature(
        "ik_two_bone",
        "Pose",
        vec![
            port("pose", Pose),
            port("target", Vector),
            optional("pole", Vector),
            optional("weight", Float),
        ],
        vec![
            required_literal("start", LiteralType::Text),
            required_literal("mid", LiteralType::Text),
            required_literal("end", LiteralType::Text),
            literal("mid_x", Literal::Float(0.0)),
            literal("mid_y", Literal::Float(0.0)),
            literal("mid_z", Literal::Float(1.0)),
            literal("soften", Literal::Float(0.95)),
        ],
        Pose,
        bind_ik_two_bone,
    ));
    nodes.push(signature(
        "spring_bone",
        "Physics",
        vec![
            port("pose", Pose),
            optional("linear", Data),
            optional("angular", Data),
            optional("linear_constr", Data),
            optional("angular_constr", Data),
        ],
        vec![required_literal("bone", LiteralType::Text)],
        Pose,
        bind_spring_bone,
    ));
    nodes.push(signature(
        "set_bone_rot",
        "Pose",
        vec![port("pose", Pose), port("rot", Vector)],
        bone_literals(),
        Pose,
        |ctx| bind_bone_access(ctx, BoneChannel::Rotation, true),
    ));
    nodes.push(signature(
        "set_bone_pos",
        "Pose",
        vec![port("pose", Pose), port("position", Vector)],
        bone_literals(),
        Pose,
        |ctx| bind_bone_access(ctx, BoneChannel::Position, true),
    ));

    // Physics data
    nodes.push(signature(
        "spring_props",
        "Physics",
        vec![
            port("stiff", Float),
            port("damp", Float),
            port("mass", Float),
            optional("gravity", Vector),
        ],
        vec![
            literal("up_x", Literal::Float(0.0)),
            literal("up_y", Literal::Float(0.0)),
            literal("up_z", Literal::Float(1.0)),
            literal("verlet", Literal::Bool(false)),
        ],
        Data,
        bind_spring_props,
    ));
    let mut box_inputs = vec![port("min", Vector), port("max", Vector)];
    box_inputs.extend(constraint_tail());
    nodes.push(signature(
        "linear_box_constr",
        "Physics",
        box_inputs,
        vec![],
        Data,
        |_| Ok(NodeOp::LinearBox),
    ));
    let mut sphere_inputs = vec![port("radius", Float)];
    sphere_inputs.extend(constraint_tail());
    nodes.push(signature(
        "linear_sphere_constr",
        "Physics",
        sphere_inputs,
        vec![],
        Data,
        |_| Ok(NodeOp::LinearSphere),
    ));
    let mut cone_inputs = vec![port("axis", Vector), port("halfAngle", Float)];
    cone_inputs.extend(constraint_tail());
    nodes.push(signature(
        "angle_cone_constr",
        "Physics",
        cone_inputs,
        vec![],
        Data,
        |_| Ok(NodeOp::AngleCone),
    ));

    // Values
    nodes.push(signature(
        "var",
        "Value",
        vec![],
        vec![
            required_literal("name", LiteralType::Text),
            literal("defVal", Literal::Float(0.0)),
        ],
        Float,
        bind_variable,
    ));
    nodes.push(signature(
        "fixed_val",
        "Value",
        vec![],
        vec![required_literal("val", LiteralType::Float)],
        Float,
        |ctx| Ok(NodeOp::FixedFloat(ctx.float("val"))),
    ));
    nodes.push(signature(
        "fixed_vec",
        "Value",
        vec![],
        ["x", "y", "z", "w"]
            .into_iter()
            .map(|id| literal(id, Literal::Float(0.0)))
            .collect(),
        Vector,
        |ctx| {
            Ok(NodeOp::FixedVector(Vector4::new(
                ctx.float("x"),
                ctx.float("y"),
                ctx.float("z"),
                ctx.float("w"),
            )))
        },
    ));
    nodes.push(signature(
        "make_vec",
        "Value",
        vec![
            port("x", Float),
            port("y", Float),
            port("z", Float),
            port("w", Float),
        ],
        vec![],
        Vector,
        |_| Ok(NodeOp::MakeVector),
    ));
    nodes.push(signature(
        "smooth_val",
        "Value",
        vec![port("input", Float)],
        vec![required_literal("percent", LiteralType::Float)],
        Float,
        |ctx| {
            Ok(NodeOp::Smooth {
                percent: ctx.float("percent").max(0.0),
            })
        },
    ));
    nodes.push(signature(
        "limit_roc",
        "Value",
        vec![port("input", Float)],
        vec![required_literal("roc", LiteralType::Float)],
        Float,
        |ctx| {
            Ok(NodeOp::LimitRate {
                rate: ctx.float("roc").abs(),
            })
        },
    ));

    // Vector math
    let vector_pair = || vec![port("1", Vector), port("2", Vector)];
    nodes.push(signature("add_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::VectorMath(VectorOp::Add))
    }));
    nodes.push(signature("sub_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::VectorMath(VectorOp::Sub))
    }));
    nodes.push(signature("mult_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::VectorMath(VectorOp::Mul))
    }));
    nodes.push(signature("div_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::VectorMath(VectorOp::Div))
    }));
    nodes.push(signature("add_rot_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::RotationMath(RotationOp::Compose))
    }));
    nodes.push(signature("sub_rot_vecs", "Math", vector_pair(), vec![], Vector, |_| {
        Ok(NodeOp::RotationMath(RotationOp::Difference))
    }));

    // Bone queries
    nodes.push(signature(
        "local_to_model",
        "Pose",
        vec![port("pose", Pose), port("vec", Vector)],
        vec![required_literal("parentBone", LiteralType::Text)],
        Vector,
        |ctx| {
            Ok(NodeOp::LocalToModel {
                parent: ctx.joint("parentBone")?,
            })
        },
    ));
    nodes.push(signature(
        "get_bone_rot",
        "Pose",
        vec![port("pose", Pose)],
        bone_literals(),
        Vector,
        |ctx| bind_bone_access(ctx, BoneChannel::Rotation, false),
    ));
    nodes.push(signature(
        "get_bone_pos",
        "Pose",
        vec![port("pose", Pose)],
        bone_literals(),
        Vector,
        |ctx| bind_bone_access(ctx, BoneChannel::Position, false),
    ));

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_declare_unique_slot_names() {
        for sig in signatures() {
            let mut ids: Vec<&str> = sig.inputs.iter().map(|p| p.id).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), sig.inputs.len(), "duplicate slot on '{}'", sig.name);
        }
    }

    #[test]
    fn it_should_list_pose_producers_in_registration_order() {
        let sources = signatures()
            .into_iter()
            .filter(|s| s.output == ValueType::Pose)
            .map(|s| s.name)
            .collect::<Vec<_>>();
        assert_eq!(
            sources,
            [
                "anim",
                "static_pose",
                "rest_pose",
                "blend_2d",
                "ik_two_bone",
                "spring_bone",
                "set_bone_rot",
                "set_bone_pos"
            ]
        );
    }
}
