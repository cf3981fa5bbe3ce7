use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use hashbrown::HashMap;
use kinegraph_animation_core::{AnimationSource, NullEventSink, Skeleton, Transform};
use kinegraph_test_fixtures::{clips, node_graphs, skeletons};
use nalgebra::{UnitQuaternion, Vector3};

use super::*;
use crate::compiler::{compile_default, CompileBindings};
use crate::types::{GraphDescription, NodeDescription};

struct Rig {
    skeleton: Arc<Skeleton>,
    clips: HashMap<String, Arc<dyn AnimationSource>>,
}

impl Rig {
    fn arm() -> Self {
        let skeleton = skeletons::load("arm").expect("arm skeleton");
        let clips = clips::library(&skeleton).expect("clip library");
        Self { skeleton, clips }
    }

    fn compile(&self, desc: &GraphDescription) -> Arc<GraphDefinition> {
        compile_default(
            desc,
            CompileBindings {
                skeleton: &self.skeleton,
                clips: &self.clips,
            },
        )
        .expect("graph compiles")
    }

    fn fixture(&self, name: &str) -> (EvaluationContext, PosePool) {
        let desc: GraphDescription = node_graphs::spec(name).expect("graph fixture");
        self.instantiate(&desc)
    }

    fn instantiate(&self, desc: &GraphDescription) -> (EvaluationContext, PosePool) {
        let definition = self.compile(desc);
        let pool = PosePool::new(definition.joint_count(), definition.pose_pool_capacity());
        (EvaluationContext::new(definition), pool)
    }

    fn joint(&self, name: &str) -> usize {
        self.skeleton.find_joint(name).expect("joint exists")
    }

    fn model(&self, local: &[Transform]) -> Vec<Transform> {
        let mut model = vec![Transform::identity(); local.len()];
        self.skeleton
            .local_to_model(local, &mut model, 0, local.len() - 1);
        model
    }
}

fn evaluate(ctx: &mut EvaluationContext, pool: &PosePool) -> Vec<Transform> {
    ctx.evaluate(pool, &mut NullEventSink)
        .expect("output pose")
        .to_vec()
}

fn local_time(ctx: &EvaluationContext, id: &str) -> f32 {
    let idx = ctx.definition().find_node(id).expect("node exists");
    ctx.instance(idx)
        .and_then(NodeInstanceData::sample_state)
        .map(|s| s.local_time)
        .expect("sample node")
}

fn float_result(ctx: &EvaluationContext, id: &str) -> f32 {
    let idx = ctx.definition().find_node(id).expect("node exists");
    ctx.result(idx)
        .and_then(EvaluationResult::as_float)
        .expect("float result")
}

fn z_rotation(degrees: f32) -> UnitQuaternion<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), degrees.to_radians())
}

// --- Pose pool ---------------------------------------------------------------

#[test]
fn it_should_stay_within_the_compiled_buffer_peak() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("reach-blend");
    for (x, y) in [(-1.0, 0.0), (0.3, 0.2), (0.0, 1.0), (4.0, -2.0)] {
        ctx.set_variable("blend_x", x);
        ctx.set_variable("blend_y", y);
        evaluate(&mut ctx, &pool);
        ctx.advance_time(1.0 / 30.0);
    }
    assert!(pool.peak() <= ctx.definition().peak_pose_buffers());
    // Only the output survives the pass.
    assert_eq!(pool.live(), 1);
}

#[test]
fn it_should_degrade_gracefully_when_the_pool_runs_dry() {
    let rig = Rig::arm();
    let (mut ctx, _) = rig.fixture("reach-blend");
    let tiny = PosePool::new(ctx.definition().joint_count(), 1);
    assert!(ctx.evaluate(&tiny, &mut NullEventSink).is_none());
    assert_eq!(tiny.live(), 0);
}

#[test]
fn it_should_refuse_a_pool_for_another_skeleton() {
    let rig = Rig::arm();
    let (mut ctx, _) = rig.fixture("idle-loop");
    let wrong = PosePool::new(2, 4);
    assert!(ctx.evaluate(&wrong, &mut NullEventSink).is_none());
}

// --- Blending ----------------------------------------------------------------

#[test]
fn it_should_reproduce_a_sample_pose_at_its_blend_point() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("reach-blend");
    let upper = rig.joint("upper_arm");

    ctx.set_variable("blend_x", -1.0);
    ctx.set_variable("blend_y", 0.0);
    let left = evaluate(&mut ctx, &pool);
    assert!(left[upper].rotation.angle_to(&z_rotation(30.0)) < 1e-4);

    ctx.set_variable("blend_x", 1.0);
    let right = evaluate(&mut ctx, &pool);
    assert!(right[upper].rotation.angle_to(&z_rotation(-30.0)) < 1e-4);
}

#[test]
fn it_should_give_identical_passes_within_a_frame() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("reach-blend");
    ctx.set_variable("blend_x", 0.25);
    ctx.set_variable("blend_y", 0.4);
    let first = evaluate(&mut ctx, &pool);
    let second = evaluate(&mut ctx, &pool);
    assert_eq!(first, second);
}

// --- Sampling and time -------------------------------------------------------

#[test]
fn it_should_wrap_the_loop_tracker_and_report_it() {
    let rig = Rig::arm();
    let (mut ctx, _) = rig.fixture("idle-loop");
    assert!(!ctx.advance_time(1.0));
    assert_relative_eq!(local_time(&ctx, "idle"), 0.5);
    assert!(ctx.advance_time(1.0));
    assert_relative_eq!(local_time(&ctx, "idle"), 0.0);
}

#[test]
fn it_should_apply_the_speed_modifier_read_during_evaluation() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("idle-loop");
    assert!(ctx.set_variable("SPEED", 1.0));
    assert_eq!(ctx.variable("speed"), Some(1.0));
    evaluate(&mut ctx, &pool);
    ctx.advance_time(0.5);
    assert_relative_eq!(local_time(&ctx, "idle"), 0.5);
}

#[test]
fn it_should_ignore_invalid_time_steps() {
    let rig = Rig::arm();
    let (mut ctx, _) = rig.fixture("idle-loop");
    ctx.advance_time(f32::NAN);
    ctx.advance_time(-1.0);
    assert_eq!(local_time(&ctx, "idle"), 0.0);
}

#[test]
fn it_should_emit_crossed_clip_events_once() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("idle-loop");
    let mut events: Vec<(String, String)> = Vec::new();
    ctx.evaluate(&pool, &mut events);
    assert!(events.is_empty());

    ctx.advance_time(1.0);
    ctx.evaluate(&pool, &mut events);
    ctx.evaluate(&pool, &mut events);
    assert_eq!(events, vec![("breath".to_string(), "in".to_string())]);
}

#[test]
fn it_should_list_variables_sorted_by_name() {
    let rig = Rig::arm();
    let (mut ctx, _) = rig.fixture("reach-blend");
    ctx.set_variable("blend_y", 2.0);
    assert_eq!(ctx.variables(), vec![("blend_x", 0.0), ("blend_y", 2.0)]);
    assert!(!ctx.set_variable("missing", 1.0));
    assert!(!ctx.set_variable("blend_x", f32::INFINITY));
    assert_eq!(ctx.variable("missing"), None);
}

// --- Synchronization ---------------------------------------------------------

#[test]
fn it_should_let_the_owner_win() {
    let rig = Rig::arm();
    let (mut owner, _) = rig.fixture("idle-loop");
    let (mut follower, _) = rig.fixture("idle-loop");

    owner.advance_time(0.6);
    follower.advance_time(1.4);
    assert_eq!(follower.synchronize_with(&owner, 0.0), 1);
    assert_relative_eq!(local_time(&follower, "idle"), 0.3);
    assert_relative_eq!(local_time(&owner, "idle"), 0.3);

    // Untagged nodes are left alone.
    owner.set_variable("speed", 2.0);
    follower.synchronize_with(&owner, 0.0);
    assert_eq!(follower.variable("speed"), Some(0.0));
}

#[test]
fn it_should_move_followers_by_the_correction() {
    let rig = Rig::arm();
    let (mut owner, _) = rig.fixture("idle-loop");
    let (mut follower, _) = rig.fixture("idle-loop");
    owner.advance_time(0.6);

    let owner = Mutex::new(owner);
    follower.synchronize(&owner, 0.2);
    assert_relative_eq!(local_time(&follower, "idle"), 0.4);
    let owner = owner.lock().expect("owner lock");
    assert_relative_eq!(local_time(&owner, "idle"), 0.3);
}

#[test]
fn it_should_skip_nodes_without_a_matching_owner() {
    let rig = Rig::arm();
    let (mut owner, _) = rig.fixture("reach-blend");
    let (mut follower, _) = rig.fixture("idle-loop");
    follower.advance_time(0.5);
    assert!(owner.sync_snapshot().is_empty());
    assert_eq!(follower.synchronize_with(&owner, 0.0), 0);
    owner.advance_time(0.5);
    assert_relative_eq!(local_time(&follower, "idle"), 0.25);
}

// --- Physics -----------------------------------------------------------------

#[test]
fn it_should_leave_the_pose_untouched_without_elapsed_time() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("tail-spring");
    let tail = rig.joint("tail");
    let rest = rig.skeleton.rest_pose()[tail];

    let seeded = evaluate(&mut ctx, &pool);
    assert_relative_eq!(seeded[tail].translation, rest.translation, epsilon = 1e-6);

    for _ in 0..3 {
        ctx.advance_time(0.0);
        let pose = evaluate(&mut ctx, &pool);
        assert_relative_eq!(pose[tail].translation, rest.translation, epsilon = 1e-5);
    }
}

#[test]
fn it_should_sag_a_spring_bone_under_gravity() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("tail-spring");
    assert!(ctx.requires_physics_integrator());
    let tail = rig.joint("tail");

    evaluate(&mut ctx, &pool);
    let mut pose = Vec::new();
    for _ in 0..60 {
        ctx.advance_time(1.0 / 60.0);
        pose = evaluate(&mut ctx, &pool);
    }
    let offset = pose[tail].translation - rig.skeleton.rest_pose()[tail].translation;
    assert!(offset.iter().all(|c| c.is_finite()));
    assert!(offset.z < -0.02, "tail should hang below its rest position, got {offset}");
    assert_relative_eq!(offset.x, 0.0, epsilon = 1e-4);
}

#[test]
fn it_should_step_spring_bones_once_per_frame() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("tail-spring");
    evaluate(&mut ctx, &pool);
    ctx.advance_time(1.0 / 60.0);
    let first = evaluate(&mut ctx, &pool);
    let again = evaluate(&mut ctx, &pool);
    assert_eq!(first, again);
}

#[test]
fn it_should_reseed_bodies_after_a_physics_reset() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("tail-spring");
    let tail = rig.joint("tail");
    evaluate(&mut ctx, &pool);
    for _ in 0..10 {
        ctx.advance_time(1.0 / 60.0);
        evaluate(&mut ctx, &pool);
    }
    ctx.reset_physics();
    let pose = evaluate(&mut ctx, &pool);
    assert_relative_eq!(
        pose[tail].translation,
        rig.skeleton.rest_pose()[tail].translation,
        epsilon = 1e-6
    );
}

// --- Pose modifiers ----------------------------------------------------------

#[test]
fn it_should_write_local_and_model_space_bone_values() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("bone-setters");
    assert!(ctx.requires_rest_pose());
    let pose = evaluate(&mut ctx, &pool);

    let lower = rig.joint("lower_arm");
    assert!(pose[lower].rotation.angle_to(&z_rotation(45.0)) < 1e-4);
    let model = rig.model(&pose);
    assert_relative_eq!(
        model[rig.joint("hand")].translation,
        Vector3::new(0.1, 0.2, 0.3),
        epsilon = 1e-4
    );
}

#[test]
fn it_should_reach_the_ik_target() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("arm-ik");
    let pose = evaluate(&mut ctx, &pool);
    let model = rig.model(&pose);
    assert_relative_eq!(
        model[rig.joint("hand")].translation,
        Vector3::new(0.6, 0.2, 1.8),
        epsilon = 1e-3
    );
}

#[test]
fn it_should_pass_the_pose_through_at_zero_ik_weight() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("arm-ik");
    ctx.set_variable("ik_weight", 0.0);
    let pose = evaluate(&mut ctx, &pool);
    let lower = rig.joint("lower_arm");
    assert!(pose[lower].rotation.angle_to(&UnitQuaternion::identity()) < 1e-6);
    let model = rig.model(&pose);
    let rest = rig.model(rig.skeleton.rest_pose());
    let hand = rig.joint("hand");
    assert_relative_eq!(model[hand].translation, rest[hand].translation, epsilon = 1e-6);
}

#[test]
fn it_should_reject_a_rest_pose_of_the_wrong_size() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.fixture("bone-setters");
    assert!(!ctx.set_rest_pose(PoseHandle::detached(vec![Transform::identity(); 2])));

    let mut raised = rig.skeleton.rest_pose().to_vec();
    raised[0].translation.z = 1.0;
    assert!(ctx.set_rest_pose(PoseHandle::detached(raised)));
    let pose = evaluate(&mut ctx, &pool);
    assert_relative_eq!(pose[0].translation.z, 1.0);
}

// --- Value filters -----------------------------------------------------------

fn filter_graph(kind: &str, literal: &str, value: f32) -> GraphDescription {
    GraphDescription {
        nodes: vec![
            NodeDescription::new("base", "rest_pose"),
            NodeDescription::new("input", "var").with_literal("name", "input"),
            NodeDescription::new("filter", kind)
                .with_literal(literal, value)
                .with_input("input", "input"),
            NodeDescription::new("offset", "make_vec")
                .with_input("x", "filter")
                .with_input("y", "filter")
                .with_input("z", "filter")
                .with_input("w", "filter"),
            NodeDescription::new("out", "set_bone_pos")
                .with_literal("bone", "hand")
                .with_input("pose", "base")
                .with_input("position", "offset"),
        ],
        root: "out".into(),
    }
}

#[test]
fn it_should_smooth_toward_the_input_once_per_frame() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.instantiate(&filter_graph("smooth_val", "percent", 2.0_f32));
    ctx.set_variable("input", 1.0);
    evaluate(&mut ctx, &pool);
    assert_relative_eq!(float_result(&ctx, "filter"), 1.0);

    ctx.set_variable("input", 3.0);
    ctx.advance_time(0.25);
    evaluate(&mut ctx, &pool);
    assert_relative_eq!(float_result(&ctx, "filter"), 2.0);
    evaluate(&mut ctx, &pool);
    assert_relative_eq!(float_result(&ctx, "filter"), 2.0);
}

#[test]
fn it_should_limit_the_rate_of_change() {
    let rig = Rig::arm();
    let (mut ctx, pool) = rig.instantiate(&filter_graph("limit_roc", "roc", 4.0_f32));
    ctx.set_variable("input", 1.0);
    evaluate(&mut ctx, &pool);

    ctx.set_variable("input", -3.0);
    ctx.advance_time(0.25);
    evaluate(&mut ctx, &pool);
    assert_relative_eq!(float_result(&ctx, "filter"), 0.0);

    ctx.advance_time(1.0);
    let pose = evaluate(&mut ctx, &pool);
    assert_relative_eq!(float_result(&ctx, "filter"), -3.0);
    assert_relative_eq!(pose[rig.joint("hand")].translation.y, -3.0);
}
