use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use hashbrown::HashMap;
use kinegraph_animation_core::{AnimationSource, NullEventSink, Skeleton, Transform};
use kinegraph_graph_core::{
    compile_default, CompileBindings, CompileError, EvaluationContext, GraphDefinition,
    GraphDescription, NodeDescription, NodeInstanceData, NodeTypeRegistry, PosePool,
    ProceduralGenerator, SharedGenerator, SyncGroup,
};
use kinegraph_test_fixtures::{clips, node_graphs, skeletons};
use nalgebra::Vector3;

fn arm() -> (Arc<Skeleton>, HashMap<String, Arc<dyn AnimationSource>>) {
    let skeleton = skeletons::load("arm").expect("arm skeleton");
    let library = clips::library(&skeleton).expect("clip library");
    (skeleton, library)
}

fn compile_desc(desc: &GraphDescription) -> Result<Arc<GraphDefinition>, CompileError> {
    let (skeleton, library) = arm();
    compile_default(
        desc,
        CompileBindings {
            skeleton: &skeleton,
            clips: &library,
        },
    )
}

fn compile_fixture(name: &str) -> Arc<GraphDefinition> {
    let desc: GraphDescription = node_graphs::spec(name).expect("graph fixture");
    compile_desc(&desc).unwrap_or_else(|err| panic!("fixture '{name}' should compile: {err}"))
}

fn run_frames(ctx: &mut EvaluationContext, pool: &PosePool, frames: usize) -> Vec<Vec<Transform>> {
    (0..frames)
        .map(|i| {
            let x = (i as f32 * 0.2).sin() * 0.3;
            ctx.set_root_transform(Transform::from_translation(Vector3::new(x, 0.0, 0.0)));
            ctx.advance_time(1.0 / 30.0);
            ctx.evaluate(pool, &mut NullEventSink)
                .expect("output pose")
                .to_vec()
        })
        .collect()
}

fn sample_time(generator: &SharedGenerator, id: &str) -> f32 {
    let guard = generator.lock().expect("generator lock");
    let idx = guard.definition().find_node(id).expect("node exists");
    guard
        .context()
        .instance(idx)
        .and_then(NodeInstanceData::sample_state)
        .map(|s| s.local_time)
        .expect("sample node")
}

// --- Fixtures ---

#[test]
fn it_should_compile_and_evaluate_every_fixture_graph() {
    for name in node_graphs::keys() {
        let definition = compile_fixture(&name);
        let pool = PosePool::new(definition.joint_count(), definition.pose_pool_capacity());
        let mut ctx = EvaluationContext::new(Arc::clone(&definition));
        for frame in run_frames(&mut ctx, &pool, 10) {
            assert_eq!(frame.len(), definition.joint_count(), "fixture '{name}'");
            assert!(frame.iter().all(Transform::is_finite), "fixture '{name}'");
        }
        assert!(pool.peak() <= definition.peak_pose_buffers(), "fixture '{name}'");
    }
}

#[test]
fn it_should_produce_identical_poses_for_instances_of_one_definition() {
    let definition = compile_fixture("tail-spring");
    let pool = PosePool::new(definition.joint_count(), definition.pose_pool_capacity() * 2);
    let mut first = EvaluationContext::new(Arc::clone(&definition));
    let mut second = EvaluationContext::new(definition);

    let a = run_frames(&mut first, &pool, 45);
    let b = run_frames(&mut second, &pool, 45);
    assert_eq!(a, b);
}

#[test]
fn it_should_report_physics_and_rest_pose_needs() {
    let spring = compile_fixture("tail-spring");
    assert!(spring.needs_physics_integrator());
    assert!(EvaluationContext::new(spring).physics().is_some());

    let blend = compile_fixture("reach-blend");
    assert!(!blend.needs_physics_integrator());
    assert!(blend.needs_rest_pose());
    assert!(EvaluationContext::new(blend).physics().is_none());
}

#[test]
fn it_should_reject_graphs_with_unknown_node_types() {
    let desc = GraphDescription {
        nodes: vec![NodeDescription::new("root", "no_such_node")],
        root: "root".into(),
    };
    match compile_desc(&desc) {
        Err(CompileError::UnknownNodeType { node, type_name }) => {
            assert_eq!(node, "root");
            assert_eq!(type_name, "no_such_node");
        }
        other => panic!("expected unknown node type, got {other:?}"),
    }
}

// --- Generators ---

#[test]
fn it_should_keep_followers_in_step_across_threads() {
    let definition = compile_fixture("idle-loop");
    let owner = ProceduralGenerator::new(Arc::clone(&definition)).into_shared();
    let follower = ProceduralGenerator::new(definition).into_shared();
    follower.lock().expect("lock").set_speed(0.5);
    let group = std::sync::Mutex::new(SyncGroup::with_owner(&owner));

    for _ in 0..12 {
        thread::scope(|scope| {
            for member in [&follower, &owner] {
                let group = &group;
                scope.spawn(move || {
                    let mut group = group.lock().expect("group lock");
                    let mut guard = member.lock().expect("member lock");
                    guard.advance_time(1.0 / 30.0);
                    group.member_advanced(member, &mut guard, 1.0 / 30.0);
                });
            }
        });
        assert_relative_eq!(
            sample_time(&follower, "idle"),
            sample_time(&owner, "idle"),
            epsilon = 1e-5
        );
    }
}

#[test]
fn it_should_generate_poses_through_the_generator() {
    let definition = compile_fixture("idle-loop");
    let pool = PosePool::new(definition.joint_count(), definition.pose_pool_capacity());
    let mut generator = ProceduralGenerator::new(definition);
    assert!(generator.set_variable("speed", 0.0));
    generator.advance_time(1.0);
    let mut events: Vec<(String, String)> = Vec::new();
    let pose = generator
        .generate(&pool, &mut events)
        .expect("output pose")
        .to_vec();
    assert_eq!(pose.len(), pool.joint_count());
    assert_eq!(events, vec![("breath".to_string(), "in".to_string())]);
}

// --- Registry ---

#[test]
fn it_should_export_the_builtin_catalogue() {
    let export = NodeTypeRegistry::builtin().export_json();
    let nodes = export["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), NodeTypeRegistry::builtin().len());
    let names: Vec<&str> = nodes
        .iter()
        .filter_map(|node| node["name"].as_str())
        .collect();
    for name in ["anim", "blend_2d", "spring_bone", "ik_two_bone"] {
        assert!(names.contains(&name), "missing '{name}' in export");
    }
    assert!(nodes.iter().all(|node| node.get("factory").is_none()));
}
