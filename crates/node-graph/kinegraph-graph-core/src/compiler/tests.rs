use std::sync::Arc;

use hashbrown::HashMap;
use kinegraph_animation_core::{AnimationSource, Skeleton};
use kinegraph_test_fixtures::{clips, node_graphs, skeletons};

use super::*;
use crate::schema::BindError;
use crate::types::{Literal, NodeDescription};

fn arm() -> (Arc<Skeleton>, HashMap<String, Arc<dyn AnimationSource>>) {
    let skeleton = skeletons::load("arm").expect("arm skeleton");
    let clips = clips::library(&skeleton).expect("clip library");
    (skeleton, clips)
}

fn compile_with(
    desc: &GraphDescription,
    options: &CompileOptions,
) -> Result<Arc<GraphDefinition>, CompileError> {
    let (skeleton, clips) = arm();
    compile(
        desc,
        NodeTypeRegistry::builtin(),
        CompileBindings {
            skeleton: &skeleton,
            clips: &clips,
        },
        options,
    )
}

fn compile_desc(desc: &GraphDescription) -> Result<Arc<GraphDefinition>, CompileError> {
    compile_with(desc, &CompileOptions::default())
}

fn fixture(name: &str) -> GraphDescription {
    node_graphs::spec(name).expect("graph fixture")
}

fn graph(root: &str, nodes: Vec<NodeDescription>) -> GraphDescription {
    GraphDescription {
        nodes,
        root: root.to_string(),
    }
}

fn static_pose(id: &str, clip: &str) -> NodeDescription {
    NodeDescription::new(id, "static_pose").with_literal("file", clip)
}

fn ids(definition: &GraphDefinition) -> Vec<&str> {
    definition.nodes().iter().map(|n| n.id.as_str()).collect()
}

// --- Accepted graphs -----------------------------------------------------

#[test]
fn it_should_compile_every_fixture_graph() {
    for name in node_graphs::keys() {
        let definition = compile_desc(&fixture(&name))
            .unwrap_or_else(|err| panic!("fixture '{name}' should compile: {err}"));
        assert_eq!(definition.output(), definition.nodes().len() - 1);
        assert!(definition.peak_pose_buffers() <= definition.pose_pool_capacity());
    }
}

#[test]
fn it_should_order_producers_before_consumers() {
    for name in node_graphs::keys() {
        let definition = compile_desc(&fixture(&name)).expect("fixture compiles");
        for (idx, node) in definition.nodes().iter().enumerate() {
            for input in node.inputs.iter().filter_map(InputRef::index) {
                assert!(input < idx, "'{}' reads a later node in '{name}'", node.id);
            }
            assert!(node.releases.iter().all(|&r| r < idx));
        }
    }
}

#[test]
fn it_should_compile_deterministically() {
    let desc = fixture("reach-blend");
    let first = compile_desc(&desc).expect("compiles");
    for _ in 0..8 {
        let again = compile_desc(&desc).expect("compiles");
        assert_eq!(ids(&first), ids(&again));
        let releases = |d: &GraphDefinition| {
            d.nodes()
                .iter()
                .map(|n| n.releases.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(releases(&first), releases(&again));
    }
}

#[test]
fn it_should_prune_unreachable_nodes() {
    let definition = compile_desc(&fixture("reach-blend")).expect("compiles");
    assert!(definition.find_node("unused").is_none());
    assert_eq!(definition.nodes().len(), 6);
    assert!(!definition.needs_rest_pose());
}

#[test]
fn it_should_order_variadic_inputs_by_index() {
    let definition = compile_desc(&fixture("reach-blend")).expect("compiles");
    let blend = &definition.nodes()[definition.output()];
    let sources: Vec<&str> = blend.inputs[2..]
        .iter()
        .filter_map(InputRef::index)
        .map(|idx| definition.nodes()[idx].id.as_str())
        .collect();
    assert_eq!(sources, ["left", "right", "up"]);
}

// --- Release scheduling --------------------------------------------------

#[test]
fn it_should_release_blend_inputs_at_the_blend() {
    let definition = compile_desc(&fixture("reach-blend")).expect("compiles");
    let blend = &definition.nodes()[definition.output()];
    let mut released: Vec<&str> = blend
        .releases
        .iter()
        .map(|&idx| definition.nodes()[idx].id.as_str())
        .collect();
    released.sort_unstable();
    assert_eq!(released, ["left", "right", "up"]);
    assert_eq!(definition.peak_pose_buffers(), 4);
}

#[test]
fn it_should_release_shared_pose_after_its_last_consumer() {
    let desc = graph(
        "set",
        vec![
            NodeDescription::new("set", "set_bone_rot")
                .with_literal("bone", "lower_arm")
                .with_input("pose", "base")
                .with_input("rot", "rot"),
            NodeDescription::new("rot", "get_bone_rot")
                .with_literal("bone", "upper_arm")
                .with_input("pose", "base"),
            static_pose("base", "t-pose"),
        ],
    );
    let definition = compile_desc(&desc).expect("compiles");
    assert_eq!(ids(&definition), ["base", "rot", "set"]);
    assert!(definition.nodes()[1].releases.is_empty());
    assert_eq!(definition.nodes()[2].releases, [0]);
    assert_eq!(definition.peak_pose_buffers(), 2);
}

#[test]
fn it_should_reject_graphs_exceeding_the_pose_budget() {
    let options = CompileOptions {
        pose_pool_capacity: 3,
        ..CompileOptions::default()
    };
    let err = compile_with(&fixture("reach-blend"), &options).expect_err("needs four buffers");
    assert!(matches!(
        err,
        CompileError::PoseBudgetExceeded {
            peak: 4,
            capacity: 3
        }
    ));
}

// --- Derived properties --------------------------------------------------

#[test]
fn it_should_derive_runtime_requirements() {
    let spring = compile_desc(&fixture("tail-spring")).expect("compiles");
    assert!(spring.needs_physics_integrator());
    assert!(!spring.needs_rest_pose());

    let setters = compile_desc(&fixture("bone-setters")).expect("compiles");
    assert!(setters.needs_rest_pose());
    assert!(!setters.needs_physics_integrator());
    assert!(setters.loop_tracker().is_none());
}

#[test]
fn it_should_track_the_longest_clip_for_looping() {
    let desc = graph(
        "blend",
        vec![
            NodeDescription::new("blend", "blend_2d")
                .with_literal("points", vec![0.0_f32, 0.0, 1.0, 0.0, 0.0, 1.0])
                .with_input("x", "zero")
                .with_input("y", "zero")
                .with_input("pose_1", "wave")
                .with_input("pose_2", "idle")
                .with_input("pose_3", "still"),
            NodeDescription::new("zero", "fixed_val").with_literal("val", 0.0_f32),
            NodeDescription::new("wave", "anim").with_literal("file", "wave"),
            NodeDescription::new("idle", "anim").with_literal("file", "idle"),
            static_pose("still", "t-pose"),
        ],
    );
    let definition = compile_desc(&desc).expect("compiles");
    let tracker = definition.loop_tracker().expect("has a sampler");
    assert_eq!(definition.nodes()[tracker].id, "idle");
}

#[test]
fn it_should_index_variables_case_insensitively() {
    let definition = compile_desc(&fixture("idle-loop")).expect("compiles");
    assert_eq!(definition.variable_nodes("SPEED").len(), 1);
    assert_eq!(definition.variable_nodes("speed"), definition.variable_nodes("Speed"));
    assert!(definition.variable_nodes("missing").is_empty());
    let idle = definition.find_node("idle").expect("idle node");
    assert_eq!(definition.nodes()[idle].sync_id, Some(1));
}

// --- Rejections ----------------------------------------------------------

#[test]
fn it_should_reject_unknown_node_types() {
    let desc = graph("a", vec![NodeDescription::new("a", "teleport")]);
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::UnknownNodeType { type_name, .. }) if type_name == "teleport"
    ));
}

#[test]
fn it_should_reject_duplicate_ids_and_missing_roots() {
    let desc = graph(
        "a",
        vec![static_pose("a", "t-pose"), static_pose("a", "t-pose")],
    );
    assert!(matches!(compile_desc(&desc), Err(CompileError::DuplicateNode(id)) if id == "a"));

    let desc = graph("b", vec![static_pose("a", "t-pose")]);
    assert!(matches!(compile_desc(&desc), Err(CompileError::MissingRoot(id)) if id == "b"));
}

#[test]
fn it_should_reject_mismatched_connection_types() {
    let desc = graph(
        "ik",
        vec![
            NodeDescription::new("ik", "ik_two_bone")
                .with_literal("start", "upper_arm")
                .with_literal("mid", "lower_arm")
                .with_literal("end", "hand")
                .with_input("pose", "speed")
                .with_input("target", "speed"),
            NodeDescription::new("speed", "var").with_literal("name", "speed"),
        ],
    );
    match compile_desc(&desc) {
        Err(CompileError::TypeMismatch {
            input,
            expected,
            found,
            ..
        }) => {
            assert_eq!(input, "pose");
            assert_eq!(expected, ValueType::Pose);
            assert_eq!(found, ValueType::Float);
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }
}

#[test]
fn it_should_reject_missing_and_unresolved_inputs() {
    let desc = graph(
        "set",
        vec![
            NodeDescription::new("set", "set_bone_rot")
                .with_literal("bone", "hand")
                .with_input("pose", "base"),
            static_pose("base", "t-pose"),
        ],
    );
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::MissingInput { input: "rot", .. })
    ));

    let desc = graph(
        "set",
        vec![NodeDescription::new("set", "set_bone_rot")
            .with_literal("bone", "hand")
            .with_input("pose", "ghost")
            .with_input("rot", "ghost")],
    );
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::UnresolvedConnection { producer, .. }) if producer == "ghost"
    ));
}

#[test]
fn it_should_require_every_vector_component() {
    let desc = graph(
        "set",
        vec![
            NodeDescription::new("set", "set_bone_pos")
                .with_literal("bone", "hand")
                .with_input("pose", "base")
                .with_input("position", "v"),
            static_pose("base", "t-pose"),
            NodeDescription::new("one", "fixed_val").with_literal("val", 1.0_f32),
            NodeDescription::new("v", "make_vec")
                .with_input("x", "one")
                .with_input("y", "one")
                .with_input("z", "one"),
        ],
    );
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::MissingInput { input: "w", .. })
    ));
}

#[test]
fn it_should_reject_unknown_input_names() {
    let desc = graph(
        "base",
        vec![
            static_pose("base", "t-pose").with_input("zeta", "x").with_input("alpha", "x"),
            NodeDescription::new("x", "fixed_val").with_literal("val", 1.0_f32),
        ],
    );
    match compile_desc(&desc) {
        Err(CompileError::UnknownInputs { names, .. }) => assert_eq!(names, ["alpha", "zeta"]),
        other => panic!("expected unknown inputs, got {other:?}"),
    }
}

#[test]
fn it_should_validate_literals() {
    let wrong_type = graph(
        "a",
        vec![NodeDescription::new("a", "anim").with_literal("file", 3.0_f32)],
    );
    assert!(matches!(
        compile_desc(&wrong_type),
        Err(CompileError::LiteralType {
            expected: LiteralType::Text,
            found: LiteralType::Float,
            ..
        })
    ));

    let unknown = graph(
        "a",
        vec![static_pose("a", "t-pose").with_literal("loop", true)],
    );
    assert!(matches!(
        compile_desc(&unknown),
        Err(CompileError::UnknownLiteral { literal, .. }) if literal == "loop"
    ));

    let missing = graph("a", vec![NodeDescription::new("a", "anim")]);
    assert!(matches!(
        compile_desc(&missing),
        Err(CompileError::MissingLiteral { literal: "file", .. })
    ));
}

#[test]
fn it_should_surface_bind_failures() {
    let unknown_bone = graph(
        "set",
        vec![
            NodeDescription::new("set", "set_bone_pos")
                .with_literal("bone", "tentacle")
                .with_input("pose", "base")
                .with_input("position", "v"),
            static_pose("base", "t-pose"),
            NodeDescription::new("v", "fixed_vec"),
        ],
    );
    assert!(matches!(
        compile_desc(&unknown_bone),
        Err(CompileError::Bind {
            source: BindError::UnknownBone { .. },
            ..
        })
    ));

    let root_setter = graph(
        "set",
        vec![
            NodeDescription::new("set", "set_bone_pos")
                .with_literal("bone", "root")
                .with_literal("is_ms", Literal::Bool(true))
                .with_input("pose", "base")
                .with_input("position", "v"),
            static_pose("base", "t-pose"),
            NodeDescription::new("v", "fixed_vec"),
        ],
    );
    assert!(matches!(
        compile_desc(&root_setter),
        Err(CompileError::Bind {
            source: BindError::MissingParent(_),
            ..
        })
    ));

    let unknown_clip = graph("a", vec![static_pose("a", "moonwalk")]);
    assert!(matches!(
        compile_desc(&unknown_clip),
        Err(CompileError::Bind {
            source: BindError::UnknownClip(_),
            ..
        })
    ));
}

#[test]
fn it_should_require_enough_variadic_inputs() {
    let desc = graph(
        "blend",
        vec![
            NodeDescription::new("blend", "blend_2d")
                .with_literal("points", vec![0.0_f32, 0.0, 1.0, 0.0, 0.0, 1.0])
                .with_input("x", "zero")
                .with_input("y", "zero")
                .with_input("pose_1", "a")
                .with_input("pose_2", "b"),
            NodeDescription::new("zero", "fixed_val").with_literal("val", 0.0_f32),
            static_pose("a", "t-pose"),
            static_pose("b", "t-pose"),
        ],
    );
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::TooFewVariadic {
            prefix: "pose",
            min: 3,
            found: 2,
            ..
        })
    ));
}

#[test]
fn it_should_reject_cycles() {
    let desc = graph(
        "a",
        vec![
            NodeDescription::new("a", "set_bone_rot")
                .with_literal("bone", "hand")
                .with_input("pose", "b")
                .with_input("rot", "r"),
            NodeDescription::new("b", "set_bone_rot")
                .with_literal("bone", "hand")
                .with_input("pose", "a")
                .with_input("rot", "r"),
            NodeDescription::new("r", "fixed_vec").with_literal("w", 1.0_f32),
        ],
    );
    assert!(matches!(compile_desc(&desc), Err(CompileError::Cycle(_))));
}

#[test]
fn it_should_bound_the_dependency_depth() {
    let mut nodes = vec![
        static_pose("n0", "t-pose"),
        NodeDescription::new("r", "fixed_vec").with_literal("w", 1.0_f32),
    ];
    for i in 1..10 {
        nodes.push(
            NodeDescription::new(format!("n{i}"), "set_bone_rot")
                .with_literal("bone", "hand")
                .with_input("pose", format!("n{}", i - 1))
                .with_input("rot", "r"),
        );
    }
    let desc = graph("n9", nodes);
    let shallow = CompileOptions {
        max_depth: 5,
        ..CompileOptions::default()
    };
    assert!(matches!(
        compile_with(&desc, &shallow),
        Err(CompileError::DepthExceeded { max_depth: 5, .. })
    ));
    let definition = compile_desc(&desc).expect("fits the default depth");
    assert_eq!(definition.peak_pose_buffers(), 2);
}

#[test]
fn it_should_require_a_pose_at_the_root() {
    let desc = graph(
        "v",
        vec![NodeDescription::new("v", "var").with_literal("name", "x")],
    );
    assert!(matches!(
        compile_desc(&desc),
        Err(CompileError::RootNotPose {
            found: ValueType::Float,
            ..
        })
    ));
}
