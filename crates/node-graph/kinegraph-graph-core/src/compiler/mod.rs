//! Graph compiler: turns a [`GraphDescription`] into an immutable, topologically ordered
//! [`GraphDefinition`].
//!
//! Compilation is atomic. Either every node binds, every connection type-checks, the graph is
//! acyclic and fits the pose pool, or nothing is produced.
//!
//! - [`bind`] instantiates nodes and resolves named connections.
//! - [`order`] prunes, orders and schedules pose-buffer releases.
//! - [`variadic`] holds the `<prefix>_<n>` naming rules.

use std::sync::Arc;

use hashbrown::HashMap;
use kinegraph_animation_core::{ClipProvider, Skeleton};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nodes::NodeOp;
use crate::pool::DEFAULT_POSE_POOL_CAPACITY;
use crate::schema::{BindError, NodeTypeRegistry};
use crate::types::{GraphDescription, LiteralType, NodeId, ValueType};

mod bind;
mod order;
pub mod variadic;

pub use variadic::{compare_variadic_keys, parse_variadic_key};

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Longest accepted dependency chain, counted in nodes from the root.
    pub max_depth: usize,
    /// Pose buffers the evaluating pool will offer.
    pub pose_pool_capacity: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            pose_pool_capacity: DEFAULT_POSE_POOL_CAPACITY,
        }
    }
}

/// External collaborators needed while binding literals.
#[derive(Clone, Copy)]
pub struct CompileBindings<'a> {
    pub skeleton: &'a Arc<Skeleton>,
    pub clips: &'a dyn ClipProvider,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("node id '{0}' is declared more than once")]
    DuplicateNode(NodeId),
    #[error("root node '{0}' is not declared")]
    MissingRoot(NodeId),
    #[error("node '{node}' has unknown type '{type_name}'")]
    UnknownNodeType { node: NodeId, type_name: String },
    #[error("node '{node}' has no literal named '{literal}'")]
    UnknownLiteral { node: NodeId, literal: String },
    #[error("literal '{literal}' of node '{node}' expects {expected:?}, got {found:?}")]
    LiteralType {
        node: NodeId,
        literal: String,
        expected: LiteralType,
        found: LiteralType,
    },
    #[error("node '{node}' is missing required literal '{literal}'")]
    MissingLiteral { node: NodeId, literal: &'static str },
    #[error("node '{node}' has unknown inputs {names:?}")]
    UnknownInputs { node: NodeId, names: Vec<String> },
    #[error("input '{input}' of node '{node}' refers to undeclared node '{producer}'")]
    UnresolvedConnection {
        node: NodeId,
        input: String,
        producer: NodeId,
    },
    #[error("node '{node}' is missing required input '{input}'")]
    MissingInput { node: NodeId, input: &'static str },
    #[error("node '{node}' needs at least {min} '{prefix}_<n>' inputs, got {found}")]
    TooFewVariadic {
        node: NodeId,
        prefix: &'static str,
        min: usize,
        found: usize,
    },
    #[error(
        "input '{input}' of node '{node}' expects {expected:?} but '{producer}' produces {found:?}"
    )]
    TypeMismatch {
        node: NodeId,
        input: String,
        producer: NodeId,
        expected: ValueType,
        found: ValueType,
    },
    #[error("cycle through node '{0}'")]
    Cycle(NodeId),
    #[error("dependency chain through node '{node}' is deeper than {max_depth}")]
    DepthExceeded { node: NodeId, max_depth: usize },
    #[error("root node '{node}' produces {found:?}, not a pose")]
    RootNotPose { node: NodeId, found: ValueType },
    #[error("graph needs {peak} live pose buffers, pool offers {capacity}")]
    PoseBudgetExceeded { peak: usize, capacity: usize },
    #[error("node '{node}': {source}")]
    Bind {
        node: NodeId,
        #[source]
        source: BindError,
    },
}

/// Where a node input slot reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRef {
    /// Index of the producing node in evaluation order; always below the consumer's index.
    Connected(usize),
    /// Optional input left unconnected; evaluation substitutes the slot default.
    Disconnected,
}

impl InputRef {
    pub fn index(&self) -> Option<usize> {
        match self {
            InputRef::Connected(idx) => Some(*idx),
            InputRef::Disconnected => None,
        }
    }
}

/// A compiled node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub type_name: &'static str,
    /// Signature slots first, then the variadic group in index order.
    pub inputs: Vec<InputRef>,
    pub sync_id: Option<u64>,
    pub op: NodeOp,
    pub output: ValueType,
    /// Producers whose pose results are dropped right after this node evaluates.
    pub releases: Vec<usize>,
}

/// Immutable compiled graph, shared by every [`crate::EvaluationContext`] built from it.
#[derive(Debug)]
pub struct GraphDefinition {
    nodes: Vec<Node>,
    output: usize,
    skeleton: Arc<Skeleton>,
    needs_rest_pose: bool,
    needs_physics_integrator: bool,
    loop_tracker: Option<usize>,
    peak_pose_buffers: usize,
    pose_pool_capacity: usize,
    variables: HashMap<String, Vec<usize>>,
}

impl GraphDefinition {
    /// Nodes in evaluation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn find_node(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Index of the output node. Always the last node.
    pub fn output(&self) -> usize {
        self.output
    }

    pub fn skeleton(&self) -> &Arc<Skeleton> {
        &self.skeleton
    }

    pub fn joint_count(&self) -> usize {
        self.skeleton.joint_count()
    }

    pub fn needs_rest_pose(&self) -> bool {
        self.needs_rest_pose
    }

    pub fn needs_physics_integrator(&self) -> bool {
        self.needs_physics_integrator
    }

    /// The sampling node whose wrap-around is reported as the graph's loop.
    pub fn loop_tracker(&self) -> Option<usize> {
        self.loop_tracker
    }

    /// Most pose buffers simultaneously live during one pass.
    pub fn peak_pose_buffers(&self) -> usize {
        self.peak_pose_buffers
    }

    pub fn pose_pool_capacity(&self) -> usize {
        self.pose_pool_capacity
    }

    /// Variable nodes keyed by lower-cased name.
    pub fn variables(&self) -> &HashMap<String, Vec<usize>> {
        &self.variables
    }

    pub fn variable_nodes(&self, name: &str) -> &[usize] {
        self.variables
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Compile `desc` against `registry`.
pub fn compile(
    desc: &GraphDescription,
    registry: &NodeTypeRegistry,
    bindings: CompileBindings<'_>,
    options: &CompileOptions,
) -> Result<Arc<GraphDefinition>, CompileError> {
    let bound = bind::bind_nodes(desc, registry, bindings)?;
    let root = bound
        .iter()
        .position(|n| n.id == desc.root)
        .ok_or_else(|| CompileError::MissingRoot(desc.root.clone()))?;
    if bound[root].output != ValueType::Pose {
        return Err(CompileError::RootNotPose {
            node: desc.root.clone(),
            found: bound[root].output,
        });
    }

    let schedule = order::schedule(&bound, root, options.max_depth)?;
    if schedule.peak > options.pose_pool_capacity {
        return Err(CompileError::PoseBudgetExceeded {
            peak: schedule.peak,
            capacity: options.pose_pool_capacity,
        });
    }

    let mut slots: Vec<Option<bind::BoundNode>> = bound.into_iter().map(Some).collect();
    let mut nodes = Vec::with_capacity(schedule.order.len());
    for (&desc_idx, releases) in schedule.order.iter().zip(schedule.releases) {
        let Some(node) = slots[desc_idx].take() else {
            continue;
        };
        let inputs = node
            .inputs
            .iter()
            .map(|input| match input {
                Some(src) => InputRef::Connected(schedule.position[*src]),
                None => InputRef::Disconnected,
            })
            .collect();
        nodes.push(Node {
            id: node.id,
            type_name: node.type_name,
            inputs,
            sync_id: node.sync_id,
            op: node.op,
            output: node.output,
            releases,
        });
    }

    let mut variables: HashMap<String, Vec<usize>> = HashMap::new();
    let mut loop_tracker: Option<(usize, f32)> = None;
    for (idx, node) in nodes.iter().enumerate() {
        match &node.op {
            NodeOp::Variable(var) => {
                variables
                    .entry(var.name.to_lowercase())
                    .or_default()
                    .push(idx);
            }
            NodeOp::Sample(op) => {
                let duration = op.clip.duration();
                if loop_tracker.map_or(true, |(_, longest)| duration > longest) {
                    loop_tracker = Some((idx, duration));
                }
            }
            _ => {}
        }
    }

    let definition = GraphDefinition {
        output: nodes.len() - 1,
        needs_rest_pose: nodes.iter().any(|n| matches!(n.op, NodeOp::RestPose)),
        needs_physics_integrator: nodes.iter().any(|n| matches!(n.op, NodeOp::SpringBone(_))),
        loop_tracker: loop_tracker.map(|(idx, _)| idx),
        peak_pose_buffers: schedule.peak,
        pose_pool_capacity: options.pose_pool_capacity,
        variables,
        skeleton: Arc::clone(bindings.skeleton),
        nodes,
    };
    log::debug!(
        "compiled graph rooted at '{}': {} nodes ({} pruned), peak {} pose buffers",
        desc.root,
        definition.nodes.len(),
        desc.nodes.len() - definition.nodes.len(),
        definition.peak_pose_buffers
    );
    Ok(Arc::new(definition))
}

/// Compile with the builtin registry and default options.
pub fn compile_default(
    desc: &GraphDescription,
    bindings: CompileBindings<'_>,
) -> Result<Arc<GraphDefinition>, CompileError> {
    compile(
        desc,
        NodeTypeRegistry::builtin(),
        bindings,
        &CompileOptions::default(),
    )
}

#[cfg(test)]
mod tests;
