//! Kinegraph Graph Core
//!
//! Procedural animation blend graphs: a node type registry, a compiler that turns a flat node
//! description into an ordered [`GraphDefinition`], and the per-instance
//! [`EvaluationContext`] that runs it against a bounded [`PosePool`].

pub mod compiler;
pub mod eval;
pub mod generator;
pub mod nodes;
pub mod pool;
pub mod schema;
pub mod types;
pub mod value;

pub use compiler::{
    compile, compile_default, CompileBindings, CompileError, CompileOptions, GraphDefinition,
    InputRef, Node,
};
pub use eval::{EvaluationContext, NodeInstanceData, SyncSnapshot, SyncState};
pub use generator::{ProceduralGenerator, SharedGenerator, SyncGroup};
pub use nodes::NodeOp;
pub use pool::{PoseHandle, PoseMut, PosePool, DEFAULT_POSE_POOL_CAPACITY};
pub use schema::{BindError, NodeSignature, NodeTypeRegistry, RegistryError};
pub use types::*;
pub use value::{DataObject, EvaluationResult};
