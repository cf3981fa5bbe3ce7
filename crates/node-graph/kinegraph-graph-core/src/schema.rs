//! Node type registry: typed signatures plus the factory that binds a node's literals.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use kinegraph_animation_core::{AnimationSource, ClipProvider, Skeleton};
use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;

use crate::nodes::{self, NodeOp};
use crate::types::{Literal, LiteralType, ValueType};

#[derive(Debug, Clone, Serialize)]
pub struct PortSpec {
    pub id: &'static str,
    pub ty: ValueType,
    pub optional: bool,
}

/// Repeated input group connected as `<prefix>_<n>`, ordered by `n`.
#[derive(Debug, Clone, Serialize)]
pub struct VariadicSpec {
    pub prefix: &'static str,
    pub ty: ValueType,
    pub min: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiteralSpec {
    pub id: &'static str,
    pub ty: LiteralType,
    /// Value used when the description omits the literal. `None` makes it required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Literal>,
}

/// Builds the node's operation from its validated literals.
pub type NodeFactory = fn(&BindContext<'_>) -> Result<NodeOp, BindError>;

#[derive(Clone, Serialize)]
pub struct NodeSignature {
    pub name: &'static str,
    pub category: &'static str,
    pub inputs: Vec<PortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variadic: Option<VariadicSpec>,
    pub literals: Vec<LiteralSpec>,
    pub output: ValueType,
    #[serde(skip)]
    pub factory: NodeFactory,
}

impl fmt::Debug for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSignature")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("variadic", &self.variadic)
            .field("literals", &self.literals)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BindError {
    #[error("literal '{literal}' names unknown bone '{bone}'")]
    UnknownBone { literal: &'static str, bone: String },
    #[error("bone '{0}' has no parent")]
    MissingParent(String),
    #[error("unknown clip '{0}'")]
    UnknownClip(String),
    #[error("clip '{clip}' animates {found} joints, skeleton has {expected}")]
    ClipJointMismatch {
        clip: String,
        expected: usize,
        found: usize,
    },
    #[error("blend space: {0}")]
    BlendSpace(String),
}

/// What a factory sees while binding one node.
pub struct BindContext<'a> {
    pub literals: &'a HashMap<&'static str, Literal>,
    pub skeleton: &'a Skeleton,
    pub clips: &'a dyn ClipProvider,
    /// Number of connected variadic inputs.
    pub variadic_count: usize,
}

impl<'a> BindContext<'a> {
    pub fn float(&self, id: &str) -> f32 {
        match self.literals.get(id) {
            Some(Literal::Float(v)) => *v,
            _ => 0.0,
        }
    }

    pub fn text(&self, id: &str) -> &'a str {
        match self.literals.get(id) {
            Some(Literal::Text(v)) => v.as_str(),
            _ => "",
        }
    }

    pub fn boolean(&self, id: &str) -> bool {
        matches!(self.literals.get(id), Some(Literal::Bool(true)))
    }

    pub fn float_array(&self, id: &str) -> &'a [f32] {
        match self.literals.get(id) {
            Some(Literal::FloatArray(v)) => v.as_slice(),
            _ => &[],
        }
    }

    /// Resolve a bone-name literal to a joint index.
    pub fn joint(&self, literal: &'static str) -> Result<usize, BindError> {
        let bone = self.text(literal);
        self.skeleton
            .find_joint(bone)
            .ok_or_else(|| BindError::UnknownBone {
                literal,
                bone: bone.to_string(),
            })
    }

    /// Resolve a clip-name literal, checking it animates this skeleton.
    pub fn clip(&self, literal: &'static str) -> Result<Arc<dyn AnimationSource>, BindError> {
        let name = self.text(literal);
        let clip = self
            .clips
            .clip(name)
            .ok_or_else(|| BindError::UnknownClip(name.to_string()))?;
        if clip.joint_count() != self.skeleton.joint_count() {
            return Err(BindError::ClipJointMismatch {
                clip: name.to_string(),
                expected: self.skeleton.joint_count(),
                found: clip.joint_count(),
            });
        }
        Ok(clip)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node type '{0}' is already registered")]
    Duplicate(&'static str),
}

/// Name -> signature table. Built once, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct NodeTypeRegistry {
    by_name: HashMap<&'static str, usize>,
    signatures: Vec<NodeSignature>,
}

static BUILTIN: Lazy<NodeTypeRegistry> = Lazy::new(NodeTypeRegistry::with_builtin_nodes);

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every node kind in [`crate::nodes`].
    pub fn with_builtin_nodes() -> Self {
        let mut registry = Self::new();
        for signature in nodes::signatures() {
            if let Err(err) = registry.register(signature) {
                log::error!("builtin node registration failed: {err}");
            }
        }
        registry
    }

    /// Process-wide builtin registry.
    pub fn builtin() -> &'static NodeTypeRegistry {
        &BUILTIN
    }

    pub fn register(&mut self, signature: NodeSignature) -> Result<(), RegistryError> {
        if self.by_name.contains_key(signature.name) {
            return Err(RegistryError::Duplicate(signature.name));
        }
        self.by_name.insert(signature.name, self.signatures.len());
        self.signatures.push(signature);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&NodeSignature> {
        self.by_name.get(name).map(|&idx| &self.signatures[idx])
    }

    /// Signatures in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeSignature> {
        self.signatures.iter()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Machine-readable catalogue for editors and tooling.
    pub fn export_json(&self) -> serde_json::Value {
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "nodes": self.signatures,
        })
    }
}
