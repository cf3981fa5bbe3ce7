use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

pub type NodeId = String;

/// Declared type of a node output or input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Pose,
    Int,
    Text,
    Vector,
    Bool,
    /// Opaque capability object (spring properties, constraints).
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralType {
    Float,
    Int,
    Text,
    Vector,
    Bool,
    FloatArray,
}

/// Literal ("custom") value attached to a node description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Literal {
    Float(f32),
    Int(u64),
    Text(String),
    Vector([f32; 4]),
    Bool(bool),
    FloatArray(Vec<f32>),
}

impl Literal {
    pub fn literal_type(&self) -> LiteralType {
        match self {
            Literal::Float(_) => LiteralType::Float,
            Literal::Int(_) => LiteralType::Int,
            Literal::Text(_) => LiteralType::Text,
            Literal::Vector(_) => LiteralType::Vector,
            Literal::Bool(_) => LiteralType::Bool,
            Literal::FloatArray(_) => LiteralType::FloatArray,
        }
    }
}

impl From<f32> for Literal {
    fn from(value: f32) -> Self {
        Literal::Float(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<Vec<f32>> for Literal {
    fn from(value: Vec<f32>) -> Self {
        Literal::FloatArray(value)
    }
}

/// One node of an uncompiled graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDescription {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub literals: HashMap<String, Literal>,
    /// Input slot name -> producing node id.
    #[serde(default)]
    pub inputs: HashMap<String, NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<u64>,
}

impl NodeDescription {
    pub fn new(id: impl Into<NodeId>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            literals: HashMap::new(),
            inputs: HashMap::new(),
            sync_id: None,
        }
    }

    pub fn with_literal(mut self, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.literals.insert(name.into(), value.into());
        self
    }

    pub fn with_input(mut self, slot: impl Into<String>, source: impl Into<NodeId>) -> Self {
        self.inputs.insert(slot.into(), source.into());
        self
    }

    pub fn with_sync_id(mut self, sync_id: u64) -> Self {
        self.sync_id = Some(sync_id);
        self
    }
}

/// Flat, unordered node list plus the designated output node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDescription {
    pub nodes: Vec<NodeDescription>,
    pub root: NodeId,
}
