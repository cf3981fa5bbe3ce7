//! Tagged per-node evaluation results.

use std::sync::Arc;

use kinegraph_physics_core::{AngularConstraint, LinearConstraint, SpringProperties};
use nalgebra::Vector4;

use crate::pool::PoseHandle;
use crate::types::ValueType;

/// Capability objects passed between data nodes and the spring-bone node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataObject {
    SpringProperties(SpringProperties),
    LinearConstraint(LinearConstraint),
    AngularConstraint(AngularConstraint),
}

impl DataObject {
    pub fn as_spring_properties(&self) -> Option<&SpringProperties> {
        match self {
            DataObject::SpringProperties(props) => Some(props),
            _ => None,
        }
    }

    pub fn as_linear_constraint(&self) -> Option<&LinearConstraint> {
        match self {
            DataObject::LinearConstraint(constraint) => Some(constraint),
            _ => None,
        }
    }

    pub fn as_angular_constraint(&self) -> Option<&AngularConstraint> {
        match self {
            DataObject::AngularConstraint(constraint) => Some(constraint),
            _ => None,
        }
    }
}

/// Value stored in a node's result slot.
///
/// `Empty` marks slots that have not been written this pass, have been released, or belong to
/// a node that could not produce a value (e.g. the pose pool was exhausted).
#[derive(Debug, Clone, Default)]
pub enum EvaluationResult {
    #[default]
    Empty,
    Float(f32),
    Pose(PoseHandle),
    Int(u64),
    Text(Arc<str>),
    Vector(Vector4<f32>),
    Bool(bool),
    Data(DataObject),
}

impl EvaluationResult {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            EvaluationResult::Empty => None,
            EvaluationResult::Float(_) => Some(ValueType::Float),
            EvaluationResult::Pose(_) => Some(ValueType::Pose),
            EvaluationResult::Int(_) => Some(ValueType::Int),
            EvaluationResult::Text(_) => Some(ValueType::Text),
            EvaluationResult::Vector(_) => Some(ValueType::Vector),
            EvaluationResult::Bool(_) => Some(ValueType::Bool),
            EvaluationResult::Data(_) => Some(ValueType::Data),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, EvaluationResult::Empty)
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            EvaluationResult::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_pose(&self) -> Option<&PoseHandle> {
        match self {
            EvaluationResult::Pose(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector4<f32>> {
        match self {
            EvaluationResult::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EvaluationResult::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataObject> {
        match self {
            EvaluationResult::Data(data) => Some(data),
            _ => None,
        }
    }
}
