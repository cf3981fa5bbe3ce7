//! Node instantiation and connection resolution.

use hashbrown::HashMap;

use super::variadic::{compare_variadic_keys, is_variadic_key};
use super::{CompileBindings, CompileError};
use crate::nodes::NodeOp;
use crate::schema::{BindContext, NodeSignature, NodeTypeRegistry};
use crate::types::{GraphDescription, Literal, NodeDescription, NodeId, ValueType};

/// A node whose literals are bound and whose inputs point at description indices.
#[derive(Debug)]
pub(super) struct BoundNode {
    pub id: NodeId,
    pub type_name: &'static str,
    pub op: NodeOp,
    pub output: ValueType,
    pub sync_id: Option<u64>,
    /// Producer description index per slot; `None` for a disconnected optional slot.
    pub inputs: Vec<Option<usize>>,
}

fn validate_literals(
    node: &NodeDescription,
    signature: &NodeSignature,
) -> Result<HashMap<&'static str, Literal>, CompileError> {
    let mut names: Vec<&String> = node.literals.keys().collect();
    names.sort();
    for name in names {
        if !signature.literals.iter().any(|spec| spec.id == name.as_str()) {
            return Err(CompileError::UnknownLiteral {
                node: node.id.clone(),
                literal: name.clone(),
            });
        }
    }

    let mut bound = HashMap::with_capacity(signature.literals.len());
    for spec in &signature.literals {
        let value = match (node.literals.get(spec.id), &spec.default) {
            (Some(value), _) => {
                if value.literal_type() != spec.ty {
                    return Err(CompileError::LiteralType {
                        node: node.id.clone(),
                        literal: spec.id.to_string(),
                        expected: spec.ty,
                        found: value.literal_type(),
                    });
                }
                value.clone()
            }
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(CompileError::MissingLiteral {
                    node: node.id.clone(),
                    literal: spec.id,
                })
            }
        };
        bound.insert(spec.id, value);
    }
    Ok(bound)
}

/// Connected variadic slot names, sorted by index.
fn variadic_keys<'d>(node: &'d NodeDescription, signature: &NodeSignature) -> Vec<&'d str> {
    let Some(spec) = &signature.variadic else {
        return Vec::new();
    };
    let mut keys: Vec<&str> = node
        .inputs
        .keys()
        .map(String::as_str)
        .filter(|key| is_variadic_key(key, spec.prefix))
        .collect();
    keys.sort_by(|a, b| compare_variadic_keys(a, b));
    keys
}

fn check_input_names(node: &NodeDescription, signature: &NodeSignature) -> Result<(), CompileError> {
    let mut unknown: Vec<String> = node
        .inputs
        .keys()
        .filter(|key| {
            let declared = signature.inputs.iter().any(|port| port.id == key.as_str());
            let variadic = signature
                .variadic
                .as_ref()
                .is_some_and(|spec| is_variadic_key(key, spec.prefix));
            !declared && !variadic
        })
        .cloned()
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort();
    Err(CompileError::UnknownInputs {
        node: node.id.clone(),
        names: unknown,
    })
}

fn resolve(
    index: &HashMap<&str, usize>,
    node: &NodeDescription,
    slot: &str,
    producer: &NodeId,
) -> Result<usize, CompileError> {
    index
        .get(producer.as_str())
        .copied()
        .ok_or_else(|| CompileError::UnresolvedConnection {
            node: node.id.clone(),
            input: slot.to_string(),
            producer: producer.clone(),
        })
}

/// Instantiate every node, then resolve and type-check every connection.
pub(super) fn bind_nodes(
    desc: &GraphDescription,
    registry: &NodeTypeRegistry,
    bindings: CompileBindings<'_>,
) -> Result<Vec<BoundNode>, CompileError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(desc.nodes.len());
    for (i, node) in desc.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), i).is_some() {
            return Err(CompileError::DuplicateNode(node.id.clone()));
        }
    }

    let mut signatures = Vec::with_capacity(desc.nodes.len());
    let mut ops = Vec::with_capacity(desc.nodes.len());
    for node in &desc.nodes {
        let signature =
            registry
                .lookup(&node.type_name)
                .ok_or_else(|| CompileError::UnknownNodeType {
                    node: node.id.clone(),
                    type_name: node.type_name.clone(),
                })?;
        let literals = validate_literals(node, signature)?;
        check_input_names(node, signature)?;
        let variadic_count = variadic_keys(node, signature).len();
        if let Some(spec) = &signature.variadic {
            if variadic_count < spec.min {
                return Err(CompileError::TooFewVariadic {
                    node: node.id.clone(),
                    prefix: spec.prefix,
                    min: spec.min,
                    found: variadic_count,
                });
            }
        }
        let ctx = BindContext {
            literals: &literals,
            skeleton: bindings.skeleton.as_ref(),
            clips: bindings.clips,
            variadic_count,
        };
        let op = (signature.factory)(&ctx).map_err(|source| CompileError::Bind {
            node: node.id.clone(),
            source,
        })?;
        signatures.push(signature);
        ops.push(op);
    }

    let mut bound = Vec::with_capacity(desc.nodes.len());
    for ((node, signature), op) in desc.nodes.iter().zip(&signatures).zip(ops) {
        let mut inputs = Vec::new();
        let connect = |slot: &str,
                       expected: ValueType,
                       producer: &NodeId|
         -> Result<usize, CompileError> {
            let src = resolve(&index, node, slot, producer)?;
            let found = signatures[src].output;
            if found != expected {
                return Err(CompileError::TypeMismatch {
                    node: node.id.clone(),
                    input: slot.to_string(),
                    producer: producer.clone(),
                    expected,
                    found,
                });
            }
            Ok(src)
        };

        for port in &signature.inputs {
            let source = match node.inputs.get(port.id) {
                Some(producer) => Some(connect(port.id, port.ty, producer)?),
                None if port.optional => None,
                None => {
                    return Err(CompileError::MissingInput {
                        node: node.id.clone(),
                        input: port.id,
                    })
                }
            };
            inputs.push(source);
        }

        if let Some(spec) = &signature.variadic {
            for key in variadic_keys(node, signature) {
                let producer = &node.inputs[key];
                inputs.push(Some(connect(key, spec.ty, producer)?));
            }
        }

        bound.push(BoundNode {
            id: node.id.clone(),
            type_name: signature.name,
            op,
            output: signature.output,
            sync_id: node.sync_id,
            inputs,
        });
    }
    Ok(bound)
}
