//! Single-node lowering: turns one IR node into a standalone `NodeDefProto`.
//!
//! Strategies are looked up by operator type. Registered parsers win,
//! everything else goes through the generic lowering.

pub mod isolated;

use crate::error::{ConvertError, FusionError, LowerError};
use crate::ir_graph::IRNode;
use crate::serializer::convert::{attr_map_proto, tensor_desc_proto};
use crate::serializer::proto::{NodeDefProto, TensorDescProto};
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;

pub trait OpParser: Send + Sync {
    fn lower(&self, node: &IRNode) -> Result<NodeDefProto, LowerError>;
}

pub enum LoweringStrategy<'a> {
    Known(&'a dyn OpParser),
    Default,
}

impl LoweringStrategy<'_> {
    pub fn lower(&self, node: &IRNode) -> Result<NodeDefProto, LowerError> {
        match self {
            LoweringStrategy::Known(parser) => parser.lower(node),
            LoweringStrategy::Default => lower_generic(node),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, LoweringStrategy::Known(_))
    }
}

fn descs_proto(descs: &[crate::core::types::TensorDesc], side: &str) -> Result<Vec<TensorDescProto>, LowerError> {
    descs
        .iter()
        .enumerate()
        .map(|(i, d)| {
            tensor_desc_proto(d).map_err(|err| {
                let position = format!("{} {} ('{}')", side, i, d.name);
                match err {
                    ConvertError::ElementType(dtype) => LowerError::UnsupportedElementType { dtype, position },
                    ConvertError::SizeOutOfRange(size) => LowerError::SizeOutOfRange { size, position },
                }
            })
        })
        .collect()
}

/// Copies name, operator type, attributes and descriptors.
pub fn lower_generic(node: &IRNode) -> Result<NodeDefProto, LowerError> {
    let attr = attr_map_proto(&node.attrs)
        .map_err(|_| LowerError::Custom(format!("node '{}' has an attribute with an empty name", node.name)))?;
    Ok(NodeDefProto {
        name: node.name.clone(),
        op: node.op_type.clone(),
        input: Vec::new(),
        input_desc: descs_proto(&node.inputs, "input")?,
        output_desc: descs_proto(&node.outputs, "output")?,
        attr,
    })
}

#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn OpParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op_type: &str, parser: Arc<dyn OpParser>) {
        self.parsers.insert(op_type.to_string(), parser);
    }

    pub fn resolve(&self, op_type: &str) -> LoweringStrategy<'_> {
        match self.parsers.get(op_type) {
            Some(parser) => LoweringStrategy::Known(parser.as_ref()),
            None => LoweringStrategy::Default,
        }
    }

    /// Lowers a node, reusing the call-site definition of already-fused nodes.
    pub fn lower_node(&self, node: &IRNode) -> Result<NodeDefProto, FusionError> {
        if let Some(fused) = &node.fused {
            return Ok(fused.call_site.clone());
        }
        self.resolve(&node.op_type).lower(node).map_err(|source| FusionError::Lowering {
            node: node.name.clone(),
            op_type: node.op_type.clone(),
            source,
        })
    }

    pub fn lower_single_node(&self, node: &IRNode) -> Result<Vec<u8>, FusionError> {
        Ok(self.lower_node(node)?.encode_to_vec())
    }
}
