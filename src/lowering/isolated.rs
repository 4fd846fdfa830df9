use crate::core::attr::AttrValue;
use crate::core::op::attr_keys;
use crate::error::{FusionError, LowerError};
use crate::ir_graph::IRGraph;
use crate::lowering::ParserRegistry;
use crate::serializer::convert::dtype_codes;
use petgraph::stable_graph::NodeIndex;

/// Attaches the single-node descriptor and element-type lists to a node
/// that is not part of any fused unit.
pub fn lower_isolated(graph: &mut IRGraph, idx: NodeIndex, registry: &ParserRegistry) -> Result<(), FusionError> {
    let node = graph.node(idx)?;
    let bytes = registry.lower_single_node(node)?;

    let type_error = |dtype, side: &str| FusionError::Lowering {
        node: node.name.clone(),
        op_type: node.op_type.clone(),
        source: LowerError::UnsupportedElementType { dtype, position: side.to_string() },
    };
    let input_types = dtype_codes(&node.inputs).map_err(|dtype| type_error(dtype, "input"))?;
    let output_types = dtype_codes(&node.outputs).map_err(|dtype| type_error(dtype, "output"))?;

    let node = graph.node_mut(idx)?;
    node.node_def = Some(bytes);
    node.attrs.insert(attr_keys::INPUT_DATA_TYPES.to_string(), AttrValue::ListInt(input_types));
    node.attrs.insert(attr_keys::OUTPUT_DATA_TYPES.to_string(), AttrValue::ListInt(output_types));
    Ok(())
}
