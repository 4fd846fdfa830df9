//! Operator types and attribute keys the fusion pass knows by name.

/// Operator type of a fused call-site node.
pub const FUNCTION_OP: &str = "FunctionOp";

pub mod attr_keys {
    /// Name of the function a call-site node invokes.
    pub const FUNC_NAME: &str = "func_name";
    pub const ASYNC_FLAG: &str = "async_flag";
    /// Names of the nodes merged into a call-site node.
    pub const ORIGINAL_NODE_NAMES: &str = "original_node_names";
    /// `"<node>:<output>"` origin of each call-site output, in output order.
    pub const OUTPUT_PROVENANCE: &str = "output_provenance";
    /// Marks a node as handled by the private acceleration path.
    pub const PRIVATE_ACCEL: &str = "_private_accel";
    pub const INPUT_DATA_TYPES: &str = "input_data_types";
    pub const OUTPUT_DATA_TYPES: &str = "output_data_types";
}

/// Reference prefix for function arguments inside a function body.
pub const ARG_PREFIX: &str = "_arg";

pub fn is_function_op(op_type: &str) -> bool {
    op_type == FUNCTION_OP
}
