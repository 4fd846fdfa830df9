//! Error types for the fusion pass.
//!
//! Structural errors abort the pass. Safety vetoes are not errors at all:
//! they demote a cluster to isolated processing.

use crate::core::types::DataType;

/// Failure of the operator-metadata collaborator.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("no metadata registered for operator type '{0}'")]
    UnknownOp(String),

    #[error("invalid metadata for operator type '{op_type}': {reason}")]
    Invalid { op_type: String, reason: String },
}

/// A descriptor that has no wire form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("element type {0} has no wire code")]
    ElementType(DataType),

    #[error("size {0} does not fit a signed 64-bit wire value")]
    SizeOutOfRange(usize),
}

/// Failure of single-node lowering.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("unsupported element type {dtype} at {position}")]
    UnsupportedElementType { dtype: DataType, position: String },

    #[error("size {size} out of range at {position}")]
    SizeOutOfRange { size: usize, position: String },

    #[error("{0}")]
    Custom(String),
}

/// Failure while building function or call-site descriptors.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("unsupported element type {dtype} on node '{node}'")]
    UnsupportedElementType { node: String, dtype: DataType },

    #[error("size {size} on node '{node}' does not fit a signed 64-bit wire value")]
    SizeOutOfRange { node: String, size: usize },

    #[error("descriptor '{name}' is {size} bytes, limit is {limit}")]
    SizeOverflow { name: String, size: usize, limit: usize },

    #[error("function '{0}' is already defined in the library")]
    DuplicateFunction(String),

    #[error("node '{0}' has no lowered definition")]
    MissingNodeDef(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("node '{0}' not found in graph")]
    MissingNode(String),

    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    #[error("node '{node}' has no output {index}")]
    MissingOutput { node: String, index: usize },

    #[error("node '{node}' has no input {index}")]
    MissingInput { node: String, index: usize },

    #[error("input {index} of node '{node}' already has a producer")]
    InputOccupied { node: String, index: usize },

    #[error("edge {src}:{src_out} -> {dst}:{dst_in} does not exist")]
    DanglingEdge { src: String, src_out: usize, dst: String, dst_in: usize },

    #[error("control edge {src} -> {dst} does not exist")]
    DanglingControlEdge { src: String, dst: String },

    #[error("graph '{0}' contains a cycle")]
    Cycle(String),

    #[error("metadata lookup failed for node '{node}' ({op_type})")]
    Metadata {
        node: String,
        op_type: String,
        #[source]
        source: MetadataError,
    },

    #[error("lowering failed for node '{node}' ({op_type})")]
    Lowering {
        node: String,
        op_type: String,
        #[source]
        source: LowerError,
    },

    #[error("serialization failed for cluster '{cluster}'")]
    Serialize {
        cluster: String,
        #[source]
        source: SerializeError,
    },
}

impl FusionError {
    /// Graph-shape errors, as opposed to collaborator or serialization failures.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            FusionError::Metadata { .. } | FusionError::Lowering { .. } | FusionError::Serialize { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn collaborator_errors_keep_context_and_source() {
        let err = FusionError::Metadata {
            node: "A".into(),
            op_type: "Foo".into(),
            source: MetadataError::UnknownOp("Foo".into()),
        };
        assert_eq!(err.to_string(), "metadata lookup failed for node 'A' (Foo)");
        assert!(err.source().is_some());
        assert!(!err.is_structural());
        assert!(FusionError::Cycle("g".into()).is_structural());
    }
}
