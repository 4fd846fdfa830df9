//! Operator metadata: per-op-type facts the classifier and safety checker consult.
//!
//! The table is built once before a pass and shared read-only between passes.

use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpMetadata {
    pub is_async: bool,
    pub kernel_library: String,
    pub private_accelerated: bool,
}

/// Input and output position names that alias or mutate shared state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefPositions {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl RefPositions {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

pub trait OpMetadataProvider: Send + Sync {
    fn op_metadata(&self, op_type: &str) -> Result<OpMetadata, MetadataError>;

    fn ref_positions(&self, op_type: &str) -> RefPositions;
}

/// One entry of the operator table as it appears in the manifest.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpInfo {
    #[serde(default)]
    pub is_async: bool,
    pub kernel_library: String,
    #[serde(default)]
    pub private_accelerated: bool,
    #[serde(default)]
    pub ref_inputs: Vec<String>,
    #[serde(default)]
    pub ref_outputs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct OpInfoTable {
    ops: BTreeMap<String, OpInfo>,
}

impl OpInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn insert(&mut self, op_type: &str, info: OpInfo) {
        self.ops.insert(op_type.to_string(), info);
    }

    pub fn with_op(mut self, op_type: &str, info: OpInfo) -> Self {
        self.insert(op_type, info);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl OpMetadataProvider for OpInfoTable {
    fn op_metadata(&self, op_type: &str) -> Result<OpMetadata, MetadataError> {
        let info = self.ops.get(op_type).ok_or_else(|| MetadataError::UnknownOp(op_type.to_string()))?;
        if info.kernel_library.is_empty() {
            return Err(MetadataError::Invalid {
                op_type: op_type.to_string(),
                reason: "empty kernel library".to_string(),
            });
        }
        Ok(OpMetadata {
            is_async: info.is_async,
            kernel_library: info.kernel_library.clone(),
            private_accelerated: info.private_accelerated,
        })
    }

    fn ref_positions(&self, op_type: &str) -> RefPositions {
        self.ops
            .get(op_type)
            .map(|info| RefPositions {
                inputs: info.ref_inputs.iter().cloned().collect(),
                outputs: info.ref_outputs.iter().cloned().collect(),
            })
            .unwrap_or_default()
    }
}
