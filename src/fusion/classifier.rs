use crate::config::FusionConfig;
use crate::core::op::{attr_keys, is_function_op};
use crate::error::FusionError;
use crate::ir_graph::IRNode;
use crate::metadata::{OpMetadata, OpMetadataProvider};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Fusible,
    Isolated,
    /// Pass-through or control-flow marker, never part of a cluster.
    Skip,
}

/// Per-node fusibility predicate. Metadata lookups are memoized per op type.
pub struct ClusterClassifier<'a> {
    config: &'a FusionConfig,
    metadata: &'a dyn OpMetadataProvider,
    cache: HashMap<String, OpMetadata>,
}

impl<'a> ClusterClassifier<'a> {
    pub fn new(config: &'a FusionConfig, metadata: &'a dyn OpMetadataProvider) -> Self {
        Self { config, metadata, cache: HashMap::new() }
    }

    fn lookup(&mut self, node: &IRNode) -> Result<&OpMetadata, FusionError> {
        if !self.cache.contains_key(&node.op_type) {
            let meta = self.metadata.op_metadata(&node.op_type).map_err(|source| FusionError::Metadata {
                node: node.name.clone(),
                op_type: node.op_type.clone(),
                source,
            })?;
            self.cache.insert(node.op_type.clone(), meta);
        }
        self.cache
            .get(&node.op_type)
            .ok_or_else(|| FusionError::MissingNode(node.name.clone()))
    }

    pub fn is_marker(&self, node: &IRNode) -> bool {
        self.config.passthrough_ops.contains(&node.op_type) || self.config.control_flow_ops.contains(&node.op_type)
    }

    /// Fused units are synchronous by construction.
    pub fn is_async(&mut self, node: &IRNode) -> Result<bool, FusionError> {
        if is_function_op(&node.op_type) {
            return Ok(false);
        }
        Ok(self.lookup(node)?.is_async)
    }

    pub fn is_debug_forced(&mut self, node: &IRNode) -> Result<bool, FusionError> {
        if !self.config.debug_fuse_ops.contains(&node.op_type) || self.is_marker(node) {
            return Ok(false);
        }
        Ok(!self.is_async(node)?)
    }

    fn private_accelerated(&mut self, node: &IRNode) -> Result<bool, FusionError> {
        if !self.config.enable_private_accel {
            return Ok(false);
        }
        if node.attr(attr_keys::PRIVATE_ACCEL).and_then(|v| v.as_bool()) == Some(true) {
            return Ok(true);
        }
        Ok(self.lookup(node)?.private_accelerated)
    }

    pub fn classify(&mut self, node: &IRNode) -> Result<Classification, FusionError> {
        if self.is_marker(node) {
            return Ok(Classification::Skip);
        }
        if self.is_async(node)? {
            return Ok(Classification::Isolated);
        }
        if self.is_debug_forced(node)? {
            return Ok(Classification::Fusible);
        }
        if self.config.deny_list.contains(&node.op_type) {
            return Ok(Classification::Isolated);
        }
        if is_function_op(&node.op_type) || self.private_accelerated(node)? {
            return Ok(Classification::Fusible);
        }
        let config = self.config;
        if self.lookup(node)?.kernel_library == config.target_library {
            Ok(Classification::Fusible)
        } else {
            Ok(Classification::Isolated)
        }
    }
}
