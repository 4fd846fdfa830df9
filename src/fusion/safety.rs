//! Fusion vetoes. A veto is a normal outcome, never an error.

use crate::error::FusionError;
use crate::fusion::extract::SubgraphInfo;
use crate::ir_graph::{DataEdge, IRGraph};
use crate::metadata::OpMetadataProvider;
use petgraph::stable_graph::NodeIndex;
use std::collections::BTreeSet;

/// Rejects clusters whose boundary crosses a ref (aliasing) position.
pub struct SafetyChecker<'a> {
    metadata: &'a dyn OpMetadataProvider,
}

impl<'a> SafetyChecker<'a> {
    pub fn new(metadata: &'a dyn OpMetadataProvider) -> Self {
        Self { metadata }
    }

    fn ref_input(&self, graph: &IRGraph, node: NodeIndex, index: usize) -> Result<bool, FusionError> {
        let node = graph.node(node)?;
        let desc = node
            .inputs
            .get(index)
            .ok_or_else(|| FusionError::MissingInput { node: node.name.clone(), index })?;
        Ok(desc.is_ref || self.metadata.ref_positions(&node.op_type).inputs.contains(&desc.name))
    }

    fn ref_output(&self, graph: &IRGraph, node: NodeIndex, index: usize) -> Result<bool, FusionError> {
        let node = graph.node(node)?;
        let desc = node
            .outputs
            .get(index)
            .ok_or_else(|| FusionError::MissingOutput { node: node.name.clone(), index })?;
        Ok(desc.is_ref || self.metadata.ref_positions(&node.op_type).outputs.contains(&desc.name))
    }

    fn edge_crosses_ref(&self, graph: &IRGraph, edge: &DataEdge) -> Result<bool, FusionError> {
        Ok(self.ref_output(graph, edge.src, edge.src_out)? || self.ref_input(graph, edge.dst, edge.dst_in)?)
    }

    /// Checks both endpoints of every boundary data edge.
    pub fn is_safe(&self, graph: &IRGraph, info: &SubgraphInfo) -> Result<bool, FusionError> {
        for input in &info.boundary_inputs {
            if self.edge_crosses_ref(graph, &input.edge)? {
                return Ok(false);
            }
        }
        for output in &info.boundary_outputs {
            for consumer in &output.consumers {
                if self.edge_crosses_ref(graph, consumer)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// On a veto, drains `cluster` into `isolated`.
    pub fn check_cluster_safe(
        &self,
        graph: &IRGraph,
        info: &SubgraphInfo,
        cluster: &mut Vec<NodeIndex>,
        isolated: &mut Vec<NodeIndex>,
    ) -> Result<bool, FusionError> {
        if self.is_safe(graph, info)? {
            return Ok(true);
        }
        isolated.append(cluster);
        Ok(false)
    }
}

/// Coarse whole-pass check for the threaded-execution variant.
pub struct ShapeChecker<'a> {
    non_mergeable: &'a BTreeSet<String>,
}

impl<'a> ShapeChecker<'a> {
    pub fn new(non_mergeable: &'a BTreeSet<String>) -> Self {
        Self { non_mergeable }
    }

    /// False as soon as any output edge of a pending node disagrees on shape
    /// or touches a non-mergeable operator.
    pub fn check_accumulation(&self, graph: &IRGraph, pending: &[NodeIndex]) -> Result<bool, FusionError> {
        for &idx in pending {
            let producer = graph.node(idx)?;
            if self.non_mergeable.contains(&producer.op_type) {
                log::debug!("shape check: '{}' is not mergeable", producer.name);
                return Ok(false);
            }
            for edge in graph.out_data_edges(idx) {
                let consumer = graph.node(edge.dst)?;
                if self.non_mergeable.contains(&consumer.op_type) {
                    log::debug!("shape check: consumer '{}' is not mergeable", consumer.name);
                    return Ok(false);
                }
                let out = producer.outputs.get(edge.src_out).map(|d| &d.shape);
                let inp = consumer.inputs.get(edge.dst_in).map(|d| &d.shape);
                if out != inp {
                    log::debug!(
                        "shape check: {}:{} -> {}:{} disagree",
                        producer.name,
                        edge.src_out,
                        consumer.name,
                        edge.dst_in
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
