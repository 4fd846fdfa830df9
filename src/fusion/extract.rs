//! Builds an isolated copy of a cluster and records its boundary interface.
//!
//! Extraction only reads the original graph.

use crate::core::types::TensorDesc;
use crate::error::FusionError;
use crate::ir_graph::{DataEdge, IRGraph};
use petgraph::stable_graph::NodeIndex;
use std::collections::{BTreeMap, HashSet};

/// Data edge entering the cluster. `desc` is the producer-side descriptor.
#[derive(Debug, Clone)]
pub struct BoundaryInput {
    pub edge: DataEdge,
    pub src_name: String,
    pub desc: TensorDesc,
}

/// One cluster output position together with all of its external consumers.
#[derive(Debug, Clone)]
pub struct BoundaryOutput {
    pub src: NodeIndex,
    pub src_name: String,
    pub src_out: usize,
    pub desc: TensorDesc,
    pub consumers: Vec<DataEdge>,
}

#[derive(Debug, Clone)]
pub struct SubgraphInfo {
    pub members: Vec<NodeIndex>,
    pub member_names: Vec<String>,
    pub subgraph: IRGraph,
    /// Member name to its copy inside `subgraph`.
    pub node_map: BTreeMap<String, NodeIndex>,
    pub boundary_inputs: Vec<BoundaryInput>,
    pub boundary_outputs: Vec<BoundaryOutput>,
    /// Edges with both ends inside the cluster, in original indices.
    pub internal_edges: Vec<DataEdge>,
    pub internal_control: Vec<(NodeIndex, NodeIndex)>,
    /// (external source, member)
    pub control_inputs: Vec<(NodeIndex, NodeIndex)>,
    /// (member, external target)
    pub control_outputs: Vec<(NodeIndex, NodeIndex)>,
}

impl SubgraphInfo {
    pub fn label(&self) -> &str {
        self.member_names.first().map(String::as_str).unwrap_or("")
    }

    pub fn member_name(&self, idx: NodeIndex) -> Option<&str> {
        self.members.iter().position(|&m| m == idx).map(|i| self.member_names[i].as_str())
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.members.contains(&idx)
    }

    /// Position of a boundary input edge in the call-site signature.
    pub fn input_position(&self, edge: &DataEdge) -> Option<usize> {
        self.boundary_inputs.iter().position(|b| b.edge == *edge)
    }
}

pub struct SubgraphExtractor;

impl SubgraphExtractor {
    pub fn extract(graph: &IRGraph, members: &[NodeIndex]) -> Result<SubgraphInfo, FusionError> {
        let member_set: HashSet<NodeIndex> = members.iter().copied().collect();
        let first = members.first().map(|&m| graph.node(m)).transpose()?;
        let mut subgraph = IRGraph::new(&format!("{}_subgraph", first.map(|n| n.name.as_str()).unwrap_or("empty")));

        let mut info_members = Vec::with_capacity(members.len());
        let mut member_names = Vec::with_capacity(members.len());
        let mut node_map = BTreeMap::new();
        let mut boundary_inputs = Vec::new();
        let mut boundary_outputs = Vec::new();
        let mut internal_edges = Vec::new();
        let mut internal_control = Vec::new();
        let mut control_inputs = Vec::new();
        let mut control_outputs = Vec::new();

        for &idx in members {
            let node = graph.node(idx)?;
            let copy = subgraph.add_node(node.clone())?;
            node_map.insert(node.name.clone(), copy);
            info_members.push(idx);
            member_names.push(node.name.clone());

            for edge in graph.in_data_edges(idx) {
                if member_set.contains(&edge.src) {
                    internal_edges.push(edge);
                } else {
                    let producer = graph.node(edge.src)?;
                    let desc = producer.outputs.get(edge.src_out).cloned().ok_or_else(|| FusionError::MissingOutput {
                        node: producer.name.clone(),
                        index: edge.src_out,
                    })?;
                    boundary_inputs.push(BoundaryInput { edge, src_name: producer.name.clone(), desc });
                }
            }

            let mut by_output: BTreeMap<usize, Vec<DataEdge>> = BTreeMap::new();
            for edge in graph.out_data_edges(idx) {
                if !member_set.contains(&edge.dst) {
                    by_output.entry(edge.src_out).or_default().push(edge);
                }
            }
            for (src_out, consumers) in by_output {
                let desc = node.outputs.get(src_out).cloned().ok_or_else(|| FusionError::MissingOutput {
                    node: node.name.clone(),
                    index: src_out,
                })?;
                boundary_outputs.push(BoundaryOutput { src: idx, src_name: node.name.clone(), src_out, desc, consumers });
            }

            for src in graph.in_control(idx) {
                if member_set.contains(&src) {
                    internal_control.push((src, idx));
                } else {
                    control_inputs.push((src, idx));
                }
            }
            for dst in graph.out_control(idx) {
                if !member_set.contains(&dst) {
                    control_outputs.push((idx, dst));
                }
            }
        }

        Ok(SubgraphInfo {
            members: info_members,
            member_names,
            subgraph,
            node_map,
            boundary_inputs,
            boundary_outputs,
            internal_edges,
            internal_control,
            control_inputs,
            control_outputs,
        })
    }
}
