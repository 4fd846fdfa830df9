//! Boundary relinking between a cluster and its call-site node.
//!
//! Edge changes are computed up front as a `RewirePlan`, checked against a
//! simulated view of the graph, and only then applied.

use crate::error::FusionError;
use crate::fusion::extract::SubgraphInfo;
use crate::ir_graph::{DataEdge, IRGraph};
use petgraph::stable_graph::NodeIndex;
use std::collections::HashSet;

/// Reproduces the cluster's internal edges between the copies in `info.subgraph`.
pub fn link_internal(info: &mut SubgraphInfo) -> Result<(), FusionError> {
    let copy_of = |info: &SubgraphInfo, idx: NodeIndex| -> Result<NodeIndex, FusionError> {
        info.member_name(idx)
            .and_then(|name| info.node_map.get(name).copied())
            .ok_or_else(|| FusionError::MissingNode(format!("#{}", idx.index())))
    };

    let mut data = Vec::with_capacity(info.internal_edges.len());
    for edge in &info.internal_edges {
        data.push((copy_of(info, edge.src)?, edge.src_out, copy_of(info, edge.dst)?, edge.dst_in));
    }
    let mut control = Vec::with_capacity(info.internal_control.len());
    for &(src, dst) in &info.internal_control {
        control.push((copy_of(info, src)?, copy_of(info, dst)?));
    }

    for (src, src_out, dst, dst_in) in data {
        info.subgraph.add_data_edge(src, src_out, dst, dst_in)?;
    }
    for (src, dst) in control {
        info.subgraph.add_control_edge(src, dst)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeChange {
    RemoveData(DataEdge),
    AddData(DataEdge),
    RemoveControl(NodeIndex, NodeIndex),
    AddControl(NodeIndex, NodeIndex),
}

#[derive(Debug, Clone, Default)]
pub struct RewirePlan {
    changes: Vec<EdgeChange>,
}

impl RewirePlan {
    /// Moves every boundary edge of the cluster onto `call_site`.
    ///
    /// Input k of the call site takes boundary input k. Output j takes
    /// boundary output j and keeps all of its external consumers.
    pub fn for_call_site(info: &SubgraphInfo, call_site: NodeIndex) -> Self {
        let mut removals = Vec::new();
        let mut additions = Vec::new();

        for (k, input) in info.boundary_inputs.iter().enumerate() {
            removals.push(EdgeChange::RemoveData(input.edge));
            additions.push(EdgeChange::AddData(DataEdge {
                src: input.edge.src,
                src_out: input.edge.src_out,
                dst: call_site,
                dst_in: k,
            }));
        }
        for (j, output) in info.boundary_outputs.iter().enumerate() {
            for consumer in &output.consumers {
                removals.push(EdgeChange::RemoveData(*consumer));
                additions.push(EdgeChange::AddData(DataEdge {
                    src: call_site,
                    src_out: j,
                    dst: consumer.dst,
                    dst_in: consumer.dst_in,
                }));
            }
        }
        for &(src, member) in &info.control_inputs {
            removals.push(EdgeChange::RemoveControl(src, member));
            additions.push(EdgeChange::AddControl(src, call_site));
        }
        for &(member, dst) in &info.control_outputs {
            removals.push(EdgeChange::RemoveControl(member, dst));
            additions.push(EdgeChange::AddControl(call_site, dst));
        }

        removals.extend(additions);
        Self { changes: removals }
    }

    pub fn changes(&self) -> &[EdgeChange] {
        &self.changes
    }

    /// Replays the plan against a simulated edge set without touching `graph`.
    pub fn validate(&self, graph: &IRGraph) -> Result<(), FusionError> {
        let mut removed: HashSet<DataEdge> = HashSet::new();
        let mut removed_control: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
        let mut filled: HashSet<(NodeIndex, usize)> = HashSet::new();

        for change in &self.changes {
            match *change {
                EdgeChange::RemoveData(edge) => {
                    if !graph.has_data_edge(&edge) || !removed.insert(edge) {
                        return Err(dangling(graph, &edge));
                    }
                }
                EdgeChange::AddData(edge) => {
                    let src = graph.node(edge.src)?;
                    if edge.src_out >= src.outputs.len() {
                        return Err(FusionError::MissingOutput { node: src.name.clone(), index: edge.src_out });
                    }
                    let dst = graph.node(edge.dst)?;
                    if edge.dst_in >= dst.inputs.len() {
                        return Err(FusionError::MissingInput { node: dst.name.clone(), index: edge.dst_in });
                    }
                    let occupied = graph
                        .producer_of(edge.dst, edge.dst_in)
                        .is_some_and(|existing| !removed.contains(&existing));
                    if occupied || !filled.insert((edge.dst, edge.dst_in)) {
                        return Err(FusionError::InputOccupied { node: dst.name.clone(), index: edge.dst_in });
                    }
                }
                EdgeChange::RemoveControl(src, dst) => {
                    if !graph.has_control_edge(src, dst) || !removed_control.insert((src, dst)) {
                        return Err(FusionError::DanglingControlEdge {
                            src: name_or_index(graph, src),
                            dst: name_or_index(graph, dst),
                        });
                    }
                }
                EdgeChange::AddControl(src, dst) => {
                    graph.node(src)?;
                    graph.node(dst)?;
                }
            }
        }
        Ok(())
    }

    /// Validates, then applies every change in order.
    pub fn apply(&self, graph: &mut IRGraph) -> Result<(), FusionError> {
        self.validate(graph)?;
        for change in &self.changes {
            match *change {
                EdgeChange::RemoveData(edge) => graph.remove_data_edge(&edge)?,
                EdgeChange::AddData(e) => graph.add_data_edge(e.src, e.src_out, e.dst, e.dst_in)?,
                EdgeChange::RemoveControl(src, dst) => graph.remove_control_edge(src, dst)?,
                EdgeChange::AddControl(src, dst) => graph.add_control_edge(src, dst)?,
            }
        }
        Ok(())
    }
}

fn name_or_index(graph: &IRGraph, idx: NodeIndex) -> String {
    graph.node(idx).map(|n| n.name.clone()).unwrap_or_else(|_| format!("#{}", idx.index()))
}

fn dangling(graph: &IRGraph, edge: &DataEdge) -> FusionError {
    FusionError::DanglingEdge {
        src: name_or_index(graph, edge.src),
        src_out: edge.src_out,
        dst: name_or_index(graph, edge.dst),
        dst_in: edge.dst_in,
    }
}

/// Moves the cluster's boundary onto `call_site`. Nothing is changed on error.
pub fn rewire(graph: &mut IRGraph, info: &SubgraphInfo, call_site: NodeIndex) -> Result<(), FusionError> {
    RewirePlan::for_call_site(info, call_site).apply(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataType, TensorDesc};
    use crate::fusion::extract::SubgraphExtractor;
    use crate::ir_graph::IRNode;

    fn node(name: &str, inputs: usize, outputs: usize) -> IRNode {
        IRNode::new(
            name,
            "Relu",
            (0..inputs).map(|i| TensorDesc::new(&format!("x{i}"), DataType::F32, &[4])).collect(),
            (0..outputs).map(|i| TensorDesc::new(&format!("y{i}"), DataType::F32, &[4])).collect(),
        )
    }

    /// src -> a -> b -> {c, d}; b also feeds d. Cluster is {a, b}.
    fn fan_out() -> (IRGraph, Vec<NodeIndex>, [NodeIndex; 3]) {
        let mut g = IRGraph::new("g");
        let src = g.add_node(node("src", 0, 1)).unwrap();
        let a = g.add_node(node("a", 1, 1)).unwrap();
        let b = g.add_node(node("b", 1, 1)).unwrap();
        let c = g.add_node(node("c", 1, 1)).unwrap();
        let d = g.add_node(node("d", 2, 1)).unwrap();
        g.add_data_edge(src, 0, a, 0).unwrap();
        g.add_data_edge(a, 0, b, 0).unwrap();
        g.add_data_edge(b, 0, c, 0).unwrap();
        g.add_data_edge(b, 0, d, 1).unwrap();
        g.add_control_edge(src, a).unwrap();
        (g, vec![a, b], [src, c, d])
    }

    #[test]
    fn link_internal_reproduces_cluster_topology() {
        let (g, members, _) = fan_out();
        let mut info = SubgraphExtractor::extract(&g, &members).unwrap();
        link_internal(&mut info).unwrap();
        let a = info.node_map["a"];
        let b = info.node_map["b"];
        assert!(info.subgraph.has_data_edge(&DataEdge { src: a, src_out: 0, dst: b, dst_in: 0 }));
        assert_eq!(info.subgraph.data_edge_count(), 1);
    }

    #[test]
    fn fan_out_shares_one_call_site_output() {
        let (mut g, members, [src, c, d]) = fan_out();
        let info = SubgraphExtractor::extract(&g, &members).unwrap();
        let call = g.add_node(node("call", 1, 1)).unwrap();
        rewire(&mut g, &info, call).unwrap();

        let outs = g.out_data_edges(call);
        assert_eq!(outs.len(), 2);
        assert!(outs.iter().all(|e| e.src_out == 0));
        assert_eq!(outs.iter().map(|e| e.dst).collect::<Vec<_>>(), vec![c, d]);
        assert_eq!(g.producer_of(d, 1).unwrap().src, call);
        assert_eq!(g.producer_of(call, 0).unwrap().src, src);
        assert!(g.has_control_edge(src, call));
        assert!(g.in_control(members[0]).is_empty());
    }

    #[test]
    fn failed_validation_leaves_graph_untouched() {
        let (mut g, members, _) = fan_out();
        let info = SubgraphExtractor::extract(&g, &members).unwrap();
        // Too few inputs for the boundary.
        let call = g.add_node(node("call", 0, 1)).unwrap();
        let before = (g.data_edge_count(), g.control_edge_count());

        let err = rewire(&mut g, &info, call).unwrap_err();
        assert!(matches!(err, FusionError::MissingInput { .. }));
        assert_eq!(before, (g.data_edge_count(), g.control_edge_count()));
        assert!(g.in_data_edges(call).is_empty());
    }

    #[test]
    fn stale_plan_is_rejected() {
        let (mut g, members, _) = fan_out();
        let info = SubgraphExtractor::extract(&g, &members).unwrap();
        let call = g.add_node(node("call", 1, 1)).unwrap();
        let plan = RewirePlan::for_call_site(&info, call);
        plan.apply(&mut g).unwrap();
        assert!(matches!(plan.validate(&g), Err(FusionError::DanglingEdge { .. })));
    }
}
