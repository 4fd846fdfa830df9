use crate::core::attr::{AttrMap, AttrValue};
use crate::core::types::TensorDesc;
use crate::error::FusionError;
use crate::serializer::FusedPayload;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IREdge {
    Data { src_out: usize, dst_in: usize },
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataEdge {
    pub src: NodeIndex,
    pub src_out: usize,
    pub dst: NodeIndex,
    pub dst_in: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IRNode {
    pub name: String,
    pub op_type: String,
    pub attrs: AttrMap,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    /// Serialized single-operator descriptor, set by isolated lowering.
    pub node_def: Option<Vec<u8>>,
    /// Serialized function library of a fused unit.
    pub function_def: Option<Vec<u8>>,
    /// Serialized call-site descriptor of a fused unit.
    pub call_site_def: Option<Vec<u8>>,
    pub fused: Option<FusedPayload>,
}

impl IRNode {
    pub fn new(name: &str, op_type: &str, inputs: Vec<TensorDesc>, outputs: Vec<TensorDesc>) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs,
            outputs,
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }
}

/// Mutable dataflow graph the fusion pass rewrites in place.
#[derive(Debug, Clone, Default)]
pub struct IRGraph {
    pub name: String,
    graph: StableDiGraph<IRNode, IREdge>,
    node_map: HashMap<String, NodeIndex>,
}

impl IRGraph {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn add_node(&mut self, node: IRNode) -> Result<NodeIndex, FusionError> {
        if self.node_map.contains_key(&node.name) {
            return Err(FusionError::DuplicateNode(node.name));
        }
        let name = node.name.clone();
        let idx = self.graph.add_node(node);
        self.node_map.insert(name, idx);
        Ok(idx)
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, idx: NodeIndex) -> Result<IRNode, FusionError> {
        let node = self
            .graph
            .remove_node(idx)
            .ok_or_else(|| FusionError::MissingNode(format!("#{}", idx.index())))?;
        self.node_map.remove(&node.name);
        Ok(node)
    }

    pub fn index_of(&self, name: &str) -> Result<NodeIndex, FusionError> {
        self.node_map.get(name).copied().ok_or_else(|| FusionError::MissingNode(name.to_string()))
    }

    pub fn contains(&self, idx: NodeIndex) -> bool {
        self.graph.contains_node(idx)
    }

    pub fn node(&self, idx: NodeIndex) -> Result<&IRNode, FusionError> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| FusionError::MissingNode(format!("#{}", idx.index())))
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> Result<&mut IRNode, FusionError> {
        self.graph
            .node_weight_mut(idx)
            .ok_or_else(|| FusionError::MissingNode(format!("#{}", idx.index())))
    }

    pub fn by_name(&self, name: &str) -> Option<&IRNode> {
        self.node_map.get(name).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn data_edge_count(&self) -> usize {
        self.graph.edge_weights().filter(|w| matches!(w, IREdge::Data { .. })).count()
    }

    pub fn control_edge_count(&self) -> usize {
        self.graph.edge_weights().filter(|w| matches!(w, IREdge::Control)).count()
    }

    /// Node indices in index order.
    pub fn node_indices(&self) -> Vec<NodeIndex> {
        self.graph.node_indices().collect()
    }

    fn name_of(&self, idx: NodeIndex) -> String {
        self.graph
            .node_weight(idx)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("#{}", idx.index()))
    }

    /// Checks that an edge could be added without touching the graph.
    pub fn validate_data_edge(&self, src: NodeIndex, src_out: usize, dst: NodeIndex, dst_in: usize) -> Result<(), FusionError> {
        let src_node = self.node(src)?;
        if src_out >= src_node.outputs.len() {
            return Err(FusionError::MissingOutput { node: src_node.name.clone(), index: src_out });
        }
        let dst_node = self.node(dst)?;
        if dst_in >= dst_node.inputs.len() {
            return Err(FusionError::MissingInput { node: dst_node.name.clone(), index: dst_in });
        }
        if self.producer_of(dst, dst_in).is_some() {
            return Err(FusionError::InputOccupied { node: dst_node.name.clone(), index: dst_in });
        }
        Ok(())
    }

    pub fn add_data_edge(&mut self, src: NodeIndex, src_out: usize, dst: NodeIndex, dst_in: usize) -> Result<(), FusionError> {
        self.validate_data_edge(src, src_out, dst, dst_in)?;
        self.graph.add_edge(src, dst, IREdge::Data { src_out, dst_in });
        Ok(())
    }

    pub fn remove_data_edge(&mut self, edge: &DataEdge) -> Result<(), FusionError> {
        let id = self
            .graph
            .edges_connecting(edge.src, edge.dst)
            .find(|e| *e.weight() == IREdge::Data { src_out: edge.src_out, dst_in: edge.dst_in })
            .map(|e| e.id());
        match id {
            Some(id) => {
                self.graph.remove_edge(id);
                Ok(())
            }
            None => Err(FusionError::DanglingEdge {
                src: self.name_of(edge.src),
                src_out: edge.src_out,
                dst: self.name_of(edge.dst),
                dst_in: edge.dst_in,
            }),
        }
    }

    pub fn has_data_edge(&self, edge: &DataEdge) -> bool {
        self.graph
            .edges_connecting(edge.src, edge.dst)
            .any(|e| *e.weight() == IREdge::Data { src_out: edge.src_out, dst_in: edge.dst_in })
    }

    /// Adds an ordering dependency. Duplicates are ignored.
    pub fn add_control_edge(&mut self, src: NodeIndex, dst: NodeIndex) -> Result<(), FusionError> {
        self.node(src)?;
        self.node(dst)?;
        if !self.has_control_edge(src, dst) {
            self.graph.add_edge(src, dst, IREdge::Control);
        }
        Ok(())
    }

    pub fn remove_control_edge(&mut self, src: NodeIndex, dst: NodeIndex) -> Result<(), FusionError> {
        let id = self
            .graph
            .edges_connecting(src, dst)
            .find(|e| *e.weight() == IREdge::Control)
            .map(|e| e.id());
        match id {
            Some(id) => {
                self.graph.remove_edge(id);
                Ok(())
            }
            None => Err(FusionError::DanglingControlEdge { src: self.name_of(src), dst: self.name_of(dst) }),
        }
    }

    pub fn has_control_edge(&self, src: NodeIndex, dst: NodeIndex) -> bool {
        self.graph.edges_connecting(src, dst).any(|e| *e.weight() == IREdge::Control)
    }

    /// Incoming data edges ordered by input position.
    pub fn in_data_edges(&self, idx: NodeIndex) -> Vec<DataEdge> {
        let mut edges: Vec<DataEdge> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter_map(|e| match *e.weight() {
                IREdge::Data { src_out, dst_in } => Some(DataEdge { src: e.source(), src_out, dst: idx, dst_in }),
                IREdge::Control => None,
            })
            .collect();
        edges.sort_by_key(|e| (e.dst_in, e.src, e.src_out));
        edges
    }

    /// Outgoing data edges ordered by output position, then consumer.
    pub fn out_data_edges(&self, idx: NodeIndex) -> Vec<DataEdge> {
        let mut edges: Vec<DataEdge> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter_map(|e| match *e.weight() {
                IREdge::Data { src_out, dst_in } => Some(DataEdge { src: idx, src_out, dst: e.target(), dst_in }),
                IREdge::Control => None,
            })
            .collect();
        edges.sort_by_key(|e| (e.src_out, e.dst, e.dst_in));
        edges
    }

    pub fn in_control(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.control_neighbors(idx, Direction::Incoming)
    }

    pub fn out_control(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.control_neighbors(idx, Direction::Outgoing)
    }

    fn control_neighbors(&self, idx: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, dir)
            .filter(|e| *e.weight() == IREdge::Control)
            .map(|e| if dir == Direction::Incoming { e.source() } else { e.target() })
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    pub fn producer_of(&self, dst: NodeIndex, dst_in: usize) -> Option<DataEdge> {
        self.in_data_edges(dst).into_iter().find(|e| e.dst_in == dst_in)
    }

    /// Topological order; ties resolve to the lowest node index so the
    /// order follows insertion for a freshly built graph.
    pub fn topo_order(&self) -> Result<Vec<NodeIndex>, FusionError> {
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, self.graph.neighbors_directed(idx, Direction::Incoming).count());
        }
        let mut ready: BTreeSet<NodeIndex> =
            in_degree.iter().filter(|&(_, &d)| d == 0).map(|(&i, _)| i).collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(d) = in_degree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(next);
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(FusionError::Cycle(self.name.clone()));
        }
        Ok(order)
    }
}
