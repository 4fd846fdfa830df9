use crate::core::attr::AttrMap;
use crate::core::types::TensorDesc;
use crate::ir_graph::{IRGraph, IRNode};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphDef {
    pub name: String,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
    #[serde(default)]
    pub control: Vec<LinkDef>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    #[serde(default)]
    pub attrs: AttrMap,
    #[serde(default)]
    pub inputs: Vec<TensorDesc>,
    #[serde(default)]
    pub outputs: Vec<TensorDesc>,
}

/// `["A:0", "B:1"]` for data links, `["A", "B"]` for control links.
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkDef(pub (String, String));

fn split_port(addr: &str) -> anyhow::Result<(&str, usize)> {
    let (node, port) = addr.rsplit_once(':').ok_or_else(|| anyhow!("Invalid port address: {}", addr))?;
    let port = port.parse::<usize>().with_context(|| format!("Invalid port index in '{}'", addr))?;
    Ok((node, port))
}

impl GraphDef {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn into_ir(self) -> anyhow::Result<IRGraph> {
        let mut graph = IRGraph::new(&self.name);

        for n_def in self.nodes {
            let node = IRNode { attrs: n_def.attrs, ..IRNode::new(&n_def.name, &n_def.op, n_def.inputs, n_def.outputs) };
            graph.add_node(node)?;
        }

        for link_def in &self.links {
            let (from, to) = &link_def.0;
            let (src_name, src_out) = split_port(from)?;
            let (dst_name, dst_in) = split_port(to)?;
            let src = graph.index_of(src_name).with_context(|| format!("Source of link {} -> {}", from, to))?;
            let dst = graph.index_of(dst_name).with_context(|| format!("Destination of link {} -> {}", from, to))?;
            graph.add_data_edge(src, src_out, dst, dst_in).with_context(|| format!("Link {} -> {}", from, to))?;
        }

        for link_def in &self.control {
            let (from, to) = &link_def.0;
            let src = graph.index_of(from)?;
            let dst = graph.index_of(to)?;
            graph.add_control_edge(src, dst)?;
        }

        graph.topo_order().with_context(|| format!("Graph '{}' is not a DAG", self.name))?;
        Ok(graph)
    }
}

pub fn load_graph(json: &str) -> anyhow::Result<IRGraph> {
    GraphDef::from_json(json)?.into_ir()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "sample",
        "nodes": [
            {"name": "a", "op": "Add",
             "inputs": [{"name": "x", "dtype": "F32", "shape": [4]}, {"name": "y", "dtype": "F32", "shape": [4]}],
             "outputs": [{"name": "z", "dtype": "F32", "shape": [4]}]},
            {"name": "b", "op": "Relu", "attrs": {"alpha": {"Float": 0.5}},
             "inputs": [{"name": "x", "dtype": "F32", "shape": [4]}],
             "outputs": [{"name": "y", "dtype": "F32", "shape": [4]}]}
        ],
        "links": [["a:0", "b:0"]],
        "control": [["a", "b"]]
    }"#;

    #[test]
    fn loads_nodes_links_and_control() {
        let g = load_graph(SAMPLE).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.data_edge_count(), 1);
        assert_eq!(g.control_edge_count(), 1);
        assert!(g.by_name("b").unwrap().attr("alpha").is_some());
    }

    #[test]
    fn rejects_unknown_link_target() {
        let json = r#"{"name": "g", "nodes": [], "links": [["a:0", "b:0"]]}"#;
        assert!(load_graph(json).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let json = r#"{
            "name": "loop",
            "nodes": [
                {"name": "a", "op": "Relu", "inputs": [{"name": "x"}], "outputs": [{"name": "y"}]},
                {"name": "b", "op": "Relu", "inputs": [{"name": "x"}], "outputs": [{"name": "y"}]}
            ],
            "links": [["a:0", "b:0"], ["b:0", "a:0"]]
        }"#;
        assert!(load_graph(json).is_err());
    }
}
