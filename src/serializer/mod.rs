//! Function and call-site descriptor emission for fused clusters.
//!
//! Previously fused members contribute their typed library directly, so a
//! library is encoded exactly once, when the outermost unit is built.

pub mod convert;
pub mod proto;

use crate::core::attr::AttrValue;
use crate::core::op::{ARG_PREFIX, FUNCTION_OP, attr_keys};
use crate::core::types::{OutputOrigin, TensorDesc};
use crate::error::{ConvertError, FusionError, SerializeError};
use crate::fusion::extract::SubgraphInfo;
use crate::ir_graph::{IRGraph, IRNode};
use crate::lowering::ParserRegistry;
use convert::{attr_value_proto, tensor_desc_proto};
use petgraph::stable_graph::NodeIndex;
use prost::Message;
use proto::{AttrValueProto, FunctionDefProto, FunctionLibraryProto, NodeDefProto, TensorDescProto};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Function definitions keyed by name. Merging is a union by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, FunctionDefProto>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses to replace an existing definition.
    pub fn insert(&mut self, def: FunctionDefProto) -> Result<(), SerializeError> {
        match self.functions.entry(def.name.clone()) {
            Entry::Occupied(_) => Err(SerializeError::DuplicateFunction(def.name)),
            Entry::Vacant(slot) => {
                slot.insert(def);
                Ok(())
            }
        }
    }

    /// Adds every function of `other` not already present.
    pub fn merge(&mut self, other: &FunctionLibrary) {
        for (name, def) in &other.functions {
            self.functions.entry(name.clone()).or_insert_with(|| def.clone());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefProto> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn to_proto(&self) -> FunctionLibraryProto {
        FunctionLibraryProto { function: self.functions.values().cloned().collect() }
    }

    pub fn encode(&self, name: &str, limit: usize) -> Result<Vec<u8>, SerializeError> {
        encode_checked(&self.to_proto(), name, limit)
    }
}

fn encode_checked<M: Message>(msg: &M, name: &str, limit: usize) -> Result<Vec<u8>, SerializeError> {
    let size = msg.encoded_len();
    if size > limit {
        return Err(SerializeError::SizeOverflow { name: name.to_string(), size, limit });
    }
    Ok(msg.encode_to_vec())
}

/// Name of the function a call site invokes.
pub fn function_name(call_site: &str) -> String {
    format!("{}_func", call_site)
}

/// Structured form of a fused unit, carried on its call-site node.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedPayload {
    pub func_name: String,
    pub library: FunctionLibrary,
    pub call_site: NodeDefProto,
}

/// Per-cluster inputs to descriptor building.
#[derive(Debug, Default)]
pub struct CollectedFunctions {
    pub library: FunctionLibrary,
    /// Lowered definition of every member, keyed by member name.
    pub node_defs: BTreeMap<String, NodeDefProto>,
}

/// Everything the orchestrator needs to materialize a call-site node.
#[derive(Debug, Clone)]
pub struct FusedUnit {
    pub call_site_name: String,
    pub func_name: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub merged_from: Vec<String>,
    pub function_bytes: Vec<u8>,
    pub call_site_bytes: Vec<u8>,
    pub payload: FusedPayload,
}

fn output_provenance(outputs: &[TensorDesc]) -> Vec<String> {
    outputs
        .iter()
        .filter_map(|d| d.origin.as_ref())
        .map(|o| format!("{}:{}", o.node, o.output_index))
        .collect()
}

impl FusedUnit {
    pub fn into_node(self) -> IRNode {
        let provenance = output_provenance(&self.outputs);
        let mut node = IRNode::new(&self.call_site_name, FUNCTION_OP, self.inputs, self.outputs)
            .with_attr(attr_keys::FUNC_NAME, AttrValue::Str(self.func_name))
            .with_attr(attr_keys::ASYNC_FLAG, AttrValue::Bool(false))
            .with_attr(attr_keys::ORIGINAL_NODE_NAMES, AttrValue::ListStr(self.merged_from))
            .with_attr(attr_keys::OUTPUT_PROVENANCE, AttrValue::ListStr(provenance));
        node.function_def = Some(self.function_bytes);
        node.call_site_def = Some(self.call_site_bytes);
        node.fused = Some(self.payload);
        node
    }
}

pub struct FunctionSerializer<'a> {
    registry: &'a ParserRegistry,
    max_bytes: usize,
}

impl<'a> FunctionSerializer<'a> {
    pub fn new(registry: &'a ParserRegistry, max_bytes: usize) -> Self {
        Self { registry, max_bytes }
    }

    /// Lowers plain members and merges the libraries of already-fused ones.
    pub fn collect_functions(&self, graph: &IRGraph, members: &[NodeIndex]) -> Result<CollectedFunctions, FusionError> {
        let mut collected = CollectedFunctions::default();
        for &idx in members {
            let node = graph.node(idx)?;
            if let Some(fused) = &node.fused {
                collected.library.merge(&fused.library);
            }
            let def = self.registry.lower_node(node)?;
            collected.node_defs.insert(node.name.clone(), def);
        }
        Ok(collected)
    }

    /// Expects internal edges to be linked in `info.subgraph` already.
    pub fn build_function_descriptor(
        &self,
        call_site_name: &str,
        info: &SubgraphInfo,
        collected: &CollectedFunctions,
    ) -> Result<FusedUnit, SerializeError> {
        let func_name = function_name(call_site_name);

        let mut body = Vec::with_capacity(info.members.len());
        for (&member, name) in info.members.iter().zip(&info.member_names) {
            let mut def = collected
                .node_defs
                .get(name)
                .cloned()
                .ok_or_else(|| SerializeError::MissingNodeDef(name.clone()))?;
            def.input = self.body_inputs(info, member, name)?;
            body.push(def);
        }

        let inputs: Vec<TensorDesc> = info.boundary_inputs.iter().map(|b| b.desc.clone()).collect();
        let outputs: Vec<TensorDesc> = info
            .boundary_outputs
            .iter()
            .map(|b| {
                let mut desc = b.desc.clone();
                if desc.origin.is_none() {
                    desc.origin = Some(OutputOrigin {
                        node: b.src_name.clone(),
                        output_index: b.src_out,
                        dtype: b.desc.dtype,
                        format: b.desc.format,
                    });
                }
                desc
            })
            .collect();

        let input_arg = descs_proto(&inputs, call_site_name)?;
        let output_arg = descs_proto(&outputs, call_site_name)?;

        let function = FunctionDefProto {
            name: func_name.clone(),
            input_arg: input_arg.clone(),
            output_arg: output_arg.clone(),
            ret: info.boundary_outputs.iter().map(|b| format!("{}:{}", b.src_name, b.src_out)).collect(),
            node_def: body,
        };
        let mut library = collected.library.clone();
        library.insert(function)?;
        let function_bytes = library.encode(&func_name, self.max_bytes)?;

        let mut attr: BTreeMap<String, AttrValueProto> = BTreeMap::new();
        attr.insert(attr_keys::FUNC_NAME.to_string(), attr_value_proto(&AttrValue::Str(func_name.clone())));
        attr.insert(attr_keys::ASYNC_FLAG.to_string(), attr_value_proto(&AttrValue::Bool(false)));
        attr.insert(
            attr_keys::ORIGINAL_NODE_NAMES.to_string(),
            attr_value_proto(&AttrValue::ListStr(info.member_names.clone())),
        );
        attr.insert(
            attr_keys::OUTPUT_PROVENANCE.to_string(),
            attr_value_proto(&AttrValue::ListStr(output_provenance(&outputs))),
        );
        let call_site = NodeDefProto {
            name: call_site_name.to_string(),
            op: FUNCTION_OP.to_string(),
            input: info.boundary_inputs.iter().map(|b| format!("{}:{}", b.src_name, b.edge.src_out)).collect(),
            input_desc: input_arg,
            output_desc: output_arg,
            attr,
        };
        let call_site_bytes = encode_checked(&call_site, call_site_name, self.max_bytes)?;

        Ok(FusedUnit {
            call_site_name: call_site_name.to_string(),
            func_name: func_name.clone(),
            inputs,
            outputs,
            merged_from: info.member_names.clone(),
            function_bytes,
            call_site_bytes,
            payload: FusedPayload { func_name, library, call_site },
        })
    }

    /// Input references of one body node, ordered by input position, then
    /// its control dependencies.
    fn body_inputs(&self, info: &SubgraphInfo, member: NodeIndex, name: &str) -> Result<Vec<String>, SerializeError> {
        let copy = info.node_map.get(name).copied().ok_or_else(|| SerializeError::MissingNodeDef(name.to_string()))?;
        let sub = &info.subgraph;

        let mut refs: Vec<(usize, String)> = Vec::new();
        for edge in sub.in_data_edges(copy) {
            let src = sub.node(edge.src).map_err(|_| SerializeError::MissingNodeDef(name.to_string()))?;
            refs.push((edge.dst_in, format!("{}:{}", src.name, edge.src_out)));
        }
        for (k, b) in info.boundary_inputs.iter().enumerate() {
            if b.edge.dst == member {
                refs.push((b.edge.dst_in, format!("{}:{}", ARG_PREFIX, k)));
            }
        }
        refs.sort();

        let mut inputs: Vec<String> = refs.into_iter().map(|(_, r)| r).collect();
        for src in sub.in_control(copy) {
            if let Ok(node) = sub.node(src) {
                inputs.push(format!("^{}", node.name));
            }
        }
        Ok(inputs)
    }
}

fn descs_proto(descs: &[TensorDesc], cluster: &str) -> Result<Vec<TensorDescProto>, SerializeError> {
    descs
        .iter()
        .map(|d| {
            tensor_desc_proto(d).map_err(|err| match err {
                ConvertError::ElementType(dtype) => SerializeError::UnsupportedElementType {
                    node: cluster.to_string(),
                    dtype,
                },
                ConvertError::SizeOutOfRange(size) => SerializeError::SizeOutOfRange {
                    node: cluster.to_string(),
                    size,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;
    use crate::fusion::extract::SubgraphExtractor;
    use crate::fusion::rewire::link_internal;

    fn unary(name: &str) -> IRNode {
        IRNode::new(
            name,
            "Relu",
            vec![TensorDesc::new("x", DataType::F32, &[4])],
            vec![TensorDesc::new("y", DataType::F32, &[4])],
        )
    }

    /// src -> a -> b -> sink
    fn chain() -> (IRGraph, Vec<NodeIndex>) {
        let mut g = IRGraph::new("g");
        let src = g.add_node(unary("src")).unwrap();
        let a = g.add_node(unary("a")).unwrap();
        let b = g.add_node(unary("b")).unwrap();
        let sink = g.add_node(unary("sink")).unwrap();
        g.add_data_edge(src, 0, a, 0).unwrap();
        g.add_data_edge(a, 0, b, 0).unwrap();
        g.add_data_edge(b, 0, sink, 0).unwrap();
        g.add_control_edge(a, b).unwrap();
        (g, vec![a, b])
    }

    fn build(g: &IRGraph, members: &[NodeIndex], registry: &ParserRegistry) -> FusedUnit {
        let mut info = SubgraphExtractor::extract(g, members).unwrap();
        link_internal(&mut info).unwrap();
        let serializer = FunctionSerializer::new(registry, usize::MAX);
        let collected = serializer.collect_functions(g, members).unwrap();
        serializer.build_function_descriptor("a_fused_0", &info, &collected).unwrap()
    }

    #[test]
    fn function_body_references_args_and_internal_outputs() {
        let (g, members) = chain();
        let unit = build(&g, &members, &ParserRegistry::new());

        let lib = FunctionLibraryProto::decode(unit.function_bytes.as_slice()).unwrap();
        assert_eq!(lib.function.len(), 1);
        let f = &lib.function[0];
        assert_eq!(f.name, "a_fused_0_func");
        assert_eq!(f.node_def[0].input, vec!["_arg:0"]);
        assert_eq!(f.node_def[1].input, vec!["a:0", "^a"]);
        assert_eq!(f.ret, vec!["b:0"]);

        let call = NodeDefProto::decode(unit.call_site_bytes.as_slice()).unwrap();
        assert_eq!(call.op, FUNCTION_OP);
        assert_eq!(call.input, vec!["src:0"]);
        assert_eq!(call.output_desc[0].origin_name, "b");
        assert!(call.attr.contains_key(attr_keys::ORIGINAL_NODE_NAMES));
        assert!(call.attr.contains_key(attr_keys::OUTPUT_PROVENANCE));

        let node = unit.into_node();
        let provenance = node.attr(attr_keys::OUTPUT_PROVENANCE).and_then(|v| v.as_list_str()).unwrap();
        assert_eq!(provenance, ["b:0"]);
    }

    #[test]
    fn serialization_is_deterministic() {
        let (g, members) = chain();
        let registry = ParserRegistry::new();
        let first = build(&g, &members, &registry);
        let second = build(&g, &members, &registry);
        assert_eq!(first.function_bytes, second.function_bytes);
        assert_eq!(first.call_site_bytes, second.call_site_bytes);
    }

    #[test]
    fn nested_fused_member_contributes_its_library() {
        let (mut g, members) = chain();
        let inner = build(&g, &members, &ParserRegistry::new()).into_node();
        let inner_idx = g.add_node(inner).unwrap();

        let registry = ParserRegistry::new();
        let serializer = FunctionSerializer::new(&registry, usize::MAX);
        let collected = serializer.collect_functions(&g, &[inner_idx]).unwrap();
        assert!(collected.library.contains("a_fused_0_func"));
        assert_eq!(collected.node_defs["a_fused_0"].op, FUNCTION_OP);
    }

    #[test]
    fn size_limit_is_enforced() {
        let (g, members) = chain();
        let registry = ParserRegistry::new();
        let mut info = SubgraphExtractor::extract(&g, &members).unwrap();
        link_internal(&mut info).unwrap();
        let serializer = FunctionSerializer::new(&registry, 8);
        let collected = serializer.collect_functions(&g, &members).unwrap();
        let err = serializer.build_function_descriptor("a_fused_0", &info, &collected).unwrap_err();
        assert!(matches!(err, SerializeError::SizeOverflow { limit: 8, .. }));
    }

    #[test]
    fn descriptor_never_replaces_a_nested_function() {
        let (g, members) = chain();
        let registry = ParserRegistry::new();
        let mut info = SubgraphExtractor::extract(&g, &members).unwrap();
        link_internal(&mut info).unwrap();
        let serializer = FunctionSerializer::new(&registry, usize::MAX);
        let mut collected = serializer.collect_functions(&g, &members).unwrap();
        collected
            .library
            .insert(FunctionDefProto { name: "a_fused_0_func".into(), ret: vec!["x:0".into()], ..Default::default() })
            .unwrap();

        let err = serializer.build_function_descriptor("a_fused_0", &info, &collected).unwrap_err();
        assert!(matches!(err, SerializeError::DuplicateFunction(ref name) if name == "a_fused_0_func"));
    }

    #[test]
    fn library_merge_keeps_first_definition() {
        let mut lib = FunctionLibrary::new();
        lib.insert(FunctionDefProto { name: "f".into(), ret: vec!["x:0".into()], ..Default::default() }).unwrap();
        let mut other = FunctionLibrary::new();
        other.insert(FunctionDefProto { name: "f".into(), ..Default::default() }).unwrap();
        other.insert(FunctionDefProto { name: "g".into(), ..Default::default() }).unwrap();
        lib.merge(&other);
        assert_eq!(lib.names().collect::<Vec<_>>(), vec!["f", "g"]);
        assert_eq!(lib.get("f").unwrap().ret, vec!["x:0"]);
    }
}
