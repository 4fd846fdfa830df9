use fusion_lower::config::FusionConfig;
use fusion_lower::core::attr::AttrValue;
use fusion_lower::core::op::{FUNCTION_OP, attr_keys};
use fusion_lower::core::types::{DataType, TensorDesc};
use fusion_lower::fusion::FusionPass;
use fusion_lower::fusion::classifier::ClusterClassifier;
use fusion_lower::ir_graph::{IRGraph, IRNode};
use fusion_lower::lowering::ParserRegistry;
use fusion_lower::metadata::{OpInfo, OpInfoTable};
use proptest::prelude::*;
use std::collections::BTreeSet;
use test_strategy::{Arbitrary, proptest};

fn ops() -> OpInfoTable {
    let lib = |name: &str| OpInfo { kernel_library: name.into(), ..Default::default() };
    OpInfoTable::new()
        .with_op("Add", lib("cpu_kernel"))
        .with_op("Mul", lib("cpu_kernel"))
        .with_op("Conv", lib("npu_kernel"))
        .with_op("Send", OpInfo { is_async: true, ..lib("cpu_kernel") })
        .with_op("Gemm", OpInfo { private_accelerated: true, ..lib("npu_kernel") })
}

const OP_TYPES: [&str; 7] = ["Add", "Mul", "Conv", "Send", "Gemm", "Data", FUNCTION_OP];

/// Linear chain n0 -> n1 -> ... with the given operator types.
fn chain(op_types: &[&str], scale: i64) -> IRGraph {
    let mut g = IRGraph::new("chain");
    let mut prev = None;
    for (i, op_type) in op_types.iter().enumerate() {
        let node = IRNode::new(
            &format!("n{i}"),
            op_type,
            vec![TensorDesc::new("x", DataType::F32, &[4])],
            vec![TensorDesc::new("y", DataType::F32, &[4])],
        )
        .with_attr("scale", AttrValue::Int(scale.wrapping_add(i as i64)));
        let idx = g.add_node(node).unwrap();
        if let Some(p) = prev {
            g.add_data_edge(p, 0, idx, 0).unwrap();
        }
        prev = Some(idx);
    }
    g
}

#[derive(Arbitrary, Debug)]
struct ClassifyProblem {
    #[strategy(0..OP_TYPES.len())]
    op: usize,
    deny: bool,
    debug: bool,
    private_attr: bool,
}

#[proptest(cases = 64)]
fn classification_is_idempotent(prob: ClassifyProblem) {
    let op_type = OP_TYPES[prob.op];
    let mut cfg = FusionConfig::default();
    if prob.deny {
        cfg.deny_list.insert(op_type.to_string());
    }
    if prob.debug {
        cfg.debug_fuse_ops.insert(op_type.to_string());
    }
    let table = ops();
    let mut node = IRNode::new("n", op_type, vec![], vec![]);
    if prob.private_attr {
        node = node.with_attr(attr_keys::PRIVATE_ACCEL, AttrValue::Bool(true));
    }

    let mut classifier = ClusterClassifier::new(&cfg, &table);
    let first = classifier.classify(&node).unwrap();
    let second = classifier.classify(&node).unwrap();
    let fresh = ClusterClassifier::new(&cfg, &table).classify(&node).unwrap();
    prop_assert_eq!(first, second);
    prop_assert_eq!(first, fresh);
}

#[derive(Arbitrary, Debug)]
struct ThresholdProblem {
    #[strategy(1..8usize)]
    len: usize,
    #[strategy(1..6usize)]
    threshold: usize,
}

#[proptest(cases = 48)]
fn run_is_fused_iff_it_meets_the_threshold(prob: ThresholdProblem) {
    let mut g = chain(&vec!["Add"; prob.len], 0);
    let cfg = FusionConfig::default().with_min_cluster_size(prob.threshold);
    let table = ops();
    let registry = ParserRegistry::new();
    let report = FusionPass::new(&cfg, &table, &registry).run(&mut g).unwrap();

    if prob.len >= prob.threshold {
        prop_assert_eq!(report.fused.len(), 1);
        prop_assert_eq!(report.fused[0].merged_from.len(), prob.len);
        prop_assert_eq!(g.node_count(), 1);
    } else {
        prop_assert!(report.fused.is_empty());
        prop_assert_eq!(report.isolated.len(), prob.len);
    }
}

#[derive(Arbitrary, Debug)]
struct GraphProblem {
    #[strategy(proptest::collection::vec(0..OP_TYPES.len() - 1, 1..12))]
    ops: Vec<usize>,
    #[strategy(1..4usize)]
    threshold: usize,
    scale: i64,
}

impl GraphProblem {
    fn graph(&self) -> IRGraph {
        let op_types: Vec<&str> = self.ops.iter().map(|&i| OP_TYPES[i]).collect();
        chain(&op_types, self.scale)
    }
}

#[proptest(cases = 48)]
fn fusion_is_deterministic(prob: GraphProblem) {
    let cfg = FusionConfig::default().with_min_cluster_size(prob.threshold);
    let table = ops();
    let registry = ParserRegistry::new();
    let pass = FusionPass::new(&cfg, &table, &registry);

    let mut first = prob.graph();
    let mut second = prob.graph();
    pass.run(&mut first).unwrap();
    pass.run(&mut second).unwrap();

    prop_assert_eq!(first.node_count(), second.node_count());
    for idx in first.node_indices() {
        let a = first.node(idx).unwrap();
        let b = second.by_name(&a.name).unwrap();
        prop_assert_eq!(&a.function_def, &b.function_def);
        prop_assert_eq!(&a.call_site_def, &b.call_site_def);
        prop_assert_eq!(&a.node_def, &b.node_def);
    }
}

#[proptest(cases = 48)]
fn every_node_is_accounted_for_exactly_once(prob: GraphProblem) {
    let cfg = FusionConfig::default().with_min_cluster_size(prob.threshold);
    let table = ops();
    let registry = ParserRegistry::new();
    let mut g = prob.graph();
    let original: BTreeSet<String> = (0..prob.ops.len()).map(|i| format!("n{i}")).collect();

    let report = FusionPass::new(&cfg, &table, &registry).run(&mut g).unwrap();

    let mut seen = BTreeSet::new();
    for unit in &report.fused {
        let call = g.by_name(&unit.call_site).unwrap();
        let names = call.attr(attr_keys::ORIGINAL_NODE_NAMES).and_then(|v| v.as_list_str()).unwrap();
        prop_assert_eq!(names, unit.merged_from.as_slice());
        for name in names {
            prop_assert!(seen.insert(name.clone()), "{} merged twice", name);
        }
    }
    for name in report.isolated.iter().chain(&report.skipped) {
        prop_assert!(seen.insert(name.clone()), "{} reported twice", name);
    }
    prop_assert_eq!(seen, original);
}

/// Which endpoint of the cluster boundary carries the ref position.
#[derive(Arbitrary, Debug, Clone, Copy)]
enum RefEnd {
    /// `src:0` feeding the cluster.
    InputProducer,
    /// `a:0` reading from outside.
    InputMember,
    /// `b:0` leaving the cluster.
    OutputMember,
    /// `sink:0` reading from the cluster.
    OutputConsumer,
}

#[derive(Arbitrary, Debug, Clone, Copy)]
enum Marking {
    OpMetadata,
    Descriptor,
}

#[derive(Arbitrary, Debug)]
struct VetoProblem {
    end: RefEnd,
    marking: Marking,
    /// Ref names that match no descriptor; they never veto on their own.
    #[strategy(proptest::collection::vec("[a-w]{1,4}", 0..3))]
    noise: Vec<String>,
}

impl VetoProblem {
    /// `src(Conv) -> a(Add) -> b(Mul) -> sink(Pool)`; only `a` and `b` are fusible.
    fn setup(&self, marked: Option<RefEnd>) -> (IRGraph, OpInfoTable) {
        let mut ops = OpInfoTable::new();
        for (op_type, library) in [("Conv", "npu_kernel"), ("Add", "cpu_kernel"), ("Mul", "cpu_kernel"), ("Pool", "npu_kernel")] {
            ops.insert(
                op_type,
                OpInfo {
                    kernel_library: library.into(),
                    ref_inputs: self.noise.clone(),
                    ref_outputs: self.noise.clone(),
                    ..Default::default()
                },
            );
        }

        let mut g = IRGraph::new("veto");
        let mut prev = None;
        for (name, op_type) in [("src", "Conv"), ("a", "Add"), ("b", "Mul"), ("sink", "Pool")] {
            let node = IRNode::new(
                name,
                op_type,
                vec![TensorDesc::new("x", DataType::F32, &[4])],
                vec![TensorDesc::new("y", DataType::F32, &[4])],
            );
            let idx = g.add_node(node).unwrap();
            if let Some(p) = prev {
                g.add_data_edge(p, 0, idx, 0).unwrap();
            }
            prev = Some(idx);
        }

        if let Some(end) = marked {
            let (name, op_type, library, is_input) = match end {
                RefEnd::InputProducer => ("src", "Conv", "npu_kernel", false),
                RefEnd::InputMember => ("a", "Add", "cpu_kernel", true),
                RefEnd::OutputMember => ("b", "Mul", "cpu_kernel", false),
                RefEnd::OutputConsumer => ("sink", "Pool", "npu_kernel", true),
            };
            match self.marking {
                Marking::OpMetadata => {
                    let mut info = OpInfo {
                        kernel_library: library.into(),
                        ref_inputs: self.noise.clone(),
                        ref_outputs: self.noise.clone(),
                        ..Default::default()
                    };
                    if is_input {
                        info.ref_inputs.push("x".into());
                    } else {
                        info.ref_outputs.push("y".into());
                    }
                    ops.insert(op_type, info);
                }
                Marking::Descriptor => {
                    let idx = g.index_of(name).unwrap();
                    let node = g.node_mut(idx).unwrap();
                    if is_input {
                        node.inputs[0].is_ref = true;
                    } else {
                        node.outputs[0].is_ref = true;
                    }
                }
            }
        }
        (g, ops)
    }
}

#[proptest(cases = 64)]
fn ref_position_on_the_boundary_always_vetoes(prob: VetoProblem) {
    let (mut g, table) = prob.setup(Some(prob.end));
    let cfg = FusionConfig::default();
    let registry = ParserRegistry::new();
    let report = FusionPass::new(&cfg, &table, &registry).run(&mut g).unwrap();

    prop_assert!(report.fused.is_empty());
    prop_assert_eq!(report.vetoed.clone(), vec!["a".to_string(), "b".to_string()]);
    for name in ["a", "b"] {
        prop_assert!(report.isolated.iter().any(|n| n == name), "{} not isolated", name);
        prop_assert!(g.by_name(name).unwrap().node_def.is_some());
    }
    prop_assert!(g.node_indices().into_iter().all(|i| g.node(i).unwrap().op_type != FUNCTION_OP));
}

#[proptest(cases = 32)]
fn unmatched_ref_names_never_veto(prob: VetoProblem) {
    let (mut g, table) = prob.setup(None);
    let cfg = FusionConfig::default();
    let registry = ParserRegistry::new();
    let report = FusionPass::new(&cfg, &table, &registry).run(&mut g).unwrap();

    prop_assert!(report.vetoed.is_empty());
    prop_assert_eq!(report.fused.len(), 1);
    prop_assert_eq!(report.fused[0].merged_from.clone(), vec!["a".to_string(), "b".to_string()]);
}
