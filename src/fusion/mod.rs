//! The fusion pass: classify, cluster, extract, serialize, rewire, delete.
//!
//! One scan over the topological order builds a pass-local cluster map.
//! Clusters are then sealed one at a time. Every step before the call-site
//! node is added only reads the graph; a failed rewire validation removes the
//! call-site node again, so a failing cluster leaves the graph as it was.

pub mod classifier;
pub mod extract;
pub mod regroup;
pub mod rewire;
pub mod safety;

use crate::config::FusionConfig;
use crate::error::FusionError;
use crate::ir_graph::IRGraph;
use crate::lowering::ParserRegistry;
use crate::lowering::isolated::lower_isolated;
use crate::metadata::OpMetadataProvider;
use crate::serializer::{FunctionLibrary, FunctionSerializer, function_name};
use classifier::{Classification, ClusterClassifier};
use extract::SubgraphExtractor;
use petgraph::stable_graph::NodeIndex;
use rayon::prelude::*;
use safety::{SafetyChecker, ShapeChecker};
use serde::Serialize;

/// A run of nodes waiting to be sealed, in topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCluster {
    pub members: Vec<NodeIndex>,
    /// Debug clusters are single-node and exempt from the size threshold.
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    Accumulating,
    Sealing,
    Discarding,
    Done,
}

#[derive(Debug, Default)]
struct ScanOutcome {
    clusters: Vec<PendingCluster>,
    isolated: Vec<NodeIndex>,
    skipped: Vec<NodeIndex>,
}

struct Scanner<'c, 'a> {
    classifier: &'c mut ClusterClassifier<'a>,
    min_size: usize,
    state: ScanState,
    run: Vec<NodeIndex>,
    outcome: ScanOutcome,
}

impl<'c, 'a> Scanner<'c, 'a> {
    fn new(classifier: &'c mut ClusterClassifier<'a>, min_size: usize) -> Self {
        Self { classifier, min_size, state: ScanState::Scanning, run: Vec::new(), outcome: ScanOutcome::default() }
    }

    fn scan(mut self, graph: &IRGraph, order: &[NodeIndex]) -> Result<ScanOutcome, FusionError> {
        for &idx in order {
            let node = graph.node(idx)?;
            match self.classifier.classify(node)? {
                Classification::Skip => {
                    self.close_run();
                    self.outcome.skipped.push(idx);
                }
                Classification::Isolated => {
                    self.close_run();
                    self.outcome.isolated.push(idx);
                }
                Classification::Fusible => {
                    if self.classifier.is_debug_forced(node)? {
                        self.close_run();
                        log::debug!("debug cluster sealed at '{}'", node.name);
                        self.outcome.clusters.push(PendingCluster { members: vec![idx], debug: true });
                    } else {
                        self.state = ScanState::Accumulating;
                        self.run.push(idx);
                    }
                }
            }
        }
        self.close_run();
        self.state = ScanState::Done;
        Ok(self.outcome)
    }

    fn close_run(&mut self) {
        if self.state != ScanState::Accumulating {
            return;
        }
        self.state = if self.run.len() >= self.min_size { ScanState::Sealing } else { ScanState::Discarding };
        let run = std::mem::take(&mut self.run);
        match self.state {
            ScanState::Sealing => self.outcome.clusters.push(PendingCluster { members: run, debug: false }),
            _ => {
                log::debug!("discarding run of {} node(s) below threshold {}", run.len(), self.min_size);
                self.outcome.isolated.extend(run);
            }
        }
        self.state = ScanState::Scanning;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FusedSummary {
    pub call_site: String,
    pub func_name: String,
    pub merged_from: Vec<String>,
    pub inputs: usize,
    pub outputs: usize,
    pub function_bytes: usize,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionReport {
    pub graph: String,
    pub fused: Vec<FusedSummary>,
    pub isolated: Vec<String>,
    pub skipped: Vec<String>,
    /// Members of clusters rejected by the ref-position check.
    pub vetoed: Vec<String>,
    pub shape_vetoed: bool,
}

pub struct FusionPass<'a> {
    config: &'a FusionConfig,
    metadata: &'a dyn OpMetadataProvider,
    registry: &'a ParserRegistry,
}

impl<'a> FusionPass<'a> {
    pub fn new(config: &'a FusionConfig, metadata: &'a dyn OpMetadataProvider, registry: &'a ParserRegistry) -> Self {
        Self { config, metadata, registry }
    }

    pub fn run(&self, graph: &mut IRGraph) -> Result<FusionReport, FusionError> {
        let mut report = FusionReport { graph: graph.name.clone(), ..Default::default() };
        let order = graph.topo_order()?;
        let min_size = self.config.effective_min_size();

        let mut classifier = ClusterClassifier::new(self.config, self.metadata);
        let ScanOutcome { mut clusters, mut isolated, skipped } =
            Scanner::new(&mut classifier, min_size).scan(graph, &order)?;

        if let Some(regroup) = &self.config.regroup {
            clusters = regroup::rebuild_cluster_map(graph, clusters, regroup, min_size)?;
        }

        if self.config.shape_check && !clusters.is_empty() {
            let pending: Vec<NodeIndex> = clusters.iter().flat_map(|c| c.members.iter().copied()).collect();
            if !ShapeChecker::new(&self.config.non_mergeable_ops).check_accumulation(graph, &pending)? {
                log::warn!("graph '{}': shape check failed, {} pending node(s) stay isolated", graph.name, pending.len());
                isolated.extend(pending);
                clusters.clear();
                report.shape_vetoed = true;
            }
        }

        let safety = SafetyChecker::new(self.metadata);
        let serializer = FunctionSerializer::new(self.registry, self.config.max_descriptor_bytes);
        let mut seq = 0usize;
        for cluster in clusters {
            let debug = cluster.debug;
            let mut members = cluster.members;
            let mut info = SubgraphExtractor::extract(graph, &members)?;
            rewire::link_internal(&mut info)?;

            if !safety.check_cluster_safe(graph, &info, &mut members, &mut isolated)? {
                log::warn!("cluster at '{}' crosses a ref position, falling back to isolated", info.label());
                report.vetoed.extend(info.member_names.iter().cloned());
                continue;
            }

            let collected = serializer.collect_functions(graph, &info.members)?;
            let call_site_name = unique_name(graph, &collected.library, info.label(), &mut seq);
            let unit = serializer
                .build_function_descriptor(&call_site_name, &info, &collected)
                .map_err(|source| FusionError::Serialize { cluster: call_site_name.clone(), source })?;

            let summary = FusedSummary {
                call_site: unit.call_site_name.clone(),
                func_name: unit.func_name.clone(),
                merged_from: unit.merged_from.clone(),
                inputs: unit.inputs.len(),
                outputs: unit.outputs.len(),
                function_bytes: unit.function_bytes.len(),
                debug,
            };

            let call_site = graph.add_node(unit.into_node())?;
            if let Err(err) = rewire::rewire(graph, &info, call_site) {
                graph.remove_node(call_site)?;
                return Err(err);
            }
            for &member in &info.members {
                graph.remove_node(member)?;
            }
            log::debug!("sealed '{}' from {:?}", summary.call_site, summary.merged_from);
            report.fused.push(summary);
        }

        for idx in isolated {
            lower_isolated(graph, idx, self.registry)?;
            report.isolated.push(graph.node(idx)?.name.clone());
        }
        for idx in skipped {
            report.skipped.push(graph.node(idx)?.name.clone());
        }

        log::info!(
            "graph '{}': {} fused unit(s), {} isolated, {} skipped",
            report.graph,
            report.fused.len(),
            report.isolated.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Runs the pass over independent graphs in parallel.
    pub fn run_many(&self, graphs: &mut [IRGraph]) -> Vec<Result<FusionReport, FusionError>> {
        graphs.par_iter_mut().map(|graph| self.run(graph)).collect()
    }
}

/// First free `<first>_fused_<n>` whose node name and function name are both unused.
fn unique_name(graph: &IRGraph, library: &FunctionLibrary, first: &str, seq: &mut usize) -> String {
    loop {
        let name = format!("{}_fused_{}", first, *seq);
        *seq += 1;
        if graph.by_name(&name).is_none() && !library.contains(&function_name(&name)) {
            return name;
        }
    }
}
