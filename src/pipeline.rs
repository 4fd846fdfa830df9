use crate::fusion::{FusionPass, FusionReport};
use crate::ir_graph::IRGraph;
use crate::lowering::ParserRegistry;
use crate::manifest::Manifest;
use anyhow::{Context, anyhow};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct FusionContext {
    pub manifest_path: PathBuf,
    pub out_dir: PathBuf,

    pub manifest: Option<Manifest>,
    pub registry: ParserRegistry,
    pub graphs: BTreeMap<String, IRGraph>,
    pub reports: Vec<FusionReport>,

    pub summary: Option<String>,
}

impl FusionContext {
    pub fn new(manifest_path: &str, out_dir: &str) -> Self {
        Self {
            manifest_path: PathBuf::from(manifest_path),
            out_dir: PathBuf::from(out_dir),
            manifest: None,
            registry: ParserRegistry::new(),
            graphs: BTreeMap::new(),
            reports: Vec::new(),
            summary: None,
        }
    }
}

pub trait Stage {
    fn name(&self) -> &str;
    fn run(&self, ctx: &mut FusionContext) -> anyhow::Result<()>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add_stage<S: Stage + 'static>(&mut self, stage: S) {
        self.stages.push(Box::new(stage));
    }

    pub fn execute(&self, ctx: &mut FusionContext) -> anyhow::Result<()> {
        for stage in &self.stages {
            log::info!("[Stage: {}]", stage.name());
            stage.run(ctx).with_context(|| format!("Stage '{}' failed", stage.name()))?;
        }
        Ok(())
    }
}

/// Fuses every loaded graph, one rayon task per graph.
pub struct FusionStage;

impl Stage for FusionStage {
    fn name(&self) -> &str { "Operator Fusion" }
    fn run(&self, ctx: &mut FusionContext) -> anyhow::Result<()> {
        let manifest = ctx.manifest.as_ref().ok_or_else(|| anyhow!("No manifest loaded"))?;
        let pass = FusionPass::new(&manifest.config, &manifest.ops, &ctx.registry);

        let (ids, mut graphs): (Vec<String>, Vec<IRGraph>) = std::mem::take(&mut ctx.graphs).into_iter().unzip();
        let results = pass.run_many(&mut graphs);

        let mut reports = Vec::with_capacity(results.len());
        for (id, result) in ids.iter().zip(results) {
            reports.push(result.with_context(|| format!("Fusion failed for graph '{}'", id))?);
        }
        ctx.graphs = ids.into_iter().zip(graphs).collect();
        ctx.reports = reports;
        Ok(())
    }
}
