use crate::core::op::is_function_op;
use crate::fusion::FusionReport;
use crate::ir_graph::IRGraph;
use crate::pipeline::{FusionContext, Stage};
use serde::Serialize;
use std::fs;
use tera::{Context, Tera};

#[derive(Serialize)]
struct DotNode {
    name: String,
    op: String,
    fused: bool,
}

#[derive(Serialize)]
struct DotEdge {
    src: String,
    dst: String,
    src_out: usize,
    dst_in: usize,
    control: bool,
}

/// Quoted-string body for DOT: backslashes and quotes escaped.
fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

pub struct ReportRenderer {
    tera: Tera,
}

impl ReportRenderer {
    pub fn new() -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("fusion_report", include_str!("../templates/fusion_report.tera"))?;
        tera.add_raw_template("graph_dot", include_str!("../templates/graph.dot.tera"))?;
        Ok(Self { tera })
    }

    pub fn render_report(&self, reports: &[FusionReport]) -> anyhow::Result<String> {
        let mut context = Context::new();
        context.insert("reports", reports);
        Ok(self.tera.render("fusion_report", &context)?)
    }

    pub fn render_dot(&self, graph: &IRGraph) -> anyhow::Result<String> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for idx in graph.node_indices() {
            let node = graph.node(idx)?;
            let name = dot_escape(&node.name);
            nodes.push(DotNode { name: name.clone(), op: dot_escape(&node.op_type), fused: is_function_op(&node.op_type) });
            for e in graph.out_data_edges(idx) {
                edges.push(DotEdge {
                    src: name.clone(),
                    dst: dot_escape(&graph.node(e.dst)?.name),
                    src_out: e.src_out,
                    dst_in: e.dst_in,
                    control: false,
                });
            }
            for dst in graph.out_control(idx) {
                edges.push(DotEdge {
                    src: name.clone(),
                    dst: dot_escape(&graph.node(dst)?.name),
                    src_out: 0,
                    dst_in: 0,
                    control: true,
                });
            }
        }

        let mut context = Context::new();
        context.insert("name", &dot_escape(&graph.name));
        context.insert("nodes", &nodes);
        context.insert("edges", &edges);
        Ok(self.tera.render("graph_dot", &context)?)
    }
}

/// Writes the text summary and one DOT file per graph into the output directory.
pub struct ReportStage;

impl Stage for ReportStage {
    fn name(&self) -> &str { "Report" }
    fn run(&self, ctx: &mut FusionContext) -> anyhow::Result<()> {
        let renderer = ReportRenderer::new()?;
        fs::create_dir_all(&ctx.out_dir)?;

        let summary = renderer.render_report(&ctx.reports)?;
        fs::write(ctx.out_dir.join("fusion_report.txt"), &summary)?;
        for (id, graph) in &ctx.graphs {
            fs::write(ctx.out_dir.join(format!("{}.dot", id)), renderer.render_dot(graph)?)?;
        }

        ctx.summary = Some(summary);
        Ok(())
    }
}
