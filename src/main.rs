use fusion_lower::manifest::LoadStage;
use fusion_lower::pipeline::{FusionContext, FusionStage, Pipeline};
use fusion_lower::report::ReportStage;
use std::env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let manifest_path = args.get(1).map(String::as_str).unwrap_or("assets/manifest.json");
    let out_dir = args.get(2).map(String::as_str).unwrap_or("out");

    let mut ctx = FusionContext::new(manifest_path, out_dir);
    let mut pipeline = Pipeline::new();
    pipeline.add_stage(LoadStage);
    pipeline.add_stage(FusionStage);
    pipeline.add_stage(ReportStage);
    pipeline.execute(&mut ctx)?;

    if let Some(summary) = &ctx.summary {
        println!("{}", summary);
    }
    Ok(())
}
