use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;

mod cli;
mod config;
mod extract;
mod http;
mod lm;
mod model;
mod normalize;
mod pipeline;
mod prompts;
mod router;
mod server;
mod services;
mod storage;
mod util;
mod warehouse;

use cli::{Command, NormalizeArgs, PipelineArgs, RootArgs, ServeArgs, UploadArgs};
use config::Config;
use normalize::RequirementNormalizer;
use pipeline::{HttpToolHost, PipelineDriver, PipelineState};
use services::Services;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing();
    let config = Config::from_env()?;

    match args.command {
        Command::Serve(args) => cmd_serve(config, args),
        Command::Normalize(args) => cmd_normalize(&config, args),
        Command::Pipeline(args) => cmd_pipeline(&config, args),
        Command::Upload(args) => cmd_upload(&config, args),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(workers) = args.workers {
        config.workers = usize::from(workers);
    }
    let services = Services::from_config(&config)?;
    server::serve(&config, services)
}

fn cmd_normalize(config: &Config, args: NormalizeArgs) -> Result<()> {
    let services = Services::from_config(config)?;
    let mut normalizer = RequirementNormalizer::new(services.generator.as_ref());
    if !args.no_warehouse {
        normalizer = normalizer.with_warehouse(services.warehouse.as_ref());
    }
    let record = normalizer.run(&args.req);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_pipeline(config: &Config, args: PipelineArgs) -> Result<()> {
    let app_url = config
        .app_url
        .as_deref()
        .ok_or_else(|| anyhow!("APP_URL must be set for pipeline runs"))?;
    let bucket = config
        .bucket
        .as_deref()
        .ok_or_else(|| anyhow!("ASSETS_BUCKET or BUCKET_NAME must be set for pipeline runs"))?;
    let services = Services::from_config(config)?;
    let tools = HttpToolHost::new(app_url);
    let driver = PipelineDriver::new(services.generator.as_ref(), &tools, bucket);

    let mut state = PipelineState::new(args.req, args.file);
    let result = driver.run(&mut state);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "gs_uri": state.gs_uri,
            "run_id": state.run_id,
            "summary": state.summary,
        }))?
    );
    result
}

fn cmd_upload(config: &Config, args: UploadArgs) -> Result<()> {
    if !args.dir.is_dir() {
        return Err(anyhow!("not a directory: {}", args.dir.display()));
    }
    let services = Services::from_config(config)?;
    let bucket = args.bucket.unwrap_or_else(|| services.bucket.clone());
    let uploaded =
        storage::upload_directory(services.store.as_ref(), &args.dir, &bucket, &args.prefix)?;
    println!("{}", serde_json::to_string_pretty(&json!({ "uploaded": uploaded }))?);
    Ok(())
}
