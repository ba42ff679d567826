//! CLI argument parsing.
//!
//! Backends and credentials come from the environment (see `config`); the
//! flags only carry per-run inputs.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default pytest file name for `pipeline` runs.
pub const DEFAULT_TEST_FILE: &str = "test_generated.py";

#[derive(Parser, Debug)]
#[command(
    name = "medreq",
    version,
    about = "Medical-device requirement normalization and test generation",
    after_help = "Commands:\n  serve                               Run the HTTP server\n  normalize --req <text>              Normalize one requirement and print the record\n  pipeline --req <text> --file <name> Generate, store, and run a pytest file\n  upload --dir <dir>                  Mirror a local directory into the bucket\n\nExamples:\n  medreq serve\n  medreq normalize --req \"The pump shall deliver basal 0.5 U/hr ±5%\"\n  APP_URL=http://localhost:8080 medreq pipeline --req \"REQ-006 low glucose alarm\" --file test_req_006.py",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Serve(ServeArgs),
    Normalize(NormalizeArgs),
    Pipeline(PipelineArgs),
    Upload(UploadArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Run the HTTP server")]
pub struct ServeArgs {
    /// Listen port (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Worker threads (overrides MEDREQ_WORKERS)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
}

#[derive(Parser, Debug)]
#[command(about = "Normalize one requirement and print the record as JSON")]
pub struct NormalizeArgs {
    /// Free-form requirement text
    #[arg(long, value_name = "TEXT")]
    pub req: String,

    /// Skip warehouse inserts
    #[arg(long)]
    pub no_warehouse: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Generate a pytest file, store it, run it remotely, and record the run")]
pub struct PipelineArgs {
    /// Requirement text the test is generated from
    #[arg(long, value_name = "TEXT")]
    pub req: String,

    /// File name under outputs/testcases/
    #[arg(long, value_name = "NAME", default_value = DEFAULT_TEST_FILE)]
    pub file: String,
}

#[derive(Parser, Debug)]
#[command(about = "Upload every file under a directory, keeping relative paths")]
pub struct UploadArgs {
    /// Local directory to mirror
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Object prefix the relative paths land under
    #[arg(long, default_value = "uploads")]
    pub prefix: String,

    /// Target bucket (defaults to ASSETS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,
}
