pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "drivecast", version)]
#[command(about = "Publish a directory or a record stream to a replicated drive")]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// TOML config file; command line flags take precedence over it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for log files (logs to stderr only if not set)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
