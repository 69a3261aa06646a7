//! remotefn worker entry point
//!
//! Installed in the execution image at `/golem/bin/remotefn-runner`. Reads a
//! callable blob and its argument blobs, runs the named built-in handler and
//! writes the JSON result for the caller to download.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use remotefn::runner::{self, REMOTE_OUTPUT_PATH};
use remotefn::builtins;

/// remotefn runner - executes one task on a worker
#[derive(Parser)]
#[command(name = "remotefn-runner")]
#[command(about = "Execute a staged remotefn callable", long_about = None)]
struct Cli {
    /// Where to write the JSON result
    #[arg(short, long, default_value = REMOTE_OUTPUT_PATH)]
    output: PathBuf,

    /// Maximum log level
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// List the handlers this runner can execute and exit
    #[arg(long)]
    list: bool,

    /// Path of the callable blob
    #[arg(required_unless_present = "list")]
    func: Option<PathBuf>,

    /// Paths of the argument blobs, in order
    args: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout is left to the task.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let registry = Arc::new(builtins::registry()?);

    if cli.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(func) = cli.func else {
        return Err("missing callable path".into());
    };

    info!(
        func = %func.display(),
        arg_count = cli.args.len(),
        output = %cli.output.display(),
        "Starting task"
    );

    match runner::execute(registry, &func, &cli.args, &cli.output).await {
        Ok(result) => {
            info!(result = %serde_json::to_string(&result)?, "Task finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Task failed");
            Err(e.into())
        }
    }
}
