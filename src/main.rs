use std::process::exit;

use clap::Parser;
use semantic_clusters::cli::{Cli, CommandOutput, GetVerbosity};
use semantic_clusters::io_utils::write_json_output;
use semantic_clusters::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::setup_logger(cli.cmd.get_verbosity());

    let output = match cli.cmd.run().await {
        Ok(Some(output)) => output,
        Ok(None) => return,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    if let Err(e) = write_json_output(cli.cmd.output(), &output).await {
        error!("Failed to write output: {e}");
        exit(1);
    }
    if let Some(path) = cli.cmd.output() {
        info!("Wrote result to {}", path.display());
    }
    if failed(&output) {
        exit(2);
    }
}

/// Structured failures still print their report, but exit non-zero.
fn failed(output: &CommandOutput) -> bool {
    match output {
        CommandOutput::Clusters(outcome) => !outcome.success,
        CommandOutput::Duplicates(report) => !report.success,
        CommandOutput::Edges(report) => !report.success,
        CommandOutput::Cluster(_) | CommandOutput::Stats(_) => false,
    }
}
