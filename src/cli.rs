use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use semantic_clusters_dirs::{DirType, default_snapshot_path};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::AppResult;
use crate::config::{BridgeOptions, ClusterConfig, KSelection};
use crate::duplicates::{DuplicateOptions, DuplicateReport};
use crate::engine::{ClusterService, ClusterStats, ComputeOutcome, GraphCluster};
use crate::graph::{DEFAULT_EDGE_THRESHOLD, EdgeReport};
use crate::label::{OpenAiTextGenerator, ServerAddress, TextGenerator};
use crate::store::{SnapshotStore, VectorStore};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Semantic Clusters - Group embedded files by meaning

Reads an embedding export ({ids, embeddings, metadatas}) and:
- clusters the files with k-means and names each cluster
- finds groups of near-duplicate files
- links related clusters through their most similar members

Cluster names come from a language model server (like \x1b]8;;https://lmstudio.ai/\x1b\\\x1b[4;36mLM Studio\x1b[24;39m\x1b]8;;\x1b\\) when one is reachable, and from file metadata otherwise.";

/// Semantic Clusters - Group embedded files by meaning.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Cluster the stored files and print every cluster with its members
    Clusters {
        #[command(flatten)]
        compute: ComputeArgs,
        #[command(flatten)]
        default: DefaultArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Find groups of near-duplicate files
    Duplicates {
        /// Minimum cosine similarity for two files to count as duplicates
        ///
        /// Values below 0.7 are raised to 0.7
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,

        /// Maximum number of groups to report
        #[arg(long, default_value_t = 50)]
        max_results: usize,

        #[command(flatten)]
        default: DefaultArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Cluster the stored files, then list edges between related clusters
    Edges {
        /// Minimum centroid similarity for an edge
        #[arg(short, long, default_value_t = DEFAULT_EDGE_THRESHOLD)]
        threshold: f64,

        #[command(flatten)]
        bridges: BridgeArgs,
        #[command(flatten)]
        compute: ComputeArgs,
        #[command(flatten)]
        default: DefaultArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Cluster the stored files and show which cluster holds a file
    Find {
        /// Id of the file in the vector store
        item_id: String,

        #[command(flatten)]
        compute: ComputeArgs,
        #[command(flatten)]
        default: DefaultArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Cluster the stored files and print run statistics
    Stats {
        #[command(flatten)]
        compute: ComputeArgs,
        #[command(flatten)]
        default: DefaultArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Options for a clustering pass.
#[derive(Args, Debug, Clone)]
pub struct ComputeArgs {
    /// Number of clusters, or `auto` to derive it from the item count
    #[arg(short = 'k', long = "clusters", default_value = "auto")]
    pub k: KSelection,

    /// Seed for centroid initialization, for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Name clusters from metadata only, without calling the language model
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub skip_llm: bool,

    /// Model used to name clusters
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum concurrent labeling requests
    #[arg(long)]
    pub label_concurrency: Option<usize>,

    /// Per-cluster labeling timeout (e.g. `30s`, `1m`)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub label_timeout: Option<std::time::Duration>,

    /// Whether to use secure connection (HTTPS) to the language model server
    /// Defaults to false for local servers (i.e. `localhost` and private subnets)
    /// Defaults to true for public IP addresses and hostnames
    /// Note: This is not a flag. You must provide a value (true or false) if you use this option.
    #[arg(long)]
    pub secure: Option<bool>,

    /// Host for the language model server
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port for the language model server
    #[arg(long, default_value_t = 1234)]
    pub port: u16,

    /// OpenAI API version for the language model server
    ///
    /// Defaults to "v1" (the standard OpenAI API version)
    #[arg(long, default_value = "v1")]
    pub api_version: String,
}

/// Limits for bridge files on cross-cluster edges.
#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    /// Bridge files reported per side of an edge
    #[arg(long)]
    pub max_bridge_files: Option<usize>,

    /// Minimum similarity of a bridge file to the other cluster's centroid
    ///
    /// Defaults to max(0.5, threshold - 0.1)
    #[arg(long)]
    pub min_bridge_similarity: Option<f64>,

    /// Report bridge files even when their path no longer exists
    #[arg(long = "no-check-files", default_value_t = true, action = ArgAction::SetFalse)]
    pub check_files: bool,
}

/// Common options shared across commands.
#[derive(Args, Debug, Clone)]
pub struct DefaultArgs {
    /// Embedding export to read
    ///
    /// Defaults to embeddings.json in the data directory
    /// (~/.local/share/semantic-clusters/embeddings.json)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    /// JSON configuration file
    ///
    /// Defaults to config.json in the config directory, when present
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of embeddings to fetch from the store
    #[arg(long)]
    pub fetch_limit: Option<usize>,

    /// Age after which computed clusters count as stale (e.g. `30m`, `1h`)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<std::time::Duration>,

    /// Output file to write the result to
    /// If not provided, prints to stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Whatever a command produced, ready to be written as JSON.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Clusters(ComputeOutcome),
    Duplicates(DuplicateReport),
    Edges(EdgeReport),
    Cluster(Option<GraphCluster>),
    Stats(ClusterStats),
}

/// Host names and addresses that are served over plain HTTP by default.
fn is_private_host(host: &str) -> bool {
    const PRIVATE_SUFFIXES: &[&str] = &[
        ".local",
        ".internal",
        ".lan",
        ".corp",
        ".home.arpa",
        ".private",
        ".test",
    ];
    host == "localhost"
        || PRIVATE_SUFFIXES.iter().any(|s| host.ends_with(s))
        || host
            .parse::<std::net::Ipv4Addr>()
            .is_ok_and(|ip| ip.is_loopback() || ip.is_private() || ip.is_link_local())
        || host.parse::<std::net::Ipv6Addr>().is_ok_and(|ip| {
            ip.is_loopback() || ip.is_unique_local() || ip.is_unicast_link_local()
        })
}

impl ComputeArgs {
    pub fn server_address(&self) -> ServerAddress {
        ServerAddress {
            host: self.host.clone(),
            port: self.port,
            api_version: self.api_version.clone(),
            secure: self.secure.unwrap_or_else(|| !is_private_host(&self.host)),
        }
    }

    fn apply(&self, config: &mut ClusterConfig) {
        if self.seed.is_some() {
            config.kmeans.seed = self.seed;
        }
        if self.skip_llm {
            config.labels.skip_llm = true;
        }
        if let Some(model) = &self.model {
            config.labels.model = model.clone();
        }
        if let Some(concurrency) = self.label_concurrency {
            config.labels.concurrency = concurrency.max(1);
        }
        if let Some(timeout) = self.label_timeout {
            config.labels.timeout = timeout;
        }
    }

    fn text_generator(&self, config: &ClusterConfig) -> Option<Arc<dyn TextGenerator>> {
        if config.labels.skip_llm {
            return None;
        }
        let address = self.server_address();
        debug!("Labeling clusters with {} at {}", config.labels.model, address.api_base());
        let generator = OpenAiTextGenerator::connect(&address, config.labels.timeout);
        Some(Arc::new(generator) as Arc<dyn TextGenerator>)
    }
}

impl BridgeArgs {
    fn options(&self, config: &ClusterConfig) -> BridgeOptions {
        let mut options = config.bridges.clone();
        if let Some(max) = self.max_bridge_files {
            options.max_bridge_files_per_cluster = max;
        }
        if self.min_bridge_similarity.is_some() {
            options.min_bridge_similarity = self.min_bridge_similarity;
        }
        if !self.check_files {
            options.check_files = false;
        }
        options
    }
}

/// Read a JSON config, reporting the path of the first bad field.
#[tracing::instrument(name = "Loading configuration", level = "debug")]
pub async fn load_config<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<ClusterConfig> {
    let raw = tokio::fs::read_to_string(path.as_ref()).await?;
    let jd = &mut serde_json::Deserializer::from_str(&raw);
    match serde_path_to_error::deserialize::<_, ClusterConfig>(jd) {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to parse configuration at path: {}", e.path());
            Err(e.into_inner().into())
        }
    }
}

impl DefaultArgs {
    async fn config(&self) -> AppResult<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path).await?,
            None => {
                let default_path = DirType::Config.file("config.json")?;
                if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
                    load_config(&default_path).await?
                } else {
                    ClusterConfig::default()
                }
            }
        };
        if let Some(limit) = self.fetch_limit {
            config.fetch_limit = limit;
        }
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        Ok(config)
    }

    async fn vector_store(&self) -> AppResult<Arc<dyn VectorStore>> {
        let path = match &self.store {
            Some(path) => path.clone(),
            None => default_snapshot_path()?,
        };
        let store = SnapshotStore::from_path(path).await?;
        Ok(Arc::new(store) as Arc<dyn VectorStore>)
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Clusters { verbosity, .. }
            | Cmd::Duplicates { verbosity, .. }
            | Cmd::Edges { verbosity, .. }
            | Cmd::Find { verbosity, .. }
            | Cmd::Stats { verbosity, .. }
            | Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl Cmd {
    /// Where the command's JSON result should go; `None` means stdout.
    pub fn output(&self) -> Option<&Path> {
        match self {
            Cmd::Clusters { default, .. }
            | Cmd::Duplicates { default, .. }
            | Cmd::Edges { default, .. }
            | Cmd::Find { default, .. }
            | Cmd::Stats { default, .. } => default.output.as_deref(),
            Cmd::Completion { .. } => None,
        }
    }

    /// Execute the chosen top-level command.
    ///
    /// Returns `None` for commands that write their own output.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<Option<CommandOutput>> {
        match self {
            Cmd::Clusters {
                compute, default, ..
            } => {
                let (service, outcome) = compute_once(compute, default).await?;
                service.shutdown();
                Ok(Some(CommandOutput::Clusters(outcome)))
            }
            Cmd::Duplicates {
                threshold,
                max_results,
                default,
                ..
            } => {
                let config = default.config().await?;
                let service = ClusterService::new(default.vector_store().await?, None, config);
                let options = DuplicateOptions {
                    threshold: *threshold,
                    max_results: *max_results,
                };
                Ok(Some(CommandOutput::Duplicates(
                    service.find_near_duplicates(&options).await,
                )))
            }
            Cmd::Edges {
                threshold,
                bridges,
                compute,
                default,
                ..
            } => {
                let (service, _) = compute_once(compute, default).await?;
                let options = bridges.options(service.config());
                let report = service
                    .find_cross_cluster_edges(*threshold, Some(options))
                    .await;
                info!("Found {} cross-cluster edges", report.edges.len());
                Ok(Some(CommandOutput::Edges(report)))
            }
            Cmd::Find {
                item_id,
                compute,
                default,
                ..
            } => {
                let (service, _) = compute_once(compute, default).await?;
                let cluster = service.find_cluster_for_item(item_id);
                if cluster.is_none() {
                    info!("{item_id} is not in any cluster");
                }
                Ok(Some(CommandOutput::Cluster(cluster)))
            }
            Cmd::Stats {
                compute, default, ..
            } => {
                let (service, _) = compute_once(compute, default).await?;
                Ok(Some(CommandOutput::Stats(service.cluster_stats())))
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    generate(shell, &mut cmd, "semantic-clusters", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    generate(shell, &mut cmd, "semantic-clusters", &mut std::io::stdout());
                }
                Ok(None)
            }
        }
    }
}

/// Build a service from the CLI options and run one clustering pass.
async fn compute_once(
    compute: &ComputeArgs,
    default: &DefaultArgs,
) -> AppResult<(ClusterService, ComputeOutcome)> {
    let mut config = default.config().await?;
    compute.apply(&mut config);
    let generator = compute.text_generator(&config);
    let service = ClusterService::new(default.vector_store().await?, generator, config);
    let outcome = service.compute_clusters(compute.k).await;
    if let Some(e) = &outcome.error {
        error!("Clustering failed: {e}");
    }
    Ok((service, outcome))
}
