use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meshgate_core::ResourceDocument;
use meshgate_egress::{matcher_with_defaults, EgressGateway, MeshConfig};
use meshgate_kubehub::KubeClient;
use meshgate_objectmatch::{build_merge_patch, DefaultsTable};
use meshgate_reconcile::Outcome;

#[derive(Parser, Debug)]
#[command(name = "meshgatectl", version, about = "meshgate: compare and reconcile mesh gateway resources")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Extra server-default rules (YAML list of {kind, path, value})
    #[arg(long = "defaults", global = true, env = "MESHGATE_DEFAULTS")]
    defaults: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare a live object against a desired one (offline)
    Match {
        /// Live object as YAML or JSON
        #[arg(long = "live")]
        live: PathBuf,
        /// Desired object as YAML or JSON
        #[arg(long = "desired")]
        desired: PathBuf,
    },
    /// Show what reconcile would do for the egress component, without writing
    Plan {
        /// Mesh config YAML
        #[arg(long = "config", env = "MESHGATE_CONFIG")]
        config: PathBuf,
    },
    /// Reconcile the egress component against the current cluster
    Reconcile {
        /// Mesh config YAML
        #[arg(long = "config", env = "MESHGATE_CONFIG")]
        config: PathBuf,
    },
}

/// Diagnostics go to stderr; stdout carries command output. `MESHGATE_LOG`
/// takes `EnvFilter` directives.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MESHGATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Serve Prometheus metrics when `MESHGATE_METRICS_ADDR` is set. A bad
/// address only disables metrics.
fn init_metrics() {
    let Ok(raw) = std::env::var("MESHGATE_METRICS_ADDR") else { return };
    let installed = raw
        .parse::<SocketAddr>()
        .context("MESHGATE_METRICS_ADDR must be host:port")
        .and_then(|addr| PrometheusBuilder::new().with_http_listener(addr).install().context("installing exporter"));
    match installed {
        Ok(()) => info!(addr = %raw, "serving metrics"),
        Err(e) => warn!(error = %format!("{:#}", e), "metrics disabled"),
    }
}

fn load_defaults(path: Option<&Path>) -> Result<DefaultsTable> {
    match path {
        Some(p) => {
            let yaml = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            DefaultsTable::from_yaml(&yaml).with_context(|| format!("loading defaults {}", p.display()))
        }
        None => Ok(DefaultsTable::new()),
    }
}

fn load_document(path: &Path) -> Result<ResourceDocument> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    // YAML is a superset of JSON, so one parser covers both
    ResourceDocument::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_outcomes(output: Output, outcomes: &[Outcome]) -> Result<()> {
    match output {
        Output::Human => {
            println!("{:<10} {:<7} {:<52} {}", "ACTION", "STATE", "RESOURCE", "DIFFS");
            for o in outcomes {
                let diffs = o.diff_paths.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ");
                let resource = format!("{} {}", o.kind.kind, o.key);
                println!("{:<10} {:<7} {:<52} {}", o.action, o.state, resource, if diffs.is_empty() { "-" } else { diffs.as_str() });
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(outcomes)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let defaults = load_defaults(cli.defaults.as_deref())?;

    match cli.command {
        Commands::Match { live, desired } => {
            info!(live = %live.display(), desired = %desired.display(), "match invoked");
            let live = load_document(&live)?;
            let desired = load_document(&desired)?;
            let verdict = matcher_with_defaults(defaults).match_documents(&live, &desired)?;
            match cli.output {
                Output::Human => {
                    if verdict.is_equal() {
                        println!("equal");
                    } else {
                        println!("differs at {} path(s):", verdict.diff_paths().len());
                        for p in verdict.diff_paths() {
                            println!("  {}", p);
                        }
                    }
                }
                Output::Json => {
                    let patch = (!verdict.is_equal()).then(|| build_merge_patch(&live, &desired, &verdict));
                    let out = serde_json::json!({ "verdict": verdict, "patch": patch });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Plan { config } => {
            info!(config = %config.display(), "plan invoked");
            let cfg = MeshConfig::load(&config)?;
            let component = EgressGateway::with_defaults(KubeClient::try_default().await?, defaults);
            match component.plan(&cfg).await {
                Ok(outcomes) => print_outcomes(cli.output, &outcomes)?,
                Err(e) => {
                    error!(error = ?e, "plan failed");
                    return Err(e);
                }
            }
        }
        Commands::Reconcile { config } => {
            info!(config = %config.display(), "reconcile invoked");
            let cfg = MeshConfig::load(&config)?;
            let component = EgressGateway::with_defaults(KubeClient::try_default().await?, defaults);
            match component.reconcile(&cfg).await {
                Ok(outcomes) => print_outcomes(cli.output, &outcomes)?,
                Err(e) => {
                    error!(error = ?e, "reconcile failed");
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}
