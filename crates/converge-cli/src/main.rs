//! Converge CLI - Reconcile Kubernetes resources to a declared set of manifests

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;
mod util;

use commands::GlobalOptions;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Converge Contributors")]
#[command(version)]
#[command(about = "Converge Kubernetes resources to a declared set of manifests", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Reconciler configuration file (YAML)
    #[arg(long, global = true, env = "CONVERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Only cache namespaced resources from these namespaces
    #[arg(long, global = true, value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, update and delete resources until the cluster matches the manifests
    Apply {
        /// Manifest files or directories (`-` reads stdin)
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,

        /// Namespace for namespaced resources that do not name one
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Ownership labels (key=value)
        #[arg(short = 'l', long = "label", required = true)]
        labels: Vec<String>,
    },

    /// Show what apply would change, without writing
    Plan {
        /// Manifest files or directories (`-` reads stdin)
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,

        /// Namespace for namespaced resources that do not name one
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Ownership labels (key=value)
        #[arg(short = 'l', long = "label", required = true)]
        labels: Vec<String>,
    },

    /// Delete every resource carrying the ownership labels
    Purge {
        /// Ownership labels (key=value)
        #[arg(short = 'l', long = "label", required = true)]
        labels: Vec<String>,

        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// List cached resources
    List {
        /// Only show resources matching these labels (key=value)
        #[arg(short = 'l', long = "label")]
        labels: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print manifests in install order without contacting a cluster
    Order {
        /// Manifest files or directories (`-` reads stdin)
        #[arg(short = 'f', long = "filename", required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping after in-flight operations");
                cancel.cancel();
            }
        });
    }

    let global = GlobalOptions {
        config: cli.config,
        namespaces: cli.namespaces,
    };

    let result = match cli.command {
        Commands::Apply {
            files,
            namespace,
            labels,
        } => commands::apply::run(&global, &cancel, &files, &namespace, &labels).await,

        Commands::Plan {
            files,
            namespace,
            labels,
        } => commands::plan::run(&global, &files, &namespace, &labels).await,

        Commands::Purge { labels, dry_run } => {
            commands::purge::run(&global, &cancel, &labels, dry_run).await
        }

        Commands::List { labels, json } => commands::list::run(&global, &labels, json).await,

        Commands::Order { files } => commands::order::run(&files),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
    std::process::exit(exit_codes::SUCCESS);
}
