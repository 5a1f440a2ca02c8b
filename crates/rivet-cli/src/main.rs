//! rivet - dependency graph resolution CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rivet_cli::cmd::{self, common::Globals};
use rivet_cli::{Cli, Commands, GraphCommands, LockCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v; the default keeps engine warnings visible
    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let globals = Globals {
        config: cli.config,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Install {
            graph,
            build,
            lockfile_out,
            format,
        } => cmd::install::install(&globals, &graph, &build, lockfile_out.as_deref(), format).await,
        Commands::Create { path, build } => cmd::create::create(&globals, &path, &build).await,
        Commands::Graph { command } => match command {
            GraphCommands::Info {
                graph,
                build,
                format,
            } => cmd::graph::info(&globals, &graph, &build, format),
            GraphCommands::BuildOrder { graph, build, flat } => {
                cmd::graph::build_order(&globals, &graph, &build, flat)
            }
            GraphCommands::BuildOrderMerge { files } => cmd::graph::build_order_merge(&files),
        },
        Commands::Lock { command } => match command {
            LockCommands::Create {
                graph,
                lockfile_out,
                clean,
            } => cmd::lock::create(&globals, &graph, &lockfile_out, clean),
            LockCommands::Merge { files, out } => cmd::lock::merge(&files, &out),
            LockCommands::Add {
                requires,
                build_requires,
                lockfile,
            } => cmd::lock::add(&requires, &build_requires, &lockfile),
        },
        Commands::Export { path, remote } => cmd::export::export(&globals, &path, remote.as_deref()),
        Commands::List {
            pattern,
            remote,
            all_remotes,
            format,
        } => cmd::list::list(&globals, &pattern, remote.as_deref(), all_remotes, format),
    }
}
