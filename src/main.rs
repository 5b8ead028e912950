// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! Repofleet CLI - fleet-wide repository health metrics

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use repofleet::config::Settings;

mod commands;

/// Exit code for a run that finished but is incomplete
const EXIT_PARTIAL: i32 = 3;

#[derive(Parser)]
#[command(name = "repofleet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    /// Data directory override
    #[arg(long, env = "REPOFLEET_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// GitLab instance URL override
    #[arg(long, env = "REPOFLEET_GITLAB_URL")]
    gitlab_url: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the fleet: collect facts, score, and detect issues
    Analyze {
        /// Re-collect everything, ignoring the snapshot cache
        #[arg(long)]
        full_refresh: bool,

        /// Restrict the run to these repositories (group/project)
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,

        /// Maximum concurrent collection tasks
        #[arg(long)]
        workers: Option<usize>,

        /// Environment variable holding the access token
        #[arg(long, default_value = "REPOFLEET_GITLAB_TOKEN")]
        token_env: String,
    },

    /// Inspect or clear the snapshot cache
    Cache {
        /// Action: info, path, clear
        #[arg(default_value = "info")]
        action: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 if cli.quiet => tracing::Level::ERROR,
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut settings = Settings::load()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = Some(dir);
    }
    if let Some(url) = cli.gitlab_url {
        settings.gitlab_url = url;
    }

    let code = match cli.command {
        Commands::Analyze {
            full_refresh,
            projects,
            output,
            workers,
            token_env,
        } => {
            if let Some(n) = workers {
                settings.concurrency = n;
            }
            if settings.gitlab_token.is_none() {
                settings.gitlab_token = std::env::var(&token_env).ok();
            }
            let options = commands::analyze::Options {
                full_refresh,
                projects,
                json: cli.json,
                quiet: cli.quiet,
                output,
            };
            commands::analyze::run(&settings, &options).await?
        }
        Commands::Cache { action } => {
            commands::cache::run(&settings, &action, cli.json)?;
            0
        }
        Commands::Completions { shell } => {
            commands::completions::run(shell, &mut Cli::command());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Exit code used by `analyze` when a run is cancelled or lossy
pub(crate) const fn partial_exit_code() -> i32 {
    EXIT_PARTIAL
}
