use copilot_bridge::cli::{self, TurnOptions};
use copilot_bridge::config::Settings;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "copilot-bridge",
    version,
    about = "Drive the GitHub Copilot CLI with session continuity"
)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show reasoning and tool activity on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct TurnArgs {
    /// Working directory for the assistant (defaults to the current directory)
    #[arg(short = 'C', long)]
    dir: Option<PathBuf>,
    /// Model override
    #[arg(short, long)]
    model: Option<String>,
    /// Skip the SDK and run the Copilot CLI directly
    #[arg(long)]
    cli: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single prompt and print the answer
    Run {
        /// Prompt to send
        prompt: String,
        /// Continue the most recent session for the directory
        #[arg(short = 'c', long = "continue")]
        continue_session: bool,
        /// Resume a specific session id
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// Interactive chat in one directory
    Chat {
        #[command(flatten)]
        turn: TurnArgs,
    },
    /// List known Copilot models
    Models,
    /// Show the Copilot CLI session recorded for a directory
    Session {
        /// Directory to look up (defaults to the current directory)
        #[arg(short = 'C', long)]
        dir: Option<PathBuf>,
        /// List every recorded session instead
        #[arg(long)]
        all: bool,
    },
}

fn resolve_dir(dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match dir {
        Some(d) => Ok(d),
        None => std::env::current_dir().context("failed to read current directory"),
    }
}

fn turn_options(args: TurnArgs, verbose: bool, settings: &mut Settings) -> anyhow::Result<TurnOptions> {
    if args.cli {
        settings.use_sdk = false;
    }
    Ok(TurnOptions {
        working_directory: resolve_dir(args.dir)?,
        model: args.model,
        verbose,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries assistant output.
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Settings::default_path);

    info!(path = %config_path.display(), "loading configuration");
    let mut settings = Settings::load(&config_path).await?;

    match cli.command {
        Command::Run {
            prompt,
            continue_session,
            session,
            turn,
        } => {
            let opts = turn_options(turn, cli.verbose, &mut settings)?;
            cli::run_once(Arc::new(settings), opts, &prompt, continue_session, session).await
        }
        Command::Chat { turn } => {
            let opts = turn_options(turn, cli.verbose, &mut settings)?;
            cli::chat(Arc::new(settings), opts).await
        }
        Command::Models => {
            cli::list_models(&settings);
            Ok(())
        }
        Command::Session { dir, all } => {
            let dir = resolve_dir(dir)?;
            cli::show_session(&settings, &dir, all).await
        }
    }
}
