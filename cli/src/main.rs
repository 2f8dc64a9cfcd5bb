use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::chat::{ConfirmArgs, StreamOptions};
use commands::countdown::CountdownCommands;

#[derive(Parser)]
#[command(name = "waitwith", version, about = "WAITWITH CLI: shared release-date countdowns from the terminal")]
struct Cli {
    /// API base URL
    #[arg(long, env = "WAITWITH_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Ask for a countdown and stream the turn
    Chat {
        /// Free-text request, e.g. "프로젝트 헤일메리 개봉일 디데이 설정"
        query: String,
        /// Print raw frames as JSON lines
        #[arg(long)]
        json: bool,
        /// Write a pending confirmation payload to this file
        #[arg(long)]
        save_pending: Option<String>,
    },
    /// Confirm or cancel a pending countdown
    Confirm {
        /// File holding the pending payload from `chat --save-pending` (use '-' for stdin)
        #[arg(long, short = 'f')]
        pending_file: String,
        /// Cancel instead of confirming
        #[arg(long)]
        cancel: bool,
        /// Override the countdown name
        #[arg(long, conflicts_with = "cancel")]
        name: Option<String>,
        /// Override the display title
        #[arg(long, conflicts_with = "cancel")]
        title: Option<String>,
        /// Override the release date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "cancel")]
        release_date: Option<String>,
        /// Pick a candidate by index for an ambiguous match
        #[arg(long, conflicts_with = "cancel")]
        candidate: Option<usize>,
        /// Print raw frames as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Read stored countdowns
    Countdown {
        #[command(subcommand)]
        command: CountdownCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Chat {
            query,
            json,
            save_pending,
        } => {
            commands::chat::chat(&cli.api_url, &query, StreamOptions { json, save_pending }).await
        }
        Commands::Confirm {
            pending_file,
            cancel,
            name,
            title,
            release_date,
            candidate,
            json,
        } => {
            if let Some(date) = &release_date {
                if chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                    util::exit_error(
                        &format!("--release-date must be YYYY-MM-DD, got '{date}'"),
                        None,
                    );
                }
            }
            commands::chat::confirm(
                &cli.api_url,
                ConfirmArgs {
                    pending_file,
                    cancel,
                    name,
                    title,
                    release_date,
                    candidate,
                },
                StreamOptions {
                    json,
                    save_pending: None,
                },
            )
            .await
        }
        Commands::Countdown { command } => commands::countdown::run(&cli.api_url, command).await,
    };

    std::process::exit(code);
}
