use clap::Subcommand;

use crate::util::{api_request, build_url, exit_error};

#[derive(Subcommand)]
pub enum CountdownCommands {
    /// List upcoming countdowns, soonest first
    List {
        /// Reference date (YYYY-MM-DD). Defaults to today on the server.
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Show one countdown by its name
    Get {
        /// Countdown name, e.g. "프로젝트 헤일메리 개봉일 디데이 설정"
        name: String,
    },
}

pub async fn run(api_url: &str, command: CountdownCommands) -> i32 {
    let url = match command {
        CountdownCommands::List { as_of } => {
            let mut query = Vec::new();
            if let Some(date) = as_of {
                if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
                    exit_error(
                        &format!("--as-of must be YYYY-MM-DD, got '{date}'"),
                        Some("Example: waitwith countdown list --as-of 2026-02-18"),
                    );
                }
                query.push(("as_of".to_string(), date));
            }
            build_url(api_url, &["v1", "countdowns"], &query)
        }
        CountdownCommands::Get { name } => build_url(api_url, &["v1", "countdowns", &name], &[]),
    };
    match url {
        Ok(url) => api_request(reqwest::Method::GET, url).await,
        Err(code) => code,
    }
}
