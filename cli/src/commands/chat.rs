use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::json;

use waitwith_core::events::{StageEvent, StreamFrame, TurnOutcome};
use waitwith_core::protocol::TurnView;
use waitwith_core::tool::ToolKind;

use crate::util::{build_url, client, connection_error, exit_code_for, print_json, read_json_from_file};

/// Options shared by `chat` and `confirm`.
pub struct StreamOptions {
    /// Print every frame as one JSON line instead of rendering it
    pub json: bool,
    /// Where to write a pending confirmation payload, if one arrives
    pub save_pending: Option<String>,
}

pub struct ConfirmArgs {
    pub pending_file: String,
    pub cancel: bool,
    pub name: Option<String>,
    pub title: Option<String>,
    pub release_date: Option<String>,
    pub candidate: Option<usize>,
}

pub async fn chat(api_url: &str, query: &str, options: StreamOptions) -> i32 {
    stream_turn(api_url, &["v1", "chat"], json!({ "query": query }), &options).await
}

pub async fn confirm(api_url: &str, args: ConfirmArgs, options: StreamOptions) -> i32 {
    let pending = match read_json_from_file(&args.pending_file) {
        Ok(value) => value,
        Err(message) => {
            print_json(&json!({"error": "cli_error", "message": message}), true);
            return 4;
        }
    };

    let mut edits = serde_json::Map::new();
    if let Some(name) = args.name {
        edits.insert("name".to_string(), json!(name));
    }
    if let Some(title) = args.title {
        edits.insert("canonical_title".to_string(), json!(title));
    }
    if let Some(date) = args.release_date {
        edits.insert("release_date".to_string(), json!(date));
    }
    if let Some(index) = args.candidate {
        edits.insert("candidate_index".to_string(), json!(index));
    }

    let body = json!({
        "pending": pending,
        "action": if args.cancel { "cancel" } else { "confirm" },
        "edits": edits,
    });
    stream_turn(api_url, &["v1", "chat", "confirm"], body, &options).await
}

async fn stream_turn(
    api_url: &str,
    segments: &[&str],
    body: serde_json::Value,
    options: &StreamOptions,
) -> i32 {
    let url = match build_url(api_url, segments, &[]) {
        Ok(url) => url,
        Err(code) => return code,
    };

    let resp = match client()
        .post(url)
        .header("accept", "text/event-stream")
        .json(&body)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let status = resp.status().as_u16();
    if exit_code_for(status) != 0 {
        let body: serde_json::Value = resp
            .json()
            .await
            .unwrap_or_else(|e| json!({"raw_error": format!("Failed to parse response as JSON: {e}")}));
        print_json(&body, true);
        return exit_code_for(status);
    }

    let view = match consume(resp, options.json).await {
        Ok(view) => view,
        Err(message) => {
            print_json(&json!({"error": "stream_error", "message": message}), true);
            return 2;
        }
    };

    if !options.json {
        eprintln!("{}", timeline_summary(&view));
    }

    if let (Some(pending), Some(path)) = (&view.pending, &options.save_pending) {
        let saved = serde_json::to_string_pretty(pending)
            .map_err(|e| e.to_string())
            .and_then(|data| std::fs::write(path, data).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => eprintln!("pending confirmation saved to {path}"),
            Err(e) => eprintln!("could not save pending confirmation to {path}: {e}"),
        }
    }

    outcome_exit_code(&view)
}

/// Read the SSE body frame by frame into a [`TurnView`], printing as frames arrive.
async fn consume(resp: reqwest::Response, json: bool) -> Result<TurnView, String> {
    let mut events = resp.bytes_stream().eventsource();
    let mut view = TurnView::new();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| format!("stream interrupted: {e}"))?;
        let frame = StreamFrame::decode(&event.event, &event.data).map_err(|e| e.to_string())?;
        let line = if json { Some(event.data) } else { render(&frame) };
        let fresh = view.apply(frame).map_err(|e| e.to_string())?;
        if let Some(line) = line.filter(|_| fresh) {
            println!("{line}");
        }
        if view.is_complete() {
            break;
        }
    }

    if !view.is_complete() {
        return Err("stream ended before the end event".to_string());
    }
    Ok(view)
}

fn tool_label(kind: ToolKind) -> &'static str {
    match kind {
        ToolKind::MovieSearch => "movie",
        ToolKind::TvSearch => "tv",
    }
}

/// One terminal line per frame. Tokens are skipped; the final message carries the text.
fn render(frame: &StreamFrame) -> Option<String> {
    let message = frame.event.message();
    match &frame.event {
        StageEvent::Start { session_id, .. } => Some(format!("· session {session_id}")),
        StageEvent::Analysis { .. } => message.map(|m| format!("· {m}")),
        StageEvent::ToolStarted { tool, .. } | StageEvent::ToolResult { tool, .. } => {
            message.map(|m| format!("  [{}] {m}", tool_label(*tool)))
        }
        StageEvent::Dday { dday, record, .. } => Some(format!(
            "★ {} {} ({})",
            record.canonical_title, dday, record.release_date
        )),
        StageEvent::ConfirmationRequired { pending, .. } => {
            let payload =
                serde_json::to_string_pretty(pending).unwrap_or_else(|e| format!("<{e}>"));
            Some(format!(
                "? {} ({})\n{payload}",
                message.unwrap_or("confirmation required"),
                pending.reason.as_str()
            ))
        }
        StageEvent::AssistantMessage { .. } => message.map(str::to_string),
        StageEvent::Error { error, .. } => {
            let retry = if error.retryable { " (retry later)" } else { "" };
            Some(format!("! {}: {}{retry}", error.error, error.message))
        }
        StageEvent::Token { .. } | StageEvent::End { .. } => None,
    }
}

/// The turn's event kinds with runs collapsed, e.g. `start > analysis > token x7 > end`.
fn timeline_summary(view: &TurnView) -> String {
    view.timeline()
        .iter()
        .map(|entry| match entry.count {
            1 => entry.kind.as_str().to_string(),
            n => format!("{} x{n}", entry.kind.as_str()),
        })
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Exit codes: 0 for any answered turn, 1 for rejected input, 2 for server-side failure.
fn outcome_exit_code(view: &TurnView) -> i32 {
    match (view.outcome, &view.error) {
        (Some(TurnOutcome::Failed), Some(error))
            if error.error == waitwith_core::error::codes::VALIDATION_FAILED =>
        {
            1
        }
        (Some(TurnOutcome::Failed), _) => 2,
        _ => 0,
    }
}
