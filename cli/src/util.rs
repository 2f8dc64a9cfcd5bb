use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn print_json(value: &serde_json::Value, to_stderr: bool) {
    let formatted = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if to_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    print_json(&err, true);
    std::process::exit(4);
}

/// Exit code for an HTTP status.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

pub fn connection_error(e: &reqwest::Error) -> i32 {
    print_json(
        &json!({
            "error": "connection_error",
            "message": format!("{e}"),
            "docs_hint": "Is the API server running? Check WAITWITH_API_URL."
        }),
        true,
    );
    3
}

fn usage_error(message: String) -> i32 {
    print_json(&json!({"error": "cli_error", "message": message}), true);
    4
}

/// Join path segments onto the API base URL, percent-encoding each segment.
pub fn build_url(
    api_url: &str,
    segments: &[&str],
    query: &[(String, String)],
) -> Result<reqwest::Url, i32> {
    let mut url = reqwest::Url::parse(api_url)
        .map_err(|e| usage_error(format!("Invalid API URL '{api_url}': {e}")))?;
    match url.path_segments_mut() {
        Ok(mut path) => {
            path.pop_if_empty().extend(segments);
        }
        Err(()) => return Err(usage_error(format!("API URL '{api_url}' cannot take a path"))),
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Execute a JSON API request, print the response, return a structured exit code.
pub async fn api_request(method: reqwest::Method, url: reqwest::Url) -> i32 {
    let resp = match client().request(method, url).send().await {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let exit_code = exit_code_for(resp.status().as_u16());
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    print_json(&resp_body, exit_code != 0);
    exit_code
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}
