//! OpenAI-compatible planner: the model chooses `movie_search` / `tv_search`
//! calls via function calling.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use waitwith_core::planner::{
    HeuristicPlanner, PlanError, QueryPlanner, ToolCall, ToolPlan, analysis_message,
};
use waitwith_core::query::ParsedQuery;
use waitwith_core::tool::{TitleLookupRequest, ToolKind};

const SYSTEM_PROMPT: &str = "You are WAITWITH, a helpful agent for shared movie and series D-Day tracking. \
Call `movie_search` or `tv_search` with the title the user is asking about. \
Pass `year` only when the user names a production year and `country` as an ISO 3166-1 code \
only when the user names a country. Before the tool calls, reply with one short Korean \
sentence describing what you are about to look up.";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_secs: 30,
        }
    }
}

pub struct OpenAiPlanner {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiPlanner {
    pub fn new(config: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    tools: Value,
    tool_choice: &'a str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallResponse>,
}

#[derive(Debug, Deserialize)]
struct ToolCallResponse {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded arguments object
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    title: String,
    #[serde(default, alias = "first_air_date_year")]
    year: Option<i32>,
    #[serde(default)]
    country: Option<String>,
}

fn tool_definitions() -> Value {
    let parameters = |year_description: &str| {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Title as the user wrote it"},
                "year": {"type": "integer", "description": year_description},
                "country": {"type": "string", "description": "ISO 3166-1 alpha-2 region code"}
            },
            "required": ["title"]
        })
    };
    json!([
        {
            "type": "function",
            "function": {
                "name": ToolKind::MovieSearch.name(),
                "description": "Search TMDb for movie release metadata.",
                "parameters": parameters("Production year of the movie")
            }
        },
        {
            "type": "function",
            "function": {
                "name": ToolKind::TvSearch.name(),
                "description": "Search TMDb for TV series metadata.",
                "parameters": parameters("Year the series first aired")
            }
        }
    ])
}

/// Turn the model's tool calls into a plan, filling gaps from the parsed query.
/// Unknown tools and malformed arguments are dropped.
fn plan_from_message(query: &ParsedQuery, message: ChatMessageResponse) -> ToolPlan {
    let calls: Vec<ToolCall> = message
        .tool_calls
        .into_iter()
        .filter_map(|call| {
            let kind = ToolKind::from_name(&call.function.name)?;
            let args: SearchArguments = match serde_json::from_str(&call.function.arguments) {
                Ok(args) => args,
                Err(e) => {
                    tracing::warn!(tool = %call.function.name, error = %e, "dropping malformed tool call");
                    return None;
                }
            };
            let title = args.title.trim().to_string();
            if title.is_empty() {
                return None;
            }
            Some(ToolCall {
                kind,
                request: TitleLookupRequest {
                    title,
                    year: args.year.or(query.year),
                    country: args
                        .country
                        .map(|c| c.trim().to_ascii_uppercase())
                        .filter(|c| !c.is_empty())
                        .or_else(|| query.country.clone()),
                },
            })
        })
        .collect();

    let analysis = message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    if calls.is_empty() {
        tracing::info!("model returned no usable tool call, using heuristic plan");
        let mut plan = HeuristicPlanner::plan_for(query);
        if analysis.is_some() {
            plan.analysis = analysis;
        }
        return plan;
    }
    ToolPlan {
        analysis: analysis.or_else(|| Some(analysis_message(query))),
        calls,
    }
}

#[async_trait]
impl QueryPlanner for OpenAiPlanner {
    async fn plan(&self, query: &ParsedQuery) -> Result<ToolPlan, PlanError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|e| PlanError::Unavailable(e.to_string()))?,
            );
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &query.raw,
                },
            ],
            tools: tool_definitions(),
            tool_choice: "auto",
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlanError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PlanError::Unavailable(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PlanError::Unavailable(format!("invalid completion payload: {e}")))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| PlanError::Unavailable("missing choices".to_string()))?;

        Ok(plan_from_message(query, message))
    }
}
