//! Deterministic collaborators for tests of the engine and the HTTP surface.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::countdown::ContentType;
use crate::tool::{TitleLookupRequest, TitleLookupResponse, TitleResolver, ToolError, ToolKind};

/// Resolver answering from a fixed table. Unscripted kinds answer `not_found`.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    answers: Mutex<HashMap<ToolKind, Result<TitleLookupResponse, ToolError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, kind: ToolKind, result: Result<TitleLookupResponse, ToolError>) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(kind, result);
        }
        self
    }

    /// Sleep before answering, to exercise the tool timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TitleResolver for ScriptedResolver {
    async fn lookup(
        &self,
        kind: ToolKind,
        request: &TitleLookupRequest,
    ) -> Result<TitleLookupResponse, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let scripted = self
            .answers
            .lock()
            .ok()
            .and_then(|answers| answers.get(&kind).cloned());
        scripted.unwrap_or_else(|| {
            Err(ToolError::NotFound {
                title: request.title.clone(),
            })
        })
    }
}

/// Movie response from TMDb with the given id and date.
pub fn movie(title: &str, external_id: &str, release_date: NaiveDate) -> TitleLookupResponse {
    TitleLookupResponse {
        title: title.to_string(),
        release_date,
        overview: None,
        external_id: external_id.to_string(),
        country: Some("KR".to_string()),
        is_re_release: false,
        re_release_date: None,
        source: "tmdb".to_string(),
        content_type: Some(ContentType::Movie),
        poster_url: None,
        distributor: None,
        director: None,
        cast: Vec::new(),
        genre: Vec::new(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
