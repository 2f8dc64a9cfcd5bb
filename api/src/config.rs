use std::time::Duration;

use chrono_tz::Tz;

use crate::llm::OpenAiConfig;
use crate::tmdb::TmdbConfig;

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Absent means records live in process memory only
    pub database_url: Option<String>,
    pub port: u16,
    /// Absent means the heuristic planner is used
    pub openai: Option<OpenAiConfig>,
    pub tmdb: TmdbConfig,
    pub tool_timeout: Duration,
    pub timezone: Tz,
    /// `None` disables the label refresher
    pub refresh_interval: Option<Duration>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let timezone = match var("WAITWITH_TIMEZONE") {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                tracing::warn!(timezone = %name, "unknown WAITWITH_TIMEZONE, using Asia/Seoul");
                chrono_tz::Asia::Seoul
            }),
            None => chrono_tz::Asia::Seoul,
        };

        let openai = var("OPENAI_API_KEY").map(|api_key| {
            let mut config = OpenAiConfig {
                api_key: Some(api_key),
                ..OpenAiConfig::default()
            };
            if let Some(model) = var("OPENAI_MODEL") {
                config.model = model;
            }
            if let Some(base) = http_url(var("OPENAI_BASE_URL"), "OPENAI_BASE_URL") {
                config.base_url = base;
            }
            config
        });

        let defaults = TmdbConfig::default();
        let tmdb = TmdbConfig {
            api_key: var("TMDB_API_KEY"),
            base_url: http_url(var("TMDB_BASE_URL"), "TMDB_BASE_URL").unwrap_or(defaults.base_url),
            language: var("TMDB_LANGUAGE").unwrap_or(defaults.language),
            region: var("TMDB_REGION").or(defaults.region),
            image_base: http_url(var("TMDB_IMAGE_BASE"), "TMDB_IMAGE_BASE")
                .unwrap_or(defaults.image_base),
            timeout_secs: defaults.timeout_secs,
        };

        let refresh_secs = parse_or(var("WAITWITH_REFRESH_INTERVAL_SECS"), 3600u64);

        Self {
            database_url: var("DATABASE_URL"),
            port: parse_or(var("PORT"), 3000),
            openai,
            tmdb,
            tool_timeout: Duration::from_secs(parse_or(var("WAITWITH_TOOL_TIMEOUT_SECS"), 10)),
            timezone,
            refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
        }
    }
}

/// Accept only absolute http(s) URLs; anything else falls back to the default.
fn http_url(value: Option<String>, key: &str) -> Option<String> {
    let value = value?;
    match url::Url::parse(&value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            Some(value.trim_end_matches('/').to_string())
        }
        _ => {
            tracing::warn!(key, value = %value, "ignoring invalid URL");
            None
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]);
        assert_eq!(s.port, 3000);
        assert!(s.database_url.is_none());
        assert!(s.openai.is_none());
        assert_eq!(s.tool_timeout, Duration::from_secs(10));
        assert_eq!(s.timezone, chrono_tz::Asia::Seoul);
        assert_eq!(s.refresh_interval, Some(Duration::from_secs(3600)));
        assert_eq!(s.tmdb.language, "ko-KR");
        assert_eq!(s.tmdb.region.as_deref(), Some("KR"));
    }

    #[test]
    fn reads_overrides() {
        let s = settings(&[
            ("PORT", "8080"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("WAITWITH_TOOL_TIMEOUT_SECS", "3"),
            ("WAITWITH_TIMEZONE", "America/New_York"),
            ("WAITWITH_REFRESH_INTERVAL_SECS", "0"),
            ("TMDB_REGION", "US"),
            ("TMDB_BASE_URL", "http://localhost:8089/3/"),
        ]);
        assert_eq!(s.port, 8080);
        let openai = s.openai.expect("openai configured");
        assert_eq!(openai.model, "gpt-4o");
        assert_eq!(s.tool_timeout, Duration::from_secs(3));
        assert_eq!(s.timezone, chrono_tz::America::New_York);
        assert_eq!(s.refresh_interval, None);
        assert_eq!(s.tmdb.region.as_deref(), Some("US"));
        assert_eq!(s.tmdb.base_url, "http://localhost:8089/3");
    }

    #[test]
    fn blank_and_invalid_values_fall_back() {
        let s = settings(&[
            ("PORT", "abc"),
            ("OPENAI_API_KEY", "  "),
            ("WAITWITH_TIMEZONE", "Mars/Base"),
            ("TMDB_BASE_URL", "api.themoviedb.org/3"),
        ]);
        assert_eq!(s.port, 3000);
        assert_eq!(s.tmdb.base_url, "https://api.themoviedb.org/3");
        assert!(s.openai.is_none());
        assert_eq!(s.timezone, chrono_tz::Asia::Seoul);
    }
}
