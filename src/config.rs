use crate::state::normalize_room_code;
use crate::types::{QuestionSource, RoomSettings};
use crate::view::Step;
use std::path::PathBuf;
use std::time::Duration;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env_string(key)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", key, value);
            None
        }
    }
}

/// Client timing and backend configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hosted backend base URL; the in-process backend is used when unset
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    /// Countdown and deadline check interval
    pub tick: Duration,
    /// Backstop poll interval once the burst is over
    pub reconcile_interval: Duration,
    /// Refreshes at one-second spacing after any local action
    pub burst_refreshes: u32,
    /// Minimum spacing between repeats of the same automatic action
    pub auto_retry: Duration,
    /// How long past a deadline the host waits before forcing a transition
    pub host_grace: Duration,
    pub prefs_path: Option<PathBuf>,
    /// Settings used for rooms this client creates
    pub default_settings: RoomSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            tick: Duration::from_millis(250),
            reconcile_interval: Duration::from_secs(5),
            burst_refreshes: 5,
            auto_retry: Duration::from_millis(2000),
            host_grace: Duration::from_millis(1000),
            prefs_path: None,
            default_settings: RoomSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let question_source = match env_string("QUIZ_QUESTION_SOURCE").as_deref() {
            Some("players") => QuestionSource::Players,
            Some("preset") | None => QuestionSource::Preset,
            Some(other) => {
                tracing::warn!("Unknown question source '{}', using preset", other);
                QuestionSource::Preset
            }
        };

        let default_settings = RoomSettings {
            target_score: env_parse("QUIZ_TARGET_SCORE")
                .unwrap_or(defaults.default_settings.target_score),
            question_seconds: env_parse("QUIZ_QUESTION_SECONDS")
                .unwrap_or(defaults.default_settings.question_seconds),
            vote_seconds: env_parse("QUIZ_VOTE_SECONDS")
                .unwrap_or(defaults.default_settings.vote_seconds),
            question_source,
        }
        .clamped();

        Self {
            backend_url: env_string("QUIZ_BACKEND_URL"),
            anon_key: env_string("QUIZ_ANON_KEY"),
            tick: env_parse("QUIZ_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick),
            reconcile_interval: env_parse("QUIZ_RECONCILE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            burst_refreshes: env_parse("QUIZ_BURST_REFRESHES").unwrap_or(defaults.burst_refreshes),
            auto_retry: env_parse("QUIZ_AUTO_RETRY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.auto_retry),
            host_grace: env_parse("QUIZ_HOST_GRACE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.host_grace),
            prefs_path: env_string("QUIZ_PREFS_PATH").map(PathBuf::from),
            default_settings,
        }
    }

    pub fn host_grace_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.host_grace).unwrap_or(chrono::Duration::zero())
    }

    pub fn auto_retry_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.auto_retry).unwrap_or(chrono::Duration::zero())
    }
}

/// Deep-link parameters, e.g. `?step=3&code=abcd`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchParams {
    pub step: Option<Step>,
    pub code: Option<String>,
}

impl LaunchParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for pair in query.trim_start_matches('?').split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key {
                "step" => params.step = value.parse().ok().and_then(Step::from_number),
                "code" => {
                    let code = normalize_room_code(value);
                    if !code.is_empty() {
                        params.code = Some(code);
                    }
                }
                _ => {}
            }
        }
        params
    }
}
