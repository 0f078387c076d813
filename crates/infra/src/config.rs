//! Worker configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use groupchat_ai::{ChatModel, ContextPolicy};

use crate::ai::openai::DEFAULT_BASE_URL;
use crate::queue::GroupChatSettings;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration for the queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub group_chat: GroupChatSettings,
    pub workers: usize,
    pub poll_interval: StdDuration,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub request_timeout: StdDuration,
    /// Models served by this worker.
    pub models: Vec<ChatModel>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let stale_after_secs: i64 = parse(&get, "GROUPCHAT_STALE_AFTER_SECS", 15 * 60)?;
        if stale_after_secs <= 0 {
            return Err(invalid("GROUPCHAT_STALE_AFTER_SECS", stale_after_secs, "must be positive"));
        }
        let stale_after = Duration::try_seconds(stale_after_secs)
            .ok_or_else(|| invalid("GROUPCHAT_STALE_AFTER_SECS", stale_after_secs, "out of range"))?;

        let defaults = ContextPolicy::default();
        let context = ContextPolicy {
            max_turns: parse(&get, "GROUPCHAT_MAX_TURNS", defaults.max_turns)?,
            max_tokens: parse(&get, "GROUPCHAT_MAX_TOKENS", defaults.max_tokens)?,
            target_tokens: parse(&get, "GROUPCHAT_TARGET_TOKENS", defaults.target_tokens)?,
        };
        if context.target_tokens > context.max_tokens {
            return Err(invalid(
                "GROUPCHAT_TARGET_TOKENS",
                context.target_tokens,
                "must not exceed GROUPCHAT_MAX_TOKENS",
            ));
        }

        let workers: usize = parse(&get, "GROUPCHAT_WORKERS", 4)?;
        if workers == 0 {
            return Err(invalid("GROUPCHAT_WORKERS", workers, "must be at least 1"));
        }

        let poll_interval_ms: u64 = parse(&get, "GROUPCHAT_POLL_INTERVAL_MS", 100)?;
        let request_timeout_secs: u64 = parse(&get, "GROUPCHAT_REQUEST_TIMEOUT_SECS", 120)?;

        let models = match get("GROUPCHAT_MODELS") {
            Some(raw) => serde_json::from_str::<Vec<ChatModel>>(&raw).map_err(|e| ConfigError::Invalid {
                key: "GROUPCHAT_MODELS",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => vec![ChatModel::new("gpt-4o-mini", "gpt-4o-mini")],
        };

        Ok(Self {
            group_chat: GroupChatSettings {
                stale_after,
                context,
            },
            workers,
            poll_interval: StdDuration::from_millis(poll_interval_ms),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            openai_api_key: get("OPENAI_API_KEY"),
            request_timeout: StdDuration::from_secs(request_timeout_secs),
            models,
        })
    }
}

fn parse<T, F>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn invalid(key: &'static str, value: impl Display, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        WorkerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_match_group_chat_policy() {
        let config = load(&[]).unwrap();
        assert_eq!(config.group_chat, GroupChatSettings::default());
        assert_eq!(config.group_chat.stale_after, Duration::minutes(15));
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval, StdDuration::from_millis(100));
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.models.len(), 1);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("GROUPCHAT_STALE_AFTER_SECS", "60"),
            ("GROUPCHAT_MAX_TURNS", "3"),
            ("GROUPCHAT_WORKERS", " 8 "),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", ""),
            (
                "GROUPCHAT_MODELS",
                r#"[{"id":"fast","model_id":"gpt-4o-mini","input_price":1,"output_price":4},
                    {"id":"old","model_id":"gpt-3.5-turbo","status":"disabled"}]"#,
            ),
        ])
        .unwrap();

        assert_eq!(config.group_chat.stale_after, Duration::seconds(60));
        assert_eq!(config.group_chat.context.max_turns, 3);
        assert_eq!(config.workers, 8);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_base_url, DEFAULT_BASE_URL);
        assert_eq!(config.models[0].output_price, 4);
        assert!(!config.models[1].is_enabled());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load(&[("GROUPCHAT_WORKERS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUPCHAT_WORKERS", .. }));

        let err = load(&[("GROUPCHAT_WORKERS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUPCHAT_WORKERS", .. }));

        let err = load(&[("GROUPCHAT_STALE_AFTER_SECS", "-5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUPCHAT_STALE_AFTER_SECS", .. }));

        let err = load(&[("GROUPCHAT_STALE_AFTER_SECS", "9223372036854775807")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "GROUPCHAT_STALE_AFTER_SECS",
                value: "9223372036854775807".to_string(),
                reason: "out of range".to_string(),
            }
        );

        let err = load(&[("GROUPCHAT_MAX_TOKENS", "100"), ("GROUPCHAT_TARGET_TOKENS", "200")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUPCHAT_TARGET_TOKENS", .. }));

        let err = load(&[("GROUPCHAT_MODELS", "not json")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GROUPCHAT_MODELS", .. }));
    }
}
