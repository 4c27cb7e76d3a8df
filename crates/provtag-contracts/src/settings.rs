use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::inference::Thresholds;

pub const DEFAULT_TAGGER_ENDPOINT: &str = "http://127.0.0.1:10011/upload";
pub const DEFAULT_TAGGER_TOKEN: &str = "tag";
pub const DEFAULT_TAGGER_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_NOVELAI_VERIFY_KEY: &str = "Y2JcQAOhLwzwSDUJPNgL04nS0Tbqm7cSRc4xk0vRMic=";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub tagger_endpoint: String,
    pub tagger_token: String,
    pub tagger_timeout: Duration,
    pub thresholds: Thresholds,
    pub novelai_verify_key: Option<String>,
    pub access: AccessPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tagger_endpoint: DEFAULT_TAGGER_ENDPOINT.to_string(),
            tagger_token: DEFAULT_TAGGER_TOKEN.to_string(),
            tagger_timeout: Duration::from_secs(DEFAULT_TAGGER_TIMEOUT_SECS),
            thresholds: Thresholds::default(),
            novelai_verify_key: Some(DEFAULT_NOVELAI_VERIFY_KEY.to_string()),
            access: AccessPolicy::default(),
        }
    }
}

impl Settings {
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        let dotenv = match env_file {
            Some(path) => parse_dotenv(path)?,
            None => HashMap::new(),
        };
        Self::from_lookup(|key| {
            non_empty_env(key).or_else(|| {
                dotenv
                    .get(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(endpoint) = lookup("WD_API_ENDPOINT") {
            settings.tagger_endpoint = endpoint;
        }
        if let Some(token) = lookup("WD_API_TOKEN") {
            settings.tagger_token = token;
        }
        if let Some(raw) = lookup("WD_API_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("WD_API_TIMEOUT_SECS is not an integer: {raw}"))?;
            settings.tagger_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(raw) = lookup("WD_GENERAL_THRESHOLD") {
            settings.thresholds.general = parse_threshold("WD_GENERAL_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("WD_CHARACTER_THRESHOLD") {
            settings.thresholds.character = parse_threshold("WD_CHARACTER_THRESHOLD", &raw)?;
        }
        if let Some(key) = lookup("NOVELAI_VERIFY_KEY") {
            settings.novelai_verify_key = match key.to_ascii_lowercase().as_str() {
                "none" | "off" | "disabled" => None,
                _ => Some(key),
            };
        }
        if let Some(raw) = lookup("ONLY_WHITE") {
            settings.access.only_white = parse_bool(&raw);
        }
        if let Some(raw) = lookup("WHITE_GROUP") {
            settings.access.white_group = parse_chat_ids(&raw)?;
        }
        Ok(settings)
    }
}

/// Allow-list gate applied by the chat dispatch layer before a request reaches
/// the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessPolicy {
    pub only_white: bool,
    pub white_group: BTreeSet<i64>,
}

impl AccessPolicy {
    pub fn allows(&self, chat_id: i64) -> bool {
        !self.only_white || self.white_group.contains(&chat_id)
    }
}

fn parse_threshold(key: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .with_context(|| format!("{key} is not a number: {raw}"))?;
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{key} must be within 0..=1, got {value}");
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_chat_ids(raw: &str) -> Result<BTreeSet<i64>> {
    raw.trim_matches(|ch| ch == '[' || ch == ']')
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse::<i64>()
                .with_context(|| format!("WHITE_GROUP entry is not a chat id: {value}"))
        })
        .collect()
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading env file {}", path.display()))?;
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
