use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::poller::PollConfig;

pub const DEFAULT_RUNPOD_API_BASE: &str = "https://api.runpod.ai/v2";
pub const DEFAULT_PORT: u16 = 8080;
/// How long a finished tracked job stays readable.
pub const DEFAULT_TRACKED_RETENTION: Duration = Duration::from_secs(3600);

/// Credentials for the RunPod serverless endpoint running the Hunyuan worker.
#[derive(Debug, Clone)]
pub struct RunpodConfig {
    pub api_base: String,
    pub endpoint_id: String,
    pub api_key: String,
}

impl RunpodConfig {
    /// `{api_base}/{endpoint_id}`, the prefix of `/run` and `/status/{id}`.
    pub fn endpoint_base(&self) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), self.endpoint_id)
    }
}

/// Cloudflare R2 bucket holding the generated artifacts.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl R2Config {
    pub fn endpoint_url(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

/// A config section that is either complete or remembers what was missing.
#[derive(Debug, Clone)]
pub enum Section<T> {
    Ready(T),
    Missing(Vec<&'static str>),
}

impl<T> Section<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Section::Ready(_))
    }

    pub fn get(&self) -> AppResult<&T> {
        match self {
            Section::Ready(value) => Ok(value),
            Section::Missing(vars) => Err(missing_error(vars)),
        }
    }
}

pub fn missing_error(vars: &[&'static str]) -> AppError {
    AppError::Config(format!("{} environment variables are required", vars.join(", ")))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub runpod: Section<RunpodConfig>,
    pub r2: Section<R2Config>,
    pub poll: PollConfig,
    pub tracked_retention: Duration,
    pub port: u16,
}

impl Config {
    /// Loads `.env` (if any) and reads the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let runpod = {
            let mut missing = Vec::new();
            let endpoint_id = require(&get, "RUNPOD_ENDPOINT_ID", &mut missing);
            let api_key = require(&get, "RUNPOD_API_KEY", &mut missing);
            match (endpoint_id, api_key) {
                (Some(endpoint_id), Some(api_key)) => Section::Ready(RunpodConfig {
                    api_base: get("RUNPOD_API_BASE").unwrap_or_else(|| DEFAULT_RUNPOD_API_BASE.to_string()),
                    endpoint_id,
                    api_key,
                }),
                _ => Section::Missing(missing),
            }
        };

        let r2 = {
            let mut missing = Vec::new();
            let account_id = require(&get, "CLOUDFLARE_ACCOUNT_ID", &mut missing);
            let access_key_id = require(&get, "R2_ACCESS_KEY_ID", &mut missing);
            let secret_access_key = require(&get, "R2_SECRET_ACCESS_KEY", &mut missing);
            let bucket = require(&get, "R2_BUCKET_NAME", &mut missing);
            match (account_id, access_key_id, secret_access_key, bucket) {
                (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                    Section::Ready(R2Config { account_id, access_key_id, secret_access_key, bucket })
                }
                _ => Section::Missing(missing),
            }
        };

        let defaults = PollConfig::default();
        let poll = PollConfig {
            interval: get("POLL_INTERVAL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            max_attempts: get("POLL_MAX_ATTEMPTS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
        };

        let tracked_retention = get("TRACKED_JOB_RETENTION_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TRACKED_RETENTION);

        let port = get("PORT").and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);

        Self { runpod, r2, poll, tracked_retention, port }
    }
}

fn require<G>(get: &G, key: &'static str, missing: &mut Vec<&'static str>) -> Option<String>
where
    G: Fn(&str) -> Option<String>,
{
    let value = get(key);
    if value.is_none() {
        missing.push(key);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn complete_environment_builds_every_section() {
        let cfg = Config::from_lookup(lookup(&[
            ("RUNPOD_ENDPOINT_ID", "abc123"),
            ("RUNPOD_API_KEY", "rp_key"),
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
            ("R2_ACCESS_KEY_ID", "ak"),
            ("R2_SECRET_ACCESS_KEY", "sk"),
            ("R2_BUCKET_NAME", "models"),
            ("PORT", "9000"),
        ]));

        let runpod = cfg.runpod.get().unwrap();
        assert_eq!(runpod.endpoint_base(), "https://api.runpod.ai/v2/abc123");
        assert_eq!(cfg.r2.get().unwrap().endpoint_url(), "https://acct.r2.cloudflarestorage.com");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.poll.interval, Duration::from_secs(5));
        assert_eq!(cfg.poll.max_attempts, 120);
        assert_eq!(cfg.tracked_retention, DEFAULT_TRACKED_RETENTION);
    }

    #[test]
    fn missing_values_are_reported_by_name() {
        let cfg = Config::from_lookup(lookup(&[("RUNPOD_API_KEY", "rp_key"), ("R2_BUCKET_NAME", "  ")]));

        match cfg.runpod.get() {
            Err(AppError::Config(msg)) => assert!(msg.contains("RUNPOD_ENDPOINT_ID")),
            other => panic!("expected config error, got {other:?}"),
        }
        match &cfg.r2 {
            Section::Missing(vars) => assert_eq!(
                vars,
                &vec!["CLOUDFLARE_ACCOUNT_ID", "R2_ACCESS_KEY_ID", "R2_SECRET_ACCESS_KEY", "R2_BUCKET_NAME"]
            ),
            Section::Ready(_) => panic!("blank bucket name must count as missing"),
        }
    }

    #[test]
    fn poll_settings_are_configurable() {
        let cfg = Config::from_lookup(lookup(&[
            ("POLL_INTERVAL_SECS", "2"),
            ("POLL_MAX_ATTEMPTS", "10"),
            ("TRACKED_JOB_RETENTION_SECS", "60"),
            ("RUNPOD_API_BASE", "http://localhost:9999/v2/"),
            ("RUNPOD_ENDPOINT_ID", "e"),
            ("RUNPOD_API_KEY", "k"),
        ]));
        assert_eq!(cfg.poll.interval, Duration::from_secs(2));
        assert_eq!(cfg.poll.max_attempts, 10);
        assert_eq!(cfg.tracked_retention, Duration::from_secs(60));
        assert_eq!(cfg.runpod.get().unwrap().endpoint_base(), "http://localhost:9999/v2/e");
    }

    #[test]
    fn huge_poll_interval_is_accepted_without_overflow() {
        let cfg = Config::from_lookup(lookup(&[("POLL_INTERVAL_SECS", "18446744073709551615")]));
        assert_eq!(cfg.poll.interval, Duration::from_secs(u64::MAX));
        assert_eq!(cfg.poll.budget(), Duration::MAX);
    }
}
