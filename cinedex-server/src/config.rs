//! Server configuration loaded from environment variables (plus `.env`).

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Context;

/// Everything the binary needs to wire the engine together.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,

    pub database_url: String,
    pub database_max_connections: u32,

    pub cache_dir: PathBuf,

    // Provider credentials. Empty keys disable the adapter.
    pub tmdb_api_key: String,
    pub omdb_api_key: String,
    pub fanart_api_key: String,

    pub ytdlp_path: PathBuf,

    pub preferred_language: String,
    pub max_trailer_resolution: i32,

    pub workers: usize,
    pub scheduler_tick_secs: u64,
    pub shutdown_grace_secs: u64,

    /// Per-source webhook HMAC secrets; absent source means no verification.
    pub webhook_secrets: HashMap<String, String>,
    /// Notification channel name -> target URL.
    pub notifier_urls: HashMap<String, String>,

    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),

            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set (postgres://...)")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(10),

            cache_dir: env::var("CACHE_DIR")
                .unwrap_or_else(|_| "./cache".to_string())
                .into(),

            tmdb_api_key: env::var("TMDB_API_KEY").unwrap_or_default(),
            omdb_api_key: env::var("OMDB_API_KEY").unwrap_or_default(),
            fanart_api_key: env::var("FANART_API_KEY").unwrap_or_default(),

            ytdlp_path: env::var("YTDLP_PATH")
                .unwrap_or_else(|_| "yt-dlp".to_string())
                .into(),

            preferred_language: env::var("PREFERRED_LANGUAGE")
                .unwrap_or_else(|_| "en".to_string()),
            max_trailer_resolution: env::var("MAX_TRAILER_RESOLUTION")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(1080),

            workers: env::var("WORKERS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(4),
            scheduler_tick_secs: env::var("SCHEDULER_TICK_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(60),
            shutdown_grace_secs: env::var("SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(30),

            webhook_secrets: parse_pair_list(
                &env::var("WEBHOOK_SECRETS").unwrap_or_default(),
            ),
            notifier_urls: parse_pair_list(&env::var("NOTIFIER_URLS").unwrap_or_default()),

            dev_mode: env::var("DEV_MODE")
                .map(|raw| raw == "true" || raw == "1")
                .unwrap_or(false),
        })
    }
}

/// Parse `name:value,name2:value2` lists.
fn parse_pair_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, value) = pair.split_once(':')?;
            let name = name.trim();
            let value = value.trim();
            (!name.is_empty() && !value.is_empty())
                .then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_lists_parse_and_skip_malformed_entries() {
        let parsed = parse_pair_list("radarr:s3cret, discord:https://hook, bogus,, x:");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("radarr").map(String::as_str), Some("s3cret"));
        assert_eq!(
            parsed.get("discord").map(String::as_str),
            Some("https://hook")
        );
    }

    #[test]
    fn empty_input_yields_no_pairs() {
        assert!(parse_pair_list("").is_empty());
    }
}
