use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot process.
#[derive(Clone, Debug)]
pub struct Config {
    // Gateway
    pub telegram_bot_token: String,

    // Commands
    pub default_prefix: String,
    pub developers: Vec<i64>,
    pub debug: bool,

    // Persistence
    pub prefix_store_path: PathBuf,

    // Audit / error tracking
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
    pub error_report_url: Option<String>,

    // Global rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Pager
    pub pager_timeout: Duration,

    // Lifecycle
    pub shutdown_grace: Duration,
    pub restart_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            default_prefix: "&".to_string(),
            developers: Vec::new(),
            debug: false,
            prefix_store_path: PathBuf::from("dozer-prefixes.json"),
            audit_log_path: PathBuf::from("/tmp/dozer-audit.log"),
            audit_log_json: false,
            error_report_url: None,
            rate_limit_requests: 1,
            rate_limit_window: Duration::from_secs(1),
            pager_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(5000),
            restart_file: PathBuf::from("/tmp/dozer-restart.json"),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let defaults = Self::default();

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let default_prefix = env_str("DOZER_PREFIX")
            .and_then(non_empty)
            .unwrap_or(defaults.default_prefix);
        if default_prefix.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "DOZER_PREFIX must not contain whitespace: {default_prefix:?}"
            )));
        }

        let developers = parse_csv_i64(env_str("DOZER_DEVELOPERS"));
        let debug = env_bool("DOZER_DEBUG").unwrap_or(defaults.debug);

        let prefix_store_path = env_path("PREFIX_STORE_PATH").unwrap_or(defaults.prefix_store_path);

        let audit_log_path = env_path("AUDIT_LOG_PATH").unwrap_or(defaults.audit_log_path);
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(defaults.audit_log_json);
        let error_report_url = env_str("ERROR_REPORT_URL").and_then(non_empty);

        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS")
            .unwrap_or(defaults.rate_limit_requests)
            .max(1);
        let rate_limit_window = env_u64("RATE_LIMIT_WINDOW_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.rate_limit_window);

        let pager_timeout = env_u64("PAGER_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.pager_timeout);

        let shutdown_grace = env_u64("SHUTDOWN_GRACE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.shutdown_grace);
        let restart_file = env_path("RESTART_FILE").unwrap_or(defaults.restart_file);

        Ok(Self {
            telegram_bot_token,
            default_prefix,
            developers,
            debug,
            prefix_store_path,
            audit_log_path,
            audit_log_json,
            error_report_url,
            rate_limit_requests,
            rate_limit_window,
            pager_timeout,
            shutdown_grace,
            restart_file,
        })
    }

    /// Move the gateway token out so the shared config never carries it.
    pub fn take_token(&mut self) -> String {
        std::mem::take(&mut self.telegram_bot_token)
    }

    pub fn is_developer(&self, user_id: i64) -> bool {
        self.developers.contains(&user_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
