//! Per-guild command prefixes with a refreshable, atomically swapped cache.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    domain::{GuildId, Origin},
    errors::Error,
    Result,
};

const MAX_PREFIX_LEN: usize = 16;

/// One stored guild prefix, as read from persistence (not yet validated).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixEntry {
    pub guild_id: GuildId,
    pub prefix: String,
}

/// Persistence collaborator for guild prefixes.
#[async_trait]
pub trait PrefixStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PrefixEntry>>;
    async fn store(&self, guild_id: GuildId, prefix: &str) -> Result<()>;
}

pub fn validate_prefix(prefix: &str) -> std::result::Result<(), &'static str> {
    if prefix.is_empty() {
        return Err("prefix must not be empty");
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err("prefix must not contain whitespace");
    }
    if prefix.chars().count() > MAX_PREFIX_LEN {
        return Err("prefix is too long");
    }
    Ok(())
}

/// JSON file store: a single object mapping guild id to prefix.
pub struct JsonPrefixStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonPrefixStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_raw(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Default::default()),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(Default::default());
        }
        match serde_json::from_str::<serde_json::Value>(&txt)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::Store(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl PrefixStore for JsonPrefixStore {
    async fn load_all(&self) -> Result<Vec<PrefixEntry>> {
        let raw = self.read_raw().await?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let Ok(guild) = key.trim().parse::<i64>() else {
                tracing::warn!(key = %key, "skipping prefix row with a non-numeric guild id");
                continue;
            };
            // Non-string values become empty prefixes and fail validation upstream.
            let prefix = value.as_str().unwrap_or_default().to_string();
            out.push(PrefixEntry {
                guild_id: GuildId(guild),
                prefix,
            });
        }
        Ok(out)
    }

    async fn store(&self, guild_id: GuildId, prefix: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut raw = self.read_raw().await?;
        raw.insert(
            guild_id.0.to_string(),
            serde_json::Value::String(prefix.to_string()),
        );

        let txt = serde_json::to_string_pretty(&serde_json::Value::Object(raw))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Outcome of a refresh, mostly for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub loaded: usize,
    pub rejected: usize,
    pub failed: bool,
}

/// Resolves which prefix marks a message as a command.
pub struct PrefixResolver {
    default_prefix: String,
    store: Arc<dyn PrefixStore>,
    mapping: RwLock<Arc<HashMap<GuildId, String>>>,
    mentions: RwLock<Arc<Vec<String>>>,
    /// Held across load-and-swap so an older load never replaces a newer one.
    refreshing: tokio::sync::Mutex<()>,
}

impl PrefixResolver {
    pub fn new(default_prefix: impl Into<String>, store: Arc<dyn PrefixStore>) -> Self {
        Self {
            default_prefix: default_prefix.into(),
            store,
            mapping: RwLock::new(Arc::new(HashMap::new())),
            mentions: RwLock::new(Arc::new(Vec::new())),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Consistent snapshot of the current mapping.
    pub fn snapshot(&self) -> Arc<HashMap<GuildId, String>> {
        self.mapping
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn resolve(&self, guild_id: Option<GuildId>) -> String {
        guild_id
            .and_then(|g| self.snapshot().get(&g).cloned())
            .unwrap_or_else(|| self.default_prefix.clone())
    }

    /// Register the bot's mention forms (e.g. `@dozer_bot `), accepted everywhere.
    pub fn set_mentions(&self, mentions: Vec<String>) {
        *self.mentions.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(mentions);
    }

    /// Every accepted prefix for an origin: mentions first, then the guild prefix.
    pub fn prefixes_for(&self, origin: &Origin) -> Vec<String> {
        let mentions = self
            .mentions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut out: Vec<String> = mentions.iter().cloned().collect();
        out.push(self.resolve(origin.guild_id()));
        out
    }

    /// Match `text` against the origin's prefixes; returns the prefix and the rest.
    pub fn match_prefix<'a>(&self, origin: &Origin, text: &'a str) -> Option<(String, &'a str)> {
        self.prefixes_for(origin)
            .into_iter()
            .find(|p| !p.is_empty() && text.starts_with(p.as_str()))
            .map(|p| {
                let rest = &text[p.len()..];
                (p, rest)
            })
    }

    /// Reload every guild prefix and swap the mapping in one step.
    ///
    /// Invalid rows keep that guild's previous prefix; a failed load keeps the
    /// whole previous mapping. Nothing is surfaced to `resolve` callers.
    ///
    /// Refreshes run one at a time; readers keep using the old snapshot meanwhile.
    pub async fn refresh(&self) -> RefreshReport {
        let _refreshing = self.refreshing.lock().await;
        let entries = match self.store.load_all().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "prefix refresh failed; keeping previous mapping");
                return RefreshReport {
                    failed: true,
                    ..RefreshReport::default()
                };
            }
        };

        let previous = self.snapshot();
        let mut next = HashMap::with_capacity(entries.len());
        let mut report = RefreshReport::default();
        for entry in entries {
            match validate_prefix(&entry.prefix) {
                Ok(()) => {
                    next.insert(entry.guild_id, entry.prefix);
                    report.loaded += 1;
                }
                Err(reason) => {
                    report.rejected += 1;
                    tracing::warn!(guild = %entry.guild_id, reason, "rejecting stored prefix");
                    if let Some(old) = previous.get(&entry.guild_id) {
                        next.insert(entry.guild_id, old.clone());
                    }
                }
            }
        }

        *self.mapping.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        tracing::debug!(loaded = report.loaded, rejected = report.rejected, "prefixes refreshed");
        report
    }

    /// Persist one guild's prefix, then refresh the cache.
    pub async fn set(&self, guild_id: GuildId, prefix: &str) -> Result<()> {
        validate_prefix(prefix).map_err(|reason| Error::Store(format!("invalid prefix: {reason}")))?;
        self.store.store(guild_id, prefix).await?;
        let report = self.refresh().await;
        if report.failed {
            return Err(Error::Store(
                "prefix saved but the cache could not be refreshed".to_string(),
            ));
        }
        Ok(())
    }
}
