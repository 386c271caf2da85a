use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;

use crate::store::DEFAULT_LATEST_LIMIT;

pub const DEFAULT_SETTINGS_PATH: &str = ".care-compliance.json";

const UNLOCKED_KEY: &str = "unlocked";
const ASSESSORS_KEY: &str = "assessors";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub latest_limit: usize,
    pub settings_path: PathBuf,
    pub shared_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let latest_limit = match lookup("CARE_LATEST_LIMIT") {
            Some(raw) => raw.trim().parse::<usize>().with_context(|| {
                format!("CARE_LATEST_LIMIT must be a positive integer, got {raw:?}")
            })?,
            None => DEFAULT_LATEST_LIMIT,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            latest_limit,
            settings_path: lookup("CARE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH)),
            shared_secret: lookup("CARE_SHARED_SECRET").filter(|secret| !secret.is_empty()),
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to the shared Postgres instance")
    }
}

/// Small persistent key/value store for process-wide UI state.
pub trait KvStore {
    fn get(&self, key: &str) -> Option<&Value>;
    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// JSON object on disk, loaded once at open and rewritten on every change.
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text).with_context(|| {
                    format!("settings file {} is not a JSON object", path.display())
                })?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    fn save(&self) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value);
        self.save()
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    values: BTreeMap<String, Value>,
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Typed view over the persisted UI state: the shared-secret gate and the
/// cache of assessor names offered when recording.
pub struct Preferences<K: KvStore> {
    kv: K,
}

impl<K: KvStore> Preferences<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn is_unlocked(&self) -> bool {
        self.kv
            .get(UNLOCKED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Unlocks when `candidate` matches the configured secret. Returns
    /// whether the gate is now open.
    pub fn unlock(&mut self, candidate: &str, secret: &str) -> anyhow::Result<bool> {
        if candidate != secret {
            tracing::warn!("shared secret rejected");
            return Ok(false);
        }
        self.kv.set(UNLOCKED_KEY, Value::Bool(true))?;
        Ok(true)
    }

    pub fn lock(&mut self) -> anyhow::Result<()> {
        self.kv.remove(UNLOCKED_KEY)
    }

    /// Writes are open when no secret is configured, otherwise only once
    /// unlocked.
    pub fn may_write(&self, secret: Option<&str>) -> bool {
        secret.is_none() || self.is_unlocked()
    }

    pub fn known_assessors(&self) -> Vec<String> {
        self.kv
            .get(ASSESSORS_KEY)
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remember_assessor(&mut self, name: &str) -> anyhow::Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }

        let mut names = self.known_assessors();
        if names.iter().any(|known| known == name) {
            return Ok(());
        }
        names.push(name.to_string());
        names.sort();
        self.kv.set(
            ASSESSORS_KEY,
            Value::Array(names.into_iter().map(Value::String).collect()),
        )
    }
}
