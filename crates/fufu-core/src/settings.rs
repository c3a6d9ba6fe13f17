//! Persisted launcher settings.
//!
//! The store is an opaque key-value map addressed by string keys. Values are
//! JSON so that booleans written by older launcher builds as strings or
//! numbers still read back sensibly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use directories::ProjectDirs;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

pub mod keys {
    pub const GAME_INSTALLATION_PATH: &str = "GameInstallationPath";
    pub const USE_INJECTION: &str = "UseInjection";
    pub const CUSTOM_LAUNCH_PARAMETERS: &str = "CustomLaunchParameters";
    pub const ADDITIONAL_PROGRAM_ENABLED: &str = "AdditionalProgramEnabled";
    pub const ADDITIONAL_PROGRAM_PATH: &str = "AdditionalProgramPath";
    pub const BETTER_GI_ENABLED: &str = "IsBetterGIIntegrationEnabled";
    pub const BETTER_GI_CLOSE_ON_EXIT: &str = "IsBetterGICloseOnExitEnabled";
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn read(&self, key: &str) -> Option<Value>;
    async fn save(&self, key: &str, value: Value) -> CoreResult<()>;
}

/// Loose boolean conversion: `true`, `"True"`, `1` all count as set.
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub async fn read_bool(store: &dyn SettingsStore, key: &str) -> bool {
    store
        .read(key)
        .await
        .as_ref()
        .and_then(value_as_bool)
        .unwrap_or(false)
}

pub async fn read_string(store: &dyn SettingsStore, key: &str) -> Option<String> {
    store.read(key).await.as_ref().and_then(value_as_string)
}

/// Settings kept in a single JSON object on disk.
///
/// Every read goes back to the file so edits made by other launcher
/// processes are picked up.
pub struct JsonFileSettings {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `<config dir>/FufuLauncher/settings.json` for the current user.
    pub fn default_location() -> CoreResult<Self> {
        let dirs = ProjectDirs::from("", "", "FufuLauncher").ok_or(CoreError::NoHomeDir)?;
        Ok(Self::new(dirs.config_dir().join("settings.json")))
    }

    async fn load_map(&self) -> CoreResult<Map<String, Value>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            _ => Err(CoreError::Settings(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn read(&self, key: &str) -> Option<Value> {
        match self.load_map().await {
            Ok(mut map) => map.remove(key),
            Err(e) => {
                warn!("[设置] 读取 {} 失败: {}", self.path.display(), e);
                None
            }
        }
    }

    async fn save(&self, key: &str, value: Value) -> CoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load_map().await.unwrap_or_else(|e| {
            warn!("[设置] 现有设置文件损坏，将重建: {}", e);
            Map::new()
        });
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&Value::Object(map))?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("[设置] 已保存 {}", key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        self.values
            .lock()
            .expect("settings lock")
            .insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn read(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("settings lock").get(key).cloned()
    }

    async fn save(&self, key: &str, value: Value) -> CoreResult<()> {
        self.values
            .lock()
            .expect("settings lock")
            .insert(key.to_string(), value);
        Ok(())
    }
}
