//! Feature flags shared with the control panel, and facts read from the game
//! installation itself.
//!
//! `FufuConfig.cfg` is written by a separate control-panel process, possibly
//! while we read it. Reads are therefore lenient: every key is looked up on
//! its own and anything missing or malformed falls back to `false`.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::UserDirs;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

const CONFIG_DIR: &str = "fufu";
const CONFIG_FILE: &str = "FufuConfig.cfg";
const GAME_INI: &str = "config.ini";
const GAME_INI_SEARCH_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("root is not a json object")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Direct,
    Inverted,
}

/// One of the eleven toggles forwarded to the injected module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureFlag {
    HideQuestBanner,
    DisableDamageText,
    UseTouchScreen,
    DisableEventCameraMove,
    RemoveTeamProgress,
    RedirectCombineEntry,
    Resin000106,
    Resin000201,
    Resin107009,
    Resin107012,
    Resin220007,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 11] = [
        FeatureFlag::HideQuestBanner,
        FeatureFlag::DisableDamageText,
        FeatureFlag::UseTouchScreen,
        FeatureFlag::DisableEventCameraMove,
        FeatureFlag::RemoveTeamProgress,
        FeatureFlag::RedirectCombineEntry,
        FeatureFlag::Resin000106,
        FeatureFlag::Resin000201,
        FeatureFlag::Resin107009,
        FeatureFlag::Resin107012,
        FeatureFlag::Resin220007,
    ];

    /// Key in `FufuConfig.cfg`.
    pub fn key(self) -> &'static str {
        match self {
            FeatureFlag::HideQuestBanner => "EnableQuestBannerControl",
            FeatureFlag::DisableDamageText => "EnableDamageTextControl",
            FeatureFlag::UseTouchScreen => "EnableTouchScreenMode",
            FeatureFlag::DisableEventCameraMove => "EnableEventCameraMove",
            FeatureFlag::RemoveTeamProgress => "EnableTeamProgress",
            FeatureFlag::RedirectCombineEntry => "EnableRedirectCombineEntry",
            FeatureFlag::Resin000106 => "ResinListItemId000106Allowed",
            FeatureFlag::Resin000201 => "ResinListItemId000201Allowed",
            FeatureFlag::Resin107009 => "ResinListItemId107009Allowed",
            FeatureFlag::Resin107012 => "ResinListItemId107012Allowed",
            FeatureFlag::Resin220007 => "ResinListItemId220007Allowed",
        }
    }

    // The control panel stores "feature enabled" for several toggles whose
    // injector-side meaning is "disable the thing".
    fn polarity(self) -> Polarity {
        match self {
            FeatureFlag::HideQuestBanner
            | FeatureFlag::DisableDamageText
            | FeatureFlag::DisableEventCameraMove
            | FeatureFlag::RemoveTeamProgress => Polarity::Inverted,
            _ => Polarity::Direct,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FeatureFlag::HideQuestBanner => "隐藏任务横幅",
            FeatureFlag::DisableDamageText => "禁用伤害文本",
            FeatureFlag::UseTouchScreen => "触屏模式",
            FeatureFlag::DisableEventCameraMove => "禁用事件镜头",
            FeatureFlag::RemoveTeamProgress => "移除组队进度",
            FeatureFlag::RedirectCombineEntry => "重定向合成",
            FeatureFlag::Resin000106 => "树脂106",
            FeatureFlag::Resin000201 => "树脂201",
            FeatureFlag::Resin107009 => "树脂107009",
            FeatureFlag::Resin107012 => "树脂107012",
            FeatureFlag::Resin220007 => "树脂220007",
        }
    }

    /// Value used when the stored entry is `stored`.
    pub fn from_stored(self, stored: bool) -> bool {
        match self.polarity() {
            Polarity::Direct => stored,
            Polarity::Inverted => !stored,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub hide_quest_banner: bool,
    pub disable_damage_text: bool,
    pub use_touch_screen: bool,
    pub disable_event_camera_move: bool,
    pub remove_team_progress: bool,
    pub redirect_combine_entry: bool,
    pub resin_000106: bool,
    pub resin_000201: bool,
    pub resin_107009: bool,
    pub resin_107012: bool,
    pub resin_220007: bool,
}

impl FeatureFlags {
    pub fn get(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::HideQuestBanner => self.hide_quest_banner,
            FeatureFlag::DisableDamageText => self.disable_damage_text,
            FeatureFlag::UseTouchScreen => self.use_touch_screen,
            FeatureFlag::DisableEventCameraMove => self.disable_event_camera_move,
            FeatureFlag::RemoveTeamProgress => self.remove_team_progress,
            FeatureFlag::RedirectCombineEntry => self.redirect_combine_entry,
            FeatureFlag::Resin000106 => self.resin_000106,
            FeatureFlag::Resin000201 => self.resin_000201,
            FeatureFlag::Resin107009 => self.resin_107009,
            FeatureFlag::Resin107012 => self.resin_107012,
            FeatureFlag::Resin220007 => self.resin_220007,
        }
    }

    pub fn set(&mut self, flag: FeatureFlag, value: bool) {
        let slot = match flag {
            FeatureFlag::HideQuestBanner => &mut self.hide_quest_banner,
            FeatureFlag::DisableDamageText => &mut self.disable_damage_text,
            FeatureFlag::UseTouchScreen => &mut self.use_touch_screen,
            FeatureFlag::DisableEventCameraMove => &mut self.disable_event_camera_move,
            FeatureFlag::RemoveTeamProgress => &mut self.remove_team_progress,
            FeatureFlag::RedirectCombineEntry => &mut self.redirect_combine_entry,
            FeatureFlag::Resin000106 => &mut self.resin_000106,
            FeatureFlag::Resin000201 => &mut self.resin_000201,
            FeatureFlag::Resin107009 => &mut self.resin_107009,
            FeatureFlag::Resin107012 => &mut self.resin_107012,
            FeatureFlag::Resin220007 => &mut self.resin_220007,
        };
        *slot = value;
    }

    /// Reads each flag on its own from a parsed config object. Missing and
    /// non-boolean entries stay `false`.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let mut flags = FeatureFlags::default();
        for flag in FeatureFlag::ALL {
            match object.get(flag.key()) {
                Some(Value::Bool(stored)) => flags.set(flag, flag.from_stored(*stored)),
                Some(other) => warn!("[配置] {} 不是布尔值: {}", flag.key(), other),
                None => {}
            }
        }
        flags
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigLoadError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(object) => Ok(Self::from_object(&object)),
            _ => Err(ConfigLoadError::NotAnObject),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureFlag, bool)> + '_ {
        FeatureFlag::ALL.into_iter().map(move |flag| (flag, self.get(flag)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ServerType {
    Mainland,
    Bilibili,
    Global,
    #[default]
    Unknown,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServerType::Mainland => "官服",
            ServerType::Bilibili => "B服",
            ServerType::Global => "国际服",
            ServerType::Unknown => "未知",
        };
        f.write_str(label)
    }
}

/// Facts from the game's own `config.ini`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameIni {
    pub game_version: Option<String>,
    pub server_type: ServerType,
}

impl GameIni {
    pub fn parse(content: &str) -> Self {
        let mut ini = GameIni::default();
        let mut channel = None;
        let mut cps = None;
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "game_version" if !value.is_empty() => ini.game_version = Some(value.to_string()),
                "channel" => channel = Some(value.to_string()),
                "cps" => cps = Some(value.to_ascii_lowercase()),
                _ => {}
            }
        }

        ini.server_type = match (channel.as_deref(), cps.as_deref()) {
            (Some("14"), _) | (_, Some("bilibili")) => ServerType::Bilibili,
            (Some("1"), _) | (_, Some("pcadbdpz")) => ServerType::Mainland,
            (Some("0"), _) => ServerType::Global,
            (_, Some(cps)) if cps.starts_with("hoyoverse") => ServerType::Global,
            _ => ServerType::Unknown,
        };
        ini
    }
}

/// Everything read from disk for one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameConfig {
    pub flags: FeatureFlags,
    pub server_type: ServerType,
    pub game_version: Option<String>,
}

/// Result of a lenient config read: the values to use, plus whatever went
/// wrong on the way (for the diagnostic log only).
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub config: GameConfig,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Never fails: problems are reported through [`LoadedConfig::warnings`].
    async fn load(&self, game_dir: &Path) -> LoadedConfig;
}

/// Reads `<Documents>/fufu/FufuConfig.cfg` and the game's `config.ini`.
pub struct FufuConfigReader {
    flags_path: PathBuf,
}

impl FufuConfigReader {
    pub fn new(flags_path: PathBuf) -> Self {
        Self { flags_path }
    }

    pub fn default_location() -> CoreResult<Self> {
        let dirs = UserDirs::new().ok_or(CoreError::NoHomeDir)?;
        let documents = dirs
            .document_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.home_dir().join("Documents"));
        Ok(Self::new(documents.join(CONFIG_DIR).join(CONFIG_FILE)))
    }

    pub fn flags_path(&self) -> &Path {
        &self.flags_path
    }

    /// Strict read; an absent file is not an error and yields defaults.
    pub async fn read_flags(&self) -> Result<FeatureFlags, ConfigLoadError> {
        match tokio::fs::read_to_string(&self.flags_path).await {
            Ok(text) => FeatureFlags::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[配置] {} 不存在，使用默认值", self.flags_path.display());
                Ok(FeatureFlags::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConfigSource for FufuConfigReader {
    async fn load(&self, game_dir: &Path) -> LoadedConfig {
        let mut loaded = LoadedConfig::default();

        match self.read_flags().await {
            Ok(flags) => loaded.config.flags = flags,
            Err(e) => {
                warn!("[配置] 读取 {} 失败: {}", self.flags_path.display(), e);
                loaded
                    .warnings
                    .push(format!("{}: {}", self.flags_path.display(), e));
            }
        }

        match read_game_ini(game_dir).await {
            Ok(Some(ini)) => {
                loaded.config.server_type = ini.server_type;
                loaded.config.game_version = ini.game_version;
            }
            Ok(None) => debug!("[配置] 未找到 {}", GAME_INI),
            Err(e) => {
                warn!("[配置] 读取 {} 失败: {}", GAME_INI, e);
                loaded.warnings.push(format!("{}: {}", GAME_INI, e));
            }
        }

        loaded
    }
}

async fn find_game_ini(game_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut pending = vec![(game_dir.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = pending.pop() {
        let candidate = dir.join(GAME_INI);
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Ok(Some(candidate));
        }
        if depth >= GAME_INI_SEARCH_DEPTH {
            continue;
        }
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if depth > 0 => {
                debug!("[配置] 跳过目录 {}: {}", dir.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                pending.push((entry.path(), depth + 1));
            }
        }
    }
    Ok(None)
}

/// Finds `config.ini` in the game directory (or a few levels below it).
pub async fn read_game_ini(game_dir: &Path) -> std::io::Result<Option<GameIni>> {
    let Some(path) = find_game_ini(game_dir).await? else {
        return Ok(None);
    };
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(Some(GameIni::parse(&content)))
}
