//! Switching an installation between the official and Bilibili channels.
//!
//! A switch rewrites the channel entries of `config.ini` and deploys or
//! removes the Bilibili login SDK under `<data dir>/Plugins`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{GameIni, ServerType};
use crate::paths::is_file;

pub const SDK_FILE: &str = "PCGameSDK.dll";
const GAME_INI: &str = "config.ini";
const DATA_DIRS: [&str; 2] = ["YuanShen_Data", "GenshinImpact_Data"];
const PLUGINS_DIR: &str = "Plugins";

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("未找到游戏路径，请先在设置中指定游戏位置")]
    NoGamePath,
    #[error("无法找到 config.ini 配置文件\n尝试寻找的路径是: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("无法切换到 {0}")]
    Unsupported(ServerType),
    #[error("缺失核心文件: {}", .0.display())]
    MissingSdk(PathBuf),
    #[error("切换失败: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkChange {
    Deployed(PathBuf),
    Removed(PathBuf),
    /// Nothing to remove.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub config_path: PathBuf,
    pub server_type: ServerType,
    pub sdk: SdkChange,
}

/// `(channel, sub_channel, cps)` written for `target`.
fn channel_values(target: ServerType) -> Result<[&'static str; 3], SwitchError> {
    match target {
        ServerType::Mainland => Ok(["1", "1", "mihoyo"]),
        ServerType::Bilibili => Ok(["14", "0", "bilibili"]),
        other => Err(SwitchError::Unsupported(other)),
    }
}

/// Rewrites the channel entries already present in `content`. Other lines,
/// including the line ending style, are kept as they are.
pub fn rewrite_channel(content: &str, target: ServerType) -> Result<String, SwitchError> {
    let [channel, sub_channel, cps] = channel_values(target)?;
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };

    let mut out: Vec<String> = content
        .lines()
        .map(|line| {
            if line.starts_with("channel=") {
                format!("channel={channel}")
            } else if line.starts_with("sub_channel=") {
                format!("sub_channel={sub_channel}")
            } else if line.starts_with("cps=") {
                format!("cps={cps}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if content.ends_with('\n') {
        out.push(String::new());
    }
    Ok(out.join(newline))
}

/// Finds `config.ini` next to the game, or one directory up. Returns the
/// directory that holds it and the file itself.
pub async fn locate_config_ini(game_path: &Path) -> Result<(PathBuf, PathBuf), SwitchError> {
    let game_dir = if is_file(game_path).await {
        game_path.parent().unwrap_or(game_path).to_path_buf()
    } else {
        game_path.to_path_buf()
    };

    let config_path = game_dir.join(GAME_INI);
    if is_file(&config_path).await {
        return Ok((game_dir, config_path));
    }
    if let Some(parent) = game_dir.parent() {
        let parent_config = parent.join(GAME_INI);
        if is_file(&parent_config).await {
            return Ok((parent.to_path_buf(), parent_config));
        }
    }
    Err(SwitchError::ConfigNotFound(config_path))
}

async fn plugins_dir(game_dir: &Path) -> PathBuf {
    let data_dir = match tokio::fs::metadata(game_dir.join(DATA_DIRS[0])).await {
        Ok(meta) if meta.is_dir() => DATA_DIRS[0],
        _ => DATA_DIRS[1],
    };
    game_dir.join(data_dir).join(PLUGINS_DIR)
}

/// `Assets/PCGameSDK.dll` next to the running executable.
pub fn default_sdk_source() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Assets")
        .join(SDK_FILE)
}

/// Switches the installation at `game_path` to `target`.
///
/// The SDK source is checked before anything is written, so a missing SDK
/// leaves the installation untouched.
pub async fn switch_server(
    game_path: &Path,
    target: ServerType,
    sdk_source: &Path,
) -> Result<SwitchOutcome, SwitchError> {
    channel_values(target)?;
    let (game_dir, config_path) = locate_config_ini(game_path).await?;
    if target == ServerType::Bilibili && !is_file(sdk_source).await {
        return Err(SwitchError::MissingSdk(sdk_source.to_path_buf()));
    }

    let content = tokio::fs::read_to_string(&config_path).await?;
    let rewritten = rewrite_channel(&content, target)?;
    tokio::fs::write(&config_path, &rewritten).await?;
    debug!("[切换服务器] 已写入 {}", config_path.display());

    let plugins = plugins_dir(&game_dir).await;
    let sdk_target = plugins.join(SDK_FILE);
    let sdk = if target == ServerType::Bilibili {
        tokio::fs::create_dir_all(&plugins).await?;
        tokio::fs::copy(sdk_source, &sdk_target).await?;
        SdkChange::Deployed(sdk_target)
    } else if is_file(&sdk_target).await {
        tokio::fs::remove_file(&sdk_target).await?;
        SdkChange::Removed(sdk_target)
    } else {
        SdkChange::Unchanged
    };

    let server_type = GameIni::parse(&rewritten).server_type;
    info!("[切换服务器] 已切换至 {} ({:?})", server_type, sdk);
    Ok(SwitchOutcome {
        config_path,
        server_type,
        sdk,
    })
}
