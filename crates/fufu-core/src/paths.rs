//! Game directory and executable resolution.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::LaunchError;

pub const PRIMARY_EXE: &str = "GenshinImpact.exe";
pub const FALLBACK_EXE: &str = "YuanShen.exe";

const INSTALL_SUBDIR: &str = "Genshin Impact Game";

#[cfg(windows)]
const HYP_REGISTRY_KEY: &str = r"Software\miHoYo\HYP\1_1\hk4e_cn";
#[cfg(windows)]
const HYP_INSTALL_VALUE: &str = "GameInstallPath";

const CONVENTIONAL_ROOTS: &[&str] = &[
    r"C:\Program Files\Genshin Impact",
    r"D:\Program Files\Genshin Impact",
    r"E:\Program Files\Genshin Impact",
    r"C:\Genshin Impact",
    r"D:\Genshin Impact",
    r"E:\Genshin Impact",
];

/// Strips one layer of surrounding double quotes, then surrounding whitespace.
pub fn normalize_path_setting(raw: &str) -> String {
    let unquoted = raw.strip_prefix('"').unwrap_or(raw);
    let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
    unquoted.trim().to_string()
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Turns the persisted installation path into an existing directory.
pub async fn resolve_game_dir(raw: Option<&str>) -> Result<PathBuf, LaunchError> {
    let normalized = raw.map(normalize_path_setting).unwrap_or_default();
    if normalized.is_empty() {
        return Err(LaunchError::InvalidGamePath);
    }
    let dir = PathBuf::from(normalized);
    if !is_dir(&dir).await {
        debug!("[路径] 目录不存在: {}", dir.display());
        return Err(LaunchError::InvalidGamePath);
    }
    Ok(dir)
}

pub fn executable_candidates(dir: &Path) -> [PathBuf; 2] {
    [dir.join(PRIMARY_EXE), dir.join(FALLBACK_EXE)]
}

/// Probes the primary executable name, then the regional one.
pub async fn resolve_executable(dir: &Path) -> Result<PathBuf, LaunchError> {
    let [primary, fallback] = executable_candidates(dir);
    if is_file(&primary).await {
        return Ok(primary);
    }
    debug!("[路径] 尝试备用路径: {}", fallback.display());
    if is_file(&fallback).await {
        return Ok(fallback);
    }
    Err(LaunchError::MissingExecutable { primary, fallback })
}

/// Accepts either the game directory itself or the launcher root that holds
/// the `Genshin Impact Game` subdirectory.
pub fn install_dir_from_root(root: &Path) -> Option<PathBuf> {
    [root.to_path_buf(), root.join(INSTALL_SUBDIR)]
        .into_iter()
        .find(|dir| dir.join(FALLBACK_EXE).is_file())
}

#[cfg(windows)]
fn registry_install_root() -> Option<PathBuf> {
    use winreg::enums::HKEY_CURRENT_USER;
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let key = hkcu.open_subkey(HYP_REGISTRY_KEY).ok()?;
    let value: String = key.get_value(HYP_INSTALL_VALUE).ok()?;
    debug!("[路径] 注册表 GameInstallPath: '{}'", value);
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

#[cfg(not(windows))]
fn registry_install_root() -> Option<PathBuf> {
    None
}

/// Looks for an existing installation: launcher registry entry first, then
/// the conventional install locations.
pub fn discover_install_dir() -> Option<PathBuf> {
    if let Some(dir) = registry_install_root().and_then(|root| install_dir_from_root(&root)) {
        info!("[路径] 通过注册表找到游戏目录: {}", dir.display());
        return Some(dir);
    }

    let found = CONVENTIONAL_ROOTS
        .iter()
        .map(|root| Path::new(root).join(INSTALL_SUBDIR))
        .find(|dir| dir.join(FALLBACK_EXE).is_file());
    match &found {
        Some(dir) => info!("[路径] 在常见路径中找到游戏: {}", dir.display()),
        None => info!("[路径] 未找到游戏安装目录"),
    }
    found
}
