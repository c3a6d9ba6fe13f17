use std::path::PathBuf;

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("settings error: {0}")]
    Settings(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("no home directory could be determined")]
    NoHomeDir,
}

/// Failures of a single launch attempt. These never escape the orchestrator;
/// they end up inside [`crate::LaunchResult`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("游戏路径无效或不存在")]
    InvalidGamePath,
    #[error("游戏主程序不存在\n查找路径:\n- {}\n- {}", primary.display(), fallback.display())]
    MissingExecutable { primary: PathBuf, fallback: PathBuf },
    #[error("配置读取失败: {0}")]
    ConfigLoadFailure(String),
    #[error("注入失败: {message} (错误码: {code})")]
    InjectionFailure { code: i32, message: String },
    #[error("普通启动失败: {0}")]
    ProcessStartFailure(String),
    #[error("启动过程中发生严重异常: {0}")]
    Unhandled(String),
}
