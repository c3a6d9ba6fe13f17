use std::error::Error;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::CoreResult;

const LOG_FILE_NAME: &str = "fufu-launcher.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging() {
    let _ = fmt().with_env_filter(env_filter()).try_init();
}

/// Routes tracing output into `<dir>/fufu-launcher.log`.
///
/// The returned guard flushes the background writer on drop; keep it alive
/// for as long as the process should log.
pub fn init_file_logging(dir: &Path) -> CoreResult<(PathBuf, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let log_path = dir.join(LOG_FILE_NAME);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter())
        .with_ansi(false)
        .try_init();

    tracing::info!("logging initialized: {}", log_path.display());
    Ok((log_path, guard))
}

/// 格式化错误链，包含所有 source
pub fn format_error_chain<E: Error + ?Sized>(error: &E) -> String {
    let mut chain = vec![error.to_string()];
    let mut source = error.source();

    while let Some(err) = source {
        chain.push(format!("  caused by: {}", err));
        source = err.source();
    }

    chain.join("\n")
}

pub fn log_error<E: Error + ?Sized>(context: &str, error: &E) {
    let error_chain = format_error_chain(error);
    tracing::error!(context = context, error = %error_chain, "error occurred");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "failed to read settings")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_lists_every_source() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "missing file"));
        let chain = format_error_chain(&err);
        assert_eq!(chain, "failed to read settings\n  caused by: missing file");
    }
}
