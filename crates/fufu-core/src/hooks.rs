//! Companion programs started after the game is up.
//!
//! Every hook is best-effort. Failures come back as [`HookError`] so callers
//! can log them, but nothing here can fail a launch.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::paths::{is_file, normalize_path_setting};
use crate::process::{ProcessLauncher, StartSpec};
use crate::settings::{keys, read_bool, read_string, SettingsStore};

const BETTER_GI_NAME: &str = "BetterGI";
const BETTER_GI_FILES: [&str; 2] = ["BetterGI.exe", "BetterGI.lnk"];
const ASSETS_DIR: &str = "Assets";

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to start {}: {source}", program.display())]
    Start {
        program: PathBuf,
        #[source]
        source: CoreError,
    },
    #[error("taskkill failed: {0}")]
    TaskKill(#[source] CoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Disabled,
    /// Enabled, but nothing to start. Holds what was looked for.
    NotFound(Vec<PathBuf>),
    Started(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Disabled,
    /// Number of matching processes found; each kill is attempted separately.
    Terminated { found: usize, killed: usize },
    TaskKillSent,
}

/// Directories searched for the overlay tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionRoots {
    pub app_base: PathBuf,
    pub host_dir: Option<PathBuf>,
}

impl CompanionRoots {
    /// The launcher's own directory, then the working directory.
    pub fn current() -> Self {
        let app_base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let host_dir = std::env::current_dir()
            .ok()
            .filter(|dir| *dir != app_base);
        Self { app_base, host_dir }
    }

    /// exe before shortcut, root before `Assets`, app base before host dir.
    pub fn better_gi_candidates(&self) -> Vec<PathBuf> {
        std::iter::once(&self.app_base)
            .chain(self.host_dir.iter())
            .flat_map(|root| {
                BETTER_GI_FILES.iter().flat_map(move |file| {
                    [root.join(file), root.join(ASSETS_DIR).join(file)]
                })
            })
            .collect()
    }
}

/// Hook A: the user-configured extra program.
pub async fn launch_additional_program(
    settings: &dyn SettingsStore,
    processes: &dyn ProcessLauncher,
) -> Result<HookOutcome, HookError> {
    let enabled = read_bool(settings, keys::ADDITIONAL_PROGRAM_ENABLED).await;
    let raw = read_string(settings, keys::ADDITIONAL_PROGRAM_PATH).await;
    let Some(raw) = raw.filter(|_| enabled) else {
        debug!("[附加程序] 未启用或路径为空");
        return Ok(HookOutcome::Disabled);
    };

    let program = PathBuf::from(normalize_path_setting(&raw));
    if program.as_os_str().is_empty() || !is_file(&program).await {
        info!("[附加程序] 文件不存在或路径无效: '{}'", program.display());
        return Ok(HookOutcome::NotFound(vec![program]));
    }

    let spec = StartSpec::new(&program).in_own_dir();
    processes
        .shell_open(&spec)
        .map_err(|source| HookError::Start {
            program: program.clone(),
            source,
        })?;
    info!("[附加程序] 启动成功: {}", program.display());
    Ok(HookOutcome::Started(program))
}

/// Hook B: the BetterGI overlay, if installed next to the launcher.
pub async fn launch_better_gi(
    settings: &dyn SettingsStore,
    processes: &dyn ProcessLauncher,
    roots: &CompanionRoots,
) -> Result<HookOutcome, HookError> {
    if !read_bool(settings, keys::BETTER_GI_ENABLED).await {
        return Ok(HookOutcome::Disabled);
    }

    let candidates = roots.better_gi_candidates();
    let mut found = None;
    for candidate in &candidates {
        if is_file(candidate).await {
            found = Some(candidate.clone());
            break;
        }
    }
    let Some(program) = found else {
        info!("[BetterGI] 未找到可用的 BetterGI 可执行或快捷方式");
        return Ok(HookOutcome::NotFound(candidates));
    };

    let spec = StartSpec::new(&program).in_own_dir();
    processes
        .shell_open(&spec)
        .map_err(|source| HookError::Start {
            program: program.clone(),
            source,
        })?;
    info!("[BetterGI] 启动成功: {}", program.display());
    Ok(HookOutcome::Started(program))
}

/// Closes BetterGI when both the integration and close-on-exit are on.
///
/// Falls back to `taskkill` when no process is visible to us, e.g. because
/// it was started elevated or through a shortcut.
pub async fn stop_better_gi(
    settings: &dyn SettingsStore,
    processes: &dyn ProcessLauncher,
) -> Result<StopOutcome, HookError> {
    let enabled = read_bool(settings, keys::BETTER_GI_ENABLED).await;
    let close_on_exit = read_bool(settings, keys::BETTER_GI_CLOSE_ON_EXIT).await;
    if !enabled || !close_on_exit {
        return Ok(StopOutcome::Disabled);
    }

    let pids = processes.processes_named(BETTER_GI_NAME);
    if !pids.is_empty() {
        let mut killed = 0;
        for pid in &pids {
            match processes.terminate(*pid).await {
                Ok(()) => {
                    killed += 1;
                    info!("[BetterGI] 进程已终止 pid={}", pid);
                }
                Err(e) => warn!("[BetterGI] 终止进程失败 pid={}: {}", pid, e),
            }
        }
        return Ok(StopOutcome::Terminated {
            found: pids.len(),
            killed,
        });
    }

    let spec = StartSpec::new("taskkill")
        .args(format!("/IM {}.exe /F", BETTER_GI_NAME))
        .hidden();
    processes.shell_open(&spec).map_err(HookError::TaskKill)?;
    info!("[BetterGI] 发送 taskkill 指令");
    Ok(StopOutcome::TaskKillSent)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CoreResult;
    use crate::settings::MemorySettings;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    pub(crate) struct FakeProcesses {
        pub started: Mutex<Vec<StartSpec>>,
        pub running: Mutex<Vec<u32>>,
        pub terminated: Mutex<Vec<u32>>,
        pub fail_start: bool,
        /// Programs whose start fails; everything else starts.
        pub fail_programs: Vec<PathBuf>,
        pub fail_terminate: Vec<u32>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeProcesses {
        fn shell_open(&self, spec: &StartSpec) -> CoreResult<()> {
            if self.fail_start || self.fail_programs.contains(&spec.program) {
                return Err(CoreError::Process("access denied".into()));
            }
            self.started.lock().unwrap().push(spec.clone());
            Ok(())
        }

        fn processes_named(&self, _name: &str) -> Vec<u32> {
            self.running.lock().unwrap().clone()
        }

        async fn terminate(&self, pid: u32) -> CoreResult<()> {
            if self.fail_terminate.contains(&pid) {
                return Err(CoreError::Process("denied".into()));
            }
            self.terminated.lock().unwrap().push(pid);
            Ok(())
        }
    }

    #[tokio::test]
    async fn additional_program_starts_in_its_own_dir() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("overlay.exe");
        std::fs::write(&program, b"").unwrap();
        let settings = MemorySettings::new()
            .with(keys::ADDITIONAL_PROGRAM_ENABLED, true)
            .with(keys::ADDITIONAL_PROGRAM_PATH, format!("\"{}\"", program.display()));
        let processes = FakeProcesses::default();

        let outcome = launch_additional_program(&settings, &processes).await.unwrap();

        assert_eq!(outcome, HookOutcome::Started(program.clone()));
        let started = processes.started.lock().unwrap();
        assert_eq!(started[0].working_dir.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn additional_program_disabled_or_missing() {
        let processes = FakeProcesses::default();
        let disabled = MemorySettings::new().with(keys::ADDITIONAL_PROGRAM_PATH, "x.exe");
        assert_eq!(
            launch_additional_program(&disabled, &processes).await.unwrap(),
            HookOutcome::Disabled
        );

        let missing = MemorySettings::new()
            .with(keys::ADDITIONAL_PROGRAM_ENABLED, true)
            .with(keys::ADDITIONAL_PROGRAM_PATH, "definitely/missing.exe");
        assert!(matches!(
            launch_additional_program(&missing, &processes).await.unwrap(),
            HookOutcome::NotFound(_)
        ));
        assert!(processes.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_failure_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let program = dir.path().join("overlay.exe");
        std::fs::write(&program, b"").unwrap();
        let settings = MemorySettings::new()
            .with(keys::ADDITIONAL_PROGRAM_ENABLED, true)
            .with(keys::ADDITIONAL_PROGRAM_PATH, program.display().to_string());
        let processes = FakeProcesses {
            fail_start: true,
            ..Default::default()
        };

        let err = launch_additional_program(&settings, &processes).await.unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn better_gi_candidate_order() {
        let roots = CompanionRoots {
            app_base: PathBuf::from("app"),
            host_dir: Some(PathBuf::from("host")),
        };
        let candidates = roots.better_gi_candidates();
        assert_eq!(candidates.len(), 8);
        assert_eq!(candidates[0], PathBuf::from("app").join("BetterGI.exe"));
        assert_eq!(candidates[1], PathBuf::from("app").join("Assets").join("BetterGI.exe"));
        assert_eq!(candidates[2], PathBuf::from("app").join("BetterGI.lnk"));
        assert_eq!(candidates[4], PathBuf::from("host").join("BetterGI.exe"));
    }

    #[tokio::test]
    async fn better_gi_prefers_first_existing_candidate() {
        let app = TempDir::new().unwrap();
        let host = TempDir::new().unwrap();
        let shortcut = app.path().join("Assets").join("BetterGI.lnk");
        std::fs::create_dir_all(shortcut.parent().unwrap()).unwrap();
        std::fs::write(&shortcut, b"").unwrap();
        std::fs::write(host.path().join("BetterGI.exe"), b"").unwrap();

        let roots = CompanionRoots {
            app_base: app.path().to_path_buf(),
            host_dir: Some(host.path().to_path_buf()),
        };
        let settings = MemorySettings::new().with(keys::BETTER_GI_ENABLED, true);
        let processes = FakeProcesses::default();

        let outcome = launch_better_gi(&settings, &processes, &roots).await.unwrap();
        assert_eq!(outcome, HookOutcome::Started(shortcut));
    }

    #[tokio::test]
    async fn stop_requires_both_flags() {
        let settings = MemorySettings::new().with(keys::BETTER_GI_ENABLED, true);
        let processes = FakeProcesses::default();
        assert_eq!(
            stop_better_gi(&settings, &processes).await.unwrap(),
            StopOutcome::Disabled
        );
        assert!(processes.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_kills_each_process_independently() {
        let settings = MemorySettings::new()
            .with(keys::BETTER_GI_ENABLED, true)
            .with(keys::BETTER_GI_CLOSE_ON_EXIT, true);
        let processes = FakeProcesses {
            running: Mutex::new(vec![10, 11, 12]),
            fail_terminate: vec![11],
            ..Default::default()
        };

        let outcome = stop_better_gi(&settings, &processes).await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated { found: 3, killed: 2 });
        assert_eq!(*processes.terminated.lock().unwrap(), vec![10, 12]);
        assert!(processes.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_falls_back_to_taskkill() {
        let settings = MemorySettings::new()
            .with(keys::BETTER_GI_ENABLED, true)
            .with(keys::BETTER_GI_CLOSE_ON_EXIT, "True");
        let processes = FakeProcesses::default();

        let outcome = stop_better_gi(&settings, &processes).await.unwrap();
        assert_eq!(outcome, StopOutcome::TaskKillSent);
        let started = processes.started.lock().unwrap();
        assert_eq!(started[0].program, PathBuf::from("taskkill"));
        assert_eq!(started[0].args, "/IM BetterGI.exe /F");
        assert!(started[0].hidden);
    }
}
