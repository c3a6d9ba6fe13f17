//! Game launch orchestration.
//!
//! [`GameLauncher::launch`] runs one attempt start to finish and always
//! returns a [`LaunchResult`]. Failures, including panics in collaborators,
//! are folded into the result together with a timestamped diagnostic log.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, FeatureFlags, GameConfig, ServerType};
use crate::error::{CoreResult, LaunchError};
use crate::hooks::{self, CompanionRoots, HookOutcome, StopOutcome};
use crate::injector::{InjectorClient, InjectorConfig, StagedInjection};
use crate::logging::{format_error_chain, log_error};
use crate::paths::{is_file, normalize_path_setting, resolve_executable, resolve_game_dir};
use crate::process::{ProcessLauncher, StartSpec};
use crate::server::{self, SwitchError, SwitchOutcome};
use crate::settings::{keys, read_bool, read_string, SettingsStore};

const GENERIC_FAILURE: &str = "游戏启动失败";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStage {
    NotStarted,
    PathResolved,
    ConfigLoaded,
    StrategyChosen,
    Injected,
    PlainStarted,
    PostHooksRun,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    Inject,
    PlainStart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Local>,
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S%.3f"), self.text)
    }
}

/// Outcome of one launch attempt.
#[derive(Debug, Clone)]
pub struct LaunchResult {
    success: bool,
    error_message: String,
    error: Option<LaunchError>,
    pid: Option<u32>,
    stage: LaunchStage,
    log: Vec<LogLine>,
}

impl LaunchResult {
    pub fn success(&self) -> bool {
        self.success
    }

    /// Text meant to be shown to the user verbatim. Empty on success.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn error(&self) -> Option<&LaunchError> {
        self.error.as_ref()
    }

    /// Only known when the injector started the game.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn stage(&self) -> LaunchStage {
        self.stage
    }

    pub fn log(&self) -> &[LogLine] {
        &self.log
    }

    pub fn detail_log(&self) -> String {
        self.log.iter().map(|line| format!("{line}\n")).collect()
    }
}

/// Per-attempt scratch state.
struct LaunchRun {
    stage: LaunchStage,
    log: Vec<LogLine>,
}

impl LaunchRun {
    fn new() -> Self {
        Self {
            stage: LaunchStage::NotStarted,
            log: Vec::new(),
        }
    }

    fn log(&mut self, text: impl Into<String>) {
        let text = text.into();
        debug!("[启动流程] {}", text);
        self.log.push(LogLine {
            at: Local::now(),
            text,
        });
    }

    fn advance(&mut self, stage: LaunchStage) {
        debug!("[启动流程] {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn finish(mut self, outcome: Result<Option<u32>, LaunchError>) -> LaunchResult {
        match outcome {
            Ok(pid) => {
                self.advance(LaunchStage::Succeeded);
                LaunchResult {
                    success: true,
                    error_message: String::new(),
                    error: None,
                    pid,
                    stage: self.stage,
                    log: self.log,
                }
            }
            Err(err) => {
                let error_message = match &err {
                    LaunchError::InjectionFailure { .. } | LaunchError::ProcessStartFailure(_) => {
                        format!("{GENERIC_FAILURE}\n\n{err}")
                    }
                    _ => err.to_string(),
                };
                self.log(format!("✗ 错误: {error_message}"));
                self.advance(LaunchStage::Failed);
                LaunchResult {
                    success: false,
                    error_message,
                    error: Some(err),
                    pid: None,
                    stage: self.stage,
                    log: self.log,
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct GameLauncher {
    settings: Arc<dyn SettingsStore>,
    config: Arc<dyn ConfigSource>,
    injector: Arc<dyn InjectorClient>,
    processes: Arc<dyn ProcessLauncher>,
    companions: CompanionRoots,
    last_use_injection: AtomicBool,
}

impl GameLauncher {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        config: Arc<dyn ConfigSource>,
        injector: Arc<dyn InjectorClient>,
        processes: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            settings,
            config,
            injector,
            processes,
            companions: CompanionRoots::current(),
            last_use_injection: AtomicBool::new(false),
        }
    }

    pub fn with_companion_roots(mut self, roots: CompanionRoots) -> Self {
        self.companions = roots;
        self
    }

    pub fn injector(&self) -> &dyn InjectorClient {
        &*self.injector
    }

    /// Persisted installation path, normalized. Empty when unset.
    pub async fn game_path(&self) -> String {
        let raw = read_string(&*self.settings, keys::GAME_INSTALLATION_PATH).await;
        let path = raw.as_deref().map(normalize_path_setting).unwrap_or_default();
        debug!("[启动服务] 读取路径: '{}'", path);
        path
    }

    pub async fn is_game_path_selected(&self) -> bool {
        let path = self.game_path().await;
        let exists = !path.is_empty()
            && tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
        info!("[启动服务] 检查路径: '{}', 存在: {}", path, exists);
        exists
    }

    pub async fn save_game_path(&self, path: &str) -> CoreResult<()> {
        let path = normalize_path_setting(path);
        self.settings
            .save(keys::GAME_INSTALLATION_PATH, Value::String(path.clone()))
            .await?;
        info!("[启动服务] 保存路径: '{}'", path);
        Ok(())
    }

    pub async fn use_injection(&self) -> bool {
        let use_injection = read_bool(&*self.settings, keys::USE_INJECTION).await;
        self.last_use_injection.store(use_injection, Ordering::Relaxed);
        use_injection
    }

    /// Skips the write when the value matches the last one seen.
    pub async fn set_use_injection(&self, use_injection: bool) -> CoreResult<()> {
        if self.last_use_injection.swap(use_injection, Ordering::Relaxed) == use_injection {
            return Ok(());
        }
        self.settings
            .save(keys::USE_INJECTION, Value::Bool(use_injection))
            .await?;
        info!("[启动服务] 保存注入选项: {}", use_injection);
        Ok(())
    }

    pub async fn custom_launch_parameters(&self) -> String {
        read_string(&*self.settings, keys::CUSTOM_LAUNCH_PARAMETERS)
            .await
            .unwrap_or_default()
    }

    pub async fn set_custom_launch_parameters(&self, parameters: &str) -> CoreResult<()> {
        self.settings
            .save(
                keys::CUSTOM_LAUNCH_PARAMETERS,
                Value::String(parameters.to_string()),
            )
            .await?;
        info!("[启动服务] 保存自定义参数: '{}'", parameters);
        Ok(())
    }

    /// Command line for the game. Only the user's custom parameters go in
    /// today; the server type is recorded for diagnostics.
    pub async fn build_launch_arguments(&self, config: &GameConfig) -> String {
        debug!("[启动服务] 服务器类型: {}", config.server_type);
        let custom = self.custom_launch_parameters().await;
        if custom.trim().is_empty() {
            return String::new();
        }
        normalize_path_setting(&custom)
    }

    pub async fn launch(&self) -> LaunchResult {
        let mut run = LaunchRun::new();
        let outcome = AssertUnwindSafe(self.run(&mut run)).catch_unwind().await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("[启动流程] 未处理异常: {}", message);
                Err(LaunchError::Unhandled(message))
            }
        };
        let result = run.finish(outcome);
        if result.success() {
            info!("[启动流程] 启动成功");
        } else {
            warn!("[启动流程] 启动失败: {}", result.error_message());
        }
        result
    }

    async fn run(&self, run: &mut LaunchRun) -> Result<Option<u32>, LaunchError> {
        run.log("开始启动游戏");

        let raw_path = read_string(&*self.settings, keys::GAME_INSTALLATION_PATH).await;
        run.log(format!("游戏路径: {}", raw_path.as_deref().unwrap_or("")));
        let game_dir = resolve_game_dir(raw_path.as_deref()).await?;
        run.advance(LaunchStage::PathResolved);

        let game_exe = resolve_executable(&game_dir).await?;
        run.log(format!("找到游戏程序: {}", game_exe.display()));

        let loaded = self.config.load(&game_dir).await;
        for warning in loaded.warnings {
            run.log(LaunchError::ConfigLoadFailure(warning).to_string());
        }
        let config = loaded.config;
        if let Some(version) = &config.game_version {
            run.log(format!("游戏版本: {version} ({})", config.server_type));
        }
        run.advance(LaunchStage::ConfigLoaded);

        let arguments = self.build_launch_arguments(&config).await;
        run.log(format!("启动参数: {arguments}"));

        let strategy = if self.use_injection().await {
            LaunchStrategy::Inject
        } else {
            LaunchStrategy::PlainStart
        };
        run.log(format!(
            "注入模式: {}",
            if strategy == LaunchStrategy::Inject { "启用" } else { "禁用" }
        ));
        run.advance(LaunchStage::StrategyChosen);

        let pid = match strategy {
            LaunchStrategy::Inject => {
                self.inject_or_start(run, &game_dir, &game_exe, config.flags, &arguments)
                    .await?
            }
            LaunchStrategy::PlainStart => {
                self.start_plain(run, &game_dir, &game_exe, &arguments)?;
                None
            }
        };

        run.log("游戏进程已启动");
        self.run_post_launch_hooks(run).await;
        run.advance(LaunchStage::PostHooksRun);
        Ok(pid)
    }

    async fn inject_or_start(
        &self,
        run: &mut LaunchRun,
        game_dir: &Path,
        game_exe: &Path,
        flags: FeatureFlags,
        arguments: &str,
    ) -> Result<Option<u32>, LaunchError> {
        for (flag, value) in flags.iter() {
            run.log(format!("{}: {}", flag.label(), value));
        }

        let staged = StagedInjection::stage(
            &*self.injector,
            InjectorConfig {
                game_exe: game_exe.to_path_buf(),
                flags,
            },
        );
        run.log("配置已同步到共享内存");

        let dll = staged.default_dll_path();
        run.log(format!(
            "注入DLL路径: {}",
            dll.as_deref().map(Path::display).map(|d| d.to_string()).unwrap_or_default()
        ));

        match dll {
            Some(dll) if is_file(&dll).await => {
                let pid = staged.launch(&dll, arguments)?;
                run.log(format!("注入成功，PID: {pid}"));
                run.advance(LaunchStage::Injected);
                Ok(Some(pid))
            }
            _ => {
                run.log("DLL不存在，改用普通启动");
                self.start_plain(run, game_dir, game_exe, arguments)?;
                Ok(None)
            }
        }
    }

    fn start_plain(
        &self,
        run: &mut LaunchRun,
        game_dir: &Path,
        game_exe: &Path,
        arguments: &str,
    ) -> Result<(), LaunchError> {
        run.log(format!("[普通启动] 程序: {}", game_exe.display()));
        run.log(format!("[普通启动] 参数: {arguments}"));
        run.log(format!("[普通启动] 工作目录: {}", game_dir.display()));

        let spec = StartSpec::new(game_exe)
            .args(arguments)
            .working_dir(game_dir);
        match self.processes.shell_open(&spec) {
            Ok(()) => {
                run.log("[普通启动] 进程已创建");
                run.advance(LaunchStage::PlainStarted);
                Ok(())
            }
            Err(e) => {
                run.log(format!("[普通启动] 异常: {e}"));
                Err(LaunchError::ProcessStartFailure(e.to_string()))
            }
        }
    }

    async fn run_post_launch_hooks(&self, run: &mut LaunchRun) {
        let additional =
            hooks::launch_additional_program(&*self.settings, &*self.processes).await;
        log_hook(run, "附加程序", additional);

        let better_gi =
            hooks::launch_better_gi(&*self.settings, &*self.processes, &self.companions).await;
        log_hook(run, "BetterGI", better_gi);
    }

    /// Switches the saved installation between the official and Bilibili
    /// channels.
    pub async fn switch_server(
        &self,
        target: ServerType,
        sdk_source: &Path,
    ) -> Result<SwitchOutcome, SwitchError> {
        let path = self.game_path().await;
        if path.is_empty() {
            return Err(SwitchError::NoGamePath);
        }
        server::switch_server(Path::new(&path), target, sdk_source).await
    }

    /// Closes companions that asked to be closed with the launcher.
    pub async fn stop_companions(&self) -> Result<StopOutcome, hooks::HookError> {
        let outcome = hooks::stop_better_gi(&*self.settings, &*self.processes).await;
        if let Err(e) = &outcome {
            warn!("[BetterGI] Stop 异常: {}", format_error_chain(e));
        }
        outcome
    }
}

fn log_hook(run: &mut LaunchRun, name: &str, result: Result<HookOutcome, hooks::HookError>) {
    match result {
        Ok(HookOutcome::Started(path)) => {
            run.log(format!("[{name}] 已启动: {}", path.display()))
        }
        Ok(HookOutcome::NotFound(paths)) => run.log(format!(
            "[{name}] 未找到: {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Ok(HookOutcome::Disabled) => {}
        Err(e) => {
            log_error(&format!("[{name}] 启动失败"), &e);
            run.log(format!("[{name}] 启动失败: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadedConfig;
    use crate::hooks::tests::FakeProcesses;
    use crate::injector::InjectOutcome;
    use crate::paths::{executable_candidates, PRIMARY_EXE};
    use crate::settings::MemorySettings;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FixedConfig(GameConfig);

    #[async_trait]
    impl ConfigSource for FixedConfig {
        async fn load(&self, _game_dir: &Path) -> LoadedConfig {
            LoadedConfig {
                config: self.0.clone(),
                warnings: Vec::new(),
            }
        }
    }

    #[derive(Default)]
    struct FakeInjector {
        dll: Option<PathBuf>,
        outcome: Option<InjectOutcome>,
        panic_on_launch: bool,
        pushed: Mutex<Vec<InjectorConfig>>,
        launches: Mutex<Vec<(PathBuf, PathBuf, String)>>,
    }

    impl InjectorClient for FakeInjector {
        fn validate_game_path(&self, _path: &Path) -> bool {
            true
        }

        fn validate_dll_path(&self, _path: &Path) -> bool {
            true
        }

        fn default_dll_path(&self) -> Option<PathBuf> {
            self.dll.clone()
        }

        fn update_config(&self, config: &InjectorConfig) {
            self.pushed.lock().unwrap().push(config.clone());
        }

        fn launch_and_inject(&self, game_exe: &Path, dll: &Path, args: &str) -> InjectOutcome {
            if self.panic_on_launch {
                panic!("native call blew up");
            }
            self.launches.lock().unwrap().push((
                game_exe.to_path_buf(),
                dll.to_path_buf(),
                args.to_string(),
            ));
            self.outcome.clone().unwrap_or(InjectOutcome {
                code: 0,
                message: String::new(),
                pid: 1234,
            })
        }
    }

    struct Fixture {
        game_dir: TempDir,
        settings: Arc<MemorySettings>,
        injector: Arc<FakeInjector>,
        processes: Arc<FakeProcesses>,
        companions: TempDir,
    }

    impl Fixture {
        fn new(settings: MemorySettings, injector: FakeInjector, processes: FakeProcesses) -> Self {
            let game_dir = TempDir::new().unwrap();
            std::fs::write(game_dir.path().join(PRIMARY_EXE), b"").unwrap();
            let settings = settings.with(
                keys::GAME_INSTALLATION_PATH,
                game_dir.path().display().to_string(),
            );
            Self {
                game_dir,
                settings: Arc::new(settings),
                injector: Arc::new(injector),
                processes: Arc::new(processes),
                companions: TempDir::new().unwrap(),
            }
        }

        fn launcher(&self, flags: FeatureFlags) -> GameLauncher {
            GameLauncher::new(
                self.settings.clone(),
                Arc::new(FixedConfig(GameConfig {
                    flags,
                    ..Default::default()
                })),
                self.injector.clone(),
                self.processes.clone(),
            )
            .with_companion_roots(CompanionRoots {
                app_base: self.companions.path().to_path_buf(),
                host_dir: None,
            })
        }

        fn exe(&self) -> PathBuf {
            self.game_dir.path().join(PRIMARY_EXE)
        }
    }

    #[tokio::test]
    async fn plain_start_with_custom_parameters() {
        let fx = Fixture::new(
            MemorySettings::new()
                .with(keys::USE_INJECTION, false)
                .with(keys::CUSTOM_LAUNCH_PARAMETERS, "\"-silent\""),
            FakeInjector::default(),
            FakeProcesses::default(),
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(result.success(), "{}", result.detail_log());
        assert_eq!(result.error_message(), "");
        assert_eq!(result.stage(), LaunchStage::Succeeded);
        let started = fx.processes.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].program, fx.exe());
        assert_eq!(started[0].args, "-silent");
        assert_eq!(started[0].working_dir.as_deref(), Some(fx.game_dir.path()));
        assert!(fx.injector.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_game_path_fails_without_starting_anything() {
        let processes = Arc::new(FakeProcesses::default());
        let launcher = GameLauncher::new(
            Arc::new(MemorySettings::new().with(keys::GAME_INSTALLATION_PATH, "")),
            Arc::new(FixedConfig(GameConfig::default())),
            Arc::new(FakeInjector::default()),
            processes.clone(),
        );

        let result = launcher.launch().await;

        assert!(!result.success());
        assert_eq!(result.error_message(), "游戏路径无效或不存在");
        assert_eq!(result.error(), Some(&LaunchError::InvalidGamePath));
        assert_eq!(result.stage(), LaunchStage::Failed);
        assert!(processes.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_executable_names_both_candidates() {
        let fx = Fixture::new(
            MemorySettings::new(),
            FakeInjector::default(),
            FakeProcesses::default(),
        );
        std::fs::remove_file(fx.exe()).unwrap();

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(!result.success());
        let [primary, fallback] = executable_candidates(fx.game_dir.path());
        assert!(result.error_message().contains(&primary.display().to_string()));
        assert!(result.error_message().contains(&fallback.display().to_string()));
    }

    #[tokio::test]
    async fn missing_module_degrades_to_plain_start() {
        let fx = Fixture::new(
            MemorySettings::new().with(keys::USE_INJECTION, true),
            FakeInjector {
                dll: Some(PathBuf::from("definitely/not/here.dll")),
                ..Default::default()
            },
            FakeProcesses::default(),
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(result.success(), "{}", result.detail_log());
        assert_eq!(fx.injector.pushed.lock().unwrap().len(), 1);
        assert!(fx.injector.launches.lock().unwrap().is_empty());
        assert_eq!(fx.processes.started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injection_failure_reports_message_and_code() {
        let module = TempDir::new().unwrap();
        let dll = module.path().join("module.dll");
        std::fs::write(&dll, b"").unwrap();
        let fx = Fixture::new(
            MemorySettings::new()
                .with(keys::USE_INJECTION, true)
                .with(keys::ADDITIONAL_PROGRAM_ENABLED, true),
            FakeInjector {
                dll: Some(dll),
                outcome: Some(InjectOutcome {
                    code: 87,
                    message: "CreateProcessW failed".into(),
                    pid: 0,
                }),
                ..Default::default()
            },
            FakeProcesses::default(),
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(!result.success());
        assert!(result.error_message().contains("CreateProcessW failed"));
        assert!(result.error_message().contains("87"));
        assert!(fx.processes.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn injection_pushes_flags_then_launches() {
        let module = TempDir::new().unwrap();
        let dll = module.path().join("module.dll");
        std::fs::write(&dll, b"").unwrap();
        let fx = Fixture::new(
            MemorySettings::new()
                .with(keys::USE_INJECTION, true)
                .with(keys::CUSTOM_LAUNCH_PARAMETERS, "-popupwindow"),
            FakeInjector {
                dll: Some(dll.clone()),
                ..Default::default()
            },
            FakeProcesses::default(),
        );
        let flags = FeatureFlags {
            hide_quest_banner: true,
            resin_107012: true,
            ..Default::default()
        };

        let result = fx.launcher(flags).launch().await;

        assert!(result.success(), "{}", result.detail_log());
        assert_eq!(result.pid(), Some(1234));
        let pushed = fx.injector.pushed.lock().unwrap();
        assert_eq!(pushed[0].game_exe, fx.exe());
        assert_eq!(pushed[0].flags, flags);
        let launches = fx.injector.launches.lock().unwrap();
        assert_eq!(launches[0], (fx.exe(), dll, "-popupwindow".to_string()));
    }

    #[tokio::test]
    async fn companion_hooks_run_after_successful_start() {
        let fx = Fixture::new(
            MemorySettings::new().with(keys::BETTER_GI_ENABLED, true),
            FakeInjector::default(),
            FakeProcesses::default(),
        );
        let better_gi = fx.companions.path().join("BetterGI.exe");
        std::fs::write(&better_gi, b"").unwrap();

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(result.success());
        let started = fx.processes.started.lock().unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].program, better_gi);
    }

    #[tokio::test]
    async fn failing_additional_program_does_not_block_better_gi() {
        let extra_dir = TempDir::new().unwrap();
        let extra = extra_dir.path().join("overlay.exe");
        std::fs::write(&extra, b"").unwrap();
        let fx = Fixture::new(
            MemorySettings::new()
                .with(keys::ADDITIONAL_PROGRAM_ENABLED, true)
                .with(keys::ADDITIONAL_PROGRAM_PATH, extra.display().to_string())
                .with(keys::BETTER_GI_ENABLED, true),
            FakeInjector::default(),
            FakeProcesses {
                fail_programs: vec![extra.clone()],
                ..Default::default()
            },
        );
        let better_gi = fx.companions.path().join("BetterGI.exe");
        std::fs::write(&better_gi, b"").unwrap();

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(result.success(), "{}", result.detail_log());
        assert_eq!(result.error_message(), "");
        let started = fx.processes.started.lock().unwrap();
        let programs: Vec<_> = started.iter().map(|spec| spec.program.clone()).collect();
        assert_eq!(programs, vec![fx.exe(), better_gi]);
        assert!(result.detail_log().contains("[附加程序] 启动失败"));
    }

    #[tokio::test]
    async fn switch_server_needs_a_saved_path() {
        let launcher = GameLauncher::new(
            Arc::new(MemorySettings::new()),
            Arc::new(FixedConfig(GameConfig::default())),
            Arc::new(FakeInjector::default()),
            Arc::new(FakeProcesses::default()),
        );

        let err = launcher
            .switch_server(ServerType::Mainland, Path::new("unused"))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::NoGamePath));
    }

    #[tokio::test]
    async fn process_start_failure_is_captured() {
        let fx = Fixture::new(
            MemorySettings::new(),
            FakeInjector::default(),
            FakeProcesses {
                fail_start: true,
                ..Default::default()
            },
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(!result.success());
        assert!(matches!(result.error(), Some(LaunchError::ProcessStartFailure(_))));
        assert!(result.error_message().starts_with(GENERIC_FAILURE));
        assert!(result.detail_log().contains("access denied"));
    }

    #[tokio::test]
    async fn panics_become_failed_results() {
        let module = TempDir::new().unwrap();
        let dll = module.path().join("module.dll");
        std::fs::write(&dll, b"").unwrap();
        let fx = Fixture::new(
            MemorySettings::new().with(keys::USE_INJECTION, true),
            FakeInjector {
                dll: Some(dll),
                panic_on_launch: true,
                ..Default::default()
            },
            FakeProcesses::default(),
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        assert!(!result.success());
        assert_eq!(
            result.error(),
            Some(&LaunchError::Unhandled("native call blew up".into()))
        );
    }

    #[tokio::test]
    async fn log_lines_are_ordered_and_timestamped() {
        let fx = Fixture::new(
            MemorySettings::new(),
            FakeInjector::default(),
            FakeProcesses::default(),
        );

        let result = fx.launcher(FeatureFlags::default()).launch().await;

        let log = result.log();
        assert_eq!(log[0].text, "开始启动游戏");
        assert!(log.windows(2).all(|pair| pair[0].at <= pair[1].at));
        assert!(result.detail_log().starts_with('['));
    }

    #[tokio::test]
    async fn injection_preference_write_is_skipped_when_unchanged() {
        let settings = Arc::new(MemorySettings::new());
        let launcher = GameLauncher::new(
            settings.clone(),
            Arc::new(FixedConfig(GameConfig::default())),
            Arc::new(FakeInjector::default()),
            Arc::new(FakeProcesses::default()),
        );

        launcher.set_use_injection(false).await.unwrap();
        assert!(settings.read(keys::USE_INJECTION).await.is_none());

        launcher.set_use_injection(true).await.unwrap();
        assert_eq!(settings.read(keys::USE_INJECTION).await, Some(Value::Bool(true)));
        assert!(launcher.use_injection().await);
    }

    #[tokio::test]
    async fn saved_game_path_is_normalized() {
        let dir = TempDir::new().unwrap();
        let launcher = GameLauncher::new(
            Arc::new(MemorySettings::new()),
            Arc::new(FixedConfig(GameConfig::default())),
            Arc::new(FakeInjector::default()),
            Arc::new(FakeProcesses::default()),
        );

        launcher
            .save_game_path(&format!("\" {} \"", dir.path().display()))
            .await
            .unwrap();

        assert_eq!(launcher.game_path().await, dir.path().display().to_string());
        assert!(launcher.is_game_path_selected().await);
    }
}
