//! Binding to the native launch-and-inject library (`Launcher.dll`).
//!
//! The library keeps the feature flags in shared memory that the injected
//! module reads at startup, so `UpdateConfig` has to land before
//! `LaunchGameAndInject`. [`StagedInjection`] encodes that order: the only
//! way to reach `launch` is through a value that already pushed the config.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::FeatureFlags;
use crate::error::LaunchError;

pub const INJECTOR_LIBRARY: &str = "Launcher.dll";

const OUT_BUFFER_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("missing export {name}: {source}")]
    MissingExport {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// Flat record pushed into the native library before each inject attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorConfig {
    pub game_exe: PathBuf,
    pub flags: FeatureFlags,
}

/// Raw result of `LaunchGameAndInject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectOutcome {
    pub code: i32,
    pub message: String,
    pub pid: u32,
}

pub trait InjectorClient: Send + Sync {
    fn validate_game_path(&self, path: &Path) -> bool;
    fn validate_dll_path(&self, path: &Path) -> bool;
    /// Returns `None` when the library cannot name a module.
    fn default_dll_path(&self) -> Option<PathBuf>;
    /// Fire-and-forget: the library gives no acknowledgment.
    fn update_config(&self, config: &InjectorConfig);
    fn launch_and_inject(&self, game_exe: &Path, dll: &Path, args: &str) -> InjectOutcome;
}

/// An injector whose config has been pushed and which may now launch.
pub struct StagedInjection<'a> {
    client: &'a dyn InjectorClient,
    config: InjectorConfig,
}

impl<'a> StagedInjection<'a> {
    pub fn stage(client: &'a dyn InjectorClient, config: InjectorConfig) -> Self {
        client.update_config(&config);
        debug!("[注入] 配置已同步到共享内存");
        Self { client, config }
    }

    pub fn default_dll_path(&self) -> Option<PathBuf> {
        self.client.default_dll_path()
    }

    /// Starts the game with `dll` injected. Returns the process id.
    pub fn launch(self, dll: &Path, args: &str) -> Result<u32, LaunchError> {
        let outcome = self
            .client
            .launch_and_inject(&self.config.game_exe, dll, args);
        if outcome.code == 0 {
            info!("[注入] 注入成功，PID: {}", outcome.pid);
            Ok(outcome.pid)
        } else {
            Err(LaunchError::InjectionFailure {
                code: outcome.code,
                message: outcome.message,
            })
        }
    }
}

/// Stand-in used when `Launcher.dll` could not be loaded. It never names a
/// module, so every inject request degrades to a plain start.
#[derive(Debug, Default)]
pub struct MissingInjector;

impl InjectorClient for MissingInjector {
    fn validate_game_path(&self, _path: &Path) -> bool {
        false
    }

    fn validate_dll_path(&self, _path: &Path) -> bool {
        false
    }

    fn default_dll_path(&self) -> Option<PathBuf> {
        None
    }

    fn update_config(&self, _config: &InjectorConfig) {}

    fn launch_and_inject(&self, _game_exe: &Path, _dll: &Path, _args: &str) -> InjectOutcome {
        InjectOutcome {
            code: -1,
            message: format!("{} 未加载", INJECTOR_LIBRARY),
            pid: 0,
        }
    }
}

type ValidatePathFn = unsafe extern "C" fn(*const u16) -> u8;
type LaunchAndInjectFn =
    unsafe extern "C" fn(*const u16, *const u16, *const u16, *mut u16, i32) -> i32;
type DefaultDllPathFn = unsafe extern "C" fn(*mut u16, i32) -> i32;
type UpdateConfigFn = unsafe extern "C" fn(
    *const u16,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
    i32,
);

/// `Launcher.dll` loaded through `libloading`. Exports are resolved once at
/// load time; the library stays mapped for the lifetime of this value.
pub struct NativeInjector {
    validate_game_path: ValidatePathFn,
    validate_dll_path: ValidatePathFn,
    launch_and_inject: LaunchAndInjectFn,
    default_dll_path: DefaultDllPathFn,
    update_config: UpdateConfigFn,
    _library: Library,
}

fn export<T: Copy>(library: &Library, name: &'static str) -> Result<T, InjectorError> {
    let symbol = format!("{name}\0");
    // SAFETY: the type aliases above mirror the library's cdecl exports.
    unsafe {
        library
            .get::<T>(symbol.as_bytes())
            .map(|sym| *sym)
            .map_err(|source| InjectorError::MissingExport { name, source })
    }
}

impl NativeInjector {
    pub fn load(path: &Path) -> Result<Self, InjectorError> {
        // SAFETY: loading runs the library's initializers; Launcher.dll has no
        // side effects beyond setting up its shared-memory section.
        let library = unsafe { Library::new(path) }.map_err(|source| InjectorError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let injector = Self {
            validate_game_path: export(&library, "ValidateGamePathInternal")?,
            validate_dll_path: export(&library, "ValidateDllPathInternal")?,
            launch_and_inject: export(&library, "LaunchGameAndInject")?,
            default_dll_path: export(&library, "GetDefaultDllPath")?,
            update_config: export(&library, "UpdateConfig")?,
            _library: library,
        };
        info!("[注入] 已加载 {}", path.display());
        Ok(injector)
    }

    /// Loads `Launcher.dll` from next to the running executable.
    pub fn load_default() -> Result<Self, InjectorError> {
        let path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(INJECTOR_LIBRARY)))
            .unwrap_or_else(|| PathBuf::from(INJECTOR_LIBRARY));
        Self::load(&path)
    }
}

fn to_wide(s: &OsStr) -> Vec<u16> {
    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        s.encode_wide().chain(std::iter::once(0)).collect()
    }
    #[cfg(not(windows))]
    {
        s.to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect()
    }
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// On success the library writes the pid into the message buffer.
fn decode_launch_outcome(code: i32, raw: String) -> InjectOutcome {
    if code == 0 {
        if let Ok(pid) = raw.trim().parse::<u32>() {
            return InjectOutcome {
                code,
                message: String::new(),
                pid,
            };
        }
    }
    InjectOutcome {
        code,
        message: raw,
        pid: 0,
    }
}

impl InjectorClient for NativeInjector {
    fn validate_game_path(&self, path: &Path) -> bool {
        let wide = to_wide(path.as_os_str());
        unsafe { (self.validate_game_path)(wide.as_ptr()) != 0 }
    }

    fn validate_dll_path(&self, path: &Path) -> bool {
        let wide = to_wide(path.as_os_str());
        unsafe { (self.validate_dll_path)(wide.as_ptr()) != 0 }
    }

    fn default_dll_path(&self) -> Option<PathBuf> {
        let mut buf = vec![0u16; OUT_BUFFER_LEN];
        let code = unsafe { (self.default_dll_path)(buf.as_mut_ptr(), buf.len() as i32) };
        if code != 0 {
            debug!("[注入] GetDefaultDllPath 返回 {}", code);
            return None;
        }
        let path = from_wide(&buf);
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    fn update_config(&self, config: &InjectorConfig) {
        let game = to_wide(config.game_exe.as_os_str());
        let f = &config.flags;
        let b = |v: bool| v as i32;
        unsafe {
            (self.update_config)(
                game.as_ptr(),
                b(f.hide_quest_banner),
                b(f.disable_damage_text),
                b(f.use_touch_screen),
                b(f.disable_event_camera_move),
                b(f.remove_team_progress),
                b(f.redirect_combine_entry),
                b(f.resin_000106),
                b(f.resin_000201),
                b(f.resin_107009),
                b(f.resin_107012),
                b(f.resin_220007),
            );
        }
    }

    fn launch_and_inject(&self, game_exe: &Path, dll: &Path, args: &str) -> InjectOutcome {
        let game = to_wide(game_exe.as_os_str());
        let dll = to_wide(dll.as_os_str());
        let args = to_wide(OsStr::new(args));
        let mut buf = vec![0u16; OUT_BUFFER_LEN];
        let code = unsafe {
            (self.launch_and_inject)(
                game.as_ptr(),
                dll.as_ptr(),
                args.as_ptr(),
                buf.as_mut_ptr(),
                buf.len() as i32,
            )
        };
        decode_launch_outcome(code, from_wide(&buf))
    }
}
