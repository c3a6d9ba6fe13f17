pub mod config;
pub mod error;
pub mod hooks;
pub mod injector;
pub mod launcher;
pub mod logging;
pub mod paths;
pub mod process;
pub mod server;
pub mod settings;

pub use config::{
    ConfigSource, FeatureFlag, FeatureFlags, FufuConfigReader, GameConfig, ServerType,
};
pub use error::{CoreError, CoreResult, LaunchError};
pub use hooks::{CompanionRoots, HookOutcome, StopOutcome};
pub use injector::{InjectorClient, MissingInjector, NativeInjector};
pub use launcher::{GameLauncher, LaunchResult, LaunchStage};
pub use process::{ProcessLauncher, ProcessManager, StartSpec};
pub use server::{SdkChange, SwitchError, SwitchOutcome};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
