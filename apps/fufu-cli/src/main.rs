//! Command-line front end for the launcher core.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use fufu_core::config::read_game_ini;
use fufu_core::paths::{discover_install_dir, resolve_executable, resolve_game_dir};
use fufu_core::server::default_sdk_source;
use fufu_core::{
    logging, ConfigSource, FufuConfigReader, GameLauncher, InjectorClient, JsonFileSettings,
    MissingInjector, NativeInjector, ProcessManager, SdkChange, ServerType, StopOutcome,
};
use tracing::warn;

#[derive(Parser)]
#[command(name = "fufu")]
#[command(about = "Launches the game with optional module injection")]
#[command(version)]
struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Feature flag file (defaults to Documents/fufu/FufuConfig.cfg)
    #[arg(long, global = true)]
    flags_file: Option<PathBuf>,

    /// Also write logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the game using the saved settings
    Launch,
    /// Close BetterGI if it is configured to close with the launcher
    StopCompanion,
    /// Show the feature flags that would be pushed to the injector
    Flags {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look for an installation in the registry and common locations
    Detect {
        /// Save the detected directory as the game path
        #[arg(long)]
        save: bool,
        /// Print the detected version and server as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save the game installation directory
    SetPath { path: String },
    /// Turn injection on or off
    SetInjection {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Save extra command-line parameters for the game
    SetParams { params: String },
    /// Check the saved path and the injector module
    Validate,
    /// Switch the saved installation between the official and Bilibili servers
    SwitchServer {
        #[arg(value_enum)]
        target: ServerArg,
        /// PCGameSDK.dll to deploy (defaults to Assets/PCGameSDK.dll next to fufu)
        #[arg(long)]
        sdk: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ServerArg {
    Official,
    Bilibili,
}

impl From<ServerArg> for ServerType {
    fn from(arg: ServerArg) -> Self {
        match arg {
            ServerArg::Official => ServerType::Mainland,
            ServerArg::Bilibili => ServerType::Bilibili,
        }
    }
}

fn load_injector() -> Arc<dyn InjectorClient> {
    match NativeInjector::load_default() {
        Ok(injector) => Arc::new(injector),
        Err(e) => {
            warn!("[注入] {}，将使用普通启动", logging::format_error_chain(&e));
            Arc::new(MissingInjector)
        }
    }
}

fn build_launcher(args: &Args) -> anyhow::Result<GameLauncher> {
    let settings = match &args.settings {
        Some(path) => JsonFileSettings::new(path.clone()),
        None => JsonFileSettings::default_location().context("locating settings file")?,
    };
    let config = match &args.flags_file {
        Some(path) => FufuConfigReader::new(path.clone()),
        None => FufuConfigReader::default_location().context("locating FufuConfig.cfg")?,
    };
    Ok(GameLauncher::new(
        Arc::new(settings),
        Arc::new(config) as Arc<dyn ConfigSource>,
        load_injector(),
        Arc::new(ProcessManager::new()),
    ))
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let launcher = build_launcher(&args)?;

    match args.command {
        Command::Launch => {
            let result = launcher.launch().await;
            print!("{}", result.detail_log());
            if !result.success() {
                eprintln!("{}", result.error_message());
                return Ok(ExitCode::FAILURE);
            }
            if let Some(pid) = result.pid() {
                println!("pid: {pid}");
            }
        }
        Command::StopCompanion => match launcher.stop_companions().await? {
            StopOutcome::Disabled => println!("BetterGI 未设置随启动器关闭"),
            StopOutcome::Terminated { found, killed } => {
                println!("已终止 {killed}/{found} 个 BetterGI 进程")
            }
            StopOutcome::TaskKillSent => println!("已发送 taskkill 指令"),
        },
        Command::Flags { json } => {
            let reader = match &args.flags_file {
                Some(path) => FufuConfigReader::new(path.clone()),
                None => FufuConfigReader::default_location()?,
            };
            let flags = reader
                .read_flags()
                .await
                .with_context(|| format!("reading {}", reader.flags_path().display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&flags)?);
            } else {
                for (flag, value) in flags.iter() {
                    println!("{:<24} {:<28} {}", flag.key(), flag.label(), value);
                }
            }
        }
        Command::Detect { save, json } => {
            let Some(dir) = discover_install_dir() else {
                bail!("未找到游戏安装目录");
            };
            let ini = read_game_ini(&dir).await?;
            if json {
                let report = serde_json::json!({ "path": dir, "ini": ini });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", dir.display());
                if let Some(ini) = &ini {
                    println!(
                        "版本: {} ({})",
                        ini.game_version.as_deref().unwrap_or("?"),
                        ini.server_type
                    );
                }
            }
            if save {
                launcher.save_game_path(&dir.display().to_string()).await?;
            }
        }
        Command::SetPath { path } => launcher.save_game_path(&path).await?,
        Command::SetInjection { enabled } => {
            launcher.use_injection().await;
            launcher.set_use_injection(enabled).await?;
        }
        Command::SetParams { params } => launcher.set_custom_launch_parameters(&params).await?,
        Command::Validate => {
            let path = launcher.game_path().await;
            let dir = resolve_game_dir(Some(&path)).await?;
            let exe = resolve_executable(&dir).await?;
            let injector = launcher.injector();
            println!(
                "{}: {}",
                exe.display(),
                if injector.validate_game_path(&exe) { "ok" } else { "invalid" }
            );
            match injector.default_dll_path() {
                Some(dll) => println!(
                    "{}: {}",
                    dll.display(),
                    if injector.validate_dll_path(&dll) { "ok" } else { "invalid" }
                ),
                None => println!("注入模块不可用"),
            }
        }
        Command::SwitchServer { target, sdk } => {
            let sdk = sdk.unwrap_or_else(default_sdk_source);
            let outcome = launcher.switch_server(target.into(), &sdk).await?;
            println!("已切换至 {}", outcome.server_type);
            match outcome.sdk {
                SdkChange::Deployed(path) => println!("SDK已部署: {}", path.display()),
                SdkChange::Removed(path) => println!("SDK已清理: {}", path.display()),
                SdkChange::Unchanged => {}
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}


#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match &args.log_dir {
        Some(dir) => match logging::init_file_logging(dir) {
            Ok((_, guard)) => Some(guard),
            Err(e) => {
                eprintln!("failed to open log directory: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => {
            logging::init_logging();
            None
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
