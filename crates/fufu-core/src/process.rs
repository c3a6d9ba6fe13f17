use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::info;

use crate::error::{CoreError, CoreResult};

/// What to start and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSpec {
    pub program: PathBuf,
    /// Passed through as one command-line string.
    pub args: String,
    pub working_dir: Option<PathBuf>,
    /// No window for console tools.
    pub hidden: bool,
}

impl StartSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: String::new(),
            working_dir: None,
            hidden: false,
        }
    }

    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Working directory = the program's own directory.
    pub fn in_own_dir(self) -> Self {
        match self.program.parent().map(Path::to_path_buf) {
            Some(dir) if !dir.as_os_str().is_empty() => self.working_dir(dir),
            _ => self,
        }
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Starts a program the way the shell "open" verb would, so manifests
    /// asking for elevation and `.lnk` shortcuts are honoured.
    fn shell_open(&self, spec: &StartSpec) -> CoreResult<()>;
    /// Pids of running processes whose image name matches `name`
    /// (with or without `.exe`, case-insensitive).
    fn processes_named(&self, name: &str) -> Vec<u32>;
    /// Kills `pid` and waits for it to go away.
    async fn terminate(&self, pid: u32) -> CoreResult<()>;
}

#[derive(Clone, Default)]
pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> Self {
        Self
    }

    /// Whether starts go through the shell "open" verb (elevation prompts,
    /// `.lnk` shortcuts) rather than a direct process spawn.
    pub fn uses_shell_verb() -> bool {
        cfg!(all(windows, feature = "windows-native"))
    }
}

fn image_stem(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".exe") => {
            &name[..cut]
        }
        _ => name,
    }
}

pub(crate) fn same_image(process_name: &str, wanted: &str) -> bool {
    image_stem(process_name).eq_ignore_ascii_case(image_stem(wanted))
}

#[cfg(all(windows, feature = "windows-native"))]
fn shell_execute(spec: &StartSpec) -> CoreResult<()> {
    use std::os::windows::ffi::OsStrExt;
    use windows::core::PCWSTR;
    use windows::Win32::UI::Shell::{ShellExecuteExW, SHELLEXECUTEINFOW};
    use windows::Win32::UI::WindowsAndMessaging::{SW_HIDE, SW_SHOWNORMAL};

    fn wide(s: &std::ffi::OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let verb = wide(std::ffi::OsStr::new("open"));
    let file = wide(spec.program.as_os_str());
    let params = wide(std::ffi::OsStr::new(&spec.args));
    let dir = spec.working_dir.as_ref().map(|d| wide(d.as_os_str()));

    let mut sei = SHELLEXECUTEINFOW::default();
    sei.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
    sei.lpVerb = PCWSTR(verb.as_ptr());
    sei.lpFile = PCWSTR(file.as_ptr());
    sei.lpParameters = PCWSTR(params.as_ptr());
    sei.lpDirectory = dir
        .as_ref()
        .map(|d| PCWSTR(d.as_ptr()))
        .unwrap_or(PCWSTR::null());
    let show = if spec.hidden { SW_HIDE } else { SW_SHOWNORMAL };
    sei.nShow = show.0 as i32;

    unsafe { ShellExecuteExW(&mut sei) }
        .map_err(|e| CoreError::Process(format!("ShellExecuteExW failed: {}", e.message())))
}

#[cfg(not(all(windows, feature = "windows-native")))]
fn shell_execute(spec: &StartSpec) -> CoreResult<()> {
    let mut cmd = std::process::Command::new(&spec.program);
    if !spec.args.trim().is_empty() {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.raw_arg(&spec.args);
        }
        #[cfg(not(windows))]
        {
            let args = shlex::split(&spec.args).unwrap_or_else(|| {
                spec.args.split_whitespace().map(str::to_string).collect()
            });
            cmd.args(args);
        }
    }
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        if spec.hidden {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
    }
    let child = cmd
        .spawn()
        .map_err(|e| CoreError::Process(format!("{}: {}", spec.program.display(), e)))?;
    tracing::debug!("[进程] 已创建 pid={}", child.id());
    Ok(())
}

fn kill_and_wait(pid: u32) -> CoreResult<()> {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = sys
        .process(pid)
        .ok_or_else(|| CoreError::Process(format!("process {} not found", pid)))?;
    if !process.kill() {
        return Err(CoreError::Process(format!("failed to kill {}", pid)));
    }
    let _ = process.wait();
    Ok(())
}

#[async_trait]
impl ProcessLauncher for ProcessManager {
    fn shell_open(&self, spec: &StartSpec) -> CoreResult<()> {
        info!(
            "[进程] 启动 {} args='{}' cwd={:?}",
            spec.program.display(),
            spec.args,
            spec.working_dir
        );
        shell_execute(spec)
    }

    fn processes_named(&self, name: &str) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys.processes()
            .iter()
            .filter(|(_, process)| same_image(&process.name().to_string_lossy(), name))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    async fn terminate(&self, pid: u32) -> CoreResult<()> {
        tokio::task::spawn_blocking(move || kill_and_wait(pid))
            .await
            .map_err(|e| CoreError::Process(format!("terminate task for {}: {}", pid, e)))?
    }
}
