use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

use crate::context::{CancelToken, RunContext};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Exited(CommandOutput),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CommandRunAs {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunOptions {
    pub run_as: Option<CommandRunAs>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let outcome = run_until(
        cmd,
        args,
        &CommandRunOptions::default(),
        RunContext::new().child_deadline(timeout),
        &CancelToken::new(),
    )?;
    match outcome {
        RunOutcome::Exited(output) => Ok(output),
        RunOutcome::TimedOut => Err(anyhow!("タイムアウトしました（{timeout:?}）: {cmd}")),
        RunOutcome::Cancelled => Err(anyhow!("中断されました: {cmd}")),
    }
}

/// Runs `cmd` until it exits, `deadline` passes or `cancel` fires. The child
/// gets its own process group, which is killed on timeout and again after a
/// normal exit so background jobs cannot hold the output pipes open.
pub fn run_until(
    cmd: &str,
    args: &[&str],
    options: &CommandRunOptions,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }
    for (k, v) in &options.env {
        command.env(k, v);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        if let Some(run_as) = &options.run_as {
            command.uid(run_as.uid);
            command.gid(run_as.gid);
        }
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("プロセス起動に失敗しました: {cmd}"))?;

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let status = loop {
        if cancel.is_cancelled() {
            kill_tree(&mut child);
            drain(stdout, stderr);
            return Ok(RunOutcome::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            kill_tree(&mut child);
            drain(stdout, stderr);
            return Ok(RunOutcome::TimedOut);
        }
        let slice = std::cmp::min(deadline - now, POLL_INTERVAL);
        if let Some(status) = child
            .wait_timeout(slice)
            .with_context(|| format!("プロセス待機に失敗しました: {cmd}"))?
        {
            break status;
        }
    };

    kill_group(child.id());
    while !reader_done(&stdout) || !reader_done(&stderr) {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        if Instant::now() >= deadline {
            return Ok(RunOutcome::TimedOut);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    Ok(RunOutcome::Exited(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    }))
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn reader_done(handle: &Option<JoinHandle<String>>) -> bool {
    handle.as_ref().is_none_or(JoinHandle::is_finished)
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn drain(stdout: Option<JoinHandle<String>>, stderr: Option<JoinHandle<String>>) {
    let _ = join_reader(stdout);
    let _ = join_reader(stderr);
}

fn kill_group(pid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[derive(Debug, Clone)]
pub struct InvokingUser {
    pub uid: u32,
    pub gid: u32,
    pub username: Option<String>,
    pub home_dir: PathBuf,
}

pub fn invoking_user() -> Option<InvokingUser> {
    let uid = std::env::var("SUDO_UID").ok()?.parse::<u32>().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.parse::<u32>().ok()?;
    let username = std::env::var("SUDO_USER").ok();
    let home_dir = home_dir_for_uid(uid)?;

    Some(InvokingUser {
        uid,
        gid,
        username,
        home_dir,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    if let Some(user) = invoking_user() {
        return Ok(user.home_dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

/// Options that drop privileges back to the user who ran `sudo bootdiag`.
/// Plain options when not running under sudo.
pub fn invoking_user_options(cwd: Option<PathBuf>) -> CommandRunOptions {
    let Some(user) = invoking_user() else {
        return CommandRunOptions {
            cwd,
            ..CommandRunOptions::default()
        };
    };

    let mut env = vec![("HOME".to_string(), user.home_dir.display().to_string())];
    if let Some(name) = user.username.clone() {
        env.push(("USER".to_string(), name.clone()));
        env.push(("LOGNAME".to_string(), name));
    }

    CommandRunOptions {
        run_as: Some(CommandRunAs {
            uid: user.uid,
            gid: user.gid,
        }),
        env,
        cwd,
    }
}

#[cfg(unix)]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Runs `sudo -v` on the terminal so that later `sudo -n` calls find a cached
/// credential. This is the only place bootdiag lets sudo prompt.
pub fn validate_sudo() -> Result<()> {
    let status = Command::new("sudo")
        .arg("-v")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("sudo の起動に失敗しました")?;
    if !status.success() {
        return Err(anyhow!("sudo の認証に失敗しました"));
    }
    Ok(())
}

#[cfg(unix)]
fn home_dir_for_uid(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;

    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() {
            return None;
        }
        if pwd.pw_dir.is_null() {
            return None;
        }

        let dir = CStr::from_ptr(pwd.pw_dir).to_string_lossy().to_string();
        if dir.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(dir))
    }
}

#[cfg(not(unix))]
fn home_dir_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

/// A value that changes on every reboot.
pub fn boot_marker() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        return crate::platform::linux::boot_marker();
    }

    #[cfg(target_os = "macos")]
    {
        return crate::platform::macos::boot_marker(Duration::from_secs(2));
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        return None;
    }
}

/// `btime` from `/proc/stat`.
pub fn parse_proc_stat_btime(stat: &str) -> Option<u64> {
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|rest| rest.trim().parse::<u64>().ok())
}

/// `sec` from `sysctl -n kern.boottime`, e.g. `{ sec = 1767225600, usec = 0 } ...`.
pub fn parse_kern_boottime(stdout: &str) -> Option<u64> {
    let idx = stdout.find("sec =")?;
    let rest = &stdout[idx + "sec =".len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u64>().ok()
}

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;
