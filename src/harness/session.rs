//! Session Init management
//!
//! A test either joins the user's main session (found through
//! $UPSTART_SESSION) or starts a private Session Init with temporary
//! configuration and log directories. A new Session Init announces its
//! address by writing a file below $XDG_RUNTIME_DIR/upstart/sessions,
//! which `initctl list-sessions` then reports as `<pid> <address>`.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_lite::StreamExt;
use inotify::{Inotify, WatchMask};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::process::{Child, Command};

use super::{UpstartError, NAME};
use crate::config::HarnessConfig;
use crate::dbus::UPSTART_SESSION_ENV;

/// Directory below $XDG_RUNTIME_DIR where Session Inits write session files
pub const SESSION_DIR_FMT: &str = "upstart/sessions";

/// Where distributions install the default session jobs
pub const DEFAULT_SESSION_INSTALL_PATH: &str = "/usr/share/upstart/sessions";

/// Used to capture Session Init output
pub const DEFAULT_LOGFILE: &str = "/tmp/upstart.log";

/// How to obtain a Session Init
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Join the existing main (non-test) session instead of starting one
    pub join: bool,
    /// File to capture the Session Init's stdout and stderr
    pub capture: Option<PathBuf>,
    /// Extra arguments for a new Session Init (ignored when joining)
    pub extra: Vec<String>,
}

/// A Session Init started (and owned) by the harness.
///
/// Dropping it without [`SpawnedSession::stop`] kills the Session Init.
#[derive(Debug)]
pub(crate) struct SpawnedSession {
    child: Child,
    pid: u32,
    address: String,
    conf_path: PathBuf,
    log_path: PathBuf,
    conf_dir: Option<TempDir>,
    log_dir: Option<TempDir>,
    stopped: bool,
}

impl SpawnedSession {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_path
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_path
    }

    /// Terminate the Session Init and remove its directories.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned.
    pub async fn stop(mut self) -> Result<(), UpstartError> {
        log::debug!("Stopping Session Init running with pid {}", self.pid);
        let mut first_error: Option<UpstartError> = None;

        match kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => log::debug!("Session Init {} already exited", self.pid),
            Err(e) => {
                let _ = self.child.start_kill();
                first_error.get_or_insert(e.into());
            }
        }

        match self.child.wait().await {
            Ok(status) => log::debug!("Session Init {} exited: {}", self.pid, status),
            Err(e) => {
                first_error.get_or_insert(e.into());
            }
        }

        for dir in [self.log_dir.take(), self.conf_dir.take()].into_iter().flatten() {
            if let Err(e) = dir.close() {
                first_error.get_or_insert(e.into());
            }
        }

        self.release_env();
        self.stopped = true;

        first_error.map_or(Ok(()), Err)
    }

    fn release_env(&self) {
        if std::env::var(UPSTART_SESSION_ENV).ok().as_deref() == Some(self.address.as_str()) {
            std::env::remove_var(UPSTART_SESSION_ENV);
        }
    }
}

impl Drop for SpawnedSession {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        log::debug!("Killing abandoned Session Init {}", self.pid);
        if let Err(e) = self.child.start_kill() {
            log::debug!("Session Init {}: {}", self.pid, e);
        }
        self.release_env();
    }
}

/// Start a new Session Init and wait for it to register its session
pub(crate) async fn spawn(
    config: &HarnessConfig,
    options: &SessionOptions,
) -> Result<SpawnedSession, UpstartError> {
    let pid = std::process::id();

    let conf_dir = tempfile::Builder::new()
        .prefix(&format!("{}-confdir-{}-", NAME, pid))
        .tempdir()?;
    let log_dir = tempfile::Builder::new()
        .prefix(&format!("{}-logdir-{}-", NAME, pid))
        .tempdir()?;

    let session_dir = session_dir()?;
    std::fs::create_dir_all(&session_dir)?;

    // Watch before spawning so the session file cannot be missed
    let inotify = Inotify::init()?;
    inotify.watches().add(&session_dir, WatchMask::CREATE)?;
    let mut events = inotify.into_event_stream([0u8; 4096])?;

    let mut command = Command::new(&config.init);
    command
        .arg("--user")
        .arg("--confdir")
        .arg(conf_dir.path())
        .arg("--logdir")
        .arg(log_dir.path())
        .args(&options.extra)
        // killed on any early return
        .kill_on_drop(true);

    match &options.capture {
        Some(path) => {
            let out = File::create(path)?;
            command.stdout(Stdio::from(out.try_clone()?));
            command.stderr(Stdio::from(out));
        }
        None => {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }
    }

    log::debug!("Starting Session Init with arguments: {:?}", command.as_std());
    let child = command.spawn()?;
    let Some(child_pid) = child.id() else {
        return Err(UpstartError::SessionExited);
    };
    log::debug!("Session Init running with pid {}", child_pid);

    let secs = config.session_file_wait.as_secs();
    match tokio::time::timeout(config.session_file_wait, events.next()).await {
        Ok(Some(Ok(event))) => log::debug!("Session file created: {:?}", event.name),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) | Err(_) => return Err(UpstartError::SessionFileTimeout(secs)),
    }

    // Activity in the session directory means our Session Init has written
    // its session file (assuming no other Session Inits are starting).
    let sessions = list_sessions(&config.initctl).await?;
    let address = find_session(&sessions, child_pid)?;

    log::debug!("Created Upstart Session '{}'", address);
    std::env::set_var(UPSTART_SESSION_ENV, &address);

    Ok(SpawnedSession {
        child,
        pid: child_pid,
        address,
        conf_path: conf_dir.path().to_path_buf(),
        log_path: log_dir.path().to_path_buf(),
        conf_dir: Some(conf_dir),
        log_dir: Some(log_dir),
        stopped: false,
    })
}

/// Address, conf dir and log dir of the user's main session
pub(crate) async fn join(
    config: &HarnessConfig,
) -> Result<(String, PathBuf, PathBuf), UpstartError> {
    let sessions = list_sessions(&config.initctl).await?;
    if sessions.len() > 1 {
        return Err(UpstartError::MultipleSessions);
    }

    let address = crate::dbus::session_address().ok_or(UpstartError::NoSession)?;

    // Multiple conf file directories are supported, but stick with the default
    let conf_dir = dirs::config_dir()
        .ok_or(UpstartError::MissingEnv("XDG_CONFIG_HOME"))?
        .join("upstart");
    let log_dir = dirs::cache_dir()
        .ok_or(UpstartError::MissingEnv("XDG_CACHE_HOME"))?
        .join("upstart");

    Ok((address, conf_dir, log_dir))
}

fn session_dir() -> Result<PathBuf, UpstartError> {
    let runtime = dirs::runtime_dir().ok_or(UpstartError::MissingEnv("XDG_RUNTIME_DIR"))?;
    Ok(runtime.join(SESSION_DIR_FMT))
}

/// Running sessions as reported by `initctl list-sessions`
pub async fn list_sessions(initctl: &Path) -> Result<HashMap<u32, String>, UpstartError> {
    let output = Command::new(initctl).arg("list-sessions").output().await?;

    if !output.status.success() {
        return Err(UpstartError::CommandFailed {
            command: format!("{} list-sessions", initctl.display()),
            status: output.status.to_string(),
        });
    }

    parse_sessions(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `<pid> <address>` lines into a map of pid to address
pub fn parse_sessions(text: &str) -> Result<HashMap<u32, String>, UpstartError> {
    let mut sessions = HashMap::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [pid, address] = fields.as_slice() else {
            return Err(UpstartError::MalformedSession(line.to_string()));
        };
        let pid: u32 = pid
            .parse()
            .map_err(|_| UpstartError::MalformedSession(line.to_string()))?;
        sessions.insert(pid, address.to_string());
    }

    Ok(sessions)
}

fn find_session(sessions: &HashMap<u32, String>, pid: u32) -> Result<String, UpstartError> {
    sessions
        .get(&pid)
        .cloned()
        .ok_or(UpstartError::SessionNotFound(pid))
}
