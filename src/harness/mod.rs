//! Integration-test harness for a running Upstart
//!
//! Drives an already-running init (PID 1 or a Session Init) over D-Bus:
//! creates job configuration files in a private test directory, waits for
//! Upstart to register them, starts and stops instances, and tears
//! everything down again.
//!
//! # Limitations
//!
//! Override files are not supported. [`Upstart::test_dir`] tells you where
//! to create one, but after creating a `.override` file you must wait for
//! Upstart to re-parse the job yourself.

mod instance;
mod job;
mod logfile;
pub mod logging;
mod session;
mod wait;

pub use instance::JobInstance;
pub use job::{Job, SINGLE_INSTANCE};
pub use logfile::LogFile;
pub use session::{
    list_sessions, parse_sessions, SessionOptions, DEFAULT_LOGFILE, DEFAULT_SESSION_INSTALL_PATH,
    SESSION_DIR_FMT,
};
pub use wait::wait_for_file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_lite::StreamExt;
use tempfile::TempDir;
use tokio::process::Command;
use zbus::Connection;

use crate::config::HarnessConfig;
use crate::dbus::{self, INIT_SOCKET};
use crate::state::{Session, UpstartState};
use job::JobLocation;
use session::SpawnedSession;

pub const VERSION: &str = "0.1";

/// Prefix of every directory the harness creates
pub const NAME: &str = "TestUpstart";

pub const SYSTEM_JOB_DIR: &str = "/etc/init";
pub const SYSTEM_LOG_DIR: &str = "/var/log/upstart";

/// Which init the harness is driving
#[derive(Debug)]
enum Flavour {
    /// Upstart running as PID 1
    System,
    /// The user's existing Session Init
    JoinedSession,
    /// A Session Init started by the harness
    SpawnedSession(SpawnedSession),
}

/// Handle to a running Upstart
#[derive(Debug)]
pub struct Upstart {
    flavour: Flavour,
    config: HarnessConfig,
    address: String,
    conf_dir: PathBuf,
    log_dir: PathBuf,
    test_dir: Option<TempDir>,
    test_dir_name: String,
    connection: Option<Connection>,
    jobs: Vec<Job>,
}

impl Upstart {
    /// Attach to Upstart running as PID 1 via its private socket
    pub async fn system(config: HarnessConfig) -> Result<Self, UpstartError> {
        let mut upstart = Self::new(
            Flavour::System,
            config,
            INIT_SOCKET.to_string(),
            PathBuf::from(SYSTEM_JOB_DIR),
            PathBuf::from(SYSTEM_LOG_DIR),
        );
        if let Err(e) = upstart.setup().await {
            if let Err(cleanup) = upstart.destroy().await {
                log::warn!("Cleanup after failed setup: {}", cleanup);
            }
            return Err(e);
        }
        Ok(upstart)
    }

    /// Start a new Session Init, or join the existing one
    pub async fn session(
        config: HarnessConfig,
        options: SessionOptions,
    ) -> Result<Self, UpstartError> {
        let mut upstart = if options.join {
            let (address, conf_dir, log_dir) = session::join(&config).await?;
            Self::new(Flavour::JoinedSession, config, address, conf_dir, log_dir)
        } else {
            let spawned = session::spawn(&config, &options).await?;
            let address = spawned.address().to_string();
            let conf_dir = spawned.conf_dir().to_path_buf();
            let log_dir = spawned.log_dir().to_path_buf();
            Self::new(
                Flavour::SpawnedSession(spawned),
                config,
                address,
                conf_dir,
                log_dir,
            )
        };

        if let Err(e) = upstart.setup().await {
            if let Err(cleanup) = upstart.destroy().await {
                log::warn!("Cleanup after failed setup: {}", cleanup);
            }
            return Err(e);
        }
        Ok(upstart)
    }

    fn new(
        flavour: Flavour,
        config: HarnessConfig,
        address: String,
        conf_dir: PathBuf,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            flavour,
            config,
            address,
            conf_dir,
            log_dir,
            test_dir: None,
            test_dir_name: String::new(),
            connection: None,
            jobs: Vec::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// D-Bus address of the init's private socket
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Job configuration file directory
    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    /// Job log file directory
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Directory below `conf_dir` holding the test jobs
    pub fn test_dir(&self) -> Option<&Path> {
        self.test_dir.as_ref().map(|dir| dir.path())
    }

    /// `test_dir` relative to `conf_dir`
    pub fn test_dir_name(&self) -> &str {
        &self.test_dir_name
    }

    /// Pid of a Session Init started by the harness
    pub fn pid(&self) -> Option<u32> {
        match &self.flavour {
            Flavour::SpawnedSession(spawned) => Some(spawned.pid()),
            _ => None,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    async fn setup(&mut self) -> Result<(), UpstartError> {
        self.create_dirs()?;
        self.set_test_dir()?;
        self.connect(false).await
    }

    /// Create the directories that hold job configuration and job logs
    fn create_dirs(&self) -> Result<(), UpstartError> {
        for dir in [&self.conf_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Create the private test job directory beneath the conf dir
    fn set_test_dir(&mut self) -> Result<(), UpstartError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", NAME))
            .tempdir_in(&self.conf_dir)?;

        self.test_dir_name = relative_dir(&self.conf_dir, dir.path());
        log::debug!("Test jobs live in {}", dir.path().display());
        self.test_dir = Some(dir);
        Ok(())
    }

    fn connection(&self) -> Result<&Connection, UpstartError> {
        self.connection.as_ref().ok_or(UpstartError::NotConnected)
    }

    /// Connect to Upstart. Fails if already connected unless `force` is set.
    pub async fn connect(&mut self, force: bool) -> Result<(), UpstartError> {
        if self.connection.is_some() && !force {
            return Err(UpstartError::AlreadyConnected);
        }

        let connection = dbus::connect_address(&self.address).await?;
        log::debug!("Connected to Upstart at {}", self.address);
        self.connection = Some(connection);
        Ok(())
    }

    /// Forcibly reconnect
    pub async fn reconnect(&mut self) -> Result<(), UpstartError> {
        self.connect(true).await
    }

    /// Try to connect once a second for up to `timeout`.
    ///
    /// A re-exec is fast but takes an indeterminate amount of time, so
    /// this is the way back in after [`Upstart::reexec`].
    pub async fn polling_connect(
        &mut self,
        timeout: Duration,
        force: bool,
    ) -> Result<(), UpstartError> {
        let attempts = timeout.as_secs();

        for attempt in 0..attempts {
            let result = match self.connect(force).await {
                Ok(()) => self.version(true).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(UpstartError::Dbus(e)) => {
                    log::debug!("Reconnect attempt {} failed: {}", attempt + 1, e);
                    self.connection = None;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(UpstartError::ReconnectTimeout(attempts))
    }

    /// Emit `event` with optional environment (`KEY=VALUE` entries).
    ///
    /// With `wait` set the call returns once the event has been fully
    /// handled.
    pub async fn emit(&self, event: &str, env: &[&str], wait: bool) -> Result<(), UpstartError> {
        let proxy = dbus::manager_proxy(self.connection()?).await?;
        log::debug!("Emitting {} {:?}", event, env);
        proxy.emit_event(event, env, wait).await?;
        Ok(())
    }

    /// Version of the running Upstart: "x.y", or the full string if `raw`
    pub async fn version(&self, raw: bool) -> Result<String, UpstartError> {
        let proxy = dbus::manager_proxy(self.connection()?).await?;
        let version = proxy.version().await?;
        if raw {
            return Ok(version);
        }
        parse_version(&version)
    }

    /// Internal state as a JSON string
    pub async fn get_state_json(&self) -> Result<String, UpstartError> {
        let proxy = dbus::manager_proxy(self.connection()?).await?;
        Ok(proxy.get_state().await?)
    }

    pub async fn get_state(&self) -> Result<UpstartState, UpstartError> {
        let json = self.get_state_json().await?;
        Ok(UpstartState::from_json(&json)?)
    }

    /// Chroot sessions known to Upstart
    pub async fn get_sessions(&self) -> Result<Vec<Session>, UpstartError> {
        Ok(self.get_state().await?.sessions)
    }

    pub async fn session_count(&self) -> Result<usize, UpstartError> {
        Ok(self.get_sessions().await?.len())
    }

    pub async fn sessions_exist(&self) -> Result<bool, UpstartError> {
        Ok(self.session_count().await? > 0)
    }

    /// Ask Upstart to re-exec itself.
    ///
    /// The connection is severed by the re-exec; use
    /// [`Upstart::polling_connect`] afterwards.
    pub async fn reexec(&self) -> Result<(), UpstartError> {
        let connection = self.connection()?;

        match self.flavour {
            Flavour::System => {
                // the official system interface
                let status = Command::new(&self.config.telinit).arg("u").status().await?;
                if !status.success() {
                    return Err(UpstartError::CommandFailed {
                        command: format!("{} u", self.config.telinit.display()),
                        status: status.to_string(),
                    });
                }
                Ok(())
            }
            Flavour::JoinedSession | Flavour::SpawnedSession(_) => {
                let proxy = dbus::manager_proxy(connection).await?;
                proxy.restart().await?;
                Ok(())
            }
        }
    }

    fn job_location(&self) -> Result<JobLocation, UpstartError> {
        let job_dir = self.test_dir().ok_or(UpstartError::NoTestDir)?.to_path_buf();
        Ok(JobLocation {
            job_dir,
            subdir_name: self.test_dir_name.clone(),
            log_dir: self.log_dir.clone(),
        })
    }

    /// Create a job configuration file and wait for Upstart to register it.
    ///
    /// The `JobAdded` subscription is in place before the file is written,
    /// so the registration cannot be missed. If Upstart does not announce
    /// the job within the job wait (for example because the file does not
    /// parse), this fails with [`UpstartError::JobNotRegistered`].
    ///
    /// With `retain` set the .conf file survives [`Job::destroy`], which
    /// lets a job outlive a re-exec.
    pub async fn job_create(
        &mut self,
        name: &str,
        body: &str,
        retain: bool,
    ) -> Result<Job, UpstartError> {
        let connection = self.connection()?.clone();
        let location = self.job_location()?;
        let expected = job::job_path(&location.subdir_name, name);

        let mut added = dbus::job_added_stream(&connection).await?;

        let job = Job::create(connection, location, name, body, retain).await?;

        let wait = self.config.job_wait;
        let seen = tokio::time::timeout(wait, async {
            while let Some(path) = added.next().await {
                if path.as_str() == expected {
                    return true;
                }
                log::debug!("Ignoring JobAdded for {}", path.as_str());
            }
            false
        })
        .await
        .unwrap_or(false);

        if !seen {
            // leave no half-registered job behind
            if let Err(e) = job.destroy().await {
                log::warn!("Failed to clean up job {}: {}", name, e);
            }
            return Err(UpstartError::JobNotRegistered {
                name: name.to_string(),
                secs: wait.as_secs(),
            });
        }

        log::debug!("Job {} registered as {}", name, expected);
        self.jobs.push(job.clone());
        Ok(job)
    }

    /// [`Upstart::job_create`] with the body given as separate lines
    pub async fn job_create_lines(
        &mut self,
        name: &str,
        lines: &[&str],
        retain: bool,
    ) -> Result<Job, UpstartError> {
        self.job_create(name, &lines.join("\n"), retain).await
    }

    /// Rebuild a handle for a job whose .conf file already exists.
    ///
    /// Used after a re-exec, which severs the connection old handles use.
    pub fn job_recreate(&mut self, name: &str, conf_path: &Path) -> Result<Job, UpstartError> {
        let connection = self.connection()?.clone();
        let location = self.job_location()?;

        let job = Job::from_conffile(connection, location, name, conf_path.to_path_buf(), false);
        self.jobs.push(job.clone());
        Ok(job)
    }

    /// Destroy all jobs and the test directory, then disconnect. A Session
    /// Init started by the harness is terminated and its directories removed.
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned.
    pub async fn destroy(mut self) -> Result<(), UpstartError> {
        let mut first_error: Option<UpstartError> = None;

        for job in std::mem::take(&mut self.jobs) {
            if let Err(e) = job.destroy().await {
                log::warn!("Failed to destroy job {}: {}", job.name(), e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(dir) = self.test_dir.take() {
            if let Err(e) = dir.close() {
                first_error.get_or_insert(e.into());
            }
        }

        self.connection = None;

        if let Flavour::SpawnedSession(spawned) = self.flavour {
            if let Err(e) = spawned.stop().await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// "init (upstart 1.13)" -> "1.13"
fn parse_version(raw: &str) -> Result<String, UpstartError> {
    raw.split_whitespace()
        .nth(2)
        .map(|v| v.trim_end_matches(')').to_string())
        .ok_or_else(|| UpstartError::BadVersion(raw.to_string()))
}

fn relative_dir(base: &Path, dir: &Path) -> String {
    dir.strip_prefix(base)
        .unwrap_or(dir)
        .to_string_lossy()
        .into_owned()
}

#[derive(Debug, thiserror::Error)]
pub enum UpstartError {
    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not yet connected")]
    NotConnected,

    #[error("Failed to reconnect to Upstart after {0} seconds")]
    ReconnectTimeout(u64),

    #[error("No body specified")]
    EmptyBody,

    #[error("No test directory")]
    NoTestDir,

    #[error("Job {name} not registered within {secs} seconds")]
    JobNotRegistered { name: String, secs: u64 },

    #[error("Cannot handle multiple instances")]
    MultipleInstances,

    #[error("Unknown job instance: {0}")]
    UnknownInstance(String),

    #[error("Multiple existing sessions")]
    MultipleSessions,

    #[error("No existing session")]
    NoSession,

    #[error("Timed-out waiting for session file after {0} seconds")]
    SessionFileTimeout(u64),

    #[error("Session with pid {0} not found")]
    SessionNotFound(u32),

    #[error("Session Init exited during startup")]
    SessionExited,

    #[error("Malformed session line: {0}")]
    MalformedSession(String),

    #[error("Unexpected version string: {0}")]
    BadVersion(String),

    #[error("{0} is not set")]
    MissingEnv(&'static str),

    #[error("{command} failed: {status}")]
    CommandFailed { command: String, status: String },

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("Signal delivery failed: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("Invalid state: {0}")]
    State(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
