//! Harness configuration
//!
//! Binary locations default to the installed Upstart paths and can be
//! pointed at an uninstalled build tree through the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const UPSTART: &str = "/sbin/init";
pub const INITCTL: &str = "/sbin/initctl";
pub const TELINIT: &str = "/sbin/telinit";
pub const FILE_BRIDGE: &str = "/sbin/upstart-file-bridge";

pub const INIT_ENV: &str = "UPSTART_TEST_INIT";
pub const INITCTL_ENV: &str = "UPSTART_TEST_INITCTL";
pub const TELINIT_ENV: &str = "UPSTART_TEST_TELINIT";
pub const FILE_BRIDGE_ENV: &str = "UPSTART_TEST_FILE_BRIDGE";

/// Maximum time to wait for Upstart to register a new job
pub const JOB_WAIT: Duration = Duration::from_secs(5);
/// Maximum time to wait for the session file after starting a Session Init
pub const SESSION_FILE_WAIT: Duration = Duration::from_secs(5);
/// Maximum time to wait for Upstart to complete a re-exec
pub const REEXEC_WAIT: Duration = Duration::from_secs(5);
/// Maximum time to wait for Upstart to create a file
pub const FILE_WAIT: Duration = Duration::from_secs(5);
/// Maximum time to wait for Upstart to create a job logfile
pub const LOGFILE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub init: PathBuf,
    pub initctl: PathBuf,
    pub telinit: PathBuf,
    pub file_bridge: PathBuf,
    pub job_wait: Duration,
    pub session_file_wait: Duration,
    pub reexec_wait: Duration,
    pub file_wait: Duration,
    pub logfile_wait: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            init: PathBuf::from(UPSTART),
            initctl: PathBuf::from(INITCTL),
            telinit: PathBuf::from(TELINIT),
            file_bridge: PathBuf::from(FILE_BRIDGE),
            job_wait: JOB_WAIT,
            session_file_wait: SESSION_FILE_WAIT,
            reexec_wait: REEXEC_WAIT,
            file_wait: FILE_WAIT,
            logfile_wait: LOGFILE_WAIT,
        }
    }
}

impl HarnessConfig {
    /// Defaults, with binary paths overridden by `UPSTART_TEST_*` variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: PathBuf| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };

        let defaults = Self::default();
        Self {
            init: path(INIT_ENV, defaults.init),
            initctl: path(INITCTL_ENV, defaults.initctl),
            telinit: path(TELINIT_ENV, defaults.telinit),
            file_bridge: path(FILE_BRIDGE_ENV, defaults.file_bridge),
            ..defaults
        }
    }

    /// Binaries that must exist for the harness to drive Upstart
    pub fn missing_binaries(&self) -> Vec<PathBuf> {
        [&self.init, &self.initctl]
            .into_iter()
            .filter(|path| !path.exists())
            .cloned()
            .collect()
    }
}
