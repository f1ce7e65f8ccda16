//! Upstart internal state as returned by GetState
//!
//! Only the sections the harness inspects are typed; everything else is
//! kept as raw JSON so state from newer daemons still deserialises.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the file a Session Init writes its state to during re-exec
pub const UPSTART_STATE_FILE: &str = "upstart.state";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstartState {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub conf_sources: Vec<ConfSource>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub job_classes: Vec<Value>,
    #[serde(default)]
    pub control_bus_address: Option<String>,
}

/// A chroot session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub chroot: Option<String>,
    #[serde(default)]
    pub conf_path: Option<String>,
    #[serde(default)]
    pub user: Option<u32>,
}

/// A directory (or file) Upstart reads job configuration from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfSource {
    pub path: String,
    #[serde(rename = "type", default)]
    pub source_type: Option<Value>,
    #[serde(default)]
    pub conf_files: Vec<ConfFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfFile {
    pub path: String,
}

impl UpstartState {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Every job configuration file Upstart has loaded
    pub fn conf_file_paths(&self) -> impl Iterator<Item = &str> {
        self.conf_sources
            .iter()
            .flat_map(|source| source.conf_files.iter())
            .map(|file| file.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE: &str = r#"{
        "sessions": [{"chroot": "/srv/chroot", "conf_path": "/srv/chroot/etc/init", "user": 0}],
        "events": [],
        "control_bus_address": null,
        "job_environment": ["PATH=/usr/bin"],
        "job_classes": [{"name": "foo"}],
        "conf_sources": [
            {
                "path": "/tmp/TestUpstart-confdir-1-abc",
                "type": 1,
                "flag": 0,
                "conf_files": [
                    {"path": "/tmp/TestUpstart-confdir-1-abc/TestUpstart-x/foo.conf", "flag": 0}
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_state_dump() {
        let state = UpstartState::from_json(STATE).unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].chroot.as_deref(), Some("/srv/chroot"));
        assert_eq!(state.conf_sources.len(), 1);
        assert_eq!(state.job_classes.len(), 1);
        assert_eq!(
            state.conf_file_paths().collect::<Vec<_>>(),
            vec!["/tmp/TestUpstart-confdir-1-abc/TestUpstart-x/foo.conf"]
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let state = UpstartState::from_json("{}").unwrap();
        assert!(state.sessions.is_empty());
        assert!(state.conf_sources.is_empty());
        assert_eq!(state.conf_file_paths().count(), 0);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(UpstartState::from_json("not json").is_err());
    }
}
