//! Job and event graph built from `initctl list -de`
//!
//! Jobs reference other jobs or events in their `start on` and `stop on`
//! conditions, and announce the events they `emits`. The graph keeps
//! those relations and renders them as a GraphViz DOT diagram.

mod parser;
mod render;

pub use parser::{parse, ParseError};
pub use render::{render, sanitise, Colors, Legend, Provenance};

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;

/// Program and arguments used to collect the job list
pub const INITCTL_COMMAND: [&str; 4] = ["initctl", "--system", "list", "-de"];

/// Conditions and emitted events of one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRecord {
    pub start_on: BTreeSet<String>,
    pub stop_on: BTreeSet<String>,
    pub emits: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub jobs: BTreeMap<String, JobRecord>,
    /// Every event named by some job's `emits`
    pub emitted: BTreeSet<String>,
}

impl Graph {
    pub fn is_job(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Condition names that are neither a known job nor an emitted event
    pub fn unresolved_names(&self) -> BTreeSet<&str> {
        self.jobs
            .values()
            .flat_map(|job| job.start_on.iter().chain(job.stop_on.iter()))
            .map(String::as_str)
            .filter(|name| !self.is_job(name) && !self.emitted.contains(*name))
            .collect()
    }

    /// Every node drawn as an event: emitted plus unresolved names
    pub fn events(&self) -> BTreeSet<&str> {
        let mut events: BTreeSet<&str> = self.emitted.iter().map(String::as_str).collect();
        events.extend(self.unresolved_names());
        events
    }

    /// Warnings printed in check mode, one per unresolved name
    pub fn check(&self) -> Vec<String> {
        self.unresolved_names()
            .into_iter()
            .map(|name| format!("WARNING: job or event '{}' not emitted by any job", name))
            .collect()
    }
}

/// Run initctl and return its job listing
pub fn initctl_output() -> std::io::Result<String> {
    let [program, args @ ..] = INITCTL_COMMAND;
    let output = Command::new(program).args(args).output()?;

    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "'{}' failed: {}",
            INITCTL_COMMAND.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        parse(
            "\
mountall
  start on startup
  emits local-filesystems
rc
  start on runlevel
  stop on runlevel
cron
  start on local-filesystems
  stop on mountall
",
        )
        .unwrap()
    }

    #[test]
    fn test_unresolved_names() {
        let graph = sample();
        let unresolved: Vec<&str> = graph.unresolved_names().into_iter().collect();
        assert_eq!(unresolved, vec!["runlevel", "startup"]);
    }

    #[test]
    fn test_events_include_unresolved() {
        let graph = sample();
        let events: Vec<&str> = graph.events().into_iter().collect();
        assert_eq!(events, vec!["local-filesystems", "runlevel", "startup"]);
        assert!(!graph.events().contains("mountall"));
    }

    #[test]
    fn test_check_warnings() {
        let graph = sample();
        assert_eq!(
            graph.check(),
            vec![
                "WARNING: job or event 'runlevel' not emitted by any job",
                "WARNING: job or event 'startup' not emitted by any job",
            ]
        );
    }

    #[test]
    fn test_check_clean_graph() {
        let graph = parse("a\n  emits go\nb\n  start on go\n  stop on a\n").unwrap();
        assert!(graph.check().is_empty());
    }

    #[test]
    fn test_initctl_command() {
        assert_eq!(INITCTL_COMMAND.join(" "), "initctl --system list -de");
    }
}
