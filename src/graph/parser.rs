//! Parser for `initctl list -de` output
//!
//! ```text
//! rc
//!   start on runlevel
//!   stop on runlevel
//!   emits deconfiguring-networking
//! ```
//!
//! Unindented lines name a job; indented condition lines belong to the
//! most recent job.

use super::{Graph, JobRecord};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {0}: condition appears before any job")]
    NoJob(usize),

    #[error("line {line}: malformed '{kind}' line: {text}")]
    Malformed {
        line: usize,
        kind: &'static str,
        text: String,
    },
}

/// The indented condition lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    StartOn,
    StopOn,
    Emits,
}

impl Condition {
    /// Keyword prefix and index of the name token
    fn layout(self) -> (&'static str, usize) {
        match self {
            Condition::StartOn => ("start on", 2),
            Condition::StopOn => ("stop on", 2),
            Condition::Emits => ("emits", 1),
        }
    }

    fn classify(line: &str) -> Option<Self> {
        if !line.starts_with(char::is_whitespace) {
            return None;
        }
        let body = line.trim_start();
        [Condition::StartOn, Condition::StopOn, Condition::Emits]
            .into_iter()
            .find(|c| body.starts_with(c.layout().0))
    }
}

/// Parse the text of `initctl list -de`
pub fn parse(content: &str) -> Result<Graph, ParseError> {
    let mut graph = Graph::default();
    let mut current: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();

        if line.trim().is_empty() {
            continue;
        }

        let Some(condition) = Condition::classify(line) else {
            // Anything else starts a new job record; a repeated job is reset
            let job = line.split_whitespace().next().unwrap_or_default().to_string();
            graph.jobs.insert(job.clone(), JobRecord::default());
            current = Some(job);
            continue;
        };

        let job = current.as_deref().ok_or(ParseError::NoJob(line_no))?;
        let (kind, index) = condition.layout();
        let name = line
            .split_whitespace()
            .nth(index)
            .ok_or_else(|| ParseError::Malformed {
                line: line_no,
                kind,
                text: line.trim().to_string(),
            })?;
        let name = encode_dollar(job, name);

        let record = graph.jobs.entry(job.to_string()).or_default();
        match condition {
            Condition::StartOn => {
                record.start_on.insert(name);
            }
            Condition::StopOn => {
                record.stop_on.insert(name);
            }
            Condition::Emits => {
                record.emits.insert(name.clone());
                graph.emitted.insert(name);
            }
        }
    }

    Ok(graph)
}

/// Make a `$VARIABLE` name unique-ish by qualifying it with its job
fn encode_dollar(job: &str, name: &str) -> String {
    if name.starts_with('$') {
        format!("{}:{}", job, name)
    } else {
        name.to_string()
    }
}
