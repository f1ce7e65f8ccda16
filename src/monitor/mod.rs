//! Upstart event monitor
//!
//! Formats `EventEmitted` signals for the console and keeps an indexed
//! log of them that can be written out as tab-separated text.

use std::fs::File;
use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use futures_lite::{Stream, StreamExt};

use crate::dbus::Destination;

/// File the event log is saved to when no name is given
pub const DEFAULT_OUTPUT_FILE: &str = "upstart-events.txt";

/// Default console field separator
pub const DEFAULT_SEPARATOR: &str = "\t";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("No events to save")]
    NoEvents,

    #[error("Error saving file {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Event name and its environment re-quoted as `KEY='VALUE' ...`.
///
/// Upstart sends the environment without quoting, so values containing
/// whitespace are quoted again for display.
pub fn format_event(name: &str, env: &[String]) -> (String, String) {
    let quoted: Vec<String> = env
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => format!("{}='{}'", key, value),
            None => format!("{}=''", entry),
        })
        .collect();

    (name.to_string(), quoted.join(" "))
}

/// `name` alone, or `name env` when there is an environment
pub fn event_line(name: &str, env: &str) -> String {
    if env.is_empty() {
        name.to_string()
    } else {
        format!("{} {}", name, env)
    }
}

/// Current local time in the monitor's format
pub fn timestamp() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

/// One console output line
pub fn console_line(time: &str, separator: &str, event: &str) -> String {
    format!("{}{}{}", time, separator, event)
}

/// Lines printed before the first event in console mode
pub fn banner(destination: Destination) -> Vec<String> {
    vec![
        "# Upstart Event Monitor (console mode)".to_string(),
        "#".to_string(),
        format!("# Connected to {}", destination.description()),
        "#".to_string(),
        "# Columns: time, event and environment".to_string(),
        String::new(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub index: u64,
    pub time: String,
    pub event: String,
}

/// Indexed list of received events
#[derive(Debug, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    last_index: u64,
    need_save: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event received now
    pub fn push(&mut self, name: &str, env: &[String]) -> &EventRecord {
        self.push_at(timestamp(), name, env)
    }

    pub fn push_at(&mut self, time: String, name: &str, env: &[String]) -> &EventRecord {
        let (name, env) = format_event(name, env);
        self.last_index += 1;
        self.need_save = true;

        let index = self.records.len();
        self.records.push(EventRecord {
            index: self.last_index,
            time,
            event: event_line(&name, &env),
        });
        &self.records[index]
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Events arrived since the last save or clear
    pub fn needs_save(&self) -> bool {
        self.need_save
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.last_index = 0;
        self.need_save = false;
    }

    /// Write `index\ttime\tevent` rows
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for record in &self.records {
            writeln!(out, "{}\t{}\t{}", record.index, record.time, record.event)?;
        }
        Ok(())
    }

    pub fn save(&mut self, path: &Path) -> Result<(), MonitorError> {
        if self.records.is_empty() {
            return Err(MonitorError::NoEvents);
        }

        let save_error = |source| MonitorError::Save {
            path: path.display().to_string(),
            source,
        };

        let mut out = BufWriter::new(File::create(path).map_err(save_error)?);
        self.write_to(&mut out).map_err(save_error)?;
        out.flush().map_err(save_error)?;

        log::debug!("Saved {} events to {}", self.records.len(), path.display());
        self.need_save = false;
        Ok(())
    }
}

/// Why [`Monitor::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The event stream ended
    Closed,
    Interrupted,
}

/// Console formatting plus, when events are to be saved, the event log
#[derive(Debug)]
pub struct Monitor {
    separator: String,
    history: Option<EventLog>,
}

impl Monitor {
    /// Events are only kept when `keep_history` is set
    pub fn new(separator: &str, keep_history: bool) -> Self {
        Self {
            separator: separator.to_string(),
            history: keep_history.then(EventLog::new),
        }
    }

    /// Handle an event received now, returning its console line
    pub fn handle_event(&mut self, name: &str, env: &[String]) -> String {
        self.handle_event_at(timestamp(), name, env)
    }

    pub fn handle_event_at(&mut self, time: String, name: &str, env: &[String]) -> String {
        let (quoted_name, quoted_env) = format_event(name, env);
        let line = console_line(&time, &self.separator, &event_line(&quoted_name, &quoted_env));
        if let Some(history) = self.history.as_mut() {
            history.push_at(time, name, env);
        }
        line
    }

    /// Print events to `out` until the stream ends or `shutdown` completes
    pub async fn run<S, F, W>(
        &mut self,
        mut events: S,
        shutdown: F,
        out: &mut W,
    ) -> io::Result<StopReason>
    where
        S: Stream<Item = (String, Vec<String>)> + Unpin,
        F: Future,
        W: Write,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some((name, env)) = event else {
                        return Ok(StopReason::Closed);
                    };
                    writeln!(out, "{}", self.handle_event(&name, &env))?;
                    out.flush()?;
                }
                _ = &mut shutdown => return Ok(StopReason::Interrupted),
            }
        }
    }

    pub fn history(&self) -> Option<&EventLog> {
        self.history.as_ref()
    }

    pub fn history_mut(&mut self) -> Option<&mut EventLog> {
        self.history.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_format_event_quotes_values() {
        let (name, quoted) = format_event(
            "starting",
            &env(&["JOB=tty1", "INSTANCE=", "MSG=hello world"]),
        );
        assert_eq!(name, "starting");
        assert_eq!(quoted, "JOB='tty1' INSTANCE='' MSG='hello world'");
    }

    #[test]
    fn test_format_event_splits_on_first_equals() {
        let (_, quoted) = format_event("e", &env(&["OPTS=a=b,c=d"]));
        assert_eq!(quoted, "OPTS='a=b,c=d'");
    }

    #[test]
    fn test_format_event_without_env() {
        assert_eq!(format_event("startup", &[]), ("startup".into(), String::new()));
    }

    #[test]
    fn test_event_line() {
        assert_eq!(event_line("startup", ""), "startup");
        assert_eq!(event_line("runlevel", "RUNLEVEL='2'"), "runlevel RUNLEVEL='2'");
    }

    #[test]
    fn test_console_line() {
        assert_eq!(
            console_line("2013-05-01 10:00:00.000001", DEFAULT_SEPARATOR, "startup"),
            "2013-05-01 10:00:00.000001\tstartup"
        );
        assert_eq!(console_line("t", " | ", "e"), "t | e");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIME_FORMAT).is_ok());
        // microsecond precision
        assert_eq!(ts.rsplit('.').next().map(str::len), Some(6));
    }

    #[test]
    fn test_banner() {
        let lines = banner(Destination::SessionSocket);
        assert_eq!(lines[0], "# Upstart Event Monitor (console mode)");
        assert_eq!(lines[2], "# Connected to D-Bus session socket");
        assert_eq!(lines[4], "# Columns: time, event and environment");
        assert_eq!(lines.last().map(String::as_str), Some(""));
    }

    #[test]
    fn test_log_indexes_from_one() {
        let mut log = EventLog::new();
        assert!(!log.needs_save());

        let first = log.push_at("t1".into(), "startup", &[]).clone();
        assert_eq!(first.index, 1);
        assert_eq!(first.event, "startup");

        let second = log.push_at("t2".into(), "runlevel", &env(&["RUNLEVEL=2"])).clone();
        assert_eq!(second.index, 2);
        assert_eq!(second.event, "runlevel RUNLEVEL='2'");
        assert!(log.needs_save());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_clear_resets_index() {
        let mut log = EventLog::new();
        log.push_at("t".into(), "a", &[]);
        log.push_at("t".into(), "b", &[]);
        log.clear();

        assert!(log.is_empty());
        assert!(!log.needs_save());
        assert_eq!(log.push_at("t".into(), "c", &[]).index, 1);
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_OUTPUT_FILE);

        let mut log = EventLog::new();
        log.push_at("2013-05-01 10:00:00.000001".into(), "startup", &[]);
        log.push_at(
            "2013-05-01 10:00:00.000002".into(),
            "starting",
            &env(&["JOB=rc", "INSTANCE="]),
        );
        log.save(&path).unwrap();

        assert!(!log.needs_save());
        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            saved,
            "1\t2013-05-01 10:00:00.000001\tstartup\n\
             2\t2013-05-01 10:00:00.000002\tstarting JOB='rc' INSTANCE=''\n"
        );
    }

    #[test]
    fn test_save_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.txt");

        let mut log = EventLog::new();
        let err = log.save(&path).unwrap_err();
        assert!(matches!(err, MonitorError::NoEvents));
        assert_eq!(err.to_string(), "No events to save");
        assert!(!path.exists());
    }

    #[test]
    fn test_save_unwritable_path() {
        let mut log = EventLog::new();
        log.push_at("t".into(), "a", &[]);
        let result = log.save(Path::new("/nonexistent-dir-12345/events.txt"));
        assert!(matches!(result, Err(MonitorError::Save { .. })));
        assert!(log.needs_save());
    }

    #[test]
    fn test_monitor_without_history() {
        let mut monitor = Monitor::new("\t", false);
        let line = monitor.handle_event_at("t0".to_string(), "startup", &env(&["A=b c"]));
        assert_eq!(line, "t0\tstartup A='b c'");
        assert!(monitor.history().is_none());
    }

    #[test]
    fn test_monitor_with_history() {
        let mut monitor = Monitor::new(" | ", true);
        let line = monitor.handle_event_at("t0".to_string(), "startup", &[]);
        assert_eq!(line, "t0 | startup");
        monitor.handle_event_at("t1".to_string(), "runlevel", &env(&["RUNLEVEL=2"]));

        let history = monitor.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.records()[1].event, "runlevel RUNLEVEL='2'");
        assert!(history.needs_save());
    }

    fn events(names: &[&str]) -> Vec<(String, Vec<String>)> {
        names.iter().map(|n| (n.to_string(), Vec::new())).collect()
    }

    #[tokio::test]
    async fn test_run_until_stream_ends() {
        let mut monitor = Monitor::new(",", false);
        let mut out = Vec::new();

        let reason = monitor
            .run(
                futures_lite::stream::iter(events(&["startup", "runlevel"])),
                std::future::pending::<()>(),
                &mut out,
            )
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Closed);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",startup"));
        assert!(lines[1].ends_with(",runlevel"));
        assert!(monitor.history().is_none());
    }

    #[tokio::test]
    async fn test_run_interrupted() {
        let mut monitor = Monitor::new("\t", true);
        let mut out = Vec::new();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stream = futures_lite::stream::iter(events(&["startup"]))
            .chain(futures_lite::stream::pending());
        let shutdown = async move {
            let _ = rx.await;
        };

        {
            let run = monitor.run(stream, shutdown, &mut out);
            tokio::pin!(run);
            // first event arrives before the interrupt
            tokio::select! {
                biased;
                _ = &mut run => panic!("monitor stopped early"),
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            }
            tx.send(()).unwrap();
            assert_eq!(run.await.unwrap(), StopReason::Interrupted);
        }

        assert_eq!(monitor.history().unwrap().len(), 1);
        assert!(String::from_utf8(out).unwrap().contains("\tstartup"));
    }
}
