//! Logging for harness-driven test runs
//!
//! Records are written as `time:target:LEVEL:message` to stderr and,
//! optionally, to a file that survives the test run.

use std::path::Path;

/// Install a global logger. Safe to call more than once; later calls
/// are ignored.
pub fn init(level: log::LevelFilter, file: Option<&Path>) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}:{}:{}:{}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        // zbus is chatty at debug
        .level_for("zbus", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    if let Some(path) = file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    if dispatch.apply().is_err() {
        log::debug!("Logger already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.log");

        init(log::LevelFilter::Debug, Some(&path)).unwrap();
        init(log::LevelFilter::Info, None).unwrap();
        assert!(path.exists());
    }
}
