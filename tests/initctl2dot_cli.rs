//! Tests for the initctl2dot command line

use std::path::Path;
use std::process::{Command, Output};

const LISTING: &str = "\
mountall
  start on startup
  emits local-filesystems
rc-sysinit
  start on local-filesystems
  stop on runlevel
  emits runlevel
";

fn initctl2dot(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_initctl2dot"))
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
}

fn write_listing(dir: &Path, content: &str) -> String {
    let path = dir.join("listing.txt");
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_missing_infile_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = initctl2dot(dir.path(), &["-f", "no-such-listing.txt"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("initctl2dot: ERROR: cannot read file 'no-such-listing.txt'"));
    assert!(!dir.path().join("upstart.dot").exists());
}

#[test]
fn test_malformed_listing_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let infile = write_listing(dir.path(), "  start on startup\n");
    let output = initctl2dot(dir.path(), &["-f", &infile, "-o", "-"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("initctl2dot: ERROR: "));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_dash_writes_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let infile = write_listing(dir.path(), LISTING);
    let output = initctl2dot(dir.path(), &["-f", &infile, "-o", "-"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("digraph upstart {"));
    assert!(stdout.contains("(from file data)"));
    assert!(stdout.trim_end().ends_with('}'));
    assert!(!dir.path().join("-").exists());
    assert!(!dir.path().join("upstart.dot").exists());
}

#[test]
fn test_default_outfile() {
    let dir = tempfile::tempdir().unwrap();
    let infile = write_listing(dir.path(), LISTING);
    let output = initctl2dot(dir.path(), &["-f", &infile, "--color-job", "gray"]);

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    let dot = std::fs::read_to_string(dir.path().join("upstart.dot")).unwrap();
    assert!(dot.starts_with("digraph upstart {"));
    assert!(dot.contains("gray"));
}

#[test]
fn test_check_mode_writes_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let infile = write_listing(dir.path(), LISTING);
    let output = initctl2dot(dir.path(), &["-c", "-f", &infile, "-o", "out.dot"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("WARNING: job or event 'startup' not emitted by any job"));
    assert!(!stdout.contains("'local-filesystems'"));
    assert!(!dir.path().join("out.dot").exists());
}

#[test]
fn test_unwritable_outfile() {
    let dir = tempfile::tempdir().unwrap();
    let infile = write_listing(dir.path(), LISTING);
    let output = initctl2dot(dir.path(), &["-f", &infile, "-o", "missing/dir/out.dot"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("initctl2dot: ERROR: cannot open file missing/dir/out.dot for writing"));
}
