//! upstart-monitor - show Upstart events as they are emitted
//!
//! Prints one line per `EventEmitted` signal: the local time, a separator
//! and the event with its environment. With --output the events seen are
//! also saved when the monitor is interrupted.

use clap::Parser;
use std::path::PathBuf;

use upstart_tools::dbus::{self, Destination};
use upstart_tools::monitor::{self, Monitor, StopReason, DEFAULT_OUTPUT_FILE, DEFAULT_SEPARATOR};

#[derive(Parser)]
#[command(name = "upstart-monitor")]
#[command(about = "Upstart Event Monitor")]
struct Args {
    /// Field separator to use for command-line output
    #[arg(short, long, default_value = DEFAULT_SEPARATOR, hide_default_value = true)]
    separator: String,

    /// Connect to Upstart via specified D-Bus route
    #[arg(short, long, value_enum)]
    destination: Option<Destination>,

    /// Save received events to this file on exit
    #[arg(short, long, num_args = 0..=1, default_missing_value = DEFAULT_OUTPUT_FILE)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let destination = args.destination.unwrap_or_else(Destination::default_from_env);
    let connection = dbus::connect(destination).await.map_err(|e| {
        format!("cannot connect to {}: {}", destination.description(), e)
    })?;
    log::debug!("Connected to Upstart via {}", destination);

    let events = dbus::event_emitted_stream(&connection).await?;

    for line in monitor::banner(destination) {
        println!("{}", line);
    }

    let mut console = Monitor::new(&args.separator, args.output.is_some());

    let reason = console
        .run(events, tokio::signal::ctrl_c(), &mut std::io::stdout())
        .await?;
    match reason {
        StopReason::Closed => log::warn!("Connection to Upstart closed"),
        StopReason::Interrupted => log::debug!("Interrupted"),
    }

    if let (Some(path), Some(history)) = (&args.output, console.history_mut()) {
        if history.needs_save() {
            history.save(path)?;
            eprintln!("Saved {} events to {}", history.len(), path.display());
        } else {
            log::info!("{}", monitor::MonitorError::NoEvents);
        }
    }

    Ok(())
}
