//! initctl2dot - convert initctl(8) output to a GraphViz dot diagram
//!
//! Reads `initctl --system list -de` (or a saved copy of it) and draws
//! jobs as boxes, events as diamonds and conditions as coloured edges.

use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use upstart_tools::graph::{self, Colors, Legend, Provenance, INITCTL_COMMAND};

const DEFAULT_OUTFILE: &str = "upstart.dot";

#[derive(Parser)]
#[command(name = "initctl2dot")]
#[command(about = "Convert initctl(8) output to a GraphViz dot diagram.")]
#[command(after_help = "See http://www.graphviz.org/doc/info/colors.html for available colours.")]
struct Args {
    /// Look for missing jobs/events then exit (this may not be reliable)
    #[arg(short, long)]
    check: bool,

    /// File to read 'initctl --system list -de' output from. If not
    /// specified, initctl is run automatically.
    #[arg(short = 'f', long)]
    infile: Option<PathBuf>,

    /// File to write output to, '-' for stdout
    #[arg(short = 'o', long, default_value = DEFAULT_OUTFILE)]
    outfile: String,

    /// Color for 'emits' lines
    #[arg(long, default_value = "green")]
    color_emits: String,

    /// Color for 'start on' lines
    #[arg(long, default_value = "blue")]
    color_start_on: String,

    /// Color for 'stop on' lines
    #[arg(long, default_value = "red")]
    color_stop_on: String,

    /// Color for event boxes
    #[arg(long, default_value = "thistle")]
    color_event: String,

    /// Color for job boxes
    #[arg(long, default_value = "#DCDCDC")]
    color_job: String,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(args) {
        eprintln!("initctl2dot: ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let command = INITCTL_COMMAND.join(" ");

    let (content, provenance) = match &args.infile {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read file '{}': {}", path.display(), e))?;
            (content, Provenance::File)
        }
        None => {
            let content = graph::initctl_output()
                .map_err(|e| format!("cannot run '{}': {}", command, e))?;
            (
                content,
                Provenance::Command {
                    command,
                    host: hostname(),
                },
            )
        }
    };

    let graph = graph::parse(&content)?;
    log::debug!(
        "Parsed {} jobs and {} emitted events",
        graph.jobs.len(),
        graph.emitted.len()
    );

    if args.check {
        for warning in graph.check() {
            println!("{}", warning);
        }
        return Ok(());
    }

    let colors = Colors {
        emits: args.color_emits,
        start_on: args.color_start_on,
        stop_on: args.color_stop_on,
        event: args.color_event,
        job: args.color_job,
    };
    let legend = Legend {
        generated: chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string(),
        program: program_name(),
        provenance,
    };

    let mut out: Box<dyn Write> = if args.outfile == "-" {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(&args.outfile)
            .map_err(|e| format!("cannot open file {} for writing: {}", args.outfile, e))?;
        Box::new(BufWriter::new(file))
    };

    graph::render(&graph, &colors, &legend, &mut out)?;
    out.flush()?;
    Ok(())
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "initctl2dot".to_string())
}
