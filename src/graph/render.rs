//! DOT output

use std::io::{self, Write};

use super::Graph;

/// Colours for nodes and edges; any GraphViz colour name or `#RRGGBB`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Colors {
    pub emits: String,
    pub start_on: String,
    pub stop_on: String,
    pub event: String,
    pub job: String,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            emits: "green".into(),
            start_on: "blue".into(),
            stop_on: "red".into(),
            event: "thistle".into(),
            // Gainsboro
            job: "#DCDCDC".into(),
        }
    }
}

/// Where the job data came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    File,
    Command { command: String, host: String },
}

/// Footer label describing the diagram
#[derive(Debug, Clone)]
pub struct Legend {
    pub generated: String,
    pub program: String,
    pub provenance: Provenance,
}

/// Turn a job or event name into a valid DOT node id
pub fn sanitise(name: &str) -> String {
    name.replace('-', "_")
        .replace('$', "dollar_")
        .replace('[', "lbracket")
        .replace(']', "rbracket")
        .replace('!', "bang")
        .replace(':', "_")
}

pub fn render<W: Write>(
    graph: &Graph,
    colors: &Colors,
    legend: &Legend,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "digraph upstart {{")?;
    writeln!(out, "  node [shape=record];")?;
    writeln!(out, "  rankdir=LR;")?;
    writeln!(out, "  overlap=false;")?;
    writeln!(out)?;

    for event in graph.events() {
        writeln!(
            out,
            "  {} [label=\"{}\", shape=diamond, fillcolor=\"{}\", style=\"filled\"];",
            sanitise(event),
            event,
            colors.event
        )?;
    }

    for job in graph.jobs.keys() {
        writeln!(
            out,
            "  {} [label=\"<job> {} | {{ <start> start on | <stop> stop on }}\", style=\"filled\", fillcolor=\"{}\"];",
            sanitise(job),
            job,
            colors.job
        )?;
    }

    writeln!(out)?;
    render_edges(graph, colors, out)?;
    render_footer(colors, legend, out)
}

fn render_edges<W: Write>(graph: &Graph, colors: &Colors, out: &mut W) -> io::Result<()> {
    let target = |name: &str| {
        if graph.is_job(name) {
            format!("{}:job", sanitise(name))
        } else {
            sanitise(name)
        }
    };

    for (job, record) in &graph.jobs {
        let node = sanitise(job);

        for name in &record.start_on {
            writeln!(
                out,
                "{}:start -> {} [color=\"{}\"];",
                node,
                target(name),
                colors.start_on
            )?;
        }
        for name in &record.stop_on {
            writeln!(
                out,
                "{}:stop -> {} [color=\"{}\"];",
                node,
                target(name),
                colors.stop_on
            )?;
        }
        for event in &record.emits {
            writeln!(
                out,
                "{}:job -> {} [color=\"{}\"];",
                node,
                sanitise(event),
                colors.emits
            )?;
        }
    }
    Ok(())
}

/// The label uses DOT `\n` escapes, not real newlines
fn render_footer<W: Write>(colors: &Colors, legend: &Legend, out: &mut W) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "overlap=false;")?;
    write!(
        out,
        "label=\"Generated on {} by {}\\n",
        legend.generated, legend.program
    )?;
    match &legend.provenance {
        Provenance::File => write!(out, "(from file data).\\n")?,
        Provenance::Command { command, host } => {
            write!(out, "(from '{}' on host {}).\\n", command, host)?
        }
    }
    write!(out, "Boxes of color {} denote jobs.\\n", colors.job)?;
    write!(out, "Diamonds of color {} denote events.\\n", colors.event)?;
    write!(out, "Emits denoted by {} lines.\\n", colors.emits)?;
    write!(out, "Start on denoted by {} lines.\\n", colors.start_on)?;
    write!(out, "Stop on denoted by {} lines.\\n", colors.stop_on)?;
    writeln!(out, "\";")?;
    writeln!(out, "}}")
}
