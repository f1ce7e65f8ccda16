//! upstart-tools - peripheral tooling for the Upstart init daemon
//!
//! Three independent pieces that talk to Upstart from the outside:
//! - `graph`: converts `initctl list -de` output into a GraphViz diagram
//! - `harness`: drives a system or Session Init from integration tests
//! - `monitor`: watches the events Upstart emits
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 upstart-tools                    │
//! ├─────────────────────────────────────────────────┤
//! │  initctl2dot  │  Test Harness  │  upstart-monitor│
//! ├───────────────┼─────────────────────────────────┤
//! │  graph        │  D-Bus client (zbus)  │  state   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dbus;
pub mod graph;
pub mod harness;
pub mod monitor;
pub mod state;

pub use harness::{Job, JobInstance, Upstart, UpstartError};
