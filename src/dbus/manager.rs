//! com.ubuntu.Upstart0_6 interface
//!
//! The manager object the harness uses to:
//! - Emit events (EmitEvent)
//! - Dump internal state as JSON (GetState)
//! - Request a stateful re-exec of a Session Init (Restart)

use zbus::{proxy, zvariant::OwnedObjectPath};

#[proxy(
    interface = "com.ubuntu.Upstart0_6",
    default_service = "com.ubuntu.Upstart",
    default_path = "/com/ubuntu/Upstart",
    gen_blocking = false
)]
pub trait Manager {
    /// Emit an event, optionally waiting for it to be fully handled
    fn emit_event(&self, name: &str, env: &[&str], wait: bool) -> zbus::Result<()>;

    /// Internal state serialised as JSON
    fn get_state(&self) -> zbus::Result<String>;

    /// Re-exec (Session Inits only; PID 1 uses telinit)
    fn restart(&self) -> zbus::Result<()>;

    fn get_job_by_name(&self, name: &str) -> zbus::Result<OwnedObjectPath>;

    /// e.g., "init (upstart 1.13)"
    #[zbus(property, name = "version")]
    fn version(&self) -> zbus::Result<String>;
}
