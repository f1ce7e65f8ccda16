//! com.ubuntu.Upstart0_6.Job interface

use zbus::{proxy, zvariant::OwnedObjectPath};

#[proxy(
    interface = "com.ubuntu.Upstart0_6.Job",
    default_service = "com.ubuntu.Upstart",
    gen_blocking = false
)]
pub trait Job {
    /// Start a new instance. Returns the instance object path.
    fn start(&self, env: &[&str], wait: bool) -> zbus::Result<OwnedObjectPath>;

    /// Look up an instance by its (unencoded) name; "" is the single instance
    fn get_instance_by_name(&self, name: &str) -> zbus::Result<OwnedObjectPath>;

    fn get_all_instances(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}
