//! com.ubuntu.Upstart0_6.Instance interface

use zbus::proxy;

#[proxy(
    interface = "com.ubuntu.Upstart0_6.Instance",
    default_service = "com.ubuntu.Upstart",
    gen_blocking = false
)]
pub trait Instance {
    fn stop(&self, wait: bool) -> zbus::Result<()>;

    fn restart(&self, wait: bool) -> zbus::Result<()>;

    /// Running processes as (process name, pid), e.g. ("main", 1234)
    #[zbus(property, name = "processes")]
    fn processes(&self) -> zbus::Result<Vec<(String, i32)>>;
}
