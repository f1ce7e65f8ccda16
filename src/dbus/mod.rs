//! D-Bus plumbing for talking to Upstart
//!
//! Upstart exports its control interface on three routes:
//! - the system bus (well-known name com.ubuntu.Upstart)
//! - a private peer-to-peer socket owned by PID 1
//! - a private peer-to-peer socket per Session Init (address in $UPSTART_SESSION)
//!
//! Key interfaces:
//! - Manager: EmitEvent, GetState, Restart, JobAdded/EventEmitted signals
//! - Job: Start, GetInstanceByName
//! - Instance: Stop, Restart, processes property

mod instance;
mod job;
mod manager;

pub use instance::InstanceProxy;
pub use job::JobProxy;
pub use manager::ManagerProxy;

use std::fmt;

use futures_lite::{Stream, StreamExt};
use zbus::{
    connection::Builder, message::Type as MessageType, proxy::CacheProperties,
    zvariant::OwnedObjectPath, Connection, MatchRule, MessageStream,
};

pub const BUS_NAME: &str = "com.ubuntu.Upstart";
pub const INTERFACE_NAME: &str = "com.ubuntu.Upstart0_6";
pub const JOB_INTERFACE_NAME: &str = "com.ubuntu.Upstart0_6.Job";
pub const INSTANCE_INTERFACE_NAME: &str = "com.ubuntu.Upstart0_6.Instance";
pub const OBJECT_PATH: &str = "/com/ubuntu/Upstart";

/// Well-known address of the private socket of Upstart running as PID 1
pub const INIT_SOCKET: &str = "unix:abstract=/com/ubuntu/upstart";

/// Environment variable holding the address of a Session Init's socket
pub const UPSTART_SESSION_ENV: &str = "UPSTART_SESSION";

/// Route used to reach Upstart
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Destination {
    SystemBus,
    SessionBus,
    SystemSocket,
    SessionSocket,
}

impl Destination {
    pub fn description(self) -> &'static str {
        match self {
            Destination::SystemBus => "D-Bus system bus",
            Destination::SessionBus => "D-Bus session bus",
            Destination::SystemSocket => "D-Bus system socket",
            Destination::SessionSocket => "D-Bus session socket",
        }
    }

    /// Session socket when running under a Session Init, else the system
    /// bus (which lets unprivileged users see events too).
    pub fn default_from_env() -> Self {
        Self::default_for(session_address().as_deref())
    }

    fn default_for(session: Option<&str>) -> Self {
        match session {
            Some(_) => Destination::SessionSocket,
            None => Destination::SystemBus,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Address of the current Session Init, if any
pub fn session_address() -> Option<String> {
    std::env::var(UPSTART_SESSION_ENV)
        .ok()
        .filter(|addr| !addr.is_empty())
}

/// Open a connection over the given route
pub async fn connect(destination: Destination) -> zbus::Result<Connection> {
    log::debug!("Connecting to Upstart via {}", destination);
    match destination {
        Destination::SystemBus => Connection::system().await,
        Destination::SessionBus => Connection::session().await,
        Destination::SystemSocket => connect_address(INIT_SOCKET).await,
        Destination::SessionSocket => {
            let address = session_address().ok_or_else(|| {
                zbus::Error::Address(format!("{} is not set", UPSTART_SESSION_ENV))
            })?;
            connect_address(&address).await
        }
    }
}

/// Open a peer-to-peer connection to an Upstart private socket
pub async fn connect_address(address: &str) -> zbus::Result<Connection> {
    Builder::address(address)?.p2p().build().await
}

/// Manager proxy with property caching disabled (Upstart does not emit
/// PropertiesChanged).
pub async fn manager_proxy(conn: &Connection) -> zbus::Result<ManagerProxy<'static>> {
    ManagerProxy::builder(conn)
        .cache_properties(CacheProperties::No)
        .build()
        .await
}

pub async fn job_proxy(conn: &Connection, path: &str) -> zbus::Result<JobProxy<'static>> {
    JobProxy::builder(conn)
        .path(path.to_string())?
        .cache_properties(CacheProperties::No)
        .build()
        .await
}

pub async fn instance_proxy(
    conn: &Connection,
    path: &str,
) -> zbus::Result<InstanceProxy<'static>> {
    InstanceProxy::builder(conn)
        .path(path.to_string())?
        .cache_properties(CacheProperties::No)
        .build()
        .await
}

/// Stream of object paths announced by the `JobAdded` signal
pub async fn job_added_stream(
    conn: &Connection,
) -> zbus::Result<impl Stream<Item = OwnedObjectPath> + Unpin> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(INTERFACE_NAME)?
        .member("JobAdded")?
        .build();
    let stream = MessageStream::for_match_rule(rule, conn, None).await?;

    Ok(stream.filter_map(|msg| {
        let msg = msg.ok()?;
        match msg.body().deserialize::<OwnedObjectPath>() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Ignoring malformed JobAdded signal: {}", e);
                None
            }
        }
    }))
}

/// Stream of `(event, environment)` pairs from the `EventEmitted` signal
pub async fn event_emitted_stream(
    conn: &Connection,
) -> zbus::Result<impl Stream<Item = (String, Vec<String>)> + Unpin> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .interface(INTERFACE_NAME)?
        .member("EventEmitted")?
        .build();
    let stream = MessageStream::for_match_rule(rule, conn, None).await?;

    Ok(stream.filter_map(|msg| {
        let msg = msg.ok()?;
        match msg.body().deserialize::<(String, Vec<String>)>() {
            Ok(event) => Some(event),
            Err(e) => {
                log::warn!("Ignoring malformed EventEmitted signal: {}", e);
                None
            }
        }
    }))
}

/// Encode a string the way `nih_dbus_path()` does for object paths.
///
/// Every byte that is not an ASCII alphanumeric becomes `_` followed by
/// its two-digit lower-case hex value. The empty string encodes as `_`.
/// e.g., "hello-world" -> "hello_2dworld"
pub fn dbus_encode(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }

    s.bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() {
                (b as char).to_string()
            } else {
                format!("_{:02x}", b)
            }
        })
        .collect()
}

/// Object path of a job given its path relative to the conf dir
/// e.g., "TestUpstart-x/foo" -> "/com/ubuntu/Upstart/jobs/TestUpstart_2dx_2ffoo"
pub fn job_object_path(job_path: &str) -> String {
    format!("{}/jobs/{}", OBJECT_PATH, dbus_encode(job_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbus_encode() {
        assert_eq!(dbus_encode("hello-world"), "hello_2dworld");
        assert_eq!(dbus_encode("abc123"), "abc123");
        assert_eq!(dbus_encode("a_b"), "a_5fb");
        assert_eq!(dbus_encode("a/b.c"), "a_2fb_2ec");
    }

    #[test]
    fn test_dbus_encode_empty_is_underscore() {
        assert_eq!(dbus_encode(""), "_");
    }

    #[test]
    fn test_dbus_encode_multibyte() {
        // each UTF-8 byte is escaped separately
        assert_eq!(dbus_encode("é"), "_c3_a9");
    }

    #[test]
    fn test_job_object_path() {
        assert_eq!(
            job_object_path("TestUpstart-abc/sleeper"),
            "/com/ubuntu/Upstart/jobs/TestUpstart_2dabc_2fsleeper"
        );
    }

    #[test]
    fn test_default_destination() {
        assert_eq!(
            Destination::default_for(Some("unix:abstract=/com/ubuntu/upstart-session/1000/42")),
            Destination::SessionSocket
        );
        assert_eq!(Destination::default_for(None), Destination::SystemBus);
    }

    #[test]
    fn test_destination_descriptions() {
        assert_eq!(Destination::SystemSocket.to_string(), "D-Bus system socket");
        assert_eq!(Destination::SessionBus.description(), "D-Bus session bus");
    }

    #[tokio::test]
    async fn test_connect_address_refused() {
        let result = connect_address("unix:abstract=/upstart-tools-test-nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_address_bad_address() {
        assert!(connect_address("bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_address_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("socket");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let guid = zbus::Guid::generate();

        let server = async {
            let (stream, _) = listener.accept().await.unwrap();
            Builder::unix_stream(stream)
                .server(guid)
                .unwrap()
                .p2p()
                .build()
                .await
        };
        let address = format!("unix:path={}", path.display());
        let (client, server) = tokio::join!(connect_address(&address), server);

        assert!(client.is_ok());
        assert!(server.is_ok());
    }
}
