//! A running instance of a test job

use std::collections::HashMap;
use zbus::Connection;

use super::logfile::LogFile;
use super::UpstartError;
use crate::dbus;

/// A running Upstart job instance
#[derive(Debug, Clone)]
pub struct JobInstance {
    connection: Connection,
    /// D-Bus encoded instance name ("_" for single-instance jobs)
    name: String,
    object_path: String,
    logfile: LogFile,
}

impl JobInstance {
    pub(crate) fn new(
        connection: Connection,
        name: String,
        object_path: String,
        logfile: LogFile,
    ) -> Self {
        Self {
            connection,
            name,
            object_path,
            logfile,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn logfile(&self) -> &LogFile {
        &self.logfile
    }

    /// Stop the instance. Any D-Bus failure is taken to mean the instance
    /// has already stopped (or Upstart re-exec'd and dropped us).
    pub async fn stop(&self, wait: bool) {
        if let Err(e) = stop_instance(&self.connection, &self.object_path, wait).await {
            log::debug!("{}: already stopped ({})", self.object_path, e);
        }
    }

    pub async fn restart(&self, wait: bool) -> Result<(), UpstartError> {
        let proxy = dbus::instance_proxy(&self.connection, &self.object_path).await?;
        proxy.restart(wait).await?;
        Ok(())
    }

    /// Map of job process name (e.g. "main") to pid
    pub async fn pids(&self) -> Result<HashMap<String, i32>, UpstartError> {
        instance_pids(&self.connection, &self.object_path).await
    }

    /// Stop the instance and remove its logfile
    pub async fn destroy(&self) {
        self.stop(true).await;
        self.logfile.destroy();
    }
}

pub(crate) async fn instance_pids(
    connection: &Connection,
    object_path: &str,
) -> Result<HashMap<String, i32>, UpstartError> {
    let proxy = dbus::instance_proxy(connection, object_path).await?;
    let procs = proxy.processes().await?;
    Ok(procs.into_iter().collect())
}

pub(crate) async fn stop_instance(
    connection: &Connection,
    object_path: &str,
    wait: bool,
) -> zbus::Result<()> {
    let proxy = dbus::instance_proxy(connection, object_path).await?;
    proxy.stop(wait).await
}
