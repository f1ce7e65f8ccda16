//! Test jobs: a job configuration file plus its running instances
//!
//! For single-instance jobs (no `instance` stanza) the [`Job`] alone is
//! enough to control the job. For multi-instance jobs, operations on the
//! `Job` apply to *all* recorded instances; keep the [`JobInstance`]
//! returned by [`Job::start`] to act on just one.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::Connection;

use super::instance::{instance_pids, stop_instance, JobInstance};
use super::logfile::LogFile;
use super::UpstartError;
use crate::dbus::{self, job_object_path};

/// D-Bus encoded name of the instance of a single-instance job
pub const SINGLE_INSTANCE: &str = "_";

/// Handle to an Upstart job created by the harness. Clones share state.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

#[derive(Debug)]
struct JobInner {
    connection: Connection,
    name: String,
    /// Directory holding the .conf file
    job_dir: PathBuf,
    /// Relative directory of `job_dir` below the conf dir
    subdir_name: String,
    conffile: PathBuf,
    object_path: String,
    log_dir: PathBuf,
    /// Keep the .conf file on destroy (used across re-exec)
    retain: bool,
    state: Mutex<JobState>,
}

#[derive(Debug)]
struct JobState {
    instances: Vec<JobInstance>,
    /// D-Bus encoded instance names, in start order
    instance_names: Vec<String>,
    valid: bool,
}

/// Parameters describing where a job lives
#[derive(Debug, Clone)]
pub(crate) struct JobLocation {
    pub job_dir: PathBuf,
    pub subdir_name: String,
    pub log_dir: PathBuf,
}

impl Job {
    /// Write `<job_dir>/<name>.conf` and return a handle to the job.
    ///
    /// This does not wait for Upstart to notice the file; see
    /// `Upstart::job_create` for that.
    pub(crate) async fn create(
        connection: Connection,
        location: JobLocation,
        name: &str,
        body: &str,
        retain: bool,
    ) -> Result<Self, UpstartError> {
        let contents = render_conf(body)?;
        let conffile = conf_path(&location.job_dir, name);
        tokio::fs::write(&conffile, contents).await?;
        log::debug!("Wrote job configuration {}", conffile.display());

        Ok(Self::from_conffile(connection, location, name, conffile, retain))
    }

    /// Handle for a job whose configuration file already exists
    pub(crate) fn from_conffile(
        connection: Connection,
        location: JobLocation,
        name: &str,
        conffile: PathBuf,
        retain: bool,
    ) -> Self {
        let object_path = job_path(&location.subdir_name, name);

        Self {
            inner: Arc::new(JobInner {
                connection,
                name: name.to_string(),
                job_dir: location.job_dir,
                subdir_name: location.subdir_name,
                conffile,
                object_path,
                log_dir: location.log_dir,
                retain,
                state: Mutex::new(JobState {
                    instances: Vec::new(),
                    instance_names: Vec::new(),
                    valid: true,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn job_dir(&self) -> &Path {
        &self.inner.job_dir
    }

    pub fn conffile(&self) -> &Path {
        &self.inner.conffile
    }

    pub fn object_path(&self) -> &str {
        &self.inner.object_path
    }

    pub async fn is_valid(&self) -> bool {
        self.inner.state.lock().await.valid
    }

    /// Start the job. Multi-instance jobs need the returned instance to be
    /// manipulated individually.
    pub async fn start(&self, env: &[&str], wait: bool) -> Result<JobInstance, UpstartError> {
        let proxy = dbus::job_proxy(&self.inner.connection, &self.inner.object_path).await?;
        let instance_path = proxy.start(env, wait).await?;
        log::debug!("{}: started instance {}", self.inner.name, instance_path.as_str());

        Ok(self.record_instance(instance_path.as_str()).await)
    }

    /// The instance of a single-instance job, e.g. after `job_recreate`
    pub async fn get_instance(&self) -> Result<JobInstance, UpstartError> {
        let proxy = dbus::job_proxy(&self.inner.connection, &self.inner.object_path).await?;
        let instance_path = proxy.get_instance_by_name("").await?;

        Ok(self.record_instance(instance_path.as_str()).await)
    }

    async fn record_instance(&self, instance_path: &str) -> JobInstance {
        let name = instance_name(&self.inner.object_path, instance_path);

        let instance = JobInstance::new(
            self.inner.connection.clone(),
            name.clone(),
            instance_path.to_string(),
            LogFile::new(self.logfile_name(&name)),
        );

        let mut state = self.inner.state.lock().await;
        if !state.instance_names.contains(&name) {
            state.instance_names.push(name);
        }
        state.instances.push(instance.clone());

        instance
    }

    async fn instance_names(&self) -> Vec<String> {
        self.inner.state.lock().await.instance_names.clone()
    }

    /// Stop all recorded instances; instances that already stopped are skipped
    pub async fn stop(&self, wait: bool) {
        for path in self.instance_object_paths().await {
            if let Err(e) = stop_instance(&self.inner.connection, &path, wait).await {
                log::debug!("{}: already stopped ({})", path, e);
            }
        }
    }

    /// Restart all recorded instances
    pub async fn restart(&self, wait: bool) -> Result<(), UpstartError> {
        for path in self.instance_object_paths().await {
            let proxy = dbus::instance_proxy(&self.inner.connection, &path).await?;
            proxy.restart(wait).await?;
        }
        Ok(())
    }

    pub async fn instance_object_paths(&self) -> Vec<String> {
        self.instance_names()
            .await
            .iter()
            .map(|name| format!("{}/{}", self.inner.object_path, name))
            .collect()
    }

    /// Map of job process name to pid for instance `name` (default "_").
    ///
    /// Jobs with several instances must use the per-instance method.
    pub async fn pids(&self, name: Option<&str>) -> Result<HashMap<String, i32>, UpstartError> {
        let name = name.unwrap_or(SINGLE_INSTANCE);
        let names = self.instance_names().await;

        if names.len() > 1 {
            return Err(UpstartError::MultipleInstances);
        }
        if !names.iter().any(|n| n == name) {
            return Err(UpstartError::UnknownInstance(name.to_string()));
        }

        let path = format!("{}/{}", self.inner.object_path, name);
        instance_pids(&self.inner.connection, &path).await
    }

    /// Whether instance `name` currently has any processes
    pub async fn running(&self, name: &str) -> Result<bool, UpstartError> {
        let names = self.instance_names().await;

        if names.len() > 1 {
            return Err(UpstartError::MultipleInstances);
        }
        if !names.iter().any(|n| n == name) {
            return Ok(false);
        }

        Ok(!self.pids(Some(name)).await?.is_empty())
    }

    /// Full path to the logfile of a (D-Bus encoded) instance.
    ///
    /// It is up to the caller to ensure the logfile exists.
    pub fn logfile_name(&self, instance_name: &str) -> PathBuf {
        logfile_path(
            &self.inner.log_dir,
            &self.inner.subdir_name,
            &self.inner.name,
            instance_name,
        )
    }

    /// Stop all instances, then remove the .conf file unless retained
    pub async fn destroy(&self) -> Result<(), UpstartError> {
        let instances = {
            let mut state = self.inner.state.lock().await;
            state.valid = false;
            std::mem::take(&mut state.instances)
        };

        for instance in &instances {
            instance.destroy().await;
        }

        if self.inner.retain {
            log::debug!("Retaining {}", self.inner.conffile.display());
            return Ok(());
        }

        match tokio::fs::remove_file(&self.inner.conffile).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Contents of a job configuration file: each line trimmed, followed by
/// a trailing blank line.
pub(crate) fn render_conf(body: &str) -> Result<String, UpstartError> {
    if body.is_empty() {
        return Err(UpstartError::EmptyBody);
    }

    let mut out = String::new();
    for line in body.lines() {
        out.push_str(line.trim());
        out.push('\n');
    }
    out.push('\n');
    Ok(out)
}

pub(crate) fn conf_path(job_dir: &Path, name: &str) -> PathBuf {
    job_dir.join(format!("{}.conf", name))
}

/// Object path of job `name` living in `subdir_name` below the conf dir
pub(crate) fn job_path(subdir_name: &str, name: &str) -> String {
    job_object_path(&format!("{}/{}", subdir_name, name))
}

/// Strip the job object path prefix from an instance path
fn instance_name(job_path: &str, instance_path: &str) -> String {
    instance_path
        .strip_prefix(job_path)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(instance_path)
        .to_string()
}

/// Upstart maps the subdirectory slash to an underscore (see init(5))
fn logfile_path(log_dir: &Path, subdir_name: &str, job: &str, instance_name: &str) -> PathBuf {
    let filename = if instance_name == SINGLE_INSTANCE {
        format!("{}_{}.log", subdir_name, job)
    } else {
        format!("{}_{}-{}.log", subdir_name, job, instance_name)
    };
    log_dir.join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_conf_trims_lines() {
        let body = "
        start on startup
        stop on session-end

        exec sleep 999
        ";
        let rendered = render_conf(body).unwrap();
        assert_eq!(
            rendered,
            "\nstart on startup\nstop on session-end\n\nexec sleep 999\n\n\n"
        );
    }

    #[test]
    fn test_render_conf_single_line() {
        assert_eq!(render_conf("exec sleep 123").unwrap(), "exec sleep 123\n\n");
    }

    #[test]
    fn test_render_conf_empty_body() {
        assert!(matches!(render_conf(""), Err(UpstartError::EmptyBody)));
    }

    #[test]
    fn test_render_conf_blank_body() {
        assert_eq!(render_conf("  \n ").unwrap(), "\n\n\n");
    }

    #[test]
    fn test_job_path() {
        assert_eq!(
            job_path("TestUpstart-a1b2", "sleeper"),
            "/com/ubuntu/Upstart/jobs/TestUpstart_2da1b2_2fsleeper"
        );
    }

    #[test]
    fn test_instance_name() {
        let job = "/com/ubuntu/Upstart/jobs/TestUpstart_2dx_2fsleeper";
        assert_eq!(instance_name(job, &format!("{}/_", job)), "_");
        assert_eq!(instance_name(job, &format!("{}/foo_2dbar", job)), "foo_2dbar");
    }

    #[test]
    fn test_logfile_path() {
        let dir = Path::new("/var/log/upstart");
        assert_eq!(
            logfile_path(dir, "TestUpstart-x", "sleeper", "_"),
            PathBuf::from("/var/log/upstart/TestUpstart-x_sleeper.log")
        );
        assert_eq!(
            logfile_path(dir, "TestUpstart-x", "worker", "n_2d1"),
            PathBuf::from("/var/log/upstart/TestUpstart-x_worker-n_2d1.log")
        );
    }

    #[test]
    fn test_conf_path() {
        assert_eq!(
            conf_path(Path::new("/etc/init/TestUpstart-x"), "foo"),
            PathBuf::from("/etc/init/TestUpstart-x/foo.conf")
        );
    }
}
