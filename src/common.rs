use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use nix::unistd::Pid;

use crate::spec::ResourceSpec;
use crate::systemd;

pub const CGROUP_PROCS: &str = "cgroup.procs";

pub trait CgroupManager {
    /// Applies the resource spec to the process and returns the handle
    /// owning every directory that was created along the way.
    fn apply(&self, spec: &ResourceSpec, pid: Pid) -> Result<ActiveCgroup>;
}

/// Directories created outside the service manager's control. The manager
/// reclaims the unit cgroup itself; these subtrees are ours to remove.
#[derive(Debug, Default)]
pub struct ActiveCgroup {
    cleanup_dirs: Vec<PathBuf>,
}

impl ActiveCgroup {
    pub(crate) fn track<P: Into<PathBuf>>(&mut self, dir: P) {
        self.cleanup_dirs.push(dir.into());
    }

    pub fn owned_dirs(&self) -> &[PathBuf] {
        &self.cleanup_dirs
    }

    /// Best-effort teardown. Removal errors are swallowed and directories
    /// that are already gone are fine, so calling this twice is safe.
    pub fn cleanup(&self) -> Result<()> {
        for dir in &self.cleanup_dirs {
            let _ = fs::remove_dir_all(dir);
        }

        Ok(())
    }
}

/// Selects the cgroup backend for this process. Only the service-manager
/// driver exists here; when the manager is unusable the caller decides
/// whether to fall back to a different strategy.
pub fn create_cgroup_manager(context: Arc<systemd::Context>) -> Result<Box<dyn CgroupManager>> {
    if !context.usable() {
        bail!("service manager is not usable for cgroup management on this system");
    }

    log::info!("systemd cgroup manager will be used");
    Ok(Box::new(systemd::Manager::new(context)))
}

#[inline]
pub fn write_cgroup_file_str<P: AsRef<Path>>(path: P, data: &str) -> Result<()> {
    fs::OpenOptions::new()
        .create(false)
        .write(true)
        .truncate(false)
        .open(path.as_ref())
        .with_context(|| format!("failed to open {:?}", path.as_ref()))?
        .write_all(data.as_bytes())
        .with_context(|| format!("failed to write to {:?}", path.as_ref()))?;

    Ok(())
}

#[inline]
pub fn write_cgroup_file<P: AsRef<Path>, T: ToString>(path: P, data: T) -> Result<()> {
    write_cgroup_file_str(path, &data.to_string())?;

    Ok(())
}

#[inline]
pub fn read_cgroup_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    fs::read_to_string(path).with_context(|| format!("failed to open {:?}", path))
}

pub trait PathBufExt {
    fn join_safely(&self, p: &Path) -> Result<PathBuf>;
}

impl PathBufExt for PathBuf {
    fn join_safely(&self, p: &Path) -> Result<PathBuf> {
        if !p.is_absolute() && !p.as_os_str().is_empty() {
            bail!(
                "cannot join {:?} because it is not the absolute path.",
                p.display()
            )
        }
        Ok(PathBuf::from(format!("{}{}", self.display(), p.display())))
    }
}
