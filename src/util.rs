use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use procfs::process::Process;

/// Returns the absolute path where the named v1 controller hierarchy is
/// mounted.
pub fn find_cgroup_mountpoint(subsystem: &str) -> Result<PathBuf> {
    Process::myself()?
        .mountinfo()?
        .into_iter()
        .find(|m| m.fs_type == "cgroup" && mount_matches(&m.mount_point, subsystem))
        .map(|m| m.mount_point)
        .ok_or_else(|| anyhow!("could not find mountpoint for {}", subsystem))
}

/// Cgroup directory of the calling process for the given controller,
/// relative to the controller mount point.
pub fn get_this_cgroup_dir(subsystem: &str) -> Result<PathBuf> {
    let process = Process::myself().context("failed to read own process info")?;
    cgroup_dir_of(&process, subsystem)
}

/// Cgroup directory of init for the given controller. Directories that
/// must not land inside the caller's own session scope go below this one.
pub fn get_init_cgroup_dir(subsystem: &str) -> Result<PathBuf> {
    let process = Process::new(1).context("failed to read init process info")?;
    cgroup_dir_of(&process, subsystem)
}

fn cgroup_dir_of(process: &Process, subsystem: &str) -> Result<PathBuf> {
    process
        .cgroups()?
        .into_iter()
        .find(|c| entry_matches(&c.controllers, subsystem))
        .map(|c| PathBuf::from(c.pathname))
        .ok_or_else(|| anyhow!("could not find cgroup entry for {}", subsystem))
}

fn entry_matches(controllers: &[String], subsystem: &str) -> bool {
    controllers.iter().any(|c| c == subsystem)
}

fn mount_matches(mount_point: &Path, subsystem: &str) -> bool {
    // Some systems mount cpu and cpuacct in the same directory, others
    // in their own directories. This should handle both cases.
    if subsystem == "cpu" {
        return mount_point.ends_with("cpu,cpuacct") || mount_point.ends_with("cpu");
    }
    if subsystem == "cpuacct" {
        return mount_point.ends_with("cpu,cpuacct") || mount_point.ends_with("cpuacct");
    }

    // Named hierarchies mount under the bare name.
    let name = subsystem.trim_start_matches("name=");
    mount_point.ends_with(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_matches_plain_controller() {
        let controllers = vec!["memory".to_string()];
        assert!(entry_matches(&controllers, "memory"));
        assert!(!entry_matches(&controllers, "cpu"));
    }

    #[test]
    fn test_entry_matches_comounted_controllers() {
        let controllers = vec!["cpu".to_string(), "cpuacct".to_string()];
        assert!(entry_matches(&controllers, "cpu"));
        assert!(entry_matches(&controllers, "cpuacct"));
        assert!(!entry_matches(&controllers, "cpuset"));
    }

    #[test]
    fn test_entry_matches_named_hierarchy() {
        let controllers = vec!["name=systemd".to_string()];
        assert!(entry_matches(&controllers, "name=systemd"));
        assert!(!entry_matches(&controllers, "systemd"));
    }

    #[test]
    fn test_mount_matches_comounted_cpu() {
        let mount_point = Path::new("/sys/fs/cgroup/cpu,cpuacct");
        assert!(mount_matches(mount_point, "cpu"));
        assert!(mount_matches(mount_point, "cpuacct"));
        assert!(!mount_matches(mount_point, "cpuset"));
    }

    #[test]
    fn test_mount_matches_named_hierarchy() {
        let mount_point = Path::new("/sys/fs/cgroup/systemd");
        assert!(mount_matches(mount_point, "name=systemd"));
    }

    #[test]
    fn test_mount_matches_devices() {
        assert!(mount_matches(
            Path::new("/sys/fs/cgroup/devices"),
            "devices"
        ));
        assert!(!mount_matches(Path::new("/sys/fs/cgroup/cpuset"), "devices"));
    }
}
