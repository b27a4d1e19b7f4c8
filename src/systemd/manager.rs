use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, bail, Context as _, Result};
use nix::unistd::Pid;

#[cfg(feature = "systemd_cgroups")]
use systemd::daemon::booted;
#[cfg(not(feature = "systemd_cgroups"))]
fn booted() -> Result<bool> {
    bail!("This build does not include the systemd cgroups feature")
}

use super::dbus::{is_unknown_method, Client};
use super::properties::{Plan, CPUSET_CPUS, CPUSET_MEMS};
use crate::common::{self, ActiveCgroup, CgroupManager, PathBufExt};
use crate::devices::DeviceRule;
use crate::spec::{KeyValue, ResourceSpec};
use crate::util;

const UNIT_MODE_REPLACE: &str = "replace";
const SYSTEMD_HIERARCHY: &str = "name=systemd";
const DEVICES_ALLOW: &str = "devices.allow";
const DEVICES_DENY: &str = "devices.deny";

enum Probe {
    Supported(Client),
    Unsupported,
}

/// Shared manager connection and capability cache. One of these is built
/// per process and handed to every manager instance; probing happens on
/// first use and is never repeated.
pub struct Context {
    probe: Mutex<Option<Probe>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            probe: Mutex::new(None),
        }
    }

    /// Whether the system is booted under the expected init system and the
    /// manager supports transient units.
    pub fn usable(&self) -> bool {
        matches!(*self.probed(), Some(Probe::Supported(_)))
    }

    fn probed(&self) -> MutexGuard<'_, Option<Probe>> {
        let mut guard = self.probe.lock().unwrap();
        if guard.is_none() {
            *guard = Some(probe_manager());
        }

        guard
    }

    /// Runs one manager call on the shared connection. Calls serialize on
    /// the internal lock; filesystem work happens outside it.
    fn with_client<T>(
        &self,
        f: impl FnOnce(&Client) -> Result<T, dbus::Error>,
    ) -> Result<T> {
        match self.probed().as_ref().unwrap() {
            Probe::Supported(client) => f(client).map_err(|err| anyhow!("{}", err)),
            Probe::Unsupported => {
                bail!("transient units are not supported by the service manager")
            }
        }
    }
}

fn probe_manager() -> Probe {
    if !booted().unwrap_or(false) {
        return Probe::Unsupported;
    }

    let client = match Client::new() {
        Ok(client) => client,
        Err(err) => {
            log::warn!("failed to connect to the service manager: {}", err);
            return Probe::Unsupported;
        }
    };

    // A deliberately invalid creation call. Every answer except "unknown
    // method" means the call exists.
    if let Err(err) = client.start_transient_unit("test.scope", "invalid", &[]) {
        if is_unknown_method(&err) {
            return Probe::Unsupported;
        }
    }

    Probe::Supported(client)
}

/// Applies resource specs by creating transient scope units through the
/// manager and writing the leftovers straight into the controller
/// hierarchies.
pub struct Manager {
    context: Arc<Context>,
}

impl Manager {
    pub fn new(context: Arc<Context>) -> Self {
        Manager { context }
    }
}

impl CgroupManager for Manager {
    fn apply(&self, spec: &ResourceSpec, pid: Pid) -> Result<ActiveCgroup> {
        let mut handle = ActiveCgroup::default();
        match self.apply_inner(spec, pid, &mut handle) {
            Ok(()) => Ok(handle),
            Err(err) => {
                // nothing partially applied survives, including any
                // directories created before the failing step
                let _ = handle.cleanup();
                Err(err)
            }
        }
    }
}

impl Manager {
    fn apply_inner(&self, spec: &ResourceSpec, pid: Pid, handle: &mut ActiveCgroup) -> Result<()> {
        let plan = Plan::build(spec, pid)?;

        let unit_name = if spec.foreground {
            // the caller already lives inside a unit, adjust that one
            // instead of creating a new one
            let cgroup = util::get_this_cgroup_dir(SYSTEMD_HIERARCHY)?;
            cgroup
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("cannot derive a unit name from {:?}", cgroup))?
        } else {
            scope_unit_name(spec)
        };

        log::debug!("applying resource spec {} via unit {}", spec.name, unit_name);

        if spec.foreground {
            if !plan.properties.is_empty() {
                self.context
                    .with_client(|client| client.set_unit_properties(&unit_name, &plan.properties))
                    .with_context(|| format!("failed to update properties of unit {}", unit_name))?;
            }
        } else {
            self.context
                .with_client(|client| {
                    client.start_transient_unit(&unit_name, UNIT_MODE_REPLACE, &plan.properties)
                })
                .with_context(|| format!("failed to start transient unit {}", unit_name))?;
        }

        // Device rules and cpuset membership always need the literal path
        // the manager picked, so this lookup is unconditional.
        let cgroup = self
            .context
            .with_client(|client| client.get_unit_control_group(&unit_name))
            .with_context(|| format!("failed to look up the control group of unit {}", unit_name))?;
        let cgroup = PathBuf::from(cgroup);

        if !spec.device_access {
            self.apply_devices(spec, &plan, &cgroup, pid, handle)?;
        }

        if !plan.cpu.is_empty() {
            let mountpoint = util::find_cgroup_mountpoint("cpu")?;
            write_args(&mountpoint.join_safely(&cgroup)?, &plan.cpu)?;
        }

        if !plan.memory.is_empty() {
            let mountpoint = util::find_cgroup_mountpoint("memory")?;
            write_args(&mountpoint.join_safely(&cgroup)?, &plan.memory)?;
        }

        if !plan.cpuset.is_empty() {
            self.apply_cpuset(spec, &plan.cpuset, pid, handle)?;
        }

        Ok(())
    }

    fn apply_devices(
        &self,
        spec: &ResourceSpec,
        plan: &Plan,
        cgroup: &Path,
        pid: Pid,
        handle: &mut ActiveCgroup,
    ) -> Result<()> {
        log::debug!("applying device rules");
        let mountpoint = util::find_cgroup_mountpoint("devices")?;

        let path = if spec.foreground {
            // Rewriting the device policy of the session scope the process
            // already lives in would break the session, so the rules go
            // into a private subtree under the init hierarchy instead.
            let init = util::get_init_cgroup_dir("devices")?;
            let path = mountpoint
                .join_safely(&init)?
                .join(&spec.parent)
                .join(&spec.name);

            handle.track(&path);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {:?}", path))?;
            common::write_cgroup_file(path.join(common::CGROUP_PROCS), pid)?;
            path
        } else {
            mountpoint.join_safely(cgroup)?
        };

        for rule in &plan.devices {
            apply_device_rule(&path, rule)?;
        }

        Ok(())
    }

    fn apply_cpuset(
        &self,
        spec: &ResourceSpec,
        args: &[KeyValue],
        pid: Pid,
        handle: &mut ActiveCgroup,
    ) -> Result<()> {
        log::debug!("joining the cpuset hierarchy");
        let mountpoint = util::find_cgroup_mountpoint("cpuset")?;
        let init = util::get_init_cgroup_dir("cpuset")?;
        let root_path = mountpoint.join_safely(&init)?;

        // The manager never sets this controller up. One flat level below
        // the root: every cpuset directory must have fully populated cpu
        // and node lists before it accepts members, and a deeper tree
        // would mean populating every ancestor.
        let path = root_path.join(format!("{}-{}", spec.parent, spec.name));

        handle.track(&path);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {:?}", path))?;

        apply_cpuset_args(&root_path, &path, args)?;
        common::write_cgroup_file(path.join(common::CGROUP_PROCS), pid)?;

        Ok(())
    }
}

fn scope_unit_name(spec: &ResourceSpec) -> String {
    format!("{}-{}.scope", spec.parent, spec.name)
}

fn write_args(path: &Path, args: &[KeyValue]) -> Result<()> {
    for kv in args {
        common::write_cgroup_file_str(path.join(&kv.key), &kv.value)?;
    }

    Ok(())
}

fn apply_device_rule(path: &Path, rule: &DeviceRule) -> Result<()> {
    let file = if rule.allow {
        DEVICES_ALLOW
    } else {
        DEVICES_DENY
    };

    common::write_cgroup_file_str(path.join(file), &rule.to_string())
}

/// Writes the requested cpuset lists and copies every unset one down from
/// the root directory. An empty cpuset accepts no processes.
fn apply_cpuset_args(root_path: &Path, path: &Path, args: &[KeyValue]) -> Result<()> {
    let mut found_cpus = false;
    let mut found_mems = false;

    for kv in args {
        if kv.key == CPUSET_CPUS {
            found_cpus = true;
        }
        if kv.key == CPUSET_MEMS {
            found_mems = true;
        }
        common::write_cgroup_file_str(path.join(&kv.key), &kv.value)?;
    }

    if !found_cpus {
        let cpus = common::read_cgroup_file(root_path.join(CPUSET_CPUS))?;
        common::write_cgroup_file_str(path.join(CPUSET_CPUS), &cpus)?;
    }

    if !found_mems {
        let mems = common::read_cgroup_file(root_path.join(CPUSET_MEMS))?;
        common::write_cgroup_file_str(path.join(CPUSET_MEMS), &mems)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices;
    use crate::test::{create_temp_dir, set_fixture, setup};
    use std::fs::read_to_string;

    #[test]
    fn test_scope_unit_name() {
        let spec = ResourceSpec {
            name: "c1".to_owned(),
            parent: "docker".to_owned(),
            ..Default::default()
        };

        assert_eq!(scope_unit_name(&spec), "docker-c1.scope");
    }

    #[test]
    fn test_write_args() {
        let (tmp, quota) = setup("test_write_args", "cpu.cfs_quota_us");

        let args = vec![KeyValue::new("cpu.cfs_quota_us", "50000")];
        write_args(&tmp, &args).expect("write args");

        let content = read_to_string(quota).expect("read file content");
        assert_eq!(content, "50000");
    }

    #[test]
    fn test_device_rule_routing() {
        let tmp =
            create_temp_dir("test_device_rule_routing").expect("create temp directory for test");
        set_fixture(&tmp, DEVICES_ALLOW, "").expect("set fixture");
        set_fixture(&tmp, DEVICES_DENY, "").expect("set fixture");

        apply_device_rule(&tmp, &devices::DEFAULT_ALLOWED_DEVICES[0].rule())
            .expect("apply allow rule");
        apply_device_rule(&tmp, &devices::deny_all()).expect("apply deny rule");

        assert_eq!(
            read_to_string(tmp.join(DEVICES_ALLOW)).expect("read allow file"),
            "c 1:3 rwm"
        );
        assert_eq!(
            read_to_string(tmp.join(DEVICES_DENY)).expect("read deny file"),
            "a *:* rwm"
        );
    }

    #[test]
    fn test_foreground_device_sequence() {
        let tmp = create_temp_dir("test_foreground_device_sequence")
            .expect("create temp directory for test");
        set_fixture(&tmp, DEVICES_ALLOW, "").expect("set fixture");
        set_fixture(&tmp, DEVICES_DENY, "").expect("set fixture");

        let spec = ResourceSpec {
            name: "c1".to_owned(),
            parent: "docker".to_owned(),
            foreground: true,
            ..Default::default()
        };
        let plan = Plan::build(&spec, Pid::from_raw(1234)).expect("build plan");

        for rule in &plan.devices {
            apply_device_rule(&tmp, rule).expect("apply device rule");
        }

        // cgroup files are not appended, so each file holds the last rule
        // written to it: the single deny and the final tun allow
        assert_eq!(
            read_to_string(tmp.join(DEVICES_DENY)).expect("read deny file"),
            "a *:* rwm"
        );
        assert_eq!(
            read_to_string(tmp.join(DEVICES_ALLOW)).expect("read allow file"),
            "c 10:200 rwm"
        );
    }

    #[test]
    fn test_cpuset_inherits_unset_lists_from_root() {
        let tmp = create_temp_dir("test_cpuset_inherits_unset_lists_from_root")
            .expect("create temp directory for test");
        set_fixture(&tmp, CPUSET_CPUS, "0-3").expect("set root cpus");
        set_fixture(&tmp, CPUSET_MEMS, "0").expect("set root mems");

        let child = tmp.join("docker-c1");
        std::fs::create_dir_all(&child).expect("create child dir");
        set_fixture(&child, CPUSET_CPUS, "").expect("set child cpus");
        set_fixture(&child, CPUSET_MEMS, "").expect("set child mems");

        apply_cpuset_args(&tmp, &child, &[]).expect("apply cpuset args");

        assert_eq!(
            read_to_string(child.join(CPUSET_CPUS)).expect("read cpus"),
            "0-3"
        );
        assert_eq!(
            read_to_string(child.join(CPUSET_MEMS)).expect("read mems"),
            "0"
        );
    }

    #[test]
    fn test_cpuset_explicit_cpus_inherited_mems() {
        let tmp = create_temp_dir("test_cpuset_explicit_cpus_inherited_mems")
            .expect("create temp directory for test");
        set_fixture(&tmp, CPUSET_CPUS, "0-3").expect("set root cpus");
        set_fixture(&tmp, CPUSET_MEMS, "0-1").expect("set root mems");

        let child = tmp.join("docker-c1");
        std::fs::create_dir_all(&child).expect("create child dir");
        set_fixture(&child, CPUSET_CPUS, "").expect("set child cpus");
        set_fixture(&child, CPUSET_MEMS, "").expect("set child mems");

        let args = vec![KeyValue::new(CPUSET_CPUS, "0-1")];
        apply_cpuset_args(&tmp, &child, &args).expect("apply cpuset args");

        assert_eq!(
            read_to_string(child.join(CPUSET_CPUS)).expect("read cpus"),
            "0-1"
        );
        assert_eq!(
            read_to_string(child.join(CPUSET_MEMS)).expect("read mems"),
            "0-1"
        );
    }
}
