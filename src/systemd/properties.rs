use anyhow::{bail, Result};
use nix::unistd::Pid;

use crate::devices::{self, DeviceRule};
use crate::spec::{KeyValue, ResourceSpec};

const DEFAULT_SLICE: &str = "system.slice";

pub(crate) const MEMORY_MEMSW_LIMIT: &str = "memory.memsw.limit_in_bytes";
pub(crate) const CPU_CFS_QUOTA: &str = "cpu.cfs_quota_us";
pub(crate) const CPUSET_CPUS: &str = "cpuset.cpus";
pub(crate) const CPUSET_MEMS: &str = "cpuset.mems";

/// One unit property handed to the service manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: &'static str,
    pub value: PropertyValue,
}

impl Property {
    fn new(name: &'static str, value: PropertyValue) -> Self {
        Property { name, value }
    }
}

/// Property payloads kept as plain values; conversion to bus variants
/// happens at the call boundary only.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    U64(u64),
    Pids(Vec<u32>),
    DeviceAllow(Vec<(&'static str, &'static str)>),
}

/// The split between what the manager applies for us and what has to be
/// written into the controller hierarchies by hand.
#[derive(Debug, Default)]
pub struct Plan {
    pub properties: Vec<Property>,
    pub cpu: Vec<KeyValue>,
    pub cpuset: Vec<KeyValue>,
    pub memory: Vec<KeyValue>,
    pub devices: Vec<DeviceRule>,
}

impl Plan {
    pub fn build(spec: &ResourceSpec, pid: Pid) -> Result<Plan> {
        if spec.memory < 0 || spec.cpu_quota < 0 || spec.memory_swap < -1 {
            bail!("resource limits must not be negative");
        }

        let mut plan = Plan::default();

        let mut slice = DEFAULT_SLICE.to_owned();
        if !spec.slice.is_empty() {
            slice = spec.slice.clone();
        }
        for kv in &spec.unit_overrides {
            match kv.key.as_str() {
                "Slice" => slice = kv.value.clone(),
                key => bail!("unknown unit property override: {}", key),
            }
        }

        // -1 leaves the swap limit alone entirely
        if spec.memory_swap >= 0 && (spec.memory != 0 || spec.memory_swap > 0) {
            let mut memory_swap = spec.memory_swap;
            if memory_swap == 0 {
                // by default twice the memory limit
                memory_swap = spec.memory * 2;
            }
            plan.memory
                .push(KeyValue::new(MEMORY_MEMSW_LIMIT, memory_swap.to_string()));
        }

        // the manager exposes no unit properties for these
        if spec.cpu_quota != 0 {
            plan.cpu
                .push(KeyValue::new(CPU_CFS_QUOTA, spec.cpu_quota.to_string()));
        }
        if !spec.cpuset_cpus.is_empty() {
            plan.cpuset
                .push(KeyValue::new(CPUSET_CPUS, spec.cpuset_cpus.clone()));
        }
        if !spec.cpuset_mems.is_empty() {
            plan.cpuset
                .push(KeyValue::new(CPUSET_MEMS, spec.cpuset_mems.clone()));
        }

        // a foreground process already belongs to a unit, so identity
        // properties would fight the scope it lives in
        if !spec.foreground {
            plan.properties
                .push(Property::new("Slice", PropertyValue::Str(slice)));
            plan.properties.push(Property::new(
                "Description",
                PropertyValue::Str(format!("container {}", spec.name)),
            ));
            plan.properties.push(Property::new(
                "PIDs",
                PropertyValue::Pids(vec![pid.as_raw() as u32]),
            ));
        }

        if !spec.device_access {
            if spec.foreground {
                // An existing scope cannot take device properties, so the
                // policy is replayed by hand on a fresh hierarchy: deny
                // everything first, then allow the safe set back in.
                plan.devices.push(devices::deny_all());
                plan.devices.extend(devices::FOREGROUND_MKNOD_RULES);
                plan.devices
                    .extend(devices::DEFAULT_ALLOWED_DEVICES.iter().map(|n| n.rule()));
            } else {
                plan.properties.push(Property::new(
                    "DevicePolicy",
                    PropertyValue::Str("strict".to_owned()),
                ));
                plan.properties.push(Property::new(
                    "DeviceAllow",
                    PropertyValue::DeviceAllow(
                        devices::DEFAULT_ALLOWED_DEVICES
                            .iter()
                            .map(|n| (n.path, "rwm"))
                            .collect(),
                    ),
                ));
            }

            // no node path can express the pts slave range or the usually
            // absent tun node, these always go in by hand
            plan.devices.extend(devices::WILDCARD_DEVICE_RULES);
        }

        // a manual write only sticks if the controller accounting is on
        if spec.memory_accounting || !plan.memory.is_empty() {
            plan.properties
                .push(Property::new("MemoryAccounting", PropertyValue::Bool(true)));
        }
        if spec.cpu_accounting || !plan.cpu.is_empty() {
            plan.properties
                .push(Property::new("CPUAccounting", PropertyValue::Bool(true)));
        }

        if spec.memory != 0 {
            plan.properties.push(Property::new(
                "MemoryLimit",
                PropertyValue::U64(spec.memory as u64),
            ));
        }
        if spec.cpu_shares != 0 {
            plan.properties.push(Property::new(
                "CPUShares",
                PropertyValue::U64(spec.cpu_shares),
            ));
        }

        Ok(plan)
    }
}
