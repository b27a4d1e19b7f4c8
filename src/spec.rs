use serde::{Deserialize, Serialize};

/// A single resource-group request. Zero or empty generally means "leave
/// the knob unset".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub name: String,
    /// Hierarchy group the unit name is derived from, e.g. "docker".
    pub parent: String,
    /// Target slice for the new scope. Empty selects the system slice.
    pub slice: String,
    /// Memory limit in bytes.
    pub memory: i64,
    /// Combined memory+swap limit in bytes. Zero defaults to twice the
    /// memory limit, -1 disables the swap limit entirely.
    pub memory_swap: i64,
    /// Relative CPU weight.
    pub cpu_shares: u64,
    /// Microseconds of CPU time per scheduling period.
    pub cpu_quota: i64,
    /// Kernel-syntax CPU list, e.g. "0-2,7". Forwarded unvalidated.
    pub cpuset_cpus: String,
    /// Kernel-syntax NUMA node list. Forwarded unvalidated.
    pub cpuset_mems: String,
    /// Unrestricted device access. When false a small allow-list of safe
    /// nodes is applied on top of a default deny.
    pub device_access: bool,
    pub memory_accounting: bool,
    pub cpu_accounting: bool,
    /// Join the session scope the caller already lives in instead of
    /// creating a new unit.
    pub foreground: bool,
    /// Extra unit property overrides, applied in order. Only "Slice" is
    /// recognized today.
    pub unit_overrides: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_record_deserializes_with_defaults() {
        let spec: ResourceSpec = serde_json::from_str(
            r#"{
                "name": "c1",
                "parent": "docker",
                "memory": 100000000,
                "cpu_shares": 512
            }"#,
        )
        .expect("deserialize resource spec");

        assert_eq!(spec.name, "c1");
        assert_eq!(spec.parent, "docker");
        assert_eq!(spec.memory, 100_000_000);
        assert_eq!(spec.cpu_shares, 512);
        assert_eq!(spec.memory_swap, 0);
        assert!(spec.slice.is_empty());
        assert!(!spec.foreground);
        assert!(!spec.device_access);
        assert!(spec.unit_overrides.is_empty());
    }

    #[test]
    fn test_swap_disable_sentinel_round_trips() {
        let spec: ResourceSpec =
            serde_json::from_str(r#"{"name": "c1", "memory_swap": -1}"#).expect("deserialize");
        assert_eq!(spec.memory_swap, -1);
    }
}
