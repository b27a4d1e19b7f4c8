//! Placement of processes under resource-limited control groups.
//!
//! The service manager owns cgroup creation on booted systems, so limits it
//! understands are handed over as transient unit properties. Everything it
//! does not expose (swap limits, CPU quota, cpuset pinning, fine-grained
//! device rules) is written straight into the controller hierarchies once
//! the manager reveals where it put the unit.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod common;
pub mod devices;
pub mod spec;
pub mod systemd;
mod test;
pub mod util;

pub use common::{create_cgroup_manager, ActiveCgroup, CgroupManager};
pub use spec::{KeyValue, ResourceSpec};
