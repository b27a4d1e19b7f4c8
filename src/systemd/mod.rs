//! The service-manager-backed cgroup driver. Limits the manager exposes as
//! unit properties go through the bus; everything else is written into the
//! controller hierarchies directly after the manager reveals where the unit
//! ended up.
mod dbus;
mod manager;
mod properties;

pub use self::dbus::Client;
pub use self::manager::{Context, Manager};
pub use self::properties::{Plan, Property, PropertyValue};
