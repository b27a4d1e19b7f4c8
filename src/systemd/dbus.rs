use std::time::Duration;

use anyhow::{Context, Result};
use dbus::arg::{RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::Properties;
use dbus::blocking::{Connection, Proxy};

use super::properties::{Property, PropertyValue};

const SYSTEMD_DESTINATION: &str = "org.freedesktop.systemd1";
const SYSTEMD_PATH: &str = "/org/freedesktop/systemd1";
const MANAGER_INTERFACE: &str = "org.freedesktop.systemd1.Manager";
const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
const METHOD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Thin blocking wrapper around the manager's bus interface, exposing only
/// the three calls the engine consumes. Methods return the raw bus error so
/// the capability probe can classify it.
pub struct Client {
    conn: Connection,
}

impl Client {
    pub fn new() -> Result<Self> {
        // the unit manager lives on the system bus
        let conn = Connection::new_system().context("failed to connect to the system bus")?;
        Ok(Client { conn })
    }

    fn manager(&self) -> Proxy<'_, &Connection> {
        self.conn
            .with_proxy(SYSTEMD_DESTINATION, SYSTEMD_PATH, METHOD_TIMEOUT)
    }

    /// Asks the manager to create a transient unit carrying `properties`.
    pub fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        properties: &[Property],
    ) -> Result<(), dbus::Error> {
        let props: Vec<(&str, Variant<Box<dyn RefArg>>)> =
            properties.iter().map(to_variant).collect();
        let aux: Vec<(&str, Vec<(&str, Variant<Box<dyn RefArg>>)>)> = vec![];

        let (_job,): (dbus::Path<'static>,) = self.manager().method_call(
            MANAGER_INTERFACE,
            "StartTransientUnit",
            (name, mode, props, aux),
        )?;

        Ok(())
    }

    /// Updates the runtime properties of an already-running unit.
    pub fn set_unit_properties(
        &self,
        name: &str,
        properties: &[Property],
    ) -> Result<(), dbus::Error> {
        let props: Vec<(&str, Variant<Box<dyn RefArg>>)> =
            properties.iter().map(to_variant).collect();

        let _: () = self.manager().method_call(
            MANAGER_INTERFACE,
            "SetUnitProperties",
            (name, true, props),
        )?;

        Ok(())
    }

    /// Reads the control group the manager placed the unit under. The
    /// interface holding the property depends on the unit type.
    pub fn get_unit_control_group(&self, name: &str) -> Result<String, dbus::Error> {
        let path = unit_dbus_path(name);
        let proxy = self.conn.with_proxy(SYSTEMD_DESTINATION, path, METHOD_TIMEOUT);

        proxy.get(&unit_interface(name), "ControlGroup")
    }
}

pub(crate) fn is_unknown_method(err: &dbus::Error) -> bool {
    err.name() == Some(UNKNOWN_METHOD)
}

fn to_variant(property: &Property) -> (&str, Variant<Box<dyn RefArg>>) {
    let value: Box<dyn RefArg> = match &property.value {
        PropertyValue::Str(s) => Box::new(s.clone()),
        PropertyValue::Bool(b) => Box::new(*b),
        PropertyValue::U64(n) => Box::new(*n),
        PropertyValue::Pids(pids) => Box::new(pids.clone()),
        PropertyValue::DeviceAllow(nodes) => Box::new(
            nodes
                .iter()
                .map(|(node, access)| (node.to_string(), access.to_string()))
                .collect::<Vec<(String, String)>>(),
        ),
    };

    (property.name, Variant(value))
}

fn unit_interface(unit_name: &str) -> String {
    let kind = if unit_name.ends_with(".scope") {
        "Scope"
    } else if unit_name.ends_with(".service") {
        "Service"
    } else {
        "Unit"
    };

    format!("org.freedesktop.systemd1.{}", kind)
}

/// Encodes a unit name into its bus object path, hex-escaping everything
/// outside [a-zA-Z0-9] the way the manager does. Object path labels must
/// not start with a digit, so a leading digit is escaped too.
fn unit_dbus_path(unit_name: &str) -> String {
    let mut escaped = String::with_capacity(unit_name.len());
    for (i, b) in unit_name.bytes().enumerate() {
        if b.is_ascii_alphanumeric() && !(i == 0 && b.is_ascii_digit()) {
            escaped.push(b as char);
        } else {
            escaped.push_str(&format!("_{:02x}", b));
        }
    }

    format!("/org/freedesktop/systemd1/unit/{}", escaped)
}
