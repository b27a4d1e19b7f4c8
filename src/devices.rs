use std::fmt::{self, Display};

/// Device class as understood by the devices controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    All,
    Char,
    Block,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::All => "a",
            DeviceType::Char => "c",
            DeviceType::Block => "b",
        }
    }
}

/// One `devices.allow`/`devices.deny` line. A missing major or minor
/// matches every number in that position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRule {
    pub allow: bool,
    pub typ: DeviceType,
    pub major: Option<i64>,
    pub minor: Option<i64>,
    pub access: &'static str,
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self
            .major
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());
        let minor = self
            .minor
            .map(|m| m.to_string())
            .unwrap_or_else(|| "*".to_string());

        write!(f, "{} {}:{} {}", self.typ.as_str(), major, minor, self.access)
    }
}

const fn allow_char(major: i64, minor: Option<i64>, access: &'static str) -> DeviceRule {
    DeviceRule {
        allow: true,
        typ: DeviceType::Char,
        major: Some(major),
        minor,
        access,
    }
}

/// A device node that restricted groups keep access to. Carries both the
/// filesystem path for the manager's node-based allow property and the
/// numbers for raw controller rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    pub path: &'static str,
    pub typ: DeviceType,
    pub major: i64,
    pub minor: i64,
}

impl DeviceNode {
    pub fn rule(&self) -> DeviceRule {
        DeviceRule {
            allow: true,
            typ: self.typ,
            major: Some(self.major),
            minor: Some(self.minor),
            access: "rwm",
        }
    }
}

const fn char_node(path: &'static str, major: i64, minor: i64) -> DeviceNode {
    DeviceNode {
        path,
        typ: DeviceType::Char,
        major,
        minor,
    }
}

/// The fixed safe set every restricted group is allowed.
pub const DEFAULT_ALLOWED_DEVICES: [DeviceNode; 10] = [
    char_node("/dev/null", 1, 3),
    char_node("/dev/zero", 1, 5),
    char_node("/dev/full", 1, 7),
    char_node("/dev/random", 1, 8),
    char_node("/dev/urandom", 1, 9),
    char_node("/dev/tty", 5, 0),
    char_node("/dev/console", 5, 1),
    char_node("/dev/tty0", 4, 0),
    char_node("/dev/tty1", 4, 1),
    char_node("/dev/pts/ptmx", 5, 2),
];

/// mknod has to keep working inside the group even though the created
/// nodes stay inaccessible.
pub const FOREGROUND_MKNOD_RULES: [DeviceRule; 2] = [
    DeviceRule {
        allow: true,
        typ: DeviceType::Char,
        major: None,
        minor: None,
        access: "m",
    },
    DeviceRule {
        allow: true,
        typ: DeviceType::Block,
        major: None,
        minor: None,
        access: "m",
    },
];

/// The pts slave range has no stable minor and the tun node usually does
/// not exist on disk, so neither can be expressed as a node path.
pub const WILDCARD_DEVICE_RULES: [DeviceRule; 2] = [
    allow_char(136, None, "rwm"),
    allow_char(10, Some(200), "rwm"),
];

pub fn deny_all() -> DeviceRule {
    DeviceRule {
        allow: false,
        typ: DeviceType::All,
        major: None,
        minor: None,
        access: "rwm",
    }
}
