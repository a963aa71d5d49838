//! Canonical records, the vendor independent facts extracted from resources.

/// Component categories of `redfish_health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Processor,
    Memory,
    StorageController,
    Disk,
    Fan,
    PowerSupply,
    Chassis,
    System,
    Manager,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Processor => "processor",
            Category::Memory => "memory",
            Category::StorageController => "storage_controller",
            Category::Disk => "disk",
            Category::Fan => "fan",
            Category::PowerSupply => "power_supply",
            Category::Chassis => "chassis",
            Category::System => "system",
            Category::Manager => "manager",
        }
    }
}

/// Health of a component, encoded as Unknown=0, Ok=1, Warning=2,
/// Critical=3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Unknown,
    Ok,
    Warning,
    Critical,
}

impl Status {
    /// Case-insensitive, strings nobody told us about are `Unknown`.
    pub fn parse(s: &str) -> Status {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "good" | "operable" | "enabled" => Status::Ok,
            "warning" | "degraded" => Status::Warning,
            "critical" | "error" | "failed" => Status::Critical,
            _ => Status::Unknown,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Status::Unknown => 0.0,
            Status::Ok => 1.0,
            Status::Warning => 2.0,
            Status::Critical => 3.0,
        }
    }
}

/// Power state of the target, encoded as Off=0, On=1, Unknown=-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
    Unknown,
}

impl PowerState {
    pub fn parse(s: &str) -> PowerState {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => PowerState::On,
            "off" => PowerState::Off,
            _ => PowerState::Unknown,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            PowerState::Off => 0.0,
            PowerState::On => 1.0,
            PowerState::Unknown => -1.0,
        }
    }

    /// A target with several systems is on when any of them is on, off
    /// when all of them are off.
    pub fn combine<I>(states: I) -> Option<PowerState>
    where
        I: IntoIterator<Item = PowerState>,
    {
        let mut combined = None;
        for state in states {
            combined = Some(match (combined, state) {
                (_, PowerState::On) | (Some(PowerState::On), _) => PowerState::On,
                (None | Some(PowerState::Off), PowerState::Off) => PowerState::Off,
                _ => PowerState::Unknown,
            });
        }

        combined
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HealthRecord {
    pub category: Category,
    pub id: String,
    pub status: Status,
    pub source: String,
}

/// Error counters of one DIMM, a counter the BMC does not report is `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryErrorRecord {
    pub dimm: String,
    pub correctable: Option<u64>,
    pub uncorrectable: Option<u64>,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FirmwareRecord {
    pub component: String,
    pub version: String,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PowerStateRecord {
    pub state: PowerState,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SystemInfoRecord {
    pub system: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionRecord {
    pub version: String,
    pub source: String,
}

/// A power reading, `reading` is `None` when the BMC reports `null`.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerRecord {
    pub device_name: String,
    pub device_model: String,
    /// The property the reading came from, e.g. `PowerInputWatts`.
    pub kind: String,
    pub reading: Option<f64>,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemperatureRecord {
    pub sensor: String,
    pub celsius: Option<f64>,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FanRecord {
    pub rpm: Option<f64>,
    pub pwm: Option<f64>,
    /// Found in the deprecated `Thermal` resource.
    pub legacy: bool,
    pub source: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Health(HealthRecord),
    MemoryErrors(MemoryErrorRecord),
    Firmware(FirmwareRecord),
    PowerState(PowerStateRecord),
    SystemInfo(SystemInfoRecord),
    Version(VersionRecord),
    Power(PowerRecord),
    Temperature(TemperatureRecord),
    Fan(FanRecord),
}

impl Record {
    /// URI of the resource the record was extracted from. Members of inline
    /// arrays carry a JSON pointer fragment, e.g. `.../Thermal#/Fans/0`.
    pub fn source(&self) -> &str {
        match self {
            Record::Health(r) => &r.source,
            Record::MemoryErrors(r) => &r.source,
            Record::Firmware(r) => &r.source,
            Record::PowerState(r) => &r.source,
            Record::SystemInfo(r) => &r.source,
            Record::Version(r) => &r.source,
            Record::Power(r) => &r.source,
            Record::Temperature(r) => &r.source,
            Record::Fan(r) => &r.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse() {
        for (input, want) in [
            ("OK", Status::Ok),
            ("ok", Status::Ok),
            ("Good", Status::Ok),
            ("Operable", Status::Ok),
            ("Enabled", Status::Ok),
            ("Warning", Status::Warning),
            ("Degraded", Status::Warning),
            ("Critical", Status::Critical),
            ("Error", Status::Critical),
            ("FAILED", Status::Critical),
            ("", Status::Unknown),
            ("Absent", Status::Unknown),
            ("something new", Status::Unknown),
        ] {
            assert_eq!(Status::parse(input), want, "{input}");
        }
    }

    #[test]
    fn status_values() {
        assert_eq!(Status::Unknown.value(), 0.0);
        assert_eq!(Status::Ok.value(), 1.0);
        assert_eq!(Status::Warning.value(), 2.0);
        assert_eq!(Status::Critical.value(), 3.0);
    }

    #[test]
    fn power_state_combine() {
        use PowerState::*;

        assert_eq!(PowerState::combine([]), None);
        assert_eq!(PowerState::combine([Off]), Some(Off));
        assert_eq!(PowerState::combine([Off, Off]), Some(Off));
        assert_eq!(PowerState::combine([Off, On]), Some(On));
        assert_eq!(PowerState::combine([Unknown, On, Off]), Some(On));
        assert_eq!(PowerState::combine([Off, Unknown]), Some(Unknown));
        assert_eq!(PowerState::combine([Unknown, Off]), Some(Unknown));
        assert_eq!(PowerState::parse("PoweringOn"), Unknown);
    }
}
