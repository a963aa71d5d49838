use serde_json::{Map, Value};

use super::field::{self, Path};

/// BMC vendor families with their own document shapes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Vendor {
    Dell,
    Hpe,
    Lenovo,
    Supermicro,
    #[default]
    Generic,
}

impl Vendor {
    pub fn from_manufacturer(manufacturer: &str) -> Option<Vendor> {
        let manufacturer = manufacturer.to_ascii_lowercase();

        if manufacturer.contains("dell") {
            Some(Vendor::Dell)
        } else if manufacturer.starts_with("hp") || manufacturer.contains("hewlett") {
            Some(Vendor::Hpe)
        } else if manufacturer.contains("lenovo") {
            Some(Vendor::Lenovo)
        } else if manufacturer.contains("supermicro") {
            Some(Vendor::Supermicro)
        } else {
            None
        }
    }

    /// Detect from a Manager resource, its `Manufacturer` or the vendor key
    /// of its `Oem` object.
    pub fn from_manager(manager: &Map<String, Value>) -> Option<Vendor> {
        if let Some(vendor) = manager
            .get("Manufacturer")
            .and_then(Value::as_str)
            .and_then(Vendor::from_manufacturer)
        {
            return Some(vendor);
        }

        manager
            .get("Oem")
            .and_then(Value::as_object)?
            .keys()
            .find_map(|key| Vendor::from_manufacturer(key))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Dell => "dell",
            Vendor::Hpe => "hpe",
            Vendor::Lenovo => "lenovo",
            Vendor::Supermicro => "supermicro",
            Vendor::Generic => "generic",
        }
    }

    /// Paths of the correctable error counter in a MemoryMetrics resource.
    pub fn correctable_paths(&self) -> &'static [Path] {
        match self {
            Vendor::Dell => &[
                &["LifeTime", "CorrectableECCErrorCount"],
                &["CurrentPeriod", "CorrectableECCErrorCount"],
            ],
            Vendor::Hpe => &[
                &["HealthData", "AlarmTrips", "CorrectableECCError"],
                &["CurrentPeriod", "CorrectableECCErrorCount"],
                &["LifeTime", "CorrectableECCErrorCount"],
            ],
            Vendor::Lenovo | Vendor::Supermicro | Vendor::Generic => &[
                &["CurrentPeriod", "CorrectableECCErrorCount"],
                &["LifeTime", "CorrectableECCErrorCount"],
                &["HealthData", "AlarmTrips", "CorrectableECCError"],
            ],
        }
    }

    /// Paths of the uncorrectable error counter in a MemoryMetrics resource.
    pub fn uncorrectable_paths(&self) -> &'static [Path] {
        match self {
            Vendor::Dell => &[
                &["LifeTime", "UncorrectableECCErrorCount"],
                &["CurrentPeriod", "UncorrectableECCErrorCount"],
            ],
            Vendor::Hpe => &[
                &["HealthData", "AlarmTrips", "UncorrectableECCError"],
                &["CurrentPeriod", "UncorrectableECCErrorCount"],
                &["LifeTime", "UncorrectableECCErrorCount"],
            ],
            Vendor::Lenovo | Vendor::Supermicro | Vendor::Generic => &[
                &["CurrentPeriod", "UncorrectableECCErrorCount"],
                &["LifeTime", "UncorrectableECCErrorCount"],
                &["HealthData", "AlarmTrips", "UncorrectableECCError"],
            ],
        }
    }

    /// Dell keeps the service tag in `SKU`.
    pub fn serial_paths(&self) -> &'static [Path] {
        match self {
            Vendor::Dell => &[&["SKU"], &["SerialNumber"]],
            _ => &[&["SerialNumber"]],
        }
    }

    /// Whether a firmware inventory member describes the running image.
    /// Dell lists previous and available images next to the installed one.
    pub fn is_installed_firmware(&self, id: &str) -> bool {
        match self {
            Vendor::Dell => !(id.starts_with("Previous") || id.starts_with("Available")),
            _ => true,
        }
    }
}

/// Pick the vendor of a scrape. Managers are asked first, systems second.
pub fn detect<'a, M, S>(managers: M, systems: S) -> Vendor
where
    M: IntoIterator<Item = &'a Map<String, Value>>,
    S: IntoIterator<Item = &'a Map<String, Value>>,
{
    managers
        .into_iter()
        .find_map(Vendor::from_manager)
        .or_else(|| {
            systems.into_iter().find_map(|system| {
                field::string(system, &[&["Manufacturer"]])
                    .found()
                    .and_then(|m| Vendor::from_manufacturer(&m))
            })
        })
        .unwrap_or_default()
}
