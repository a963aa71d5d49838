//! Turns fetched resources into canonical records.
//!
//! Dispatch is on the resource kind, and on the vendor where document
//! shapes diverge. Missing fields never fail a node, they produce fewer
//! records.

pub mod field;
mod performance;
pub mod vendor;

use std::collections::HashMap;

use serde_json::{Map, Value};

use self::field::{Lookup, Path};
pub use self::vendor::Vendor;
use super::record::{
    Category, FirmwareRecord, HealthRecord, MemoryErrorRecord, PowerState, PowerStateRecord,
    Record, Status, SystemInfoRecord, VersionRecord,
};
use super::resource::{ResourceKind, ResourceNode};

const ID_PATHS: &[Path] = &[&["Id"], &["MemberId"], &["Name"]];

const HEALTH_PATHS: &[Path] = &[&["Status", "Health"], &["Status", "HealthRollup"], &["Health"]];

pub struct Normalizer<'a> {
    vendor: Vendor,
    nodes: HashMap<&'a str, &'a ResourceNode>,
}

impl<'a> Normalizer<'a> {
    pub fn new(vendor: Vendor, nodes: &'a [ResourceNode]) -> Self {
        let nodes = nodes.iter().map(|node| (node.uri.as_str(), node)).collect();

        Normalizer { vendor, nodes }
    }

    /// Build a normalizer for the nodes of one walk, the vendor is detected
    /// from its managers and systems.
    pub fn detect(nodes: &'a [ResourceNode]) -> Self {
        let of_kind = |kind| {
            nodes
                .iter()
                .filter(move |node| node.kind == kind)
                .map(|node| &node.body)
        };

        let vendor = vendor::detect(
            of_kind(ResourceKind::Manager),
            of_kind(ResourceKind::ComputerSystem),
        );

        Self::new(vendor, nodes)
    }

    #[inline]
    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    fn parent(&self, node: &ResourceNode) -> Option<&'a ResourceNode> {
        node.parent
            .as_deref()
            .and_then(|uri| self.nodes.get(uri).copied())
    }

    /// Whether a resource of `kind` was fetched somewhere below `ancestor`.
    fn has_descendant(&self, ancestor: &str, kind: ResourceKind) -> bool {
        self.nodes
            .values()
            .filter(|node| node.kind == kind)
            .any(|node| {
                let mut current = *node;
                // parent links form a tree rooted at the walk roots
                while let Some(parent) = current.parent.as_deref() {
                    if parent == ancestor {
                        return true;
                    }
                    match self.nodes.get(parent) {
                        Some(next) => current = *next,
                        None => return false,
                    }
                }
                false
            })
    }

    /// Whether the parent of `node` also has `kind` resources fetched
    /// below it, in which case the inline array of `node` is stale.
    fn superseded(&self, node: &ResourceNode, kind: ResourceKind) -> bool {
        node.parent
            .as_deref()
            .is_some_and(|parent| self.has_descendant(parent, kind))
    }

    pub fn normalize(&self, node: &ResourceNode) -> Vec<Record> {
        let mut records = Vec::new();
        let body = &node.body;
        let uri = node.uri.as_str();

        match node.kind {
            ResourceKind::ServiceRoot => {
                if let Some(version) = field::string(body, &[&["RedfishVersion"]]).found() {
                    records.push(Record::Version(VersionRecord {
                        version,
                        source: node.uri.clone(),
                    }));
                }
            }
            ResourceKind::ComputerSystem => self.system(node, &mut records),
            ResourceKind::Manager => {
                push_health(&mut records, Category::Manager, body, uri);

                if let Some(version) = field::string(body, &[&["FirmwareVersion"]]).found() {
                    records.push(Record::Firmware(FirmwareRecord {
                        component: "BMC".to_string(),
                        version,
                        source: node.uri.clone(),
                    }));
                }
            }
            ResourceKind::Processor => push_health(&mut records, Category::Processor, body, uri),
            ResourceKind::Memory => push_health(&mut records, Category::Memory, body, uri),
            ResourceKind::Drive => push_health(&mut records, Category::Disk, body, uri),
            ResourceKind::StorageController => {
                push_health(&mut records, Category::StorageController, body, uri)
            }
            ResourceKind::Chassis => push_health(&mut records, Category::Chassis, body, uri),
            ResourceKind::Storage => {
                if !self.has_descendant(uri, ResourceKind::StorageController) {
                    for_each_member(body, "StorageControllers", uri, |member, source| {
                        push_health(&mut records, Category::StorageController, member, &source)
                    });
                }
            }
            ResourceKind::MemoryMetrics => self.memory_errors(node, &mut records),
            ResourceKind::SoftwareInventory => self.firmware(node, &mut records),
            ResourceKind::PowerSupply => {
                push_health(&mut records, Category::PowerSupply, body, uri)
            }
            ResourceKind::Fan => {
                push_health(&mut records, Category::Fan, body, uri);
                performance::fan(body, uri, false, &mut records);
            }
            ResourceKind::Thermal => {
                let superseded = self.superseded(node, ResourceKind::Fan);
                for_each_member(body, "Fans", uri, |member, source| {
                    if !superseded {
                        push_health(&mut records, Category::Fan, member, &source);
                    }
                    performance::fan(member, &source, true, &mut records);
                });
                performance::legacy_temperatures(body, uri, &mut records);
            }
            ResourceKind::Power => {
                if !self.superseded(node, ResourceKind::PowerSupply) {
                    for_each_member(body, "PowerSupplies", uri, |member, source| {
                        push_health(&mut records, Category::PowerSupply, member, &source);
                    });
                }
                performance::legacy_power(body, uri, &mut records);
            }
            ResourceKind::PowerSubsystem => performance::power_subsystem(body, uri, &mut records),
            ResourceKind::PowerSupplyMetrics => {
                performance::power_supply_metrics(body, self.parent(node), uri, &mut records)
            }
            ResourceKind::ThermalMetrics => {
                performance::temperature_summary(body, uri, &mut records)
            }
            ResourceKind::Collection
            | ResourceKind::ThermalSubsystem
            | ResourceKind::UpdateService
            | ResourceKind::Other => {}
        }

        records
    }

    pub fn normalize_all<'n, I>(&self, nodes: I) -> Vec<Record>
    where
        I: IntoIterator<Item = &'n ResourceNode>,
    {
        nodes
            .into_iter()
            .flat_map(|node| self.normalize(node))
            .collect()
    }

    fn system(&self, node: &ResourceNode, records: &mut Vec<Record>) {
        let body = &node.body;
        push_health(records, Category::System, body, &node.uri);

        if let Some(state) = field::string(body, &[&["PowerState"]]).found() {
            records.push(Record::PowerState(PowerStateRecord {
                state: PowerState::parse(&state),
                source: node.uri.clone(),
            }));
        }

        let text = |paths: &[Path]| field::string(body, paths).found().unwrap_or_default();
        records.push(Record::SystemInfo(SystemInfoRecord {
            system: instance_id(body, &node.uri),
            manufacturer: text(&[&["Manufacturer"]]),
            model: text(&[&["Model"]]),
            serial: text(self.vendor.serial_paths()),
            source: node.uri.clone(),
        }));

        if let Some(version) = field::string(body, &[&["BiosVersion"]]).found() {
            records.push(Record::Firmware(FirmwareRecord {
                component: "BIOS".to_string(),
                version,
                source: node.uri.clone(),
            }));
        }
    }

    fn memory_errors(&self, node: &ResourceNode, records: &mut Vec<Record>) {
        // the DIMM is the Memory resource the metrics hang off
        let dimm = match self.parent(node) {
            Some(parent) if parent.kind == ResourceKind::Memory => {
                if is_absent(&parent.body) {
                    return;
                }

                instance_id(&parent.body, &parent.uri)
            }
            _ => instance_id(&node.body, &node.uri),
        };

        let correctable = field::count(&node.body, self.vendor.correctable_paths());
        let uncorrectable = field::count(&node.body, self.vendor.uncorrectable_paths());
        if correctable.is_missing() && uncorrectable.is_missing() {
            return;
        }

        for (name, lookup) in [("correctable", &correctable), ("uncorrectable", &uncorrectable)] {
            if let Lookup::Unexpected(value) = lookup {
                debug!(message = "Unexpected memory error counter", uri = %node.uri, counter = name, %value);
            }
        }

        records.push(Record::MemoryErrors(MemoryErrorRecord {
            dimm,
            correctable: correctable.found(),
            uncorrectable: uncorrectable.found(),
            source: node.uri.clone(),
        }));
    }

    fn firmware(&self, node: &ResourceNode, records: &mut Vec<Record>) {
        let body = &node.body;

        // HPE iLO 4 groups its inventory by device class:
        // {"Current": {"SystemRomActive": [{"Name": .., "VersionString": ..}]}}
        if let Some(current) = body.get("Current").and_then(Value::as_object) {
            for (class, items) in current {
                let Some(items) = items.as_array() else {
                    continue;
                };

                for (index, item) in items.iter().enumerate() {
                    let Some(item) = item.as_object() else {
                        continue;
                    };

                    let version = field::string(item, &[&["VersionString"], &["Version"]]);
                    if let Some(version) = version.found() {
                        records.push(Record::Firmware(FirmwareRecord {
                            component: field::string(item, &[&["Name"]])
                                .found()
                                .unwrap_or_else(|| class.clone()),
                            version,
                            source: format!("{}#/Current/{}/{}", node.uri, class, index),
                        }));
                    }
                }
            }

            return;
        }

        let id = instance_id(body, &node.uri);
        if !self.vendor.is_installed_firmware(&id) {
            return;
        }

        if let Some(version) = field::string(body, &[&["Version"]]).found() {
            let component = field::string(body, &[&["Name"], &["Id"]])
                .found()
                .unwrap_or(id);

            records.push(Record::Firmware(FirmwareRecord {
                component,
                version,
                source: node.uri.clone(),
            }));
        }
    }
}

/// The vendor-provided identity of a component, the last URI segment when
/// there is none.
fn instance_id(object: &Map<String, Value>, uri: &str) -> String {
    field::string(object, ID_PATHS).found().unwrap_or_else(|| {
        uri.rsplit(['/', '#'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(uri)
            .to_string()
    })
}

fn is_absent(object: &Map<String, Value>) -> bool {
    field::get(object, &["Status", "State"])
        .and_then(Value::as_str)
        .is_some_and(|state| state.eq_ignore_ascii_case("absent"))
}

fn push_health(
    records: &mut Vec<Record>,
    category: Category,
    object: &Map<String, Value>,
    source: &str,
) {
    if is_absent(object) {
        return;
    }

    let status = match field::string(object, HEALTH_PATHS) {
        Lookup::Found(health) => Status::parse(&health),
        Lookup::Unexpected(_) => Status::Unknown,
        Lookup::Missing => return,
    };

    records.push(Record::Health(HealthRecord {
        category,
        id: instance_id(object, source),
        status,
        source: source.to_string(),
    }));
}

/// Visit the objects of an inline array, with their JSON pointer source.
fn for_each_member<F>(object: &Map<String, Value>, key: &str, uri: &str, mut f: F)
where
    F: FnMut(&Map<String, Value>, String),
{
    let Some(members) = object.get(key).and_then(Value::as_array) else {
        return;
    };

    for (index, member) in members.iter().enumerate() {
        if let Some(member) = member.as_object() {
            f(member, format!("{uri}#/{key}/{index}"));
        }
    }
}
