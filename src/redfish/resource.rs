use serde_json::{Map, Value};

use super::client::normalize_uri;

/// The Redfish resource types the exporter knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ServiceRoot,
    Collection,
    ComputerSystem,
    Chassis,
    Manager,
    Processor,
    Memory,
    MemoryMetrics,
    Storage,
    StorageController,
    Drive,
    Thermal,
    Power,
    PowerSubsystem,
    PowerSupply,
    PowerSupplyMetrics,
    ThermalSubsystem,
    ThermalMetrics,
    Fan,
    UpdateService,
    SoftwareInventory,
    Other,
}

impl ResourceKind {
    /// Parse `@odata.type`, e.g. `#Processor.v1_7_0.Processor`.
    pub fn from_odata_type(odata_type: &str) -> Option<ResourceKind> {
        let name = odata_type.trim_start_matches('#');
        let name = name.split('.').next().unwrap_or(name);

        if name.ends_with("Collection") {
            return Some(ResourceKind::Collection);
        }

        let kind = match name {
            "ServiceRoot" => ResourceKind::ServiceRoot,
            "ComputerSystem" => ResourceKind::ComputerSystem,
            "Chassis" => ResourceKind::Chassis,
            "Manager" => ResourceKind::Manager,
            "Processor" => ResourceKind::Processor,
            "Memory" => ResourceKind::Memory,
            "MemoryMetrics" => ResourceKind::MemoryMetrics,
            "Storage" => ResourceKind::Storage,
            "StorageController" => ResourceKind::StorageController,
            "Drive" => ResourceKind::Drive,
            "Thermal" => ResourceKind::Thermal,
            "Power" => ResourceKind::Power,
            "PowerSubsystem" => ResourceKind::PowerSubsystem,
            "PowerSupply" => ResourceKind::PowerSupply,
            "PowerSupplyMetrics" => ResourceKind::PowerSupplyMetrics,
            "ThermalSubsystem" => ResourceKind::ThermalSubsystem,
            "ThermalMetrics" => ResourceKind::ThermalMetrics,
            "Fan" => ResourceKind::Fan,
            "UpdateService" => ResourceKind::UpdateService,
            "SoftwareInventory" => ResourceKind::SoftwareInventory,
            _ => return None,
        };

        Some(kind)
    }
}

/// A relation followed from a resource of some kind.
struct Relation {
    /// Keys leading to the link, or to an array of links.
    path: &'static [&'static str],
    kind: ResourceKind,
}

const fn rel(path: &'static [&'static str], kind: ResourceKind) -> Relation {
    Relation { path, kind }
}

const SERVICE_ROOT: &[Relation] = &[
    rel(&["Systems"], ResourceKind::ComputerSystem),
    rel(&["Chassis"], ResourceKind::Chassis),
    rel(&["Managers"], ResourceKind::Manager),
    rel(&["UpdateService"], ResourceKind::UpdateService),
];

const COMPUTER_SYSTEM: &[Relation] = &[
    rel(&["Processors"], ResourceKind::Processor),
    rel(&["Memory"], ResourceKind::Memory),
    rel(&["Storage"], ResourceKind::Storage),
    rel(
        &["Oem", "Hpe", "Links", "FirmwareInventory"],
        ResourceKind::SoftwareInventory,
    ),
    rel(
        &["Oem", "Hp", "Links", "FirmwareInventory"],
        ResourceKind::SoftwareInventory,
    ),
];

const CHASSIS: &[Relation] = &[
    rel(&["Thermal"], ResourceKind::Thermal),
    rel(&["Power"], ResourceKind::Power),
    rel(&["PowerSubsystem"], ResourceKind::PowerSubsystem),
    rel(&["ThermalSubsystem"], ResourceKind::ThermalSubsystem),
];

const STORAGE: &[Relation] = &[
    rel(&["Drives"], ResourceKind::Drive),
    rel(&["Controllers"], ResourceKind::StorageController),
];

const MEMORY: &[Relation] = &[rel(&["Metrics"], ResourceKind::MemoryMetrics)];

const POWER_SUBSYSTEM: &[Relation] = &[rel(&["PowerSupplies"], ResourceKind::PowerSupply)];

const POWER_SUPPLY: &[Relation] = &[rel(&["Metrics"], ResourceKind::PowerSupplyMetrics)];

const THERMAL_SUBSYSTEM: &[Relation] = &[
    rel(&["Fans"], ResourceKind::Fan),
    rel(&["ThermalMetrics"], ResourceKind::ThermalMetrics),
];

const UPDATE_SERVICE: &[Relation] = &[rel(
    &["FirmwareInventory"],
    ResourceKind::SoftwareInventory,
)];

fn relations(kind: ResourceKind) -> &'static [Relation] {
    match kind {
        ResourceKind::ServiceRoot => SERVICE_ROOT,
        ResourceKind::ComputerSystem => COMPUTER_SYSTEM,
        ResourceKind::Chassis => CHASSIS,
        ResourceKind::Storage => STORAGE,
        ResourceKind::Memory => MEMORY,
        ResourceKind::PowerSubsystem => POWER_SUBSYSTEM,
        ResourceKind::PowerSupply => POWER_SUPPLY,
        ResourceKind::ThermalSubsystem => THERMAL_SUBSYSTEM,
        ResourceKind::UpdateService => UPDATE_SERVICE,
        _ => &[],
    }
}

/// An outbound link of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    pub uri: String,

    /// What the linked resource is expected to be. The resource's own
    /// `@odata.type` wins once it is fetched.
    pub hint: ResourceKind,

    /// First key of the relation the link was found under, e.g. `Systems`.
    pub relation: &'static str,
}

/// A fetched resource.
#[derive(Clone, Debug)]
pub struct ResourceNode {
    pub uri: String,

    pub kind: ResourceKind,

    /// The kind this node was expected to be. For collections this is the
    /// kind of the members.
    pub hint: ResourceKind,

    /// The node this one was discovered from, `None` for the service root.
    pub parent: Option<String>,

    pub body: Map<String, Value>,
}

impl ResourceNode {
    pub fn new(
        uri: String,
        hint: ResourceKind,
        parent: Option<String>,
        body: Map<String, Value>,
    ) -> ResourceNode {
        let kind = match body.get("@odata.type").and_then(Value::as_str) {
            Some(odata_type) => ResourceKind::from_odata_type(odata_type),
            None if body.get("Members").is_some_and(Value::is_array) => {
                Some(ResourceKind::Collection)
            }
            None => None,
        }
        .unwrap_or(hint);

        ResourceNode {
            uri,
            kind,
            hint,
            parent,
            body,
        }
    }

    /// Links to follow from this node. Only whitelisted relations are
    /// considered, collections yield their members.
    pub fn links(&self) -> Vec<Link> {
        let mut links = Vec::new();

        if self.kind == ResourceKind::Collection {
            collect_links(
                self.body.get("Members"),
                self.hint,
                "Members",
                &mut links,
            );
            return links;
        }

        for relation in relations(self.kind) {
            let mut value = self.body.get(relation.path[0]);
            for key in &relation.path[1..] {
                value = value.and_then(|v| v.get(*key));
            }

            collect_links(value, relation.kind, relation.path[0], &mut links);
        }

        links
    }
}

/// A link is an object with `@odata.id`, some older BMCs use `href`.
fn link_target(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    let link = object
        .get("@odata.id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| object.get("href").and_then(Value::as_str))?;

    normalize_uri(link)
}

fn collect_links(
    value: Option<&Value>,
    hint: ResourceKind,
    relation: &'static str,
    links: &mut Vec<Link>,
) {
    let Some(value) = value else {
        return;
    };

    let mut push = |value: &Value| {
        if let Some(uri) = link_target(value) {
            links.push(Link {
                uri,
                hint,
                relation,
            });
        }
    };

    match value {
        Value::Array(array) => array.iter().for_each(&mut push),
        value => push(value),
    }
}
