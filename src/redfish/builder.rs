use std::collections::{HashMap, HashSet};

use crate::metric::{Metric, Tags};

use super::record::{FanRecord, PowerState, Record};

pub const HEALTH: &str = "redfish_health";
pub const MEMORY_CORRECTABLE: &str = "redfish_memory_correctable";
pub const MEMORY_UNCORRECTABLE: &str = "redfish_memory_uncorrectable";
pub const FIRMWARE: &str = "redfish_firmware";
pub const POWER_STATE: &str = "redfish_powerstate";
pub const SYSTEM_INFO: &str = "redfish_system_info";
pub const VERSION: &str = "redfish_version";
pub const POWER: &str = "redfish_power";
pub const TEMPERATURE: &str = "redfish_temperature_celsius";
pub const FAN_SPEED_RPM: &str = "redfish_fan_speed_rpm";
pub const FAN_SPEED_PWM: &str = "redfish_fan_speed_pwm_percent";

struct Candidate {
    metric: Metric,
    source: String,
    /// The label that is rewritten when the label set collides.
    key: Option<&'static str>,
}

impl Candidate {
    fn new(metric: Metric, source: &str, key: &'static str) -> Self {
        Candidate {
            metric,
            source: source.to_string(),
            key: Some(key),
        }
    }

    fn aggregate(metric: Metric) -> Self {
        Candidate {
            metric,
            source: String::new(),
            key: None,
        }
    }
}

/// Turn records into metrics. The output is sorted by name and labels, and
/// no two metrics of the same name share a label set: the later of two
/// colliding metrics, ordered by source URI, gets the trailing segments of
/// its source appended to its identifying label.
pub fn build(records: &[Record]) -> Vec<Metric> {
    let mut candidates = Vec::with_capacity(records.len());
    let mut power_states = Vec::new();
    let mut fans = Vec::new();

    for record in records {
        match record {
            Record::Health(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    HEALTH,
                    "Health of the component, 0 unknown, 1 ok, 2 warning, 3 critical",
                    r.status.value(),
                    tags!(
                        "device_type" => r.category.as_str(),
                        "device_name" => r.id.as_str(),
                    ),
                ),
                &r.source,
                "device_name",
            )),
            Record::MemoryErrors(r) => {
                for (name, desc, count) in [
                    (
                        MEMORY_CORRECTABLE,
                        "Correctable error count of the DIMM",
                        r.correctable,
                    ),
                    (
                        MEMORY_UNCORRECTABLE,
                        "Uncorrectable error count of the DIMM",
                        r.uncorrectable,
                    ),
                ] {
                    if let Some(count) = count {
                        candidates.push(Candidate::new(
                            Metric::gauge_with_tags(
                                name,
                                desc,
                                count as f64,
                                tags!("dimm_name" => r.dimm.as_str()),
                            ),
                            &r.source,
                            "dimm_name",
                        ));
                    }
                }
            }
            Record::Firmware(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    FIRMWARE,
                    "Firmware version of the component",
                    1,
                    tags!(
                        "component" => r.component.as_str(),
                        "version" => r.version.as_str(),
                    ),
                ),
                &r.source,
                "component",
            )),
            Record::SystemInfo(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    SYSTEM_INFO,
                    "Information of the system",
                    1,
                    tags!(
                        "system" => r.system.as_str(),
                        "manufacturer" => r.manufacturer.as_str(),
                        "model" => r.model.as_str(),
                        "serial" => r.serial.as_str(),
                    ),
                ),
                &r.source,
                "system",
            )),
            Record::Version(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    VERSION,
                    "Redfish version of the service",
                    1,
                    tags!("version" => r.version.as_str()),
                ),
                &r.source,
                "version",
            )),
            Record::Power(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    POWER,
                    "Power readings of power supplies",
                    r.reading.unwrap_or(f64::NAN),
                    tags!(
                        "device_name" => r.device_name.as_str(),
                        "device_model" => r.device_model.as_str(),
                        "type" => r.kind.as_str(),
                    ),
                ),
                &r.source,
                "device_name",
            )),
            Record::Temperature(r) => candidates.push(Candidate::new(
                Metric::gauge_with_tags(
                    TEMPERATURE,
                    "Temperature readings",
                    r.celsius.unwrap_or(f64::NAN),
                    tags!("sensor" => r.sensor.as_str()),
                ),
                &r.source,
                "sensor",
            )),
            Record::PowerState(r) => power_states.push(r.state),
            Record::Fan(r) => fans.push(r),
        }
    }

    if let Some(state) = PowerState::combine(power_states) {
        candidates.push(Candidate::aggregate(Metric::gauge(
            POWER_STATE,
            "Power state of the server, 0 off, 1 on, -1 unknown",
            state.value(),
        )));
    }

    if let Some(rpm) = fan_average(&fans, |fan| fan.rpm) {
        candidates.push(Candidate::aggregate(Metric::gauge_with_tags(
            FAN_SPEED_RPM,
            "Average rotational speed of all fans",
            rpm,
            tags!("type" => "average"),
        )));
    }

    if let Some(pwm) = fan_average(&fans, |fan| fan.pwm) {
        candidates.push(Candidate::aggregate(Metric::gauge_with_tags(
            FAN_SPEED_PWM,
            "Average duty cycle of all fans",
            pwm,
            tags!("type" => "average"),
        )));
    }

    dedup(candidates)
}

/// Mean over the fans of the current resources, the fans of the deprecated
/// `Thermal` resource count only when those report nothing.
fn fan_average<F>(fans: &[&FanRecord], reading: F) -> Option<f64>
where
    F: Fn(&FanRecord) -> Option<f64>,
{
    let mean = |legacy: bool| {
        let values = fans
            .iter()
            .filter(|fan| fan.legacy == legacy)
            .filter_map(|fan| reading(fan))
            .collect::<Vec<_>>();

        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    mean(false).or_else(|| mean(true))
}

fn dedup(mut candidates: Vec<Candidate>) -> Vec<Metric> {
    candidates.sort_by(|a, b| {
        a.metric
            .name
            .cmp(&b.metric.name)
            .then_with(|| a.metric.tags.cmp(&b.metric.tags))
            .then_with(|| a.source.cmp(&b.source))
    });

    let mut taken: HashSet<(String, Tags)> = HashSet::with_capacity(candidates.len());
    let mut owners: HashMap<(String, Tags), String> = HashMap::new();
    let mut metrics = Vec::with_capacity(candidates.len());
    let mut collided = Vec::new();

    for candidate in candidates {
        let key = (candidate.metric.name.clone(), candidate.metric.tags.clone());
        if taken.insert(key.clone()) {
            owners.insert(key, candidate.source);
            metrics.push(candidate.metric);
        } else {
            collided.push(candidate);
        }
    }

    for Candidate {
        mut metric,
        source,
        key,
    } in collided
    {
        let Some(key) = key else {
            continue;
        };

        let owner = owners
            .get(&(metric.name.clone(), metric.tags.clone()))
            .map(String::as_str)
            .unwrap_or_default();
        let original = metric.tag(key).unwrap_or_default().to_string();

        let ours = segments(&source);
        let theirs = segments(owner);
        // the suffix must tell both apart and say more than the label itself
        let shortest = (1..=ours.len())
            .find(|k| {
                let tail = &ours[ours.len() - k..];
                tail != &theirs[theirs.len().saturating_sub(*k)..]
                    && tail.iter().any(|segment| *segment != original)
            })
            .unwrap_or(ours.len().max(1));

        let suffixes = (shortest..=ours.len())
            .map(|k| ours[ours.len() - k..].join("/"))
            .chain((2..).map(|n| n.to_string()));

        for suffix in suffixes {
            metric.insert_tag(key, format!("{original} ({suffix})"));
            if taken.insert((metric.name.clone(), metric.tags.clone())) {
                break;
            }
        }

        debug!(
            message = "Disambiguated metric labels",
            name = %metric.name,
            label = key,
            value = metric.tag(key).unwrap_or_default(),
        );

        metrics.push(metric);
    }

    metrics.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
    metrics
}

fn segments(uri: &str) -> Vec<&str> {
    uri.split(['/', '#'])
        .filter(|segment| !segment.is_empty())
        .collect()
}
