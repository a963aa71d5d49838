//! Power, temperature and fan readings.

use serde_json::{Map, Value};

use super::field::{self, Lookup, Path};
use super::is_absent;
use crate::redfish::record::{FanRecord, PowerRecord, Record, TemperatureRecord};
use crate::redfish::resource::ResourceNode;

const UNKNOWN: &str = "unknown";

/// Properties of a PSU in the deprecated `Power` resource.
const LEGACY_PSU_READINGS: &[&str] = &[
    "PowerOutputWatts",
    "EfficiencyPercent",
    "PowerInputWatts",
    "LineInputVoltage",
];

/// Sensor excerpts of a `PowerSupplyMetrics` resource, each with a `Reading`.
const PSU_METRICS_READINGS: &[&str] = &[
    "InputPowerWatts",
    "OutputPowerWatts",
    "InputVoltage",
    "PowerInputWatts",
    "PowerOutputWatts",
    "PowerCapacityWatts",
];

const RPM_PATHS: &[Path] = &[&["ReadingRPM"], &["SpeedPercent", "SpeedRPM"]];

const PWM_PATHS: &[Path] = &[
    &["DutyCyclePercent"],
    &["ReadingPercent"],
    &["SpeedPercent", "Reading"],
    &["Oem", "Dell", "FanPWM"],
];

fn label(object: &Map<String, Value>, paths: &[Path]) -> String {
    field::string(object, paths)
        .found()
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// A fan's speed as RPM and as PWM duty, whichever the BMC reports.
pub fn fan(object: &Map<String, Value>, source: &str, legacy: bool, records: &mut Vec<Record>) {
    if is_absent(object) {
        return;
    }

    let units = object.get("ReadingUnits").and_then(Value::as_str);
    let reading = field::number(object, &[&["Reading"]]).found();

    let rpm = match (units, reading) {
        (Some("RPM"), Some(reading)) => Some(reading),
        _ => field::number(object, RPM_PATHS).found(),
    };
    let pwm = match (units, reading) {
        (Some("Percent" | "%"), Some(reading)) => Some(reading),
        _ => field::number(object, PWM_PATHS).found(),
    };

    if rpm.is_none() && pwm.is_none() {
        return;
    }

    records.push(Record::Fan(FanRecord {
        rpm,
        pwm,
        legacy,
        source: source.to_string(),
    }));
}

/// `Temperatures` of the deprecated `Thermal` resource.
pub fn legacy_temperatures(body: &Map<String, Value>, uri: &str, records: &mut Vec<Record>) {
    let Some(sensors) = body.get("Temperatures").and_then(Value::as_array) else {
        return;
    };

    for (index, sensor) in sensors.iter().enumerate() {
        let Some(sensor) = sensor.as_object() else {
            continue;
        };
        if is_absent(sensor) {
            continue;
        }

        if let Lookup::Found(celsius) = field::reading(sensor, &["ReadingCelsius"]) {
            records.push(Record::Temperature(TemperatureRecord {
                sensor: label(sensor, &[&["Name"], &["MemberId"]]),
                celsius,
                source: format!("{uri}#/Temperatures/{index}"),
            }));
        }
    }
}

/// `TemperatureSummaryCelsius` of a `ThermalMetrics` resource, one record
/// per summary such as `Intake` or `Exhaust`.
pub fn temperature_summary(body: &Map<String, Value>, uri: &str, records: &mut Vec<Record>) {
    let Some(summary) = body
        .get("TemperatureSummaryCelsius")
        .and_then(Value::as_object)
    else {
        return;
    };

    for (name, excerpt) in summary {
        let Some(excerpt) = excerpt.as_object() else {
            continue;
        };

        if let Lookup::Found(celsius) = field::reading(excerpt, &["Reading"]) {
            records.push(Record::Temperature(TemperatureRecord {
                sensor: name.clone(),
                celsius,
                source: format!("{uri}#/TemperatureSummaryCelsius/{name}"),
            }));
        }
    }
}

/// PSU readings of the deprecated `Power` resource.
pub fn legacy_power(body: &Map<String, Value>, uri: &str, records: &mut Vec<Record>) {
    let Some(supplies) = body.get("PowerSupplies").and_then(Value::as_array) else {
        return;
    };

    for (index, psu) in supplies.iter().enumerate() {
        let Some(psu) = psu.as_object() else {
            continue;
        };
        if is_absent(psu) {
            continue;
        }

        let device_name = label(psu, &[&["Name"], &["MemberId"]]);
        let device_model = label(psu, &[&["Model"]]);

        for key in LEGACY_PSU_READINGS {
            if let Lookup::Found(reading) = field::reading(psu, &[*key]) {
                records.push(Record::Power(PowerRecord {
                    device_name: device_name.clone(),
                    device_model: device_model.clone(),
                    kind: key.to_string(),
                    reading,
                    source: format!("{uri}#/PowerSupplies/{index}"),
                }));
            }
        }
    }
}

/// `CapacityWatts` and the `Allocation` readings of a `PowerSubsystem`.
pub fn power_subsystem(body: &Map<String, Value>, uri: &str, records: &mut Vec<Record>) {
    let device_name = label(body, &[&["Name"], &["Id"]]);

    let mut push = |kind: &str, reading: Option<f64>| {
        records.push(Record::Power(PowerRecord {
            device_name: device_name.clone(),
            device_model: UNKNOWN.to_string(),
            kind: kind.to_string(),
            reading,
            source: uri.to_string(),
        }));
    };

    if let Lookup::Found(reading) = field::reading(body, &["CapacityWatts"]) {
        push("CapacityWatts", reading);
    }

    if let Some(allocation) = body.get("Allocation").and_then(Value::as_object) {
        for (kind, value) in allocation {
            match value {
                Value::Null => push(kind, None),
                Value::Number(n) => push(kind, n.as_f64()),
                _ => {}
            }
        }
    }
}

/// Readings of a `PowerSupplyMetrics` resource, named after the power
/// supply it belongs to.
pub fn power_supply_metrics(
    body: &Map<String, Value>,
    supply: Option<&ResourceNode>,
    uri: &str,
    records: &mut Vec<Record>,
) {
    let (device_name, device_model) = match supply {
        Some(supply) => {
            if is_absent(&supply.body) {
                return;
            }

            (
                label(&supply.body, &[&["Name"], &["Id"]]),
                label(&supply.body, &[&["Model"]]),
            )
        }
        None => (label(body, &[&["Name"], &["Id"]]), UNKNOWN.to_string()),
    };

    for key in PSU_METRICS_READINGS {
        if let Lookup::Found(reading) = field::reading(body, &[*key, "Reading"]) {
            records.push(Record::Power(PowerRecord {
                device_name: device_name.clone(),
                device_model: device_model.clone(),
                kind: key.to_string(),
                reading,
                source: uri.to_string(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::redfish::resource::ResourceKind;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn fans(value: Value) -> Vec<Record> {
        let mut records = vec![];
        fan(&object(value), "/fan", false, &mut records);
        records
    }

    #[test]
    fn fan_readings() {
        let rpm = |records: Vec<Record>| match records.first() {
            Some(Record::Fan(f)) => (f.rpm, f.pwm),
            _ => (None, None),
        };

        assert_eq!(
            rpm(fans(json!({"Reading": 4200, "ReadingUnits": "RPM"}))),
            (Some(4200.0), None)
        );
        assert_eq!(
            rpm(fans(json!({"Reading": 40, "ReadingUnits": "Percent"}))),
            (None, Some(40.0))
        );
        assert_eq!(
            rpm(fans(json!({"SpeedPercent": {"Reading": 35, "SpeedRPM": 5100}}))),
            (Some(5100.0), Some(35.0))
        );
        assert_eq!(
            rpm(fans(json!({"ReadingRPM": 3000, "Oem": {"Dell": {"FanPWM": 22}}}))),
            (Some(3000.0), Some(22.0))
        );
        assert!(fans(json!({"Name": "Fan without readings"})).is_empty());
        assert!(fans(json!({"Reading": 4200, "ReadingUnits": "RPM", "Status": {"State": "Absent"}})).is_empty());
    }

    #[test]
    fn subsystem() {
        let mut records = vec![];
        power_subsystem(
            &object(json!({
                "Name": "Power Subsystem",
                "CapacityWatts": 1600,
                "Allocation": {"AllocatedWatts": 800, "RequestedWatts": null},
            })),
            "/redfish/v1/Chassis/1/PowerSubsystem",
            &mut records,
        );

        let readings = records
            .iter()
            .filter_map(|r| match r {
                Record::Power(p) => Some((p.kind.as_str(), p.reading)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            readings,
            vec![
                ("CapacityWatts", Some(1600.0)),
                ("AllocatedWatts", Some(800.0)),
                ("RequestedWatts", None),
            ]
        );
    }

    #[test]
    fn supply_metrics_named_after_supply() {
        let supply = ResourceNode::new(
            "/redfish/v1/Chassis/1/PowerSubsystem/PowerSupplies/0".into(),
            ResourceKind::PowerSupply,
            None,
            object(json!({"Name": "PSU0", "Model": "DPS-1100", "Status": {"State": "Enabled"}})),
        );

        let mut records = vec![];
        power_supply_metrics(
            &object(json!({
                "InputPowerWatts": {"Reading": 210.5},
                "OutputPowerWatts": {"Reading": null},
                "Status": {"Health": "OK"},
            })),
            Some(&supply),
            "/redfish/v1/Chassis/1/PowerSubsystem/PowerSupplies/0/Metrics",
            &mut records,
        );

        assert_eq!(
            records,
            vec![
                Record::Power(PowerRecord {
                    device_name: "PSU0".into(),
                    device_model: "DPS-1100".into(),
                    kind: "InputPowerWatts".into(),
                    reading: Some(210.5),
                    source: "/redfish/v1/Chassis/1/PowerSubsystem/PowerSupplies/0/Metrics".into(),
                }),
                Record::Power(PowerRecord {
                    device_name: "PSU0".into(),
                    device_model: "DPS-1100".into(),
                    kind: "OutputPowerWatts".into(),
                    reading: None,
                    source: "/redfish/v1/Chassis/1/PowerSubsystem/PowerSupplies/0/Metrics".into(),
                }),
            ]
        );
    }

    #[test]
    fn thermal_metrics_summary() {
        let mut records = vec![];
        temperature_summary(
            &object(json!({
                "TemperatureSummaryCelsius": {
                    "Intake": {"Reading": 24.5},
                    "Exhaust": {"Reading": null},
                    "Internal": "bogus",
                },
            })),
            "/redfish/v1/Chassis/1/ThermalSubsystem/ThermalMetrics",
            &mut records,
        );

        let mut sensors = records
            .iter()
            .filter_map(|r| match r {
                Record::Temperature(t) => Some((t.sensor.as_str(), t.celsius)),
                _ => None,
            })
            .collect::<Vec<_>>();
        sensors.sort_by(|a, b| a.0.cmp(b.0));

        assert_eq!(sensors, vec![("Exhaust", None), ("Intake", Some(24.5))]);
    }
}
