//! Prometheus text exposition format, version 0.0.4.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::metric::{Metric, Tags};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

macro_rules! write_metric {
    ($dst:expr, $name:expr, $tags:expr, $value:expr) => {
        if $tags.is_empty() {
            let _ = writeln!($dst, "{} {}", $name, FormatValue($value));
        } else {
            let _ = writeln!(
                $dst,
                "{}{{{}}} {}",
                $name,
                FormatTags($tags),
                FormatValue($value)
            );
        }
    };
}

/// Render metrics grouped into families. Families are ordered by name and
/// samples keep their input order inside a family.
pub fn encode(metrics: &[Metric]) -> String {
    let mut families: BTreeMap<&str, Vec<&Metric>> = BTreeMap::new();
    for metric in metrics {
        families.entry(metric.name()).or_default().push(metric);
    }

    let mut buf = String::with_capacity(metrics.len() * 96);
    for (name, samples) in families {
        let description = samples
            .iter()
            .map(|m| m.description.as_str())
            .find(|desc| !desc.is_empty())
            .unwrap_or(name);

        let _ = writeln!(buf, "# HELP {} {}", name, escape_help(description));
        let _ = writeln!(buf, "# TYPE {} gauge", name);

        for metric in samples {
            write_metric!(buf, name, metric.tags(), metric.value);
        }
    }

    buf
}

struct FormatValue(f64);

impl std::fmt::Display for FormatValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.0;
        if value.is_nan() {
            f.write_str("NaN")
        } else if value.is_infinite() {
            f.write_str(if value > 0.0 { "+Inf" } else { "-Inf" })
        } else {
            write!(f, "{value}")
        }
    }
}

struct FormatTags<'a>(&'a Tags);

impl std::fmt::Display for FormatTags<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, (key, value)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_char(',')?;
            }

            write!(f, "{key}=\"")?;
            for c in value.chars() {
                match c {
                    '\\' => f.write_str("\\\\")?,
                    '"' => f.write_str("\\\"")?,
                    '\n' => f.write_str("\\n")?,
                    c => f.write_char(c)?,
                }
            }
            f.write_char('"')?;
        }

        Ok(())
    }
}

fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn families_are_grouped() {
        let metrics = vec![
            Metric::gauge_with_tags("redfish_up", "Redfish availability", 1, tags!("target" => "bmc1")),
            Metric::gauge_with_tags(
                "redfish_health",
                "Health of components",
                1,
                tags!("device_type" => "processor", "device_name" => "CPU1"),
            ),
            Metric::gauge_with_tags(
                "redfish_health",
                "Health of components",
                3,
                tags!("device_type" => "processor", "device_name" => "CPU2"),
            ),
        ];

        let text = encode(&metrics);
        assert_eq!(
            text,
            "# HELP redfish_health Health of components\n\
             # TYPE redfish_health gauge\n\
             redfish_health{device_name=\"CPU1\",device_type=\"processor\"} 1\n\
             redfish_health{device_name=\"CPU2\",device_type=\"processor\"} 3\n\
             # HELP redfish_up Redfish availability\n\
             # TYPE redfish_up gauge\n\
             redfish_up{target=\"bmc1\"} 1\n"
        );
    }

    #[test]
    fn escaping() {
        let metrics = vec![Metric::gauge_with_tags(
            "redfish_firmware",
            "line\nbreak",
            1,
            tags!("component" => "say \"hi\"\\", "version" => "1.0\n2"),
        )];

        let text = encode(&metrics);
        assert!(text.contains("# HELP redfish_firmware line\\nbreak\n"));
        assert!(
            text.contains(r#"redfish_firmware{component="say \"hi\"\\",version="1.0\n2"} 1"#)
        );
    }

    #[test]
    fn special_values() {
        let metrics = vec![
            Metric::gauge("a", "", f64::NAN),
            Metric::gauge("b", "", f64::INFINITY),
            Metric::gauge("c", "", f64::NEG_INFINITY),
            Metric::gauge("d", "", 0.25),
            Metric::gauge("e", "", -1),
        ];

        let text = encode(&metrics);
        assert!(text.contains("\na NaN\n"));
        assert!(text.contains("\nb +Inf\n"));
        assert!(text.contains("\nc -Inf\n"));
        assert!(text.contains("\nd 0.25\n"));
        assert!(text.contains("\ne -1\n"));
    }

    #[test]
    fn empty_description_falls_back_to_name() {
        let text = encode(&[Metric::gauge("redfish_power", "", 100)]);
        assert!(text.starts_with("# HELP redfish_power redfish_power\n"));
    }
}
