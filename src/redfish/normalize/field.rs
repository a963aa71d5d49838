//! Field lookups over ordered lists of JSON paths.
//!
//! Vendors put the same fact under different keys. A lookup tries every
//! path in order and stops at the first one that is present, telling apart
//! a missing field from one holding something unexpected.

use serde_json::{Map, Value};

/// A path of object keys, `&["Status", "Health"]` reads `.Status.Health`.
pub type Path = &'static [&'static str];

#[derive(Debug, PartialEq)]
pub enum Lookup<'a, T> {
    /// None of the paths is present, or all of them are `null`.
    Missing,

    /// The first present path holds a value of the wrong shape.
    Unexpected(&'a Value),

    Found(T),
}

impl<'a, T> Lookup<'a, T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }
}

pub fn get<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut value = object.get(*first)?;
    for key in rest {
        value = value.get(*key)?;
    }

    Some(value)
}

/// The first non-null value under any of `paths`.
pub fn first<'a>(object: &'a Map<String, Value>, paths: &[Path]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| get(object, path))
        .find(|value| !value.is_null())
}

fn lookup<'a, T>(
    object: &'a Map<String, Value>,
    paths: &[Path],
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Lookup<'a, T> {
    match first(object, paths) {
        None => Lookup::Missing,
        Some(value) => match convert(value) {
            Some(converted) => Lookup::Found(converted),
            None => Lookup::Unexpected(value),
        },
    }
}

/// A non-empty string, numbers are accepted and formatted.
pub fn string<'a>(object: &'a Map<String, Value>, paths: &[Path]) -> Lookup<'a, String> {
    lookup(object, paths, |value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// A number, numeric strings are accepted.
pub fn number<'a>(object: &'a Map<String, Value>, paths: &[Path]) -> Lookup<'a, f64> {
    lookup(object, paths, |value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// A non-negative integer. Some BMCs report counters as booleans, those
/// count as 0 or 1.
pub fn count<'a>(object: &'a Map<String, Value>, paths: &[Path]) -> Lookup<'a, u64> {
    lookup(object, paths, |value| match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::Bool(b) => Some(u64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Like [`number`], but a present `null` is a reading the BMC could not
/// take and yields `Found(None)`.
pub fn reading<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Lookup<'a, Option<f64>> {
    match get(object, path) {
        None => Lookup::Missing,
        Some(Value::Null) => Lookup::Found(None),
        Some(Value::Number(n)) => Lookup::Found(n.as_f64()),
        Some(value) => Lookup::Unexpected(value),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn first_present_path_wins() {
        let obj = object(json!({
            "Status": {"Health": null, "HealthRollup": "Warning"},
            "Health": "OK",
        }));

        let paths: &[Path] = &[&["Status", "Health"], &["Status", "HealthRollup"], &["Health"]];
        assert_eq!(string(&obj, paths), Lookup::Found("Warning".to_string()));
    }

    #[test]
    fn missing_and_unexpected() {
        let obj = object(json!({"Status": {"Health": ["OK"]}, "Count": "many"}));

        assert_eq!(string(&obj, &[&["Nope"]]), Lookup::Missing);
        assert!(matches!(
            string(&obj, &[&["Status", "Health"]]),
            Lookup::Unexpected(Value::Array(_))
        ));
        assert!(matches!(count(&obj, &[&["Count"]]), Lookup::Unexpected(_)));
        // walking through a non-object is a missing path
        assert_eq!(string(&obj, &[&["Count", "Inner"]]), Lookup::Missing);
    }

    #[test]
    fn counts() {
        let obj = object(json!({
            "a": 3,
            "b": true,
            "c": "12",
            "d": -1,
            "e": 2.0,
        }));

        assert_eq!(count(&obj, &[&["a"]]), Lookup::Found(3));
        assert_eq!(count(&obj, &[&["b"]]), Lookup::Found(1));
        assert_eq!(count(&obj, &[&["c"]]), Lookup::Found(12));
        assert!(matches!(count(&obj, &[&["d"]]), Lookup::Unexpected(_)));
        assert_eq!(count(&obj, &[&["e"]]), Lookup::Found(2));
    }

    #[test]
    fn readings() {
        let obj = object(json!({"Reading": null, "Other": 12.5, "Bad": "x"}));

        assert_eq!(reading(&obj, &["Reading"]), Lookup::Found(None));
        assert_eq!(reading(&obj, &["Other"]), Lookup::Found(Some(12.5)));
        assert_eq!(reading(&obj, &["Missing"]), Lookup::Missing);
        assert!(matches!(reading(&obj, &["Bad"]), Lookup::Unexpected(_)));
    }
}
