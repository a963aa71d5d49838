use std::collections::BTreeMap;

/// Build a label set from `key => value` pairs.
#[macro_export]
macro_rules! tags {
    ( $($x:expr => $y:expr),* ) => ({
        let mut _map: std::collections::BTreeMap<String, String> = std::collections::BTreeMap::new();
        $(
            _map.insert($x.into(), $y.into());
        )*
        _map
    });
    ( $($x:expr => $y:expr,)* ) => (
        $crate::tags!{$($x => $y),*}
    );
}

pub type Tags = BTreeMap<String, String>;

/// A point-in-time gauge sample. Every metric this exporter produces is a
/// gauge, so there is no kind discriminator.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    pub name: String,

    pub description: String,

    pub tags: Tags,

    pub value: f64,
}

impl Metric {
    pub fn gauge<N, D, V>(name: N, desc: D, value: V) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: Into<f64>,
    {
        Self {
            name: name.into(),
            description: desc.into(),
            tags: Tags::new(),
            value: value.into(),
        }
    }

    pub fn gauge_with_tags<N, D, V>(name: N, desc: D, value: V, tags: Tags) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: Into<f64>,
    {
        Self {
            name: name.into(),
            description: desc.into(),
            tags,
            value: value.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn insert_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }
}
