use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// schema-free entry metadata value
///
/// keys are short symbolic tags; downstream consumers define their own
/// conventions, so values stay loosely typed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

/// entry metadata: short symbolic keys to loosely typed values
pub type MetaMap = BTreeMap<String, MetaValue>;

/// union of two meta maps, with `winner` overlaying `loser` on shared keys
pub fn merge_meta(loser: &MetaMap, winner: &MetaMap) -> MetaMap {
    let mut merged = loser.clone();
    for (key, value) in winner {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
