//! Parsed `qm config` / `pct config` output
//!
//! Each output line is `key: value`. A value without commas is a scalar;
//! a value with commas is split into tokens, where `k=v` tokens become
//! attributes and everything else is kept, in order, as a raw value.

use crate::error::GuestError;
use std::collections::BTreeMap;
use std::fmt;

/// A single uninterpreted value, coerced to an integer when numeric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(n) => Scalar::Int(n),
            Err(_) => Scalar::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Comma separated multi-value entry such as a disk definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskValue {
    pub raw_values: Vec<String>,
    pub attrs: BTreeMap<String, Scalar>,
}

/// One configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Scalar(Scalar),
    Disk(DiskValue),
}

/// Guest configuration keyed by option name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestConfig {
    entries: BTreeMap<String, ConfigValue>,
}

impl GuestConfig {
    /// Parse the text emitted by the guest management command.
    pub fn parse(text: &str) -> Result<Self, GuestError> {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(": ").or_else(|| line.split_once(':')) else {
                return Err(GuestError::MalformedConfigLine {
                    line: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(GuestError::MalformedConfigLine {
                    line: line.to_string(),
                });
            }
            entries.insert(key.to_string(), parse_value(value.trim()));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn parse_value(value: &str) -> ConfigValue {
    if !value.contains(',') {
        return ConfigValue::Scalar(Scalar::parse(value));
    }
    let mut disk = DiskValue::default();
    for token in value.split(',').filter(|t| !t.is_empty()) {
        match separator(token) {
            Some('=') => {
                if let Some((k, v)) = token.split_once('=') {
                    disk.attrs.insert(k.to_string(), Scalar::parse(v));
                }
            }
            _ => {
                if token.eq_ignore_ascii_case("none") {
                    continue;
                }
                disk.raw_values.push(token.to_string());
            }
        }
    }
    ConfigValue::Disk(disk)
}

/// The separator occurring exactly once in `token`; `:` wins over `=`
/// so `local:iso/x.iso` style volume ids stay raw values.
fn separator(token: &str) -> Option<char> {
    ['=', ':']
        .into_iter()
        .filter(|sep| token.matches(*sep).count() == 1)
        .last()
}
