//! Named channel parameters and engineering-unit scaling
//!
//! A parameter table maps human-readable names to chassis channels and
//! carries the scaling constants used to convert raw counts into
//! engineering values. Tables are loaded from YAML and validated up front
//! so a bad entry fails at startup rather than mid-poll.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AdamError, Result};
use crate::types::{ChannelAddress, SlotType};

/// Static configuration of one named channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    /// Unique parameter name, used as the key in sensor events
    pub name: String,
    pub slot_type: SlotType,
    pub slot: u8,
    pub channel: u8,
    /// Engineering span corresponding to `digital_max` raw counts
    pub value_range: f64,
    /// Raw counts subtracted before scaling
    #[serde(default)]
    pub offset: f64,
    /// Raw counts at full scale
    pub digital_max: f64,
    /// Engineering unit label, informational only
    #[serde(default)]
    pub unit: String,
}

impl Param {
    /// Chassis address of this parameter
    pub fn address(&self) -> Result<ChannelAddress> {
        ChannelAddress::new(self.slot_type, self.slot, self.channel)
    }

    /// Convert raw counts to an engineering value:
    /// `value_range * (raw - offset) / digital_max`
    pub fn engineering_value(&self, raw: f64) -> f64 {
        if self.digital_max == 0.0 {
            return 0.0;
        }
        self.value_range * (raw - self.offset) / self.digital_max
    }
}

/// Validated collection of parameters, preserving file order
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    params: Vec<Param>,
}

impl ParamTable {
    /// Build a table from parameters, rejecting invalid entries
    pub fn new(params: Vec<Param>) -> Result<Self> {
        let mut names = HashSet::new();
        for param in &params {
            param.address().map_err(|e| {
                AdamError::config(format!("parameter '{}': {}", param.name, e))
            })?;
            if param.digital_max == 0.0 {
                return Err(AdamError::config(format!(
                    "parameter '{}': digital_max must be non-zero",
                    param.name
                )));
            }
            if !names.insert(param.name.clone()) {
                return Err(AdamError::config(format!(
                    "duplicate parameter name '{}'",
                    param.name
                )));
            }
        }
        Ok(Self { params })
    }

    /// Parse a YAML document containing a list of parameters
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let params: Vec<Param> = serde_yaml::from_str(text)?;
        Self::new(params)
    }

    /// Load a parameter table from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AdamError::config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Look up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_YAML: &str = r#"
- name: boiler_temp
  slot_type: analog
  slot: 0
  channel: 3
  value_range: 200.0
  digital_max: 4095.0
  unit: degC
- name: pump_running
  slot_type: digital
  slot: 4
  channel: 0
  value_range: 1.0
  digital_max: 1.0
"#;

    #[test]
    fn test_parse_yaml_table() {
        let table = ParamTable::from_yaml_str(SAMPLE_YAML).unwrap();
        assert_eq!(table.len(), 2);

        let temp = table.get("boiler_temp").unwrap();
        assert_eq!(temp.slot_type, SlotType::Analog);
        assert_eq!(temp.slot, 0);
        assert_eq!(temp.channel, 3);
        assert_eq!(temp.unit, "degC");
        assert_eq!(temp.offset, 0.0);

        let pump = table.get("pump_running").unwrap();
        assert_eq!(pump.slot_type, SlotType::Digital);
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_engineering_value_scaling() {
        let table = ParamTable::from_yaml_str(SAMPLE_YAML).unwrap();
        let temp = table.get("boiler_temp").unwrap();

        let scaled = temp.engineering_value(2048.0);
        assert!((scaled - 100.0).abs() < 0.05);
        assert_eq!(temp.engineering_value(0.0), 0.0);
    }

    #[test]
    fn test_offset_applied_before_scaling() {
        let param = Param {
            name: "pressure".to_string(),
            slot_type: SlotType::Analog,
            slot: 1,
            channel: 0,
            value_range: 10.0,
            offset: 1000.0,
            digital_max: 4000.0,
            unit: "bar".to_string(),
        };
        assert!((param.engineering_value(3000.0) - 5.0).abs() < 1e-9);
        assert!((param.engineering_value(1000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let yaml = r#"
- name: broken
  slot_type: analog
  slot: 8
  channel: 0
  value_range: 1.0
  digital_max: 1.0
"#;
        let err = ParamTable::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, AdamError::Config(_)));
    }

    #[test]
    fn test_zero_digital_max_rejected() {
        let yaml = r#"
- name: broken
  slot_type: analog
  slot: 0
  channel: 0
  value_range: 1.0
  digital_max: 0.0
"#;
        assert!(ParamTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
- name: same
  slot_type: analog
  slot: 0
  channel: 0
  value_range: 1.0
  digital_max: 1.0
- name: same
  slot_type: analog
  slot: 0
  channel: 1
  value_range: 1.0
  digital_max: 1.0
"#;
        assert!(ParamTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_YAML.as_bytes()).unwrap();

        let table = ParamTable::from_yaml_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(ParamTable::from_yaml_file("/nonexistent/params.yaml").is_err());
    }
}
