//! Optional per-tab schemas checked at the proxy boundary
//!
//! A schema file is TOML:
//!
//! ```toml
//! [tabs.Payments.fields]
//! id = { type = "text", required = true }
//! projectId = { type = "text", required = true }
//! amount = { type = "currency", required = true }
//! date = { type = "date" }
//! ```
//!
//! Tabs without an entry keep header-driven behavior.

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::currency::parse_amount;
use crate::error::{ProxyError, Result};
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Number,
    Currency,
    Boolean,
    Date,
    List,
}

impl FieldType {
    /// Whether a non-empty cell value fits this type
    pub fn accepts(&self, value: &str) -> bool {
        let value = value.trim();
        match self {
            FieldType::Text | FieldType::List => true,
            FieldType::Number => value.replace(',', "").parse::<f64>().is_ok(),
            FieldType::Currency => parse_amount(value).is_some(),
            FieldType::Boolean => matches!(
                value.to_lowercase().as_str(),
                "true" | "false" | "yes" | "no" | "y" | "n" | "1" | "0"
            ),
            FieldType::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TabSchema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

/// How a record is being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Update,
}

impl TabSchema {
    /// Check a record against this schema
    ///
    /// Appends must carry every required field. Updates may omit fields but
    /// may not blank a required one.
    pub fn validate(&self, tab: &str, record: &Record, mode: WriteMode) -> Result<()> {
        let mut problems = Vec::new();

        for (name, value) in record {
            match self.fields.get(name) {
                None => problems.push(format!("unknown field \"{}\"", name)),
                Some(spec) => {
                    if value.trim().is_empty() {
                        if spec.required {
                            problems.push(format!("\"{}\" is required", name));
                        }
                    } else if !spec.kind.accepts(value) {
                        problems.push(format!(
                            "\"{}\" is not a valid {:?} value: \"{}\"",
                            name, spec.kind, value
                        ));
                    }
                }
            }
        }

        if mode == WriteMode::Append {
            for (name, spec) in &self.fields {
                if spec.required && !record.contains_key(name) {
                    problems.push(format!("\"{}\" is required", name));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::Validation(format!(
                "{}: {}",
                tab,
                problems.join("; ")
            )))
        }
    }

    /// Check that the tab's header row carries every schema field
    pub fn check_headers(&self, tab: &str, headers: &[String]) -> Result<()> {
        let missing: Vec<&str> = self
            .fields
            .keys()
            .filter(|name| !headers.iter().any(|h| h == *name))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::Validation(format!(
                "{}: columns missing from sheet: {}",
                tab,
                missing.join(", ")
            )))
        }
    }

    /// Field names in schema order, used when a tab has no header row yet
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

/// Schemas for every tab that declares one
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    tabs: BTreeMap<String, TabSchema>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a registry from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| ProxyError::Config(format!("Invalid schema file: {}", e)))
    }

    /// Load a registry from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn get(&self, tab: &str) -> Option<&TabSchema> {
        self.tabs.get(tab)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PAYMENTS: &str = r#"
[tabs.Payments.fields]
id = { type = "text", required = true }
projectId = { type = "text", required = true }
amount = { type = "currency", required = true }
status = { type = "text" }
date = { type = "date" }
paid = { type = "boolean" }
"#;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn valid_append_passes() {
        let registry = SchemaRegistry::from_toml(PAYMENTS).unwrap();
        let schema = registry.get("Payments").unwrap();
        let r = record(&[
            ("id", "PAY-1"),
            ("projectId", "1"),
            ("amount", "₹2.4 L"),
            ("date", "2024-06-12"),
            ("paid", "yes"),
        ]);
        assert!(schema.validate("Payments", &r, WriteMode::Append).is_ok());
    }

    #[test]
    fn unknown_missing_and_mistyped_fields_are_rejected() {
        let registry = SchemaRegistry::from_toml(PAYMENTS).unwrap();
        let schema = registry.get("Payments").unwrap();
        let r = record(&[("id", "PAY-1"), ("amount", "lots"), ("colour", "red")]);

        let err = schema
            .validate("Payments", &r, WriteMode::Append)
            .unwrap_err()
            .to_string();
        assert!(err.contains("unknown field \"colour\""));
        assert!(err.contains("\"amount\" is not a valid Currency value"));
        assert!(err.contains("\"projectId\" is required"));
    }

    #[test]
    fn updates_may_omit_but_not_blank_required_fields() {
        let registry = SchemaRegistry::from_toml(PAYMENTS).unwrap();
        let schema = registry.get("Payments").unwrap();

        let partial = record(&[("id", "PAY-1"), ("status", "Paid")]);
        assert!(schema.validate("Payments", &partial, WriteMode::Update).is_ok());

        let blanked = record(&[("id", "PAY-1"), ("amount", " ")]);
        assert!(schema.validate("Payments", &blanked, WriteMode::Update).is_err());
    }

    #[test]
    fn header_check_reports_missing_columns() {
        let registry = SchemaRegistry::from_toml(PAYMENTS).unwrap();
        let schema = registry.get("Payments").unwrap();
        let headers: Vec<String> = ["id", "projectId", "amount"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = schema.check_headers("Payments", &headers).unwrap_err();
        assert!(err.to_string().contains("date, paid, status"));
    }

    #[test]
    fn loads_from_file_and_rejects_bad_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PAYMENTS.as_bytes()).unwrap();
        let registry = SchemaRegistry::load(file.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("Projects").is_none());

        let bad = "[tabs.Projects.fields]\nbudget = { type = \"money\" }\n";
        assert!(matches!(
            SchemaRegistry::from_toml(bad),
            Err(ProxyError::Config(_))
        ));
    }

    #[test]
    fn field_types() {
        assert!(FieldType::Number.accepts("1,200.5"));
        assert!(!FieldType::Number.accepts("12a"));
        assert!(FieldType::Boolean.accepts("N"));
        assert!(!FieldType::Boolean.accepts("maybe"));
        assert!(!FieldType::Date.accepts("12/06/2024"));
    }
}
