//! Header alias resolution for inconsistently named spreadsheet columns
//!
//! Different tabs spell the same field differently (`projectId`,
//! `ProjectId`, `project id`, ...). Lookups here compare header names with
//! case, whitespace and punctuation removed.

use crate::record::Record;

/// Aliases accepted for the project identifier column
pub const PROJECT_ID_ALIASES: &[&str] = &["projectId", "project id", "project_id"];

/// Reduce a header to lowercase alphanumerics
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Look up the first alias present in a record, trimmed
///
/// Exact header matches win over normalized ones, so a tab carrying both
/// `id` and `ID` resolves `id` deterministically.
///
/// # Examples
/// ```
/// use sheetdesk::normalize::field;
/// use sheetdesk::record::Record;
///
/// let mut record = Record::new();
/// record.insert("Project ID".into(), " 3 ".into());
/// assert_eq!(field(&record, &["projectId"]), Some("3"));
/// ```
pub fn field<'a>(record: &'a Record, aliases: &[&str]) -> Option<&'a str> {
    for alias in aliases {
        if let Some(value) = record.get(*alias) {
            return Some(value.trim());
        }
    }

    for alias in aliases {
        let wanted = normalize_key(alias);
        if let Some((_, value)) = record.iter().find(|(key, _)| normalize_key(key) == wanted) {
            return Some(value.trim());
        }
    }

    None
}

/// Like [`field`] but returns an empty string when absent
pub fn field_or_empty<'a>(record: &'a Record, aliases: &[&str]) -> &'a str {
    field(record, aliases).unwrap_or("")
}

/// The record's project identifier, if any
pub fn project_id(record: &Record) -> Option<&str> {
    field(record, PROJECT_ID_ALIASES).filter(|id| !id.is_empty())
}

/// Whether a record belongs to the given project (both sides trimmed)
pub fn belongs_to(record: &Record, project: &str) -> bool {
    let wanted = project.trim();
    !wanted.is_empty() && project_id(record) == Some(wanted)
}

/// Records belonging to a project, in tab order
pub fn filter_by_project<'a>(records: &'a [Record], project: &str) -> Vec<&'a Record> {
    records.iter().filter(|r| belongs_to(r, project)).collect()
}

/// Interpret a cell as a yes/no flag
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

/// Split a list cell on commas, pipes, semicolons or newlines
///
/// # Examples
/// ```
/// use sheetdesk::normalize::to_list;
///
/// assert_eq!(to_list("Sai Electricals, Maa Cement | "), vec!["Sai Electricals", "Maa Cement"]);
/// ```
pub fn to_list(value: &str) -> Vec<String> {
    value
        .split([',', '|', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
