use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ProxyError, Result};

/// One data row keyed by the tab's header row
pub type Record = BTreeMap<String, String>;

/// Column that makes a tab addressable for update/delete
pub const ID_COLUMN: &str = "id";

/// Convert raw tab values into records
///
/// Row 1 is the header row. Every later row is zipped with the headers,
/// with missing trailing cells read as empty strings. A tab with no data
/// rows yields an empty list.
///
/// # Examples
/// ```
/// use sheetdesk::record::rows_to_records;
///
/// let values = vec![
///     vec!["id".to_string(), "name".to_string(), "status".to_string()],
///     vec!["1".to_string(), "Sunshine".to_string()],
/// ];
/// let records = rows_to_records(&values);
/// assert_eq!(records[0]["name"], "Sunshine");
/// assert_eq!(records[0]["status"], "");
/// ```
pub fn rows_to_records(values: &[Vec<String>]) -> Vec<Record> {
    let Some((headers, rows)) = values.split_first() else {
        return Vec::new();
    };

    rows.iter().map(|row| row_to_record(headers, row)).collect()
}

/// Zip a single row with the header row
pub fn row_to_record(headers: &[String], row: &[String]) -> Record {
    let mut record = Record::new();
    for (i, header) in headers.iter().enumerate() {
        if header.trim().is_empty() {
            continue;
        }
        let value = row.get(i).cloned().unwrap_or_default();
        record.insert(header.clone(), value);
    }
    record
}

/// Lay a record out in header order
///
/// Fields without a matching header are not part of the row.
pub fn build_row(headers: &[String], record: &Record) -> Vec<String> {
    headers
        .iter()
        .map(|h| record.get(h).cloned().unwrap_or_default())
        .collect()
}

/// Overlay `fields` on an existing row
///
/// Cells under headers that `fields` does not name keep their values,
/// including cells under blank headers. The `id` cell is never changed.
pub fn merge_row(headers: &[String], existing: &[String], fields: &Record) -> Vec<String> {
    let mut row = existing.to_vec();
    if row.len() < headers.len() {
        row.resize(headers.len(), String::new());
    }

    for (i, header) in headers.iter().enumerate() {
        if header.trim().is_empty() || header == ID_COLUMN {
            continue;
        }
        if let Some(value) = fields.get(header) {
            row[i] = value.clone();
        }
    }
    row
}

/// Fields of `record` that no header column will receive
pub fn unmatched_fields<'a>(headers: &[String], record: &'a Record) -> Vec<&'a str> {
    record
        .keys()
        .filter(|key| !headers.iter().any(|h| h == *key))
        .map(String::as_str)
        .collect()
}

/// Index of the column literally named "id"
pub fn id_column(headers: &[String]) -> Option<usize> {
    headers.iter().position(|h| h == ID_COLUMN)
}

/// Position of a data row inside a tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLocation {
    /// 1-based spreadsheet row number (the header is row 1)
    pub row_number: usize,
    /// Index into the data rows
    pub index: usize,
}

/// Find the first data row whose id cell equals `id` exactly
///
/// # Errors
/// * `MissingIdColumn` if the header row has no "id" column
/// * `RowNotFound` if no data row carries the id
pub fn locate_row(tab: &str, values: &[Vec<String>], id: &str) -> Result<RowLocation> {
    let Some((headers, rows)) = values.split_first() else {
        return Err(ProxyError::MissingIdColumn(tab.to_string()));
    };
    let column = id_column(headers).ok_or_else(|| ProxyError::MissingIdColumn(tab.to_string()))?;

    rows.iter()
        .position(|row| row.get(column).map(String::as_str) == Some(id))
        .map(|index| RowLocation {
            row_number: index + 2,
            index,
        })
        .ok_or(ProxyError::RowNotFound)
}

/// Coerce a JSON object body into a string record
///
/// Strings pass through, numbers and booleans use their text form, null
/// becomes empty and arrays of scalars are joined with ", ".
///
/// # Errors
/// * `BadRequest` if a value is a nested object or an array holding one
pub fn coerce_object(body: Map<String, Value>) -> Result<Record> {
    let mut record = Record::new();
    for (key, value) in body {
        let text = coerce_value(&key, &value)?;
        record.insert(key, text);
    }
    Ok(record)
}

/// Like [`coerce_object`] but rejects anything other than a JSON object
pub fn coerce_body(body: Value) -> Result<Record> {
    match body {
        Value::Object(map) => coerce_object(map),
        _ => Err(ProxyError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
    }
}

fn coerce_value(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => Err(nested(key)),
                    other => coerce_value(key, other),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(parts.join(", "))
        }
        Value::Object(_) => Err(nested(key)),
    }
}

fn nested(key: &str) -> ProxyError {
    ProxyError::BadRequest(format!("Field \"{}\" must be a plain value", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn header_only_or_empty_tabs_have_no_records() {
        assert!(rows_to_records(&[]).is_empty());
        assert!(rows_to_records(&[row(&["id", "name"])]).is_empty());
    }

    #[test]
    fn projects_tab_reads_as_header_keyed_records() {
        let values = vec![
            row(&["id", "name", "status"]),
            row(&["1", "Sunshine", "In Progress"]),
        ];
        let records = rows_to_records(&values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "1");
        assert_eq!(records[0]["name"], "Sunshine");
        assert_eq!(records[0]["status"], "In Progress");
    }

    #[test]
    fn short_rows_pad_with_empty_strings_and_blank_headers_are_skipped() {
        let values = vec![row(&["id", "", "note"]), row(&["7"])];
        let records = rows_to_records(&values);
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[0]["note"], "");
    }

    #[test]
    fn build_row_follows_header_order() {
        let headers = row(&["id", "name", "status"]);
        let mut record = Record::new();
        record.insert("status".into(), "Planning".into());
        record.insert("id".into(), "9".into());
        record.insert("colour".into(), "red".into());

        assert_eq!(build_row(&headers, &record), row(&["9", "", "Planning"]));
        assert_eq!(unmatched_fields(&headers, &record), vec!["colour"]);
    }

    #[test]
    fn merge_row_keeps_unnamed_cells() {
        let headers = row(&["id", "name", "", "status"]);
        let existing = row(&["1", "Sunshine", "scratch"]);
        let mut fields = Record::new();
        fields.insert("id".into(), "99".into());
        fields.insert("status".into(), "Completed".into());

        let merged = merge_row(&headers, &existing, &fields);
        assert_eq!(merged, row(&["1", "Sunshine", "scratch", "Completed"]));
        assert_eq!(merge_row(&headers, &merged, &fields), merged);
    }

    #[test]
    fn locate_row_matches_id_exactly() {
        let values = vec![
            row(&["name", "id"]),
            row(&["A", "1"]),
            row(&["B", " 2"]),
            row(&["C", "2"]),
        ];
        let loc = locate_row("Projects", &values, "2").unwrap();
        assert_eq!(loc, RowLocation { row_number: 4, index: 2 });

        assert!(matches!(
            locate_row("Projects", &values, "3"),
            Err(ProxyError::RowNotFound)
        ));
    }

    #[test]
    fn locate_row_requires_an_id_column() {
        let values = vec![row(&["ID", "name"]), row(&["1", "A"])];
        assert!(matches!(
            locate_row("Projects", &values, "1"),
            Err(ProxyError::MissingIdColumn(_))
        ));
    }

    #[test]
    fn json_values_are_coerced_to_strings() {
        let record = coerce_body(json!({
            "id": 12,
            "paid": true,
            "note": null,
            "contractors": ["Sai Electricals", "Maa Cement Works"],
            "amount": "₹2.4 L"
        }))
        .unwrap();

        assert_eq!(record["id"], "12");
        assert_eq!(record["paid"], "true");
        assert_eq!(record["note"], "");
        assert_eq!(record["contractors"], "Sai Electricals, Maa Cement Works");
        assert_eq!(record["amount"], "₹2.4 L");
    }

    #[test]
    fn nested_objects_and_non_objects_are_rejected() {
        assert!(coerce_body(json!({"meta": {"a": 1}})).is_err());
        assert!(coerce_body(json!([1, 2])).is_err());
        assert!(coerce_body(json!({"list": [[1]]})).is_err());
    }
}
