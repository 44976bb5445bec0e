//! Tab reader and writer on top of a [`SheetsBackend`]
//!
//! Mutations of one tab are serialized through a per-tab lock, and the row
//! located for an update or delete is re-read right before it is touched.
//! If the row no longer carries the expected id the operation fails with
//! `Conflict` instead of modifying a shifted row.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ProxyError, Result};
use crate::record::{
    Record, RowLocation, build_row, id_column, locate_row, merge_row, row_to_record,
    rows_to_records, unmatched_fields,
};
use crate::schema::{SchemaRegistry, TabSchema, WriteMode};
use crate::sheets::{CellRange, SheetsBackend};

pub struct TabStore<B> {
    backend: B,
    schemas: SchemaRegistry,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Reject blank tab names
pub fn check_tab(tab: &str) -> Result<&str> {
    if tab.trim().is_empty() {
        return Err(ProxyError::BadRequest("Missing tab".to_string()));
    }
    Ok(tab)
}

/// Reject blank ids
pub fn check_id(id: &str) -> Result<&str> {
    if id.trim().is_empty() {
        return Err(ProxyError::BadRequest("Missing 'id' field".to_string()));
    }
    Ok(id)
}

/// Holds a tab's write lock and drops the map entry once nobody else wants it
struct TabGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    tab: String,
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Drop for TabGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map, one here; any other is a waiter
        let idle = locks
            .get(&self.tab)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.tab);
        }
    }
}

impl<B: SheetsBackend> TabStore<B> {
    pub fn new(backend: B) -> Self {
        TabStore {
            backend,
            schemas: SchemaRegistry::empty(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    async fn lock(&self, tab: &str) -> TabGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(tab.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        TabGuard {
            guard: Some(guard),
            lock,
            tab: tab.to_string(),
            locks: &self.locks,
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Read every record of a tab, in row order
    ///
    /// # Errors
    /// * `BadRequest` for a blank tab name
    /// * `TabNotFound` if the spreadsheet has no such tab
    pub async fn read(&self, tab: &str) -> Result<Vec<Record>> {
        let tab = check_tab(tab)?;
        let values = self.backend.read_range(tab, &CellRange::data()).await?;
        Ok(rows_to_records(&values))
    }

    /// Read a tab, treating a missing tab as empty
    pub async fn read_or_empty(&self, tab: &str) -> Result<Vec<Record>> {
        match self.read(tab).await {
            Err(ProxyError::TabNotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Append a record as the next row of a tab
    ///
    /// The row follows the current header row. When the tab has no header
    /// row yet, one is written first from the schema (or the record's own
    /// field names). Returns the record as written.
    pub async fn append(&self, tab: &str, record: Record) -> Result<Record> {
        let tab = check_tab(tab)?;
        let schema = self.schemas.get(tab);
        if let Some(schema) = schema {
            schema.validate(tab, &record, WriteMode::Append)?;
        }

        let _guard = self.lock(tab).await;

        let header_rows = self.backend.read_range(tab, &CellRange::header()).await?;
        let mut headers = header_rows.into_iter().next().unwrap_or_default();

        if headers.iter().all(|h| h.trim().is_empty()) {
            headers = match schema {
                Some(schema) => schema.field_names(),
                None => record.keys().cloned().collect(),
            };
            if headers.is_empty() {
                return Err(ProxyError::BadRequest(
                    "Cannot append an empty record to a tab without headers".to_string(),
                ));
            }
            self.backend.append_row(tab, &headers).await?;
            log::info!("Wrote header row to \"{}\": {:?}", tab, headers);
        } else {
            check_headers(schema, tab, &headers)?;
        }

        log_dropped(tab, &headers, &record);
        let row = build_row(&headers, &record);
        self.backend.append_row(tab, &row).await?;
        log::info!("Appended row to \"{}\"", tab);

        Ok(row_to_record(&headers, &row))
    }

    /// Merge `fields` into the row whose id cell equals `id`
    ///
    /// The `id` field itself is never rewritten. Returns the updated record.
    ///
    /// # Errors
    /// * `MissingIdColumn` if the tab has no "id" column
    /// * `RowNotFound` if no row carries the id
    /// * `Conflict` if the row moved before it could be written
    pub async fn update(&self, tab: &str, id: &str, fields: Record) -> Result<Record> {
        let tab = check_tab(tab)?;
        let id = check_id(id)?;
        let schema = self.schemas.get(tab);
        if let Some(schema) = schema {
            schema.validate(tab, &fields, WriteMode::Update)?;
        }

        let _guard = self.lock(tab).await;

        let values = self.backend.read_range(tab, &CellRange::data()).await?;
        let location = locate_row(tab, &values, id)?;
        let headers = &values[0];
        check_headers(schema, tab, headers)?;
        log_dropped(tab, headers, &fields);

        let row = merge_row(headers, &values[location.index + 1], &fields);
        self.verify_row(tab, headers, &location, id).await?;
        self.backend.write_row(tab, location.row_number, &row).await?;
        log::info!("Updated row {} (id {}) in \"{}\"", location.row_number, id, tab);

        Ok(row_to_record(headers, &row))
    }

    /// Delete the row whose id cell equals `id`
    ///
    /// # Errors
    /// * `MissingIdColumn` if the tab has no "id" column
    /// * `RowNotFound` if no row carries the id (including a repeated delete)
    /// * `Conflict` if the row moved before it could be deleted
    pub async fn delete(&self, tab: &str, id: &str) -> Result<()> {
        let tab = check_tab(tab)?;
        let id = check_id(id)?;

        let _guard = self.lock(tab).await;

        let values = self.backend.read_range(tab, &CellRange::data()).await?;
        let location = locate_row(tab, &values, id)?;
        self.verify_row(tab, &values[0], &location, id).await?;
        self.backend.delete_row(tab, location.row_number).await?;
        log::info!("Deleted row {} (id {}) from \"{}\"", location.row_number, id, tab);

        Ok(())
    }

    /// Re-read a located row and confirm it still carries `id`
    async fn verify_row(
        &self,
        tab: &str,
        headers: &[String],
        location: &RowLocation,
        id: &str,
    ) -> Result<()> {
        let column =
            id_column(headers).ok_or_else(|| ProxyError::MissingIdColumn(tab.to_string()))?;
        let current = self
            .backend
            .read_range(tab, &CellRange::row(location.row_number))
            .await?;
        let cell = current
            .first()
            .and_then(|row| row.get(column))
            .map(String::as_str);

        if cell == Some(id) {
            Ok(())
        } else {
            log::warn!(
                "Row {} of \"{}\" no longer holds id {} (found {:?})",
                location.row_number,
                tab,
                id,
                cell
            );
            Err(ProxyError::Conflict {
                tab: tab.to_string(),
                row: location.row_number,
            })
        }
    }
}

fn check_headers(schema: Option<&TabSchema>, tab: &str, headers: &[String]) -> Result<()> {
    match schema {
        Some(schema) => schema.check_headers(tab, headers),
        None => Ok(()),
    }
}

fn log_dropped(tab: &str, headers: &[String], record: &Record) {
    let dropped = unmatched_fields(headers, record);
    if !dropped.is_empty() {
        log::debug!("Dropping fields {:?} with no column in \"{}\"", dropped, tab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySheets;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn projects() -> TabStore<MemorySheets> {
        TabStore::new(MemorySheets::new().with_tab(
            "Projects",
            vec![
                vec!["id", "name", "status"],
                vec!["1", "Sunshine", "In Progress"],
            ],
        ))
    }

    #[tokio::test]
    async fn failed_writes_leave_no_lock_entries() {
        let store = projects();
        for n in 0..50 {
            let tab = format!("Missing{}", n);
            let err = store.append(&tab, record(&[("id", "1")])).await.unwrap_err();
            assert!(err.is_not_found());
            let err = store.delete(&tab, "1").await.unwrap_err();
            assert!(err.is_not_found());
        }
        assert_eq!(store.lock_count(), 0);

        store.delete("Projects", "1").await.unwrap();
        assert!(store.delete("Projects", "1").await.unwrap_err().is_not_found());
        assert_eq!(store.lock_count(), 0);
    }

    #[tokio::test]
    async fn reads_the_projects_scenario() {
        let records = projects().read("Projects").await.unwrap();
        assert_eq!(
            records,
            vec![record(&[("id", "1"), ("name", "Sunshine"), ("status", "In Progress")])]
        );
    }

    #[tokio::test]
    async fn blank_tab_names_are_bad_requests() {
        let err = projects().read("  ").await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn header_only_tab_reads_empty() {
        let store = TabStore::new(MemorySheets::new().with_tab("Sales", vec![vec!["id", "type"]]));
        assert!(store.read("Sales").await.unwrap().is_empty());
        assert!(store.read_or_empty("Missing").await.unwrap().is_empty());
        assert!(store.read("Missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let store = projects();
        let written = store
            .append(
                "Projects",
                record(&[("id", "2"), ("name", "Lakeview"), ("budget", "₹12 Cr")]),
            )
            .await
            .unwrap();
        assert_eq!(written["status"], "");
        assert!(!written.contains_key("budget"));

        let rows = store.backend().rows("Projects").unwrap();
        assert_eq!(rows[2], vec!["2", "Lakeview", ""]);

        let records = store.read("Projects").await.unwrap();
        assert!(records.contains(&written));
    }

    #[tokio::test]
    async fn append_to_empty_tab_writes_headers_first() {
        let store = TabStore::new(MemorySheets::new().with_tab("Notes", Vec::<Vec<&str>>::new()));
        store
            .append("Notes", record(&[("id", "n1"), ("text", "Pour slab")]))
            .await
            .unwrap();

        let rows = store.backend().rows("Notes").unwrap();
        assert_eq!(rows[0], vec!["id", "text"]);
        assert_eq!(rows[1], vec!["n1", "Pour slab"]);
        assert_eq!(store.read("Notes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_merges_and_is_idempotent() {
        let store = projects();
        let change = record(&[("id", "1"), ("status", "Completed")]);

        let first = store.update("Projects", "1", change.clone()).await.unwrap();
        let second = store.update("Projects", "1", change).await.unwrap();
        assert_eq!(first, second);

        let records = store.read("Projects").await.unwrap();
        assert_eq!(records[0]["status"], "Completed");
        assert_eq!(records[0]["name"], "Sunshine");
    }

    #[tokio::test]
    async fn delete_then_delete_again_is_not_found() {
        let store = projects();
        store.delete("Projects", "1").await.unwrap();
        assert!(store.read("Projects").await.unwrap().is_empty());

        let err = store.delete("Projects", "1").await.unwrap_err();
        assert!(matches!(err, ProxyError::RowNotFound));
    }

    #[tokio::test]
    async fn tabs_without_id_column_cannot_be_mutated() {
        let store = TabStore::new(
            MemorySheets::new().with_tab("Log", vec![vec!["when", "what"], vec!["today", "x"]]),
        );
        let err = store.delete("Log", "today").await.unwrap_err();
        assert!(matches!(err, ProxyError::MissingIdColumn(_)));
        let err = store.update("Log", "", Record::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn schema_rejects_unknown_fields_instead_of_dropping() {
        let schemas = SchemaRegistry::from_toml(
            "[tabs.Projects.fields]\nid = { required = true }\nname = {}\nstatus = {}\n",
        )
        .unwrap();
        let store = projects().with_schemas(schemas);

        let err = store
            .append("Projects", record(&[("id", "2"), ("colour", "red")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
        assert_eq!(store.read("Projects").await.unwrap().len(), 1);
    }

    /// Backend that shifts rows between the lookup and the mutation
    struct ShiftingSheets {
        inner: MemorySheets,
        shifted: AtomicBool,
    }

    impl SheetsBackend for ShiftingSheets {
        async fn read_range(&self, tab: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
            if range.first_row > 1 && !self.shifted.swap(true, Ordering::SeqCst) {
                // another writer removes the first data row
                self.inner.delete_row(tab, 2).await?;
            }
            self.inner.read_range(tab, range).await
        }

        async fn append_row(&self, tab: &str, row: &[String]) -> Result<()> {
            self.inner.append_row(tab, row).await
        }

        async fn write_row(&self, tab: &str, row_number: usize, row: &[String]) -> Result<()> {
            self.inner.write_row(tab, row_number, row).await
        }

        async fn delete_row(&self, tab: &str, row_number: usize) -> Result<()> {
            self.inner.delete_row(tab, row_number).await
        }
    }

    #[tokio::test]
    async fn shifted_rows_are_reported_as_conflicts() {
        let store = TabStore::new(ShiftingSheets {
            inner: MemorySheets::new().with_tab(
                "Projects",
                vec![vec!["id", "name"], vec!["1", "A"], vec!["2", "B"], vec!["3", "C"]],
            ),
            shifted: AtomicBool::new(false),
        });

        let err = store.delete("Projects", "2").await.unwrap_err();
        assert!(matches!(err, ProxyError::Conflict { row: 3, .. }));

        let rows = store.backend().inner.rows("Projects").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], "3");
    }
}
