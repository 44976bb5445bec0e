//! Consumer-side tab cache
//!
//! [`SheetCache`] is shared by every view that reads tabs. Loads of the
//! same tab inside the dedup window are served from memory, and concurrent
//! loads wait for the fetch already in flight. A failed fetch records its
//! error next to the last good data instead of replacing it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{ProxyError, Result};
use crate::record::{ID_COLUMN, Record, coerce_object};
use crate::sheets::SheetsBackend;
use crate::store::TabStore;

/// Default period during which repeated loads reuse the last fetch
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(1000);

/// Something that can serve tabs and apply row commands
pub trait TabSource: Send + Sync + 'static {
    fn fetch_tab(&self, tab: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn submit(&self, command: &RowCommand) -> impl Future<Output = Result<()>> + Send;
}

/// A validated mutation of one tab
#[derive(Debug, Clone, PartialEq)]
pub enum RowCommand {
    Append { tab: String, record: Record },
    Update { tab: String, id: String, fields: Record },
    Delete { tab: String, id: String },
}

impl RowCommand {
    pub fn tab(&self) -> &str {
        match self {
            RowCommand::Append { tab, .. }
            | RowCommand::Update { tab, .. }
            | RowCommand::Delete { tab, .. } => tab,
        }
    }

    /// Check the command before anything is sent
    ///
    /// # Errors
    /// * `BadRequest` for a blank tab or id, an empty append or update, or
    ///   an update whose fields carry a different id
    pub fn validate(&self) -> Result<()> {
        if self.tab().trim().is_empty() {
            return Err(bad("Missing tab"));
        }
        match self {
            RowCommand::Append { record, .. } => {
                if record.is_empty() {
                    return Err(bad("Nothing to append"));
                }
            }
            RowCommand::Update { id, fields, .. } => {
                if id.trim().is_empty() {
                    return Err(bad("Missing 'id' field"));
                }
                if fields.keys().all(|k| k == ID_COLUMN) {
                    return Err(bad("Nothing to update"));
                }
                if fields.get(ID_COLUMN).is_some_and(|v| v != id) {
                    return Err(bad("Update fields carry a different id"));
                }
            }
            RowCommand::Delete { id, .. } => {
                if id.trim().is_empty() {
                    return Err(bad("Missing 'id' field"));
                }
            }
        }
        Ok(())
    }

    /// Request body for an update, the fields plus the id
    pub fn update_body(id: &str, fields: &Record) -> Record {
        let mut body = fields.clone();
        body.insert(ID_COLUMN.to_string(), id.to_string());
        body
    }
}

fn bad(message: &str) -> ProxyError {
    ProxyError::BadRequest(message.to_string())
}

impl<B: SheetsBackend> TabSource for TabStore<B> {
    async fn fetch_tab(&self, tab: &str) -> Result<Vec<Record>> {
        self.read(tab).await
    }

    async fn submit(&self, command: &RowCommand) -> Result<()> {
        match command {
            RowCommand::Append { tab, record } => self.append(tab, record.clone()).await.map(drop),
            RowCommand::Update { tab, id, fields } => {
                self.update(tab, id, fields.clone()).await.map(drop)
            }
            RowCommand::Delete { tab, id } => self.delete(tab, id).await,
        }
    }
}

/// HTTP client for a running proxy
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        ProxyClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn tab_url(&self, tab: &str) -> String {
        format!("{}/api/sheets/{}", self.base_url, urlencoding::encode(tab))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|_| ProxyError::MalformedResponse(format!("Non-JSON response: {}", text)))?
        };

        if !status.is_success() {
            return Err(ProxyError::Rejected {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        if body.get("success") == Some(&Value::Bool(false)) {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        Ok(body)
    }
}

fn error_message(body: &Value, status: StatusCode) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

/// Accept `{success, data}`, `{data}` or a bare array of records
pub fn parse_records(body: Value) -> Result<Vec<Record>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ProxyError::MalformedResponse(format!(
                    "Expected an array of records, got {}",
                    other
                )));
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(ProxyError::MalformedResponse(format!(
                "Unexpected response: {}",
                other
            )));
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => coerce_object(map),
            other => Err(ProxyError::MalformedResponse(format!(
                "Expected a record object, got {}",
                other
            ))),
        })
        .collect()
}

impl TabSource for ProxyClient {
    async fn fetch_tab(&self, tab: &str) -> Result<Vec<Record>> {
        let body = self.send(self.http.get(self.tab_url(tab))).await?;
        parse_records(body)
    }

    async fn submit(&self, command: &RowCommand) -> Result<()> {
        let url = self.tab_url(command.tab());
        let request = match command {
            RowCommand::Append { record, .. } => self.http.post(url).json(record),
            RowCommand::Update { id, fields, .. } => {
                self.http.put(url).json(&RowCommand::update_body(id, fields))
            }
            RowCommand::Delete { id, .. } => self.http.delete(url).query(&[("id", id)]),
        };
        self.send(request).await?;
        Ok(())
    }
}

/// Point-in-time view of one cached tab
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabSnapshot {
    pub data: Option<Arc<Vec<Record>>>,
    pub error: Option<String>,
    pub is_loading: bool,
}

#[derive(Debug, Default)]
struct SlotState {
    data: Option<Arc<Vec<Record>>>,
    error: Option<String>,
    is_loading: bool,
    fetched_at: Option<Instant>,
}

impl SlotState {
    fn snapshot(&self) -> TabSnapshot {
        TabSnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    fetch: AsyncMutex<()>,
}

impl Slot {
    fn state(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a slot as loading until dropped, including when a load is cancelled
struct Loading<'a>(&'a Slot);

impl<'a> Loading<'a> {
    fn start(slot: &'a Slot) -> Self {
        slot.state().is_loading = true;
        Loading(slot)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.state().is_loading = false;
    }
}

pub struct SheetCache<S> {
    source: S,
    window: Duration,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<S: TabSource> SheetCache<S> {
    pub fn new(source: S) -> Self {
        SheetCache {
            source,
            window: DEFAULT_DEDUP_WINDOW,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn slot(&self, tab: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(tab.to_string()).or_default().clone()
    }

    fn fresh(&self, slot: &Slot) -> Option<TabSnapshot> {
        let state = slot.state();
        match state.fetched_at {
            Some(at) if at.elapsed() < self.window => Some(state.snapshot()),
            _ => None,
        }
    }

    /// Load a tab, reusing a fetch that completed inside the dedup window
    pub async fn load(&self, tab: &str) -> TabSnapshot {
        let slot = self.slot(tab);
        if let Some(snapshot) = self.fresh(&slot) {
            log::debug!("Cache hit for \"{}\"", tab);
            return snapshot;
        }

        let _guard = slot.fetch.lock().await;
        // a fetch that was in flight may have just finished
        if let Some(snapshot) = self.fresh(&slot) {
            log::debug!("Joined in-flight fetch for \"{}\"", tab);
            return snapshot;
        }
        self.fetch(tab, &slot).await
    }

    /// Refetch a tab regardless of the dedup window
    pub async fn revalidate(&self, tab: &str) -> TabSnapshot {
        let slot = self.slot(tab);
        let _guard = slot.fetch.lock().await;
        self.fetch(tab, &slot).await
    }

    async fn fetch(&self, tab: &str, slot: &Slot) -> TabSnapshot {
        let loading = Loading::start(slot);
        let result = self.source.fetch_tab(tab).await;
        drop(loading);

        let mut state = slot.state();
        state.fetched_at = Some(Instant::now());
        match result {
            Ok(records) => {
                state.data = Some(Arc::new(records));
                state.error = None;
            }
            Err(e) => {
                log::warn!("Failed to load \"{}\": {}", tab, e);
                state.error = Some(e.to_string());
            }
        }
        state.snapshot()
    }

    /// Current state of a tab without fetching
    pub fn snapshot(&self, tab: &str) -> TabSnapshot {
        self.slot(tab).state().snapshot()
    }

    /// Replace the cached records of a tab locally
    pub fn mutate(&self, tab: &str, records: Vec<Record>) {
        let slot = self.slot(tab);
        let mut state = slot.state();
        state.data = Some(Arc::new(records));
        state.error = None;
    }

    /// Validate and apply a command, then refetch its tab
    pub async fn submit(&self, command: RowCommand) -> Result<TabSnapshot> {
        command.validate()?;
        self.source.submit(&command).await?;
        Ok(self.revalidate(command.tab()).await)
    }
}
