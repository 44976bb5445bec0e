//! Google Sheets v4 REST backend

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::{Authenticator, Authorization};
use crate::error::{ProxyError, Result};
use crate::sheets::{CellRange, SheetsBackend, a1_notation};

/// Default Sheets API base URL
pub const DEFAULT_SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// How written values are interpreted by the spreadsheet
const VALUE_INPUT_OPTION: &str = "USER_ENTERED";

/// Client for one spreadsheet, addressed by its identifier
pub struct GoogleSheets {
    http: Client,
    auth: Authenticator,
    base_url: String,
    spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

impl GoogleSheets {
    pub fn new(http: Client, auth: Authenticator, spreadsheet_id: impl Into<String>) -> Self {
        GoogleSheets {
            http,
            auth,
            base_url: DEFAULT_SHEETS_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    /// Point the client at a different API base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, tab: &str, range: &CellRange) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url(),
            urlencoding::encode(&a1_notation(tab, range))
        )
    }

    /// Authorization that allows writing, or `ReadOnly`
    async fn write_access(&self, tab: &str) -> Result<Authorization> {
        if self.auth.is_read_only() {
            return Err(ProxyError::ReadOnly(tab.to_string()));
        }
        self.auth.authorize().await
    }

    /// Send a request and turn non-2xx answers into errors
    async fn send(&self, tab: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
        }

        Err(upstream_error(tab, status.as_u16(), message))
    }

    /// Numeric sheet id for a tab title, needed for row deletion
    async fn sheet_id(&self, tab: &str, auth: &Authorization) -> Result<i64> {
        let request = auth.apply(
            self.http
                .get(self.spreadsheet_url())
                .query(&[("fields", "sheets.properties(sheetId,title)")]),
        );
        let meta: SpreadsheetMeta = self.send(tab, request).await?.json().await?;

        meta.sheets
            .into_iter()
            .find(|s| s.properties.title == tab)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| ProxyError::TabNotFound(tab.to_string()))
    }
}

/// Map an upstream failure onto the proxy's error taxonomy
///
/// The values API answers 400 "Unable to parse range" for unknown tabs.
pub fn upstream_error(tab: &str, status: u16, message: String) -> ProxyError {
    if status == 400 && message.contains("Unable to parse range") {
        ProxyError::TabNotFound(tab.to_string())
    } else {
        ProxyError::Upstream { status, message }
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetsBackend for GoogleSheets {
    async fn read_range(&self, tab: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
        let auth = self.auth.authorize().await?;
        let request = auth.apply(self.http.get(self.values_url(tab, range)));
        let body: ValueRange = self.send(tab, request).await?.json().await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn append_row(&self, tab: &str, row: &[String]) -> Result<()> {
        let auth = self.write_access(tab).await?;
        let url = format!(
            "{}:append",
            self.values_url(tab, &CellRange::row(1))
        );
        let request = auth.apply(
            self.http
                .post(url)
                .query(&[
                    ("valueInputOption", VALUE_INPUT_OPTION),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&json!({ "values": [row] })),
        );
        self.send(tab, request).await?;
        Ok(())
    }

    async fn write_row(&self, tab: &str, row_number: usize, row: &[String]) -> Result<()> {
        let auth = self.write_access(tab).await?;
        let range = CellRange::row(row_number);
        let request = auth.apply(
            self.http
                .put(self.values_url(tab, &range))
                .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
                .json(&json!({
                    "range": a1_notation(tab, &range),
                    "majorDimension": "ROWS",
                    "values": [row],
                })),
        );
        self.send(tab, request).await?;
        Ok(())
    }

    async fn delete_row(&self, tab: &str, row_number: usize) -> Result<()> {
        let auth = self.write_access(tab).await?;
        let sheet_id = self.sheet_id(tab, &auth).await?;
        let request = auth.apply(
            self.http
                .post(format!("{}:batchUpdate", self.spreadsheet_url()))
                .json(&json!({
                    "requests": [{
                        "deleteDimension": {
                            "range": {
                                "sheetId": sheet_id,
                                "dimension": "ROWS",
                                "startIndex": row_number - 1,
                                "endIndex": row_number,
                            }
                        }
                    }]
                })),
        );
        self.send(tab, request).await?;
        Ok(())
    }
}
