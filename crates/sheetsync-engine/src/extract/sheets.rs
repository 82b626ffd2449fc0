//! Spreadsheet API access
//!
//! [`SheetSource`] is the seam the extractor and exporter talk to;
//! [`GoogleSheetsClient`] implements it over the Sheets v4 REST API.

use crate::config::SheetsConfig;
use crate::error::SourceError;
use crate::sources::SheetRef;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Error bodies are cut to this many chars in messages
const MAX_ERROR_BODY_CHARS: usize = 500;

const RATE_LIMIT_INDICATORS: [&str; 6] = [
    "rate limit",
    "ratelimitexceeded",
    "quota exceeded",
    "too many requests",
    "resource exhausted",
    "resource_exhausted",
];

/// True when an error message looks like API throttling
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_INDICATORS.iter().any(|i| lower.contains(i))
}

/// Read/write access to spreadsheet cells
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Title of the tab behind `sheet`, needed to build A1 ranges
    async fn resolve_title(&self, spreadsheet_id: &str, sheet: &SheetRef) -> Result<String, SourceError>;

    /// Formatted cell values, row-major. Trailing empty cells and rows are
    /// omitted by the API, so rows can be ragged.
    async fn fetch_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, SourceError>;

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), SourceError>;

    /// Write `rows` starting at the top-left of `range`, parsed as if typed
    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<(), SourceError>;
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

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sheets v4 REST client
pub struct GoogleSheetsClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl GoogleSheetsClient {
    pub fn new(config: &SheetsConfig) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        let base = config.api_base.trim_end_matches('/');
        let base_url = Url::parse(base)
            .map_err(|e| SourceError::Transport(format!("invalid SHEETS_API_BASE '{}': {}", base, e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    /// `{base}/spreadsheets/{id}/{segments...}` with every segment escaped
    fn url(&self, spreadsheet_id: &str, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| SourceError::Transport(format!("{} cannot be a base URL", self.base_url)))?;
            path.pop_if_empty().push("spreadsheets").push(spreadsheet_id);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.api_key {
            Some(key) => request.query(&[("key", key)]),
            None => request,
        };
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, SourceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();

        if status == StatusCode::TOO_MANY_REQUESTS || is_rate_limit_message(&body) {
            Err(SourceError::RateLimited(format!("HTTP {}: {}", status.as_u16(), body)))
        } else if status == StatusCode::NOT_FOUND {
            Err(SourceError::NotFound(format!("spreadsheet resource not found: {}", body)))
        } else {
            Err(SourceError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl SheetSource for GoogleSheetsClient {
    async fn resolve_title(&self, spreadsheet_id: &str, sheet: &SheetRef) -> Result<String, SourceError> {
        let gid = match sheet {
            SheetRef::Title(title) => return Ok(title.clone()),
            SheetRef::Gid(gid) => *gid,
        };

        let url = self.url(spreadsheet_id, &[])?;
        let request = self
            .client
            .get(url)
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let meta: SpreadsheetMeta = response.json().await?;

        meta.sheets
            .into_iter()
            .map(|s| s.properties)
            .find(|p| p.sheet_id == gid)
            .map(|p| p.title)
            .ok_or_else(|| {
                SourceError::NotFound(format!(
                    "sheet with gid {} not found in spreadsheet {}",
                    gid, spreadsheet_id
                ))
            })
    }

    async fn fetch_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>, SourceError> {
        let url = self.url(spreadsheet_id, &["values", range])?;
        let request = self.client.get(url).query(&[
            ("majorDimension", "ROWS"),
            ("valueRenderOption", "FORMATTED_VALUE"),
        ]);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let body: ValueRange = response.json().await?;

        debug!(spreadsheet_id, range, rows = body.values.len(), "Fetched sheet values");

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn clear_values(&self, spreadsheet_id: &str, range: &str) -> Result<(), SourceError> {
        let segment = format!("{}:clear", range);
        let url = self.url(spreadsheet_id, &["values", &segment])?;
        let request = self.client.post(url).json(&json!({}));
        Self::check(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<(), SourceError> {
        let url = self.url(spreadsheet_id, &["values", range])?;
        let request = self
            .client
            .put(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            }));
        Self::check(self.authorize(request).send().await?).await?;
        Ok(())
    }
}
