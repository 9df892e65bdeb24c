//! [`HttpRecordStore`]: `reqwest` client for the remote store's REST API.
//!
//! Tables live at `<base>/<document_id>/<table>`. Requests carry a bearer
//! token; list calls page with the `offset` cursor.

use async_trait::async_trait;
use common::protocol::{DeleteRequest, RecordBatch, RecordPage, StoreRecord};
use reqwest::{header::USER_AGENT, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::{ListQuery, RecordStore, StoreError};

/// Longest error body kept in a [`StoreError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for [`HttpRecordStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub base_url: String,
    pub api_token: String,
    pub document_id: String,
    pub page_size: u32,
}

/// Remote store client over HTTPS.
#[derive(Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    base: Url,
    api_token: String,
    document_id: String,
    page_size: u32,
}

impl std::fmt::Debug for HttpRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecordStore")
            .field("base", &self.base.as_str())
            .field("document_id", &self.document_id)
            .field("api_token", &"[REDACTED]")
            .finish()
    }
}

impl HttpRecordStore {
    /// Build a client for the configured store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Url`] if the base URL does not parse or cannot
    /// carry path segments.
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| StoreError::Url(format!("{}: {e}", settings.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Url(format!(
                "{} cannot be used as a base URL",
                settings.base_url
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            api_token: settings.api_token.clone(),
            document_id: settings.document_id.clone(),
            page_size: settings.page_size,
        })
    }

    /// `<base>/<document_id>/<table>` with every segment percent-encoded.
    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Url(self.base.to_string()))?
            .pop_if_empty()
            .push(&self.document_id)
            .push(table);
        Ok(url)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    #[instrument(skip_all, fields(table = %table))]
    async fn list(&self, table: &str, query: &ListQuery) -> Result<RecordPage, StoreError> {
        let mut params: Vec<(&str, String)> = vec![("pageSize", self.page_size.to_string())];
        if let Some(offset) = &query.offset {
            params.push(("offset", offset.clone()));
        }
        if let Some(formula) = &query.filter_formula {
            params.push(("filterByFormula", formula.clone()));
        }

        let resp = self
            .client
            .get(self.table_url(table)?)
            .bearer_auth(&self.api_token)
            .header(USER_AGENT, "tenant-gateway")
            .query(&params)
            .send()
            .await?;
        let page: RecordPage = read_body(resp).await?;
        debug!(records = page.records.len(), more = page.offset.is_some(), "page fetched");
        Ok(page)
    }

    #[instrument(skip_all, fields(table = %table, count = records.len()))]
    async fn create(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let resp = self
            .client
            .post(self.table_url(table)?)
            .bearer_auth(&self.api_token)
            .header(USER_AGENT, "tenant-gateway")
            .json(&RecordBatch { records })
            .send()
            .await?;
        let batch: RecordBatch = read_body(resp).await?;
        Ok(batch.records)
    }

    #[instrument(skip_all, fields(table = %table, count = records.len()))]
    async fn update(
        &self,
        table: &str,
        records: Vec<StoreRecord>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let resp = self
            .client
            .patch(self.table_url(table)?)
            .bearer_auth(&self.api_token)
            .header(USER_AGENT, "tenant-gateway")
            .json(&RecordBatch { records })
            .send()
            .await?;
        let batch: RecordBatch = read_body(resp).await?;
        Ok(batch.records)
    }

    #[instrument(skip_all, fields(table = %table, count = ids.len()))]
    async fn delete(&self, table: &str, ids: Vec<String>) -> Result<(), StoreError> {
        let resp = self
            .client
            .delete(self.table_url(table)?)
            .bearer_auth(&self.api_token)
            .header(USER_AGENT, "tenant-gateway")
            .json(&DeleteRequest { ids })
            .send()
            .await?;
        let _: serde_json::Value = read_body(resp).await?;
        Ok(())
    }
}

/// Check the status and decode the body; an empty 2xx body decodes to `T::default()`.
async fn read_body<T>(resp: Response) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            body: truncate(text),
        });
    }
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&text)?)
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
