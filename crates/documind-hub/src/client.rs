//! HTTP client for the dataset registry's `/rows` endpoint.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use documind_core::Split;
use thiserror::Error;
use tracing::{debug, info};

use crate::rows::{RowEntry, RowsPage, class_names, rows_to_batch};

/// Largest page the registry serves per request.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// A leading slice of one remote partition.
#[derive(Debug, Clone)]
pub struct DatasetSlice {
    pub split: Split,
    pub batch: RecordBatch,
    /// Class names of the label feature; empty when the split has none.
    pub label_names: Vec<String>,
    /// Rows available remotely, before slicing.
    pub num_rows_total: usize,
}

/// Source of labelled partitions. The ingestion stage only sees this seam.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Fetch the first `length` rows of `split`, or fewer when the split is
    /// shorter.
    async fn fetch_slice(&self, split: Split, length: usize) -> Result<DatasetSlice, HubError>;
}

/// Client for one dataset/subset on a datasets-server style registry.
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
    subset: String,
    page_size: usize,
}

impl HubClient {
    /// `base_url` should be like `https://datasets-server.huggingface.co`.
    pub fn new(base_url: &str, dataset: &str, subset: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dataset: dataset.to_string(),
            subset: subset.to_string(),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Override the page size, capped at [`MAX_PAGE_SIZE`].
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    async fn fetch_page(
        &self,
        split: Split,
        offset: usize,
        length: usize,
    ) -> Result<RowsPage, HubError> {
        let url = format!("{}/rows", self.base_url);
        let offset_param = offset.to_string();
        let length_param = length.to_string();
        debug!(url = %url, split = %split, offset, length, "fetching rows");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("dataset", self.dataset.as_str()),
                ("config", self.subset.as_str()),
                ("split", split.as_str()),
                ("offset", offset_param.as_str()),
                ("length", length_param.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HubError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DatasetSource for HubClient {
    async fn fetch_slice(&self, split: Split, length: usize) -> Result<DatasetSlice, HubError> {
        info!(
            dataset = %self.dataset,
            subset = %self.subset,
            split = %split,
            length,
            "fetching dataset slice"
        );

        let first = self.fetch_page(split, 0, length.min(self.page_size)).await?;
        let features = first.features;
        let total = first.num_rows_total;
        let target = length.min(total);
        let mut rows: Vec<RowEntry> = first.rows;

        while rows.len() < target {
            let want = (target - rows.len()).min(self.page_size);
            let page = self.fetch_page(split, rows.len(), want).await?;
            if page.rows.is_empty() {
                break;
            }
            rows.extend(page.rows);
        }
        rows.truncate(target);

        let batch = rows_to_batch(&features, &rows)?;
        let label_names = class_names(&features);
        info!(
            split = %split,
            rows = batch.num_rows(),
            available = total,
            labels = label_names.len(),
            "fetched dataset slice"
        );
        Ok(DatasetSlice {
            split,
            batch,
            label_names,
            num_rows_total: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn page_body(texts: &[&str], total: usize) -> String {
        let rows: Vec<serde_json::Value> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| serde_json::json!({"row_idx": i, "row": {"text": t, "label": i % 2}}))
            .collect();
        serde_json::json!({
            "features": [
                {"name": "text", "type": {"dtype": "string", "_type": "Value"}},
                {"name": "label", "type": {"names": ["Adjustments", "Governing Laws"], "_type": "ClassLabel"}}
            ],
            "rows": rows,
            "num_rows_total": total
        })
        .to_string()
    }

    fn query(split: &str, offset: usize, length: usize) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("dataset".into(), "coastalcph/lex_glue".into()),
            Matcher::UrlEncoded("config".into(), "ledgar".into()),
            Matcher::UrlEncoded("split".into(), split.into()),
            Matcher::UrlEncoded("offset".into(), offset.to_string()),
            Matcher::UrlEncoded("length".into(), length.to_string()),
        ])
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = HubClient::new("http://localhost:8080/", "d", "c");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn page_size_is_capped() {
        let client = HubClient::new("http://x", "d", "c").with_page_size(500);
        assert_eq!(client.page_size, MAX_PAGE_SIZE);
    }

    #[tokio::test]
    async fn slice_pages_through_rows() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/rows")
            .match_query(query("train", 0, 2))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&["a", "b"], 10))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/rows")
            .match_query(query("train", 2, 1))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&["c"], 10))
            .create_async()
            .await;

        let client = HubClient::new(&server.url(), "coastalcph/lex_glue", "ledgar").with_page_size(2);
        let slice = client.fetch_slice(Split::Train, 3).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(slice.batch.num_rows(), 3);
        assert_eq!(slice.num_rows_total, 10);
        assert_eq!(slice.label_names, vec!["Adjustments", "Governing Laws"]);
    }

    #[tokio::test]
    async fn slice_clamps_to_available_rows() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/rows")
            .match_query(query("test", 0, 100))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&["only", "two"], 2))
            .create_async()
            .await;

        let client = HubClient::new(&server.url(), "coastalcph/lex_glue", "ledgar");
        let slice = client.fetch_slice(Split::Test, 1000).await.unwrap();
        assert_eq!(slice.batch.num_rows(), 2);
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/rows")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("dataset not found")
            .create_async()
            .await;

        let client = HubClient::new(&server.url(), "coastalcph/lex_glue", "ledgar");
        match client.fetch_slice(Split::Validation, 10).await {
            Err(HubError::Server { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "dataset not found");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }
}
