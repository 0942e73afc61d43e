//! Manticore Search vector index.
//!
//! Runs KNN queries against a Manticore table holding catalog embeddings and
//! exposes the results through the `VectorIndex` trait. Manticore reports
//! distances, which the retriever maps to similarities.

use hsclass_model::HsCode;
use hsclass_query::{ManticoreJsonDialect, ManticoreSqlDialect, QueryDialect, QueryError, VectorQuery};
use hsclass_retrieval::{IndexError, IndexHit, Metric, VectorIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from Manticore operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Backend not available")]
    Unavailable,
}

impl From<BackendError> for IndexError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Connection(msg) => IndexError::Unavailable(msg),
            BackendError::Unavailable => IndexError::Unavailable("manticore".to_string()),
            other => IndexError::SearchFailed(other.to_string()),
        }
    }
}

/// Which HTTP endpoint carries the KNN query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManticoreEndpoint {
    /// JSON `/search` with a `knn` object
    #[default]
    Search,
    /// `/sql?mode=raw` with `knn()` in the WHERE clause
    Sql,
}

/// Manticore Search backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManticoreConfig {
    /// Base URL for Manticore HTTP API
    pub base_url: String,
    /// Table holding catalog vectors
    pub table_name: String,
    /// Float-vector column
    pub vector_field: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    #[serde(default)]
    pub endpoint: ManticoreEndpoint,
}

impl Default for ManticoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9308".to_string(),
            table_name: "hs_catalog".to_string(),
            vector_field: "embedding".to_string(),
            timeout_secs: 5,
            endpoint: ManticoreEndpoint::Search,
        }
    }
}

/// Manticore-backed vector index.
pub struct ManticoreVectorIndex {
    config: ManticoreConfig,
    client: reqwest::Client,
}

impl ManticoreVectorIndex {
    pub fn new(config: ManticoreConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }

    pub fn config(&self) -> &ManticoreConfig {
        &self.config
    }

    fn query(&self, vector: &[f32], k: usize) -> VectorQuery {
        VectorQuery::new(vector.to_vec(), k)
            .with_table(self.config.table_name.clone())
            .with_field(self.config.vector_field.clone())
    }

    async fn post(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::QueryFailed(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(e.to_string()))
    }

    /// Raw-mode `/sql` request with the statement form-encoded.
    fn sql_request(&self, sql: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/sql", self.config.base_url))
            .query(&[("mode", "raw")])
            .form(&[("query", sql)])
    }

    /// Run a KNN query.
    pub async fn knn(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, BackendError> {
        let query = self.query(vector, k);
        match self.config.endpoint {
            ManticoreEndpoint::Search => {
                let body = ManticoreJsonDialect.translate(&query)?;
                tracing::debug!(table = %query.table, k, "Executing Manticore KNN search");
                let json = self
                    .post(self.client.post(format!("{}/search", self.config.base_url)).json(&body))
                    .await?;
                parse_search_response(&json)
            }
            ManticoreEndpoint::Sql => {
                let sql = ManticoreSqlDialect.translate(&query)?;
                tracing::debug!(table = %query.table, k, "Executing Manticore KNN SQL");
                let json = self.post(self.sql_request(&sql)).await?;
                parse_sql_response(&json)
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .post(format!("{}/cli", self.config.base_url))
            .body("SHOW STATUS")
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable)
        }
    }
}

fn hit_from(row: &serde_json::Value, distance: Option<f64>) -> Result<IndexHit, BackendError> {
    let raw_code = row
        .get("code")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BackendError::ParseError("Missing code".to_string()))?;
    let code = HsCode::parse(raw_code).map_err(|e| BackendError::ParseError(e.to_string()))?;
    let distance = distance.ok_or_else(|| BackendError::ParseError("Missing distance".to_string()))?;

    Ok(IndexHit {
        code,
        title: row.get("title").and_then(|v| v.as_str()).map(|s| s.to_string()),
        metric: Metric::Distance(distance as f32),
    })
}

/// Parse a `/search` response: `hits.hits[]` with `_source` and `_knn_dist`.
fn parse_search_response(response: &serde_json::Value) -> Result<Vec<IndexHit>, BackendError> {
    let hits = response
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| BackendError::ParseError("Missing hits array".to_string()))?;

    hits.iter()
        .map(|hit| {
            let source = hit
                .get("_source")
                .ok_or_else(|| BackendError::ParseError("Missing _source".to_string()))?;
            hit_from(source, hit.get("_knn_dist").and_then(|d| d.as_f64()))
        })
        .collect()
}

/// Parse a raw-mode `/sql` response: an array of result sets with `data` rows.
fn parse_sql_response(response: &serde_json::Value) -> Result<Vec<IndexHit>, BackendError> {
    let first = response
        .as_array()
        .and_then(|sets| sets.first())
        .ok_or_else(|| BackendError::ParseError("Missing result set".to_string()))?;

    if let Some(error) = first.get("error").and_then(|e| e.as_str()).filter(|e| !e.is_empty()) {
        return Err(BackendError::QueryFailed(error.to_string()));
    }

    let rows = first
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| BackendError::ParseError("Missing data array".to_string()))?;

    rows.iter()
        .map(|row| hit_from(row, row.get("distance").and_then(|d| d.as_f64())))
        .collect()
}

impl VectorIndex for ManticoreVectorIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        Ok(self.knn(vector, k).await?)
    }

    fn name(&self) -> &'static str {
        "manticore"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_search_response() {
        let response = json!({
            "took": 0,
            "hits": {
                "total": 2,
                "hits": [
                    {"_id": 1, "_score": 1, "_knn_dist": 0.25, "_source": {"code": "8471.30", "title": "Portable computers"}},
                    {"_id": 2, "_score": 1, "_knn_dist": 1.5, "_source": {"code": "847160"}}
                ]
            }
        });
        let hits = parse_search_response(&response).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].code, HsCode::parse("847130").unwrap());
        assert_eq!(hits[0].title.as_deref(), Some("Portable computers"));
        assert_eq!(hits[0].metric, Metric::Distance(0.25));
        assert!(hits[1].title.is_none());
    }

    #[test]
    fn test_sql_statement_is_form_encoded() {
        let index = ManticoreVectorIndex::new(ManticoreConfig {
            endpoint: ManticoreEndpoint::Sql,
            ..Default::default()
        });
        let request = index
            .sql_request("SELECT code FROM t WHERE title = 'a&b' AND x = 1+1")
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "http://127.0.0.1:9308/sql?mode=raw");
        assert_eq!(
            request.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        let body = std::str::from_utf8(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(
            body,
            "query=SELECT+code+FROM+t+WHERE+title+%3D+%27a%26b%27+AND+x+%3D+1%2B1"
        );
    }

    #[test]
    fn test_parse_sql_response() {
        let response = json!([{
            "columns": [{"code": {"type": "string"}}, {"title": {"type": "string"}}, {"distance": {"type": "float"}}],
            "data": [{"code": "090111", "title": "Coffee, not roasted", "distance": 0.5}],
            "total": 1,
            "error": "",
            "warning": ""
        }]);
        let hits = parse_sql_response(&response).unwrap();
        assert_eq!(hits[0].metric.to_similarity(), 1.0 / 1.5);
    }

    #[test]
    fn test_sql_error_surfaces() {
        let response = json!([{"error": "unknown table 'hs_catalog'"}]);
        assert!(matches!(parse_sql_response(&response), Err(BackendError::QueryFailed(_))));
    }

    #[test]
    fn test_missing_distance_is_parse_error() {
        let response = json!({"hits": {"hits": [{"_source": {"code": "847130"}}]}});
        assert!(matches!(parse_search_response(&response), Err(BackendError::ParseError(_))));
    }

    #[test]
    fn test_error_mapping() {
        let e: IndexError = BackendError::Connection("refused".into()).into();
        assert!(matches!(e, IndexError::Unavailable(_)));
        let e: IndexError = BackendError::InvalidQuery(QueryError::ZeroK).into();
        assert!(matches!(e, IndexError::SearchFailed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        let index = ManticoreVectorIndex::new(ManticoreConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..Default::default()
        });
        let err = index.search(&[0.1, 0.2], 3).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
    }
}
