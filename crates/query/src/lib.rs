//! Query translation and dialect generation.
//!
//! Converts an abstract nearest-neighbour `VectorQuery` into backend-specific
//! request syntax:
//! - Manticore SQL (`knn()` in the WHERE clause)
//! - Manticore JSON (`/search` with a `knn` object)

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("Empty query vector")]
    EmptyVector,
    #[error("Neighbour count must be at least 1")]
    ZeroK,
    #[error("Non-finite component at position {0}")]
    NonFinite(usize),
    #[error("Invalid identifier: {0}")]
    BadIdentifier(String),
}

/// A k-nearest-neighbour query over one vector column.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub table: String,
    pub field: String,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            table: "hs_catalog".to_string(),
            field: "embedding".to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    fn validate(&self) -> Result<(), QueryError> {
        if self.vector.is_empty() {
            return Err(QueryError::EmptyVector);
        }
        if self.k == 0 {
            return Err(QueryError::ZeroK);
        }
        if let Some(i) = self.vector.iter().position(|v| !v.is_finite()) {
            return Err(QueryError::NonFinite(i));
        }
        check_identifier(&self.table)?;
        check_identifier(&self.field)?;
        Ok(())
    }
}

/// Table and column names are interpolated, so only plain identifiers pass.
fn check_identifier(name: &str) -> Result<(), QueryError> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(QueryError::BadIdentifier(name.to_string()))
    }
}

/// Trait for translating queries to backend-specific syntax.
pub trait QueryDialect {
    /// The output type (usually String or a structured query)
    type Output;

    /// Translate a VectorQuery to this dialect
    fn translate(&self, query: &VectorQuery) -> Result<Self::Output, QueryError>;
}

/// Manticore SQL dialect generator.
#[derive(Debug, Default)]
pub struct ManticoreSqlDialect;

impl QueryDialect for ManticoreSqlDialect {
    type Output = String;

    fn translate(&self, query: &VectorQuery) -> Result<String, QueryError> {
        query.validate()?;

        let vector = query
            .vector
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "SELECT code, title, knn_dist() AS distance FROM {} WHERE knn({}, {}, ({})) LIMIT {}",
            query.table, query.field, query.k, vector, query.k
        );

        Ok(sql)
    }
}

/// Manticore JSON `/search` dialect generator.
#[derive(Debug, Default)]
pub struct ManticoreJsonDialect;

impl QueryDialect for ManticoreJsonDialect {
    type Output = serde_json::Value;

    fn translate(&self, query: &VectorQuery) -> Result<serde_json::Value, QueryError> {
        query.validate()?;

        Ok(serde_json::json!({
            "index": query.table,
            "knn": {
                "field": query.field,
                "query_vector": query.vector,
                "k": query.k,
            },
            "_source": ["code", "title"],
            "limit": query.k,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_knn() {
        let query = VectorQuery::new(vec![0.5, -0.25, 1.0], 5);
        let sql = ManticoreSqlDialect.translate(&query).unwrap();
        assert!(sql.contains("knn(embedding, 5, (0.5,-0.25,1))"));
        assert!(sql.contains("FROM hs_catalog"));
        assert!(sql.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_json_knn() {
        let query = VectorQuery::new(vec![0.1, 0.2], 3).with_table("catalog_v2");
        let body = ManticoreJsonDialect.translate(&query).unwrap();
        assert_eq!(body["index"], "catalog_v2");
        assert_eq!(body["knn"]["k"], 3);
        assert_eq!(body["knn"]["query_vector"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_vector_error() {
        let query = VectorQuery::new(Vec::new(), 5);
        assert_eq!(ManticoreSqlDialect.translate(&query), Err(QueryError::EmptyVector));
    }

    #[test]
    fn test_zero_k_error() {
        let query = VectorQuery::new(vec![1.0], 0);
        assert_eq!(ManticoreJsonDialect.translate(&query), Err(QueryError::ZeroK));
    }

    #[test]
    fn test_non_finite_rejected() {
        let query = VectorQuery::new(vec![1.0, f32::NAN], 2);
        assert_eq!(ManticoreSqlDialect.translate(&query), Err(QueryError::NonFinite(1)));
    }

    #[test]
    fn test_identifier_injection_rejected() {
        let query = VectorQuery::new(vec![1.0], 2).with_table("t; DROP TABLE x");
        assert!(matches!(
            ManticoreSqlDialect.translate(&query),
            Err(QueryError::BadIdentifier(_))
        ));
    }
}
