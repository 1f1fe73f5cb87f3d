//! Client side of the internal catalog endpoints each service exposes, used to fetch
//! authoritative records owned by another service.
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod http;
mod mock;

pub use http::HttpCatalogClient;
pub use mock::{MockCatalogCall, MockCatalogClient};

/// A record that can be fetched from a catalog and cached under `<KIND>:<id>`.
pub trait CatalogEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Namespace used for cache keys. Must not contain `:`.
    const KIND: &'static str;

    fn entity_id(&self) -> Uuid;
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog responded with unexpected status {0}")]
    UnexpectedStatus(u16),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }
}

/// Lookups against the service that owns `T`.
#[async_trait]
pub trait CatalogClient<T: CatalogEntity>: Send + Sync {
    async fn get_one(&self, id: Uuid) -> Result<T, CatalogError>;

    /// Returns the records that exist, in no particular order. Missing ids are simply absent.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<T>, CatalogError>;
}

/// Body of `POST /internal/<collection>/batch`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchRequest {
    pub ids: Vec<Uuid>,
}

/// Response of `POST /internal/<collection>/batch`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse<T> {
    pub items: Vec<T>,
}
