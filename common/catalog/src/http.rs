use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use tracing::debug;
use uuid::Uuid;

use crate::{BatchRequest, BatchResponse, CatalogClient, CatalogEntity, CatalogError};

/// JSON-over-HTTP catalog client.
///
/// Talks to `{base_url}/internal/{collection}/{id}` and `{base_url}/internal/{collection}/batch`.
/// A single `reqwest::Client` is kept for the lifetime of the client, so connections are pooled
/// across calls. Every request is bounded by `timeout`.
pub struct HttpCatalogClient<T> {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> HttpCatalogClient<T> {
    pub fn new(base_url: &str, collection: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("catalog-client")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            collection: collection.to_owned(),
            _entity: PhantomData,
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/internal/{}/{}", self.base_url, self.collection, suffix)
    }
}

#[async_trait]
impl<T: CatalogEntity> CatalogClient<T> for HttpCatalogClient<T> {
    async fn get_one(&self, id: Uuid) -> Result<T, CatalogError> {
        let response = self.client.get(self.url(&id.to_string())).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound { kind: T::KIND, id }),
            status => Err(CatalogError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<T>, CatalogError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(self.url("batch"))
            .json(&BatchRequest { ids: ids.to_vec() })
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(CatalogError::UnexpectedStatus(response.status().as_u16()));
        }

        let batch = response.json::<BatchResponse<T>>().await?;
        debug!(
            kind = T::KIND,
            requested = ids.len(),
            returned = batch.items.len(),
            "fetched batch from catalog"
        );
        Ok(batch.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: Uuid,
        name: String,
    }

    impl CatalogEntity for Widget {
        const KIND: &'static str = "widget";

        fn entity_id(&self) -> Uuid {
            self.id
        }
    }

    fn client(server: &MockServer) -> HttpCatalogClient<Widget> {
        HttpCatalogClient::new(&server.base_url(), "widgets", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn get_one_decodes_record() {
        let server = MockServer::start();
        let id = Uuid::now_v7();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/internal/widgets/{id}"));
            then.status(200)
                .json_body(serde_json::json!({"id": id, "name": "sprocket"}));
        });

        let widget = client(&server).get_one(id).await.unwrap();

        mock.assert();
        assert_eq!(
            widget,
            Widget {
                id,
                name: "sprocket".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn get_one_maps_404_to_not_found() {
        let server = MockServer::start();
        let id = Uuid::now_v7();
        server.mock(|when, then| {
            when.method(GET).path(format!("/internal/widgets/{id}"));
            then.status(404);
        });

        let err = client(&server).get_one(id).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_one_surfaces_server_errors() {
        let server = MockServer::start();
        let id = Uuid::now_v7();
        server.mock(|when, then| {
            when.method(GET).path(format!("/internal/widgets/{id}"));
            then.status(503);
        });

        let err = client(&server).get_one(id).await.unwrap_err();

        assert!(matches!(err, CatalogError::UnexpectedStatus(503)));
    }

    #[tokio::test]
    async fn get_many_posts_ids_and_returns_items() {
        let server = MockServer::start();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/internal/widgets/batch")
                .json_body(serde_json::json!({"ids": [a, b]}));
            then.status(200).json_body(serde_json::json!({
                "items": [{"id": b, "name": "b"}, {"id": a, "name": "a"}]
            }));
        });

        let widgets = client(&server).get_many(&[a, b]).await.unwrap();

        mock.assert();
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[0].id, b);
    }

    #[tokio::test]
    async fn get_many_with_no_ids_skips_the_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/internal/widgets/batch");
            then.status(200).json_body(serde_json::json!({"items": []}));
        });

        let widgets = client(&server).get_many(&[]).await.unwrap();

        assert!(widgets.is_empty());
        mock.assert_hits(0);
    }
}
