//! Applies `product-updates` to the product names copied onto order items and to the
//! product cache used when placing orders.
use std::sync::Arc;

use async_trait::async_trait;
use common_cache::{merge_write_through, CacheConfig, CacheStore};
use common_channel::{ChangeHandler, Delivery, HandlerError};
use common_models::{ProductChange, ProductRecord};
use tracing::info;

use crate::repository::OrderRepository;

pub struct ProductChangeHandler {
    orders: Arc<dyn OrderRepository>,
    cache: Arc<dyn CacheStore>,
    cache_config: CacheConfig,
}

impl ProductChangeHandler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        cache: Arc<dyn CacheStore>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            orders,
            cache,
            cache_config,
        }
    }
}

#[async_trait]
impl ChangeHandler for ProductChangeHandler {
    async fn apply(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let change: ProductChange = serde_json::from_slice(&delivery.body)
            .map_err(|e| HandlerError::Poisoned(format!("invalid product change: {e}")))?;
        let product = change.product;

        if change.name_is_updated {
            let renamed = self
                .orders
                .rename_product(product.id, &product.name, product.updated_at)
                .await
                .map_err(|e| HandlerError::Retryable(e.to_string()))?;
            info!(product_id = %product.id, renamed, "synced product name onto order items");
        }

        let patch = serde_json::to_value(&product)
            .map_err(|e| HandlerError::Poisoned(format!("unencodable product: {e}")))?;
        merge_write_through(
            self.cache.as_ref(),
            &self.cache_config.key::<ProductRecord>(product.id),
            patch,
            self.cache_config.ttl,
        )
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chrono::{DateTime, Utc};
    use common_cache::{BatchResolver, MemoryCacheStore};
    use common_catalog::MockCatalogClient;
    use common_channel::{
        Headers, MemoryChannel, MessageChannel, Propagator, PropagatorConfig, Settlement,
    };
    use common_models::{ProductStatus, PRODUCT_UPDATES};
    use health::HealthRegistry;
    use uuid::Uuid;

    use crate::repository::{MemoryOrderRepository, NewOrder, NewOrderItem};

    fn product(name: &str) -> ProductRecord {
        let now = Utc::now();
        ProductRecord {
            id: Uuid::now_v7(),
            name: name.to_owned(),
            description: String::new(),
            price: 30.0,
            quantity: 5,
            status: ProductStatus::Active,
            owner_id: Uuid::now_v7(),
            owner_name: "Ada Lovelace".to_owned(),
            owner_phone: "555-0100".to_owned(),
            owner_email: "ada@example.com".to_owned(),
            created_at: now,
            updated_at: now,
        }
    }

    fn renamed(product: &ProductRecord, name: &str, at: DateTime<Utc>) -> ProductChange {
        ProductChange {
            product: ProductRecord {
                name: name.to_owned(),
                updated_at: at,
                ..product.clone()
            },
            name_is_updated: true,
        }
    }

    fn delivery(change: &ProductChange) -> Delivery {
        Delivery {
            id: 1,
            channel: PRODUCT_UPDATES.to_owned(),
            body: serde_json::to_vec(change).unwrap(),
            headers: Headers::new(),
            attempt: 1,
        }
    }

    async fn order_with(repo: &MemoryOrderRepository, products: &[&ProductRecord]) -> Uuid {
        let items = products
            .iter()
            .map(|product| NewOrderItem {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: 1,
                unit_price: product.price,
                product_synced_at: product.updated_at,
            })
            .collect();
        repo.create(NewOrder {
            user_id: Uuid::now_v7(),
            total_amount: 0.0,
            items,
        })
        .await
        .unwrap()
        .id
    }

    fn handler(repo: &MemoryOrderRepository, cache: &MemoryCacheStore) -> ProductChangeHandler {
        ProductChangeHandler::new(
            Arc::new(repo.clone()),
            Arc::new(cache.clone()),
            CacheConfig::default(),
        )
    }

    async fn item_names(repo: &MemoryOrderRepository, order_id: Uuid) -> Vec<String> {
        let order = repo.get(order_id).await.unwrap().unwrap();
        order.items.into_iter().map(|item| item.product_name).collect()
    }

    #[tokio::test]
    async fn rename_patches_every_order_item_of_the_product() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");
        let desk = product("Oak desk");
        let first = order_with(&repo, &[&lamp, &desk]).await;
        let second = order_with(&repo, &[&lamp]).await;

        let change = renamed(&lamp, "Floor lamp", lamp.updated_at + chrono::Duration::seconds(1));
        handler(&repo, &cache).apply(&delivery(&change)).await.unwrap();

        assert_eq!(item_names(&repo, first).await, vec!["Floor lamp", "Oak desk"]);
        assert_eq!(item_names(&repo, second).await, vec!["Floor lamp"]);
    }

    #[tokio::test]
    async fn redelivered_rename_is_a_no_op() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");
        let order = order_with(&repo, &[&lamp]).await;
        let handler = handler(&repo, &cache);
        let at = lamp.updated_at + chrono::Duration::seconds(1);
        let change = renamed(&lamp, "Floor lamp", at);

        handler.apply(&delivery(&change)).await.unwrap();
        handler.apply(&delivery(&change)).await.unwrap();

        assert_eq!(item_names(&repo, order).await, vec!["Floor lamp"]);
        assert_eq!(repo.rename_product(lamp.id, "Floor lamp", at).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn older_rename_does_not_overwrite_newer_one() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");
        let order = order_with(&repo, &[&lamp]).await;
        let handler = handler(&repo, &cache);
        let older = renamed(&lamp, "Table lamp", lamp.updated_at + chrono::Duration::seconds(1));
        let newer = renamed(&lamp, "Floor lamp", lamp.updated_at + chrono::Duration::seconds(2));

        handler.apply(&delivery(&newer)).await.unwrap();
        handler.apply(&delivery(&older)).await.unwrap();

        assert_eq!(item_names(&repo, order).await, vec!["Floor lamp"]);
        let resolver = BatchResolver::new(
            Arc::new(cache.clone()),
            Arc::new(MockCatalogClient::<ProductRecord>::new()),
            CacheConfig::default(),
        );
        let cached = resolver
            .resolve_many(&[lamp.id])
            .await
            .unwrap()
            .require_all()
            .unwrap();
        assert_eq!(cached[0].name, "Floor lamp");
        assert_eq!(cached[0].updated_at, newer.product.updated_at);
    }

    #[tokio::test]
    async fn price_change_refreshes_cache_without_touching_orders() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");
        let order = order_with(&repo, &[&lamp]).await;
        let change = ProductChange {
            product: ProductRecord {
                price: 45.0,
                ..lamp.clone()
            },
            name_is_updated: false,
        };

        handler(&repo, &cache).apply(&delivery(&change)).await.unwrap();

        assert_eq!(item_names(&repo, order).await, vec!["Desk lamp"]);
        let resolver = BatchResolver::new(
            Arc::new(cache.clone()),
            Arc::new(MockCatalogClient::<ProductRecord>::new()),
            CacheConfig::default(),
        );
        let cached = resolver
            .resolve_many(&[lamp.id])
            .await
            .unwrap()
            .require_all()
            .unwrap();
        assert_eq!(cached[0].price, 45.0);
    }

    #[tokio::test]
    async fn cache_entry_does_not_keep_the_flag() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");
        let change = renamed(&lamp, "Floor lamp", lamp.updated_at);

        handler(&repo, &cache).apply(&delivery(&change)).await.unwrap();

        let key = CacheConfig::default().key::<ProductRecord>(lamp.id);
        let entry: serde_json::Value = serde_json::from_slice(&cache.peek(&key).unwrap()).unwrap();
        assert_eq!(entry["name"], serde_json::json!("Floor lamp"));
        assert!(entry.get("name_is_updated").is_none());
    }

    #[tokio::test]
    async fn undecodable_message_is_poisoned() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let delivery = Delivery {
            body: br#"{"id": 7}"#.to_vec(),
            ..delivery(&renamed(&product("Desk lamp"), "x", Utc::now()))
        };

        let result = handler(&repo, &cache).apply(&delivery).await;

        assert!(matches!(result, Err(HandlerError::Poisoned(_))));
        assert!(cache.get_calls().is_empty());
    }

    #[tokio::test]
    async fn repository_failure_is_retryable() {
        let repo = MemoryOrderRepository::new().failing("connection reset");
        let cache = MemoryCacheStore::new();
        let lamp = product("Desk lamp");

        let result = handler(&repo, &cache)
            .apply(&delivery(&renamed(&lamp, "Floor lamp", Utc::now())))
            .await;

        assert!(matches!(result, Err(HandlerError::Retryable(_))));
    }

    #[tokio::test]
    async fn propagator_settles_rename_and_redelivery() {
        let repo = MemoryOrderRepository::new();
        let cache = MemoryCacheStore::new();
        let channel = MemoryChannel::default();
        let lamp = product("Desk lamp");
        let order = order_with(&repo, &[&lamp]).await;
        let change = renamed(&lamp, "Floor lamp", lamp.updated_at + chrono::Duration::seconds(1));
        for _ in 0..2 {
            channel
                .publish(
                    PRODUCT_UPDATES,
                    serde_json::to_vec(&change).unwrap(),
                    Headers::new(),
                )
                .await
                .unwrap();
        }

        let registry = HealthRegistry::new("liveness");
        let propagator = Propagator::new(
            Arc::new(channel.clone()),
            PRODUCT_UPDATES,
            Arc::new(handler(&repo, &cache)),
            PropagatorConfig::default(),
            registry
                .register("product-updates", Duration::from_secs(30))
                .await,
        );

        assert_eq!(propagator.poll_once().await.unwrap(), Some(Settlement::Acked));
        assert_eq!(propagator.poll_once().await.unwrap(), Some(Settlement::Acked));
        assert_eq!(propagator.poll_once().await.unwrap(), None);
        assert_eq!(item_names(&repo, order).await, vec!["Floor lamp"]);
    }
}
