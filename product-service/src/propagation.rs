//! Applies `user-updates` to the owner details copied onto products.
use std::sync::Arc;

use async_trait::async_trait;
use common_cache::{merge_write_through, CacheConfig, CacheStore};
use common_channel::{ChangeHandler, Delivery, HandlerError};
use common_models::{UserChange, UserRecord};
use tracing::info;

use crate::repository::ProductRepository;

pub struct OwnerChangeHandler {
    products: Arc<dyn ProductRepository>,
    cache: Arc<dyn CacheStore>,
    cache_config: CacheConfig,
}

impl OwnerChangeHandler {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        cache: Arc<dyn CacheStore>,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            products,
            cache,
            cache_config,
        }
    }
}

#[async_trait]
impl ChangeHandler for OwnerChangeHandler {
    async fn apply(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let change: UserChange = serde_json::from_slice(&delivery.body)
            .map_err(|e| HandlerError::Poisoned(format!("invalid user change: {e}")))?;
        let user = change.user;

        if change.contact_is_updated {
            let updated = self
                .products
                .apply_owner_change(&user)
                .await
                .map_err(|e| HandlerError::Retryable(e.to_string()))?;
            info!(user_id = %user.id, updated, "synced owner details onto products");
        }

        let patch = serde_json::to_value(&user)
            .map_err(|e| HandlerError::Poisoned(format!("unencodable user: {e}")))?;
        merge_write_through(
            self.cache.as_ref(),
            &self.cache_config.key::<UserRecord>(user.id),
            patch,
            self.cache_config.ttl,
        )
        .await;

        Ok(())
    }
}
