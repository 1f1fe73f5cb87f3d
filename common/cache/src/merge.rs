use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{CacheKey, CacheStore};

/// Field compared to decide whether a patch is older than the cached entry.
const VERSION_FIELD: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The patch was folded into an existing object entry.
    Merged,
    /// No usable entry existed; the patch was stored as is.
    Replaced,
    /// The cached entry is newer than the patch; nothing was written.
    Stale,
    /// The write failed and was logged.
    Failed,
}

fn version(fields: &Map<String, Value>) -> Option<DateTime<FixedOffset>> {
    fields
        .get(VERSION_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
}

/// Fold a field patch into the cached entry at `key`.
///
/// Fields present only in the cached entry are kept, patched fields are overwritten. A patch
/// whose `updated_at` is older than the cached entry's is dropped, so a redelivered event
/// cannot roll the cache back. The read-modify-write is not atomic: a concurrent fill may lose
/// either side, and the next resolver miss or event repairs it. Never returns an error;
/// failures are logged.
pub async fn merge_write_through(
    store: &dyn CacheStore,
    key: &CacheKey,
    patch: Value,
    ttl: Duration,
) -> MergeOutcome {
    let (merged, outcome) = match (store.get(key).await, patch) {
        (Ok(Some(bytes)), Value::Object(fields)) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(mut existing)) => {
                if let (Some(cached), Some(incoming)) = (version(&existing), version(&fields)) {
                    if incoming < cached {
                        debug!(key = %key, %cached, %incoming, "skipping stale cache patch");
                        return MergeOutcome::Stale;
                    }
                }
                existing.extend(fields);
                (Value::Object(existing), MergeOutcome::Merged)
            }
            _ => (Value::Object(fields), MergeOutcome::Replaced),
        },
        (Ok(_), patch) => (patch, MergeOutcome::Replaced),
        (Err(e), patch) => {
            warn!(key = %key, error = %e, "could not read cache entry to merge, overwriting");
            (patch, MergeOutcome::Replaced)
        }
    };

    let bytes = match serde_json::to_vec(&merged) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "could not serialize merged cache entry");
            return MergeOutcome::Failed;
        }
    };

    match store.set(key, bytes, ttl).await {
        Ok(()) => outcome,
        Err(e) => {
            warn!(key = %key, error = %e, "could not save change to cache");
            MergeOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheError, MemoryCacheStore};
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    fn stored(store: &MemoryCacheStore, key: &CacheKey) -> Value {
        serde_json::from_slice(&store.peek(key).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn keeps_fields_only_the_cache_knows() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("product", "p7");
        store.insert_raw(
            &key,
            serde_json::to_vec(&json!({"id": "p7", "name": "old", "rating": 4.5})).unwrap(),
            TTL,
        );

        let outcome =
            merge_write_through(&store, &key, json!({"id": "p7", "name": "new"}), TTL).await;

        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(
            stored(&store, &key),
            json!({"id": "p7", "name": "new", "rating": 4.5})
        );
    }

    #[tokio::test]
    async fn missing_or_corrupt_entries_are_replaced() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("product", "p8");

        let outcome = merge_write_through(&store, &key, json!({"name": "first"}), TTL).await;
        assert_eq!(outcome, MergeOutcome::Replaced);

        store.insert_raw(&key, b"garbage".to_vec(), TTL);
        let outcome = merge_write_through(&store, &key, json!({"name": "second"}), TTL).await;
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert_eq!(stored(&store, &key), json!({"name": "second"}));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let store = MemoryCacheStore::new().fail_set(CacheError::Timeout);
        let key = CacheKey::new("user", "u1");

        let outcome = merge_write_through(&store, &key, json!({"phone": "555"}), TTL).await;

        assert_eq!(outcome, MergeOutcome::Failed);
    }

    #[tokio::test]
    async fn merging_twice_is_idempotent() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("user", "u2");
        let patch = json!({"first_name": "Grace", "last_name": "Hopper"});

        merge_write_through(&store, &key, patch.clone(), TTL).await;
        let once = stored(&store, &key);
        merge_write_through(&store, &key, patch, TTL).await;

        assert_eq!(stored(&store, &key), once);
    }

    #[tokio::test]
    async fn older_patch_does_not_overwrite_newer_entry() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("product", "p9");
        let newer = json!({
            "id": "p9",
            "name": "Floor lamp",
            "updated_at": "2024-03-01T10:00:02Z",
        });
        let older = json!({
            "id": "p9",
            "name": "Table lamp",
            "updated_at": "2024-03-01T10:00:01Z",
        });

        merge_write_through(&store, &key, newer.clone(), TTL).await;
        let outcome = merge_write_through(&store, &key, older, TTL).await;

        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(stored(&store, &key), newer);
    }

    #[tokio::test]
    async fn same_or_newer_version_is_merged() {
        let store = MemoryCacheStore::new();
        let key = CacheKey::new("user", "u3");
        store.insert_raw(
            &key,
            serde_json::to_vec(&json!({"phone": "555", "updated_at": "2024-03-01T10:00:00+00:00"}))
                .unwrap(),
            TTL,
        );

        let same = merge_write_through(
            &store,
            &key,
            json!({"phone": "556", "updated_at": "2024-03-01T10:00:00Z"}),
            TTL,
        )
        .await;
        let newer = merge_write_through(
            &store,
            &key,
            json!({"phone": "557", "updated_at": "2024-03-01T11:00:00Z"}),
            TTL,
        )
        .await;

        assert_eq!(same, MergeOutcome::Merged);
        assert_eq!(newer, MergeOutcome::Merged);
        assert_eq!(stored(&store, &key)["phone"], json!("557"));
    }
}
