//! Device query cache: key layout, serialization, and invalidation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inventory_core::{GetDevice, ListDevices, Operation, RequestContext};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CacheError, CacheResult, CacheStore, QueryCache};

/// Typed cache for device queries over any [`CacheStore`].
///
/// Keys, relative to the configured prefix:
/// - `device:{id}` for [`GetDevice`]
/// - `devices:list:{brand}:{state}:{page}:{size}` for [`ListDevices`], with an
///   empty segment for an absent filter
#[derive(Clone)]
pub struct DeviceCache {
    store: Arc<dyn CacheStore>,
    prefix: Arc<str>,
}

impl DeviceCache {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: Arc::from(prefix.into()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    #[must_use]
    pub fn device_key(&self, id: &str) -> String {
        format!("{}device:{id}", self.prefix)
    }

    #[must_use]
    pub fn list_key(&self, query: &ListDevices) -> String {
        format!(
            "{}devices:list:{}:{}:{}:{}",
            self.prefix,
            query.brand.as_deref().unwrap_or_default(),
            query.state.map(|s| s.as_str()).unwrap_or_default(),
            query.page,
            query.page_size,
        )
    }

    fn list_pattern(&self) -> String {
        format!("{}devices:list:*", self.prefix)
    }

    /// Removes the cached entry for one device.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn invalidate_device(&self, id: &str) -> Result<bool, CacheError> {
        self.store.delete(&self.device_key(id)).await
    }

    /// Removes every cached list page. Returns the number of removed entries.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn invalidate_lists(&self) -> Result<u64, CacheError> {
        self.store.delete_pattern(&self.list_pattern()).await
    }

    /// Removes every entry under this cache's prefix matching the glob
    /// `pattern`. Returns the number of removed entries.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or [`CacheError::InvalidPattern`].
    pub async fn purge(&self, pattern: &str) -> Result<u64, CacheError> {
        self.store
            .delete_pattern(&format!("{}{pattern}", self.prefix))
            .await
    }

    /// Drops expired entries from the underlying store.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.store.purge_expired().await
    }

    async fn read<T: DeserializeOwned>(&self, key: String) -> Result<CacheResult<T>, CacheError> {
        match self.store.get(&key).await? {
            Some(entry) => {
                let value = serde_json::from_str(&entry.value)?;
                Ok(CacheResult::hit(
                    key,
                    value,
                    entry.remaining_ttl,
                    entry.cached_at,
                ))
            }
            None => Ok(CacheResult::miss(key)),
        }
    }

    async fn write<T: Serialize + Sync>(
        &self,
        key: String,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value)?;
        self.store.set(&key, encoded, ttl).await
    }
}

#[async_trait]
impl QueryCache<GetDevice> for DeviceCache {
    async fn get(
        &self,
        _ctx: &RequestContext,
        query: &GetDevice,
    ) -> Result<CacheResult<<GetDevice as Operation>::Output>, CacheError> {
        self.read(self.device_key(&query.id)).await
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        query: &GetDevice,
        value: &<GetDevice as Operation>::Output,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(self.device_key(&query.id), value, ttl).await
    }
}

#[async_trait]
impl QueryCache<ListDevices> for DeviceCache {
    async fn get(
        &self,
        _ctx: &RequestContext,
        query: &ListDevices,
    ) -> Result<CacheResult<<ListDevices as Operation>::Output>, CacheError> {
        self.read(self.list_key(query)).await
    }

    async fn set(
        &self,
        _ctx: &RequestContext,
        query: &ListDevices,
        value: &<ListDevices as Operation>::Output,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.write(self.list_key(query), value, ttl).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
