use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::storage::models::{ContinueWatchingRecord, SourceRecord, WatchLaterRecord};
use crate::core::storage::repository::StorageError;
use crate::core::upstream::types::{Item, ItemKind, SourceDetails, UploadsHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, session_token: Option<&str>) -> Option<UserId>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, user: &UserId) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct LocalUser(pub UserId);

#[async_trait]
impl IdentityResolver for LocalUser {
    async fn resolve(&self, _session_token: Option<&str>) -> Option<UserId> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeyOnly;

#[async_trait]
impl CredentialProvider for ApiKeyOnly {
    async fn credential(&self, _user: &UserId) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn list_enabled_sources(&self, user: &UserId) -> Result<Vec<String>, StorageError>;
    async fn list_all_sources(&self, user: &UserId) -> Result<Vec<SourceRecord>, StorageError>;
    async fn upsert_source(&self, details: &SourceDetails) -> Result<(), StorageError>;
    async fn subscribe(&self, user: &UserId, source_id: &str) -> Result<(), StorageError>;
    async fn unsubscribe(&self, user: &UserId, source_id: &str) -> Result<u64, StorageError>;
    async fn set_source_enabled(
        &self,
        user: &UserId,
        source_id: &str,
        enabled: bool,
    ) -> Result<u64, StorageError>;
    async fn uploads_handle(&self, source_id: &str) -> Result<Option<UploadsHandle>, StorageError>;
    async fn save_uploads_handle(
        &self,
        source_id: &str,
        handle: &UploadsHandle,
    ) -> Result<(), StorageError>;
    async fn clear_uploads_handle(&self, source_id: &str) -> Result<(), StorageError>;
    async fn mark_refreshed(
        &self,
        user: &UserId,
        source_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn list_users(&self) -> Result<Vec<UserId>, StorageError>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find_known_identities(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<HashSet<String>, StorageError>;
    // Returns rows actually inserted.
    async fn insert_ignoring_duplicates(&self, items: &[Item]) -> Result<u64, StorageError>;
    async fn find_most_recently_published(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<Option<Item>, StorageError>;
    async fn list_items(
        &self,
        user: &UserId,
        kind: ItemKind,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Item>, StorageError>;
}

#[async_trait]
pub trait WatchStateStore: Send + Sync {
    async fn add_watch_later(&self, user: &UserId, item_id: &str) -> Result<(), StorageError>;
    async fn remove_watch_later(&self, user: &UserId, item_id: &str) -> Result<u64, StorageError>;
    async fn list_watch_later(&self, user: &UserId) -> Result<Vec<WatchLaterRecord>, StorageError>;
    async fn set_progress(
        &self,
        user: &UserId,
        item_id: &str,
        position_secs: i64,
    ) -> Result<(), StorageError>;
    async fn clear_progress(&self, user: &UserId, item_id: &str) -> Result<u64, StorageError>;
    async fn list_continue_watching(
        &self,
        user: &UserId,
    ) -> Result<Vec<ContinueWatchingRecord>, StorageError>;
    async fn mark_not_interested(&self, user: &UserId, item_id: &str) -> Result<(), StorageError>;
    async fn unmark_not_interested(&self, user: &UserId, item_id: &str)
        -> Result<u64, StorageError>;
    async fn not_interested_ids(&self, user: &UserId) -> Result<HashSet<String>, StorageError>;
}
