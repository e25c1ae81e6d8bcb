mod core;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::core::aggregator::{FeedAggregator, FeedQuery};
use crate::core::cache::FetchStateCache;
use crate::core::logging::init_logging;
use crate::core::ports::{ItemStore, SubscriptionStore, WatchStateStore};
use crate::core::refresh::RefreshDriver;
use crate::core::storage::models::SourceRecord;
use crate::core::upstream::client::YoutubeClient;
use crate::core::upstream::types::UpstreamAuth;
use crate::core::AppServices;

pub use crate::core::aggregator::{FeedError, FeedPage};
pub use crate::core::config::{AppConfig, ConfigError};
pub use crate::core::ports::{
    ApiKeyOnly, CredentialProvider, IdentityResolver, LocalUser, UserId,
};
pub use crate::core::refresh::{BulkRefreshOutcome, RefreshError, RefreshOutcome};
pub use crate::core::storage::models::{ContinueWatchingRecord, WatchLaterRecord};
pub use crate::core::storage::repository::{FeedRepository, StorageError};
pub use crate::core::upstream::client::UpstreamError;
pub use crate::core::upstream::types::{Item, ItemKind, SourceDetails};
pub use crate::core::upstream::SourceClient;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDto {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub uploads_handle: Option<String>,
    pub is_enabled: bool,
    pub last_refreshed_at: Option<String>,
}

fn source_to_dto(row: SourceRecord) -> SourceDto {
    SourceDto {
        id: row.id,
        title: row.title,
        thumbnail_url: row.thumbnail_url,
        uploads_handle: row.uploads_handle,
        is_enabled: row.is_enabled == 1,
        last_refreshed_at: row.last_refreshed_at,
    }
}

pub struct FeedApp {
    services: AppServices,
    identity: Arc<dyn IdentityResolver>,
    credentials: Arc<dyn CredentialProvider>,
    client: Arc<dyn SourceClient>,
    repository: FeedRepository,
    aggregator: FeedAggregator,
    refresher: RefreshDriver,
    library_page_size: usize,
}

impl FeedApp {
    pub fn new(
        config: &AppConfig,
        repository: FeedRepository,
        client: Arc<dyn SourceClient>,
        identity: Arc<dyn IdentityResolver>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let cache = Arc::new(FetchStateCache::new(config.cache_ttl));
        let store = Arc::new(repository.clone());
        let aggregator = FeedAggregator::new(
            client.clone(),
            credentials.clone(),
            cache,
            config.aggregator_settings(),
        );
        let refresher = RefreshDriver::new(
            client.clone(),
            credentials.clone(),
            store.clone(),
            store,
            config.refresh_settings(),
        );
        Self {
            services: AppServices::default(),
            identity,
            credentials,
            client,
            repository,
            aggregator,
            refresher,
            library_page_size: config.feed_page_size,
        }
    }

    pub fn health_report(&self) -> BTreeMap<String, String> {
        self.services.health_report()
    }

    pub async fn authenticate(&self, session_token: Option<&str>) -> Result<UserId, AppError> {
        self.identity
            .resolve(session_token)
            .await
            .ok_or(AppError::Unauthenticated)
    }

    pub async fn feed_page(
        &self,
        user: &UserId,
        page: usize,
        kind: ItemKind,
    ) -> Result<FeedPage, AppError> {
        let source_ids = self.repository.list_enabled_sources(user).await?;
        let hidden = self.repository.not_interested_ids(user).await?;
        let page = self
            .aggregator
            .get_page(FeedQuery {
                user,
                source_ids: &source_ids,
                page,
                kind,
                hidden: Some(&hidden),
            })
            .await?;
        Ok(page)
    }

    pub async fn feed_page_by_type(
        &self,
        user: &UserId,
        page: usize,
        kind: &str,
    ) -> Result<FeedPage, AppError> {
        let kind = ItemKind::parse(kind)
            .ok_or_else(|| AppError::InvalidInput(format!("unsupported feed type: {kind}")))?;
        self.feed_page(user, page, kind).await
    }

    pub async fn videos_page(&self, user: &UserId, page: usize) -> Result<FeedPage, AppError> {
        self.feed_page(user, page, ItemKind::LongForm).await
    }

    pub async fn shorts_page(&self, user: &UserId, page: usize) -> Result<FeedPage, AppError> {
        self.feed_page(user, page, ItemKind::ShortForm).await
    }

    pub async fn library_page(
        &self,
        user: &UserId,
        kind: ItemKind,
        page: usize,
    ) -> Result<Vec<Item>, AppError> {
        if page == 0 {
            return Err(AppError::InvalidInput("page numbers start at 1".to_string()));
        }
        let limit = self.library_page_size;
        let offset = (page - 1)
            .checked_mul(limit)
            .and_then(|offset| i64::try_from(offset).ok())
            .ok_or_else(|| AppError::InvalidInput(format!("page {page} is out of range")))?;
        let limit = i64::try_from(limit)
            .map_err(|_| AppError::InvalidInput("page size is out of range".to_string()))?;
        Ok(self.repository.list_items(user, kind, offset, limit).await?)
    }

    pub async fn refresh_source(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<RefreshOutcome, AppError> {
        Ok(self.refresher.refresh(user, source_id).await?)
    }

    pub async fn refresh_all(&self, user: &UserId) -> Result<BulkRefreshOutcome, AppError> {
        Ok(self.refresher.refresh_all(user).await?)
    }

    pub async fn refresh_every_user(&self) -> Result<(), AppError> {
        for user in self.repository.list_users().await? {
            match self.refresher.refresh_all(&user).await {
                Ok(outcome) if outcome.quota_exceeded => {
                    warn!(user = %user, "upstream quota exhausted; deferring remaining users");
                    break;
                }
                Ok(_) => {}
                Err(error) => warn!(user = %user, error = %error, "refresh pass failed"),
            }
        }
        Ok(())
    }

    pub async fn list_sources(&self, user: &UserId) -> Result<Vec<SourceDto>, AppError> {
        let rows = self.repository.list_all_sources(user).await?;
        Ok(rows.into_iter().map(source_to_dto).collect())
    }

    pub async fn subscribe(&self, user: &UserId, source_id: &str) -> Result<SourceDetails, AppError> {
        let source_id = source_id.trim();
        if source_id.is_empty() {
            return Err(AppError::InvalidInput("source id is required".to_string()));
        }
        let auth = UpstreamAuth::from_credential(self.credentials.credential(user).await);
        let details = self.client.describe_source(source_id, &auth).await?;
        self.repository.upsert_source(&details).await?;
        self.repository.subscribe(user, &details.id).await?;
        self.aggregator.cache().invalidate(user);
        info!(user = %user, source_id = %details.id, "subscribed");
        Ok(details)
    }

    pub async fn unsubscribe(&self, user: &UserId, source_id: &str) -> Result<bool, AppError> {
        let removed = self.repository.unsubscribe(user, source_id).await?;
        self.aggregator.cache().invalidate(user);
        Ok(removed > 0)
    }

    pub async fn set_source_enabled(
        &self,
        user: &UserId,
        source_id: &str,
        enabled: bool,
    ) -> Result<bool, AppError> {
        let changed = self
            .repository
            .set_source_enabled(user, source_id, enabled)
            .await?;
        self.aggregator.cache().invalidate(user);
        Ok(changed > 0)
    }

    pub async fn add_watch_later(&self, user: &UserId, item_id: &str) -> Result<(), AppError> {
        Ok(self.repository.add_watch_later(user, item_id).await?)
    }

    pub async fn remove_watch_later(&self, user: &UserId, item_id: &str) -> Result<bool, AppError> {
        Ok(self.repository.remove_watch_later(user, item_id).await? > 0)
    }

    pub async fn list_watch_later(&self, user: &UserId) -> Result<Vec<WatchLaterRecord>, AppError> {
        Ok(self.repository.list_watch_later(user).await?)
    }

    pub async fn set_progress(
        &self,
        user: &UserId,
        item_id: &str,
        position_secs: i64,
    ) -> Result<(), AppError> {
        if position_secs < 0 {
            return Err(AppError::InvalidInput(
                "position must not be negative".to_string(),
            ));
        }
        Ok(self.repository.set_progress(user, item_id, position_secs).await?)
    }

    pub async fn clear_progress(&self, user: &UserId, item_id: &str) -> Result<bool, AppError> {
        Ok(self.repository.clear_progress(user, item_id).await? > 0)
    }

    pub async fn list_continue_watching(
        &self,
        user: &UserId,
    ) -> Result<Vec<ContinueWatchingRecord>, AppError> {
        Ok(self.repository.list_continue_watching(user).await?)
    }

    pub async fn mark_not_interested(&self, user: &UserId, item_id: &str) -> Result<(), AppError> {
        Ok(self.repository.mark_not_interested(user, item_id).await?)
    }

    pub async fn unmark_not_interested(&self, user: &UserId, item_id: &str) -> Result<bool, AppError> {
        Ok(self.repository.unmark_not_interested(user, item_id).await? > 0)
    }

    pub fn purge_expired_cache(&self) -> usize {
        self.aggregator.cache().purge_expired()
    }
}

async fn build_app(config: &AppConfig) -> Result<FeedApp, AppError> {
    let repository = FeedRepository::connect(&config.database_url).await?;
    let client = YoutubeClient::new(&config.client_settings())
        .map_err(|error| AppError::Upstream(error.into()))?;
    if config.api_key.is_empty() {
        warn!("TUBEFEED_API_KEY is not set; upstream calls need a per-user credential");
    }
    Ok(FeedApp::new(
        config,
        repository,
        Arc::new(client),
        Arc::new(LocalUser(UserId::new("local"))),
        Arc::new(ApiKeyOnly),
    ))
}

pub fn run() {
    let _ = dotenvy::from_filename(".env.local");
    let config = AppConfig::from_env().expect("invalid tubefeed configuration");
    init_logging(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime");
    runtime.block_on(async move {
        let app = build_app(&config)
            .await
            .expect("error while starting tubefeed");
        info!(services = ?app.health_report(), "tubefeed started");
        loop {
            if let Err(error) = app.refresh_every_user().await {
                error!(error = %error, "background refresh failed");
            }
            let purged = app.purge_expired_cache();
            if purged > 0 {
                info!(purged, "expired feed cache entries removed");
            }
            tokio::time::sleep(config.refresh_interval).await;
        }
    });
}
