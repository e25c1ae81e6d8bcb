use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::ports::{CredentialProvider, ItemStore, SubscriptionStore, UserId};
use crate::core::storage::repository::StorageError;
use crate::core::upstream::client::UpstreamError;
use crate::core::upstream::types::{Item, PageCursor, PageRequest, UpstreamAuth};
use crate::core::upstream::SourceClient;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RefreshError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::Upstream(error) if error.is_quota())
    }
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub upstream_page_size: u32,
    pub max_pages: usize,
    pub concurrency: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            upstream_page_size: 50,
            max_pages: 20,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshService;

impl RefreshService {
    pub fn name(&self) -> &'static str {
        "refresh"
    }

    pub fn status(&self) -> &'static str {
        "ready"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub source_id: String,
    pub new_items: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkRefreshOutcome {
    pub refreshed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub new_items: u64,
    pub quota_exceeded: bool,
}

enum SourceResult {
    Refreshed(u64),
    Failed { quota: bool },
    Skipped,
}

pub struct RefreshDriver {
    client: Arc<dyn SourceClient>,
    credentials: Arc<dyn CredentialProvider>,
    subscriptions: Arc<dyn SubscriptionStore>,
    items: Arc<dyn ItemStore>,
    settings: RefreshSettings,
}

impl RefreshDriver {
    pub fn new(
        client: Arc<dyn SourceClient>,
        credentials: Arc<dyn CredentialProvider>,
        subscriptions: Arc<dyn SubscriptionStore>,
        items: Arc<dyn ItemStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            client,
            credentials,
            subscriptions,
            items,
            settings,
        }
    }

    pub async fn refresh(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<RefreshOutcome, RefreshError> {
        let auth = UpstreamAuth::from_credential(self.credentials.credential(user).await);
        self.refresh_with_auth(user, source_id, &auth).await
    }

    pub async fn refresh_all(&self, user: &UserId) -> Result<BulkRefreshOutcome, RefreshError> {
        let source_ids = self.subscriptions.list_enabled_sources(user).await?;
        let auth = UpstreamAuth::from_credential(self.credentials.credential(user).await);
        let quota_hit = AtomicBool::new(false);

        let results: Vec<SourceResult> = stream::iter(source_ids.iter())
            .map(|source_id| {
                let auth = &auth;
                let quota_hit = &quota_hit;
                async move {
                    if quota_hit.load(Ordering::Acquire) {
                        return SourceResult::Skipped;
                    }
                    match self.refresh_with_auth(user, source_id, auth).await {
                        Ok(outcome) => SourceResult::Refreshed(outcome.new_items),
                        Err(error) => {
                            let quota = error.is_quota();
                            if quota {
                                quota_hit.store(true, Ordering::Release);
                            }
                            warn!(user = %user, source_id = %source_id, error = %error, "source refresh failed");
                            SourceResult::Failed { quota }
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut outcome = BulkRefreshOutcome::default();
        for result in results {
            match result {
                SourceResult::Refreshed(new_items) => {
                    outcome.refreshed += 1;
                    outcome.new_items += new_items;
                }
                SourceResult::Failed { quota } => {
                    outcome.failed += 1;
                    outcome.quota_exceeded |= quota;
                }
                SourceResult::Skipped => outcome.skipped += 1,
            }
        }
        info!(
            user = %user,
            refreshed = outcome.refreshed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            new_items = outcome.new_items,
            "refresh pass complete"
        );
        Ok(outcome)
    }

    async fn refresh_with_auth(
        &self,
        user: &UserId,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<RefreshOutcome, RefreshError> {
        let known = self.items.find_known_identities(user, source_id).await?;
        let mut handle = self.subscriptions.uploads_handle(source_id).await?;
        let mut stored_handle = handle.is_some();
        let mut cursor: Option<PageCursor> = None;
        let mut staged: Vec<Item> = Vec::new();
        let mut pages = 0_usize;

        'pages: while pages < self.settings.max_pages.max(1) {
            let result = self
                .client
                .list_page(PageRequest {
                    source_id,
                    page_size: self.settings.upstream_page_size,
                    cursor: cursor.as_ref(),
                    handle: handle.as_ref(),
                    auth,
                })
                .await;
            let page = match result {
                Ok(page) => page,
                // A stored handle can go stale; resolve it again once.
                Err(UpstreamError::NotFound(_)) if stored_handle && pages == 0 => {
                    warn!(user = %user, source_id, "stored uploads handle not found; resolving again");
                    stored_handle = false;
                    handle = None;
                    continue;
                }
                Err(UpstreamError::NotFound(detail)) => {
                    warn!(user = %user, source_id, detail = %detail, "source missing upstream; treating as empty");
                    if pages == 0 {
                        self.subscriptions.clear_uploads_handle(source_id).await?;
                    }
                    break;
                }
                Err(error) => return Err(error.into()),
            };
            pages += 1;

            if !stored_handle || handle.as_ref() != Some(&page.handle) {
                self.subscriptions
                    .save_uploads_handle(source_id, &page.handle)
                    .await?;
                stored_handle = true;
            }
            handle = Some(page.handle);

            for item in page.items {
                if known.contains(&item.id) {
                    break 'pages;
                }
                staged.push(item);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let new_items = self.items.insert_ignoring_duplicates(&staged).await?;
        self.subscriptions
            .mark_refreshed(user, source_id, Utc::now())
            .await?;
        info!(user = %user, source_id, pages, new_items, "source refreshed");

        Ok(RefreshOutcome {
            source_id: source_id.to_string(),
            new_items,
        })
    }
}
