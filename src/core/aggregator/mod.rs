pub mod merge;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::cache::{FetchState, FetchStateCache};
use crate::core::ports::{CredentialProvider, UserId};
use crate::core::upstream::client::UpstreamError;
use crate::core::upstream::types::{Item, ItemKind, PageRequest, UpstreamAuth};
use crate::core::upstream::SourceClient;
use merge::{merge_by_identity, sort_newest_first};

pub const DEFAULT_MAX_FILL_ROUNDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("invalid feed request: {0}")]
    InvalidInput(String),
    #[error("feed unavailable (quota exceeded: {quota_exceeded})")]
    Unavailable { quota_exceeded: bool },
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub page_size: usize,
    pub upstream_page_size: u32,
    pub max_fill_rounds: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            page_size: 24,
            upstream_page_size: 50,
            max_fill_rounds: DEFAULT_MAX_FILL_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregatorService;

impl AggregatorService {
    pub fn name(&self) -> &'static str {
        "aggregator"
    }

    pub fn status(&self) -> &'static str {
        "ready"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedQuery<'a> {
    pub user: &'a UserId,
    pub source_ids: &'a [String],
    // 1-based.
    pub page: usize,
    pub kind: ItemKind,
    pub hidden: Option<&'a HashSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub items: Vec<Item>,
    pub has_more: bool,
    // Lower bound; grows as more pages are fetched.
    pub total: usize,
    pub quota_limited: bool,
}

impl FeedPage {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            total: 0,
            quota_limited: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RoundOutcome {
    calls: usize,
    failures: usize,
    new_items: usize,
    quota_exceeded: bool,
}

pub struct FeedAggregator {
    client: Arc<dyn SourceClient>,
    credentials: Arc<dyn CredentialProvider>,
    cache: Arc<FetchStateCache>,
    settings: AggregatorSettings,
}

impl FeedAggregator {
    pub fn new(
        client: Arc<dyn SourceClient>,
        credentials: Arc<dyn CredentialProvider>,
        cache: Arc<FetchStateCache>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            client,
            credentials,
            cache,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<FetchStateCache> {
        &self.cache
    }

    pub async fn get_page(&self, query: FeedQuery<'_>) -> Result<FeedPage, FeedError> {
        let page_size = self.settings.page_size;
        if query.page == 0 {
            return Err(FeedError::InvalidInput("page numbers start at 1".to_string()));
        }
        if page_size == 0 {
            return Err(FeedError::InvalidInput("page size must be positive".to_string()));
        }
        let page_end = query
            .page
            .checked_mul(page_size)
            .ok_or_else(|| FeedError::InvalidInput(format!("page {} is out of range", query.page)))?;
        if query.source_ids.is_empty() {
            return Ok(FeedPage::empty());
        }

        let visible = |item: &Item| {
            query.kind.admits(item)
                && query
                    .hidden
                    .map_or(true, |hidden| !hidden.contains(&item.id))
        };

        let lock = self.cache.user_lock(query.user);
        let _guard = lock.lock().await;

        let mut state = match self.cache.get(query.user) {
            Some(state) if state.covers(query.source_ids) => state,
            _ => self.cache.fresh(query.user, query.source_ids),
        };
        let auth = UpstreamAuth::from_credential(self.credentials.credential(query.user).await);

        let mut totals = RoundOutcome::default();
        for round in 1..=self.settings.max_fill_rounds {
            let buffered = state.items.iter().filter(|item| visible(*item)).count();
            let wants_more = state.items.is_empty() || buffered < page_end;
            if !wants_more || !state.has_open_sources() {
                break;
            }

            let outcome = self.fill_round(&mut state, &auth).await;
            debug!(
                user = %query.user,
                round,
                calls = outcome.calls,
                failures = outcome.failures,
                new_items = outcome.new_items,
                buffered = state.items.len(),
                "fill round complete"
            );
            totals.calls += outcome.calls;
            totals.failures += outcome.failures;
            totals.quota_exceeded |= outcome.quota_exceeded;

            if !self.cache.put(query.user, state.clone()) {
                debug!(user = %query.user, "cache entry invalidated during fill");
            }
            if outcome.new_items == 0 || outcome.quota_exceeded {
                break;
            }
        }

        if state.items.is_empty() && totals.calls > 0 && totals.failures == totals.calls {
            return Err(FeedError::Unavailable {
                quota_exceeded: totals.quota_exceeded,
            });
        }

        let filtered: Vec<&Item> = state.items.iter().filter(|item| visible(*item)).collect();
        let items = filtered
            .iter()
            .skip(page_end - page_size)
            .take(page_size)
            .map(|item| (*item).clone())
            .collect();

        Ok(FeedPage {
            items,
            has_more: page_end < filtered.len() || state.has_open_sources(),
            total: filtered.len(),
            quota_limited: totals.quota_exceeded,
        })
    }

    async fn fill_round(&self, state: &mut FetchState, auth: &UpstreamAuth) -> RoundOutcome {
        let open: Vec<_> = state
            .sources
            .iter()
            .filter(|(_, cursor)| !cursor.exhausted)
            .map(|(source_id, cursor)| (source_id.clone(), cursor.clone()))
            .collect();

        let fetches = open.iter().map(|(source_id, cursor)| async move {
            let result = self
                .client
                .list_page(PageRequest {
                    source_id,
                    page_size: self.settings.upstream_page_size,
                    cursor: cursor.next.as_ref(),
                    handle: cursor.handle.as_ref(),
                    auth,
                })
                .await;
            (source_id.as_str(), result)
        });
        let results = join_all(fetches).await;

        let mut outcome = RoundOutcome::default();
        let mut fetched = Vec::new();
        for (source_id, result) in results {
            outcome.calls += 1;
            let Some(cursor) = state.sources.get_mut(source_id) else {
                continue;
            };
            match result {
                Ok(page) => {
                    cursor.handle = Some(page.handle);
                    cursor.exhausted = page.next_cursor.is_none();
                    cursor.next = page.next_cursor;
                    fetched.extend(page.items);
                }
                Err(UpstreamError::NotFound(detail)) => {
                    warn!(source_id, detail = %detail, "source not found upstream; treating as exhausted");
                    cursor.exhausted = true;
                }
                Err(error) => {
                    outcome.failures += 1;
                    outcome.quota_exceeded |= error.is_quota();
                    warn!(source_id, error = %error, "source fetch failed");
                }
            }
        }

        outcome.new_items = merge_by_identity(&mut state.items, fetched, |item| item.id.clone());
        sort_newest_first(&mut state.items);
        outcome
    }
}
