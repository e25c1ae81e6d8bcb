use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};
use tracing::warn;

use super::models::{
    storage_timestamp, ContinueWatchingRecord, ItemRecord, SourceRecord, WatchLaterRecord,
};
use crate::core::ports::{ItemStore, SubscriptionStore, UserId, WatchStateStore};
use crate::core::upstream::types::{Item, ItemKind, SourceDetails, UploadsHandle};

// Nine binds per row.
const INSERT_CHUNK: usize = 200;

const ITEM_COLUMNS: &str = "i.id, i.source_id, i.source_title, i.title, i.description, \
     i.thumbnail_url, i.published_at, i.duration, i.is_short_form";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone)]
pub struct FeedRepository {
    pool: SqlitePool,
}

impl FeedRepository {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn kind_filter(kind: ItemKind) -> i64 {
    match kind {
        ItemKind::All => -1,
        ItemKind::LongForm => 0,
        ItemKind::ShortForm => 1,
    }
}

fn into_items(rows: Vec<ItemRecord>) -> Vec<Item> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            let item = row.into_item();
            if item.is_none() {
                warn!(item_id = %id, "skipping stored item with unreadable publish time");
            }
            item
        })
        .collect()
}

#[async_trait]
impl SubscriptionStore for FeedRepository {
    async fn list_enabled_sources(&self, user: &UserId) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT source_id
            FROM subscriptions
            WHERE user_id = ?1 AND is_enabled = 1
            ORDER BY source_id
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_all_sources(&self, user: &UserId) -> Result<Vec<SourceRecord>, StorageError> {
        let rows = sqlx::query_as::<_, SourceRecord>(
            r#"
            SELECT s.id, s.title, s.thumbnail_url, s.uploads_handle, sub.is_enabled, sub.last_refreshed_at
            FROM subscriptions sub
            JOIN sources s ON s.id = sub.source_id
            WHERE sub.user_id = ?1
            ORDER BY s.title COLLATE NOCASE, s.id
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_source(&self, details: &SourceDetails) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, title, thumbnail_url, uploads_handle)
            VALUES (?1, ?2, ?3, NULLIF(?4, ''))
            ON CONFLICT(id) DO UPDATE SET
              title = excluded.title,
              thumbnail_url = excluded.thumbnail_url,
              uploads_handle = COALESCE(excluded.uploads_handle, sources.uploads_handle),
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&details.id)
        .bind(&details.title)
        .bind(&details.thumbnail_url)
        .bind(details.uploads_handle.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subscribe(&self, user: &UserId, source_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, source_id)
            VALUES (?1, ?2)
            ON CONFLICT(user_id, source_id) DO NOTHING
            "#,
        )
        .bind(user.as_str())
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, user: &UserId, source_id: &str) -> Result<u64, StorageError> {
        let affected = sqlx::query("DELETE FROM subscriptions WHERE user_id = ?1 AND source_id = ?2")
            .bind(user.as_str())
            .bind(source_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn set_source_enabled(
        &self,
        user: &UserId,
        source_id: &str,
        enabled: bool,
    ) -> Result<u64, StorageError> {
        let affected = sqlx::query(
            "UPDATE subscriptions SET is_enabled = ?1 WHERE user_id = ?2 AND source_id = ?3",
        )
        .bind(i64::from(enabled))
        .bind(user.as_str())
        .bind(source_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn uploads_handle(&self, source_id: &str) -> Result<Option<UploadsHandle>, StorageError> {
        let handle = sqlx::query_scalar::<_, Option<String>>(
            "SELECT uploads_handle FROM sources WHERE id = ?1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten()
        .filter(|handle| !handle.trim().is_empty())
        .map(UploadsHandle::new);
        Ok(handle)
    }

    async fn save_uploads_handle(
        &self,
        source_id: &str,
        handle: &UploadsHandle,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, uploads_handle)
            VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
              uploads_handle = excluded.uploads_handle,
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(source_id)
        .bind(handle.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_uploads_handle(&self, source_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE sources SET uploads_handle = NULL, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
        )
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_refreshed(
        &self,
        user: &UserId,
        source_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE subscriptions SET last_refreshed_at = ?1 WHERE user_id = ?2 AND source_id = ?3",
        )
        .bind(storage_timestamp(&at))
        .bind(user.as_str())
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserId>, StorageError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM subscriptions ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserId::new).collect())
    }
}

#[async_trait]
impl ItemStore for FeedRepository {
    async fn find_known_identities(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<HashSet<String>, StorageError> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT i.id
            FROM items i
            JOIN subscriptions sub ON sub.source_id = i.source_id AND sub.user_id = ?1
            WHERE i.source_id = ?2
            "#,
        )
        .bind(user.as_str())
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_ignoring_duplicates(&self, items: &[Item]) -> Result<u64, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0_u64;
        let mut tx = self.pool.begin().await?;
        for chunk in items.chunks(INSERT_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "INSERT INTO items (id, source_id, source_title, title, description, thumbnail_url, published_at, duration, is_short_form) ",
            );
            query.push_values(chunk, |mut row, item| {
                row.push_bind(item.id.clone())
                    .push_bind(item.source_id.clone())
                    .push_bind(item.source_title.clone())
                    .push_bind(item.title.clone())
                    .push_bind(item.description.clone())
                    .push_bind(item.thumbnail_url.clone())
                    .push_bind(storage_timestamp(&item.published_at))
                    .push_bind(item.duration.clone())
                    .push_bind(i64::from(item.is_short_form));
            });
            query.push(" ON CONFLICT(id) DO NOTHING");
            inserted += query.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_most_recently_published(
        &self,
        user: &UserId,
        source_id: &str,
    ) -> Result<Option<Item>, StorageError> {
        let row = sqlx::query_as::<_, ItemRecord>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items i
            JOIN subscriptions sub ON sub.source_id = i.source_id AND sub.user_id = ?1
            WHERE i.source_id = ?2
            ORDER BY i.published_at DESC
            LIMIT 1
            "#
        ))
        .bind(user.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(ItemRecord::into_item))
    }

    async fn list_items(
        &self,
        user: &UserId,
        kind: ItemKind,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Item>, StorageError> {
        let rows = sqlx::query_as::<_, ItemRecord>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM items i
            JOIN subscriptions sub ON sub.source_id = i.source_id
            WHERE sub.user_id = ?1
              AND sub.is_enabled = 1
              AND (?2 < 0 OR i.is_short_form = ?2)
              AND NOT EXISTS (
                SELECT 1 FROM not_interested n WHERE n.user_id = ?1 AND n.item_id = i.id
              )
            ORDER BY i.published_at DESC, i.id
            LIMIT ?3 OFFSET ?4
            "#
        ))
        .bind(user.as_str())
        .bind(kind_filter(kind))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(into_items(rows))
    }
}

#[async_trait]
impl WatchStateStore for FeedRepository {
    async fn add_watch_later(&self, user: &UserId, item_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO watch_later (user_id, item_id)
            VALUES (?1, ?2)
            ON CONFLICT(user_id, item_id) DO NOTHING
            "#,
        )
        .bind(user.as_str())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_watch_later(&self, user: &UserId, item_id: &str) -> Result<u64, StorageError> {
        let affected = sqlx::query("DELETE FROM watch_later WHERE user_id = ?1 AND item_id = ?2")
            .bind(user.as_str())
            .bind(item_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn list_watch_later(&self, user: &UserId) -> Result<Vec<WatchLaterRecord>, StorageError> {
        let rows = sqlx::query_as::<_, WatchLaterRecord>(
            r#"
            SELECT item_id, added_at
            FROM watch_later
            WHERE user_id = ?1
            ORDER BY added_at DESC, rowid DESC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_progress(
        &self,
        user: &UserId,
        item_id: &str,
        position_secs: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO continue_watching (user_id, item_id, position_secs)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
              position_secs = excluded.position_secs,
              updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user.as_str())
        .bind(item_id)
        .bind(position_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_progress(&self, user: &UserId, item_id: &str) -> Result<u64, StorageError> {
        let affected =
            sqlx::query("DELETE FROM continue_watching WHERE user_id = ?1 AND item_id = ?2")
                .bind(user.as_str())
                .bind(item_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected)
    }

    async fn list_continue_watching(
        &self,
        user: &UserId,
    ) -> Result<Vec<ContinueWatchingRecord>, StorageError> {
        let rows = sqlx::query_as::<_, ContinueWatchingRecord>(
            r#"
            SELECT item_id, position_secs, updated_at
            FROM continue_watching
            WHERE user_id = ?1
            ORDER BY updated_at DESC, rowid DESC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_not_interested(&self, user: &UserId, item_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO not_interested (user_id, item_id)
            VALUES (?1, ?2)
            ON CONFLICT(user_id, item_id) DO NOTHING
            "#,
        )
        .bind(user.as_str())
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unmark_not_interested(
        &self,
        user: &UserId,
        item_id: &str,
    ) -> Result<u64, StorageError> {
        let affected = sqlx::query("DELETE FROM not_interested WHERE user_id = ?1 AND item_id = ?2")
            .bind(user.as_str())
            .bind(item_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    async fn not_interested_ids(&self, user: &UserId) -> Result<HashSet<String>, StorageError> {
        let rows =
            sqlx::query_scalar::<_, String>("SELECT item_id FROM not_interested WHERE user_id = ?1")
                .bind(user.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{item_at, short_at};
    use sqlx::Row;

    async fn repository() -> FeedRepository {
        FeedRepository::connect("sqlite::memory:")
            .await
            .expect("connect must succeed")
    }

    fn details(id: &str) -> SourceDetails {
        SourceDetails {
            id: id.to_string(),
            title: format!("Channel {id}"),
            thumbnail_url: None,
            uploads_handle: UploadsHandle::new(format!("UU{id}")),
        }
    }

    async fn subscribed(repository: &FeedRepository, user: &UserId, source_ids: &[&str]) {
        for source_id in source_ids {
            repository
                .upsert_source(&details(source_id))
                .await
                .expect("source upsert should succeed");
            repository
                .subscribe(user, source_id)
                .await
                .expect("subscribe should succeed");
        }
    }

    #[tokio::test]
    async fn migration_creates_required_tables() {
        let repository = repository().await;
        let rows = sqlx::query(
            r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table'
              AND name IN ('sources', 'subscriptions', 'items', 'watch_later', 'continue_watching', 'not_interested')
            ORDER BY name
            "#,
        )
        .fetch_all(&repository.pool)
        .await
        .expect("query must succeed");

        let table_names: Vec<String> = rows
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();
        assert_eq!(
            table_names,
            vec![
                "continue_watching".to_string(),
                "items".to_string(),
                "not_interested".to_string(),
                "sources".to_string(),
                "subscriptions".to_string(),
                "watch_later".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn subscriptions_track_enabled_state() {
        let repository = repository().await;
        let user = UserId::new("u1");
        subscribed(&repository, &user, &["UC_a", "UC_b"]).await;

        let disabled = repository
            .set_source_enabled(&user, "UC_b", false)
            .await
            .expect("disable should succeed");
        let enabled = repository
            .list_enabled_sources(&user)
            .await
            .expect("list should succeed");
        let all = repository
            .list_all_sources(&user)
            .await
            .expect("list should succeed");

        assert_eq!(disabled, 1);
        assert_eq!(enabled, vec!["UC_a".to_string()]);
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|source| source.is_enabled == 1).count(), 1);

        let removed = repository
            .unsubscribe(&user, "UC_a")
            .await
            .expect("unsubscribe should succeed");
        assert_eq!(removed, 1);
        assert!(repository
            .list_enabled_sources(&user)
            .await
            .expect("list should succeed")
            .is_empty());
        assert_eq!(
            repository.list_users().await.expect("users"),
            vec![user.clone()]
        );
    }

    #[tokio::test]
    async fn uploads_handle_round_trips_through_sources() {
        let repository = repository().await;
        assert_eq!(
            repository.uploads_handle("UC_new").await.expect("lookup"),
            None
        );

        repository
            .save_uploads_handle("UC_new", &UploadsHandle::new("UU_new"))
            .await
            .expect("save should create the source row");
        assert_eq!(
            repository.uploads_handle("UC_new").await.expect("lookup"),
            Some(UploadsHandle::new("UU_new"))
        );

        repository
            .clear_uploads_handle("UC_new")
            .await
            .expect("clear should succeed");
        assert_eq!(
            repository.uploads_handle("UC_new").await.expect("lookup"),
            None
        );
    }

    #[tokio::test]
    async fn insert_ignores_duplicates_and_counts_new_rows() {
        let repository = repository().await;
        let user = UserId::new("u1");
        subscribed(&repository, &user, &["UC_a"]).await;

        let first = repository
            .insert_ignoring_duplicates(&[item_at("v1", "UC_a", 1), item_at("v2", "UC_a", 2)])
            .await
            .expect("insert should succeed");
        let second = repository
            .insert_ignoring_duplicates(&[
                item_at("v2", "UC_a", 2),
                item_at("v3", "UC_a", 3),
                item_at("v3", "UC_a", 3),
            ])
            .await
            .expect("duplicate insert must not fail");
        let known = repository
            .find_known_identities(&user, "UC_a")
            .await
            .expect("known ids");

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        assert_eq!(known.len(), 3);
        let newest = repository
            .find_most_recently_published(&user, "UC_a")
            .await
            .expect("query")
            .expect("newest exists");
        assert_eq!(newest, item_at("v3", "UC_a", 3));
    }

    #[tokio::test]
    async fn large_batches_are_chunked() {
        let repository = repository().await;
        let items: Vec<Item> = (0..450)
            .map(|index| item_at(&format!("bulk-{index}"), "UC_a", index))
            .collect();

        let inserted = repository
            .insert_ignoring_duplicates(&items)
            .await
            .expect("bulk insert should succeed");
        assert_eq!(inserted, 450);
    }

    #[tokio::test]
    async fn concurrent_duplicate_inserts_do_not_fail() {
        let directory = tempfile::tempdir().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            directory.path().join("feed.db").to_string_lossy()
        );
        let left = FeedRepository::connect(&url).await.expect("left connect");
        let right = FeedRepository::connect(&url).await.expect("right connect");
        let items: Vec<Item> = (0..40)
            .map(|index| item_at(&format!("race-{index}"), "UC_a", index))
            .collect();

        let (a, b) = tokio::join!(
            left.insert_ignoring_duplicates(&items),
            right.insert_ignoring_duplicates(&items),
        );
        let total = a.expect("left insert") + b.expect("right insert");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&left.pool)
            .await
            .expect("count");

        assert_eq!(total, 40);
        assert_eq!(count, 40);
    }

    #[tokio::test]
    async fn list_items_filters_kind_subscription_and_suppression() {
        let repository = repository().await;
        let user = UserId::new("u1");
        subscribed(&repository, &user, &["UC_a", "UC_b"]).await;
        repository
            .insert_ignoring_duplicates(&[
                item_at("a-long", "UC_a", 5),
                short_at("a-short", "UC_a", 4),
                item_at("b-long", "UC_b", 3),
                item_at("x-long", "UC_x", 9),
            ])
            .await
            .expect("insert");
        repository
            .mark_not_interested(&user, "b-long")
            .await
            .expect("suppress");

        let all = repository
            .list_items(&user, ItemKind::All, 0, 10)
            .await
            .expect("all");
        let shorts = repository
            .list_items(&user, ItemKind::ShortForm, 0, 10)
            .await
            .expect("shorts");
        let second_page = repository
            .list_items(&user, ItemKind::All, 1, 1)
            .await
            .expect("offset");

        let ids = |items: &[Item]| items.iter().map(|item| item.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&all), vec!["a-long", "a-short"]);
        assert_eq!(ids(&shorts), vec!["a-short"]);
        assert_eq!(ids(&second_page), vec!["a-short"]);

        repository
            .set_source_enabled(&user, "UC_a", false)
            .await
            .expect("disable");
        assert!(repository
            .list_items(&user, ItemKind::All, 0, 10)
            .await
            .expect("after disable")
            .is_empty());
    }

    #[tokio::test]
    async fn watch_state_crud_flow() {
        let repository = repository().await;
        let user = UserId::new("u1");

        repository.add_watch_later(&user, "v1").await.expect("add");
        repository.add_watch_later(&user, "v1").await.expect("add twice");
        repository.add_watch_later(&user, "v2").await.expect("add");
        repository.set_progress(&user, "v3", 40).await.expect("progress");
        repository.set_progress(&user, "v3", 95).await.expect("progress update");
        repository.mark_not_interested(&user, "v4").await.expect("suppress");

        let later = repository.list_watch_later(&user).await.expect("list");
        let progress = repository.list_continue_watching(&user).await.expect("list");
        let hidden = repository.not_interested_ids(&user).await.expect("hidden");

        assert_eq!(later.len(), 2);
        assert_eq!(later[0].item_id, "v2");
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].position_secs, 95);
        assert!(hidden.contains("v4"));

        assert_eq!(repository.remove_watch_later(&user, "v1").await.expect("remove"), 1);
        assert_eq!(repository.clear_progress(&user, "v3").await.expect("clear"), 1);
        assert_eq!(repository.unmark_not_interested(&user, "v4").await.expect("unmark"), 1);
        assert!(repository
            .not_interested_ids(&user)
            .await
            .expect("hidden")
            .is_empty());
        assert!(repository
            .list_watch_later(&UserId::new("u2"))
            .await
            .expect("other user")
            .is_empty());
    }
}
