use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::core::upstream::parser::parse_timestamp;
use crate::core::upstream::types::Item;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub uploads_handle: Option<String>,
    pub is_enabled: i64,
    pub last_refreshed_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ItemRecord {
    pub id: String,
    pub source_id: String,
    pub source_title: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub published_at: String,
    pub duration: Option<String>,
    pub is_short_form: i64,
}

impl ItemRecord {
    pub fn into_item(self) -> Option<Item> {
        let published_at = parse_timestamp(&self.published_at)?;
        Some(Item {
            id: self.id,
            title: self.title,
            description: self.description,
            thumbnail_url: self.thumbnail_url,
            source_id: self.source_id,
            source_title: self.source_title,
            published_at,
            duration: self.duration,
            is_short_form: self.is_short_form == 1,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WatchLaterRecord {
    pub item_id: String,
    pub added_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContinueWatchingRecord {
    pub item_id: String,
    pub position_secs: i64,
    pub updated_at: String,
}

pub fn storage_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
