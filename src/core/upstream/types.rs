use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn as_token(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadsHandle(String);

impl UploadsHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub source_id: String,
    pub source_title: String,
    pub published_at: DateTime<Utc>,
    pub duration: Option<String>,
    pub is_short_form: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    All,
    LongForm,
    ShortForm,
}

impl ItemKind {
    pub fn admits(self, item: &Item) -> bool {
        match self {
            Self::All => true,
            Self::LongForm => !item.is_short_form,
            Self::ShortForm => item.is_short_form,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Some(Self::All),
            "videos" | "long" | "long_form" | "long-form" => Some(Self::LongForm),
            "shorts" | "short" | "short_form" | "short-form" => Some(Self::ShortForm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    pub handle: UploadsHandle,
    pub items: Vec<Item>,
    pub next_cursor: Option<PageCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDetails {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub uploads_handle: UploadsHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpstreamAuth {
    #[default]
    ApiKey,
    Bearer(String),
}

impl UpstreamAuth {
    pub fn from_credential(credential: Option<String>) -> Self {
        match credential {
            Some(token) if !token.trim().is_empty() => Self::Bearer(token),
            _ => Self::ApiKey,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub source_id: &'a str,
    pub page_size: u32,
    pub cursor: Option<&'a PageCursor>,
    pub handle: Option<&'a UploadsHandle>,
    pub auth: &'a UpstreamAuth,
}
