//! Scripted upstream used by aggregator and refresh tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::core::upstream::client::UpstreamError;
use crate::core::upstream::types::{
    Item, PageCursor, PageRequest, SourceDetails, SourcePage, UploadsHandle, UpstreamAuth,
};
use crate::core::upstream::SourceClient;

/// Item published `minutes` after a fixed epoch; larger is newer.
pub fn item_at(id: &str, source_id: &str, minutes: i64) -> Item {
    let base = Utc
        .with_ymd_and_hms(2026, 3, 1, 0, 0, 0)
        .single()
        .expect("valid base time");
    Item {
        id: id.to_string(),
        title: format!("Video {id}"),
        description: String::new(),
        thumbnail_url: Some(format!("https://i.example.com/{id}.jpg")),
        source_id: source_id.to_string(),
        source_title: format!("Channel {source_id}"),
        published_at: base + Duration::minutes(minutes),
        duration: Some("PT10M".to_string()),
        is_short_form: false,
    }
}

pub fn short_at(id: &str, source_id: &str, minutes: i64) -> Item {
    Item {
        duration: Some("PT45S".to_string()),
        is_short_form: true,
        ..item_at(id, source_id, minutes)
    }
}

#[derive(Debug, Clone)]
pub enum Script {
    /// Fixed pages; the cursor after the last page is absent.
    Pages(Vec<Vec<Item>>),
    /// Every call yields one fresh item and a further cursor.
    Endless,
    /// Every call yields the same items and a further cursor.
    Repeating(Vec<Item>),
    Fail(UpstreamError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub source_id: String,
    pub cursor: Option<PageCursor>,
    pub had_handle: bool,
    pub auth: UpstreamAuth,
}

#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
    resolves: Mutex<usize>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source_id: &str, script: Script) -> Self {
        self.set(source_id, script);
        self
    }

    pub fn set(&self, source_id: &str, script: Script) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(source_id.to_string(), script);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_for(&self, source_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.source_id == source_id)
            .count()
    }

    pub fn resolves(&self) -> usize {
        *self.resolves.lock().expect("resolves lock")
    }

    fn script(&self, source_id: &str) -> Result<Script, UpstreamError> {
        self.scripts
            .lock()
            .expect("scripts lock")
            .get(source_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(source_id.to_string()))
    }
}

fn handle_for(source_id: &str) -> UploadsHandle {
    UploadsHandle::new(format!("UU{}", source_id.trim_start_matches("UC")))
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn resolve_uploads_handle(
        &self,
        source_id: &str,
        _auth: &UpstreamAuth,
    ) -> Result<UploadsHandle, UpstreamError> {
        *self.resolves.lock().expect("resolves lock") += 1;
        match self.script(source_id)? {
            Script::Fail(error) => Err(error),
            _ => Ok(handle_for(source_id)),
        }
    }

    async fn list_page(&self, request: PageRequest<'_>) -> Result<SourcePage, UpstreamError> {
        let index = request
            .cursor
            .map(|cursor| cursor.as_token().parse::<usize>().expect("numeric test cursor"))
            .unwrap_or(0);
        self.calls.lock().expect("calls lock").push(RecordedCall {
            source_id: request.source_id.to_string(),
            cursor: request.cursor.cloned(),
            had_handle: request.handle.is_some(),
            auth: request.auth.clone(),
        });
        tokio::task::yield_now().await;

        let script = self.script(request.source_id)?;
        let handle = match request.handle {
            Some(handle) if *handle != handle_for(request.source_id) => {
                return Err(UpstreamError::NotFound(handle.to_string()));
            }
            Some(handle) => handle.clone(),
            None => self
                .resolve_uploads_handle(request.source_id, request.auth)
                .await?,
        };
        let next = |has_more: bool| has_more.then(|| PageCursor::new((index + 1).to_string()));

        match script {
            Script::Pages(pages) => Ok(SourcePage {
                handle,
                items: pages.get(index).cloned().unwrap_or_default(),
                next_cursor: next(index + 1 < pages.len()),
            }),
            Script::Endless => Ok(SourcePage {
                handle,
                items: vec![item_at(
                    &format!("{}-{index}", request.source_id),
                    request.source_id,
                    10_000 - index as i64,
                )],
                next_cursor: next(true),
            }),
            Script::Repeating(items) => Ok(SourcePage {
                handle,
                items,
                next_cursor: next(true),
            }),
            Script::Fail(error) => Err(error),
        }
    }

    async fn describe_source(
        &self,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<SourceDetails, UpstreamError> {
        let uploads_handle = self.resolve_uploads_handle(source_id, auth).await?;
        Ok(SourceDetails {
            id: source_id.to_string(),
            title: format!("Channel {source_id}"),
            thumbnail_url: None,
            uploads_handle,
        })
    }
}
