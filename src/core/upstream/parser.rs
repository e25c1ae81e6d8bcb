use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{Item, SourceDetails, UploadsHandle};
use crate::core::classifier::is_short_form;

#[derive(Debug, thiserror::Error)]
pub enum ResponseParseError {
    #[error("response payload is empty")]
    EmptyPayload,
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    id: String,
    snippet: Option<ChannelSnippet>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Clone, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    fn best_url(&self) -> Option<String> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|thumbnail| thumbnail.url.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<PlaylistItemResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemResource {
    snippet: Option<PlaylistItemSnippet>,
    content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    thumbnails: Option<Thumbnails>,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    channel_title: String,
    published_at: Option<String>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: Option<String>,
    video_published_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    content_details: Option<VideoContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub source_id: String,
    pub source_title: String,
    pub published_at: DateTime<Utc>,
}

impl UploadEntry {
    pub fn into_item(self, duration: Option<String>) -> Item {
        let duration = duration.filter(|value| !value.trim().is_empty());
        let is_short_form = duration.as_deref().is_some_and(is_short_form);
        Item {
            id: self.id,
            title: self.title,
            description: self.description,
            thumbnail_url: self.thumbnail_url,
            source_id: self.source_id,
            source_title: self.source_title,
            published_at: self.published_at,
            duration,
            is_short_form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadsPage {
    pub entries: Vec<UploadEntry>,
    pub next_page_token: Option<String>,
}

pub fn parse_channel(raw: &[u8]) -> Result<Option<SourceDetails>, ResponseParseError> {
    let response: ChannelListResponse = serde_json::from_slice(non_empty(raw)?)?;
    let details = response.items.into_iter().find_map(|channel| {
        let uploads = channel
            .content_details
            .and_then(|details| details.related_playlists)
            .and_then(|playlists| playlists.uploads)
            .filter(|uploads| !uploads.trim().is_empty())?;
        let (title, thumbnail_url) = match channel.snippet {
            Some(snippet) => (
                snippet.title,
                snippet.thumbnails.unwrap_or_default().best_url(),
            ),
            None => (String::new(), None),
        };
        Some(SourceDetails {
            id: channel.id,
            title,
            thumbnail_url,
            uploads_handle: UploadsHandle::new(uploads),
        })
    });
    Ok(details)
}

pub fn parse_uploads_page(raw: &[u8], source_id: &str) -> Result<UploadsPage, ResponseParseError> {
    let response: PlaylistItemListResponse = serde_json::from_slice(non_empty(raw)?)?;
    let entries = response
        .items
        .into_iter()
        .filter_map(|resource| upload_entry(resource, source_id))
        .collect();
    let next_page_token = response
        .next_page_token
        .filter(|token| !token.trim().is_empty());

    Ok(UploadsPage {
        entries,
        next_page_token,
    })
}

pub fn parse_durations(raw: &[u8]) -> Result<HashMap<String, String>, ResponseParseError> {
    let response: VideoListResponse = serde_json::from_slice(non_empty(raw)?)?;
    Ok(response
        .items
        .into_iter()
        .filter_map(|video| {
            let duration = video.content_details?.duration?;
            Some((video.id, duration))
        })
        .collect())
}

pub fn error_reasons(raw: &[u8]) -> Vec<String> {
    serde_json::from_slice::<ErrorEnvelope>(raw)
        .map(|envelope| {
            envelope
                .error
                .errors
                .into_iter()
                .filter_map(|detail| detail.reason)
                .collect()
        })
        .unwrap_or_default()
}

fn upload_entry(resource: PlaylistItemResource, source_id: &str) -> Option<UploadEntry> {
    let snippet = resource.snippet?;
    let content_details = resource.content_details;
    let id = content_details
        .as_ref()
        .and_then(|details| details.video_id.clone())
        .or_else(|| snippet.resource_id.and_then(|resource_id| resource_id.video_id))
        .filter(|id| !id.trim().is_empty())?;
    let published_at = content_details
        .and_then(|details| details.video_published_at)
        .or(snippet.published_at)
        .as_deref()
        .and_then(parse_timestamp)?;
    let source_id = if snippet.channel_id.trim().is_empty() {
        source_id.to_string()
    } else {
        snippet.channel_id
    };

    Some(UploadEntry {
        id,
        title: snippet.title,
        description: snippet.description,
        thumbnail_url: snippet.thumbnails.unwrap_or_default().best_url(),
        source_id,
        source_title: snippet.channel_title,
        published_at,
    })
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn non_empty(raw: &[u8]) -> Result<&[u8], ResponseParseError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ResponseParseError::EmptyPayload);
    }
    Ok(raw)
}
