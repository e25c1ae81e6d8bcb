pub mod client;
pub mod parser;
pub mod types;

use async_trait::async_trait;

use client::UpstreamError;
use types::{PageRequest, SourceDetails, SourcePage, UploadsHandle, UpstreamAuth};

#[derive(Debug, Clone, Default)]
pub struct UpstreamService;

impl UpstreamService {
    pub fn name(&self) -> &'static str {
        "upstream"
    }

    pub fn status(&self) -> &'static str {
        "ready"
    }
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn resolve_uploads_handle(
        &self,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<UploadsHandle, UpstreamError>;

    async fn list_page(&self, request: PageRequest<'_>) -> Result<SourcePage, UpstreamError>;

    async fn describe_source(
        &self,
        source_id: &str,
        auth: &UpstreamAuth,
    ) -> Result<SourceDetails, UpstreamError>;
}
