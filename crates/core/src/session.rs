use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::debug;

use crate::error::ProviderError;
use crate::tags::TagSet;
use crate::ResourceRef;

/// Calls a resource type needs from its cloud service.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Enumerate the detail records of one resource type.
    async fn list(&self, kind: &str) -> Result<Vec<Json>, ProviderError>;
    async fn get_tags(&self, target: &ResourceRef) -> Result<TagSet, ProviderError>;
    /// Replace the full tag set of a resource.
    async fn put_tags(&self, target: &ResourceRef, tags: &TagSet) -> Result<(), ProviderError>;
    async fn delete(&self, target: &ResourceRef) -> Result<(), ProviderError>;
    async fn update(&self, target: &ResourceRef, change: &Json) -> Result<(), ProviderError>;
}

/// Hands out clients per service. Every `acquire` is paired with exactly one
/// `release`, which `Session` guarantees.
pub trait SessionFactory: Send + Sync {
    fn acquire(&self, service: &str) -> Result<Arc<dyn ProviderClient>, ProviderError>;
    fn release(&self, _service: &str) {}
}

/// A client held for the duration of one batch. Dropping it releases the client.
pub struct Session<'f> {
    factory: &'f dyn SessionFactory,
    service: String,
    client: Arc<dyn ProviderClient>,
}

impl<'f> Session<'f> {
    pub fn open(factory: &'f dyn SessionFactory, service: &str) -> Result<Self, ProviderError> {
        let client = factory.acquire(service)?;
        debug!(service, "session opened");
        Ok(Self { factory, service: service.to_string(), client })
    }

    pub fn service(&self) -> &str { &self.service }
    pub fn client(&self) -> &dyn ProviderClient { self.client.as_ref() }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.factory.release(&self.service);
        debug!(service = %self.service, "session released");
    }
}
