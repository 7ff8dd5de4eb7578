//! Background sync.
//!
//! A sync event carries a tag; only the configured tag reaches the handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::Result;

/// A background sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub tag: String,
    /// Set when the platform will not retry this sync again.
    pub last_chance: bool,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            last_chance: false,
        }
    }
}

/// What happened to a dispatched sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The handler ran and succeeded.
    Completed,
    /// The tag did not match; nothing ran.
    Ignored,
}

/// Work performed when the sync tag fires.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, event: &SyncEvent) -> Result<()>;
}

/// Default handler: logs and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncHandler;

#[async_trait]
impl SyncHandler for NoopSyncHandler {
    async fn sync(&self, event: &SyncEvent) -> Result<()> {
        info!(tag = %event.tag, "Background sync triggered");
        Ok(())
    }
}

/// Routes sync events for one tag to a handler.
#[derive(Clone)]
pub struct SyncManager {
    tag: String,
    handler: Arc<dyn SyncHandler>,
}

impl SyncManager {
    pub fn new(tag: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            tag: tag.into(),
            handler,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Run the handler if `event` carries the managed tag.
    pub async fn dispatch(&self, event: &SyncEvent) -> Result<SyncOutcome> {
        if event.tag != self.tag {
            debug!(tag = %event.tag, expected = %self.tag, "Ignoring sync event");
            return Ok(SyncOutcome::Ignored);
        }
        self.handler.sync(event).await?;
        Ok(SyncOutcome::Completed)
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager").field("tag", &self.tag).finish()
    }
}
