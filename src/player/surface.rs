use async_trait::async_trait;
use tokio::time::Duration;

use crate::dom::Document;

/// Isolated container the player mounts a replay into.
#[async_trait]
pub trait MountSurface: Send {
    /// Resolves once the surface's document exists and can take content.
    async fn prepare(&mut self) -> Result<(), String>;

    fn document(&self) -> &Document;

    fn document_mut(&mut self) -> &mut Document;
}

/// In-process surface backed by a plain [`Document`].
#[derive(Debug)]
pub struct MemorySurface {
    doc: Document,
    ready_after: Option<Duration>,
}

impl MemorySurface {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            doc: Document::new(location),
            ready_after: None,
        }
    }

    /// Surface whose document takes `delay` to become ready, like a frame loading.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.ready_after = Some(delay);
        self
    }

    /// Mount into an existing document.
    pub fn from_document(doc: Document) -> Self {
        Self { doc, ready_after: None }
    }

    pub fn into_document(self) -> Document {
        self.doc
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new("about:blank")
    }
}

#[async_trait]
impl MountSurface for MemorySurface {
    async fn prepare(&mut self) -> Result<(), String> {
        if let Some(delay) = self.ready_after {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn document(&self) -> &Document {
        &self.doc
    }

    fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }
}
