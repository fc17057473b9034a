use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    ai::ClassificationService,
    config::PipelineConfig,
    infrastructure::auth::AuthProvider,
    page::PageSurface,
};

use super::{
    error::PipelineError,
    media::{self, PreparedImage},
    queue::{ProcessingQueue, QueueItem},
    registry::ElementRegistry,
    reporter::DetectionReporter,
};

/// Drains the image queue in fixed-size batches. The only caller of the
/// classifier for images; at most one request is in flight at a time.
pub struct BatchProcessor {
    queue: Arc<ProcessingQueue<QueueItem>>,
    registry: Arc<ElementRegistry>,
    page: Arc<dyn PageSurface>,
    classifier: Arc<dyn ClassificationService>,
    auth: Arc<dyn AuthProvider>,
    reporter: Arc<DetectionReporter>,
    batch_size: usize,
    batch_delay: Duration,
    max_image_side: u32,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<ProcessingQueue<QueueItem>>,
        registry: Arc<ElementRegistry>,
        page: Arc<dyn PageSurface>,
        classifier: Arc<dyn ClassificationService>,
        auth: Arc<dyn AuthProvider>,
        reporter: Arc<DetectionReporter>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            page,
            classifier,
            auth,
            reporter,
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay,
            max_image_side: config.max_image_side,
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(&cancel).await })
    }

    async fn run_loop(&self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = self.queue.take_batch(self.batch_size);
            if batch.is_empty() {
                tokio::select! {
                    _ = self.queue.notified() => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }

            self.handle_batch(batch, cancel).await;

            tokio::select! {
                _ = sleep(self.batch_delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
        tracing::debug!(target: "queue", "batch processor stopped");
    }

    async fn handle_batch(&self, batch: Vec<QueueItem>, cancel: &CancellationToken) {
        tracing::debug!(
            target: "queue",
            size = batch.len(),
            remaining = self.queue.len(),
            "processing batch"
        );

        let prepared = tokio::select! {
            prepared = join_all(batch.iter().map(|item| self.prepare(item))) => prepared,
            _ = cancel.cancelled() => {
                tracing::debug!(target: "queue", "cancelled while preparing batch");
                return;
            }
        };

        for (item, prepared) in batch.iter().zip(prepared) {
            let image = match prepared {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(err) => {
                    log_item_failure(item, &err);
                    continue;
                }
            };

            if let Err(err) = self.submit(&image, cancel).await {
                log_item_failure(item, &err);
            }
            if cancel.is_cancelled() {
                return;
            }
        }
    }

    /// `Ok(None)` means the item was already processed or its handle went
    /// stale; both are skipped without noise.
    async fn prepare(&self, item: &QueueItem) -> Result<Option<PreparedImage>, PipelineError> {
        if self.registry.claim(item.handle).is_none() {
            tracing::trace!(target: "queue", node = %item.node, "skipping stale or claimed item");
            return Ok(None);
        }
        let snapshot = self
            .page
            .inspect(item.node)
            .ok_or(PipelineError::StaleElement(item.node))?;
        let image = self.page.load_image(item.node).await?;
        let prepared = media::prepare(
            &image,
            self.max_image_side,
            snapshot.source().map(str::to_string),
        )?;
        Ok(Some(prepared))
    }

    async fn submit(
        &self,
        image: &PreparedImage,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if !self.auth.is_authenticated().await {
            return Err(PipelineError::AuthExpired);
        }

        let result = tokio::select! {
            result = self.classifier.classify(image) => result?,
            _ = cancel.cancelled() => return Ok(()),
        };
        let assessment = self
            .reporter
            .report_image(image.source_url.as_deref(), &result);
        tracing::debug!(
            target: "queue",
            level = %assessment.level,
            width = image.width,
            height = image.height,
            "image classified"
        );
        Ok(())
    }
}

fn log_item_failure(item: &QueueItem, err: &PipelineError) {
    match err {
        PipelineError::StaleElement(_) => {
            tracing::trace!(target: "queue", node = %item.node, "element detached before processing");
        }
        PipelineError::AuthExpired => {
            tracing::debug!(target: "queue", node = %item.node, "not authenticated; item dropped");
        }
        _ => {
            tracing::warn!(target: "queue", node = %item.node, error = %err, "failed to process item");
        }
    }
}
