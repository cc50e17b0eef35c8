use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::DedupConfig;
use crate::detector::DuplicateDetector;
use crate::error::{AppError, QueueError, StoreError, WorkflowError};
use crate::external::ImageStore;
use crate::model::{Complaint, ComplaintId, DraftComplaint};
use crate::queue::{DrainReport, OfflineQueue, QueueStorage};
use crate::session::SessionContext;
use crate::store::{ComplaintStore, TimeoutStore};
use crate::workflow::DedupWorkflow;

/// Everything a shell needs to run the reporting flow, built once from a
/// [`DedupConfig`]. Store calls go through a [`TimeoutStore`] so a stalled
/// backend looks the same as an unreachable one.
pub struct DedupService<S, Q>
where
    S: ComplaintStore + 'static,
    Q: QueueStorage,
{
    config: DedupConfig,
    session: Arc<SessionContext>,
    detector: DuplicateDetector<TimeoutStore<S>>,
    queue: Arc<OfflineQueue<Q>>,
    images: Option<Arc<dyn ImageStore>>,
}

impl<S, Q> DedupService<S, Q>
where
    S: ComplaintStore + 'static,
    Q: QueueStorage,
{
    #[instrument(skip_all)]
    pub async fn new(
        config: DedupConfig,
        session: Arc<SessionContext>,
        store: S,
        queue_storage: Arc<Q>,
    ) -> Result<Self, AppError> {
        config.validate()?;

        let store = Arc::new(TimeoutStore::new(store, config.store_timeout()));
        let detector = DuplicateDetector::with_radius(store, config.radius_m)?
            .with_max_candidates(config.max_candidates);
        let queue = Arc::new(OfflineQueue::open(queue_storage, config.queue_capacity).await?);

        info!(
            radius_m = config.radius_m,
            queue_capacity = config.queue_capacity,
            "Dedup service ready"
        );
        Ok(Self {
            config,
            session,
            detector,
            queue,
            images: None,
        })
    }

    #[must_use]
    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn queue(&self) -> &Arc<OfflineQueue<Q>> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<TimeoutStore<S>> {
        self.detector.store()
    }

    /// Opens a new flow for `draft` on behalf of the signed-in citizen.
    pub async fn begin(
        &self,
        draft: DraftComplaint,
    ) -> Result<DedupWorkflow<TimeoutStore<S>, Q>, WorkflowError> {
        let workflow = DedupWorkflow::start(
            &self.session,
            draft,
            self.detector.clone(),
            Arc::clone(&self.queue),
        )
        .await?;
        Ok(match &self.images {
            Some(images) => workflow.with_image_store(Arc::clone(images)),
            None => workflow,
        })
    }

    /// Replays queued submissions. Call when connectivity returns.
    pub async fn sync_offline(&self) -> Result<DrainReport, QueueError> {
        self.queue.drain(self.detector.store().as_ref()).await
    }

    /// Re-reads a complaint, e.g. to refresh a submitted report.
    pub async fn refresh(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        self.detector.store().get_by_id(id).await
    }
}
