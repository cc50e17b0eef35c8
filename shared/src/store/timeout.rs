use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::ComplaintStore;
use crate::error::StoreError;
use crate::geo::Coordinate;
use crate::model::{Category, CitizenId, Complaint, ComplaintId, DraftComplaint, NearbyMatch};

/// Bounds every call on the wrapped store. A call that does not finish in
/// time is reported as [`StoreError::Unavailable`], the same as a network
/// failure.
///
/// Reads and `create` are dropped when they time out, so a timed-out create
/// never lands behind the offline queue's back. `support` and `upvote` run
/// as their own tasks and are left to finish after the caller stops
/// waiting; both are idempotent, so a retry cannot double count.
pub struct TimeoutStore<S> {
    inner: Arc<S>,
    timeout: Duration,
}

impl<S: ComplaintStore + 'static> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn timed_out(&self, operation: &'static str) -> StoreError {
        StoreError::Unavailable(format!(
            "{operation} timed out after {}ms",
            self.timeout.as_millis()
        ))
    }

    async fn bounded<T: Send>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Store call timed out");
                Err(self.timed_out(operation))
            }
        }
    }

    /// Like [`Self::bounded`], but the call keeps running once the caller
    /// gives up on it.
    async fn detached<F>(&self, operation: &'static str, call: F) -> Result<Complaint, StoreError>
    where
        F: Future<Output = Result<Complaint, StoreError>> + Send + 'static,
    {
        let task = tokio::spawn(call);
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("{operation} task failed: {e}"))),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out, left running"
                );
                Err(self.timed_out(operation))
            }
        }
    }
}

#[async_trait]
impl<S: ComplaintStore + 'static> ComplaintStore for TimeoutStore<S> {
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        self.bounded(
            "query_nearby",
            self.inner.query_nearby(center, radius_m, category, limit),
        )
        .await
    }

    async fn create(
        &self,
        draft: &DraftComplaint,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.bounded("create", self.inner.create(draft, citizen_id)).await
    }

    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let (inner, id, citizen_id) = (Arc::clone(&self.inner), id.clone(), citizen_id.clone());
        self.detached("support", async move { inner.support(&id, &citizen_id).await })
            .await
    }

    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let (inner, id, citizen_id) = (Arc::clone(&self.inner), id.clone(), citizen_id.clone());
        self.detached("upvote", async move { inner.upvote(&id, &citizen_id).await })
            .await
    }

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        self.bounded("get_by_id", self.inner.get_by_id(id)).await
    }
}
