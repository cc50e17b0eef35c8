use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{rank_nearby, validate_radius, ComplaintStore};
use crate::error::StoreError;
use crate::geo::Coordinate;
use crate::model::{
    Category, CitizenId, Complaint, ComplaintId, DraftComplaint, NearbyMatch, StatusUpdate,
    UnixTimeMs,
};

/// Process-local store. Each mutation holds the write lock for the whole
/// read-modify-write, so concurrent supports never lose each other.
pub struct InMemoryComplaintStore {
    complaints: RwLock<HashMap<ComplaintId, Complaint>>,
}

impl Default for InMemoryComplaintStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryComplaintStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            complaints: RwLock::new(HashMap::new()),
        }
    }

    /// Seeds an existing record, replacing any record with the same id.
    pub async fn insert(&self, complaint: Complaint) {
        self.complaints
            .write()
            .await
            .insert(complaint.id.clone(), complaint);
    }

    /// Moves a complaint along its lifecycle, as the admin dashboard would.
    #[instrument(skip(self, update), fields(complaint_id = %id))]
    pub async fn set_status(
        &self,
        id: &ComplaintId,
        update: impl Into<StatusUpdate> + Send,
    ) -> Result<Complaint, StoreError> {
        let update = update.into();
        let status = update.status;
        let mut complaints = self.complaints.write().await;
        let complaint = complaints
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        complaint.apply_status(update, UnixTimeMs::now())?;
        info!(status = status.as_str(), "Complaint status changed");
        Ok(complaint.clone())
    }

    /// Deletes a record outright (moderation removing spam, for example).
    pub async fn remove(&self, id: &ComplaintId) -> Option<Complaint> {
        self.complaints.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.complaints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.complaints.read().await.is_empty()
    }
}

#[async_trait]
impl ComplaintStore for InMemoryComplaintStore {
    #[instrument(skip(self))]
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        validate_radius(radius_m)?;
        let complaints = self.complaints.read().await;
        let matches = rank_nearby(center, radius_m, category, limit, complaints.values());
        debug!(found = matches.len(), "Nearby query complete");
        Ok(matches)
    }

    #[instrument(skip(self, draft), fields(category = draft.category.as_str()))]
    async fn create(
        &self,
        draft: &DraftComplaint,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let complaint = Complaint::from_draft(
            ComplaintId::generate(),
            draft,
            citizen_id.clone(),
            UnixTimeMs::now(),
        )?;
        self.complaints
            .write()
            .await
            .insert(complaint.id.clone(), complaint.clone());
        info!(complaint_id = %complaint.id, "Complaint created");
        Ok(complaint)
    }

    #[instrument(skip(self), fields(complaint_id = %id))]
    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let mut complaints = self.complaints.write().await;
        let complaint = complaints
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if complaint.add_supporter(citizen_id.clone(), UnixTimeMs::now()) {
            debug!(supporters = complaint.supporter_count(), "Supporter added");
        }
        Ok(complaint.clone())
    }

    #[instrument(skip(self), fields(complaint_id = %id))]
    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let mut complaints = self.complaints.write().await;
        let complaint = complaints
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if complaint.add_upvote(citizen_id.clone(), UnixTimeMs::now()) {
            debug!(upvotes = complaint.upvotes(), "Upvote recorded");
        }
        Ok(complaint.clone())
    }

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        self.complaints
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}
