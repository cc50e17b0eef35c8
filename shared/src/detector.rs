use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::model::{DraftComplaint, NearbyMatch};
use crate::store::ComplaintStore;
use crate::{DEFAULT_DEDUP_RADIUS_M, DEFAULT_MAX_CANDIDATES, MAX_CANDIDATES_LIMIT};

/// Finds existing open complaints that a draft probably duplicates: same
/// category, within a radius of the draft's location.
pub struct DuplicateDetector<S> {
    store: Arc<S>,
    radius_m: f64,
    max_candidates: usize,
}

impl<S> Clone for DuplicateDetector<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            radius_m: self.radius_m,
            max_candidates: self.max_candidates,
        }
    }
}

impl<S: ComplaintStore> DuplicateDetector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            radius_m: DEFAULT_DEDUP_RADIUS_M,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    pub fn with_radius(store: Arc<S>, radius_m: f64) -> Result<Self, StoreError> {
        validate_search_radius(radius_m)?;
        Ok(Self {
            radius_m,
            ..Self::new(store)
        })
    }

    /// How many candidates a query asks the store for, clamped to
    /// `1..=MAX_CANDIDATES_LIMIT`.
    #[must_use]
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.clamp(1, MAX_CANDIDATES_LIMIT);
        self
    }

    #[must_use]
    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    #[must_use]
    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Candidates within the configured radius, nearest first. An empty
    /// list means "no duplicates", not an error.
    pub async fn find_candidates(
        &self,
        draft: &DraftComplaint,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        self.find_candidates_within(draft, self.radius_m).await
    }

    #[instrument(skip(self, draft), fields(category = draft.category.as_str()))]
    pub async fn find_candidates_within(
        &self,
        draft: &DraftComplaint,
        radius_m: f64,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        validate_search_radius(radius_m)?;
        let location = draft.validate()?;
        let mut candidates = self
            .store
            .query_nearby(
                location.coordinate,
                radius_m,
                Some(draft.category),
                self.max_candidates,
            )
            .await?;
        // Stores may ignore the limit
        candidates.truncate(self.max_candidates);
        debug!(count = candidates.len(), "Duplicate candidates found");
        Ok(candidates)
    }
}

fn validate_search_radius(radius_m: f64) -> Result<(), StoreError> {
    if radius_m.is_finite() && radius_m > 0.0 {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "search radius must be greater than zero, got {radius_m}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::model::{Category, CitizenId, ImageRef, Location};
    use crate::store::InMemoryComplaintStore;

    fn center() -> Coordinate {
        Coordinate::new(17.3850, 78.4867).unwrap()
    }

    fn draft_at(coordinate: Coordinate, category: Category) -> DraftComplaint {
        DraftComplaint::new(
            category,
            Location::at(coordinate),
            ImageRef::Local("file:///p.jpg".into()),
        )
    }

    async fn seeded_store() -> Arc<InMemoryComplaintStore> {
        let store = Arc::new(InMemoryComplaintStore::new());
        let owner = CitizenId::new("owner").unwrap();
        let c = center();
        for (north, category) in [
            (40.0, Category::Pothole),
            (150.0, Category::Pothole),
            (20.0, Category::StreetLight),
        ] {
            store
                .create(&draft_at(c.offset_by_meters(north, 0.0), category), &owner)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_default_radius_is_100m() {
        let detector = DuplicateDetector::new(seeded_store().await);
        assert_eq!(detector.radius_m(), 100.0);

        let found = detector
            .find_candidates(&draft_at(center(), Category::Pothole))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].distance_meters - 40.0).abs() < 0.5);
        assert_eq!(found[0].complaint.category, Category::Pothole);
    }

    #[tokio::test]
    async fn test_wider_radius_finds_more() {
        let detector = DuplicateDetector::with_radius(seeded_store().await, 200.0).unwrap();
        let found = detector
            .find_candidates(&draft_at(center(), Category::Pothole))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_max_candidates_caps_results() {
        let detector = DuplicateDetector::with_radius(seeded_store().await, 200.0)
            .unwrap()
            .with_max_candidates(1);
        let found = detector
            .find_candidates(&draft_at(center(), Category::Pothole))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!((found[0].distance_meters - 40.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn test_max_candidates_above_default_reaches_store() {
        let store = Arc::new(InMemoryComplaintStore::new());
        let owner = CitizenId::new("owner").unwrap();
        for i in 0..60 {
            let spot = center().offset_by_meters(f64::from(i), 0.0);
            store
                .create(&draft_at(spot, Category::Garbage), &owner)
                .await
                .unwrap();
        }
        let detector = DuplicateDetector::new(Arc::clone(&store)).with_max_candidates(80);
        let found = detector
            .find_candidates(&draft_at(center(), Category::Garbage))
            .await
            .unwrap();
        assert_eq!(found.len(), 60);

        let clamped = DuplicateDetector::new(store).with_max_candidates(usize::MAX);
        assert_eq!(clamped.max_candidates(), MAX_CANDIDATES_LIMIT);
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let detector = DuplicateDetector::new(seeded_store().await);
        let found = detector
            .find_candidates(&draft_at(center(), Category::Encroachment))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_missing_location_fails_before_query() {
        let detector = DuplicateDetector::new(seeded_store().await);
        let mut draft = draft_at(center(), Category::Pothole);
        draft.location = None;
        let err = detector.find_candidates(&draft).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_radius() {
        let store = Arc::new(InMemoryComplaintStore::new());
        assert!(DuplicateDetector::with_radius(Arc::clone(&store), 0.0).is_err());
        assert!(DuplicateDetector::with_radius(store, f64::NAN).is_err());
    }
}
