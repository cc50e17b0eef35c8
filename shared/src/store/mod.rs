//! Complaint persistence.
//!
//! The store owns complaint records. Every mutation is applied under the
//! store's own exclusion and returns a fresh copy; callers never patch
//! their local copies.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::StoreError;
use crate::geo::{distance_meters, Coordinate};
use crate::model::{Category, CitizenId, Complaint, ComplaintId, DraftComplaint, NearbyMatch};

mod memory;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite;
mod timeout;

pub use memory::InMemoryComplaintStore;
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use sqlite::SqliteComplaintStore;
pub use timeout::TimeoutStore;

#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Open complaints within `radius_m` of `center`, nearest first, at
    /// most `limit` of them. Resolved and closed complaints are never
    /// returned.
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError>;

    async fn create(
        &self,
        draft: &DraftComplaint,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError>;

    /// Adds `citizen_id` to the supporters. Idempotent per citizen.
    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError>;

    /// Records an upvote. Idempotent per citizen.
    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError>;

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError>;
}

#[async_trait]
impl<S: ComplaintStore + ?Sized> ComplaintStore for Arc<S> {
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        (**self).query_nearby(center, radius_m, category, limit).await
    }

    async fn create(
        &self,
        draft: &DraftComplaint,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        (**self).create(draft, citizen_id).await
    }

    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        (**self).support(id, citizen_id).await
    }

    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        (**self).upvote(id, citizen_id).await
    }

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        (**self).get_by_id(id).await
    }
}

pub(crate) fn validate_radius(radius_m: f64) -> Result<(), StoreError> {
    if radius_m.is_finite() && radius_m >= 0.0 {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "radius must be a non-negative number of meters, got {radius_m}"
        )))
    }
}

/// Filters `complaints` down to open ones of `category` within `radius_m`
/// of `center`, then orders them by distance, age and id and keeps at most
/// `limit`.
pub fn rank_nearby<'a>(
    center: Coordinate,
    radius_m: f64,
    category: Option<Category>,
    limit: usize,
    complaints: impl IntoIterator<Item = &'a Complaint>,
) -> Vec<NearbyMatch> {
    let mut matches: Vec<NearbyMatch> = complaints
        .into_iter()
        .filter(|c| c.status.is_dedup_target())
        .filter(|c| category.map_or(true, |wanted| c.category == wanted))
        .filter_map(|c| {
            let distance_meters = distance_meters(center, c.coordinate());
            (distance_meters <= radius_m).then(|| NearbyMatch {
                complaint: c.clone(),
                distance_meters,
            })
        })
        .collect();

    matches.sort_by(compare_matches);
    matches.truncate(limit);
    matches
}

fn compare_matches(a: &NearbyMatch, b: &NearbyMatch) -> Ordering {
    a.distance_meters
        .total_cmp(&b.distance_meters)
        .then_with(|| a.complaint.created_at().cmp(&b.complaint.created_at()))
        .then_with(|| a.complaint.id.cmp(&b.complaint.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComplaintStatus, ImageRef, Location, UnixTimeMs};

    fn complaint_at(id: &str, coordinate: Coordinate, category: Category, created: u64) -> Complaint {
        let draft = DraftComplaint::new(
            category,
            Location::at(coordinate),
            ImageRef::Local(format!("file:///{id}.jpg")),
        );
        Complaint::from_draft(
            ComplaintId::new(id).unwrap(),
            &draft,
            CitizenId::new("owner").unwrap(),
            UnixTimeMs(created),
        )
        .unwrap()
    }

    fn center() -> Coordinate {
        Coordinate::new(12.9716, 77.5946).unwrap()
    }

    #[test]
    fn test_rank_orders_by_distance() {
        let c = center();
        let complaints = vec![
            complaint_at("far", c.offset_by_meters(200.0, 0.0), Category::Pothole, 1),
            complaint_at("near", c.offset_by_meters(10.0, 0.0), Category::Pothole, 2),
            complaint_at("mid", c.offset_by_meters(0.0, 50.0), Category::Pothole, 3),
        ];
        let ranked = rank_nearby(c, 300.0, Some(Category::Pothole), 50, &complaints);
        let ids: Vec<_> = ranked.iter().map(|m| m.complaint.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(ranked.windows(2).all(|w| w[0].distance_meters <= w[1].distance_meters));
    }

    #[test]
    fn test_rank_excludes_closed_and_other_categories() {
        let c = center();
        let mut resolved = complaint_at("resolved", c, Category::Pothole, 1);
        resolved.status = ComplaintStatus::Resolved;
        let mut closed = complaint_at("closed", c, Category::Pothole, 1);
        closed.status = ComplaintStatus::Closed;
        let garbage = complaint_at("garbage", c, Category::Garbage, 1);
        let open = complaint_at("open", c, Category::Pothole, 1);

        let all = vec![resolved, closed, garbage, open];
        let ranked = rank_nearby(c, 100.0, Some(Category::Pothole), 50, &all);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].complaint.id.as_str(), "open");

        let any_category = rank_nearby(c, 100.0, None, 50, &all);
        assert_eq!(any_category.len(), 2);
    }

    #[test]
    fn test_rank_tie_breaks_on_age_then_id() {
        let c = center();
        let p = c.offset_by_meters(30.0, 0.0);
        let complaints = vec![
            complaint_at("b", p, Category::Sewage, 5),
            complaint_at("newer", p, Category::Sewage, 9),
            complaint_at("a", p, Category::Sewage, 5),
        ];
        let ranked = rank_nearby(c, 100.0, None, 50, &complaints);
        let ids: Vec<_> = ranked.iter().map(|m| m.complaint.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "newer"]);
    }

    #[test]
    fn test_rank_respects_limit_and_radius() {
        let c = center();
        let complaints: Vec<_> = (0..10)
            .map(|i| {
                complaint_at(
                    &format!("c{i}"),
                    c.offset_by_meters(f64::from(i) * 20.0 + 5.0, 0.0),
                    Category::Drainage,
                    0,
                )
            })
            .collect();
        let ranked = rank_nearby(c, 100.0, None, 3, &complaints);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].complaint.id.as_str(), "c0");

        let within = rank_nearby(c, 100.0, None, 50, &complaints);
        assert!(within.iter().all(|m| m.distance_meters <= 100.0));
        assert_eq!(within.len(), 5);
    }

    #[test]
    fn test_validate_radius() {
        assert!(validate_radius(0.0).is_ok());
        assert!(validate_radius(100.0).is_ok());
        assert!(validate_radius(-1.0).is_err());
        assert!(validate_radius(f64::INFINITY).is_err());
    }
}
