#![allow(dead_code)]

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use shared::model::{
    Category, CitizenId, Complaint, ComplaintId, DraftComplaint, ImageRef, Location, NearbyMatch,
};
use shared::{ComplaintStore, Coordinate, InMemoryComplaintStore, Session, SessionContext, StoreError};

/// In-memory store that can be switched offline, told to reject particular
/// drafts, or made to hold `create` calls until released. Counts every call.
pub struct ScriptedStore {
    inner: InMemoryComplaintStore,
    offline: AtomicBool,
    poisoned: Mutex<HashSet<String>>,
    create_gate: Option<Arc<Semaphore>>,
    pub queries: AtomicUsize,
    pub creates: AtomicUsize,
    pub supports: AtomicUsize,
    pub upvotes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryComplaintStore::new(),
            offline: AtomicBool::new(false),
            poisoned: Mutex::new(HashSet::new()),
            create_gate: None,
            queries: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            supports: AtomicUsize::new(0),
            upvotes: AtomicUsize::new(0),
        }
    }

    /// `create` waits for a permit from the returned semaphore.
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Self {
            create_gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (store, gate)
    }

    pub fn inner(&self) -> &InMemoryComplaintStore {
        &self.inner
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Creates whose description equals `description` fail as unavailable.
    pub fn poison(&self, description: &str) {
        self.poisoned.lock().unwrap().insert(description.to_string());
    }

    pub fn cure(&self, description: &str) {
        self.poisoned.lock().unwrap().remove(description);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("network unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ComplaintStore for ScriptedStore {
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.query_nearby(center, radius_m, category, limit).await
    }

    async fn create(
        &self,
        draft: &DraftComplaint,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.create_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.check_online()?;
        if let Some(description) = &draft.description {
            if self.poisoned.lock().unwrap().contains(description) {
                return Err(StoreError::Unavailable("upstream rejected the request".into()));
            }
        }
        self.inner.create(draft, citizen_id).await
    }

    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.supports.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.support(id, citizen_id).await
    }

    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.upvotes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.inner.upvote(id, citizen_id).await
    }

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        self.check_online()?;
        self.inner.get_by_id(id).await
    }
}

pub fn citizen(id: &str) -> CitizenId {
    CitizenId::new(id).unwrap()
}

/// MG Road, Bengaluru.
pub fn mg_road() -> Coordinate {
    Coordinate::new(12.9756, 77.6050).unwrap()
}

pub fn draft(category: Category, at: Coordinate) -> DraftComplaint {
    DraftComplaint::new(
        category,
        Location::at(at),
        ImageRef::Local("file:///dcim/report.jpg".into()),
    )
}

pub fn described(category: Category, at: Coordinate, description: &str) -> DraftComplaint {
    draft(category, at).with_description(description)
}

pub async fn signed_in(citizen_id: &str) -> Arc<SessionContext> {
    let session = Arc::new(SessionContext::new());
    session
        .login(Session::new(citizen(citizen_id), SecretString::new("token".into())).unwrap())
        .await;
    session
}
