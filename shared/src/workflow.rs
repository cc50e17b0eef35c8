//! The citizen-facing deduplication flow, one instance per draft.
//!
//! ```text
//! Drafting -> CheckingDuplicates -> NoDuplicates -> ConfirmingNew -> Creating -> Submitted
//!                                \-> DuplicatesFound -> Supporting -> Submitted
//!                                                   \-> ConfirmingNew
//! ```
//!
//! Any step may land in `Failed`, which waits for an explicit `retry`.
//! Store calls are the only suspension points. Mutations are spawned onto
//! the runtime, so once issued they finish even if the caller stops
//! waiting. The flow keeps the task handle while in `Creating` or
//! `Supporting`; calling the same operation again waits on that task
//! instead of issuing a second mutation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::detector::DuplicateDetector;
use crate::error::{AppError, ErrorKind, QueueError, StoreError, WorkflowError};
use crate::external::{resolve_image, ImageStore};
use crate::model::{CitizenId, Complaint, ComplaintId, DraftComplaint, NearbyMatch, UnixTimeMs};
use crate::queue::{OfflineQueue, QueueEntryId, QueueStorage, QueuedSubmission};
use crate::session::SessionContext;
use crate::store::ComplaintStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Joined an existing complaint.
    Support,
    New,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub mode: SubmissionMode,
    /// The store's copy. `None` while the submission waits in the offline
    /// queue.
    pub complaint: Option<Complaint>,
    pub queued_as: Option<QueueEntryId>,
}

impl Submission {
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.queued_as.is_some()
    }
}

/// Where `retry` resumes after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryTarget {
    Drafting,
    DuplicatesFound(Vec<NearbyMatch>),
    ConfirmingNew,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Drafting,
    CheckingDuplicates,
    NoDuplicates,
    DuplicatesFound { candidates: Vec<NearbyMatch> },
    Supporting { complaint_id: ComplaintId },
    ConfirmingNew,
    /// `create` issued, outcome not yet seen.
    Creating,
    Submitted(Submission),
    Failed {
        kind: ErrorKind,
        message: String,
        retry: RetryTarget,
    },
    Abandoned,
}

impl WorkflowState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::CheckingDuplicates => "checking_duplicates",
            Self::NoDuplicates => "no_duplicates",
            Self::DuplicatesFound { .. } => "duplicates_found",
            Self::Supporting { .. } => "supporting",
            Self::ConfirmingNew => "confirming_new",
            Self::Creating => "creating",
            Self::Submitted(_) => "submitted",
            Self::Failed { .. } => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted(_) | Self::Abandoned)
    }

    /// True while a store call is outstanding.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::CheckingDuplicates | Self::Supporting { .. } | Self::Creating
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: &'static str,
    pub to: &'static str,
    pub at: UnixTimeMs,
}

pub struct DedupWorkflow<S, Q>
where
    S: ComplaintStore + 'static,
    Q: QueueStorage,
{
    citizen_id: CitizenId,
    draft: DraftComplaint,
    detector: DuplicateDetector<S>,
    queue: Arc<OfflineQueue<Q>>,
    images: Option<Arc<dyn ImageStore>>,
    state: WorkflowState,
    transitions: Vec<Transition>,
    pending: Option<JoinHandle<Result<Complaint, StoreError>>>,
    /// Candidates that were on offer when `Supporting` began.
    offered: Vec<NearbyMatch>,
}

impl<S, Q> DedupWorkflow<S, Q>
where
    S: ComplaintStore + 'static,
    Q: QueueStorage,
{
    /// Starts a flow for the signed-in citizen. Fails if nobody is signed in.
    pub async fn start(
        session: &SessionContext,
        draft: DraftComplaint,
        detector: DuplicateDetector<S>,
        queue: Arc<OfflineQueue<Q>>,
    ) -> Result<Self, WorkflowError> {
        let citizen_id = session.require_citizen().await?;
        Ok(Self::for_citizen(citizen_id, draft, detector, queue))
    }

    pub fn for_citizen(
        citizen_id: CitizenId,
        draft: DraftComplaint,
        detector: DuplicateDetector<S>,
        queue: Arc<OfflineQueue<Q>>,
    ) -> Self {
        Self {
            citizen_id,
            draft,
            detector,
            queue,
            images: None,
            state: WorkflowState::Drafting,
            transitions: Vec::new(),
            pending: None,
            offered: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn draft(&self) -> &DraftComplaint {
        &self.draft
    }

    pub fn citizen_id(&self) -> &CitizenId {
        &self.citizen_id
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Candidates currently on offer, if any.
    pub fn candidates(&self) -> &[NearbyMatch] {
        match &self.state {
            WorkflowState::DuplicatesFound { candidates } => candidates,
            _ => &[],
        }
    }

    /// Changes the draft. Only possible before duplicates are checked.
    pub fn edit_draft(
        &mut self,
        edit: impl FnOnce(&mut DraftComplaint),
    ) -> Result<(), WorkflowError> {
        self.expect_state("edit the draft", |s| {
            matches!(s, WorkflowState::Drafting)
        })?;
        edit(&mut self.draft);
        Ok(())
    }

    /// Looks for open complaints the draft probably duplicates.
    ///
    /// A draft that fails validation stays in `Drafting`. With no
    /// candidates the flow moves straight on to `ConfirmingNew`.
    #[instrument(skip(self), fields(citizen_id = %self.citizen_id))]
    pub async fn check_duplicates(&mut self) -> Result<&WorkflowState, WorkflowError> {
        self.expect_state("check for duplicates", |s| {
            matches!(
                s,
                WorkflowState::Drafting | WorkflowState::CheckingDuplicates
            )
        })?;

        if let Err(e) = self.draft.validate() {
            return Err(StoreError::from(e).into());
        }

        self.transition(WorkflowState::CheckingDuplicates);

        match self.detector.find_candidates(&self.draft).await {
            Ok(candidates) if candidates.is_empty() => {
                self.transition(WorkflowState::NoDuplicates);
                self.transition(WorkflowState::ConfirmingNew);
            }
            Ok(candidates) => {
                info!(count = candidates.len(), "Possible duplicates found");
                self.transition(WorkflowState::DuplicatesFound { candidates });
            }
            Err(e @ StoreError::Validation(_)) => {
                self.transition(WorkflowState::Drafting);
                return Err(e.into());
            }
            Err(e) => {
                self.fail(AppError::from(e.clone()), RetryTarget::Drafting);
                return Err(e.into());
            }
        }

        Ok(&self.state)
    }

    /// Supports one of the offered candidates instead of filing a new
    /// complaint. The citizen is added as a supporter and as an upvoter.
    ///
    /// Called again with the same id while `Supporting`, it waits on the
    /// support already issued.
    #[instrument(skip(self), fields(citizen_id = %self.citizen_id, complaint_id = %id))]
    pub async fn select_candidate(
        &mut self,
        id: &ComplaintId,
    ) -> Result<&WorkflowState, WorkflowError> {
        let offered = match &self.state {
            WorkflowState::DuplicatesFound { candidates } => {
                if !candidates.iter().any(|m| &m.complaint.id == id) {
                    return Err(WorkflowError::UnknownCandidate(id.clone()));
                }
                Some(candidates.clone())
            }
            WorkflowState::Supporting { complaint_id }
                if complaint_id == id && self.pending.is_some() =>
            {
                None
            }
            other => {
                return Err(WorkflowError::InvalidTransition {
                    state: other.name(),
                    action: "support a complaint",
                })
            }
        };

        if let Some(candidates) = offered {
            self.offered = candidates;
            let store = Arc::clone(self.detector.store());
            let complaint_id = id.clone();
            let citizen_id = self.citizen_id.clone();
            self.pending = Some(tokio::spawn(async move {
                store.support(&complaint_id, &citizen_id).await?;
                store.upvote(&complaint_id, &citizen_id).await
            }));
            self.transition(WorkflowState::Supporting {
                complaint_id: id.clone(),
            });
        } else {
            info!("Resuming support already in flight");
        }

        let outcome = self.await_pending().await;
        let candidates = std::mem::take(&mut self.offered);

        match outcome {
            Ok(Ok(complaint)) => {
                info!(
                    supporters = complaint.supporter_count(),
                    upvotes = complaint.upvotes(),
                    "Supported existing complaint"
                );
                self.transition(WorkflowState::Submitted(Submission {
                    mode: SubmissionMode::Support,
                    complaint: Some(complaint),
                    queued_as: None,
                }));
                Ok(&self.state)
            }
            Ok(Err(StoreError::NotFound(_))) => {
                warn!("Selected complaint is no longer available");
                let remaining: Vec<NearbyMatch> = candidates
                    .into_iter()
                    .filter(|m| &m.complaint.id != id)
                    .collect();
                if remaining.is_empty() {
                    self.transition(WorkflowState::ConfirmingNew);
                } else {
                    self.transition(WorkflowState::DuplicatesFound {
                        candidates: remaining,
                    });
                }
                Err(WorkflowError::CandidateUnavailable(id.clone()))
            }
            Ok(Err(e)) => {
                self.fail(
                    AppError::from(e.clone()),
                    RetryTarget::DuplicatesFound(candidates),
                );
                Err(e.into())
            }
            Err(e) => {
                self.fail(
                    AppError::new(ErrorKind::Internal, e.to_string()),
                    RetryTarget::DuplicatesFound(candidates),
                );
                Err(e)
            }
        }
    }

    /// Rejects every candidate; the citizen files a new complaint instead.
    pub fn decline_all(&mut self) -> Result<&WorkflowState, WorkflowError> {
        self.expect_state("decline the candidates", |s| {
            matches!(s, WorkflowState::DuplicatesFound { .. })
        })?;
        self.transition(WorkflowState::ConfirmingNew);
        Ok(&self.state)
    }

    /// Files the draft as a new complaint. If the store cannot be reached
    /// the submission is queued on the device and the flow still completes.
    ///
    /// Called again while `Creating`, it waits on the create already issued.
    #[instrument(skip(self), fields(citizen_id = %self.citizen_id))]
    pub async fn confirm_new(&mut self) -> Result<&WorkflowState, WorkflowError> {
        if matches!(self.state, WorkflowState::ConfirmingNew) {
            let image = resolve_image(self.images.as_deref(), self.draft.image.clone()).await;
            self.draft.image = image;

            let store = Arc::clone(self.detector.store());
            let draft = self.draft.clone();
            let citizen_id = self.citizen_id.clone();
            self.pending = Some(tokio::spawn(async move {
                store.create(&draft, &citizen_id).await
            }));
            self.transition(WorkflowState::Creating);
        } else {
            self.expect_state("submit a new complaint", |s| {
                matches!(s, WorkflowState::Creating)
            })?;
            info!("Resuming create already in flight");
        }

        let outcome = self.await_pending().await;

        match outcome {
            Ok(Ok(complaint)) => {
                self.transition(WorkflowState::Submitted(Submission {
                    mode: SubmissionMode::New,
                    complaint: Some(complaint),
                    queued_as: None,
                }));
                Ok(&self.state)
            }
            Ok(Err(StoreError::Unavailable(reason))) => {
                warn!("Complaint store unavailable, queueing offline: {reason}");
                self.queue_offline().await
            }
            Ok(Err(e @ StoreError::Validation(_))) => {
                self.fail(AppError::from(e.clone()), RetryTarget::Drafting);
                Err(e.into())
            }
            Ok(Err(e)) => {
                self.fail(AppError::from(e.clone()), RetryTarget::ConfirmingNew);
                Err(e.into())
            }
            Err(e) => {
                self.fail(
                    AppError::new(ErrorKind::Internal, e.to_string()),
                    RetryTarget::ConfirmingNew,
                );
                Err(e)
            }
        }
    }

    /// Leaves `Failed` for the state the failure recorded.
    pub fn retry(&mut self) -> Result<&WorkflowState, WorkflowError> {
        let target = match &self.state {
            WorkflowState::Failed { retry, .. } => retry.clone(),
            other => {
                return Err(WorkflowError::InvalidTransition {
                    state: other.name(),
                    action: "retry",
                })
            }
        };
        self.transition(match target {
            RetryTarget::Drafting => WorkflowState::Drafting,
            RetryTarget::DuplicatesFound(candidates) => {
                WorkflowState::DuplicatesFound { candidates }
            }
            RetryTarget::ConfirmingNew => WorkflowState::ConfirmingNew,
        });
        Ok(&self.state)
    }

    /// Gives up on the draft. Never touches the store, and is refused while
    /// a mutation is in flight.
    pub fn abandon(&mut self) -> Result<(), WorkflowError> {
        if self.state.is_terminal() || self.pending.is_some() {
            return Err(WorkflowError::InvalidTransition {
                state: self.state.name(),
                action: "abandon",
            });
        }
        self.transition(WorkflowState::Abandoned);
        Ok(())
    }

    async fn queue_offline(&mut self) -> Result<&WorkflowState, WorkflowError> {
        let payload = QueuedSubmission {
            citizen_id: self.citizen_id.clone(),
            draft: self.draft.clone(),
        };
        match self.queue.enqueue(payload).await {
            Ok(entry_id) => {
                self.transition(WorkflowState::Submitted(Submission {
                    mode: SubmissionMode::New,
                    complaint: None,
                    queued_as: Some(entry_id),
                }));
                Ok(&self.state)
            }
            Err(e) => {
                let app = queue_failure(&e);
                self.fail(app, RetryTarget::ConfirmingNew);
                Err(e.into())
            }
        }
    }

    /// Waits for the issued mutation. The handle is only cleared once the
    /// task has finished, so a dropped wait can be picked up again.
    async fn await_pending(&mut self) -> Result<Result<Complaint, StoreError>, WorkflowError> {
        let Some(task) = self.pending.as_mut() else {
            return Err(WorkflowError::InvalidTransition {
                state: self.state.name(),
                action: "wait for a store call",
            });
        };
        let outcome = task.await;
        self.pending = None;
        outcome.map_err(WorkflowError::from)
    }

    fn expect_state(
        &self,
        action: &'static str,
        allowed: impl FnOnce(&WorkflowState) -> bool,
    ) -> Result<(), WorkflowError> {
        if allowed(&self.state) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                state: self.state.name(),
                action,
            })
        }
    }

    fn fail(&mut self, error: AppError, retry: RetryTarget) {
        warn!(code = error.code(), "Dedup workflow failed: {}", error.message);
        self.transition(WorkflowState::Failed {
            kind: error.kind,
            message: error.user_facing_message(),
            retry,
        });
    }

    fn transition(&mut self, to: WorkflowState) {
        let from = self.state.name();
        let to_name = to.name();
        self.transitions.push(Transition {
            from,
            to: to_name,
            at: UnixTimeMs::now(),
        });
        info!(from, to = to_name, "Dedup workflow transition");
        self.state = to;
    }
}

fn queue_failure(e: &QueueError) -> AppError {
    match e {
        QueueError::Full { max } => AppError::new(ErrorKind::QuotaExceeded, e.to_string())
            .with_context("capacity", max.to_string()),
        _ => AppError::new(ErrorKind::Storage, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::model::{Category, ImageRef, Location};
    use crate::queue::MemoryQueueStorage;
    use crate::session::Session;
    use crate::store::InMemoryComplaintStore;
    use secrecy::SecretString;

    type Workflow = DedupWorkflow<InMemoryComplaintStore, MemoryQueueStorage>;

    fn center() -> Coordinate {
        Coordinate::new(23.0225, 72.5714).unwrap()
    }

    fn citizen(id: &str) -> CitizenId {
        CitizenId::new(id).unwrap()
    }

    fn draft_at(coordinate: Coordinate) -> DraftComplaint {
        DraftComplaint::new(
            Category::Pothole,
            Location::at(coordinate),
            ImageRef::Local("file:///pothole.jpg".into()),
        )
    }

    async fn setup() -> (Arc<InMemoryComplaintStore>, Arc<OfflineQueue<MemoryQueueStorage>>) {
        let store = Arc::new(InMemoryComplaintStore::new());
        let queue = Arc::new(
            OfflineQueue::open(Arc::new(MemoryQueueStorage::new()), 10)
                .await
                .unwrap(),
        );
        (store, queue)
    }

    fn workflow(
        store: &Arc<InMemoryComplaintStore>,
        queue: &Arc<OfflineQueue<MemoryQueueStorage>>,
        draft: DraftComplaint,
    ) -> Workflow {
        DedupWorkflow::for_citizen(
            citizen("me"),
            draft,
            DuplicateDetector::new(Arc::clone(store)),
            Arc::clone(queue),
        )
    }

    #[tokio::test]
    async fn test_start_requires_session() {
        let (store, queue) = setup().await;
        let session = SessionContext::new();
        let result = Workflow::start(
            &session,
            draft_at(center()),
            DuplicateDetector::new(Arc::clone(&store)),
            Arc::clone(&queue),
        )
        .await;
        assert!(matches!(result, Err(WorkflowError::Session(_))));

        session
            .login(Session::new(citizen("7"), SecretString::new("t".into())).unwrap())
            .await;
        let flow = Workflow::start(
            &session,
            draft_at(center()),
            DuplicateDetector::new(store),
            queue,
        )
        .await
        .unwrap();
        assert_eq!(flow.citizen_id().as_str(), "7");
        assert_eq!(flow.state(), &WorkflowState::Drafting);
    }

    #[tokio::test]
    async fn test_no_candidates_goes_to_confirming_new() {
        let (store, queue) = setup().await;
        let mut flow = workflow(&store, &queue, draft_at(center()));

        flow.check_duplicates().await.unwrap();
        assert_eq!(flow.state(), &WorkflowState::ConfirmingNew);

        let names: Vec<_> = flow.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            names,
            vec!["checking_duplicates", "no_duplicates", "confirming_new"]
        );
    }

    #[tokio::test]
    async fn test_invalid_draft_stays_drafting() {
        let (store, queue) = setup().await;
        let mut draft = draft_at(center());
        draft.location = None;
        let mut flow = workflow(&store, &queue, draft);

        let err = flow.check_duplicates().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Store(StoreError::Validation(_))));
        assert_eq!(flow.state(), &WorkflowState::Drafting);

        flow.edit_draft(|d| d.location = Some(Location::at(center())))
            .unwrap();
        flow.check_duplicates().await.unwrap();
        assert_eq!(flow.state(), &WorkflowState::ConfirmingNew);
    }

    #[tokio::test]
    async fn test_actions_out_of_order_are_rejected() {
        let (store, queue) = setup().await;
        let mut flow = workflow(&store, &queue, draft_at(center()));

        assert!(matches!(
            flow.confirm_new().await,
            Err(WorkflowError::InvalidTransition {
                state: "drafting",
                ..
            })
        ));
        assert!(flow.decline_all().is_err());
        assert!(flow.retry().is_err());
        let id = ComplaintId::new("x").unwrap();
        assert!(flow.select_candidate(&id).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_candidate_keeps_state() {
        let (store, queue) = setup().await;
        store
            .create(&draft_at(center()), &citizen("other"))
            .await
            .unwrap();
        let mut flow = workflow(&store, &queue, draft_at(center()));
        flow.check_duplicates().await.unwrap();

        let stranger = ComplaintId::new("not-offered").unwrap();
        let err = flow.select_candidate(&stranger).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownCandidate(_)));
        assert_eq!(flow.state().name(), "duplicates_found");
    }

    #[tokio::test]
    async fn test_vanished_candidate_returns_to_remaining_list() {
        let (store, queue) = setup().await;
        let first = store
            .create(&draft_at(center().offset_by_meters(10.0, 0.0)), &citizen("a"))
            .await
            .unwrap();
        let second = store
            .create(&draft_at(center().offset_by_meters(30.0, 0.0)), &citizen("b"))
            .await
            .unwrap();

        let mut flow = workflow(&store, &queue, draft_at(center()));
        flow.check_duplicates().await.unwrap();
        assert_eq!(flow.candidates().len(), 2);

        store.remove(&first.id).await;
        let err = flow.select_candidate(&first.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::CandidateUnavailable(_)));
        assert_eq!(flow.candidates().len(), 1);
        assert_eq!(flow.candidates()[0].complaint.id, second.id);

        store.remove(&second.id).await;
        assert!(flow.select_candidate(&second.id).await.is_err());
        assert_eq!(flow.state(), &WorkflowState::ConfirmingNew);
    }

    #[tokio::test]
    async fn test_abandon_never_touches_store() {
        let (store, queue) = setup().await;
        let existing = store
            .create(&draft_at(center()), &citizen("other"))
            .await
            .unwrap();
        let mut flow = workflow(&store, &queue, draft_at(center()));
        flow.check_duplicates().await.unwrap();
        flow.abandon().unwrap();

        assert_eq!(flow.state(), &WorkflowState::Abandoned);
        assert!(flow.abandon().is_err());
        let after = store.get_by_id(&existing.id).await.unwrap();
        assert_eq!(after, existing);
        assert_eq!(store.len().await, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_submitted_is_terminal() {
        let (store, queue) = setup().await;
        let mut flow = workflow(&store, &queue, draft_at(center()));
        flow.check_duplicates().await.unwrap();
        flow.confirm_new().await.unwrap();

        match flow.state() {
            WorkflowState::Submitted(submission) => {
                assert_eq!(submission.mode, SubmissionMode::New);
                assert!(!submission.is_offline());
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert!(flow.abandon().is_err());
        assert!(flow.confirm_new().await.is_err());
        assert_eq!(store.len().await, 1);

        let names: Vec<_> = flow.transitions().iter().map(|t| t.to).collect();
        assert_eq!(names[names.len() - 2..], ["creating", "submitted"]);
    }

    #[test]
    fn test_waiting_states() {
        assert!(WorkflowState::CheckingDuplicates.is_waiting());
        assert!(WorkflowState::Creating.is_waiting());
        assert!(WorkflowState::Supporting {
            complaint_id: ComplaintId::new("c").unwrap()
        }
        .is_waiting());
        assert!(!WorkflowState::ConfirmingNew.is_waiting());
        assert!(!WorkflowState::Creating.is_terminal());
    }
}
