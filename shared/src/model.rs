use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::geo::{format_distance, Coordinate};

/// Longest free-text description accepted on a draft.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;
pub const MAX_IMAGE_REF_LENGTH: usize = 2048;
/// Longest address, area, city, state or pincode accepted on a draft.
pub const MAX_LOCATION_FIELD_LENGTH: usize = 512;

/// Supporter counts at which a complaint escalates.
const HIGH_SEVERITY_SUPPORTERS: usize = 5;
const CRITICAL_SEVERITY_SUPPORTERS: usize = 10;

const MAX_ID_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },
    #[error("{kind} exceeds {max} characters")]
    TooLong { kind: &'static str, max: usize },
    #[error("{kind} contains control characters")]
    InvalidCharacters { kind: &'static str },
}

fn validate_id(kind: &'static str, id: String) -> Result<String, IdError> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(IdError::TooLong {
            kind,
            max: MAX_ID_LENGTH,
        });
    }
    if id.chars().any(char::is_control) {
        return Err(IdError::InvalidCharacters { kind });
    }
    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComplaintId(String);

impl ComplaintId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        validate_id("ComplaintId", id.into()).map(Self)
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitizenId(String);

impl CitizenId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        validate_id("CitizenId", id.into()).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CitizenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default(),
        )
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("unknown complaint category: {0:?}")]
    Unknown(String),
}

/// Issue categories a citizen can report. The set is closed: there is no
/// implicit fallback for strings that do not name a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Pothole,
    Garbage,
    StreetLight,
    WaterLeak,
    Sewage,
    RoadDamage,
    IllegalParking,
    NoisePollution,
    AirPollution,
    Encroachment,
    BrokenFootpath,
    TrafficSignal,
    Drainage,
    PublicToilet,
    Other,
}

impl Category {
    pub const ALL: [Self; 15] = [
        Self::Pothole,
        Self::Garbage,
        Self::StreetLight,
        Self::WaterLeak,
        Self::Sewage,
        Self::RoadDamage,
        Self::IllegalParking,
        Self::NoisePollution,
        Self::AirPollution,
        Self::Encroachment,
        Self::BrokenFootpath,
        Self::TrafficSignal,
        Self::Drainage,
        Self::PublicToilet,
        Self::Other,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pothole => "pothole",
            Self::Garbage => "garbage",
            Self::StreetLight => "street_light",
            Self::WaterLeak => "water_leak",
            Self::Sewage => "sewage",
            Self::RoadDamage => "road_damage",
            Self::IllegalParking => "illegal_parking",
            Self::NoisePollution => "noise_pollution",
            Self::AirPollution => "air_pollution",
            Self::Encroachment => "encroachment",
            Self::BrokenFootpath => "broken_footpath",
            Self::TrafficSignal => "traffic_signal",
            Self::Drainage => "drainage",
            Self::PublicToilet => "public_toilet",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pothole => "Pothole",
            Self::Garbage => "Garbage",
            Self::StreetLight => "Street Light",
            Self::WaterLeak => "Water Leak",
            Self::Sewage => "Sewage",
            Self::RoadDamage => "Road Damage",
            Self::IllegalParking => "Illegal Parking",
            Self::NoisePollution => "Noise Pollution",
            Self::AirPollution => "Air Pollution",
            Self::Encroachment => "Encroachment",
            Self::BrokenFootpath => "Broken Footpath",
            Self::TrafficSignal => "Traffic Signal",
            Self::Drainage => "Drainage",
            Self::PublicToilet => "Public Toilet",
            Self::Other => "Other",
        }
    }

    /// Department bucket used by the municipal complaints table. Several
    /// categories share a bucket; the mapping is one-way.
    #[must_use]
    pub const fn department_label(self) -> &'static str {
        match self {
            Self::Pothole => "Pothole",
            Self::Garbage | Self::PublicToilet | Self::Other => "Garbage",
            Self::StreetLight | Self::TrafficSignal => "Streetlight",
            Self::WaterLeak => "Water Supply",
            Self::Sewage => "Sewage",
            Self::RoadDamage | Self::BrokenFootpath => "Road Damage",
            Self::IllegalParking => "Illegal Parking",
            Self::NoisePollution => "Noise Pollution",
            Self::AirPollution => "Air Pollution",
            Self::Encroachment => "Encroachment",
            Self::Drainage => "Drainage",
        }
    }
}

impl FromStr for Category {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| CategoryError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Severity implied by the category and how many citizens back the
    /// complaint. Hazards to water, sewage and roads start at medium.
    #[must_use]
    pub const fn estimate(category: Category, supporter_count: usize) -> Self {
        if supporter_count >= CRITICAL_SEVERITY_SUPPORTERS {
            Self::Critical
        } else if supporter_count >= HIGH_SEVERITY_SUPPORTERS {
            Self::High
        } else if matches!(
            category,
            Category::WaterLeak | Category::Sewage | Category::RoadDamage | Category::Pothole
        ) {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    #[default]
    Submitted,
    Verified,
    Assigned,
    InProgress,
    Resolved,
    Rejected,
    Closed,
}

impl ComplaintStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Verified => "verified",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Verified => "Verified",
            Self::Assigned => "Assigned",
            Self::InProgress => "In Progress",
            Self::Resolved => "Resolved",
            Self::Rejected => "Rejected",
            Self::Closed => "Closed",
        }
    }

    /// Resolved and closed issues are never offered as duplicates.
    #[must_use]
    pub const fn is_dedup_target(self) -> bool {
        !matches!(self, Self::Resolved | Self::Closed)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Submitted => vec![Self::Verified, Self::Rejected],
            Self::Verified => vec![Self::Assigned, Self::Rejected],
            Self::Assigned => vec![Self::InProgress, Self::Rejected],
            Self::InProgress => vec![Self::Resolved],
            // Reopened when the citizen is not satisfied with the fix.
            Self::Resolved => vec![Self::Closed, Self::InProgress],
            Self::Rejected => vec![Self::Closed],
            Self::Closed => vec![],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn validate_transition(self, to: Self) -> Result<(), TransitionError> {
        if self == to {
            return Err(TransitionError::SameStatus);
        }
        if self.is_terminal() {
            return Err(TransitionError::FromTerminalStatus { status: self });
        }
        if !self.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { from: self, to });
        }
        Ok(())
    }
}

/// One entry of a complaint's status timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: ComplaintStatus,
    pub at: UnixTimeMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

/// A requested status change, with an optional note and author for the
/// timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: ComplaintStatus,
    pub note: Option<String>,
    pub updated_by: Option<String>,
}

impl StatusUpdate {
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn by(mut self, updated_by: impl Into<String>) -> Self {
        self.updated_by = Some(updated_by.into());
        self
    }
}

impl From<ComplaintStatus> for StatusUpdate {
    fn from(status: ComplaintStatus) -> Self {
        Self {
            status,
            note: None,
            updated_by: None,
        }
    }
}

impl FromStr for ComplaintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "submitted" => Ok(Self::Submitted),
            "verified" => Ok(Self::Verified),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "resolved" | "completed" => Ok(Self::Resolved),
            "rejected" => Ok(Self::Rejected),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown complaint status: {other:?}")),
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot transition to the same status")]
    SameStatus,
    #[error("cannot transition from terminal status: {status}")]
    FromTerminalStatus { status: ComplaintStatus },
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ComplaintStatus,
        to: ComplaintStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
}

impl Location {
    #[must_use]
    pub fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            address: None,
            area: None,
            city: None,
            state: None,
            pincode: None,
        }
    }

    /// Best human-readable place name: address, then area, then city.
    #[must_use]
    pub fn place_name(&self) -> Option<&str> {
        self.address
            .as_deref()
            .or(self.area.as_deref())
            .or(self.city.as_deref())
    }

    fn text_fields(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("address", self.address.as_deref()),
            ("area", self.area.as_deref()),
            ("city", self.city.as_deref()),
            ("state", self.state.as_deref()),
            ("pincode", self.pincode.as_deref()),
        ]
    }
}

/// Don't store image bytes. Store a handle/URI/path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "uri", rename_all = "snake_case")]
pub enum ImageRef {
    /// On-device file or content URI, not yet uploaded.
    Local(String),
    Remote(Url),
}

impl ImageRef {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local(uri) => uri,
            Self::Remote(url) => url.as_str(),
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("a location is required to report an issue")]
    MissingLocation,
    #[error("description exceeds {max} bytes ({len})")]
    DescriptionTooLong { len: usize, max: usize },
    #[error("image reference cannot be empty")]
    EmptyImageRef,
    #[error("image reference exceeds {max} bytes ({len})")]
    ImageRefTooLong { len: usize, max: usize },
    #[error("location {field} exceeds {max} bytes ({len})")]
    LocationFieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// A citizen's in-progress report. Never persisted by the store until the
/// citizen confirms it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftComplaint {
    pub category: Category,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub location: Option<Location>,
    pub image: ImageRef,
}

impl DraftComplaint {
    #[must_use]
    pub fn new(category: Category, location: Location, image: ImageRef) -> Self {
        Self {
            category,
            description: None,
            severity: None,
            location: Some(location),
            image,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Checks the draft is complete enough to deduplicate and submit, and
    /// returns its location.
    pub fn validate(&self) -> Result<&Location, DraftError> {
        if let Some(description) = &self.description {
            if description.len() > MAX_DESCRIPTION_LENGTH {
                return Err(DraftError::DescriptionTooLong {
                    len: description.len(),
                    max: MAX_DESCRIPTION_LENGTH,
                });
            }
        }
        let image = self.image.as_str();
        if image.trim().is_empty() {
            return Err(DraftError::EmptyImageRef);
        }
        if image.len() > MAX_IMAGE_REF_LENGTH {
            return Err(DraftError::ImageRefTooLong {
                len: image.len(),
                max: MAX_IMAGE_REF_LENGTH,
            });
        }
        let location = self.location.as_ref().ok_or(DraftError::MissingLocation)?;
        for (field, value) in location.text_fields() {
            let len = value.map_or(0, str::len);
            if len > MAX_LOCATION_FIELD_LENGTH {
                return Err(DraftError::LocationFieldTooLong {
                    field,
                    len,
                    max: MAX_LOCATION_FIELD_LENGTH,
                });
            }
        }
        Ok(location)
    }
}

// Redact debug output because this can contain sensitive user-provided data.
impl fmt::Debug for DraftComplaint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DraftComplaint")
            .field("category", &self.category)
            .field("description_present", &self.description.is_some())
            .field("severity", &self.severity)
            .field("location_present", &self.location.is_some())
            .field("image_remote", &self.image.is_remote())
            .finish()
    }
}

/// A persisted complaint as owned by the store.
///
/// Supporter and upvote counts are derived from the citizen sets, so a
/// count can never disagree with the set it summarises. Every status change
/// is appended to the history, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub citizen_id: CitizenId,
    pub category: Category,
    pub location: Location,
    pub description: Option<String>,
    pub severity: Option<Severity>,
    pub image: Option<ImageRef>,
    pub status: ComplaintStatus,
    supporters: BTreeSet<CitizenId>,
    upvoted_by: BTreeSet<CitizenId>,
    #[serde(default)]
    history: Vec<StatusEvent>,
    created_at: UnixTimeMs,
    pub updated_at: UnixTimeMs,
}

impl Complaint {
    /// Builds a freshly submitted complaint from a validated draft.
    pub fn from_draft(
        id: ComplaintId,
        draft: &DraftComplaint,
        citizen_id: CitizenId,
        now: UnixTimeMs,
    ) -> Result<Self, DraftError> {
        let location = draft.validate()?.clone();
        let submitted = StatusEvent {
            status: ComplaintStatus::Submitted,
            at: now,
            note: None,
            updated_by: Some(citizen_id.as_str().to_string()),
        };
        Ok(Self {
            id,
            citizen_id,
            category: draft.category,
            location,
            description: draft.description.clone(),
            severity: draft.severity,
            image: Some(draft.image.clone()),
            status: ComplaintStatus::Submitted,
            supporters: BTreeSet::new(),
            upvoted_by: BTreeSet::new(),
            history: vec![submitted],
            created_at: now,
            updated_at: now,
        })
    }

    /// Reassembles a complaint read back from a backing table.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn restore(
        id: ComplaintId,
        citizen_id: CitizenId,
        category: Category,
        location: Location,
        status: ComplaintStatus,
        created_at: UnixTimeMs,
        updated_at: UnixTimeMs,
        supporters: impl IntoIterator<Item = CitizenId>,
        upvoted_by: impl IntoIterator<Item = CitizenId>,
    ) -> Self {
        Self {
            id,
            citizen_id,
            category,
            location,
            description: None,
            severity: None,
            image: None,
            status,
            supporters: supporters.into_iter().collect(),
            upvoted_by: upvoted_by.into_iter().collect(),
            history: Vec::new(),
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: impl IntoIterator<Item = StatusEvent>) -> Self {
        self.history = history.into_iter().collect();
        self
    }

    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        self.location.coordinate
    }

    #[must_use]
    pub const fn created_at(&self) -> UnixTimeMs {
        self.created_at
    }

    #[must_use]
    pub fn supporters(&self) -> &BTreeSet<CitizenId> {
        &self.supporters
    }

    #[must_use]
    pub fn upvoted_by(&self) -> &BTreeSet<CitizenId> {
        &self.upvoted_by
    }

    #[must_use]
    pub fn history(&self) -> &[StatusEvent] {
        &self.history
    }

    #[must_use]
    pub fn supporter_count(&self) -> usize {
        self.supporters.len()
    }

    #[must_use]
    pub fn upvotes(&self) -> usize {
        self.upvoted_by.len()
    }

    /// Adds a supporter. Returns `false` (and leaves the record untouched)
    /// if the citizen already supports this complaint.
    /// New supporters may raise the severity, never lower it.
    pub fn add_supporter(&mut self, citizen_id: CitizenId, now: UnixTimeMs) -> bool {
        let inserted = self.supporters.insert(citizen_id);
        if inserted {
            self.updated_at = now;
            if let Some(raised) = self.escalated_severity() {
                self.severity = Some(raised);
            }
        }
        inserted
    }

    /// The estimated severity, if it is above the recorded one.
    #[must_use]
    pub fn escalated_severity(&self) -> Option<Severity> {
        let estimated = Severity::estimate(self.category, self.supporter_count());
        match self.severity {
            Some(current) if current >= estimated => None,
            _ => Some(estimated),
        }
    }

    /// Validates and applies a status change, recording it in the history.
    pub fn apply_status(
        &mut self,
        update: StatusUpdate,
        now: UnixTimeMs,
    ) -> Result<(), TransitionError> {
        self.status.validate_transition(update.status)?;
        self.status = update.status;
        self.updated_at = now;
        self.history.push(StatusEvent {
            status: update.status,
            at: now,
            note: update.note,
            updated_by: update.updated_by,
        });
        Ok(())
    }

    /// Records an upvote. Same idempotency contract as [`Self::add_supporter`].
    pub fn add_upvote(&mut self, citizen_id: CitizenId, now: UnixTimeMs) -> bool {
        let inserted = self.upvoted_by.insert(citizen_id);
        if inserted {
            self.updated_at = now;
        }
        inserted
    }
}

/// An existing complaint close enough to a draft to be a possible
/// duplicate. Produced per query, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyMatch {
    pub complaint: Complaint,
    pub distance_meters: f64,
}

impl NearbyMatch {
    #[must_use]
    pub fn distance_label(&self) -> String {
        format_distance(self.distance_meters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citizen(id: &str) -> CitizenId {
        CitizenId::new(id).unwrap()
    }

    fn sample_draft() -> DraftComplaint {
        let coordinate = Coordinate::new(12.97, 77.59).unwrap();
        DraftComplaint::new(
            Category::Pothole,
            Location::at(coordinate),
            ImageRef::Local("file:///photos/1.jpg".into()),
        )
    }

    #[test]
    fn test_id_validation() {
        assert!(CitizenId::new("42").is_ok());
        assert_eq!(
            CitizenId::new("   "),
            Err(IdError::Empty { kind: "CitizenId" })
        );
        assert!(ComplaintId::new("a".repeat(129)).is_err());
        assert!(ComplaintId::new("bad\u{0}id").is_err());
        assert_eq!(CitizenId::new("  7  ").unwrap().as_str(), "7");
    }

    #[test]
    fn test_complaint_id_generate_is_unique() {
        assert_ne!(ComplaintId::generate(), ComplaintId::generate());
    }

    #[test]
    fn test_category_parse_is_strict() {
        assert_eq!("pothole".parse::<Category>(), Ok(Category::Pothole));
        assert_eq!("Street Light".parse::<Category>(), Ok(Category::StreetLight));
        assert_eq!("water-leak".parse::<Category>(), Ok(Category::WaterLeak));
        assert_eq!(
            "volcano".parse::<Category>(),
            Err(CategoryError::Unknown("volcano".into()))
        );
    }

    #[test]
    fn test_category_wire_names_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }

    #[test]
    fn test_department_label_buckets() {
        assert_eq!(Category::BrokenFootpath.department_label(), "Road Damage");
        assert_eq!(Category::TrafficSignal.department_label(), "Streetlight");
        assert_eq!(Category::WaterLeak.department_label(), "Water Supply");
    }

    #[test]
    fn test_status_dedup_target() {
        assert!(ComplaintStatus::Submitted.is_dedup_target());
        assert!(ComplaintStatus::InProgress.is_dedup_target());
        assert!(ComplaintStatus::Rejected.is_dedup_target());
        assert!(!ComplaintStatus::Resolved.is_dedup_target());
        assert!(!ComplaintStatus::Closed.is_dedup_target());
    }

    #[test]
    fn test_status_transitions() {
        use ComplaintStatus::*;
        assert!(Submitted.validate_transition(Verified).is_ok());
        assert!(Resolved.validate_transition(InProgress).is_ok());
        assert_eq!(
            Submitted.validate_transition(Submitted),
            Err(TransitionError::SameStatus)
        );
        assert_eq!(
            Closed.validate_transition(Submitted),
            Err(TransitionError::FromTerminalStatus { status: Closed })
        );
        assert_eq!(
            Submitted.validate_transition(Resolved),
            Err(TransitionError::InvalidTransition {
                from: Submitted,
                to: Resolved
            })
        );
    }

    #[test]
    fn test_status_from_str_accepts_table_spelling() {
        assert_eq!("In Progress".parse(), Ok(ComplaintStatus::InProgress));
        assert_eq!("Completed".parse(), Ok(ComplaintStatus::Resolved));
        assert!("archived".parse::<ComplaintStatus>().is_err());
    }

    #[test]
    fn test_draft_requires_location() {
        let mut draft = sample_draft();
        assert!(draft.validate().is_ok());
        draft.location = None;
        assert_eq!(draft.validate(), Err(DraftError::MissingLocation));
    }

    #[test]
    fn test_draft_rejects_long_description() {
        let draft = sample_draft().with_description("x".repeat(MAX_DESCRIPTION_LENGTH + 1));
        assert!(matches!(
            draft.validate(),
            Err(DraftError::DescriptionTooLong { .. })
        ));
    }

    #[test]
    fn test_draft_debug_redacts_description() {
        let draft = sample_draft().with_description("my neighbour's house");
        let debug = format!("{draft:?}");
        assert!(!debug.contains("neighbour"));
        assert!(debug.contains("description_present: true"));
    }

    #[test]
    fn test_support_is_idempotent() {
        let mut complaint = Complaint::from_draft(
            ComplaintId::generate(),
            &sample_draft(),
            citizen("1"),
            UnixTimeMs(1_000),
        )
        .unwrap();

        assert!(complaint.add_supporter(citizen("2"), UnixTimeMs(2_000)));
        assert!(!complaint.add_supporter(citizen("2"), UnixTimeMs(3_000)));
        assert_eq!(complaint.supporter_count(), 1);
        assert_eq!(complaint.updated_at, UnixTimeMs(2_000));
        assert_eq!(complaint.created_at(), UnixTimeMs(1_000));

        assert!(complaint.add_upvote(citizen("2"), UnixTimeMs(4_000)));
        assert!(complaint.add_upvote(citizen("3"), UnixTimeMs(4_000)));
        assert_eq!(complaint.upvotes(), 2);
        assert_eq!(complaint.supporter_count(), 1);
    }

    #[test]
    fn test_new_complaint_starts_submitted_with_zero_counts() {
        let complaint = Complaint::from_draft(
            ComplaintId::generate(),
            &sample_draft(),
            citizen("1"),
            UnixTimeMs(5),
        )
        .unwrap();
        assert_eq!(complaint.status, ComplaintStatus::Submitted);
        assert_eq!(complaint.supporter_count(), 0);
        assert_eq!(complaint.upvotes(), 0);
        assert_eq!(complaint.created_at(), complaint.updated_at);
    }

    #[test]
    fn test_draft_rejects_oversized_fields() {
        let draft = DraftComplaint::new(
            Category::Garbage,
            Location::at(Coordinate::new(12.97, 77.59).unwrap()),
            ImageRef::Local("i".repeat(MAX_IMAGE_REF_LENGTH + 1)),
        );
        assert!(matches!(
            draft.validate(),
            Err(DraftError::ImageRefTooLong { .. })
        ));

        let mut draft = sample_draft();
        if let Some(location) = draft.location.as_mut() {
            location.state = Some("s".repeat(MAX_LOCATION_FIELD_LENGTH + 1));
        }
        assert_eq!(
            draft.validate(),
            Err(DraftError::LocationFieldTooLong {
                field: "state",
                len: MAX_LOCATION_FIELD_LENGTH + 1,
                max: MAX_LOCATION_FIELD_LENGTH,
            })
        );
    }

    #[test]
    fn test_severity_estimate_thresholds() {
        assert_eq!(Severity::estimate(Category::Pothole, 0), Severity::Medium);
        assert_eq!(Severity::estimate(Category::WaterLeak, 4), Severity::Medium);
        assert_eq!(Severity::estimate(Category::Sewage, 1), Severity::Medium);
        assert_eq!(Severity::estimate(Category::RoadDamage, 1), Severity::Medium);
        assert_eq!(Severity::estimate(Category::Garbage, 4), Severity::Low);
        assert_eq!(Severity::estimate(Category::Garbage, 5), Severity::High);
        assert_eq!(Severity::estimate(Category::Pothole, 9), Severity::High);
        assert_eq!(Severity::estimate(Category::Garbage, 10), Severity::Critical);
        assert_eq!(Severity::estimate(Category::Pothole, 250), Severity::Critical);
    }

    #[test]
    fn test_supporters_escalate_but_never_lower_severity() {
        let mut complaint = Complaint::from_draft(
            ComplaintId::generate(),
            &sample_draft(),
            citizen("owner"),
            UnixTimeMs(1),
        )
        .unwrap();
        assert_eq!(complaint.severity, None);

        complaint.add_supporter(citizen("s0"), UnixTimeMs(2));
        assert_eq!(complaint.severity, Some(Severity::Medium));
        for i in 1..5 {
            complaint.add_supporter(citizen(&format!("s{i}")), UnixTimeMs(2));
        }
        assert_eq!(complaint.severity, Some(Severity::High));
        for i in 5..10 {
            complaint.add_supporter(citizen(&format!("s{i}")), UnixTimeMs(2));
        }
        assert_eq!(complaint.severity, Some(Severity::Critical));

        let mut reported_critical = Complaint::from_draft(
            ComplaintId::generate(),
            &sample_draft().with_severity(Severity::Critical),
            citizen("owner"),
            UnixTimeMs(1),
        )
        .unwrap();
        reported_critical.add_supporter(citizen("s0"), UnixTimeMs(2));
        assert_eq!(reported_critical.severity, Some(Severity::Critical));
        assert_eq!(reported_critical.escalated_severity(), None);
    }

    #[test]
    fn test_status_changes_are_recorded_in_history() {
        let mut complaint = Complaint::from_draft(
            ComplaintId::generate(),
            &sample_draft(),
            citizen("7"),
            UnixTimeMs(10),
        )
        .unwrap();
        assert_eq!(complaint.history().len(), 1);
        assert_eq!(complaint.history()[0].status, ComplaintStatus::Submitted);
        assert_eq!(complaint.history()[0].updated_by.as_deref(), Some("7"));

        complaint
            .apply_status(
                StatusUpdate::from(ComplaintStatus::Verified)
                    .with_note("Photo checked")
                    .by("ward-office"),
                UnixTimeMs(20),
            )
            .unwrap();
        assert!(complaint
            .apply_status(ComplaintStatus::Closed.into(), UnixTimeMs(30))
            .is_err());

        let last = complaint.history().last().unwrap();
        assert_eq!(complaint.history().len(), 2);
        assert_eq!(last.status, ComplaintStatus::Verified);
        assert_eq!(last.at, UnixTimeMs(20));
        assert_eq!(last.note.as_deref(), Some("Photo checked"));
        assert_eq!(last.updated_by.as_deref(), Some("ward-office"));
        assert_eq!(complaint.updated_at, UnixTimeMs(20));
    }

    #[test]
    fn test_image_ref_serde_shape() {
        let local = ImageRef::Local("file:///a.jpg".into());
        let json = serde_json::to_value(&local).unwrap();
        assert_eq!(json["kind"], "local");
        assert_eq!(json["uri"], "file:///a.jpg");
    }
}
