use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument};

use super::{rank_nearby, validate_radius, ComplaintStore};
use crate::error::StoreError;
use crate::geo::{BoundingBox, Coordinate};
use crate::model::{
    Category, CitizenId, Complaint, ComplaintId, ComplaintStatus, DraftComplaint, ImageRef,
    Location, NearbyMatch, Severity, StatusEvent, StatusUpdate, UnixTimeMs,
};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS complaints (
        id TEXT PRIMARY KEY,
        citizen_id TEXT NOT NULL,
        category TEXT NOT NULL,
        department TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        address TEXT,
        area TEXT,
        city TEXT,
        state TEXT,
        pincode TEXT,
        description TEXT,
        severity TEXT,
        image TEXT,
        status TEXT NOT NULL,
        supporter_count INTEGER NOT NULL DEFAULT 0,
        upvotes INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS complaint_supporters (
        complaint_id TEXT NOT NULL REFERENCES complaints(id),
        citizen_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (complaint_id, citizen_id)
    );

    CREATE TABLE IF NOT EXISTS complaint_upvotes (
        complaint_id TEXT NOT NULL REFERENCES complaints(id),
        citizen_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (complaint_id, citizen_id)
    );

    CREATE TABLE IF NOT EXISTS complaint_status_history (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        complaint_id TEXT NOT NULL REFERENCES complaints(id),
        status TEXT NOT NULL,
        note TEXT,
        updated_by TEXT,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_history_complaint ON complaint_status_history(complaint_id);
    CREATE INDEX IF NOT EXISTS idx_complaints_position ON complaints(latitude, longitude);
    CREATE INDEX IF NOT EXISTS idx_complaints_status ON complaints(status);
"#;

const SELECT_COMPLAINT: &str = "SELECT id, citizen_id, category, latitude, longitude, address, \
     area, city, state, pincode, description, severity, image, status, created_at, updated_at \
     FROM complaints";

/// Which citizen-set table a mutation targets.
#[derive(Clone, Copy)]
enum CitizenSet {
    Supporters,
    Upvotes,
}

impl CitizenSet {
    const fn table(self) -> &'static str {
        match self {
            Self::Supporters => "complaint_supporters",
            Self::Upvotes => "complaint_upvotes",
        }
    }

    const fn count_column(self) -> &'static str {
        match self {
            Self::Supporters => "supporter_count",
            Self::Upvotes => "upvotes",
        }
    }
}

/// Complaint store backed by a local SQLite database.
///
/// Queries run on the blocking pool. Support and upvote insert into a
/// `(complaint_id, citizen_id)` keyed table and recompute the cached count
/// in the same transaction, so concurrent supporters are all retained.
pub struct SqliteComplaintStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteComplaintStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Moves a complaint along its lifecycle, as the admin dashboard would.
    #[instrument(skip(self, update), fields(complaint_id = %id))]
    pub async fn set_status(
        &self,
        id: &ComplaintId,
        update: impl Into<StatusUpdate> + Send,
    ) -> Result<Complaint, StoreError> {
        let update = update.into();
        let id = id.clone();
        let updated = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                let mut current =
                    load_complaint(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                current.apply_status(update, UnixTimeMs::now())?;
                tx.execute(
                    "UPDATE complaints SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![
                        current.status.as_str(),
                        to_sql_time(current.updated_at),
                        id.as_str()
                    ],
                )
                .map_err(db_err)?;
                if let Some(event) = current.history().last() {
                    insert_status_event(&tx, &id, event)?;
                }
                let updated =
                    load_complaint(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                tx.commit().map_err(db_err)?;
                Ok(updated)
            })
            .await?;
        info!(status = updated.status.as_str(), "Complaint status changed");
        Ok(updated)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("database connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("database task failed: {e}")))?
    }

    async fn add_citizen(
        &self,
        set: CitizenSet,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        let id = id.clone();
        let citizen_id = citizen_id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM complaints WHERE id = ?1)",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            if !exists {
                return Err(StoreError::NotFound(id));
            }

            let now = to_sql_time(UnixTimeMs::now());
            let inserted = tx
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} (complaint_id, citizen_id, created_at) \
                         VALUES (?1, ?2, ?3)",
                        set.table()
                    ),
                    params![id.as_str(), citizen_id.as_str(), now],
                )
                .map_err(db_err)?;
            if inserted > 0 {
                tx.execute(
                    &format!(
                        "UPDATE complaints SET {col} = \
                         (SELECT COUNT(*) FROM {table} WHERE complaint_id = ?1), \
                         updated_at = ?2 WHERE id = ?1",
                        col = set.count_column(),
                        table = set.table()
                    ),
                    params![id.as_str(), now],
                )
                .map_err(db_err)?;
            }

            if inserted > 0 && matches!(set, CitizenSet::Supporters) {
                let current =
                    load_complaint(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                if let Some(raised) = current.escalated_severity() {
                    tx.execute(
                        "UPDATE complaints SET severity = ?1 WHERE id = ?2",
                        params![raised.as_str(), id.as_str()],
                    )
                    .map_err(db_err)?;
                    debug!(severity = raised.as_str(), "Severity escalated");
                }
            }

            let complaint =
                load_complaint(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            tx.commit().map_err(db_err)?;
            Ok(complaint)
        })
        .await
    }
}

#[async_trait]
impl ComplaintStore for SqliteComplaintStore {
    #[instrument(skip(self))]
    async fn query_nearby(
        &self,
        center: Coordinate,
        radius_m: f64,
        category: Option<Category>,
        limit: usize,
    ) -> Result<Vec<NearbyMatch>, StoreError> {
        validate_radius(radius_m)?;
        let bbox = BoundingBox::around(center, radius_m);

        let matches = self
            .with_conn(move |conn| {
                let sql = format!(
                    "{SELECT_COMPLAINT} WHERE latitude BETWEEN ?1 AND ?2 \
                     AND (?3 OR longitude BETWEEN ?4 AND ?5) \
                     AND status NOT IN ('resolved', 'closed') \
                     AND (?6 IS NULL OR category = ?6)"
                );
                let mut stmt = conn.prepare(&sql).map_err(db_err)?;
                let rows = stmt
                    .query_map(
                        params![
                            bbox.min_lat,
                            bbox.max_lat,
                            bbox.unbounded_lon,
                            bbox.min_lon,
                            bbox.max_lon,
                            category.map(Category::as_str),
                        ],
                        ComplaintRow::from_row,
                    )
                    .map_err(db_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(db_err)?;

                let complaints = rows
                    .into_iter()
                    .map(|row| row.into_complaint(conn))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rank_nearby(center, radius_m, category, limit, &complaints))
            })
            .await?;

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
        let image = complaint
            .image
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Validation(format!("unserializable image reference: {e}")))?;

        let record = complaint.clone();
        self.with_conn(move |conn| {
            let location = &record.location;
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO complaints (id, citizen_id, category, department, latitude, \
                 longitude, address, area, city, state, pincode, description, severity, image, \
                 status, supporter_count, upvotes, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
                 0, 0, ?16, ?17)",
                params![
                    record.id.as_str(),
                    record.citizen_id.as_str(),
                    record.category.as_str(),
                    record.category.department_label(),
                    location.coordinate.latitude(),
                    location.coordinate.longitude(),
                    location.address,
                    location.area,
                    location.city,
                    location.state,
                    location.pincode,
                    record.description,
                    record.severity.map(Severity::as_str),
                    image,
                    record.status.as_str(),
                    to_sql_time(record.created_at()),
                    to_sql_time(record.updated_at),
                ],
            )
            .map_err(|e| {
                error!("Failed to insert complaint: {e}");
                db_err(e)
            })?;
            for event in record.history() {
                insert_status_event(&tx, &record.id, event)?;
            }
            tx.commit().map_err(db_err)?;
            Ok(())
        })
        .await?;

        info!(complaint_id = %complaint.id, "Complaint created");
        Ok(complaint)
    }

    #[instrument(skip(self), fields(complaint_id = %id))]
    async fn support(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.add_citizen(CitizenSet::Supporters, id, citizen_id).await
    }

    #[instrument(skip(self), fields(complaint_id = %id))]
    async fn upvote(
        &self,
        id: &ComplaintId,
        citizen_id: &CitizenId,
    ) -> Result<Complaint, StoreError> {
        self.add_citizen(CitizenSet::Upvotes, id, citizen_id).await
    }

    async fn get_by_id(&self, id: &ComplaintId) -> Result<Complaint, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            load_complaint(conn, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))
        })
        .await
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("sqlite: {e}"))
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("corrupt {what} in complaints table: {detail}"))
}

fn to_sql_time(t: UnixTimeMs) -> i64 {
    i64::try_from(t.as_millis()).unwrap_or(i64::MAX)
}

fn from_sql_time(ms: i64) -> UnixTimeMs {
    UnixTimeMs(u64::try_from(ms).unwrap_or_default())
}

fn load_complaint(conn: &Connection, id: &ComplaintId) -> Result<Option<Complaint>, StoreError> {
    let row = conn
        .query_row(
            &format!("{SELECT_COMPLAINT} WHERE id = ?1"),
            params![id.as_str()],
            ComplaintRow::from_row,
        )
        .optional()
        .map_err(db_err)?;
    row.map(|row| row.into_complaint(conn)).transpose()
}

fn insert_status_event(
    conn: &Connection,
    id: &ComplaintId,
    event: &StatusEvent,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO complaint_status_history (complaint_id, status, note, updated_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.as_str(),
            event.status.as_str(),
            event.note,
            event.updated_by,
            to_sql_time(event.at)
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn load_history(conn: &Connection, id: &str) -> Result<Vec<StatusEvent>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT status, note, updated_by, created_at FROM complaint_status_history \
             WHERE complaint_id = ?1 ORDER BY seq",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    rows.into_iter()
        .map(|(status, note, updated_by, at)| {
            Ok(StatusEvent {
                status: status
                    .parse::<ComplaintStatus>()
                    .map_err(|e| corrupt("history status", e))?,
                at: from_sql_time(at),
                note,
                updated_by,
            })
        })
        .collect()
}

fn load_citizens(
    conn: &Connection,
    set: CitizenSet,
    id: &str,
) -> Result<Vec<CitizenId>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT citizen_id FROM {} WHERE complaint_id = ?1",
            set.table()
        ))
        .map_err(db_err)?;
    let ids = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    ids.into_iter()
        .map(|raw| CitizenId::new(raw).map_err(|e| corrupt("citizen id", e)))
        .collect()
}

/// Raw column values, decoded into domain types once the row is released.
struct ComplaintRow {
    id: String,
    citizen_id: String,
    category: String,
    latitude: f64,
    longitude: f64,
    address: Option<String>,
    area: Option<String>,
    city: Option<String>,
    state: Option<String>,
    pincode: Option<String>,
    description: Option<String>,
    severity: Option<String>,
    image: Option<String>,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl ComplaintRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            citizen_id: row.get(1)?,
            category: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            address: row.get(5)?,
            area: row.get(6)?,
            city: row.get(7)?,
            state: row.get(8)?,
            pincode: row.get(9)?,
            description: row.get(10)?,
            severity: row.get(11)?,
            image: row.get(12)?,
            status: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_complaint(self, conn: &Connection) -> Result<Complaint, StoreError> {
        let supporters = load_citizens(conn, CitizenSet::Supporters, &self.id)?;
        let upvoted_by = load_citizens(conn, CitizenSet::Upvotes, &self.id)?;
        let history = load_history(conn, &self.id)?;

        let coordinate =
            Coordinate::new(self.latitude, self.longitude).map_err(|e| corrupt("coordinate", e))?;
        let location = Location {
            coordinate,
            address: self.address,
            area: self.area,
            city: self.city,
            state: self.state,
            pincode: self.pincode,
        };

        let mut complaint = Complaint::restore(
            ComplaintId::new(self.id).map_err(|e| corrupt("complaint id", e))?,
            CitizenId::new(self.citizen_id).map_err(|e| corrupt("citizen id", e))?,
            self.category
                .parse::<Category>()
                .map_err(|e| corrupt("category", e))?,
            location,
            self.status
                .parse::<ComplaintStatus>()
                .map_err(|e| corrupt("status", e))?,
            from_sql_time(self.created_at),
            from_sql_time(self.updated_at),
            supporters,
            upvoted_by,
        )
        .with_history(history);
        complaint.description = self.description;
        complaint.severity = self
            .severity
            .map(|s| s.parse::<Severity>())
            .transpose()
            .map_err(|e| corrupt("severity", e))?;
        complaint.image = self
            .image
            .map(|json| serde_json::from_str::<ImageRef>(&json))
            .transpose()
            .map_err(|e| corrupt("image", e))?;
        Ok(complaint)
    }
}
