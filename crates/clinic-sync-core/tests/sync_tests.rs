//! Push/pull tests against an in-memory server.
//!
//! The fake server keeps an append-only change feed per table. Accepted pushes are appended to
//! it, and pulls page through it with the feed index as the cursor. A batch whose idempotency
//! key was already applied gets the earlier answer and is not appended again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use clinic_sync_core::models::{Gender, PhoneNumberType};
use clinic_sync_core::sync::{
    PullRequest, PullResponse, PushRequest, PushResponse, RejectedRecord, TransportError,
};
use clinic_sync_core::{
    BloodPressureMeasurement, Database, NewPatientEntry, Patient, PatientStatus, ReadingContext,
    Store, StoreConfig, SyncConfig, SyncCoordinator, SyncError, SyncStatus, SyncTransport, Table,
    TestClock,
};

// =========================================================================
// Fake server
// =========================================================================

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ServerState {
    pushes: Vec<PushRequest>,
    pulls: Vec<PullRequest>,
    feed: HashMap<Table, Vec<Value>>,
    reject: HashMap<Uuid, String>,
    failing_push: HashSet<Table>,
    failing_pull: HashSet<Table>,
    /// Apply the next push for these tables, then drop the reply.
    lost_ack: HashSet<Table>,
    applied: HashMap<String, PushResponse>,
    hang: bool,
    during_push: Option<Hook>,
}

#[derive(Default)]
struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    fn serve(&self, table: Table, records: Vec<Value>) {
        self.state().feed.entry(table).or_default().extend(records);
    }

    fn pushes_for(&self, table: Table) -> Vec<PushRequest> {
        self.state()
            .pushes
            .iter()
            .filter(|p| p.table == table)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SyncTransport for FakeServer {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, TransportError> {
        let (hang, hook) = {
            let mut state = self.state();
            state.pushes.push(request.clone());
            (state.hang, state.during_push.take())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(hook) = hook {
            hook();
        }

        let mut state = self.state();
        if state.failing_push.contains(&request.table) {
            return Err(TransportError::Unavailable("connection reset".into()));
        }
        if let Some(response) = state.applied.get(&request.idempotency_key) {
            return Ok(response.clone());
        }
        let mut rejected = Vec::new();
        for record in &request.records {
            let id: Uuid = record["id"].as_str().unwrap().parse().unwrap();
            match state.reject.get(&id) {
                Some(reason) => rejected.push(RejectedRecord {
                    id,
                    reason: reason.clone(),
                }),
                None => state
                    .feed
                    .entry(request.table)
                    .or_default()
                    .push(record.clone()),
            }
        }
        let response = PushResponse { rejected };
        state
            .applied
            .insert(request.idempotency_key.clone(), response.clone());
        if state.lost_ack.remove(&request.table) {
            return Err(TransportError::Unavailable("connection dropped before reply".into()));
        }
        Ok(response)
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, TransportError> {
        let mut state = self.state();
        state.pulls.push(request.clone());
        if state.failing_pull.contains(&request.table) {
            return Err(TransportError::Server {
                status: 503,
                message: "maintenance".into(),
            });
        }
        let feed = state.feed.get(&request.table).cloned().unwrap_or_default();
        let start = request
            .cursor
            .as_deref()
            .map(|c| c.parse::<usize>().unwrap())
            .unwrap_or(0)
            .min(feed.len());
        let end = (start + request.limit).min(feed.len());
        Ok(PullResponse {
            records: feed[start..end].to_vec(),
            next_cursor: Some(end.to_string()),
        })
    }
}

// =========================================================================
// Fixtures
// =========================================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 1, 5, 10, 0, 0).unwrap()
}

fn config() -> SyncConfig {
    SyncConfig {
        push_batch_size: 2,
        pull_page_size: 2,
        push_timeout_secs: 1,
        pull_timeout_secs: 1,
    }
}

struct Harness {
    store: Arc<Store>,
    clock: Arc<TestClock>,
    server: Arc<FakeServer>,
    sync: SyncCoordinator,
}

fn harness_with(db: Database, server: Arc<FakeServer>) -> Harness {
    let clock = Arc::new(TestClock::new(start()));
    let store = Arc::new(Store::new(db, clock.clone()));
    let sync = SyncCoordinator::new(store.clone(), server.clone(), config()).unwrap();
    Harness {
        store,
        clock,
        server,
        sync,
    }
}

fn harness() -> Harness {
    harness_with(
        Database::open_in_memory().unwrap(),
        Arc::new(FakeServer::default()),
    )
}

fn entry(name: &str) -> NewPatientEntry {
    NewPatientEntry {
        full_name: name.into(),
        gender: Gender::Female,
        date_of_birth: None,
        age: Some(52),
        phone_number: Some("9999900001".into()),
        phone_type: PhoneNumberType::Mobile,
        street_address: None,
        colony_or_village: Some("Kotli".into()),
        district: "Bathinda".into(),
        state: "Punjab".into(),
        country: None,
        business_id: None,
        registered_facility_id: None,
    }
}

fn register(h: &Harness, name: &str) -> Patient {
    h.store.register_patient(entry(name)).unwrap().patient
}

fn server_patient(name: &str, updated_at: DateTime<Utc>) -> Patient {
    let mut patient = Patient::new(name.into(), Gender::Male, Uuid::new_v4(), start());
    patient.date_of_birth = NaiveDate::from_ymd_opt(1980, 3, 1);
    patient.timestamps.updated_at = updated_at;
    patient
}

fn local_patient(h: &Harness, id: Uuid) -> Patient {
    h.store.get::<Patient>(id).unwrap().unwrap()
}

// =========================================================================
// Push
// =========================================================================

#[tokio::test]
async fn test_sync_all_pushes_every_pending_record() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");

    let report = h.sync.sync_all().await;

    assert!(report.is_complete());
    assert_eq!(report.total_pushed(), 3);
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Done);
    assert!(h
        .store
        .pending_counts()
        .unwrap()
        .iter()
        .all(|c| c.pending == 0 && c.invalid == 0));

    // Owners go before the rows that reference them
    let order: Vec<Table> = h.server.state().pushes.iter().map(|p| p.table).collect();
    assert_eq!(
        order,
        vec![Table::PatientAddress, Table::Patient, Table::PatientPhoneNumber]
    );
}

#[tokio::test]
async fn test_push_sends_bounded_batches() {
    let h = harness();
    for name in ["Anisha", "Bhavna", "Chetan"] {
        register(&h, name);
    }

    let summary = h.sync.push_table(Table::Patient).await.unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.done, 3);
    let pushes = h.server.pushes_for(Table::Patient);
    assert_eq!(pushes[0].records.len(), 2);
    assert_eq!(pushes[1].records.len(), 1);
}

#[tokio::test]
async fn test_failed_push_keeps_records_pending_and_resends_same_key() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    h.server.state().failing_push.insert(Table::Patient);

    let err = h.sync.push_table(Table::Patient).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport { table: Table::Patient, .. }));
    assert!(err.is_transient());
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Pending);

    h.server.state().failing_push.clear();
    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!(summary.done, 1);

    let pushes = h.server.pushes_for(Table::Patient);
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].idempotency_key, pushes[1].idempotency_key);
    assert_eq!(pushes[0].records, pushes[1].records);
}

#[tokio::test]
async fn test_resend_after_lost_ack_is_applied_once() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    h.server.state().lost_ack.insert(Table::Patient);

    // The server stored the batch but the reply never arrived
    let err = h.sync.push_table(Table::Patient).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Pending);
    assert_eq!(h.server.state().feed[&Table::Patient].len(), 1);

    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!((summary.done, summary.invalid), (1, 0));

    let pushes = h.server.pushes_for(Table::Patient);
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].idempotency_key, pushes[1].idempotency_key);

    let local = local_patient(&h, patient.id);
    assert_eq!(local.sync_status, SyncStatus::Done);
    assert_eq!(local.timestamps.updated_at, patient.timestamps.updated_at);
    let feed = h.server.state().feed[&Table::Patient].clone();
    assert_eq!(feed, vec![serde_json::to_value(&local).unwrap()]);
}

#[tokio::test]
async fn test_push_timeout_leaves_records_pending() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    h.server.state().hang = true;

    let err = h.sync.push_table(Table::Patient).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Timeout {
            table: Table::Patient,
            operation: "push",
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn test_rejected_records_become_invalid_and_are_not_retried() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    let context = ReadingContext {
        patient_id: patient.id,
        facility_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        recorded_at: None,
    };
    let accepted = h.store.record_blood_pressure(context, 140, 90).unwrap();
    let rejected = h.store.record_blood_pressure(context, 150, 95).unwrap();
    h.server
        .state()
        .reject
        .insert(rejected.id, "unknown facility".into());

    let summary = h.sync.push_table(Table::BloodPressure).await.unwrap();
    assert_eq!((summary.done, summary.invalid), (1, 1));

    let status = |id| {
        h.store
            .get::<BloodPressureMeasurement>(id)
            .unwrap()
            .unwrap()
            .sync_status
    };
    assert_eq!(status(accepted.id), SyncStatus::Done);
    assert_eq!(status(rejected.id), SyncStatus::Invalid);

    let counts = h.store.pending_counts().unwrap();
    let bp = counts
        .iter()
        .find(|c| c.table == Table::BloodPressure)
        .unwrap();
    assert_eq!((bp.pending, bp.invalid), (0, 1));

    let invalid: Vec<BloodPressureMeasurement> = h.store.invalid_records().unwrap();
    assert_eq!(invalid.len(), 1);
    assert_eq!(invalid[0].id, rejected.id);
    assert_eq!(
        h.store.invalid_ids(Table::BloodPressure).unwrap(),
        vec![rejected.id]
    );

    let again = h.sync.push_table(Table::BloodPressure).await.unwrap();
    assert_eq!(again.batches, 0);
    assert_eq!(h.server.pushes_for(Table::BloodPressure).len(), 1);
}

#[tokio::test]
async fn test_edit_during_push_stays_pending() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");

    let store = h.store.clone();
    let clock = h.clock.clone();
    let patient_id = patient.id;
    h.server.state().during_push = Some(Box::new(move || {
        clock.advance(Duration::seconds(1));
        store
            .update_patient_status(patient_id, PatientStatus::Dead)
            .unwrap();
    }));

    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!(summary.done, 0);

    let local = local_patient(&h, patient.id);
    assert_eq!(local.status, PatientStatus::Dead);
    assert_eq!(local.sync_status, SyncStatus::Pending);

    // The edit goes out on the next push
    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!(summary.done, 1);
    let pushes = h.server.pushes_for(Table::Patient);
    assert_eq!(pushes.last().unwrap().records[0]["status"], "dead");
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Done);
}

#[tokio::test]
async fn test_edit_in_same_millisecond_as_push_stays_pending() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");

    // The clock does not move between the push and the edit
    let store = h.store.clone();
    let patient_id = patient.id;
    h.server.state().during_push = Some(Box::new(move || {
        store
            .update_patient_status(patient_id, PatientStatus::Dead)
            .unwrap();
    }));

    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!(summary.done, 0);

    let local = local_patient(&h, patient.id);
    assert_eq!(local.status, PatientStatus::Dead);
    assert_eq!(local.sync_status, SyncStatus::Pending);
    assert!(local.timestamps.updated_at > patient.timestamps.updated_at);

    // The server's copy of the pushed version does not undo the edit
    let pulled = h.sync.pull_table(Table::Patient).await.unwrap();
    assert_eq!((pulled.applied, pulled.skipped), (0, 1));
    assert_eq!(local_patient(&h, patient.id).status, PatientStatus::Dead);

    let summary = h.sync.push_table(Table::Patient).await.unwrap();
    assert_eq!(summary.done, 1);
    let pushes = h.server.pushes_for(Table::Patient);
    assert_eq!(pushes.last().unwrap().records[0]["status"], "dead");
    assert_eq!(local_patient(&h, patient.id).sync_status, SyncStatus::Done);
}

// =========================================================================
// Pull
// =========================================================================

#[tokio::test]
async fn test_pull_never_overwrites_pending_local_edit() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    let mut server_copy = patient.clone();
    server_copy.full_name = "Anisha S".into();
    server_copy.timestamps.updated_at = start() + Duration::days(1);
    h.server
        .serve(Table::Patient, vec![serde_json::to_value(&server_copy).unwrap()]);

    let summary = h.sync.pull_table(Table::Patient).await.unwrap();

    assert_eq!((summary.applied, summary.skipped), (0, 1));
    let local = local_patient(&h, patient.id);
    assert_eq!(local.full_name, "Anisha Sharma");
    assert_eq!(local.sync_status, SyncStatus::Pending);
}

#[tokio::test]
async fn test_pull_overwrites_acknowledged_record() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");
    h.sync.push_table(Table::Patient).await.unwrap();

    let mut server_copy = patient.clone();
    server_copy.full_name = "Anisha S".into();
    server_copy.timestamps.updated_at = start() + Duration::hours(3);
    h.server
        .serve(Table::Patient, vec![serde_json::to_value(&server_copy).unwrap()]);

    let summary = h.sync.pull_table(Table::Patient).await.unwrap();

    // The pushed copy comes back first, then the server's edit
    assert_eq!(summary.applied, 2);
    let local = local_patient(&h, patient.id);
    assert_eq!(local.full_name, "Anisha S");
    assert_eq!(local.timestamps.updated_at, start() + Duration::hours(3));
    assert_eq!(local.sync_status, SyncStatus::Done);
}

#[tokio::test]
async fn test_second_sync_is_a_no_op() {
    let h = harness();
    let patient = register(&h, "Anisha Sharma");

    h.sync.sync_all().await;
    let after_first = local_patient(&h, patient.id);
    let pushes = h.server.state().pushes.len();

    let report = h.sync.sync_all().await;

    assert!(report.is_complete());
    assert_eq!(report.total_pushed(), 0);
    assert_eq!(report.total_pulled(), 0);
    assert_eq!(h.server.state().pushes.len(), pushes);
    assert_eq!(local_patient(&h, patient.id), after_first);
}

#[tokio::test]
async fn test_pull_pages_until_short_page() {
    let h = harness();
    let records: Vec<Value> = ["Anisha", "Bhavna", "Chetan", "Deepa", "Ekta"]
        .iter()
        .map(|name| serde_json::to_value(server_patient(name, start())).unwrap())
        .collect();
    h.server.serve(Table::Patient, records);

    let summary = h.sync.pull_table(Table::Patient).await.unwrap();

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.applied, 5);
    assert_eq!(
        h.store.read(|db| db.sync_cursor(Table::Patient)).unwrap(),
        Some("5".to_string())
    );
}

#[tokio::test]
async fn test_cursor_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store_config = StoreConfig {
        path: Some(dir.path().join("clinic.db")),
        ..StoreConfig::default()
    };
    let server = Arc::new(FakeServer::default());
    let records: Vec<Value> = ["Anisha", "Bhavna", "Chetan"]
        .iter()
        .map(|name| serde_json::to_value(server_patient(name, start())).unwrap())
        .collect();
    server.serve(Table::Patient, records);

    {
        let h = harness_with(Database::open_with(&store_config).unwrap(), server.clone());
        let summary = h.sync.pull_table(Table::Patient).await.unwrap();
        assert_eq!((summary.pages, summary.applied), (2, 3));
    }

    let h = harness_with(Database::open_with(&store_config).unwrap(), server.clone());
    assert_eq!(
        h.store.read(|db| db.sync_cursor(Table::Patient)).unwrap(),
        Some("3".to_string())
    );

    let summary = h.sync.pull_table(Table::Patient).await.unwrap();
    assert_eq!(summary.applied, 0);
    let last = server.state().pulls.last().cloned().unwrap();
    assert_eq!(last.cursor.as_deref(), Some("3"));
}

#[tokio::test]
async fn test_malformed_page_is_not_merged_and_cursor_stays() {
    let h = harness();
    let good = server_patient("Anisha", start());
    h.server.serve(
        Table::Patient,
        vec![
            serde_json::to_value(&good).unwrap(),
            json!({ "id": "not-a-uuid" }),
        ],
    );

    let err = h.sync.pull_table(Table::Patient).await.unwrap_err();

    assert!(matches!(err, SyncError::Payload { table: Table::Patient, .. }));
    assert!(!err.is_transient());
    assert!(h.store.get::<Patient>(good.id).unwrap().is_none());
    assert_eq!(h.store.read(|db| db.sync_cursor(Table::Patient)).unwrap(), None);
}

// =========================================================================
// Whole cycle
// =========================================================================

#[tokio::test]
async fn test_failing_table_does_not_abort_the_others() {
    let h = harness();
    register(&h, "Anisha Sharma");
    h.server.serve(
        Table::Patient,
        vec![serde_json::to_value(server_patient("Bhavna", start())).unwrap()],
    );
    h.server.state().failing_pull.insert(Table::BloodPressure);

    let report = h.sync.sync_all().await;

    assert!(!report.is_complete());
    let failed: Vec<Table> = report.failures().map(|t| t.table).collect();
    assert_eq!(failed, vec![Table::BloodPressure]);
    assert_eq!(report.total_pushed(), 3);
    // The preloaded patient plus the one just pushed
    assert_eq!(report.table(Table::Patient).unwrap().pull.applied, 2);
    assert!(h
        .server
        .state()
        .pulls
        .iter()
        .any(|p| p.table == Table::Appointment));
}

#[test]
fn test_invalid_config_is_refused() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = SyncConfig {
        push_batch_size: 0,
        ..SyncConfig::default()
    };
    assert!(SyncCoordinator::new(store, Arc::new(FakeServer::default()), config).is_err());
}
