//! ERDSYNC Test Utilities
//!
//! Shared test infrastructure for the ERDSYNC workspace:
//! - `FakeBackend`: in-memory backend of record with failure injection
//! - `RecordingPublisher`: realtime sink that keeps what was sent
//! - `ScriptedConnector`: SSE connector replaying canned frames
//! - Fixtures for common scenarios and proptest generators

pub use erdsync_client::api_client::{
    ApiClientError, CreateColumnRequest, CreateRelationRequest, CreateTableRequest,
    CreateVersionRequest, ErdBackend, UpdateColumnRequest, VersionSummary,
};
pub use erdsync_core::{
    Cardinality, Column, ColumnKind, ColumnPatch, EntityKind, LocalId, Point, RelationKind,
    RemoteKey, SqlDialect, SyncState, Table, TableColor, TableLock,
};
pub use erdsync_events::{
    ColumnPayload, ProjectErd, RelationPayload, SseFrame, TablePayload, WsEnvelope, WsEvent,
};

use async_trait::async_trait;
use erdsync_client::realtime::RealtimeSink;
use erdsync_client::sse_client::{SseConnector, SseStream};
use erdsync_core::{
    DEFAULT_COLUMN_LOGICAL_NAME, DEFAULT_COLUMN_PHYSICAL_NAME, DEFAULT_DATA_TYPE,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// FAKE BACKEND
// ============================================================================

/// Backend operations, for failure injection and call filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateTable,
    GetProject,
    DeleteTable,
    CreateColumn,
    UpdateColumn,
    DeleteColumn,
    CreateRelation,
    ExportSql,
    CreateVersion,
    Heartbeat,
}

/// One request as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateTable(CreateTableRequest),
    GetProject(i64),
    DeleteTable(RemoteKey),
    CreateColumn {
        table_key: RemoteKey,
        request: CreateColumnRequest,
    },
    UpdateColumn {
        column_key: RemoteKey,
        request: UpdateColumnRequest,
    },
    DeleteColumn(RemoteKey),
    CreateRelation(CreateRelationRequest),
    ExportSql(SqlDialect),
    CreateVersion(CreateVersionRequest),
    Heartbeat {
        table_key: RemoteKey,
        email: String,
    },
}

impl BackendCall {
    pub fn operation(&self) -> Operation {
        match self {
            BackendCall::CreateTable(_) => Operation::CreateTable,
            BackendCall::GetProject(_) => Operation::GetProject,
            BackendCall::DeleteTable(_) => Operation::DeleteTable,
            BackendCall::CreateColumn { .. } => Operation::CreateColumn,
            BackendCall::UpdateColumn { .. } => Operation::UpdateColumn,
            BackendCall::DeleteColumn(_) => Operation::DeleteColumn,
            BackendCall::CreateRelation(_) => Operation::CreateRelation,
            BackendCall::ExportSql(_) => Operation::ExportSql,
            BackendCall::CreateVersion(_) => Operation::CreateVersion,
            BackendCall::Heartbeat { .. } => Operation::Heartbeat,
        }
    }
}

#[derive(Debug)]
struct FakeState {
    next_key: i64,
    calls: Vec<BackendCall>,
    failures: HashSet<Operation>,
    echo_correlation: bool,
    latency: Duration,
    project: ProjectErd,
}

/// In-memory backend of record.
///
/// Keys are handed out sequentially from 1 unless `starting_key` says
/// otherwise. Created entities are kept, so `get_project` reflects them.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_key: 1,
                calls: Vec::new(),
                failures: HashSet::new(),
                echo_correlation: true,
                latency: Duration::ZERO,
                project: ProjectErd::default(),
            }),
        }
    }

    /// Next key handed out.
    pub fn starting_key(self, key: i64) -> Self {
        locked(&self.state).next_key = key;
        self
    }

    /// Respond without echoing `clientRequestId`.
    pub fn without_correlation_echo(self) -> Self {
        locked(&self.state).echo_correlation = false;
        self
    }

    /// Delay every response by `latency` of tokio time.
    pub fn with_latency(self, latency: Duration) -> Self {
        locked(&self.state).latency = latency;
        self
    }

    /// Seed the stored project. Later keys are issued past the highest
    /// key it already uses.
    pub fn with_project(self, project: ProjectErd) -> Self {
        {
            let mut state = locked(&self.state);
            let highest = project
                .tables
                .iter()
                .map(|t| t.table_key)
                .chain(project.columns.iter().map(|c| c.column_key))
                .chain(project.relations.iter().map(|r| r.relation_key))
                .max()
                .unwrap_or(0);
            state.next_key = state.next_key.max(highest + 1);
            state.project = project;
        }
        self
    }

    /// Make `operation` fail until `succeed` is called.
    pub fn fail(&self, operation: Operation) {
        locked(&self.state).failures.insert(operation);
    }

    pub fn succeed(&self, operation: Operation) {
        locked(&self.state).failures.remove(&operation);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        locked(&self.state).calls.clone()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<BackendCall> {
        locked(&self.state)
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .cloned()
            .collect()
    }

    /// Table keys heartbeated so far, in order.
    pub fn heartbeats(&self) -> Vec<RemoteKey> {
        locked(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Heartbeat { table_key, .. } => Some(*table_key),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        locked(&self.state).calls.clear();
    }

    pub fn project(&self) -> ProjectErd {
        locked(&self.state).project.clone()
    }

    /// Record the call and wait out the latency. Fails if injected.
    async fn enter(&self, call: BackendCall) -> Result<(), ApiClientError> {
        let operation = call.operation();
        let latency = {
            let mut state = locked(&self.state);
            state.calls.push(call);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if locked(&self.state).failures.contains(&operation) {
            return Err(ApiClientError::InvalidResponse(format!(
                "injected failure: {operation:?}"
            )));
        }
        Ok(())
    }

    fn issue_key(state: &mut FakeState) -> i64 {
        let key = state.next_key;
        state.next_key += 1;
        key
    }
}

#[async_trait]
impl ErdBackend for FakeBackend {
    async fn create_table(
        &self,
        project_key: i64,
        request: &CreateTableRequest,
    ) -> Result<TablePayload, ApiClientError> {
        self.enter(BackendCall::CreateTable(request.clone())).await?;
        let mut state = locked(&self.state);
        let payload = TablePayload {
            table_key: Self::issue_key(&mut state),
            project_key: Some(project_key),
            logical_name: request.logical_name.clone(),
            physical_name: request.physical_name.clone(),
            x_position: request.x_position,
            y_position: request.y_position,
            color_hex: Some(request.color_hex.clone()),
            client_request_id: state.echo_correlation.then_some(request.client_request_id),
            columns: None,
        };
        state.project.tables.push(payload.clone());
        Ok(payload)
    }

    async fn get_project(&self, project_key: i64) -> Result<ProjectErd, ApiClientError> {
        self.enter(BackendCall::GetProject(project_key)).await?;
        let mut project = locked(&self.state).project.clone();
        project.project_key = project_key;
        Ok(project)
    }

    async fn delete_table(&self, table_key: RemoteKey) -> Result<(), ApiClientError> {
        self.enter(BackendCall::DeleteTable(table_key)).await?;
        let mut state = locked(&self.state);
        state.project.tables.retain(|t| t.table_key != table_key.get());
        state.project.columns.retain(|c| c.table_key != table_key.get());
        Ok(())
    }

    async fn create_column(
        &self,
        table_key: RemoteKey,
        request: &CreateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError> {
        self.enter(BackendCall::CreateColumn {
            table_key,
            request: request.clone(),
        })
        .await?;
        let mut state = locked(&self.state);
        let order = state
            .project
            .columns
            .iter()
            .filter(|c| c.table_key == table_key.get())
            .count();
        let payload = ColumnPayload {
            column_key: Self::issue_key(&mut state),
            table_key: table_key.get(),
            logical_name: DEFAULT_COLUMN_LOGICAL_NAME.to_string(),
            physical_name: DEFAULT_COLUMN_PHYSICAL_NAME.to_string(),
            data_type: DEFAULT_DATA_TYPE.to_string(),
            data_detail: None,
            is_nullable: !request.is_primary_key,
            is_primary_key: request.is_primary_key,
            is_foreign_key: request.is_foreign_key,
            is_unique: request.is_primary_key,
            is_incremental: false,
            default_value: None,
            comment: None,
            column_order: Some(order),
            client_request_id: state.echo_correlation.then_some(request.client_request_id),
        };
        state.project.columns.push(payload.clone());
        Ok(payload)
    }

    async fn update_column(
        &self,
        column_key: RemoteKey,
        request: &UpdateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError> {
        self.enter(BackendCall::UpdateColumn {
            column_key,
            request: request.clone(),
        })
        .await?;
        let mut state = locked(&self.state);
        let stored = state
            .project
            .columns
            .iter_mut()
            .find(|c| c.column_key == column_key.get())
            .ok_or_else(|| ApiClientError::InvalidResponse(format!("no column {column_key}")))?;
        if let Some(name) = &request.logical_name {
            stored.logical_name = name.clone();
        }
        if let Some(name) = &request.physical_name {
            stored.physical_name = name.clone();
        }
        if let Some(data_type) = &request.data_type {
            stored.data_type = data_type.clone();
            stored.data_detail = request.data_detail.clone();
        }
        if let Some(nullable) = request.is_nullable {
            stored.is_nullable = nullable;
        }
        if let Some(pk) = request.is_primary_key {
            stored.is_primary_key = pk;
        }
        if let Some(fk) = request.is_foreign_key {
            stored.is_foreign_key = fk;
        }
        if let Some(default_value) = &request.default_value {
            stored.default_value = Some(default_value.clone());
        }
        if let Some(comment) = &request.comment {
            stored.comment = Some(comment.clone());
        }
        Ok(stored.clone())
    }

    async fn delete_column(&self, column_key: RemoteKey) -> Result<(), ApiClientError> {
        self.enter(BackendCall::DeleteColumn(column_key)).await?;
        locked(&self.state)
            .project
            .columns
            .retain(|c| c.column_key != column_key.get());
        Ok(())
    }

    async fn create_relation(
        &self,
        project_key: i64,
        request: &CreateRelationRequest,
    ) -> Result<RelationPayload, ApiClientError> {
        self.enter(BackendCall::CreateRelation(request.clone())).await?;
        let mut state = locked(&self.state);
        let payload = RelationPayload {
            relation_key: Self::issue_key(&mut state),
            project_key: Some(project_key),
            from_table_key: request.from_table_key,
            from_column_key: request.from_column_key,
            to_table_key: request.to_table_key,
            to_column_key: None,
            relation_type: request.relation_type.clone(),
            constraint_name: Some(request.constraint_name.clone()),
            on_delete_action: None,
            on_update_action: None,
            client_request_id: state.echo_correlation.then_some(request.client_request_id),
        };
        state.project.relations.push(payload.clone());
        Ok(payload)
    }

    async fn export_sql(
        &self,
        project_key: i64,
        dialect: SqlDialect,
    ) -> Result<String, ApiClientError> {
        self.enter(BackendCall::ExportSql(dialect)).await?;
        let state = locked(&self.state);
        let mut sql = format!("-- project {project_key} ({})\n", dialect.as_query_str());
        for table in &state.project.tables {
            sql.push_str(&format!("CREATE TABLE {} ();\n", table.physical_name));
        }
        Ok(sql)
    }

    async fn create_version(
        &self,
        _project_key: i64,
        request: &CreateVersionRequest,
    ) -> Result<VersionSummary, ApiClientError> {
        self.enter(BackendCall::CreateVersion(request.clone())).await?;
        let mut state = locked(&self.state);
        Ok(VersionSummary {
            version_key: Self::issue_key(&mut state),
            name: request.name.clone(),
            is_public: request.is_public,
        })
    }

    async fn heartbeat(&self, table_key: RemoteKey, email: &str) -> Result<(), ApiClientError> {
        self.enter(BackendCall::Heartbeat {
            table_key,
            email: email.to_string(),
        })
        .await
    }
}

// ============================================================================
// RECORDING PUBLISHER
// ============================================================================

/// Realtime sink that keeps every accepted event. Connected by default.
#[derive(Debug)]
pub struct RecordingPublisher {
    connected: AtomicBool,
    events: Mutex<Vec<WsEvent>>,
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<WsEvent> {
        locked(&self.events).clone()
    }

    /// Accepted events with the given wire type, e.g. `"table-create"`.
    pub fn events_of(&self, event_type: &str) -> Vec<WsEvent> {
        locked(&self.events)
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        locked(&self.events).clear();
    }
}

impl RealtimeSink for RecordingPublisher {
    fn send(&self, event: WsEvent) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        locked(&self.events).push(event);
        true
    }
}

// ============================================================================
// SCRIPTED SSE CONNECTOR
// ============================================================================

#[derive(Debug)]
enum Script {
    Frames(Vec<SseFrame>),
    Refuse,
}

/// Replays one script entry per connect. Past the end of the script,
/// connects succeed with a stream that stays silent.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    paths: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next connect yields `frames`, then the stream ends.
    pub fn push_stream(&self, frames: Vec<SseFrame>) -> &Self {
        locked(&self.script).push_back(Script::Frames(frames));
        self
    }

    /// Next connect fails.
    pub fn push_refusal(&self) -> &Self {
        locked(&self.script).push_back(Script::Refuse);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        locked(&self.paths).clone()
    }
}

#[async_trait]
impl SseConnector for ScriptedConnector {
    async fn connect(&self, path: &str) -> Result<SseStream, ApiClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        locked(&self.paths).push(path.to_string());
        let next = locked(&self.script).pop_front();
        match next {
            Some(Script::Frames(frames)) => Ok(Box::pin(futures_util::stream::iter(
                frames.into_iter().map(Ok::<SseFrame, ApiClientError>),
            ))),
            Some(Script::Refuse) => Err(ApiClientError::InvalidResponse(
                "scripted refusal".to_string(),
            )),
            None => Ok(Box::pin(futures_util::stream::pending::<
                Result<SseFrame, ApiClientError>,
            >())),
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use erdsync_client::config::{
        AuthConfig, ErdsyncConfig, LockConfig, LoggingConfig, RealtimeConfig, ReconnectConfig,
        StreamConfig, UserConfig, ViewerConfig,
    };
    use erdsync_core::ColumnField;

    pub const PROJECT_KEY: i64 = 7;
    pub const SELF_EMAIL: &str = "me@example.com";
    pub const SELF_NAME: &str = "Me";
    pub const SELF_USER_KEY: i64 = 100;
    pub const PEER_EMAIL: &str = "kim@example.com";
    pub const PEER_NAME: &str = "Kim";
    pub const PEER_USER_KEY: i64 = 200;

    /// Valid configuration with short timers and a viewer key.
    pub fn test_config() -> ErdsyncConfig {
        ErdsyncConfig {
            api_base_url: "http://localhost:8080".to_string(),
            ws_endpoint: "ws://localhost:8080/ws".to_string(),
            project_key: PROJECT_KEY,
            request_timeout_ms: 5_000,
            auth: AuthConfig {
                access_token: "test-token".to_string(),
            },
            user: UserConfig {
                email: SELF_EMAIL.to_string(),
                name: SELF_NAME.to_string(),
                user_key: Some(SELF_USER_KEY),
            },
            reconnect: ReconnectConfig {
                initial_ms: 250,
                max_ms: 5_000,
                multiplier: 2.0,
                jitter_ms: 0,
            },
            locks: LockConfig {
                heartbeat_interval_ms: 10_000,
                grant_timeout_ms: 5_000,
            },
            realtime: RealtimeConfig {
                move_throttle_ms: 50,
                stomp_heartbeat_ms: 10_000,
            },
            streams: StreamConfig {
                reconnect_delay_ms: 3_000,
            },
            viewer: Some(ViewerConfig {
                viewer_key: "viewer-abc".to_string(),
            }),
            logging: LoggingConfig { json: false },
        }
    }

    /// The same configuration as TOML text.
    pub fn test_config_toml() -> String {
        format!(
            r#"api_base_url = "http://localhost:8080"
ws_endpoint = "ws://localhost:8080/ws"
project_key = {PROJECT_KEY}
request_timeout_ms = 5000

[auth]
access_token = "test-token"

[user]
email = "{SELF_EMAIL}"
name = "{SELF_NAME}"
user_key = {SELF_USER_KEY}

[reconnect]
initial_ms = 250
max_ms = 5000
multiplier = 2.0
jitter_ms = 0

[locks]
heartbeat_interval_ms = 10000
grant_timeout_ms = 5000

[realtime]
move_throttle_ms = 50
stomp_heartbeat_ms = 10000

[streams]
reconnect_delay_ms = 3000

[viewer]
viewer_key = "viewer-abc"
"#
        )
    }

    pub fn table_payload(key: i64, name: &str) -> TablePayload {
        TablePayload {
            table_key: key,
            project_key: Some(PROJECT_KEY),
            logical_name: name.to_string(),
            physical_name: name.to_lowercase(),
            x_position: 100.0,
            y_position: 100.0,
            color_hex: None,
            client_request_id: None,
            columns: None,
        }
    }

    pub fn column_payload(key: i64, table_key: i64, name: &str, primary: bool) -> ColumnPayload {
        ColumnPayload {
            column_key: key,
            table_key,
            logical_name: name.to_string(),
            physical_name: name.to_lowercase(),
            data_type: if primary { "BIGINT" } else { "VARCHAR" }.to_string(),
            data_detail: None,
            is_nullable: !primary,
            is_primary_key: primary,
            is_foreign_key: false,
            is_unique: primary,
            is_incremental: false,
            default_value: None,
            comment: None,
            column_order: None,
            client_request_id: None,
        }
    }

    pub fn relation_payload(key: i64, from_table: i64, to_table: i64) -> RelationPayload {
        RelationPayload {
            relation_key: key,
            project_key: Some(PROJECT_KEY),
            from_table_key: from_table,
            from_column_key: None,
            to_table_key: to_table,
            to_column_key: None,
            relation_type: "ONE_TO_MANY".to_string(),
            constraint_name: None,
            on_delete_action: None,
            on_update_action: None,
            client_request_id: None,
        }
    }

    /// Synced table `table-{key}` with a primary key column `column-{key}0`.
    pub fn synced_table(key: i64, name: &str) -> Table {
        let mut table = table_payload(key, name).to_table(vec![]);
        let mut pk = column_payload(key * 10, key, "id", true).to_column();
        pk.display_order = 0;
        table.columns.push(pk);
        table
    }

    /// Project listing with two synced tables, each with a primary key.
    pub fn two_table_project() -> ProjectErd {
        ProjectErd {
            project_key: PROJECT_KEY,
            tables: vec![table_payload(1, "Users"), table_payload(2, "Orders")],
            columns: vec![
                column_payload(10, 1, "id", true),
                column_payload(20, 2, "id", true),
            ],
            relations: vec![],
        }
    }

    /// STOMP MESSAGE body for `event` sent by `user_key`.
    pub fn envelope(event: WsEvent, user_key: Option<i64>) -> String {
        let envelope = WsEnvelope {
            project_key: PROJECT_KEY,
            user_key,
            event,
        };
        serde_json::to_string(&envelope).unwrap()
    }

    pub fn sse_frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
            retry: None,
        }
    }

    /// Every editable column field.
    pub fn all_column_fields() -> Vec<ColumnField> {
        vec![
            ColumnField::LogicalName,
            ColumnField::PhysicalName,
            ColumnField::DataType,
            ColumnField::DataDetail,
            ColumnField::Nullable,
            ColumnField::PrimaryKey,
            ColumnField::ForeignKey,
            ColumnField::DefaultValue,
            ColumnField::Comment,
        ]
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for document values.

    use super::*;
    use proptest::prelude::*;

    /// Non-blank table name.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_ ]{0,15}"
    }

    pub fn arb_point() -> impl Strategy<Value = Point> {
        (-2_000.0f64..2_000.0, -2_000.0f64..2_000.0).prop_map(|(x, y)| Point::new(x, y))
    }

    pub fn arb_color() -> impl Strategy<Value = TableColor> {
        (0usize..TableColor::PALETTE.len()).prop_map(TableColor::cycle)
    }

    pub fn arb_column_kind() -> impl Strategy<Value = ColumnKind> {
        prop_oneof![Just(ColumnKind::PrimaryKey), Just(ColumnKind::Regular)]
    }

    pub fn arb_column_patch() -> impl Strategy<Value = ColumnPatch> {
        (
            proptest::option::of("[a-z]{1,8}"),
            proptest::option::of("[a-z_]{1,8}"),
            proptest::option::of(any::<bool>()),
            proptest::option::of("[a-z ]{0,12}"),
        )
            .prop_map(|(logical, physical, nullable, comment)| ColumnPatch {
                logical_name: logical,
                physical_name: physical,
                nullable,
                comment,
                ..ColumnPatch::default()
            })
    }

    pub fn arb_cardinality() -> impl Strategy<Value = Cardinality> {
        prop_oneof![
            Just(Cardinality::One),
            Just(Cardinality::ExactlyOne),
            Just(Cardinality::OneOrMany),
            Just(Cardinality::ZeroOrOne),
            Just(Cardinality::ZeroOrOneToOne),
            Just(Cardinality::ZeroOrMany),
        ]
    }
}
