//! Optimistic edits against the backend of record.
//!
//! Every edit lands in the local document first and is then pushed to the
//! backend. Creates carry a correlation token so the response can find its
//! provisional entity again; a failed create removes it. Deletes of synced
//! entities go through a pending state that is purged on success and
//! restored on failure. Column edits are buffered per field and sent when
//! the user commits.
//!
//! None of the async operations return backend errors. Failures are logged
//! and compensated locally.

use crate::api_client::{
    ApiClientError, CreateColumnRequest, CreateRelationRequest, CreateTableRequest,
    CreateVersionRequest, ErdBackend, RelationEndpoints, UpdateColumnRequest, VersionSummary,
};
use crate::document::DocumentHandle;
use crate::realtime::RealtimePublisher;
use erdsync_core::schema::to_version_schema;
use erdsync_core::{
    AbsorbPolicy, Cardinality, Column, ColumnField, ColumnKind, ColumnPatch, DocumentStore,
    EntityRef, LocalId, Point, RelationKind, RemoteKey, SqlDialect, StoreError, StoreResult,
    SyncState, Table, TableColor,
};
use erdsync_events::{ColumnPayload, TablePayload};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

const ALL_COLUMN_FIELDS: [ColumnField; 9] = [
    ColumnField::LogicalName,
    ColumnField::PhysicalName,
    ColumnField::DataType,
    ColumnField::DataDetail,
    ColumnField::Nullable,
    ColumnField::PrimaryKey,
    ColumnField::ForeignKey,
    ColumnField::DefaultValue,
    ColumnField::Comment,
];

type ColumnAddress = (LocalId, LocalId);

/// Edits applied locally but not yet sent.
#[derive(Debug, Default)]
struct PendingEdits {
    columns: HashMap<ColumnAddress, BTreeSet<ColumnField>>,
    tables: BTreeSet<LocalId>,
}

/// Editing surface of one open project. Cheap to clone.
#[derive(Clone)]
pub struct Workspace {
    document: DocumentHandle,
    backend: Arc<dyn ErdBackend>,
    publisher: RealtimePublisher,
    project_key: i64,
    pending: Arc<Mutex<PendingEdits>>,
}

impl Workspace {
    pub fn new(
        document: DocumentHandle,
        backend: Arc<dyn ErdBackend>,
        publisher: RealtimePublisher,
        project_key: i64,
    ) -> Self {
        Self {
            document,
            backend,
            publisher,
            project_key,
            pending: Arc::default(),
        }
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.document
    }

    pub fn project_key(&self) -> i64 {
        self.project_key
    }

    fn pending(&self) -> MutexGuard<'_, PendingEdits> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // PROJECT
    // ========================================================================

    /// Replace the document with the backend's copy of the project.
    pub async fn load(&self) -> Result<(), ApiClientError> {
        let project = self.backend.get_project(self.project_key).await?;
        let (tables, relations) = project.into_document();
        info!(
            project_key = self.project_key,
            tables = tables.len(),
            relations = relations.len(),
            "Project loaded"
        );
        self.document
            .update(|store| store.replace_document(tables, relations));
        *self.pending() = PendingEdits::default();
        Ok(())
    }

    pub async fn export_sql(&self, dialect: SqlDialect) -> Result<String, ApiClientError> {
        self.backend.export_sql(self.project_key, dialect).await
    }

    /// Save the synced part of the document as a named version.
    pub async fn save_version(
        &self,
        name: &str,
        description: Option<&str>,
        is_public: bool,
    ) -> Result<VersionSummary, ApiClientError> {
        let schema_data = self.document.read(to_version_schema);
        let request = CreateVersionRequest {
            name: name.to_string(),
            description: description.map(str::to_string),
            schema_data,
            is_public,
        };
        let version = self
            .backend
            .create_version(self.project_key, &request)
            .await?;
        info!(version_key = version.version_key, name, "Version saved");
        Ok(version)
    }

    // ========================================================================
    // TABLES
    // ========================================================================

    /// Create a table. Returns its local id at once; blank names are
    /// refused with `None`.
    pub async fn create_table(&self, name: &str) -> Option<LocalId> {
        let (id, request) = self.document.update(|store| {
            let id = store.create_table(name)?;
            let request = CreateTableRequest::from_table(self.project_key, store.table(&id)?);
            Some((id, request))
        })?;
        self.create_table_remote(&id, &request).await;
        Some(id)
    }

    async fn create_table_remote(
        &self,
        id: &LocalId,
        request: &CreateTableRequest,
    ) -> Option<RemoteKey> {
        match self.backend.create_table(self.project_key, request).await {
            Ok(payload) => self.absorb_table(id, payload),
            Err(err) => {
                warn!(table_id = %id, error = %err, "Table create failed, rolled back");
                self.document.update(|store| store.delete_table(id));
                None
            }
        }
    }

    fn absorb_table(&self, id: &LocalId, payload: TablePayload) -> Option<RemoteKey> {
        let key = RemoteKey::new(payload.table_key);
        let absorbed = self.document.update(|store| -> StoreResult<Option<Table>> {
            let absorbed = store.confirm_table(&payload.to_confirmed(), AbsorbPolicy::ExistingOnly)?;
            Ok(absorbed.and_then(|a| store.table(a.id()).cloned()))
        });
        match absorbed {
            Ok(Some(table)) => {
                debug!(table_id = %table.id, table_key = %key, "Table confirmed");
                self.publisher.table_created(&table, key);
                Some(key)
            }
            Ok(None) => {
                warn!(table_id = %id, table_key = %key, "Table confirmation matched nothing locally");
                None
            }
            Err(err) => {
                warn!(table_id = %id, error = %err, "Table confirmation rejected");
                None
            }
        }
    }

    /// Delete a table. Unsaved tables go at once; saved ones wait for the
    /// backend and come back if it refuses.
    pub async fn delete_table(&self, id: &LocalId) {
        let entity = EntityRef::Table(id.clone());
        let key = self.begin_delete(&entity, |store| store.table(id).map(|t| t.remote_key));
        self.pending().columns.retain(|(table, _), _| table != id);
        self.pending().tables.remove(id);
        let Some(key) = key else {
            return;
        };
        match self.backend.delete_table(key).await {
            Ok(()) => {
                self.document.update(|store| store.purge(&entity));
                info!(table_id = %id, table_key = %key, "Table deleted");
                self.publisher.table_deleted(key);
            }
            Err(err) => self.restore_after_failed_delete(&entity, err),
        }
    }

    /// Drop an unsaved entity outright or mark a saved one as deleting.
    /// Returns the remote key when a backend delete must follow.
    fn begin_delete(
        &self,
        entity: &EntityRef,
        remote_key: impl FnOnce(&DocumentStore) -> Option<Option<RemoteKey>>,
    ) -> Option<RemoteKey> {
        self.document.update(|store| match remote_key(store) {
            None => None,
            Some(None) => {
                store.purge(entity);
                debug!(entity = ?entity, "Unsaved entity removed");
                None
            }
            Some(Some(key)) => {
                if store.sync_state(entity) == Some(SyncState::Deleting) {
                    return None;
                }
                store.mark_deleting(entity).ok()?;
                Some(key)
            }
        })
    }

    fn restore_after_failed_delete(&self, entity: &EntityRef, err: ApiClientError) {
        warn!(entity = ?entity, error = %err, "Delete failed, entity restored");
        if let Err(restore) = self.document.update(|store| store.restore_synced(entity)) {
            debug!(entity = ?entity, error = %restore, "Entity vanished before restore");
        }
    }

    /// Continuous drag. Broadcasts are throttled.
    pub fn move_table(&self, id: &LocalId, position: Point) -> bool {
        let key = self.document.update(|store| {
            if !store.update_table_position(id, position) {
                return None;
            }
            Some(store.table(id)?.remote_key)
        });
        match key {
            Some(Some(key)) => {
                self.publisher.table_move(key, position);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// End of a drag. Always broadcast.
    pub fn finish_move(&self, id: &LocalId, position: Point) -> bool {
        let key = self.document.update(|store| {
            if !store.update_table_position(id, position) {
                return None;
            }
            Some(store.table(id)?.remote_key)
        });
        match key {
            Some(Some(key)) => {
                self.publisher.table_move_end(key, position);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    pub fn rename_table(&self, id: &LocalId, name: &str) -> bool {
        self.edit_table(id, |store| store.update_table_name(id, name))
    }

    pub fn set_table_identifier(&self, id: &LocalId, identifier: &str) -> bool {
        self.edit_table(id, |store| store.update_table_identifier(id, identifier))
    }

    pub fn set_table_color(&self, id: &LocalId, color: TableColor) -> bool {
        self.edit_table(id, |store| store.update_table_color(id, color))
    }

    fn edit_table(
        &self,
        id: &LocalId,
        edit: impl FnOnce(&mut DocumentStore) -> bool,
    ) -> bool {
        let changed = self.document.update(edit);
        if changed {
            self.pending().tables.insert(id.clone());
        }
        changed
    }

    /// Broadcast buffered name, identifier and color edits.
    pub fn commit_table(&self, id: &LocalId) -> bool {
        if !self.pending().tables.remove(id) {
            return false;
        }
        let table = self.document.read(|store| store.table(id).cloned());
        match table {
            Some(table) => match table.remote_key {
                Some(key) => self.publisher.table_updated(&table, key),
                None => {
                    debug!(table_id = %id, "Unsaved table edit kept local");
                    false
                }
            },
            None => false,
        }
    }

    /// Copy a table with its columns and save the copy.
    pub async fn duplicate_table(&self, id: &LocalId) -> Option<LocalId> {
        let (copy, request) = self.document.update(|store| {
            let copy = store.duplicate_table(id)?;
            let request = CreateTableRequest::from_table(self.project_key, store.table(&copy)?);
            Some((copy, request))
        })?;
        let Some(table_key) = self.create_table_remote(&copy, &request).await else {
            return Some(copy);
        };

        let columns: Vec<(LocalId, CreateColumnRequest)> = self.document.read(|store| {
            store
                .table(&copy)
                .map(|table| {
                    table
                        .columns
                        .iter()
                        .map(|c| (c.id.clone(), CreateColumnRequest::from_column(c)))
                        .collect()
                })
                .unwrap_or_default()
        });
        for (column, request) in columns {
            self.pending()
                .columns
                .insert((copy.clone(), column.clone()), ALL_COLUMN_FIELDS.into());
            self.create_column_remote(&copy, &column, table_key, &request)
                .await;
        }
        Some(copy)
    }

    // ========================================================================
    // COLUMNS
    // ========================================================================

    /// Append a column. Columns of unsaved tables stay local.
    pub async fn add_column(&self, table: &LocalId, kind: ColumnKind) -> Option<LocalId> {
        let (column, table_key, request) = self.document.update(|store| {
            let column = store.add_column(table, kind)?;
            let owner = store.table(table)?;
            let request = CreateColumnRequest::from_column(owner.column(&column)?);
            Some((column, owner.remote_key, request))
        })?;
        match table_key {
            Some(table_key) => {
                self.create_column_remote(table, &column, table_key, &request)
                    .await
            }
            None => debug!(table_id = %table, column_id = %column, "Column of unsaved table kept local"),
        }
        Some(column)
    }

    async fn create_column_remote(
        &self,
        table: &LocalId,
        column: &LocalId,
        table_key: RemoteKey,
        request: &CreateColumnRequest,
    ) {
        match self.backend.create_column(table_key, request).await {
            Ok(payload) => {
                if self.absorb_column(table, column, payload) {
                    self.commit_column(table, column).await;
                }
            }
            Err(err) => {
                warn!(column_id = %column, error = %err, "Column create failed, rolled back");
                self.document
                    .update(|store| store.delete_column(table, column));
                self.pending()
                    .columns
                    .remove(&(table.clone(), column.clone()));
            }
        }
    }

    /// Fold a create response into the provisional column. Edits made while
    /// the create was in flight survive. Returns true when edits are
    /// waiting to be sent.
    fn absorb_column(&self, table: &LocalId, column: &LocalId, payload: ColumnPayload) -> bool {
        let key = RemoteKey::new(payload.column_key);
        let table_key = RemoteKey::new(payload.table_key);
        let dirty: Vec<ColumnField> = self
            .pending()
            .columns
            .get(&(table.clone(), column.clone()))
            .map(|fields| fields.iter().copied().collect())
            .unwrap_or_default();

        let absorbed = self.document.update(|store| -> StoreResult<Option<Column>> {
            let in_flight = store.column(table, column).map(|c| c.patch_for(&dirty));
            let absorbed =
                store.confirm_column(&payload.to_confirmed(), AbsorbPolicy::ExistingOnly)?;
            let Some(absorbed) = absorbed else {
                return Ok(None);
            };
            if absorbed.id() == column {
                if let Some(patch) = in_flight.filter(|p| !p.is_empty()) {
                    store.update_column(table, column, &patch)?;
                }
            }
            Ok(store.column(table, absorbed.id()).cloned())
        });

        match absorbed {
            Ok(Some(confirmed)) => {
                debug!(column_id = %confirmed.id, column_key = %key, "Column confirmed");
                self.publisher.column_created(&confirmed, key, table_key);
                !dirty.is_empty()
            }
            Ok(None) => {
                warn!(column_id = %column, column_key = %key, "Column confirmation matched nothing locally");
                false
            }
            Err(err) => {
                warn!(column_id = %column, error = %err, "Column confirmation rejected");
                false
            }
        }
    }

    /// Apply a keystroke-level edit locally and remember which fields
    /// changed.
    pub fn edit_column(
        &self,
        table: &LocalId,
        column: &LocalId,
        patch: &ColumnPatch,
    ) -> StoreResult<Vec<ColumnField>> {
        let changed = self
            .document
            .update(|store| store.update_column(table, column, patch))?;
        if !changed.is_empty() {
            self.pending()
                .columns
                .entry((table.clone(), column.clone()))
                .or_default()
                .extend(changed.iter().copied());
        }
        Ok(changed)
    }

    /// Send the buffered edits of one column as a single update.
    pub async fn commit_column(&self, table: &LocalId, column: &LocalId) {
        let address = (table.clone(), column.clone());
        let Some(fields) = self.pending().columns.remove(&address) else {
            return;
        };
        let fields: Vec<ColumnField> = fields.into_iter().collect();
        let prepared = self.document.read(|store| {
            let owner = store.table(table)?;
            let current = owner.column(column)?;
            Some((
                owner.remote_key,
                current.remote_key,
                UpdateColumnRequest::from_column(current, &fields),
            ))
        });

        let (table_key, column_key, request) = match prepared {
            Some((Some(table_key), Some(column_key), request)) => (table_key, column_key, request),
            Some(_) => {
                debug!(column_id = %column, "Column not saved yet, edits kept");
                self.pending()
                    .columns
                    .entry(address)
                    .or_default()
                    .extend(fields);
                return;
            }
            None => return,
        };

        match self.backend.update_column(column_key, &request).await {
            Ok(payload) => {
                let retyped = self.pending().columns.contains_key(&address);
                let current = self.document.update(|store| {
                    if !retyped {
                        if let Err(err) =
                            store.confirm_column(&payload.to_confirmed(), AbsorbPolicy::ExistingOnly)
                        {
                            debug!(column_key = %column_key, error = %err, "Update response not merged");
                        }
                    }
                    store.column(table, column).cloned()
                });
                debug!(column_key = %column_key, fields = fields.len(), "Column updated");
                if let Some(current) = current {
                    self.publisher.column_updated(&current, column_key, table_key);
                }
            }
            Err(err) => {
                warn!(column_key = %column_key, error = %err, "Column update failed");
                self.pending()
                    .columns
                    .entry(address)
                    .or_default()
                    .extend(fields);
            }
        }
    }

    /// Move a column within its table. Broadcast when the column is saved.
    pub fn reorder_column(&self, table: &LocalId, column: &LocalId, target_index: usize) -> bool {
        let moved = self.document.update(|store| {
            if !store.reorder_column(table, column, target_index) {
                return None;
            }
            let current = store.column(table, column)?;
            Some((current.remote_key, current.display_order))
        });
        match moved {
            Some((Some(key), order)) => {
                self.publisher.column_reordered(key, order);
                true
            }
            Some((None, _)) => true,
            None => false,
        }
    }

    pub async fn delete_column(&self, table: &LocalId, column: &LocalId) {
        let entity = EntityRef::Column {
            table: table.clone(),
            column: column.clone(),
        };
        let key = self.begin_delete(&entity, |store| {
            store.column(table, column).map(|c| c.remote_key)
        });
        self.pending()
            .columns
            .remove(&(table.clone(), column.clone()));
        let Some(key) = key else {
            return;
        };
        match self.backend.delete_column(key).await {
            Ok(()) => {
                self.document.update(|store| store.purge(&entity));
                info!(column_id = %column, column_key = %key, "Column deleted");
                self.publisher.column_deleted(key);
            }
            Err(err) => self.restore_after_failed_delete(&entity, err),
        }
    }

    // ========================================================================
    // RELATIONS
    // ========================================================================

    /// Relate `source`'s primary key to `target`. Fails only when the
    /// relation cannot exist locally; relations between unsaved tables
    /// stay local.
    pub async fn create_relation(
        &self,
        source: &LocalId,
        target: &LocalId,
        kind: RelationKind,
        cardinality: Cardinality,
    ) -> Result<LocalId, StoreError> {
        let (id, endpoints, correlation) = self.document.update(|store| -> StoreResult<_> {
            let id = store.create_relation(source, target, kind, cardinality)?;
            let relation = store
                .relation(&id)
                .ok_or_else(|| StoreError::RelationNotFound(id.clone()))?;
            let from_column = store
                .column(source, &relation.source_column)
                .and_then(|c| c.remote_key);
            let endpoints = match (
                store.table(source).and_then(|t| t.remote_key),
                store.table(target).and_then(|t| t.remote_key),
            ) {
                (Some(from_table), Some(to_table)) => Some(RelationEndpoints {
                    from_table,
                    from_column,
                    to_table,
                }),
                _ => None,
            };
            let correlation = relation.correlation.unwrap_or_default();
            Ok((id, endpoints, correlation))
        })?;

        let Some(endpoints) = endpoints else {
            debug!(relation_id = %id, "Relation between unsaved tables kept local");
            return Ok(id);
        };
        let request =
            CreateRelationRequest::new(self.project_key, endpoints, kind, cardinality, correlation);
        match self.backend.create_relation(self.project_key, &request).await {
            Ok(payload) => {
                let absorbed = self.document.update(|store| {
                    store.confirm_relation(&payload.to_confirmed(), AbsorbPolicy::ExistingOnly)
                });
                match absorbed {
                    Ok(Some(_)) => {
                        debug!(relation_id = %id, relation_key = payload.relation_key, "Relation confirmed");
                        self.publisher.relation_created(payload);
                    }
                    Ok(None) => {
                        warn!(relation_id = %id, "Relation confirmation matched nothing locally")
                    }
                    Err(err) => warn!(relation_id = %id, error = %err, "Relation confirmation rejected"),
                }
            }
            Err(err) => {
                warn!(relation_id = %id, error = %err, "Relation create failed, rolled back");
                self.document.update(|store| store.delete_relation(&id));
            }
        }
        Ok(id)
    }

    /// Remove a relation. The backend has no relation delete endpoint; peers
    /// learn about it from the broadcast.
    pub fn delete_relation(&self, id: &LocalId) -> bool {
        let removed = self.document.update(|store| store.delete_relation(id));
        match removed {
            Some(relation) => {
                if let Some(key) = relation.remote_key {
                    self.publisher.relation_deleted(key);
                }
                true
            }
            None => false,
        }
    }
}
