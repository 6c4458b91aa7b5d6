//! Local document store.
//!
//! The store owns the canonical in-memory document: tables with their
//! columns, relations, notes, the view transform and manual snapshots. Every
//! operation is synchronous and free of network side effects; the mutation
//! layer and the realtime dispatcher drive it and decide what goes on the
//! wire.
//!
//! Identity reconciliation lives here too. A confirmation coming back from
//! the backend is matched to a local entity in this order:
//!
//! 1. an entity already carrying the confirmed remote key,
//! 2. a provisional entity carrying the echoed correlation token,
//! 3. the first provisional entity of that kind, in that parent, whose name
//!    matches (only when the confirmation carries no correlation at all).
//!
//! A confirmation with a correlation we do not know belongs to someone
//! else's create and never takes over one of ours.

use crate::{
    entities::{
        Absorbed, AbsorbPolicy, Column, ColumnField, ColumnPatch, ConfirmedColumn,
        ConfirmedRelation, ConfirmedTable, EntityRef, Note, NotePatch, Point, Relation,
        Snapshot, SnapshotAuthor, Table, ViewTransform, DEFAULT_IDENTIFIER,
    },
    Cardinality, ColumnKind, CorrelationId, EntityKind, LocalId, RelationKind, RemoteKey,
    StoreError, StoreResult, SyncState, TableColor, TableLock,
};
use chrono::Utc;
use tracing::debug;

/// Offset applied to duplicated tables so the copy does not hide the source.
pub const DUPLICATE_OFFSET: f64 = 32.0;

/// In-memory canonical document.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    tables: Vec<Table>,
    relations: Vec<Relation>,
    notes: Vec<Note>,
    view: ViewTransform,
    /// Most recent first.
    snapshots: Vec<Snapshot>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // READ ACCESS
    // ========================================================================

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, id: &LocalId) -> Option<&Table> {
        self.tables.iter().find(|t| &t.id == id)
    }

    pub fn column(&self, table: &LocalId, column: &LocalId) -> Option<&Column> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, id: &LocalId) -> Option<&Relation> {
        self.relations.iter().find(|r| &r.id == id)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn view(&self) -> ViewTransform {
        self.view
    }

    pub fn set_view(&mut self, view: ViewTransform) {
        self.view = view;
    }

    /// Remote keys of every table this client holds the lock for.
    pub fn held_table_keys(&self) -> Vec<RemoteKey> {
        self.tables
            .iter()
            .filter(|t| t.lock.is_held_by_self())
            .filter_map(|t| t.remote_key)
            .collect()
    }

    fn table_mut(&mut self, id: &LocalId) -> StoreResult<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::TableNotFound(id.clone()))
    }

    fn column_mut(&mut self, table: &LocalId, column: &LocalId) -> StoreResult<&mut Column> {
        let owner = self.table_mut(table)?;
        owner
            .column_mut(column)
            .ok_or_else(|| StoreError::ColumnNotFound {
                table: table.clone(),
                column: column.clone(),
            })
    }

    // ========================================================================
    // TABLES
    // ========================================================================

    /// Insert a provisional table. Blank names are ignored.
    pub fn create_table(&mut self, name: &str) -> Option<LocalId> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let table = Table::provisional(name);
        let id = table.id.clone();
        self.tables.push(table);
        Some(id)
    }

    /// Remove a table and return it. Relations pointing at it are left as-is.
    pub fn delete_table(&mut self, id: &LocalId) -> Option<Table> {
        let index = self.tables.iter().position(|t| &t.id == id)?;
        Some(self.tables.remove(index))
    }

    pub fn update_table_position(&mut self, id: &LocalId, position: Point) -> bool {
        match self.table_mut(id) {
            Ok(table) => {
                table.position = position;
                true
            }
            Err(_) => false,
        }
    }

    pub fn update_table_name(&mut self, id: &LocalId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        match self.table_mut(id) {
            Ok(table) => {
                table.logical_name = name.to_string();
                true
            }
            Err(_) => false,
        }
    }

    /// Set the physical name; a blank identifier resets to the default.
    pub fn update_table_identifier(&mut self, id: &LocalId, identifier: &str) -> bool {
        let identifier = match identifier.trim() {
            "" => DEFAULT_IDENTIFIER,
            trimmed => trimmed,
        };
        match self.table_mut(id) {
            Ok(table) => {
                table.physical_name = identifier.to_string();
                true
            }
            Err(_) => false,
        }
    }

    pub fn update_table_color(&mut self, id: &LocalId, color: TableColor) -> bool {
        match self.table_mut(id) {
            Ok(table) => {
                table.color = color;
                true
            }
            Err(_) => false,
        }
    }

    /// Copy a table with fresh identities, shifted down and right.
    pub fn duplicate_table(&mut self, id: &LocalId) -> Option<LocalId> {
        let source = self.table(id)?;
        let mut copy = Table::provisional(format!("Copy of {}", source.logical_name));
        copy.physical_name = source.physical_name.clone();
        copy.position = source.position.offset(DUPLICATE_OFFSET, DUPLICATE_OFFSET);
        copy.color = source.color;
        copy.columns = source
            .columns
            .iter()
            .map(|column| {
                let mut fresh = Column::provisional(column.kind());
                fresh.is_foreign_key = column.is_foreign_key;
                fresh.logical_name = column.logical_name.clone();
                fresh.physical_name = column.physical_name.clone();
                fresh.data_type = column.data_type.clone();
                fresh.data_detail = column.data_detail.clone();
                fresh.nullable = column.nullable;
                fresh.default_value = column.default_value.clone();
                fresh.comment = column.comment.clone();
                fresh
            })
            .collect();
        copy.renumber_columns();
        let new_id = copy.id.clone();
        self.tables.push(copy);
        Some(new_id)
    }

    /// Replace the table list wholesale. With `reset_view` the notes and
    /// view transform are cleared as well.
    pub fn replace_tables(&mut self, tables: Vec<Table>, reset_view: bool) {
        self.tables = tables;
        for table in &mut self.tables {
            table.renumber_columns();
        }
        if reset_view {
            self.notes.clear();
            self.view = ViewTransform::default();
        }
    }

    /// Replace tables and relations, used by full project loads.
    pub fn replace_document(&mut self, tables: Vec<Table>, relations: Vec<Relation>) {
        self.replace_tables(tables, true);
        self.relations = relations;
    }

    pub fn set_table_lock(&mut self, id: &LocalId, lock: TableLock) -> bool {
        match self.table_mut(id) {
            Ok(table) => {
                table.lock = lock;
                true
            }
            Err(_) => false,
        }
    }

    // ========================================================================
    // COLUMNS
    // ========================================================================

    /// Append a provisional column to a table.
    pub fn add_column(&mut self, table: &LocalId, kind: ColumnKind) -> Option<LocalId> {
        let owner = self.table_mut(table).ok()?;
        let mut column = Column::provisional(kind);
        column.display_order = owner.columns.len();
        let id = column.id.clone();
        owner.columns.push(column);
        Some(id)
    }

    /// Move a column to `target_index`, clamped to the table's bounds.
    ///
    /// Returns false when nothing moved: unknown table or column, or a
    /// table with fewer than two columns.
    pub fn reorder_column(&mut self, table: &LocalId, column: &LocalId, target_index: usize) -> bool {
        let Ok(owner) = self.table_mut(table) else {
            return false;
        };
        let count = owner.columns.len();
        if count < 2 {
            return false;
        }
        let Some(from) = owner.columns.iter().position(|c| &c.id == column) else {
            return false;
        };
        let to = target_index.min(count - 1);
        let moved = owner.columns.remove(from);
        owner.columns.insert(to, moved);
        owner.renumber_columns();
        from != to
    }

    /// Remove a column and return it.
    pub fn delete_column(&mut self, table: &LocalId, column: &LocalId) -> Option<Column> {
        let owner = self.table_mut(table).ok()?;
        let index = owner.columns.iter().position(|c| &c.id == column)?;
        let removed = owner.columns.remove(index);
        owner.renumber_columns();
        Some(removed)
    }

    /// Apply a partial update and report the fields that changed.
    pub fn update_column(
        &mut self,
        table: &LocalId,
        column: &LocalId,
        patch: &ColumnPatch,
    ) -> StoreResult<Vec<ColumnField>> {
        Ok(self.column_mut(table, column)?.apply(patch))
    }

    // ========================================================================
    // RELATIONS
    // ========================================================================

    /// Relate `source`'s primary key to `target`.
    pub fn create_relation(
        &mut self,
        source: &LocalId,
        target: &LocalId,
        kind: RelationKind,
        cardinality: Cardinality,
    ) -> StoreResult<LocalId> {
        let source_table = self
            .table(source)
            .ok_or_else(|| StoreError::TableNotFound(source.clone()))?;
        let source_column = source_table
            .primary_key()
            .ok_or_else(|| StoreError::MissingPrimaryKey(source.clone()))?
            .id
            .clone();
        if self.table(target).is_none() {
            return Err(StoreError::TableNotFound(target.clone()));
        }

        let relation = Relation {
            id: LocalId::generate(EntityKind::Relation),
            remote_key: None,
            correlation: Some(CorrelationId::new()),
            sync: SyncState::Provisional,
            source_table: source.clone(),
            source_column,
            target_table: target.clone(),
            kind,
            cardinality,
        };
        let id = relation.id.clone();
        self.relations.push(relation);
        Ok(id)
    }

    pub fn delete_relation(&mut self, id: &LocalId) -> Option<Relation> {
        let index = self.relations.iter().position(|r| &r.id == id)?;
        Some(self.relations.remove(index))
    }

    // ========================================================================
    // NOTES
    // ========================================================================

    pub fn create_note(&mut self, position: Point) -> LocalId {
        let note = Note {
            id: LocalId::generate(EntityKind::Note),
            position,
            content: String::new(),
            color: TableColor::default(),
        };
        let id = note.id.clone();
        self.notes.push(note);
        id
    }

    pub fn update_note(&mut self, id: &LocalId, patch: NotePatch) -> bool {
        let Some(note) = self.notes.iter_mut().find(|n| &n.id == id) else {
            return false;
        };
        if let Some(position) = patch.position {
            note.position = position;
        }
        if let Some(content) = patch.content {
            note.content = content;
        }
        if let Some(color) = patch.color {
            note.color = color;
        }
        true
    }

    pub fn delete_note(&mut self, id: &LocalId) -> Option<Note> {
        let index = self.notes.iter().position(|n| &n.id == id)?;
        Some(self.notes.remove(index))
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Provisional table matching a create confirmation.
    pub fn reconcile_table(&self, correlation: Option<CorrelationId>, name: &str) -> Option<LocalId> {
        let mut pending = self.tables.iter().filter(|t| t.remote_key.is_none());
        if let Some(token) = correlation {
            return pending
                .find(|t| t.correlation == Some(token))
                .map(|t| t.id.clone());
        }
        let found = pending.find(|t| t.logical_name == name)?;
        debug!(table_id = %found.id, name, "Reconciled table by name");
        Some(found.id.clone())
    }

    /// Provisional column of `table` matching a create confirmation.
    pub fn reconcile_column(
        &self,
        table: &LocalId,
        correlation: Option<CorrelationId>,
        name: &str,
    ) -> Option<LocalId> {
        let owner = self.table(table)?;
        let mut pending = owner.columns.iter().filter(|c| c.remote_key.is_none());
        if let Some(token) = correlation {
            return pending
                .find(|c| c.correlation == Some(token))
                .map(|c| c.id.clone());
        }
        let found = pending.find(|c| c.logical_name == name)?;
        debug!(column_id = %found.id, name, "Reconciled column by name");
        Some(found.id.clone())
    }

    /// Provisional relation between two tables matching a create confirmation.
    pub fn reconcile_relation(
        &self,
        correlation: Option<CorrelationId>,
        source: &LocalId,
        target: &LocalId,
    ) -> Option<LocalId> {
        let mut pending = self.relations.iter().filter(|r| r.remote_key.is_none());
        if let Some(token) = correlation {
            return pending
                .find(|r| r.correlation == Some(token))
                .map(|r| r.id.clone());
        }
        let found = pending.find(|r| &r.source_table == source && &r.target_table == target)?;
        debug!(relation_id = %found.id, "Reconciled relation by endpoints");
        Some(found.id.clone())
    }

    pub fn find_table_by_remote_key(&self, key: RemoteKey) -> Option<LocalId> {
        self.tables
            .iter()
            .find(|t| t.remote_key == Some(key))
            .map(|t| t.id.clone())
    }

    /// Owning table and column for a column remote key.
    pub fn find_column_by_remote_key(&self, key: RemoteKey) -> Option<(LocalId, LocalId)> {
        self.tables.iter().find_map(|t| {
            t.columns
                .iter()
                .find(|c| c.remote_key == Some(key))
                .map(|c| (t.id.clone(), c.id.clone()))
        })
    }

    pub fn find_relation_by_remote_key(&self, key: RemoteKey) -> Option<LocalId> {
        self.relations
            .iter()
            .find(|r| r.remote_key == Some(key))
            .map(|r| r.id.clone())
    }

    /// Attach a backend key. Re-attaching the same key is a no-op; a
    /// different key is refused.
    pub fn attach_remote_key(&mut self, entity: &EntityRef, key: RemoteKey) -> StoreResult<()> {
        let (id, slot, sync) = match entity {
            EntityRef::Table(id) => {
                let table = self.table_mut(id)?;
                (id, &mut table.remote_key, &mut table.sync)
            }
            EntityRef::Column { table, column } => {
                let col = self.column_mut(table, column)?;
                (column, &mut col.remote_key, &mut col.sync)
            }
            EntityRef::Relation(id) => {
                let relation = self
                    .relations
                    .iter_mut()
                    .find(|r| &r.id == id)
                    .ok_or_else(|| StoreError::RelationNotFound(id.clone()))?;
                (id, &mut relation.remote_key, &mut relation.sync)
            }
        };
        match *slot {
            Some(existing) if existing != key => Err(StoreError::RemoteKeyConflict {
                id: id.clone(),
                existing,
                offered: key,
            }),
            _ => {
                *slot = Some(key);
                if *sync == SyncState::Provisional {
                    *sync = SyncState::Synced;
                }
                Ok(())
            }
        }
    }

    fn sync_state_mut(&mut self, entity: &EntityRef) -> StoreResult<&mut SyncState> {
        match entity {
            EntityRef::Table(id) => Ok(&mut self.table_mut(id)?.sync),
            EntityRef::Column { table, column } => Ok(&mut self.column_mut(table, column)?.sync),
            EntityRef::Relation(id) => self
                .relations
                .iter_mut()
                .find(|r| &r.id == id)
                .map(|r| &mut r.sync)
                .ok_or_else(|| StoreError::RelationNotFound(id.clone())),
        }
    }

    pub fn sync_state(&self, entity: &EntityRef) -> Option<SyncState> {
        match entity {
            EntityRef::Table(id) => self.table(id).map(|t| t.sync),
            EntityRef::Column { table, column } => self.column(table, column).map(|c| c.sync),
            EntityRef::Relation(id) => self.relation(id).map(|r| r.sync),
        }
    }

    /// Flag an entity as awaiting delete acknowledgment.
    pub fn mark_deleting(&mut self, entity: &EntityRef) -> StoreResult<()> {
        *self.sync_state_mut(entity)? = SyncState::Deleting;
        Ok(())
    }

    /// Undo `mark_deleting` after a failed delete.
    pub fn restore_synced(&mut self, entity: &EntityRef) -> StoreResult<()> {
        let sync = self.sync_state_mut(entity)?;
        if *sync == SyncState::Deleting {
            *sync = SyncState::Synced;
        }
        Ok(())
    }

    /// Remove an entity outright. Returns false if it was already gone.
    pub fn purge(&mut self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::Table(id) => self.delete_table(id).is_some(),
            EntityRef::Column { table, column } => self.delete_column(table, column).is_some(),
            EntityRef::Relation(id) => self.delete_relation(id).is_some(),
        }
    }

    /// Fold a table confirmation into the document.
    pub fn confirm_table(
        &mut self,
        confirmed: &ConfirmedTable,
        policy: AbsorbPolicy,
    ) -> StoreResult<Option<Absorbed>> {
        let absorbed = if let Some(id) = self.find_table_by_remote_key(confirmed.remote_key) {
            let table = self.table_mut(&id)?;
            table.logical_name = confirmed.logical_name.clone();
            table.physical_name = confirmed.physical_name.clone();
            table.position = confirmed.position;
            table.color = confirmed.color;
            Absorbed::Refreshed(id)
        } else if let Some(id) =
            self.reconcile_table(confirmed.correlation, &confirmed.logical_name)
        {
            self.attach_remote_key(&EntityRef::Table(id.clone()), confirmed.remote_key)?;
            let table = self.table_mut(&id)?;
            table.logical_name = confirmed.logical_name.clone();
            table.physical_name = confirmed.physical_name.clone();
            Absorbed::Reconciled(id)
        } else if policy == AbsorbPolicy::InsertMissing {
            let id = LocalId::for_remote(EntityKind::Table, confirmed.remote_key);
            self.tables.push(Table {
                id: id.clone(),
                remote_key: Some(confirmed.remote_key),
                correlation: confirmed.correlation,
                sync: SyncState::Synced,
                logical_name: confirmed.logical_name.clone(),
                physical_name: confirmed.physical_name.clone(),
                position: confirmed.position,
                color: confirmed.color,
                columns: Vec::new(),
                lock: TableLock::Unlocked,
            });
            Absorbed::Inserted(id)
        } else {
            return Ok(None);
        };

        if let Some(columns) = &confirmed.columns {
            for column in columns {
                self.confirm_column(column, policy)?;
            }
        }
        Ok(Some(absorbed))
    }

    /// Fold a column confirmation into its owning table.
    ///
    /// Returns `Ok(None)` when the owning table is unknown or the policy
    /// forbids inserting.
    pub fn confirm_column(
        &mut self,
        confirmed: &ConfirmedColumn,
        policy: AbsorbPolicy,
    ) -> StoreResult<Option<Absorbed>> {
        let Some(table_id) = self.find_table_by_remote_key(confirmed.table_key) else {
            debug!(table_key = %confirmed.table_key, "Column confirmation for unknown table");
            return Ok(None);
        };

        let absorbed = if let Some((owner, id)) = self.find_column_by_remote_key(confirmed.remote_key)
        {
            confirmed.merge_into(self.column_mut(&owner, &id)?);
            Absorbed::Refreshed(id)
        } else if let Some(id) =
            self.reconcile_column(&table_id, confirmed.correlation, &confirmed.logical_name)
        {
            let entity = EntityRef::Column {
                table: table_id.clone(),
                column: id.clone(),
            };
            self.attach_remote_key(&entity, confirmed.remote_key)?;
            confirmed.merge_into(self.column_mut(&table_id, &id)?);
            Absorbed::Reconciled(id)
        } else if policy == AbsorbPolicy::InsertMissing {
            let column = confirmed.to_column();
            let id = column.id.clone();
            let owner = self.table_mut(&table_id)?;
            let at = confirmed
                .display_order
                .unwrap_or(owner.columns.len())
                .min(owner.columns.len());
            owner.columns.insert(at, column);
            owner.renumber_columns();
            Absorbed::Inserted(id)
        } else {
            return Ok(None);
        };
        Ok(Some(absorbed))
    }

    /// Fold a relation confirmation into the document.
    pub fn confirm_relation(
        &mut self,
        confirmed: &ConfirmedRelation,
        policy: AbsorbPolicy,
    ) -> StoreResult<Option<Absorbed>> {
        let (Some(source), Some(target)) = (
            self.find_table_by_remote_key(confirmed.source_table_key),
            self.find_table_by_remote_key(confirmed.target_table_key),
        ) else {
            debug!(relation_key = %confirmed.remote_key, "Relation confirmation for unknown tables");
            return Ok(None);
        };

        if let Some(id) = self.find_relation_by_remote_key(confirmed.remote_key) {
            if let Some(relation) = self.relations.iter_mut().find(|r| r.id == id) {
                relation.kind = confirmed.kind;
                relation.cardinality = confirmed.cardinality;
            }
            return Ok(Some(Absorbed::Refreshed(id)));
        }

        if let Some(id) = self.reconcile_relation(confirmed.correlation, &source, &target) {
            self.attach_remote_key(&EntityRef::Relation(id.clone()), confirmed.remote_key)?;
            return Ok(Some(Absorbed::Reconciled(id)));
        }

        if policy == AbsorbPolicy::ExistingOnly {
            return Ok(None);
        }

        let source_column = confirmed
            .source_column_key
            .and_then(|key| self.find_column_by_remote_key(key))
            .map(|(_, column)| column)
            .or_else(|| {
                self.table(&source)
                    .and_then(|t| t.primary_key())
                    .map(|c| c.id.clone())
            });
        let Some(source_column) = source_column else {
            return Err(StoreError::MissingPrimaryKey(source));
        };
        let id = LocalId::for_remote(EntityKind::Relation, confirmed.remote_key);
        self.relations.push(Relation {
            id: id.clone(),
            remote_key: Some(confirmed.remote_key),
            correlation: confirmed.correlation,
            sync: SyncState::Synced,
            source_table: source,
            source_column,
            target_table: target,
            kind: confirmed.kind,
            cardinality: confirmed.cardinality,
        });
        Ok(Some(Absorbed::Inserted(id)))
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Capture the current document. A blank name becomes "Snapshot N".
    pub fn create_snapshot(&mut self, name: Option<&str>, author: Option<SnapshotAuthor>) -> Snapshot {
        let name = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Snapshot {}", self.snapshots.len() + 1),
        };
        let snapshot = Snapshot {
            id: LocalId::generate(EntityKind::Snapshot),
            name,
            created_at: Utc::now(),
            tables: self.tables.clone(),
            notes: self.notes.clone(),
            relations: self.relations.clone(),
            view: self.view,
            author,
        };
        self.snapshots.insert(0, snapshot.clone());
        snapshot
    }

    /// Replace the document with a snapshot's contents.
    pub fn restore_snapshot(&mut self, id: &LocalId) -> bool {
        let Some(snapshot) = self.snapshots.iter().find(|s| &s.id == id) else {
            return false;
        };
        self.tables = snapshot.tables.clone();
        self.notes = snapshot.notes.clone();
        self.relations = snapshot.relations.clone();
        self.view = snapshot.view;
        true
    }

    pub fn delete_snapshot(&mut self, id: &LocalId) -> StoreResult<Snapshot> {
        let index = self
            .snapshots
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.clone()))?;
        Ok(self.snapshots.remove(index))
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_columns(n: usize) -> (DocumentStore, LocalId, Vec<LocalId>) {
        let mut store = DocumentStore::new();
        let table = store.create_table("Users").unwrap();
        let columns = (0..n)
            .map(|_| store.add_column(&table, ColumnKind::Regular).unwrap())
            .collect();
        (store, table, columns)
    }

    #[test]
    fn test_create_table_defaults() {
        let mut store = DocumentStore::new();
        let id = store.create_table("  Users ").unwrap();
        let table = store.table(&id).unwrap();
        assert_eq!(table.logical_name, "Users");
        assert_eq!(table.physical_name, "Untitled");
        assert_eq!(table.position, Point::new(200.0, 140.0));
        assert_eq!(table.color, TableColor::Blue);
        assert_eq!(table.sync, SyncState::Provisional);
        assert!(table.correlation.is_some());
        assert!(table.columns.is_empty());
    }

    #[test]
    fn test_create_table_blank_name_is_noop() {
        let mut store = DocumentStore::new();
        assert!(store.create_table("   ").is_none());
        assert!(store.tables().is_empty());
    }

    #[test]
    fn test_add_column_appends_at_end() {
        let (mut store, table, columns) = store_with_columns(2);
        let pk = store.add_column(&table, ColumnKind::PrimaryKey).unwrap();
        let owner = store.table(&table).unwrap();
        assert_eq!(owner.columns.last().unwrap().id, pk);
        assert!(owner.columns[2].is_primary_key);
        assert_eq!(owner.columns[0].id, columns[0]);
        assert_eq!(owner.columns[2].display_order, 2);
        assert_eq!(owner.columns[2].data_type, "VARCHAR");
    }

    #[test]
    fn test_reorder_clamps_target() {
        let (mut store, table, columns) = store_with_columns(3);
        assert!(store.reorder_column(&table, &columns[0], 99));
        let owner = store.table(&table).unwrap();
        assert_eq!(owner.columns[2].id, columns[0]);
        let orders: Vec<_> = owner.columns.iter().map(|c| c.display_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_reorder_single_column_is_noop() {
        let (mut store, table, columns) = store_with_columns(1);
        assert!(!store.reorder_column(&table, &columns[0], 0));
        assert!(!store.reorder_column(&table, &columns[0], 5));
        assert_eq!(store.table(&table).unwrap().columns[0].display_order, 0);
    }

    #[test]
    fn test_delete_table_leaves_relations_dangling() {
        let mut store = DocumentStore::new();
        let users = store.create_table("Users").unwrap();
        let orders = store.create_table("Orders").unwrap();
        store.add_column(&users, ColumnKind::PrimaryKey).unwrap();
        let relation = store
            .create_relation(&users, &orders, RelationKind::NonIdentifying, Cardinality::ZeroOrMany)
            .unwrap();
        assert!(store.delete_table(&users).is_some());
        assert!(store.relation(&relation).is_some());
    }

    #[test]
    fn test_relation_requires_primary_key() {
        let mut store = DocumentStore::new();
        let users = store.create_table("Users").unwrap();
        let orders = store.create_table("Orders").unwrap();
        let err = store
            .create_relation(&users, &orders, RelationKind::Identifying, Cardinality::One)
            .unwrap_err();
        assert_eq!(err, StoreError::MissingPrimaryKey(users));
    }

    #[test]
    fn test_delete_column_renumbers() {
        let (mut store, table, columns) = store_with_columns(3);
        store.delete_column(&table, &columns[1]).unwrap();
        let orders: Vec<_> = store
            .table(&table)
            .unwrap()
            .columns
            .iter()
            .map(|c| c.display_order)
            .collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_identifier_blank_resets_default() {
        let mut store = DocumentStore::new();
        let id = store.create_table("Users").unwrap();
        store.update_table_identifier(&id, "users");
        assert_eq!(store.table(&id).unwrap().physical_name, "users");
        store.update_table_identifier(&id, "  ");
        assert_eq!(store.table(&id).unwrap().physical_name, "Untitled");
    }

    #[test]
    fn test_duplicate_table() {
        let (mut store, table, _) = store_with_columns(2);
        store
            .attach_remote_key(&EntityRef::Table(table.clone()), RemoteKey::new(5))
            .unwrap();
        let copy_id = store.duplicate_table(&table).unwrap();
        let source = store.table(&table).unwrap().clone();
        let copy = store.table(&copy_id).unwrap();
        assert_eq!(copy.logical_name, "Copy of Users");
        assert_eq!(copy.position, Point::new(232.0, 172.0));
        assert!(copy.remote_key.is_none());
        assert_eq!(copy.columns.len(), 2);
        assert_ne!(copy.columns[0].id, source.columns[0].id);
    }

    #[test]
    fn test_attach_remote_key_once() {
        let mut store = DocumentStore::new();
        let id = store.create_table("Users").unwrap();
        let entity = EntityRef::Table(id.clone());
        store.attach_remote_key(&entity, RemoteKey::new(1)).unwrap();
        store.attach_remote_key(&entity, RemoteKey::new(1)).unwrap();
        assert_eq!(store.table(&id).unwrap().sync, SyncState::Synced);
        let err = store.attach_remote_key(&entity, RemoteKey::new(2)).unwrap_err();
        assert!(matches!(err, StoreError::RemoteKeyConflict { .. }));
    }

    #[test]
    fn test_confirm_table_prefers_correlation_over_name() {
        let mut store = DocumentStore::new();
        let first = store.create_table("Users").unwrap();
        let second = store.create_table("Users").unwrap();
        let token = store.table(&second).unwrap().correlation;
        let confirmed = ConfirmedTable {
            remote_key: RemoteKey::new(9),
            correlation: token,
            logical_name: "Users".into(),
            physical_name: "users".into(),
            position: Point::new(0.0, 0.0),
            color: TableColor::Blue,
            columns: None,
        };
        let absorbed = store
            .confirm_table(&confirmed, AbsorbPolicy::ExistingOnly)
            .unwrap()
            .unwrap();
        assert_eq!(absorbed, Absorbed::Reconciled(second.clone()));
        assert!(store.table(&first).unwrap().remote_key.is_none());
        assert_eq!(store.table(&second).unwrap().physical_name, "users");
        assert_eq!(store.table(&second).unwrap().position, Point::new(200.0, 140.0));
    }

    #[test]
    fn test_foreign_correlation_never_takes_over_provisional() {
        let mut store = DocumentStore::new();
        let ours = store.create_table("Users").unwrap();
        let our_token = store.table(&ours).unwrap().correlation;
        let confirmed = |key: i64, correlation: Option<CorrelationId>| ConfirmedTable {
            remote_key: RemoteKey::new(key),
            correlation,
            logical_name: "Users".into(),
            physical_name: "users".into(),
            position: Point::new(0.0, 0.0),
            color: TableColor::Blue,
            columns: None,
        };

        let peer = store
            .confirm_table(&confirmed(99, Some(CorrelationId::new())), AbsorbPolicy::InsertMissing)
            .unwrap()
            .unwrap();
        assert_eq!(peer, Absorbed::Inserted(LocalId::from("table-99")));
        assert!(store.table(&ours).unwrap().remote_key.is_none());

        let own = store
            .confirm_table(&confirmed(100, our_token), AbsorbPolicy::ExistingOnly)
            .unwrap();
        assert_eq!(own, Some(Absorbed::Reconciled(ours.clone())));
        assert_eq!(store.tables().len(), 2);
        assert_eq!(store.table(&ours).unwrap().remote_key, Some(RemoteKey::new(100)));
    }

    #[test]
    fn test_name_fallback_only_without_correlation() {
        let mut store = DocumentStore::new();
        let table = store.create_table("Users").unwrap();
        let column = store.add_column(&table, ColumnKind::Regular).unwrap();
        assert_eq!(store.reconcile_table(None, "Users"), Some(table.clone()));
        assert_eq!(store.reconcile_table(Some(CorrelationId::new()), "Users"), None);
        assert_eq!(
            store.reconcile_column(&table, None, "Logical Name"),
            Some(column)
        );
        assert_eq!(
            store.reconcile_column(&table, Some(CorrelationId::new()), "Logical Name"),
            None
        );
    }

    #[test]
    fn test_confirm_table_inserts_unknown_broadcast() {
        let mut store = DocumentStore::new();
        let confirmed = ConfirmedTable {
            remote_key: RemoteKey::new(3),
            correlation: None,
            logical_name: "Payments".into(),
            physical_name: "payments".into(),
            position: Point::new(10.0, 20.0),
            color: TableColor::User3,
            columns: None,
        };
        assert_eq!(
            store.confirm_table(&confirmed, AbsorbPolicy::ExistingOnly).unwrap(),
            None
        );
        let absorbed = store
            .confirm_table(&confirmed, AbsorbPolicy::InsertMissing)
            .unwrap()
            .unwrap();
        assert_eq!(absorbed.id().as_str(), "table-3");
        assert_eq!(store.tables().len(), 1);
    }

    #[test]
    fn test_pending_delete_restore() {
        let mut store = DocumentStore::new();
        let id = store.create_table("Users").unwrap();
        let entity = EntityRef::Table(id.clone());
        store.attach_remote_key(&entity, RemoteKey::new(4)).unwrap();
        store.mark_deleting(&entity).unwrap();
        assert_eq!(store.sync_state(&entity), Some(SyncState::Deleting));
        store.restore_synced(&entity).unwrap();
        assert_eq!(store.sync_state(&entity), Some(SyncState::Synced));
        assert!(store.purge(&entity));
        assert!(!store.purge(&entity));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut store = DocumentStore::new();
        store.create_table("Users").unwrap();
        let snapshot = store.create_snapshot(None, None);
        assert_eq!(snapshot.name, "Snapshot 1");
        store.create_table("Orders").unwrap();
        store.create_note(Point::new(1.0, 1.0));
        let second = store.create_snapshot(Some(" v2 "), None);
        assert_eq!(store.snapshots()[0].id, second.id);
        assert_eq!(second.name, "v2");

        assert!(store.restore_snapshot(&snapshot.id));
        assert_eq!(store.tables().len(), 1);
        assert!(store.notes().is_empty());
        store.delete_snapshot(&snapshot.id).unwrap();
        assert!(!store.restore_snapshot(&snapshot.id));
    }

    #[test]
    fn test_replace_tables_reset_view() {
        let mut store = DocumentStore::new();
        store.create_note(Point::new(1.0, 2.0));
        store.set_view(ViewTransform {
            pan: Point::new(5.0, 5.0),
            zoom: 2.0,
        });
        store.replace_tables(Vec::new(), false);
        assert_eq!(store.notes().len(), 1);
        store.replace_tables(Vec::new(), true);
        assert!(store.notes().is_empty());
        assert_eq!(store.view(), ViewTransform::default());
    }
}
