// sage-core/src/infrastructure/adapters/memory.rs
//
// In-memory sink. Backs dry-runs and the test suite with real
// transaction semantics: a begin() takes a snapshot, commit() publishes
// it, rollback (explicit or by drop) discards it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::table::Scalar;
use crate::error::SageError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::{SinkConnector, SinkTransaction};

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

type SharedState = Arc<Mutex<HashMap<String, MemTable>>>;

#[derive(Default)]
pub struct MemoryConnector {
    state: SharedState,
    unique_keys: HashMap<String, Vec<String>>,
    fail_on_delete: bool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique constraint so plain inserts can conflict the
    /// way a real database would.
    pub fn with_unique_keys(mut self, table: &str, keys: &[&str]) -> Self {
        self.unique_keys.insert(
            table.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    /// Make delete_all fail (simulates a database error mid-replace).
    pub fn failing_on_delete(mut self) -> Self {
        self.fail_on_delete = true;
        self
    }

    pub fn table(&self, name: &str) -> Option<MemTable> {
        self.poisoned_safe_lock().get(name).cloned()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.table(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn poisoned_safe_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemTable>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SinkConnector for MemoryConnector {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SageError> {
        Ok(Box::new(MemoryTransaction {
            working: self.poisoned_safe_lock().clone(),
            shared: Arc::clone(&self.state),
            unique_keys: self.unique_keys.clone(),
            fail_on_delete: self.fail_on_delete,
        }))
    }

    fn driver_name(&self) -> &str {
        "memory"
    }
}

struct MemoryTransaction {
    working: HashMap<String, MemTable>,
    shared: SharedState,
    unique_keys: HashMap<String, Vec<String>>,
    fail_on_delete: bool,
}

impl MemoryTransaction {
    fn table_mut(&mut self, name: &str, columns: &[String]) -> &mut MemTable {
        let entry = self.working.entry(name.to_string()).or_default();
        if entry.columns.is_empty() {
            entry.columns = columns.to_vec();
        }
        entry
    }

    fn key_of(columns: &[String], keys: &[String], row: &[Scalar]) -> Vec<String> {
        keys.iter()
            .map(|key| {
                columns
                    .iter()
                    .position(|c| c == key)
                    .and_then(|i| row.get(i))
                    .map(|s| s.render())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn create_staging(&mut self, table: &str, columns: &[String]) -> Result<(), SageError> {
        self.working.insert(
            table.to_string(),
            MemTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Scalar>],
    ) -> Result<u64, SageError> {
        let keys = self.unique_keys.get(table).cloned().unwrap_or_default();
        let target = self.table_mut(table, columns);

        for row in rows {
            if !keys.is_empty() {
                let new_key = MemoryTransaction::key_of(columns, &keys, row);
                let conflict = target
                    .rows
                    .iter()
                    .any(|existing| {
                        MemoryTransaction::key_of(&target.columns, &keys, existing) == new_key
                    });
                if conflict {
                    return Err(SageError::Infrastructure(InfrastructureError::SinkError(
                        format!(
                            "unique violation on '{}' for key ({})",
                            table,
                            new_key.join(", ")
                        ),
                    )));
                }
            }
            target.rows.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert(
        &mut self,
        table: &str,
        columns: &[String],
        conflict_keys: &[String],
        rows: &[Vec<Scalar>],
    ) -> Result<u64, SageError> {
        if conflict_keys.is_empty() {
            return Err(SageError::Infrastructure(InfrastructureError::SinkError(
                format!("upsert into '{}' requires at least one unique field", table),
            )));
        }

        let keys: Vec<String> = conflict_keys.to_vec();
        let target = self.table_mut(table, columns);

        for row in rows {
            let new_key = MemoryTransaction::key_of(columns, &keys, row);
            let existing = target.rows.iter_mut().find(|existing| {
                MemoryTransaction::key_of(columns, &keys, existing) == new_key
            });
            match existing {
                Some(slot) => *slot = row.clone(),
                None => target.rows.push(row.clone()),
            }
        }
        Ok(rows.len() as u64)
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64, SageError> {
        if self.fail_on_delete {
            return Err(SageError::Infrastructure(InfrastructureError::SinkError(
                format!("simulated failure deleting from '{}'", table),
            )));
        }
        let removed = self
            .working
            .get_mut(table)
            .map(|t| {
                let n = t.rows.len();
                t.rows.clear();
                n
            })
            .unwrap_or(0);
        Ok(removed as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), SageError> {
        let mut shared = match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *shared = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SageError> {
        // Dropping the working copy IS the rollback.
        Ok(())
    }
}
