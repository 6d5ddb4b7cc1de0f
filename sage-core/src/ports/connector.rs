// sage-core/src/ports/connector.rs
//
// This file defines what the Sink needs from a database, without
// knowing how it's done. The dialect differences (placeholders, upsert
// syntax) live entirely inside the adapters.

use async_trait::async_trait;

use crate::domain::table::Scalar;
use crate::error::SageError;

#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Open the one transaction this submission is allowed.
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SageError>;

    /// Engine name (for logging purposes).
    fn driver_name(&self) -> &str;
}

#[async_trait]
pub trait SinkTransaction: Send {
    /// Create the per-submission scratch table with the given columns.
    /// The name embeds the submission id so concurrent runs never collide.
    async fn create_staging(&mut self, table: &str, columns: &[String]) -> Result<(), SageError>;

    /// Append rows. A uniqueness violation surfaces as an error; the
    /// caller rolls back.
    async fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Scalar>],
    ) -> Result<u64, SageError>;

    /// Insert, updating in place on conflict against `conflict_keys`
    /// (the catalog's declared unique fields).
    async fn upsert(
        &mut self,
        table: &str,
        columns: &[String],
        conflict_keys: &[String],
        rows: &[Vec<Scalar>],
    ) -> Result<u64, SageError>;

    /// Delete every existing row (the first half of `replace`).
    async fn delete_all(&mut self, table: &str) -> Result<u64, SageError>;

    async fn commit(self: Box<Self>) -> Result<(), SageError>;

    async fn rollback(self: Box<Self>) -> Result<(), SageError>;
}
