// sage-core/src/infrastructure/adapters/sqlx.rs
//
// Pooled relational adapter over sqlx's Any driver. Dialect quirks
// (placeholders, upsert syntax) are decided once from the configured
// driver; the Sink never sees SQL.

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::Once;
use tracing::debug;

use crate::domain::schema::{Connection, Driver};
use crate::domain::table::Scalar;
use crate::error::SageError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::connector::{SinkConnector, SinkTransaction};

static DRIVERS: Once = Once::new();

pub struct SqlxConnector {
    pool: AnyPool,
    driver: Driver,
}

impl SqlxConnector {
    /// Connect from a package Destination. sqlserver/oracle are legal
    /// configuration values but have no pooled adapter in this build.
    pub async fn connect(config: &Connection, max_connections: u32) -> Result<Self, SageError> {
        match config.driver {
            Driver::Postgresql | Driver::Mysql => {}
            other => {
                return Err(SageError::Infrastructure(
                    InfrastructureError::UnsupportedDriver(other.to_string()),
                ))
            }
        }

        DRIVERS.call_once(sqlx::any::install_default_drivers);

        let url = config.url().ok_or_else(|| {
            SageError::Infrastructure(InfrastructureError::ConfigError(
                "connection requires host+database or env_key".into(),
            ))
        })?;

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .map_err(InfrastructureError::Database)?;

        Ok(Self {
            pool,
            driver: config.driver,
        })
    }
}

#[async_trait]
impl SinkConnector for SqlxConnector {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SageError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(Box::new(SqlxTransaction {
            tx,
            driver: self.driver,
        }))
    }

    fn driver_name(&self) -> &str {
        match self.driver {
            Driver::Postgresql => "postgresql",
            Driver::Mysql => "mysql",
            Driver::Sqlserver => "sqlserver",
            Driver::Oracle => "oracle",
        }
    }
}

struct SqlxTransaction {
    tx: sqlx::Transaction<'static, sqlx::Any>,
    driver: Driver,
}

impl SqlxTransaction {
    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| match self.driver {
                Driver::Postgresql => format!("${}", i),
                _ => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn execute_with_row(
        &mut self,
        sql: &str,
        row: &[Scalar],
    ) -> Result<u64, SageError> {
        let mut query = sqlx::query(sql);
        for cell in row {
            query = match cell {
                Scalar::Null => query.bind(Option::<String>::None),
                Scalar::Bool(b) => query.bind(*b),
                Scalar::Number(n) => query.bind(*n),
                Scalar::Str(s) => query.bind(s.clone()),
                Scalar::Date(d) => query.bind(d.format("%Y-%m-%d %H:%M:%S").to_string()),
            };
        }
        let result = query
            .execute(&mut *self.tx)
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SinkTransaction for SqlxTransaction {
    async fn create_staging(&mut self, table: &str, columns: &[String]) -> Result<(), SageError> {
        // Text columns are enough for a scratch copy the hook inspects.
        let body = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("CREATE TEMPORARY TABLE {} ({})", quote_ident(table), body);
        debug!(sql = %sql, "creating staging table");
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(())
    }

    async fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Scalar>],
    ) -> Result<u64, SageError> {
        let column_list = quoted_list(columns);
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            column_list,
            self.placeholders(columns.len())
        );

        let mut affected = 0;
        for row in rows {
            affected += self.execute_with_row(&sql, row).await?;
        }
        Ok(affected)
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

        let column_list = quoted_list(columns);
        let placeholders = self.placeholders(columns.len());
        let non_key: Vec<&String> = columns
            .iter()
            .filter(|c| !conflict_keys.contains(c))
            .collect();

        let sql = match self.driver {
            Driver::Postgresql => {
                let updates = if non_key.is_empty() {
                    // All columns are keys: the row is already in place.
                    format!("ON CONFLICT ({}) DO NOTHING", quoted_list(conflict_keys))
                } else {
                    let assignments = non_key
                        .iter()
                        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!(
                        "ON CONFLICT ({}) DO UPDATE SET {}",
                        quoted_list(conflict_keys),
                        assignments
                    )
                };
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) {}",
                    quote_ident(table),
                    column_list,
                    placeholders,
                    updates
                )
            }
            _ => {
                let assignments = if non_key.is_empty() {
                    // MySQL needs at least one assignment; touch a key column.
                    format!("{0} = VALUES({0})", quote_ident(&conflict_keys[0]))
                } else {
                    non_key
                        .iter()
                        .map(|c| format!("{0} = VALUES({0})", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    quote_ident(table),
                    column_list,
                    placeholders,
                    assignments
                )
            }
        };

        let mut affected = 0;
        for row in rows {
            affected += self.execute_with_row(&sql, row).await?;
        }
        Ok(affected)
    }

    async fn delete_all(&mut self, table: &str) -> Result<u64, SageError> {
        let sql = format!("DELETE FROM {}", quote_ident(table));
        let result = sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), SageError> {
        self.tx
            .commit()
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SageError> {
        self.tx
            .rollback()
            .await
            .map_err(InfrastructureError::Database)?;
        Ok(())
    }
}

fn quote_ident(ident: &str) -> String {
    // Identifiers come from validated configuration, not sender data;
    // quoting guards against reserved words, not injection.
    format!("\"{}\"", ident.replace('"', ""))
}

fn quoted_list(idents: &[String]) -> String {
    idents
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}
