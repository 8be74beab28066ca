//! PostgreSQL policy store.
//!
//! Rules live in one casbin-style table: `ptype = 'p'` rows hold
//! `(subject, resource, action)` and `ptype = 'g'` rows hold
//! `(child, parent, '')`.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;
use tracing::debug;

use super::models::{PolicyRule, RoleEdge, Subject};
use super::store::{PolicySnapshot, PolicyStore};
use crate::error::{AuthzError, ErrorCode, Result};

const POLICY_TYPE: &str = "p";
const GROUPING_TYPE: &str = "g";

/// One row of the `authz_rules` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RuleRow {
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
}

impl RuleRow {
    fn policy(rule: &PolicyRule) -> Self {
        let [v0, v1, v2] = rule.to_triple();
        Self {
            ptype: POLICY_TYPE.to_string(),
            v0,
            v1,
            v2,
        }
    }

    fn grouping(edge: &RoleEdge) -> Self {
        Self {
            ptype: GROUPING_TYPE.to_string(),
            v0: edge.child.to_string(),
            v1: edge.parent.to_string(),
            v2: String::new(),
        }
    }
}

/// Flatten a snapshot into table rows, edges first.
pub fn snapshot_to_rows(snapshot: &PolicySnapshot) -> Vec<RuleRow> {
    snapshot
        .role_edges
        .iter()
        .map(RuleRow::grouping)
        .chain(snapshot.rules.iter().map(RuleRow::policy))
        .collect()
}

/// Rebuild a snapshot from table rows. Unknown `ptype` values are rejected.
pub fn rows_to_snapshot(rows: Vec<RuleRow>) -> Result<PolicySnapshot> {
    let mut snapshot = PolicySnapshot::default();

    for row in rows {
        match row.ptype.as_str() {
            POLICY_TYPE => {
                snapshot
                    .rules
                    .push(PolicyRule::parse(&row.v0, &row.v1, &row.v2)?);
            }
            GROUPING_TYPE => {
                let edge = RoleEdge::new(Subject::parse(&row.v0)?, Subject::parse(&row.v1)?);
                edge.validate()?;
                snapshot.role_edges.push(edge);
            }
            other => {
                return Err(AuthzError::new(
                    ErrorCode::StoreLoadFailed,
                    format!("Unknown policy row type: {}", other),
                ));
            }
        }
    }

    Ok(snapshot)
}

/// Policy store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the rules table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authz_rules (
                id BIGSERIAL PRIMARY KEY,
                ptype VARCHAR(8) NOT NULL,
                v0 TEXT NOT NULL,
                v1 TEXT NOT NULL,
                v2 TEXT NOT NULL DEFAULT '',
                UNIQUE (ptype, v0, v1, v2)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn load(&self) -> Result<PolicySnapshot> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT ptype, v0, v1, v2
            FROM authz_rules
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AuthzError::with_internal(
                ErrorCode::StoreLoadFailed,
                "Policy rules could not be loaded",
                e.to_string(),
            )
            .with_source(e)
        })?;

        rows_to_snapshot(rows)
    }

    async fn save(&self, snapshot: &PolicySnapshot) -> Result<()> {
        let rows = snapshot_to_rows(snapshot);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM authz_rules")
            .execute(&mut *tx)
            .await?;

        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO authz_rules (ptype, v0, v1, v2)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&row.ptype)
            .bind(&row.v0)
            .bind(&row.v1)
            .bind(&row.v2)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(rows = rows.len(), "Policy rules replaced");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
