//! Order repository implementation

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use libsql::{Connection, Value};

use crate::error::{Error, Result};
use crate::models::Order;

/// Columns whose conflict behaviour can be configured.
pub const MERGEABLE_COLUMNS: [&str; 10] = [
    "order_status",
    "sku_id",
    "sku_name",
    "pay_amount",
    "count",
    "pay_time",
    "create_time",
    "update_time",
    "source_order_id",
    "phone",
];

/// Identity and provenance columns, never merged.
const FIXED_COLUMNS: [&str; 3] = ["order_id", "raw_data", "sync_time"];

const SELECT_COLUMNS: &str = "order_id, order_status, sku_id, sku_name, pay_amount, count, \
     pay_time, create_time, update_time, source_order_id, phone, raw_data, sync_time";

/// How a column is updated when an order is fetched again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Latest fetch wins
    #[default]
    Overwrite,
    /// First write wins
    KeepExisting,
    /// Latest non-null value wins
    PreferNonNull,
}

impl MergeStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::KeepExisting => "keep_existing",
            Self::PreferNonNull => "prefer_non_null",
        }
    }

    /// `SET` assignment for `column`, or `None` when it is left untouched.
    fn assignment(self, column: &str) -> Option<String> {
        match self {
            Self::Overwrite => Some(format!("{column} = excluded.{column}")),
            Self::KeepExisting => None,
            Self::PreferNonNull => Some(format!(
                "{column} = COALESCE(excluded.{column}, orders.{column})"
            )),
        }
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "keep_existing" => Ok(Self::KeepExisting),
            "prefer_non_null" => Ok(Self::PreferNonNull),
            other => Err(format!(
                "unknown strategy `{other}` (expected overwrite, keep_existing or prefer_non_null)"
            )),
        }
    }
}

/// Per-column merge strategies. Unlisted columns are overwritten.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    overrides: BTreeMap<&'static str, MergeStrategy>,
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overrides.is_empty() {
            return f.write_str("overwrite");
        }
        let rendered: Vec<String> = self
            .overrides
            .iter()
            .map(|(column, strategy)| format!("{column}={}", strategy.as_str()))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

impl MergePolicy {
    /// Override one column. Fixed and unknown columns are rejected.
    pub fn with(
        mut self,
        column: &str,
        strategy: MergeStrategy,
    ) -> std::result::Result<Self, String> {
        if FIXED_COLUMNS.contains(&column) {
            return Err(format!("column `{column}` is not configurable"));
        }
        let Some(column) = MERGEABLE_COLUMNS.into_iter().find(|name| *name == column) else {
            return Err(format!("unknown column `{column}`"));
        };
        self.overrides.insert(column, strategy);
        Ok(self)
    }

    pub fn strategy_for(&self, column: &str) -> MergeStrategy {
        self.overrides.get(column).copied().unwrap_or_default()
    }

    fn upsert_sql(&self) -> String {
        let columns: Vec<&str> = FIXED_COLUMNS[..1]
            .iter()
            .chain(MERGEABLE_COLUMNS.iter())
            .chain(FIXED_COLUMNS[1..].iter())
            .copied()
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");

        let mut assignments: Vec<String> = MERGEABLE_COLUMNS
            .iter()
            .filter_map(|column| self.strategy_for(column).assignment(column))
            .collect();
        assignments.push("raw_data = excluded.raw_data".to_string());
        assignments.push("sync_time = excluded.sync_time".to_string());

        format!(
            "INSERT INTO orders ({}) VALUES ({placeholders}) ON CONFLICT(order_id) DO UPDATE SET {}",
            columns.join(", "),
            assignments.join(", ")
        )
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    /// Parse `column=strategy` pairs separated by commas.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let mut policy = Self::default();
        for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (column, strategy) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected column=strategy, got `{entry}`"))?;
            policy = policy.with(&column.trim().to_ascii_lowercase(), strategy.parse()?)?;
        }
        Ok(policy)
    }
}

/// Trait for order storage operations (async)
#[allow(async_fn_in_trait)]
pub trait OrderStore {
    /// Upsert a batch in one transaction; returns the number of rows written
    async fn upsert_batch(&self, orders: &[Order]) -> Result<usize>;

    /// Get an order by identifier
    async fn get(&self, order_id: &str) -> Result<Option<Order>>;

    /// Count stored orders
    async fn count(&self) -> Result<u64>;
}

/// libSQL implementation of `OrderStore`
pub struct LibSqlOrderRepository<'a> {
    conn: &'a Connection,
    policy: MergePolicy,
}

impl<'a> LibSqlOrderRepository<'a> {
    /// Create a repository that overwrites every column on conflict
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_policy(conn, MergePolicy::default())
    }

    pub const fn with_policy(conn: &'a Connection, policy: MergePolicy) -> Self {
        Self { conn, policy }
    }

    fn parse_order(row: &libsql::Row) -> Result<Order> {
        let raw: String = row.get(11)?;
        Ok(Order {
            order_id: row.get(0)?,
            order_status: row.get(1)?,
            sku_id: row.get(2)?,
            sku_name: row.get(3)?,
            pay_amount: row.get(4)?,
            count: row.get(5)?,
            pay_time: row.get(6)?,
            create_time: row.get(7)?,
            update_time: row.get(8)?,
            source_order_id: row.get(9)?,
            phone: row.get(10)?,
            raw_data: serde_json::from_str(&raw)?,
            sync_time: row.get(12)?,
        })
    }
}

impl OrderStore for LibSqlOrderRepository<'_> {
    async fn upsert_batch(&self, orders: &[Order]) -> Result<usize> {
        let orders = collapse_duplicates(orders);
        if orders.is_empty() {
            return Ok(0);
        }

        let sql = self.policy.upsert_sql();
        let rows = orders
            .iter()
            .map(|order| order_values(order))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.conn.transaction().await?;
        for values in rows {
            if let Err(error) = tx.execute(&sql, libsql::params_from_iter(values)).await {
                tx.rollback().await.ok();
                return Err(error.into());
            }
        }
        tx.commit().await?;

        Ok(orders.len())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM orders WHERE order_id = ?"),
                [order_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_order(&row)?)),
            None => Ok(None),
        }
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM orders", ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        u64::try_from(count).map_err(|_| Error::Database(format!("invalid row count {count}")))
    }
}

/// Keep only the last occurrence of each identifier, in first-seen order.
fn collapse_duplicates(orders: &[Order]) -> Vec<&Order> {
    let mut seen = HashSet::new();
    let mut kept: Vec<&Order> = orders
        .iter()
        .rev()
        .filter(|order| seen.insert(order.order_id.as_str()))
        .collect();
    kept.reverse();
    kept
}

fn order_values(order: &Order) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(order.order_id.clone()),
        text(order.order_status.as_deref()),
        text(order.sku_id.as_deref()),
        text(order.sku_name.as_deref()),
        order.pay_amount.map_or(Value::Null, Value::Real),
        Value::Integer(order.count),
        integer(order.pay_time),
        integer(order.create_time),
        integer(order.update_time),
        text(order.source_order_id.as_deref()),
        text(order.phone.as_deref()),
        Value::Text(serde_json::to_string(&order.raw_data)?),
        Value::Integer(order.sync_time),
    ])
}

fn text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |value| Value::Text(value.to_string()))
}

fn integer(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}
