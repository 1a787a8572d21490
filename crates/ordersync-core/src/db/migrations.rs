//! Database migrations

use libsql::Connection;

use crate::error::Result;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

async fn get_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists = if let Some(row) = rows.next().await? {
        row.get::<i64>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: orders and the worker control row
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS orders (
            order_id TEXT PRIMARY KEY,
            order_status TEXT,
            sku_id TEXT,
            sku_name TEXT,
            pay_amount REAL,
            count INTEGER NOT NULL DEFAULT 1,
            pay_time INTEGER,
            create_time INTEGER,
            update_time INTEGER,
            source_order_id TEXT,
            phone TEXT,
            raw_data TEXT NOT NULL,
            sync_time INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(order_status)",
        "CREATE INDEX IF NOT EXISTS idx_orders_create_time ON orders(create_time)",
        "CREATE INDEX IF NOT EXISTS idx_orders_pay_time ON orders(pay_time)",
        "CREATE INDEX IF NOT EXISTS idx_orders_phone ON orders(phone)",
        "CREATE TABLE IF NOT EXISTS task_monitor (
            task_id TEXT PRIMARY KEY,
            status TEXT,
            last_sync_time INTEGER,
            last_heartbeat INTEGER,
            target_command TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_are_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        run(db.connection()).await.unwrap();
        assert_eq!(get_version(db.connection()).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expected_indexes_exist() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db
            .connection()
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'orders' AND name LIKE 'idx_%' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        assert_eq!(
            names,
            [
                "idx_orders_create_time",
                "idx_orders_pay_time",
                "idx_orders_phone",
                "idx_orders_status"
            ]
        );
    }
}
