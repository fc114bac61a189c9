//! PostgreSQL order repository

use super::OrderRepository;
use crate::config::DatabaseConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::order::{Order, OrderFilter, OrderStatus};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

const ORDER_COLUMNS: &str = r#"
    id, status, from_chain, to_chain, from_token, to_token, from_amount, to_amount,
    maker_src_address, maker_dst_address, resolver_address, hashlock, salt, order_hash,
    signature, escrow_src_address, escrow_dst_address, src_escrow_tx_hash,
    dst_escrow_tx_hash, src_withdraw_tx_hash, dst_withdraw_tx_hash, secret, relayer_fee,
    expires_at, created_at, updated_at, version
"#;

/// Order repository backed by PostgreSQL
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Connect to the configured database
    pub async fn connect(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                from_chain VARCHAR(64) NOT NULL,
                to_chain VARCHAR(64) NOT NULL,
                from_token VARCHAR(256) NOT NULL,
                to_token VARCHAR(256) NOT NULL,
                from_amount VARCHAR(256) NOT NULL,
                to_amount VARCHAR(256) NOT NULL,
                maker_src_address VARCHAR(256) NOT NULL,
                maker_dst_address VARCHAR(256) NOT NULL,
                resolver_address VARCHAR(256),
                hashlock VARCHAR(66) NOT NULL,
                salt VARCHAR(256) NOT NULL,
                order_hash VARCHAR(66) NOT NULL,
                signature TEXT NOT NULL,
                escrow_src_address VARCHAR(256),
                escrow_dst_address VARCHAR(256),
                src_escrow_tx_hash VARCHAR(256),
                dst_escrow_tx_hash VARCHAR(256),
                src_withdraw_tx_hash VARCHAR(256),
                dst_withdraw_tx_hash VARCHAR(256),
                secret TEXT,
                relayer_fee VARCHAR(256),
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_order_hash ON orders (order_hash)",
            "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status)",
            "CREATE INDEX IF NOT EXISTS idx_orders_resolver ON orders (resolver_address)",
            "CREATE INDEX IF NOT EXISTS idx_orders_hashlock ON orders (hashlock)",
            "CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders (created_at DESC)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        info!("Database migrations complete");
        Ok(())
    }

    async fn select_where(&self, predicate: &str) -> CoordinatorResult<Vec<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE {}", ORDER_COLUMNS, predicate);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }
}

fn order_from_row(row: &PgRow) -> CoordinatorResult<Order> {
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        status: status.parse().map_err(|_| {
            CoordinatorError::Internal(format!("corrupt status '{}' in orders table", status))
        })?,
        from_chain: row.try_get("from_chain")?,
        to_chain: row.try_get("to_chain")?,
        from_token: row.try_get("from_token")?,
        to_token: row.try_get("to_token")?,
        from_amount: row.try_get("from_amount")?,
        to_amount: row.try_get("to_amount")?,
        maker_src_address: row.try_get("maker_src_address")?,
        maker_dst_address: row.try_get("maker_dst_address")?,
        resolver_address: row.try_get("resolver_address")?,
        hashlock: row.try_get("hashlock")?,
        salt: row.try_get("salt")?,
        order_hash: row.try_get("order_hash")?,
        signature: row.try_get("signature")?,
        escrow_src_address: row.try_get("escrow_src_address")?,
        escrow_dst_address: row.try_get("escrow_dst_address")?,
        src_escrow_tx_hash: row.try_get("src_escrow_tx_hash")?,
        dst_escrow_tx_hash: row.try_get("dst_escrow_tx_hash")?,
        src_withdraw_tx_hash: row.try_get("src_withdraw_tx_hash")?,
        dst_withdraw_tx_hash: row.try_get("dst_withdraw_tx_hash")?,
        secret: row.try_get("secret")?,
        relayer_fee: row.try_get("relayer_fee")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, status, from_chain, to_chain, from_token, to_token, from_amount, to_amount,
                maker_src_address, maker_dst_address, hashlock, salt, order_hash, signature,
                relayer_fee, expires_at, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(&order.from_chain)
        .bind(&order.to_chain)
        .bind(&order.from_token)
        .bind(&order.to_token)
        .bind(&order.from_amount)
        .bind(&order.to_amount)
        .bind(&order.maker_src_address)
        .bind(&order.maker_dst_address)
        .bind(&order.hashlock)
        .bind(&order.salt)
        .bind(&order.order_hash)
        .bind(&order.signature)
        .bind(&order.relayer_fee)
        .bind(order.expires_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> CoordinatorResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u32,
    ) -> CoordinatorResult<(Vec<Order>, u64)> {
        const FILTER: &str = r#"
            ($1::TEXT IS NULL OR status = $1)
            AND ($2::TEXT IS NULL OR resolver_address = $2)
            AND ($3::TEXT IS NULL OR maker_src_address = $3)
        "#;
        let status = filter.status.map(|s| s.as_str());

        let count_sql = format!("SELECT COUNT(*) AS total FROM orders WHERE {}", FILTER);
        let total: i64 = sqlx::query(&count_sql)
            .bind(status)
            .bind(&filter.resolver_address)
            .bind(&filter.maker_address)
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let page_sql = format!(
            "SELECT {} FROM orders WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
            ORDER_COLUMNS, FILTER
        );
        let rows = sqlx::query(&page_sql)
            .bind(status)
            .bind(&filter.resolver_address)
            .bind(&filter.maker_address)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let orders = rows.iter().map(order_from_row).collect::<CoordinatorResult<_>>()?;
        Ok((orders, total as u64))
    }

    async fn count_by_status(&self) -> CoordinatorResult<HashMap<OrderStatus, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<OrderStatus, u64> =
            OrderStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let status: String = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            if let Ok(status) = status.parse::<OrderStatus>() {
                counts.insert(status, total as u64);
            }
        }
        Ok(counts)
    }

    async fn compare_and_swap(&self, expected: &Order, updated: &Order) -> CoordinatorResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $4,
                resolver_address = $5,
                escrow_src_address = $6,
                escrow_dst_address = $7,
                src_escrow_tx_hash = $8,
                dst_escrow_tx_hash = $9,
                src_withdraw_tx_hash = $10,
                dst_withdraw_tx_hash = $11,
                secret = $12,
                updated_at = $13,
                version = version + 1
            WHERE id = $1 AND status = $2 AND version = $3
            "#,
        )
        .bind(expected.id)
        .bind(expected.status.as_str())
        .bind(expected.version)
        .bind(updated.status.as_str())
        .bind(&updated.resolver_address)
        .bind(&updated.escrow_src_address)
        .bind(&updated.escrow_dst_address)
        .bind(&updated.src_escrow_tx_hash)
        .bind(&updated.dst_escrow_tx_hash)
        .bind(&updated.src_withdraw_tx_hash)
        .bind(&updated.dst_withdraw_tx_hash)
        .bind(&updated.secret)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_secret_ready(&self) -> CoordinatorResult<Vec<Order>> {
        self.select_where(
            "status = 'depositing' AND src_escrow_tx_hash IS NOT NULL \
             AND dst_escrow_tx_hash IS NOT NULL AND secret IS NULL",
        )
        .await
    }

    async fn find_completion_ready(&self) -> CoordinatorResult<Vec<Order>> {
        self.select_where(
            "status = 'withdrawing' AND src_withdraw_tx_hash IS NOT NULL \
             AND dst_withdraw_tx_hash IS NOT NULL",
        )
        .await
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
