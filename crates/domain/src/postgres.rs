use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AddressId, DeliveryWorkerId, OrderId, ProductId, UserId};
use outbox::PostgresOutboxStore;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    order::{Order, OrderStatus, Product},
    store::{OrderChange, OrderStore, OrderWrite, StockAdjustment, StoreError, StoreResult},
};

const ORDER_COLUMNS: &str = "id, order_number, user_id, product_id, quantity, amount_cents, \
     address_id, status, payment_transaction_id, payment_time, delivery_worker_id, completed_at, \
     version, created_at, updated_at";

/// PostgreSQL-backed order store.
///
/// A commit runs the stock update, the order write and the outbox insert in
/// one transaction.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.stock as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_order(row: PgRow) -> StoreResult<Order> {
        let status: String = row.try_get("status")?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_number: row.try_get("order_number")?,
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidData(format!("negative quantity {quantity}")))?,
            amount_cents: row.try_get("amount_cents")?,
            address_id: AddressId::from_uuid(row.try_get::<Uuid, _>("address_id")?),
            status: status
                .parse::<OrderStatus>()
                .map_err(|e| StoreError::InvalidData(e.to_string()))?,
            payment_transaction_id: row.try_get("payment_transaction_id")?,
            payment_time: row.try_get("payment_time")?,
            delivery_worker_id: row
                .try_get::<Option<Uuid>, _>("delivery_worker_id")?
                .map(DeliveryWorkerId::from_uuid),
            completed_at: row.try_get("completed_at")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn adjust_stock(conn: &mut PgConnection, adjustment: StockAdjustment) -> StoreResult<()> {
        match adjustment {
            StockAdjustment::Decrement {
                product_id,
                quantity,
            } => {
                let result = sqlx::query(
                    "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                     WHERE id = $1 AND stock >= $2",
                )
                .bind(product_id.as_uuid())
                .bind(quantity as i32)
                .execute(conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::StockDecrementFailed(product_id));
                }
            }
            StockAdjustment::Restore {
                product_id,
                quantity,
            } => {
                let result = sqlx::query(
                    "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(product_id.as_uuid())
                .bind(quantity as i32)
                .execute(conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::ProductNotFound(product_id));
                }
            }
        }
        Ok(())
    }

    async fn insert_order(conn: &mut PgConnection, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, product_id, quantity, amount_cents,
                address_id, status, payment_transaction_id, payment_time, delivery_worker_id,
                completed_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.order_number)
        .bind(order.user_id.as_uuid())
        .bind(order.product_id.as_uuid())
        .bind(order.quantity as i32)
        .bind(order.amount_cents)
        .bind(order.address_id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.payment_transaction_id)
        .bind(order.payment_time)
        .bind(order.delivery_worker_id.map(|id| id.as_uuid()))
        .bind(order.completed_at)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(order.order_number.clone());
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn update_order(
        conn: &mut PgConnection,
        order: &Order,
        expected_version: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, payment_transaction_id = $4, payment_time = $5,
                delivery_worker_id = $6, completed_at = $7, version = $8, updated_at = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(expected_version)
        .bind(order.status.as_str())
        .bind(&order.payment_transaction_id)
        .bind(order.payment_time)
        .bind(order.delivery_worker_id.map(|id| id.as_uuid()))
        .bind(order.completed_at)
        .bind(order.version)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
                    .bind(order.id.as_uuid())
                    .fetch_one(&mut *conn)
                    .await?;
            return Err(if exists {
                StoreError::VersionConflict {
                    order_id: order.id,
                    expected: expected_version,
                }
            } else {
                StoreError::OrderNotFound(order.id)
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn get_product(&self, product_id: ProductId) -> StoreResult<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents, stock FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let stock: i32 = row.try_get("stock")?;
                Ok(Some(Product {
                    id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
                    name: row.try_get("name")?,
                    price_cents: row.try_get("price_cents")?,
                    stock: stock.max(0) as u32,
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_order(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row = sqlx::query(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_expired_unpaid(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING_PAYMENT' AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(created_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn commit(&self, change: OrderChange) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        if let Some(adjustment) = change.stock {
            Self::adjust_stock(&mut tx, adjustment).await?;
        }

        let order = match change.write {
            OrderWrite::Insert(order) => {
                Self::insert_order(&mut tx, &order).await?;
                order
            }
            OrderWrite::Update {
                mut order,
                expected_version,
            } => {
                order.version = expected_version + 1;
                Self::update_order(&mut tx, &order, expected_version).await?;
                order
            }
        };

        PostgresOutboxStore::append(&mut tx, &change.event).await?;

        // Dropping `tx` on any early return above rolls everything back
        tx.commit().await?;
        Ok(order)
    }
}
