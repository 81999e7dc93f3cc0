use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};

use crate::{
    CartEntry, GoodsId, MAX_QUANTITY, Money, NewOrder, Order, OrderId, OrderLineItem, OrderQuery,
    OrderSn, OrderStatus, Page, Result, StoreError, UserId,
    store::{OrderStore, StoreTransaction},
};

/// Rows per `INSERT` statement when writing line items.
const LINE_ITEM_BATCH: usize = 100;

const ORDER_COLUMNS: &str = "id, order_sn, user_id, address, signer_name, signer_mobile, post, total_cents, status, created_at";

/// PostgreSQL-backed order store implementation.
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

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("order store migrations applied");
        Ok(())
    }
}

/// Converts a quantity for an `INTEGER` column.
fn db_quantity(goods_id: GoodsId, quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::QuantityOutOfRange(goods_id))
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<OrderStatus>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        order_sn: OrderSn::new(row.try_get::<String, _>("order_sn")?),
        user_id: UserId::new(row.try_get("user_id")?),
        address: row.try_get("address")?,
        signer_name: row.try_get("signer_name")?,
        signer_mobile: row.try_get("signer_mobile")?,
        post: row.try_get("post")?,
        total: Money::from_cents(row.try_get("total_cents")?),
        status,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_line_item(row: PgRow) -> Result<OrderLineItem> {
    Ok(OrderLineItem {
        order_id: OrderId::new(row.try_get("order_id")?),
        goods_id: GoodsId::new(row.try_get("goods_id")?),
        goods_name: row.try_get("goods_name")?,
        goods_price: Money::from_cents(row.try_get("goods_price_cents")?),
        goods_image: row.try_get("goods_image")?,
        quantity: row.try_get::<i32, _>("quantity")? as u32,
    })
}

fn row_to_cart_entry(row: PgRow) -> Result<CartEntry> {
    Ok(CartEntry {
        id: row.try_get("id")?,
        user_id: UserId::new(row.try_get("user_id")?),
        goods_id: GoodsId::new(row.try_get("goods_id")?),
        quantity: row.try_get::<i32, _>("quantity")? as u32,
        checked: row.try_get("checked")?,
    })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    type Transaction = PostgresTransaction;

    #[tracing::instrument(skip(self))]
    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    #[tracing::instrument(skip(self), fields(order_sn = %order_sn))]
    async fn find_order_by_sn(&self, order_sn: &OrderSn) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_sn = $1"
        ))
        .bind(order_sn.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_order).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let user_id = query.user_id.map(|u| u.get());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::INTEGER IS NULL OR user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::INTEGER IS NULL OR user_id = $1)
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(i64::from(query.limit()))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            total: total as u64,
            items: rows
                .into_iter()
                .map(row_to_order)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, goods_id, goods_name, goods_price_cents, goods_image, quantity
            FROM order_line_items
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_line_item).collect()
    }

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, goods_id, quantity, checked FROM cart_entries WHERE user_id = $1 ORDER BY id ASC",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cart_entry).collect()
    }

    async fn checked_cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, goods_id, quantity, checked FROM cart_entries WHERE user_id = $1 AND checked ORDER BY id ASC",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_cart_entry).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn merge_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
    ) -> Result<CartEntry> {
        // A sum past the column range updates nothing and returns no row.
        let row = sqlx::query(
            r#"
            INSERT INTO cart_entries (user_id, goods_id, quantity, checked)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (user_id, goods_id) DO UPDATE SET
                quantity = cart_entries.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            WHERE cart_entries.quantity::BIGINT + EXCLUDED.quantity <= $4
            RETURNING id, user_id, goods_id, quantity, checked
            "#,
        )
        .bind(user_id.get())
        .bind(goods_id.get())
        .bind(db_quantity(goods_id, quantity)?)
        .bind(i64::from(MAX_QUANTITY))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::QuantityOutOfRange(goods_id))?;

        row_to_cart_entry(row)
    }

    #[tracing::instrument(skip(self))]
    async fn update_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
        checked: bool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE cart_entries
            SET quantity = $3, checked = $4, updated_at = NOW()
            WHERE user_id = $1 AND goods_id = $2
            "#,
        )
        .bind(user_id.get())
        .bind(goods_id.get())
        .bind(db_quantity(goods_id, quantity)?)
        .bind(checked)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_cart_entry(&self, user_id: UserId, goods_id: GoodsId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_entries WHERE user_id = $1 AND goods_id = $2")
            .bind(user_id.get())
            .bind(goods_id.get())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Transaction handed out by [`PostgresOrderStore`].
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    #[tracing::instrument(skip(self), fields(order_sn = %order_sn))]
    async fn find_order_by_sn_for_update(&mut self, order_sn: &OrderSn) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_sn = $1 FOR UPDATE"
        ))
        .bind(order_sn.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_order).transpose()
    }

    #[tracing::instrument(skip(self, order), fields(order_sn = %order.order_sn))]
    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (order_sn, user_id, address, signer_name, signer_mobile, post, total_cents, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.order_sn.as_str())
        .bind(order.user_id.get())
        .bind(&order.address)
        .bind(&order.signer_name)
        .bind(&order.signer_mobile)
        .bind(&order.post)
        .bind(order.total.cents())
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_sn")
            {
                return StoreError::DuplicateOrderSn(order.order_sn.clone());
            }
            StoreError::Database(e)
        })?;

        row_to_order(row)
    }

    #[tracing::instrument(skip(self, items), fields(count = items.len()))]
    async fn insert_line_items(&mut self, items: &[OrderLineItem]) -> Result<u64> {
        if let Some(item) = items.iter().find(|i| i.quantity > MAX_QUANTITY) {
            return Err(StoreError::QuantityOutOfRange(item.goods_id));
        }

        let mut written = 0;
        for chunk in items.chunks(LINE_ITEM_BATCH) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO order_line_items (order_id, goods_id, goods_name, goods_price_cents, goods_image, quantity) ",
            );
            builder.push_values(chunk, |mut row, item| {
                row.push_bind(item.order_id.get())
                    .push_bind(item.goods_id.get())
                    .push_bind(&item.goods_name)
                    .push_bind(item.goods_price.cents())
                    .push_bind(&item.goods_image)
                    .push_bind(item.quantity as i32);
            });
            written += builder
                .build()
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        }
        Ok(written)
    }

    #[tracing::instrument(skip(self))]
    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<u64> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id.get())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self, goods_ids), fields(goods = goods_ids.len()))]
    async fn delete_checked_cart_entries(
        &mut self,
        user_id: UserId,
        goods_ids: &[GoodsId],
    ) -> Result<u64> {
        let goods_ids: Vec<i32> = goods_ids.iter().map(|g| g.get()).collect();
        let result = sqlx::query(
            "DELETE FROM cart_entries WHERE user_id = $1 AND checked AND goods_id = ANY($2)",
        )
        .bind(user_id.get())
        .bind(&goods_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        tracing::debug!("order store transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
