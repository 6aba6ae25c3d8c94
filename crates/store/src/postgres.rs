use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use common::{
    AddressId, CartLine, CartLineId, IdentityId, Money, Order, OrderId, OrderLine, OrderStatus,
    ParseStatusError, PaymentRecord, PaymentStatus, Product, ProductId, Variant, VariantId,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{RowKey, Store, Transaction, plan_locks},
};

const PRODUCT_COLUMNS: &str =
    "id, name, price_cents, stock_quantity, available, has_variants, created_at";
const VARIANT_COLUMNS: &str =
    "id, product_id, name, price_cents, stock_quantity, available, created_at";
const ORDER_COLUMNS: &str = "id, owner_id, status, total_cents, address_id, created_at";

/// PostgreSQL-backed store implementation.
///
/// Row locks are `SELECT ... FOR UPDATE` inside a database transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
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
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
            held: BTreeSet::new(),
        })
    }
}

/// Transaction over a [`PostgresStore`]. Rolled back by the driver if dropped.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    held: BTreeSet<RowKey>,
}

fn quantity_from_db(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidRow(format!("{column} = {value}")))
}

fn quantity_to_db(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::InvalidRow(format!("quantity {value} too large")))
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().copied().map(Into::into).collect()
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock_quantity: quantity_from_db(row.try_get("stock_quantity")?, "stock_quantity")?,
        available: row.try_get("available")?,
        has_variants: row.try_get("has_variants")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_variant(row: &PgRow) -> Result<Variant> {
    Ok(Variant {
        id: VariantId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        name: row.try_get("name")?,
        price: row
            .try_get::<Option<i64>, _>("price_cents")?
            .map(Money::from_cents),
        stock_quantity: quantity_from_db(row.try_get("stock_quantity")?, "stock_quantity")?,
        available: row.try_get("available")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_cart_line(row: &PgRow) -> Result<CartLine> {
    Ok(CartLine {
        id: CartLineId::from_uuid(row.try_get("id")?),
        owner: IdentityId::from_uuid(row.try_get("owner_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        variant_id: row
            .try_get::<Option<Uuid>, _>("variant_id")?
            .map(VariantId::from_uuid),
        quantity: quantity_from_db(row.try_get("quantity")?, "quantity")?,
        added_at: row.try_get("added_at")?,
    })
}

fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        variant_id: row
            .try_get::<Option<Uuid>, _>("variant_id")?
            .map(VariantId::from_uuid),
        quantity: quantity_from_db(row.try_get("quantity")?, "quantity")?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

/// Maps an order row; lines are attached by the caller.
fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        owner: IdentityId::from_uuid(row.try_get("owner_id")?),
        status: status
            .parse::<OrderStatus>()
            .map_err(|e: ParseStatusError| StoreError::InvalidRow(e.to_string()))?,
        total: Money::from_cents(row.try_get("total_cents")?),
        address: row
            .try_get::<Option<Uuid>, _>("address_id")?
            .map(AddressId::from_uuid),
        created_at: row.try_get("created_at")?,
        lines: Vec::new(),
    })
}

fn row_to_payment(row: &PgRow) -> Result<PaymentRecord> {
    let status: String = row.try_get("status")?;
    Ok(PaymentRecord {
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        provider: row.try_get("provider")?,
        status: status
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps constraint violations onto store errors.
fn map_write_error(e: sqlx::Error, missing: RowKey) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unique");
            return StoreError::Conflict(format!("{missing} violates {constraint}"));
        }
        if db_err.is_foreign_key_violation() {
            return StoreError::Missing(missing);
        }
    }
    StoreError::Database(e)
}

impl PgTransaction {
    fn plan(&self, keys: Vec<RowKey>) -> Result<Vec<RowKey>> {
        plan_locks(
            |key| self.held.contains(key),
            self.held.last().copied(),
            keys,
        )
    }

    fn require_lock(&self, key: RowKey) -> Result<()> {
        if self.held.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(key))
        }
    }

    async fn attach_lines(&mut self, orders: &mut [Order]) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, variant_id, quantity, unit_price_cents
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines.entry(order_id).or_default().push(row_to_order_line(row)?);
        }
        for order in orders.iter_mut() {
            order.lines = lines.remove(&order.id.as_uuid()).unwrap_or_default();
        }
        Ok(())
    }

    async fn select_order(&mut self, id: OrderId, for_update: bool) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => {
                let mut orders = [row_to_order(&row)?];
                self.attach_lines(&mut orders).await?;
                let [order] = orders;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock_quantity, available, has_variants, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(quantity_to_db(product.stock_quantity)?)
        .bind(product.available)
        .bind(product.has_variants)
        .bind(product.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, RowKey::Product(product.id)))?;
        Ok(())
    }

    async fn insert_variant(&mut self, variant: &Variant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_variants (id, product_id, name, price_cents, stock_quantity, available, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(variant.product_id.as_uuid())
        .bind(&variant.name)
        .bind(variant.price.map(|p| p.cents()))
        .bind(quantity_to_db(variant.stock_quantity)?)
        .bind(variant.available)
        .bind(variant.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, RowKey::Product(variant.product_id)))?;
        Ok(())
    }

    async fn find_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(uuids(ids))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter()
            .map(|row| row_to_product(row).map(|p| (p.id, p)))
            .collect()
    }

    async fn find_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        let sql = format!("SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = ANY($1)");
        let rows = sqlx::query(&sql)
            .bind(uuids(ids))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter()
            .map(|row| row_to_variant(row).map(|v| (v.id, v)))
            .collect()
    }

    async fn variants_of(&mut self, product_id: ProductId) -> Result<Vec<Variant>> {
        let sql = format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE product_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(row_to_variant).collect()
    }

    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let planned = self.plan(ids.iter().copied().map(RowKey::Product).collect())?;
        if !planned.is_empty() {
            sqlx::query("SELECT id FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(uuids(ids))
                .fetch_all(&mut *self.tx)
                .await?;
            tracing::debug!(rows = planned.len(), "product rows locked");
            self.held.extend(planned);
        }
        self.find_products(ids).await
    }

    async fn lock_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        let planned = self.plan(ids.iter().copied().map(RowKey::Variant).collect())?;
        if !planned.is_empty() {
            sqlx::query("SELECT id FROM product_variants WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(uuids(ids))
                .fetch_all(&mut *self.tx)
                .await?;
            tracing::debug!(rows = planned.len(), "variant rows locked");
            self.held.extend(planned);
        }
        self.find_variants(ids).await
    }

    async fn update_product(&mut self, product: &Product) -> Result<()> {
        let key = RowKey::Product(product.id);
        self.require_lock(key)?;
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, price_cents = $3, stock_quantity = $4, available = $5, has_variants = $6
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(quantity_to_db(product.stock_quantity)?)
        .bind(product.available)
        .bind(product.has_variants)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(key));
        }
        Ok(())
    }

    async fn update_variant(&mut self, variant: &Variant) -> Result<()> {
        let key = RowKey::Variant(variant.id);
        self.require_lock(key)?;
        let result = sqlx::query(
            r#"
            UPDATE product_variants
            SET name = $2, price_cents = $3, stock_quantity = $4, available = $5
            WHERE id = $1
            "#,
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.name)
        .bind(variant.price.map(|p| p.cents()))
        .bind(quantity_to_db(variant.stock_quantity)?)
        .bind(variant.available)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(key));
        }
        Ok(())
    }

    async fn delete_variant(&mut self, id: VariantId) -> Result<()> {
        let key = RowKey::Variant(id);
        self.require_lock(key)?;
        // Cart and order lines keep their variant through a plain foreign key
        let result = sqlx::query("DELETE FROM product_variants WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    StoreError::Conflict(format!("variant {id} is referenced by a cart or an order"))
                }
                other => StoreError::Database(other),
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(key));
        }
        Ok(())
    }

    async fn cart_lines(&mut self, owner: IdentityId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, product_id, variant_id, quantity, added_at
            FROM cart_lines
            WHERE owner_id = $1
            ORDER BY added_at, id
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(row_to_cart_line).collect()
    }

    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cart_lines (id, owner_id, product_id, variant_id, quantity, added_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(line.owner.as_uuid())
        .bind(line.product_id.as_uuid())
        .bind(line.variant_id.map(|v| v.as_uuid()))
        .bind(quantity_to_db(line.quantity)?)
        .bind(line.added_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, RowKey::Product(line.product_id)))?;
        Ok(())
    }

    async fn delete_cart_line(&mut self, owner: IdentityId, line_id: CartLineId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE id = $1 AND owner_id = $2")
            .bind(line_id.as_uuid())
            .bind(owner.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, owner: IdentityId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE owner_id = $1")
            .bind(owner.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let key = RowKey::Order(order.id);
        sqlx::query(
            r#"
            INSERT INTO orders (id, owner_id, status, total_cents, address_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.owner.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(order.address.map(|a| a.as_uuid()))
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, key))?;

        for (line_no, line) in order.lines.iter().enumerate() {
            let line_no = i32::try_from(line_no)
                .map_err(|_| StoreError::InvalidRow(format!("line number {line_no}")))?;
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, line_no, product_id, variant_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(line_no)
            .bind(line.product_id.as_uuid())
            .bind(line.variant_id.map(|v| v.as_uuid()))
            .bind(quantity_to_db(line.quantity)?)
            .bind(line.unit_price.cents())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(e, RowKey::Product(line.product_id)))?;
        }
        Ok(())
    }

    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.select_order(id, false).await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let planned = self.plan(vec![RowKey::Order(id)])?;
        let order = self.select_order(id, !planned.is_empty()).await?;
        self.held.extend(planned);
        Ok(order)
    }

    async fn orders_for(&mut self, owner: IdentityId) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(owner.as_uuid())
            .fetch_all(&mut *self.tx)
            .await?;

        let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        self.attach_lines(&mut orders).await?;
        Ok(orders)
    }

    async fn all_orders(&mut self) -> Result<Vec<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;

        let mut orders = rows.iter().map(row_to_order).collect::<Result<Vec<_>>>()?;
        self.attach_lines(&mut orders).await?;
        Ok(orders)
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()> {
        let key = RowKey::Order(id);
        self.require_lock(key)?;
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(key));
        }
        Ok(())
    }

    async fn delete_order(&mut self, id: OrderId) -> Result<bool> {
        self.require_lock(RowKey::Order(id))?;
        // Lines and payment go with the order through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (order_id, provider, status, amount_cents, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payment.order_id.as_uuid())
        .bind(&payment.provider)
        .bind(payment.status.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.reference)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, RowKey::Order(payment.order_id)))?;
        Ok(())
    }

    async fn find_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, provider, status, amount_cents, reference, created_at
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_payment).transpose()
    }

    async fn update_payment(&mut self, payment: &PaymentRecord) -> Result<()> {
        let key = RowKey::Order(payment.order_id);
        self.require_lock(key)?;
        let result = sqlx::query(
            "UPDATE payments SET provider = $2, status = $3, amount_cents = $4, reference = $5 WHERE order_id = $1",
        )
        .bind(payment.order_id.as_uuid())
        .bind(&payment.provider)
        .bind(payment.status.as_str())
        .bind(payment.amount.cents())
        .bind(&payment.reference)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(key));
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
