use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use common::{
    CartLine, CartLineId, IdentityId, Order, OrderId, OrderStatus, PaymentRecord, Product,
    ProductId, Variant, VariantId,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{RowKey, Store, Transaction, plan_locks},
};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Variant>,
    cart_lines: HashMap<CartLineId, CartLine>,
    orders: HashMap<OrderId, Order>,
    payments: HashMap<OrderId, PaymentRecord>,
}

impl Tables {
    fn variant_referenced(&self, id: VariantId, skip: impl Fn(CartLineId) -> bool) -> bool {
        self.cart_lines
            .values()
            .any(|line| line.variant_id == Some(id) && !skip(line.id))
            || self
                .orders
                .values()
                .any(|order| order.lines.iter().any(|line| line.variant_id == Some(id)))
    }
}

/// Writes staged by a transaction. `None` marks a deletion.
#[derive(Debug, Default)]
struct Overlay {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, Option<Variant>>,
    cart_lines: HashMap<CartLineId, Option<CartLine>>,
    orders: HashMap<OrderId, Option<Order>>,
    payments: HashMap<OrderId, Option<PaymentRecord>>,
}

impl Overlay {
    /// Re-checks staged cart and variant writes against what other
    /// transactions committed after this one read the tables.
    ///
    /// Cart lines are written without row locks, so the uniqueness of
    /// (owner, product, variant) and the variant reference only hold if
    /// they are checked again while the tables are held for writing.
    fn validate(&self, tables: &Tables) -> Result<()> {
        for line in self.cart_lines.values().flatten() {
            let duplicate = tables.cart_lines.values().any(|other| {
                other.id != line.id
                    && other.owner == line.owner
                    && other.matches(line.product_id, line.variant_id)
                    && !self.cart_lines.contains_key(&other.id)
            });
            if duplicate {
                return Err(StoreError::Conflict(format!(
                    "cart already holds a line for product {}",
                    line.product_id
                )));
            }

            if let Some(variant_id) = line.variant_id {
                let exists = match self.variants.get(&variant_id) {
                    Some(staged) => staged.is_some(),
                    None => tables.variants.contains_key(&variant_id),
                };
                if !exists {
                    return Err(StoreError::Missing(RowKey::Variant(variant_id)));
                }
            }
        }

        for (id, _) in self.variants.iter().filter(|(_, staged)| staged.is_none()) {
            if tables.variant_referenced(*id, |line| self.cart_lines.contains_key(&line)) {
                return Err(variant_in_use(*id));
            }
        }
        Ok(())
    }
}

fn variant_in_use(id: VariantId) -> StoreError {
    StoreError::Conflict(format!("variant {id} is referenced by a cart or an order"))
}

/// Per-row mutexes, created on first use and forgotten once no transaction
/// holds or awaits them.
#[derive(Debug, Default)]
struct RowLocks {
    rows: std::sync::Mutex<HashMap<RowKey, Arc<Mutex<()>>>>,
}

impl RowLocks {
    fn handle(&self, key: RowKey) -> Arc<Mutex<()>> {
        self.rows().entry(key).or_default().clone()
    }

    /// Drops the mutexes of `keys` that only the map still refers to.
    ///
    /// Waiters and guards each hold a clone of the handle, so the count is
    /// exact while the map itself is locked.
    fn prune(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut rows = self.rows();
        for key in keys {
            if rows
                .get(&key)
                .is_some_and(|handle| Arc::strong_count(handle) == 1)
            {
                rows.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows().len()
    }

    fn rows(&self) -> std::sync::MutexGuard<'_, HashMap<RowKey, Arc<Mutex<()>>>> {
        // The map is only touched in short non-panicking sections.
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Row locks held by one transaction. Dropping releases them all.
#[derive(Debug)]
struct HeldLocks {
    locks: Arc<RowLocks>,
    guards: BTreeMap<RowKey, OwnedMutexGuard<()>>,
}

impl HeldLocks {
    fn new(locks: Arc<RowLocks>) -> Self {
        Self {
            locks,
            guards: BTreeMap::new(),
        }
    }

    fn contains(&self, key: &RowKey) -> bool {
        self.guards.contains_key(key)
    }

    fn highest(&self) -> Option<RowKey> {
        self.guards.keys().next_back().copied()
    }

    fn len(&self) -> usize {
        self.guards.len()
    }

    async fn lock(&mut self, key: RowKey) {
        let handle = self.locks.handle(key);
        let guard = handle.lock_owned().await;
        tracing::debug!(row = %key, "row lock acquired");
        self.guards.insert(key, guard);
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let guards = std::mem::take(&mut self.guards);
        let keys: Vec<RowKey> = guards.keys().copied().collect();
        drop(guards);
        self.locks.prune(keys);
    }
}

/// In-memory store implementation.
///
/// Committed rows sit behind a single `RwLock`; exclusive row locks are
/// per-row async mutexes held by the transaction until commit or rollback.
/// Each transaction stages its writes privately and applies them in one
/// step on commit, before any of its row locks are released.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<RowLocks>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            tables: self.tables.clone(),
            held: HeldLocks::new(self.locks.clone()),
            overlay: Overlay::default(),
        })
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    held: HeldLocks,
    overlay: Overlay,
}

impl InMemoryTransaction {
    /// Acquires row locks in ascending order.
    ///
    /// Keys already held are skipped. New keys must sort above every key
    /// already held.
    async fn acquire(&mut self, keys: Vec<RowKey>) -> Result<()> {
        let keys = plan_locks(|key| self.held.contains(key), self.held.highest(), keys)?;
        for key in keys {
            self.held.lock(key).await;
        }
        Ok(())
    }

    fn require_lock(&self, key: RowKey) -> Result<()> {
        if self.held.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(key))
        }
    }

    async fn product(&self, id: ProductId) -> Option<Product> {
        if let Some(product) = self.overlay.products.get(&id) {
            return Some(product.clone());
        }
        self.tables.read().await.products.get(&id).cloned()
    }

    async fn variant(&self, id: VariantId) -> Option<Variant> {
        if let Some(staged) = self.overlay.variants.get(&id) {
            return staged.clone();
        }
        self.tables.read().await.variants.get(&id).cloned()
    }

    async fn order(&self, id: OrderId) -> Option<Order> {
        if let Some(staged) = self.overlay.orders.get(&id) {
            return staged.clone();
        }
        self.tables.read().await.orders.get(&id).cloned()
    }

    async fn payment(&self, order_id: OrderId) -> Option<PaymentRecord> {
        if let Some(staged) = self.overlay.payments.get(&order_id) {
            return staged.clone();
        }
        self.tables.read().await.payments.get(&order_id).cloned()
    }

    /// Committed orders merged with this transaction's staged ones.
    async fn orders_where(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: HashMap<OrderId, Order> = self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|order| keep(order))
            .map(|order| (order.id, order.clone()))
            .collect();

        for (id, staged) in &self.overlay.orders {
            match staged {
                Some(order) if keep(order) => {
                    orders.insert(*id, order.clone());
                }
                _ => {
                    orders.remove(id);
                }
            }
        }

        let mut orders: Vec<_> = orders.into_values().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_product(&mut self, product: &Product) -> Result<()> {
        if self.product(product.id).await.is_some() {
            return Err(StoreError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        self.overlay.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn insert_variant(&mut self, variant: &Variant) -> Result<()> {
        if self.product(variant.product_id).await.is_none() {
            return Err(StoreError::Missing(RowKey::Product(variant.product_id)));
        }
        if self.variant(variant.id).await.is_some() {
            return Err(StoreError::Conflict(format!(
                "variant {} already exists",
                variant.id
            )));
        }
        self.overlay
            .variants
            .insert(variant.id, Some(variant.clone()));
        Ok(())
    }

    async fn find_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(product) = self.product(*id).await {
                found.insert(*id, product);
            }
        }
        Ok(found)
    }

    async fn find_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(variant) = self.variant(*id).await {
                found.insert(*id, variant);
            }
        }
        Ok(found)
    }

    async fn variants_of(&mut self, product_id: ProductId) -> Result<Vec<Variant>> {
        let mut variants: HashMap<VariantId, Variant> = self
            .tables
            .read()
            .await
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .map(|v| (v.id, v.clone()))
            .collect();

        for (id, staged) in &self.overlay.variants {
            match staged {
                Some(variant) if variant.product_id == product_id => {
                    variants.insert(*id, variant.clone());
                }
                Some(_) => {}
                None => {
                    variants.remove(id);
                }
            }
        }

        let mut variants: Vec<_> = variants.into_values().collect();
        variants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(variants)
    }

    async fn lock_products(&mut self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        self.acquire(ids.iter().copied().map(RowKey::Product).collect())
            .await?;
        self.find_products(ids).await
    }

    async fn lock_variants(&mut self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        self.acquire(ids.iter().copied().map(RowKey::Variant).collect())
            .await?;
        self.find_variants(ids).await
    }

    async fn update_product(&mut self, product: &Product) -> Result<()> {
        let key = RowKey::Product(product.id);
        self.require_lock(key)?;
        if self.product(product.id).await.is_none() {
            return Err(StoreError::Missing(key));
        }
        self.overlay.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_variant(&mut self, variant: &Variant) -> Result<()> {
        let key = RowKey::Variant(variant.id);
        self.require_lock(key)?;
        if self.variant(variant.id).await.is_none() {
            return Err(StoreError::Missing(key));
        }
        self.overlay
            .variants
            .insert(variant.id, Some(variant.clone()));
        Ok(())
    }

    async fn delete_variant(&mut self, id: VariantId) -> Result<()> {
        let key = RowKey::Variant(id);
        self.require_lock(key)?;
        if self.variant(id).await.is_none() {
            return Err(StoreError::Missing(key));
        }

        let staged_reference = self
            .overlay
            .cart_lines
            .values()
            .flatten()
            .any(|line| line.variant_id == Some(id))
            || self
                .overlay
                .orders
                .values()
                .flatten()
                .any(|order| order.lines.iter().any(|line| line.variant_id == Some(id)));
        let committed_reference = self.tables.read().await.variant_referenced(id, |line| {
            self.overlay.cart_lines.contains_key(&line)
        });
        if staged_reference || committed_reference {
            return Err(variant_in_use(id));
        }

        self.overlay.variants.insert(id, None);
        Ok(())
    }

    async fn cart_lines(&mut self, owner: IdentityId) -> Result<Vec<CartLine>> {
        let mut lines: HashMap<CartLineId, CartLine> = self
            .tables
            .read()
            .await
            .cart_lines
            .values()
            .filter(|line| line.owner == owner)
            .map(|line| (line.id, line.clone()))
            .collect();

        for (id, staged) in &self.overlay.cart_lines {
            match staged {
                Some(line) if line.owner == owner => {
                    lines.insert(*id, line.clone());
                }
                Some(_) => {}
                None => {
                    lines.remove(id);
                }
            }
        }

        let mut lines: Vec<_> = lines.into_values().collect();
        lines.sort_by(|a, b| a.added_at.cmp(&b.added_at).then(a.id.cmp(&b.id)));
        Ok(lines)
    }

    async fn upsert_cart_line(&mut self, line: &CartLine) -> Result<()> {
        let existing = self.cart_lines(line.owner).await?;
        if existing
            .iter()
            .any(|other| other.id != line.id && other.matches(line.product_id, line.variant_id))
        {
            return Err(StoreError::Conflict(format!(
                "cart already holds a line for product {}",
                line.product_id
            )));
        }
        self.overlay.cart_lines.insert(line.id, Some(line.clone()));
        Ok(())
    }

    async fn delete_cart_line(&mut self, owner: IdentityId, line_id: CartLineId) -> Result<bool> {
        let lines = self.cart_lines(owner).await?;
        if !lines.iter().any(|line| line.id == line_id) {
            return Ok(false);
        }
        self.overlay.cart_lines.insert(line_id, None);
        Ok(true)
    }

    async fn clear_cart(&mut self, owner: IdentityId) -> Result<u64> {
        let lines = self.cart_lines(owner).await?;
        for line in &lines {
            self.overlay.cart_lines.insert(line.id, None);
        }
        Ok(lines.len() as u64)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.order(order.id).await.is_some() {
            return Err(StoreError::Conflict(format!(
                "order {} already exists",
                order.id
            )));
        }
        self.overlay.orders.insert(order.id, Some(order.clone()));
        Ok(())
    }

    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.order(id).await)
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.acquire(vec![RowKey::Order(id)]).await?;
        Ok(self.order(id).await)
    }

    async fn orders_for(&mut self, owner: IdentityId) -> Result<Vec<Order>> {
        Ok(self.orders_where(|order| order.owner == owner).await)
    }

    async fn all_orders(&mut self) -> Result<Vec<Order>> {
        Ok(self.orders_where(|_| true).await)
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<()> {
        let key = RowKey::Order(id);
        self.require_lock(key)?;
        let mut order = self.order(id).await.ok_or(StoreError::Missing(key))?;
        order.status = status;
        self.overlay.orders.insert(id, Some(order));
        Ok(())
    }

    async fn delete_order(&mut self, id: OrderId) -> Result<bool> {
        self.require_lock(RowKey::Order(id))?;
        if self.order(id).await.is_none() {
            return Ok(false);
        }
        self.overlay.orders.insert(id, None);
        self.overlay.payments.insert(id, None);
        Ok(true)
    }

    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<()> {
        if self.order(payment.order_id).await.is_none() {
            return Err(StoreError::Missing(RowKey::Order(payment.order_id)));
        }
        if self.payment(payment.order_id).await.is_some() {
            return Err(StoreError::Conflict(format!(
                "order {} already has a payment record",
                payment.order_id
            )));
        }
        self.overlay
            .payments
            .insert(payment.order_id, Some(payment.clone()));
        Ok(())
    }

    async fn find_payment(&mut self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        Ok(self.payment(order_id).await)
    }

    async fn update_payment(&mut self, payment: &PaymentRecord) -> Result<()> {
        let key = RowKey::Order(payment.order_id);
        self.require_lock(key)?;
        if self.payment(payment.order_id).await.is_none() {
            return Err(StoreError::Missing(key));
        }
        self.overlay
            .payments
            .insert(payment.order_id, Some(payment.clone()));
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTransaction {
            tables,
            held,
            overlay,
            ..
        } = self;

        let mut tables = tables.write().await;
        overlay.validate(&tables)?;

        tables.products.extend(overlay.products);
        for (id, staged) in overlay.variants {
            match staged {
                Some(variant) => tables.variants.insert(id, variant),
                None => tables.variants.remove(&id),
            };
        }
        for (id, staged) in overlay.cart_lines {
            match staged {
                Some(line) => tables.cart_lines.insert(id, line),
                None => tables.cart_lines.remove(&id),
            };
        }
        for (id, staged) in overlay.orders {
            match staged {
                Some(order) => tables.orders.insert(id, order),
                None => tables.orders.remove(&id),
            };
        }
        for (id, staged) in overlay.payments {
            match staged {
                Some(payment) => tables.payments.insert(id, payment),
                None => tables.payments.remove(&id),
            };
        }
        drop(tables);

        // Row locks are released only once the writes they guard are visible.
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        tracing::debug!(locks = self.held.len(), "transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use std::time::Duration;

    async fn seed_product(store: &InMemoryStore, stock: u32) -> Product {
        let product = Product::new("Widget", Money::from_major(20), stock);
        let mut tx = store.begin().await.unwrap();
        tx.insert_product(&product).await.unwrap();
        tx.commit().await.unwrap();
        product
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_products(&[product.id]).await.unwrap();
        let mut row = locked.remove(&product.id).unwrap();
        row.stock_quantity = 1;
        tx.update_product(&row).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        let seen = reader.find_products(&[product.id]).await.unwrap();
        assert_eq!(seen[&product.id].stock_quantity, 5);

        tx.commit().await.unwrap();
        let seen = reader.find_products(&[product.id]).await.unwrap();
        assert_eq!(seen[&product.id].stock_quantity, 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.lock_products(&[product.id]).await.unwrap();
            let mut row = locked.remove(&product.id).unwrap();
            row.stock_quantity = 0;
            tx.update_product(&row).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let seen = tx.lock_products(&[product.id]).await.unwrap();
        assert_eq!(seen[&product.id].stock_quantity, 5);
    }

    #[tokio::test]
    async fn test_update_requires_lock() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.update_product(&product).await;
        assert!(matches!(result, Err(StoreError::NotLocked(RowKey::Product(_)))));
    }

    #[tokio::test]
    async fn test_lock_order_violation_detected() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_products(&[product.id]).await.unwrap();
        let result = tx.lock_order(OrderId::new()).await;
        assert!(matches!(result, Err(StoreError::LockOrder { .. })));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_transaction_until_commit() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut first = store.begin().await.unwrap();
        let mut locked = first.lock_products(&[product.id]).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                let seen = second.lock_products(&[product.id]).await.unwrap();
                seen[&product.id].stock_quantity
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let mut row = locked.remove(&product.id).unwrap();
        row.stock_quantity = 2;
        first.update_product(&row).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(contender.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cart_line_uniqueness() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let owner = IdentityId::new();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_cart_line(&CartLine::new(owner, product.id, None, 1))
            .await
            .unwrap();
        let duplicate = tx
            .upsert_cart_line(&CartLine::new(owner, product.id, None, 2))
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

        let other_owner = tx
            .upsert_cart_line(&CartLine::new(IdentityId::new(), product.id, None, 2))
            .await;
        assert!(other_owner.is_ok());
    }

    #[tokio::test]
    async fn test_clear_cart_only_touches_owner() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let owner = IdentityId::new();
        let neighbour = IdentityId::new();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_cart_line(&CartLine::new(owner, product.id, None, 1))
            .await
            .unwrap();
        tx.upsert_cart_line(&CartLine::new(neighbour, product.id, None, 1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.clear_cart(owner).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.cart_lines(owner).await.unwrap().is_empty());
        assert_eq!(tx.cart_lines(neighbour).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_order_removes_payment() {
        let store = InMemoryStore::new();
        let order = Order::new(IdentityId::new(), None, vec![]).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.insert_payment(&PaymentRecord::pending(order.id, order.total))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_order(order.id).await.unwrap();
        assert!(tx.delete_order(order.id).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_order(order.id).await.unwrap().is_none());
        assert!(tx.find_payment(order.id).await.unwrap().is_none());
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_cart_inserts_commit_once() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;
        let owner = IdentityId::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .upsert_cart_line(&CartLine::new(owner, product.id, None, 1))
            .await
            .unwrap();
        second
            .upsert_cart_line(&CartLine::new(owner, product.id, None, 2))
            .await
            .unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let mut tx = store.begin().await.unwrap();
        let lines = tx.cart_lines(owner).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_row_locks_forgotten_after_release() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_order(OrderId::new()).await.unwrap();
        tx.lock_products(&[product.id]).await.unwrap();
        assert_eq!(store.locks.len(), 2);
        tx.commit().await.unwrap();
        assert_eq!(store.locks.len(), 0);

        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_order(OrderId::new()).await.unwrap();
            assert_eq!(store.locks.len(), 1);
        }
        assert_eq!(store.locks.len(), 0);

        let mut tx = store.begin().await.unwrap();
        tx.lock_products(&[product.id]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_awaited_row_lock_survives_release() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 5).await;

        let mut first = store.begin().await.unwrap();
        first.lock_products(&[product.id]).await.unwrap();

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_products(&[product.id]).await.unwrap();
                locked_tx.send(()).unwrap();
                release_rx.await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();
        locked_rx.await.unwrap();
        assert_eq!(store.locks.len(), 1);

        release_tx.send(()).unwrap();
        contender.await.unwrap();
        assert_eq!(store.locks.len(), 0);
    }

    async fn seed_variant(store: &InMemoryStore, product: &Product) -> Variant {
        let variant = Variant::new(product.id, "Blue", None, 1);
        let mut tx = store.begin().await.unwrap();
        tx.insert_variant(&variant).await.unwrap();
        tx.commit().await.unwrap();
        variant
    }

    #[tokio::test]
    async fn test_delete_variant() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 0).await;
        let variant = seed_variant(&store, &product).await;

        let mut tx = store.begin().await.unwrap();
        let unlocked = tx.delete_variant(variant.id).await;
        assert!(matches!(unlocked, Err(StoreError::NotLocked(RowKey::Variant(_)))));

        tx.lock_variants(&[variant.id]).await.unwrap();
        tx.delete_variant(variant.id).await.unwrap();
        assert!(tx.variants_of(product.id).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_variants(&[variant.id]).await.unwrap().is_empty());
        assert!(tx.variants_of(product.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_variant_refused_while_referenced() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 0).await;
        let variant = seed_variant(&store, &product).await;
        let owner = IdentityId::new();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_cart_line(&CartLine::new(owner, product.id, Some(variant.id), 1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_variants(&[variant.id]).await.unwrap();
        let in_cart = tx.delete_variant(variant.id).await;
        assert!(matches!(in_cart, Err(StoreError::Conflict(_))));

        // Once the cart is cleared in the same transaction the row can go.
        tx.clear_cart(owner).await.unwrap();
        tx.delete_variant(variant.id).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_cart_line_for_concurrently_deleted_variant_rejected() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 0).await;
        let variant = seed_variant(&store, &product).await;
        let owner = IdentityId::new();

        let mut cart = store.begin().await.unwrap();
        cart.upsert_cart_line(&CartLine::new(owner, product.id, Some(variant.id), 1))
            .await
            .unwrap();

        let mut admin = store.begin().await.unwrap();
        admin.lock_variants(&[variant.id]).await.unwrap();
        admin.delete_variant(variant.id).await.unwrap();
        admin.commit().await.unwrap();

        let result = cart.commit().await;
        assert!(matches!(result, Err(StoreError::Missing(RowKey::Variant(_)))));
    }

    #[tokio::test]
    async fn test_all_orders_newest_first() {
        let store = InMemoryStore::new();
        let older = Order::new(IdentityId::new(), None, vec![]).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = Order::new(IdentityId::new(), None, vec![]).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&older).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&newer).await.unwrap();
        let ids: Vec<OrderId> = tx.all_orders().await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_order(older.id).await.unwrap();
        tx.delete_order(older.id).await.unwrap();
        let ids: Vec<OrderId> = tx.all_orders().await.unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![newer.id]);
    }
}
