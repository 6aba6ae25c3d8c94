//! Integration tests for checkout, cancellation and the inventory ledger.
//!
//! These tests drive the services together over a shared in-memory store and
//! check the ledger invariants before and after each use case.

use std::time::Duration;

use common::{
    CartLine, IdentityId, ItemRef, Money, Order, OrderStatus, PaymentStatus, Product, ProductId,
    Variant, VariantId,
};
use domain::{
    CancelRefusal, CartError, CartService, CheckoutError, CheckoutService, DomainError,
    InMemoryAddressBook, InventoryService, LedgerError, OrderError, OrderService, PaymentService,
    RecordingNotifier,
};
use futures_util::future::join_all;
use store::{InMemoryStore, Store, StoreError, Transaction};

/// All services over one store.
#[derive(Clone)]
struct Shop {
    store: InMemoryStore,
    inventory: InventoryService<InMemoryStore>,
    cart: CartService<InMemoryStore>,
    checkout: CheckoutService<InMemoryStore, InMemoryAddressBook, RecordingNotifier>,
    orders: OrderService<InMemoryStore>,
    payments: PaymentService<InMemoryStore>,
}

fn create_shop() -> Shop {
    let store = InMemoryStore::new();
    Shop {
        inventory: InventoryService::new(store.clone()),
        cart: CartService::new(store.clone()),
        checkout: CheckoutService::new(
            store.clone(),
            InMemoryAddressBook::new(),
            RecordingNotifier::new(),
        ),
        orders: OrderService::new(store.clone()),
        payments: PaymentService::new(store.clone()),
        store,
    }
}

impl Shop {
    async fn product(&self, price: i64, stock: u32) -> Product {
        self.inventory
            .create_product("Widget".to_string(), Money::from_major(price), stock)
            .await
            .unwrap()
    }

    async fn variant(&self, product: ProductId, stock: u32) -> Variant {
        self.inventory
            .add_variant(product, "Variant".to_string(), None, stock)
            .await
            .unwrap()
    }

    async fn stock(&self, item: ItemRef) -> (u32, bool) {
        match item {
            ItemRef::Product(id) => {
                let p = self.inventory.product(id).await.unwrap();
                (p.stock_quantity, p.available)
            }
            ItemRef::Variant(id) => {
                let v = self.inventory.variant(id).await.unwrap();
                (v.stock_quantity, v.available)
            }
        }
    }

    /// Every catalog row, sorted by id, for before/after comparisons.
    async fn catalog(&self, products: &[ProductId], variants: &[VariantId]) -> (Vec<Product>, Vec<Variant>) {
        let mut tx = self.store.begin().await.unwrap();
        let mut p: Vec<_> = tx.find_products(products).await.unwrap().into_values().collect();
        let mut v: Vec<_> = tx.find_variants(variants).await.unwrap().into_values().collect();
        p.sort_by_key(|row| row.id);
        v.sort_by_key(|row| row.id);
        (p, v)
    }

    async fn cart_lines(&self, owner: IdentityId) -> Vec<CartLine> {
        self.cart.snapshot(owner).await.unwrap()
    }

    fn assert_invariant(product: &Product) {
        assert_eq!(product.available, product.stock_quantity > 0, "{product:?}");
    }
}

mod checkout {
    use super::*;

    #[tokio::test]
    async fn end_to_end_scenario() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let x = shop.product(20, 5).await;
        shop.cart.add_line(owner, x.id, None, 2).await.unwrap();

        let order = shop.checkout.place_order(owner, None).await.unwrap();

        assert_eq!(order.total, Money::from_major(40));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines.len(), 1);
        assert_eq!(shop.stock(ItemRef::Product(x.id)).await, (3, true));
        assert!(shop.cart_lines(owner).await.is_empty());

        let mut tx = shop.store.begin().await.unwrap();
        let payment = tx.find_payment(order.id).await.unwrap().unwrap();
        assert_eq!(payment.amount, Money::from_major(40));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.provider, "manual");
    }

    #[tokio::test]
    async fn failed_validation_leaves_everything_untouched() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let a = shop.product(20, 5).await;
        let b = shop.product(30, 3).await;
        shop.cart.add_line(owner, a.id, None, 2).await.unwrap();
        shop.cart.add_line(owner, b.id, None, 2).await.unwrap();

        // Stock drops after the advisory cart check passed.
        shop.inventory
            .set_stock(ItemRef::Product(b.id), 1)
            .await
            .unwrap();

        let catalog_before = shop.catalog(&[a.id, b.id], &[]).await;
        let cart_before = shop.cart_lines(owner).await;

        let result = shop.checkout.place_order(owner, None).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));

        assert_eq!(shop.catalog(&[a.id, b.id], &[]).await, catalog_before);
        assert_eq!(shop.cart_lines(owner).await, cart_before);
        assert_eq!(shop.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn price_is_snapshotted_at_checkout() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(100, 5).await;
        shop.cart.add_line(owner, product.id, None, 2).await.unwrap();

        let order = shop.checkout.place_order(owner, None).await.unwrap();
        shop.inventory
            .set_price(ItemRef::Product(product.id), Money::from_major(150))
            .await
            .unwrap();

        let stored = shop.orders.order(owner, order.id).await.unwrap();
        assert_eq!(stored.lines[0].unit_price, Money::from_major(100));
        assert_eq!(stored.total, Money::from_major(200));
    }

    #[tokio::test]
    async fn variant_price_override_used() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let chair = shop.product(100, 0).await;
        let leather = shop
            .inventory
            .add_variant(chair.id, "Leather".to_string(), Some(Money::from_major(150)), 2)
            .await
            .unwrap();
        let plain = shop.variant(chair.id, 2).await;
        shop.cart.add_line(owner, chair.id, Some(leather.id), 1).await.unwrap();
        shop.cart.add_line(owner, chair.id, Some(plain.id), 1).await.unwrap();

        let order = shop.checkout.place_order(owner, None).await.unwrap();

        assert_eq!(order.total, Money::from_major(250));
        assert_eq!(shop.stock(ItemRef::Product(chair.id)).await, (2, true));
    }

    #[tokio::test]
    async fn variant_checkout_recomputes_product_aggregate() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(50, 0).await;
        let a = shop.variant(product.id, 3).await;
        let b = shop.variant(product.id, 0).await;
        assert_eq!(shop.stock(ItemRef::Product(product.id)).await, (3, true));

        shop.cart.add_line(owner, product.id, Some(a.id), 3).await.unwrap();
        shop.checkout.place_order(owner, None).await.unwrap();

        assert_eq!(shop.stock(ItemRef::Variant(a.id)).await, (0, false));
        assert_eq!(shop.stock(ItemRef::Variant(b.id)).await, (0, false));
        assert_eq!(shop.stock(ItemRef::Product(product.id)).await, (0, false));
    }

    #[tokio::test]
    async fn product_level_line_on_product_with_variants_is_unavailable() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(50, 4).await;
        shop.cart.add_line(owner, product.id, None, 1).await.unwrap();

        // Variants appear after the line was added.
        shop.variant(product.id, 10).await;

        let result = shop.checkout.place_order(owner, None).await;
        assert!(matches!(result, Err(CheckoutError::ProductUnavailable { .. })));
        assert_eq!(shop.cart_lines(owner).await.len(), 1);
    }

    #[tokio::test]
    async fn sold_out_item_fails_with_insufficient_stock() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(20, 1).await;
        shop.cart.add_line(owner, product.id, None, 1).await.unwrap();
        shop.inventory
            .set_stock(ItemRef::Product(product.id), 0)
            .await
            .unwrap();

        let err = shop.checkout.place_order(owner, None).await.unwrap_err();
        assert_eq!(err.reason(), "insufficient_stock");

        let err = DomainError::from(err);
        assert!(err.store_error().is_none());
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancel_restores_reserved_stock_once() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let a = shop.product(20, 7).await;
        let chair = shop.product(100, 0).await;
        let b = shop.variant(chair.id, 4).await;
        shop.cart.add_line(owner, a.id, None, 2).await.unwrap();
        shop.cart.add_line(owner, chair.id, Some(b.id), 1).await.unwrap();

        let order = shop.checkout.place_order(owner, None).await.unwrap();
        assert_eq!(shop.stock(ItemRef::Product(a.id)).await, (5, true));
        assert_eq!(shop.stock(ItemRef::Variant(b.id)).await, (3, true));

        let canceled = shop.orders.cancel(owner, order.id).await.unwrap();

        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(shop.stock(ItemRef::Product(a.id)).await, (7, true));
        assert_eq!(shop.stock(ItemRef::Variant(b.id)).await, (4, true));
        assert_eq!(shop.stock(ItemRef::Product(chair.id)).await, (4, true));

        let again = shop.orders.cancel(owner, order.id).await;
        assert!(matches!(
            again,
            Err(OrderError::NotCancelable(CancelRefusal::Status(
                OrderStatus::Canceled
            )))
        ));
        assert_eq!(shop.stock(ItemRef::Product(a.id)).await, (7, true));
    }

    #[tokio::test]
    async fn paid_order_cannot_be_self_canceled() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(20, 5).await;
        shop.cart.add_line(owner, product.id, None, 1).await.unwrap();
        let order = shop.checkout.place_order(owner, None).await.unwrap();

        shop.payments
            .mark_paid(order.id, Some("TX-1".to_string()))
            .await
            .unwrap();

        let result = shop.orders.cancel(owner, order.id).await;
        assert!(matches!(result, Err(OrderError::NotCancelable(_))));

        // Administrators may still cancel a paid order.
        let canceled = shop
            .orders
            .set_status(order.id, OrderStatus::Canceled)
            .await
            .unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(shop.stock(ItemRef::Product(product.id)).await, (5, true));
    }

    #[tokio::test]
    async fn canceled_order_can_be_deleted() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(20, 5).await;
        shop.cart.add_line(owner, product.id, None, 1).await.unwrap();
        let order = shop.checkout.place_order(owner, None).await.unwrap();

        let early = shop.orders.delete(owner, order.id).await;
        assert!(matches!(early, Err(OrderError::OnlyCanceledOrdersDeletable { .. })));

        shop.orders.cancel(owner, order.id).await.unwrap();
        shop.orders.delete(owner, order.id).await.unwrap();
        assert_eq!(shop.store.order_count().await, 0);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checkouts_never_oversell() {
        const STOCK: u32 = 5;
        const BUYERS: usize = 20;

        let shop = create_shop();
        let product = shop.product(10, 0).await;
        let variant = shop.variant(product.id, STOCK).await;

        let mut buyers = Vec::with_capacity(BUYERS);
        for _ in 0..BUYERS {
            let owner = IdentityId::new();
            shop.cart
                .add_line(owner, product.id, Some(variant.id), 1)
                .await
                .unwrap();
            buyers.push(owner);
        }

        let tasks = buyers.into_iter().map(|owner| {
            let shop = shop.clone();
            tokio::spawn(async move { shop.checkout.place_order(owner, None).await })
        });
        let results: Vec<Result<Order, CheckoutError>> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let placed: u64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(Order::total_quantity)
            .sum();
        assert_eq!(placed, u64::from(STOCK));
        for result in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(result, CheckoutError::InsufficientStock { .. }), "{result:?}");
        }

        assert_eq!(shop.stock(ItemRef::Variant(variant.id)).await, (0, false));
        let aggregate = shop.inventory.product(product.id).await.unwrap();
        Shop::assert_invariant(&aggregate);
        assert_eq!(aggregate.stock_quantity, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_lock_sets_do_not_deadlock() {
        let shop = create_shop();
        let a = shop.product(10, 100).await;
        let b = shop.product(10, 100).await;

        let mut buyers = Vec::new();
        for i in 0..20 {
            let owner = IdentityId::new();
            // Half the carts list the products in the opposite order.
            let (first, second) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
            shop.cart.add_line(owner, first, None, 1).await.unwrap();
            shop.cart.add_line(owner, second, None, 1).await.unwrap();
            buyers.push(owner);
        }

        let tasks = buyers.into_iter().map(|owner| {
            let shop = shop.clone();
            tokio::spawn(async move { shop.checkout.place_order(owner, None).await })
        });
        let results = tokio::time::timeout(Duration::from_secs(10), join_all(tasks))
            .await
            .expect("checkouts deadlocked");

        assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
        assert_eq!(shop.stock(ItemRef::Product(a.id)).await, (80, true));
        assert_eq!(shop.stock(ItemRef::Product(b.id)).await, (80, true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_racing_payment_compensates_at_most_once() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(20, 5).await;
        shop.cart.add_line(owner, product.id, None, 2).await.unwrap();
        let order = shop.checkout.place_order(owner, None).await.unwrap();

        let cancel = {
            let shop = shop.clone();
            tokio::spawn(async move { shop.orders.cancel(owner, order.id).await })
        };
        let pay = {
            let shop = shop.clone();
            tokio::spawn(async move { shop.payments.mark_paid(order.id, None).await })
        };
        let (cancel, pay) = (cancel.await.unwrap(), pay.await.unwrap());

        // Exactly one of the two wins the order lock first.
        assert!(cancel.is_ok() != pay.is_ok());
        let final_status = shop.orders.order(owner, order.id).await.unwrap().status;
        if cancel.is_ok() {
            assert_eq!(final_status, OrderStatus::Canceled);
            assert_eq!(shop.stock(ItemRef::Product(product.id)).await, (5, true));
        } else {
            assert_eq!(final_status, OrderStatus::Paid);
            assert_eq!(shop.stock(ItemRef::Product(product.id)).await, (3, true));
        }
    }
}

mod catalog_admin {
    use super::*;

    #[tokio::test]
    async fn variant_removal_keeps_aggregate_consistent() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let chair = shop.product(100, 0).await;
        let oak = shop.variant(chair.id, 3).await;
        let pine = shop.variant(chair.id, 2).await;
        shop.cart.add_line(owner, chair.id, Some(oak.id), 1).await.unwrap();

        let in_cart = shop.inventory.remove_variant(oak.id).await;
        assert!(matches!(in_cart, Err(LedgerError::VariantInUse(_))));
        assert_eq!(shop.stock(ItemRef::Product(chair.id)).await, (5, true));

        shop.checkout.place_order(owner, None).await.unwrap();
        assert_eq!(shop.stock(ItemRef::Product(chair.id)).await, (4, true));

        // Order lines keep the variant alive after the cart is gone.
        let ordered = shop.inventory.remove_variant(oak.id).await;
        assert!(matches!(ordered, Err(LedgerError::VariantInUse(_))));

        let aggregate = shop.inventory.remove_variant(pine.id).await.unwrap();
        Shop::assert_invariant(&aggregate);
        assert!(aggregate.has_variants);
        assert_eq!(aggregate.stock_quantity, 2);
        let remaining = shop.inventory.variants_of(chair.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, oak.id);
    }

    #[tokio::test]
    async fn all_orders_lists_every_owner() {
        let shop = create_shop();
        let product = shop.product(20, 10).await;
        let mut placed = Vec::new();
        for _ in 0..3 {
            let owner = IdentityId::new();
            shop.cart.add_line(owner, product.id, None, 1).await.unwrap();
            placed.push(shop.checkout.place_order(owner, None).await.unwrap().id);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let listed: Vec<_> = shop
            .orders
            .all_orders()
            .await
            .unwrap()
            .into_iter()
            .map(|order| order.id)
            .collect();
        placed.reverse();
        assert_eq!(listed, placed);
    }
}

mod cart_races {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_leave_one_line() {
        let shop = create_shop();
        let owner = IdentityId::new();
        let product = shop.product(20, 100).await;

        let tasks = (0..8).map(|_| {
            let shop = shop.clone();
            tokio::spawn(async move { shop.cart.add_line(owner, product.id, None, 1).await })
        });
        let results = join_all(tasks).await;

        let mut added = 0;
        for result in results {
            match result.unwrap() {
                Ok(_) => added += 1,
                Err(CartError::Store(StoreError::Conflict(_))) => {}
                Err(other) => panic!("unexpected cart error: {other:?}"),
            }
        }

        let lines = shop.cart_lines(owner).await;
        assert_eq!(lines.len(), 1);
        assert!(added >= 1);
        assert!(lines[0].quantity <= added);
    }
}

mod storage_failure {
    use super::*;
    use async_trait::async_trait;
    use common::{CartLineId, OrderId, PaymentRecord};
    use std::collections::HashMap;
    use store::{InMemoryTransaction, Result as StoreResult};

    /// In-memory store whose transactions refuse to record payments.
    #[derive(Clone, Default)]
    struct PaymentlessStore {
        inner: InMemoryStore,
    }

    struct PaymentlessTransaction {
        inner: InMemoryTransaction,
    }

    #[async_trait]
    impl Store for PaymentlessStore {
        type Tx = PaymentlessTransaction;

        async fn begin(&self) -> StoreResult<Self::Tx> {
            Ok(PaymentlessTransaction {
                inner: self.inner.begin().await?,
            })
        }
    }

    #[async_trait]
    impl Transaction for PaymentlessTransaction {
        async fn insert_product(&mut self, product: &Product) -> StoreResult<()> {
            self.inner.insert_product(product).await
        }
        async fn insert_variant(&mut self, variant: &Variant) -> StoreResult<()> {
            self.inner.insert_variant(variant).await
        }
        async fn find_products(&mut self, ids: &[ProductId]) -> StoreResult<HashMap<ProductId, Product>> {
            self.inner.find_products(ids).await
        }
        async fn find_variants(&mut self, ids: &[VariantId]) -> StoreResult<HashMap<VariantId, Variant>> {
            self.inner.find_variants(ids).await
        }
        async fn variants_of(&mut self, product_id: ProductId) -> StoreResult<Vec<Variant>> {
            self.inner.variants_of(product_id).await
        }
        async fn lock_products(&mut self, ids: &[ProductId]) -> StoreResult<HashMap<ProductId, Product>> {
            self.inner.lock_products(ids).await
        }
        async fn lock_variants(&mut self, ids: &[VariantId]) -> StoreResult<HashMap<VariantId, Variant>> {
            self.inner.lock_variants(ids).await
        }
        async fn update_product(&mut self, product: &Product) -> StoreResult<()> {
            self.inner.update_product(product).await
        }
        async fn update_variant(&mut self, variant: &Variant) -> StoreResult<()> {
            self.inner.update_variant(variant).await
        }
        async fn delete_variant(&mut self, id: VariantId) -> StoreResult<()> {
            self.inner.delete_variant(id).await
        }
        async fn cart_lines(&mut self, owner: IdentityId) -> StoreResult<Vec<CartLine>> {
            self.inner.cart_lines(owner).await
        }
        async fn upsert_cart_line(&mut self, line: &CartLine) -> StoreResult<()> {
            self.inner.upsert_cart_line(line).await
        }
        async fn delete_cart_line(&mut self, owner: IdentityId, line_id: CartLineId) -> StoreResult<bool> {
            self.inner.delete_cart_line(owner, line_id).await
        }
        async fn clear_cart(&mut self, owner: IdentityId) -> StoreResult<u64> {
            self.inner.clear_cart(owner).await
        }
        async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
            self.inner.insert_order(order).await
        }
        async fn find_order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.find_order(id).await
        }
        async fn lock_order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
            self.inner.lock_order(id).await
        }
        async fn orders_for(&mut self, owner: IdentityId) -> StoreResult<Vec<Order>> {
            self.inner.orders_for(owner).await
        }
        async fn all_orders(&mut self) -> StoreResult<Vec<Order>> {
            self.inner.all_orders().await
        }
        async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> StoreResult<()> {
            self.inner.update_order_status(id, status).await
        }
        async fn delete_order(&mut self, id: OrderId) -> StoreResult<bool> {
            self.inner.delete_order(id).await
        }
        async fn insert_payment(&mut self, payment: &PaymentRecord) -> StoreResult<()> {
            Err(StoreError::Conflict(format!(
                "order {} already has a payment record",
                payment.order_id
            )))
        }
        async fn find_payment(&mut self, order_id: OrderId) -> StoreResult<Option<PaymentRecord>> {
            self.inner.find_payment(order_id).await
        }
        async fn update_payment(&mut self, payment: &PaymentRecord) -> StoreResult<()> {
            self.inner.update_payment(payment).await
        }
        async fn commit(self) -> StoreResult<()> {
            self.inner.commit().await
        }
        async fn rollback(self) -> StoreResult<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn payment_write_failure_rolls_back_reservation() {
        let store = PaymentlessStore::default();
        let inventory = InventoryService::new(store.clone());
        let cart = CartService::new(store.clone());
        let notifier = RecordingNotifier::new();
        let checkout =
            CheckoutService::new(store.clone(), InMemoryAddressBook::new(), notifier.clone());
        let owner = IdentityId::new();

        let widget = inventory
            .create_product("Widget".to_string(), Money::from_major(20), 5)
            .await
            .unwrap();
        let chair = inventory
            .create_product("Chair".to_string(), Money::from_major(100), 0)
            .await
            .unwrap();
        let oak = inventory
            .add_variant(chair.id, "Oak".to_string(), None, 3)
            .await
            .unwrap();
        cart.add_line(owner, widget.id, None, 2).await.unwrap();
        cart.add_line(owner, chair.id, Some(oak.id), 1).await.unwrap();

        let mut tx = store.inner.begin().await.unwrap();
        let products_before = tx.find_products(&[widget.id, chair.id]).await.unwrap();
        let variants_before = tx.find_variants(&[oak.id]).await.unwrap();
        drop(tx);
        let cart_before = cart.snapshot(owner).await.unwrap();

        let result = checkout.place_order(owner, None).await;
        assert!(matches!(
            result,
            Err(CheckoutError::Store(StoreError::Conflict(_)))
        ));

        let mut tx = store.inner.begin().await.unwrap();
        assert_eq!(tx.find_products(&[widget.id, chair.id]).await.unwrap(), products_before);
        assert_eq!(tx.find_variants(&[oak.id]).await.unwrap(), variants_before);
        assert!(tx.orders_for(owner).await.unwrap().is_empty());
        assert_eq!(store.inner.order_count().await, 0);
        assert_eq!(cart.snapshot(owner).await.unwrap(), cart_before);
        assert!(notifier.sent().await.is_empty());

        // The failed attempt released its row locks.
        let restock = tokio::time::timeout(
            Duration::from_secs(1),
            inventory.set_stock(ItemRef::Variant(oak.id), 4),
        )
        .await
        .expect("row locks outlived the failed checkout");
        assert!(restock.is_ok());
    }
}
