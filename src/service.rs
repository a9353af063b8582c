//! Service layer API for checkout, order administration, promo codes and carts
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::cart::{self, Cart, CartLine, VariantKey};
use crate::catalog::{Catalog, Product};
use crate::error::{CommerceError, PromoRejection};
use crate::lifecycle::{Applied, OrderStatus, PaymentStatus, Transition};
use crate::order::{self, Charges, CheckoutRequest, LineItem, NewOrder, Order};
use crate::promo::{self, PromoCode, PromoQuote};
use crate::store::{CheckoutCommit, Store};
use crate::types::{Amount, TimeStamp};
use crate::utils;

const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// A line whose product has less stock than the order asks for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockWarning {
    pub product_id: String,
    pub name: String,
    pub requested: u32,
    pub available: u32,
}

/// An order after an administrative transition, with any stock advisories.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    #[serde(flatten)]
    pub order: Order,
    pub stock_warnings: Vec<StockWarning>,
}

pub struct Storefront {
    store: Store,
    catalog: Arc<dyn Catalog>,
    charges: Charges,
}

impl Storefront {
    /// Uses the sled product tree as the catalog.
    pub fn new(instance: Arc<sled::Db>, charges: Charges) -> Result<Self, CommerceError> {
        let store = Store::open(instance)?;
        Ok(Self {
            catalog: Arc::new(store.clone()),
            store,
            charges,
        })
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn product(&self, product_id: &str) -> Result<Product, CommerceError> {
        self.catalog
            .product(product_id)?
            .ok_or_else(|| CommerceError::not_found(format!("product {product_id}")))
    }

    /// Places an order from the request lines, or from the stored cart when the request has none.
    pub fn place_order(
        &self,
        buyer: &Identity,
        checkout: CheckoutRequest,
    ) -> Result<Order, CommerceError> {
        checkout.validate()?;

        let lines = if checkout.items.is_empty() {
            self.store.get_cart(&buyer.user_id)?.items
        } else {
            Cart::from_lines(checkout.items.clone())?.items
        };
        if lines.is_empty() {
            return Err(CommerceError::validation("cart is empty"));
        }

        // snapshot prices now; the order never reads the catalog again
        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = self.product(&line.product_id)?;
            items.push(LineItem::from_product(&product, line));
        }
        let subtotal = order::subtotal(&items)?;
        let categories = order::categories(&items);
        let promo_code = checkout
            .promo_code
            .as_deref()
            .map(promo::normalize_code)
            .filter(|code| !code.is_empty());

        let placed_at = TimeStamp::new();
        let day = placed_at.day_stamp();

        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let sequence = self.store.next_order_sequence(&day)?;
            let order_number = order::format_order_number(&day, sequence);
            let order_id = utils::new_uuid_to_bech32("order_")?;

            let commit = self.store.commit_checkout(
                &buyer.user_id,
                promo_code.as_deref(),
                |promo| {
                    let discount = match promo {
                        Some(promo) => promo.evaluate(subtotal, &categories, placed_at)?.discount_amount,
                        None => 0,
                    };
                    Order::place(NewOrder {
                        id: order_id.clone(),
                        order_number: order_number.clone(),
                        user_id: buyer.user_id.clone(),
                        items: items.clone(),
                        totals: self.charges.totals(&items, discount)?,
                        promo_code: promo.map(|p| p.code.clone()),
                        checkout: &checkout,
                        placed_at,
                    })
                },
            );

            match commit {
                Ok(CheckoutCommit::Placed(order)) => {
                    info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        user_id = %order.user_id,
                        total = order.total_amount,
                        promo = ?order.promo_code,
                        "order placed"
                    );
                    return Ok(order);
                }
                Ok(CheckoutCommit::NumberTaken) => {
                    warn!(%order_number, "order number already allocated, retrying");
                }
                Err(CommerceError::Promo(reason)) => {
                    warn!(user_id = %buyer.user_id, code = ?promo_code, %reason, "promo refused at checkout");
                    return Err(reason.into());
                }
                Err(err) => return Err(err),
            }
        }

        Err(CommerceError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }

    /// Owner or admin only.
    pub fn get_order(&self, caller: &Identity, order_id: &str) -> Result<Order, CommerceError> {
        let (_, order) = self.store.load_order(order_id)?;
        if !caller.is_admin() && !order.is_owned_by(&caller.user_id) {
            return Err(CommerceError::Forbidden(format!(
                "order {order_id} belongs to another user"
            )));
        }
        Ok(order)
    }

    /// Newest first. Admins see every order, buyers their own.
    pub fn list_orders(&self, caller: &Identity) -> Result<Vec<Order>, CommerceError> {
        let mut orders: Vec<Order> = self
            .store
            .list_orders()?
            .into_iter()
            .filter(|o| caller.is_admin() || o.is_owned_by(&caller.user_id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Applies an admin transition. `expected_version`, when given, must match the stored order.
    pub fn update_order(
        &self,
        admin: &Identity,
        order_id: &str,
        transition: Transition,
        note: Option<String>,
        expected_version: Option<u64>,
    ) -> Result<TransitionOutcome, CommerceError> {
        admin.require_admin()?;
        self.transition(admin, order_id, transition, note, expected_version, |_| Ok(()))
    }

    pub fn verify_payment(
        &self,
        admin: &Identity,
        order_id: &str,
        note: Option<String>,
    ) -> Result<TransitionOutcome, CommerceError> {
        self.update_order(admin, order_id, Transition::VerifyPayment, note, None)
    }

    pub fn reject_payment(
        &self,
        admin: &Identity,
        order_id: &str,
        note: Option<String>,
    ) -> Result<Order, CommerceError> {
        self.update_order(admin, order_id, Transition::RejectPayment, note, None)
            .map(|outcome| outcome.order)
    }

    pub fn advance_fulfillment(
        &self,
        admin: &Identity,
        order_id: &str,
        target: OrderStatus,
        tracking_number: Option<String>,
        note: Option<String>,
    ) -> Result<Order, CommerceError> {
        let transition = Transition::Advance {
            target,
            tracking_number,
        };
        self.update_order(admin, order_id, transition, note, None)
            .map(|outcome| outcome.order)
    }

    /// Admins may cancel until shipment; buyers only while nothing has been settled.
    pub fn cancel_order(
        &self,
        caller: &Identity,
        order_id: &str,
        note: Option<String>,
        expected_version: Option<u64>,
    ) -> Result<Order, CommerceError> {
        let guard = |order: &Order| {
            if caller.is_admin() {
                return Ok(());
            }
            if !order.is_owned_by(&caller.user_id) {
                return Err(CommerceError::Forbidden(format!(
                    "order {order_id} belongs to another user"
                )));
            }
            if order.order_status != OrderStatus::Pending
                || order.payment_status != PaymentStatus::Pending
            {
                return Err(CommerceError::Forbidden(
                    "only pending orders can be cancelled by the buyer".to_string(),
                ));
            }
            Ok(())
        };
        self.transition(caller, order_id, Transition::Cancel, note, expected_version, guard)
            .map(|outcome| outcome.order)
    }

    /// Loads, checks and applies a transition. `guard` sees the same stored
    /// bytes the compare-and-swap is made against, so a write in between
    /// surfaces as a conflict instead of bypassing the guard.
    fn transition(
        &self,
        actor: &Identity,
        order_id: &str,
        transition: Transition,
        note: Option<String>,
        expected_version: Option<u64>,
        guard: impl Fn(&Order) -> Result<(), CommerceError>,
    ) -> Result<TransitionOutcome, CommerceError> {
        let (raw, mut order) = self.store.load_order(order_id)?;
        guard(&order)?;
        if let Some(expected) = expected_version {
            if expected != order.version {
                warn!(%order_id, expected, stored = order.version, "stale order version");
                return Err(CommerceError::Conflict(format!(
                    "order {order_id} is at version {}, not {expected}",
                    order.version
                )));
            }
        }

        let stock_warnings = match transition {
            Transition::VerifyPayment if order.payment_status == PaymentStatus::Pending => {
                self.shortfalls(&order)?
            }
            _ => Vec::new(),
        };

        let attempted = transition.target();
        match order.apply(transition, note, &actor.user_id, TimeStamp::new())? {
            Applied::Unchanged => {
                debug!(%order_id, status = %attempted, "transition already applied");
            }
            Applied::Changed => {
                order.version += 1;
                self.store.replace_order(&raw, &order)?;
                info!(
                    %order_id,
                    order_number = %order.order_number,
                    status = %attempted,
                    actor = %actor.user_id,
                    version = order.version,
                    "order transitioned"
                );
            }
        }

        Ok(TransitionOutcome {
            order,
            stock_warnings,
        })
    }

    /// Advisory only, and only while payment is still pending.
    pub fn stock_warnings(
        &self,
        admin: &Identity,
        order_id: &str,
    ) -> Result<Vec<StockWarning>, CommerceError> {
        admin.require_admin()?;
        let (_, order) = self.store.load_order(order_id)?;
        if order.payment_status != PaymentStatus::Pending {
            return Ok(Vec::new());
        }
        self.shortfalls(&order)
    }

    fn shortfalls(&self, order: &Order) -> Result<Vec<StockWarning>, CommerceError> {
        // variants of one product draw on the same stock
        let mut requested: Vec<(&LineItem, u32)> = Vec::new();
        for item in &order.items {
            match requested.iter_mut().find(|(i, _)| i.product_id == item.product_id) {
                Some((_, quantity)) => *quantity = quantity.saturating_add(item.quantity),
                None => requested.push((item, item.quantity)),
            }
        }

        let mut warnings = Vec::new();
        for (item, quantity) in requested {
            let available = self
                .catalog
                .product(&item.product_id)?
                .map(|p| p.stock)
                .unwrap_or(0);
            if available < quantity {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    requested = quantity,
                    available,
                    "insufficient stock for pending order"
                );
                warnings.push(StockWarning {
                    product_id: item.product_id.clone(),
                    name: item.name.clone(),
                    requested: quantity,
                    available,
                });
            }
        }
        Ok(warnings)
    }

    /// Quotes a discount without counting a redemption.
    pub fn validate_promo(
        &self,
        code: &str,
        cart_total: Amount,
        categories: &[String],
    ) -> Result<PromoQuote, CommerceError> {
        let code = promo::normalize_code(code);
        let promo = self
            .store
            .get_promo(&code)?
            .ok_or(PromoRejection::CodeNotFound)?;
        Ok(promo.evaluate(cart_total, categories, TimeStamp::new())?)
    }

    pub fn create_promo(
        &self,
        admin: &Identity,
        mut promo: PromoCode,
    ) -> Result<PromoCode, CommerceError> {
        admin.require_admin()?;
        promo.code = promo::normalize_code(&promo.code);
        promo.usage_count = 0;
        promo.validate_definition()?;
        self.store.insert_promo(&promo)?;
        info!(code = %promo.code, percentage = promo.discount_percentage, "promo code created");
        Ok(promo)
    }

    /// Edits a promo code; the redemption count is kept from storage.
    pub fn update_promo(
        &self,
        admin: &Identity,
        code: &str,
        mut promo: PromoCode,
    ) -> Result<PromoCode, CommerceError> {
        admin.require_admin()?;
        let code = promo::normalize_code(code);
        let (raw, stored) = self
            .store
            .load_promo(&code)?
            .ok_or_else(|| CommerceError::not_found(format!("promo code {code}")))?;

        promo.code = code;
        promo.usage_count = stored.usage_count;
        promo.validate_definition()?;
        self.store.replace_promo(&raw, &promo)?;
        info!(code = %promo.code, "promo code updated");
        Ok(promo)
    }

    pub fn list_promos(&self, admin: &Identity) -> Result<Vec<PromoCode>, CommerceError> {
        admin.require_admin()?;
        self.store.list_promos()
    }

    pub fn get_cart(&self, user: &Identity) -> Result<Cart, CommerceError> {
        self.store.get_cart(&user.user_id)
    }

    pub fn add_to_cart(&self, user: &Identity, line: CartLine) -> Result<Cart, CommerceError> {
        line.validate()?;
        self.product(&line.product_id)?;

        let mut cart = self.store.get_cart(&user.user_id)?;
        cart.add(line)?;
        self.store.put_cart(&user.user_id, &cart)?;
        debug!(user_id = %user.user_id, lines = cart.len(), "cart line added");
        Ok(cart)
    }

    /// Replaces the stored cart with the given lines.
    pub fn sync_cart(&self, user: &Identity, lines: Vec<CartLine>) -> Result<Cart, CommerceError> {
        for line in &lines {
            line.validate()?;
            self.product(&line.product_id)?;
        }
        let cart = Cart::from_lines(lines)?;
        self.store.put_cart(&user.user_id, &cart)?;
        debug!(user_id = %user.user_id, lines = cart.len(), "cart synced");
        Ok(cart)
    }

    pub fn remove_from_cart(&self, user: &Identity, key: &VariantKey) -> Result<Cart, CommerceError> {
        let mut cart = self.store.get_cart(&user.user_id)?;
        if !cart.remove(key) {
            return Err(CommerceError::not_found(format!(
                "cart line for product {}",
                key.product_id
            )));
        }
        self.store.put_cart(&user.user_id, &cart)?;
        debug!(user_id = %user.user_id, product_id = %key.product_id, "cart line removed");
        Ok(cart)
    }

    pub fn clear_cart(&self, user: &Identity) -> Result<Cart, CommerceError> {
        let cart = Cart::new();
        self.store.put_cart(&user.user_id, &cart)?;
        debug!(user_id = %user.user_id, "cart cleared");
        Ok(cart)
    }

    /// One-time reconciliation when a session logs in; the server cart is authoritative afterwards.
    pub fn merge_cart(&self, user: &Identity, local: Vec<CartLine>) -> Result<Cart, CommerceError> {
        for line in &local {
            line.validate()?;
            self.product(&line.product_id)?;
        }
        let local = Cart::from_lines(local)?;
        let server = self.store.get_cart(&user.user_id)?;
        let merged = cart::merge(&server, &local);
        self.store.put_cart(&user.user_id, &merged)?;
        info!(
            user_id = %user.user_id,
            server_lines = server.len(),
            local_lines = local.len(),
            merged_lines = merged.len(),
            "local cart merged"
        );
        Ok(merged)
    }

    pub fn get_product(&self, product_id: &str) -> Result<Product, CommerceError> {
        self.product(product_id)
    }

    /// Seeds the built-in catalog.
    pub fn upsert_product(&self, admin: &Identity, product: Product) -> Result<Product, CommerceError> {
        admin.require_admin()?;
        product.validate()?;
        self.store.put_product(&product)?;
        info!(product_id = %product.id, stock = product.stock, "product saved");
        Ok(product)
    }
}
