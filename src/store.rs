//! sled persistence: one tree per document kind, CBOR-encoded values
use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional, Tree};

use crate::cart::Cart;
use crate::catalog::{Catalog, Product};
use crate::error::{CommerceError, PromoRejection};
use crate::order::Order;
use crate::promo::PromoCode;

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, CommerceError> {
    minicbor::to_vec(value).map_err(|e| CommerceError::Codec(e.to_string()))
}

pub(crate) fn decode<'b, T: minicbor::Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, CommerceError> {
    Ok(minicbor::decode(bytes)?)
}

fn abort(err: impl Into<CommerceError>) -> ConflictableTransactionError<CommerceError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Result of the checkout transaction.
#[derive(Debug)]
pub enum CheckoutCommit {
    Placed(Order),
    // another order already holds the allocated number; nothing was written
    NumberTaken,
}

#[derive(Clone)]
pub struct Store {
    orders: Tree,
    order_numbers: Tree,
    sequences: Tree,
    promos: Tree,
    carts: Tree,
    products: Tree,
}

impl Store {
    pub fn open(db: Arc<sled::Db>) -> Result<Self, CommerceError> {
        Ok(Self {
            orders: db.open_tree("orders")?,
            order_numbers: db.open_tree("order_numbers")?,
            sequences: db.open_tree("sequences")?,
            promos: db.open_tree("promo_codes")?,
            carts: db.open_tree("carts")?,
            products: db.open_tree("products")?,
        })
    }

    /// Next sequence number for a calendar day. Atomic across concurrent callers.
    pub fn next_order_sequence(&self, day_stamp: &str) -> Result<u64, CommerceError> {
        let key = format!("order:{day_stamp}");
        let updated = self.sequences.update_and_fetch(key.as_bytes(), |current| {
            let previous = current
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some(previous.saturating_add(1).to_be_bytes().to_vec())
        })?;

        updated
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| CommerceError::Codec(format!("corrupt sequence counter {key}")))
    }

    /// Loads an order together with the exact bytes read, for a later compare-and-swap.
    pub fn load_order(&self, order_id: &str) -> Result<(IVec, Order), CommerceError> {
        let raw = self
            .orders
            .get(order_id.as_bytes())?
            .ok_or_else(|| CommerceError::not_found(format!("order {order_id}")))?;
        let order = decode(&raw)?;
        Ok((raw, order))
    }

    pub fn order_id_for_number(&self, order_number: &str) -> Result<Option<String>, CommerceError> {
        Ok(self
            .order_numbers
            .get(order_number.as_bytes())?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    pub fn list_orders(&self) -> Result<Vec<Order>, CommerceError> {
        self.orders
            .iter()
            .values()
            .map(|raw| decode(&raw?))
            .collect()
    }

    /// Writes `order` only if the stored bytes still equal `expected`.
    pub fn replace_order(&self, expected: &IVec, order: &Order) -> Result<(), CommerceError> {
        let encoded = encode(order)?;
        self.orders
            .compare_and_swap(order.id.as_bytes(), Some(expected), Some(encoded))?
            .map_err(|_| {
                CommerceError::Conflict(format!(
                    "order {} was modified by another request",
                    order.id
                ))
            })
    }

    /// Persists a new order in one transaction: redeems the promo code, reserves
    /// the order number, stores the order and clears the buyer's cart.
    ///
    /// `build` runs inside the transaction with the current promo record and may
    /// be called more than once if sled retries.
    pub fn commit_checkout<F>(
        &self,
        user_id: &str,
        promo_code: Option<&str>,
        build: F,
    ) -> Result<CheckoutCommit, CommerceError>
    where
        F: Fn(Option<&PromoCode>) -> Result<Order, CommerceError>,
    {
        let outcome = (&self.orders, &self.order_numbers, &self.promos, &self.carts).transaction(
            |(orders, numbers, promos, carts)| {
                let mut promo = match promo_code {
                    Some(code) => {
                        let raw = promos
                            .get(code.as_bytes())?
                            .ok_or_else(|| abort(PromoRejection::CodeNotFound))?;
                        Some(decode::<PromoCode>(&raw).map_err(abort)?)
                    }
                    None => None,
                };

                let order = build(promo.as_ref()).map_err(abort)?;
                if numbers.get(order.order_number.as_bytes())?.is_some() {
                    return Ok(CheckoutCommit::NumberTaken);
                }

                if let Some(promo) = promo.as_mut() {
                    promo.redeem().map_err(abort)?;
                    promos.insert(promo.code.as_bytes(), encode(&*promo).map_err(abort)?)?;
                }
                orders.insert(order.id.as_bytes(), encode(&order).map_err(abort)?)?;
                numbers.insert(order.order_number.as_bytes(), order.id.as_bytes())?;
                carts.remove(user_id.as_bytes())?;

                Ok(CheckoutCommit::Placed(order))
            },
        );

        outcome.map_err(|err| match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => CommerceError::Storage(err),
        })
    }

    pub fn get_promo(&self, code: &str) -> Result<Option<PromoCode>, CommerceError> {
        Ok(self.load_promo(code)?.map(|(_, promo)| promo))
    }

    pub fn load_promo(&self, code: &str) -> Result<Option<(IVec, PromoCode)>, CommerceError> {
        match self.promos.get(code.as_bytes())? {
            Some(raw) => {
                let promo = decode(&raw)?;
                Ok(Some((raw, promo)))
            }
            None => Ok(None),
        }
    }

    pub fn list_promos(&self) -> Result<Vec<PromoCode>, CommerceError> {
        self.promos.iter().values().map(|raw| decode(&raw?)).collect()
    }

    /// Inserts a promo code that must not exist yet.
    pub fn insert_promo(&self, promo: &PromoCode) -> Result<(), CommerceError> {
        let encoded = encode(promo)?;
        self.promos
            .compare_and_swap(promo.code.as_bytes(), None::<&[u8]>, Some(encoded))?
            .map_err(|_| CommerceError::Conflict(format!("promo code {} already exists", promo.code)))
    }

    pub fn replace_promo(&self, expected: &IVec, promo: &PromoCode) -> Result<(), CommerceError> {
        let encoded = encode(promo)?;
        self.promos
            .compare_and_swap(promo.code.as_bytes(), Some(expected), Some(encoded))?
            .map_err(|_| {
                CommerceError::Conflict(format!("promo code {} was modified concurrently", promo.code))
            })
    }

    pub fn get_cart(&self, user_id: &str) -> Result<Cart, CommerceError> {
        match self.carts.get(user_id.as_bytes())? {
            Some(raw) => decode(&raw),
            None => Ok(Cart::new()),
        }
    }

    /// Last write wins; only the owning user writes their cart.
    pub fn put_cart(&self, user_id: &str, cart: &Cart) -> Result<(), CommerceError> {
        if cart.is_empty() {
            self.carts.remove(user_id.as_bytes())?;
            return Ok(());
        }
        self.carts.insert(user_id.as_bytes(), encode(cart)?)?;
        Ok(())
    }

    pub fn put_product(&self, product: &Product) -> Result<(), CommerceError> {
        self.products.insert(product.id.as_bytes(), encode(product)?)?;
        Ok(())
    }
}

impl Catalog for Store {
    fn product(&self, id: &str) -> Result<Option<Product>, CommerceError> {
        match self.products.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartLine;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, Store) {
        let temp_dir = tempdir().unwrap();
        let db = sled::open(temp_dir.path().join("store.db")).unwrap();
        let store = Store::open(Arc::new(db)).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn day_sequences_are_independent() {
        let (_dir, store) = store();
        assert_eq!(store.next_order_sequence("20240101").unwrap(), 1);
        assert_eq!(store.next_order_sequence("20240101").unwrap(), 2);
        assert_eq!(store.next_order_sequence("20240102").unwrap(), 1);
    }

    #[test]
    fn empty_cart_is_not_stored() {
        let (_dir, store) = store();
        let cart = Cart::from_lines(vec![CartLine::new("p1", 1)]).unwrap();
        store.put_cart("alice", &cart).unwrap();
        assert_eq!(store.get_cart("alice").unwrap(), cart);

        store.put_cart("alice", &Cart::new()).unwrap();
        assert!(store.carts.get("alice").unwrap().is_none());
    }

    #[test]
    fn missing_order_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.load_order("order_1x"), Err(CommerceError::NotFound(_))));
    }
}
