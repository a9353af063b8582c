//! Orders, their frozen line-item snapshot and checkout pricing
use serde::{Deserialize, Serialize};

use crate::cart::CartLine;
use crate::catalog::Product;
use crate::error::CommerceError;
use crate::lifecycle::{OrderStatus, PaymentStatus, StatusEntry, StatusKind};
use crate::types::{Address, Amount, PaymentMethod, TimeStamp};
use crate::utils::percent_of;

/// A purchased line, copied from the product at checkout and never re-read.
#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub unit_price: Amount,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub image: String,
    #[n(5)]
    pub category: String,
    #[n(6)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[n(7)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl LineItem {
    pub fn from_product(product: &Product, line: &CartLine) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.unit_price(),
            quantity: line.quantity,
            image: product.image.clone(),
            category: product.category.clone(),
            color: line.color.clone(),
            size: line.size.clone(),
        }
    }

    /// `None` when the line does not fit in an `Amount`.
    pub fn line_total(&self) -> Option<Amount> {
        self.unit_price.checked_mul(u64::from(self.quantity))
    }
}

fn out_of_range() -> CommerceError {
    CommerceError::validation("order total out of range")
}

pub fn subtotal(items: &[LineItem]) -> Result<Amount, CommerceError> {
    items.iter().try_fold(0, |acc: Amount, item| {
        item.line_total()
            .and_then(|total| acc.checked_add(total))
            .ok_or_else(out_of_range)
    })
}

/// Distinct categories present in a set of items.
pub fn categories(items: &[LineItem]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|c| c == &item.category) {
            out.push(item.category.clone());
        }
    }
    out
}

/// Shipping and tax policy applied on top of the discounted subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charges {
    pub shipping_cost: Amount,
    pub tax_rate_percent: u8,
    pub free_shipping_over: Option<Amount>,
}

impl Default for Charges {
    fn default() -> Self {
        Self {
            shipping_cost: 100,
            tax_rate_percent: 13,
            free_shipping_over: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Amount,
    pub discount: Amount,
    pub shipping_cost: Amount,
    pub tax_amount: Amount,
    pub total_amount: Amount,
}

impl Totals {
    /// `total = subtotal - discount + shipping + tax`
    pub fn is_consistent(&self) -> bool {
        self.subtotal
            .checked_sub(self.discount)
            .and_then(|taxable| taxable.checked_add(self.shipping_cost))
            .and_then(|sum| sum.checked_add(self.tax_amount))
            == Some(self.total_amount)
    }
}

impl Charges {
    pub fn totals(&self, items: &[LineItem], discount: Amount) -> Result<Totals, CommerceError> {
        let subtotal = subtotal(items)?;
        let discount = discount.min(subtotal);
        let taxable = subtotal - discount;

        let shipping_cost = match self.free_shipping_over {
            Some(threshold) if taxable >= threshold => 0,
            _ => self.shipping_cost,
        };
        let tax_amount = percent_of(taxable, u64::from(self.tax_rate_percent));

        let total_amount = taxable
            .checked_add(shipping_cost)
            .and_then(|sum| sum.checked_add(tax_amount))
            .ok_or_else(out_of_range)?;

        Ok(Totals {
            subtotal,
            discount,
            shipping_cost,
            tax_amount,
            total_amount,
        })
    }
}

/// Buyer-supplied checkout data. Prices and totals are never taken from here.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    pub shipping_address: Option<Address>,
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub transaction_ref: String,
    #[serde(default)]
    pub payment_proof: String,
    #[serde(default)]
    pub promo_code: Option<String>,
}

impl CheckoutRequest {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_item(mut self, line: CartLine) -> Self {
        self.items.push(line);
        self
    }
    pub fn set_shipping_address(mut self, address: Address) -> Self {
        self.shipping_address = Some(address);
        self
    }
    pub fn set_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }
    pub fn set_transaction_ref(mut self, reference: impl Into<String>) -> Self {
        self.transaction_ref = reference.into();
        self
    }
    pub fn set_payment_proof(mut self, uri: impl Into<String>) -> Self {
        self.payment_proof = uri.into();
        self
    }
    pub fn set_promo_code(mut self, code: impl Into<String>) -> Self {
        self.promo_code = Some(code.into());
        self
    }

    /// Checks the buyer-supplied fields; cart contents are checked against the catalog later.
    pub fn validate(&self) -> Result<(), CommerceError> {
        let Some(address) = &self.shipping_address else {
            return Err(CommerceError::validation("shipping address is required"));
        };
        address.validate()?;

        if self.payment_method.is_none() {
            return Err(CommerceError::validation("payment method is required"));
        }
        if self.transaction_ref.trim().is_empty() {
            return Err(CommerceError::validation("transaction reference is required"));
        }
        if self.payment_proof.trim().is_empty() {
            return Err(CommerceError::validation("payment proof is required"));
        }
        for line in &self.items {
            line.validate()?;
        }
        Ok(())
    }
}

/// `ORD-YYYYMMDD-NNNN`
pub fn format_order_number(day_stamp: &str, sequence: u64) -> String {
    format!("ORD-{day_stamp}-{sequence:04}")
}

pub fn items_digest(items: &[LineItem]) -> Result<String, CommerceError> {
    let cbor = minicbor::to_vec(items).map_err(|e| CommerceError::Codec(e.to_string()))?;
    Ok(sha256::digest(&cbor))
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_number: String,
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub items: Vec<LineItem>,
    #[n(4)]
    pub items_digest: String,
    #[n(5)]
    pub subtotal: Amount,
    #[n(6)]
    pub discount: Amount,
    #[n(7)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    #[n(8)]
    pub shipping_cost: Amount,
    #[n(9)]
    pub tax_amount: Amount,
    #[n(10)]
    pub total_amount: Amount,
    #[n(11)]
    pub shipping_address: Address,
    #[n(12)]
    pub payment_method: PaymentMethod,
    #[n(13)]
    pub transaction_ref: String,
    #[n(14)]
    pub payment_proof_image: String,
    #[n(15)]
    pub payment_status: PaymentStatus,
    #[n(16)]
    pub order_status: OrderStatus,
    #[n(17)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[n(18)]
    pub status_history: Vec<StatusEntry>,
    #[n(19)]
    pub version: u64,
    #[n(20)]
    pub created_at: TimeStamp,
    #[n(21)]
    pub updated_at: TimeStamp,
}

/// Everything needed to open a new order.
pub struct NewOrder<'a> {
    pub id: String,
    pub order_number: String,
    pub user_id: String,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub promo_code: Option<String>,
    pub checkout: &'a CheckoutRequest,
    pub placed_at: TimeStamp,
}

impl Order {
    pub fn place(new: NewOrder<'_>) -> Result<Self, CommerceError> {
        if new.items.is_empty() {
            return Err(CommerceError::validation("cannot place an order with no items"));
        }
        if !new.totals.is_consistent() || new.totals.subtotal != subtotal(&new.items)? {
            return Err(CommerceError::validation("order totals do not add up"));
        }
        let shipping_address = new
            .checkout
            .shipping_address
            .clone()
            .ok_or_else(|| CommerceError::validation("shipping address is required"))?;
        let payment_method = new
            .checkout
            .payment_method
            .ok_or_else(|| CommerceError::validation("payment method is required"))?;

        let items_digest = items_digest(&new.items)?;

        Ok(Self {
            id: new.id,
            order_number: new.order_number,
            user_id: new.user_id.clone(),
            items: new.items,
            items_digest,
            subtotal: new.totals.subtotal,
            discount: new.totals.discount,
            promo_code: new.promo_code,
            shipping_cost: new.totals.shipping_cost,
            tax_amount: new.totals.tax_amount,
            total_amount: new.totals.total_amount,
            shipping_address,
            payment_method,
            transaction_ref: new.checkout.transaction_ref.trim().to_string(),
            payment_proof_image: new.checkout.payment_proof.trim().to_string(),
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
            tracking_number: None,
            status_history: vec![StatusEntry::new(
                StatusKind::Pending,
                new.placed_at,
                Some("Order placed".to_string()),
                Some(new.user_id),
            )],
            version: 1,
            created_at: new.placed_at,
            updated_at: new.placed_at,
        })
    }

    pub fn totals(&self) -> Totals {
        Totals {
            subtotal: self.subtotal,
            discount: self.discount,
            shipping_cost: self.shipping_cost,
            tax_amount: self.tax_amount,
            total_amount: self.total_amount,
        }
    }

    /// True when the stored snapshot still hashes to the digest taken at checkout.
    pub fn items_intact(&self) -> bool {
        items_digest(&self.items).is_ok_and(|d| d == self.items_digest)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
