//! Payment and fulfillment state machine for orders
//!
//! Payment status and fulfillment status move independently, but fulfillment
//! only advances once payment has been verified. Every applied transition
//! appends one entry to the order's status history; entries are never edited.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommerceError;
use crate::order::Order;
use crate::types::TimeStamp;

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Verified,
    #[n(2)]
    Rejected,
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Processing,
    #[n(2)]
    Shipped,
    #[n(3)]
    Delivered,
    #[n(4)]
    Cancelled,
}

impl OrderStatus {
    /// Next step on the forward path `pending → processing → shipped → delivered`.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Processing),
            Self::Processing => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled => None,
        }
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// Status recorded in a history entry; spans both payment and fulfillment.
#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[n(0)]
    Pending,
    #[n(1)]
    Verified,
    #[n(2)]
    Rejected,
    #[n(3)]
    Processing,
    #[n(4)]
    Shipped,
    #[n(5)]
    Delivered,
    #[n(6)]
    Cancelled,
}

impl From<OrderStatus> for StatusKind {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::Pending => Self::Pending,
            OrderStatus::Processing => Self::Processing,
            OrderStatus::Shipped => Self::Shipped,
            OrderStatus::Delivered => Self::Delivered,
            OrderStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl From<PaymentStatus> for StatusKind {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Pending => Self::Pending,
            PaymentStatus::Verified => Self::Verified,
            PaymentStatus::Rejected => Self::Rejected,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    #[n(0)]
    pub status: StatusKind,
    #[n(1)]
    pub timestamp: TimeStamp,
    #[n(2)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    // user id of whoever performed the transition
    #[n(3)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl StatusEntry {
    pub fn new(
        status: StatusKind,
        timestamp: TimeStamp,
        note: Option<String>,
        actor: Option<String>,
    ) -> Self {
        Self {
            status,
            timestamp,
            note,
            actor,
        }
    }
}

/// Whether a transition changed the order or was a repeat of the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

/// An administrative change requested against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    VerifyPayment,
    RejectPayment,
    Advance {
        target: OrderStatus,
        tracking_number: Option<String>,
    },
    Cancel,
}

impl Transition {
    pub fn target(&self) -> StatusKind {
        match self {
            Self::VerifyPayment => StatusKind::Verified,
            Self::RejectPayment => StatusKind::Rejected,
            Self::Advance { target, .. } => StatusKind::from(*target),
            Self::Cancel => StatusKind::Cancelled,
        }
    }
}

fn invalid(current: impl Into<StatusKind>, attempted: StatusKind, reason: &'static str) -> CommerceError {
    CommerceError::InvalidTransition {
        current: current.into(),
        attempted,
        reason,
    }
}

fn clean(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

impl Order {
    fn record(&mut self, status: StatusKind, note: Option<String>, actor: &str, at: TimeStamp) {
        self.status_history
            .push(StatusEntry::new(status, at, clean(note), Some(actor.to_string())));
        self.updated_at = at;
    }

    /// Most recent status in the history.
    pub fn latest_status(&self) -> Option<StatusKind> {
        self.status_history.last().map(|entry| entry.status)
    }

    pub fn apply(
        &mut self,
        transition: Transition,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        match transition {
            Transition::VerifyPayment => self.verify_payment(note, actor, at),
            Transition::RejectPayment => self.reject_payment(note, actor, at),
            Transition::Advance {
                target,
                tracking_number,
            } => self.advance_fulfillment(target, tracking_number, note, actor, at),
            Transition::Cancel => self.cancel(note, actor, at),
        }
    }

    pub fn verify_payment(
        &mut self,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        self.settle_payment(PaymentStatus::Verified, note, actor, at)
    }

    /// Terminal for payment: fulfillment can no longer advance afterwards.
    pub fn reject_payment(
        &mut self,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        self.settle_payment(PaymentStatus::Rejected, note, actor, at)
    }

    fn settle_payment(
        &mut self,
        outcome: PaymentStatus,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        let attempted = StatusKind::from(outcome);
        if self.payment_status == outcome {
            return Ok(Applied::Unchanged);
        }
        if self.payment_status != PaymentStatus::Pending {
            return Err(invalid(
                self.payment_status,
                attempted,
                "payment has already been settled",
            ));
        }
        if self.order_status == OrderStatus::Cancelled {
            return Err(invalid(self.order_status, attempted, "order is cancelled"));
        }

        self.payment_status = outcome;
        self.record(attempted, note, actor, at);
        Ok(Applied::Changed)
    }

    /// Moves fulfillment one step forward. Shipping must carry a tracking number.
    pub fn advance_fulfillment(
        &mut self,
        target: OrderStatus,
        tracking_number: Option<String>,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        let attempted = StatusKind::from(target);
        match target {
            OrderStatus::Pending => {
                return Err(invalid(self.order_status, attempted, "orders cannot return to pending"));
            }
            OrderStatus::Cancelled => {
                return Err(invalid(self.order_status, attempted, "use cancel to cancel an order"));
            }
            _ => {}
        }
        let tracking_number = tracking_number
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if self.order_status == target {
            // repeating a shipment may restate its tracking number but not change it
            if target == OrderStatus::Shipped
                && tracking_number.is_some()
                && tracking_number != self.tracking_number
            {
                return Err(invalid(
                    self.order_status,
                    attempted,
                    "order already shipped with a different tracking number",
                ));
            }
            return Ok(Applied::Unchanged);
        }
        if self.order_status == OrderStatus::Cancelled {
            return Err(invalid(self.order_status, attempted, "order is cancelled"));
        }
        match self.payment_status {
            PaymentStatus::Verified => {}
            PaymentStatus::Pending => {
                return Err(invalid(
                    self.payment_status,
                    attempted,
                    "payment has not been verified",
                ));
            }
            PaymentStatus::Rejected => {
                return Err(invalid(self.payment_status, attempted, "payment was rejected"));
            }
        }
        if self.order_status.successor() != Some(target) {
            return Err(invalid(
                self.order_status,
                attempted,
                "fulfillment must follow pending, processing, shipped, delivered",
            ));
        }

        if target == OrderStatus::Shipped {
            let current = self.order_status;
            let tracking = tracking_number
                .ok_or_else(|| invalid(current, attempted, "shipping requires a tracking number"))?;
            self.tracking_number = Some(tracking);
        }

        self.order_status = target;
        self.record(attempted, note, actor, at);
        Ok(Applied::Changed)
    }

    /// Allowed until the order ships.
    pub fn cancel(
        &mut self,
        note: Option<String>,
        actor: &str,
        at: TimeStamp,
    ) -> Result<Applied, CommerceError> {
        if self.order_status == OrderStatus::Cancelled {
            return Ok(Applied::Unchanged);
        }
        if !self.order_status.is_cancellable() {
            return Err(invalid(
                self.order_status,
                StatusKind::Cancelled,
                "orders cannot be cancelled once shipped",
            ));
        }

        self.order_status = OrderStatus::Cancelled;
        self.record(StatusKind::Cancelled, note, actor, at);
        Ok(Applied::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartLine;
    use crate::catalog::Product;
    use crate::order::{Charges, CheckoutRequest, LineItem, NewOrder};
    use crate::types::{Address, PaymentMethod};

    fn order() -> Order {
        let product = Product {
            id: "productA".into(),
            name: "Thangka".into(),
            price: 500,
            sale_price: None,
            stock: 10,
            category: "art".into(),
            image: String::new(),
        };
        let items = vec![LineItem::from_product(&product, &CartLine::new("productA", 2))];
        let checkout = CheckoutRequest::new()
            .set_shipping_address(Address {
                street: "Thamel".into(),
                city: "Kathmandu".into(),
                state: "Bagmati".into(),
                postal_code: "44600".into(),
                country: "Nepal".into(),
                ..Default::default()
            })
            .set_payment_method(PaymentMethod::Khalti)
            .set_transaction_ref("KH-1")
            .set_payment_proof("https://cdn.storefront.test/p.png");
        let totals = Charges::default().totals(&items, 0).unwrap();

        Order::place(NewOrder {
            id: "order_1".into(),
            order_number: "ORD-20240101-0001".into(),
            user_id: "buyer".into(),
            items,
            totals,
            promo_code: None,
            checkout: &checkout,
            placed_at: TimeStamp::new(),
        })
        .unwrap()
    }

    #[test]
    fn reverifying_is_a_noop() {
        let mut order = order();
        assert_eq!(order.verify_payment(None, "admin", TimeStamp::new()).unwrap(), Applied::Changed);
        assert_eq!(order.verify_payment(None, "admin", TimeStamp::new()).unwrap(), Applied::Unchanged);
        assert_eq!(order.status_history.len(), 2);
    }

    #[test]
    fn rejected_payment_blocks_fulfillment() {
        let mut order = order();
        order.reject_payment(Some("proof unreadable".into()), "admin", TimeStamp::new()).unwrap();

        let err = order
            .advance_fulfillment(OrderStatus::Processing, None, None, "admin", TimeStamp::new())
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert!(order.verify_payment(None, "admin", TimeStamp::new()).is_err());
        assert_eq!(order.latest_status(), Some(StatusKind::Rejected));
    }

    #[test]
    fn shipping_without_tracking_fails_and_leaves_order_untouched() {
        let mut order = order();
        order.verify_payment(None, "admin", TimeStamp::new()).unwrap();
        order
            .advance_fulfillment(OrderStatus::Processing, None, None, "admin", TimeStamp::new())
            .unwrap();
        let before = order.clone();

        let err = order
            .advance_fulfillment(OrderStatus::Shipped, Some("  ".into()), None, "admin", TimeStamp::new())
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(order, before);
    }

    #[test]
    fn reshipping_cannot_change_tracking_number() {
        let mut order = order();
        order.verify_payment(None, "admin", TimeStamp::new()).unwrap();
        order
            .advance_fulfillment(OrderStatus::Processing, None, None, "admin", TimeStamp::new())
            .unwrap();
        order
            .advance_fulfillment(OrderStatus::Shipped, Some("TRK1".into()), None, "admin", TimeStamp::new())
            .unwrap();

        let err = order
            .advance_fulfillment(OrderStatus::Shipped, Some("TRK2".into()), None, "admin", TimeStamp::new())
            .unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(order.tracking_number.as_deref(), Some("TRK1"));

        let same = order
            .advance_fulfillment(OrderStatus::Shipped, Some(" TRK1 ".into()), None, "admin", TimeStamp::new())
            .unwrap();
        assert_eq!(same, Applied::Unchanged);
        let bare = order
            .advance_fulfillment(OrderStatus::Shipped, None, None, "admin", TimeStamp::new())
            .unwrap();
        assert_eq!(bare, Applied::Unchanged);
        assert_eq!(order.status_history.len(), 4);
    }

    #[test]
    fn blank_notes_are_dropped() {
        let mut order = order();
        order.verify_payment(Some("   ".into()), "admin", TimeStamp::new()).unwrap();
        assert_eq!(order.status_history[1].note, None);
        assert_eq!(order.status_history[1].actor.as_deref(), Some("admin"));
    }
}
