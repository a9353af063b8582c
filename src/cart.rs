//! Shopping cart lines and the login-time merge of a local cart into the server cart
use serde::{Deserialize, Serialize};

use crate::error::CommerceError;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub quantity: u32,
    #[n(2)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[n(3)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// Identifies one variant of a product within a cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub product_id: String,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            color: None,
            size: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn key(&self) -> VariantKey {
        VariantKey {
            product_id: self.product_id.clone(),
            color: self.color.clone(),
            size: self.size.clone(),
        }
    }

    fn same_variant(&self, other: &CartLine) -> bool {
        self.product_id == other.product_id && self.color == other.color && self.size == other.size
    }

    fn matches(&self, key: &VariantKey) -> bool {
        self.product_id == key.product_id && self.color == key.color && self.size == key.size
    }

    pub fn validate(&self) -> Result<(), CommerceError> {
        if self.product_id.trim().is_empty() {
            return Err(CommerceError::validation("cart line is missing a product"));
        }
        if self.quantity == 0 {
            return Err(CommerceError::validation(format!(
                "quantity for {} must be at least 1",
                self.product_id
            )));
        }
        Ok(())
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[n(0)]
    pub items: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cart from arbitrary lines, folding repeated variants together.
    pub fn from_lines(lines: Vec<CartLine>) -> Result<Self, CommerceError> {
        let mut cart = Self::new();
        for line in lines {
            cart.add(line)?;
        }
        Ok(cart)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Adds a line; re-adding an existing variant increases its quantity.
    pub fn add(&mut self, line: CartLine) -> Result<(), CommerceError> {
        line.validate()?;
        match self.items.iter_mut().find(|l| l.same_variant(&line)) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            }
            None => self.items.push(line),
        }
        Ok(())
    }

    /// Removes a variant, returning whether anything was removed.
    pub fn remove(&mut self, key: &VariantKey) -> bool {
        let before = self.items.len();
        self.items.retain(|l| !l.matches(key));
        before != self.items.len()
    }

    pub fn quantity_of(&self, key: &VariantKey) -> Option<u32> {
        self.items.iter().find(|l| l.matches(key)).map(|l| l.quantity)
    }
}

/// Folds a locally held cart into the server cart when a session authenticates.
///
/// The server cart is the base. Local-only variants are appended in their
/// local order; shared variants take the larger of the two quantities.
pub fn merge(server: &Cart, local: &Cart) -> Cart {
    let mut merged = server.clone();
    for local_line in &local.items {
        match merged.items.iter_mut().find(|l| l.same_variant(local_line)) {
            Some(existing) => existing.quantity = existing.quantity.max(local_line.quantity),
            None => merged.items.push(local_line.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readding_a_variant_increments_quantity() {
        let mut cart = Cart::new();
        cart.add(CartLine::new("p1", 1).with_size("M")).unwrap();
        cart.add(CartLine::new("p1", 2).with_size("M")).unwrap();
        cart.add(CartLine::new("p1", 1).with_size("L")).unwrap();

        assert_eq!(cart.len(), 2);
        assert_eq!(cart.items[0].quantity, 3);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut cart = Cart::new();
        assert!(cart.add(CartLine::new("p1", 0)).is_err());
        assert!(cart.is_empty());
    }

    #[test]
    fn merge_takes_max_not_sum() {
        let server = Cart::from_lines(vec![CartLine::new("p1", 2)]).unwrap();
        let local = Cart::from_lines(vec![CartLine::new("p1", 5)]).unwrap();

        let merged = merge(&server, &local);
        assert_eq!(merged.items, vec![CartLine::new("p1", 5)]);
    }

    #[test]
    fn merge_appends_local_only_lines_after_server_lines() {
        let server = Cart::from_lines(vec![CartLine::new("p1", 4), CartLine::new("p2", 1)]).unwrap();
        let local = Cart::from_lines(vec![
            CartLine::new("p3", 1).with_color("red"),
            CartLine::new("p1", 1),
        ])
        .unwrap();

        let merged = merge(&server, &local);
        let ids: Vec<_> = merged.items.iter().map(|l| l.product_id.as_str()).collect();
        assert_eq!(ids, ["p1", "p2", "p3"]);
        assert_eq!(merged.items[0].quantity, 4);
    }

    #[test]
    fn remove_targets_one_variant() {
        let mut cart = Cart::from_lines(vec![
            CartLine::new("p1", 1).with_color("red"),
            CartLine::new("p1", 1).with_color("blue"),
        ])
        .unwrap();

        assert!(cart.remove(&CartLine::new("p1", 1).with_color("red").key()));
        assert_eq!(cart.len(), 1);
        assert!(!cart.remove(&CartLine::new("p9", 1).key()));
    }
}
