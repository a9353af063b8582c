//! Product snapshots read from the catalog collaborator
use serde::{Deserialize, Serialize};

use crate::error::CommerceError;
use crate::types::Amount;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub price: Amount,
    #[n(3)]
    #[serde(default)]
    pub sale_price: Option<Amount>,
    #[n(4)]
    pub stock: u32,
    #[n(5)]
    pub category: String,
    #[n(6)]
    #[serde(default)]
    pub image: String,
}

impl Product {
    /// Price charged at checkout: a sale price wins only when it undercuts the list price.
    pub fn unit_price(&self) -> Amount {
        match self.sale_price {
            Some(sale) if sale > 0 && sale < self.price => sale,
            _ => self.price,
        }
    }

    pub fn validate(&self) -> Result<(), CommerceError> {
        if self.id.trim().is_empty() {
            return Err(CommerceError::validation("product id is required"));
        }
        if self.name.trim().is_empty() {
            return Err(CommerceError::validation("product name is required"));
        }
        if self.category.trim().is_empty() {
            return Err(CommerceError::validation("product category is required"));
        }
        Ok(())
    }
}

/// Read access to the product catalog.
pub trait Catalog: Send + Sync {
    fn product(&self, id: &str) -> Result<Option<Product>, CommerceError>;
}
