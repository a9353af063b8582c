//! Promo code definitions and the discount evaluation applied at checkout
use serde::{Deserialize, Serialize};

use crate::error::{CommerceError, PromoRejection};
use crate::types::{Amount, TimeStamp};
use crate::utils::percent_of;

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromoCode {
    #[n(0)]
    pub code: String,
    #[n(1)]
    #[serde(default)]
    pub description: Option<String>,
    #[n(2)]
    pub discount_percentage: u8,
    #[n(3)]
    #[serde(default)]
    pub max_discount: Option<Amount>,
    #[n(4)]
    #[serde(default)]
    pub min_purchase: Option<Amount>,
    #[n(5)]
    pub valid_from: TimeStamp,
    #[n(6)]
    pub valid_to: TimeStamp,
    #[n(7)]
    pub is_active: bool,
    // None or empty applies to every category
    #[n(8)]
    #[serde(default)]
    pub applicable_categories: Option<Vec<String>>,
    #[n(9)]
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[n(10)]
    #[serde(default)]
    pub usage_count: u32,
}

/// Outcome of a successful evaluation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromoQuote {
    pub code: String,
    pub discount_percentage: u8,
    pub discount_amount: Amount,
    pub description: Option<String>,
}

/// Codes match case-insensitively; they are stored upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Percentage discount, capped when a maximum is configured.
pub fn discount_for(subtotal: Amount, percentage: u8, max_discount: Option<Amount>) -> Amount {
    let raw = percent_of(subtotal, u64::from(percentage));
    match max_discount {
        Some(cap) => raw.min(cap),
        None => raw,
    }
}

impl PromoCode {
    /// Checks the invariants an administrator must respect when saving a code.
    pub fn validate_definition(&self) -> Result<(), CommerceError> {
        if normalize_code(&self.code).is_empty() {
            return Err(CommerceError::validation("promo code must not be empty"));
        }
        if !(1..=100).contains(&self.discount_percentage) {
            return Err(CommerceError::validation(
                "discount percentage must be between 1 and 100",
            ));
        }
        if self.valid_from > self.valid_to {
            return Err(CommerceError::validation(
                "validFrom must not be later than validTo",
            ));
        }
        if let Some(limit) = self.usage_limit {
            if self.usage_count > limit {
                return Err(CommerceError::validation(format!(
                    "usage count {} exceeds usage limit {limit}",
                    self.usage_count
                )));
            }
        }
        Ok(())
    }

    pub fn has_capacity(&self) -> bool {
        self.usage_limit.is_none_or(|limit| self.usage_count < limit)
    }

    fn applies_to(&self, categories: &[String]) -> bool {
        match self.applicable_categories.as_deref() {
            None | Some([]) => true,
            Some(allowed) => allowed
                .iter()
                .any(|a| categories.iter().any(|c| c.eq_ignore_ascii_case(a))),
        }
    }

    /// Evaluates the code against a cart. Read-only: usage is not counted here.
    pub fn evaluate(
        &self,
        subtotal: Amount,
        categories: &[String],
        now: TimeStamp,
    ) -> Result<PromoQuote, PromoRejection> {
        if !self.is_active {
            return Err(PromoRejection::Inactive);
        }
        if now < self.valid_from || now > self.valid_to {
            return Err(PromoRejection::OutOfWindow);
        }
        if !self.has_capacity() {
            return Err(PromoRejection::UsageExhausted);
        }
        if let Some(minimum) = self.min_purchase {
            if subtotal < minimum {
                return Err(PromoRejection::BelowMinimum { minimum });
            }
        }
        if !self.applies_to(categories) {
            return Err(PromoRejection::CategoryMismatch);
        }

        Ok(PromoQuote {
            code: self.code.clone(),
            discount_percentage: self.discount_percentage,
            discount_amount: discount_for(subtotal, self.discount_percentage, self.max_discount),
            description: self.description.clone(),
        })
    }

    /// Counts one redemption, refusing once the limit is reached.
    pub fn redeem(&mut self) -> Result<(), PromoRejection> {
        if !self.has_capacity() {
            return Err(PromoRejection::UsageExhausted);
        }
        self.usage_count += 1;
        Ok(())
    }
}
