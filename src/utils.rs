//! Utility functions for identifiers and amount arithmetic

use bech32::Bech32m;
use uuid7::uuid7;

use crate::types::Amount;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// `value * percent / 100`, rounded half up to a whole unit.
pub fn percent_of(value: Amount, percent: u64) -> Amount {
    let scaled = u128::from(value) * u128::from(percent) + 50;
    u64::try_from(scaled / 100).unwrap_or(u64::MAX)
}
