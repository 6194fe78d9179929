//! Utility functions for identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

pub const CHAIN_HRP: &str = "chain_";
pub const RECORD_HRP: &str = "record_";
pub const STATUS_HRP: &str = "status_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
