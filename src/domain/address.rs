use alloy_primitives::Address;
use std::str::FromStr;

/// Pseudo-address several protocols use to denote the chain's native asset.
pub const NATIVE_PSEUDO_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

/// Returns true when the string is a 0x-prefixed 20-byte hex address.
pub fn is_address(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.len() == 42
        && trimmed.starts_with("0x")
        && trimmed
            .as_bytes()
            .iter()
            .skip(2)
            .all(|byte| byte.is_ascii_hexdigit())
}

/// Parse and normalize an address string (checksum casing is ignored).
pub fn parse_address(raw: &str) -> Result<Address, String> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if !is_address(&trimmed) {
        return Err("address must be a 0x-prefixed 20-byte hex string".to_string());
    }
    Address::from_str(&trimmed).map_err(|error| format!("invalid address: {error}"))
}

/// Returns true for the conventional spellings of the native asset: the
/// `native`/`eth` markers, the 0xeee… pseudo-address, or the zero address.
pub fn is_native_token(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "native"
        || normalized == "eth"
        || normalized == NATIVE_PSEUDO_ADDRESS
        || normalized
            .parse::<Address>()
            .map(|address| address == Address::ZERO)
            .unwrap_or(false)
}
