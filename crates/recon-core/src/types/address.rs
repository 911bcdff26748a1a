//! Address forms used across chains.
//!
//! Everything is stored and compared as a 20-byte `Address`. TRON wallets
//! also appear as base58check `T…` strings or `41`-prefixed hex.

use alloy_primitives::Address;

/// Version byte of TRON mainnet addresses
pub const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Parse `0x` hex, TRON `41…` hex or TRON base58check.
pub fn parse_chain_address(raw: &str) -> Option<Address> {
    let raw = raw.trim();
    if raw.starts_with('T') {
        return parse_tron_base58(raw);
    }
    if raw.len() == 42 && raw[..2].eq_ignore_ascii_case("41") {
        let mut bytes = [0u8; 21];
        hex::decode_to_slice(raw, &mut bytes).ok()?;
        return Some(Address::from_slice(&bytes[1..]));
    }
    raw.parse().ok()
}

fn parse_tron_base58(raw: &str) -> Option<Address> {
    let bytes = bs58::decode(raw).with_check(None).into_vec().ok()?;
    match bytes.as_slice() {
        [TRON_ADDRESS_PREFIX, rest @ ..] if rest.len() == 20 => Some(Address::from_slice(rest)),
        _ => None,
    }
}

/// `T…` form of an address.
pub fn to_tron_base58(address: &Address) -> String {
    bs58::encode(tron_bytes(address)).with_check().into_string()
}

/// `41…` hex form the TRON HTTP API takes with `visible: false`.
pub fn to_tron_hex(address: &Address) -> String {
    hex::encode(tron_bytes(address))
}

fn tron_bytes(address: &Address) -> [u8; 21] {
    let mut bytes = [0u8; 21];
    bytes[0] = TRON_ADDRESS_PREFIX;
    bytes[1..].copy_from_slice(address.as_slice());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    // USDT on TRON mainnet
    const USDT_BASE58: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const USDT: Address = address!("a614f803b6fd780986a42c78ec9c7f77e6ded13c");

    #[test]
    fn test_tron_forms_round_trip() {
        assert_eq!(parse_chain_address(USDT_BASE58), Some(USDT));
        assert_eq!(to_tron_base58(&USDT), USDT_BASE58);
        assert_eq!(to_tron_hex(&USDT), "41a614f803b6fd780986a42c78ec9c7f77e6ded13c");
        assert_eq!(parse_chain_address(&to_tron_hex(&USDT)), Some(USDT));
    }

    #[test]
    fn test_evm_hex_still_parses() {
        assert_eq!(parse_chain_address(" 0xa614f803b6fd780986a42c78ec9c7f77e6ded13c "), Some(USDT));
    }

    #[test]
    fn test_bad_checksum_is_rejected() {
        let mut tampered = USDT_BASE58.to_string();
        tampered.replace_range(33.., "u");
        assert_eq!(parse_chain_address(&tampered), None);
        assert_eq!(parse_chain_address("not-an-address"), None);
    }
}
