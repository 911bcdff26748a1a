use alloy_sol_types::sol;

sol! {
    /// Standard ERC-20 transfer, emitted by every compliant token
    #[derive(Debug)]
    event Transfer(
        address indexed from,
        address indexed to,
        uint256 value
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;
    use alloy_sol_types::SolEvent;

    #[test]
    fn test_transfer_signature() {
        assert_eq!(
            Transfer::SIGNATURE_HASH,
            b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
    }
}
