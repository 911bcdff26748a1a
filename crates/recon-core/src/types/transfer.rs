use alloy_primitives::{Address, B256, U256};

/// Decoded ERC-20 Transfer log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl TransferEvent {
    /// Ledger proof for this transfer.
    pub fn proof(&self) -> String {
        format!("{:?}", self.tx_hash)
    }
}

/// Log filter for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferQuery {
    pub contracts: Vec<Address>,
    /// Restrict on the indexed `to` topic when set
    pub recipients: Option<Vec<Address>>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Result of handing one transfer to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New SUCCESS entry written and balance credited
    Applied { entry_id: i64 },
    /// Proof already recorded, nothing changed
    DuplicateIgnored,
    UnresolvedAddress,
    UnresolvedCurrency,
    /// Amount not representable for the currency's decimals
    Rejected,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Applied { .. } => "applied",
            IngestOutcome::DuplicateIgnored => "duplicate",
            IngestOutcome::UnresolvedAddress => "unresolved_address",
            IngestOutcome::UnresolvedCurrency => "unresolved_currency",
            IngestOutcome::Rejected => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    #[test]
    fn test_proof_is_prefixed_lowercase_hash() {
        let event = TransferEvent {
            block_number: 1,
            tx_hash: b256!("00000000000000000000000000000000000000000000000000000000000000AB"),
            log_index: 0,
            contract: address!("0000000000000000000000000000000000000001"),
            from: Address::ZERO,
            to: Address::ZERO,
            value: U256::from(1u64),
        };
        assert_eq!(
            event.proof(),
            "0x00000000000000000000000000000000000000000000000000000000000000ab"
        );
    }
}
