//! Protocol and wallet constants.

/// Duffs per whole coin.
pub const DUFFS_PER_DASH: u64 = 100_000_000;

/// Confirmations required before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// BIP-44 purpose field.
pub const BIP44_PURPOSE: u32 = 44;

/// BIP-44 coin type on mainnet.
pub const BIP44_COIN_TYPE_MAINNET: u32 = 5;

/// BIP-44 coin type on testnet and regtest.
pub const BIP44_COIN_TYPE_TESTNET: u32 = 1;

/// Number of unused addresses kept derived ahead on each chain.
pub const BIP44_ADDRESS_GAP: u32 = 20;

// -- Address / key encoding ------------------------------------------------

/// Mainnet pay-to-pubkey-hash version byte (`X...`).
pub const MAINNET_PUBKEY_ADDRESS_PREFIX: u8 = 76;

/// Mainnet pay-to-script-hash version byte (`7...`).
pub const MAINNET_SCRIPT_ADDRESS_PREFIX: u8 = 16;

/// Testnet pay-to-pubkey-hash version byte (`y...`).
pub const TESTNET_PUBKEY_ADDRESS_PREFIX: u8 = 140;

/// Testnet pay-to-script-hash version byte (`8...`).
pub const TESTNET_SCRIPT_ADDRESS_PREFIX: u8 = 19;

/// Mainnet WIF version byte.
pub const MAINNET_WIF_PREFIX: u8 = 204;

/// Testnet WIF version byte.
pub const TESTNET_WIF_PREFIX: u8 = 239;

// -- Transaction size model ------------------------------------------------

/// Version (2 bytes) plus special transaction type (2 bytes).
pub const TX_VERSION_BYTES: usize = 4;

/// Lock time.
pub const TX_LOCKTIME_BYTES: usize = 4;

/// Bytes reserved on top of the projected size.
pub const TX_RESERVED_BYTES: usize = 13;

/// Previous txid (32) plus output index (4).
pub const OUTPOINT_BYTES: usize = 36;

/// Input sequence number.
pub const SEQUENCE_BYTES: usize = 4;

/// Average P2PKH unlock script: DER signature with sighash byte (73) plus
/// compressed public key push (34).
pub const P2PKH_UNLOCK_SCRIPT_BYTES: usize = 107;

/// Output value field.
pub const OUTPUT_VALUE_BYTES: usize = 8;

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`.
pub const P2PKH_SCRIPT_BYTES: usize = 25;

/// Outputs below this value are folded into the fee instead of paid out.
pub const DUST_AMOUNT: u64 = 546;

// -- Fee table (duffs per kB unless noted) --------------------------------

/// Default rate.
pub const FEE_RATE_NORMAL: u64 = 1_000;

/// Cheaper, slower rate.
pub const FEE_RATE_ECONOMIC: u64 = 500;

/// Higher rate for fast inclusion.
pub const FEE_RATE_PRIORITY: u64 = 10_000;

/// Instant-send fee per input, in duffs.
pub const INSTANT_FEE_PER_INPUT: u64 = 10_000;

// -- Sync defaults ---------------------------------------------------------

/// Default input cap of the transaction-optimized strategy.
pub const DEFAULT_MAX_INPUTS: usize = 25;

/// Addresses fetched longer ago than this are refreshed by the sync worker.
pub const DEFAULT_ADDRESS_REFRESH_SECS: u64 = 10;

/// Default interval of the fast sync workers.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

/// Default interval of the block header worker.
pub const DEFAULT_HEADERS_INTERVAL_SECS: u64 = 60;

/// Block headers retained in the chain store.
pub const DEFAULT_MAX_HEADERS_TO_KEEP: usize = 2_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_in_one_out_is_205_bytes() {
        let input = OUTPOINT_BYTES + 1 + P2PKH_UNLOCK_SCRIPT_BYTES + SEQUENCE_BYTES;
        let output = OUTPUT_VALUE_BYTES + 1 + P2PKH_SCRIPT_BYTES;
        let size = TX_VERSION_BYTES + 1 + input + 1 + output + TX_RESERVED_BYTES + TX_LOCKTIME_BYTES;
        assert_eq!(input, 148);
        assert_eq!(output, 34);
        assert_eq!(size, 205);
    }

    #[test]
    fn fee_rates_are_ordered() {
        assert!(FEE_RATE_ECONOMIC < FEE_RATE_NORMAL);
        assert!(FEE_RATE_NORMAL < FEE_RATE_PRIORITY);
    }
}
