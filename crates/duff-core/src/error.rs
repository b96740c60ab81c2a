//! Error taxonomy shared by every Duff crate.

use thiserror::Error;

/// Errors that can occur in wallet, storage and synchronization operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Malformed recipient, output, UTXO or transaction shape.
    #[error("validation: {0}")]
    Validation(String),

    /// Coin selection cannot meet the requested target.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Value available to the selection in duffs.
        have: u64,
        /// Value required in duffs.
        need: u64,
    },

    /// A worker declared a dependency on a worker that is not registered.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A signing key could not be interpreted.
    #[error("unknown key type: {0}")]
    UnknownKeyType(String),

    /// Any failure raised while building a transaction, with its cause.
    #[error("transaction construction failed: {source}")]
    TransactionConstruction {
        /// The underlying error.
        #[source]
        source: Box<WalletError>,
    },

    /// Operation attempted without a usable transport.
    #[error("transport required: {0}")]
    TransportRequired(String),

    /// A transport call failed.
    #[error("transport error ({context}): {message}")]
    Transport {
        /// What was being fetched when the call failed.
        context: String,
        /// Message reported by the transport.
        message: String,
    },

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Signing failure.
    #[error("signing: {0}")]
    Signing(String),

    /// Invalid address string.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// No account is registered under the given index.
    #[error("unknown account: {0}")]
    UnknownAccount(u32),

    /// No wallet is registered in storage under the given id.
    #[error("unknown wallet: {0}")]
    UnknownWallet(String),

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Decryption failure.
    #[error("decryption: {0}")]
    Decryption(String),

    /// Wrong password for wallet file.
    #[error("invalid password")]
    InvalidPassword,

    /// Wallet file is corrupted or has invalid format.
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Persistence adapter failure.
    #[error("persistence: {0}")]
    Persistence(String),
}

impl WalletError {
    /// Wrap an error raised during transaction construction.
    ///
    /// Already-wrapped errors are returned unchanged so the cause chain stays
    /// one level deep.
    pub fn construction(cause: WalletError) -> Self {
        match cause {
            e @ WalletError::TransactionConstruction { .. } => e,
            other => WalletError::TransactionConstruction {
                source: Box::new(other),
            },
        }
    }

    /// Build a transport error with call context.
    pub fn transport(context: impl Into<String>, message: impl ToString) -> Self {
        WalletError::Transport {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// The innermost cause of a construction error, or `self`.
    pub fn root_cause(&self) -> &WalletError {
        match self {
            WalletError::TransactionConstruction { source } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds {
            have: 100,
            need: 200,
        };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_invalid_password() {
        assert_eq!(WalletError::InvalidPassword.to_string(), "invalid password");
    }

    #[test]
    fn display_transport() {
        let e = WalletError::transport("getUTXO yXy", "connection refused");
        assert_eq!(
            e.to_string(),
            "transport error (getUTXO yXy): connection refused"
        );
    }

    #[test]
    fn construction_wraps_cause() {
        let cause = WalletError::Validation("bad output".into());
        let e = WalletError::construction(cause.clone());
        assert_eq!(
            e.to_string(),
            "transaction construction failed: validation: bad output"
        );
        assert_eq!(e.root_cause(), &cause);
    }

    #[test]
    fn construction_does_not_double_wrap() {
        let once = WalletError::construction(WalletError::InvalidPassword);
        let twice = WalletError::construction(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn construction_exposes_std_source() {
        use std::error::Error;
        let e = WalletError::construction(WalletError::UnknownKeyType("ed25519".into()));
        let source = e.source().expect("construction error has a source");
        assert_eq!(source.to_string(), "unknown key type: ed25519");
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::UnknownPlugin("bip44".into());
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: WalletError = io.into();
        assert_eq!(e, WalletError::Io("missing".into()));
    }
}
