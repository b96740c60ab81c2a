//! Dash address and WIF encoding on top of the `bitcoin` primitives.
//!
//! Addresses are base58check: one version byte followed by a 20-byte hash.
//! Testnet and regtest share version bytes, so a decoded address reports
//! [`Network::Testnet`] for both.

use std::fmt;
use std::str::FromStr;

use bitcoin::base58;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{PrivateKey, PubkeyHash, PublicKey, Script, ScriptBuf, ScriptHash};

use crate::error::WalletError;
use crate::types::Network;

/// Payload type of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Pay to public key hash.
    PubkeyHash,
    /// Pay to script hash.
    ScriptHash,
}

/// A decoded Dash address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DashAddress {
    network: Network,
    kind: AddressKind,
    hash: [u8; 20],
}

impl DashAddress {
    /// P2PKH address of a public key.
    pub fn p2pkh(public_key: &PublicKey, network: Network) -> Self {
        Self {
            network,
            kind: AddressKind::PubkeyHash,
            hash: public_key.pubkey_hash().to_byte_array(),
        }
    }

    /// Parse and require the address to belong to `network`'s family.
    pub fn parse_for(s: &str, network: Network) -> Result<Self, WalletError> {
        let addr: DashAddress = s.parse()?;
        if !addr.is_valid_for(network) {
            return Err(WalletError::InvalidAddress(format!(
                "{s} is not a {network} address"
            )));
        }
        Ok(addr)
    }

    /// Address a standard locking script pays to.
    pub fn from_script(script: &Script, network: Network) -> Option<Self> {
        let bytes = script.as_bytes();
        let (kind, hash) = if script.is_p2pkh() {
            (AddressKind::PubkeyHash, &bytes[3..23])
        } else if script.is_p2sh() {
            (AddressKind::ScriptHash, &bytes[2..22])
        } else {
            return None;
        };
        let mut out = [0u8; 20];
        out.copy_from_slice(hash);
        Some(Self {
            network,
            kind,
            hash: out,
        })
    }

    /// Network family encoded in the version byte.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Payload type.
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// Whether the version byte matches `network`.
    pub fn is_valid_for(&self, network: Network) -> bool {
        self.version_byte_for(network) == self.version_byte()
    }

    /// Locking script paying to this address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.kind {
            AddressKind::PubkeyHash => {
                ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash))
            }
            AddressKind::ScriptHash => {
                ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(self.hash))
            }
        }
    }

    fn version_byte(&self) -> u8 {
        self.version_byte_for(self.network)
    }

    fn version_byte_for(&self, network: Network) -> u8 {
        match self.kind {
            AddressKind::PubkeyHash => network.pubkey_address_prefix(),
            AddressKind::ScriptHash => network.script_address_prefix(),
        }
    }
}

impl fmt::Display for DashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.version_byte());
        payload.extend_from_slice(&self.hash);
        f.write_str(&base58::encode_check(&payload))
    }
}

impl FromStr for DashAddress {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = base58::decode_check(s)
            .map_err(|e| WalletError::InvalidAddress(format!("{s}: {e}")))?;
        if data.len() != 21 {
            return Err(WalletError::InvalidAddress(format!(
                "{s}: expected 21 bytes, got {}",
                data.len()
            )));
        }
        let (network, kind) = match data[0] {
            v if v == Network::Mainnet.pubkey_address_prefix() => {
                (Network::Mainnet, AddressKind::PubkeyHash)
            }
            v if v == Network::Mainnet.script_address_prefix() => {
                (Network::Mainnet, AddressKind::ScriptHash)
            }
            v if v == Network::Testnet.pubkey_address_prefix() => {
                (Network::Testnet, AddressKind::PubkeyHash)
            }
            v if v == Network::Testnet.script_address_prefix() => {
                (Network::Testnet, AddressKind::ScriptHash)
            }
            v => {
                return Err(WalletError::InvalidAddress(format!(
                    "{s}: unknown version byte {v}"
                )));
            }
        };
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[1..]);
        Ok(Self {
            network,
            kind,
            hash,
        })
    }
}

/// Encode a private key as WIF (compressed) for `network`.
pub fn encode_wif(key: &PrivateKey, network: Network) -> String {
    let mut payload = Vec::with_capacity(34);
    payload.push(network.wif_prefix());
    payload.extend_from_slice(&key.inner.secret_bytes());
    if key.compressed {
        payload.push(0x01);
    }
    base58::encode_check(&payload)
}

/// Decode a signing key given either as WIF or as 64 hex characters.
///
/// Anything else is an [`WalletError::UnknownKeyType`].
pub fn decode_private_key(s: &str, network: Network) -> Result<PrivateKey, WalletError> {
    if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        let bytes = hex::decode(s).map_err(|e| WalletError::UnknownKeyType(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| WalletError::UnknownKeyType(e.to_string()))?;
        return Ok(PrivateKey::new(secret, network.network_kind()));
    }

    let data = base58::decode_check(s)
        .map_err(|_| WalletError::UnknownKeyType("expected WIF or 32-byte hex key".into()))?;
    let compressed = match data.len() {
        33 => false,
        34 if data[33] == 0x01 => true,
        n => {
            return Err(WalletError::UnknownKeyType(format!(
                "WIF payload of {n} bytes"
            )));
        }
    };
    let network_kind = match data[0] {
        v if v == Network::Mainnet.wif_prefix() => Network::Mainnet.network_kind(),
        v if v == Network::Testnet.wif_prefix() => Network::Testnet.network_kind(),
        v => {
            return Err(WalletError::UnknownKeyType(format!(
                "unknown WIF version byte {v}"
            )));
        }
    };
    if network_kind != network.network_kind() {
        return Err(WalletError::UnknownKeyType(format!(
            "WIF key is not for {network}"
        )));
    }
    let secret = SecretKey::from_slice(&data[1..33])
        .map_err(|e| WalletError::UnknownKeyType(e.to_string()))?;
    Ok(PrivateKey {
        compressed,
        network: network_kind,
        inner: secret,
    })
}
