//! Seed management and deterministic key derivation.
//!
//! [`HdKeyChain`] wraps one of three kinds of root material: a BIP-32 master
//! key, an account-level extended public key (watch-only), or a lone private
//! key. Derivations are cached by path, and every derived address is indexed
//! for reverse lookup during signing.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::script::Builder;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{PrivateKey, PublicKey, ScriptBuf, Transaction};
use parking_lot::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use duff_core::address::DashAddress;
use duff_core::error::WalletError;
use duff_core::path::{feature_path, is_under_account};
use duff_core::traits::{DerivedKey, ExtendedKey, KeyChain, UnsignedTransaction};
use duff_core::types::{Network, WalletType};

use crate::mnemonic::mnemonic_to_seed;

/// A 64-byte BIP-39 seed.
///
/// Secret material is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 64],
}

impl Seed {
    /// Wrap raw seed bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self { bytes }
    }

    /// Raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Variable-length seed bytes supplied by the caller.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SeedBytes(Vec<u8>);

impl SeedBytes {
    /// Parse a hex-encoded seed of 16 to 64 bytes.
    pub fn from_hex(s: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| WalletError::UnknownKeyType(format!("seed: {e}")))?;
        if !(16..=64).contains(&bytes.len()) {
            return Err(WalletError::UnknownKeyType(format!(
                "seed of {} bytes, expected 16 to 64",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SeedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeedBytes([REDACTED])")
    }
}

enum RootKey {
    HdPrivate(Xpriv),
    HdPublic { xpub: Xpub, account_path: String },
    SingleKey(PrivateKey),
}

/// Key chain over HD or single-key root material.
pub struct HdKeyChain {
    network: Network,
    root: RootKey,
    secp: Secp256k1<All>,
    by_path: RwLock<HashMap<String, DerivedKey>>,
    /// Reverse lookup: address -> path.
    by_address: RwLock<HashMap<String, String>>,
}

impl HdKeyChain {
    fn with_root(root: RootKey, network: Network) -> Self {
        Self {
            network,
            root,
            secp: Secp256k1::new(),
            by_path: RwLock::new(HashMap::new()),
            by_address: RwLock::new(HashMap::new()),
        }
    }

    /// Master key from a BIP-39 seed.
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self, WalletError> {
        let master = Xpriv::new_master(network.network_kind(), seed)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Self::with_root(RootKey::HdPrivate(master), network))
    }

    /// Master key from a mnemonic phrase and optional passphrase.
    pub fn from_mnemonic(phrase: &str, passphrase: &str, network: Network) -> Result<Self, WalletError> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        Self::from_seed(seed.as_bytes(), network)
    }

    /// Master key from a serialized extended private key.
    pub fn from_xpriv_str(s: &str, network: Network) -> Result<Self, WalletError> {
        let xpriv = Xpriv::from_str(s.trim())
            .map_err(|e| WalletError::UnknownKeyType(format!("extended private key: {e}")))?;
        if xpriv.network != network.network_kind() {
            return Err(WalletError::UnknownKeyType(format!(
                "extended private key is not for {network}"
            )));
        }
        Ok(Self::with_root(RootKey::HdPrivate(xpriv), network))
    }

    /// Watch-only chain from an account-level extended public key.
    ///
    /// `account_path` is the path the key was exported at; derivations are
    /// only possible beneath it.
    pub fn from_xpub_str(s: &str, network: Network, account_path: impl Into<String>) -> Result<Self, WalletError> {
        let xpub = Xpub::from_str(s.trim())
            .map_err(|e| WalletError::UnknownKeyType(format!("extended public key: {e}")))?;
        if xpub.network != network.network_kind() {
            return Err(WalletError::UnknownKeyType(format!(
                "extended public key is not for {network}"
            )));
        }
        Ok(Self::with_root(
            RootKey::HdPublic {
                xpub,
                account_path: account_path.into(),
            },
            network,
        ))
    }

    /// Single-address chain around one private key.
    pub fn from_private_key(key: PrivateKey, network: Network) -> Self {
        Self::with_root(RootKey::SingleKey(key), network)
    }

    /// Extended public key of the account at `account_path`.
    pub fn account_xpub(&self, account_path: &str) -> Result<Xpub, WalletError> {
        match &self.root {
            RootKey::HdPrivate(master) => {
                let child = master
                    .derive_priv(&self.secp, &parse_path(account_path)?)
                    .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
                Ok(Xpub::from_priv(&self.secp, &child))
            }
            RootKey::HdPublic { xpub, account_path: root } if root.as_str() == account_path => Ok(*xpub),
            RootKey::HdPublic { account_path: root, .. } => Err(WalletError::KeyDerivation(
                format!("watch-only key is bound to {root}, not {account_path}"),
            )),
            RootKey::SingleKey(_) => Err(WalletError::KeyDerivation(
                "single-key wallets have no extended keys".into(),
            )),
        }
    }

    /// Account path a watch-only chain is bound to.
    pub fn bound_account_path(&self) -> Option<&str> {
        match &self.root {
            RootKey::HdPublic { account_path, .. } => Some(account_path),
            _ => None,
        }
    }

    fn derive(&self, path: &str) -> Result<(PublicKey, Option<PrivateKey>), WalletError> {
        match &self.root {
            RootKey::HdPrivate(master) => {
                let child = master
                    .derive_priv(&self.secp, &parse_path(path)?)
                    .map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))?;
                let private = child.to_priv();
                Ok((private.public_key(&self.secp), Some(private)))
            }
            RootKey::HdPublic { xpub, account_path } => {
                if !is_under_account(path, account_path) {
                    return Err(WalletError::KeyDerivation(format!(
                        "{path} is outside watch-only account {account_path}"
                    )));
                }
                let relative = &path[account_path.len() + 1..];
                let child = xpub
                    .derive_pub(&self.secp, &parse_path(relative)?)
                    .map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))?;
                Ok((PublicKey::new(child.public_key), None))
            }
            RootKey::SingleKey(key) => {
                if path != "0" {
                    return Err(WalletError::KeyDerivation(format!(
                        "single-key wallets only have path 0, got {path}"
                    )));
                }
                Ok((key.public_key(&self.secp), Some(*key)))
            }
        }
    }
}

fn parse_path(path: &str) -> Result<DerivationPath, WalletError> {
    DerivationPath::from_str(path).map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))
}

impl KeyChain for HdKeyChain {
    fn network(&self) -> Network {
        self.network
    }

    fn wallet_type(&self) -> WalletType {
        match self.root {
            RootKey::HdPrivate(_) => WalletType::HdPrivate,
            RootKey::HdPublic { .. } => WalletType::HdPublic,
            RootKey::SingleKey(_) => WalletType::SingleAddress,
        }
    }

    fn root_public_bytes(&self) -> Vec<u8> {
        match &self.root {
            RootKey::HdPrivate(master) => Xpub::from_priv(&self.secp, master).encode().to_vec(),
            RootKey::HdPublic { xpub, .. } => xpub.encode().to_vec(),
            RootKey::SingleKey(key) => key.public_key(&self.secp).to_bytes(),
        }
    }

    fn get_hardened_feature_path(&self) -> Result<ExtendedKey, WalletError> {
        match &self.root {
            RootKey::HdPrivate(master) => {
                let path = feature_path(self.network);
                let node = master
                    .derive_priv(&self.secp, &parse_path(&path)?)
                    .map_err(|e| WalletError::KeyDerivation(format!("{path}: {e}")))?;
                Ok(ExtendedKey::Private(node))
            }
            // Hardened levels above the account are out of reach; the
            // account key is the highest derivable node.
            RootKey::HdPublic { xpub, .. } => Ok(ExtendedKey::Public(*xpub)),
            RootKey::SingleKey(_) => Err(WalletError::KeyDerivation(
                "single-key wallets have no derivation tree".into(),
            )),
        }
    }

    fn get_for_path(&self, path: &str) -> Result<DerivedKey, WalletError> {
        if let Some(hit) = self.by_path.read().get(path) {
            return Ok(hit.clone());
        }
        let (public_key, private_key) = self.derive(path)?;
        let derived = DerivedKey {
            path: path.to_string(),
            public_key,
            private_key,
            address: DashAddress::p2pkh(&public_key, self.network).to_string(),
        };
        self.by_address
            .write()
            .insert(derived.address.clone(), path.to_string());
        self.by_path.write().insert(path.to_string(), derived.clone());
        Ok(derived)
    }

    fn get_for_address(&self, address: &str) -> Option<DerivedKey> {
        let path = self.by_address.read().get(address).cloned()?;
        self.by_path.read().get(&path).cloned()
    }

    fn sign(
        &self,
        unsigned: UnsignedTransaction,
        keys: &[PrivateKey],
        sighash: EcdsaSighashType,
    ) -> Result<Transaction, WalletError> {
        if unsigned.prevouts.len() != unsigned.tx.input.len() {
            return Err(WalletError::Signing(format!(
                "{} inputs but {} spent outputs",
                unsigned.tx.input.len(),
                unsigned.prevouts.len()
            )));
        }
        let signers: Vec<(ScriptBuf, PublicKey, &PrivateKey)> = keys
            .iter()
            .map(|key| {
                let public = key.public_key(&self.secp);
                (ScriptBuf::new_p2pkh(&public.pubkey_hash()), public, key)
            })
            .collect();

        let mut script_sigs = Vec::with_capacity(unsigned.prevouts.len());
        {
            let cache = SighashCache::new(&unsigned.tx);
            for (index, prevout) in unsigned.prevouts.iter().enumerate() {
                let Some((_, public, key)) = signers
                    .iter()
                    .find(|(script, _, _)| *script == prevout.script_pubkey)
                else {
                    return Err(WalletError::Signing(format!(
                        "no signing key for input {index}"
                    )));
                };
                let hash = cache
                    .legacy_signature_hash(index, &prevout.script_pubkey, sighash.to_u32())
                    .map_err(|e| WalletError::Signing(e.to_string()))?;
                let signature = bitcoin::ecdsa::Signature {
                    signature: self.secp.sign_ecdsa(&Message::from(hash), &key.inner),
                    sighash_type: sighash,
                };
                script_sigs.push(
                    Builder::new()
                        .push_slice(signature.serialize())
                        .push_key(public)
                        .into_script(),
                );
            }
        }

        let mut tx = unsigned.tx;
        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }
        Ok(tx)
    }
}

impl fmt::Debug for HdKeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeyChain")
            .field("network", &self.network)
            .field("wallet_type", &self.wallet_type())
            .field("cached", &self.by_path.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, Sequence, TxIn, TxOut, Txid, Witness};
    use duff_core::path::{account_path, address_path};
    use duff_core::types::ChainType;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn chain() -> HdKeyChain {
        HdKeyChain::from_mnemonic(ABANDON, "", Network::Testnet).unwrap()
    }

    fn unsigned_spending(prevout_script: ScriptBuf) -> UnsignedTransaction {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: prevout_script.clone(),
            }],
        };
        UnsignedTransaction {
            tx,
            prevouts: vec![TxOut {
                value: Amount::from_sat(2_000),
                script_pubkey: prevout_script,
            }],
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let path = address_path(&account_path(Network::Testnet, 0), ChainType::External, 0);
        let a = chain().get_for_path(&path).unwrap();
        let b = chain().get_for_path(&path).unwrap();
        assert_eq!(a, b);
        assert!(a.address.starts_with('y'));
        assert!(a.private_key.is_some());
    }

    #[test]
    fn distinct_paths_give_distinct_addresses() {
        let kc = chain();
        let root = account_path(Network::Testnet, 0);
        let ext = kc.get_for_path(&address_path(&root, ChainType::External, 0)).unwrap();
        let int = kc.get_for_path(&address_path(&root, ChainType::Internal, 0)).unwrap();
        assert_ne!(ext.address, int.address);
    }

    #[test]
    fn mainnet_addresses_start_with_x() {
        let kc = HdKeyChain::from_mnemonic(ABANDON, "", Network::Mainnet).unwrap();
        let path = address_path(&account_path(Network::Mainnet, 0), ChainType::External, 0);
        assert!(kc.get_for_path(&path).unwrap().address.starts_with('X'));
    }

    #[test]
    fn reverse_lookup_after_derivation() {
        let kc = chain();
        let path = address_path(&account_path(Network::Testnet, 0), ChainType::External, 3);
        let derived = kc.get_for_path(&path).unwrap();
        assert_eq!(kc.get_for_address(&derived.address), Some(derived));
        assert!(kc.get_for_address("yUnknown").is_none());
    }

    #[test]
    fn watch_only_matches_private_derivation() {
        let kc = chain();
        let root = account_path(Network::Testnet, 0);
        let xpub = kc.account_xpub(&root).unwrap();
        let watch = HdKeyChain::from_xpub_str(&xpub.to_string(), Network::Testnet, root.clone()).unwrap();
        assert_eq!(watch.wallet_type(), WalletType::HdPublic);

        let path = address_path(&root, ChainType::Internal, 7);
        let full = kc.get_for_path(&path).unwrap();
        let public = watch.get_for_path(&path).unwrap();
        assert_eq!(full.address, public.address);
        assert!(public.private_key.is_none());
    }

    #[test]
    fn watch_only_rejects_paths_outside_account() {
        let root = account_path(Network::Testnet, 0);
        let xpub = chain().account_xpub(&root).unwrap();
        let watch = HdKeyChain::from_xpub_str(&xpub.to_string(), Network::Testnet, root).unwrap();
        let other = address_path(&account_path(Network::Testnet, 1), ChainType::External, 0);
        assert!(matches!(
            watch.get_for_path(&other),
            Err(WalletError::KeyDerivation(_))
        ));
    }

    #[test]
    fn xpriv_roundtrip_gives_same_root() {
        let kc = chain();
        let ExtendedKey::Private(_) = kc.get_hardened_feature_path().unwrap() else {
            panic!("expected private node");
        };
        let seed = mnemonic_to_seed(ABANDON, "").unwrap();
        let master = Xpriv::new_master(Network::Testnet.network_kind(), seed.as_bytes()).unwrap();
        let restored = HdKeyChain::from_xpriv_str(&master.to_string(), Network::Testnet).unwrap();
        assert_eq!(restored.root_public_bytes(), kc.root_public_bytes());
    }

    #[test]
    fn xpriv_for_wrong_network_rejected() {
        let seed = mnemonic_to_seed(ABANDON, "").unwrap();
        let master = Xpriv::new_master(Network::Mainnet.network_kind(), seed.as_bytes()).unwrap();
        let err = HdKeyChain::from_xpriv_str(&master.to_string(), Network::Testnet).unwrap_err();
        assert!(matches!(err, WalletError::UnknownKeyType(_)));
    }

    #[test]
    fn garbage_extended_key_is_unknown_key_type() {
        assert!(matches!(
            HdKeyChain::from_xpriv_str("tprvgarbage", Network::Testnet),
            Err(WalletError::UnknownKeyType(_))
        ));
    }

    #[test]
    fn single_key_has_only_path_zero() {
        let key = chain()
            .get_for_path("m/44'/1'/0'/0/0")
            .unwrap()
            .private_key
            .unwrap();
        let single = HdKeyChain::from_private_key(key, Network::Testnet);
        assert_eq!(single.wallet_type(), WalletType::SingleAddress);
        assert!(single.get_for_path("0").unwrap().private_key.is_some());
        assert!(single.get_for_path("1").is_err());
        assert!(single.get_hardened_feature_path().is_err());
    }

    #[test]
    fn sign_produces_script_sig() {
        let kc = chain();
        let derived = kc.get_for_path("m/44'/1'/0'/0/0").unwrap();
        let script = ScriptBuf::new_p2pkh(&derived.public_key.pubkey_hash());
        let signed = kc
            .sign(
                unsigned_spending(script),
                &[derived.private_key.unwrap()],
                EcdsaSighashType::All,
            )
            .unwrap();
        let script_sig = &signed.input[0].script_sig;
        assert!(!script_sig.is_empty());
        // DER signature + sighash byte, then a 33-byte compressed key.
        assert!(script_sig.len() > 33 + 60);
    }

    #[test]
    fn sign_without_matching_key_fails() {
        let kc = chain();
        let owner = kc.get_for_path("m/44'/1'/0'/0/0").unwrap();
        let stranger = kc.get_for_path("m/44'/1'/0'/0/1").unwrap();
        let script = ScriptBuf::new_p2pkh(&owner.public_key.pubkey_hash());
        let err = kc
            .sign(
                unsigned_spending(script),
                &[stranger.private_key.unwrap()],
                EcdsaSighashType::All,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::Signing(_)));
    }

    #[test]
    fn seed_debug_is_redacted() {
        let seed = Seed::from_bytes([7u8; 64]);
        assert!(!format!("{seed:?}").contains('7'));
    }

    #[test]
    fn seed_hex_length_checked() {
        assert!(SeedBytes::from_hex(&"ab".repeat(16)).is_ok());
        assert!(SeedBytes::from_hex(&"ab".repeat(8)).is_err());
        assert!(SeedBytes::from_hex("zz").is_err());
    }
}
