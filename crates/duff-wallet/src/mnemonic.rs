//! BIP-39 mnemonic generation, validation and seed derivation.

use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use duff_core::error::WalletError;

use crate::keys::Seed;

/// Supported phrase lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    /// 128 bits of entropy.
    Twelve,
    /// 256 bits of entropy.
    TwentyFour,
}

impl WordCount {
    fn entropy_len(self) -> usize {
        match self {
            WordCount::Twelve => 16,
            WordCount::TwentyFour => 32,
        }
    }
}

/// Generate a fresh English mnemonic from OS randomness.
pub fn generate_mnemonic(words: WordCount) -> Result<Zeroizing<String>, WalletError> {
    use rand::RngCore;
    let mut entropy = Zeroizing::new(vec![0u8; words.entropy_len()]);
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let m = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Normalize whitespace and case, then validate the phrase.
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// BIP-39 seed of a phrase and optional passphrase.
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Seed, WalletError> {
    let m = parse_mnemonic(phrase)?;
    Ok(Seed::from_bytes(m.to_seed_normalized(passphrase)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generated_phrases_have_requested_length() {
        let twelve = generate_mnemonic(WordCount::Twelve).unwrap();
        assert_eq!(twelve.split_whitespace().count(), 12);
        let long = generate_mnemonic(WordCount::TwentyFour).unwrap();
        assert_eq!(long.split_whitespace().count(), 24);
    }

    #[test]
    fn generated_phrase_parses() {
        let phrase = generate_mnemonic(WordCount::Twelve).unwrap();
        assert!(parse_mnemonic(&phrase).is_ok());
    }

    #[test]
    fn known_vector_seed() {
        // BIP-39 reference vector with passphrase "TREZOR".
        let seed = mnemonic_to_seed(ABANDON, "TREZOR").unwrap();
        assert_eq!(
            hex::encode(&seed.as_bytes()[..8]),
            "c55257c360c07c72"
        );
    }

    #[test]
    fn whitespace_and_case_are_normalized() {
        let messy = format!("  {}  ", ABANDON.to_uppercase().replace(' ', "   "));
        let a = mnemonic_to_seed(&messy, "").unwrap();
        let b = mnemonic_to_seed(ABANDON, "").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn invalid_word_rejected() {
        let err = mnemonic_to_seed("abandon abandon abandon invalidword", "").unwrap_err();
        assert!(err.to_string().contains("invalid mnemonic"), "{err}");
    }

    #[test]
    fn bad_checksum_rejected() {
        let bad = ABANDON.replace("about", "abandon");
        assert!(matches!(
            parse_mnemonic(&bad),
            Err(WalletError::InvalidMnemonic(_))
        ));
    }
}
