//! Unit conversion between whole coins and duffs.

use crate::constants::DUFFS_PER_DASH;
use crate::error::WalletError;

/// Convert a coin amount to duffs, rounding to the nearest duff.
pub fn dash_to_duffs(amount: f64) -> Result<u64, WalletError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(WalletError::InvalidAmount(format!("{amount}")));
    }
    let duffs = (amount * DUFFS_PER_DASH as f64).round();
    if duffs > u64::MAX as f64 {
        return Err(WalletError::InvalidAmount(format!("{amount} overflows")));
    }
    Ok(duffs as u64)
}

/// Display helper, not for arithmetic.
pub fn duffs_to_dash(duffs: u64) -> f64 {
    duffs as f64 / DUFFS_PER_DASH as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_whole_and_fractional() {
        assert_eq!(dash_to_duffs(1.0).unwrap(), 100_000_000);
        assert_eq!(dash_to_duffs(0.00000205).unwrap(), 205);
        assert_eq!(dash_to_duffs(0.1).unwrap(), 10_000_000);
    }

    #[test]
    fn rejects_negative_and_nan() {
        assert!(dash_to_duffs(-1.0).is_err());
        assert!(dash_to_duffs(f64::NAN).is_err());
        assert!(dash_to_duffs(f64::INFINITY).is_err());
    }

    #[test]
    fn display_helper() {
        assert_eq!(duffs_to_dash(150_000_000), 1.5);
    }
}
