//! CLI configuration.
//!
//! Layered lowest to highest: built-in defaults, the config file
//! (`~/.duff/config.toml` unless `--config` is given), then `DUFF_*`
//! environment variables. Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use duff_core::config::WalletConfig;
use duff_core::constants::BIP44_ADDRESS_GAP;
use duff_core::fee::FeeCategory;
use duff_core::types::Network;
use serde::{Deserialize, Serialize};

/// Wallet file name inside the data directory.
pub const WALLET_FILE: &str = "wallet.duff";

/// Persisted storage state inside the data directory.
pub const STATE_FILE: &str = "state.json";

/// Effective CLI settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Directory holding the wallet file and its state.
    pub data_dir: PathBuf,
    /// Network new wallets are created on.
    pub network: Network,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Unused addresses kept derived ahead per chain.
    pub gap_limit: u32,
    /// Fee category for payments that are not instant.
    pub fee_category: FeeCategory,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            network: Network::Testnet,
            log_level: "info".to_string(),
            log_json: false,
            gap_limit: BIP44_ADDRESS_GAP,
            fee_category: FeeCategory::Normal,
        }
    }
}

impl CliConfig {
    /// Load the layered configuration.
    ///
    /// A missing config file is not an error; a malformed one is.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file.map(Path::to_path_buf).unwrap_or_else(default_config_file);
        Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(file).required(false))
            .add_source(Environment::with_prefix("DUFF").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Path of the encrypted wallet file.
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(WALLET_FILE)
    }

    /// Path of the persisted storage state.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    /// Wallet configuration for a newly created wallet.
    pub fn wallet_config(&self) -> WalletConfig {
        WalletConfig {
            gap_limit: self.gap_limit,
            default_fee_category: self.fee_category,
            ..WalletConfig::for_network(self.network)
        }
    }
}

/// `~/.duff`, or `.duff` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".duff"))
        .unwrap_or_else(|| PathBuf::from(".duff"))
}

fn default_config_file() -> PathBuf {
    default_data_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CliConfig::load(Some(&dir.path().join("missing.toml"))).unwrap();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.gap_limit, BIP44_ADDRESS_GAP);
        assert_eq!(cfg.fee_category, FeeCategory::Normal);
        assert!(cfg.data_dir.ends_with(".duff"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "network = \"mainnet\"\ndata_dir = \"/srv/duff\"\ngap_limit = 5\nfee_category = \"economic\"\n",
        )
        .unwrap();

        let cfg = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.network, Network::Mainnet);
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/duff"));
        assert_eq!(cfg.gap_limit, 5);
        assert_eq!(cfg.fee_category, FeeCategory::Economic);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "gap_limit = \"many\"\n").unwrap();
        assert!(CliConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn paths_live_in_the_data_dir() {
        let cfg = CliConfig {
            data_dir: PathBuf::from("/tmp/w"),
            ..CliConfig::default()
        };
        assert_eq!(cfg.wallet_path(), PathBuf::from("/tmp/w/wallet.duff"));
        assert_eq!(cfg.state_path(), PathBuf::from("/tmp/w/state.json"));
    }

    #[test]
    fn wallet_config_carries_cli_settings() {
        let cfg = CliConfig {
            network: Network::Mainnet,
            gap_limit: 7,
            fee_category: FeeCategory::Priority,
            ..CliConfig::default()
        };
        let wallet = cfg.wallet_config();
        assert_eq!(wallet.network, Network::Mainnet);
        assert_eq!(wallet.gap_limit, 7);
        assert_eq!(wallet.default_fee_category, FeeCategory::Priority);
    }
}
