//! Registrator settings as read from the `[registrator]` table

use std::path::PathBuf;
use std::time::Duration;

use dss_core::WaitBudget;
use serde::{Deserialize, Serialize};

use crate::transaction::TransactionSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistratorConfig {
    /// Dropbox scanned for new items.
    pub incoming_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub precommit_dir: PathBuf,
    pub store_root: PathBuf,
    pub rollback_dir: PathBuf,
    pub data_store_code: String,
    pub check_interval_secs: u64,
    pub registration_max_retry_count: u32,
    pub registration_retry_pause_secs: u64,
    pub staging_wait_count: u32,
    pub staging_wait_interval_ms: u64,
    /// Retry failed items on every pass instead of remembering them.
    pub reprocess_faulty: bool,
    /// Only pick up items announced by a `.MARKER_is_finished_<name>` file.
    pub use_is_finished_marker: bool,
    pub data_set_type: String,
    /// Owner of data sets registered from the dropbox.
    pub experiment: Option<String>,
}

impl Default for RegistratorConfig {
    fn default() -> Self {
        Self {
            incoming_dir: PathBuf::from("./incoming"),
            staging_dir: PathBuf::from("./staging"),
            precommit_dir: PathBuf::from("./precommit"),
            store_root: PathBuf::from("./store"),
            rollback_dir: PathBuf::from("./rollback"),
            data_store_code: "DSS1".to_string(),
            check_interval_secs: 60,
            registration_max_retry_count: 6,
            registration_retry_pause_secs: 10,
            staging_wait_count: 30,
            staging_wait_interval_ms: 10_000,
            reprocess_faulty: false,
            use_is_finished_marker: false,
            data_set_type: "UNKNOWN".to_string(),
            experiment: None,
        }
    }
}

impl RegistratorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn staging_wait(&self) -> WaitBudget {
        WaitBudget::new(
            self.staging_wait_count,
            Duration::from_millis(self.staging_wait_interval_ms),
        )
    }

    pub fn transaction_settings(&self) -> TransactionSettings {
        TransactionSettings {
            store_root: self.store_root.clone(),
            precommit_dir: self.precommit_dir.clone(),
            data_store_code: Some(self.data_store_code.clone()),
            registration_max_retry_count: self.registration_max_retry_count,
            registration_retry_pause: Duration::from_secs(self.registration_retry_pause_secs),
            staging_wait: self.staging_wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RegistratorConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.staging_wait().total(), Duration::from_secs(300));
        assert!(!config.reprocess_faulty);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
incoming_dir = "/data/dropbox"
registration_max_retry_count = 2
experiment = "/LAB/SEQ/RUNS"
"#;
        let config: RegistratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.incoming_dir, PathBuf::from("/data/dropbox"));
        assert_eq!(config.experiment.as_deref(), Some("/LAB/SEQ/RUNS"));
        assert_eq!(config.staging_dir, PathBuf::from("./staging"));

        let settings = config.transaction_settings();
        assert_eq!(settings.registration_max_retry_count, 2);
        assert_eq!(settings.registration_retry_pause, Duration::from_secs(10));
        assert_eq!(settings.data_store_code.as_deref(), Some("DSS1"));
    }
}
