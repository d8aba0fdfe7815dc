//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, recorded with every job result.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Command;

    const SAMPLE: &str = r#"
store:
  result_dir: /tmp/result
  database: osf
  subject: acme
  attach:
    - database: nfe
    - database: gia2024
      alias: gia
load:
  commit_threshold: 1000
steps:
  - name: items
    menu: Loads / Items
    uses: [osf, nfe]
    command:
      type: load_text
      path: items.tsv
      table: items
  - name: audit-items
    command:
      type: audit_unique
      table: items
      keys: [chave, item]
"#;

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.store.database, "osf");
        assert_eq!(config.store.attach[0].alias(), "nfe");
        assert_eq!(config.store.attach[1].alias(), "gia");
        assert_eq!(config.load.commit_threshold, 1000);
        assert_eq!(config.load.numeric_literal_max_len, 25);
        assert_eq!(config.load.table_markers, vec!["DocAtrib", "Dfe"]);
        assert!(config.text.has_header);
        assert_eq!(config.steps.len(), 2);
        assert!(matches!(
            &config.steps[1].command,
            Command::AuditUnique { keys, .. } if keys.len() == 2
        ));
    }

    #[test]
    fn test_from_yaml_missing_store() {
        assert!(Config::from_yaml("load:\n  commit_threshold: 5\n").is_err());
    }

    #[test]
    fn test_from_yaml_runs_validation() {
        let yaml = "store:\n  database: osf\nload:\n  commit_threshold: 0\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(SAMPLE).unwrap();
        let b = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
