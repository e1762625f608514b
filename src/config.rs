//! Service configuration.
//!
//! Loaded from YAML or JSON; every field except `language` has a default.
//!
//! ```yaml
//! language: en
//! engine_path: /profiles/en/snips/engine.json
//! dataset_path: /profiles/en/snips/dataset.yaml
//! casing: lower
//! casing_scope: engine
//! replace_numbers: true
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{NluError, NluResult};
use crate::normalize::{Casing, CasingScope};

/// Languages the engine ships configurations for.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "de", "en", "es", "fr", "it", "ja", "ko", "pt_br", "pt_pt", "zh",
];

/// Implicit queries must score strictly above this to be recognized.
pub const IMPLICIT_CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub language: String,
    /// Snapshot of the trained engine; read on demand, written after training.
    #[serde(default)]
    pub engine_path: Option<String>,
    /// Where to write the compiled YAML dataset on each training run.
    #[serde(default)]
    pub dataset_path: Option<String>,
    /// Train in memory only, leaving any existing snapshot untouched.
    #[serde(default)]
    pub no_overwrite_train: bool,
    #[serde(default)]
    pub casing: Casing,
    #[serde(default)]
    pub casing_scope: CasingScope,
    /// Replace digits with words before parsing (75 -> seventy five).
    #[serde(default)]
    pub replace_numbers: bool,
    /// Locale for number replacement; defaults to `language`.
    #[serde(default)]
    pub number_language: Option<String>,
    #[serde(default = "default_implicit_threshold")]
    pub implicit_threshold: f64,
    /// Sites to answer; empty accepts every site.
    #[serde(default)]
    pub site_ids: Vec<String>,
    #[serde(default = "default_train_site_id")]
    pub default_train_site_id: String,
}

fn default_implicit_threshold() -> f64 {
    IMPLICIT_CONFIDENCE_THRESHOLD
}

fn default_train_site_id() -> String {
    "default".to_string()
}

impl ServiceConfig {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            engine_path: None,
            dataset_path: None,
            no_overwrite_train: false,
            casing: Casing::default(),
            casing_scope: CasingScope::default(),
            replace_numbers: false,
            number_language: None,
            implicit_threshold: default_implicit_threshold(),
            site_ids: Vec::new(),
            default_train_site_id: default_train_site_id(),
        }
    }

    pub fn with_engine_path(mut self, path: impl Into<String>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    pub fn with_dataset_path(mut self, path: impl Into<String>) -> Self {
        self.dataset_path = Some(path.into());
        self
    }

    pub fn from_yaml(text: &str) -> NluResult<Self> {
        let config: ServiceConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> NluResult<Self> {
        let config: ServiceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn language_supported(&self) -> bool {
        SUPPORTED_LANGUAGES.contains(&self.language.as_str())
    }

    pub fn number_language(&self) -> &str {
        self.number_language.as_deref().unwrap_or(&self.language)
    }

    /// Whether a snapshot should be written after training.
    pub fn persists_snapshots(&self) -> bool {
        self.engine_path.is_some() && !self.no_overwrite_train
    }

    pub fn accepts_site(&self, site_id: &str) -> bool {
        self.site_ids.is_empty() || self.site_ids.iter().any(|s| s == site_id)
    }

    pub fn validate(&self) -> NluResult<()> {
        if !self.language_supported() {
            return Err(NluError::Configuration(format!(
                "Snips language not supported: {}",
                self.language
            )));
        }

        if !(0.0..=1.0).contains(&self.implicit_threshold) {
            return Err(NluError::Configuration(format!(
                "implicit_threshold must be within [0, 1], got {}",
                self.implicit_threshold
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults() {
        let config = ServiceConfig::from_yaml("language: en\n").unwrap();
        assert_eq!(config.language, "en");
        assert_eq!(config.casing, Casing::Ignore);
        assert_eq!(config.casing_scope, CasingScope::Engine);
        assert_eq!(config.implicit_threshold, 0.8);
        assert_eq!(config.default_train_site_id, "default");
        assert!(!config.persists_snapshots());
        assert_eq!(config.number_language(), "en");
    }

    #[test]
    fn yaml_full() {
        let config = ServiceConfig::from_yaml(
            "language: de\n\
             engine_path: profiles/de/engine.json\n\
             no_overwrite_train: true\n\
             casing: upper\n\
             casing_scope: both\n\
             replace_numbers: true\n\
             number_language: de_AT\n\
             site_ids: [kitchen, bedroom]\n",
        )
        .unwrap();
        assert_eq!(config.casing, Casing::Upper);
        assert_eq!(config.casing_scope, CasingScope::Both);
        assert_eq!(config.number_language(), "de_AT");
        assert!(!config.persists_snapshots());
        assert!(config.accepts_site("kitchen"));
        assert!(!config.accepts_site("garage"));
    }

    #[test]
    fn json_config() {
        let config =
            ServiceConfig::from_json(r#"{"language": "fr", "engine_path": "e.json"}"#).unwrap();
        assert!(config.persists_snapshots());
        assert!(config.accepts_site("anything"));
    }

    #[test]
    fn unsupported_language_rejected() {
        let err = ServiceConfig::from_yaml("language: xx\n").unwrap_err();
        assert!(matches!(err, NluError::Configuration(_)));
        assert!(err.to_string().contains("xx"));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let err =
            ServiceConfig::from_yaml("language: en\nimplicit_threshold: 1.5\n").unwrap_err();
        assert!(matches!(err, NluError::Configuration(_)));
    }

    #[test]
    fn missing_language_is_yaml_error() {
        let err = ServiceConfig::from_yaml("casing: lower\n").unwrap_err();
        assert!(matches!(err, NluError::Yaml(_)));
    }
}
