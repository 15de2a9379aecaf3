//! Fixed list of selectable models.

use serde::Serialize;

use crate::core::config::LlmConfig;
use crate::core::errors::{ChatError, ChatResult};

/// The models a user may choose from. Never empty; the first entry is the default.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ModelCatalog {
    models: Vec<String>,
}

impl ModelCatalog {
    /// Build a catalog from a list of model ids.
    ///
    /// # Errors
    /// Returns an error if the list is empty.
    pub fn new(models: Vec<String>) -> ChatResult<Self> {
        if models.is_empty() {
            return Err(ChatError::InvalidConfig(
                "model catalog must not be empty".to_string(),
            ));
        }
        Ok(Self { models })
    }

    /// Build the catalog configured for inference.
    ///
    /// # Errors
    /// Returns an error if no models are configured.
    pub fn from_config(config: &LlmConfig) -> ChatResult<Self> {
        Self::new(config.models.clone())
    }

    /// All model ids in display order.
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// The preselected model.
    #[must_use]
    pub fn default_model(&self) -> &str {
        self.models.first().map_or("", String::as_str)
    }

    /// Resolve a user choice, falling back to the default when none was made.
    ///
    /// # Errors
    /// Returns `UnknownModel` if `choice` is not in the catalog.
    pub fn resolve<'a>(&'a self, choice: Option<&str>) -> ChatResult<&'a str> {
        match choice {
            None => Ok(self.default_model()),
            Some(model) => self
                .models
                .iter()
                .find(|m| m.as_str() == model)
                .map(String::as_str)
                .ok_or_else(|| ChatError::UnknownModel(model.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = ModelCatalog::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(catalog.default_model(), "gemma3:latest");
        assert_eq!(catalog.models().len(), 2);
    }

    #[test]
    fn test_resolve() {
        let catalog = ModelCatalog::from_config(&LlmConfig::default()).unwrap();
        assert_eq!(catalog.resolve(None).unwrap(), "gemma3:latest");
        assert_eq!(catalog.resolve(Some("deepseek-r1:7b")).unwrap(), "deepseek-r1:7b");
        assert!(matches!(
            catalog.resolve(Some("gpt-4o")),
            Err(ChatError::UnknownModel(m)) if m == "gpt-4o"
        ));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(ModelCatalog::new(Vec::new()).is_err());
    }
}
