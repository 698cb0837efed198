//! Editor configuration.

use crate::EditorError;
use serde::Deserialize;

/// Per-document settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorConfig {
    /// Prefix of every identifier this document allocates
    pub site_id: String,

    /// Undo levels kept (0 = unlimited)
    pub max_undo_levels: usize,

    /// Record local transactions for undo
    pub record_history: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            site_id: "local".to_string(),
            max_undo_levels: 100,
            record_history: true,
        }
    }
}

impl EditorConfig {
    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    pub fn from_json(source: &str) -> Result<Self, EditorError> {
        let config: Self =
            serde_json::from_str(source).map_err(|e| EditorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject site ids that cannot prefix a sid
    pub fn validate(&self) -> Result<(), EditorError> {
        if self.site_id.is_empty() {
            return Err(EditorError::Config("siteId must not be empty".to_string()));
        }
        if self.site_id.contains(':') || self.site_id.starts_with('$') {
            return Err(EditorError::Config(format!(
                "siteId `{}` may not contain ':' or start with '$'",
                self.site_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.site_id, "local");
        assert_eq!(config.max_undo_levels, 100);
        assert!(config.record_history);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EditorConfig::from_json(r#"{ "siteId": "alice" }"#).unwrap();
        assert_eq!(config.site_id, "alice");
        assert_eq!(config.max_undo_levels, 100);
    }

    #[test]
    fn test_rejects_bad_site_id() {
        assert!(matches!(
            EditorConfig::from_json(r#"{ "siteId": "a:b" }"#),
            Err(EditorError::Config(_))
        ));
        assert!(matches!(
            EditorConfig::from_json("not json"),
            Err(EditorError::Config(_))
        ));
    }
}
