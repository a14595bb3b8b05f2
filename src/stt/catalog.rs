use std::path::Path;

use anyhow::Context;

use crate::{
    error::ApiError,
    stt::dto::{SttCatalog, SttSettings, SttSettingsRequest},
};

const BUNDLED_CATALOG: &str = include_str!("../../data/stt.json");

impl SttCatalog {
    pub fn bundled() -> anyhow::Result<Self> {
        serde_json::from_str(BUNDLED_CATALOG).context("parse bundled STT catalog")
    }

    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("read STT catalog {}", path.display()))?;
                serde_json::from_slice(&data)
                    .with_context(|| format!("parse STT catalog {}", path.display()))
            }
            None => Self::bundled(),
        }
    }

    /// Checks provider → model → language against the catalog.
    pub fn resolve(&self, req: &SttSettingsRequest) -> Result<SttSettings, ApiError> {
        fn pick(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        let (Some(provider), Some(model), Some(language)) =
            (pick(&req.provider), pick(&req.model), pick(&req.language))
        else {
            return Err(ApiError::BadRequest(
                "Please select a provider, model, and language.".into(),
            ));
        };

        let provider_entry = self
            .stt
            .iter()
            .find(|p| p.value == provider)
            .ok_or_else(|| ApiError::field("provider", "Unknown STT provider"))?;
        let model_entry = provider_entry
            .models
            .iter()
            .find(|m| m.value == model)
            .ok_or_else(|| ApiError::field("model", "Unknown model for provider"))?;
        if !model_entry.languages.iter().any(|l| l.value == language) {
            return Err(ApiError::field("language", "Unsupported language for model"));
        }

        Ok(SttSettings {
            provider: provider.to_string(),
            model: model.to_string(),
            language: language.to_string(),
        })
    }
}
