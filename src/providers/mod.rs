// src/providers/mod.rs - Remote emote catalog providers

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::{EmotesConfig, ProviderConfig};

/// A single emote as a provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteDescriptor {
    pub code: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// Trait every emote source must implement
#[async_trait]
pub trait EmoteProvider: Send + Sync {
    /// Provider identifier used in logs (e.g., "bttv", "7tv")
    fn name(&self) -> &str;

    /// Fetch the provider's current emote list
    async fn fetch(&self) -> Result<Vec<EmoteDescriptor>>;
}

/// Read-only JSON endpoint returning a list of emote objects.
pub struct HttpEmoteProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl HttpEmoteProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl EmoteProvider for HttpEmoteProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch(&self) -> Result<Vec<EmoteDescriptor>> {
        let response = self
            .http_client
            .get(&self.config.url)
            .send()
            .await
            .with_context(|| format!("Failed to request {} emotes", self.config.name))?
            .error_for_status()
            .with_context(|| format!("{} emote endpoint returned an error status", self.config.name))?;

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} emote response", self.config.name))?;

        Ok(descriptors_from_json(&body, &self.config))
    }
}

/// Turn a provider payload into descriptors.
///
/// Accepts a bare array or an object with an `emotes` array. Entries with an
/// empty code or id, or whose image URL does not parse, are skipped.
pub fn descriptors_from_json(body: &Value, config: &ProviderConfig) -> Vec<EmoteDescriptor> {
    let items: &[Value] = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("emotes") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    let mut descriptors = Vec::with_capacity(items.len());
    for item in items {
        let code = field_as_string(item, &config.code_field);
        let id = field_as_string(item, &config.id_field);
        if code.is_empty() || id.is_empty() {
            continue;
        }

        let image_url = config.image_template.replace("{id}", &id);
        if let Err(e) = Url::parse(&image_url) {
            debug!("Skipping {} emote '{}': bad image url: {}", config.name, code, e);
            continue;
        }

        descriptors.push(EmoteDescriptor { code, image_url });
    }
    descriptors
}

fn field_as_string(item: &Value, field: &str) -> String {
    match item.get(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// HTTP providers for the configured endpoints, in priority order.
pub fn default_providers(config: &EmotesConfig) -> Vec<Box<dyn EmoteProvider>> {
    config
        .providers
        .iter()
        .cloned()
        .map(|provider| Box::new(HttpEmoteProvider::new(provider)) as Box<dyn EmoteProvider>)
        .collect()
}
