use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Administrative state of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Enabled,
    Disabled,
}

/// A chat model as known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatModel {
    /// Selector used by clients and job envelopes.
    pub id: String,
    /// Name sent to the upstream provider.
    pub model_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ModelStatus,
    /// Price in quota units per 1000 prompt tokens.
    #[serde(default)]
    pub input_price: i64,
    /// Price in quota units per 1000 completion tokens.
    #[serde(default)]
    pub output_price: i64,
}

impl ChatModel {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            model_id: model_id.into(),
            status: ModelStatus::Enabled,
            input_price: 0,
            output_price: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_prices(mut self, input_price: i64, output_price: i64) -> Self {
        self.input_price = input_price;
        self.output_price = output_price;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.status = ModelStatus::Disabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ModelStatus::Enabled
    }
}

/// Model lookup by selector.
pub trait ModelCatalog: Send + Sync {
    /// Returns `None` when the selector is unknown. Disabled models are
    /// still returned; callers decide what disabled means for them.
    fn model(&self, id: &str) -> Option<ChatModel>;
}

impl<C> ModelCatalog for Arc<C>
where
    C: ModelCatalog + ?Sized,
{
    fn model(&self, id: &str) -> Option<ChatModel> {
        (**self).model(id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryModelCatalog {
    models: RwLock<HashMap<String, ChatModel>>,
}

impl InMemoryModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(self, model: ChatModel) -> Self {
        self.insert(model);
        self
    }

    pub fn insert(&self, model: ChatModel) {
        if let Ok(mut models) = self.models.write() {
            models.insert(model.id.clone(), model);
        }
    }
}

impl ModelCatalog for InMemoryModelCatalog {
    fn model(&self, id: &str) -> Option<ChatModel> {
        self.models.read().ok()?.get(id).cloned()
    }
}
