#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub vendor: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vendor: String::new(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Models the workspace can route a conversation to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub models: Vec<Model>,
}

impl ModelCatalog {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    pub fn find(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|model| model.id == model_id)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.find(model_id).is_some()
    }

    pub fn display_name(&self, model_id: &str) -> String {
        self.find(model_id)
            .map(|model| model.name.clone())
            .unwrap_or_else(|| model_id.to_string())
    }

    /// First model not rejected by `is_disabled`, used when the preferred one is switched off.
    pub fn first_enabled(&self, is_disabled: impl Fn(&str) -> bool) -> Option<&Model> {
        self.models.iter().find(|model| !is_disabled(&model.id))
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(default_models())
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4o";

pub fn default_models() -> Vec<Model> {
    vec![
        Model::new("gpt-4o", "GPT-4o")
            .with_vendor("OpenAI")
            .with_description("High quality general model"),
        Model::new("gpt-4.1", "GPT-4.1")
            .with_vendor("OpenAI")
            .with_description("Reasoning-forward GPT-4.1"),
        Model::new("claude-3.5-sonnet", "Claude 3.5 Sonnet")
            .with_vendor("Anthropic")
            .with_description("Careful long-form writing"),
        Model::new("gemini-1.5-pro", "Gemini 1.5 Pro")
            .with_vendor("Google")
            .with_description("Long context multimodal model"),
        Model::new("llama-3.1-70b", "Llama 3.1 70B")
            .with_vendor("Meta")
            .with_description("Open weights generalist"),
        Model::new("deepseek-v3", "DeepSeek V3")
            .with_vendor("DeepSeek")
            .with_description("Fast coding assistant"),
    ]
}
