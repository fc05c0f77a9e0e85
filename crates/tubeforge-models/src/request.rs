//! Generation request variants.
//!
//! Each provider tool accepts its own request shape. The set is closed: a job
//! picks its variant when it is built, and the dispatcher only ever talks to
//! it through [`GenerationRequest::prompt`], [`GenerationRequest::seed`] and
//! [`GenerationRequest::with_prompt`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Provider;

/// Text-to-image request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRequest {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,

    #[serde(default = "default_dimension")]
    pub width: u32,

    #[serde(default = "default_dimension")]
    pub height: u32,

    /// Sampling steps
    #[serde(default = "default_steps")]
    pub steps: u32,

    #[serde(default)]
    pub seed: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    30
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: default_dimension(),
            height: default_dimension(),
            steps: default_steps(),
            seed: 0,
            model: None,
        }
    }

    /// 16:9 frame used for video scenes and thumbnails.
    pub fn landscape(mut self) -> Self {
        self.width = 1280;
        self.height = 720;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Text completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextRequest {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default)]
    pub seed: u64,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A provider request, tagged by tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum GenerationRequest {
    Image(ImageRequest),
    Text(TextRequest),
}

impl GenerationRequest {
    /// Provider that serves this request.
    pub fn provider(&self) -> Provider {
        match self {
            GenerationRequest::Image(_) => Provider::Image,
            GenerationRequest::Text(_) => Provider::Text,
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            GenerationRequest::Image(r) => &r.prompt,
            GenerationRequest::Text(r) => &r.prompt,
        }
    }

    pub fn seed(&self) -> u64 {
        match self {
            GenerationRequest::Image(r) => r.seed,
            GenerationRequest::Text(r) => r.seed,
        }
    }

    /// Copy of this request with the prompt replaced; all other parameters are kept.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        match self {
            GenerationRequest::Image(r) => GenerationRequest::Image(ImageRequest {
                prompt,
                ..r.clone()
            }),
            GenerationRequest::Text(r) => GenerationRequest::Text(TextRequest {
                prompt,
                ..r.clone()
            }),
        }
    }
}

impl From<ImageRequest> for GenerationRequest {
    fn from(r: ImageRequest) -> Self {
        GenerationRequest::Image(r)
    }
}

impl From<TextRequest> for GenerationRequest {
    fn from(r: TextRequest) -> Self {
        GenerationRequest::Text(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_per_variant() {
        let image: GenerationRequest = ImageRequest::new("a red fox").with_seed(7).into();
        assert_eq!(image.provider(), Provider::Image);
        assert_eq!(image.prompt(), "a red fox");
        assert_eq!(image.seed(), 7);

        let text: GenerationRequest = TextRequest::new("write an intro").with_seed(9).into();
        assert_eq!(text.provider(), Provider::Text);
        assert_eq!(text.prompt(), "write an intro");
        assert_eq!(text.seed(), 9);
    }

    #[test]
    fn test_with_prompt_keeps_parameters() {
        let original: GenerationRequest = ImageRequest::new("old").landscape().with_seed(42).into();
        let rewritten = original.with_prompt("new");

        match rewritten {
            GenerationRequest::Image(r) => {
                assert_eq!(r.prompt, "new");
                assert_eq!(r.width, 1280);
                assert_eq!(r.height, 720);
                assert_eq!(r.seed, 42);
            }
            other => panic!("variant changed: {:?}", other),
        }
    }

    #[test]
    fn test_tagged_deserialization() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"tool":"text","prompt":"hello","max_tokens":100}"#).unwrap();
        match req {
            GenerationRequest::Text(r) => {
                assert_eq!(r.max_tokens, 100);
                assert_eq!(r.seed, 0);
            }
            other => panic!("unexpected variant: {:?}", other),
        }

        let req: GenerationRequest =
            serde_json::from_str(r#"{"tool":"image","prompt":"castle"}"#).unwrap();
        assert_eq!(req.provider(), Provider::Image);
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let err = serde_json::from_str::<GenerationRequest>(r#"{"tool":"video","prompt":"x"}"#);
        assert!(err.is_err());
    }
}
