//! Prompt rewriting after a content-policy refusal.
//!
//! The rewrite rule is policy, not mechanism: the controller only asks a
//! [`PromptTransform`] for the next variant of a refused prompt.

/// Produces the next prompt variant after the provider refused `prompt`.
///
/// `rewrite` is 1 for the first rewrite of a job, 2 for the second, and so on.
pub trait PromptTransform: Send + Sync {
    fn rewrite(&self, prompt: &str, rewrite: u32) -> String;
}

impl<F> PromptTransform for F
where
    F: Fn(&str, u32) -> String + Send + Sync,
{
    fn rewrite(&self, prompt: &str, rewrite: u32) -> String {
        self(prompt, rewrite)
    }
}

pub const DEFAULT_FRAMING: &str = "In a safe, family-friendly way:";

const DEFAULT_BANNED_TERMS: &[&str] = &[
    "blood", "bloody", "gore", "gory", "kill", "killing", "murder", "corpse", "dead", "weapon",
    "gun", "nude", "naked", "violent", "violence", "drugs",
];

/// Drops banned terms word by word, then prepends a neutral framing phrase.
#[derive(Debug, Clone)]
pub struct SafetyRewrite {
    banned_terms: Vec<String>,
    framing: String,
}

impl Default for SafetyRewrite {
    fn default() -> Self {
        Self::new(DEFAULT_BANNED_TERMS.iter().copied())
    }
}

impl SafetyRewrite {
    pub fn new<I, S>(banned_terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            banned_terms: banned_terms
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
            framing: DEFAULT_FRAMING.to_string(),
        }
    }

    pub fn with_framing(mut self, framing: impl Into<String>) -> Self {
        self.framing = framing.into();
        self
    }

    fn is_banned(&self, word: &str) -> bool {
        let bare = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        !bare.is_empty() && self.banned_terms.iter().any(|t| *t == bare)
    }
}

impl PromptTransform for SafetyRewrite {
    fn rewrite(&self, prompt: &str, _rewrite: u32) -> String {
        let body = prompt.strip_prefix(self.framing.as_str()).unwrap_or(prompt);
        let kept: Vec<&str> = body
            .split_whitespace()
            .filter(|w| !self.is_banned(w))
            .collect();
        frame(&self.framing, &kept.join(" "))
    }
}

/// Leaves the prompt untouched apart from the framing phrase.
#[derive(Debug, Clone)]
pub struct FramingOnly {
    framing: String,
}

impl Default for FramingOnly {
    fn default() -> Self {
        Self {
            framing: DEFAULT_FRAMING.to_string(),
        }
    }
}

impl FramingOnly {
    pub fn new(framing: impl Into<String>) -> Self {
        Self {
            framing: framing.into(),
        }
    }
}

impl PromptTransform for FramingOnly {
    fn rewrite(&self, prompt: &str, _rewrite: u32) -> String {
        let body = prompt.strip_prefix(self.framing.as_str()).unwrap_or(prompt);
        let collapsed: Vec<&str> = body.split_whitespace().collect();
        frame(&self.framing, &collapsed.join(" "))
    }
}

fn frame(framing: &str, body: &str) -> String {
    match (framing.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (false, true) => framing.to_string(),
        (false, false) => format!("{} {}", framing, body),
    }
}
