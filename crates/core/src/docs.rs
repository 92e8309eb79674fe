//! Audience-tailored documentation generation.
//!
//! A [`DocService`] renders one prompt per [`DocFormat`] for the requested
//! [`Audience`] and asks a [`DocGenerator`] for all of them concurrently.

use crate::generator::{DocGenerator, GenerationError};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info};

/// The readership a documentation set is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Audience {
    #[default]
    Beginner,
    Security,
    Integration,
}

impl Audience {
    /// Parses an audience tag. Unknown or missing tags fall back to `Beginner`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            Some("security") => Audience::Security,
            Some("integration") => Audience::Integration,
            _ => Audience::Beginner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Beginner => "beginner",
            Audience::Security => "security",
            Audience::Integration => "integration",
        }
    }

    fn prompt_key(self) -> String {
        format!("audience_{}", self.as_str())
    }
}

/// The three documentation variants produced for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    QuickStart,
    DetailedReference,
    InteractiveTutorial,
}

impl DocFormat {
    pub const ALL: [DocFormat; 3] = [
        DocFormat::QuickStart,
        DocFormat::DetailedReference,
        DocFormat::InteractiveTutorial,
    ];

    pub fn title(self) -> &'static str {
        match self {
            DocFormat::QuickStart => "Quick Start Guide",
            DocFormat::DetailedReference => "Detailed Reference",
            DocFormat::InteractiveTutorial => "Interactive Tutorial",
        }
    }

    fn prompt_key(self) -> &'static str {
        match self {
            DocFormat::QuickStart => "format_quick_start",
            DocFormat::DetailedReference => "format_detailed_reference",
            DocFormat::InteractiveTutorial => "format_interactive_tutorial",
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Missing prompt template: '{0}'")]
    Missing(String),
    #[error("Failed to read prompt templates: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads every `*.md` file in `prompts_path`, keyed by file stem.
pub fn load_prompts(prompts_path: &Path) -> Result<HashMap<String, String>, PromptError> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                let content = fs::read_to_string(&path)?;
                prompts.insert(key.to_string(), content.trim().to_string());
            }
        }
    }
    debug!(count = prompts.len(), path = %prompts_path.display(), "Loaded prompt templates");
    Ok(prompts)
}

/// Validated prompt templates: one instruction per audience, one per format.
#[derive(Debug, Clone)]
pub struct DocPrompts {
    templates: HashMap<String, String>,
}

impl DocPrompts {
    /// Checks that every audience and format template is present.
    pub fn from_map(templates: HashMap<String, String>) -> Result<Self, PromptError> {
        let required = [
            Audience::Beginner.prompt_key(),
            Audience::Security.prompt_key(),
            Audience::Integration.prompt_key(),
        ]
        .into_iter()
        .chain(DocFormat::ALL.iter().map(|f| f.prompt_key().to_string()));

        for key in required {
            if !templates.contains_key(&key) {
                return Err(PromptError::Missing(key));
            }
        }
        Ok(Self { templates })
    }

    pub fn load(prompts_path: &Path) -> Result<Self, PromptError> {
        Self::from_map(load_prompts(prompts_path)?)
    }

    /// Builds the full prompt for one audience/format pair.
    pub fn render(&self, audience: Audience, format: DocFormat, pretty_spec: &str) -> String {
        let instruction = self.template(&audience.prompt_key());
        let body = self.template(format.prompt_key());
        format!("{instruction}\n\n{body}\n\nAPI Specification:\n{pretty_spec}")
    }

    fn template(&self, key: &str) -> &str {
        // Presence was checked in `from_map`.
        self.templates.get(key).map(String::as_str).unwrap_or_default()
    }
}

/// One generated documentation variant.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDoc {
    pub format: DocFormat,
    pub content: String,
}

/// Turns an API specification into the three documentation variants.
pub struct DocService {
    generator: Arc<dyn DocGenerator>,
    prompts: DocPrompts,
}

impl DocService {
    pub fn new(generator: Arc<dyn DocGenerator>, prompts: DocPrompts) -> Self {
        Self { generator, prompts }
    }

    /// Generates all formats concurrently. Any single failure fails the request.
    ///
    /// Results are returned in [`DocFormat::ALL`] order.
    pub async fn transform(
        &self,
        spec: &serde_json::Value,
        audience: Audience,
    ) -> Result<Vec<GeneratedDoc>, GenerationError> {
        info!(audience = audience.as_str(), "Transforming API docs");
        let pretty_spec = serde_json::to_string_pretty(spec)?;

        let jobs = DocFormat::ALL.into_iter().map(|format| {
            let prompt = self.prompts.render(audience, format, &pretty_spec);
            let generator = Arc::clone(&self.generator);
            async move {
                let content = generator.generate(prompt).await?;
                Ok::<_, GenerationError>(GeneratedDoc { format, content })
            }
        });

        futures::future::try_join_all(jobs).await
    }
}
