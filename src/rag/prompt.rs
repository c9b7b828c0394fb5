// Prompt templates
//
// Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
// A built-in `legal_advisor` template is always present; a TOML prompt file
// can add templates or override it.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{RagError, Result};

/// Name of the built-in template
pub const LEGAL_ADVISOR: &str = "legal_advisor";

const LEGAL_ADVISOR_TEMPLATE: &str = "\
You are a professional legal advisor. Answer the user's question using the \
reference material below. Cite the relevant provisions where possible. If the \
material does not cover the question, say so plainly and give general guidance \
instead of inventing provisions.

Reference material (with recent conversation, if any):
{context}

Question: {query}

Answer:";

/// Prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Optional TOML file with a `[templates]` table
    pub template_file: Option<PathBuf>,
    /// Template used when a request names none
    pub default_template: String,
    /// Per-passage display cap in characters; unset for uncapped
    pub passage_display_chars: Option<usize>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template_file: None,
            default_template: LEGAL_ADVISOR.to_string(),
            passage_display_chars: Some(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Parsed prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(RagError::Configuration(format!(
                                    "template '{}' has an unclosed placeholder",
                                    name
                                )))
                            }
                            Some(ch) => key.push(ch),
                        }
                    }
                    let key = key.trim().to_string();
                    if key.is_empty() {
                        return Err(RagError::Configuration(format!(
                            "template '{}' has an empty placeholder",
                            name
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(key));
                }
                '}' => {
                    return Err(RagError::Configuration(format!(
                        "template '{}' has an unmatched '}}'",
                        name
                    )))
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { name, segments })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(key) = segment {
                if !names.contains(&key.as_str()) {
                    names.push(key);
                }
            }
        }
        names
    }

    /// Substitute every placeholder; unknown keys are an error
    pub fn render(&self, values: &HashMap<&str, &str>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    let value = values.get(key.as_str()).ok_or_else(|| RagError::MissingPlaceholder {
                        template: self.name.clone(),
                        key: key.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    templates: HashMap<String, String>,
}

/// Named templates and prompt composition
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    templates: HashMap<String, Template>,
    default_template: String,
}

impl PromptBuilder {
    /// Built-in templates only
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        if let Ok(template) = Template::parse(LEGAL_ADVISOR, LEGAL_ADVISOR_TEMPLATE) {
            templates.insert(LEGAL_ADVISOR.to_string(), template);
        }
        Self {
            templates,
            default_template: LEGAL_ADVISOR.to_string(),
        }
    }

    /// Built-ins plus the configured template file
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        let mut builder = Self::new();
        if let Some(path) = &config.template_file {
            builder.load_file(path)?;
        }
        if !builder.templates.contains_key(&config.default_template) {
            return Err(RagError::TemplateNotFound(config.default_template.clone()));
        }
        builder.default_template = config.default_template.clone();
        Ok(builder)
    }

    /// Add every template from a TOML prompt file
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!("Failed to read prompt file {}: {}", path.display(), e))
        })?;
        let file: PromptFile = toml::from_str(&content).map_err(|e| {
            RagError::Configuration(format!("Failed to parse prompt file {}: {}", path.display(), e))
        })?;

        let count = file.templates.len();
        for (name, source) in file.templates {
            self.insert(&name, &source)?;
        }
        tracing::debug!(path = %path.display(), count, "Loaded prompt templates");
        Ok(count)
    }

    /// Register or replace a template
    pub fn insert(&mut self, name: &str, source: &str) -> Result<()> {
        let template = Template::parse(name, source)?;
        self.templates.insert(name.to_string(), template);
        Ok(())
    }

    pub fn template(&self, name: &str) -> Result<&Template> {
        self.templates
            .get(name)
            .ok_or_else(|| RagError::TemplateNotFound(name.to_string()))
    }

    pub fn default_template(&self) -> &str {
        &self.default_template
    }

    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Fill a template with query, context and history
    pub fn compose(
        &self,
        template_name: &str,
        query: &str,
        retrieved_context: &str,
        conversation_history: &str,
    ) -> Result<String> {
        let values = HashMap::from([
            ("query", query),
            ("context", retrieved_context),
            ("conversation_history", conversation_history),
        ]);
        self.template(template_name)?.render(&values)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
