//! Task templates
//!
//! Each phase (and each step of the review fix loop) has an embedded markdown
//! template with `{{VARIABLE}}` placeholders. A file `<templates_dir>/<name>.md`
//! replaces the embedded one. Rendering is strict: a placeholder left without
//! a value is a configuration error.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::workflow::Phase;
use crate::{Error, Result};

const PLAN_PROMPT: &str = include_str!("prompts/plan.md");
const BUILD_PROMPT: &str = include_str!("prompts/build.md");
const TEST_PROMPT: &str = include_str!("prompts/test.md");
const REVIEW_PROMPT: &str = include_str!("prompts/review.md");
const PATCH_PLAN_PROMPT: &str = include_str!("prompts/patch_plan.md");
const PATCH_PROMPT: &str = include_str!("prompts/patch.md");
const DOCUMENT_PROMPT: &str = include_str!("prompts/document.md");
const SHIP_PROMPT: &str = include_str!("prompts/ship.md");

/// Named task template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    Plan,
    Build,
    Test,
    Review,
    PatchPlan,
    Patch,
    Document,
    Ship,
}

impl TemplateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateName::Plan => "plan",
            TemplateName::Build => "build",
            TemplateName::Test => "test",
            TemplateName::Review => "review",
            TemplateName::PatchPlan => "patch_plan",
            TemplateName::Patch => "patch",
            TemplateName::Document => "document",
            TemplateName::Ship => "ship",
        }
    }

    /// Template bound to a pipeline phase
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Plan => TemplateName::Plan,
            Phase::Build => TemplateName::Build,
            Phase::Test => TemplateName::Test,
            Phase::Review => TemplateName::Review,
            Phase::Document => TemplateName::Document,
            Phase::Ship => TemplateName::Ship,
        }
    }

    fn embedded(&self) -> &'static str {
        match self {
            TemplateName::Plan => PLAN_PROMPT,
            TemplateName::Build => BUILD_PROMPT,
            TemplateName::Test => TEST_PROMPT,
            TemplateName::Review => REVIEW_PROMPT,
            TemplateName::PatchPlan => PATCH_PLAN_PROMPT,
            TemplateName::Patch => PATCH_PROMPT,
            TemplateName::Document => DOCUMENT_PROMPT,
            TemplateName::Ship => SHIP_PROMPT,
        }
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for rendering a prompt template
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    variables: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Set a variable value (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }
}

/// Template source: embedded defaults plus an optional override directory
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    override_dir: Option<PathBuf>,
}

impl TemplateSet {
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Raw template text
    pub fn load(&self, name: TemplateName) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.md", name));
            if path.exists() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Cannot read template {}: {}", path.display(), e))
                });
            }
        }
        Ok(name.embedded().to_string())
    }

    pub fn render(&self, name: TemplateName, context: &PromptContext) -> Result<String> {
        let template = self.load(name)?;
        render_template(&template, context)
            .map_err(|missing| Error::Config(format!("Template '{}': {}", name, missing)))
    }
}

/// Substitute `{{KEY}}` placeholders; fails on any placeholder left unset
fn render_template(template: &str, context: &PromptContext) -> std::result::Result<String, String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    let mut missing = Vec::new();

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let key = &after[..end];
        let is_placeholder =
            !key.is_empty() && key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');

        if !is_placeholder {
            result.push_str("{{");
            rest = after;
            continue;
        }

        match context.get(key) {
            Some(value) => result.push_str(value),
            None => {
                if !missing.contains(&key) {
                    missing.push(key);
                }
            }
        }
        rest = &after[end + 2..];
    }
    result.push_str(rest);

    if missing.is_empty() {
        Ok(result)
    } else {
        Err(format!("unresolved placeholders: {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_context() -> PromptContext {
        [
            "RUN_ID",
            "ISSUE_ID",
            "ISSUE_TITLE",
            "ISSUE_BODY",
            "BRANCH_NAME",
            "WORKSPACE",
            "PLAN_FILE",
            "BACKEND_PORT",
            "FRONTEND_PORT",
            "PRIOR_OUTPUTS",
            "SKIP_E2E",
            "FINDING_ID",
            "FINDING_DESCRIPTION",
            "FINDING_RESOLUTION",
            "PATCH_PLAN",
        ]
        .iter()
        .fold(PromptContext::new(), |ctx, key| ctx.with(*key, format!("<{}>", key)))
    }

    #[test]
    fn test_every_embedded_template_renders() {
        let templates = TemplateSet::default();
        let context = full_context();
        for name in [
            TemplateName::Plan,
            TemplateName::Build,
            TemplateName::Test,
            TemplateName::Review,
            TemplateName::PatchPlan,
            TemplateName::Patch,
            TemplateName::Document,
            TemplateName::Ship,
        ] {
            let rendered = templates.render(name, &context).unwrap();
            assert!(!rendered.contains("{{"), "{} left a placeholder", name);
            assert!(rendered.contains("\"status\""), "{} lacks result contract", name);
        }
    }

    #[test]
    fn test_render_substitutes() {
        let context = PromptContext::new().with("NAME", "world");
        assert_eq!(render_template("hello {{NAME}}!", &context).unwrap(), "hello world!");
    }

    #[test]
    fn test_missing_variable_is_error() {
        let err = render_template("{{A}} and {{B}} and {{A}}", &PromptContext::new()).unwrap_err();
        assert_eq!(err, "unresolved placeholders: A, B");

        let templates = TemplateSet::default();
        let result = templates.render(TemplateName::Plan, &PromptContext::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_non_placeholder_braces_kept() {
        let rendered = render_template("fn x() {{ {{lower}} }}", &PromptContext::new()).unwrap();
        assert_eq!(rendered, "fn x() {{ {{lower}} }}");
    }

    #[test]
    fn test_override_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ship.md"), "Ship {{RUN_ID}}").unwrap();
        let templates = TemplateSet::new(Some(dir.path().to_path_buf()));

        let context = PromptContext::new().with("RUN_ID", "r1");
        assert_eq!(templates.render(TemplateName::Ship, &context).unwrap(), "Ship r1");
        // Names without an override fall back to the embedded text
        assert!(templates.load(TemplateName::Plan).unwrap().contains("{{ISSUE_TITLE}}"));
    }
}
