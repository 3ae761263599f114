//! `{{variable.path}}` resolution against the run context.
//!
//! Templates are minijinja. The helper form `{{json path}}` is also
//! accepted and treated as `{{ path | json }}`.

use crate::context::RunContext;
use crate::error::ExecutionError;
use crate::node::NodeId;
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use std::borrow::Cow;

/// Renders node template fields.
///
/// Undefined lookups, including attribute access on something undefined,
/// render as the empty string. Output is never HTML-escaped.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_filter("json", json_filter);
        Self { env }
    }

    /// Renders `template` with the context variables in scope.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Template` if the template does not parse or a
    /// filter fails.
    pub fn render(
        &self,
        node_id: &NodeId,
        template: &str,
        context: &RunContext,
    ) -> Result<String, ExecutionError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_string());
        }
        self.env
            .render_str(&json_helper_as_filter(template), context.variables())
            .map_err(|e| ExecutionError::Template {
                node_id: node_id.clone(),
                reason: e.to_string(),
            })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrites every `{{json path}}` tag into `{{ path | json }}`. Other tags
/// are left alone.
fn json_helper_as_filter(template: &str) -> Cow<'_, str> {
    if !template.contains("json") {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut changed = false;
    while let Some(start) = rest.find("{{") {
        let (before, tag) = rest.split_at(start);
        out.push_str(before);
        let Some(end) = tag.find("}}") else {
            rest = tag;
            break;
        };
        let path = tag[2..end]
            .trim()
            .strip_prefix("json")
            .filter(|args| args.starts_with(char::is_whitespace))
            .map(str::trim)
            .filter(|path| is_variable_path(path));
        match path {
            Some(path) => {
                out.push_str("{{ ");
                out.push_str(path);
                out.push_str(" | json }}");
                changed = true;
            }
            None => out.push_str(&tag[..end + 2]),
        }
        rest = &tag[end + 2..];
    }
    out.push_str(rest);

    if changed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(template)
    }
}

fn is_variable_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

/// Pretty-printed JSON of any value.
fn json_filter(value: Value) -> Result<String, Error> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::from_initial(json!({
            "webhook": { "body": { "user": { "name": "Ada" }, "count": 3 } },
            "label": "<b>bold</b>"
        }))
    }

    fn render(template: &str) -> Result<String, ExecutionError> {
        TemplateEngine::new().render(&NodeId::from("n"), template, &ctx())
    }

    #[test]
    fn resolves_nested_paths() {
        assert_eq!(
            render("Hello {{webhook.body.user.name}} ({{ webhook.body.count }})").ok(),
            Some("Hello Ada (3)".to_string())
        );
    }

    #[test]
    fn undefined_paths_render_empty() {
        assert_eq!(render("[{{missing}}]").ok(), Some("[]".to_string()));
        assert_eq!(render("[{{missing.deeper.still}}]").ok(), Some("[]".to_string()));
        assert_eq!(render("[{{webhook.body.nope}}]").ok(), Some("[]".to_string()));
    }

    #[test]
    fn output_is_not_escaped() {
        assert_eq!(render("{{label}}").ok(), Some("<b>bold</b>".to_string()));
    }

    #[test]
    fn json_filter_serializes_objects() {
        let rendered = render("{{ webhook.body.user | json }}").expect("render");
        let parsed: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(parsed, json!({ "name": "Ada" }));
    }

    #[test]
    fn json_helper_form_renders_like_the_filter() {
        let rendered = render("body: {{json webhook.body.user}}").expect("render");
        let parsed: serde_json::Value =
            serde_json::from_str(rendered.trim_start_matches("body: ")).expect("valid json");
        assert_eq!(parsed, json!({ "name": "Ada" }));
        assert_eq!(
            render("{{ json webhook.body.count }} and {{label}}").ok(),
            Some("3 and <b>bold</b>".to_string())
        );
    }

    #[test]
    fn json_helper_rewrite_leaves_other_tags_alone() {
        assert_eq!(
            json_helper_as_filter("{{ jsonish }} {{ x | json }}"),
            "{{ jsonish }} {{ x | json }}"
        );
        assert_eq!(
            json_helper_as_filter("{{json a.b}} / {{json c}}"),
            "{{ a.b | json }} / {{ c | json }}"
        );
        assert_eq!(json_helper_as_filter("{{json a"), "{{json a");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("{not a template}").ok(), Some("{not a template}".to_string()));
    }

    #[test]
    fn syntax_errors_are_template_errors() {
        assert!(matches!(
            render("{{ unclosed"),
            Err(ExecutionError::Template { .. })
        ));
    }
}
