//! Template variables inside shared strings.
//!
//! A variable marker is a `{{ ... }}` region. Text without a complete marker is
//! never handed to the renderer.

use serde_json::Value;

use crate::error::{Result, XlmergeError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Whether `text` contains at least one complete `{{ ... }}` marker.
pub fn has_variable(text: &str) -> bool {
    text.find(OPEN)
        .and_then(|start| text.get(start + OPEN.len()..))
        .is_some_and(|rest| rest.contains(CLOSE))
}

/// Variable names referenced by the markers in `text`, in order of appearance.
///
/// The name is the leading identifier path of the marker's expression, so
/// `{{ user.name | upper }}` yields `user.name`. A marker with no identifier
/// (a literal, say) contributes its trimmed expression instead, which keeps
/// the result non-empty exactly when [`has_variable`] is true.
pub fn variable_slots(text: &str) -> Vec<String> {
    let mut slots = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let Some(after_open) = rest.get(start + OPEN.len()..) else {
            break;
        };
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        let expr = after_open.get(..end).unwrap_or_default().trim();
        let ident: String = expr
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .collect();
        slots.push(if ident.is_empty() {
            expr.to_string()
        } else {
            ident
        });
        rest = after_open.get(end + CLOSE.len()..).unwrap_or_default();
    }
    slots
}

/// Renders one template string against bound data.
pub trait Renderer {
    fn render(&self, template: &str, data: &Value) -> Result<String>;
}

/// minijinja-backed renderer.
///
/// Lenient mode renders undefined variables as empty text, which matches the
/// mustache behaviour spreadsheet templates are usually written against.
#[derive(Clone, Copy, Debug, Default)]
pub struct JinjaRenderer {
    strict: bool,
}

impl JinjaRenderer {
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

impl Renderer for JinjaRenderer {
    fn render(&self, template: &str, data: &Value) -> Result<String> {
        if !has_variable(template) {
            return Ok(template.to_string());
        }

        let render_error = |e: minijinja::Error| XlmergeError::Render {
            template: template.to_string(),
            message: e.to_string(),
        };

        let mut env = minijinja::Environment::new();
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(if self.strict {
            minijinja::UndefinedBehavior::Strict
        } else {
            minijinja::UndefinedBehavior::Chainable
        });
        env.add_template("__cell__", template)
            .map_err(render_error)?;

        let compiled = env.get_template("__cell__").map_err(render_error)?;
        let ctx = minijinja::Value::from_serialize(data);
        compiled.render(ctx).map_err(render_error)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("Hello {{name}}", true ; "simple marker")]
    #[test_case("{{ a }} and {{ b }}", true ; "two markers")]
    #[test_case("plain text", false ; "no marker")]
    #[test_case("{{ unterminated", false ; "open only")]
    #[test_case("}} {{", false ; "reversed")]
    #[test_case("", false ; "empty")]
    fn test_has_variable(text: &str, expected: bool) {
        assert_eq!(has_variable(text), expected);
    }

    #[test]
    fn test_variable_slots_order_and_paths() {
        assert_eq!(
            variable_slots("{{ AccountName__c }} / {{user.name | upper}} / {{AccountName__c}}"),
            vec!["AccountName__c", "user.name", "AccountName__c"]
        );
    }

    #[test]
    fn test_variable_slots_literal_marker() {
        assert_eq!(variable_slots(r#"{{ "x" }}"#), vec![r#""x""#]);
        assert!(variable_slots("no markers {{ here").is_empty());
    }

    #[test]
    fn test_slots_nonempty_iff_marker() {
        for text in ["a", "{{x}}", "{{}}", "{ {x} }", "x}}{{y}}"] {
            assert_eq!(has_variable(text), !variable_slots(text).is_empty(), "{text}");
        }
    }

    #[test]
    fn test_render_substitutes() {
        let out = JinjaRenderer::default()
            .render("Hello {{name}}", &json!({"name": "World"}))
            .unwrap();
        assert_eq!(out, "Hello World");
    }

    #[test]
    fn test_render_lenient_missing_is_empty() {
        let out = JinjaRenderer::default()
            .render("[{{missing}}]", &json!({}))
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_render_strict_missing_fails() {
        let err = JinjaRenderer::new(true)
            .render("[{{missing}}]", &json!({}))
            .unwrap_err();
        assert!(matches!(err, XlmergeError::Render { .. }));
    }

    #[test]
    fn test_render_syntax_error() {
        let err = JinjaRenderer::default()
            .render("{{ a b }}", &json!({"a": 1}))
            .unwrap_err();
        assert!(matches!(err, XlmergeError::Render { .. }));
    }

    #[test]
    fn test_render_plain_text_untouched() {
        let out = JinjaRenderer::new(true)
            .render("no {{ markers", &json!({}))
            .unwrap();
        assert_eq!(out, "no {{ markers");
    }

    #[test]
    fn test_render_does_not_escape_markup() {
        let out = JinjaRenderer::default()
            .render("{{v}}", &json!({"v": "a < b & c"}))
            .unwrap();
        assert_eq!(out, "a < b & c");
    }
}
