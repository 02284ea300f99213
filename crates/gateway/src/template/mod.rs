//! C3 — the template engine: a small, pure `{{ expr }}` string interpolator.
//!
//! Deliberately not a general expression language (no recursion, no I/O, no
//! host reflection): `{{ args.x.y }}` walks a dotted path through
//! [`Context`]'s four namespaces (`args`, `request`, `config`, `env`),
//! missing keys render empty, non-string leaves are JSON-encoded.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated template expression in {0:?}")]
    Unterminated(String),
    #[error("empty template expression in {0:?}")]
    EmptyExpression(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("template references unknown argument {0:?}")]
pub struct MissingArgError(pub String);

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr(Vec<String>),
}

/// A parsed template: config-time parse errors surface once, at load time,
/// not on every render.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
    source: String,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find("}}") else {
                return Err(TemplateError::Unterminated(source.to_string()));
            };
            let expr = after_open[..end].trim();
            if expr.is_empty() {
                return Err(TemplateError::EmptyExpression(source.to_string()));
            }
            let path = expr.split('.').map(str::to_string).collect::<Vec<_>>();
            segments.push(Segment::Expr(path));
            rest = &after_open[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Self {
            segments,
            source: source.to_string(),
        })
    }

    /// Render against `ctx`. A missing key renders as an empty string.
    pub fn render(&self, ctx: &Context) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr(path) => out.push_str(&ctx.resolve(path)),
            }
        }
        out
    }

    /// Same as [`Template::render`], but an `args.*` expression that
    /// resolves to nothing is a runtime error: a tool invocation that
    /// references a caller argument the caller never supplied should fail
    /// with `InvalidParams`, not silently substitute empty string.
    pub fn render_strict(&self, ctx: &Context) -> Result<String, MissingArgError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Expr(path) => {
                    if path.first().map(String::as_str) == Some("args")
                        && walk(&ctx.args, &path[1..]).is_none()
                    {
                        return Err(MissingArgError(self.source.clone()));
                    }
                    out.push_str(&ctx.resolve(path));
                },
            }
        }
        Ok(out)
    }
}

/// The render context: caller arguments, selected request attributes, the
/// resolved server's free-form `config` map, and a read-only snapshot of the
/// process environment taken at startup.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub args: Value,
    pub request_headers: BTreeMap<String, String>,
    pub request_query: BTreeMap<String, String>,
    pub request_path: String,
    pub config: Value,
    pub env: BTreeMap<String, String>,
}

impl Context {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            args: Value::Object(Default::default()),
            request_headers: Default::default(),
            request_query: Default::default(),
            request_path: String::new(),
            config: Value::Object(Default::default()),
            env,
        }
    }

    fn resolve(&self, path: &[String]) -> String {
        let Some((root, rest)) = path.split_first() else {
            return String::new();
        };
        match root.as_str() {
            "args" => render_value(walk(&self.args, rest)),
            "config" => render_value(walk(&self.config, rest)),
            "env" => rest
                .first()
                .and_then(|key| self.env.get(key))
                .cloned()
                .unwrap_or_default(),
            "request" => match rest.first().map(String::as_str) {
                Some("path") => self.request_path.clone(),
                Some("headers") => rest
                    .get(1)
                    .and_then(|key| self.request_headers.get(key))
                    .cloned()
                    .unwrap_or_default(),
                Some("query") => rest
                    .get(1)
                    .and_then(|key| self.request_query.get(key))
                    .cloned()
                    .unwrap_or_default(),
                _ => String::new(),
            },
            _ => String::new(),
        }
    }
}

fn render_value(v: Option<&Value>) -> String {
    match v {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn walk<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for key in path {
        current = current.as_object()?.get(key.as_str())?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_args(args: Value) -> Context {
        let mut ctx = Context::new(Default::default());
        ctx.args = args;
        ctx
    }

    #[test]
    fn renders_plain_text_unchanged() {
        let t = Template::parse("hello world").unwrap();
        assert_eq!(t.render(&Context::new(Default::default())), "hello world");
    }

    #[test]
    fn substitutes_nested_arg() {
        let t = Template::parse("hi {{ args.name }}!").unwrap();
        let ctx = ctx_with_args(serde_json::json!({"name": "ada"}));
        assert_eq!(t.render(&ctx), "hi ada!");
    }

    #[test]
    fn missing_key_renders_empty() {
        let t = Template::parse("[{{ args.missing }}]").unwrap();
        let ctx = ctx_with_args(serde_json::json!({}));
        assert_eq!(t.render(&ctx), "[]");
    }

    #[test]
    fn non_string_value_is_json_encoded() {
        let t = Template::parse("{{ args.n }}").unwrap();
        let ctx = ctx_with_args(serde_json::json!({"n": 42}));
        assert_eq!(t.render(&ctx), "42");
    }

    #[test]
    fn env_and_request_resolve() {
        let t = Template::parse("{{ env.HOME }}:{{ request.path }}:{{ request.headers.x }}").unwrap();
        let mut ctx = Context::new(BTreeMap::from([("HOME".to_string(), "/root".to_string())]));
        ctx.request_path = "/foo/mcp".to_string();
        ctx.request_headers.insert("x".to_string(), "y".to_string());
        assert_eq!(t.render(&ctx), "/root:/foo/mcp:y");
    }

    #[test]
    fn unterminated_expression_is_a_parse_error() {
        assert_eq!(
            Template::parse("hello {{ args.x"),
            Err(TemplateError::Unterminated("hello {{ args.x".to_string()))
        );
    }

    #[test]
    fn missing_arg_is_strict_error_at_runtime() {
        let t = Template::parse("{{ args.required }}").unwrap();
        let ctx = ctx_with_args(serde_json::json!({}));
        assert_eq!(
            t.render_strict(&ctx),
            Err(MissingArgError("{{ args.required }}".to_string()))
        );
    }

    #[test]
    fn strict_render_passes_through_present_args() {
        let t = Template::parse("hi {{ args.name }}").unwrap();
        let ctx = ctx_with_args(serde_json::json!({"name": "ada"}));
        assert_eq!(t.render_strict(&ctx).unwrap(), "hi ada");
    }
}
