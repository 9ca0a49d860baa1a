//! AI Tool Parser (C11, spec.md §4.7). Accepts three equivalent surface
//! syntaxes for tool invocations in assistant output; duplicates across
//! syntaxes are preserved (callers see every call, in source order).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub parameters: serde_json::Map<String, Value>,
}

static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[TOOL_CALL\]([^(]+)\(([^)]*)\)\[/TOOL_CALL\]").unwrap());

static XML_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>\s*<tool_name>(.*?)</tool_name>\s*<parameters>(.*?)</parameters>\s*</tool_call>")
        .unwrap()
});

static FENCED_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());

/// Parses all tool calls present in `text`, in the order: bracketed, XML,
/// fenced-JSON/OpenAI — matching spec.md §4.7's enumeration order.
pub fn parse_tool_calls(text: &str) -> Vec<ParsedToolCall> {
    let mut calls = Vec::new();
    calls.extend(parse_bracketed(text));
    calls.extend(parse_xml(text));
    calls.extend(parse_fenced_json(text));
    calls
}

fn parse_bracketed(text: &str) -> Vec<ParsedToolCall> {
    BRACKETED_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().trim().to_string();
            let params_str = cap.get(2)?.as_str();
            let parameters = split_params(params_str)
                .into_iter()
                .map(|(k, v)| (k, parse_value(&v)))
                .collect();
            Some(ParsedToolCall { name, parameters })
        })
        .collect()
}

/// Splits a `k=v, k2=v2` parameter list at top-level commas only — commas
/// inside quotes or brackets/parens are not separators (spec.md §4.7).
fn split_params(raw: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();

    for c in raw.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '[' | '(' => {
                    depth += 1;
                    current.push(c);
                }
                ']' | ')' => {
                    depth -= 1;
                    current.push(c);
                }
                ',' if depth == 0 => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
        .into_iter()
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
        {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if trimmed.contains('.') {
        if let Ok(f) = trimmed.parse::<f64>() {
            return Value::from(f);
        }
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        let items: Vec<Value> = split_top_level_commas(inner)
            .into_iter()
            .map(|item| Value::String(strip_quotes(item.trim()).to_string()))
            .collect();
        return Value::Array(items);
    }
    let is_quoted = (trimmed.starts_with('\'') && trimmed.ends_with('\''))
        || (trimmed.starts_with('"') && trimmed.ends_with('"'));
    if is_quoted {
        return Value::String(strip_quotes(trimmed).to_string());
    }
    Value::String(trimmed.to_string())
}

fn split_top_level_commas(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in raw.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_xml(text: &str) -> Vec<ParsedToolCall> {
    XML_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().trim().to_string();
            let params_json = cap.get(2)?.as_str().trim();
            let parameters = serde_json::from_str::<Value>(params_json)
                .ok()?
                .as_object()?
                .clone();
            Some(ParsedToolCall { name, parameters })
        })
        .collect()
}

fn parse_fenced_json(text: &str) -> Vec<ParsedToolCall> {
    FENCED_JSON_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let json_str = cap.get(1)?.as_str();
            let value: Value = serde_json::from_str(json_str).ok()?;
            parse_openai_or_native(&value)
        })
        .collect()
}

fn parse_openai_or_native(value: &Value) -> Option<ParsedToolCall> {
    if let Some(function) = value.get("function") {
        let name = function.get("name")?.as_str()?.to_string();
        let arguments = function.get("arguments")?;
        let parameters = match arguments {
            Value::String(s) => serde_json::from_str::<Value>(s).ok()?.as_object()?.clone(),
            Value::Object(map) => map.clone(),
            _ => return None,
        };
        return Some(ParsedToolCall { name, parameters });
    }
    let name = value.get("tool_name")?.as_str()?.to_string();
    let parameters = value.get("parameters")?.as_object()?.clone();
    Some(ParsedToolCall { name, parameters })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_with_mixed_types() {
        let text = r#"sure, [TOOL_CALL]create_issue(owner=o, repo=r, title="hello, world", draft=true)[/TOOL_CALL]"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "create_issue");
        assert_eq!(calls[0].parameters["title"], Value::String("hello, world".to_string()));
        assert_eq!(calls[0].parameters["draft"], Value::Bool(true));
    }

    #[test]
    fn parses_bracketed_array_param() {
        let text = r#"[TOOL_CALL]add_label(owner=o, repo=r, number=1, labels=[bug, urgent])[/TOOL_CALL]"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls[0].parameters["labels"], Value::Array(vec![Value::String("bug".into()), Value::String("urgent".into())]));
    }

    #[test]
    fn parses_xml_form() {
        let text = r#"<tool_call><tool_name>get_issue</tool_name><parameters>{"owner":"o","repo":"r","number":1}</parameters></tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_issue");
        assert_eq!(calls[0].parameters["number"], Value::from(1));
    }

    #[test]
    fn parses_fenced_json_native_form() {
        let text = "```json\n{\"tool_name\":\"get_issue\",\"parameters\":{\"owner\":\"o\",\"repo\":\"r\",\"number\":1}}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls[0].name, "get_issue");
    }

    #[test]
    fn parses_fenced_json_openai_form() {
        let text = "```json\n{\"function\":{\"name\":\"get_issue\",\"arguments\":\"{\\\"owner\\\":\\\"o\\\",\\\"repo\\\":\\\"r\\\",\\\"number\\\":1}\"}}\n```";
        let calls = parse_tool_calls(text);
        assert_eq!(calls[0].name, "get_issue");
        assert_eq!(calls[0].parameters["number"], Value::from(1));
    }

    #[test]
    fn duplicates_across_syntaxes_are_preserved() {
        let text = r#"[TOOL_CALL]get_issue(owner=o, repo=r, number=1)[/TOOL_CALL] and also <tool_call><tool_name>get_issue</tool_name><parameters>{"owner":"o","repo":"r","number":1}</parameters></tool_call>"#;
        let calls = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
    }
}
