//! Stage 1 of the signature processor: tolerant parsing of a free-form
//! function-signature string.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_hint: Option<String>,
    pub optional: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub function_name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub is_async: bool,
}

/// Normalizes whitespace, then extracts `functionName`, `parameters`,
/// `returnType`, and `isAsync`. If the input doesn't resemble a function
/// signature (no `(`), the whole input becomes `functionName`.
pub fn parse_signature(input: &str) -> ParsedSignature {
    let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");

    let is_async = normalized.starts_with("async ") || normalized.contains("async fn") || normalized.contains("async function");

    let Some(paren_open) = normalized.find('(') else {
        return ParsedSignature {
            function_name: normalized.trim().to_string(),
            parameters: Vec::new(),
            return_type: None,
            is_async,
        };
    };

    let function_name = extract_name(&normalized[..paren_open]);

    let Some(paren_close) = find_matching_close(&normalized, paren_open) else {
        return ParsedSignature {
            function_name,
            parameters: Vec::new(),
            return_type: None,
            is_async,
        };
    };

    let param_text = &normalized[paren_open + 1..paren_close];
    let parameters = parse_parameters(param_text);
    let return_type = extract_return_type(&normalized[paren_close + 1..]);

    ParsedSignature {
        function_name,
        parameters,
        return_type,
        is_async,
    }
}

fn extract_name(prefix: &str) -> String {
    prefix
        .trim()
        .trim_start_matches("async")
        .trim()
        .trim_start_matches("function")
        .trim()
        .trim_start_matches("fn")
        .trim()
        .trim_end_matches(|c: char| c == ':')
        .split(|c: char| c.is_whitespace() || c == '.')
        .last()
        .unwrap_or_default()
        .to_string()
}

fn find_matching_close(s: &str, open_idx: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices().skip(open_idx) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_parameters(text: &str) -> Vec<Parameter> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(text, ',')
        .into_iter()
        .map(|raw| parse_one_parameter(raw.trim()))
        .filter(|p| !p.name.is_empty())
        .collect()
}

fn parse_one_parameter(raw: &str) -> Parameter {
    let (name_and_optional, default_value) = match raw.split_once('=') {
        Some((lhs, rhs)) => (lhs.trim(), Some(rhs.trim().to_string())),
        None => (raw, None),
    };

    let (name_part, type_hint) = match name_and_optional.split_once(':') {
        Some((lhs, rhs)) => (lhs.trim(), Some(rhs.trim().to_string())),
        None => (name_and_optional, None),
    };

    let optional = name_part.ends_with('?') || default_value.is_some();
    let name = name_part.trim_end_matches('?').trim().to_string();

    Parameter {
        name,
        type_hint,
        optional,
        default_value,
    }
}

/// Splits on `sep` but never inside nested `()`/`<>`/`[]`, so generic types
/// like `Map<string, number>` survive as one parameter's type hint.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Looks for a `": T"` or `"=> T"` pattern trailing the parameter list.
fn extract_return_type(tail: &str) -> Option<String> {
    let tail = tail.trim();
    if let Some(rest) = tail.strip_prefix("=>") {
        let t = rest.trim();
        return (!t.is_empty()).then(|| t.to_string());
    }
    if let Some(rest) = tail.strip_prefix(':') {
        let t = rest.trim();
        return (!t.is_empty()).then(|| t.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_signature_with_return_type() {
        let parsed = parse_signature("parse(input: string): AST");
        assert_eq!(parsed.function_name, "parse");
        assert_eq!(parsed.parameters.len(), 1);
        assert_eq!(parsed.parameters[0].name, "input");
        assert_eq!(parsed.parameters[0].type_hint.as_deref(), Some("string"));
        assert_eq!(parsed.return_type.as_deref(), Some("AST"));
        assert!(!parsed.is_async);
    }

    #[test]
    fn parses_async_arrow_with_default_and_optional_param() {
        let parsed = parse_signature("async function send(msg: string, retries = 3) => Promise<void>");
        assert!(parsed.is_async);
        assert_eq!(parsed.function_name, "send");
        assert_eq!(parsed.parameters.len(), 2);
        assert!(parsed.parameters[1].optional);
        assert_eq!(parsed.return_type.as_deref(), Some("Promise<void>"));
    }

    #[test]
    fn non_signature_input_becomes_function_name() {
        let parsed = parse_signature("fooBar");
        assert_eq!(parsed.function_name, "fooBar");
        assert!(parsed.parameters.is_empty());
    }

    #[test]
    fn zero_argument_signature_has_no_parameters() {
        let parsed = parse_signature("init()");
        assert_eq!(parsed.function_name, "init");
        assert!(parsed.parameters.is_empty());
    }

    proptest::proptest! {
        /// The parser is tolerant by design: it must never panic, regardless
        /// of input.
        #[test]
        fn never_panics_on_arbitrary_input(s in ".*") {
            let _ = parse_signature(&s);
        }

        #[test]
        fn name_only_input_roundtrips_as_function_name(name in "[a-zA-Z_][a-zA-Z0-9_]{0,30}") {
            let parsed = parse_signature(&name);
            proptest::prop_assert_eq!(parsed.function_name, name);
            proptest::prop_assert!(parsed.parameters.is_empty());
        }
    }
}
