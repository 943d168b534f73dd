//! Record decoding.
//!
//! Payload cells in the event log were written with Python-literal quoting:
//! single quotes delimit keys and string values, double quotes appear raw inside
//! those strings, and `True`/`False`/`None` stand in for the JSON literals.
//! Later exports store the same cells already converted to JSON. `normalize_payload`
//! accepts both and always produces the JSON spelling, so it is a no-op on valid input.

use serde_json::Value;
use std::iter::Peekable;
use std::str::Chars;

/// Rewrite a loosely quoted payload into strict JSON text.
///
/// Idempotent: `normalize_payload(&normalize_payload(x)) == normalize_payload(x)`.
pub fn normalize_payload(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => read_single_quoted(&mut chars, &mut out),
            '"' => read_double_quoted(&mut chars, &mut out),
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    _ => &word,
                });
            }
            _ => out.push(c),
        }
    }

    out
}

/// Decode one payload cell into structured data.
pub fn decode_payload(raw: &str) -> serde_json::Result<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Ok(value);
    }
    serde_json::from_str(&normalize_payload(raw))
}

/// Decode a checkpoint snapshot (an encoded array of lines) into document text.
pub fn decode_snapshot(raw: &str) -> serde_json::Result<String> {
    match decode_payload(raw)? {
        Value::Array(lines) => {
            let mut text = Vec::with_capacity(lines.len());
            for line in lines {
                match line {
                    Value::String(s) => text.push(s),
                    Value::Null => text.push(String::new()),
                    other => text.push(other.to_string()),
                }
            }
            Ok(text.join("\n"))
        }
        Value::String(s) => Ok(s),
        other => Err(<serde_json::Error as serde::de::Error>::custom(format!(
            "snapshot must be an array of lines, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single quote closes a string only when it sits next to structure.
/// Anything else is an apostrophe inside the value.
fn closes_single_quoted(chars: &Peekable<Chars<'_>>) -> bool {
    let rest = chars.clone();
    for c in rest {
        if c.is_whitespace() {
            continue;
        }
        return matches!(c, ',' | '}' | ']' | ':' | ')');
    }
    true
}

fn read_single_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push('"');
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some('x') => push_hex_escape(chars, out, 2),
                Some('U') => push_hex_escape(chars, out, 8),
                Some(e @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u')) => {
                    out.push('\\');
                    out.push(e);
                }
                Some(other) => {
                    out.push_str("\\\\");
                    push_escaped(other, out);
                }
                None => out.push_str("\\\\"),
            },
            '\'' if closes_single_quoted(chars) => {
                out.push('"');
                return;
            }
            _ => push_escaped(c, out),
        }
    }
    // Unterminated; leave it for the strict parser to reject.
}

fn read_double_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push('"');
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                if let Some(e) = chars.next() {
                    out.push(e);
                }
            }
            '"' => {
                out.push('"');
                return;
            }
            c if c.is_control() => push_escaped(c, out),
            _ => out.push(c),
        }
    }
}

fn push_escaped(c: char, out: &mut String) {
    match c {
        '"' => out.push_str("\\\""),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
        c => out.push(c),
    }
}

/// `\xNN` and `\UNNNNNNNN` have no JSON spelling; emit the character itself.
fn push_hex_escape(chars: &mut Peekable<Chars<'_>>, out: &mut String, width: usize) {
    let digits: String = (0..width).filter_map(|_| chars.next()).collect();
    match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
        Some(c) if digits.len() == width => push_escaped(c, out),
        _ => {
            out.push_str("\\\\");
            out.push(if width == 2 { 'x' } else { 'U' });
            for d in digits.chars() {
                push_escaped(d, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_quoted_payload_with_embedded_double_quotes() {
        let raw = r#"{'op': 'insert', 'text': 'it\'s "quoted"'}"#;
        let value = decode_payload(raw).unwrap();
        assert_eq!(value, json!({"op": "insert", "text": "it's \"quoted\""}));
    }

    #[test]
    fn bare_apostrophe_inside_value_is_kept() {
        let raw = "{'text': 'it's fine', 'n': 1}";
        let value = decode_payload(raw).unwrap();
        assert_eq!(value, json!({"text": "it's fine", "n": 1}));
    }

    #[test]
    fn python_literals_become_json_literals() {
        let raw = "{'a': True, 'b': False, 'c': None, 'd': 'None'}";
        let value = decode_payload(raw).unwrap();
        assert_eq!(value, json!({"a": true, "b": false, "c": null, "d": "None"}));
    }

    #[test]
    fn normalize_is_a_no_op_on_valid_json() {
        let valid = r#"{"t":[0,100],"o":[{"i":3,"a":"say \"hi\"\n","r":0}]}"#;
        assert_eq!(normalize_payload(valid), valid);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            r#"{'t': 120, 'o': [{'i': 0, 'a': 'He said "no"'}]}"#,
            "['first line', 'it's second', '']",
            "{'x': '\\x41\\U0001F600'}",
        ];
        for raw in inputs {
            let once = normalize_payload(raw);
            assert_eq!(normalize_payload(&once), once, "input: {raw}");
        }
    }

    #[test]
    fn decode_of_decoded_text_is_stable() {
        let raw = "{'t': [10, 20], 'o': [{'i': 1, 'a': ['a', 'b']}]}";
        let first = decode_payload(raw).unwrap();
        let second = decode_payload(&first.to_string()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn python_hex_escapes_become_characters() {
        let value = decode_payload("{'x': '\\x41\\U0001F600'}").unwrap();
        assert_eq!(value, json!({"x": "A\u{1F600}"}));
    }

    #[test]
    fn truncated_payload_fails() {
        assert!(decode_payload("{'t': 10, 'o': [{'i': 0, 'a': 'oops").is_err());
        assert!(decode_payload("").is_err());
    }

    #[test]
    fn snapshot_lines_are_joined_with_newlines() {
        let text = decode_snapshot("['Title', '', 'Body it's here']").unwrap();
        assert_eq!(text, "Title\n\nBody it's here");
    }

    #[test]
    fn snapshot_rejects_objects() {
        assert!(decode_snapshot("{'a': 1}").is_err());
    }
}
