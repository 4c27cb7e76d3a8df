//! Lenient JSON: strict parse first, then repair the text and parse again.

use serde_json::Value;

use crate::error::DecodeResult;

pub fn parse_lenient(input: &str) -> DecodeResult<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        return Ok(value);
    }
    Ok(serde_json::from_str::<Value>(&repair(input))?)
}

/// Rewrites common hand-edited and truncated JSON into valid JSON text.
pub fn repair(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            '"' | '\'' => index = copy_string(&chars, index, &mut out),
            '/' if chars.get(index + 1) == Some(&'/') => {
                while index < chars.len() && chars[index] != '\n' {
                    index += 1;
                }
            }
            '/' if chars.get(index + 1) == Some(&'*') => {
                index += 2;
                while index < chars.len()
                    && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/'))
                {
                    index += 1;
                }
                index = (index + 2).min(chars.len());
            }
            '{' => {
                closers.push('}');
                out.push(ch);
                index += 1;
            }
            '[' => {
                closers.push(']');
                out.push(ch);
                index += 1;
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                if closers.last() == Some(&ch) {
                    closers.pop();
                    out.push(ch);
                }
                index += 1;
            }
            ch if (ch.is_ascii_digit() || ch == '-')
                && closers.last() == Some(&'}')
                && expects_key(&out) =>
            {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_alphanumeric() || matches!(chars[index], '.' | '-' | '+'))
                {
                    index += 1;
                }
                let token: String = chars[start..index].iter().collect();
                if next_is_colon(&chars[index..]) {
                    out.push('"');
                    out.push_str(&token);
                    out.push('"');
                } else {
                    out.push_str(&token);
                }
            }
            ch if ch.is_alphabetic() || ch == '_' || ch == '$' => {
                let start = index;
                while index < chars.len()
                    && (chars[index].is_alphanumeric() || chars[index] == '_' || chars[index] == '$')
                {
                    index += 1;
                }
                let word: String = chars[start..index].iter().collect();
                // exponent or suffix of a number literal
                if out
                    .chars()
                    .last()
                    .map(|last| last.is_ascii_digit() || last == '.')
                    .unwrap_or(false)
                {
                    out.push_str(&word);
                    continue;
                }
                let is_key = closers.last() == Some(&'}') && next_is_colon(&chars[index..]);
                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                    continue;
                }
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" | "NaN" | "undefined" => out.push_str("null"),
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                }
            }
            _ => {
                out.push(ch);
                index += 1;
            }
        }
    }

    trim_trailing_comma(&mut out);
    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        if closer == '}' {
            complete_dangling_member(&mut out);
        }
        out.push(closer);
    }
    out
}

fn next_is_colon(rest: &[char]) -> bool {
    rest.iter()
        .find(|next| !next.is_whitespace())
        .map(|next| *next == ':')
        .unwrap_or(false)
}

fn expects_key(out: &str) -> bool {
    matches!(out.trim_end().chars().last(), Some('{') | Some(','))
}

fn complete_dangling_member(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    let trimmed = &out[..trimmed_len];
    if trimmed.ends_with(':') {
        out.truncate(trimmed_len);
        out.push_str("null");
        return;
    }
    if !trimmed.ends_with('"') {
        return;
    }
    let Some(open) = string_start(trimmed) else {
        return;
    };
    if expects_key(&trimmed[..open]) {
        out.truncate(trimmed_len);
        out.push_str(": null");
    }
}

fn string_start(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut index = bytes.len().checked_sub(1)?;
    while index > 0 {
        index -= 1;
        if bytes[index] != b'"' {
            continue;
        }
        let backslashes = bytes[..index]
            .iter()
            .rev()
            .take_while(|byte| **byte == b'\\')
            .count();
        if backslashes % 2 == 0 {
            return Some(index);
        }
    }
    None
}

fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut index = start + 1;
    out.push('"');
    while index < chars.len() {
        let ch = chars[index];
        match ch {
            '\\' => {
                match chars.get(index + 1) {
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(*next);
                    }
                    None => {}
                }
                index += 2;
                continue;
            }
            ch if ch == quote => {
                out.push('"');
                return index + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
        index += 1;
    }
    out.push('"');
    chars.len()
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}
