//! Tolerant repair of almost-JSON text.
//!
//! A single forward pass over the characters that re-emits the first
//! top-level object or array as strict JSON. It fixes the mistakes
//! generators commonly make: missing or trailing commas, single and curly
//! quotes, raw control characters inside strings, bare keys, Python
//! literals, and output truncated mid-string or mid-container.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Start,
    Open,
    Value,
    Colon,
    Comma,
}

/// Repair `text` into something a strict JSON parser is likely to accept.
///
/// Text before the first `{` or `[` and after the matching close is
/// discarded. The result is not guaranteed to parse.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Some(start) = chars.iter().position(|&c| c == '{' || c == '[') else {
        return text.to_string();
    };

    let mut out = String::with_capacity(text.len() + 16);
    let mut stack: Vec<char> = Vec::new();
    let mut last = Token::Start;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' | '[' => {
                if last == Token::Value {
                    out.push(',');
                }
                out.push(c);
                stack.push(if c == '{' { '}' } else { ']' });
                last = Token::Open;
                i += 1;
            }
            '}' | ']' => {
                let Some(closer) = stack.pop() else { break };
                finish_pending(&mut out, last);
                out.push(closer);
                last = Token::Value;
                i += 1;
                if stack.is_empty() {
                    break;
                }
            }
            ',' => {
                if matches!(last, Token::Value) {
                    out.push(',');
                    last = Token::Comma;
                }
                i += 1;
            }
            ':' => {
                out.push(':');
                last = Token::Colon;
                i += 1;
            }
            '"' | '\'' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}' => {
                if last == Token::Value {
                    out.push(',');
                }
                i = read_string(&chars, i, &mut out);
                last = Token::Value;
            }
            c if c.is_ascii_digit() || c == '-' => {
                if last == Token::Value {
                    out.push(',');
                }
                let end = scan_while(&chars, i, |c| {
                    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
                });
                out.extend(&chars[i..end]);
                last = Token::Value;
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                if last == Token::Value {
                    out.push(',');
                }
                let end = scan_while(&chars, i, |c| c.is_alphanumeric() || c == '_' || c == '$');
                let word: String = chars[i..end].iter().collect();
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" | "none" => out.push_str("null"),
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                }
                last = Token::Value;
                i = end;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            _ => i += 1,
        }
    }

    if !stack.is_empty() {
        finish_pending(&mut out, last);
        while let Some(closer) = stack.pop() {
            out.push(closer);
        }
    }

    out
}

/// Fix up whatever precedes a closing bracket.
fn finish_pending(out: &mut String, last: Token) {
    match last {
        Token::Comma => {
            if let Some(pos) = out.rfind(',') {
                out.truncate(pos);
            }
        }
        Token::Colon => out.push_str("null"),
        _ => {}
    }
}

fn scan_while(chars: &[char], from: usize, pred: impl Fn(char) -> bool) -> usize {
    chars[from..]
        .iter()
        .position(|&c| !pred(c))
        .map(|p| from + p)
        .unwrap_or(chars.len())
}

/// Copy one string literal starting at `chars[start]` as a double-quoted
/// JSON string. Returns the index just past the closing quote.
fn read_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let open = chars[start];
    let closes = |c: char| match open {
        '"' => c == '"',
        '\'' => c == '\'',
        '\u{201C}' | '\u{201D}' => c == '\u{201D}' || c == '\u{201C}' || c == '"',
        _ => c == '\u{2019}' || c == '\u{2018}' || c == '\'',
    };

    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('\'') => out.push('\''),
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => {}
            }
            i += 2;
            continue;
        }
        if closes(c) {
            out.push('"');
            return i + 1;
        }
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
        i += 1;
    }

    // Unterminated
    out.push('"');
    chars.len()
}
