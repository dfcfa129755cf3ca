//! Content line handling: folding, parameter splitting and TEXT escaping.

/// Maximum line length in octets before folding.
const FOLD_AT: usize = 75;

/// A single unfolded content line: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContentLine {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl ContentLine {
    /// Split a content line. Returns `None` for lines without a `:` separator.
    pub fn parse(line: &str) -> Option<ContentLine> {
        let mut in_quotes = false;
        let mut colon = None;
        for (i, c) in line.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ':' if !in_quotes => {
                    colon = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let colon = colon?;
        let (head, value) = (&line[..colon], &line[colon + 1..]);

        let mut segments = split_unquoted(head, ';').into_iter();
        let name = segments.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let params = segments
            .filter_map(|segment| {
                let (key, val) = segment.split_once('=')?;
                Some((
                    key.trim().to_ascii_uppercase(),
                    val.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();

        Some(ContentLine {
            name,
            params,
            value: value.to_string(),
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Join soft line breaks (a newline followed by a space or tab) into logical lines.
pub(crate) fn unfold(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continuation) = raw.strip_prefix([' ', '\t']) {
            if let Some(previous) = lines.last_mut() {
                previous.push_str(continuation);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

/// Fold a logical line at 75 octets without splitting UTF-8 sequences.
pub(crate) fn fold(line: &str) -> String {
    if line.len() <= FOLD_AT {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / FOLD_AT * 3);
    let mut width = 0;
    for c in line.chars() {
        // Continuation lines start with a space, which counts towards the limit
        if width + c.len_utf8() > FOLD_AT {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out
}

pub(crate) fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(escaped @ (',' | ';' | '\\' | ':' | '"')) => out.push(escaped),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
