//! IRC wire message parsing and formatting.
//!
//! Handles the full modern framing: `[@tags ][:prefix ]COMMAND [param]*[ :trailing]`
//! with IRCv3 tag escaping. Unlike a client parser, a conformance harness must
//! never guess: anything that violates minimal framing is a hard [`ParseError`],
//! because misreading a garbage line as something sensible would turn a failing
//! peer into a passing test.

use std::collections::HashMap;
use std::fmt;

/// A malformed wire line. Always fatal to the current test.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// Line had no command (empty line, or nothing after tags/prefix).
    #[error("line has no command: {0:?}")]
    EmptyCommand(String),
    /// A `@tags` block with no space after it, so no command can follow.
    #[error("unterminated tag block: {0:?}")]
    UnterminatedTags(String),
    /// A `:prefix` with no space after it, so no command can follow.
    #[error("unterminated prefix: {0:?}")]
    UnterminatedPrefix(String),
}

/// A parsed IRC message.
///
/// The trailing-parameter distinction is not retained: a trailing param is
/// just the last entry of `params`. [`fmt::Display`] re-adds the `:` escape
/// whenever the last param needs it, so `parse` and `to_string` round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags. A valueless tag maps to the empty string.
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    /// Verb, normalized to ASCII uppercase. Numerics stay as 3-digit strings.
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_tags(tags: HashMap<String, String>, command: &str, params: Vec<&str>) -> Self {
        Self {
            tags,
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Parse a raw IRC line. Line terminators, if still present, are ignored.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let full = line;
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let tags = if let Some(tag_block) = rest.strip_prefix('@') {
            let end = tag_block
                .find(' ')
                .ok_or_else(|| ParseError::UnterminatedTags(full.to_string()))?;
            rest = &tag_block[end + 1..];
            parse_tags(&tag_block[..end])
        } else {
            HashMap::new()
        };

        // Runs of spaces count as a single separator throughout.
        rest = rest.trim_start_matches(' ');

        let prefix = if let Some(pfx) = rest.strip_prefix(':') {
            let end = pfx
                .find(' ')
                .ok_or_else(|| ParseError::UnterminatedPrefix(full.to_string()))?;
            rest = pfx[end + 1..].trim_start_matches(' ');
            Some(pfx[..end].to_string())
        } else {
            None
        };

        let command;
        if let Some(space) = rest.find(' ') {
            command = rest[..space].to_ascii_uppercase();
            rest = &rest[space + 1..];
        } else {
            command = rest.to_ascii_uppercase();
            rest = "";
        }
        if command.is_empty() {
            return Err(ParseError::EmptyCommand(full.to_string()));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                // Trailing param: verbatim to end of line, may be empty.
                params.push(trailing.to_string());
                break;
            }
            match rest.find(' ') {
                Some(space) => {
                    params.push(rest[..space].to_string());
                    rest = &rest[space + 1..];
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Message {
            tags,
            prefix,
            command,
            params,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@")?;
            let mut first = true;
            for (key, value) in &self.tags {
                if !first {
                    write!(f, ";")?;
                }
                first = false;
                if value.is_empty() {
                    write!(f, "{key}")?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// Parse an IRCv3 tag block: `key=value;key2;key3=v3`.
fn parse_tags(tag_str: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for pair in tag_str.split(';') {
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            tags.insert(key.to_string(), unescape_tag_value(value));
        } else {
            tags.insert(pair.to_string(), String::new());
        }
    }
    tags
}

/// Unescape an IRCv3 tag value.
///
/// `\:` → `;`, `\s` → space, `\\` → `\`, `\r` → CR, `\n` → LF.
/// An invalid escape yields the escaped character itself, and a lone
/// trailing backslash is dropped, per the message-tags spec.
fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => result.push(other),
                None => {}
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Escape a value for IRCv3 tag encoding. Inverse of [`unescape_tag_value`].
fn escape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
