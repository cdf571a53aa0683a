//! Shared helpers for the colon-separated text formats used to persist
//! areas, player containers, permissions and flags.

use thiserror::Error;

/// Errors raised while decoding a wire string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("empty value")]
    Empty,
    #[error("unknown {kind} '{value}'")]
    UnknownKind { kind: &'static str, value: String },
    #[error("expected {expected} fields in '{value}', got {got}")]
    FieldCount {
        expected: usize,
        got: usize,
        value: String,
    },
    #[error("invalid number '{0}'")]
    Number(String),
    #[error("invalid boolean '{0}'")]
    Bool(String),
    #[error("invalid uuid '{0}'")]
    Uuid(String),
    #[error("malformed quoted text '{0}'")]
    Quote(String),
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Wrap text in single quotes, doubling any embedded quote.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Reverse of [`quote`]. The input must start and end with a single quote.
pub fn unquote(text: &str) -> Result<String, WireError> {
    let items = split_quoted_list(text)?;
    match items.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(WireError::Quote(text.to_string())),
    }
}

/// Split a comma separated list of quoted items: `'a','b,c','it''s'`.
pub fn split_quoted_list(body: &str) -> Result<Vec<String>, WireError> {
    let mut items = Vec::new();
    let mut chars = body.chars().peekable();

    while chars.peek().is_some() {
        if chars.next() != Some('\'') {
            return Err(WireError::Quote(body.to_string()));
        }
        let mut item = String::new();
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                    item.push('\'');
                }
                Some('\'') => break,
                Some(c) => item.push(c),
                None => return Err(WireError::Quote(body.to_string())),
            }
        }
        items.push(item);
        match chars.next() {
            None => break,
            Some(',') if chars.peek().is_some() => {}
            Some(_) => return Err(WireError::Quote(body.to_string())),
        }
    }

    Ok(items)
}

pub fn parse_bool(value: &str) -> Result<bool, WireError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(WireError::Bool(value.to_string())),
    }
}

pub fn parse_i32(value: &str) -> Result<i32, WireError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| WireError::Number(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(unquote("'it''s'").unwrap(), "it's");
    }

    #[test]
    fn list_keeps_commas_inside_quotes() {
        let items = split_quoted_list("'a','b,c','d''e'").unwrap();
        assert_eq!(items, vec!["a", "b,c", "d'e"]);
    }

    #[test]
    fn empty_list_body_is_empty() {
        assert!(split_quoted_list("").unwrap().is_empty());
    }

    #[test]
    fn unterminated_quote_rejected() {
        assert!(matches!(split_quoted_list("'abc"), Err(WireError::Quote(_))));
        assert!(matches!(split_quoted_list("'a',"), Err(WireError::Quote(_))));
        assert!(matches!(unquote("abc"), Err(WireError::Quote(_))));
    }

    #[test]
    fn bool_is_strict() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("TRUE").is_err());
    }
}
