//! Safe `LIKE` pattern construction.

use crate::dialect::SqlDialect;
use serde::{Deserialize, Serialize};

const MAGIC_LIKE_CHARS: [char; 4] = ['%', '_', '[', ']'];

/// Where the literal text must appear in the matched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikeMode {
    StartsWith,
    EndsWith,
    Contains,
}

/// Escapes `%`, `_`, `[` and `]` in bracket form so the text matches literally.
///
/// ```rust
/// use tablesync_core::text::escape_magic_sql_like_chars;
///
/// assert_eq!(escape_magic_sql_like_chars("50%_off"), "50[%][_]off");
/// ```
pub fn escape_magic_sql_like_chars(text: &str) -> String {
    if !text.contains(MAGIC_LIKE_CHARS) {
        return text.to_string();
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MAGIC_LIKE_CHARS.contains(&c) {
            escaped.push('[');
            escaped.push(c);
            escaped.push(']');
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Builds a complete `LIKE '...'` predicate tail for `text`.
///
/// Metacharacters are escaped the way `dialect` expects before the wildcard
/// for `mode` is added; the pattern is then quoted as a string literal.
///
/// ```rust
/// use tablesync_core::dialect::{MySqlDialect, SqlServerDialect};
/// use tablesync_core::text::{LikeMode, format_like};
///
/// assert_eq!(format_like("50%_off", LikeMode::StartsWith, &SqlServerDialect), "LIKE N'50[%][_]off%'");
/// assert_eq!(format_like("50%_off", LikeMode::StartsWith, &MySqlDialect), r"LIKE '50\\%\\_off%'");
/// ```
pub fn format_like(text: &str, mode: LikeMode, dialect: &dyn SqlDialect) -> String {
    let literal = dialect.escape_like(text);
    let pattern = match mode {
        LikeMode::StartsWith => format!("{literal}%"),
        LikeMode::EndsWith => format!("%{literal}"),
        LikeMode::Contains => format!("%{literal}%"),
    };
    format!("LIKE {}", dialect.string_literal(&pattern))
}
