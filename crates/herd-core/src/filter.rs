//! Host selection by include/exclude glob patterns

use std::iter::Peekable;
use std::str::Chars;

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Match `host` against a glob `pattern`
///
/// `*` matches any run of characters (including none) and `?` exactly one. `[abc]`, `[a-z]`
/// and `[^x]` match one character from a class, and `\` escapes the next character. The whole
/// host must match and comparison is case sensitive.
///
/// A host also matches if the pattern matches it with every character other than `*` and `?`
/// taken literally, so a pattern with a malformed class still matches text spelled the same
/// way. There is no such thing as an invalid pattern.
#[must_use]
pub fn glob_match(host: &str, pattern: &str) -> bool {
    class_pattern(pattern).is_some_and(|p| p.matches_with(host, MATCH_OPTIONS))
        || literal_match(host, pattern)
}

/// Translate `\` escapes and `[^...]` negation into `glob` syntax
///
/// Returns `None` when the pattern is malformed: a trailing `\`, an unterminated or empty
/// class, or a class escape `glob` cannot express.
fn class_pattern(pattern: &str) -> Option<Pattern> {
    let mut out = String::with_capacity(pattern.len() + 2);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => push_literal(&mut out, chars.next()?),
            '[' => push_class(&mut out, &mut chars)?,
            _ => out.push(c),
        }
    }

    Pattern::new(&out).ok()
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[' | ']') {
        out.push('[');
        out.push(c);
        out.push(']');
    } else {
        out.push(c);
    }
}

fn push_class(out: &mut String, chars: &mut Peekable<Chars<'_>>) -> Option<()> {
    out.push('[');
    let negated = chars.next_if_eq(&'^').is_some();
    if negated {
        out.push('!');
    }

    let mut first = true;
    loop {
        match chars.next()? {
            ']' if first => return None,
            ']' => {
                out.push(']');
                return Some(());
            }
            // a leading `!` would read as negation
            '!' if first && !negated => return None,
            '\\' => match chars.next()? {
                ']' | '-' => return None,
                '!' if first && !negated => return None,
                escaped => out.push(escaped),
            },
            c => out.push(c),
        }
        first = false;
    }
}

/// Anchored match where only `*` and `?` are special
fn literal_match(host: &str, pattern: &str) -> bool {
    let host: Vec<char> = host.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let mut h = 0;
    let mut p = 0;
    // Pattern index just after the last `*`, and the host index it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while h < host.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == host[h]) {
            p += 1;
            h += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            p += 1;
            star = Some((p, h));
        } else if let Some((after_star, absorbed)) = star {
            // let the last star swallow one more character and retry
            p = after_star;
            h = absorbed + 1;
            star = Some((after_star, h));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Whether `host` survives the include and exclude lists
///
/// Any exclude match drops the host. Otherwise an empty include list keeps it, and a
/// non-empty one requires at least one match.
#[must_use]
pub fn is_selected(host: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|pattern| glob_match(host, pattern)) {
        return false;
    }

    include.is_empty() || include.iter().any(|pattern| glob_match(host, pattern))
}

/// Select hosts, keeping their original order
#[must_use]
pub fn filter_hosts(hosts: &[String], include: &[String], exclude: &[String]) -> Vec<String> {
    hosts
        .iter()
        .filter(|host| is_selected(host, include, exclude))
        .cloned()
        .collect()
}
