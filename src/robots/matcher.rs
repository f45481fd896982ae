//! Robots.txt path pattern matching
//!
//! Patterns are either literal prefixes or contain `*` wildcards. A trailing
//! `$` is stripped and not enforced as an end anchor. The match length used for
//! precedence is the number of literal characters in the pattern.

/// Returns the match length of `pattern` against `path`, or `None` if it does
/// not match
///
/// # Examples
///
/// ```
/// use feed_refresher::robots::match_length;
///
/// assert_eq!(match_length("/private", "/private/x"), Some(8));
/// assert_eq!(match_length("/private*", "/private/x"), Some(8));
/// assert_eq!(match_length("/public", "/private"), None);
/// ```
pub fn match_length(pattern: &str, path: &str) -> Option<usize> {
    let pattern = pattern.strip_suffix('$').unwrap_or(pattern);

    if !pattern.contains('*') {
        return path.starts_with(pattern).then_some(pattern.len());
    }

    // Each literal segment must occur in order; a single forward scan
    let mut position = 0;
    let mut literal_len = 0;
    for segment in pattern.split('*').filter(|s| !s.is_empty()) {
        let found = path[position..].find(segment)?;
        position += found + segment.len();
        literal_len += segment.len();
    }

    Some(literal_len)
}

/// Longest match length among `patterns`
pub fn best_match<'a, I>(patterns: I, path: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .filter_map(|pattern| match_length(pattern, path))
        .max()
}
