//! String helpers shared by the runner and the indexers: comma lists,
//! tag tokens and content sanitizing.

/// Split a comma separated list, trimming items and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma separated list of integers. Non-numeric items are ignored.
pub fn split_int_list(value: &str) -> Vec<i64> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .collect()
}

/// Remove duplicates from a comma separated list, keeping first occurrences.
pub fn unique_list(value: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    split_list(value)
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Wrap a tag in the tag char: `news` → `#news#`.
pub fn make_tag(tag_char: char, tag: &str) -> String {
    format!("{tag_char}{tag}{tag_char}")
}

/// Append `tag` to a comma separated tag list.
pub fn add_tag(tags: &str, tag: &str) -> String {
    match (tags.is_empty(), tag.is_empty()) {
        (_, true) => tags.to_string(),
        (true, false) => tag.to_string(),
        (false, false) => format!("{},{}", tags, tag),
    }
}

/// Tag token for a free-text title such as a category name: whitespace,
/// commas and the tag char are dropped.
pub fn tag_from_title(title: &str, tag_char: char) -> String {
    title
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != tag_char)
        .collect()
}

/// Tag names without the surrounding tag char.
pub fn plain_tags(tags: &str, tag_char: char) -> Vec<String> {
    split_list(tags)
        .into_iter()
        .map(|t| t.trim_matches(tag_char).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Replace ASCII control characters except tab, LF and CR with spaces.
pub fn strip_control_characters(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' => ' ',
            _ => c,
        })
        .collect()
}

/// Remove markup tags. Text between tags is kept as is.
///
/// A `<` only opens a tag when followed by a letter, `/`, `!` or `?`, so
/// comparisons like `a < b` in plain text survive.
pub fn strip_tags(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_tag = false;
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' if !in_tag && chars.peek().is_some_and(|&n| opens_tag(n)) => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn opens_tag(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?')
}
