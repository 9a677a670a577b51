// Source scoping for embedded blobs and free-text patterns.
//
// Platform pages interleave the item's own counters with counters that belong to
// comments, related posts and global widgets. Everything here narrows a page down
// to the fragment that can only describe the requested item:
// - json_object_after: pull a balanced `{...}` out of a script assignment
// - mask_comment_spans: blank every comment object/array, byte offsets preserved
// - window_around: a bounded slice centred on the item identifier
// - nearest_capture: the pattern match closest to the identifier

use std::sync::LazyLock;

use regex::Regex;

static COMMENT_TYPENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""__typename"\s*:\s*"[A-Za-z]*Comment""#).unwrap());
static COMMENT_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:preview_comments|comments|comment_list|top_level_comments)"\s*:\s*\["#)
        .unwrap()
});

/// The balanced JSON object starting at the first `{` at or after `from`.
pub fn json_object_at(text: &str, from: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = from + text.get(from..)?.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return text.get(start..=start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// The balanced JSON object that follows the first occurrence of `marker`.
pub fn json_object_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let at = text.find(marker)?;
    json_object_at(text, at + marker.len())
}

/// Replace every comment object and comment array with spaces.
///
/// A comment object is one whose own `__typename` ends in `Comment`; a comment
/// array is the value of a `comments`-style key. Byte length is unchanged so
/// offsets computed on the masked text are valid on the original.
pub fn mask_comment_spans(text: &str) -> String {
    let typename_starts: Vec<usize> = COMMENT_TYPENAME_RE
        .find_iter(text)
        .map(|m| m.start())
        .collect();
    let array_opens: Vec<usize> = COMMENT_ARRAY_RE
        .find_iter(text)
        .map(|m| m.end() - 1)
        .collect();
    if typename_starts.is_empty() && array_opens.is_empty() {
        return text.to_string();
    }

    let bytes = text.as_bytes();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    // (open offset, marked as comment)
    let mut stack: Vec<(usize, bool)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut next_typename = typename_starts.iter().peekable();

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        while next_typename.peek().is_some_and(|&&pos| pos < i) {
            next_typename.next();
        }
        if next_typename.peek().is_some_and(|&&pos| pos == i) {
            if let Some(top) = stack.iter_mut().rev().find(|(open, _)| bytes[*open] == b'{') {
                top.1 = true;
            }
            next_typename.next();
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push((i, false)),
            b'[' => stack.push((i, array_opens.binary_search(&i).is_ok())),
            b'}' | b']' => {
                if let Some((open, is_comment)) = stack.pop() {
                    if is_comment {
                        ranges.push((open, i));
                    }
                }
            }
            _ => {}
        }
    }

    let mut masked = bytes.to_vec();
    for (start, end) in ranges {
        masked[start..=end].fill(b' ');
    }
    // Only whole spans between ASCII delimiters were replaced with ASCII spaces.
    String::from_utf8(masked).unwrap_or_else(|_| text.to_string())
}

/// Slice of `text` within `radius` bytes of the first occurrence of `needle`,
/// widened to char boundaries.
pub fn window_around<'a>(text: &'a str, needle: &str, radius: usize) -> Option<&'a str> {
    if needle.is_empty() {
        return None;
    }
    let at = text.find(needle)?;
    let start = floor_boundary(text, at.saturating_sub(radius));
    let end = ceil_boundary(text, (at + needle.len() + radius).min(text.len()));
    text.get(start..end)
}

/// First capture group of the `re` match starting closest to `anchor`, with its
/// offset. Matches farther than `radius` bytes away are ignored.
pub fn nearest_capture(re: &Regex, text: &str, anchor: usize, radius: usize) -> Option<(usize, String)> {
    re.captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let value = caps.iter().skip(1).flatten().next()?;
            let distance = whole.start().abs_diff(anchor);
            (distance <= radius).then(|| (distance, whole.start(), value.as_str().to_string()))
        })
        .min_by_key(|(distance, _, _)| *distance)
        .map(|(_, pos, value)| (pos, value))
}

/// Whether `needle` occurs within `radius` bytes of `pos`.
pub fn near(text: &str, pos: usize, needle: &str, radius: usize) -> bool {
    if needle.is_empty() {
        return false;
    }
    let start = floor_boundary(text, pos.saturating_sub(radius));
    let end = ceil_boundary(text, (pos + radius).min(text.len()));
    text.get(start..end).is_some_and(|w| w.contains(needle))
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_balanced_object_with_braces_in_strings() {
        let html = r#"<script>window.__INITIAL_STATE__={"a":{"b":"}{"},"c":[1,2]};</script>"#;
        assert_eq!(
            json_object_after(html, "window.__INITIAL_STATE__="),
            Some(r#"{"a":{"b":"}{"},"c":[1,2]}"#)
        );
        assert_eq!(json_object_after("var x = {\"open\": 1", "var x = "), None);
    }

    #[test]
    fn masks_comment_objects_but_keeps_post_counters() {
        let blob = r#"{"post":{"id":"9","reaction_count":{"count":270},"feedback":{"comments":{"edges":[{"node":{"__typename":"Comment","body":{"text":"so good 9170"},"reaction_count":{"count":9170}}}]}}}}"#;
        let masked = mask_comment_spans(blob);
        assert_eq!(masked.len(), blob.len());
        assert!(masked.contains(r#""reaction_count":{"count":270}"#));
        assert!(!masked.contains("9170"));
        assert!(masked.contains(r#""id":"9""#));
    }

    #[test]
    fn masks_comment_arrays() {
        let blob = r#"{"like_count":12,"preview_comments":[{"text":"88 likes lol","like_count":88}],"comment_count":2}"#;
        let masked = mask_comment_spans(blob);
        assert!(masked.contains(r#""like_count":12"#));
        assert!(masked.contains(r#""comment_count":2"#));
        assert!(!masked.contains("88"));
    }

    #[test]
    fn typename_inside_a_string_does_not_mask() {
        let blob = r#"{"text":"\"__typename\":\"Comment\"","like_count":5}"#;
        assert_eq!(mask_comment_spans(blob), blob);
    }

    #[test]
    fn window_is_clamped_to_char_boundaries() {
        let text = "咖啡咖啡 ID123 咖啡咖啡";
        let window = window_around(text, "ID123", 4).unwrap();
        assert!(window.contains("ID123"));
        assert!(window.len() <= "ID123".len() + 2 * 4 + 6);
        assert_eq!(window_around(text, "missing", 10), None);
    }

    #[test]
    fn nearest_capture_prefers_the_closest_match() {
        let re = Regex::new(r#""like_count":(\d+)|"likes":"([^"]+)""#).unwrap();
        let text = r#""like_count":1 ... "id":"X" "likes":"2K" ........ "like_count":3"#;
        let anchor = text.find(r#""id":"X""#).unwrap();
        assert_eq!(nearest_capture(&re, text, anchor, 100).map(|(_, v)| v).as_deref(), Some("2K"));
        assert_eq!(nearest_capture(&re, text, anchor, 5), None);
    }

    #[test]
    fn near_checks_both_sides() {
        let text = "author=cafe ... 270 likes";
        let pos = text.find("270").unwrap();
        assert!(near(text, pos, "cafe", 20));
        assert!(!near(text, pos, "cafe", 3));
    }
}
