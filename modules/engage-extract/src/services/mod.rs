pub mod dcard;
pub mod facebook;
pub mod instagram;
pub mod xiaohongshu;
pub mod youtube;

pub use dcard::DcardStrategy;
pub use facebook::FacebookStrategy;
pub use instagram::InstagramStrategy;
pub use xiaohongshu::XiaohongshuStrategy;
pub use youtube::YoutubeStrategy;

use engage_common::FailureReason;
use scraper::{Html, Selector};

use crate::error::TierError;

/// Join a title and a description into one body.
pub(crate) fn join_body(title: Option<&str>, description: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [title, description]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Fail the tier when a page carries one of the platform's "gone" or "login" markers.
pub(crate) fn check_page_markers(
    html: &str,
    not_found: &[&str],
    login_wall: &[&str],
) -> Result<(), TierError> {
    if let Some(marker) = not_found.iter().find(|m| html.contains(**m)) {
        return Err(TierError::failure(
            FailureReason::NotFound,
            format!("page shows {marker:?}"),
        ));
    }
    if let Some(marker) = login_wall.iter().find(|m| html.contains(**m)) {
        return Err(TierError::failure(
            FailureReason::AccessDenied,
            format!("login wall ({marker:?})"),
        ));
    }
    Ok(())
}

/// Decode a JSON string literal's contents captured raw by a pattern.
pub(crate) fn json_unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

/// Whitespace-collapsed text of the first element matching `selector`.
pub(crate) fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

pub(crate) fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// `content` of `<meta property="…">`.
pub(crate) fn meta_property(doc: &Html, property: &str) -> Option<String> {
    select_attr(doc, &format!(r#"meta[property="{property}"]"#), "content")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_joins_non_empty_parts() {
        assert_eq!(join_body(Some("Title"), Some("Desc")).as_deref(), Some("Title\n\nDesc"));
        assert_eq!(join_body(Some("  "), Some("Desc")).as_deref(), Some("Desc"));
        assert_eq!(join_body(None, None), None);
    }

    #[test]
    fn dom_helpers_read_text_and_attributes() {
        let doc = Html::parse_document(
            r#"<html><head><meta property="og:image" content="https://img/x.jpg"></head>
            <body><span class="count"> </span><span class="count"> 1.2万 </span></body></html>"#,
        );
        assert_eq!(select_text(&doc, ".count").as_deref(), Some("1.2万"));
        assert_eq!(meta_property(&doc, "og:image").as_deref(), Some("https://img/x.jpg"));
        assert_eq!(select_text(&doc, ".missing"), None);
    }

    #[test]
    fn unescapes_captured_json_strings() {
        assert_eq!(json_unescape(r"Caf\u00e9 \/ Bar"), "Café / Bar");
        assert_eq!(json_unescape(r"bad \x"), r"bad \x");
    }

    #[test]
    fn markers_map_to_reasons() {
        let err = check_page_markers("<h2>Sorry, this page isn't available.</h2>", &["Sorry, this page isn't available"], &[]).unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::NotFound));
        let err = check_page_markers(r#"<form id="login_form">"#, &[], &[r#"id="login_form""#]).unwrap_err();
        assert_eq!(err.reason(), Some(FailureReason::AccessDenied));
        assert!(check_page_markers("<p>fine</p>", &["gone"], &["login"]).is_ok());
    }
}
