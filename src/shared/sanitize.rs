//! Content sanitization
//!
//! Every chat message is cleaned with a strict policy before it is stored
//! or broadcast. No markup survives; the text content of `script` and
//! `style` elements is removed entirely.

use std::collections::HashSet;

use ammonia::Builder;
use once_cell::sync::Lazy;

static STRICT: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::empty();
    builder
        .tags(HashSet::new())
        .clean_content_tags(HashSet::from(["script", "style"]))
        .strip_comments(true);
    builder
});

/// Strip every HTML element from `input`, keeping only text.
pub fn sanitize_message(input: &str) -> String {
    STRICT.clean(input).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("hello", "hello" ; "plain text untouched")]
    #[test_case("<b>bold</b> move", "bold move" ; "formatting stripped")]
    #[test_case("<script>alert(1)</script>hi", "hi" ; "script content removed")]
    #[test_case("<a href=\"javascript:x\">link</a>", "link" ; "anchors stripped")]
    #[test_case("<!-- note -->text", "text" ; "comments stripped")]
    fn test_sanitize_message(input: &str, expected: &str) {
        assert_eq!(sanitize_message(input), expected);
    }

    #[test]
    fn test_sanitized_output_has_no_tags() {
        let out = sanitize_message("<img src=x onerror=alert(1)><div>ok</div>");
        assert!(!out.contains('<'));
        assert!(out.contains("ok"));
    }
}
