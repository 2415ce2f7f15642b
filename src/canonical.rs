//! Stable pretty-printed serialization used for output and diffing.
//!
//! Both sides of a diff go through the same canonical form so that diff
//! noise reflects genuine changes, not formatting drift.

use crate::document::Document;
use std::io;

/// Renders the canonical textual form: declaration line, two-space
/// indentation, attribute order as authored, trailing newline. Pure with
/// respect to the document: equal trees produce byte-identical text.
pub fn canonicalize(document: &Document) -> io::Result<String> {
    document.serialize(true)
}

/// Re-formats raw descriptor text into canonical form for diffing, falling
/// back to the text as-is when it does not parse.
pub fn canonical_text(text: &str) -> String {
    match Document::parse(text) {
        Ok(document) => canonicalize(&document).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
        <domain type="kvm">
          <name>fedora</name>
          <vcpu>4</vcpu>
          <devices>
            <disk type="file"   device="disk">
              <target dev="hda" bus="ide"/>
            </disk>
          </devices>
        </domain>
    "#;

    #[test]
    fn test_canonical_form_is_a_fixed_point() {
        let once = canonicalize(&Document::parse(DESCRIPTOR).unwrap()).unwrap();
        let twice = canonicalize(&Document::parse(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonical_form_is_deterministic() {
        let doc = Document::parse(DESCRIPTOR).unwrap();
        assert_eq!(canonicalize(&doc).unwrap(), canonicalize(&doc).unwrap());
    }

    #[test]
    fn test_canonical_text_normalizes_whitespace() {
        let compact = r#"<domain><name>a</name></domain>"#;
        let spread = "<domain>\n\n\n  <name>a</name>\n</domain>";
        assert_eq!(canonical_text(compact), canonical_text(spread));
    }

    #[test]
    fn test_canonical_text_falls_back_on_malformed_input() {
        let malformed = "<domain><name>a</domain>";
        assert_eq!(canonical_text(malformed), malformed);
    }
}
