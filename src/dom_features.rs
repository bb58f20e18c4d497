use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::types::FeatureVector;

/// Fixed feature ordering the DOM model's split indices are relative to.
pub const DOM_FEATURE_NAMES: [&str; 13] = [
    "num_forms",
    "has_password_field",
    "form_action_external_ratio",
    "external_link_ratio",
    "empty_link_ratio",
    "external_image_ratio",
    "num_scripts",
    "dom_max_depth",
    "text_length",
    "suspicious_keyword_count",
    "iframe",
    "mouse_over",
    "right_click",
];

const SUSPICIOUS_KEYWORDS: [&str; 9] = [
    "login", "secure", "account", "update", "bank", "signin", "verify", "password", "user",
];

/// Parsed page structure as shipped by an observer. `root` is the document
/// element; a document that could not be inspected has no root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomDocument {
    #[serde(default)]
    pub root: Option<DomNode>,
}

/// One element node. `text` holds the node's own text content, not the
/// subtree's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub children: Vec<DomNode>,
}

impl DomNode {
    pub fn is(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }

    /// Attribute lookup, ASCII case-insensitive on the name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first iterator over this node and every element below it.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a DomNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a DomNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

impl DomDocument {
    pub fn elements(&self) -> impl Iterator<Item = &DomNode> {
        self.root.iter().flat_map(|r| r.descendants())
    }

    /// Selector-equivalent query: first element matching the predicate.
    pub fn query<P>(&self, pred: P) -> Option<&DomNode>
    where
        P: Fn(&DomNode) -> bool,
    {
        self.elements().find(|n| pred(n))
    }
}

/// Normalize a URL to its hostname: lower-case, one trailing dot stripped.
/// Unparsable, relative or empty input resolves to the empty hostname.
pub fn hostname_of(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(u) => {
            let host = u.host_str().unwrap_or("").to_lowercase();
            host.strip_suffix('.').unwrap_or(&host).to_string()
        }
        Err(_) => String::new(),
    }
}

fn max_depth(node: &DomNode) -> usize {
    1 + node.children.iter().map(max_depth).max().unwrap_or(0)
}

fn subtree_text(node: &DomNode) -> String {
    let mut out = String::new();
    for n in node.descendants() {
        out.push_str(&n.text);
    }
    out
}

fn markup_contains(root: &DomNode, needle: &str) -> bool {
    root.descendants().any(|n| {
        n.tag.to_lowercase().contains(needle)
            || n.attrs.iter().any(|(k, v)| {
                k.to_lowercase().contains(needle) || v.to_lowercase().contains(needle)
            })
            || n.text.to_lowercase().contains(needle)
    })
}

/// Extract the 13-dimensional structural feature vector, or `None` when the
/// document is unavailable. Never returns partial data.
pub fn extract_dom_features(doc: &DomDocument, page_url: &str) -> Option<FeatureVector> {
    let root = doc.root.as_ref()?;
    let origin = hostname_of(page_url);

    // Forms
    let forms: Vec<&DomNode> = doc.elements().filter(|n| n.is("form")).collect();
    let num_forms = forms.len();
    let has_password_field = doc
        .query(|n| {
            n.is("input")
                && n.attr("type")
                    .map(|t| t.eq_ignore_ascii_case("password"))
                    .unwrap_or(false)
        })
        .is_some();
    let ext_form_actions = forms
        .iter()
        .filter(|f| {
            // No action attribute resolves to the page URL itself
            let action_host = match f.attr("action").filter(|a| !a.is_empty()) {
                Some(action) => hostname_of(action),
                None => hostname_of(page_url),
            };
            !action_host.is_empty() && action_host != origin
        })
        .count();
    let form_action_external_ratio = if num_forms > 0 {
        ext_form_actions as f64 / num_forms as f64
    } else {
        0.0
    };

    // Links: only anchors carrying an href attribute
    let anchors: Vec<&DomNode> = doc
        .elements()
        .filter(|n| n.is("a") && n.attr("href").is_some())
        .collect();
    let total_links = anchors.len();
    let ext_links = anchors
        .iter()
        .filter(|a| {
            let host = hostname_of(a.attr("href").unwrap_or(""));
            !host.is_empty() && host != origin
        })
        .count();
    let empty_links = anchors
        .iter()
        .filter(|a| {
            let href = a.attr("href").unwrap_or("").trim();
            href.is_empty() || href == "#"
        })
        .count();
    let external_link_ratio = if total_links > 0 {
        ext_links as f64 / total_links as f64
    } else {
        0.0
    };
    let empty_link_ratio = if total_links > 0 {
        empty_links as f64 / total_links as f64
    } else {
        0.0
    };

    // Images
    let images: Vec<&DomNode> = doc.elements().filter(|n| n.is("img")).collect();
    let total_images = images.len();
    let ext_images = images
        .iter()
        .filter(|img| {
            let host = hostname_of(img.attr("src").unwrap_or(""));
            !host.is_empty() && host != origin
        })
        .count();
    let external_image_ratio = if total_images > 0 {
        ext_images as f64 / total_images as f64
    } else {
        0.0
    };

    // Scripts and tree depth
    let num_scripts = doc.elements().filter(|n| n.is("script")).count();
    let dom_max_depth = max_depth(root);

    // Body text statistics
    let text = doc.query(|n| n.is("body")).map(subtree_text).unwrap_or_default();
    let text_length = text.chars().count();
    let lower_text = text.to_lowercase();
    // Non-overlapping occurrences, each counted
    let suspicious_keyword_count: usize = SUSPICIOUS_KEYWORDS
        .iter()
        .map(|kw| lower_text.matches(kw).count())
        .sum();

    // Binary flags
    let iframe = doc.query(|n| n.is("iframe")).is_some();
    let mouse_over = doc.query(|n| n.attr("onmouseover").is_some()).is_some();
    let right_click = markup_contains(root, "contextmenu");

    let mut feats = FeatureVector::with_capacity(DOM_FEATURE_NAMES.len());
    feats.insert("num_forms".to_string(), num_forms as f64);
    feats.insert("has_password_field".to_string(), has_password_field as u8 as f64);
    feats.insert("form_action_external_ratio".to_string(), form_action_external_ratio);
    feats.insert("external_link_ratio".to_string(), external_link_ratio);
    feats.insert("empty_link_ratio".to_string(), empty_link_ratio);
    feats.insert("external_image_ratio".to_string(), external_image_ratio);
    feats.insert("num_scripts".to_string(), num_scripts as f64);
    feats.insert("dom_max_depth".to_string(), dom_max_depth as f64);
    feats.insert("text_length".to_string(), text_length as f64);
    feats.insert("suspicious_keyword_count".to_string(), suspicious_keyword_count as f64);
    feats.insert("iframe".to_string(), iframe as u8 as f64);
    feats.insert("mouse_over".to_string(), mouse_over as u8 as f64);
    feats.insert("right_click".to_string(), right_click as u8 as f64);

    Some(feats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tag: &str, attrs: &[(&str, &str)], children: Vec<DomNode>) -> DomNode {
        DomNode {
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: String::new(),
            children,
        }
    }

    fn text_el(tag: &str, text: &str) -> DomNode {
        DomNode {
            tag: tag.to_string(),
            attrs: HashMap::new(),
            text: text.to_string(),
            children: Vec::new(),
        }
    }

    fn doc(body_children: Vec<DomNode>) -> DomDocument {
        DomDocument {
            root: Some(el("html", &[], vec![el("body", &[], body_children)])),
        }
    }

    const PAGE: &str = "https://mysite.com/checkout";

    #[test]
    fn test_unavailable_document() {
        let d = DomDocument { root: None };
        assert!(extract_dom_features(&d, PAGE).is_none());
    }

    #[test]
    fn test_form_action_external_ratio_half() {
        let d = doc(vec![
            el("form", &[("action", "https://evil.example.net/steal")], vec![]),
            el("form", &[("action", "https://mysite.com/login")], vec![]),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["num_forms"], 2.0);
        assert_eq!(feats["form_action_external_ratio"], 0.5);
    }

    #[test]
    fn test_actionless_and_relative_forms_are_not_external() {
        let d = doc(vec![
            el("form", &[], vec![]),
            el("form", &[("action", "submit.php")], vec![]),
            el("form", &[("action", "")], vec![]),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["form_action_external_ratio"], 0.0);
    }

    #[test]
    fn test_no_anchors_yields_zero_ratios() {
        let d = doc(vec![el("p", &[], vec![])]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["external_link_ratio"], 0.0);
        assert_eq!(feats["empty_link_ratio"], 0.0);
    }

    #[test]
    fn test_link_ratios() {
        let d = doc(vec![
            el("a", &[("href", "https://other.com/x")], vec![]),
            el("a", &[("href", "https://mysite.com/y")], vec![]),
            el("a", &[("href", "#")], vec![]),
            el("a", &[("href", "/relative")], vec![]),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["external_link_ratio"], 0.25);
        assert_eq!(feats["empty_link_ratio"], 0.25);
    }

    #[test]
    fn test_anchor_without_href_is_not_counted() {
        let d = doc(vec![el("a", &[("name", "top")], vec![])]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["external_link_ratio"], 0.0);
        assert_eq!(feats["empty_link_ratio"], 0.0);
    }

    #[test]
    fn test_external_images() {
        let d = doc(vec![
            el("img", &[("src", "https://cdn.other.com/logo.png")], vec![]),
            el("img", &[("src", "/local.png")], vec![]),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["external_image_ratio"], 0.5);
    }

    #[test]
    fn test_password_field_and_flags() {
        let d = doc(vec![
            el("form", &[], vec![el("input", &[("type", "PASSWORD")], vec![])]),
            el("iframe", &[("src", "https://x.com")], vec![]),
            el("div", &[("onmouseover", "swap()")], vec![]),
            el("script", &[], vec![]),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["has_password_field"], 1.0);
        assert_eq!(feats["iframe"], 1.0);
        assert_eq!(feats["mouse_over"], 1.0);
        assert_eq!(feats["num_scripts"], 1.0);
    }

    #[test]
    fn test_right_click_marker_in_markup() {
        let d = doc(vec![el(
            "body",
            &[("oncontextmenu", "return false")],
            vec![],
        )]);
        assert_eq!(extract_dom_features(&d, PAGE).unwrap()["right_click"], 1.0);

        let plain = doc(vec![el("p", &[], vec![])]);
        assert_eq!(extract_dom_features(&plain, PAGE).unwrap()["right_click"], 0.0);
    }

    #[test]
    fn test_max_depth_counts_root_as_one() {
        // html(1) > body(2) > div(3) > span(4)
        let d = doc(vec![el("div", &[], vec![el("span", &[], vec![])])]);
        assert_eq!(extract_dom_features(&d, PAGE).unwrap()["dom_max_depth"], 4.0);
    }

    #[test]
    fn test_keyword_occurrences_counted_per_hit() {
        let d = doc(vec![
            text_el("p", "Login here. login now."),
            text_el("p", "Enter your password"),
        ]);
        let feats = extract_dom_features(&d, PAGE).unwrap();
        // "login" twice + "password" once
        assert_eq!(feats["suspicious_keyword_count"], 3.0);
        assert_eq!(feats["text_length"], ("Login here. login now.".len() + "Enter your password".len()) as f64);
    }

    #[test]
    fn test_hostname_normalization() {
        assert_eq!(hostname_of("https://EXAMPLE.com./x"), "example.com");
        assert_eq!(hostname_of("relative/path"), "");
        assert_eq!(hostname_of(""), "");
    }

    #[test]
    fn test_document_deserializes_from_wire_shape() {
        let d: DomDocument = serde_json::from_value(serde_json::json!({
            "root": {
                "tag": "html",
                "children": [
                    {"tag": "body", "text": "verify your account",
                     "children": [{"tag": "a", "attrs": {"href": "#"}}]}
                ]
            }
        }))
        .unwrap();
        let feats = extract_dom_features(&d, PAGE).unwrap();
        assert_eq!(feats["empty_link_ratio"], 1.0);
        assert_eq!(feats["suspicious_keyword_count"], 2.0);
    }
}
