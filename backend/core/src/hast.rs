//! HAST (HTML abstract syntax tree)
//!
//! The structured output of parsing one Markdown fragment. Serializes to the
//! same JSON shape as the unist/hast ecosystem (`{"type": "element", ...}`) so
//! downstream renderers can consume it directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A parsed tree. Shared by reference: a tree is never mutated after it is
/// built, so reused blocks hand out the same allocation.
pub type Tree = Arc<Root>;

/// Elements that never have children or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "root")]
pub struct Root {
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Element(Element),
    Text { value: String },
    Comment { value: String },
    /// Unparsed HTML carried through verbatim.
    Raw { value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(i64),
    String(String),
    List(Vec<String>),
}

impl Root {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Concatenated text content of the whole tree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.collect_text(&mut out);
        }
        out
    }

    /// Serialize the tree to an HTML string.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_html(&mut out);
        }
        out
    }
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Text { value: value.into() }
    }

    pub fn raw(value: impl Into<String>) -> Self {
        Node::Raw { value: value.into() }
    }

    pub fn element(tag_name: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Element(Element::new(tag_name).with_children(children))
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text { value } => out.push_str(value),
            Node::Element(element) => {
                for child in &element.children {
                    child.collect_text(out);
                }
            }
            Node::Comment { .. } | Node::Raw { .. } => {}
        }
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Node::Text { value } => out.push_str(&html_escape::encode_text(value)),
            Node::Raw { value } => out.push_str(value),
            Node::Comment { value } => {
                out.push_str("<!--");
                out.push_str(value);
                out.push_str("-->");
            }
            Node::Element(element) => element.write_html(out),
        }
    }
}

impl Element {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.tag_name.as_str())
    }

    fn write_html(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag_name);
        for (name, value) in &self.properties {
            match value {
                PropertyValue::Bool(false) => continue,
                PropertyValue::Bool(true) => {
                    out.push(' ');
                    out.push_str(name);
                }
                PropertyValue::Number(n) => {
                    out.push_str(&format!(" {name}=\"{n}\""));
                }
                PropertyValue::String(s) => {
                    out.push_str(&format!(
                        " {name}=\"{}\"",
                        html_escape::encode_double_quoted_attribute(s)
                    ));
                }
                PropertyValue::List(items) => {
                    let joined = items.join(" ");
                    out.push_str(&format!(
                        " {name}=\"{}\"",
                        html_escape::encode_double_quoted_attribute(&joined)
                    ));
                }
            }
        }
        out.push('>');
        if self.is_void() {
            return;
        }
        for child in &self.children {
            child.write_html(out);
        }
        out.push_str("</");
        out.push_str(&self.tag_name);
        out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_nested_elements() {
        let root = Root::new(vec![Node::element(
            "p",
            vec![
                Node::text("a < b "),
                Node::element("strong", vec![Node::text("bold")]),
            ],
        )]);
        assert_eq!(root.to_html(), "<p>a &lt; b <strong>bold</strong></p>");
    }

    #[test]
    fn void_elements_and_attributes() {
        let img = Element::new("img")
            .with_property("src", PropertyValue::String("x.png?a=1&b=\"2\"".into()))
            .with_property("alt", PropertyValue::String("pic".into()));
        let input = Element::new("input")
            .with_property("type", PropertyValue::String("checkbox".into()))
            .with_property("checked", PropertyValue::Bool(true))
            .with_property("disabled", PropertyValue::Bool(false));
        let root = Root::new(vec![Node::Element(img), Node::Element(input)]);
        assert_eq!(
            root.to_html(),
            "<img alt=\"pic\" src=\"x.png?a=1&amp;b=&quot;2&quot;\"><input checked type=\"checkbox\">"
        );
    }

    #[test]
    fn class_lists_join_with_spaces() {
        let code = Element::new("code").with_property(
            "class",
            PropertyValue::List(vec!["language-math".into(), "math-inline".into()]),
        );
        let root = Root::new(vec![Node::Element(code.with_children(vec![Node::text("x")]))]);
        assert_eq!(root.to_html(), "<code class=\"language-math math-inline\">x</code>");
    }

    #[test]
    fn raw_nodes_pass_through() {
        let root = Root::new(vec![Node::raw("<div>\n"), Node::text("&")]);
        assert_eq!(root.to_html(), "<div>\n&amp;");
        assert_eq!(root.text_content(), "&");
    }

    #[test]
    fn json_shape_matches_hast() {
        let root = Root::new(vec![Node::element("p", vec![Node::text("hi")])]);
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["type"], "root");
        assert_eq!(json["children"][0]["type"], "element");
        assert_eq!(json["children"][0]["tagName"], "p");
        assert_eq!(json["children"][0]["children"][0]["type"], "text");
        assert_eq!(json["children"][0]["children"][0]["value"], "hi");

        let back: Root = serde_json::from_value(json).unwrap();
        assert_eq!(back, root);
    }
}
