//! Markdown → HAST pipeline
//!
//! Walks `pulldown-cmark` events with an element stack and builds the HAST
//! tree in one pass. [`InProcessParser`] wraps a pipeline behind the
//! [`MarkdownParser`] capability so it can stand in for the worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use mdforge_core::hast::{Element, Node, PropertyValue, Root, Tree};
use mdforge_core::{ExtendedGrammar, ForgeError, MarkdownParser, ParserOptions, ParserOptionsPatch};
use pulldown_cmark::{
    Alignment, BlockQuoteKind, CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag,
    TagEnd,
};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::latex::normalize_latex_delimiters;

/// A configured Markdown → HAST converter. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MarkdownPipeline {
    options: ParserOptions,
}

impl MarkdownPipeline {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ParserOptions) {
        self.options = options;
    }

    fn cmark_options(&self) -> Options {
        let mut opts = Options::empty();
        if self.options.has(ExtendedGrammar::Gfm) {
            opts |= Options::ENABLE_TABLES
                | Options::ENABLE_STRIKETHROUGH
                | Options::ENABLE_TASKLISTS
                | Options::ENABLE_FOOTNOTES
                | Options::ENABLE_GFM;
        }
        if self.options.has(ExtendedGrammar::Math) {
            opts |= Options::ENABLE_MATH;
        }
        opts
    }

    pub fn parse(&self, markdown: &str) -> Root {
        let latex = self.options.has(ExtendedGrammar::Math) && self.options.supports_latex;
        let source = if latex {
            normalize_latex_delimiters(markdown)
        } else {
            markdown.to_string()
        };

        let mut builder = TreeBuilder::new(self.options.allow_raw_html);
        for event in Parser::new_ext(&source, self.cmark_options()) {
            builder.event(event);
        }
        builder.finish()
    }

    pub fn parse_to_html(&self, markdown: &str) -> String {
        self.parse(markdown).to_html()
    }
}

struct TableState {
    alignments: Vec<Alignment>,
    cell: usize,
    in_head: bool,
    body_open: bool,
}

struct TreeBuilder {
    root: Vec<Node>,
    stack: Vec<Element>,
    table: Option<TableState>,
    allow_raw_html: bool,
}

fn class_list(classes: &[&str]) -> PropertyValue {
    PropertyValue::List(classes.iter().map(|c| c.to_string()).collect())
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

fn alert_class(kind: BlockQuoteKind) -> &'static str {
    match kind {
        BlockQuoteKind::Note => "markdown-alert-note",
        BlockQuoteKind::Tip => "markdown-alert-tip",
        BlockQuoteKind::Important => "markdown-alert-important",
        BlockQuoteKind::Warning => "markdown-alert-warning",
        BlockQuoteKind::Caution => "markdown-alert-caution",
    }
}

fn push_text(children: &mut Vec<Node>, value: &str) {
    if let Some(Node::Text { value: last }) = children.last_mut() {
        last.push_str(value);
    } else {
        children.push(Node::text(value));
    }
}

impl TreeBuilder {
    fn new(allow_raw_html: bool) -> Self {
        Self {
            root: Vec::new(),
            stack: Vec::new(),
            table: None,
            allow_raw_html,
        }
    }

    fn children(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(element) => &mut element.children,
            None => &mut self.root,
        }
    }

    fn open(&mut self, element: Element) {
        self.stack.push(element);
    }

    fn close(&mut self) {
        if let Some(element) = self.stack.pop() {
            self.children().push(Node::Element(element));
        }
    }

    fn text(&mut self, value: &str) {
        push_text(self.children(), value);
    }

    fn html(&mut self, value: CowStr<'_>) {
        if self.allow_raw_html {
            self.children().push(Node::raw(value.to_string()));
        } else {
            self.text(&value);
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(end) => self.end(end),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                let code = Element::new("code").with_children(vec![Node::text(code.to_string())]);
                self.children().push(Node::Element(code));
            }
            Event::InlineMath(math) => {
                let code = Element::new("code")
                    .with_property("class", class_list(&["language-math", "math-inline"]))
                    .with_children(vec![Node::text(math.to_string())]);
                self.children().push(Node::Element(code));
            }
            Event::DisplayMath(math) => {
                let code = Element::new("code")
                    .with_property("class", class_list(&["language-math", "math-display"]))
                    .with_children(vec![Node::text(math.to_string())]);
                let pre = Element::new("pre").with_children(vec![Node::Element(code)]);
                self.children().push(Node::Element(pre));
            }
            Event::Html(html) | Event::InlineHtml(html) => self.html(html),
            Event::FootnoteReference(label) => {
                let link = Element::new("a")
                    .with_property("href", PropertyValue::String(format!("#fn-{label}")))
                    .with_property("id", PropertyValue::String(format!("fnref-{label}")))
                    .with_children(vec![Node::text(label.to_string())]);
                let sup = Element::new("sup").with_children(vec![Node::Element(link)]);
                self.children().push(Node::Element(sup));
            }
            Event::SoftBreak => self.text("\n"),
            Event::HardBreak => {
                self.children().push(Node::element("br", Vec::new()));
                self.text("\n");
            }
            Event::Rule => self.children().push(Node::element("hr", Vec::new())),
            Event::TaskListMarker(checked) => {
                if let Some(item) = self.stack.iter_mut().rev().find(|e| e.tag_name == "li") {
                    item.properties
                        .insert("class".into(), class_list(&["task-list-item"]));
                }
                let input = Element::new("input")
                    .with_property("type", PropertyValue::String("checkbox".into()))
                    .with_property("checked", PropertyValue::Bool(checked))
                    .with_property("disabled", PropertyValue::Bool(true));
                self.children().push(Node::Element(input));
                self.text(" ");
            }
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.open(Element::new("p")),
            Tag::Heading {
                level, id, classes, ..
            } => {
                let mut heading = Element::new(heading_tag(level));
                if let Some(id) = id {
                    heading = heading.with_property("id", PropertyValue::String(id.to_string()));
                }
                if !classes.is_empty() {
                    let classes = classes.iter().map(|c| c.to_string()).collect();
                    heading = heading.with_property("class", PropertyValue::List(classes));
                }
                self.open(heading);
            }
            Tag::BlockQuote(kind) => {
                let mut quote = Element::new("blockquote");
                if let Some(kind) = kind {
                    quote = quote.with_property(
                        "class",
                        class_list(&["markdown-alert", alert_class(kind)]),
                    );
                }
                self.open(quote);
            }
            Tag::CodeBlock(kind) => {
                self.open(Element::new("pre"));
                let mut code = Element::new("code");
                if let CodeBlockKind::Fenced(info) = kind {
                    if let Some(lang) = info.split_whitespace().next() {
                        let class = format!("language-{lang}");
                        code = code.with_property("class", class_list(&[class.as_str()]));
                    }
                }
                self.open(code);
            }
            Tag::HtmlBlock => {}
            Tag::List(Some(start)) => {
                let mut list = Element::new("ol");
                if start != 1 {
                    list = list.with_property("start", PropertyValue::Number(start as i64));
                }
                self.open(list);
            }
            Tag::List(None) => self.open(Element::new("ul")),
            Tag::Item => self.open(Element::new("li")),
            Tag::FootnoteDefinition(label) => {
                let marker = Element::new("sup")
                    .with_property("class", class_list(&["footnote-definition-label"]))
                    .with_children(vec![Node::text(label.to_string())]);
                let definition = Element::new("div")
                    .with_property("class", class_list(&["footnote-definition"]))
                    .with_property("id", PropertyValue::String(format!("fn-{label}")))
                    .with_children(vec![Node::Element(marker)]);
                self.open(definition);
            }
            Tag::Table(alignments) => {
                self.table = Some(TableState {
                    alignments,
                    cell: 0,
                    in_head: false,
                    body_open: false,
                });
                self.open(Element::new("table"));
            }
            Tag::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.in_head = true;
                    table.cell = 0;
                }
                self.open(Element::new("thead"));
                self.open(Element::new("tr"));
            }
            Tag::TableRow => {
                let open_body = match self.table.as_mut() {
                    Some(table) => {
                        table.cell = 0;
                        !std::mem::replace(&mut table.body_open, true)
                    }
                    None => false,
                };
                if open_body {
                    self.open(Element::new("tbody"));
                }
                self.open(Element::new("tr"));
            }
            Tag::TableCell => {
                let (tag, align) = match self.table.as_mut() {
                    Some(table) => {
                        let align = table.alignments.get(table.cell).copied();
                        table.cell += 1;
                        (if table.in_head { "th" } else { "td" }, align)
                    }
                    None => ("td", None),
                };
                let mut cell = Element::new(tag);
                let align = match align {
                    Some(Alignment::Left) => Some("left"),
                    Some(Alignment::Center) => Some("center"),
                    Some(Alignment::Right) => Some("right"),
                    _ => None,
                };
                if let Some(align) = align {
                    cell = cell.with_property("align", PropertyValue::String(align.into()));
                }
                self.open(cell);
            }
            Tag::Emphasis => self.open(Element::new("em")),
            Tag::Strong => self.open(Element::new("strong")),
            Tag::Strikethrough => self.open(Element::new("del")),
            Tag::Superscript => self.open(Element::new("sup")),
            Tag::Subscript => self.open(Element::new("sub")),
            Tag::Link {
                dest_url, title, ..
            } => {
                let mut link = Element::new("a")
                    .with_property("href", PropertyValue::String(dest_url.to_string()));
                if !title.is_empty() {
                    link = link.with_property("title", PropertyValue::String(title.to_string()));
                }
                self.open(link);
            }
            Tag::Image {
                dest_url, title, ..
            } => {
                let mut image = Element::new("img")
                    .with_property("src", PropertyValue::String(dest_url.to_string()));
                if !title.is_empty() {
                    image = image.with_property("title", PropertyValue::String(title.to_string()));
                }
                self.open(image);
            }
            Tag::DefinitionList => self.open(Element::new("dl")),
            Tag::DefinitionListTitle => self.open(Element::new("dt")),
            Tag::DefinitionListDefinition => self.open(Element::new("dd")),
            Tag::MetadataBlock(_) => self.open(Element::new("template")),
        }
    }

    fn end(&mut self, end: TagEnd) {
        match end {
            TagEnd::HtmlBlock => {}
            TagEnd::CodeBlock => {
                self.close();
                self.close();
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.in_head = false;
                }
                self.close();
                self.close();
            }
            TagEnd::Table => {
                if self.table.take().is_some_and(|t| t.body_open) {
                    self.close();
                }
                self.close();
            }
            TagEnd::Image => {
                if let Some(mut image) = self.stack.pop() {
                    let alt = Root::new(std::mem::take(&mut image.children)).text_content();
                    image.properties.insert("alt".into(), PropertyValue::String(alt));
                    self.children().push(Node::Element(image));
                }
            }
            TagEnd::MetadataBlock(_) => {
                // Front matter is not rendered.
                self.stack.pop();
            }
            _ => self.close(),
        }
    }

    fn finish(mut self) -> Root {
        while !self.stack.is_empty() {
            self.close();
        }
        Root::new(self.root)
    }
}

/// In-process [`MarkdownParser`]: runs the pipeline on the blocking thread pool.
#[derive(Debug, Clone, Default)]
pub struct InProcessParser {
    options: Arc<RwLock<ParserOptions>>,
}

impl InProcessParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options: Arc::new(RwLock::new(options)),
        }
    }

    pub async fn options(&self) -> ParserOptions {
        self.options.read().await.clone()
    }

    async fn pipeline(&self) -> MarkdownPipeline {
        MarkdownPipeline::new(self.options.read().await.clone())
    }
}

#[async_trait]
impl MarkdownParser for InProcessParser {
    fn name(&self) -> &str {
        "in-process"
    }

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
        let pipeline = self.pipeline().await;
        let source = markdown.to_string();
        let root = tokio::task::spawn_blocking(move || pipeline.parse(&source))
            .await
            .map_err(|e| ForgeError::Parse(format!("parse task failed: {e}")))?;
        trace!(nodes = root.children.len(), "parsed fragment in process");
        Ok(Arc::new(root))
    }

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
        let pipeline = self.pipeline().await;
        let source = markdown.to_string();
        tokio::task::spawn_blocking(move || pipeline.parse_to_html(&source))
            .await
            .map_err(|e| ForgeError::Parse(format!("parse task failed: {e}")))
    }

    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        let mut options = self.options.write().await;
        options.merge(patch);
        debug!(options = ?*options, "in-process parser options updated");
        Ok(())
    }
}
