//! Block Splitter
//!
//! Tokenizes Markdown into top-level block constructs with `pulldown-cmark`
//! and merges the ones that cannot be rendered independently. The output
//! sources always concatenate back to the exact input.

use std::ops::Range;

use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;

/// `[^id]` references and `[^id]:` definitions. Either one anywhere in the
/// document forces the whole document into a single block.
static FOOTNOTE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\^[A-Za-z0-9_-]{1,200}\]").expect("valid footnote regex"));

static OPENING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(\w+)[\s>]").expect("valid opening tag regex"));

static CLOSING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</(\w+)>").expect("valid closing tag regex"));

static ANY_OPENING_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<([a-z][a-z0-9-]*)(?:[\s/][^>]*)?>").expect("valid opening tag regex")
});

static ANY_CLOSING_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</([a-z][a-z0-9-]*)(?:\s[^>]*)?>").expect("valid closing tag regex")
});

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Kind of a top-level token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Blank lines or other whitespace between blocks.
    Space,
    Paragraph,
    Heading,
    Code,
    Html,
    List,
    BlockQuote,
    Table,
    Rule,
    /// Source the lexer emits no block for, e.g. link reference definitions.
    Definition,
    Other,
}

/// One top-level token: its kind and the byte range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: Range<usize>,
}

fn tokenizer_options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
}

fn classify(tag: &Tag<'_>) -> TokenKind {
    match tag {
        Tag::Paragraph => TokenKind::Paragraph,
        Tag::Heading { .. } => TokenKind::Heading,
        Tag::CodeBlock(_) => TokenKind::Code,
        Tag::HtmlBlock => TokenKind::Html,
        Tag::List(_) => TokenKind::List,
        Tag::BlockQuote(_) => TokenKind::BlockQuote,
        Tag::Table(_) => TokenKind::Table,
        _ => TokenKind::Other,
    }
}

/// Lex `markdown` into top-level tokens covering every byte of the input.
///
/// Gaps between the lexer's block ranges become [`TokenKind::Space`] when they
/// are whitespace only and [`TokenKind::Definition`] otherwise.
pub fn tokenize(markdown: &str) -> Vec<Token> {
    let mut blocks: Vec<Token> = Vec::new();
    let mut depth = 0usize;

    for (event, range) in Parser::new_ext(markdown, tokenizer_options()).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    blocks.push(Token {
                        kind: classify(&tag),
                        range,
                    });
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Rule if depth == 0 => blocks.push(Token {
                kind: TokenKind::Rule,
                range,
            }),
            _ if depth == 0 => blocks.push(Token {
                kind: TokenKind::Other,
                range,
            }),
            _ => {}
        }
    }

    let mut tokens = Vec::with_capacity(blocks.len() * 2 + 1);
    let mut cursor = 0usize;
    for block in blocks {
        let start = block.range.start.max(cursor);
        let end = block.range.end.min(markdown.len());
        if start > cursor {
            tokens.push(gap_token(markdown, cursor..start));
        }
        if end > start {
            tokens.push(Token {
                kind: block.kind,
                range: start..end,
            });
            cursor = end;
        }
    }
    if cursor < markdown.len() {
        tokens.push(gap_token(markdown, cursor..markdown.len()));
    }
    tokens
}

fn gap_token(markdown: &str, range: Range<usize>) -> Token {
    let kind = if markdown[range.clone()].trim().is_empty() {
        TokenKind::Space
    } else {
        TokenKind::Definition
    };
    Token { kind, range }
}

fn count_double_dollars(value: &str) -> usize {
    let bytes = value.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'$' {
            count += 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    count
}

fn count_open_tags(block: &str, tag_name: &str) -> usize {
    if VOID_ELEMENTS.iter().any(|void| void.eq_ignore_ascii_case(tag_name)) {
        return 0;
    }
    ANY_OPENING_TAG
        .captures_iter(block)
        .filter(|caps| caps[1].eq_ignore_ascii_case(tag_name))
        .filter(|caps| !caps[0].trim_end().ends_with("/>"))
        .count()
}

fn count_close_tags(block: &str, tag_name: &str) -> usize {
    ANY_CLOSING_TAG
        .captures_iter(block)
        .filter(|caps| caps[1].eq_ignore_ascii_case(tag_name))
        .count()
}

/// Split `markdown` into the ordered sources of its top-level blocks.
///
/// Merge rules, applied in order to each token:
/// - while an HTML block is still open, every token joins the current block
///   until its closing tag shows up;
/// - whitespace joins the previous block (leading whitespace joins the first);
/// - a token joins the previous block while that block holds an odd number
///   of `$$`, unless the previous block started with a code token.
pub fn split_blocks(markdown: &str) -> Vec<String> {
    if markdown.is_empty() {
        return Vec::new();
    }
    if FOOTNOTE_MARKER.is_match(markdown) {
        return vec![markdown.to_string()];
    }

    let mut blocks: Vec<String> = Vec::new();
    let mut html_stack: Vec<String> = Vec::new();
    let mut leading = String::new();
    let mut previous_was_code = false;

    for token in tokenize(markdown) {
        let source = &markdown[token.range.clone()];

        if !html_stack.is_empty() {
            if let Some(last) = blocks.last_mut() {
                last.push_str(source);
                for caps in CLOSING_TAG.captures_iter(source) {
                    if html_stack.last().map(String::as_str) == Some(&caps[1]) {
                        html_stack.pop();
                    }
                }
                continue;
            }
        }

        if token.kind == TokenKind::Space {
            match blocks.last_mut() {
                Some(last) => last.push_str(source),
                None => leading.push_str(source),
            }
            continue;
        }

        if token.kind == TokenKind::Html {
            if let Some(caps) = OPENING_TAG.captures(source) {
                let tag = &caps[1];
                if count_open_tags(source, tag) > count_close_tags(source, tag) {
                    html_stack.push(tag.to_string());
                }
            }
        }

        if !previous_was_code {
            if let Some(last) = blocks.last_mut() {
                if count_double_dollars(last) % 2 == 1 {
                    last.push_str(source);
                    continue;
                }
            }
        }

        let mut block = std::mem::take(&mut leading);
        block.push_str(source);
        blocks.push(block);
        previous_was_code = token.kind == TokenKind::Code;
    }

    if !leading.is_empty() {
        blocks.push(leading);
    }
    blocks
}
