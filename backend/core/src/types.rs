use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Debounce applied to dynamic renders in streaming mode when none is configured.
pub const DEFAULT_STREAMING_DEBOUNCE_MS: u64 = 80;

/// Debounce applied to dynamic renders in static mode when none is configured.
pub const DEFAULT_STATIC_DEBOUNCE_MS: u64 = 250;

/// How a render call treats its input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Every call is an independent, complete document.
    #[default]
    Static,
    /// The input is a growing prefix of a larger document; unchanged blocks are reused.
    Streaming,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Static => write!(f, "static"),
            RenderMode::Streaming => write!(f, "streaming"),
        }
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(RenderMode::Static),
            "streaming" => Ok(RenderMode::Streaming),
            other => Err(format!("unknown render mode '{other}'")),
        }
    }
}

/// Options specific to the streaming path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamdownOptions {
    /// Close unterminated inline markers before splitting.
    #[serde(default = "default_true")]
    pub parse_incomplete_markdown: bool,
}

impl Default for StreamdownOptions {
    fn default() -> Self {
        Self {
            parse_incomplete_markdown: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Per-call render options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default)]
    pub mode: RenderMode,
    /// Force debounced scheduling. Defaults to `true` in streaming mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub streamdown: StreamdownOptions,
}

impl RenderOptions {
    pub fn streaming() -> Self {
        Self {
            mode: RenderMode::Streaming,
            ..Default::default()
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.mode == RenderMode::Streaming
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.unwrap_or(self.is_streaming())
    }

    pub fn debounce(&self) -> Duration {
        let default_ms = match self.mode {
            RenderMode::Streaming => DEFAULT_STREAMING_DEBOUNCE_MS,
            RenderMode::Static => DEFAULT_STATIC_DEBOUNCE_MS,
        };
        Duration::from_millis(self.debounce_ms.unwrap_or(default_ms))
    }

    /// Repair runs only for streaming renders that have not opted out.
    pub fn should_repair(&self) -> bool {
        self.is_streaming() && self.streamdown.parse_incomplete_markdown
    }
}

/// Optional grammar extensions on top of CommonMark.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExtendedGrammar {
    /// Tables, strikethrough, task lists, footnotes.
    Gfm,
    /// `$inline$` and `$$display$$` math.
    #[serde(alias = "mathjax")]
    Math,
}

/// Options for the Markdown → HAST pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParserOptions {
    #[serde(default)]
    pub extended_grammar: Vec<ExtendedGrammar>,
    /// Accept `\(..\)` and `\[..\]` as math delimiters. Only effective with `math`.
    #[serde(default)]
    pub supports_latex: bool,
    /// Keep raw HTML as `raw` nodes. When false it is rendered as text.
    #[serde(default = "default_true")]
    pub allow_raw_html: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            extended_grammar: Vec::new(),
            supports_latex: false,
            allow_raw_html: true,
        }
    }
}

impl ParserOptions {
    pub fn has(&self, grammar: ExtendedGrammar) -> bool {
        self.extended_grammar.contains(&grammar)
    }

    pub fn merge(&mut self, patch: &ParserOptionsPatch) {
        if let Some(grammar) = &patch.extended_grammar {
            self.extended_grammar = grammar.clone();
        }
        if let Some(latex) = patch.supports_latex {
            self.supports_latex = latex;
        }
        if let Some(raw) = patch.allow_raw_html {
            self.allow_raw_html = raw;
        }
    }
}

/// A partial update to [`ParserOptions`]; unset fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParserOptionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_grammar: Option<Vec<ExtendedGrammar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_latex: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_raw_html: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_defaults_follow_mode() {
        assert!(!RenderOptions::default().is_dynamic());
        assert!(RenderOptions::streaming().is_dynamic());
        let forced = RenderOptions {
            dynamic: Some(true),
            ..Default::default()
        };
        assert!(forced.is_dynamic());
    }

    #[test]
    fn debounce_defaults_and_override() {
        assert_eq!(RenderOptions::streaming().debounce(), Duration::from_millis(80));
        assert_eq!(RenderOptions::default().debounce(), Duration::from_millis(250));
        let custom = RenderOptions {
            debounce_ms: Some(5),
            ..RenderOptions::streaming()
        };
        assert_eq!(custom.debounce(), Duration::from_millis(5));
    }

    #[test]
    fn repair_only_when_streaming_and_enabled() {
        assert!(RenderOptions::streaming().should_repair());
        assert!(!RenderOptions::default().should_repair());
        let mut off = RenderOptions::streaming();
        off.streamdown.parse_incomplete_markdown = false;
        assert!(!off.should_repair());
    }

    #[test]
    fn render_options_from_json() {
        let opts: RenderOptions = serde_json::from_value(serde_json::json!({
            "mode": "streaming",
            "streamdown": { "parseIncompleteMarkdown": false }
        }))
        .unwrap();
        assert!(opts.is_streaming());
        assert!(!opts.streamdown.parse_incomplete_markdown);

        let defaults: RenderOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(defaults, RenderOptions::default());
        assert!(defaults.streamdown.parse_incomplete_markdown);
    }

    #[test]
    fn patch_merges_only_set_fields() {
        let mut opts = ParserOptions {
            extended_grammar: vec![ExtendedGrammar::Gfm],
            ..Default::default()
        };
        opts.merge(&ParserOptionsPatch {
            supports_latex: Some(true),
            ..Default::default()
        });
        assert!(opts.has(ExtendedGrammar::Gfm));
        assert!(opts.supports_latex);
        assert!(opts.allow_raw_html);
    }

    #[test]
    fn mathjax_alias_is_accepted() {
        let opts: ParserOptions =
            serde_json::from_value(serde_json::json!({ "extendedGrammar": ["gfm", "mathjax"] }))
                .unwrap();
        assert!(opts.has(ExtendedGrammar::Math));
    }

    #[test]
    fn render_mode_parses() {
        assert_eq!("Streaming".parse::<RenderMode>().unwrap(), RenderMode::Streaming);
        assert!("live".parse::<RenderMode>().is_err());
    }
}
