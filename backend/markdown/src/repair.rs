//! Incomplete-Markdown Repairer
//!
//! Closes the trailing, visibly unterminated markers of a streamed Markdown
//! prefix so that partial tokens render in their probably-intended closed form
//! instead of as literal markup. Best effort and purely textual: it never
//! parses, it only counts markers outside code fences.

/// Placeholder URL given to links whose destination has not streamed in yet.
pub const INCOMPLETE_LINK_URL: &str = "streamdown:incomplete-link";

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub links: bool,
    pub images: bool,
    pub emphasis: bool,
    pub inline_code: bool,
    pub strikethrough: bool,
    pub block_math: bool,
    /// Guard lone `-`, `--`, `=` and `==` lines from becoming setext underlines.
    pub setext_headings: bool,
    pub incomplete_link_url: String,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            links: true,
            images: true,
            emphasis: true,
            inline_code: true,
            strikethrough: true,
            block_math: true,
            setext_headings: true,
            incomplete_link_url: INCOMPLETE_LINK_URL.to_string(),
        }
    }
}

/// Repair `markdown` with the default options.
pub fn repair(markdown: &str) -> String {
    repair_with(markdown, &RepairOptions::default())
}

pub fn repair_with(markdown: &str, options: &RepairOptions) -> String {
    if markdown.is_empty() {
        return String::new();
    }

    let mut text = if options.setext_headings {
        protect_setext_underline(markdown)
    } else {
        markdown.to_string()
    };

    // Inside an unclosed fence everything is code; leave it alone.
    if find_fences(&text).unclosed_from.is_some() {
        return text;
    }

    if options.links || options.images {
        let fences = find_fences(&text);
        if let Some(completed) = complete_link_or_image(&text, &fences, options) {
            if completed.ends_with(&format!("]({})", options.incomplete_link_url)) {
                return completed;
            }
            text = completed;
        }
    }

    let fences = find_fences(&text);
    if options.emphasis {
        text = close_bold_italic(&text, &fences);
        text = close_double_marker(&text, &fences, "**");
        text = close_double_marker(&text, &fences, "__");
        text = close_single_asterisk(&text, &fences);
        text = close_single_underscore(&text, &fences);
    }
    if options.inline_code {
        text = close_inline_code(&text, &fences);
    }
    if options.strikethrough {
        text = close_strikethrough(&text, &fences);
    }
    if options.block_math {
        text = close_block_math(&text, &fences);
    }
    text
}

/// Byte ranges of fenced code blocks, plus the start of a trailing unclosed one.
#[derive(Debug, Default)]
struct Fences {
    closed: Vec<(usize, usize)>,
    unclosed_from: Option<usize>,
}

impl Fences {
    fn contains(&self, pos: usize) -> bool {
        self.closed.iter().any(|&(start, end)| pos >= start && pos < end)
            || self.unclosed_from.is_some_and(|start| pos >= start)
    }
}

fn fence_marker(line: &str) -> Option<(u8, usize)> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let marker = *trimmed.as_bytes().first()?;
    if marker != b'`' && marker != b'~' {
        return None;
    }
    let run = trimmed.bytes().take_while(|&b| b == marker).count();
    (run >= 3).then_some((marker, run))
}

fn find_fences(text: &str) -> Fences {
    let mut fences = Fences::default();
    let mut open: Option<(u8, usize, usize)> = None;
    let mut line_start = 0;

    for line in text.split_inclusive('\n') {
        let line_end = line_start + line.len();
        if let Some((marker, run)) = fence_marker(line.trim_end_matches(['\n', '\r'])) {
            match open {
                None => open = Some((marker, run, line_start)),
                Some((open_marker, open_run, start))
                    if marker == open_marker && run >= open_run =>
                {
                    fences.closed.push((start, line_end));
                    open = None;
                }
                Some(_) => {}
            }
        }
        line_start = line_end;
    }

    fences.unclosed_from = open.map(|(_, _, start)| start);
    fences
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn byte_at(text: &str, index: usize) -> u8 {
    text.as_bytes().get(index).copied().unwrap_or(0)
}

fn before(text: &str, index: usize) -> u8 {
    if index == 0 {
        0
    } else {
        byte_at(text, index - 1)
    }
}

fn is_space_or_edge(b: u8) -> bool {
    b == 0 || b.is_ascii_whitespace()
}

/// A marker with whitespace on both sides can neither open nor close.
fn stands_alone(prev: u8, next: u8) -> bool {
    is_space_or_edge(prev) && is_space_or_edge(next)
}

fn markers_or_space_only(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_whitespace() || matches!(c, '_' | '~' | '*' | '`'))
}

/// Whether `pos` sits inside `$..$` or `$$..$$`, ignoring escaped dollars.
fn in_math(text: &str, pos: usize) -> bool {
    let bytes = text.as_bytes();
    let (mut inline, mut block) = (false, false);
    let mut i = 0;
    while i < pos && i < bytes.len() {
        match bytes[i] {
            b'\\' if byte_at(text, i + 1) == b'$' => {
                i += 2;
                continue;
            }
            b'$' if byte_at(text, i + 1) == b'$' => {
                block = !block;
                inline = false;
                i += 2;
                continue;
            }
            b'$' if !block => inline = !inline,
            _ => {}
        }
        i += 1;
    }
    inline || block
}

/// Whether `pos` sits inside the `(...)` destination of a link or image.
fn in_link_url(text: &str, pos: usize) -> bool {
    let bytes = text.as_bytes();
    let mut i = pos;
    while i > 0 {
        i -= 1;
        match bytes[i] {
            b'\n' | b')' => return false,
            b'(' => {
                return before(text, i) == b']'
                    && bytes[pos..]
                        .iter()
                        .take_while(|&&b| b != b'\n')
                        .any(|&b| b == b')');
            }
            _ => {}
        }
    }
    false
}

fn line_bounds(text: &str, index: usize) -> (usize, usize) {
    let start = text[..index].rfind('\n').map_or(0, |i| i + 1);
    let end = text[index..].find('\n').map_or(text.len(), |i| index + i);
    (start, end)
}

/// `***`, `___` and similar on a line of their own are thematic breaks.
fn is_rule_line(text: &str, index: usize, marker: u8) -> bool {
    let (start, end) = line_bounds(text, index);
    let line = &text.as_bytes()[start..end];
    line.iter().all(|&b| b == marker || b == b' ' || b == b'\t')
        && line.iter().filter(|&&b| b == marker).count() >= 3
}

fn is_bullet_marker(text: &str, index: usize) -> bool {
    let (start, _) = line_bounds(text, index);
    let indent = &text[start..index];
    indent.len() <= 3
        && indent.bytes().all(|b| b == b' ')
        && matches!(byte_at(text, index + 1), b' ' | b'\t')
}

/// Insert `marker` before any trailing whitespace so the closer stays on the
/// same line as the content it closes.
fn close_with(text: &str, marker: &str) -> String {
    let content_end = text.trim_end().len();
    let mut out = String::with_capacity(text.len() + marker.len());
    out.push_str(&text[..content_end]);
    out.push_str(marker);
    out.push_str(&text[content_end..]);
    out
}

fn protect_setext_underline(text: &str) -> String {
    let Some(last_newline) = text.rfind('\n') else {
        return text.to_string();
    };
    let previous = &text[..last_newline];
    if previous.is_empty() || previous.ends_with('\n') {
        return text.to_string();
    }
    let last_line = text[last_newline + 1..].trim_end_matches([' ', '\t']);
    if matches!(last_line, "-" | "--" | "=" | "==") {
        return format!("{}{last_line}\u{200B}", &text[..last_newline + 1]);
    }
    text.to_string()
}

fn matching_open_bracket(text: &str, close: usize) -> Option<usize> {
    let mut depth = 1usize;
    for i in (0..close).rev() {
        match text.as_bytes()[i] {
            b']' => depth += 1,
            b'[' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn has_matching_close_bracket(text: &str, open: usize) -> bool {
    let mut depth = 1usize;
    for &b in &text.as_bytes()[open + 1..] {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn complete_link_or_image(text: &str, fences: &Fences, options: &RepairOptions) -> Option<String> {
    let url = &options.incomplete_link_url;

    // `[text](partial-url` with no closing paren yet.
    if let Some(idx) = text.rfind("](") {
        if !fences.contains(idx) && !text[idx + 2..].contains(')') {
            if let Some(open) = matching_open_bracket(text, idx) {
                if fences.contains(open) {
                    return None;
                }
                if before(text, open) == b'!' {
                    return options.images.then(|| text[..open - 1].to_string());
                }
                if options.links {
                    return Some(format!("{}[{}]({url})", &text[..open], &text[open + 1..idx]));
                }
                return None;
            }
        }
    }

    // `[text` with no closing bracket yet.
    for i in (0..text.len()).rev() {
        if text.as_bytes()[i] != b'[' || fences.contains(i) {
            continue;
        }
        if has_matching_close_bracket(text, i) {
            continue;
        }
        if before(text, i) == b'!' {
            return options.images.then(|| text[..i - 1].to_string());
        }
        if options.links {
            return Some(format!("{text}]({url})"));
        }
        return None;
    }
    None
}

fn count_triple_asterisks(text: &str) -> usize {
    text.as_bytes()
        .split(|&b| b != b'*')
        .map(|run| run.len() / 3)
        .sum()
}

fn is_single_asterisk(text: &str, i: usize, fences: &Fences) -> bool {
    if byte_at(text, i) != b'*' || fences.contains(i) {
        return false;
    }
    let (prev, next) = (before(text, i), byte_at(text, i + 1));
    if prev == b'*' || next == b'*' || prev == b'\\' {
        return false;
    }
    if (is_word_byte(prev) && is_word_byte(next)) || stands_alone(prev, next) {
        return false;
    }
    if text.contains('$') && in_math(text, i) {
        return false;
    }
    !is_bullet_marker(text, i)
}

fn count_single_asterisks(text: &str, fences: &Fences) -> usize {
    let bytes = text.as_bytes();
    (0..bytes.len())
        .filter(|&i| {
            if bytes[i] != b'*' || fences.contains(i) {
                return false;
            }
            let (prev, next) = (before(text, i), byte_at(text, i + 1));
            // The first `*` of a `***` run counts as a single asterisk.
            let opens_triple = prev != b'*' && next == b'*' && byte_at(text, i + 2) == b'*';
            if !opens_triple && (prev == b'*' || next == b'*') {
                return false;
            }
            if prev == b'\\' || (is_word_byte(prev) && is_word_byte(next)) {
                return false;
            }
            if !opens_triple && stands_alone(prev, next) {
                return false;
            }
            if text.contains('$') && in_math(text, i) {
                return false;
            }
            !is_bullet_marker(text, i)
        })
        .count()
}

fn is_single_underscore(text: &str, i: usize, fences: &Fences) -> bool {
    if byte_at(text, i) != b'_' || fences.contains(i) {
        return false;
    }
    let (prev, next) = (before(text, i), byte_at(text, i + 1));
    if prev == b'_' || next == b'_' || prev == b'\\' {
        return false;
    }
    if (is_word_byte(prev) && is_word_byte(next)) || stands_alone(prev, next) {
        return false;
    }
    if text.contains('$') && in_math(text, i) {
        return false;
    }
    !in_link_url(text, i)
}

fn close_bold_italic(text: &str, fences: &Fences) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 4 && trimmed.bytes().all(|b| b == b'*') {
        return text.to_string();
    }
    let Some(idx) = text.rfind("***") else {
        return text.to_string();
    };
    let after = &text[idx + 3..];
    if after.contains('*') || markers_or_space_only(after) || fences.contains(idx) {
        return text.to_string();
    }
    if is_rule_line(text, idx, b'*') || count_triple_asterisks(text) % 2 == 0 {
        return text.to_string();
    }
    let doubles_balanced = text.matches("**").count() % 2 == 0;
    let singles_balanced = count_single_asterisks(text, fences) % 2 == 0;
    if doubles_balanced && singles_balanced {
        return text.to_string();
    }
    close_with(text, "***")
}

/// Close a trailing `**` or `__` span.
fn close_double_marker(text: &str, fences: &Fences, marker: &str) -> String {
    let marker_byte = marker.as_bytes()[0];
    let Some(idx) = text.rfind(marker) else {
        return text.to_string();
    };
    let after = &text[idx + 2..];
    if after.bytes().any(|b| b == marker_byte) || markers_or_space_only(after) {
        return text.to_string();
    }
    if fences.contains(idx) || is_rule_line(text, idx, marker_byte) {
        return text.to_string();
    }
    if text.matches(marker).count() % 2 == 1 {
        close_with(text, marker)
    } else {
        text.to_string()
    }
}

fn close_single_asterisk(text: &str, fences: &Fences) -> String {
    let Some(first) = (0..text.len()).find(|&i| is_single_asterisk(text, i, fences)) else {
        return text.to_string();
    };
    if markers_or_space_only(&text[first + 1..]) {
        return text.to_string();
    }
    if count_single_asterisks(text, fences) % 2 == 1 {
        close_with(text, "*")
    } else {
        text.to_string()
    }
}

fn close_single_underscore(text: &str, fences: &Fences) -> String {
    let Some(first) = (0..text.len()).find(|&i| is_single_underscore(text, i, fences)) else {
        return text.to_string();
    };
    if markers_or_space_only(&text[first + 1..]) {
        return text.to_string();
    }
    let singles = (0..text.len())
        .filter(|&i| is_single_underscore(text, i, fences))
        .count();
    if singles % 2 == 0 {
        return text.to_string();
    }
    // `_a **b**` where the bold closer was just added: nest the underscore inside.
    if let Some(without) = text.strip_suffix("**") {
        if without.matches("**").count() % 2 == 1
            && without.find("**").is_some_and(|double| double < first)
        {
            return format!("{without}_**");
        }
    }
    close_with(text, "_")
}

fn close_inline_code(text: &str, fences: &Fences) -> String {
    let ticks = text
        .char_indices()
        .filter(|&(i, c)| c == '`' && !fences.contains(i) && before(text, i) != b'\\')
        .count();
    if ticks % 2 == 1 {
        close_with(text, "`")
    } else {
        text.to_string()
    }
}

fn count_pairs(text: &str, fences: &Fences, marker: u8, skip_escaped: bool) -> usize {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == marker && bytes[i + 1] == marker && !fences.contains(i) {
            if !(skip_escaped && before(text, i) == b'\\') {
                count += 1;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    count
}

fn close_strikethrough(text: &str, fences: &Fences) -> String {
    if count_pairs(text, fences, b'~', false) % 2 == 1 {
        close_with(text, "~~")
    } else {
        text.to_string()
    }
}

fn close_block_math(text: &str, fences: &Fences) -> String {
    if count_pairs(text, fences, b'$', true) % 2 == 0 {
        return text.to_string();
    }
    let mut out = text.to_string();
    // A display block opened on its own line closes on its own line.
    if text.trim_start().starts_with("$$\n") && !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("$$");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_unterminated_bold() {
        assert_eq!(repair("This is **bold"), "This is **bold**");
    }

    #[test]
    fn leaves_complete_markdown_untouched() {
        for md in [
            "alpha\n\nbeta\n\ngamma",
            "This is **bold** and *italic* and `code`.",
            "- item one\n- item two\n",
            "***\n",
            "a * b",
        ] {
            assert_eq!(repair(md), md, "changed: {md:?}");
        }
    }

    #[test]
    fn empty_input_is_a_no_op() {
        assert_eq!(repair(""), "");
    }

    #[test]
    fn closer_goes_before_trailing_newline() {
        assert_eq!(repair("**bold\n"), "**bold**\n");
    }

    #[test]
    fn closes_italic_markers() {
        assert_eq!(repair("an *emphasis"), "an *emphasis*");
        assert_eq!(repair("an _emphasis"), "an _emphasis_");
        assert_eq!(repair("a __strong"), "a __strong__");
    }

    #[test]
    fn word_internal_markers_are_ignored() {
        assert_eq!(repair("snake_case_name"), "snake_case_name");
        assert_eq!(repair("2*3*4"), "2*3*4");
    }

    #[test]
    fn closes_bold_italic() {
        assert_eq!(repair("very ***important"), "very ***important***");
    }

    #[test]
    fn closes_inline_code_and_strikethrough() {
        assert_eq!(repair("run `cargo"), "run `cargo`");
        assert_eq!(repair("~~gone"), "~~gone~~");
    }

    #[test]
    fn closes_block_math_on_own_line() {
        assert_eq!(repair("$$\nx^2"), "$$\nx^2\n$$");
        assert_eq!(repair("$$x^2"), "$$x^2$$");
    }

    #[test]
    fn incomplete_link_gets_placeholder() {
        assert_eq!(
            repair("see [the docs](https://exa"),
            format!("see [the docs]({INCOMPLETE_LINK_URL})")
        );
        assert_eq!(
            repair("see [the do"),
            format!("see [the do]({INCOMPLETE_LINK_URL})")
        );
    }

    #[test]
    fn incomplete_image_is_dropped() {
        assert_eq!(repair("pic: ![alt](https://img"), "pic: ");
        assert_eq!(repair("pic: ![al"), "pic: ");
    }

    #[test]
    fn unclosed_fence_is_left_alone() {
        let md = "```rust\nlet x = **y";
        assert_eq!(repair(md), md);
    }

    #[test]
    fn markers_inside_closed_fence_are_ignored() {
        let md = "```\n**not bold\n```\n";
        assert_eq!(repair(md), md);
    }

    #[test]
    fn setext_ambiguity_is_protected() {
        assert_eq!(repair("Title\n-"), "Title\n-\u{200B}");
        assert_eq!(repair("Title\n---"), "Title\n---");
    }

    #[test]
    fn list_bullets_are_not_emphasis() {
        assert_eq!(repair("* item"), "* item");
    }

    #[test]
    fn options_can_disable_rules() {
        let opts = RepairOptions {
            emphasis: false,
            ..Default::default()
        };
        assert_eq!(repair_with("**bold", &opts), "**bold");
    }

    #[test]
    fn output_never_shorter_without_images() {
        let md = "## Heading with **bold and `code";
        let fixed = repair(md);
        assert!(fixed.starts_with(md));
        assert!(fixed.len() > md.len());
    }
}
