//! Rewrites LaTeX-style `\(..\)` and `\[..\]` math delimiters into the
//! dollar forms the math grammar understands. Code is left untouched.

fn preceding_backslashes(bytes: &[u8], index: usize) -> usize {
    bytes[..index].iter().rev().take_while(|&&b| b == b'\\').count()
}

fn is_delimiter(bytes: &[u8], index: usize, next: u8) -> bool {
    bytes.get(index) == Some(&b'\\')
        && bytes.get(index + 1) == Some(&next)
        && preceding_backslashes(bytes, index) % 2 == 0
}

fn find_closing(bytes: &[u8], from: usize, close: u8) -> Option<usize> {
    (from..bytes.len().saturating_sub(1)).find(|&i| is_delimiter(bytes, i, close))
}

fn is_line_start(bytes: &[u8], index: usize) -> bool {
    index == 0 || bytes[index - 1] == b'\n'
}

fn fence_at(bytes: &[u8], index: usize) -> Option<(u8, usize)> {
    let marker = *bytes.get(index)?;
    if marker != b'`' && marker != b'~' {
        return None;
    }
    let len = bytes[index..].iter().take_while(|&&b| b == marker).count();
    (len >= 3).then_some((marker, len))
}

fn is_indented_code_line(bytes: &[u8], index: usize) -> bool {
    is_line_start(bytes, index)
        && (bytes.get(index) == Some(&b'\t') || bytes[index..].starts_with(b"    "))
}

fn run_length(bytes: &[u8], index: usize, byte: u8) -> usize {
    bytes[index..].iter().take_while(|&&b| b == byte).count()
}

/// Rewrite `\(x\)` to `$x$` and `\[x\]` to a `$$` display block, skipping
/// fenced code, indented code and inline code spans.
pub fn normalize_latex_delimiters(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut fence: Option<(u8, usize)> = None;
    let mut inline_ticks: Option<usize> = None;
    let mut i = 0;

    while i < bytes.len() {
        if fence.is_none() && inline_ticks.is_none() && is_indented_code_line(bytes, i) {
            let end = input[i..].find('\n').map_or(input.len(), |n| i + n + 1);
            out.push_str(&input[i..end]);
            i = end;
            continue;
        }

        if inline_ticks.is_none() && is_line_start(bytes, i) {
            if let Some((marker, len)) = fence_at(bytes, i) {
                match fence {
                    None => fence = Some((marker, len)),
                    Some((open, open_len)) if open == marker && len >= open_len => fence = None,
                    Some(_) => {}
                }
                let end = input[i..].find('\n').map_or(input.len(), |n| i + n + 1);
                out.push_str(&input[i..end]);
                i = end;
                continue;
            }
        }

        if fence.is_none() {
            match inline_ticks {
                None if bytes[i] == b'`' => {
                    let ticks = run_length(bytes, i, b'`');
                    out.push_str(&input[i..i + ticks]);
                    inline_ticks = Some(ticks);
                    i += ticks;
                    continue;
                }
                Some(open) => {
                    if bytes[i] == b'`' && run_length(bytes, i, b'`') >= open {
                        out.push_str(&input[i..i + open]);
                        inline_ticks = None;
                        i += open;
                        continue;
                    }
                    push_char(&mut out, input, &mut i);
                    continue;
                }
                None => {}
            }

            if is_delimiter(bytes, i, b'(') {
                if let Some(close) = find_closing(bytes, i + 2, b')') {
                    out.push('$');
                    out.push_str(&input[i + 2..close]);
                    out.push('$');
                    i = close + 2;
                    continue;
                }
            }
            if is_delimiter(bytes, i, b'[') {
                if let Some(close) = find_closing(bytes, i + 2, b']') {
                    let inner = &input[i + 2..close];
                    out.push_str("$$");
                    if !inner.starts_with('\n') {
                        out.push('\n');
                    }
                    out.push_str(inner);
                    if !inner.ends_with('\n') {
                        out.push('\n');
                    }
                    out.push_str("$$");
                    i = close + 2;
                    continue;
                }
            }
        }

        push_char(&mut out, input, &mut i);
    }
    out
}

fn push_char(out: &mut String, input: &str, i: &mut usize) {
    if let Some(c) = input[*i..].chars().next() {
        out.push(c);
        *i += c.len_utf8();
    } else {
        *i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_inline_and_display() {
        assert_eq!(normalize_latex_delimiters(r"area \(\pi r^2\)"), r"area $\pi r^2$");
        assert_eq!(
            normalize_latex_delimiters(r"\[E = mc^2\]"),
            "$$\nE = mc^2\n$$"
        );
    }

    #[test]
    fn escaped_delimiters_are_kept() {
        let input = r"literal \\(not math\\)";
        assert_eq!(normalize_latex_delimiters(input), input);
    }

    #[test]
    fn code_is_untouched() {
        let fenced = "```\n\\(x\\)\n```\n";
        assert_eq!(normalize_latex_delimiters(fenced), fenced);
        let inline = r"use `\(x\)` here";
        assert_eq!(normalize_latex_delimiters(inline), inline);
        let indented = "    \\(x\\)\n";
        assert_eq!(normalize_latex_delimiters(indented), indented);
    }

    #[test]
    fn unclosed_delimiter_is_left_alone() {
        let input = r"open \(x + y";
        assert_eq!(normalize_latex_delimiters(input), input);
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(normalize_latex_delimiters("héllo \\(α\\) ✓"), "héllo $α$ ✓");
    }
}
