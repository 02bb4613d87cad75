//! Terminal output helpers. Everything here writes to stderr so rendered
//! output on stdout can be piped.

use mdforge_markdown::RenderStats;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";

/// Check if the terminal supports color output.
fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        eprintln!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        eprintln!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

/// One row per stream step, right-aligned counters.
pub fn stats_table(steps: &[RenderStats]) -> String {
    const HEADERS: [&str; 5] = ["step", "blocks", "prefix", "suffix", "parsed"];

    let rows: Vec<[String; 5]> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| {
            [
                i.to_string(),
                s.blocks.to_string(),
                s.reused_prefix.to_string(),
                s.reused_suffix.to_string(),
                s.parsed.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: [&str; 5]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:>width$}"))
            .collect();
        format!("{}\n", padded.join("  "))
    };

    let mut out = line(HEADERS);
    for row in &rows {
        out.push_str(&line([&row[0], &row[1], &row[2], &row[3], &row[4]]));
    }
    let parsed: usize = steps.iter().map(|s| s.parsed).sum();
    let blocks: usize = steps.iter().map(|s| s.blocks).sum();
    out.push_str(&format!("parsed {parsed} of {blocks} blocks across {} steps\n", steps.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_every_step() {
        let steps = [
            RenderStats {
                blocks: 1,
                parsed: 1,
                ..Default::default()
            },
            RenderStats {
                blocks: 12,
                reused_prefix: 11,
                parsed: 1,
                ..Default::default()
            },
        ];
        let table = stats_table(&steps);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("parsed"));
        assert!(lines[2].contains("11"));
        assert_eq!(lines[3], "parsed 2 of 13 blocks across 2 steps");
    }
}
