//! Plain-text sanitization for model replies.
//!
//! Assistant messages render as plain text in the client, so whatever
//! Markdown the model emits despite its instructions is flattened here
//! instead of leaking structural markup into the thread.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").unwrap());
static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\.\s+").unwrap());
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_~`]").unwrap());
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Flatten Markdown to plain text: fences unwrapped, headings stripped,
/// list markers normalized to `•` / `1)`, links spelled out, emphasis
/// markers dropped, runs of blank lines collapsed.
pub fn strip_markdown(input: &str) -> String {
    let s = FENCE_RE.replace_all(input, "$1");
    let s = HEADING_RE.replace_all(&s, "");
    let s = BULLET_RE.replace_all(&s, "\u{2022} ");
    let s = NUMBERED_RE.replace_all(&s, "${1}) ");
    let s = LINK_RE.replace_all(&s, "${1} (${2})");
    let s = EMPHASIS_RE.replace_all(&s, "");
    let s = BLANK_RUN_RE.replace_all(&s, "\n\n");
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let input = "These earbuds run about $25 shipped. Want me to check used ones too?";
        assert_eq!(strip_markdown(input), input);
    }

    #[test]
    fn fenced_blocks_are_unwrapped() {
        assert_eq!(strip_markdown("```\nhello world\n```"), "hello world");
        assert_eq!(strip_markdown("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        // Fence tag matching is case-insensitive.
        assert_eq!(strip_markdown("```JSON\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn headings_lose_their_hashes() {
        let out = strip_markdown("# Top picks\n\n## Budget\nAnker Soundcore");
        assert_eq!(out, "Top picks\n\nBudget\nAnker Soundcore");
    }

    #[test]
    fn bullet_markers_become_the_dot_glyph() {
        let out = strip_markdown("- first\n* second\n+ third");
        assert_eq!(out, "\u{2022} first\n\u{2022} second\n\u{2022} third");
    }

    #[test]
    fn numbered_lists_use_parens() {
        let out = strip_markdown("1. check the price\n2. compare shipping");
        assert_eq!(out, "1) check the price\n2) compare shipping");
    }

    #[test]
    fn links_are_spelled_out() {
        let out = strip_markdown("See [this listing](https://www.ebay.com/itm/123).");
        assert_eq!(out, "See this listing (https://www.ebay.com/itm/123).");
    }

    #[test]
    fn emphasis_and_inline_code_markers_vanish() {
        let out = strip_markdown("This is **really** a _great_ `deal`, ~trust~ me");
        assert_eq!(out, "This is really a great deal, trust me");
    }

    #[test]
    fn blank_line_runs_collapse_to_one() {
        let out = strip_markdown("first\n\n\n\nsecond");
        assert_eq!(out, "first\n\nsecond");
    }

    #[test]
    fn mixed_markup_flattens_in_one_pass() {
        let input = "# Results\n\n- **Anker Soundcore** at [eBay](https://ebay.com/itm/9) for `$25`\n\n\n1. Good battery";
        let out = strip_markdown(input);
        assert_eq!(
            out,
            "Results\n\n\u{2022} Anker Soundcore at eBay (https://ebay.com/itm/9) for $25\n\n1) Good battery"
        );
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(strip_markdown("\n\n  hello  \n\n"), "hello");
    }
}
