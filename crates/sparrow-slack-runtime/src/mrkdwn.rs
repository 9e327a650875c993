//! Deterministic markdown to Slack mrkdwn translation.
//!
//! The pass is idempotent: already-converted text survives a second
//! application unchanged. Fenced code blocks are passed through verbatim
//! apart from dropping the language tag on the opening fence.

use std::sync::OnceLock;

use regex::Regex;

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex"))
}

fn strike_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"~~(.+?)~~").expect("strike regex"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").expect("heading regex"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("link regex"))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)\*\s+(.*)$").expect("bullet regex"))
}

/// Renders model output as Slack mrkdwn.
pub fn render_mrkdwn(input: &str) -> String {
    let mut out_lines = Vec::new();
    let mut in_fence = false;

    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            if in_fence {
                in_fence = false;
                out_lines.push(line.to_string());
            } else {
                in_fence = true;
                // Slack renders the language tag as literal text; drop it.
                let indent = &line[..line.len() - trimmed.len()];
                out_lines.push(format!("{indent}```"));
            }
            continue;
        }
        if in_fence {
            out_lines.push(line.to_string());
            continue;
        }

        out_lines.push(render_line(line));
    }

    let mut rendered = out_lines.join("\n");
    if input.ends_with('\n') {
        rendered.push('\n');
    }
    rendered
}

fn render_line(line: &str) -> String {
    if let Some(captures) = heading_re().captures(line) {
        let text = finish_line(captures[2].trim_end().to_string());
        return if text.is_empty() {
            String::new()
        } else if is_wrapped_in_bold(&text) {
            text
        } else {
            format!("*{text}*")
        };
    }

    let bulleted = bullet_re().replace(line, "${1}- ${2}");
    finish_line(bulleted.into_owned())
}

fn finish_line(line: String) -> String {
    let bolded = bold_re().replace_all(&line, "*$1*");
    let striked = strike_re().replace_all(&bolded, "~$1~");
    link_re().replace_all(&striked, "<$2|$1>").into_owned()
}

fn is_wrapped_in_bold(text: &str) -> bool {
    text.len() > 2 && text.starts_with('*') && text.ends_with('*') && !text.starts_with("**")
}

#[cfg(test)]
mod tests {
    use super::render_mrkdwn;

    #[test]
    fn unit_bold_and_strike_are_translated() {
        assert_eq!(render_mrkdwn("**hi** and ~~bye~~"), "*hi* and ~bye~");
    }

    #[test]
    fn unit_headings_become_bold_lines() {
        assert_eq!(render_mrkdwn("# Release Notes"), "*Release Notes*");
        assert_eq!(render_mrkdwn("### Fixes"), "*Fixes*");
    }

    #[test]
    fn unit_links_use_slack_angle_syntax() {
        assert_eq!(
            render_mrkdwn("see [the docs](https://example.com/docs)"),
            "see <https://example.com/docs|the docs>"
        );
    }

    #[test]
    fn unit_star_bullets_are_normalized() {
        assert_eq!(render_mrkdwn("* first\n* second"), "- first\n- second");
    }

    #[test]
    fn unit_code_fences_drop_language_and_keep_content() {
        let input = "```rust\nlet x = **not bold**;\n```";
        assert_eq!(render_mrkdwn(input), "```\nlet x = **not bold**;\n```");
    }

    #[test]
    fn functional_formatter_is_idempotent() {
        let inputs = [
            "# Title\n\n**bold** text with [a link](https://example.com)\n* item one\n* item two",
            "plain text, nothing to do",
            "```python\nprint('**raw**')\n```\noutside **bold**",
            "*already slack bold* and _italic_ and ~struck~",
            "# **Bold Heading**",
        ];
        for input in inputs {
            let once = render_mrkdwn(input);
            let twice = render_mrkdwn(&once);
            assert_eq!(once, twice, "formatter must be idempotent for {input:?}");
        }
    }

    #[test]
    fn regression_trailing_newline_is_preserved() {
        assert_eq!(render_mrkdwn("hello\n"), "hello\n");
        assert_eq!(render_mrkdwn("hello"), "hello");
    }
}
