//! Display projection: transcript → chat bubbles.
//!
//! [`project`] is a pure function of the transcript. Front ends re-run it
//! after every effect and never keep their own copy of turn content; a bubble
//! carries the transcript index it was projected from, and edits go back to
//! the controller by that index.
//!
//! Assistant text passes through [`typeset_reply`] on the way out. The stored
//! turn keeps exactly what the model (or the editing user) wrote.

use crate::transcript::{Role, Transcript};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Label used for user bubbles.
pub const USER_LABEL: &str = "User";

/// One rendered chat bubble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bubble {
    /// Transcript index this bubble was projected from.
    pub index: usize,
    pub role: Role,
    pub speaker: String,
    /// `None` for image-only turns.
    pub text: Option<String>,
    pub image_count: usize,
    /// Only assistant bubbles offer an edit affordance.
    pub editable: bool,
}

/// Project every non-system turn, in transcript order.
pub fn project(transcript: &Transcript, assistant_name: &str) -> Vec<Bubble> {
    transcript
        .turns()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.role != Role::System)
        .map(|(index, turn)| {
            let editable = turn.role == Role::Assistant;
            let text = turn.content.display_text();
            Bubble {
                index,
                role: turn.role,
                speaker: if editable {
                    assistant_name.to_string()
                } else {
                    USER_LABEL.to_string()
                },
                text: if editable {
                    text.map(|t| typeset_reply(&t))
                } else {
                    text
                },
                image_count: turn.content.image_count(),
                editable,
            }
        })
        .collect()
}

/// Prepare assistant text for the math/markup typesetter.
///
/// Rules (applied in order):
/// 1. Strip an outer markdown fence wrapping the whole reply
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of blank lines down to one
/// 5. Rewrite `\( \)` and `\[ \]` math delimiters as `$ $` and `$$ $$`
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim
pub fn typeset_reply(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_math_delimiters(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\[(.+?)\\\]").unwrap());
static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\((.+?)\\\)").unwrap());

fn normalise_math_delimiters(input: &str) -> String {
    let s = RE_DISPLAY_MATH.replace_all(input, "$$$$${1}$$$$");
    RE_INLINE_MATH.replace_all(&s, "$$${1}$$").to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Content, Part, Turn};

    fn transcript() -> Transcript {
        let mut t = Transcript::new("sys");
        t.append(Turn::user(Content::Parts(vec![Part::Image {
            encoded_value: "AAAA".into(),
            mime_type: "image/png".into(),
        }])))
        .unwrap();
        t.append(Turn::assistant("A bracket.\r\n\r\n\r\nSee \\(r = 5\\) mm."))
            .unwrap();
        t
    }

    #[test]
    fn projection_skips_system_and_keeps_indices() {
        let bubbles = project(&transcript(), "Gaudi");
        assert_eq!(bubbles.len(), 2);
        assert_eq!(bubbles[0].index, 1);
        assert_eq!(bubbles[0].speaker, "User");
        assert_eq!(bubbles[0].text, None);
        assert_eq!(bubbles[0].image_count, 1);
        assert!(!bubbles[0].editable);

        assert_eq!(bubbles[1].index, 2);
        assert_eq!(bubbles[1].speaker, "Gaudi");
        assert!(bubbles[1].editable);
        assert_eq!(
            bubbles[1].text.as_deref(),
            Some("A bracket.\n\nSee $r = 5$ mm.")
        );
    }

    #[test]
    fn projection_is_repeatable() {
        let t = transcript();
        assert_eq!(project(&t, "Gaudi"), project(&t, "Gaudi"));
    }

    #[test]
    fn display_math_is_rewritten() {
        assert_eq!(
            typeset_reply("Area:\n\\[A = \\pi r^2\\]"),
            "Area:\n$$A = \\pi r^2$$"
        );
    }

    #[test]
    fn outer_fence_is_stripped() {
        assert_eq!(typeset_reply("```markdown\n**M8** bolt\n```"), "**M8** bolt");
    }

    #[test]
    fn invisible_chars_are_removed() {
        assert_eq!(typeset_reply("\u{FEFF}Ø12\u{200B} H7"), "Ø12 H7");
    }
}
