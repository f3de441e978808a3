/// Classification of operator comments on pull requests.
use std::fmt;

/// What a comment asks the service to do.
///
/// `Squash` and `Merge` are directives: the whole comment must be the command
/// token, so there is no ambiguity about intent. `Approval` is a signal: it
/// may appear anywhere inside a longer comment, and many comments on the same
/// PR can carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Squash,
    Merge,
    Approval,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Squash => write!(f, "squash"),
            Command::Merge => write!(f, "merge"),
            Command::Approval => write!(f, "approval"),
        }
    }
}

/// Classify a comment body.
///
/// Returns `None` for comments that carry neither a directive nor an approval
/// signal; callers treat that as a benign no-op, not an error.
pub fn classify_comment(body: &str) -> Option<Command> {
    let trimmed = body.trim();
    if trimmed.eq_ignore_ascii_case("squash") {
        return Some(Command::Squash);
    }
    if trimmed.eq_ignore_ascii_case("merge") {
        return Some(Command::Merge);
    }
    if contains_approval(body) {
        return Some(Command::Approval);
    }
    None
}

/// True when the text contains a "+1" not immediately followed by another
/// digit, so "+10" is not an approval. The ":+1:" thumbs-up shortcode is
/// matched by the same rule (the character after the "1" is a colon).
fn contains_approval(body: &str) -> bool {
    let bytes = body.as_bytes();
    let mut start = 0;
    while let Some(pos) = body[start..].find("+1") {
        let after = start + pos + 2;
        match bytes.get(after) {
            Some(c) if c.is_ascii_digit() => {}
            _ => return true,
        }
        start = after;
    }
    false
}
