//! Redaction of command text before it reaches the log.

use std::borrow::Cow;

const MASK: &str = "'***'";

/// Replace every single-quoted literal in `command` with `'***'` when
/// `redact_literals` is set. Doubled quotes inside a literal are part of it.
/// An unterminated literal is masked up to the end of the text.
pub fn redact_command(command: &str, redact_literals: bool) -> Cow<'_, str> {
    if !redact_literals || !command.contains('\'') {
        return Cow::Borrowed(command);
    }

    let mut out = String::with_capacity(command.len());
    let mut chars = command.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            out.push(c);
            continue;
        }
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                }
                Some('\'') | None => break,
                Some(_) => {}
            }
        }
        out.push_str(MASK);
    }
    Cow::Owned(out)
}
