//! SMTP response parser and status-line classifier.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyClass, ReplyCode};

/// Width of the `NNN ` / `NNN-` prefix on every reply line.
pub const STATUS_PREFIX_LEN: usize = 4;

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code = parse_code(first)
        .ok_or_else(|| Error::Protocol(format!("Invalid reply code: {first}")))?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        match line.get(STATUS_PREFIX_LEN..) {
            Some(text) => message.push(text.to_string()),
            None if line.len() == 3 => message.push(String::new()),
            None => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(code, message))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last line.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        Some(b' ') => true,
        Some(_) => false,
        // A bare "250" is a complete reply.
        None => line.len() == 3,
    }
}

/// Classifies a raw status line.
///
/// Anything without a leading three digit code is a failure.
#[must_use]
pub fn classify(line: &str) -> ReplyClass {
    parse_code(line).map_or(ReplyClass::Failure, ReplyCode::class)
}

fn parse_code(line: &str) -> Option<ReplyCode> {
    let digits = line.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(ReplyCode::new)
}
