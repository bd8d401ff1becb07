//! Shell-style tokenizer for committed input lines.
//!
//! Examples:
//!   `net stats eth0`            -> ["net", "stats", "eth0"]
//!   `echo "hello world"`        -> ["echo", "hello world"]
//!   `set motd "a \"quoted\" b"` -> ["set", "motd", "a \"quoted\" b"]
//!
//! Whitespace (space, tab) separates tokens. A token *beginning* with a
//! double or single quote runs to the matching close quote; a quote in the
//! middle of a token is literal. Inside a quoted region a backslash
//! escapes the next character. An unterminated quote extends to the end of
//! the line.

use crate::error::{ShellError, ShellResult};

/// Maximum number of arguments a single line may split into.
pub const ARG_CAP: usize = 32;

pub fn split_line(line: &str) -> ShellResult<Vec<String>> {
    let mut args: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quote: Option<char> = None;
    let mut escaped = false;

    let push_tok =
        |quoted: bool, buf: &mut String, args: &mut Vec<String>| -> ShellResult<()> {
            if quoted || !buf.is_empty() {
                if args.len() == ARG_CAP {
                    return Err(ShellError::InvalidArgument(format!(
                        "more than {ARG_CAP} arguments"
                    )));
                }
                args.push(std::mem::take(buf));
            }
            Ok(())
        };

    for ch in line.chars() {
        match in_quote {
            Some(q) => {
                if escaped {
                    buf.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    // Close quote ends the token even when empty ("" is an
                    // empty argument).
                    push_tok(true, &mut buf, &mut args)?;
                    in_quote = None;
                } else {
                    buf.push(ch);
                }
            }
            None => match ch {
                ' ' | '\t' => push_tok(false, &mut buf, &mut args)?,
                '"' | '\'' if buf.is_empty() => in_quote = Some(ch),
                _ => buf.push(ch),
            },
        }
    }
    push_tok(in_quote.is_some(), &mut buf, &mut args)?;

    Ok(args)
}
