//! Byte-driven line editor shared by every transport.
//!
//! Usage pattern (pseudo):
//!   let mut ed = LineEditor::new("embsh> ", registry, telnet_mode);
//!   loop {
//!       let b = read_one_byte(...);
//!       let step = ed.feed(b);
//!       write(stream, &step.echo)?;
//!       match step.event {
//!           Some(EditEvent::Line(line)) => { /* execute, then re-prompt */ }
//!           Some(EditEvent::Eof)        => break,
//!           None                        => {}
//!       }
//!   }
//!
//! The editor is a deterministic automaton: every byte is filtered through
//! the telnet IAC machine (telnet mode only) and the ANSI ESC machine, and
//! whatever survives is applied to the line buffer. Echo bytes are
//! produced here so all transports render identically. Bytes are treated
//! as single columns (ASCII); editing is append/backspace at end-of-line.

use crate::input::history::History;
use crate::registry::Registry;
use crate::util::telnet::IacFilter;
use std::sync::Arc;

/// Line buffer size; one byte stays reserved, so a line holds at most
/// `LINE_CAP - 1` characters.
pub const LINE_CAP: usize = 256;

const LINE_MAX: usize = LINE_CAP - 1;

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BS: u8 = 0x08;
const DEL: u8 = 0x7F;
const ESC: u8 = 0x1B;

/// Events produced by the editor as it processes input.
#[derive(Debug, PartialEq, Eq)]
pub enum EditEvent {
    /// A full, non-empty line was committed; execute it and re-prompt.
    Line(String),
    /// Ctrl-D on an empty line; the session should wind down.
    Eof,
}

/// Outcome of feeding one byte: bytes to echo back to the peer, and at
/// most one event.
#[derive(Debug, Default)]
pub struct EditStep {
    pub echo: Vec<u8>,
    pub event: Option<EditEvent>,
}

impl EditStep {
    fn echo_bytes(&mut self, bytes: &[u8]) {
        self.echo.extend_from_slice(bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscState {
    None,
    Esc,
    Bracket,
}

pub struct LineEditor {
    prompt: String,
    buf: String,
    history: History,
    esc: EscState,
    iac: Option<IacFilter>,
    registry: Arc<Registry>,
    telnet_mode: bool,
    /// Set after a committed `\r` in telnet mode: one following `\n` or
    /// NUL belongs to the same Enter.
    swallow_nl: bool,
}

impl LineEditor {
    pub fn new(prompt: impl Into<String>, registry: Arc<Registry>, telnet_mode: bool) -> Self {
        Self {
            prompt: prompt.into(),
            buf: String::new(),
            history: History::new(),
            esc: EscState::None,
            iac: telnet_mode.then(IacFilter::new),
            registry,
            telnet_mode,
            swallow_nl: false,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Current (uncommitted) line content.
    pub fn buffer(&self) -> &str {
        &self.buf
    }

    /// Process one input byte from the transport.
    pub fn feed(&mut self, byte: u8) -> EditStep {
        let mut step = EditStep::default();

        let byte = match &mut self.iac {
            Some(filter) => match filter.push(byte) {
                Some(b) => b,
                None => return step,
            },
            None => byte,
        };

        if self.swallow_nl {
            self.swallow_nl = false;
            if byte == b'\n' || byte == 0 {
                return step;
            }
        }

        match self.esc {
            EscState::None => {
                if byte == ESC {
                    self.esc = EscState::Esc;
                    return step;
                }
            }
            EscState::Esc => {
                self.esc = if byte == b'[' {
                    EscState::Bracket
                } else {
                    EscState::None
                };
                return step;
            }
            EscState::Bracket => {
                self.esc = EscState::None;
                match byte {
                    b'A' => self.history_up(&mut step),
                    b'B' => self.history_down(&mut step),
                    b'C' | b'D' => {} // cursor movement reserved
                    _ => {}
                }
                return step;
            }
        }

        self.keystroke(byte, &mut step);
        step
    }

    fn keystroke(&mut self, byte: u8, step: &mut EditStep) {
        match byte {
            CTRL_C => {
                step.echo_bytes(b"^C\r\n");
                self.buf.clear();
                self.history.stop_browsing();
                step.echo_bytes(self.prompt.as_bytes());
            }
            CTRL_D => {
                if self.buf.is_empty() {
                    step.echo_bytes(b"\r\nBye.\r\n");
                    step.event = Some(EditEvent::Eof);
                }
            }
            BS | DEL => {
                if !self.buf.is_empty() {
                    self.buf.pop();
                    step.echo_bytes(b"\x08 \x08");
                }
            }
            b'\t' => self.complete(step),
            b'\r' | b'\n' => {
                step.echo_bytes(b"\r\n");
                if self.telnet_mode && byte == b'\r' {
                    self.swallow_nl = true;
                }
                self.history.stop_browsing();
                if self.buf.is_empty() {
                    step.echo_bytes(self.prompt.as_bytes());
                } else {
                    let line = std::mem::take(&mut self.buf);
                    self.history.push(&line);
                    step.event = Some(EditEvent::Line(line));
                }
            }
            0x20..=0x7E => {
                if self.buf.len() < LINE_MAX {
                    self.buf.push(byte as char);
                    step.echo_bytes(&[byte]);
                }
                // Overflow drops the byte silently.
            }
            _ => {}
        }
    }

    /// Erase the rendered line and replace the buffer with `entry`.
    fn redraw_as(&mut self, entry: String, step: &mut EditStep) {
        for _ in 0..self.buf.len() {
            step.echo_bytes(b"\x08 \x08");
        }
        self.buf = entry;
        step.echo_bytes(self.buf.as_bytes());
    }

    fn history_up(&mut self, step: &mut EditStep) {
        if let Some(entry) = self.history.up() {
            self.redraw_as(entry, step);
        }
    }

    fn history_down(&mut self, step: &mut EditStep) {
        if let Some(entry) = self.history.down() {
            self.redraw_as(entry, step);
        }
    }

    fn complete(&mut self, step: &mut EditStep) {
        let completion = self.registry.complete(&self.buf);
        match completion.matches.len() {
            0 => {}
            1 => {
                if completion.common.len() + 1 > LINE_MAX {
                    return;
                }
                let mut line = completion.common;
                line.push(' ');
                self.redraw_as(line, step);
            }
            _ => {
                step.echo_bytes(b"\r\n");
                for name in &completion.matches {
                    step.echo_bytes(name.as_bytes());
                    step.echo_bytes(b"  ");
                }
                step.echo_bytes(b"\r\n");
                step.echo_bytes(self.prompt.as_bytes());
                let mut common = completion.common;
                common.truncate(LINE_MAX);
                self.buf = common;
                step.echo_bytes(self.buf.as_bytes());
            }
        }
    }
}
