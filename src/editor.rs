use std::io::{self, BufRead, Read, Write};

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::session::Session;

/// Hard cap on one input line; reaching it completes the read.
pub const MAX_LINE: usize = 4096;

/// Appended to the buffer when TAB submits the line.
pub const COMPLETION_MARKER: char = '?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Normal,
    EndOfInput,
}

/// Puts stdin into character-at-a-time mode without echo. The saved
/// attributes are restored on drop, so no exit path can leave the terminal
/// raw.
struct RawMode {
    saved: Termios,
}

impl RawMode {
    fn enter() -> nix::Result<RawMode> {
        let saved = termios::tcgetattr(io::stdin())?;
        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw)?;
        Ok(RawMode { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved);
    }
}

/// Tracks partial receipt of the cursor-up sequence ESC `[` `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    Idle,
    Escape,
    Bracket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Byte swallowed as part of a (possibly partial) sequence.
    Consumed,
    /// Full cursor-up sequence just matched.
    Matched,
    /// Byte is ordinary input for the caller.
    Pass,
}

impl Decoder {
    fn advance(&mut self, byte: u8) -> Step {
        match (*self, byte) {
            (Decoder::Idle, 0x1b) => {
                *self = Decoder::Escape;
                Step::Consumed
            }
            (Decoder::Escape, b'[') => {
                *self = Decoder::Bracket;
                Step::Consumed
            }
            (Decoder::Bracket, b'A') => {
                *self = Decoder::Idle;
                Step::Matched
            }
            (Decoder::Idle, _) => Step::Pass,
            _ => {
                *self = Decoder::Idle;
                Step::Pass
            }
        }
    }
}

/// Reads one line from the terminal, echoing and editing as it goes.
///
/// Handled keys: DEL erases the last byte, TAB appends the completion marker
/// and submits, cursor-up recalls the previous completed line, Ctrl-D ends
/// the session. When stdin is not a terminal the editor degrades to plain
/// buffered reads so the interpreter still works under a pipe.
pub fn read_line(session: &mut Session) -> io::Result<(String, Signal)> {
    let _raw = match RawMode::enter() {
        Ok(guard) => guard,
        Err(_) => return read_line_buffered(session),
    };

    let mut out = io::stdout().lock();
    let mut input = io::stdin().lock();
    let mut buf: Vec<u8> = Vec::new();
    let mut decoder = Decoder::Idle;

    loop {
        let mut byte = [0u8; 1];
        if input.read(&mut byte)? == 0 {
            return Ok((String::new(), Signal::EndOfInput));
        }
        let c = byte[0];

        match decoder.advance(c) {
            Step::Consumed => continue,
            Step::Matched => {
                while buf.pop().is_some() {
                    out.write_all(b"\x08 \x08")?;
                }
                buf.extend_from_slice(session.history_slot.as_bytes());
                out.write_all(session.history_slot.as_bytes())?;
                out.flush()?;
                continue;
            }
            Step::Pass => {}
        }

        match c {
            9 => {
                buf.push(COMPLETION_MARKER as u8);
                break;
            }
            127 => {
                if buf.pop().is_some() {
                    out.write_all(b"\x08 \x08")?;
                    out.flush()?;
                }
            }
            4 => return Ok((String::new(), Signal::EndOfInput)),
            b'\n' => {
                out.write_all(b"\n")?;
                out.flush()?;
                break;
            }
            _ => {
                out.write_all(&byte)?;
                out.flush()?;
                buf.push(c);
            }
        }
        if buf.len() >= MAX_LINE {
            break;
        }
    }

    let line = String::from_utf8_lossy(&buf).into_owned();
    session.history_slot = line.clone();
    Ok((line, Signal::Normal))
}

fn read_line_buffered(session: &mut Session) -> io::Result<(String, Signal)> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok((String::new(), Signal::EndOfInput));
    }
    let line = line.trim_end_matches('\n').to_string();
    session.history_slot = line.clone();
    Ok((line, Signal::Normal))
}
