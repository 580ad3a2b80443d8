//! Byte-level state machine for the client side of the NATS wire protocol.
//!
//! Only the operations that matter to the proxy are recognized: `PUB` and
//! `HPUB` (so their payloads can be skipped without interpretation) and
//! `CONNECT` (so the handshake can be decoded). Every other operation is an
//! opaque line closed by its terminator.

/// Operations the parser tracks beyond their control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Pub,
    Hpub,
    Connect,
}

impl Operation {
    pub fn keyword(self) -> &'static [u8] {
        match self {
            Operation::Pub => b"PUB",
            Operation::Hpub => b"HPUB",
            Operation::Connect => b"CONNECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// First byte of a new frame.
    #[default]
    Start,
    /// `matched` leading letters of the operation keyword have been seen.
    Keyword { op: Operation, matched: usize },
    /// Whitespace between the keyword and its argument.
    Spacing(Operation),
    /// Argument bytes starting at offset `start` of the current frame.
    Argument { op: Operation, start: usize },
    /// Payload bytes (plus the trailing CR LF) still to pass through.
    Payload { remaining: usize },
    /// Opaque line, waiting for its terminator.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The frame is still open.
    Continue,
    /// The frame is complete and may be flushed.
    Flush,
    /// A `CONNECT` line is complete; its argument starts at `start`.
    Handshake { start: usize },
}

/// Advances the state machine by one byte.
///
/// `line` holds every byte of the current frame so far, `byte` included as
/// its last element. Offsets carried in the returned state index into it.
pub fn transition(state: State, byte: u8, line: &[u8]) -> (State, Action) {
    match state {
        State::Payload { remaining } if remaining <= 1 => (State::Start, Action::Flush),
        State::Payload { remaining } => (
            State::Payload {
                remaining: remaining - 1,
            },
            Action::Continue,
        ),
        _ if byte == b'\n' => close_line(state, line),
        State::Start => match byte.to_ascii_uppercase() {
            b'P' => keyword_start(Operation::Pub),
            b'H' => keyword_start(Operation::Hpub),
            b'C' => keyword_start(Operation::Connect),
            _ => (State::Ignore, Action::Continue),
        },
        State::Keyword { op, matched } => {
            let keyword = op.keyword();
            let next = if matched == keyword.len() {
                if is_space(byte) {
                    State::Spacing(op)
                } else {
                    State::Ignore
                }
            } else if byte.eq_ignore_ascii_case(&keyword[matched]) {
                State::Keyword {
                    op,
                    matched: matched + 1,
                }
            } else {
                State::Ignore
            };
            (next, Action::Continue)
        }
        State::Spacing(op) if is_space(byte) => (State::Spacing(op), Action::Continue),
        State::Spacing(op) => (
            State::Argument {
                op,
                start: line.len() - 1,
            },
            Action::Continue,
        ),
        State::Argument { .. } | State::Ignore => (state, Action::Continue),
    }
}

fn keyword_start(op: Operation) -> (State, Action) {
    (State::Keyword { op, matched: 1 }, Action::Continue)
}

fn close_line(state: State, line: &[u8]) -> (State, Action) {
    match state {
        State::Argument {
            op: op @ (Operation::Pub | Operation::Hpub),
            start,
        } => match payload_size(op, argument(line, start)) {
            Some(size) => (
                State::Payload {
                    remaining: size.saturating_add(2),
                },
                Action::Continue,
            ),
            None => (State::Start, Action::Flush),
        },
        State::Argument {
            op: Operation::Connect,
            start,
        } => (State::Start, Action::Handshake { start }),
        _ => (State::Start, Action::Flush),
    }
}

/// Argument text of a control line, without its terminator.
pub fn argument(line: &[u8], start: usize) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n'))
        .map_or(0, |i| i + 1);
    line.get(start..end.max(start)).unwrap_or_default()
}

/// Declared payload size of a `PUB` or `HPUB` argument.
///
/// `PUB <subject> [reply] <size>` and `HPUB <subject> [reply] <hdr> <total>`
/// both end in the number of bytes that follow the control line.
pub fn payload_size(op: Operation, argument: &[u8]) -> Option<usize> {
    let fields: Vec<&[u8]> = argument
        .split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty())
        .collect();

    let min_fields = match op {
        Operation::Pub => 2,
        Operation::Hpub => 3,
        Operation::Connect => return None,
    };
    if fields.len() < min_fields {
        return None;
    }

    let size = fields.last()?;
    std::str::from_utf8(size).ok()?.parse().ok()
}

fn is_space(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}
