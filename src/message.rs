//! Interrupt messages and the packed command word.
//!
//! Foreign threads talk to the worker exclusively through fixed-size
//! [`InterruptMessage`] records written to the wakeup pipe. The `data` field
//! of a subscriber-bound message is a [`CommandWord`]:
//!
//! ```text
//! bits  [0..15]   event bits (IN|OUT, for SET_MASK)
//! bits  [16..31]  token count (for RETURN_TOKEN)
//! bits  [32..39]  command tag
//! bit   [40]      LISTENING
//! bit   [41]      SIGNAL_SOCKET
//! ```
//!
//! Two sentinel ids bypass command decoding: [`TIMER_ID`] updates the timer
//! queue with `data` as the deadline, and [`SHUTDOWN_ID`] terminates the
//! worker.

use crate::events::EventMask;
use crate::port::Port;

/// Sentinel id: `data` is a timer deadline (monotonic milliseconds) for
/// `port`; a deadline `<= 0` cancels the timer.
pub const TIMER_ID: i64 = -1;

/// Sentinel id: the worker exits after the current iteration.
pub const SHUTDOWN_ID: i64 = -2;

/// Largest write the OS performs atomically on a pipe (POSIX `PIPE_BUF`
/// lower bound).
pub(crate) const PIPE_ATOMIC_LIMIT: usize = 512;

/// One fixed-size control record on the wakeup channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptMessage {
    /// Sentinel id, or a subscriber handle carried as an integer.
    pub id: i64,
    /// Destination port for replies.
    pub port: Port,
    /// Command word or timer deadline.
    pub data: i64,
}

impl InterruptMessage {
    /// Fixed wire size of one message.
    pub const WIRE_SIZE: usize = 24;

    pub(crate) fn to_wire(self) -> [u8; Self::WIRE_SIZE] {
        let mut bytes = [0u8; Self::WIRE_SIZE];
        bytes[0..8].copy_from_slice(&self.id.to_ne_bytes());
        bytes[8..16].copy_from_slice(&self.port.to_ne_bytes());
        bytes[16..24].copy_from_slice(&self.data.to_ne_bytes());
        bytes
    }

    pub(crate) fn from_wire(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), Self::WIRE_SIZE);
        let field = |range: core::ops::Range<usize>| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[range]);
            i64::from_ne_bytes(buf)
        };
        InterruptMessage {
            id: field(0..8),
            port: field(8..16),
            data: field(16..24),
        }
    }
}

// Concurrent writers stay lock-free only while one message fits in a single
// atomic pipe write.
const _: () = assert!(InterruptMessage::WIRE_SIZE < PIPE_ATOMIC_LIMIT);

const EVENT_BITS: i64 = 0xffff;
const TOKEN_SHIFT: u32 = 16;
const TOKEN_BITS: i64 = 0xffff;
const COMMAND_SHIFT: u32 = 32;
const COMMAND_BITS: i64 = 0xff;
const LISTENING_BIT: u32 = 40;
const SIGNAL_SOCKET_BIT: u32 = 41;

/// Subscriber commands carried in the command word's tag field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Replace the subscriber's requested event bits.
    SetMask = 1,
    /// Remove the subscriber; destroy the descriptor when it was the last.
    Close = 2,
    /// Half-close the descriptor for reads.
    ShutdownRead = 3,
    /// Half-close the descriptor for writes.
    ShutdownWrite = 4,
    /// Credit tokens back to the subscriber.
    ReturnToken = 5,
}

impl Command {
    fn from_tag(tag: u8) -> Option<Command> {
        match tag {
            1 => Some(Command::SetMask),
            2 => Some(Command::Close),
            3 => Some(Command::ShutdownRead),
            4 => Some(Command::ShutdownWrite),
            5 => Some(Command::ReturnToken),
            _ => None,
        }
    }
}

/// Builder and decoder for the packed `data` word of subscriber messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandWord(i64);

impl CommandWord {
    /// Starts a word carrying `command` and nothing else.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        CommandWord((command as i64) << COMMAND_SHIFT)
    }

    /// Reinterprets a received `data` word.
    #[must_use]
    pub const fn from_bits(bits: i64) -> Self {
        CommandWord(bits)
    }

    /// Sets the requested event bits (`SET_MASK`).
    #[must_use]
    pub const fn with_events(self, events: EventMask) -> Self {
        CommandWord((self.0 & !EVENT_BITS) | events.bits() as i64)
    }

    /// Sets the token count (`RETURN_TOKEN`).
    #[must_use]
    pub const fn with_tokens(self, count: u16) -> Self {
        CommandWord((self.0 & !(TOKEN_BITS << TOKEN_SHIFT)) | ((count as i64) << TOKEN_SHIFT))
    }

    /// Marks the descriptor as a shared listening socket.
    #[must_use]
    pub const fn listening(self) -> Self {
        CommandWord(self.0 | (1 << LISTENING_BIT))
    }

    /// Marks the descriptor as the process signal socket.
    #[must_use]
    pub const fn signal_socket(self) -> Self {
        CommandWord(self.0 | (1 << SIGNAL_SOCKET_BIT))
    }

    /// The packed word, ready for [`InterruptMessage::data`].
    #[must_use]
    pub const fn bits(self) -> i64 {
        self.0
    }

    /// Decodes the command tag; `None` for a malformed word.
    #[must_use]
    pub fn command(self) -> Option<Command> {
        Command::from_tag(((self.0 >> COMMAND_SHIFT) & COMMAND_BITS) as u8)
    }

    /// The requested event bits.
    #[must_use]
    pub fn events(self) -> EventMask {
        EventMask::from_bits((self.0 & EVENT_BITS) as u8)
    }

    /// The token count.
    #[must_use]
    pub const fn token_count(self) -> u16 {
        ((self.0 >> TOKEN_SHIFT) & TOKEN_BITS) as u16
    }

    /// Whether the LISTENING flag is set.
    #[must_use]
    pub const fn is_listening(self) -> bool {
        self.0 & (1 << LISTENING_BIT) != 0
    }

    /// Whether the SIGNAL_SOCKET flag is set.
    #[must_use]
    pub const fn is_signal_socket(self) -> bool {
        self.0 & (1 << SIGNAL_SOCKET_BIT) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_round_trip() {
        let msg = InterruptMessage {
            id: -2,
            port: 0x1234_5678_9abc,
            data: i64::MIN + 7,
        };
        let decoded = InterruptMessage::from_wire(&msg.to_wire());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn command_word_fields_do_not_overlap() {
        let word = CommandWord::new(Command::ReturnToken)
            .with_events(EventMask::IN.add(EventMask::OUT))
            .with_tokens(u16::MAX)
            .listening()
            .signal_socket();

        assert_eq!(word.command(), Some(Command::ReturnToken));
        assert_eq!(word.events(), EventMask::IN.add(EventMask::OUT));
        assert_eq!(word.token_count(), u16::MAX);
        assert!(word.is_listening());
        assert!(word.is_signal_socket());
    }

    #[test]
    fn bare_command_word_has_empty_fields() {
        let word = CommandWord::new(Command::Close);
        assert_eq!(word.command(), Some(Command::Close));
        assert!(word.events().is_empty());
        assert_eq!(word.token_count(), 0);
        assert!(!word.is_listening());
        assert!(!word.is_signal_socket());
    }

    #[test]
    fn malformed_tag_decodes_to_none() {
        assert_eq!(CommandWord::from_bits(0).command(), None);
        assert_eq!(CommandWord::from_bits(0xab << 32).command(), None);
    }

    #[test]
    fn all_tags_round_trip() {
        for command in [
            Command::SetMask,
            Command::Close,
            Command::ShutdownRead,
            Command::ShutdownWrite,
            Command::ReturnToken,
        ] {
            assert_eq!(CommandWord::new(command).command(), Some(command));
        }
    }
}
