//! Application-visible event mask bits.
//!
//! Every message the dispatcher posts to a port is a small bitmask built
//! from these bits. `IN`/`OUT` are also the only bits a subscriber may
//! request interest in; `ERROR`, `CLOSE`, and `DESTROYED` are produced by
//! the dispatcher itself.

/// Bitmask of dispatcher events.
///
/// Bit positions are part of the wire contract with the application:
/// `IN=0, OUT=1, ERROR=2, CLOSE=3, DESTROYED=4`, posted as `1 << bit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    /// The empty mask.
    pub const NONE: EventMask = EventMask(0);
    /// Data readable (or, on a listening socket, connection ready).
    pub const IN: EventMask = EventMask(1 << 0);
    /// Writable.
    pub const OUT: EventMask = EventMask(1 << 1);
    /// Fatal per-descriptor error; replaces data events.
    pub const ERROR: EventMask = EventMask(1 << 2);
    /// Peer closed (EOF observed).
    pub const CLOSE: EventMask = EventMask(1 << 3);
    /// The descriptor's dispatch state has been torn down.
    pub const DESTROYED: EventMask = EventMask(1 << 4);

    /// The bits a subscriber may request interest in.
    pub(crate) const IO: EventMask = EventMask(Self::IN.0 | Self::OUT.0);

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reconstructs a mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        EventMask(bits)
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit is shared with `other`.
    #[must_use]
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Combines masks.
    #[must_use]
    pub const fn add(self, other: EventMask) -> Self {
        EventMask(self.0 | other.0)
    }

    /// Removes bits.
    #[must_use]
    pub const fn remove(self, other: EventMask) -> Self {
        EventMask(self.0 & !other.0)
    }

    /// Keeps only bits shared with `other`.
    #[must_use]
    pub const fn intersect(self, other: EventMask) -> Self {
        EventMask(self.0 & other.0)
    }

    /// The mask as posted to application ports.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_match_wire_contract() {
        assert_eq!(EventMask::IN.bits(), 1 << 0);
        assert_eq!(EventMask::OUT.bits(), 1 << 1);
        assert_eq!(EventMask::ERROR.bits(), 1 << 2);
        assert_eq!(EventMask::CLOSE.bits(), 1 << 3);
        assert_eq!(EventMask::DESTROYED.bits(), 1 << 4);
    }

    #[test]
    fn add_remove_round_trip() {
        let mask = EventMask::IN.add(EventMask::OUT).add(EventMask::CLOSE);
        assert!(mask.contains(EventMask::IN));
        assert!(mask.contains(EventMask::OUT));
        assert!(mask.intersects(EventMask::CLOSE));

        let trimmed = mask.remove(EventMask::OUT);
        assert!(trimmed.contains(EventMask::IN));
        assert!(!trimmed.intersects(EventMask::OUT));
    }

    #[test]
    fn intersect_restricts_to_io() {
        let requested = EventMask::IN.add(EventMask::ERROR).add(EventMask::DESTROYED);
        assert_eq!(requested.intersect(EventMask::IO), EventMask::IN);
    }

    #[test]
    fn empty_mask_contains_nothing() {
        assert!(EventMask::NONE.is_empty());
        assert!(!EventMask::NONE.intersects(EventMask::IN));
        assert!(EventMask::IN.contains(EventMask::NONE));
    }
}
