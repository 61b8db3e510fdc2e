//! Alternating sequence number.
//!
//! A transmitter alternates between [`SeqNr::First`] and [`SeqNr::Second`]
//! for every new frame on a channel, taking the token the receiver did not
//! accept last ([`SeqNr::unlike_cons_bit()`]).  A receiver accepts a frame only when its
//! sequence number differs from the last one it accepted.  Any byte other
//! than the two valid values means "no frame".

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Sequence number token, as carried on the wire
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SeqNr {
    #[default]
    Invalid = 0x00,
    First = 0x56,
    Second = 0xAA,
}

impl SeqNr {
    /// Decode a wire byte.  Unknown values decode as [`SeqNr::Invalid`].
    pub const fn from_raw(value: u8) -> SeqNr {
        match value {
            0x56 => SeqNr::First,
            0xAA => SeqNr::Second,
            _ => SeqNr::Invalid,
        }
    }

    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// The token following this one
    pub const fn next(self) -> SeqNr {
        match self {
            SeqNr::First => SeqNr::Second,
            SeqNr::Second | SeqNr::Invalid => SeqNr::First,
        }
    }

    pub const fn is_valid(self) -> bool {
        !matches!(self, SeqNr::Invalid)
    }

    /// Bit used to report consumption of a frame with this token in the
    /// status frame
    pub const fn cons_bit(self) -> bool {
        matches!(self, SeqNr::First)
    }

    /// The token a receiver reporting `cons_bit` has not accepted last.
    ///
    /// A frame sent with it is new to that receiver whatever the sender's
    /// own history, for example after a dropped frame or a re-created
    /// channel.
    pub const fn unlike_cons_bit(cons_bit: bool) -> SeqNr {
        if cons_bit { SeqNr::Second } else { SeqNr::First }
    }
}

impl From<SeqNr> for u8 {
    fn from(value: SeqNr) -> Self {
        value.raw()
    }
}

impl From<u8> for SeqNr {
    fn from(value: u8) -> Self {
        SeqNr::from_raw(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates() {
        assert_eq!(SeqNr::Invalid.next(), SeqNr::First);
        assert_eq!(SeqNr::First.next(), SeqNr::Second);
        assert_eq!(SeqNr::Second.next(), SeqNr::First);
    }

    #[test]
    fn only_two_values_decode() {
        assert_eq!(SeqNr::from(0x56), SeqNr::First);
        assert_eq!(SeqNr::from(0xAA), SeqNr::Second);
        for raw in [0x00u8, 0x01, 0x55, 0x57, 0xAB, 0xFF] {
            assert!(!SeqNr::from_raw(raw).is_valid(), "{raw:#04X} decoded");
        }
        assert_eq!(u8::from(SeqNr::Second), 0xAA);
    }

    #[test]
    fn cons_bit_differs_between_tokens() {
        assert!(SeqNr::First.cons_bit());
        assert!(!SeqNr::Second.cons_bit());
        assert_eq!(SeqNr::Invalid.cons_bit(), SeqNr::Second.cons_bit());
    }

    #[test]
    fn token_unlike_reported_cons_bit() {
        for token in [SeqNr::Invalid, SeqNr::First, SeqNr::Second] {
            let next = SeqNr::unlike_cons_bit(token.cons_bit());
            assert_ne!(next.cons_bit(), token.cons_bit());
            assert!(next.is_valid());
        }
        // Fresh receiver reports 0, so the first frame is `First`
        assert_eq!(SeqNr::unlike_cons_bit(false), SeqNr::First);
    }
}
