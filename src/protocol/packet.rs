//! Maple Bus packet model
//!
//! # Wire format
//!
//! Every frame on the bus is a sequence of 32-bit words followed by a single
//! checksum byte:
//!
//! ```text
//! [frame word][payload word 0]..[payload word N-1][crc: u8]
//! ```
//!
//! The frame word packs four bytes, most significant first:
//!
//! ```text
//! [command: u8][recipient: u8][sender: u8][length: u8]
//! ```
//!
//! `length` is the payload word count, so the low byte of the first captured
//! word always tells the receiver how many words should follow.
//!
//! # Checksum
//!
//! The trailing byte is the XOR of every byte of the frame word and payload
//! words. XOR is word-order independent, so it is computed by folding whole
//! words together and condensing the result to one byte.

use crate::config::bus::NS_PER_BIT;
use crate::config::packet::MAX_PAYLOAD_WORDS;
use heapless::Vec;

/// Frame header fields of a Maple packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Command code
    pub command: u8,
    /// Address of the device this packet is for
    pub recipient_addr: u8,
    /// Address of the device sending this packet
    pub sender_addr: u8,
    /// Number of payload words that follow the frame word
    pub length: u8,
}

impl Frame {
    /// Pack the header into its 32-bit wire representation.
    pub fn word(&self) -> u32 {
        (u32::from(self.command) << 24)
            | (u32::from(self.recipient_addr) << 16)
            | (u32::from(self.sender_addr) << 8)
            | u32::from(self.length)
    }

    /// Unpack a received frame word.
    pub fn from_word(word: u32) -> Self {
        Self {
            command: (word >> 24) as u8,
            recipient_addr: (word >> 16) as u8,
            sender_addr: (word >> 8) as u8,
            length: word as u8,
        }
    }
}

/// A Maple packet: frame header plus owned payload words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaplePacket {
    /// Frame header
    pub frame: Frame,
    /// Payload words, owned by the packet
    pub payload: Vec<u32, MAX_PAYLOAD_WORDS>,
}

impl MaplePacket {
    /// Build a packet from header fields and payload words.
    ///
    /// Returns `None` if the payload does not fit in a single frame. The
    /// frame's length field is derived from the payload, so the result is
    /// always valid.
    pub fn new(command: u8, recipient_addr: u8, sender_addr: u8, payload: &[u32]) -> Option<Self> {
        let mut words = Vec::new();
        words.extend_from_slice(payload).ok()?;
        Some(Self {
            frame: Frame {
                command,
                recipient_addr,
                sender_addr,
                length: payload.len() as u8,
            },
            payload: words,
        })
    }

    /// Reconstruct a packet from captured words (frame word first, no
    /// checksum word).
    ///
    /// Returns `None` on an empty slice or a payload too large for one
    /// frame. The frame's declared length is overwritten with the actual
    /// word count so the packet is valid even when the sender padded the
    /// frame with extra words.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        let (&frame_word, payload) = words.split_first()?;
        let mut frame = Frame::from_word(frame_word);
        if payload.len() > MAX_PAYLOAD_WORDS {
            return None;
        }
        frame.length = payload.len() as u8;
        let mut owned = Vec::new();
        owned.extend_from_slice(payload).ok()?;
        Some(Self {
            frame,
            payload: owned,
        })
    }

    /// A packet is valid when the frame's declared length matches the
    /// payload it owns.
    pub fn is_valid(&self) -> bool {
        usize::from(self.frame.length) == self.payload.len()
    }

    /// Combined 32-bit frame word.
    pub fn frame_word(&self) -> u32 {
        self.frame.word()
    }

    /// Total bits shifted onto the bus for this packet: the frame word,
    /// every payload word, and the 8-bit checksum trailer.
    pub fn total_bits(&self) -> u32 {
        32 * (1 + self.payload.len() as u32) + 8
    }

    /// Estimated time to clock this packet onto the bus, in nanoseconds.
    /// Used to size the write-stall deadline.
    pub fn tx_duration_ns(&self) -> u32 {
        self.total_bits() * NS_PER_BIT
    }

    /// Checksum over the frame word and payload.
    pub fn checksum(&self) -> u8 {
        let mut crc = 0;
        crc8_word(self.frame_word(), &mut crc);
        crc8_words(&self.payload, &mut crc);
        crc
    }
}

/// Fold every byte of `word` into the running checksum.
pub fn crc8_word(word: u32, crc: &mut u8) {
    for byte in word.to_le_bytes() {
        *crc ^= byte;
    }
}

/// Fold every byte of `words` into the running checksum.
pub fn crc8_words(words: &[u32], crc: &mut u8) {
    // XOR is byte-order independent, so condense word-wise first
    let folded = words.iter().fold(0u32, |acc, w| acc ^ w);
    crc8_word(folded, crc);
}
