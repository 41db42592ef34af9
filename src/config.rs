//! Bus timing, sizing, and protocol constants

/// Maple Bus line timing
pub mod bus {
    /// Nominal time to shift one bit onto the bus, in nanoseconds.
    ///
    /// Sets the 2 Mbps line rate and sizes every write-stall deadline.
    pub const NS_PER_BIT: u32 = 480;

    /// How long both lines must read idle-high before a write is allowed
    /// to start, in microseconds. 0 disables the check.
    pub const OPEN_LINE_CHECK_TIME_US: u64 = 1;

    /// Extra percentage added on top of the estimated transmit duration
    /// when computing the write kill time.
    pub const WRITE_TIMEOUT_EXTRA_PERCENT: u32 = 20;

    /// Maximum time allowed between captured words once a read has
    /// started, in microseconds.
    pub const INTER_WORD_READ_TIMEOUT_US: u64 = 100;

    /// Upper bound on waiting for the capture FIFO to drain after the
    /// end of a read, in microseconds.
    pub const READ_DRAIN_TIMEOUT_US: u64 = 1000;
}

/// Packet sizing
pub mod packet {
    /// Maximum number of 32-bit payload words in one packet (the frame
    /// word's length field is a single byte).
    pub const MAX_PAYLOAD_WORDS: usize = 255;

    /// Words in a maximal received frame: frame word + payload + checksum.
    pub const MAX_FRAME_WORDS: usize = MAX_PAYLOAD_WORDS + 2;

    /// Capture buffer size in words. One guard word beyond the largest
    /// legal frame, so a transfer counter that reaches zero always means
    /// the sender overflowed us.
    pub const READ_BUFFER_WORDS: usize = MAX_FRAME_WORDS + 1;

    /// Transmit sequence buffer size in words. Worst case is a fully
    /// chunked maximal packet: bit-count header + frame + payload + four
    /// trailer words, plus a re-entry word and chunk header per payload
    /// word.
    pub const WRITE_BUFFER_WORDS: usize = 1 + 1 + MAX_PAYLOAD_WORDS + 4 + 2 * MAX_PAYLOAD_WORDS;
}

/// Transmission scheduling
pub mod scheduler {
    /// Number of priority levels a scheduler may be constructed with.
    pub const MAX_PRIORITIES: usize = 4;

    /// Pending transmissions held per priority level.
    pub const QUEUE_DEPTH: usize = 16;
}
