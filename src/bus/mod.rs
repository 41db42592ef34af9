//! Half-duplex Maple Bus transceiver
//!
//! [`transceiver::MapleBus`] drives one write/read cycle at a time over a
//! pair of signal lines. The cycle is advanced from two execution contexts:
//! hardware-completion interrupts move the phase forward in O(1), and the
//! foreground loop polls [`transceiver::MapleBus::process_events`] to
//! validate completed reads and to kill stalled operations. Register-level
//! control sits behind the [`hardware::BusHardware`] seam so the state
//! machine runs identically over the real peripheral block or a test fake.

pub mod hardware;
pub mod irq;
pub mod transceiver;

pub use transceiver::MapleBus;

/// Phase of the transmit/receive cycle.
///
/// Owned by one transceiver instance; mutated only by the interrupt handlers
/// and by the timeout checks in `process_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bus is free; a write or read may be started
    Idle,
    /// Transmit shifter is clocking words out
    WriteInProgress,
    /// Write finished, not yet observed by the poller
    WriteComplete,
    /// Write was killed after missing its deadline
    WriteFailed,
    /// Capture armed, waiting for the start of a response frame
    WaitingForReadStart,
    /// Start sequence seen, words are arriving
    ReadInProgress,
    /// End sequence seen, capture stopped, not yet validated
    ReadComplete,
    /// Read ended without a valid frame
    ReadFailed,
}

/// Why a read or write was reported failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Captured checksum byte did not match the recomputed one
    CrcInvalid,
    /// Fewer words captured than the frame word declared
    MissingData,
    /// Sender kept transmitting past the capture buffer
    BufferOverflow,
    /// Operation missed its deadline
    Timeout,
}

/// Why `write` or `start_read` refused a request. Refusal changes no
/// hardware state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// A cycle is already in flight
    Busy,
    /// Another party held a signal line low during the open-line check
    LineNotIdle,
    /// The packet's declared length does not match its payload
    InvalidPacket,
}

/// Snapshot returned by `process_events`.
#[derive(Debug)]
pub struct BusStatus<'a> {
    /// Phase observed this poll; terminal phases (`WriteComplete`,
    /// `ReadComplete`, `WriteFailed`, `ReadFailed`) are reported exactly
    /// once, after which the transceiver is idle again
    pub phase: Phase,
    /// Validated response words (frame word first, checksum stripped),
    /// present only with `Phase::ReadComplete`
    pub read_words: Option<&'a [u32]>,
    /// Failure classification, present only with a failed phase
    pub failure: Option<FailureReason>,
}

impl BusStatus<'_> {
    fn of(phase: Phase) -> Self {
        Self {
            phase,
            read_words: None,
            failure: None,
        }
    }
}
