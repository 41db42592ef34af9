//! Bus transceiver state machine
//!
//! One `MapleBus` owns one signal-pin pair and drives one transmit/receive
//! cycle at a time. The phase field has exactly one writer per transition:
//! hardware-completion interrupts advance it through
//! [`MapleBus::on_write_complete`] and [`MapleBus::on_read_event`], and the
//! foreground poll advances it through [`MapleBus::process_events`] when a
//! deadline is missed. The poll snapshots the phase once per call and
//! branches on the snapshot, so a completion racing in mid-poll is picked up
//! on the next call instead of being half-processed.
//!
//! Nothing here blocks on hardware completion. The only busy-waits are the
//! open-line check before a write and the bounded FIFO drain after a read,
//! both capped by configuration constants.

use crate::bus::hardware::{BusHardware, LineDirection};
use crate::bus::{BusStatus, FailureReason, Phase, RequestError};
use crate::config::bus::{
    INTER_WORD_READ_TIMEOUT_US, OPEN_LINE_CHECK_TIME_US, READ_DRAIN_TIMEOUT_US,
    WRITE_TIMEOUT_EXTRA_PERCENT,
};
use crate::config::packet::{READ_BUFFER_WORDS, WRITE_BUFFER_WORDS};
use crate::protocol::packet::{crc8_word, crc8_words, MaplePacket};
use heapless::Vec;

/// Sentinel for "no deadline armed".
const NO_KILL_TIME: u64 = u64::MAX;

/// Throttled transmission: the payload is split into fixed-size chunks with
/// a shifter-side delay loop between them, trading throughput for signal
/// integrity on slow links.
///
/// Chunk word counts must be greater than zero. A zero `delay_us`, or a
/// first chunk that already covers the whole packet, degenerates to a plain
/// single-shot write.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedDelay {
    /// Pause between chunks, in microseconds
    pub delay_us: u32,
    /// Words in the first chunk, counting the frame word
    pub first_chunk_words: u32,
    /// Words in every following chunk
    pub later_chunk_words: u32,
}

/// Transceiver for one physical bus.
pub struct MapleBus<H: BusHardware> {
    hw: H,
    phase: Phase,
    expecting_response: bool,
    read_timeout_us: Option<u64>,
    /// Absolute time after which the current operation is force-killed
    kill_time_us: u64,
    /// Transfer counter observed on the previous poll of an active read
    last_rx_transfer_count: u32,
    /// When that counter last moved
    last_rx_word_time_us: u64,
    sequence: Vec<u32, WRITE_BUFFER_WORDS>,
    /// Words of the last validated read (frame word first, no checksum)
    last_read: [u32; READ_BUFFER_WORDS],
}

impl<H: BusHardware> MapleBus<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            phase: Phase::Idle,
            expecting_response: false,
            read_timeout_us: None,
            kill_time_us: NO_KILL_TIME,
            last_rx_transfer_count: 0,
            last_rx_word_time_us: 0,
            sequence: Vec::new(),
            last_read: [0; READ_BUFFER_WORDS],
        }
    }

    /// A cycle is in flight; `write` and `start_read` will be refused.
    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// The hardware behind this transceiver.
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Begin transmitting `packet`, optionally turning the bus around into a
    /// read once the last bit is out.
    ///
    /// `read_timeout_us` bounds the wait for the start of the response
    /// (`None` waits forever); it only applies when `autostart_read` is set.
    /// Refusals change no hardware state.
    pub fn write(
        &mut self,
        packet: &MaplePacket,
        autostart_read: bool,
        read_timeout_us: Option<u64>,
        chunking: Option<ChunkedDelay>,
    ) -> Result<(), RequestError> {
        if self.is_busy() {
            return Err(RequestError::Busy);
        }
        if !packet.is_valid() {
            log::warn!(
                "refusing packet: frame declares {} payload words, holds {}",
                packet.frame.length,
                packet.payload.len()
            );
            return Err(RequestError::InvalidPacket);
        }

        // Kill whatever a previous cycle may have left running
        self.hw.abort_transfers();

        let mut crc = 0u8;
        crc8_word(packet.frame_word(), &mut crc);
        crc8_words(&packet.payload, &mut crc);

        let extra_time_us = self.build_sequence(packet, crc, chunking);

        if !self.line_check() {
            log::debug!("write refused, bus line held low");
            return Err(RequestError::LineNotIdle);
        }

        // Update flags before the shifter starts
        self.expecting_response = autostart_read;
        self.read_timeout_us = read_timeout_us;
        self.phase = Phase::WriteInProgress;

        if autostart_read {
            // Arm capture before transmitting so the turnaround to read
            // loses no words
            self.last_rx_transfer_count = READ_BUFFER_WORDS as u32;
            self.hw.arm_receive();
            self.hw.prestart_receive();
        }

        self.hw.start_transmit(&self.sequence);
        self.hw.set_direction(LineDirection::Output);

        let mut total_write_time_ns = u64::from(packet.tx_duration_ns());
        total_write_time_ns += total_write_time_ns * u64::from(WRITE_TIMEOUT_EXTRA_PERCENT) / 100;
        self.kill_time_us = self
            .hw
            .now_us()
            .saturating_add(total_write_time_ns.div_ceil(1000))
            .saturating_add(extra_time_us);

        Ok(())
    }

    /// Arm a read without a preceding write.
    ///
    /// `read_timeout_us` bounds the wait for the start of a frame; `None`
    /// waits forever.
    pub fn start_read(&mut self, read_timeout_us: Option<u64>) -> Result<(), RequestError> {
        if self.is_busy() {
            return Err(RequestError::Busy);
        }

        self.hw.abort_transfers();

        self.last_rx_transfer_count = READ_BUFFER_WORDS as u32;
        self.hw.arm_receive();

        self.kill_time_us = match read_timeout_us {
            Some(timeout) => self.hw.now_us().saturating_add(timeout),
            None => NO_KILL_TIME,
        };
        self.phase = Phase::WaitingForReadStart;

        self.hw.set_direction(LineDirection::Input);
        self.hw.start_receive();

        Ok(())
    }

    /// Interrupt entry point: the transmit shifter finished.
    ///
    /// Stops the shifter and either turns the bus around into a read or
    /// parks it, depending on whether a response was requested.
    pub fn on_write_complete(&mut self) {
        // Soft stop keeps the pins parked for the read turnaround
        self.hw.stop_transmit(!self.expecting_response);

        if self.expecting_response {
            self.hw.start_receive();
            self.hw.set_direction(LineDirection::Input);

            self.kill_time_us = match self.read_timeout_us {
                Some(timeout) => self.hw.now_us().saturating_add(timeout),
                None => NO_KILL_TIME,
            };
            self.phase = Phase::WaitingForReadStart;
        } else {
            self.hw.set_direction(LineDirection::Input);
            self.phase = Phase::WriteComplete;
        }
    }

    /// Interrupt entry point: the receive unit signaled.
    ///
    /// The first signal of a cycle marks the detected start of a frame, the
    /// second marks its end. Anything else is spurious and ignored.
    pub fn on_read_event(&mut self) {
        match self.phase {
            Phase::WaitingForReadStart => {
                self.phase = Phase::ReadInProgress;
                self.last_rx_word_time_us = self.hw.now_us();
            }
            Phase::ReadInProgress => {
                self.hw.stop_receive();
                self.phase = Phase::ReadComplete;
            }
            _ => {}
        }
    }

    /// Non-blocking poll: validate a completed read, observe a completed
    /// write, or kill a stalled operation.
    ///
    /// Must be called repeatedly while a cycle is in flight. Terminal
    /// outcomes reset the transceiver to idle and are reported exactly once.
    pub fn process_events(&mut self, now_us: u64) -> BusStatus<'_> {
        // The interrupt half may advance the phase mid-poll; branch on a
        // single snapshot and let the next poll observe anything newer.
        let phase = self.phase;

        match phase {
            Phase::ReadComplete => self.finish_read(),
            Phase::WriteComplete => {
                self.phase = Phase::Idle;
                BusStatus::of(Phase::WriteComplete)
            }
            Phase::ReadInProgress => self.check_read_progress(now_us),
            _ if phase != Phase::Idle && now_us >= self.kill_time_us => self.kill(phase),
            _ => BusStatus::of(phase),
        }
    }

    /// Validate the captured frame after the end sequence was seen.
    fn finish_read(&mut self) -> BusStatus<'_> {
        // Bounded wait for the capture FIFO to finish draining to the buffer
        let drain_deadline = self.hw.now_us().saturating_add(READ_DRAIN_TIMEOUT_US);
        while !self.hw.receive_fifo_empty() && self.hw.now_us() < drain_deadline {}

        // The transfer counter decrements toward zero; invert for word count
        let words_captured =
            (READ_BUFFER_WORDS as u32 - self.hw.receive_transfer_count()) as usize;

        self.phase = Phase::Idle;

        // A frame is at least the frame word and the checksum word
        if words_captured < 2 {
            log::warn!("read failed, only {words_captured} words captured");
            return Self::read_failure(FailureReason::MissingData);
        }

        self.hw.copy_captured(&mut self.last_read[..words_captured]);

        // More words than declared are tolerated (some devices pad their
        // replies); fewer never are
        let declared_len = (self.last_read[0] & 0xFF) as usize;
        if declared_len > words_captured - 2 {
            log::warn!(
                "read failed, frame declares {declared_len} words but {} captured",
                words_captured - 2
            );
            return Self::read_failure(FailureReason::MissingData);
        }

        let mut crc = 0u8;
        crc8_words(&self.last_read[..words_captured - 1], &mut crc);
        if u32::from(crc) != self.last_read[words_captured - 1] {
            log::warn!("read failed, checksum mismatch");
            return Self::read_failure(FailureReason::CrcInvalid);
        }

        BusStatus {
            phase: Phase::ReadComplete,
            read_words: Some(&self.last_read[..words_captured - 1]),
            failure: None,
        }
    }

    /// Watch an active read for buffer exhaustion or an inter-word stall.
    fn check_read_progress(&mut self, now_us: u64) -> BusStatus<'_> {
        let transfer_count = self.hw.receive_transfer_count();
        if transfer_count == 0 {
            // The guard word was consumed: the sender overran the buffer
            self.phase = Phase::Idle;
            log::warn!("read failed, capture buffer exhausted");
            return Self::read_failure(FailureReason::BufferOverflow);
        }

        if self.last_rx_transfer_count == transfer_count {
            if now_us > self.last_rx_word_time_us
                && now_us - self.last_rx_word_time_us >= INTER_WORD_READ_TIMEOUT_US
            {
                self.hw.stop_receive();
                self.phase = Phase::Idle;
                log::warn!("read failed, sender stalled mid-frame");
                return Self::read_failure(FailureReason::Timeout);
            }
        } else {
            self.last_rx_transfer_count = transfer_count;
            self.last_rx_word_time_us = now_us;
        }

        // (the kill time is ignored while words are actively arriving)
        BusStatus::of(Phase::ReadInProgress)
    }

    /// A non-idle phase blew past its deadline; force the bus back to idle.
    fn kill(&mut self, phase: Phase) -> BusStatus<'_> {
        self.phase = Phase::Idle;

        if phase == Phase::WaitingForReadStart {
            self.hw.stop_receive();
            log::warn!("read failed, no response before deadline");
            return Self::read_failure(FailureReason::Timeout);
        }

        // Mid-write, or any unexpected phase: stop both units. The write
        // may have *just* turned around into a read as this poll ran, so
        // the receive side is stopped too.
        self.hw.stop_transmit(false);
        self.hw.stop_receive();
        self.hw.set_direction(LineDirection::Input);
        log::warn!("write failed, shifter stalled past deadline");
        BusStatus {
            phase: Phase::WriteFailed,
            read_words: None,
            failure: Some(FailureReason::Timeout),
        }
    }

    fn read_failure(reason: FailureReason) -> BusStatus<'static> {
        BusStatus {
            phase: Phase::ReadFailed,
            read_words: None,
            failure: Some(reason),
        }
    }

    /// Assemble the transmit sequence. Returns the extra microseconds the
    /// inter-chunk delays add to the write deadline.
    fn build_sequence(
        &mut self,
        packet: &MaplePacket,
        crc: u8,
        chunking: Option<ChunkedDelay>,
    ) -> u64 {
        self.sequence.clear();
        let frame_word = packet.frame_word();

        // A zero delay or a first chunk covering the whole packet is just a
        // plain write
        let chunking = chunking.filter(|c| {
            c.delay_us > 0 && (c.first_chunk_words as usize) < packet.payload.len() + 1
        });

        let Some(chunking) = chunking else {
            // The shifter consumes a bit count first; it is byte-flipped
            // because the transmit path swaps bytes to put the wire order
            // right
            let _ = self.sequence.push(packet.total_bits().swap_bytes());
            let _ = self.sequence.push(frame_word);
            let _ = self.sequence.extend_from_slice(&packet.payload);
            self.push_trailer(crc);
            return 0;
        };

        debug_assert!(chunking.first_chunk_words > 0);
        debug_assert!(chunking.later_chunk_words > 0);
        let first_chunk_words = chunking.first_chunk_words.max(1) as usize;
        let later_chunk_words = chunking.later_chunk_words.max(1) as usize;
        let delay_loops = (chunking.delay_us * 1000 / H::NS_PER_DELAY_LOOP) as u16;

        let mut extra_time_us = 0u64;

        // First chunk: bit count covers the frame word and its share of the
        // payload; no checksum yet
        let _ = self
            .sequence
            .push((first_chunk_words as u32 * 32).swap_bytes());
        let _ = self.sequence.push(frame_word);
        let first_payload_words = first_chunk_words - 1;
        let _ = self
            .sequence
            .extend_from_slice(&packet.payload[..first_payload_words]);

        // Every later chunk re-enters the shift program with its own delay
        // and bit count; only the final one carries the checksum bits
        let mut copied = first_payload_words;
        while copied < packet.payload.len() {
            let remaining = packet.payload.len() - copied;
            let chunk_words = remaining.min(later_chunk_words);
            let mut chunk_bits = (chunk_words * 32) as u16;
            if remaining == chunk_words {
                chunk_bits += 8;
            }

            let _ = self.sequence.push(H::REENTRY_WORD);
            let _ = self.sequence.push(
                u32::from(delay_loops.swap_bytes()) | (u32::from(chunk_bits.swap_bytes()) << 16),
            );
            let _ = self
                .sequence
                .extend_from_slice(&packet.payload[copied..copied + chunk_words]);

            copied += chunk_words;
            extra_time_us += u64::from(chunking.delay_us) + 1;
        }

        self.push_trailer(crc);
        extra_time_us
    }

    /// Checksum byte packed together with the stop-condition instructions.
    fn push_trailer(&mut self, crc: u8) {
        let end = H::END_SEQUENCE;
        let _ = self
            .sequence
            .push(u32::from(crc) | (u32::from(end[0]) << 16));
        let _ = self
            .sequence
            .push(u32::from(end[1]) | (u32::from(end[2]) << 16));
        let _ = self
            .sequence
            .push(u32::from(end[3]) | (u32::from(end[4]) << 16));
        let _ = self
            .sequence
            .push(u32::from(end[5]) | (u32::from(end[6]) << 16));
    }

    /// Confirm nobody is driving the bus before taking it.
    fn line_check(&self) -> bool {
        if OPEN_LINE_CHECK_TIME_US == 0 {
            return true;
        }
        let target = self.hw.now_us() + OPEN_LINE_CHECK_TIME_US + 1;
        loop {
            if !self.hw.lines_idle() {
                return false;
            }
            if self.hw.now_us() >= target {
                return true;
            }
        }
    }
}
