//! Hardware seam for the bus transceiver
//!
//! The transceiver's state machine never touches registers directly; it
//! drives this trait. The production implementation wraps the transmit and
//! receive shift units (PIO state machines fed by DMA on the reference
//! board), the direction line, and the system timer. Tests use the
//! deterministic fake below.

/// Logical direction of the level shifter between the MCU and the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    /// Bus lines are inputs (idle, or receiving)
    Input,
    /// Bus lines are driven by the transmit shifter
    Output,
}

/// Register-level control surface of one bus instance.
///
/// The transceiver calls into this from both the foreground poll and the
/// interrupt context; every method must be non-blocking and cheap. The
/// receive transfer counter counts *down* from
/// [`crate::config::packet::READ_BUFFER_WORDS`] as captured words land in
/// the buffer.
pub trait BusHardware {
    /// Instruction words appended after the checksum byte. They reprogram
    /// the transmit shifter to emit the protocol stop condition once the
    /// last data bit is out.
    const END_SEQUENCE: [u16; 7];

    /// Marker word that re-enters the transmit program at the top of a
    /// delayed chunk.
    const REENTRY_WORD: u32;

    /// Duration of one iteration of the shifter's inter-chunk delay loop,
    /// in nanoseconds.
    const NS_PER_DELAY_LOOP: u32;

    /// Monotonic microsecond clock.
    fn now_us(&self) -> u64;

    /// Both signal lines currently read idle-high.
    fn lines_idle(&self) -> bool;

    /// Drive the direction line.
    fn set_direction(&mut self, direction: LineDirection);

    /// Abort transfers left over from a previous cycle.
    fn abort_transfers(&mut self);

    /// Load `sequence` into the transmit path and start shifting.
    fn start_transmit(&mut self, sequence: &[u32]);

    /// Stop the transmit shifter. A soft stop (`hard == false`) leaves the
    /// pins parked for an immediate read turnaround; a hard stop fully
    /// releases them.
    fn stop_transmit(&mut self, hard: bool);

    /// Point the capture transfer back at the start of its buffer, full
    /// capacity.
    fn arm_receive(&mut self);

    /// Prime the receive unit before a transmit so the turnaround to read
    /// loses no words.
    fn prestart_receive(&mut self);

    /// Begin capturing.
    fn start_receive(&mut self);

    /// Stop capturing.
    fn stop_receive(&mut self);

    /// Remaining capture capacity in words.
    fn receive_transfer_count(&self) -> u32;

    /// true once every captured word has drained out of the receive FIFO
    /// into the buffer.
    fn receive_fifo_empty(&self) -> bool;

    /// Copy the first `dest.len()` captured words into `dest`. Only valid
    /// up to the number of words already captured.
    fn copy_captured(&self, dest: &mut [u32]);
}
