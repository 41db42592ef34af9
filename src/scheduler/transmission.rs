//! A scheduled send request
//!
//! Pairs a packet with the metadata the scheduler needs to order, repeat,
//! and report on it. The packet's payload is moved in when the transmission
//! is created; the scheduler holds the only copy from then on.

use crate::protocol::packet::MaplePacket;
use crate::scheduler::transmitter::Transmitter;

/// Use this for `tx_time_us` when a packet should be sent as soon as
/// possible.
pub const TX_TIME_ASAP: u64 = 0;

/// One pending (or in-flight) transmission.
///
/// Cloned only by the scheduler, to re-insert the next occurrence of an
/// auto-repeating transmission under the same id.
#[derive(Clone)]
pub struct Transmission<'t> {
    /// Unique id assigned by the scheduler
    pub id: u32,
    /// Priority this was scheduled at (0 is highest)
    pub priority: u8,
    /// Absolute time at which this should transmit, in microseconds
    /// ([`TX_TIME_ASAP`] means immediately)
    pub tx_time_us: u64,
    /// Where outcome notifications go; not owned by the transmission
    pub transmitter: &'t dyn Transmitter,
    /// The packet to send
    pub packet: MaplePacket,
    /// true iff a response frame should be read back after the write
    pub expect_response: bool,
    /// Number of payload words expected in the response, used to size the
    /// read timeout
    pub expected_response_payload_words: u32,
    /// Repeat period in microseconds; 0 for a one-shot transmission
    pub auto_repeat_period_us: u32,
    /// Absolute time after which auto-repeat stops; 0 for no end
    pub auto_repeat_end_us: u64,
}

impl Transmission<'_> {
    /// Estimated time needed to read back the expected response, in
    /// nanoseconds. Covers the response frame word, the expected payload
    /// words, and the checksum trailer at line rate.
    pub fn expected_read_duration_ns(&self) -> u64 {
        let bits = 32 * (1 + u64::from(self.expected_response_payload_words)) + 8;
        bits * u64::from(crate::config::bus::NS_PER_BIT)
    }
}

impl core::fmt::Debug for Transmission<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transmission")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("tx_time_us", &self.tx_time_us)
            .field("packet", &self.packet)
            .field("expect_response", &self.expect_response)
            .field(
                "expected_response_payload_words",
                &self.expected_response_payload_words,
            )
            .field("auto_repeat_period_us", &self.auto_repeat_period_us)
            .field("auto_repeat_end_us", &self.auto_repeat_end_us)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bus::NS_PER_BIT;
    use crate::scheduler::transmitter::mock::MockTransmitter;

    #[test]
    fn test_expected_read_duration_covers_frame_and_trailer() {
        let notify = MockTransmitter::new();
        let tx = Transmission {
            id: 1,
            priority: 0,
            tx_time_us: TX_TIME_ASAP,
            transmitter: &notify,
            packet: MaplePacket::new(0x09, 0x20, 0x00, &[]).unwrap(),
            expect_response: true,
            expected_response_payload_words: 3,
            auto_repeat_period_us: 0,
            auto_repeat_end_us: 0,
        };
        // Response frame word + 3 payload words + 8 checksum bits
        assert_eq!(
            tx.expected_read_duration_ns(),
            (32 * 4 + 8) * u64::from(NS_PER_BIT)
        );
    }
}
