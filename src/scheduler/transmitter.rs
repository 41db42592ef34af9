//! Transmission outcome notification
//!
//! A [`Transmitter`] is whatever entity wants to hear about the fate of a
//! transmission it scheduled: a peripheral emulator echoing responses to the
//! host, a command handler, a test harness. The foreground loop driving the
//! bus invokes exactly one of the outcome callbacks per completed
//! transmission; the scheduler itself never calls them.

use crate::protocol::packet::MaplePacket;
use crate::scheduler::transmission::Transmission;

/// Receiver of transmission lifecycle notifications.
///
/// Callbacks take `&self`: a transmitter is shared by reference across every
/// transmission it schedules, so implementations use interior mutability for
/// any bookkeeping.
pub trait Transmitter {
    /// The transmission was handed to the bus and started clocking out.
    fn tx_started(&self, tx: &Transmission);

    /// The transmission failed. `write_failed` and `read_failed` identify
    /// which half of the cycle went wrong.
    fn tx_failed(&self, write_failed: bool, read_failed: bool, tx: &Transmission);

    /// The transmission completed; `response` holds the reply packet when
    /// one was expected, `None` for a write-only transmission.
    fn tx_complete(&self, response: Option<&MaplePacket>, tx: &Transmission);
}
