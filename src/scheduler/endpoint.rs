//! Per-endpoint view of a shared scheduler
//!
//! Several logical devices share one bus and therefore one
//! [`PrioritizedTxScheduler`]. Each gets an [`EndpointTxScheduler`] bound to
//! the priority its traffic class calls for, so device code enqueues work
//! without ever reasoning about priority policy.
//!
//! The shared scheduler sits in a `RefCell`: all endpoints on a bus are
//! driven from the same foreground context, which serializes access. That
//! precondition is the caller's to uphold.

use crate::protocol::packet::MaplePacket;
use crate::scheduler::prioritized::PrioritizedTxScheduler;
use crate::scheduler::transmitter::Transmitter;
use core::cell::RefCell;

/// Scheduling capability handed to one logical device.
pub trait EndpointTxScheduling<'t> {
    /// Schedule a packet at this endpoint's priority. Returns the
    /// transmission id.
    fn add(
        &self,
        tx_time_us: u64,
        transmitter: &'t dyn Transmitter,
        packet: MaplePacket,
        expect_response: bool,
        expected_response_payload_words: u32,
        auto_repeat_period_us: u32,
    ) -> u32;

    /// Cancel a pending transmission by id; returns how many were removed.
    fn cancel_by_id(&self, id: u32) -> u32;

    /// Cancel pending transmissions addressed to `recipient_addr`.
    fn cancel_by_recipient(&self, recipient_addr: u8) -> u32;

    /// Count pending transmissions addressed to `recipient_addr`.
    fn count_recipients(&self, recipient_addr: u8) -> u32;

    /// Cancel every pending transmission on the shared schedule.
    fn cancel_all(&self) -> u32;
}

/// Facade binding one fixed priority to a shared scheduler.
pub struct EndpointTxScheduler<'s, 't> {
    scheduler: &'s RefCell<PrioritizedTxScheduler<'t>>,
    fixed_priority: u8,
}

impl<'s, 't> EndpointTxScheduler<'s, 't> {
    pub fn new(scheduler: &'s RefCell<PrioritizedTxScheduler<'t>>, fixed_priority: u8) -> Self {
        Self {
            scheduler,
            fixed_priority,
        }
    }

    /// The priority this endpoint schedules at.
    pub fn priority(&self) -> u8 {
        self.fixed_priority
    }
}

impl<'t> EndpointTxScheduling<'t> for EndpointTxScheduler<'_, 't> {
    fn add(
        &self,
        tx_time_us: u64,
        transmitter: &'t dyn Transmitter,
        packet: MaplePacket,
        expect_response: bool,
        expected_response_payload_words: u32,
        auto_repeat_period_us: u32,
    ) -> u32 {
        self.scheduler.borrow_mut().add(
            self.fixed_priority,
            tx_time_us,
            transmitter,
            packet,
            expect_response,
            expected_response_payload_words,
            auto_repeat_period_us,
            0,
        )
    }

    fn cancel_by_id(&self, id: u32) -> u32 {
        self.scheduler.borrow_mut().cancel_by_id(id)
    }

    fn cancel_by_recipient(&self, recipient_addr: u8) -> u32 {
        self.scheduler.borrow_mut().cancel_by_recipient(recipient_addr)
    }

    fn count_recipients(&self, recipient_addr: u8) -> u32 {
        self.scheduler.borrow().count_recipients(recipient_addr)
    }

    fn cancel_all(&self) -> u32 {
        self.scheduler.borrow_mut().cancel_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::transmission::TX_TIME_ASAP;
    use crate::scheduler::transmitter::mock::MockTransmitter;

    fn packet_for(recipient: u8) -> MaplePacket {
        MaplePacket::new(0x01, recipient, 0x00, &[]).unwrap()
    }

    #[test]
    fn test_fixed_priority_is_injected() {
        let notify = MockTransmitter::new();
        let shared = RefCell::new(PrioritizedTxScheduler::new(2));
        let background = EndpointTxScheduler::new(&shared, 2);
        let urgent = EndpointTxScheduler::new(&shared, 0);

        let slow = background.add(TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0);
        let fast = urgent.add(TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0);

        let mut sched = shared.borrow_mut();
        let first = sched.pop_next(0).unwrap();
        assert_eq!(first.id, fast);
        assert_eq!(first.priority, 0);
        let second = sched.pop_next(0).unwrap();
        assert_eq!(second.id, slow);
        assert_eq!(second.priority, 2);
    }

    #[test]
    fn test_cancellation_forwards_to_shared_schedule() {
        let notify = MockTransmitter::new();
        let shared = RefCell::new(PrioritizedTxScheduler::new(1));
        let a = EndpointTxScheduler::new(&shared, 0);
        let b = EndpointTxScheduler::new(&shared, 1);

        let id = a.add(TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0);
        b.add(TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0);
        b.add(TX_TIME_ASAP, &notify, packet_for(0x01), false, 0, 0);

        // Either endpoint sees and affects the whole schedule
        assert_eq!(b.count_recipients(0x20), 2);
        assert_eq!(a.cancel_by_id(id), 1);
        assert_eq!(b.count_recipients(0x20), 1);
        assert_eq!(a.cancel_by_recipient(0x01), 1);
        assert_eq!(b.cancel_all(), 1);
        assert!(shared.borrow_mut().pop_next(u64::MAX).is_none());
    }
}
