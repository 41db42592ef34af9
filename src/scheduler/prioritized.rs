//! Priority-and-time-ordered transmission queue
//!
//! One ordered list per priority level. Within a level the list is sorted by
//! transmit time, ascending; across levels the lowest priority number always
//! wins. Only the head of each list is ever eligible to pop, so a due
//! transmission further down a list waits for the one ahead of it even when
//! the head is not yet due at a later time.
//!
//! The scheduler is not internally synchronized. When more than one
//! execution context touches it, the caller serializes access.

use crate::config::scheduler::{MAX_PRIORITIES, QUEUE_DEPTH};
use crate::protocol::packet::MaplePacket;
use crate::scheduler::transmission::Transmission;
use crate::scheduler::transmitter::Transmitter;
use heapless::Vec;

type Bucket<'t> = Vec<Transmission<'t>, QUEUE_DEPTH>;

/// Schedule of pending transmissions, ordered by priority then time.
pub struct PrioritizedTxScheduler<'t> {
    next_id: u32,
    schedule: Vec<Bucket<'t>, MAX_PRIORITIES>,
}

impl<'t> PrioritizedTxScheduler<'t> {
    /// Create a scheduler with priority levels `0..=max_priority`.
    ///
    /// `max_priority` must be below [`MAX_PRIORITIES`].
    pub fn new(max_priority: u8) -> Self {
        let levels = usize::from(max_priority) + 1;
        debug_assert!(levels <= MAX_PRIORITIES);
        let mut schedule = Vec::new();
        for _ in 0..levels.min(MAX_PRIORITIES) {
            // Capacity was just checked
            let _ = schedule.push(Bucket::new());
        }
        Self {
            next_id: 1,
            schedule,
        }
    }

    /// Add a transmission to the schedule.
    ///
    /// The packet is moved in; the scheduler owns the only copy until the
    /// transmission is popped or canceled. Returns the assigned id. If the
    /// priority level is full the transmission is dropped and the id is
    /// never served.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        priority: u8,
        tx_time_us: u64,
        transmitter: &'t dyn Transmitter,
        packet: MaplePacket,
        expect_response: bool,
        expected_response_payload_words: u32,
        auto_repeat_period_us: u32,
        auto_repeat_end_us: u64,
    ) -> u32 {
        debug_assert!(packet.is_valid());
        debug_assert!(usize::from(priority) < self.schedule.len());

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        self.insert(Transmission {
            id,
            priority,
            tx_time_us,
            transmitter,
            packet,
            expect_response,
            expected_response_payload_words,
            auto_repeat_period_us,
            auto_repeat_end_us,
        });
        id
    }

    /// Ordered insert preserving ascending transmit time within the
    /// priority's list. Equal times keep submission order.
    fn insert(&mut self, tx: Transmission<'t>) {
        let Some(bucket) = self.schedule.get_mut(usize::from(tx.priority)) else {
            log::error!("tx {} scheduled at unknown priority {}", tx.id, tx.priority);
            return;
        };
        let pos = bucket.partition_point(|pending| pending.tx_time_us <= tx.tx_time_us);
        let id = tx.id;
        if bucket.insert(pos, tx).is_err() {
            log::error!("schedule full, dropping tx {}", id);
        }
    }

    /// Pop the next due transmission, if any.
    ///
    /// Scans levels in ascending priority order; within each level only the
    /// head is considered, and it is due when its transmit time is at or
    /// before `now_us`. An auto-repeating transmission is re-inserted one
    /// cadence step ahead of now (same id, phase-locked to its original
    /// transmit time) before being returned, unless its end time says
    /// otherwise. Missed periods are skipped, never burst.
    pub fn pop_next(&mut self, now_us: u64) -> Option<Transmission<'t>> {
        for bucket in self.schedule.iter_mut() {
            let due = match bucket.first() {
                Some(head) => head.tx_time_us <= now_us,
                None => false,
            };
            if !due {
                continue;
            }

            let tx = bucket.remove(0);

            if tx.auto_repeat_period_us > 0 {
                let next = Self::compute_next_time_cadence(
                    now_us + 1,
                    u64::from(tx.auto_repeat_period_us),
                    tx.tx_time_us,
                );
                if tx.auto_repeat_end_us == 0 || next < tx.auto_repeat_end_us {
                    let mut repeat = tx.clone();
                    repeat.tx_time_us = next;
                    let pos = bucket.partition_point(|pending| pending.tx_time_us <= next);
                    if bucket.insert(pos, repeat).is_err() {
                        log::error!("schedule full, dropping repeat of tx {}", tx.id);
                    }
                }
            }

            return Some(tx);
        }
        None
    }

    /// Cancel pending transmissions with the given id.
    ///
    /// Returns the number removed: 0 when the id was never scheduled or was
    /// already popped.
    pub fn cancel_by_id(&mut self, id: u32) -> u32 {
        self.remove_where(|tx| tx.id == id)
    }

    /// Cancel pending transmissions addressed to the given recipient.
    pub fn cancel_by_recipient(&mut self, recipient_addr: u8) -> u32 {
        self.remove_where(|tx| tx.packet.frame.recipient_addr == recipient_addr)
    }

    /// Count pending transmissions addressed to the given recipient.
    pub fn count_recipients(&self, recipient_addr: u8) -> u32 {
        self.schedule
            .iter()
            .flat_map(|bucket| bucket.iter())
            .filter(|tx| tx.packet.frame.recipient_addr == recipient_addr)
            .count() as u32
    }

    /// Cancel everything still pending.
    pub fn cancel_all(&mut self) -> u32 {
        self.remove_where(|_| true)
    }

    fn remove_where<F: Fn(&Transmission) -> bool>(&mut self, should_remove: F) -> u32 {
        let mut removed = 0;
        for bucket in self.schedule.iter_mut() {
            let mut i = 0;
            while i < bucket.len() {
                if should_remove(&bucket[i]) {
                    bucket.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        }
        removed
    }

    /// Smallest time at or after `current_time_us` that lands on the cadence
    /// grid defined by `period_us` and `offset_us`.
    ///
    /// `period_us` must be greater than zero. The result keeps periodic
    /// transmissions phase-locked to their original anchor instead of
    /// drifting with scheduling jitter.
    pub fn compute_next_time_cadence(current_time_us: u64, period_us: u64, offset_us: u64) -> u64 {
        debug_assert!(period_us > 0);
        if period_us == 0 {
            return current_time_us;
        }
        let rem = current_time_us % period_us;
        let off = offset_us % period_us;
        current_time_us + ((off + period_us - rem) % period_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::transmission::TX_TIME_ASAP;
    use crate::scheduler::transmitter::mock::MockTransmitter;

    fn packet_for(recipient: u8) -> MaplePacket {
        MaplePacket::new(0x09, recipient, 0x00, &[0x1234_5678]).unwrap()
    }

    fn add_simple<'t>(
        sched: &mut PrioritizedTxScheduler<'t>,
        notify: &'t MockTransmitter,
        priority: u8,
        tx_time_us: u64,
    ) -> u32 {
        sched.add(priority, tx_time_us, notify, packet_for(0x20), false, 0, 0, 0)
    }

    #[test]
    fn test_pop_never_returns_future_transmission() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        add_simple(&mut sched, &notify, 0, 100);

        assert!(sched.pop_next(0).is_none());
        assert!(sched.pop_next(99).is_none());
        let tx = sched.pop_next(100).expect("due at exactly tx_time");
        assert_eq!(tx.tx_time_us, 100);
    }

    #[test]
    fn test_asap_is_always_due() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        assert!(sched.pop_next(0).is_some());
    }

    #[test]
    fn test_priority_order_wins_over_insertion_order() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        let low = add_simple(&mut sched, &notify, 1, TX_TIME_ASAP);
        let high = add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);

        assert_eq!(sched.pop_next(0).unwrap().id, high);
        assert_eq!(sched.pop_next(0).unwrap().id, low);
        assert!(sched.pop_next(0).is_none());
    }

    #[test]
    fn test_identical_tx_time_across_buckets_prefers_lower_priority_number() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        let low = add_simple(&mut sched, &notify, 1, 100);
        let high = add_simple(&mut sched, &notify, 0, 100);

        assert_eq!(sched.pop_next(100).unwrap().id, high);
        assert_eq!(sched.pop_next(100).unwrap().id, low);
    }

    #[test]
    fn test_ordered_insert_within_priority() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        let later = add_simple(&mut sched, &notify, 0, 200);
        let earlier = add_simple(&mut sched, &notify, 0, 100);

        assert_eq!(sched.pop_next(1000).unwrap().id, earlier);
        assert_eq!(sched.pop_next(1000).unwrap().id, later);
    }

    #[test]
    fn test_equal_tx_times_keep_submission_order() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        let first = add_simple(&mut sched, &notify, 0, 100);
        let second = add_simple(&mut sched, &notify, 0, 100);

        assert_eq!(sched.pop_next(100).unwrap().id, first);
        assert_eq!(sched.pop_next(100).unwrap().id, second);
    }

    #[test]
    fn test_only_head_of_bucket_is_eligible() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        add_simple(&mut sched, &notify, 0, 1000);
        // Later submission, earlier tx time: sorts ahead of the first
        let head = add_simple(&mut sched, &notify, 0, 500);

        assert_eq!(sched.pop_next(600).unwrap().id, head);
        assert!(sched.pop_next(600).is_none());
    }

    #[test]
    fn test_auto_repeat_reschedules_on_cadence() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        let id = sched.add(0, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 1000, 0);

        let first = sched.pop_next(0).expect("initially due");
        assert_eq!(first.id, id);

        assert!(sched.pop_next(500).is_none());

        let second = sched.pop_next(1000).expect("due again on cadence");
        assert_eq!(second.id, id);
        assert_eq!(second.tx_time_us, 1000);
    }

    #[test]
    fn test_auto_repeat_skips_missed_periods() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        sched.add(0, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 1000, 0);

        // Poll falls far behind: two periods missed
        let tx = sched.pop_next(2500).unwrap();
        assert_eq!(tx.tx_time_us, 0);

        // Next occurrence is the next grid point, not a burst of missed ones
        assert!(sched.pop_next(2999).is_none());
        let tx = sched.pop_next(3000).unwrap();
        assert_eq!(tx.tx_time_us, 3000);
        assert!(sched.pop_next(3000).is_none());
    }

    #[test]
    fn test_auto_repeat_exactly_on_grid_moves_strictly_forward() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        sched.add(0, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 1000, 0);

        assert!(sched.pop_next(0).is_some());
        // Re-inserted at 1000, not 0: no same-instant repop
        assert!(sched.pop_next(0).is_none());
    }

    #[test]
    fn test_auto_repeat_stops_at_end_time() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        sched.add(0, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 1000, 1500);

        assert!(sched.pop_next(0).is_some());
        assert!(sched.pop_next(1000).is_some());
        // Next occurrence would be 2000 >= 1500: not re-inserted
        assert!(sched.pop_next(10_000).is_none());
    }

    #[test]
    fn test_cancel_by_id_removes_exactly_the_pending_entry() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        let keep = add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        let cancel = add_simple(&mut sched, &notify, 1, TX_TIME_ASAP);

        assert_eq!(sched.cancel_by_id(cancel), 1);
        assert_eq!(sched.cancel_by_id(cancel), 0);
        assert_eq!(sched.cancel_by_id(0xDEAD), 0);

        assert_eq!(sched.pop_next(0).unwrap().id, keep);
        // Already popped: nothing left to cancel
        assert_eq!(sched.cancel_by_id(keep), 0);
    }

    #[test]
    fn test_cancel_and_count_by_recipient() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        sched.add(0, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0, 0);
        sched.add(1, TX_TIME_ASAP, &notify, packet_for(0x20), false, 0, 0, 0);
        sched.add(1, TX_TIME_ASAP, &notify, packet_for(0x01), false, 0, 0, 0);

        assert_eq!(sched.count_recipients(0x20), 2);
        assert_eq!(sched.count_recipients(0x01), 1);
        assert_eq!(sched.cancel_by_recipient(0x20), 2);
        assert_eq!(sched.count_recipients(0x20), 0);
        assert_eq!(sched.count_recipients(0x01), 1);
    }

    #[test]
    fn test_cancel_all() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(1);
        add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        add_simple(&mut sched, &notify, 1, 100);
        add_simple(&mut sched, &notify, 1, 200);

        assert_eq!(sched.cancel_all(), 3);
        assert_eq!(sched.cancel_all(), 0);
        assert!(sched.pop_next(u64::MAX).is_none());
    }

    #[test]
    fn test_cadence_result_is_at_or_after_now_and_congruent() {
        for &(now, period, offset) in &[
            (0u64, 1000u64, 0u64),
            (1, 1000, 0),
            (999, 1000, 0),
            (1000, 1000, 0),
            (2500, 1000, 0),
            (2500, 1000, 300),
            (17, 7, 3),
            (1_000_000_000, 333, 12),
        ] {
            let next = PrioritizedTxScheduler::compute_next_time_cadence(now, period, offset);
            assert!(next >= now, "next {next} < now {now}");
            assert!(next < now + period, "next {next} overshot a full period");
            assert_eq!(next % period, offset % period, "next {next} off the grid");
        }
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let notify = MockTransmitter::new();
        let mut sched = PrioritizedTxScheduler::new(0);
        let a = add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        let b = add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        let c = add_simple(&mut sched, &notify, 0, TX_TIME_ASAP);
        assert!(a < b && b < c);
    }
}
