use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::TickRecord;

/// Padding to prevent false sharing between the producer and consumer cursors
#[repr(align(64))]
struct CacheLinePadded<T>(T);

/// What a producer hands to the shard worker
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub tick: Arc<TickRecord>,
    pub enqueued_at: Instant,
}

impl SlotEntry {
    pub fn new(tick: Arc<TickRecord>) -> Self {
        Self {
            tick,
            enqueued_at: Instant::now(),
        }
    }
}

// Slot phases, packed under the sequence they belong to
const EMPTY: u64 = 0;
const WRITING: u64 = 1;
const PUBLISHED: u64 = 2;

#[inline]
fn stamp(sequence: u64, phase: u64) -> u64 {
    (sequence << 2) | phase
}

struct Slot {
    entry: UnsafeCell<Option<SlotEntry>>,

    /// Which sequence owns the slot and how far it got: `EMPTY` (free for
    /// that sequence's producer), `WRITING` (producer holds the cell) or
    /// `PUBLISHED` (consumer holds the cell). Carrying the sequence keeps a
    /// stale lap from ever matching.
    state: AtomicU64,
}

/// Multi-producer, single-consumer ring of reusable tick slots
///
/// Producers reserve a sequence on the `produced` cursor, claim the slot
/// (`EMPTY` to `WRITING`), write it, then publish it with a release store.
/// The single consumer observes the publication with an acquire load, takes
/// the entry, hands the slot to the next lap's sequence and advances
/// `consumed`. `produced - consumed` never exceeds the capacity.
///
/// A consumer that gives up on a reservation (`try_skip`) can only do so
/// while the slot is still unclaimed; the stalled producer's claim then fails
/// and its entry is handed back, so it never touches a slot the next lap owns.
pub struct TickRing {
    /// Pre-allocated slots (power of 2)
    slots: Box<[Slot]>,

    capacity: usize,

    /// Mask for fast modulo: index & mask == index % capacity
    index_mask: usize,

    /// Next sequence to hand out to a producer
    produced: CacheLinePadded<AtomicU64>,

    /// Next sequence the consumer will read (only written by the consumer)
    consumed: CacheLinePadded<AtomicU64>,
}

// Safety: a slot's cell is only touched by the producer whose claim moved it
// to `WRITING`, or by the single consumer once it reads `PUBLISHED`.
unsafe impl Send for TickRing {}
unsafe impl Sync for TickRing {}

impl TickRing {
    /// Create a new ring with given capacity (must be power of 2)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be power of 2");

        let slots: Vec<Slot> = (0..capacity)
            .map(|index| Slot {
                entry: UnsafeCell::new(None),
                state: AtomicU64::new(stamp(index as u64, EMPTY)),
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            capacity,
            index_mask: capacity - 1,
            produced: CacheLinePadded(AtomicU64::new(0)),
            consumed: CacheLinePadded(AtomicU64::new(0)),
        }
    }

    /// Reserve, write and publish one entry (producer side, never blocks)
    ///
    /// Returns the sequence, or hands the entry back if the ring is full or
    /// the consumer already skipped the reservation.
    #[inline]
    pub fn try_push(&self, entry: SlotEntry) -> Result<u64, SlotEntry> {
        let Some(sequence) = self.try_reserve() else {
            return Err(entry);
        };
        self.publish(sequence, entry)
    }

    #[inline]
    fn publish(&self, sequence: u64, entry: SlotEntry) -> Result<u64, SlotEntry> {
        let slot = &self.slots[self.index(sequence)];
        if slot
            .state
            .compare_exchange(
                stamp(sequence, EMPTY),
                stamp(sequence, WRITING),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return Err(entry);
        }

        unsafe {
            *slot.entry.get() = Some(entry);
        }
        slot.state.store(stamp(sequence, PUBLISHED), Ordering::Release);

        Ok(sequence)
    }

    /// Claim the next sequence unless that would overrun unconsumed slots
    #[inline]
    fn try_reserve(&self) -> Option<u64> {
        let mut produced = self.produced.0.load(Ordering::Relaxed);
        loop {
            let consumed = self.consumed.0.load(Ordering::Acquire);
            if produced.saturating_sub(consumed) >= self.capacity as u64 {
                return None;
            }

            match self.produced.0.compare_exchange_weak(
                produced,
                produced + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(produced),
                Err(current) => produced = current,
            }
        }
    }

    /// Whether the slot for `sequence` has been published (consumer)
    #[inline]
    pub fn is_ready(&self, sequence: u64) -> bool {
        self.slots[self.index(sequence)]
            .state
            .load(Ordering::Acquire)
            == stamp(sequence, PUBLISHED)
    }

    /// Move the published entry out of its slot (consumer only)
    ///
    /// Hands the slot to the next lap's sequence; producers can reach it once
    /// `advance` moves the consumed cursor past `sequence`.
    #[inline]
    pub fn take(&self, sequence: u64) -> Option<SlotEntry> {
        if !self.is_ready(sequence) {
            return None;
        }

        let slot = &self.slots[self.index(sequence)];
        let entry = unsafe { (*slot.entry.get()).take() };
        slot.state
            .store(stamp(self.next_lap(sequence), EMPTY), Ordering::Release);
        entry
    }

    /// Give up on a reservation whose producer never wrote it (consumer only)
    ///
    /// Returns true when the slot was handed to the next lap; the stalled
    /// producer's later publish is refused. Returns false when the producer
    /// published after all, in which case the entry must be taken as usual. A
    /// producer caught mid-write is waited for.
    pub fn try_skip(&self, sequence: u64) -> bool {
        let slot = &self.slots[self.index(sequence)];
        loop {
            match slot.state.compare_exchange(
                stamp(sequence, EMPTY),
                stamp(self.next_lap(sequence), EMPTY),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) if current == stamp(sequence, PUBLISHED) => return false,
                Err(current) if current == stamp(sequence, WRITING) => hint::spin_loop(),
                Err(_) => return true,
            }
        }
    }

    /// Mark `sequence` as consumed (consumer only)
    #[inline]
    pub fn advance(&self, sequence: u64) {
        self.consumed.0.store(sequence + 1, Ordering::Release);
    }

    #[inline]
    fn next_lap(&self, sequence: u64) -> u64 {
        sequence + self.capacity as u64
    }

    #[inline]
    fn index(&self, sequence: u64) -> usize {
        (sequence as usize) & self.index_mask
    }

    /// Sequences reserved so far
    pub fn produced(&self) -> u64 {
        self.produced.0.load(Ordering::Acquire)
    }

    /// Sequences consumed so far
    pub fn consumed(&self) -> u64 {
        self.consumed.0.load(Ordering::Acquire)
    }

    /// Reserved but not yet consumed
    pub fn pending(&self) -> u64 {
        let consumed = self.consumed();
        self.produced().saturating_sub(consumed)
    }

    pub fn has_pending(&self) -> bool {
        self.pending() > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve a sequence without ever publishing it, simulating a producer
    /// that died mid-write
    #[cfg(test)]
    pub(crate) fn reserve_unpublished(&self) -> Option<u64> {
        self.try_reserve()
    }

    /// Complete a reservation made with `reserve_unpublished`
    #[cfg(test)]
    pub(crate) fn publish_reserved(&self, sequence: u64, entry: SlotEntry) -> Result<u64, SlotEntry> {
        self.publish(sequence, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::thread;

    fn entry(symbol: &str, price: f64) -> SlotEntry {
        SlotEntry::new(Arc::new(TickRecord::ltp(symbol, price)))
    }

    #[test]
    fn test_ring_creation() {
        let ring = TickRing::new(1024);
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.pending(), 0);
        assert!(!ring.has_pending());
    }

    #[test]
    #[should_panic(expected = "Capacity must be power of 2")]
    fn test_non_power_of_two_capacity() {
        let _ring = TickRing::new(1000);
    }

    #[test]
    fn test_push_take_in_order() {
        let ring = TickRing::new(16);

        for i in 0..10 {
            assert_eq!(ring.try_push(entry("ACC", i as f64)).unwrap(), i);
        }
        assert_eq!(ring.pending(), 10);

        for seq in 0..10 {
            assert!(ring.is_ready(seq));
            let taken = ring.take(seq).unwrap();
            assert_eq!(taken.tick.last_price, seq as f64);
            ring.advance(seq);
        }

        assert_eq!(ring.pending(), 0);
        assert_eq!(ring.produced(), 10);
        assert_eq!(ring.consumed(), 10);
    }

    #[test]
    fn test_full_ring_rejects_instead_of_overwriting() {
        let ring = TickRing::new(8);

        for i in 0..8 {
            assert!(ring.try_push(entry("ACC", i as f64)).is_ok());
        }

        // C+1-th push must be handed back untouched
        let rejected = ring.try_push(entry("ACC", 99.0)).unwrap_err();
        assert_eq!(rejected.tick.last_price, 99.0);
        assert_eq!(ring.pending(), 8);

        // Oldest slot is still intact
        assert_eq!(ring.take(0).unwrap().tick.last_price, 0.0);
    }

    #[test]
    fn test_wraparound_reuses_slots_after_consumption() {
        let ring = TickRing::new(4);

        for round in 0..5u64 {
            for i in 0..4 {
                ring.try_push(entry("WRAP", (round * 4 + i) as f64)).unwrap();
            }
            assert!(ring.try_push(entry("WRAP", -1.0)).is_err());

            for i in 0..4 {
                let seq = round * 4 + i;
                assert_eq!(ring.take(seq).unwrap().tick.last_price, seq as f64);
                ring.advance(seq);
            }
        }

        assert_eq!(ring.consumed(), 20);
    }

    #[test]
    fn test_stale_lap_is_not_ready() {
        let ring = TickRing::new(2);

        ring.try_push(entry("LAP", 1.0)).unwrap();
        ring.take(0).unwrap();
        ring.advance(0);

        // Slot 0 now waits for sequence 2's producer, which has not written
        assert!(!ring.is_ready(2));
        assert!(ring.take(2).is_none());
    }

    #[test]
    fn test_unpublished_reservation_is_never_ready() {
        let ring = TickRing::new(8);
        let seq = ring.reserve_unpublished().unwrap();

        assert_eq!(ring.pending(), 1);
        assert!(!ring.is_ready(seq));
        assert!(ring.take(seq).is_none());
    }

    #[test]
    fn test_skipped_reservation_cannot_clobber_next_lap() {
        let ring = TickRing::new(2);

        // Producer stalls between reservation and write
        let stalled = ring.reserve_unpublished().unwrap();
        assert!(ring.try_skip(stalled));
        ring.advance(stalled);

        assert_eq!(ring.try_push(entry("NEXT", 1.0)).unwrap(), 1);
        assert_eq!(ring.try_push(entry("NEXT", 2.0)).unwrap(), 2);

        // The stalled producer resumes and is refused
        let refused = ring.publish_reserved(stalled, entry("LATE", 0.0)).unwrap_err();
        assert_eq!(&*refused.tick.symbol, "LATE");

        assert_eq!(ring.take(1).unwrap().tick.last_price, 1.0);
        ring.advance(1);
        assert!(ring.is_ready(2));
        assert_eq!(ring.take(2).unwrap().tick.last_price, 2.0);
        ring.advance(2);
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn test_skip_after_late_publish_keeps_entry() {
        let ring = TickRing::new(4);
        let seq = ring.reserve_unpublished().unwrap();
        ring.publish_reserved(seq, entry("LATE", 5.0)).unwrap();

        assert!(!ring.try_skip(seq));
        assert_eq!(ring.take(seq).unwrap().tick.last_price, 5.0);
    }

    #[test]
    fn test_skip_waits_out_concurrent_writer() {
        let ring = Arc::new(TickRing::new(4));
        let seq = ring.reserve_unpublished().unwrap();

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.publish_reserved(seq, entry("RACE", 7.0)).is_ok())
        };

        let skipped = ring.try_skip(seq);
        let written = writer.join().unwrap();

        // Exactly one side wins the slot
        assert_ne!(skipped, written);
        if written {
            assert_eq!(ring.take(seq).unwrap().tick.last_price, 7.0);
        } else {
            assert!(!ring.is_ready(seq));
        }
    }

    #[test]
    fn test_concurrent_producers_claim_unique_sequences() {
        let ring = Arc::new(TickRing::new(8192));
        let producers = 4;
        let per_producer = 1000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    let symbol = format!("P{}", p);
                    for i in 0..per_producer {
                        ring.try_push(entry(&symbol, i as f64)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ring.produced(), (producers * per_producer) as u64);

        // Every sequence published exactly once and each producer's ticks
        // appear in the order it pushed them
        let mut last_seen: HashMap<String, f64> = HashMap::new();
        for seq in 0..ring.produced() {
            let taken = ring.take(seq).expect("every reserved slot is published");
            let previous = last_seen
                .insert(taken.tick.symbol.to_string(), taken.tick.last_price)
                .unwrap_or(-1.0);
            assert!(taken.tick.last_price > previous);
            ring.advance(seq);
        }

        assert_eq!(last_seen.len(), producers);
    }
}
