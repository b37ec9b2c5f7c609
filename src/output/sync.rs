//! Output synchronization: unordered and slot-ordered disciplines.
//!
//! All buffered writers of one search invocation share a single [`OutputSync`].
//! In unordered mode the sync is plain mutual exclusion: whole flushes are
//! atomic with respect to each other but carry no inter-worker ordering. In
//! ordered mode every worker draws a monotonic slot ticket and output is
//! committed in strict slot order; workers that produce no output mark their
//! slot complete so the head can advance past them without stalling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Sentinel slot value meaning the sync has been cancelled. Sticky once set.
const STOP: u64 = u64::MAX;

/// Output commit discipline shared by the writers of one search invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Mutual exclusion only; flushes from different workers may interleave
    /// in any order but never byte-wise.
    Unordered,
    /// Slot-turn discipline; bytes of slot `i` reach the sink strictly
    /// before bytes of slot `i + 1`.
    Ordered,
}

/// Growable bitset of completed slots, indexed relative to the head slot.
///
/// Bit `k` set means "slot `head + k` has signalled completion but has not
/// yet been drained past". Mirrors the shift-down drain of the head advance.
#[derive(Debug, Default)]
struct SlotBits {
    words: Vec<u64>,
}

impl SlotBits {
    fn insert(&mut self, idx: u64) {
        let word = (idx / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (idx % 64);
    }

    fn first(&self) -> bool {
        self.words.first().is_some_and(|w| w & 1 != 0)
    }

    /// Shift every bit down by one position (bit `k + 1` becomes bit `k`).
    fn shift_down(&mut self) {
        let n = self.words.len();
        for i in 0..n {
            self.words[i] >>= 1;
            if i + 1 < n {
                self.words[i] |= self.words[i + 1] << 63;
            }
        }
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

#[derive(Debug)]
struct TurnState {
    /// True while some writer holds the output lock.
    held: bool,
    /// Slot currently allowed to emit, or [`STOP`] once cancelled.
    last: u64,
    /// Completion marks for slots that ran ahead of the head.
    completed: SlotBits,
}

/// Synchronization object shared by all [`OutputBuffer`](super::OutputBuffer)
/// writers of a single search invocation.
///
/// The turn state lives under one mutex that is only ever held transiently;
/// "holding the output lock" is a flag inside it. Marking a completed slot
/// therefore never waits on an emitting writer, and cancellation releases
/// every waiter even while a stalled writer still owns the output lock.
#[derive(Debug)]
pub struct OutputSync {
    mode: SyncMode,
    state: Mutex<TurnState>,
    turn: Condvar,
    /// Next slot ticket to hand out.
    next: AtomicU64,
}

impl OutputSync {
    /// Create a sync object with the given commit discipline.
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            state: Mutex::new(TurnState {
                held: false,
                last: 0,
                completed: SlotBits::default(),
            }),
            turn: Condvar::new(),
            next: AtomicU64::new(0),
        }
    }

    /// The commit discipline of this sync object.
    pub const fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Draw the next slot ticket. Tickets are monotonic from zero.
    pub fn next_slot(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of tickets handed out so far.
    pub fn slots_issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// The slot currently allowed to emit. After every issued slot has
    /// finished this equals [`slots_issued`](Self::slots_issued).
    pub fn head_slot(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last
    }

    /// True once [`cancel`](Self::cancel) has been called.
    pub fn cancelled(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last == STOP
    }

    /// Cancel the sync: release every waiter, present and future. Sticky.
    pub fn cancel(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.last = STOP;
        drop(st);
        self.turn.notify_all();
    }

    /// Acquire the output lock for `slot`, waiting for its turn in ordered
    /// mode. Returns `false` without acquiring when the sync was cancelled.
    fn acquire(&self, owns: &mut bool, slot: u64) -> bool {
        if *owns {
            return true;
        }
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match self.mode {
            SyncMode::Unordered => {
                while st.held && st.last != STOP {
                    st = self.turn.wait(st).unwrap_or_else(|e| e.into_inner());
                }
            }
            SyncMode::Ordered => {
                // Only the writer whose slot equals the head may proceed; the
                // previous holder always clears `held` before advancing it.
                while st.last != STOP && slot != st.last {
                    st = self.turn.wait(st).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
        if st.last == STOP {
            return false;
        }
        st.held = true;
        *owns = true;
        true
    }

    /// Acquire the output lock only if that cannot block on another writer.
    fn try_acquire(&self, owns: &mut bool) -> bool {
        if *owns {
            return true;
        }
        match self.mode {
            SyncMode::Unordered => {
                let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if st.held || st.last == STOP {
                    false
                } else {
                    st.held = true;
                    *owns = true;
                    true
                }
            }
            // A writer in ordered mode never jumps another's turn.
            SyncMode::Ordered => false,
        }
    }

    /// Release the output lock in unordered mode; a no-op in ordered mode,
    /// where the lock is surrendered by [`finish`](Self::finish).
    fn release(&self, owns: &mut bool) {
        if self.mode == SyncMode::Unordered && *owns {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.held = false;
            *owns = false;
            drop(st);
            self.turn.notify_all();
        }
    }

    /// Mark `slot` finished. In ordered mode, if `slot` is the head, advance
    /// the head past every consecutively completed slot and surrender the
    /// output lock; otherwise deposit a completion mark and move on.
    fn finish(&self, owns: &mut bool, slot: u64) {
        if self.mode != SyncMode::Ordered {
            return;
        }
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if st.last == STOP {
            if *owns {
                st.held = false;
                *owns = false;
            }
        } else if slot == st.last {
            loop {
                st.last += 1;
                st.completed.shift_down();
                if !st.completed.first() {
                    break;
                }
            }
            st.held = false;
            *owns = false;
        } else {
            let offset = slot - st.last;
            st.completed.insert(offset);
            drop(st);
            return;
        }
        drop(st);
        self.turn.notify_all();
    }
}

/// One writer's handle onto a shared [`OutputSync`].
///
/// Writers hold shared ownership of the sync; the sync knows nothing of its
/// writers. The handle carries the writer's slot ticket and whether the
/// writer currently owns the output lock.
#[derive(Debug)]
pub struct SyncHandle {
    sync: Arc<OutputSync>,
    slot: u64,
    owns: bool,
}

impl SyncHandle {
    /// Attach to a sync object, drawing a fresh slot ticket.
    pub fn new(sync: Arc<OutputSync>) -> Self {
        let slot = sync.next_slot();
        Self {
            sync,
            slot,
            owns: false,
        }
    }

    /// Attach to a sync object with an explicit slot number.
    pub const fn with_slot(sync: Arc<OutputSync>, slot: u64) -> Self {
        Self {
            sync,
            slot,
            owns: false,
        }
    }

    /// This handle's slot ticket.
    pub const fn slot(&self) -> u64 {
        self.slot
    }

    /// Re-ticket the handle for a new unit of work (ordered mode).
    pub const fn begin(&mut self, slot: u64) {
        self.slot = slot;
    }

    /// Acquire the output lock, waiting for this slot's turn in ordered
    /// mode. Returns `false` when the sync was cancelled.
    pub fn acquire(&mut self) -> bool {
        self.sync.acquire(&mut self.owns, self.slot)
    }

    /// Acquire without blocking on another writer's turn.
    pub fn try_acquire(&mut self) -> bool {
        self.sync.try_acquire(&mut self.owns)
    }

    /// Release the lock (unordered mode only).
    pub fn release(&mut self) {
        self.sync.release(&mut self.owns);
    }

    /// Signal that this slot's output is complete.
    pub fn finish(&mut self) {
        self.sync.finish(&mut self.owns, self.slot);
    }

    /// Cancel the shared sync object.
    pub fn cancel(&self) {
        self.sync.cancel();
    }

    /// True once the shared sync object was cancelled.
    pub fn cancelled(&self) -> bool {
        self.sync.cancelled()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        // A handle dropped while owning the lock must not wedge its peers.
        if self.owns {
            match self.sync.mode {
                SyncMode::Unordered => self.sync.release(&mut self.owns),
                SyncMode::Ordered => self.sync.finish(&mut self.owns, self.slot),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unordered_mutual_exclusion() {
        let sync = Arc::new(OutputSync::new(SyncMode::Unordered));
        let mut a = SyncHandle::new(sync.clone());
        let mut b = SyncHandle::new(sync);

        assert!(a.acquire());
        assert!(!b.try_acquire());
        a.release();
        assert!(b.try_acquire());
        b.release();
    }

    #[test]
    fn test_ordered_turns_advance_in_slot_order() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));
        let (tx, rx) = mpsc::channel::<u64>();

        let mut handles = Vec::new();
        // Spawn in reverse slot order so later slots are waiting first.
        for slot in (0..4u64).rev() {
            let sync = sync.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let mut h = SyncHandle::with_slot(sync, slot);
                assert!(h.acquire());
                tx.send(slot).unwrap();
                h.finish();
            }));
        }
        drop(tx);

        let order: Vec<u64> = rx.iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sync.head_slot(), 4);
    }

    #[test]
    fn test_silent_slots_do_not_stall_the_head() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));

        // Slot 1 produces nothing and finishes early, out of order.
        let mut silent = SyncHandle::with_slot(sync.clone(), 1);
        silent.finish();
        assert_eq!(sync.head_slot(), 0);

        // Slot 0 finishing drains past the completed slot 1.
        let mut head = SyncHandle::with_slot(sync.clone(), 0);
        assert!(head.acquire());
        head.finish();
        assert_eq!(sync.head_slot(), 2);
    }

    #[test]
    fn test_liveness_every_finish_reaches_next() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let sync = sync.clone();
            handles.push(thread::spawn(move || {
                let mut h = SyncHandle::new(sync);
                // Odd slots emit, even slots stay silent.
                if h.slot() % 2 == 1 {
                    assert!(h.acquire());
                }
                h.finish();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sync.head_slot(), sync.slots_issued());
    }

    #[test]
    fn test_cancel_releases_waiters() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));

        // Slot 0 holds the lock and stalls.
        let mut holder = SyncHandle::with_slot(sync.clone(), 0);
        assert!(holder.acquire());

        let mut waiters = Vec::new();
        for slot in [1u64, 2] {
            let sync = sync.clone();
            waiters.push(thread::spawn(move || {
                let mut h = SyncHandle::with_slot(sync, slot);
                // Returns false promptly instead of waiting forever.
                assert!(!h.acquire());
            }));
        }

        thread::sleep(Duration::from_millis(50));
        sync.cancel();
        for w in waiters {
            w.join().unwrap();
        }
        assert!(sync.cancelled());
    }

    #[test]
    fn test_cancel_is_sticky() {
        let sync = Arc::new(OutputSync::new(SyncMode::Unordered));
        sync.cancel();
        assert!(sync.cancelled());

        let mut h = SyncHandle::new(sync.clone());
        assert!(!h.acquire());
        assert!(!h.try_acquire());
        assert!(sync.cancelled());
    }

    #[test]
    fn test_slot_bits_shift_across_words() {
        let mut bits = SlotBits::default();
        bits.insert(63);
        bits.insert(64);
        bits.insert(130);
        for _ in 0..63 {
            bits.shift_down();
        }
        assert!(bits.first());
        bits.shift_down();
        assert!(bits.first());
        bits.shift_down();
        assert!(!bits.first());
    }
}
