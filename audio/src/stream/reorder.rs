//! Reorder window for incoming packets.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::codec::opus::Packet;

/// Queued packet, ordered so that the heap pops the lowest sequence first.
#[derive(Debug)]
struct Queued(Packet);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.sequence() == other.0.sequence()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reverse ordering for min-heap
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.sequence().cmp(&self.0.sequence())
    }
}

/// Why a packet was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    /// Its sequence index was already played or concealed.
    Late,
    /// A packet with the same sequence index is already queued.
    Duplicate,
}

/// Next step of playback.
#[derive(Debug)]
pub(crate) enum Next {
    /// The packet at the expected sequence index.
    Packet(Packet),
    /// This many sequence indices are missing before the head packet.
    Gap(u64),
}

/// Min-heap of packets keyed by sequence index.
///
/// Holds up to `depth` packets waiting for a missing predecessor; once more
/// arrive, the gap is given up and reported.
#[derive(Debug)]
pub(crate) struct ReorderWindow {
    depth: usize,
    heap: BinaryHeap<Queued>,
    next: Option<u64>,
}

impl ReorderWindow {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            depth,
            heap: BinaryHeap::with_capacity(depth + 1),
            next: None,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the sequence index expected next, once playback started.
    pub(crate) fn next_sequence(&self) -> Option<u64> {
        self.next
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn push(&mut self, packet: Packet) -> Result<(), Rejected> {
        let seq = packet.sequence();
        if self.next.is_some_and(|next| seq < next) {
            return Err(Rejected::Late);
        }
        if self.heap.iter().any(|q| q.0.sequence() == seq) {
            return Err(Rejected::Duplicate);
        }
        self.heap.push(Queued(packet));
        Ok(())
    }

    /// Returns the next playback step, or `None` if the window should keep
    /// waiting. `force` gives up on gaps regardless of depth.
    pub(crate) fn next(&mut self, force: bool) -> Option<Next> {
        let head = self.heap.peek()?.0.sequence();
        match self.next {
            Some(next) if head == next => self.pop(),
            _ if !force && self.heap.len() <= self.depth => None,
            None => self.pop(),
            Some(next) => {
                self.next = Some(head);
                Some(Next::Gap(head - next))
            }
        }
    }

    fn pop(&mut self) -> Option<Next> {
        let Queued(packet) = self.heap.pop()?;
        self.next = Some(packet.sequence() + 1);
        Some(Next::Packet(packet))
    }

    /// Marks the expected sequence index as lost. Returns true if a queued
    /// packet with that index was discarded.
    pub(crate) fn skip(&mut self) -> bool {
        let Some(next) = self.next else {
            return false;
        };
        self.next = Some(next + 1);
        let before = self.heap.len();
        self.heap.retain(|q| q.0.sequence() != next);
        self.heap.len() != before
    }

    /// Drops all queued packets and forgets the playback position.
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
        self.next = None;
    }
}
