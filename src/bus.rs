//! In-cycle event queue with deterministic ordering.
//!
//! Blocks push onto the bus while they process; the simulation drains it
//! only after every block has finished the cycle.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::events::{Channel, SwarmEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub cycle: u64,
    pub channel: Channel,
    pub event: SwarmEvent,
}

/// Heap entry ordered earliest (cycle, seq) first.
struct Queued {
    cycle: u64,
    seq: u64,
    envelope: Envelope,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cycle == other.cycle && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap
        match other.cycle.cmp(&self.cycle) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    queue: BinaryHeap<Queued>,
    seq: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cycle: u64, channel: Channel, event: SwarmEvent) {
        self.seq += 1;
        self.queue.push(Queued {
            cycle,
            seq: self.seq,
            envelope: Envelope { cycle, channel, event },
        });
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop().map(|q| q.envelope)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(q) = self.queue.pop() {
            out.push(q.envelope);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MutationCommand;
    use crate::symbols::{Emotion, Tag};

    fn cmd(tag: Tag) -> SwarmEvent {
        SwarmEvent::Mutation(MutationCommand::new(Some(tag), None))
    }

    #[test]
    fn test_cycle_ordering() {
        let mut bus = EventBus::new();
        bus.push(3, Channel::MutationCommands, cmd(Tag::Fire));
        bus.push(1, Channel::MutationCommands, cmd(Tag::Water));
        bus.push(2, Channel::MutationCommands, cmd(Tag::Wind));
        let cycles: Vec<u64> = bus.drain().into_iter().map(|e| e.cycle).collect();
        assert_eq!(cycles, vec![1, 2, 3]);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_same_cycle_fifo() {
        let mut bus = EventBus::new();
        for tag in Tag::ALL {
            bus.push(7, Channel::MutationCommands, cmd(tag));
        }
        bus.push(
            7,
            Channel::MutationCommands,
            SwarmEvent::Mutation(MutationCommand::new(None, Some(Emotion::Joy))),
        );
        let order: Vec<Option<Tag>> = bus
            .drain()
            .into_iter()
            .map(|e| match e.event {
                SwarmEvent::Mutation(m) => m.new_tag,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            order,
            vec![Some(Tag::Fire), Some(Tag::Water), Some(Tag::Wind), Some(Tag::Earth), None]
        );
    }
}
