// queue.rs -- generic priority-tagged outbound packet queue.
//
// Converted from: myq2-original/qcommon/net_queue.rs's PacketQueue, which is
// backed by a crossbeam-channel so producer threads can hand packets to a
// sender thread. That shape doesn't fit here: spec.md ss3 requires a single
// cooperative event loop with no worker threads, so this is a plain
// VecDeque behind one priority index, drained synchronously by the realm
// session each tick.

use std::collections::VecDeque;

/// Outbound priority classes, ordered low to high. A realm session drains
/// higher classes before lower ones, but never starves a lower class
/// indefinitely: one packet is taken per class per drain pass round-robin
/// style is left to the caller, this type only orders within a single pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    GameRefresh = 0,
    GameList = 1,
    Default = 2,
    ChatBlocking = 3,
}

/// A priority queue of outbound items, FIFO within a priority class.
pub struct PriorityQueue<T> {
    lanes: [VecDeque<T>; 4],
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            lanes: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
        }
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane_index(priority: Priority) -> usize {
        priority as u8 as usize
    }

    pub fn push(&mut self, priority: Priority, item: T) {
        self.lanes[Self::lane_index(priority)].push_back(item);
    }

    /// Pop the single highest-priority item across all lanes.
    pub fn pop(&mut self) -> Option<T> {
        for lane in self.lanes.iter_mut().rev() {
            if let Some(item) = lane.pop_front() {
                return Some(item);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|l| l.is_empty())
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.lanes[Self::lane_index(priority)].len()
    }

    /// Drop every queued item. Used when a realm session disconnects and
    /// its backlog is no longer meaningful.
    pub fn clear(&mut self) {
        for lane in &mut self.lanes {
            lane.clear();
        }
    }

    /// Retain only items matching `keep`, across every lane. Used by
    /// flood-control to expire a priority class's stale entries (e.g. a
    /// GAME_REFRESH superseded by a newer one for the same game).
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for lane in &mut self.lanes {
            lane.retain(&mut keep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_drains_first() {
        let mut q = PriorityQueue::new();
        q.push(Priority::Default, "default-1");
        q.push(Priority::ChatBlocking, "chat-1");
        q.push(Priority::GameRefresh, "refresh-1");

        assert_eq!(q.pop(), Some("chat-1"));
        assert_eq!(q.pop(), Some("default-1"));
        assert_eq!(q.pop(), Some("refresh-1"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn fifo_within_a_lane() {
        let mut q = PriorityQueue::new();
        q.push(Priority::Default, 1);
        q.push(Priority::Default, 2);
        q.push(Priority::Default, 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn retain_filters_across_lanes() {
        let mut q = PriorityQueue::new();
        q.push(Priority::GameRefresh, ("game-1", 1));
        q.push(Priority::GameRefresh, ("game-1", 2));
        q.push(Priority::GameList, ("game-2", 1));
        q.retain(|(name, _)| *name != "game-1");
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(("game-2", 1)));
    }

    #[test]
    fn clear_empties_every_lane() {
        let mut q = PriorityQueue::new();
        q.push(Priority::Default, 1);
        q.push(Priority::ChatBlocking, 2);
        q.clear();
        assert!(q.is_empty());
    }
}
