// MIT License - Copyright (c) 2026 Peter Wright
// Deadline queue for the session's delayed and periodic work

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::control::ControlTarget;
use crate::protocol::Request;

/// Work the session does later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Send a request frame.
    Send(Request),
    /// Ask for the fault log, then re-arm.
    FaultCheck,
    /// Check a status frame arrived since the last check, then re-arm.
    LivenessCheck,
    /// Try connecting again.
    Reconnect,
    /// Advance the in-flight job for this target.
    AdvanceJob(ControlTarget),
}

#[derive(Debug)]
struct Entry {
    at: Instant,
    seq: u64,
    task: Task,
}

// Ordered by (deadline, insertion); the task itself plays no part.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// Min-heap of tasks keyed by deadline. Tasks with equal deadlines come out
/// in the order they were scheduled.
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<Entry>>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, at: Instant, task: Task) {
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            at,
            seq: self.seq,
            task,
        }));
    }

    pub fn schedule_in(&mut self, now: Instant, delay: Duration, task: Task) {
        self.schedule_at(now + delay, task);
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Remove and return the earliest task if it is due.
    pub fn pop_due(&mut self, now: Instant) -> Option<Task> {
        if self.next_deadline()? > now {
            return None;
        }
        self.heap.pop().map(|Reverse(e)| e.task)
    }

    /// Drop every pending task.
    pub fn cancel_all(&mut self) {
        self.heap.clear();
    }

    /// Drop the tasks matching `pred`.
    pub fn cancel(&mut self, mut pred: impl FnMut(&Task) -> bool) {
        self.heap.retain(|Reverse(e)| !pred(&e.task));
    }

    /// Count the tasks matching `pred`.
    pub fn count(&self, mut pred: impl FnMut(&Task) -> bool) -> usize {
        self.heap.iter().filter(|Reverse(e)| pred(&e.task)).count()
    }
}
