/*
Latency countdown queue for the protocol model.

Messages do not carry an absolute arrival time. Instead every entry holds a remaining latency
which the owner ages once per simulated step; an entry becomes deliverable when its countdown
reaches zero. Entries keep their arrival order: a not-yet-ready entry never lets a later ready
entry overtake it in the queue, it only stays in place while the ready ones are taken out.
*/

use std::collections::VecDeque;

pub type Cycle = u64;
pub type Latency = u32;

/// Anything that can sit in a [`DelayQueue`].
pub trait Delayed {
    fn latency(&self) -> Latency;
    fn latency_mut(&mut self) -> &mut Latency;

    // Decrement once, never below zero.
    fn age(&mut self) {
        let latency = self.latency_mut();
        *latency = latency.saturating_sub(1);
    }

    fn is_ready(&self) -> bool {
        self.latency() == 0
    }
}

#[derive(Debug)]
pub struct DelayQueue<T> {
    entries: VecDeque<T>,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T: Delayed> DelayQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn age_all(&mut self) {
        self.entries.iter_mut().for_each(Delayed::age);
    }

    // Remove every ready entry in arrival order; entries still in flight keep their relative
    // order for a later step.
    pub fn take_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        let mut pending = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.is_ready() {
                ready.push(entry);
            } else {
                pending.push_back(entry);
            }
        }
        self.entries = pending;
        ready
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
