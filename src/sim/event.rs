use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::scheduler::{Job, JobId, SimTime};

/// Simultaneous events are applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Submission,
    Completion,
    Kill,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A new job enters the system.
    Submit(Job),
    /// The job ran to the end of its run time.
    Complete(JobId),
    /// The job is killed, either on request or at its walltime.
    Kill { job_id: JobId, walltime: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    pub time: SimTime,
    pub seq: u64,
    pub payload: EventPayload,
}

impl SimEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Submit(_) => EventKind::Submission,
            EventPayload::Complete(_) => EventKind::Completion,
            EventPayload::Kill { .. } => EventKind::Kill,
        }
    }

    pub fn job_id(&self) -> JobId {
        match &self.payload {
            EventPayload::Submit(job) => job.id,
            EventPayload::Complete(id) => *id,
            EventPayload::Kill { job_id, .. } => *job_id,
        }
    }

    fn key(&self) -> (EventKind, JobId, u64) {
        (self.kind(), self.job_id(), self.seq)
    }
}

impl Eq for SimEvent {}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the earliest event first.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.key().cmp(&self.key()))
    }
}

/// Future events in delivery order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<SimEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: SimTime, payload: EventPayload) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(SimEvent { time, seq, payload });
    }

    pub fn pop(&mut self) -> Option<SimEvent> {
        self.heap.pop()
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|e| e.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
