//! # Rendezvous channel.
//!
//! A [`Communicator`] transfers one 32-bit word at a time from a speaker to
//! a listener. Neither side returns before it has been paired with the
//! other: [`Communicator::speak`] blocks until some listener took the word,
//! and [`Communicator::listen`] blocks until some speaker provided one.
//!
//! A single mutex guards a queue of unmatched speakers and a queue of
//! unmatched listeners. An arriving thread first looks for a partner in the
//! opposite queue; only if there is none does it enqueue itself. Hence at
//! most one of the queues is non-empty whenever the mutex is free.
//!
//! Every waiting thread owns a slot with its own condition variable, so the
//! partner wakes exactly the thread it was paired with.
use crate::sync::{ConditionVariable, Mutex};
use kestrel::sync::atomic::{AtomicBool, AtomicI32};
use std::{collections::VecDeque, sync::Arc};

struct Slot {
    word: AtomicI32,
    delivered: AtomicBool,
    cond: ConditionVariable,
}

#[derive(Default)]
struct Queues {
    speakers: VecDeque<Arc<Slot>>,
    listeners: VecDeque<Arc<Slot>>,
}

/// A synchronous channel of 32-bit words.
#[derive(Default)]
pub struct Communicator {
    queues: Mutex<Queues>,
}

impl Communicator {
    /// Creates a channel with no pending speaker or listener.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, word: i32) -> Arc<Slot> {
        Arc::new(Slot {
            word: AtomicI32::new(word),
            delivered: AtomicBool::new(false),
            cond: ConditionVariable::new(&self.queues),
        })
    }

    /// Sends `word`, blocking until a listener has received it.
    pub fn speak(&self, word: i32) {
        let mut queues = self.queues.lock();
        if let Some(listener) = queues.listeners.pop_front() {
            listener.word.store(word);
            listener.delivered.store(true);
            listener.cond.signal(&queues);
            queues.unlock();
            return;
        }
        let slot = self.slot(word);
        queues.speakers.push_back(slot.clone());
        let queues = slot.cond.wait_while(queues, |_| !slot.delivered.load());
        queues.unlock();
    }

    /// Receives a word, blocking until a speaker provides one.
    pub fn listen(&self) -> i32 {
        let mut queues = self.queues.lock();
        if let Some(speaker) = queues.speakers.pop_front() {
            let word = speaker.word.load();
            speaker.delivered.store(true);
            speaker.cond.signal(&queues);
            queues.unlock();
            return word;
        }
        let slot = self.slot(0);
        queues.listeners.push_back(slot.clone());
        let queues = slot.cond.wait_while(queues, |_| !slot.delivered.load());
        queues.unlock();
        slot.word.load()
    }

    /// Number of unmatched `(speakers, listeners)`.
    pub fn pending(&self) -> (usize, usize) {
        let queues = self.queues.lock();
        let pending = (queues.speakers.len(), queues.listeners.len());
        queues.unlock();
        pending
    }
}
