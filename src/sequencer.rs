//! Order-preserving replay of concurrently completed work.
//!
//! Producers tag each item with its original position and send it from any
//! thread, in any order. The single consumer receives items strictly in
//! position order. Out-of-order arrivals wait in a dense buffer keyed by
//! their offset from the lowest position not yet released.

use std::collections::VecDeque;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::Context;
use crate::error::Result;

/// Create a sequencer for positions `0..len`.
///
/// The channel is sized to hold the whole batch, so producers never block
/// on each other even when completion order is fully reversed.
pub fn sequencer<T>(len: usize) -> (SequencerSender<T>, Sequencer<T>) {
    let (tx, rx) = bounded(len.max(1));
    (
        SequencerSender { tx },
        Sequencer {
            rx,
            pending: VecDeque::new(),
            next: 0,
            len,
        },
    )
}

/// Producer half. Clone one per concurrent task.
pub struct SequencerSender<T> {
    tx: Sender<(usize, T)>,
}

impl<T> Clone for SequencerSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> SequencerSender<T> {
    /// Hand over the item for `position`. Returns `false` if the consumer
    /// has gone away.
    pub fn send(&self, position: usize, item: T) -> bool {
        self.tx.send((position, item)).is_ok()
    }
}

/// Consumer half.
pub struct Sequencer<T> {
    rx: Receiver<(usize, T)>,
    pending: VecDeque<Option<T>>,
    next: usize,
    len: usize,
}

impl<T> Sequencer<T> {
    /// Receive the next item in position order.
    ///
    /// Returns `Ok(None)` once all `len` positions have been released, or
    /// early if every producer is dropped while a position is still missing.
    pub fn recv(&mut self, ctx: &Context) -> Result<Option<T>> {
        loop {
            if self.next >= self.len {
                return Ok(None);
            }
            if let Some(item) = self.pop_ready() {
                return Ok(Some(item));
            }
            match ctx.recv(&self.rx)? {
                Some((position, item)) => self.place(position, item),
                None => return Ok(None),
            }
        }
    }

    /// Positions released to the consumer so far.
    pub fn released(&self) -> usize {
        self.next
    }

    fn pop_ready(&mut self) -> Option<T> {
        match self.pending.front() {
            Some(Some(_)) => {
                self.next += 1;
                self.pending.pop_front().flatten()
            }
            _ => None,
        }
    }

    fn place(&mut self, position: usize, item: T) {
        // Stale, duplicate or out-of-range positions are dropped.
        if position < self.next || position >= self.len {
            return;
        }
        let offset = position - self.next;
        if self.pending.len() <= offset {
            self.pending.resize_with(offset + 1, || None);
        }
        let slot = &mut self.pending[offset];
        if slot.is_none() {
            *slot = Some(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn drain<T>(seq: &mut Sequencer<T>) -> Vec<T> {
        let ctx = Context::background();
        let mut out = Vec::new();
        while let Some(item) = seq.recv(&ctx).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn reversed_arrivals_come_out_in_order() {
        let (tx, mut seq) = sequencer(5);
        for pos in (0..5).rev() {
            assert!(tx.send(pos, pos * 10));
        }
        assert_eq!(drain(&mut seq), vec![0, 10, 20, 30, 40]);
        assert_eq!(seq.released(), 5);
    }

    #[test]
    fn concurrent_producers() {
        let (tx, mut seq) = sequencer(64);
        let handles: Vec<_> = (0..64)
            .map(|pos| {
                let tx = tx.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_micros(((64 - pos) * 50) as u64));
                    tx.send(pos, pos);
                })
            })
            .collect();
        drop(tx);

        let out = drain(&mut seq);
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(out, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn duplicates_and_out_of_range_are_ignored() {
        let (tx, mut seq) = sequencer(2);
        drop(tx);
        seq.place(1, "b");
        seq.place(1, "dup");
        seq.place(7, "out of range");
        seq.place(0, "a");
        assert_eq!(drain(&mut seq), vec!["a", "b"]);
    }

    #[test]
    fn missing_position_ends_early_when_producers_vanish() {
        let (tx, mut seq) = sequencer(3);
        tx.send(0, 'a');
        tx.send(2, 'c');
        drop(tx);
        assert_eq!(drain(&mut seq), vec!['a']);
    }

    #[test]
    fn cancellation_interrupts_wait() {
        let (_tx, mut seq) = sequencer::<u32>(1);
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert!(seq.recv(&ctx).unwrap_err().is_cancellation());
    }
}
