//! Bounded work queue shared by chunk uploads and unzip batches.
//!
//! At most `width` futures are in flight. Completed work is handed to a
//! handler that may put items back at either end of the queue or cancel the
//! rest. After a cancel no new work starts; futures already in flight run to
//! completion and their outputs are discarded.

use std::collections::VecDeque;
use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

/// What the handler wants after seeing one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Keep draining the queue
    Continue,
    /// Stop starting new work
    Cancel,
}

/// Counters from one [`BoundedQueue::drive`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveStats {
    /// Futures started
    pub started: usize,
    /// Outputs passed to the handler
    pub handled: usize,
    /// Outputs dropped because the run was cancelled
    pub discarded: usize,
    /// Items never started because the run was cancelled
    pub abandoned: usize,
    /// Largest number of futures in flight at once
    pub peak_in_flight: usize,
    /// Whether the handler cancelled the run
    pub cancelled: bool,
}

/// Access to the pending queue from inside a handler.
#[derive(Debug)]
pub struct Requeue<'a, I> {
    pending: &'a mut VecDeque<I>,
}

impl<I> Requeue<'_, I> {
    /// Run `item` after everything already queued.
    pub fn push_back(&mut self, item: I) {
        self.pending.push_back(item);
    }

    /// Run `items` next, in the given order.
    pub fn push_front_all(&mut self, items: impl IntoIterator<Item = I>) {
        let items: Vec<I> = items.into_iter().collect();
        for item in items.into_iter().rev() {
            self.pending.push_front(item);
        }
    }

    /// Items still waiting to start.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting to start.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// FIFO of work items drained with bounded concurrency.
#[derive(Debug)]
pub struct BoundedQueue<I> {
    pending: VecDeque<I>,
    width: usize,
}

impl<I> BoundedQueue<I> {
    /// Create an empty queue; a width of zero is treated as one.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            width: width.max(1),
        }
    }

    /// Create a queue holding `items` in order.
    #[must_use]
    pub fn with_items(width: usize, items: impl IntoIterator<Item = I>) -> Self {
        let mut queue = Self::new(width);
        queue.pending.extend(items);
        queue
    }

    /// Maximum number of futures in flight.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the queue.
    ///
    /// `work` turns an item into a future; `handle` sees every output in
    /// completion order and may requeue items or cancel the run. Returns when
    /// nothing is pending and nothing is in flight.
    pub async fn drive<F, Fut, H>(mut self, mut work: F, mut handle: H) -> DriveStats
    where
        F: FnMut(I) -> Fut,
        Fut: Future,
        H: FnMut(Fut::Output, &mut Requeue<'_, I>) -> Next,
    {
        let mut in_flight = FuturesUnordered::new();
        let mut stats = DriveStats::default();

        loop {
            while !stats.cancelled && in_flight.len() < self.width {
                let Some(item) = self.pending.pop_front() else {
                    break;
                };
                in_flight.push(work(item));
                stats.started += 1;
            }
            stats.peak_in_flight = stats.peak_in_flight.max(in_flight.len());

            let Some(output) = in_flight.next().await else {
                break;
            };

            if stats.cancelled {
                stats.discarded += 1;
                continue;
            }

            stats.handled += 1;
            let mut requeue = Requeue {
                pending: &mut self.pending,
            };
            if handle(output, &mut requeue) == Next::Cancel {
                stats.cancelled = true;
            }
        }

        stats.abandoned = self.pending.len();
        stats
    }
}
