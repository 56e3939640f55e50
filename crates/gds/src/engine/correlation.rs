use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::report::{Report, ReportKind};

pub(crate) type Matcher = Box<dyn Fn(&Report) -> bool + Send>;

struct Waiter {
    id: u64,
    matcher: Matcher,
    tx: oneshot::Sender<Option<Report>>,
}

pub(crate) enum Registration {
    /// An unclaimed report already satisfies the wait.
    Ready(Report),
    /// The engine is not connected; the wait resolves to "no report".
    Closed,
    Pending {
        id: u64,
        rx: oneshot::Receiver<Option<Report>>,
    },
}

/// Per-kind FIFO of pending waits plus one unclaimed-report slot per kind.
#[derive(Default)]
pub(crate) struct Correlation {
    open: bool,
    next_id: u64,
    waiters: HashMap<ReportKind, VecDeque<Waiter>>,
    unclaimed: HashMap<ReportKind, Report>,
}

impl Correlation {
    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    /// Queue a wait for `kind`. With `discard_stale` an unclaimed report the
    /// matcher accepts is dropped instead of satisfying the wait, so only a
    /// report dispatched after this call can complete it.
    pub(crate) fn register(&mut self, kind: ReportKind, matcher: Matcher, discard_stale: bool) -> Registration {
        if !self.open {
            return Registration::Closed;
        }
        if self.unclaimed.get(&kind).is_some_and(|report| matcher(report)) {
            if let Some(report) = self.unclaimed.remove(&kind) {
                if !discard_stale {
                    return Registration::Ready(report);
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.next_id += 1;
        let id = self.next_id;
        self.waiters
            .entry(kind)
            .or_default()
            .push_back(Waiter { id, matcher, tx });
        Registration::Pending { id, rx }
    }

    /// Remove a timed-out wait. Returns false if it was already completed.
    pub(crate) fn withdraw(&mut self, kind: ReportKind, id: u64) -> bool {
        let Some(queue) = self.waiters.get_mut(&kind) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|waiter| waiter.id != id);
        queue.len() != before
    }

    /// Hand `report` to the oldest waiter that accepts it, or keep it in the
    /// unclaimed slot for its kind. Returns whether a waiter took it.
    pub(crate) fn complete(&mut self, report: Report) -> bool {
        let kind = report.kind();
        let mut report = report;

        if let Some(queue) = self.waiters.get_mut(&kind) {
            let mut index = 0;
            while index < queue.len() {
                // Waiters whose future was dropped (select!, abort) are pruned.
                if queue[index].tx.is_closed() {
                    queue.remove(index);
                    continue;
                }
                if !(queue[index].matcher)(&report) {
                    index += 1;
                    continue;
                }
                let Some(waiter) = queue.remove(index) else {
                    break;
                };
                match waiter.tx.send(Some(report)) {
                    Ok(()) => return true,
                    Err(Some(returned)) => report = returned,
                    Err(None) => return true,
                }
            }
        }

        self.unclaimed.insert(kind, report);
        false
    }

    pub(crate) fn clear_unclaimed(&mut self, kind: ReportKind) -> bool {
        self.unclaimed.remove(&kind).is_some()
    }

    /// Resolve every pending wait with "no report" and reset all state.
    pub(crate) fn cancel_all(&mut self) -> usize {
        self.open = false;
        self.unclaimed.clear();
        let mut cancelled = 0;
        for (_, queue) in self.waiters.drain() {
            for waiter in queue {
                if waiter.tx.send(None).is_ok() {
                    cancelled += 1;
                }
            }
        }
        cancelled
    }

    pub(crate) fn pending(&self, kind: ReportKind) -> usize {
        self.waiters
            .get(&kind)
            .map_or(0, |queue| queue.iter().filter(|w| !w.tx.is_closed()).count())
    }
}
