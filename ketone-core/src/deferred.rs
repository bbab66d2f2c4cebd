use futures::channel::oneshot;

use crate::error::StoreError;

/// Outcome of the work behind a record, collection, or commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Pending,
    Resolved,
    Rejected(StoreError),
}

impl Settlement {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }

    pub fn into_result(self) -> Option<Result<(), StoreError>> {
        match self {
            Settlement::Pending => None,
            Settlement::Resolved => Some(Ok(())),
            Settlement::Rejected(err) => Some(Err(err)),
        }
    }
}

pub(crate) type Waiter = Box<dyn FnOnce(&Result<(), StoreError>) + Send>;

/// Waiters that have been detached from their owner and must be fired once
/// every lock is released.
pub(crate) struct Fired {
    outcome: Result<(), StoreError>,
    waiters: Vec<Waiter>,
}

impl Fired {
    pub(crate) fn fire(self) {
        for waiter in self.waiters {
            waiter(&self.outcome);
        }
    }
}

/// Fires every batch of detached waiters, in order.
pub(crate) fn fire_all(batches: impl IntoIterator<Item = Fired>) {
    for fired in batches {
        fired.fire();
    }
}

/// One-shot completion with callbacks. Lives inside an owner's mutex; it never
/// runs callbacks itself.
#[derive(Default)]
pub(crate) struct Deferred {
    outcome: Option<Result<(), StoreError>>,
    waiters: Vec<Waiter>,
}

impl Deferred {
    pub(crate) fn settlement(&self) -> Settlement {
        match &self.outcome {
            None => Settlement::Pending,
            Some(Ok(())) => Settlement::Resolved,
            Some(Err(err)) => Settlement::Rejected(err.clone()),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.is_some()
    }

    /// Queues a waiter, or hands it back with the outcome if already settled.
    pub(crate) fn register(&mut self, waiter: Waiter) -> Option<(Waiter, Result<(), StoreError>)> {
        match &self.outcome {
            Some(outcome) => Some((waiter, outcome.clone())),
            None => {
                self.waiters.push(waiter);
                None
            }
        }
    }

    /// Records the outcome and detaches pending waiters. A second settlement is
    /// ignored.
    pub(crate) fn settle(&mut self, outcome: Result<(), StoreError>) -> Option<Fired> {
        if self.outcome.is_some() {
            return None;
        }
        self.outcome = Some(outcome.clone());
        Some(Fired {
            outcome,
            waiters: std::mem::take(&mut self.waiters),
        })
    }

    /// Starts a new round, keeping waiters that have not fired yet.
    pub(crate) fn reset(&mut self) {
        self.outcome = None;
    }
}

/// Registers a waiter through `register` and runs it immediately if the owner
/// had already settled. `register` is expected to take the owner's lock.
pub(crate) fn on_settled_with(
    register: impl FnOnce(Waiter) -> Option<(Waiter, Result<(), StoreError>)>,
    callback: impl FnOnce(&Result<(), StoreError>) + Send + 'static,
) {
    if let Some((waiter, outcome)) = register(Box::new(callback)) {
        waiter(&outcome);
    }
}

/// Future form of [`on_settled_with`].
pub(crate) async fn settled_with(
    register: impl FnOnce(Waiter) -> Option<(Waiter, Result<(), StoreError>)>,
) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    on_settled_with(register, move |outcome| {
        let _ = tx.send(outcome.clone());
    });
    rx.await.unwrap_or(Err(StoreError::Detached))
}
