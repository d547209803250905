//! Единица работы: замыкание плюс одноразовый сигнал завершения с результатом

use super::errors::{drop_contained, LoopError, LoopResult};
use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

enum Slot<T> {
    Pending,
    Ready(LoopResult<T>),
    Taken,
}

/// Manual-reset сигнал и слот результата.
///
/// Пишется только диспетчером и ровно один раз; читается после того,
/// как сигнал выставлен. Мьютекс служит барьером видимости.
pub(crate) struct Completion<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
    waker: AtomicWaker,
}

impl<T> Completion<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            signal: Condvar::new(),
            waker: AtomicWaker::new(),
        }
    }

    #[inline]
    pub(crate) fn is_completed(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }

    /// Returns false if the outcome was already set.
    fn complete(&self, outcome: LoopResult<T>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = Slot::Ready(outcome);
        drop(slot);

        self.signal.notify_all();
        self.waker.wake();
        true
    }

    pub(crate) fn wait(&self) {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.signal.wait(&mut slot);
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };

        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.signal.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Pending);
            }
        }
        true
    }

    /// Блокирует до завершения и забирает результат
    pub(crate) fn take(&self) -> LoopResult<T> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.signal.wait(&mut slot);
        }
        Self::take_ready(&mut slot)
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<LoopResult<T>> {
        self.waker.register(cx.waker());

        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            return Poll::Pending;
        }
        Poll::Ready(Self::take_ready(&mut slot))
    }

    fn take_ready(slot: &mut Slot<T>) -> LoopResult<T> {
        match mem::replace(slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Taken => Err(LoopError::InvalidSubmission(
                "work item outcome was already taken",
            )),
            Slot::Pending => unreachable!("take_ready called on a pending slot"),
        }
    }
}

/// Сторона диспетчера. Если задача уничтожена, так и не выполнившись
/// (поток диспетчера погиб вместе с очередью), ожидающие получат DispatcherLost.
struct Completer<T> {
    completion: Arc<Completion<T>>,
}

impl<T> Completer<T> {
    fn complete(&self, outcome: LoopResult<T>) {
        self.completion.complete(outcome);
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.completion.complete(Err(LoopError::DispatcherLost)) {
            tracing::error!("work item dropped without running");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunStatus {
    Succeeded,
    Failed,
    Panicked,
}

trait Runnable: Send {
    /// `record` вызывается до того, как ожидающий будет разбужен
    fn run(self: Box<Self>, record: &dyn Fn(RunStatus)) -> RunStatus;
    fn discard(self: Box<Self>);
}

struct Job<F, T> {
    func: F,
    completer: Completer<T>,
}

impl<F, T> Runnable for Job<F, T>
where
    F: FnOnce() -> LoopResult<T> + Send,
    T: Send,
{
    fn run(self: Box<Self>, record: &dyn Fn(RunStatus)) -> RunStatus {
        let Job { func, completer } = *self;
        let outcome = run_guarded(func);
        let status = match &outcome {
            Ok(_) => RunStatus::Succeeded,
            Err(LoopError::Panic(_)) => RunStatus::Panicked,
            Err(_) => RunStatus::Failed,
        };
        record(status);
        completer.complete(outcome);
        // Если ожидающий ушёл по таймауту, результат уничтожается здесь
        drop_contained(completer);
        status
    }

    fn discard(self: Box<Self>) {
        let Job { func, completer } = *self;
        completer.complete(Err(LoopError::Disposed));
        drop_contained(func);
    }
}

/// Выполняет замыкание, превращая панику в `LoopError::Panic`
pub(crate) fn run_guarded<F, T>(func: F) -> LoopResult<T>
where
    F: FnOnce() -> LoopResult<T>,
{
    panic::catch_unwind(AssertUnwindSafe(func))
        .unwrap_or_else(|payload| Err(LoopError::from_panic(payload)))
}

pub(crate) struct WorkItem {
    id: u64,
    job: Box<dyn Runnable>,
}

impl WorkItem {
    pub(crate) fn new<F, T>(id: u64, func: F) -> (Self, Arc<Completion<T>>)
    where
        F: FnOnce() -> LoopResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let job = Job {
            func,
            completer: Completer {
                completion: Arc::clone(&completion),
            },
        };
        (
            Self {
                id,
                job: Box::new(job),
            },
            completion,
        )
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn run(self, record: &dyn Fn(RunStatus)) -> RunStatus {
        self.job.run(record)
    }

    #[inline]
    pub(crate) fn discard(self) {
        self.job.discard();
    }
}

#[cfg(test)]
struct Poison;

#[cfg(test)]
impl Runnable for Poison {
    fn run(self: Box<Self>, _record: &dyn Fn(RunStatus)) -> RunStatus {
        panic!("dispatcher thread killed");
    }

    fn discard(self: Box<Self>) {}
}

#[cfg(test)]
impl WorkItem {
    /// Задача, паника которой проходит мимо защиты и роняет поток диспетчера
    pub(crate) fn poison(id: u64) -> Self {
        Self {
            id,
            job: Box::new(Poison),
        }
    }
}
