use super::{
    errors::{drop_contained, LoopError, LoopResult},
    executor::Config,
    item::{RunStatus, WorkItem},
    model::{DispatcherState, ShutdownMode},
    queue::QueueReceiver,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::{
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Состояние, разделяемое между фасадом и потоком диспетчера
pub(crate) struct Shared {
    pub(crate) loop_id: u64,
    state: AtomicU8,
    pub(crate) shutdown: CancellationToken,
    pub(crate) submitted: AtomicUsize,
    pub(crate) completed: AtomicUsize,
    pub(crate) failed: AtomicUsize,
    pub(crate) discarded: AtomicUsize,
    pub(crate) queued: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(loop_id: u64) -> Self {
        Self {
            loop_id,
            state: AtomicU8::new(DispatcherState::Starting.as_u8()),
            shutdown: CancellationToken::new(),
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn set_state(&self, state: DispatcherState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Running -> Stopping; no-op in any other state.
    pub(crate) fn begin_stopping(&self) {
        let _ = self.state.compare_exchange(
            DispatcherState::Running.as_u8(),
            DispatcherState::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Переводит диспетчер в Stopped при любом выходе из цикла, включая панику.
/// Задачи, оставшиеся в очереди после гибели потока, учитываются как отброшенные.
struct StoppedGuard<'a> {
    shared: &'a Shared,
    receiver: &'a QueueReceiver,
}

impl Drop for StoppedGuard<'_> {
    fn drop(&mut self) {
        self.shared.set_state(DispatcherState::Stopped);

        if thread::panicking() || !self.shared.is_disposed() {
            tracing::error!(
                loop_id = self.shared.loop_id,
                "dispatcher thread terminated unexpectedly"
            );
        } else {
            tracing::debug!(loop_id = self.shared.loop_id, "dispatcher stopped");
        }

        for item in self.receiver.drain() {
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
            self.shared.discarded.fetch_add(1, Ordering::Relaxed);
            // Completer ответит ожидающему DispatcherLost
            drop_contained(item);
        }
    }
}

pub(crate) struct DispatcherHandle {
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

impl DispatcherHandle {
    #[inline]
    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    /// Ждёт выхода потока не дольше `timeout`. При таймауте хэндл
    /// возвращается обратно, чтобы dispose можно было повторить.
    pub(crate) fn join_timeout(self, timeout: Duration) -> Result<(), Self> {
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(self),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    tracing::error!("dispatcher thread panicked");
                }
                Ok(())
            }
        }
    }
}

/// Тело выделенного потока: берёт задачи строго по FIFO и выполняет по одной
pub(crate) struct Dispatcher {
    receiver: QueueReceiver,
    shared: Arc<Shared>,
    mode: ShutdownMode,
}

impl Dispatcher {
    pub(crate) fn spawn(
        receiver: QueueReceiver,
        shared: Arc<Shared>,
        config: &Config,
    ) -> LoopResult<DispatcherHandle> {
        let (ready_tx, ready_rx) = channel::bounded::<()>(1);
        let (exit_tx, exit_rx) = channel::bounded::<()>(0);

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let dispatcher = Dispatcher {
            receiver,
            shared,
            mode: config.shutdown,
        };

        let thread = builder
            .spawn(move || {
                // Разрыв канала сообщает dispose, что поток завершился
                let _exit = exit_tx;
                dispatcher.run(ready_tx);
            })
            .map_err(LoopError::Spawn)?;

        // Не возвращаемся, пока поток не подтвердил запуск
        ready_rx.recv().map_err(|_| LoopError::DispatcherLost)?;

        Ok(DispatcherHandle {
            thread,
            exited: exit_rx,
        })
    }

    fn run(self, ready: Sender<()>) {
        let shared = &*self.shared;
        let _stopped = StoppedGuard {
            shared,
            receiver: &self.receiver,
        };

        shared.set_state(DispatcherState::Running);
        let _ = ready.send(());
        drop(ready);

        let current = thread::current();
        tracing::debug!(
            loop_id = shared.loop_id,
            thread = current.name().unwrap_or("<unnamed>"),
            mode = ?self.mode,
            "dispatcher started"
        );

        while let Some(item) = self.receiver.take() {
            shared.queued.fetch_sub(1, Ordering::Relaxed);

            if self.mode == ShutdownMode::Discard && shared.is_disposed() {
                self.discard(item);
                continue;
            }
            self.execute(item);
        }
    }

    fn execute(&self, item: WorkItem) {
        let id = item.id();
        item.run(&|status| self.record(id, status));
    }

    /// Счётчики обновляются до того, как ожидающий получит результат
    fn record(&self, id: u64, status: RunStatus) {
        let loop_id = self.shared.loop_id;

        match status {
            RunStatus::Succeeded => {
                self.shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            RunStatus::Failed => {
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(loop_id, item = id, "work item failed");
            }
            RunStatus::Panicked => {
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(loop_id, item = id, "work item panicked");
            }
        }
    }

    fn discard(&self, item: WorkItem) {
        tracing::debug!(
            loop_id = self.shared.loop_id,
            item = item.id(),
            "discarding work item on shutdown"
        );
        self.shared.discarded.fetch_add(1, Ordering::Relaxed);
        item.discard();
    }
}
