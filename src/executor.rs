use super::{
    dispatcher::{Dispatcher, DispatcherHandle, Shared},
    errors::{BoxError, LoopError, LoopResult},
    handle::InvokeHandle,
    item::{run_guarded, Completion, WorkItem},
    model::{DispatcherState, LoopMetrics, ShutdownMode},
    queue::{self, WorkQueue},
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Конфигурация цикла сообщений
#[derive(Debug, Clone)]
pub struct Config {
    pub thread_name: String,
    pub stack_size: Option<usize>,
    pub shutdown: ShutdownMode,
    /// Сколько dispose ждёт выхода потока диспетчера
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name: "message-loop".to_owned(),
            stack_size: None,
            shutdown: ShutdownMode::Drain,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Dispose дожидается выполнения всех уже поставленных задач
    pub fn draining() -> Self {
        Self {
            shutdown: ShutdownMode::Drain,
            ..Default::default()
        }
    }

    /// Dispose отбрасывает невыполненные задачи
    pub fn discarding() -> Self {
        Self {
            shutdown: ShutdownMode::Discard,
            shutdown_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            thread_name: name.into(),
            ..Default::default()
        }
    }
}

/// Исполнитель с привязкой к одному потоку.
///
/// Вся переданная работа выполняется на одном выделенном потоке строго
/// в порядке постановки, поэтому две задачи никогда не выполняются
/// одновременно. Очередь не ограничена: обратного давления нет.
pub struct MessageLoop {
    id: u64,
    config: Config,
    queue: WorkQueue,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    dispatcher_thread: ThreadId,
    next_item: AtomicU64,
}

impl MessageLoop {
    pub fn new() -> LoopResult<Self> {
        Self::with_config(Config::default())
    }

    /// Запускает поток диспетчера и возвращается только после его старта
    pub fn with_config(config: Config) -> LoopResult<Self> {
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared::new(id));
        let (queue, receiver) = queue::unbounded();

        let dispatcher = Dispatcher::spawn(receiver, Arc::clone(&shared), &config)?;
        let dispatcher_thread = dispatcher.thread_id();

        tracing::info!(loop_id = id, thread = %config.thread_name, "message loop started");

        Ok(Self {
            id,
            config,
            queue,
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
            dispatcher_thread,
            next_item: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_dispatcher_thread(&self) -> bool {
        thread::current().id() == self.dispatcher_thread
    }

    /// `false` только на потоке диспетчера: там вызов можно сделать напрямую
    #[inline]
    pub fn invoke_required(&self) -> bool {
        !self.is_dispatcher_thread()
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        self.shared.state()
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Токен, который отменяется при dispose
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.child_token()
    }

    #[inline]
    pub fn metrics(&self) -> LoopMetrics {
        LoopMetrics {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            queued: self.shared.queued.load(Ordering::Relaxed),
            state: self.shared.state(),
        }
    }

    /// Выполняет `f` на потоке диспетчера и блокирует до результата.
    ///
    /// Паника внутри `f` возвращается как [`LoopError::Panic`]; цикл
    /// продолжает работать. С потока диспетчера `f` вызывается сразу.
    pub fn invoke<F, T>(&self, f: F) -> LoopResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.invoke_job(move || Ok(f()))
    }

    /// Как [`invoke`](Self::invoke), но `Err` из `f` возвращается как
    /// [`LoopError::Execution`] с исходной ошибкой в `source()`.
    pub fn try_invoke<F, T, E>(&self, f: F) -> LoopResult<T>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError> + 'static,
        T: Send + 'static,
    {
        self.invoke_job(move || f().map_err(LoopError::execution))
    }

    pub fn invoke_with<F, A, T>(&self, f: F, args: A) -> LoopResult<T>
    where
        F: FnOnce(A) -> T + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        self.invoke(move || f(args))
    }

    /// Ожидание ограничено по времени, но задача остаётся в очереди:
    /// она всё равно выполнится, а результат будет отброшен.
    pub fn invoke_timeout<F, T>(&self, f: F, timeout: Duration) -> LoopResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_dispatcher_thread() {
            return self.run_inline(move || Ok(f()));
        }

        let (_, completion) = self.submit(move || Ok(f()))?;
        if !completion.wait_timeout(timeout) {
            return Err(LoopError::Timeout);
        }
        completion.take()
    }

    /// Ставит `f` в очередь и сразу возвращает хэндл
    pub fn begin_invoke<F, T>(&self, f: F) -> LoopResult<InvokeHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.begin_job(move || Ok(f()))
    }

    pub fn try_begin_invoke<F, T, E>(&self, f: F) -> LoopResult<InvokeHandle<T>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: Into<BoxError> + 'static,
        T: Send + 'static,
    {
        self.begin_job(move || f().map_err(LoopError::execution))
    }

    pub fn begin_invoke_with<F, A, T>(&self, f: F, args: A) -> LoopResult<InvokeHandle<T>>
    where
        F: FnOnce(A) -> T + Send + 'static,
        A: Send + 'static,
        T: Send + 'static,
    {
        self.begin_invoke(move || f(args))
    }

    /// Блокирует до завершения задачи и возвращает её результат.
    ///
    /// Ошибки выполнения возвращаются так же, как из [`invoke`](Self::invoke).
    /// Хэндл чужого цикла отклоняется без ожидания.
    pub fn end_invoke<T>(&self, handle: InvokeHandle<T>) -> LoopResult<T> {
        if handle.loop_id() != self.id {
            return Err(LoopError::InvalidSubmission(
                "handle was not produced by this message loop",
            ));
        }
        if self.is_dispatcher_thread() && !handle.is_completed() {
            return Err(LoopError::WouldDeadlock);
        }
        handle.take()
    }

    /// Прекращает приём задач и останавливает поток диспетчера.
    ///
    /// Повторный вызов безопасен. Вызов из задачи на самом диспетчере
    /// только инициирует остановку, не дожидаясь выхода потока.
    pub fn dispose(&self) {
        self.shutdown_timeout(self.config.shutdown_timeout);
    }

    /// Returns true if the dispatcher thread has exited.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        if !self.shared.is_disposed() {
            tracing::debug!(loop_id = self.id, mode = ?self.config.shutdown, "disposing message loop");
        }

        self.shared.shutdown.cancel();
        self.shared.begin_stopping();
        self.queue.close();

        if self.is_dispatcher_thread() {
            return false;
        }

        let mut slot = self.dispatcher.lock();
        let Some(dispatcher) = slot.take() else {
            return self.shared.state() == DispatcherState::Stopped;
        };

        match dispatcher.join_timeout(timeout) {
            Ok(()) => {
                tracing::info!(loop_id = self.id, "message loop stopped");
                true
            }
            Err(dispatcher) => {
                tracing::warn!(
                    loop_id = self.id,
                    ?timeout,
                    "dispatcher did not stop within shutdown timeout"
                );
                *slot = Some(dispatcher);
                false
            }
        }
    }

    fn check_open(&self) -> LoopResult<()> {
        if self.shared.is_disposed() || self.queue.is_closed() {
            return Err(LoopError::Disposed);
        }
        if self.shared.state() == DispatcherState::Stopped {
            return Err(LoopError::DispatcherLost);
        }
        Ok(())
    }

    fn submit<F, T>(&self, job: F) -> LoopResult<(u64, Arc<Completion<T>>)>
    where
        F: FnOnce() -> LoopResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.check_open()?;

        let item_id = self.next_item.fetch_add(1, Ordering::Relaxed);
        let (item, completion) = WorkItem::new(item_id, job);

        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.queued.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.queue.push(item) {
            self.shared.submitted.fetch_sub(1, Ordering::Relaxed);
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(err);
        }

        Ok((item_id, completion))
    }

    fn invoke_job<F, T>(&self, job: F) -> LoopResult<T>
    where
        F: FnOnce() -> LoopResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_dispatcher_thread() {
            return self.run_inline(job);
        }

        let (_, completion) = self.submit(job)?;
        completion.take()
    }

    fn begin_job<F, T>(&self, job: F) -> LoopResult<InvokeHandle<T>>
    where
        F: FnOnce() -> LoopResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (item_id, completion) = self.submit(job)?;
        Ok(InvokeHandle::new(
            self.id,
            item_id,
            self.dispatcher_thread,
            completion,
        ))
    }

    /// Повторный вход с потока диспетчера: ожидание очереди здесь
    /// заблокировало бы поток навсегда, поэтому выполняем сразу.
    fn run_inline<F, T>(&self, job: F) -> LoopResult<T>
    where
        F: FnOnce() -> LoopResult<T>,
    {
        self.check_open()?;
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        let outcome = run_guarded(job);
        let counter = if outcome.is_ok() {
            &self.shared.completed
        } else {
            &self.shared.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoop")
            .field("id", &self.id)
            .field("thread", &self.config.thread_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
