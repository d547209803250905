use super::{
    errors::{LoopError, LoopResult},
    item::Completion,
};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread::{self, ThreadId},
    time::Duration,
};

/// Handle на задачу, поставленную через `begin_invoke`.
///
/// Результат забирается через `MessageLoop::end_invoke` или `.await`.
pub struct InvokeHandle<T> {
    loop_id: u64,
    id: u64,
    dispatcher: ThreadId,
    completion: Arc<Completion<T>>,
}

impl<T> InvokeHandle<T> {
    pub(crate) fn new(
        loop_id: u64,
        id: u64,
        dispatcher: ThreadId,
        completion: Arc<Completion<T>>,
    ) -> Self {
        Self {
            loop_id,
            id,
            dispatcher,
            completion,
        }
    }

    /// Порядковый номер задачи внутри своего цикла
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn loop_id(&self) -> u64 {
        self.loop_id
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }

    #[inline]
    fn on_dispatcher(&self) -> bool {
        thread::current().id() == self.dispatcher
    }

    /// Блокирует до завершения, не забирая результат
    pub fn wait(&self) -> LoopResult<()> {
        if self.on_dispatcher() && !self.is_completed() {
            return Err(LoopError::WouldDeadlock);
        }
        self.completion.wait();
        Ok(())
    }

    /// Returns true if the work item completed within `timeout`.
    /// On the dispatcher thread it never blocks.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.on_dispatcher() {
            return self.is_completed();
        }
        self.completion.wait_timeout(timeout)
    }

    pub(crate) fn take(self) -> LoopResult<T> {
        self.completion.take()
    }
}

impl<T> Future for InvokeHandle<T> {
    type Output = LoopResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().completion.poll_take(cx)
    }
}

impl<T> fmt::Debug for InvokeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvokeHandle")
            .field("loop_id", &self.loop_id)
            .field("id", &self.id)
            .field("completed", &self.is_completed())
            .finish()
    }
}
