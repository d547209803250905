use std::{
    any::Any,
    error::Error,
    io, mem,
    panic::{self, AssertUnwindSafe},
};
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LoopError {
    /// Вызов отклонён на месте, в очередь ничего не попало
    #[error("invalid submission: {0}")]
    InvalidSubmission(&'static str),

    /// Пользовательская функция вернула ошибку; оригинал доступен через `source()`
    #[error("work item failed: {source}")]
    Execution { source: BoxError },

    #[error("work item panicked: {0}")]
    Panic(String),

    #[error("message loop has been disposed")]
    Disposed,

    #[error("dispatcher thread terminated unexpectedly")]
    DispatcherLost,

    #[error("timed out waiting for work item")]
    Timeout,

    #[error("waiting for a pending work item on the dispatcher thread would deadlock")]
    WouldDeadlock,

    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] io::Error),
}

impl LoopError {
    pub fn execution<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        LoopError::Execution { source: err.into() }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        // Payload принадлежит пользователю: его Drop тоже может паниковать
        drop_contained(payload);
        LoopError::Panic(message)
    }

    /// Ошибка возникла внутри пользовательской работы, а не в механике цикла
    #[inline]
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, LoopError::Execution { .. } | LoopError::Panic(_))
    }
}

pub type LoopResult<T> = Result<T, LoopError>;

/// Уничтожает значение так, что паника из его `Drop` не выходит наружу.
/// Если паникует и уничтожение payload'а этой паники, он утекает.
pub(crate) fn drop_contained<V>(value: V) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(value))) {
        tracing::warn!("panic while dropping a user value on the dispatcher thread");
        if let Err(nested) = panic::catch_unwind(AssertUnwindSafe(move || drop(payload))) {
            mem::forget(nested);
        }
    }
}
