#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl DispatcherState {
    #[inline]
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            DispatcherState::Starting => 0,
            DispatcherState::Running => 1,
            DispatcherState::Stopping => 2,
            DispatcherState::Stopped => 3,
        }
    }

    #[inline]
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DispatcherState::Starting,
            1 => DispatcherState::Running,
            2 => DispatcherState::Stopping,
            _ => DispatcherState::Stopped,
        }
    }
}

/// Что делать с задачами, оставшимися в очереди при dispose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Выполнить всё, что было поставлено до dispose
    #[default]
    Drain,
    /// Отбросить; ожидающие получат `LoopError::Disposed`
    Discard,
}

#[derive(Debug, Clone)]
pub struct LoopMetrics {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
    pub queued: usize,
    pub state: DispatcherState,
}

impl LoopMetrics {
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }

    /// Задачи, которые приняты, но ещё не завершены
    pub fn in_flight(&self) -> usize {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.discarded)
    }
}
