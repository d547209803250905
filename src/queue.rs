use super::{
    errors::{LoopError, LoopResult},
    item::WorkItem,
};
use crossbeam::channel::{self, Receiver, SendError, Sender};
use parking_lot::RwLock;

/// Неограниченная FIFO-очередь: много производителей, один диспетчер.
///
/// Отправитель закрыт под write-lock, поэтому ни один push не может
/// проскочить после `close()`. Закрытие канала и есть сигнал остановки:
/// диспетчер дочитывает остаток и получает `None`.
pub(crate) struct WorkQueue {
    sender: RwLock<Option<Sender<WorkItem>>>,
}

pub(crate) struct QueueReceiver {
    receiver: Receiver<WorkItem>,
}

pub(crate) fn unbounded() -> (WorkQueue, QueueReceiver) {
    let (tx, rx) = channel::unbounded();
    (
        WorkQueue {
            sender: RwLock::new(Some(tx)),
        },
        QueueReceiver { receiver: rx },
    )
}

impl WorkQueue {
    pub(crate) fn push(&self, item: WorkItem) -> LoopResult<()> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            item.discard();
            return Err(LoopError::Disposed);
        };

        sender.send(item).map_err(|SendError(item)| {
            item.discard();
            LoopError::DispatcherLost
        })
    }

    /// Returns true for the call that actually closed the queue.
    pub(crate) fn close(&self) -> bool {
        self.sender.write().take().is_some()
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

impl QueueReceiver {
    /// Блокирует до появления задачи; `None` когда очередь закрыта и пуста
    #[inline]
    pub(crate) fn take(&self) -> Option<WorkItem> {
        self.receiver.recv().ok()
    }

    /// Забирает всё, что уже лежит в очереди, не блокируясь
    pub(crate) fn drain(&self) -> impl Iterator<Item = WorkItem> + '_ {
        self.receiver.try_iter()
    }
}
