//! Цикл сообщений: исполнитель с привязкой к одному потоку
//!
//! # Features
//! - Один выделенный поток, строгий FIFO между всеми производителями
//! - Синхронный `invoke` и асинхронные `begin_invoke` / `end_invoke`
//! - Ошибки и паники задач возвращаются вызывающему на обоих путях
//! - Кооперативная остановка: drain или discard, join с таймаутом
//! - Хэндлы задач реализуют `Future`
//! - Метрики и ожидание по предикату

mod dispatcher;
pub mod errors;
pub mod executor;
pub mod handle;
mod item;
pub mod model;
mod queue;
pub mod wait;

pub use errors::{BoxError, LoopError, LoopResult};
pub use executor::{Config, MessageLoop};
pub use handle::InvokeHandle;
pub use model::{DispatcherState, LoopMetrics, ShutdownMode};
pub use wait::PredicateWait;
