//! Swappable persistence boundaries: run log, execution archive, locker.

pub mod archive;
pub mod locker;
pub mod log;

pub use archive::{ExecutionArchiveStore, ExecutionSnapshot, FileArchiveStore, MemoryArchiveStore};
pub use locker::{Locker, MemoryLocker};
pub use log::{FlowExecuteLog, FlowExecuteLogRepository, MemoryLogRepository, Page, RunStatus};
