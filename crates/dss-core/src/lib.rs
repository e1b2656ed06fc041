//! dss-core - Transactional filesystem primitives for dataset registration
//!
//! This crate provides the pieces every registration step builds on:
//! reversible commands and the persisted rollback stack, deferred path
//! removal, the error taxonomy, cooperative stop handling and logging.

pub mod command;
pub mod error;
pub mod logging;
pub mod remover;
pub mod retry;
pub mod rollback_stack;
pub mod shutdown;

// Re-exports for convenience
pub use command::TransactionalCommand;
pub use error::{DssError, ErrorKind, IoContext};
pub use logging::init_logging;
pub use remover::{ImmediateRemover, PathRemover, QueueingPathRemover, list_shredder_items};
pub use retry::{WaitBudget, retry_transient, wait_until};
pub use rollback_stack::{
    NoopDelegate, ROLLBACK_QUEUE_SUFFIX, RollbackStack, RollbackStackDelegate, RollbackSummary,
    next_stack_name,
};
pub use shutdown::StopSignal;
