//! Per-item policies consulted by the directory scanner

use crate::store::{ScannedStore, StoreItem};

/// What the scanner should do with an item in this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleInstruction {
    Process,
    Ignore,
    Error(String),
}

/// Outcome reported after an item was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error(String),
}

/// Policy deciding which items get handled and reacting afterwards.
pub trait DirectoryScanningHandler {
    /// Called once before the first scan.
    fn init(&mut self, _store: &dyn ScannedStore) {}

    /// Called at the start of every pass.
    fn before_handle(&mut self, _store: &dyn ScannedStore) {}

    fn may_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> HandleInstruction;

    /// Called after every handling attempt, successful or not.
    fn finish_item_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> Status;
}

/// Consumes one ready item. Success normally means the item is gone.
pub trait ItemHandler {
    fn handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> anyhow::Result<()>;

    /// Polled before each item.
    fn is_stop_requested(&self) -> bool {
        false
    }
}

/// Handles everything, reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughHandler;

impl DirectoryScanningHandler for PassThroughHandler {
    fn may_handle(&mut self, _store: &dyn ScannedStore, _item: &StoreItem) -> HandleInstruction {
        HandleInstruction::Process
    }

    fn finish_item_handle(&mut self, _store: &dyn ScannedStore, _item: &StoreItem) -> Status {
        Status::Ok
    }
}

/// Chains handlers: the first non-`Process` instruction and the first
/// error status win. Every handler still sees every hook call.
#[derive(Default)]
pub struct CompositeHandler {
    handlers: Vec<Box<dyn DirectoryScanningHandler + Send>>,
}

impl CompositeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl DirectoryScanningHandler + Send + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }
}

impl DirectoryScanningHandler for CompositeHandler {
    fn init(&mut self, store: &dyn ScannedStore) {
        for h in &mut self.handlers {
            h.init(store);
        }
    }

    fn before_handle(&mut self, store: &dyn ScannedStore) {
        for h in &mut self.handlers {
            h.before_handle(store);
        }
    }

    fn may_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> HandleInstruction {
        for h in &mut self.handlers {
            let instruction = h.may_handle(store, item);
            if instruction != HandleInstruction::Process {
                return instruction;
            }
        }
        HandleInstruction::Process
    }

    fn finish_item_handle(&mut self, store: &dyn ScannedStore, item: &StoreItem) -> Status {
        let mut status = Status::Ok;
        for h in &mut self.handlers {
            let s = h.finish_item_handle(store, item);
            if status == Status::Ok {
                status = s;
            }
        }
        status
    }
}
