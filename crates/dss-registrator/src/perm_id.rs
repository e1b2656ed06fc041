//! Batched cache of permanent identifiers

use std::collections::VecDeque;

use crate::service::{EntityOperationService, ServiceError};

const MAX_BATCH_SIZE: usize = 1024;

/// Fetches perm ids lazily, doubling the batch size on every refill.
#[derive(Debug)]
pub struct PermIdCache {
    queue: VecDeque<String>,
    batch_size: usize,
}

impl Default for PermIdCache {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            batch_size: 1,
        }
    }
}

impl PermIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the next refill.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn next(&mut self, service: &dyn EntityOperationService) -> Result<String, ServiceError> {
        if self.queue.is_empty() {
            let ids = service.create_perm_ids(self.batch_size)?;
            log::debug!("fetched {} perm ids", ids.len());
            self.queue.extend(ids);
            self.batch_size = (self.batch_size * 2).min(MAX_BATCH_SIZE);
        }
        self.queue
            .pop_front()
            .ok_or_else(|| ServiceError::permanent("service returned no perm ids"))
    }
}
