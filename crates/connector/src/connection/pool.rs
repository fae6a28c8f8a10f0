use crossbeam::queue::ArrayQueue;
use tracing::trace;
use triomphe::Arc;

use crate::config::ConnectorConfig;
use crate::connection::Http11Processor;

/// A bounded, lock-free pool of idle processors.
///
/// A processor is taken for the lifetime of one connection and returned
/// recycled. When the pool is empty a new one is built; when it is full the
/// returned processor is dropped.
#[derive(Debug)]
pub struct ProcessorPool {
    config: Arc<ConnectorConfig>,
    idle: ArrayQueue<Http11Processor>,
}

impl ProcessorPool {
    pub fn new(config: Arc<ConnectorConfig>, capacity: usize) -> Self {
        Self { config, idle: ArrayQueue::new(capacity.max(1)) }
    }

    pub fn acquire(&self) -> Http11Processor {
        self.idle.pop().unwrap_or_else(|| {
            trace!("no idle processor, create one");
            Http11Processor::new(Arc::clone(&self.config))
        })
    }

    pub fn release(&self, mut processor: Http11Processor) {
        processor.recycle();
        if self.idle.push(processor).is_err() {
            trace!("processor pool is full, drop processor");
        }
    }

    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }
}
