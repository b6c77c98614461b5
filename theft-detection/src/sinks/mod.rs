pub mod batch_collector;

pub use batch_collector::{BatchCollector, CollectedBatch};
