pub mod executor;
pub mod output;
pub mod queue;
pub mod reprint;
pub mod storage;
pub mod sweep;
