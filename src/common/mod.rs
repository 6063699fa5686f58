pub mod config;
pub mod types;

pub use config::{BufferPoolConfig, LockManagerConfig};
pub use types::{FrameId, PageId, Rid, TableOid, TxnId, INVALID_PAGE_ID, PAGE_SIZE};
