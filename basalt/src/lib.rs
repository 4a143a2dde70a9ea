//! # Basalt Storage Kernel
//! The storage kernel for the Magma database.
//! This crate owns the on-disk and in-memory representation of data: the
//! pager and disk scheduler, the LRU-K buffer pool with RAII page guards,
//! slotted table pages, the extendible hash index, and the multi-version
//! transaction layer.

/// The buffer pool manager.
pub mod buffer_pool;
/// Asynchronous page I/O with a single background worker.
pub mod disk_scheduler;
/// Failpoints for fault-injection in tests.
pub mod failpoint;
/// The extendible hash index built from guarded pages.
pub mod hash_index;
/// Page layouts for the extendible hash index.
pub mod hash_page;
/// The raw page buffer and typed views over it.
pub mod page;
/// RAII page guards carrying pin and latch ownership.
pub mod page_guard;
/// The pager for reading and writing pages to disk.
pub mod pager;
/// The LRU-K frame replacer.
pub mod replacer;
/// The table heap and its snapshot-bounded iterator.
pub mod table_heap;
/// The slotted table page layout.
pub mod table_page;
/// The transaction manager and per-tuple version chains.
pub mod transaction;
/// The multiset of live read timestamps.
pub mod watermark;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A unique identifier for a page in the database file.
/// Stored on disk as a little-endian 32-bit integer.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Index of a frame inside the buffer pool.
pub type FrameId = usize;

/// A unique identifier for a tuple: (page id, slot number).
pub type Rid = (PageId, u16);

/// Logical timestamps shared by commit timestamps and transaction ids.
pub type Timestamp = u64;

/// A transaction identifier. Values at or above [`TXN_START_ID`] are
/// transaction ids doubling as temporary timestamps; values below are
/// commit timestamps.
pub type TxnId = u64;

/// First transaction id. Splits the shared numeric space between commit
/// timestamps and in-flight transaction ids.
pub const TXN_START_ID: TxnId = 1 << 62;

/// Sentinel for "no timestamp".
pub const INVALID_TS: Timestamp = u64::MAX;

/// A unique identifier for a table known to the catalog.
pub type TableOid = u32;

pub use buffer_pool::BufferPoolManager;
pub use page::Page;
pub use page_guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use table_heap::TableHeap;
pub use table_page::TupleMeta;
pub use transaction::{Transaction, TransactionManager};

pub fn debug_logs_enabled() -> bool {
    std::env::var_os("MAGMA_DEBUG_LOG").is_some()
}

#[macro_export]
macro_rules! basalt_debug_log {
    ($($arg:tt)*) => {
        if $crate::debug_logs_enabled() {
            println!($($arg)*);
        }
    };
}
