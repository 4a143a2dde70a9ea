//! Manages the buffer pool, a fixed set of in-memory frames caching disk
//! pages, with LRU-K eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;

use crate::disk_scheduler::{DiskData, DiskRequest, DiskScheduler};
use crate::page::Page;
use crate::page_guard::{FrameReadGuard, FrameWriteGuard, PageGuard, ReadPageGuard, WritePageGuard};
use crate::pager::Pager;
use crate::replacer::LruKReplacer;
use crate::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Tuning knobs for the pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    metas: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// The buffer pool manager.
///
/// One pool mutex covers the page table, the free list, and per-frame
/// pin/dirty bookkeeping. Frame contents sit behind per-frame reader-writer
/// latches owned by page guards, never by the pool mutex, so the lock order
/// is always pool mutex before frame latch.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<RwLock<Page>>>,
    state: Mutex<PoolState>,
    replacer: LruKReplacer,
    scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(config: BufferPoolConfig, pager: Pager) -> Self {
        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::default())));
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                metas,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(pool_size, config.replacer_k),
            scheduler: DiskScheduler::new(pager),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocates a fresh page id, pins it into a zeroed frame and returns a
    /// basic (pin-only) guard. `None` when every frame is pinned.
    pub fn new_page(&self) -> Option<PageGuard<'_>> {
        let mut state = self.state.lock().unwrap();

        let frame_id = self.acquire_free_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id += 1;

        self.frames[frame_id].write().reset(page_id);
        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        crate::basalt_debug_log!("[BufferPool::new_page] page {page_id} -> frame {frame_id}");
        Some(PageGuard::new(self, page_id, frame_id))
    }

    /// Pins `page_id`, reading it from disk on a miss. `None` when the pool
    /// is full and nothing is evictable, or when the read fails.
    pub fn fetch_page(&self, page_id: PageId) -> Option<PageGuard<'_>> {
        let mut state = self.state.lock().unwrap();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Some(PageGuard::new(self, page_id, frame_id));
        }

        let frame_id = self.acquire_free_frame(&mut state)?;

        // Read into a side buffer first; the frame is only overwritten once
        // the read succeeded.
        let buffer = Arc::new(Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let (done, completion) = DiskScheduler::create_completion();
        self.scheduler.schedule(DiskRequest {
            data: DiskData::Read(Arc::clone(&buffer)),
            page_id,
            done,
        });
        if !completion.wait() {
            state.free_list.push_back(frame_id);
            return None;
        }

        {
            let mut frame = self.frames[frame_id].write();
            frame.id = page_id;
            frame.data.copy_from_slice(&buffer.lock().unwrap());
        }
        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Some(PageGuard::new(self, page_id, frame_id))
    }

    pub fn fetch_page_read(&self, page_id: PageId) -> Option<ReadPageGuard<'_>> {
        self.fetch_page(page_id).map(PageGuard::upgrade_read)
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> Option<WritePageGuard<'_>> {
        self.fetch_page(page_id).map(PageGuard::upgrade_write)
    }

    pub fn new_page_guarded(&self) -> Option<WritePageGuard<'_>> {
        self.new_page().map(PageGuard::upgrade_write)
    }

    /// Drops one pin. The dirty flag is the logical-or of all hints given
    /// since the last flush.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the page back and clears its dirty bit on success.
    ///
    /// Snapshots the bytes under the frame's shared latch without waiting:
    /// a page currently under an exclusive latch reports `false` instead of
    /// risking a deadlock against a writer that is blocked on the pool
    /// mutex.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let data = {
            let Some(frame) = self.frames[frame_id].try_read() else {
                return false;
            };
            frame.data.to_vec().into_boxed_slice()
        };
        let (done, completion) = DiskScheduler::create_completion();
        self.scheduler.schedule(DiskRequest {
            data: DiskData::Write(data),
            page_id,
            done,
        });
        if !completion.wait() {
            return false;
        }
        state.metas[frame_id].is_dirty = false;
        true
    }

    pub fn flush_all_pages(&self) {
        let resident: Vec<PageId> = {
            let state = self.state.lock().unwrap();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            self.flush_page(page_id);
        }
    }

    /// Drops a resident page. Only legal when the page is unpinned; the
    /// frame returns to the free list and the id is never reused.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        if state.metas[frame_id].pin_count > 0 {
            return false;
        }

        self.frames[frame_id].write().reset(INVALID_PAGE_ID);
        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        let meta = &mut state.metas[frame_id];
        meta.page_id = INVALID_PAGE_ID;
        meta.is_dirty = false;
        state.free_list.push_back(frame_id);
        true
    }

    /// Current pin count of a resident page, for tests and assertions.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock().unwrap();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(state.metas[frame_id].pin_count)
    }

    pub(crate) fn latch_read(&self, frame_id: FrameId) -> FrameReadGuard {
        RwLock::read_arc(&self.frames[frame_id])
    }

    pub(crate) fn latch_write(&self, frame_id: FrameId) -> FrameWriteGuard {
        RwLock::write_arc(&self.frames[frame_id])
    }

    /// Finds a reusable frame: free list first, then LRU-K eviction with a
    /// synchronous write-back of dirty victims.
    fn acquire_free_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }

        let frame_id = self.replacer.evict()?;
        let victim_page_id = state.metas[frame_id].page_id;
        if state.metas[frame_id].is_dirty {
            let data = {
                let frame = self.frames[frame_id].read();
                frame.data.to_vec().into_boxed_slice()
            };
            let (done, completion) = DiskScheduler::create_completion();
            self.scheduler.schedule(DiskRequest {
                data: DiskData::Write(data),
                page_id: victim_page_id,
                done,
            });
            if !completion.wait() {
                // Keep the victim resident rather than dropping its only
                // up-to-date copy.
                self.replacer.record_access(frame_id);
                self.replacer.set_evictable(frame_id, true);
                return None;
            }
            state.metas[frame_id].is_dirty = false;
        }

        crate::basalt_debug_log!(
            "[BufferPool::acquire_free_frame] evicting page {victim_page_id} from frame {frame_id}"
        );
        state.page_table.remove(&victim_page_id);
        state.metas[frame_id].page_id = INVALID_PAGE_ID;
        Some(frame_id)
    }
}
