use std::io;
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferPoolManager;
use crate::table_page::TupleMeta;
use crate::{PageId, Rid, INVALID_PAGE_ID};

pub(crate) fn pool_exhausted() -> io::Error {
    io::Error::new(io::ErrorKind::StorageFull, "all pages are pinned")
}

/// A table stored as a singly-linked list of slotted pages.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(bpm: Arc<BufferPoolManager>) -> io::Result<Self> {
        let mut guard = bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
        guard.init_table();
        let first_page_id = guard.page_id();
        drop(guard);
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple to the last page, chaining a fresh page when it does
    /// not fit. The last-page pointer is released before the slot is
    /// written; the retained page latch is what serializes the insertion.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &[u8]) -> io::Result<Rid> {
        let mut last = self.last_page_id.lock().unwrap();
        let mut page_guard = self
            .bpm
            .fetch_page_write(*last)
            .ok_or_else(pool_exhausted)?;

        while page_guard.next_tuple_offset(tuple.len()).is_none() {
            if page_guard.num_tuples() == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "tuple is too large for a page",
                ));
            }

            // Latch-couple: keep the current tail latched until the new
            // tail is linked in.
            let mut next_guard = self.bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
            next_guard.init_table();
            let next_page_id = next_guard.page_id();
            page_guard.set_next_page_id(next_page_id);
            *last = next_page_id;
            page_guard = next_guard;
        }
        let last_page_id = *last;
        drop(last);

        let slot = page_guard
            .insert_tuple(meta, tuple)
            .expect("tuple fits after space check");
        Ok((last_page_id, slot))
    }

    pub fn get_tuple(&self, rid: Rid) -> io::Result<(TupleMeta, Vec<u8>)> {
        let guard = self
            .bpm
            .fetch_page_read(rid.0)
            .ok_or_else(pool_exhausted)?;
        guard
            .get_tuple(rid.1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid rid"))
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> io::Result<TupleMeta> {
        let guard = self
            .bpm
            .fetch_page_read(rid.0)
            .ok_or_else(pool_exhausted)?;
        guard
            .get_tuple_meta(rid.1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid rid"))
    }

    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> io::Result<()> {
        let mut guard = self
            .bpm
            .fetch_page_write(rid.0)
            .ok_or_else(pool_exhausted)?;
        if !guard.update_tuple_meta(meta, rid.1) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid rid"));
        }
        Ok(())
    }

    /// Rewrites a tuple in place under the page's exclusive latch. `check`
    /// sees the old meta and payload and can veto the write; a veto returns
    /// `Ok(false)`.
    pub fn update_tuple_in_place(
        &self,
        meta: TupleMeta,
        tuple: &[u8],
        rid: Rid,
        check: Option<&dyn Fn(&TupleMeta, &[u8], Rid) -> bool>,
    ) -> io::Result<bool> {
        let mut guard = self
            .bpm
            .fetch_page_write(rid.0)
            .ok_or_else(pool_exhausted)?;
        let (old_meta, old_tuple) = guard
            .get_tuple(rid.1)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid rid"))?;
        if let Some(check) = check {
            if !check(&old_meta, &old_tuple, rid) {
                return Ok(false);
            }
        }
        if !guard.update_tuple_in_place(meta, tuple, rid.1) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "in-place update must preserve tuple size",
            ));
        }
        Ok(true)
    }

    /// A forward iterator bounded by the heap's state at construction time:
    /// tuples appended afterwards are not visited.
    pub fn iter(self: &Arc<Self>) -> io::Result<TableIterator> {
        let last_page_id = *self.last_page_id.lock().unwrap();
        let guard = self
            .bpm
            .fetch_page_read(last_page_id)
            .ok_or_else(pool_exhausted)?;
        let stop_at = (last_page_id, guard.num_tuples());
        drop(guard);

        let mut rid = (self.first_page_id, 0);
        if rid == stop_at {
            rid = (INVALID_PAGE_ID, 0);
        }
        Ok(TableIterator {
            heap: Arc::clone(self),
            rid,
            stop_at,
        })
    }
}

/// Forward cursor over a table heap snapshot.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    rid: Rid,
    stop_at: Rid,
}

impl TableIterator {
    pub fn is_end(&self) -> bool {
        self.rid.0 == INVALID_PAGE_ID
    }

    pub fn rid(&self) -> Rid {
        self.rid
    }

    pub fn get_tuple(&self) -> io::Result<(TupleMeta, Vec<u8>)> {
        debug_assert!(!self.is_end());
        self.heap.get_tuple(self.rid)
    }

    pub fn advance(&mut self) -> io::Result<()> {
        debug_assert!(!self.is_end());
        let guard = self
            .heap
            .bpm
            .fetch_page_read(self.rid.0)
            .ok_or_else(pool_exhausted)?;

        let next = (self.rid.0, self.rid.1 + 1);
        self.rid = if next == self.stop_at {
            (INVALID_PAGE_ID, 0)
        } else if next.1 < guard.num_tuples() {
            next
        } else {
            let next_page_id = guard.next_page_id();
            if next_page_id == INVALID_PAGE_ID {
                (INVALID_PAGE_ID, 0)
            } else {
                (next_page_id, 0)
            }
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPoolConfig;
    use crate::pager::Pager;
    use tempfile::tempdir;

    fn heap_with_pool(dir: &std::path::Path, pool_size: usize) -> Arc<TableHeap> {
        let pager = Pager::open(dir.join("heap.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size,
                replacer_k: 2,
            },
            pager,
        ));
        Arc::new(TableHeap::new(bpm).unwrap())
    }

    fn meta(ts: u64) -> TupleMeta {
        TupleMeta {
            ts,
            is_deleted: false,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 8);

        let rid = heap.insert_tuple(meta(1), b"first").unwrap();
        let (m, bytes) = heap.get_tuple(rid).unwrap();
        assert_eq!(m.ts, 1);
        assert_eq!(bytes, b"first");
    }

    #[test]
    fn test_insert_spills_to_new_pages() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 16);

        let payload = [9u8; 512];
        let rids: Vec<Rid> = (0..40)
            .map(|_| heap.insert_tuple(meta(1), &payload).unwrap())
            .collect();

        let pages: std::collections::HashSet<PageId> = rids.iter().map(|r| r.0).collect();
        assert!(pages.len() > 1, "expected the heap to grow past one page");

        for rid in &rids {
            let (_, bytes) = heap.get_tuple(*rid).unwrap();
            assert_eq!(bytes.len(), payload.len());
        }
    }

    #[test]
    fn test_iterator_visits_all_tuples_in_order() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 16);

        let payload = [3u8; 256];
        let mut inserted = Vec::new();
        for _ in 0..50 {
            inserted.push(heap.insert_tuple(meta(1), &payload).unwrap());
        }

        let mut iter = heap.iter().unwrap();
        let mut seen = Vec::new();
        while !iter.is_end() {
            seen.push(iter.rid());
            iter.advance().unwrap();
        }
        assert_eq!(seen, inserted);
    }

    #[test]
    fn test_iterator_snapshot_excludes_later_appends() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 8);

        heap.insert_tuple(meta(1), b"one").unwrap();
        heap.insert_tuple(meta(1), b"two").unwrap();

        let mut iter = heap.iter().unwrap();
        heap.insert_tuple(meta(1), b"three").unwrap();

        let mut count = 0;
        while !iter.is_end() {
            count += 1;
            iter.advance().unwrap();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_iterator_on_empty_heap() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 4);
        let iter = heap.iter().unwrap();
        assert!(iter.is_end());
    }

    #[test]
    fn test_update_tuple_in_place_with_check() {
        let dir = tempdir().unwrap();
        let heap = heap_with_pool(dir.path(), 4);

        let rid = heap.insert_tuple(meta(4), b"aaaa").unwrap();

        let vetoed = heap
            .update_tuple_in_place(meta(5), b"bbbb", rid, Some(&|m: &TupleMeta, _: &[u8], _| m.ts == 99))
            .unwrap();
        assert!(!vetoed);

        let updated = heap
            .update_tuple_in_place(meta(5), b"bbbb", rid, Some(&|m: &TupleMeta, _: &[u8], _| m.ts == 4))
            .unwrap();
        assert!(updated);
        let (m, bytes) = heap.get_tuple(rid).unwrap();
        assert_eq!(m.ts, 5);
        assert_eq!(bytes, b"bbbb");
    }
}
