use std::ops::{Deref, DerefMut};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::buffer_pool::BufferPoolManager;
use crate::page::Page;
use crate::{FrameId, PageId};

pub(crate) type FrameReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub(crate) type FrameWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// A pinned page without a latch. Upgrade into a [`ReadPageGuard`] or
/// [`WritePageGuard`] to touch the bytes; dropping releases the pin.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame_id: FrameId,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page_id: PageId, frame_id: FrameId) -> Self {
        Self {
            bpm,
            page_id,
            frame_id,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the frame's shared latch, transferring the pin.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let latch = self.bpm.latch_read(self.frame_id);
        let guard = ReadPageGuard {
            bpm: self.bpm,
            page_id: self.page_id,
            latch: Some(latch),
        };
        std::mem::forget(self);
        guard
    }

    /// Acquires the frame's exclusive latch, transferring the pin.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let latch = self.bpm.latch_write(self.frame_id);
        let guard = WritePageGuard {
            bpm: self.bpm,
            page_id: self.page_id,
            latch: Some(latch),
            dirty: false,
        };
        std::mem::forget(self);
        guard
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// A pinned page held under its frame's shared latch.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<FrameReadGuard>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("guard holds its latch")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch before pin: once the pin drops the frame may be evicted,
        // and the pool only reclaims frames whose latch is free.
        drop(self.latch.take());
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// A pinned page held under its frame's exclusive latch. Any mutable
/// access marks the page dirty; the drop-time unpin carries that bit back
/// to the pool.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<FrameWriteGuard>,
    dirty: bool,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("guard holds its latch")
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        self.dirty = true;
        self.latch.as_mut().expect("guard holds its latch")
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}
