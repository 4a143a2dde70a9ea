use crate::page::Page;
use crate::{PageId, Timestamp, INVALID_PAGE_ID, PAGE_SIZE};

/// Per-tuple metadata stored next to each slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    /// Commit timestamp, or the writing transaction's temporary timestamp
    /// while the write is in flight.
    pub ts: Timestamp,
    /// Logical deletion marker.
    pub is_deleted: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct TablePageHeader {
    next_page_id: PageId,
    num_tuples: u16,
    num_deleted_tuples: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct TupleInfo {
    offset: u16,
    size: u16,
    meta: TupleMeta,
}

const TABLE_PAGE_HEADER_SIZE: usize = std::mem::size_of::<TablePageHeader>();
const SLOT_SIZE: usize = std::mem::size_of::<TupleInfo>();

fn slot_offset(slot: u16) -> usize {
    TABLE_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE
}

/// Slotted-page accessors: a header and a slot array grow from the front
/// of the page, tuple bytes grow from the back.
impl Page {
    pub fn init_table(&mut self) {
        self.write_at(
            0,
            TablePageHeader {
                next_page_id: INVALID_PAGE_ID,
                num_tuples: 0,
                num_deleted_tuples: 0,
            },
        );
    }

    fn table_header(&self) -> TablePageHeader {
        self.read_at(0)
    }

    pub fn next_page_id(&self) -> PageId {
        self.table_header().next_page_id
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        let mut header = self.table_header();
        header.next_page_id = next_page_id;
        self.write_at(0, header);
    }

    pub fn num_tuples(&self) -> u16 {
        self.table_header().num_tuples
    }

    pub fn num_deleted_tuples(&self) -> u16 {
        self.table_header().num_deleted_tuples
    }

    /// Byte offset the next tuple of `len` bytes would land at, or `None`
    /// when slot array and tuple area would collide.
    pub fn next_tuple_offset(&self, len: usize) -> Option<u16> {
        let header = self.table_header();
        let slot_end = if header.num_tuples == 0 {
            PAGE_SIZE
        } else {
            let last: TupleInfo = self.read_at(slot_offset(header.num_tuples - 1));
            last.offset as usize
        };
        let tuple_offset = slot_end.checked_sub(len)?;
        if tuple_offset < slot_offset(header.num_tuples + 1) {
            return None;
        }
        Some(tuple_offset as u16)
    }

    pub fn insert_tuple(&mut self, meta: TupleMeta, tuple: &[u8]) -> Option<u16> {
        let offset = self.next_tuple_offset(tuple.len())?;
        let mut header = self.table_header();
        let slot = header.num_tuples;

        self.write_at(
            slot_offset(slot),
            TupleInfo {
                offset,
                size: tuple.len() as u16,
                meta,
            },
        );
        self.bytes_mut(offset as usize, tuple.len()).copy_from_slice(tuple);

        header.num_tuples += 1;
        if meta.is_deleted {
            header.num_deleted_tuples += 1;
        }
        self.write_at(0, header);
        Some(slot)
    }

    fn tuple_info(&self, slot: u16) -> Option<TupleInfo> {
        let header = self.table_header();
        if slot >= header.num_tuples {
            return None;
        }
        let info: TupleInfo = self.read_at(slot_offset(slot));
        if info.offset as usize + info.size as usize > PAGE_SIZE {
            // Slot points outside the page: the page is corrupt.
            return None;
        }
        Some(info)
    }

    pub fn get_tuple(&self, slot: u16) -> Option<(TupleMeta, Vec<u8>)> {
        let info = self.tuple_info(slot)?;
        let bytes = self.bytes(info.offset as usize, info.size as usize).to_vec();
        Some((info.meta, bytes))
    }

    pub fn get_tuple_meta(&self, slot: u16) -> Option<TupleMeta> {
        Some(self.tuple_info(slot)?.meta)
    }

    pub fn update_tuple_meta(&mut self, meta: TupleMeta, slot: u16) -> bool {
        let Some(mut info) = self.tuple_info(slot) else {
            return false;
        };
        let mut header = self.table_header();
        if meta.is_deleted && !info.meta.is_deleted {
            header.num_deleted_tuples += 1;
        } else if !meta.is_deleted && info.meta.is_deleted {
            header.num_deleted_tuples -= 1;
        }
        info.meta = meta;
        self.write_at(slot_offset(slot), info);
        self.write_at(0, header);
        true
    }

    /// Rewrites a tuple in place. The new payload must have the original
    /// serialized size.
    pub fn update_tuple_in_place(&mut self, meta: TupleMeta, tuple: &[u8], slot: u16) -> bool {
        let Some(info) = self.tuple_info(slot) else {
            return false;
        };
        if info.size as usize != tuple.len() {
            return false;
        }
        self.bytes_mut(info.offset as usize, tuple.len()).copy_from_slice(tuple);
        self.update_tuple_meta(meta, slot)
    }
}
