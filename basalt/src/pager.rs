use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{failpoint, PageId, PAGE_SIZE};

/// Reads and writes fixed-size pages at `page_id * PAGE_SIZE` offsets of a
/// single database file. Reading past the end of the file yields a zeroed
/// page, so freshly allocated pages need no explicit initialization write.
pub struct Pager {
    file: File,
    pub num_pages: u32,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::basalt_debug_log!("[Pager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, num_pages })
    }

    /// Reads a page into `buf`. Short reads zero-fill the remainder.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> io::Result<()> {
        failpoint::maybe_fail("pager.read")?;
        let offset = Self::page_offset(page_id)?;
        debug_assert_eq!(buf.len(), PAGE_SIZE);

        if page_id as u32 >= self.num_pages {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let bytes_read = self.file.read(buf)?;
        buf[bytes_read..].fill(0);
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> io::Result<()> {
        failpoint::maybe_fail("pager.write")?;
        let offset = Self::page_offset(page_id)?;
        debug_assert_eq!(data.len(), PAGE_SIZE);

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        if page_id as u32 >= self.num_pages {
            self.num_pages = page_id as u32 + 1;
        }
        Ok(())
    }

    pub fn allocate_page(&mut self) -> io::Result<PageId> {
        let page_id = self.num_pages as PageId;
        self.num_pages += 1;
        Ok(page_id)
    }

    /// Deallocation is a no-op; page ids are never reused by the pager.
    pub fn deallocate_page(&mut self, _page_id: PageId) {}

    fn page_offset(page_id: PageId) -> io::Result<u64> {
        if page_id < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid page id {page_id}"),
            ));
        }
        Ok(page_id as u64 * PAGE_SIZE as u64)
    }
}
