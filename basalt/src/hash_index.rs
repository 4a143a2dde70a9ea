//! Disk-backed extendible hash table.
//!
//! Three page levels: a header page routes the top bits of a key hash to a
//! directory page, the directory routes the low `global_depth` bits to a
//! bucket page, and buckets hold `(key, value)` entries. Inserting into a
//! full bucket splits it, growing the directory when the bucket's local
//! depth has caught up with the global depth; removing the last entry of a
//! bucket merges it into its split sibling and shrinks the directory when
//! every local depth allows it.

use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::buffer_pool::BufferPoolManager;
use crate::hash_page::{hash_bucket, HashDirectoryPageData, HashHeaderPageData};
use crate::table_heap::pool_exhausted;
use crate::{PageId, INVALID_PAGE_ID};

/// Default key hash used by callers that do not inject their own.
pub fn default_key_hash(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

pub struct DiskExtendibleHashTable<K, V> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    hash_fn: fn(&K) -> u32,
    directory_max_depth: u32,
    bucket_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: Copy + PartialEq, V: Copy> DiskExtendibleHashTable<K, V> {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        hash_fn: fn(&K) -> u32,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> io::Result<Self> {
        let mut header_guard = bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
        header_guard.view_mut::<HashHeaderPageData>().init(header_max_depth);
        let header_page_id = header_guard.page_id();
        drop(header_guard);

        Ok(Self {
            bpm,
            header_page_id,
            hash_fn,
            directory_max_depth,
            bucket_max_size: bucket_max_size.min(hash_bucket::max_entries::<K, V>()),
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    /// Point lookup. Descends read-latched, releasing each parent as soon
    /// as the child is latched.
    pub fn get(&self, key: &K) -> io::Result<Option<V>> {
        let hash = self.hash(key);

        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id)
            .ok_or_else(pool_exhausted)?;
        let header = header_guard.view::<HashHeaderPageData>();
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let directory_guard = self
            .bpm
            .fetch_page_read(directory_page_id)
            .ok_or_else(pool_exhausted)?;
        drop(header_guard);
        let directory = directory_guard.view::<HashDirectoryPageData>();
        let bucket_page_id = directory.bucket_page_id(directory.hash_to_bucket_index(hash));
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let bucket_guard = self
            .bpm
            .fetch_page_read(bucket_page_id)
            .ok_or_else(pool_exhausted)?;
        drop(directory_guard);
        Ok(hash_bucket::lookup::<K, V>(&bucket_guard, key))
    }

    /// Inserts a key/value pair, splitting buckets and growing the
    /// directory as needed. `false` on duplicate key or when the directory
    /// has reached its maximum depth and the target bucket cannot split.
    pub fn insert(&self, key: &K, value: &V) -> io::Result<bool> {
        let hash = self.hash(key);

        let mut header_guard = self
            .bpm
            .fetch_page_write(self.header_page_id)
            .ok_or_else(pool_exhausted)?;
        let directory_idx = header_guard
            .view::<HashHeaderPageData>()
            .hash_to_directory_index(hash);
        let mut directory_page_id = header_guard
            .view::<HashHeaderPageData>()
            .directory_page_id(directory_idx);

        if directory_page_id == INVALID_PAGE_ID {
            let mut directory_guard = self.bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
            directory_guard
                .view_mut::<HashDirectoryPageData>()
                .init(self.directory_max_depth);
            directory_page_id = directory_guard.page_id();
            header_guard
                .view_mut::<HashHeaderPageData>()
                .set_directory_page_id(directory_idx, directory_page_id);
        }

        let mut directory_guard = self
            .bpm
            .fetch_page_write(directory_page_id)
            .ok_or_else(pool_exhausted)?;
        drop(header_guard);

        loop {
            let directory = directory_guard.view::<HashDirectoryPageData>();
            let bucket_idx = directory.hash_to_bucket_index(hash);
            let bucket_page_id = directory.bucket_page_id(bucket_idx);

            if bucket_page_id == INVALID_PAGE_ID {
                // Buckets are created lazily at the current global depth,
                // covering exactly one directory slot.
                let global_depth = directory.global_depth();
                let mut bucket_guard = self.bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
                hash_bucket::init::<K, V>(&mut bucket_guard, self.bucket_max_size);
                let new_page_id = bucket_guard.page_id();
                let directory = directory_guard.view_mut::<HashDirectoryPageData>();
                directory.set_bucket_page_id(bucket_idx, new_page_id);
                directory.set_local_depth(bucket_idx, global_depth);
                return Ok(hash_bucket::insert(&mut bucket_guard, key, value));
            }

            let mut bucket_guard = self
                .bpm
                .fetch_page_write(bucket_page_id)
                .ok_or_else(pool_exhausted)?;

            if hash_bucket::lookup::<K, V>(&bucket_guard, key).is_some() {
                return Ok(false);
            }

            if !hash_bucket::is_full(&bucket_guard) {
                return Ok(hash_bucket::insert(&mut bucket_guard, key, value));
            }

            // Split the bucket, growing the directory first when its local
            // depth has caught up with the global depth.
            let local_depth = directory_guard
                .view::<HashDirectoryPageData>()
                .local_depth(bucket_idx);
            if local_depth == directory_guard.view::<HashDirectoryPageData>().global_depth() {
                let directory = directory_guard.view_mut::<HashDirectoryPageData>();
                if !directory.incr_global_depth() {
                    crate::basalt_debug_log!(
                        "[HashIndex::insert] directory {directory_page_id} at max depth, insert fails"
                    );
                    return Ok(false);
                }
            }

            let mut split_guard = self.bpm.new_page_guarded().ok_or_else(pool_exhausted)?;
            hash_bucket::init::<K, V>(&mut split_guard, self.bucket_max_size);
            let split_page_id = split_guard.page_id();

            let directory = directory_guard.view_mut::<HashDirectoryPageData>();
            let old_mask = (1u32 << local_depth) - 1;
            let new_mask = (1u32 << (local_depth + 1)) - 1;
            let split_low_bits = (bucket_idx ^ (1 << local_depth)) & new_mask;

            for idx in 0..directory.size() {
                if idx & old_mask == bucket_idx & old_mask {
                    directory.set_local_depth(idx, local_depth + 1);
                }
            }
            for idx in 0..directory.size() {
                if idx & new_mask == split_low_bits {
                    directory.set_bucket_page_id(idx, split_page_id);
                }
            }

            self.migrate_entries(&mut bucket_guard, &mut split_guard, split_low_bits, new_mask);

            // Retry: the target bucket index is recomputed against the new
            // mapping.
            drop(bucket_guard);
            drop(split_guard);
        }
    }

    /// Removes a key. An emptied bucket merges into its split sibling and
    /// the directory shrinks while every local depth permits it.
    pub fn remove(&self, key: &K) -> io::Result<bool> {
        let hash = self.hash(key);

        let mut header_guard = self
            .bpm
            .fetch_page_write(self.header_page_id)
            .ok_or_else(pool_exhausted)?;
        let directory_idx = header_guard
            .view::<HashHeaderPageData>()
            .hash_to_directory_index(hash);
        let directory_page_id = header_guard
            .view::<HashHeaderPageData>()
            .directory_page_id(directory_idx);
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut directory_guard = self
            .bpm
            .fetch_page_write(directory_page_id)
            .ok_or_else(pool_exhausted)?;

        let directory = directory_guard.view::<HashDirectoryPageData>();
        let bucket_idx = directory.hash_to_bucket_index(hash);
        let bucket_page_id = directory.bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut bucket_guard = self
            .bpm
            .fetch_page_write(bucket_page_id)
            .ok_or_else(pool_exhausted)?;
        if !hash_bucket::remove::<K, V>(&mut bucket_guard, key) {
            return Ok(false);
        }

        if !hash_bucket::is_empty(&bucket_guard) {
            return Ok(true);
        }
        drop(bucket_guard);

        let local_depth = directory_guard
            .view::<HashDirectoryPageData>()
            .local_depth(bucket_idx);

        if local_depth == 0 {
            // Last bucket of this directory: free both pages.
            header_guard
                .view_mut::<HashHeaderPageData>()
                .set_directory_page_id(directory_idx, INVALID_PAGE_ID);
            drop(directory_guard);
            self.bpm.delete_page(bucket_page_id);
            self.bpm.delete_page(directory_page_id);
            return Ok(true);
        }
        drop(header_guard);

        let directory = directory_guard.view_mut::<HashDirectoryPageData>();
        let sibling_idx = bucket_idx ^ (1 << (local_depth - 1));
        let sibling_page_id = directory.bucket_page_id(sibling_idx);

        // Merging is only sound between true split images: the sibling
        // must exist at the same local depth.
        if sibling_page_id != bucket_page_id
            && directory.local_depth(sibling_idx) == local_depth
        {
            let merged_mask = (1u32 << (local_depth - 1)) - 1;
            for idx in 0..directory.size() {
                if idx & merged_mask == bucket_idx & merged_mask {
                    directory.set_bucket_page_id(idx, sibling_page_id);
                    directory.set_local_depth(idx, local_depth - 1);
                }
            }
            self.bpm.delete_page(bucket_page_id);
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }
        Ok(true)
    }

    /// Moves every entry whose hash falls in the split image's residue
    /// class from `bucket` to `split`.
    fn migrate_entries(
        &self,
        bucket: &mut crate::page_guard::WritePageGuard<'_>,
        split: &mut crate::page_guard::WritePageGuard<'_>,
        split_low_bits: u32,
        mask: u32,
    ) {
        let mut idx = hash_bucket::size(bucket);
        while idx > 0 {
            idx -= 1;
            let (key, value) = hash_bucket::entry_at::<K, V>(bucket, idx);
            if self.hash(&key) & mask == split_low_bits {
                hash_bucket::insert(split, &key, &value);
                hash_bucket::remove_at::<K, V>(bucket, idx);
            }
        }
    }

    /// Runs the directory invariant check on every reachable directory.
    pub fn verify_integrity(&self) -> io::Result<()> {
        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id)
            .ok_or_else(pool_exhausted)?;
        let header = header_guard.view::<HashHeaderPageData>();
        for idx in 0..header.max_size() {
            let directory_page_id = header.directory_page_id(idx);
            if directory_page_id == INVALID_PAGE_ID {
                continue;
            }
            let directory_guard = self
                .bpm
                .fetch_page_read(directory_page_id)
                .ok_or_else(pool_exhausted)?;
            directory_guard.view::<HashDirectoryPageData>().verify_integrity();
        }
        Ok(())
    }

    /// Global depth of the directory a key's hash routes to, for tests.
    pub fn directory_global_depth(&self, key: &K) -> io::Result<Option<u32>> {
        let hash = self.hash(key);
        let header_guard = self
            .bpm
            .fetch_page_read(self.header_page_id)
            .ok_or_else(pool_exhausted)?;
        let header = header_guard.view::<HashHeaderPageData>();
        let directory_page_id = header.directory_page_id(header.hash_to_directory_index(hash));
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let directory_guard = self
            .bpm
            .fetch_page_read(directory_page_id)
            .ok_or_else(pool_exhausted)?;
        Ok(Some(directory_guard.view::<HashDirectoryPageData>().global_depth()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPoolConfig;
    use crate::pager::Pager;
    use tempfile::tempdir;

    fn pool(dir: &std::path::Path) -> Arc<BufferPoolManager> {
        let pager = Pager::open(dir.join("hash.db")).unwrap();
        Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 64,
                replacer_k: 2,
            },
            pager,
        ))
    }

    fn i64_hash(key: &i64) -> u32 {
        default_key_hash(&key.to_le_bytes())
    }

    // Pins every key to a crafted bucket path so split and grow decisions
    // are deterministic.
    fn seeded_hash(key: &i64) -> u32 {
        match key {
            4 => 0,
            12 => 2,
            16 => 4,
            1 => 1,
            5 => 8,
            9 => 3,
            13 => 5,
            other => *other as u32,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), i64_hash, 2, 3, 8).unwrap();

        assert!(table.insert(&10, &100).unwrap());
        assert!(table.insert(&20, &200).unwrap());
        assert_eq!(table.get(&10).unwrap(), Some(100));
        assert_eq!(table.get(&20).unwrap(), Some(200));
        assert_eq!(table.get(&30).unwrap(), None);
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), i64_hash, 2, 3, 8).unwrap();

        assert!(table.insert(&1, &1).unwrap());
        assert!(!table.insert(&1, &2).unwrap());
        assert_eq!(table.get(&1).unwrap(), Some(1));
    }

    #[test]
    fn test_remove_missing_key_returns_false() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), i64_hash, 2, 3, 8).unwrap();
        assert!(!table.remove(&77).unwrap());
        assert!(table.insert(&77, &7).unwrap());
        assert!(table.remove(&77).unwrap());
        assert_eq!(table.get(&77).unwrap(), None);
    }

    // Seed scenario: header_max_depth = 2, directory_max_depth = 3,
    // bucket_max_size = 2, keys [4, 12, 16, 1, 5, 9, 13]. With the seeded
    // hash the directory's global depth steps [1, 1, 2, 2, 3, 3, 3] and
    // every key stays retrievable after every insert.
    #[test]
    fn test_grow_sequence_with_seeded_hash() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), seeded_hash, 2, 3, 2)
                .unwrap();

        let keys = [4i64, 12, 16, 1, 5, 9, 13];
        let expected_depths = [1, 1, 2, 2, 3, 3, 3];

        for (step, key) in keys.iter().enumerate() {
            assert!(table.insert(key, &(key * 10)).unwrap(), "insert {key}");
            assert_eq!(
                table.directory_global_depth(key).unwrap(),
                Some(expected_depths[step]),
                "global depth after inserting {key}"
            );
            table.verify_integrity().unwrap();
            for inserted in &keys[..=step] {
                assert_eq!(
                    table.get(inserted).unwrap(),
                    Some(inserted * 10),
                    "lookup {inserted} after inserting {key}"
                );
            }
        }
    }

    #[test]
    fn test_insert_fails_at_max_directory_depth() {
        let dir = tempdir().unwrap();
        // Directory capped at depth 1: two buckets of one entry each.
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), |k| *k as u32, 0, 1, 1)
                .unwrap();

        assert!(table.insert(&0, &0).unwrap());
        assert!(table.insert(&1, &1).unwrap());
        // Both buckets are full at local depth == global depth == max.
        assert!(!table.insert(&2, &2).unwrap());
        assert_eq!(table.get(&0).unwrap(), Some(0));
        assert_eq!(table.get(&1).unwrap(), Some(1));
    }

    #[test]
    fn test_split_preserves_all_entries() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), i64_hash, 2, 6, 4).unwrap();

        for key in 0..64i64 {
            assert!(table.insert(&key, &(key * 2)).unwrap(), "insert {key}");
        }
        table.verify_integrity().unwrap();
        for key in 0..64i64 {
            assert_eq!(table.get(&key).unwrap(), Some(key * 2), "lookup {key}");
        }
    }

    // Deterministic merge/shrink: keys 4 and 12 share a bucket until 16
    // forces a split to depth 2; removing 16 and 4 empties the split
    // bucket, merges it back, and shrinks the directory to depth 1.
    #[test]
    fn test_emptied_split_bucket_merges_and_directory_shrinks() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), seeded_hash, 2, 3, 2)
                .unwrap();

        for key in [4i64, 12, 16] {
            assert!(table.insert(&key, &key).unwrap());
        }
        assert_eq!(table.directory_global_depth(&4).unwrap(), Some(2));

        assert!(table.remove(&16).unwrap());
        assert!(table.remove(&4).unwrap());
        assert_eq!(table.directory_global_depth(&4).unwrap(), Some(1));
        table.verify_integrity().unwrap();

        assert_eq!(table.get(&12).unwrap(), Some(12));
        assert_eq!(table.get(&4).unwrap(), None);
    }

    #[test]
    fn test_remove_merges_and_shrinks() {
        let dir = tempdir().unwrap();
        let table =
            DiskExtendibleHashTable::<i64, i64>::new(pool(dir.path()), i64_hash, 2, 6, 4).unwrap();

        for key in 0..32i64 {
            table.insert(&key, &key).unwrap();
        }
        let grown = table.directory_global_depth(&0).unwrap().unwrap();
        assert!(grown > 1);

        for key in 0..32i64 {
            assert!(table.remove(&key).unwrap(), "remove {key}");
            table.verify_integrity().unwrap();
        }
        for key in 0..32i64 {
            assert_eq!(table.get(&key).unwrap(), None);
        }
    }
}
