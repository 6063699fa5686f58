use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::BTreePageType;

// Leaf layout:
// - page_type: u8
// - size: u16
// - max_size: u16
// - next_page_id: i32
// - entries: (key_len: u16, key bytes, rid: 2 * u32) * size
const HEADER_SIZE: usize = 9;

/// Decoded B+ tree leaf page: ordered `(key, rid)` pairs plus the right
/// sibling link. Mutations happen on the decoded form; `store` writes it
/// back to the page bytes.
pub struct LeafNode<K> {
    pub max_size: usize,
    pub next_page_id: PageId,
    pub entries: Vec<(K, Rid)>,
}

impl<K> LeafNode<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub fn new(max_size: usize, next_page_id: PageId) -> Self {
        Self {
            max_size,
            next_page_id,
            entries: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Minimum entry count for a non-root leaf
    pub fn min_size(&self) -> usize {
        self.max_size.div_ceil(2)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Largest index whose key is `<= key`, or None when every key is
    /// greater (or the leaf is empty).
    pub fn search(&self, key: &K) -> Option<usize> {
        let n = self.entries.partition_point(|(k, _)| k <= key);
        n.checked_sub(1)
    }

    /// Exact lookup
    pub fn find(&self, key: &K) -> Option<Rid> {
        self.search(key)
            .filter(|&i| self.entries[i].0 == *key)
            .map(|i| self.entries[i].1)
    }

    /// Sorted-position insert; duplicates are refused, not overwritten.
    pub fn insert(&mut self, key: K, rid: Rid) -> bool {
        let pos = self.entries.partition_point(|(k, _)| *k < key);
        if pos < self.entries.len() && self.entries[pos].0 == key {
            return false;
        }
        self.entries.insert(pos, (key, rid));
        true
    }

    /// Remove the entry for `key` if present.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.search(key) {
            Some(i) if self.entries[i].0 == *key => {
                self.entries.remove(i);
                true
            }
            _ => false,
        }
    }

    /// Split an overfull leaf. The left half keeps the first `⌈max/2⌉`
    /// entries; the rest move to the returned right sibling, whose first key
    /// is the separator to promote.
    pub fn split(&mut self) -> (K, LeafNode<K>) {
        let split_at = self.max_size.div_ceil(2);
        let right_entries = self.entries.split_off(split_at);
        let right = LeafNode {
            max_size: self.max_size,
            next_page_id: self.next_page_id,
            entries: right_entries,
        };
        (right.entries[0].0.clone(), right)
    }

    pub fn load(data: &[u8]) -> Result<Self, PageError> {
        if BTreePageType::of_page(data)? != BTreePageType::Leaf {
            return Err(PageError::Corrupted("expected a leaf page".to_string()));
        }
        let size = LittleEndian::read_u16(&data[1..3]) as usize;
        let max_size = LittleEndian::read_u16(&data[3..5]) as usize;
        let next_page_id = LittleEndian::read_i32(&data[5..9]);

        let mut entries = Vec::with_capacity(size);
        let mut offset = HEADER_SIZE;
        for _ in 0..size {
            let key_len = LittleEndian::read_u16(&data[offset..offset + 2]) as usize;
            offset += 2;
            let key: K = bincode::deserialize(&data[offset..offset + key_len])
                .map_err(|e| PageError::Serialization(e.to_string()))?;
            offset += key_len;
            let page_id = LittleEndian::read_i32(&data[offset..offset + 4]);
            let slot = LittleEndian::read_u32(&data[offset + 4..offset + 8]);
            offset += 8;
            entries.push((key, Rid::new(page_id, slot)));
        }

        Ok(Self {
            max_size,
            next_page_id,
            entries,
        })
    }

    pub fn store(&self, data: &mut [u8]) -> Result<(), PageError> {
        data.fill(0);
        data[0] = BTreePageType::Leaf as u8;
        LittleEndian::write_u16(&mut data[1..3], self.entries.len() as u16);
        LittleEndian::write_u16(&mut data[3..5], self.max_size as u16);
        LittleEndian::write_i32(&mut data[5..9], self.next_page_id);

        let mut offset = HEADER_SIZE;
        for (key, rid) in &self.entries {
            let key_bytes =
                bincode::serialize(key).map_err(|e| PageError::Serialization(e.to_string()))?;
            if offset + 2 + key_bytes.len() + 8 > PAGE_SIZE {
                return Err(PageError::NodeTooLarge);
            }
            LittleEndian::write_u16(&mut data[offset..offset + 2], key_bytes.len() as u16);
            offset += 2;
            data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
            offset += key_bytes.len();
            LittleEndian::write_i32(&mut data[offset..offset + 4], rid.page_id);
            LittleEndian::write_u32(&mut data[offset + 4..offset + 8], rid.slot);
            offset += 8;
        }
        Ok(())
    }
}
