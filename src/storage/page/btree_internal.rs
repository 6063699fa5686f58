use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, PAGE_SIZE};
use crate::storage::page::error::PageError;
use crate::storage::page::BTreePageType;

// Internal layout:
// - page_type: u8
// - size: u16 (child count)
// - max_size: u16
// - entries: (key_len: u16, key bytes, child: i32) * size
//   entry 0's key is a placeholder and written with length 0.
const HEADER_SIZE: usize = 5;

/// Decoded B+ tree internal page. `children` has one more element than
/// `keys`: `keys[i]` separates `children[i]` from `children[i + 1]` and
/// equals the smallest key reachable under `children[i + 1]`.
pub struct InternalNode<K> {
    pub max_size: usize,
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

impl<K> InternalNode<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Child count
    pub fn size(&self) -> usize {
        self.children.len()
    }

    /// Minimum child count for a non-root internal node
    pub fn min_size(&self) -> usize {
        self.max_size.div_ceil(2)
    }

    pub fn is_full(&self) -> bool {
        self.children.len() >= self.max_size
    }

    /// Index of the child to descend into: the largest `i` such that
    /// `i == 0` or `keys[i - 1] <= key`.
    pub fn child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    pub fn child_at(&self, index: usize) -> PageId {
        self.children[index]
    }

    /// Insert a separator and the child to its right, keeping order.
    pub fn insert(&mut self, key: K, right_child: PageId) {
        let pos = self.keys.partition_point(|k| *k < key);
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, right_child);
    }

    /// Split an overfull internal node. The left half keeps `⌈max/2⌉`
    /// children; the separator between the halves moves up to the parent.
    pub fn split(&mut self) -> (K, InternalNode<K>) {
        let left_children = self.max_size.div_ceil(2);
        let promoted = self.keys[left_children - 1].clone();

        let right_children = self.children.split_off(left_children);
        let right_keys = self.keys.split_off(left_children);
        self.keys.truncate(left_children - 1);

        let right = InternalNode {
            max_size: self.max_size,
            keys: right_keys,
            children: right_children,
        };
        (promoted, right)
    }

    /// Drop the separator at `key_index` and the child to its right.
    pub fn remove_entry(&mut self, key_index: usize) {
        self.keys.remove(key_index);
        self.children.remove(key_index + 1);
    }

    pub fn load(data: &[u8]) -> Result<Self, PageError> {
        if BTreePageType::of_page(data)? != BTreePageType::Internal {
            return Err(PageError::Corrupted("expected an internal page".to_string()));
        }
        let size = LittleEndian::read_u16(&data[1..3]) as usize;
        let max_size = LittleEndian::read_u16(&data[3..5]) as usize;

        let mut keys = Vec::with_capacity(size.saturating_sub(1));
        let mut children = Vec::with_capacity(size);
        let mut offset = HEADER_SIZE;
        for i in 0..size {
            let key_len = LittleEndian::read_u16(&data[offset..offset + 2]) as usize;
            offset += 2;
            if i == 0 {
                if key_len != 0 {
                    return Err(PageError::Corrupted(
                        "entry 0 of an internal page carries a key".to_string(),
                    ));
                }
            } else {
                let key: K = bincode::deserialize(&data[offset..offset + key_len])
                    .map_err(|e| PageError::Serialization(e.to_string()))?;
                keys.push(key);
                offset += key_len;
            }
            children.push(LittleEndian::read_i32(&data[offset..offset + 4]));
            offset += 4;
        }

        Ok(Self {
            max_size,
            keys,
            children,
        })
    }

    pub fn store(&self, data: &mut [u8]) -> Result<(), PageError> {
        debug_assert_eq!(self.keys.len() + 1, self.children.len());

        data.fill(0);
        data[0] = BTreePageType::Internal as u8;
        LittleEndian::write_u16(&mut data[1..3], self.children.len() as u16);
        LittleEndian::write_u16(&mut data[3..5], self.max_size as u16);

        let mut offset = HEADER_SIZE;
        for (i, child) in self.children.iter().enumerate() {
            if i == 0 {
                // placeholder key
                LittleEndian::write_u16(&mut data[offset..offset + 2], 0);
                offset += 2;
            } else {
                let key_bytes = bincode::serialize(&self.keys[i - 1])
                    .map_err(|e| PageError::Serialization(e.to_string()))?;
                if offset + 2 + key_bytes.len() + 4 > PAGE_SIZE {
                    return Err(PageError::NodeTooLarge);
                }
                LittleEndian::write_u16(&mut data[offset..offset + 2], key_bytes.len() as u16);
                offset += 2;
                data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
                offset += key_bytes.len();
            }
            LittleEndian::write_i32(&mut data[offset..offset + 4], *child);
            offset += 4;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal_with(keys: &[i64]) -> InternalNode<i64> {
        // children are synthetic page ids 100, 101, ...
        let mut node = InternalNode::new(4);
        node.children.push(100);
        for (i, &k) in keys.iter().enumerate() {
            node.keys.push(k);
            node.children.push(101 + i as i32);
        }
        node
    }

    #[test]
    fn test_child_index_contract() {
        let node = internal_with(&[10, 20, 30]);
        assert_eq!(node.child_index(&5), 0);
        assert_eq!(node.child_index(&10), 1);
        assert_eq!(node.child_index(&15), 1);
        assert_eq!(node.child_index(&30), 3);
        assert_eq!(node.child_index(&99), 3);
    }

    #[test]
    fn test_insert_keeps_separator_order() {
        let mut node = internal_with(&[10, 30]);
        node.insert(20, 555);
        assert_eq!(node.keys, vec![10, 20, 30]);
        assert_eq!(node.children, vec![100, 101, 555, 102]);
    }

    #[test]
    fn test_split_promotes_middle_separator() {
        // max_size 4, overfull with 5 children
        let mut node = internal_with(&[10, 20, 30]);
        node.insert(40, 555);
        assert_eq!(node.size(), 5);

        let (promoted, right) = node.split();
        // left keeps ceil(4/2) = 2 children, right gets the other 3
        assert_eq!(promoted, 20);
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.keys, vec![10]);
        assert_eq!(right.children.len(), 3);
        assert_eq!(right.keys, vec![30, 40]);
    }

    #[test]
    fn test_store_load_round_trip() {
        let node = internal_with(&[7, 21]);
        let mut data = [0u8; PAGE_SIZE];
        node.store(&mut data).unwrap();

        let loaded: InternalNode<i64> = InternalNode::load(&data).unwrap();
        assert_eq!(loaded.max_size, 4);
        assert_eq!(loaded.keys, node.keys);
        assert_eq!(loaded.children, node.children);
    }

    #[test]
    fn test_remove_entry() {
        let mut node = internal_with(&[10, 20, 30]);
        node.remove_entry(1);
        assert_eq!(node.keys, vec![10, 30]);
        assert_eq!(node.children, vec![100, 101, 103]);
    }
}
