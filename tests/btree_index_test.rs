use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use corrodb::common::types::Rid;
use corrodb::index::btree::BPlusTree;

mod common;
use common::create_test_buffer_pool;

fn rid_for(k: i64) -> Rid {
    Rid::new(k as i32, k as u32)
}

fn tree_height(pretty: &str) -> usize {
    // Every line is one node; leaves carry the "leaf" prefix after indent.
    pretty
        .lines()
        .map(|l| l.len() - l.trim_start().len())
        .max()
        .map(|indent| indent / 2 + 1)
        .unwrap_or(0)
}

#[test]
fn test_empty_tree_boundaries() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    assert!(tree.is_empty()?);
    assert_eq!(tree.get_value(&1)?, None);
    tree.remove(&1)?; // no-op
    assert!(tree.iter()?.next().is_none());
    Ok(())
}

#[test]
fn test_insert_get_law() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    assert!(tree.insert(10, rid_for(10))?);
    assert_eq!(tree.get_value(&10)?, Some(rid_for(10)));

    // Duplicate insert fails and preserves the first value.
    assert!(!tree.insert(10, Rid::new(999, 999))?);
    assert_eq!(tree.get_value(&10)?, Some(rid_for(10)));

    tree.remove(&10)?;
    assert_eq!(tree.get_value(&10)?, None);
    Ok(())
}

#[test]
fn test_leaf_split_at_capacity() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    for k in [1, 2, 3, 4] {
        assert!(tree.insert(k, rid_for(k))?);
    }
    // Still a single root leaf.
    assert_eq!(tree_height(&tree.to_pretty_string()?), 1);

    // The fifth key forces the root split: left {1,2}, right {3,4,5},
    // separator 3 (the right sibling's first key).
    assert!(tree.insert(5, rid_for(5))?);
    let pretty = tree.to_pretty_string()?;
    assert_eq!(tree_height(&pretty), 2);
    assert!(pretty.lines().next().unwrap().contains("[3]"));
    let leaves: Vec<&str> = pretty.lines().filter(|l| l.contains("leaf")).collect();
    assert_eq!(leaves.len(), 2);
    assert!(leaves[0].contains("[1, 2]"));
    assert!(leaves[1].contains("[3, 4, 5]"));

    for k in 1..=5 {
        assert_eq!(tree.get_value(&k)?, Some(rid_for(k)));
    }
    Ok(())
}

#[test]
fn test_delete_redistributes_from_right() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    // Leaves {1,2} and {3,4,5} under separator 3.
    for k in [1, 2, 3, 4, 5] {
        tree.insert(k, rid_for(k))?;
    }
    // Left leaf underflows; it steals 3, and the separator becomes 4.
    tree.remove(&1)?;

    let pretty = tree.to_pretty_string()?;
    assert!(pretty.lines().next().unwrap().contains("[4]"));
    let leaves: Vec<&str> = pretty.lines().filter(|l| l.contains("leaf")).collect();
    assert!(leaves[0].contains("[2, 3]"));
    assert!(leaves[1].contains("[4, 5]"));
    Ok(())
}

#[test]
fn test_delete_redistributes_from_left() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    // Build left {10,20}, right {30,50,60} under separator 30.
    for k in [10, 20, 50, 60, 30] {
        tree.insert(k, rid_for(k))?;
    }
    // Steal from the right first: left {20,30}, right {50,60}, separator 50.
    tree.remove(&10)?;
    // 40 sorts below the separator, growing the left leaf to three entries.
    tree.insert(40, rid_for(40))?;

    // The right leaf underflows with no right sibling; it steals the left
    // sibling's last key and the separator follows it.
    tree.remove(&60)?;
    let pretty = tree.to_pretty_string()?;
    assert!(pretty.lines().next().unwrap().contains("[40]"));
    let leaves: Vec<&str> = pretty.lines().filter(|l| l.contains("leaf")).collect();
    assert!(leaves[0].contains("[20, 30]"));
    assert!(leaves[1].contains("[40, 50]"));
    Ok(())
}

#[test]
fn test_merge_collapses_root() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    for k in [1, 2, 3, 4, 5] {
        tree.insert(k, rid_for(k))?;
    }
    // Shrink until the two leaves merge and the root is a leaf again.
    tree.remove(&5)?;
    tree.remove(&4)?;
    tree.remove(&1)?;

    let pretty = tree.to_pretty_string()?;
    assert_eq!(tree_height(&pretty), 1);
    assert_eq!(tree.get_value(&2)?, Some(rid_for(2)));
    assert_eq!(tree.get_value(&3)?, Some(rid_for(3)));
    Ok(())
}

#[test]
fn test_tree_empties_completely() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    for k in 0..20 {
        tree.insert(k, rid_for(k))?;
    }
    for k in 0..20 {
        tree.remove(&k)?;
    }
    assert!(tree.is_empty()?);
    assert_eq!(tree.get_value(&7)?, None);
    assert!(tree.iter()?.next().is_none());

    // The tree still works after emptying.
    tree.insert(100, rid_for(100))?;
    assert_eq!(tree.get_value(&100)?, Some(rid_for(100)));
    Ok(())
}

#[test]
fn test_iterator_full_scan_sorted() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    let mut keys: Vec<i64> = (0..100).collect();
    keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
    for &k in &keys {
        assert!(tree.insert(k, rid_for(k))?);
    }

    let scanned: Vec<i64> = tree
        .iter()?
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(scanned, (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_iterator_from_key() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;

    for k in (0..50).map(|k| k * 2) {
        tree.insert(k, rid_for(k))?;
    }

    // Present key: the scan starts exactly there.
    let mut iter = tree.iter_from(&40)?;
    assert_eq!(iter.next().unwrap()?.0, 40);

    // Absent key: the scan starts at the next larger key.
    let mut iter = tree.iter_from(&41)?;
    assert_eq!(iter.next().unwrap()?.0, 42);

    // Past the last key: the scan is immediately at its end.
    let mut iter = tree.iter_from(&99)?;
    assert!(iter.is_end());
    assert!(iter.next().is_none());
    Ok(())
}

#[test]
fn test_random_workload_with_deletes() -> Result<()> {
    let (bpm, _file) = create_test_buffer_pool(128)?;
    let tree: BPlusTree<i64> = BPlusTree::new(bpm, 4, 4)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);

    let mut keys: Vec<i64> = (0..300).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.insert(k, rid_for(k))?);
    }

    let mut to_delete: Vec<i64> = (0..300).filter(|k| k % 3 != 0).collect();
    to_delete.shuffle(&mut rng);
    for &k in &to_delete {
        tree.remove(&k)?;
    }

    for k in 0..300 {
        let expected = if k % 3 == 0 { Some(rid_for(k)) } else { None };
        assert_eq!(tree.get_value(&k)?, expected, "key {}", k);
    }

    let survivors: Vec<i64> = tree.iter()?.map(|e| e.unwrap().0).collect();
    assert_eq!(survivors, (0..300).filter(|k| k % 3 == 0).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    use std::sync::Arc;
    use std::thread;

    let (bpm, _file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new(bpm, 8, 8)?);

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let tree = tree.clone();
        handles.push(thread::spawn(move || {
            for k in (t * 100)..(t * 100 + 100) {
                assert!(tree.insert(k, rid_for(k)).unwrap());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for k in 0..400 {
        assert_eq!(tree.get_value(&k)?, Some(rid_for(k)), "key {}", k);
    }
    let scanned: Vec<i64> = tree.iter()?.map(|e| e.unwrap().0).collect();
    assert_eq!(scanned, (0..400).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_concurrent_readers_and_writers() -> Result<()> {
    use std::sync::Arc;
    use std::thread;

    let (bpm, _file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new(bpm, 8, 8)?);

    for k in 0..100 {
        tree.insert(k, rid_for(k))?;
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for k in 100..200 {
                assert!(tree.insert(k, rid_for(k)).unwrap());
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = tree.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    for k in 0..100 {
                        assert_eq!(tree.get_value(&k).unwrap(), Some(rid_for(k)));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    for k in 0..200 {
        assert_eq!(tree.get_value(&k)?, Some(rid_for(k)));
    }
    Ok(())
}
