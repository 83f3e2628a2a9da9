use super::{Tree, TreeOptions, TreeShape};
use crate::primitives::pager::{MemStore, NullStore, PageStore};
use crate::types::{ArborError, PageId, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbor=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn fanout8() -> Result<Tree<u64, u64>> {
    init_tracing();
    Tree::new(TreeOptions::with_fanout(8))
}

fn mem_tree(fanout: usize) -> Result<(Arc<MemStore>, Tree<u64, u64>)> {
    init_tracing();
    let store = Arc::new(MemStore::default());
    let dyn_store: Arc<dyn PageStore> = store.clone();
    let tree = Tree::open_or_create(dyn_store, TreeOptions::with_fanout(fanout))?;
    Ok((store, tree))
}

fn assert_tree_matches_reference(
    tree: &Tree<u64, u64>,
    reference: &BTreeMap<u64, u64>,
    max_key: u64,
) -> Result<()> {
    for key in 0..=max_key {
        assert_eq!(tree.get(&key)?, reference.get(&key).copied(), "key {key}");
    }
    assert_eq!(tree.len(), reference.len());
    assert_eq!(tree.is_empty(), reference.is_empty());
    Ok(())
}

#[test]
fn empty_tree_get_returns_none() -> Result<()> {
    let tree = fanout8()?;
    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.search(&0), None);
    assert_eq!(tree.get(&u64::MAX)?, None);
    assert_eq!(
        tree.verify()?,
        TreeShape {
            height: 1,
            pages: 1,
            leaves: 0,
            keys: 0
        }
    );
    Ok(())
}

#[test]
fn cross_check_scenario() -> Result<()> {
    let mut tree = fanout8()?;
    for key in [2, 5, 3, 1, 6, 0, 4] {
        assert_eq!(tree.insert(key, key + 100)?, None);
    }
    for key in 0..=6 {
        assert_eq!(tree.search(&key), Some(key + 100));
    }
    assert_eq!(tree.search(&7), None);
    let shape = tree.verify()?;
    assert_eq!(shape.height, 2);
    assert_eq!(shape.leaves, 1);
    assert_eq!(shape.keys, 7);
    Ok(())
}

#[test]
fn first_insert_materializes_leaf_under_internal_root() -> Result<()> {
    let mut tree = fanout8()?;
    let root = tree.root_page();
    tree.insert(42, 1)?;
    assert_eq!(tree.root_page(), root);
    assert_eq!(tree.height(), 2);
    assert_eq!(tree.verify()?.pages, 2);
    Ok(())
}

#[test]
fn sequential_inserts_stay_balanced_after_every_step() -> Result<()> {
    let mut tree = fanout8()?;
    for key in 0..32u64 {
        tree.insert(key, key * 2)?;
        let shape = tree.verify()?;
        assert_eq!(shape.keys as u64, key + 1);
    }
    for key in 0..32u64 {
        assert_eq!(tree.search(&key), Some(key * 2));
    }
    assert_eq!(tree.search(&32), None);
    let stats = tree.stats_snapshot();
    assert!(stats.leaf_splits >= 6);
    assert_eq!(stats.root_splits, 0);
    Ok(())
}

#[test]
fn root_split_grows_height() -> Result<()> {
    let mut tree = fanout8()?;
    let first_root = tree.root_page();
    for key in 0..100u64 {
        tree.insert(key, key)?;
        tree.verify()?;
    }
    assert!(tree.height() >= 3);
    assert_ne!(tree.root_page(), first_root);
    let stats = tree.stats();
    assert!(stats.root_splits() >= 1);
    assert!(stats.internal_splits() >= 1);
    Ok(())
}

#[test]
fn odd_and_minimal_fanouts_keep_invariants() -> Result<()> {
    for fanout in [3usize, 5, 7] {
        let mut tree = Tree::<u64, u64>::new(TreeOptions::with_fanout(fanout))?;
        let mut rng = ChaCha8Rng::seed_from_u64(fanout as u64);
        let mut reference = BTreeMap::new();
        for _ in 0..300 {
            let key = rng.gen_range(0..64u64);
            if rng.gen_bool(0.6) {
                assert_eq!(tree.insert(key, key + 1)?, reference.insert(key, key + 1));
            } else {
                assert_eq!(tree.erase(&key)?, reference.remove(&key).is_some());
            }
            tree.verify()?;
        }
        assert_tree_matches_reference(&tree, &reference, 64)?;
    }
    Ok(())
}

#[test]
fn duplicate_insert_replaces_value() -> Result<()> {
    let mut tree = fanout8()?;
    for key in 0..20u64 {
        tree.insert(key, key)?;
    }
    assert_eq!(tree.insert(7, 700)?, Some(7));
    assert_eq!(tree.insert(7, 701)?, Some(700));
    assert_eq!(tree.search(&7), Some(701));
    assert_eq!(tree.len(), 20);
    assert_eq!(tree.verify()?.keys, 20);
    Ok(())
}

#[test]
fn erase_missing_key_leaves_tree_unchanged() -> Result<()> {
    let mut tree = fanout8()?;
    assert!(!tree.erase(&3)?);
    for key in (0..40u64).map(|k| k * 2) {
        tree.insert(key, key)?;
    }
    let before = tree.dump();
    let shape = tree.verify()?;
    assert!(!tree.erase(&3)?);
    assert!(!tree.erase(&1000)?);
    assert_eq!(tree.dump(), before);
    assert_eq!(tree.verify()?, shape);
    Ok(())
}

#[test]
fn erase_existing_key_removes_entry() -> Result<()> {
    let mut tree = fanout8()?;
    for key in 0..50u64 {
        tree.insert(key, key)?;
    }
    for key in (0..50u64).step_by(3) {
        assert!(tree.erase(&key)?);
        assert_eq!(tree.search(&key), None);
        assert!(!tree.erase(&key)?);
        tree.verify()?;
    }
    for key in 0..50u64 {
        let expected = (key % 3 != 0).then_some(key);
        assert_eq!(tree.search(&key), expected);
    }
    Ok(())
}

#[test]
fn descending_erase_merges_and_collapses_root() -> Result<()> {
    let mut tree = fanout8()?;
    for key in 0..16u64 {
        tree.insert(key, key)?;
    }
    assert_eq!(tree.verify()?.leaves, 3);

    for key in (9..16u64).rev() {
        assert!(tree.erase(&key)?);
        tree.verify()?;
    }
    let merged = tree.stats_snapshot();
    assert!(merged.leaf_merges >= 1);
    assert_eq!(tree.verify()?.leaves, 2);

    for key in (0..9u64).rev() {
        assert!(tree.erase(&key)?);
        tree.verify()?;
    }
    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.stats().root_collapses(), 1);
    assert_eq!(
        tree.verify()?,
        TreeShape {
            height: 1,
            pages: 1,
            leaves: 0,
            keys: 0
        }
    );
    Ok(())
}

#[test]
fn ascending_erase_merges_right_sibling_into_child() -> Result<()> {
    let mut tree = fanout8()?;
    for key in 0..16u64 {
        tree.insert(key, key)?;
    }
    // Leaves hold 0..=3, 4..=7 and 8..=15; the first leaf can absorb the second.
    assert!(tree.erase(&0)?);
    let shape = tree.verify()?;
    assert_eq!(shape.leaves, 2);
    assert_eq!(tree.stats().leaf_merges(), 1);
    for key in 1..16u64 {
        assert_eq!(tree.search(&key), Some(key));
    }
    Ok(())
}

#[test]
fn emptying_restores_fresh_state_and_tree_is_reusable() -> Result<()> {
    let mut tree = fanout8()?;
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut keys: Vec<u64> = (0..200).collect();
    for &key in &keys {
        tree.insert(key, key)?;
    }
    for i in (1..keys.len()).rev() {
        keys.swap(i, rng.gen_range(0..=i));
    }
    for key in &keys {
        assert!(tree.erase(key)?);
    }
    let fresh = fanout8()?;
    assert!(tree.is_empty());
    assert_eq!(tree.verify()?, fresh.verify()?);

    tree.insert(9, 90)?;
    assert_eq!(tree.search(&9), Some(90));
    assert_eq!(tree.height(), 2);
    Ok(())
}

#[test]
fn randomized_ops_match_btreemap() -> Result<()> {
    let mut tree = fanout8()?;
    let mut reference = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0xB7EE);
    for step in 0..2_000 {
        let key = rng.gen_range(0..256u64);
        if rng.gen_bool(0.55) {
            let value = rng.gen::<u64>();
            assert_eq!(tree.insert(key, value)?, reference.insert(key, value));
        } else {
            assert_eq!(tree.erase(&key)?, reference.remove(&key).is_some());
        }
        if step % 97 == 0 {
            tree.verify()?;
        }
    }
    tree.verify()?;
    assert_tree_matches_reference(&tree, &reference, 256)
}

#[test]
fn binary_and_linear_slot_search_agree() -> Result<()> {
    let linear = TreeOptions {
        binary_search_threshold: Some(usize::MAX),
        ..TreeOptions::with_fanout(16)
    };
    let binary = TreeOptions {
        binary_search_threshold: Some(0),
        ..TreeOptions::with_fanout(16)
    };
    let mut a = Tree::<u64, u64>::new(linear)?;
    let mut b = Tree::<u64, u64>::new(binary)?;
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..500 {
        let key = rng.gen_range(0..128u64);
        if rng.gen_bool(0.7) {
            assert_eq!(a.insert(key, key)?, b.insert(key, key)?);
        } else {
            assert_eq!(a.erase(&key)?, b.erase(&key)?);
        }
    }
    assert_eq!(a.dump(), b.dump());
    for key in 0..130u64 {
        assert_eq!(a.search(&key), b.search(&key));
    }
    Ok(())
}

#[test]
fn default_fanout_fills_the_page() -> Result<()> {
    let mut tree = Tree::<u64, u64>::new(TreeOptions::default())?;
    assert_eq!(tree.fanout(), 202);
    for key in 0..1_000u64 {
        tree.insert(key, !key)?;
    }
    let shape = tree.verify()?;
    assert_eq!(shape.height, 2);
    assert!(shape.leaves > 1);
    assert_eq!(tree.search(&999), Some(!999));
    Ok(())
}

#[test]
fn rejects_invalid_fanout() {
    assert!(matches!(
        Tree::<u64, u64>::new(TreeOptions::with_fanout(2)),
        Err(ArborError::Invalid(_))
    ));
    assert!(matches!(
        Tree::<u64, u64>::new(TreeOptions::with_fanout(1_000)),
        Err(ArborError::Invalid(_))
    ));
    let store: Arc<dyn PageStore> = Arc::new(NullStore::new(512));
    assert!(Tree::<u64, u64>::open_or_create(store, TreeOptions::default()).is_err());
}

#[test]
fn signed_and_byte_array_keys() -> Result<()> {
    let mut signed = Tree::<i64, u32>::new(TreeOptions::with_fanout(4))?;
    for key in -20i64..20 {
        signed.insert(key, (key + 100) as u32)?;
    }
    assert_eq!(signed.search(&-20), Some(80));
    assert!(signed.erase(&-5)?);
    assert_eq!(signed.search(&-5), None);
    signed.verify()?;

    let mut bytes = Tree::<[u8; 4], u64>::new(TreeOptions::with_fanout(4))?;
    for n in 0..30u32 {
        bytes.insert(n.to_be_bytes(), n as u64)?;
    }
    assert_eq!(bytes.search(&17u32.to_be_bytes()), Some(17));
    assert_eq!(bytes.verify()?.keys, 30);
    Ok(())
}

#[test]
fn trace_enabled_dumps_after_mutations() -> Result<()> {
    init_tracing();
    let opts = TreeOptions {
        trace_enabled: true,
        ..TreeOptions::with_fanout(4)
    };
    let mut tree = Tree::<u64, u64>::new(opts)?;
    for key in 0..10u64 {
        tree.insert(key, key)?;
    }
    assert!(tree.erase(&4)?);
    let dump = tree.dump();
    assert!(dump.starts_with("internal page"));
    assert!(dump.contains("leaf page"));
    assert!(dump.contains("  9"));
    assert!(!dump.contains("  4\n"));
    tree.emit_stats();
    Ok(())
}

#[test]
fn flush_writes_dirty_pages_once() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..40u64 {
        tree.insert(key, key)?;
    }
    let pages = tree.verify()?.pages;
    assert_eq!(tree.flush()?, pages);
    assert_eq!(store.resident_pages(), pages);
    assert_eq!(tree.flush()?, 0);

    tree.insert(100, 1)?;
    let rewritten = tree.flush()?;
    assert!(rewritten >= 2 && rewritten <= pages);
    assert_eq!(tree.stats().pages_written(), (pages + rewritten) as u64);
    Ok(())
}

#[test]
fn flushed_tree_reopens_from_root_page() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..60u64 {
        tree.insert(key * 3, key)?;
    }
    tree.flush()?;
    let root = tree.root_page();
    let height = tree.height();

    let dyn_store: Arc<dyn PageStore> = store.clone();
    let opts = TreeOptions {
        root_page: Some(root),
        ..TreeOptions::default()
    };
    let mut reopened = Tree::<u64, u64>::open_or_create(dyn_store, opts)?;
    assert_eq!(reopened.fanout(), 8);
    assert_eq!(reopened.len(), 60);
    assert_eq!(reopened.height(), height);
    assert_eq!(reopened.search(&30), Some(10));
    assert_eq!(reopened.search(&31), None);

    assert!(reopened.erase(&30)?);
    reopened.insert(31, 7)?;
    reopened.verify()?;
    assert!(reopened.stats().page_faults() > 0);
    Ok(())
}

#[test]
fn spill_faults_children_back_on_demand() -> Result<()> {
    let (_store, mut tree) = mem_tree(8)?;
    let mut reference = BTreeMap::new();
    for key in 0..80u64 {
        tree.insert(key, key + 1)?;
        reference.insert(key, key + 1);
    }
    tree.spill()?;
    let faults_before = tree.stats().page_faults();
    assert_eq!(tree.search(&10), Some(11));
    assert!(tree.stats().page_faults() > faults_before);

    for key in (0..80u64).step_by(2) {
        assert!(tree.erase(&key)?);
        reference.remove(&key);
    }
    for key in 200..230u64 {
        tree.insert(key, key)?;
        reference.insert(key, key);
    }
    tree.verify()?;
    assert_tree_matches_reference(&tree, &reference, 240)?;

    tree.spill()?;
    tree.verify()?;
    assert_tree_matches_reference(&tree, &reference, 240)
}

#[test]
fn spill_requires_a_retaining_store() -> Result<()> {
    let mut tree = fanout8()?;
    tree.insert(1, 1)?;
    assert!(matches!(tree.spill(), Err(ArborError::Invalid(_))));
    assert_eq!(tree.search(&1), Some(1));
    Ok(())
}

#[test]
fn evicted_child_is_a_page_fault_for_get_and_absent_for_search() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..40u64 {
        tree.insert(key, key)?;
    }
    let pages = tree.verify()?.pages as u64;
    tree.spill()?;
    for id in 1..=pages + 1 {
        if PageId(id) != tree.root_page() {
            store.evict(PageId(id));
        }
    }
    assert!(matches!(tree.get(&5), Err(ArborError::PageFault(_))));
    assert_eq!(tree.search(&5), None);
    assert!(matches!(tree.verify(), Err(ArborError::PageFault(_))));
    assert!(tree.dump().contains("unavailable"));
    Ok(())
}

#[test]
fn reopen_detects_damage_and_fanout_mismatch() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..30u64 {
        tree.insert(key, key)?;
    }
    tree.flush()?;
    let root = tree.root_page();
    let dyn_store: Arc<dyn PageStore> = store.clone();

    let mismatched = TreeOptions {
        root_page: Some(root),
        ..TreeOptions::with_fanout(16)
    };
    assert!(matches!(
        Tree::<u64, u64>::open_or_create(Arc::clone(&dyn_store), mismatched),
        Err(ArborError::Invalid(_))
    ));

    let mut image = store.read_page(root)?.expect("root image").to_vec();
    let last = image.len() - 1;
    image[last] ^= 0xFF;
    store.write_page(root, &image)?;

    let verified = TreeOptions {
        root_page: Some(root),
        ..TreeOptions::default()
    };
    assert!(matches!(
        Tree::<u64, u64>::open_or_create(Arc::clone(&dyn_store), verified.clone()),
        Err(ArborError::Corruption(_))
    ));
    let unverified = TreeOptions {
        checksum_verify_on_read: false,
        ..verified
    };
    let reopened = Tree::<u64, u64>::open_or_create(dyn_store, unverified)?;
    assert_eq!(reopened.len(), 30);

    let missing = TreeOptions {
        root_page: Some(PageId(999)),
        ..TreeOptions::default()
    };
    let dyn_store: Arc<dyn PageStore> = store;
    assert!(matches!(
        Tree::<u64, u64>::open_or_create(dyn_store, missing),
        Err(ArborError::PageFault(PageId(999)))
    ));
    Ok(())
}

#[test]
fn merged_pages_are_released_to_the_store() -> Result<()> {
    let (store, mut tree) = mem_tree(4)?;
    for key in 0..64u64 {
        tree.insert(key, key)?;
    }
    tree.flush()?;
    let written = store.resident_pages();
    for key in 0..64u64 {
        assert!(tree.erase(&key)?);
    }
    // Only the root survives; every other page went back to the store.
    assert_eq!(store.resident_pages(), 1);
    assert!(written > 1);
    let snapshot = tree.stats_snapshot();
    assert!(snapshot.leaf_merges + snapshot.internal_merges > 0);
    Ok(())
}

#[test]
fn erase_with_unreadable_sibling_leaves_tree_intact() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..16u64 {
        tree.insert(key, key)?;
    }
    tree.spill()?;
    // Leaves are 2 = 0..=3, 3 = 4..=7 and 4 = 8..=15; page 3 is the right
    // neighbour consulted when erasing from the first leaf.
    let image = store.read_page(PageId(3))?.expect("leaf image");
    assert!(store.evict(PageId(3)));

    assert!(matches!(tree.erase(&0), Err(ArborError::PageFault(PageId(3)))));
    assert_eq!(tree.len(), 16);
    assert_eq!(tree.get(&0)?, Some(0));
    assert_eq!(tree.search(&0), Some(0));
    assert!(matches!(tree.erase(&0), Err(ArborError::PageFault(PageId(3)))));

    store.write_page(PageId(3), &image)?;
    assert!(tree.erase(&0)?);
    assert_eq!(tree.len(), 15);
    assert_eq!(tree.get(&0)?, None);
    tree.verify()?;
    Ok(())
}

#[test]
fn insert_into_unreadable_child_takes_no_page_id() -> Result<()> {
    let (store, mut tree) = mem_tree(8)?;
    for key in 0..16u64 {
        tree.insert(key, key)?;
    }
    tree.spill()?;
    // Page 4 holds 8..=15 and is full, so inserting 16 has to split it.
    assert!(store.evict(PageId(4)));

    assert!(matches!(tree.insert(16, 16), Err(ArborError::PageFault(PageId(4)))));
    assert_eq!(tree.len(), 16);
    assert_eq!(tree.stats().leaf_splits(), 2);
    assert_eq!(store.allocate_page()?, PageId(5));
    Ok(())
}

/// Memory store that refuses allocations once its ration runs out.
struct RationedStore {
    inner: MemStore,
    ration: AtomicU64,
}

impl RationedStore {
    fn ration(&self, allocations: u64) {
        self.ration.store(allocations, Ordering::Relaxed);
    }
}

impl PageStore for RationedStore {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn allocate_page(&self) -> Result<PageId> {
        let left = self.ration.load(Ordering::Relaxed);
        if left == 0 {
            return Err(ArborError::Invalid("allocation refused"));
        }
        self.ration.store(left - 1, Ordering::Relaxed);
        self.inner.allocate_page()
    }

    fn read_page(&self, id: PageId) -> Result<Option<Box<[u8]>>> {
        self.inner.read_page(id)
    }

    fn write_page(&self, id: PageId, image: &[u8]) -> Result<()> {
        self.inner.write_page(id, image)
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        self.inner.free_page(id)
    }

    fn retains_pages(&self) -> bool {
        true
    }
}

#[test]
fn refused_allocation_leaves_a_consistent_tree() -> Result<()> {
    init_tracing();
    let store = Arc::new(RationedStore {
        inner: MemStore::default(),
        ration: AtomicU64::new(1),
    });
    let dyn_store: Arc<dyn PageStore> = store.clone();
    let mut tree = Tree::<u64, u64>::open_or_create(dyn_store, TreeOptions::with_fanout(3))?;

    let mut refused = 0;
    for key in 0..40u64 {
        let mut inserted = false;
        for ration in 0..64 {
            store.ration(ration);
            match tree.insert(key, key) {
                Ok(previous) => {
                    assert_eq!(previous, None);
                    inserted = true;
                    break;
                }
                Err(ArborError::Invalid("allocation refused")) => {
                    refused += 1;
                    assert_eq!(tree.len(), key as usize);
                    assert_eq!(tree.search(&key), None);
                    tree.verify()?;
                }
                Err(err) => return Err(err),
            }
        }
        assert!(inserted, "key {key} never fit");
    }
    assert!(refused > 0);
    assert!(tree.stats().root_splits() > 0);
    assert_eq!(tree.len(), 40);
    for key in 0..40u64 {
        assert_eq!(tree.get(&key)?, Some(key));
    }
    tree.verify()?;
    Ok(())
}
