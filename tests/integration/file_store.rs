use std::sync::Arc;

use arbor::{FileStore, PageStore, Result, Tree, TreeOptions};
use tempfile::tempdir;

fn open(store: &Arc<FileStore>, options: TreeOptions) -> Result<Tree<u64, u64>> {
    let store: Arc<dyn PageStore> = store.clone();
    Tree::open_or_create(store, options)
}

#[test]
fn tree_survives_reopen_of_the_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("index.arbor");
    let options = TreeOptions::with_fanout(8);

    let root = {
        let store = Arc::new(FileStore::open(&path, options.page_size)?);
        let mut tree = open(&store, options.clone())?;
        for key in 0..500u64 {
            tree.insert(key, key * 7)?;
        }
        for key in (0..500u64).filter(|k| k % 5 == 0) {
            assert!(tree.erase(&key)?);
        }
        tree.flush()?;
        tree.root_page()
    };

    let store = Arc::new(FileStore::open(&path, options.page_size)?);
    let reopened = TreeOptions {
        root_page: Some(root),
        ..options
    };
    let mut tree = open(&store, reopened)?;
    assert_eq!(tree.len(), 400);
    assert_eq!(tree.search(&7), Some(49));
    assert_eq!(tree.search(&10), None);
    tree.verify()?;

    tree.insert(10, 1)?;
    assert!(tree.erase(&7)?);
    assert_eq!(tree.flush()?, tree.stats().pages_written() as usize);
    assert_eq!(tree.search(&10), Some(1));
    Ok(())
}

#[test]
fn options_file_drives_the_tree() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("tree.toml");
    std::fs::write(&config, "fanout = 6\npage_size = 1024\ntrace_enabled = false\n")?;
    let options = TreeOptions::from_toml_file(&config)?;

    let store = Arc::new(FileStore::open(dir.path().join("idx.arbor"), options.page_size)?);
    let mut tree = open(&store, options)?;
    assert_eq!(tree.fanout(), 6);
    for key in 0..100u64 {
        tree.insert(key, key)?;
    }
    let written = tree.spill()?;
    assert_eq!(written, tree.verify()?.pages);
    assert_eq!(std::fs::metadata(store.path())?.len() % 1024, 0);
    assert_eq!(tree.get(&42)?, Some(42));
    Ok(())
}
