//! Cache unit tests

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use oci_lxc_deployer::cache::documents::DocumentCache;
use oci_lxc_deployer::models::template::Template;

fn create_test_template(name: &str) -> Template {
    Template {
        name: name.to_string(),
        skip_if_all_missing: vec!["volumes".to_string()],
        ..Default::default()
    }
}

#[test]
fn test_document_cache_insert_and_get() {
    let cache = DocumentCache::new(10);
    let path = PathBuf::from("/catalog/json/shared/templates/create-lxc.json");
    let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    cache.insert(path.clone(), modified, create_test_template("create-lxc"));

    let entry = cache.get(&path, modified);
    assert!(entry.is_some());
    assert_eq!(entry.unwrap().name, "create-lxc");
}

#[test]
fn test_document_cache_changed_file_misses() {
    let cache = DocumentCache::new(10);
    let path = PathBuf::from("t.json");
    let modified = UNIX_EPOCH + Duration::from_secs(10);

    cache.insert(path.clone(), modified, create_test_template("t"));

    assert!(cache.get(&path, modified + Duration::from_secs(1)).is_none());
}

#[test]
fn test_document_cache_eviction() {
    let cache = DocumentCache::new(2);

    cache.insert(PathBuf::from("1.json"), UNIX_EPOCH, create_test_template("1"));
    cache.insert(PathBuf::from("2.json"), UNIX_EPOCH, create_test_template("2"));
    cache.insert(PathBuf::from("3.json"), UNIX_EPOCH, create_test_template("3"));

    // Cache should have evicted the oldest entry
    assert_eq!(cache.len(), 2);
    assert!(cache.get(Path::new("3.json"), UNIX_EPOCH).is_some());
}

#[test]
fn test_document_cache_invalidate_and_clear() {
    let cache = DocumentCache::new(10);
    cache.insert(PathBuf::from("a.json"), UNIX_EPOCH, create_test_template("a"));
    cache.insert(PathBuf::from("b.json"), UNIX_EPOCH, create_test_template("b"));

    cache.invalidate(Path::new("a.json"));
    assert!(cache.get(Path::new("a.json"), UNIX_EPOCH).is_none());
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
}
