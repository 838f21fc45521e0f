/// Unit tests for the cache stores
///
/// These tests verify that the caching layer correctly:
/// - Derives keys independent of parameter order
/// - Round-trips documents through memory and disk
/// - Repopulates memory from disk after a restart
/// - Treats deletes of missing entries as success
use chrono::{Duration, Utc};
use tempfile::TempDir;

use eveapi::{
    CacheStore, CachedDocument, DiskCache, FileCache, MemoryCache, Params, RequestFingerprint,
};

fn fingerprint(params: &[(&str, &str)]) -> RequestFingerprint {
    let params: Params = params.iter().copied().collect();
    RequestFingerprint::new("api.eveonline.com", "/eve/CharacterName.xml.aspx", &params)
}

fn document() -> CachedDocument {
    CachedDocument::new("<eveapi/>", Utc::now() + Duration::hours(1))
}

#[test]
fn test_fingerprint_ignores_insertion_order() {
    let a = fingerprint(&[("ids", "1"), ("keyID", "5")]);
    let b = fingerprint(&[("keyID", "5"), ("ids", "1")]);
    let c = fingerprint(&[("ids", "2"), ("keyID", "5")]);

    assert_eq!(a.key(), b.key());
    assert_ne!(a.key(), c.key());
    assert!(a.key().starts_with("request_"));
}

#[test]
fn test_fingerprint_depends_on_host_and_path() {
    let params = Params::new();
    let a = RequestFingerprint::new("api.eveonline.com", "/eve/SkillTree.xml.aspx", &params);
    let b = RequestFingerprint::new("api.testeveonline.com", "/eve/SkillTree.xml.aspx", &params);
    let c = RequestFingerprint::new("api.eveonline.com", "/eve/RefTypes.xml.aspx", &params);

    assert_ne!(a.key(), b.key());
    assert_ne!(a.key(), c.key());
}

#[test]
fn test_memory_cache_round_trip() {
    let cache = MemoryCache::new();
    let request = fingerprint(&[("ids", "1")]);

    assert_eq!(cache.retrieve(&request).unwrap(), None);
    cache.store(&request, document()).unwrap();
    assert_eq!(
        cache.retrieve(&request).unwrap().map(|d| d.content),
        Some("<eveapi/>".to_string())
    );

    cache.delete(&request).unwrap();
    assert_eq!(cache.retrieve(&request).unwrap(), None);
}

#[test]
fn test_delete_missing_entry_is_ok() {
    let temp_dir = TempDir::new().unwrap();
    let cache = FileCache::open(temp_dir.path()).unwrap();
    assert!(cache.delete(&fingerprint(&[("ids", "404")])).is_ok());
}

#[test]
fn test_file_cache_reloads_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let request = fingerprint(&[("ids", "7")]);
    let stored = document();

    FileCache::open(temp_dir.path())
        .unwrap()
        .store(&request, stored.clone())
        .unwrap();

    let reopened = FileCache::open(temp_dir.path()).unwrap();
    assert!(!reopened.contains(&request));
    assert_eq!(reopened.retrieve(&request).unwrap(), Some(stored));
    assert!(reopened.contains(&request));
}

#[test]
fn test_disk_cache_requires_directory() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing");
    assert!(DiskCache::new(missing).is_err());
}

#[test]
fn test_disk_cache_clear() {
    let temp_dir = TempDir::new().unwrap();
    let cache = FileCache::open(temp_dir.path()).unwrap();
    cache.store(&fingerprint(&[("ids", "1")]), document()).unwrap();
    cache.store(&fingerprint(&[("ids", "2")]), document()).unwrap();

    assert_eq!(cache.backend().entry_count(), 2);
    cache.backend().clear().unwrap();
    cache.clear_memory();
    assert_eq!(cache.backend().entry_count(), 0);
    assert_eq!(cache.retrieve(&fingerprint(&[("ids", "1")])).unwrap(), None);
}

#[test]
fn test_freshness_boundary() {
    let now = Utc::now();
    let doc = CachedDocument::new("x", now);
    assert!(!doc.is_fresh_at(now));
    assert!(doc.is_fresh_at(now - Duration::seconds(1)));
}
