/// End-to-end call flows
///
/// These tests drive a root context through path building, parameter
/// inheritance, the transport seam, parsing and the cache store:
/// - Fresh cache entries are replayed without touching the transport
/// - Stale entries are deleted and refetched exactly once
/// - Unreadable entries are deleted and refetched exactly once
/// - Documents without a freshness window are never stored
/// - Cache failures never fail a call
/// - Declared API errors surface as typed errors
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use eveapi::{
    ApiError, CacheStore, CachedDocument, Context, ErrorKind, FileCache, MemoryCache, ParamValue,
    Params, RequestFingerprint, Scalar,
};

use crate::common::mocks::{MockApiServer, RecordingCacheStore, RecordingTransport, context_with};
use crate::common::test_helpers::{
    DUPLICATE_KEYS, SERVER_STATUS, SKILL_TREE, api_document, cacheable_document, error_document,
    server_now,
};

const HOST: &str = "api.test.local";
const STATUS_PATH: &str = "/server/ServerStatus.xml.aspx";

fn status_fingerprint() -> RequestFingerprint {
    RequestFingerprint::new(HOST, STATUS_PATH, &Params::new())
}

#[test]
fn test_fresh_cache_entry_skips_transport() {
    let mut server = MockApiServer::new();
    server.expect_fetch().never();

    let store = RecordingCacheStore::new();
    store.seed(
        &status_fingerprint(),
        CachedDocument::new(
            cacheable_document(Duration::hours(1), SERVER_STATUS),
            Utc::now() + Duration::hours(1),
        ),
    );

    let api = context_with(Arc::new(server), Some(store.clone()));
    let status = api.extend("server").extend("ServerStatus").call().unwrap();

    assert!(status.from_cache);
    assert_eq!(status.bool("serverOpen"), Some(true));
    assert_eq!(status.int("onlinePlayers"), Some(32000));
    assert_eq!(store.store_count(), 0);
}

#[test]
fn test_stale_cache_entry_is_deleted_and_refetched_once() {
    let body = cacheable_document(Duration::hours(1), SERVER_STATUS);
    let mut server = MockApiServer::new();
    server
        .expect_fetch()
        .withf(|request| request.path == STATUS_PATH)
        .times(1)
        .returning(move |_| Ok(body.clone()));

    let store = RecordingCacheStore::new();
    store.seed(
        &status_fingerprint(),
        CachedDocument::new("<stale/>", Utc::now() - Duration::minutes(5)),
    );

    let api = context_with(Arc::new(server), Some(store.clone()));
    let status = api.extend("server").extend("ServerStatus").call().unwrap();

    assert!(!status.from_cache);
    assert_eq!(store.delete_count(), 1);
    assert_eq!(store.store_count(), 1);
    let replacement = store.get(&status_fingerprint()).unwrap();
    assert!(replacement.content.contains("onlinePlayers"));
}

#[test]
fn test_unreadable_cache_entry_is_deleted_and_refetched() {
    let body = cacheable_document(Duration::hours(1), SERVER_STATUS);
    let mut server = MockApiServer::new();
    server
        .expect_fetch()
        .withf(|request| request.path == STATUS_PATH)
        .times(1)
        .returning(move |_| Ok(body.clone()));

    let store = RecordingCacheStore::new();
    store.seed(
        &status_fingerprint(),
        CachedDocument::new("<eveapi><result>", Utc::now() + Duration::hours(1)),
    );

    let api = context_with(Arc::new(server), Some(store.clone()));
    let status = api.resolve("server/ServerStatus").call().unwrap();

    assert!(!status.from_cache);
    assert_eq!(status.int("onlinePlayers"), Some(32000));
    assert_eq!(store.delete_count(), 1);
    assert_eq!(store.store_count(), 1);
    let replacement = store.get(&status_fingerprint()).unwrap();
    assert!(replacement.content.contains("onlinePlayers"));
}

#[test]
fn test_second_call_is_served_from_memory_cache() {
    let body = cacheable_document(Duration::hours(1), SERVER_STATUS);
    let mut server = MockApiServer::new();
    server
        .expect_fetch()
        .times(1)
        .returning(move |_| Ok(body.clone()));

    let api = Context::builder()
        .url("https://api.test.local")
        .transport(server)
        .cache_store(MemoryCache::new())
        .build()
        .unwrap();
    let status = api.resolve("server/ServerStatus");

    let first = status.call().unwrap();
    let second = status.call().unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.result(), second.result());
}

#[test]
fn test_zero_window_document_is_not_stored() {
    let now = server_now();
    let transport = RecordingTransport::new(api_document(now, now, SERVER_STATUS));
    let store = RecordingCacheStore::new();

    let api = context_with(transport.clone(), Some(store.clone()));
    let status = api.resolve("server/ServerStatus");
    status.call().unwrap();
    status.call().unwrap();

    assert_eq!(store.store_count(), 0);
    assert_eq!(store.len(), 0);
    assert_eq!(transport.requests().len(), 2);
}

#[test]
fn test_negative_window_document_is_not_stored() {
    let now = server_now();
    let transport =
        RecordingTransport::new(api_document(now, now - Duration::minutes(1), SERVER_STATUS));
    let store = RecordingCacheStore::new();

    let api = context_with(transport, Some(store.clone()));
    api.resolve("server/ServerStatus").call().unwrap();

    assert_eq!(store.store_count(), 0);
}

#[test]
fn test_store_failure_still_returns_document() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let store = RecordingCacheStore::failing_writes();

    let api = context_with(transport, Some(store.clone()));
    let status = api.resolve("server/ServerStatus").call().unwrap();

    assert_eq!(store.store_count(), 1);
    assert_eq!(status.int("onlinePlayers"), Some(32000));
}

#[test]
fn test_read_failure_falls_back_to_transport() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let store = RecordingCacheStore::failing_reads();

    let api = context_with(transport.clone(), Some(store));
    let status = api.resolve("server/ServerStatus").call().unwrap();

    assert!(!status.from_cache);
    assert_eq!(transport.requests().len(), 1);
}

#[test]
fn test_no_cache_store_always_fetches() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let api = context_with(transport.clone(), None);
    let status = api.resolve("server/ServerStatus");

    status.call().unwrap();
    status.call().unwrap();

    assert_eq!(transport.requests().len(), 2);
}

#[test]
fn test_file_cache_survives_new_connection() {
    let temp_dir = TempDir::new().unwrap();
    let body = cacheable_document(Duration::hours(1), SERVER_STATUS);

    let mut server = MockApiServer::new();
    server
        .expect_fetch()
        .times(1)
        .returning(move |_| Ok(body.clone()));
    let first = context_with(
        Arc::new(server),
        Some(Arc::new(FileCache::open(temp_dir.path()).unwrap())),
    );
    assert!(!first.resolve("server/ServerStatus").call().unwrap().from_cache);

    let mut offline = MockApiServer::new();
    offline.expect_fetch().never();
    let second = context_with(
        Arc::new(offline),
        Some(Arc::new(FileCache::open(temp_dir.path()).unwrap())),
    );
    assert!(second.resolve("server/ServerStatus").call().unwrap().from_cache);
}

#[test]
fn test_parameters_are_inherited_and_overridden() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), ""));
    let api = context_with(transport.clone(), None);

    let me = api.auth(1001, "abc").character(42);
    me.extend("CharacterSheet").call().unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(request.path, "/char/CharacterSheet.xml.aspx");
    assert_eq!(
        request.params,
        vec![
            ("characterID".to_string(), "42".to_string()),
            ("keyID".to_string(), "1001".to_string()),
            ("vCode".to_string(), "abc".to_string()),
        ]
    );

    me.extend("CharacterSheet")
        .invoke(Params::from([("characterID", 9_i64)]))
        .unwrap();
    let request = transport.last_request().unwrap();
    assert_eq!(
        request.params,
        vec![
            ("characterID".to_string(), "9".to_string()),
            ("keyID".to_string(), "1001".to_string()),
            ("vCode".to_string(), "abc".to_string()),
        ]
    );
    assert_eq!(
        me.params().get("characterID"),
        Some(&ParamValue::Integer(42))
    );
}

#[test]
fn test_cache_key_depends_on_parameters() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), ""));
    let store = RecordingCacheStore::new();
    let api = context_with(transport.clone(), Some(store.clone()));
    let names = api.resolve("eve/CharacterName");

    names.invoke(Params::from([("ids", "1")])).unwrap();
    names.invoke(Params::from([("ids", "2")])).unwrap();
    names.invoke(Params::from([("ids", "1")])).unwrap();

    assert_eq!(transport.requests().len(), 2);
    assert_eq!(store.len(), 2);
}

#[test]
fn test_duplicate_keys_resolve_to_last_row() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), DUPLICATE_KEYS));
    let api = context_with(transport, None);

    let response = api.resolve("corp/Items").call().unwrap();
    let items = response.indexed("items").unwrap();

    assert_eq!(items.get(2).unwrap().text("name"), Some("third"));
    let ids: Vec<Scalar> = items.column("id").unwrap().cloned().collect();
    assert_eq!(ids, vec![Scalar::from(1), Scalar::from(2), Scalar::from(2)]);
}

#[test]
fn test_nested_rowsets_navigate() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SKILL_TREE));
    let api = context_with(transport, None);

    let tree = api.resolve("eve/SkillTree").call().unwrap();
    let groups = tree.indexed("skillGroups").unwrap();
    let gunnery = groups.get(255).unwrap();
    let skills = gunnery.child("skills").and_then(|v| v.as_indexed()).unwrap();

    assert_eq!(gunnery.text("groupName"), Some("Gunnery"));
    assert_eq!(
        skills.get(12202).unwrap().text("typeName"),
        Some("Large Artillery Specialization")
    );
}

#[test]
fn test_declared_error_becomes_request_error() {
    let transport = RecordingTransport::new(error_document(400, "Bad Request."));
    let store = RecordingCacheStore::new();
    let api = context_with(transport, Some(store.clone()));

    let err = api.resolve("eve/SkillTree").call().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Request);
    assert_eq!(err.code(), 400);
    assert_eq!(err.message(), "Bad Request");
    assert_eq!(store.len(), 0);
}

#[test]
fn test_authentication_error() {
    let transport = RecordingTransport::new(error_document(203, "Authentication failure."));
    let api = context_with(transport, None);

    let err = api
        .auth(1, "bad")
        .resolve("account/Characters")
        .call()
        .unwrap_err();

    assert!(err.is_authentication());
    assert_eq!(err.to_string(), "AuthenticationError 203: Authentication failure");
}

#[test]
fn test_transport_error_propagates() {
    let mut server = MockApiServer::new();
    server.expect_fetch().times(1).returning(|request| {
        Err(ApiError::from_http_status(503, &request.path, "Service Unavailable"))
    });
    let api = context_with(Arc::new(server), None);

    let err = api.resolve("server/ServerStatus").call().unwrap_err();

    assert!(err.is_server());
    assert_eq!(
        err.message(),
        "'/server/ServerStatus.xml.aspx' request failed (Service Unavailable)"
    );
}

#[test]
fn test_malformed_document_is_server_error() {
    let transport = RecordingTransport::new("this is not xml");
    let api = context_with(transport, None);

    let err = api.resolve("server/ServerStatus").call().unwrap_err();
    assert!(err.is_server());
}

#[test]
fn test_store_shared_between_contexts() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));

    let api = context_with(transport.clone(), Some(store.clone()));
    let other = api.with_cache_store(Some(store));

    api.resolve("server/ServerStatus").call().unwrap();
    assert!(other.resolve("server/ServerStatus").call().unwrap().from_cache);
    assert_eq!(transport.requests().len(), 1);
}
