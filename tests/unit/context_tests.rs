/// Unit tests for request contexts
///
/// These tests verify that contexts:
/// - Build request paths from their segments
/// - Hand the transport wire-encoded, sorted parameters
/// - Send pinned user agents and explicit proxies
/// - Never leak parameters or path segments back into their parents
use std::sync::Arc;

use chrono::Duration;

use eveapi::{Context, ParamValue, Params, ProxyConfig};

use crate::common::mocks::{MockApiServer, RecordingTransport, context_with};
use crate::common::test_helpers::{SERVER_STATUS, cacheable_document};

#[test]
fn test_transport_receives_full_request() {
    let body = cacheable_document(Duration::hours(1), SERVER_STATUS);
    let mut server = MockApiServer::new();
    server
        .expect_fetch()
        .withf(|request| {
            request.scheme == "https"
                && request.host == "api.test.local"
                && request.path == "/eve/CharacterName.xml.aspx"
                && request.params
                    == vec![
                        ("flag".to_string(), "1".to_string()),
                        ("ids".to_string(), "797400947,1188435724".to_string()),
                    ]
        })
        .times(1)
        .returning(move |_| Ok(body.clone()));

    let api = context_with(Arc::new(server), None);
    let params = Params::new()
        .with("ids", vec![797400947_i64, 1188435724])
        .with("flag", true);
    api.resolve("eve/CharacterName").invoke(params).unwrap();
}

#[test]
fn test_call_without_params_sends_none() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let api = context_with(transport.clone(), None);

    api.resolve("server/ServerStatus").call().unwrap();

    let request = transport.last_request().unwrap();
    assert!(request.params.is_empty());
    assert_eq!(
        request.url(),
        "https://api.test.local/server/ServerStatus.xml.aspx"
    );
}

#[test]
fn test_pinned_user_agent_and_proxy() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let api = Context::builder()
        .url("api.test.local")
        .user_agent("my-app/1.0 (contact@example.com)".to_string())
        .proxy(ProxyConfig::new("proxy.local", 3128))
        .shared_transport(transport.clone())
        .no_cache()
        .build()
        .unwrap();

    api.resolve("server/ServerStatus").call().unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(request.user_agent, "my-app/1.0 (contact@example.com)");
    assert_eq!(request.proxy, Some(ProxyConfig::new("proxy.local", 3128)));
}

#[test]
fn test_children_do_not_affect_parents() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), SERVER_STATUS));
    let api = context_with(transport, None);

    let account = api.auth(1, "abc");
    let mary = account.character(150267069);
    let marcus = account.character(150302299);

    assert!(api.params().is_empty());
    assert_eq!(account.params().get("characterID"), None);
    assert_eq!(
        mary.params().get("characterID"),
        Some(&ParamValue::Integer(150267069))
    );
    assert_eq!(
        marcus.params().get("characterID"),
        Some(&ParamValue::Integer(150302299))
    );
    assert_eq!(
        mary.extend("WalletJournal").request_path(),
        "/char/WalletJournal.xml.aspx"
    );
    assert!(account.path_segments().is_empty());
}

#[test]
fn test_with_params_overrides_inherited() {
    let transport = RecordingTransport::new(cacheable_document(Duration::hours(1), ""));
    let api = context_with(transport.clone(), None);

    let journal = api
        .auth(1, "abc")
        .with_params(Params::from([("vCode", "xyz")]))
        .resolve("char/WalletJournal");
    journal.call().unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(
        request.params,
        vec![
            ("keyID".to_string(), "1".to_string()),
            ("vCode".to_string(), "xyz".to_string()),
        ]
    );
}

#[test]
fn test_response_value_feeds_next_call() {
    let transport = RecordingTransport::new(cacheable_document(
        Duration::hours(1),
        r#"<rowset name="characters" key="characterID" columns="name,characterID">
             <row name="Mary" characterID="150267069" />
           </rowset>"#,
    ));
    let api = context_with(transport.clone(), None);
    let account = api.auth(1, "abc");

    let characters = account.resolve("account/Characters").call().unwrap();
    let mary = &characters.rowset("characters").unwrap().rows()[0];
    let character_id = mary.get("characterID").unwrap();

    account
        .character(ParamValue::from(character_id))
        .extend("CharacterSheet")
        .call()
        .unwrap();

    let request = transport.last_request().unwrap();
    assert!(
        request
            .params
            .contains(&("characterID".to_string(), "150267069".to_string()))
    );
}
