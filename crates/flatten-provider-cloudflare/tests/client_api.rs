//! Contract Test: CloudFlare Client API Calls
//!
//! These tests run the store against a local HTTP server that answers
//! with canned CloudFlare envelopes.
//!
//! Constraints verified:
//! - Listing follows `has_more` pages and keeps only the domain's A records
//! - Create is `rec_new` (service_mode=1) followed by `rec_proxy` (service_mode=0)
//! - A failed `rec_proxy` is reported as an incomplete create naming the record
//! - Deleting a missing record succeeds as already absent
//! - The snapshot is cached until invalidated
//! - Credentials travel in the form body, never in the URL
//! - Every record of a duplicated address is listed and, when stale, deleted
//! - A `rec_new` whose reply times out is never sent again

use async_trait::async_trait;
use flatten_core::traits::{AddressSet, DeleteOutcome, NameResolver, RecordStore};
use flatten_core::{EngineConfig, Error, ErrorKind, Reconciler};
use flatten_provider_cloudflare::CloudflareRecordStore;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as the server saw it
#[derive(Debug, Clone)]
struct SeenRequest {
    request_line: String,
    body: String,
}

impl SeenRequest {
    fn param(&self, key: &str) -> Option<String> {
        self.body.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.replace("%40", "@").replace("%2E", "."))
        })
    }
}

type Seen = Arc<Mutex<Vec<SeenRequest>>>;

/// Serve `responses` in order, one connection each
async fn serve(responses: Vec<(u16, String)>) -> (String, Seen) {
    serve_delayed(
        responses
            .into_iter()
            .map(|(status, body)| (status, body, Duration::ZERO))
            .collect(),
    )
    .await
}

/// Like `serve`, holding each reply back for its delay
async fn serve_delayed(responses: Vec<(u16, String, Duration)>) -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    tokio::spawn(async move {
        for (status, body, delay) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            log.lock().unwrap().push(request);
            tokio::time::sleep(delay).await;

            let reply = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            // The client may have given up already
            socket.write_all(reply.as_bytes()).await.ok();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}/api_json.html"), seen)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> SeenRequest {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);

    while buffer.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending body");
        buffer.extend_from_slice(&chunk[..n]);
    }

    SeenRequest {
        request_line: head.lines().next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&buffer[header_end..header_end + content_length]).to_string(),
    }
}

fn ok(response: &str) -> (u16, String) {
    (
        200,
        format!(r#"{{"request":{{}},"response":{response},"result":"success","msg":null}}"#),
    )
}

fn api_error(code: &str, msg: &str) -> (u16, String) {
    (
        200,
        format!(r#"{{"result":"error","msg":"{msg}","err_code":"{code}"}}"#),
    )
}

fn record(id: &str, name: &str, kind: &str, content: &str, service_mode: &str) -> String {
    format!(
        r#"{{"rec_id":"{id}","rec_tag":"tag-{id}","name":"{name}","type":"{kind}","content":"{content}","ttl":"120","service_mode":"{service_mode}"}}"#
    )
}

fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn list_page(records: &[String]) -> (u16, String) {
    ok(&format!(
        r#"{{"recs":{{"has_more":false,"count":{},"objs":[{}]}}}}"#,
        records.len(),
        records.join(",")
    ))
}

/// Resolver with a fixed answer
struct FixedResolver(AddressSet);

#[async_trait]
impl NameResolver for FixedResolver {
    async fn resolve(&self, _name: &str) -> Result<AddressSet, Error> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "fixed".to_string()
    }
}

fn reconciler(store: CloudflareRecordStore, desired: &[&str], max_retries: usize) -> Reconciler {
    let desired = desired.iter().map(|s| ip(s)).collect();
    Reconciler::new(
        Box::new(FixedResolver(desired)),
        Box::new(store),
        &EngineConfig {
            max_retries,
            retry_delay_secs: 0,
        },
    )
}

fn store(endpoint: &str) -> CloudflareRecordStore {
    CloudflareRecordStore::new(
        "secret_key_12345",
        "ops@example.com",
        "example.com",
        "example.com",
        120,
        false,
    )
    .unwrap()
    .with_endpoint(endpoint)
}

#[tokio::test]
async fn list_follows_pages_and_filters() {
    let page_one = format!(
        r#"{{"recs":{{"has_more":true,"count":2,"objs":[{},{}]}}}}"#,
        record("1", "example.com", "A", "192.0.2.1", "0"),
        record("2", "www.example.com", "A", "192.0.2.2", "0"),
    );
    let page_two = format!(
        r#"{{"recs":{{"has_more":false,"count":2,"objs":[{},{}]}}}}"#,
        record("3", "example.com", "A", "192.0.2.3", "1"),
        record("4", "example.com", "TXT", "v=spf1 -all", "0"),
    );
    let (endpoint, seen) = serve(vec![ok(&page_one), ok(&page_two)]).await;

    let snapshot = store(&endpoint).list().await.unwrap();

    assert_eq!(snapshot.len(), 2);
    let first = &snapshot[&ip("192.0.2.1")][0];
    assert_eq!(first.record_id, "1");
    assert_eq!(first.tag.as_deref(), Some("tag-1"));
    assert!(snapshot[&ip("192.0.2.3")][0].proxied);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].param("a").as_deref(), Some("rec_load_all"));
    assert_eq!(seen[0].param("o"), None);
    assert_eq!(seen[1].param("o").as_deref(), Some("2"));
}

#[tokio::test]
async fn credentials_stay_out_of_the_url() {
    let (endpoint, seen) = serve(vec![ok(r#"{"recs":{"has_more":false,"objs":[]}}"#)]).await;

    store(&endpoint).list().await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen[0].request_line.starts_with("POST /api_json.html "));
    assert!(!seen[0].request_line.contains("secret_key_12345"));
    assert_eq!(seen[0].param("tkn").as_deref(), Some("secret_key_12345"));
    assert_eq!(seen[0].param("email").as_deref(), Some("ops@example.com"));
    assert_eq!(seen[0].param("z").as_deref(), Some("example.com"));
}

#[tokio::test]
async fn snapshot_is_cached_until_invalidated() {
    let empty = ok(r#"{"recs":{"has_more":false,"objs":[]}}"#);
    let (endpoint, seen) = serve(vec![empty.clone(), empty]).await;
    let store = store(&endpoint);

    store.list().await.unwrap();
    store.list().await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    store.invalidate().await;
    store.list().await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn create_is_two_steps() {
    let created = format!(r#"{{"rec":{{"obj":{}}}}}"#, record("77", "example.com", "A", "192.0.2.9", "1"));
    let proxied = format!(r#"{{"rec":{{"obj":{}}}}}"#, record("77", "example.com", "A", "192.0.2.9", "0"));
    let (endpoint, seen) = serve(vec![ok(&created), ok(&proxied)]).await;

    let entry = store(&endpoint)
        .create(ip("192.0.2.9"))
        .await
        .unwrap();

    assert_eq!(entry.record_id, "77");
    assert_eq!(entry.tag.as_deref(), Some("tag-77"));
    assert!(!entry.proxied);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].param("a").as_deref(), Some("rec_new"));
    assert_eq!(seen[0].param("type").as_deref(), Some("A"));
    assert_eq!(seen[0].param("name").as_deref(), Some("example.com"));
    assert_eq!(seen[0].param("content").as_deref(), Some("192.0.2.9"));
    assert_eq!(seen[0].param("ttl").as_deref(), Some("120"));
    assert_eq!(seen[0].param("service_mode").as_deref(), Some("1"));

    assert_eq!(seen[1].param("a").as_deref(), Some("rec_proxy"));
    assert_eq!(seen[1].param("id").as_deref(), Some("77"));
    assert_eq!(seen[1].param("rtag").as_deref(), Some("tag-77"));
    assert_eq!(seen[1].param("service_mode").as_deref(), Some("0"));
}

#[tokio::test]
async fn failed_second_step_is_incomplete_create() {
    let created = format!(r#"{{"rec":{{"obj":{}}}}}"#, record("78", "example.com", "A", "192.0.2.9", "1"));
    let (endpoint, _seen) = serve(vec![ok(&created), api_error("E_INVLDINPUT", "Invalid rtag")]).await;

    let err = store(&endpoint)
        .create(ip("192.0.2.9"))
        .await
        .unwrap_err();

    match err {
        Error::IncompleteCreate { address, record_id, message } => {
            assert_eq!(address, ip("192.0.2.9"));
            assert_eq!(record_id, "78");
            assert!(message.contains("Invalid rtag"));
        }
        other => panic!("expected IncompleteCreate, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_first_step_creates_nothing() {
    let (endpoint, seen) = serve(vec![api_error("E_INVLDINPUT", "Invalid content")]).await;

    let err = store(&endpoint)
        .create(ip("192.0.2.9"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn delete_of_missing_record_is_already_absent() {
    let (endpoint, seen) = serve(vec![
        ok("null"),
        api_error("E_INVLDINPUT", "Invalid record id."),
    ])
    .await;
    let store = store(&endpoint);

    assert_eq!(store.delete("5").await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete("5").await.unwrap(), DeleteOutcome::AlreadyAbsent);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].param("a").as_deref(), Some("rec_delete"));
    assert_eq!(seen[0].param("id").as_deref(), Some("5"));
}

#[tokio::test]
async fn errors_are_classified() {
    let (endpoint, _seen) = serve(vec![
        api_error("E_UNAUTH", "Invalid API key"),
        api_error("E_MAXAPI", "Too many API calls"),
        (429, "slow down".to_string()),
        (503, "maintenance".to_string()),
        (200, "<html>not json</html>".to_string()),
    ])
    .await;
    let store = store(&endpoint);

    let mut kinds = Vec::new();
    for _ in 0..5 {
        kinds.push(store.list().await.unwrap_err().kind());
    }

    assert_eq!(
        kinds,
        vec![
            ErrorKind::ProviderAuth,
            ErrorKind::ProviderThrottled,
            ErrorKind::ProviderThrottled,
            ErrorKind::ProviderTransport,
            ErrorKind::ProviderProtocol,
        ]
    );
}

#[tokio::test]
async fn duplicate_addresses_are_all_listed() {
    let (endpoint, _seen) = serve(vec![list_page(&[
        record("1", "example.com", "A", "192.0.2.9", "0"),
        record("2", "example.com", "A", "192.0.2.9", "1"),
    ])])
    .await;

    let snapshot = store(&endpoint).list().await.unwrap();

    let copies = &snapshot[&ip("192.0.2.9")];
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].record_id, "1");
    assert_eq!(copies[1].record_id, "2");
    assert!(copies[1].proxied);
}

#[tokio::test]
async fn pass_deletes_every_copy_of_a_stale_address() {
    let (endpoint, seen) = serve(vec![
        list_page(&[
            record("a", "example.com", "A", "192.0.2.1", "0"),
            record("b", "example.com", "A", "192.0.2.9", "0"),
            record("c", "example.com", "A", "192.0.2.9", "1"),
        ]),
        ok("null"),
        ok("null"),
    ])
    .await;

    let report = reconciler(store(&endpoint), &["192.0.2.1"], 0)
        .run("myapp.herokuapp.com")
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.removed.len(), 2);

    let seen = seen.lock().unwrap();
    let deleted: Vec<String> = seen
        .iter()
        .filter(|r| r.param("a").as_deref() == Some("rec_delete"))
        .filter_map(|r| r.param("id"))
        .collect();
    assert_eq!(deleted, vec!["b", "c"]);
}

#[tokio::test]
async fn slow_rec_new_is_sent_once() {
    let created = format!(r#"{{"rec":{{"obj":{}}}}}"#, record("80", "example.com", "A", "192.0.2.5", "1"));
    let proxied = format!(r#"{{"rec":{{"obj":{}}}}}"#, record("80", "example.com", "A", "192.0.2.5", "0"));
    let (list_status, list_body) = list_page(&[]);
    let (endpoint, seen) = serve_delayed(vec![
        (list_status, list_body, Duration::ZERO),
        // Answered long after the client has timed out
        (200, ok(&created).1, Duration::from_millis(800)),
        // Spare replies a resent rec_new would be served
        (200, ok(&created).1, Duration::ZERO),
        (200, ok(&proxied).1, Duration::ZERO),
    ])
    .await;

    let store = store(&endpoint)
        .with_http_timeout(Duration::from_millis(300))
        .unwrap();
    let report = reconciler(store, &["192.0.2.5"], 2)
        .run("myapp.herokuapp.com")
        .await
        .unwrap();

    assert!(report.added.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::Timeout);

    let rec_new_count = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.param("a").as_deref() == Some("rec_new"))
        .count();
    assert_eq!(rec_new_count, 1);
}
