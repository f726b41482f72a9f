//! HTTP provider behavior against a local fixture server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use pcmflow_source::{DataProvider, HttpDataProvider, Whence};
use pcmflow_tests::FixtureServer;

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn loaded_provider(url: &str) -> Arc<HttpDataProvider> {
    let provider = Arc::new(HttpDataProvider::new_default(url));
    let (tx, rx) = mpsc::channel();
    provider.clone().load(
        Arc::new(|domain, code| panic!("unexpected {domain} error {code}")),
        Box::new(move |success| tx.send(success).unwrap()),
    );
    assert!(rx.recv().unwrap(), "HTTP provider load failed");
    provider
}

#[test]
fn load_issues_head_and_records_content_length() {
    let body = pattern_bytes(10_000);
    let server = FixtureServer::start(HashMap::from([("/a.bin".to_string(), body)]));
    let provider = loaded_provider(&server.url_for("/a.bin"));

    assert_eq!(provider.size(), 10_000);
    let requests = server.requests();
    assert_eq!(requests[0].method, "HEAD");
    assert_eq!(requests[0].path, "/a.bin");
}

#[test]
fn reads_translate_to_range_requests() {
    let body = pattern_bytes(100_000);
    let server = FixtureServer::start(HashMap::from([("/a.bin".to_string(), body.clone())]));
    let provider = loaded_provider(&server.url_for("/a.bin"));

    assert_eq!(provider.seek(50_000, Whence::Set), 0);
    let mut buf = vec![0u8; 1000];
    let n = provider.read(&mut buf, 1, 1000);
    assert_eq!(n, 1000);
    assert_eq!(&buf[..], &body[50_000..51_000]);
    assert_eq!(provider.tell(), 51_000);

    let range = server
        .requests()
        .into_iter()
        .find_map(|r| r.range)
        .expect("range header observed");
    assert_eq!(range, "bytes=50000-50999");
}

#[test]
fn last_byte_read_returns_exactly_one_byte() {
    let body = pattern_bytes(4096);
    let server = FixtureServer::start(HashMap::from([("/a.bin".to_string(), body.clone())]));
    let provider = loaded_provider(&server.url_for("/a.bin"));

    assert_eq!(provider.seek(4095, Whence::Set), 0);
    let mut buf = vec![0u8; 16];
    let n = provider.read(&mut buf, 1, 16);
    assert_eq!(n, 1);
    assert_eq!(buf[0], body[4095]);
    assert!(provider.eof());
}

#[test]
fn seek_past_the_end_is_rejected() {
    let body = pattern_bytes(128);
    let server = FixtureServer::start(HashMap::from([("/a.bin".to_string(), body)]));
    let provider = loaded_provider(&server.url_for("/a.bin"));

    assert!(provider.seek(129, Whence::Set) < 0);
    assert_eq!(provider.seek(-1, Whence::End), 0);
    assert_eq!(provider.tell(), 127);
}

#[test]
fn missing_resource_fails_load_with_status() {
    let server = FixtureServer::start(HashMap::new());
    let provider = Arc::new(HttpDataProvider::new_default(server.url_for("/nope.bin")));

    let errored = Arc::new(AtomicBool::new(false));
    let errored_sink = errored.clone();
    let (tx, rx) = mpsc::channel();
    provider.load(
        Arc::new(move |domain, code| {
            assert_eq!(domain, "com.nativeformat.decoder.http");
            assert_eq!(code, 404);
            errored_sink.store(true, Ordering::SeqCst);
        }),
        Box::new(move |success| tx.send(success).unwrap()),
    );
    assert!(!rx.recv().unwrap());
    assert!(errored.load(Ordering::SeqCst));
}
