// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use lockbox::fixtures::*;
use lockbox::{Error, FileServer, Result};
use rstest::rstest;
use tokio_util::sync::CancellationToken;

use super::{percent_decode, HttpServer};
use crate::DirectoryVolume;

struct Running {
    endpoint: SocketAddr,
    stop: CancellationToken,
    thread: JoinHandle<Result<()>>,
}

impl Running {
    fn shutdown(self) -> Result<()> {
        self.stop.cancel();
        self.thread.join().expect("server thread panicked")
    }
}

fn serve(root: &std::path::Path) -> Running {
    let volume = Arc::new(DirectoryVolume::new(root));
    let stop = CancellationToken::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let thread = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let bind = "127.0.0.1:0".parse().unwrap();
            HttpServer.serve(volume, bind, "vault", stop, &mut |endpoint| {
                tx.send(endpoint).unwrap()
            })
        })
    };
    let endpoint = rx.recv().expect("server should report that it is ready");
    Running {
        endpoint,
        stop,
        thread,
    }
}

fn request(endpoint: SocketAddr, method: &str, path: &str) -> String {
    request_with(endpoint, method, path, &[])
}

fn request_with(endpoint: SocketAddr, method: &str, path: &str, headers: &[&str]) -> String {
    let mut stream = TcpStream::connect(endpoint).unwrap();
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    for header in headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or_default()
}

#[rstest]
fn test_serves_files_and_listings(tmpdir: tempfile::TempDir) {
    init_logging();
    std::fs::create_dir(tmpdir.path().join("sub dir")).unwrap();
    std::fs::write(tmpdir.path().join("hello.txt"), "hello world").unwrap();
    let server = serve(tmpdir.path());

    let response = request(server.endpoint, "GET", "/vault/hello.txt");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert_eq!(body(&response), "hello world");

    let response = request(server.endpoint, "GET", "/vault/");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert_eq!(body(&response), "hello.txt\nsub dir/\n");

    let response = request(server.endpoint, "GET", "/vault/sub%20dir/");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert_eq!(body(&response), "");

    let response = request(server.endpoint, "HEAD", "/vault/hello.txt");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert_eq!(body(&response), "");

    server.shutdown().expect("server should stop cleanly");
}

#[rstest]
fn test_error_statuses(tmpdir: tempfile::TempDir) {
    let server = serve(tmpdir.path());

    let response = request(server.endpoint, "GET", "/vault/missing.txt");
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    let response = request(server.endpoint, "GET", "/other/");
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    let response = request(server.endpoint, "GET", "/vault");
    assert!(response.starts_with("HTTP/1.1 301"), "{response}");

    let response = request(server.endpoint, "DELETE", "/vault/");
    assert!(response.starts_with("HTTP/1.1 405"), "{response}");
    assert!(
        response.contains("allow: OPTIONS, GET, HEAD, PROPFIND"),
        "{response}"
    );

    let response = request(server.endpoint, "PUT", "/vault/new.txt");
    assert!(response.starts_with("HTTP/1.1 405"), "{response}");

    let response = request(server.endpoint, "GET", "/vault/%zz");
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    let response = request(server.endpoint, "GET", "/vault/%+41");
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    server.shutdown().unwrap();
}

#[rstest]
fn test_bind_failure_never_ready(tmpdir: tempfile::TempDir) {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let bind = taken.local_addr().unwrap();
    let volume = Arc::new(DirectoryVolume::new(tmpdir.path()));
    let mut ready = false;
    let err = HttpServer
        .serve(volume, bind, "vault", CancellationToken::new(), &mut |_| {
            ready = true
        })
        .expect_err("port is taken");
    assert!(matches!(err, Error::ServerBind(..)));
    assert!(!ready);
}

#[rstest]
#[case("plain", Some("plain"))]
#[case("a%20b", Some("a b"))]
#[case("caf%C3%A9", Some("café"))]
#[case("%zz", None)]
#[case("%2", None)]
#[case("%+41", None)]
#[case("%-1", None)]
#[case("%ff", None)]
fn test_percent_decode(#[case] input: &str, #[case] expected: Option<&str>) {
    assert_eq!(percent_decode(input).as_deref(), expected);
}

#[rstest]
fn test_options_advertises_webdav(tmpdir: tempfile::TempDir) {
    let server = serve(tmpdir.path());

    let response = request(server.endpoint, "OPTIONS", "/vault/");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("dav: 1\r\n"), "{response}");
    assert!(response.contains("PROPFIND"), "{response}");

    server.shutdown().unwrap();
}

#[rstest]
fn test_propfind(tmpdir: tempfile::TempDir) {
    init_logging();
    std::fs::create_dir(tmpdir.path().join("sub dir")).unwrap();
    std::fs::write(tmpdir.path().join("a&b.txt"), "12345").unwrap();
    let server = serve(tmpdir.path());

    let response = request_with(server.endpoint, "PROPFIND", "/vault/", &["Depth: 1"]);
    assert!(response.starts_with("HTTP/1.1 207 Multi-Status"), "{response}");
    assert!(response.contains("content-type: application/xml"), "{response}");
    let xml = body(&response);
    assert_eq!(xml.matches("<D:response>").count(), 3, "{xml}");
    assert!(xml.contains("<D:href>/vault/</D:href>"), "{xml}");
    assert!(xml.contains("<D:displayname>vault</D:displayname>"), "{xml}");
    assert!(xml.contains("<D:href>/vault/sub%20dir/</D:href>"), "{xml}");
    assert!(xml.contains("<D:href>/vault/a%26b.txt</D:href>"), "{xml}");
    assert!(xml.contains("<D:displayname>a&amp;b.txt</D:displayname>"), "{xml}");
    assert!(
        xml.contains("<D:getcontentlength>5</D:getcontentlength>"),
        "{xml}"
    );

    let response = request_with(server.endpoint, "PROPFIND", "/vault/", &["Depth: 0"]);
    assert!(response.starts_with("HTTP/1.1 207"), "{response}");
    assert_eq!(body(&response).matches("<D:response>").count(), 1);

    let response = request(server.endpoint, "PROPFIND", "/vault/sub%20dir");
    assert!(response.starts_with("HTTP/1.1 207"), "{response}");
    let xml = body(&response);
    assert_eq!(xml.matches("<D:response>").count(), 1, "{xml}");
    assert!(xml.contains("<D:collection/>"), "{xml}");

    let response = request(server.endpoint, "PROPFIND", "/vault/missing");
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    server.shutdown().unwrap();
}
