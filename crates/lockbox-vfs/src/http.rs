// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lockbox::backend::Entry;
use lockbox::{Error, FileServer, Result, Volume};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use relative_path::RelativePath;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "./http_test.rs"]
mod http_test;

/// Serves volumes read-only over http/1.1, as a class 1 WebDAV share.
///
/// Files answer `GET` and `HEAD` with their contents, and directories
/// answer with a plain text listing of one entry per line, where
/// subdirectories carry a trailing slash. `PROPFIND` describes an entry
/// and, unless asked for depth 0, the children of a directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpServer;

impl FileServer for HttpServer {
    fn serve(
        &self,
        volume: Arc<dyn Volume>,
        bind: SocketAddr,
        name: &str,
        stop: CancellationToken,
        on_ready: &mut dyn FnMut(SocketAddr),
    ) -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::Server(format!("Failed to establish runtime: {err}")))?;
        let prefix: Arc<str> = Arc::from(format!("/{name}/"));
        let result = rt.block_on(async move {
            let listener = TcpListener::bind(bind)
                .await
                .map_err(|err| Error::ServerBind(bind, err))?;
            let local = listener
                .local_addr()
                .map_err(|err| Error::ServerBind(bind, err))?;
            on_ready(local);
            tracing::info!(%local, %prefix, "serving volume");

            loop {
                let (stream, peer) = tokio::select! {
                    _ = stop.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(?err, "failed to accept connection");
                            continue;
                        }
                    },
                };
                tracing::trace!(%peer, "accepted connection");
                let volume = Arc::clone(&volume);
                let prefix = Arc::clone(&prefix);
                let stop = stop.clone();
                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let response = respond(volume.as_ref(), &prefix, &req);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);
                    let res = tokio::select! {
                        res = conn.as_mut() => res,
                        _ = stop.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(err) = res {
                        tracing::debug!(%peer, ?err, "connection ended with an error");
                    }
                });
            }
            tracing::info!(%local, "stopped serving volume");
            Ok(())
        });
        // dropping the runtime cancels any connection still in flight
        drop(rt);
        result
    }
}

const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD, PROPFIND";

/// Characters that cannot appear verbatim in an href path.
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Get,
    Head,
    Options,
    PropFind,
}

fn respond(volume: &dyn Volume, prefix: &str, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    let verb = match req.method().as_str() {
        "GET" => Verb::Get,
        "HEAD" => Verb::Head,
        "OPTIONS" => Verb::Options,
        "PROPFIND" => Verb::PropFind,
        _ => {
            let mut response = status(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            return response;
        }
    };
    if verb == Verb::Options {
        let mut response = status(StatusCode::OK);
        let headers = response.headers_mut();
        headers.insert("dav", HeaderValue::from_static("1"));
        headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        return response;
    }

    let path = req.uri().path();
    if path == prefix.trim_end_matches('/') {
        let mut response = status(StatusCode::MOVED_PERMANENTLY);
        if let Ok(location) = HeaderValue::from_str(prefix) {
            response.headers_mut().insert(LOCATION, location);
        }
        return response;
    }
    let Some(rest) = path.strip_prefix(prefix) else {
        return status(StatusCode::NOT_FOUND);
    };
    let Some(rest) = percent_decode(rest) else {
        return status(StatusCode::BAD_REQUEST);
    };
    let rel = RelativePath::new(rest.trim_end_matches('/'));

    let result = match verb {
        Verb::PropFind => {
            let depth = req.headers().get("depth").and_then(|v| v.to_str().ok());
            multistatus(volume, prefix, rel, depth != Some("0"))
                .map(|xml| (StatusCode::MULTI_STATUS, "application/xml; charset=utf-8", xml))
        }
        _ => contents(volume, rel).map(|(content_type, data)| (StatusCode::OK, content_type, data)),
    };
    let (code, content_type, data) = match result {
        Ok(found) => found,
        Err(err) => {
            tracing::debug!(?rel, ?err, "request failed");
            return status(match err.kind() {
                io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
    };

    let length = data.len();
    let body = if verb == Verb::Head {
        Bytes::new()
    } else {
        Bytes::from(data)
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = code;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    response
}

/// A file's bytes, or a directory's listing with one entry per line.
fn contents(volume: &dyn Volume, rel: &RelativePath) -> io::Result<(&'static str, Vec<u8>)> {
    let entry = volume.stat(rel)?;
    if !entry.is_dir() {
        return Ok(("application/octet-stream", volume.read(rel)?));
    }
    let mut listing = String::new();
    for child in volume.read_dir(rel)? {
        listing.push_str(&child.name);
        if child.is_dir() {
            listing.push('/');
        }
        listing.push('\n');
    }
    Ok(("text/plain; charset=utf-8", listing.into_bytes()))
}

/// The properties of `rel`, and of its children when `children` is set
/// and `rel` is a directory.
fn multistatus(
    volume: &dyn Volume,
    prefix: &str,
    rel: &RelativePath,
    children: bool,
) -> io::Result<Vec<u8>> {
    let entry = volume.stat(rel)?;
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
    );
    let display_name = match rel.file_name() {
        Some(name) => name,
        None => prefix.trim_matches('/'),
    };
    push_response(&mut xml, prefix, rel, display_name, &entry);
    if children && entry.is_dir() {
        for child in volume.read_dir(rel)? {
            push_response(&mut xml, prefix, &rel.join(&child.name), &child.name, &child);
        }
    }
    xml.push_str("</D:multistatus>\n");
    Ok(xml.into_bytes())
}

fn push_response(xml: &mut String, prefix: &str, rel: &RelativePath, name: &str, entry: &Entry) {
    let mut href = format!("{prefix}{}", utf8_percent_encode(rel.as_str(), HREF));
    let properties = if entry.is_dir() {
        if !href.ends_with('/') {
            href.push('/');
        }
        "<D:resourcetype><D:collection/></D:resourcetype>".to_string()
    } else {
        format!(
            "<D:resourcetype/><D:getcontentlength>{}</D:getcontentlength>",
            entry.size
        )
    };
    xml.push_str(&format!(
        "<D:response><D:href>{href}</D:href><D:propstat><D:prop>\
         <D:displayname>{}</D:displayname>{properties}</D:prop>\
         <D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>\n",
        escape_xml(name)
    ));
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = code;
    response
}

/// Decode `%XX` escapes, failing on malformed escapes or invalid utf-8.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let well_formed = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        });
    if !well_formed {
        return None;
    }
    percent_decode_str(input)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
