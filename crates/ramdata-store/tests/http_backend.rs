// SPDX-License-Identifier: Apache-2.0

#![cfg(feature = "backend-s3")]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use ramdata_model::{ArrayData, DType};
use ramdata_store::backends::http::HttpReadonlyStore;
use ramdata_store::backends::local::LocalFsStore;
use ramdata_store::{
    ArrayMeta, BackingStore, ChunkedArray, DimSelection, RetryPolicy, Selection, StoreErrorCode,
};
use tempfile::tempdir;
use tiny_http::{Header, Method, Response, Server, StatusCode};

/// Serves files under `root`, honouring single `Range` headers.
fn spawn_file_server(root: PathBuf) -> (String, Arc<AtomicUsize>, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let base = format!("http://{}", server.server_addr());
    let gets = Arc::new(AtomicUsize::new(0));
    let gets_clone = Arc::clone(&gets);
    let handle = thread::spawn(move || loop {
        let req = match server.recv_timeout(std::time::Duration::from_millis(500)) {
            Ok(Some(req)) => req,
            Ok(None) | Err(_) => break,
        };
        let path = root.join(req.url().trim_start_matches('/'));
        let Ok(body) = std::fs::read(&path) else {
            let _ = req.respond(Response::empty(StatusCode(404)));
            continue;
        };
        if req.method() == &Method::Head {
            let _ = req.respond(Response::empty(StatusCode(200)));
            continue;
        }
        gets_clone.fetch_add(1, Ordering::Relaxed);
        let range = req
            .headers()
            .iter()
            .find(|h| h.field.equiv("Range"))
            .and_then(|h| h.value.as_str().strip_prefix("bytes=").map(ToString::to_string));
        match range.and_then(|r| {
            let (a, b) = r.split_once('-')?;
            Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?))
        }) {
            Some((start, end)) if start < body.len() => {
                let end = end.min(body.len() - 1);
                let _ = req.respond(
                    Response::from_data(body[start..=end].to_vec())
                        .with_status_code(StatusCode(206))
                        .with_header(
                            Header::from_bytes("Content-Range", format!("bytes {start}-{end}/{}", body.len()))
                                .expect("content-range header"),
                        ),
                );
            }
            Some(_) => {
                let _ = req.respond(Response::empty(StatusCode(416)));
            }
            None => {
                let _ = req.respond(Response::from_data(body));
            }
        }
    });
    (base, gets, handle)
}

#[test]
fn chunked_arrays_read_over_http_ranges() {
    let root = tempdir().expect("tempdir");
    let local: Arc<dyn BackingStore> = Arc::new(LocalFsStore::new(root.path().to_path_buf()));
    let meta = ArrayMeta::new(vec![6, 2], vec![3, 2], DType::Int32).with_compressor(None);
    let array = ChunkedArray::create(local, "remote/matrix", meta).expect("create");
    array
        .write(&Selection::all(), &ArrayData::Int((0..12).collect()))
        .expect("write");

    let (base, gets, handle) = spawn_file_server(root.path().to_path_buf());
    let http: Arc<dyn BackingStore> = Arc::new(
        HttpReadonlyStore::new(base)
            .with_private_hosts(true)
            .with_retry(RetryPolicy::no_retry()),
    );
    assert!(http.is_remote());
    assert!(ChunkedArray::exists(http.as_ref(), "remote/matrix").expect("exists"));

    let remote = ChunkedArray::open(Arc::clone(&http), "remote/matrix").expect("open");
    gets.store(0, Ordering::Relaxed);
    let out = remote
        .read(&Selection::rows(DimSelection::Indices(vec![4, 1])))
        .expect("read");
    assert_eq!(out.data, ArrayData::Int(vec![8, 9, 2, 3]));
    assert_eq!(gets.load(Ordering::Relaxed), 2);

    let err = http.put("remote/x", b"no").expect_err("read only");
    assert_eq!(err.code, StoreErrorCode::Unsupported);
    drop(http);
    drop(remote);
    handle.join().expect("server thread");
}

#[test]
fn private_hosts_are_refused_by_default() {
    let store = HttpReadonlyStore::new("http://127.0.0.1:9".to_string());
    let err = store.get("anything").expect_err("blocked");
    assert_eq!(err.code, StoreErrorCode::Validation);
}

#[test]
fn cached_only_mode_never_touches_the_network() {
    let cache = tempdir().expect("cache");
    std::fs::write(cache.path().join("a__b"), b"cached").expect("seed cache");
    let store = HttpReadonlyStore::new("http://127.0.0.1:9".to_string())
        .with_cache(cache.path().to_path_buf(), true);
    assert_eq!(store.get("a/b").expect("cached"), b"cached");
    let err = store.get("a/c").expect_err("not cached");
    assert_eq!(err.code, StoreErrorCode::CachedOnly);
}
