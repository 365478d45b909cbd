// SPDX-License-Identifier: Apache-2.0

use std::io::{BufRead, Write};
use std::sync::Arc;

use ramdata_core::canonical::{decode_bytes, encode_bytes};
use tracing::{debug, info, warn};

use super::protocol::{
    decode_frame, encode_frame, Handshake, Reply, Request, Response, WirePayload, PROTOCOL_VERSION,
};
use crate::array::ChunkedArray;
use crate::backends::{open_store, BackingStore};
use crate::error::{StoreError, StoreErrorCode};

/// Worker main loop: handshake, then one response per request until
/// `Shutdown` or end of input.
pub fn serve<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<(), StoreError> {
    let mut line = String::new();
    if read_line(&mut input, &mut line)? == 0 {
        return Ok(());
    }
    let opened = decode_frame::<Handshake>(&line).and_then(|hs| {
        if hs.protocol_version != PROTOCOL_VERSION {
            return Err(StoreError::new(
                StoreErrorCode::Unsupported,
                format!(
                    "protocol version {} requested, worker speaks {PROTOCOL_VERSION}",
                    hs.protocol_version
                ),
            ));
        }
        open_store(&hs.spec)
    });
    let store = match opened {
        Ok(store) => {
            write_response(&mut output, &Response::from_result(Ok(Reply::Unit)))?;
            store
        }
        Err(e) => {
            warn!(error = %e, "worker handshake failed");
            write_response(&mut output, &Response::from_result(Err(e)))?;
            return Ok(());
        }
    };
    info!(backend = store.kind().as_str(), "store worker ready");

    loop {
        line.clear();
        if read_line(&mut input, &mut line)? == 0 {
            debug!("parent closed the request stream");
            return Ok(());
        }
        let request = match decode_frame::<Request>(&line) {
            Ok(r) => r,
            Err(e) => {
                write_response(&mut output, &Response::from_result(Err(e)))?;
                continue;
            }
        };
        let op = request.name();
        if matches!(request, Request::Shutdown) {
            write_response(&mut output, &Response::from_result(Ok(Reply::Unit)))?;
            info!("store worker shutting down");
            return Ok(());
        }
        let result = dispatch(&store, request);
        if let Err(e) = &result {
            debug!(op, error = %e, "request failed");
        }
        write_response(&mut output, &Response::from_result(result))?;
    }
}

fn read_line<R: BufRead>(input: &mut R, line: &mut String) -> Result<usize, StoreError> {
    input
        .read_line(line)
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("worker stdin: {e}")))
}

fn write_response<W: Write>(output: &mut W, response: &Response) -> Result<(), StoreError> {
    let frame = encode_frame(response)?;
    output
        .write_all(frame.as_bytes())
        .and_then(|()| output.flush())
        .map_err(|e| StoreError::new(StoreErrorCode::Io, format!("worker stdout: {e}")))
}

/// Runs one request against `store`. Shared with the parent so that a
/// direct store and an isolated one execute identical code.
pub fn dispatch(store: &Arc<dyn BackingStore>, request: Request) -> Result<Reply, StoreError> {
    match request {
        Request::Exists { key } => store.exists(&key).map(Reply::Bool),
        Request::Mkdir { key } => store.mkdir(&key).map(|()| Reply::Unit),
        Request::Get { key } => store.get(&key).map(|b| Reply::Bytes(encode_bytes(&b))),
        Request::GetRange { key, start, end } => store
            .get_range(&key, start, end)
            .map(|b| Reply::Bytes(encode_bytes(&b))),
        Request::Put { key, b64 } => {
            let bytes = decode_bytes(&b64)
                .map_err(|e| StoreError::new(StoreErrorCode::Validation, e))?;
            store.put(&key, &bytes).map(|()| Reply::Unit)
        }
        Request::CreateExclusive { key } => store.create_exclusive(&key).map(Reply::Bool),
        Request::Remove { key } => store.remove(&key).map(|()| Reply::Unit),
        Request::Copy { src, dst } => store.copy(&src, &dst).map(|()| Reply::Unit),
        Request::Rename { src, dst } => store.rename(&src, &dst).map(|()| Reply::Unit),
        Request::List { key } => store.list(&key).map(Reply::Names),
        Request::ArrayCreate { path, meta } => {
            ChunkedArray::create(Arc::clone(store), &path, meta).map(|a| Reply::Meta(a.meta().clone()))
        }
        Request::ArrayRead {
            path,
            meta,
            selection,
        } => {
            let values = ChunkedArray::from_meta(Arc::clone(store), &path, meta).read(&selection)?;
            WirePayload::encode(&values.data, values.shape).map(Reply::Data)
        }
        Request::ArrayReadCoords { path, meta, coords } => {
            let data = ChunkedArray::from_meta(Arc::clone(store), &path, meta).read_coords(&coords)?;
            let n = data.len();
            WirePayload::encode(&data, vec![n]).map(Reply::Data)
        }
        Request::ArrayWrite {
            path,
            meta,
            selection,
            data,
        } => ChunkedArray::from_meta(Arc::clone(store), &path, meta)
            .write(&selection, &data.decode()?)
            .map(|()| Reply::Unit),
        Request::ArrayWriteCoords {
            path,
            meta,
            coords,
            data,
        } => ChunkedArray::from_meta(Arc::clone(store), &path, meta)
            .write_coords(&coords, &data.decode()?)
            .map(|()| Reply::Unit),
        Request::ArrayResize { path, meta, shape } => {
            let mut array = ChunkedArray::from_meta(Arc::clone(store), &path, meta);
            array.resize(shape)?;
            Ok(Reply::Meta(array.meta().clone()))
        }
        Request::Shutdown => Ok(Reply::Unit),
    }
}

#[cfg(test)]
mod tests {
    use super::serve;
    use crate::backends::StoreSpec;
    use crate::isolation::protocol::{
        decode_frame, encode_frame, Handshake, Reply, Request, Response, PROTOCOL_VERSION,
    };
    use tempfile::tempdir;

    #[test]
    fn serves_requests_over_in_memory_pipes() {
        let dir = tempdir().expect("tempdir");
        let mut input = String::new();
        input += &encode_frame(&Handshake {
            protocol_version: PROTOCOL_VERSION,
            spec: StoreSpec::Local {
                root: dir.path().to_path_buf(),
            },
        })
        .expect("handshake");
        input += &encode_frame(&Request::CreateExclusive { key: "a.lock".to_string() }).expect("req");
        input += &encode_frame(&Request::CreateExclusive { key: "a.lock".to_string() }).expect("req");
        input += &encode_frame(&Request::Get { key: "missing".to_string() }).expect("req");
        input += &encode_frame(&Request::Shutdown).expect("req");

        let mut output = Vec::new();
        serve(input.as_bytes(), &mut output).expect("serve");
        let text = String::from_utf8(output).expect("utf8");
        let responses: Vec<Response> = text
            .lines()
            .map(|l| decode_frame(l).expect("frame"))
            .collect();
        assert_eq!(responses.len(), 5);
        assert_eq!(responses[1].clone().into_result().expect("ok"), Reply::Bool(true));
        assert_eq!(responses[2].clone().into_result().expect("ok"), Reply::Bool(false));
        let missing = responses[3].clone().into_result().expect_err("missing");
        assert!(missing.is_not_found());
    }

    #[test]
    fn version_mismatch_is_reported_and_the_worker_exits() {
        let dir = tempdir().expect("tempdir");
        let input = encode_frame(&Handshake {
            protocol_version: PROTOCOL_VERSION + 1,
            spec: StoreSpec::Local {
                root: dir.path().to_path_buf(),
            },
        })
        .expect("handshake");
        let mut output = Vec::new();
        serve(input.as_bytes(), &mut output).expect("serve");
        let resp: Response = decode_frame(std::str::from_utf8(&output).expect("utf8")).expect("frame");
        assert!(resp.into_result().is_err());
    }
}
