//! Length-prefixed `serde_json` framing over the daemon's Unix socket. The
//! teacher has no existing wire protocol to reuse (it only ever speaks
//! HTTP via axum); this is the simplest framing that satisfies "framed,
//! not line-oriented" — a u32 big-endian length header followed by the
//! JSON body.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::fts::FtsSearchOptions;
use crate::search::{HybridResult, QueryResult, SearchOptions};

const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Query {
        collection: String,
        query_text: String,
        options: SearchOptions,
    },
    QueryFts {
        query_text: String,
        options: FtsSearchOptions,
    },
    QueryHybrid {
        collection: String,
        query_text: String,
        options: SearchOptions,
    },
    Index {
        collection: String,
    },
    WatchStart,
    WatchStop,
    WatchStatus,
    Clean,
    CleanData,
    Status,
    ClearCache,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { result: ResponseBody },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Search { results: Vec<QueryResult>, cache_hit: bool, total_ms: u64 },
    Hybrid { results: Vec<HybridResult>, cache_hit: bool, total_ms: u64 },
    Index { count: usize },
    Watch { running: bool },
    Status(StatusReport),
    Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub last_accessed_unix: i64,
    pub access_count: u64,
    pub ttl_minutes: u64,
    pub hnsw_loaded: bool,
    pub fts_loaded: bool,
    pub memo_size: usize,
    pub watching: bool,
}

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, value: &impl Serialize) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value)?;
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await
}

/// Returns `Ok(None)` on a clean EOF before any bytes of a new frame
/// arrive — the normal way a client closes its connection.
pub async fn read_frame<T, R>(stream: &mut R) -> std::io::Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_round_trips() {
        let request = Request::WatchStatus;
        let mut buf = Vec::new();
        write_frame(&mut buf, &request).await.unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_frame(&mut cursor).await.unwrap().unwrap();
        assert!(matches!(decoded, Request::WatchStatus));
    }

    #[tokio::test]
    async fn read_frame_on_empty_stream_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let decoded: Option<Request> = read_frame(&mut cursor).await.unwrap();
        assert!(decoded.is_none());
    }
}
