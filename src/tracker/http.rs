//! The HTTP tracker protocol: a single bencoded-dictionary GET request and
//! response.

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use url::Url;

use super::{parse_compact_peers, TrackerResponse};
use crate::bencode::{self, Value};
use crate::conf::Conf;
use crate::error::{Error, Result};
use crate::metainfo::Metainfo;
use crate::PeerId;

/// Issues the announce GET request and parses the bencoded response.
///
/// `info_hash` and `peer_id` are raw 20-byte strings, not valid UTF-8 in
/// general, so they can't go through `reqwest::Url::query_pairs_mut` (which
/// assumes textual query values and would mangle arbitrary bytes) — the
/// query string is built by hand instead, percent-encoding the raw bytes
/// directly.
pub async fn announce(
    url: &Url,
    metainfo: &Metainfo,
    peer_id: PeerId,
    conf: &Conf,
) -> Result<TrackerResponse> {
    let info_hash = metainfo.info_hash();
    let query = format!(
        "info_hash={}&peer_id={}&port=6881&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode(&info_hash, NON_ALPHANUMERIC),
        percent_encode(&peer_id, NON_ALPHANUMERIC),
        metainfo.info.length,
    );
    let mut url = url.clone();
    url.set_query(Some(&query));

    let client = reqwest::Client::new();
    let response = tokio::time::timeout(conf.torrent.read_timeout, client.get(url).send())
        .await
        .map_err(|_| Error::TrackerTimeout)??;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::TrackerHttpStatus(status.as_u16()));
    }

    let body = response.bytes().await?;
    let value = bencode::decode(&body)?;

    if let Some(reason) = value.get("failure reason").and_then(Value::as_bytes) {
        return Err(Error::TrackerFailure(
            String::from_utf8_lossy(reason).into_owned(),
        ));
    }

    let interval = value
        .get("interval")
        .and_then(Value::as_int)
        .ok_or(Error::TrackerFailure("missing interval".into()))?;
    let peers_bytes = value
        .get("peers")
        .and_then(Value::as_bytes)
        .ok_or(Error::TrackerFailure("missing peers".into()))?;

    Ok(TrackerResponse {
        interval: std::time::Duration::from_secs(interval.max(0) as u64),
        peers: parse_compact_peers(peers_bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn sample_metainfo() -> Metainfo {
        let pieces: Vec<u8> = std::iter::repeat(b'a').take(20).collect();
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi10e4:name1:a12:piece lengthi10e6:pieces20:");
        info.extend_from_slice(&pieces);
        info.push(b'e');
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce4:http4:info");
        out.extend_from_slice(&info);
        out.push(b'e');
        Metainfo::from_bytes(&out).unwrap()
    }

    #[tokio::test]
    async fn parses_successful_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = b"d8:intervali1800e5:peers12:\
                \x7f\x00\x00\x01\x1a\xe1\x0a\x00\x00\x01\x1a\xe2e";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let url = Url::parse(&format!("http://{}/announce", addr)).unwrap();
        let metainfo = sample_metainfo();
        let conf = Conf::new();
        let response = announce(&url, &metainfo, *crate::conf::CLIENT_ID, &conf)
            .await
            .unwrap();

        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.interval, std::time::Duration::from_secs(1800));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn surfaces_failure_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = b"d14:failure reason11:no such keye";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });

        let url = Url::parse(&format!("http://{}/announce", addr)).unwrap();
        let metainfo = sample_metainfo();
        let conf = Conf::new();
        match announce(&url, &metainfo, *crate::conf::CLIENT_ID, &conf).await {
            Err(Error::TrackerFailure(reason)) => assert_eq!(reason, "no such key"),
            other => panic!("expected TrackerFailure, got {:?}", other.map(|_| ())),
        }

        server.await.unwrap();
    }
}
