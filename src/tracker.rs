//! HTTP interaction with a BitTorrent tracker: building the announce
//! request and decoding the compact peer list from its bencoded response.

use crate::{
    error::{Error, Result},
    PeerId, Sha1Hash,
};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use std::net::{Ipv4Addr, SocketAddrV4};
use url::Url;

/// The parameters of a single announce request, per the crate's scope: we
/// are a pure leecher, so `uploaded` is always `"0"` and we never announce
/// `started`/`stopped`/`completed` events.
#[derive(Clone, Debug)]
pub struct AnnounceRequest {
    pub info_hash: Sha1Hash,
    pub peer_id: PeerId,
    /// The number of bytes still left to download.
    pub left: u64,
}

/// The peer set and refresh interval returned by a tracker.
#[derive(Clone, Debug)]
pub struct AnnounceResponse {
    /// The number of seconds the tracker suggests we wait before the next
    /// announce. This crate makes a single announce and never re-announces,
    /// but the value is surfaced for callers that want to.
    pub interval: Option<i64>,
    /// The peers willing to share this torrent.
    pub peers: Vec<SocketAddrV4>,
}

/// Performs a single announce to `announce_url` and returns the peer set.
///
/// # Errors
///
/// Returns [`Error::TrackerUnreachable`] if the request fails, the response
/// status isn't 200, or the response is a bencoded `failure reason`.
pub async fn announce(
    announce_url: &str,
    req: &AnnounceRequest,
) -> Result<AnnounceResponse> {
    let url = build_announce_url(announce_url, req)?;
    log::info!("Announcing to tracker {}", announce_url);

    let resp = reqwest::get(url.as_str())
        .await
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(Error::TrackerUnreachable(format!(
            "tracker responded with status {}",
            resp.status()
        )));
    }
    let body = resp
        .bytes()
        .await
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;

    let raw: RawResponse = serde_bencode::from_bytes(&body)?;
    if let Some(reason) = raw.failure_reason {
        return Err(Error::TrackerUnreachable(reason));
    }
    let peers_bytes = raw.peers.unwrap_or_default();
    let peers = decode_compact_peers(&peers_bytes)?;
    log::info!("Tracker returned {} peers", peers.len());

    Ok(AnnounceResponse {
        interval: raw.interval,
        peers,
    })
}

/// Builds the announce URL with the query parameters specified in §6 of the
/// specification. `info_hash` and `peer_id` are raw 20 byte strings, so they
/// are percent-encoded by hand rather than handed to a generic form
/// serializer, which would otherwise try (and fail) to interpret them as
/// UTF-8.
fn build_announce_url(announce_url: &str, req: &AnnounceRequest) -> Result<Url> {
    let mut url = Url::parse(announce_url)
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;
    let port = infer_port(&url);

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&compact=1&left={}",
        percent_encode(&req.info_hash, NON_ALPHANUMERIC),
        percent_encode(&req.peer_id, NON_ALPHANUMERIC),
        port,
        req.left,
    );
    // append rather than overwrite: some trackers (e.g. private ones) encode
    // a passkey or other identifying parameter in the announce URL's query
    let full_query = match url.query() {
        Some(existing) => format!("{}&{}", existing, query),
        None => query,
    };
    url.set_query(Some(&full_query));
    Ok(url)
}

/// Infers the port to announce from the announce URL's scheme, per the
/// specification: 80 for `http`, 443 for `https`, 80 otherwise.
fn infer_port(url: &Url) -> u16 {
    match url.scheme() {
        "https" => 443,
        "http" => 80,
        _ => 80,
    }
}

/// Splits a tracker's compact peer string into `(ipv4, port)` pairs.
///
/// # Errors
///
/// Returns [`Error::TrackerUnreachable`] if the byte string's length isn't a
/// multiple of 6.
fn decode_compact_peers(bytes: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if bytes.len() % 6 != 0 {
        return Err(Error::TrackerUnreachable(
            "compact peers string length is not a multiple of 6".into(),
        ));
    }
    Ok(bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddrV4::new(ip, port)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    interval: Option<i64>,
    #[serde(with = "serde_bytes", default)]
    peers: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Builds a minimal bencoded tracker response with one compact peer
    /// (127.0.0.1:6881) and a 900 second interval.
    fn bencoded_response() -> Vec<u8> {
        let mut peers = Vec::new();
        peers.extend_from_slice(&[127, 0, 0, 1]);
        peers.extend_from_slice(&6881u16.to_be_bytes());
        format!(
            "d8:intervali900e5:peers{}:{}e",
            peers.len(),
            String::from_utf8_lossy(&peers)
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn announce_round_trips_through_http() {
        let _mock = mockito::mock("GET", mockito::Matcher::Regex("^/announce.*".into()))
            .with_status(200)
            .with_body(bencoded_response())
            .create();

        let req = AnnounceRequest {
            info_hash: [0x01; 20],
            peer_id: [0x02; 20],
            left: 0,
        };
        let url = format!("{}/announce", mockito::server_url());
        let resp = announce(&url, &req).await.unwrap();

        assert_eq!(resp.interval, Some(900));
        assert_eq!(
            resp.peers,
            vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]
        );
    }

    #[tokio::test]
    async fn announce_surfaces_tracker_failure_reason() {
        let _mock = mockito::mock("GET", mockito::Matcher::Regex("^/announce.*".into()))
            .with_status(200)
            .with_body("d14:failure reason17:torrent not founde")
            .create();

        let req = AnnounceRequest {
            info_hash: [0x01; 20],
            peer_id: [0x02; 20],
            left: 0,
        };
        let url = format!("{}/announce", mockito::server_url());
        let err = announce(&url, &req).await.unwrap_err();
        assert!(matches!(err, Error::TrackerUnreachable(_)));
    }

    #[test]
    fn infers_port_from_scheme() {
        assert_eq!(infer_port(&Url::parse("http://t.example/a").unwrap()), 80);
        assert_eq!(infer_port(&Url::parse("https://t.example/a").unwrap()), 443);
        assert_eq!(infer_port(&Url::parse("udp://t.example/a").unwrap()), 80);
    }

    #[test]
    fn decodes_compact_peers() {
        let bytes = [127, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2];
        let peers = decode_compact_peers(&bytes).unwrap();
        assert_eq!(
            peers,
            vec![
                SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 0x1ae1),
                SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 0x1ae2),
            ]
        );
    }

    #[test]
    fn rejects_misaligned_compact_peers() {
        let bytes = [127, 0, 0, 1, 0x1a];
        assert!(decode_compact_peers(&bytes).is_err());
    }

    #[test]
    fn builds_query_with_percent_encoded_raw_fields() {
        let req = AnnounceRequest {
            info_hash: [0x01; 20],
            peer_id: [0x02; 20],
            left: 12345,
        };
        let url = build_announce_url("http://tracker.example/announce", &req).unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("left=12345"));
        assert!(query.contains("compact=1"));
        assert!(query.contains("info_hash=%01%01"));
    }
}
