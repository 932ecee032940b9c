//! The UDP tracker protocol (BEP 15): a connect/announce handshake over a
//! plain datagram socket.

use std::convert::TryInto;
use std::net::SocketAddrV4;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use url::Url;

use super::{parse_compact_peers, TrackerResponse};
use crate::conf::Conf;
use crate::error::{Error, Result};
use crate::metainfo::Metainfo;
use crate::PeerId;

/// The magic constant BEP 15 prescribes for the initial connect request.
const PROTOCOL_ID: u64 = 0x41727101980;

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;

pub async fn announce(
    url: &Url,
    metainfo: &Metainfo,
    peer_id: PeerId,
    conf: &Conf,
) -> Result<TrackerResponse> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::UnsupportedAnnounceScheme(url.to_string()))?;
    let port = url
        .port()
        .ok_or_else(|| Error::UnsupportedAnnounceScheme(url.to_string()))?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((host, port)).await?;

    let connection_id = connect(&socket, conf.torrent.read_timeout).await?;
    announce_step(
        &socket,
        connection_id,
        metainfo,
        peer_id,
        conf.torrent.read_timeout,
    )
    .await
}

async fn connect(socket: &UdpSocket, read_timeout: Duration) -> Result<u64> {
    let transaction_id: u32 = rand::thread_rng().gen();

    let mut request = [0u8; 16];
    request[0..8].copy_from_slice(&PROTOCOL_ID.to_be_bytes());
    request[8..12].copy_from_slice(&ACTION_CONNECT.to_be_bytes());
    request[12..16].copy_from_slice(&transaction_id.to_be_bytes());

    timeout(read_timeout, socket.send(&request))
        .await
        .map_err(|_| Error::TrackerTimeout)??;

    let mut response = [0u8; 16];
    let len = timeout(read_timeout, socket.recv(&mut response))
        .await
        .map_err(|_| Error::TrackerTimeout)??;
    if len < 16 {
        return Err(Error::TrackerUdpProtocol("connect response too short"));
    }

    let action = u32::from_be_bytes(response[0..4].try_into().unwrap());
    let resp_transaction_id = u32::from_be_bytes(response[4..8].try_into().unwrap());
    if action != ACTION_CONNECT || resp_transaction_id != transaction_id {
        return Err(Error::TrackerUdpProtocol(
            "connect response action/transaction_id mismatch",
        ));
    }

    Ok(u64::from_be_bytes(response[8..16].try_into().unwrap()))
}

async fn announce_step(
    socket: &UdpSocket,
    connection_id: u64,
    metainfo: &Metainfo,
    peer_id: PeerId,
    read_timeout: Duration,
) -> Result<TrackerResponse> {
    let transaction_id: u32 = rand::thread_rng().gen();
    let info_hash = metainfo.info_hash();
    let key: u32 = rand::thread_rng().gen();

    let mut request = [0u8; 98];
    request[0..8].copy_from_slice(&connection_id.to_be_bytes());
    request[8..12].copy_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    request[12..16].copy_from_slice(&transaction_id.to_be_bytes());
    request[16..36].copy_from_slice(&info_hash);
    request[36..56].copy_from_slice(&peer_id);
    request[56..64].copy_from_slice(&0u64.to_be_bytes()); // downloaded
    request[64..72].copy_from_slice(&metainfo.info.length.to_be_bytes()); // left
    request[72..80].copy_from_slice(&0u64.to_be_bytes()); // uploaded
    request[80..84].copy_from_slice(&0u32.to_be_bytes()); // event
    request[84..88].copy_from_slice(&0u32.to_be_bytes()); // ip
    request[88..92].copy_from_slice(&key.to_be_bytes());
    request[92..96].copy_from_slice(&(-1i32).to_be_bytes()); // num_want
    request[96..98].copy_from_slice(&6881u16.to_be_bytes()); // port

    timeout(read_timeout, socket.send(&request))
        .await
        .map_err(|_| Error::TrackerTimeout)??;

    let mut response = [0u8; 1024];
    let len = timeout(read_timeout, socket.recv(&mut response))
        .await
        .map_err(|_| Error::TrackerTimeout)??;
    if len < 20 {
        return Err(Error::TrackerUdpProtocol("announce response too short"));
    }

    let action = u32::from_be_bytes(response[0..4].try_into().unwrap());
    let resp_transaction_id = u32::from_be_bytes(response[4..8].try_into().unwrap());
    if action != ACTION_ANNOUNCE || resp_transaction_id != transaction_id {
        return Err(Error::TrackerUdpProtocol(
            "announce response action/transaction_id mismatch",
        ));
    }

    let interval = u32::from_be_bytes(response[8..12].try_into().unwrap());
    let peers: Vec<SocketAddrV4> = parse_compact_peers(&response[20..len]);

    Ok(TrackerResponse {
        interval: Duration::from_secs(interval as u64),
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metainfo() -> Metainfo {
        let pieces: Vec<u8> = std::iter::repeat(b'a').take(20).collect();
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi10e4:name1:a12:piece lengthi10e6:pieces20:");
        info.extend_from_slice(&pieces);
        info.push(b'e');
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce4:udp4:info");
        out.extend_from_slice(&info);
        out.push(b'e');
        Metainfo::from_bytes(&out).unwrap()
    }

    #[tokio::test]
    async fn full_connect_and_announce_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (len, peer_addr) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 16);
            let transaction_id = &buf[12..16];

            let mut connect_resp = [0u8; 16];
            connect_resp[0..4].copy_from_slice(&0u32.to_be_bytes());
            connect_resp[4..8].copy_from_slice(transaction_id);
            connect_resp[8..16].copy_from_slice(&42u64.to_be_bytes());
            server.send_to(&connect_resp, peer_addr).await.unwrap();

            let (len, peer_addr) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 98);
            let connection_id = u64::from_be_bytes(buf[0..8].try_into().unwrap());
            assert_eq!(connection_id, 42);
            let transaction_id = buf[12..16].to_vec();

            let mut announce_resp = [0u8; 26];
            announce_resp[0..4].copy_from_slice(&1u32.to_be_bytes());
            announce_resp[4..8].copy_from_slice(&transaction_id);
            announce_resp[8..12].copy_from_slice(&1800u32.to_be_bytes());
            announce_resp[12..16].copy_from_slice(&0u32.to_be_bytes()); // leechers
            announce_resp[16..20].copy_from_slice(&1u32.to_be_bytes()); // seeders
            announce_resp[20..26].copy_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
            server.send_to(&announce_resp, peer_addr).await.unwrap();
        });

        let url = Url::parse(&format!("udp://{}", server_addr)).unwrap();
        let metainfo = sample_metainfo();
        let conf = Conf::new();
        let response = announce(&url, &metainfo, *crate::conf::CLIENT_ID, &conf)
            .await
            .unwrap();

        assert_eq!(response.interval, Duration::from_secs(1800));
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);

        server_task.await.unwrap();
    }
}
