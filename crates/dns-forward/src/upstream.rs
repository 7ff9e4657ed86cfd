use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// How long to wait for the upstream resolver before giving up and
/// answering the client with a server failure.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

/// Send the client's request octets, unchanged, to the upstream
/// resolver and return the raw response datagram.
///
/// The request is not reserialised, so the transaction id, flags, and
/// question round-trip identically; and because the response octets
/// are returned raw, whatever compression, extensions, or unknown
/// record types the upstream used survive even when the codec cannot
/// fully parse them.
///
/// A fresh socket is opened per call.  `None` on timeout or on any
/// socket error.
pub async fn query_upstream(address: SocketAddr, request: &[u8]) -> Option<Vec<u8>> {
    match timeout(UPSTREAM_TIMEOUT, query_upstream_notimeout(address, request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::debug!(%address, "upstream timed out");
            None
        }
    }
}

/// Timeout-less version of `query_upstream`.
async fn query_upstream_notimeout(address: SocketAddr, request: &[u8]) -> Option<Vec<u8>> {
    let sock = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    sock.connect(address).await.ok()?;
    sock.send(request).await.ok()?;

    let mut buf = vec![0u8; 1024];
    let size = sock.recv(&mut buf).await.ok()?;
    buf.truncate(size);
    Some(buf)
}
