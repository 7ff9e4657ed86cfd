use bytes::BytesMut;
use clap::Parser;
use std::collections::HashSet;
use std::env;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::Arc;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing_subscriber::EnvFilter;

use dns_forward::cache::SharedCache;
use dns_forward::{resolve, Resolution};
use dns_wire::protocol::types::Message;

const DNS_PORT: u16 = 53;

const SEMAPHORE_CLOSED_MESSAGE: &str =
    "[INTERNAL ERROR] worker semaphore closed, cannot recover from this - aborting";

/// Decode a datagram, answer it, and say where the answer came from.
/// Malformed datagrams are dropped without a reply (best-effort UDP).
async fn handle_raw_query(args: ListenArgs, buf: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
    let query = match Message::from_octets(buf) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(?peer, id = ?error.id(), ?error, "dropping malformed query");
            return None;
        }
    };

    match resolve(args.forward_address, &args.cache, buf, &query).await {
        Resolution::Answer { octets, source } => {
            tracing::info!(
                client = %peer.ip(),
                qtype = %query.question.qtype,
                qname = %query.question.qname.to_dotted_string(),
                %source,
                "served"
            );
            Some(octets)
        }
        Resolution::Failed { octets } => {
            tracing::warn!(
                client = %peer.ip(),
                qname = %query.question.qname.to_dotted_string(),
                "upstream unreachable, answering server failure"
            );
            Some(octets)
        }
    }
}

/// Arguments for `listen_udp_task` and the resolver.
#[derive(Debug, Clone)]
struct ListenArgs {
    forward_address: SocketAddr,
    workers: usize,
    cache: SharedCache,
}

async fn listen_udp_task(args: ListenArgs, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let (tx, mut rx) = mpsc::channel::<(Vec<u8>, SocketAddr)>(32);
    let workers = Arc::new(Semaphore::new(args.workers));
    let mut buf = vec![0u8; 1024];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            Ok((size, peer)) = socket.recv_from(&mut buf) => {
                // taking the permit here, not in the worker, makes the
                // pool a ceiling on concurrency: excess traffic queues
                // in the listener and overflows at the OS socket buffer
                let permit = Arc::clone(&workers)
                    .acquire_owned()
                    .await
                    .expect(SEMAPHORE_CLOSED_MESSAGE);
                let bytes = BytesMut::from(&buf[..size]);
                let reply = tx.clone();
                let args = args.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Some(response) = handle_raw_query(args, bytes.as_ref(), peer).await {
                        if let Err(error) = reply.send((response, peer)).await {
                            tracing::debug!(?peer, ?error, "reply channel closed");
                        }
                    }
                });
            }

            Some((response, peer)) = rx.recv() => {
                if let Err(error) = socket.send_to(&response, peer).await {
                    tracing::debug!(?peer, ?error, "UDP send error");
                }
            }
        }
    }

    // stop accepting, then drain the responses of in-flight workers
    drop(tx);
    while let Some((response, peer)) = rx.recv().await {
        if let Err(error) = socket.send_to(&response, peer).await {
            tracing::debug!(?peer, ?error, "UDP send error");
        }
    }
}

/// Parse `host` or `host:port` and resolve the name, once, at startup.
async fn resolve_forwarder(forwarder: &str) -> Result<SocketAddr, io::Error> {
    let target = if forwarder.contains(':') {
        forwarder.to_string()
    } else {
        format!("{forwarder}:{DNS_PORT}")
    };

    lookup_host(target).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "forwarder resolved to no addresses",
        )
    })
}

fn begin_logging() {
    let log_format = if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        let mut set = HashSet::new();
        for s in var.split(',') {
            set.insert(s.to_string());
        }
        set
    } else {
        HashSet::new()
    };

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!log_format.contains("no-ansi"));

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            logger.json().without_time().init();
        } else {
            logger.json().init();
        }
    } else if log_format.contains("pretty") {
        if log_format.contains("no-time") {
            logger.pretty().without_time().init();
        } else {
            logger.pretty().init();
        }
    } else if log_format.contains("compact") {
        if log_format.contains("no-time") {
            logger.compact().without_time().init();
        } else {
            logger.compact().init();
        }
    } else if log_format.contains("no-time") {
        logger.without_time().init();
    } else {
        logger.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Clone, Parser)]
/// A caching DNS forwarder for small networks.
///
/// forwarded answers a query from its cache whenever every record
/// stored under the question is still fresh, and otherwise passes the
/// query, byte for byte, to an upstream resolver, caches whatever
/// comes back, and relays the upstream's reply unchanged.
///
/// It is not a recursive resolver: anything it cannot answer from the
/// cache goes to the configured upstream.  It speaks UDP only, bound
/// to the wildcard address.
struct Args {
    /// Port to listen on
    #[clap(short, long, value_parser, default_value_t = DNS_PORT)]
    port: u16,

    /// Upstream resolver to forward to, as "host" or "host:port" (port
    /// defaults to 53); hostnames are resolved once at startup
    #[clap(short, long, value_parser)]
    forwarder: String,

    /// Maximum number of queries serviced concurrently
    #[clap(short, long, value_parser, default_value_t = 50)]
    workers: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let forward_address = match resolve_forwarder(&args.forwarder).await {
        Ok(address) => address,
        Err(error) => {
            tracing::error!(forwarder = %args.forwarder, ?error, "could not resolve forwarder address");
            process::exit(1);
        }
    };

    tracing::info!(port = %args.port, %forward_address, "binding DNS UDP socket");
    let udp = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, args.port)).await {
        Ok(socket) => socket,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let listen_args = ListenArgs {
        forward_address,
        workers: std::cmp::max(1, args.workers),
        cache: SharedCache::new(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(?error, "could not subscribe to SIGINT");
            process::exit(1);
        }
        tracing::info!("received SIGINT, shutting down");
        let _ = shutdown_tx.send(true);
    });

    listen_udp_task(listen_args, udp, shutdown_rx).await;
}
