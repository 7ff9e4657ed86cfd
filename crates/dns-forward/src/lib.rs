#![warn(clippy::pedantic)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::wildcard_imports)]

pub mod cache;
pub mod upstream;

use std::fmt;
use std::net::SocketAddr;

use dns_wire::protocol::types::Message;

use self::cache::SharedCache;

/// Where an answer came from, for the per-request log line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Source {
    Cache,
    Forwarder,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Cache => write!(f, "cache"),
            Source::Forwarder => write!(f, "forwarder"),
        }
    }
}

/// The outcome of handling one query.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Resolution {
    /// Octets to relay to the client, answered from `source`.
    Answer { octets: Vec<u8>, source: Source },

    /// The upstream could not be reached: octets of a server-failure
    /// reply echoing the question.
    Failed { octets: Vec<u8> },
}

/// Answer a query from the cache when every record under its question
/// is still fresh; otherwise forward the client's original octets
/// upstream, refresh the whole entry, and relay the upstream's raw
/// response.
///
/// The raw relay on the forwarding path is deliberate: on a cold miss
/// the client sees exactly what the upstream produced, including
/// anything the codec does not understand, while warm hits are served
/// from the decoded and re-encoded cached form.
///
/// Two concurrent misses on the same key will each forward and each
/// overwrite the entry; the last writer wins and no client is starved.
pub async fn resolve(
    forward_address: SocketAddr,
    cache: &SharedCache,
    raw_query: &[u8],
    query: &Message,
) -> Resolution {
    let key = &query.question;

    if cache.contains(key) && cache.obsolete_records(key).is_empty() {
        if let Some((records, counts)) = cache.get(key) {
            let response = Message::cached_response(query, records, counts);
            return Resolution::Answer {
                octets: response.to_octets(),
                source: Source::Cache,
            };
        }
    }

    forward_and_refresh(forward_address, cache, raw_query, query).await
}

/// Forward the original query octets upstream and store the decoded
/// records under the response's question.  A response the codec cannot
/// decode is still relayed to the client; it just is not cached.  A
/// failed forward leaves the cache untouched.
async fn forward_and_refresh(
    forward_address: SocketAddr,
    cache: &SharedCache,
    raw_query: &[u8],
    query: &Message,
) -> Resolution {
    tracing::debug!(question = %query.question, %forward_address, "forwarding query upstream");

    match upstream::query_upstream(forward_address, raw_query).await {
        Some(response_octets) => {
            match Message::from_octets(&response_octets) {
                Ok(response) => cache.put(response.question.clone(), response.into_record_set()),
                Err(error) => {
                    tracing::debug!(?error, "could not parse upstream response, not caching");
                }
            }
            Resolution::Answer {
                octets: response_octets,
                source: Source::Forwarder,
            }
        }
        None => Resolution::Failed {
            octets: Message::failure_response(query).to_octets(),
        },
    }
}
