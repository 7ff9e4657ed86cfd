use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use dns_forward::cache::SharedCache;
use dns_forward::{resolve, Resolution, Source};
use dns_wire::protocol::types::test_util::*;
use dns_wire::protocol::types::*;

fn query_message(id: u16, name: &str, qtype: RecordType) -> Message {
    Message {
        header: Header {
            id,
            is_response: false,
            opcode: Opcode::Standard,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: true,
            recursion_available: false,
            z: 0,
            rcode: Rcode::NoError,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        },
        question: question(name, qtype),
        answers: Vec::new(),
        authority: Vec::new(),
        additional: Vec::new(),
    }
}

fn response_message(query: &Message, answers: Vec<ResourceRecord>) -> Message {
    let mut response = query.clone();
    response.header.is_response = true;
    response.header.recursion_available = true;
    response.header.ancount = answers.len() as u16;
    response.answers = answers;
    response
}

fn two_answer_response(query: &Message) -> Vec<u8> {
    response_message(
        query,
        vec![
            a_record(Section::Answer, [192, 0, 2, 1], Duration::from_secs(300)),
            a_record(Section::Answer, [192, 0, 2, 2], Duration::from_secs(300)),
        ],
    )
    .to_octets()
}

/// Bind a local socket that answers every datagram with the same
/// canned response.
async fn stub_upstream(response: Vec<u8>) -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = sock.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1024];
        while let Ok((_, peer)) = sock.recv_from(&mut buf).await {
            let _ = sock.send_to(&response, peer).await;
        }
    });
    address
}

#[tokio::test]
async fn cold_miss_forwards_and_relays_raw_octets() {
    let query = query_message(0x1234, "example.com.", RecordType::A);
    let raw_query = query.clone().to_octets();
    let upstream_octets = two_answer_response(&query);
    let upstream = stub_upstream(upstream_octets.clone()).await;
    let cache = SharedCache::new();

    let resolution = resolve(upstream, &cache, &raw_query, &query).await;

    assert_eq!(
        Resolution::Answer {
            octets: upstream_octets,
            source: Source::Forwarder,
        },
        resolution
    );
    assert!(cache.contains(&query.question));
}

#[tokio::test]
async fn warm_hit_is_served_from_cache() {
    let query = query_message(0x1234, "example.com.", RecordType::A);
    let raw_query = query.clone().to_octets();
    let upstream = stub_upstream(two_answer_response(&query)).await;
    let cache = SharedCache::new();

    resolve(upstream, &cache, &raw_query, &query).await;
    let resolution = resolve(upstream, &cache, &raw_query, &query).await;

    match resolution {
        Resolution::Answer { octets, source } => {
            assert_eq!(Source::Cache, source);

            let response = Message::from_octets(&octets).unwrap();
            assert_eq!(0x1234, response.header.id);
            assert!(response.header.is_response);
            assert!(response.header.recursion_desired);
            assert!(response.header.recursion_available);
            assert!(!response.header.is_authoritative);
            assert_eq!(Rcode::NoError, response.header.rcode);
            assert_eq!(1, response.header.qdcount);
            assert_eq!(2, response.header.ancount);
            assert_eq!(query.question, response.question);

            for answer in &response.answers {
                match &answer.data {
                    RecordData::Parsed { ttl, .. } => assert!(*ttl <= Duration::from_secs(300)),
                    RecordData::Opaque { .. } => panic!("expected parsed record"),
                }
            }
        }
        Resolution::Failed { .. } => panic!("expected an answer"),
    }
}

#[tokio::test]
async fn stale_entry_is_refreshed_from_upstream() {
    let query = query_message(0x1234, "example.com.", RecordType::A);
    let raw_query = query.clone().to_octets();
    let upstream = stub_upstream(two_answer_response(&query)).await;
    let cache = SharedCache::new();

    // one record already below the refresh threshold
    cache.put(
        query.question.clone(),
        vec![
            a_record(Section::Answer, [192, 0, 2, 9], Duration::from_secs(300)),
            a_record(Section::Answer, [192, 0, 2, 8], Duration::from_secs(1)),
        ],
    );

    let resolution = resolve(upstream, &cache, &raw_query, &query).await;

    match resolution {
        Resolution::Answer { source, .. } => assert_eq!(Source::Forwarder, source),
        Resolution::Failed { .. } => panic!("expected an answer"),
    }

    // the whole set was replaced by the upstream's two fresh answers
    let (records, counts) = cache.get(&query.question).unwrap();
    assert_eq!(2, records.len());
    assert_eq!(2, counts.ancount);
    assert!(cache.obsolete_records(&query.question).is_empty());
}

#[tokio::test]
async fn upstream_timeout_answers_server_failure() {
    // bound but never reads: the forward has to time out
    let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = sink.local_addr().unwrap();

    let query = query_message(0x1234, "example.com.", RecordType::A);
    let raw_query = query.clone().to_octets();
    let cache = SharedCache::new();

    let started = Instant::now();
    let resolution = resolve(address, &cache, &raw_query, &query).await;
    assert!(started.elapsed() >= Duration::from_secs(3));

    match resolution {
        Resolution::Failed { octets } => {
            let response = Message::from_octets(&octets).unwrap();
            assert_eq!(0x1234, response.header.id);
            assert!(response.header.is_response);
            assert_eq!(Rcode::ServerFailure, response.header.rcode);
            assert_eq!(0, response.header.qdcount);
            assert_eq!(0, response.header.ancount);
            assert_eq!(0, response.header.nscount);
            assert_eq!(0, response.header.arcount);
            assert_eq!(query.question, response.question);
        }
        Resolution::Answer { .. } => panic!("expected a failure"),
    }

    assert!(!cache.contains(&query.question));
}

#[tokio::test]
async fn bad_record_is_passed_through_but_not_counted() {
    let query = query_message(0x1234, "example.com.", RecordType::A);
    let raw_query = query.clone().to_octets();

    let mut upstream_response = response_message(
        &query,
        vec![a_record(
            Section::Answer,
            [192, 0, 2, 1],
            Duration::from_secs(300),
        )],
    );
    upstream_response.header.ancount = 2;
    upstream_response
        .answers
        .push(opaque_record(Section::Answer, &[0xc0, 0x0c, 0xde, 0xad]));

    let upstream = stub_upstream(upstream_response.to_octets()).await;
    let cache = SharedCache::new();

    resolve(upstream, &cache, &raw_query, &query).await;
    let resolution = resolve(upstream, &cache, &raw_query, &query).await;

    match resolution {
        Resolution::Answer { octets, source } => {
            assert_eq!(Source::Cache, source);

            let response = Message::from_octets(&octets).unwrap();
            assert_eq!(1, response.header.ancount);
            assert!(octets.ends_with(&[0xc0, 0x0c, 0xde, 0xad]));
        }
        Resolution::Failed { .. } => panic!("expected an answer"),
    }
}

#[tokio::test]
async fn distinct_question_types_populate_distinct_entries() {
    let query_a = query_message(0x0001, "example.com.", RecordType::A);
    let query_aaaa = query_message(0x0002, "example.com.", RecordType::AAAA);

    let aaaa_answer = ResourceRecord {
        section: Section::Answer,
        data: RecordData::Parsed {
            owner: QUESTION_POINTER.to_vec(),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl: Duration::from_secs(300),
            last_update: Instant::now(),
            rdlength: 16,
            rdata: vec![0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
        },
    };

    let upstream_a = stub_upstream(two_answer_response(&query_a)).await;
    let upstream_aaaa =
        stub_upstream(response_message(&query_aaaa, vec![aaaa_answer]).to_octets()).await;
    let cache = SharedCache::new();

    resolve(upstream_a, &cache, &query_a.clone().to_octets(), &query_a).await;
    resolve(
        upstream_aaaa,
        &cache,
        &query_aaaa.clone().to_octets(),
        &query_aaaa,
    )
    .await;

    assert!(cache.contains(&query_a.question));
    assert!(cache.contains(&query_aaaa.question));

    let (_, counts_a) = cache.get(&query_a.question).unwrap();
    let (_, counts_aaaa) = cache.get(&query_aaaa.question).unwrap();
    assert_eq!(2, counts_a.ancount);
    assert_eq!(1, counts_aaaa.ancount);
}
