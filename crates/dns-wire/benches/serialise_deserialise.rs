use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::{Duration, Instant};

use dns_wire::protocol::types::*;

fn query(name: &str) -> Message {
    Message {
        header: Header {
            id: 1234,
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
        question: Question {
            qname: QName::from_dotted_string(name).unwrap(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        },
        answers: Vec::new(),
        authority: Vec::new(),
        additional: Vec::new(),
    }
}

fn answer(address: [u8; 4]) -> ResourceRecord {
    ResourceRecord {
        section: Section::Answer,
        data: RecordData::Parsed {
            owner: QUESTION_POINTER.to_vec(),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl: Duration::from_secs(300),
            last_update: Instant::now(),
            rdlength: 4,
            rdata: address.to_vec(),
        },
    }
}

#[allow(non_snake_case)]
fn bench__question(c: &mut Criterion) {
    let message = query("www.example.com.");

    c.bench_function("serialise/question", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.to_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.to_octets();
    c.bench_function("deserialise/question", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__small(c: &mut Criterion) {
    let mut message = query("www.example.com.");
    message.header.ancount = 1;
    message.answers = vec![answer([192, 0, 2, 1])];

    c.bench_function("serialise/answer/small", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.to_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.to_octets();
    c.bench_function("deserialise/answer/small", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

#[allow(non_snake_case)]
fn bench__answer__big(c: &mut Criterion) {
    let mut message = query("www.example.com.");
    message.header.ancount = 64;
    message.answers = (0..64u8).map(|i| answer([10, 0, 0, i])).collect();

    c.bench_function("serialise/answer/big", |b| {
        b.iter_batched(
            || message.clone(),
            |message| message.to_octets(),
            BatchSize::SmallInput,
        )
    });

    let serialised = message.to_octets();
    c.bench_function("deserialise/answer/big", |b| {
        b.iter(|| Message::from_octets(black_box(&serialised)))
    });
}

criterion_group!(
    benches,
    bench__question,
    bench__answer__small,
    bench__answer__big
);
criterion_main!(benches);
