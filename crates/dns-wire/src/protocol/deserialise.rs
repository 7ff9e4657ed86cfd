//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.
//!
//! Only the header and the question are properly parsed.  The record
//! stream after the question is carved up at every occurrence of the
//! question pointer instead: every record in a forwarded response to a
//! single-question query owns its name through that pointer, so the
//! split recovers record boundaries without a general name
//! decompressor.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the header or the question cannot be parsed.  A record that
    /// cannot be parsed is not an error: it is kept as an opaque byte
    /// span and re-emitted verbatim.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        let mut buffer = ConsumableBuffer::new(octets);

        let header = Header::deserialise(&mut buffer)?;
        let question = Question::deserialise(header.id, &mut buffer)?;

        let mut fragments = split_record_stream(buffer.remaining());
        let answers = pick_records(header.ancount, Section::Answer, &mut fragments);
        let authority = pick_records(header.nscount, Section::Authority, &mut fragments);
        let additional = pick_records(header.arcount, Section::Additional, &mut fragments);

        Ok(Self {
            header,
            question,
            answers,
            authority,
            additional,
        })
    }
}

impl Header {
    /// # Errors
    ///
    /// If the header is too short.
    #[allow(clippy::cast_possible_truncation)]
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
        let flags = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;
        let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(id))?;

        Ok(Self {
            id,
            is_response: flags & HEADER_MASK_QR != 0,
            opcode: Opcode::from(((flags & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE) as u8),
            is_authoritative: flags & HEADER_MASK_AA != 0,
            is_truncated: flags & HEADER_MASK_TC != 0,
            recursion_desired: flags & HEADER_MASK_RD != 0,
            recursion_available: flags & HEADER_MASK_RA != 0,
            z: ((flags & HEADER_MASK_Z) >> HEADER_OFFSET_Z) as u8,
            rcode: Rcode::from((flags & HEADER_MASK_RCODE) as u8),
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = buffer.take_name().ok_or(Error::QuestionTooShort(id))?;
        let qtype = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;
        let qclass = buffer.next_u16().ok_or(Error::QuestionTooShort(id))?;

        Ok(Self {
            qname: QName {
                octets: name.to_vec(),
            },
            qtype: RecordType::from(qtype),
            qclass: RecordClass::from(qclass),
        })
    }
}

impl ResourceRecord {
    /// Parse one candidate record from a fragment of the record
    /// stream.  The fragment normally begins with the question
    /// pointer; the next ten octets are `(TYPE, CLASS, TTL, RDLENGTH)`
    /// big-endian, then the rdata.
    ///
    /// Returns the record and, when the fragment runs past the
    /// record's computed length, the trailing octets to push back onto
    /// the queue as the next candidate.  A fragment too short for the
    /// fixed fields becomes an opaque record holding the original
    /// bytes.
    pub fn from_fragment(fragment: Vec<u8>, section: Section) -> (Self, Option<Vec<u8>>) {
        // owner (2) + fixed fields (10)
        if fragment.len() < 12 {
            return (
                Self {
                    section,
                    data: RecordData::Opaque { octets: fragment },
                },
                None,
            );
        }

        let rtype = u16::from_be_bytes([fragment[2], fragment[3]]);
        let rclass = u16::from_be_bytes([fragment[4], fragment[5]]);
        let ttl = u32::from_be_bytes([fragment[6], fragment[7], fragment[8], fragment[9]]);
        let rdlength = u16::from_be_bytes([fragment[10], fragment[11]]);

        let rdata_end = fragment.len().min(12 + usize::from(rdlength));
        let tail = if rdata_end < fragment.len() {
            Some(fragment[rdata_end..].to_vec())
        } else {
            None
        };

        (
            Self {
                section,
                data: RecordData::Parsed {
                    owner: fragment[..2].to_vec(),
                    rtype: RecordType::from(rtype),
                    rclass: RecordClass::from(rclass),
                    ttl: Duration::from_secs(u64::from(ttl)),
                    last_update: Instant::now(),
                    rdlength,
                    rdata: fragment[12..rdata_end].to_vec(),
                },
            },
            tail,
        )
    }
}

/// Split the record stream at every occurrence of the question
/// pointer.  Each fragment keeps its leading pointer.  Octets before
/// the first pointer are dropped; a stream with no pointer at all is
/// returned as a single candidate fragment.
fn split_record_stream(stream: &[u8]) -> VecDeque<Vec<u8>> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 1 < stream.len() {
        if stream[i..i + 2] == QUESTION_POINTER {
            starts.push(i);
            i += 2;
        } else {
            i += 1;
        }
    }

    let mut fragments = VecDeque::with_capacity(starts.len().max(1));
    if starts.is_empty() {
        fragments.push_back(stream.to_vec());
        return fragments;
    }

    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(stream.len());
        fragments.push_back(stream[start..end].to_vec());
    }
    fragments
}

/// Consume `count` fragments for one section.  The header's counts are
/// consumed in section order, so the first ANCOUNT fragments are
/// answers, the next NSCOUNT authorities, and the remainder
/// additionals.  An exhausted queue ends the section early rather than
/// failing the message.
fn pick_records(
    count: u16,
    section: Section,
    fragments: &mut VecDeque<Vec<u8>>,
) -> Vec<ResourceRecord> {
    let mut records = Vec::with_capacity(count.into());
    for _ in 0..count {
        let Some(fragment) = fragments.pop_front() else {
            break;
        };
        let (record, tail) = ResourceRecord::from_fragment(fragment, section);
        if let Some(tail) = tail {
            fragments.push_front(tail);
        }
        records.push(record);
    }
    records
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header - so
/// that the failure can be attributed to a query.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.
    CompletelyBusted,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// The question has no zero terminator, or ends with an incomplete
    /// field.
    QuestionTooShort(u16),
}

impl Error {
    pub fn id(self) -> Option<u16> {
        match self {
            Error::CompletelyBusted => None,
            Error::HeaderTooShort(id) => Some(id),
            Error::QuestionTooShort(id) => Some(id),
        }
    }
}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self { octets, position: 0 }
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        if self.octets.len() > self.position + 1 {
            let a = self.octets[self.position];
            let b = self.octets[self.position + 1];
            self.position += 2;
            Some(u16::from_be_bytes([a, b]))
        } else {
            None
        }
    }

    /// The variable-length span from the current position up to and
    /// including the first zero octet.
    pub fn take_name(&mut self) -> Option<&'a [u8]> {
        let rest = &self.octets[self.position..];
        let zero = rest.iter().position(|&octet| octet == 0)?;
        self.position += zero + 1;
        Some(&rest[..=zero])
    }

    /// Everything not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.octets[self.position..]
    }
}
