use std::fmt;
use std::time::{Duration, Instant};

/// The compression pointer to the question name at offset 12.  Every
/// record in a response to a single-question query owns its name
/// through this pointer, which is what lets the record stream be
/// carved up without a general decompressor.
pub const QUESTION_POINTER: [u8; 2] = [0xc0, 0x0c];

/// Records whose residual TTL drops below this are due for a refresh
/// of their whole cache entry.
pub const OBSOLETE_THRESHOLD: Duration = Duration::from_secs(2);

pub const HEADER_MASK_QR: u16 = 0b1000_0000_0000_0000;
pub const HEADER_MASK_OPCODE: u16 = 0b0111_1000_0000_0000;
pub const HEADER_OFFSET_OPCODE: u16 = 11;
pub const HEADER_MASK_AA: u16 = 0b0000_0100_0000_0000;
pub const HEADER_MASK_TC: u16 = 0b0000_0010_0000_0000;
pub const HEADER_MASK_RD: u16 = 0b0000_0001_0000_0000;
pub const HEADER_MASK_RA: u16 = 0b0000_0000_1000_0000;
pub const HEADER_MASK_Z: u16 = 0b0000_0000_0111_0000;
pub const HEADER_OFFSET_Z: u16 = 4;
pub const HEADER_MASK_RCODE: u16 = 0b0000_0000_0000_1111;

/// A DNS message as this resolver understands it: a header, exactly
/// one question, and the resource records of the three response
/// sections.
///
/// ```text
///     +---------------------+
///     |        Header       |
///     +---------------------+
///     |       Question      | the question for the name server
///     +---------------------+
///     |        Answer       | RRs answering the question
///     +---------------------+
///     |      Authority      | RRs pointing toward an authority
///     +---------------------+
///     |      Additional     | RRs holding additional information
///     +---------------------+
/// ```
///
/// See section 4.1 of RFC 1035.  This is deliberately a narrow
/// reading of the format: the codec decodes just enough to key the
/// cache by question and to carve records (with their TTLs) out of a
/// forwarded response, and re-encodes just enough to serve those
/// records back.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub header: Header,
    pub question: Question,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Build the reply to a query answered from the cache.
    ///
    /// The id, opcode, RD flag, and QDCOUNT are copied from the query;
    /// the section counts come from the cache's aged read, so opaque
    /// records are excluded from the counts even though they are still
    /// re-emitted in the body.
    pub fn cached_response(
        query: &Message,
        records: Vec<ResourceRecord>,
        counts: SectionCounts,
    ) -> Self {
        let mut answers = Vec::new();
        let mut authority = Vec::new();
        let mut additional = Vec::new();
        for record in records {
            match record.section {
                Section::Answer => answers.push(record),
                Section::Authority => authority.push(record),
                Section::Additional => additional.push(record),
            }
        }

        Self {
            header: Header {
                id: query.header.id,
                is_response: true,
                opcode: query.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: query.header.recursion_desired,
                recursion_available: true,
                z: 0,
                rcode: Rcode::NoError,
                qdcount: query.header.qdcount,
                ancount: counts.ancount,
                nscount: counts.nscount,
                arcount: counts.arcount,
            },
            question: query.question.clone(),
            answers,
            authority,
            additional,
        }
    }

    /// Build the server-failure reply sent when the upstream cannot be
    /// reached.  All four counts are zero, but the question is still
    /// echoed after the header.
    pub fn failure_response(query: &Message) -> Self {
        Self {
            header: Header {
                id: query.header.id,
                is_response: true,
                opcode: query.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: query.header.recursion_desired,
                recursion_available: true,
                z: 0,
                rcode: Rcode::ServerFailure,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            question: query.question.clone(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// The records of the three sections as one ordered set, the shape
    /// the cache stores: answers first, then authorities, then
    /// additionals, each section in delivery order.
    pub fn into_record_set(self) -> Vec<ResourceRecord> {
        let mut records = self.answers;
        records.extend(self.authority);
        records.extend(self.additional);
        records
    }
}

/// Common header type for all messages.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      ID                       |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    QDCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ANCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    NSCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                    ARCOUNT                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.1 of RFC 1035.  The counts are kept in the header
/// rather than derived from the body: a served response reports the
/// live per-section counts of a cache read, which can be smaller than
/// the number of records actually emitted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates the
    /// query, copied into the corresponding reply.
    pub id: u16,

    /// Whether this message is a query (0) or a response (1).
    pub is_response: bool,

    /// What sort of query this is.  Copied into the response.
    pub opcode: Opcode,

    /// Authoritative Answer.  Always cleared in served responses; a
    /// forwarder is never an authority.
    pub is_authoritative: bool,

    /// TrunCation.
    pub is_truncated: bool,

    /// Recursion Desired.  Copied from the query into the response.
    pub recursion_desired: bool,

    /// Recursion Available.  Always set in served responses.
    pub recursion_available: bool,

    /// The three reserved bits between RA and RCODE.  Decoded and
    /// re-encoded (masked to width) rather than assumed zero.
    pub z: u8,

    /// Response code.
    pub rcode: Rcode,

    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// What sort of query this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Standard,
    Inverse,
    Status,
    Reserved(OpcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Opcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct OpcodeReserved(u8);

impl From<u8> for Opcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Opcode::Standard,
            1 => Opcode::Inverse,
            2 => Opcode::Status,
            other => Opcode::Reserved(OpcodeReserved(other)),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Standard => 0,
            Opcode::Inverse => 1,
            Opcode::Status => 2,
            Opcode::Reserved(OpcodeReserved(octet)) => octet,
        }
    }
}

/// What sort of response this is.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Rcode {
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
    Reserved(RcodeReserved),
}

/// A struct with a private constructor, to ensure invalid `Rcode`s
/// cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RcodeReserved(u8);

impl From<u8> for Rcode {
    fn from(octet: u8) -> Self {
        match octet & 0b0000_1111 {
            0 => Rcode::NoError,
            1 => Rcode::FormatError,
            2 => Rcode::ServerFailure,
            3 => Rcode::NameError,
            4 => Rcode::NotImplemented,
            5 => Rcode::Refused,
            other => Rcode::Reserved(RcodeReserved(other)),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormatError => 1,
            Rcode::ServerFailure => 2,
            Rcode::NameError => 3,
            Rcode::NotImplemented => 4,
            Rcode::Refused => 5,
            Rcode::Reserved(RcodeReserved(octet)) => octet,
        }
    }
}

/// The question being asked.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                                               |
///     /                     QNAME                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QTYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     QCLASS                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.2 of RFC 1035.
///
/// This is also the cache key: equality and hashing are over the raw
/// wire bytes of the name plus the two numeric fields, so two queries
/// that differ only in label casing are distinct entries.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub qname: QName,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.qname.to_dotted_string(),
            self.qclass,
            self.qtype
        )
    }
}

/// A question name exactly as it appeared on the wire: a sequence of
/// length-prefixed labels terminated by a zero octet.  No case folding
/// and no pointer expansion is performed; well-formed queries do not
/// use compression in the question section.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct QName {
    pub octets: Vec<u8>,
}

impl QName {
    /// Decode the labels into dotted form, one `.` after each label,
    /// so `example.com` renders as `"example.com."` and the root name
    /// as `"."`.
    pub fn to_dotted_string(&self) -> String {
        if self.octets == vec![0] {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.octets.len());
        let mut position = 0;
        while let Some(&size) = self.octets.get(position) {
            if size == 0 {
                break;
            }
            let label_end = self.octets.len().min(position + 1 + usize::from(size));
            for octet in &self.octets[position + 1..label_end] {
                out.push(*octet as char);
            }
            out.push('.');
            position = label_end;
        }

        out
    }

    /// The inverse of `to_dotted_string`, for building names in tests
    /// and tools.  Labels are kept byte-for-byte: no case folding.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s == "." {
            return Some(QName { octets: vec![0] });
        }

        let mut octets = Vec::with_capacity(s.len() + 2);
        for label in s.strip_suffix('.').unwrap_or(s).split('.') {
            if label.is_empty() || !label.is_ascii() {
                return None;
            }
            match u8::try_from(label.len()) {
                Ok(size) if size <= 63 => octets.push(size),
                _ => return None,
            }
            octets.extend_from_slice(label.as_bytes());
        }
        octets.push(0);

        if octets.len() <= 255 {
            Some(QName { octets })
        } else {
            None
        }
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QName")
            .field("to_dotted_string()", &self.to_dotted_string())
            .finish()
    }
}

/// Record types this resolver can name in its logs.  The codec never
/// interprets rdata, so unknown types flow through untouched.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    AAAA,
    ANY,
    Unknown(RecordTypeUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordType`s cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordTypeUnknown(u16);

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            28 => RecordType::AAAA,
            255 => RecordType::ANY,
            other => RecordType::Unknown(RecordTypeUnknown(other)),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::AAAA => 28,
            RecordType::ANY => 255,
            RecordType::Unknown(RecordTypeUnknown(other)) => other,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::ANY => write!(f, "ANY"),
            RecordType::Unknown(RecordTypeUnknown(n)) => write!(f, "TYPE{n}"),
        }
    }
}

/// Record classes.  Only IN is ever seen in practice.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordClass {
    IN,
    ANY,
    Unknown(RecordClassUnknown),
}

/// A struct with a private constructor, to ensure invalid
/// `RecordClass`es cannot be created.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordClassUnknown(u16);

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            255 => RecordClass::ANY,
            other => RecordClass::Unknown(RecordClassUnknown(other)),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::ANY => 255,
            RecordClass::Unknown(RecordClassUnknown(other)) => other,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::ANY => write!(f, "ANY"),
            RecordClass::Unknown(RecordClassUnknown(n)) => write!(f, "CLASS{n}"),
        }
    }
}

/// Which response section a record was delivered in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// Per-section counts of countable records, as reported in a served
/// response's header.  Opaque records are emitted but never counted.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SectionCounts {
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// A resource record as carved out of an upstream response.
///
/// ```text
///                                     1  1  1  1  1  1
///       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      NAME                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TYPE                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                     CLASS                     |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                      TTL                      |
///     |                                               |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
///     |                   RDLENGTH                    |
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
///     /                     RDATA                     /
///     /                                               /
///     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// See section 4.1.3 of RFC 1035, with NAME always the two-octet
/// pointer to the question.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceRecord {
    pub section: Section,
    pub data: RecordData,
}

/// What was recovered from a record's bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RecordData {
    /// A record whose fixed header decoded.
    Parsed {
        /// The wire-encoded owner name, normally `QUESTION_POINTER`.
        owner: Vec<u8>,

        rtype: RecordType,
        rclass: RecordClass,

        /// Residual TTL, aged down on every cache read.  Kept as a
        /// `Duration` so sub-second aging does not drift across
        /// repeated reads; floored to whole seconds on encode.
        ttl: Duration,

        /// When `ttl` was last recomputed.
        last_update: Instant,

        /// RDLENGTH as it appeared on the wire.  Re-emitted as stored,
        /// never recomputed from the rdata actually recovered.
        rdlength: u16,

        rdata: Vec<u8>,
    },

    /// A record whose fixed header failed to decode.  Held as an
    /// opaque byte span that can be re-emitted verbatim but never
    /// inspected: it has no TTL, is never obsolete, and does not
    /// contribute to section counts.
    Opaque { octets: Vec<u8> },
}

impl ResourceRecord {
    /// Age the residual TTL down to `now`.  Reading twice in quick
    /// succession yields TTLs that differ only by the time between the
    /// reads, because `last_update` advances in step.
    pub fn age(&mut self, now: Instant) {
        if let RecordData::Parsed {
            ttl, last_update, ..
        } = &mut self.data
        {
            *ttl = ttl.saturating_sub(now.duration_since(*last_update));
            *last_update = now;
        }
    }

    /// The TTL this record would have if aged to `now`, without
    /// mutating it.  `None` for opaque records.
    pub fn residual_ttl(&self, now: Instant) -> Option<Duration> {
        match &self.data {
            RecordData::Parsed {
                ttl, last_update, ..
            } => Some(ttl.saturating_sub(now.duration_since(*last_update))),
            RecordData::Opaque { .. } => None,
        }
    }

    /// True when the residual TTL has dropped below the refresh
    /// threshold.  Opaque records are never obsolete: they neither
    /// extend nor cut short the freshness of their record set.
    pub fn is_obsolete(&self, now: Instant) -> bool {
        match self.residual_ttl(now) {
            Some(ttl) => ttl < OBSOLETE_THRESHOLD,
            None => false,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.data, RecordData::Opaque { .. })
    }
}


#[cfg(any(feature = "test-util", test))]
pub mod test_util {
    use super::*;

    pub fn qname(name: &str) -> QName {
        QName::from_dotted_string(name).unwrap()
    }

    pub fn question(name: &str, qtype: RecordType) -> Question {
        Question {
            qname: qname(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    /// An A record owned by the question pointer, fresh as of now.
    pub fn a_record(section: Section, address: [u8; 4], ttl: Duration) -> ResourceRecord {
        ResourceRecord {
            section,
            data: RecordData::Parsed {
                owner: QUESTION_POINTER.to_vec(),
                rtype: RecordType::A,
                rclass: RecordClass::IN,
                ttl,
                last_update: Instant::now(),
                rdlength: 4,
                rdata: address.to_vec(),
            },
        }
    }

    pub fn opaque_record(section: Section, octets: &[u8]) -> ResourceRecord {
        ResourceRecord {
            section,
            data: RecordData::Opaque {
                octets: octets.to_vec(),
            },
        }
    }
}
