//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.
//!
//! Serialisation cannot fail: the header's counts are written as
//! stored (they are the live counts of a cache read, not the length of
//! the record vectors), and a record's RDLENGTH is likewise re-emitted
//! as it arrived rather than recomputed.

use crate::protocol::types::*;

impl Message {
    pub fn to_octets(self) -> Vec<u8> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer);
        buffer.octets
    }

    pub fn serialise(self, buffer: &mut WritableBuffer) {
        self.header.serialise(buffer);
        self.question.serialise(buffer);

        for rr in self.answers {
            rr.serialise(buffer);
        }
        for rr in self.authority {
            rr.serialise(buffer);
        }
        for rr in self.additional {
            rr.serialise(buffer);
        }
    }
}

impl Header {
    /// Recompose the flag word.  Every field is masked to its bit
    /// width, so an oversized value cannot overflow into a neighbour.
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        let mut flags = 0u16;
        if self.is_response {
            flags |= HEADER_MASK_QR;
        }
        flags |= (u16::from(u8::from(self.opcode)) << HEADER_OFFSET_OPCODE) & HEADER_MASK_OPCODE;
        if self.is_authoritative {
            flags |= HEADER_MASK_AA;
        }
        if self.is_truncated {
            flags |= HEADER_MASK_TC;
        }
        if self.recursion_desired {
            flags |= HEADER_MASK_RD;
        }
        if self.recursion_available {
            flags |= HEADER_MASK_RA;
        }
        flags |= (u16::from(self.z) << HEADER_OFFSET_Z) & HEADER_MASK_Z;
        flags |= u16::from(u8::from(self.rcode)) & HEADER_MASK_RCODE;

        buffer.write_u16(self.id);
        buffer.write_u16(flags);
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Question {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        buffer.write_octets(&self.qname.octets);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    pub fn serialise(self, buffer: &mut WritableBuffer) {
        match self.data {
            RecordData::Parsed {
                owner,
                rtype,
                rclass,
                ttl,
                rdlength,
                rdata,
                ..
            } => {
                buffer.write_octets(&owner);
                buffer.write_u16(rtype.into());
                buffer.write_u16(rclass.into());
                // floored to whole seconds
                buffer.write_u32(u32::try_from(ttl.as_secs()).unwrap_or(u32::MAX));
                buffer.write_u16(rdlength);
                buffer.write_octets(&rdata);
            }
            RecordData::Opaque { octets } => buffer.write_octets(&octets),
        }
    }
}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: Vec<u8>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: Vec::with_capacity(512),
        }
    }
}

impl WritableBuffer {
    pub fn write_u16(&mut self, value: u16) {
        for octet in value.to_be_bytes() {
            self.octets.push(octet);
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        for octet in value.to_be_bytes() {
            self.octets.push(octet);
        }
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        for octet in octets {
            self.octets.push(*octet);
        }
    }
}
