use super::{ParseError, common::WireWriter, enums::DNSResourceType};

/// Payload size assumed for clients that do not advertise EDNS0
pub const MIN_UDP_PAYLOAD: u16 = 512;

/// Largest payload size this server advertises
pub const MAX_UDP_PAYLOAD: u16 = 4096;

/// DNSSEC OK flag in the OPT TTL field
const DO_FLAG: u16 = 0x8000;

/// EDNS0 OPT pseudo-record (RFC 6891)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOpt {
    /// UDP payload size that can be handled by the requestor
    pub udp_payload_size: u16,
    /// Extended RCODE (high 8 bits)
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl EdnsOpt {
    pub fn new() -> Self {
        Self {
            udp_payload_size: MAX_UDP_PAYLOAD,
            ..Default::default()
        }
    }

    pub fn with_payload_size(payload_size: u16) -> Self {
        Self {
            udp_payload_size: payload_size,
            ..Self::new()
        }
    }

    /// OPT record to attach to a response for a request carrying `self`.
    ///
    /// The advertised size is clamped to [512, 4096] and the DO bit is
    /// mirrored. Options are not echoed.
    pub fn for_response(&self) -> Self {
        let mut opt = Self::with_payload_size(
            self.udp_payload_size
                .clamp(MIN_UDP_PAYLOAD, MAX_UDP_PAYLOAD),
        );
        opt.set_do_flag(self.do_flag());
        opt
    }

    pub fn do_flag(&self) -> bool {
        (self.flags & DO_FLAG) != 0
    }

    pub fn set_do_flag(&mut self, value: bool) {
        if value {
            self.flags |= DO_FLAG;
        } else {
            self.flags &= !DO_FLAG;
        }
    }

    pub fn payload_size(&self) -> u16 {
        self.udp_payload_size
    }

    /// Parse the OPT record fields.
    ///
    /// CLASS carries the payload size and TTL packs extended RCODE,
    /// version and flags.
    pub fn parse_from_resource(class: u16, ttl: u32, rdata: &[u8]) -> Result<Self, ParseError> {
        let extended_rcode = ((ttl >> 24) & 0xFF) as u8;
        let version = ((ttl >> 16) & 0xFF) as u8;
        let flags = (ttl & 0xFFFF) as u16;

        let mut options = Vec::new();
        let mut pos = 0;

        while pos < rdata.len() {
            if pos + 4 > rdata.len() {
                return Err(ParseError::InvalidRecord);
            }

            let code = u16::from_be_bytes([rdata[pos], rdata[pos + 1]]);
            let length = u16::from_be_bytes([rdata[pos + 2], rdata[pos + 3]]) as usize;
            pos += 4;

            let data = rdata
                .get(pos..pos + length)
                .ok_or(ParseError::InvalidRecord)?
                .to_vec();
            pos += length;

            options.push(EdnsOption { code, data });
        }

        Ok(EdnsOpt {
            udp_payload_size: class,
            extended_rcode,
            version,
            flags,
            options,
        })
    }

    /// Serialize to (CLASS, TTL, RDATA)
    pub fn to_resource_format(&self) -> (u16, u32, Vec<u8>) {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | (self.flags as u32);

        let mut rdata = Vec::new();
        for option in &self.options {
            rdata.extend_from_slice(&option.code.to_be_bytes());
            rdata.extend_from_slice(&(option.data.len() as u16).to_be_bytes());
            rdata.extend_from_slice(&option.data);
        }

        (self.udp_payload_size, ttl, rdata)
    }

    /// Encoded size of the OPT record
    pub fn wire_size(&self) -> usize {
        // root name, type, class, ttl, rdlength
        11 + self
            .options
            .iter()
            .map(|opt| 4 + opt.data.len())
            .sum::<usize>()
    }

    pub(crate) fn write(&self, writer: &mut WireWriter) {
        let (class, ttl, rdata) = self.to_resource_format();
        writer.put_u8(0);
        writer.put_u16(DNSResourceType::OPT.into());
        writer.put_u16(class);
        writer.put_u32(ttl);
        writer.put_u16(rdata.len() as u16);
        writer.put_slice(&rdata);
    }

    pub fn debug_info(&self) -> String {
        format!(
            "EDNS0: payload_size={}, version={}, do={}, options={}",
            self.udp_payload_size,
            self.version,
            self.do_flag(),
            self.options.len()
        )
    }
}
