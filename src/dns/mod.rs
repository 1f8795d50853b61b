pub mod common;
pub mod edns;
pub mod enums;
pub mod header;
pub mod name;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader};
use common::{PacketComponent, WireWriter};
use edns::EdnsOpt;
use enums::{DNSResourceType, ResponseCode};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use tracing::{debug, trace};

/// Largest message that fits a TCP length prefix
pub const MAX_TCP_MESSAGE_SIZE: usize = u16::MAX as usize;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
    /// EDNS0 OPT record if present (extracted from additional records)
    pub edns: Option<EdnsOpt>,
    /// Use name compression when serializing
    pub compress: bool,
}

#[derive(Debug)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    InvalidQuestionSection,
    InvalidAnswerSection,
    InvalidAuthoritySection,
    InvalidAdditionalSection,
    InvalidRecord,
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid DNS label"),
            ParseError::InvalidQuestionSection => write!(f, "Invalid question section"),
            ParseError::InvalidAnswerSection => write!(f, "Invalid answer section"),
            ParseError::InvalidAuthoritySection => write!(f, "Invalid authority section"),
            ParseError::InvalidAdditionalSection => write!(f, "Invalid additional section"),
            ParseError::InvalidRecord => write!(f, "Invalid resource record data"),
            ParseError::InvalidBitStream(e) => write!(f, "Invalid bit stream: {}", e),
        }
    }
}

impl std::error::Error for ParseError {}

impl DNSPacket {
    /// Build a query for `qname`
    pub fn query(id: u16, question: DNSQuestion) -> Self {
        DNSPacket {
            header: DNSHeader {
                id,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![question],
            ..Default::default()
        }
    }

    /// Empty reply carrying the query's id, opcode, RD bit and question
    pub fn reply_to(query: &DNSPacket) -> Self {
        DNSPacket {
            header: DNSHeader {
                qdcount: query.questions.len() as u16,
                ..DNSHeader::reply_to(&query.header)
            },
            questions: query.questions.clone(),
            ..Default::default()
        }
    }

    /// Header-only reply with `rcode`
    pub fn error_reply(query: &DNSPacket, rcode: ResponseCode) -> Self {
        let mut reply = Self::reply_to(query);
        reply.header.rcode = rcode.to_u8();
        reply
    }

    pub fn rcode(&self) -> Option<ResponseCode> {
        ResponseCode::from_u8(self.header.rcode)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        if buf.len() < header::HEADER_SIZE {
            return Err(ParseError::InvalidHeader);
        }

        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet
            .header
            .read(&mut reader, buf)
            .map_err(|_| ParseError::InvalidHeader)?;
        debug!(
            "Parsed DNS header: id={}, qr={}, opcode={}, questions={}",
            packet.header.id, packet.header.qr, packet.header.opcode, packet.header.qdcount
        );

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidQuestionSection)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAnswerSection)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAuthoritySection)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource
                .read(&mut reader, buf)
                .map_err(|_| ParseError::InvalidAdditionalSection)?;

            if resource.rtype == DNSResourceType::OPT && resource.labels.is_empty() {
                // CLASS holds the requestor's payload size
                let edns = EdnsOpt::parse_from_resource(
                    resource.rclass.into(),
                    resource.ttl,
                    &resource.rdata,
                )?;
                trace!("Parsed {}", edns.debug_info());
                packet.edns = Some(edns);
                continue;
            }

            packet.resources.push(resource);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut writer = WireWriter::new(self.compress);
        self.write_header(&mut writer)?;

        for question in &self.questions {
            question.write(&mut writer)?;
        }
        for record in self.records() {
            record.write(&mut writer)?;
        }
        if let Some(edns) = &self.edns {
            edns.write(&mut writer);
        }

        Ok(writer.into_bytes())
    }

    /// Header with section counts taken from the sections themselves
    fn write_header(&self, writer: &mut WireWriter) -> Result<(), ParseError> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.resources.len() as u16 + self.edns.is_some() as u16;
        header.write(writer)
    }

    /// All records in section order
    pub fn records(&self) -> impl Iterator<Item = &DNSResource> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.resources.iter())
    }

    /// Drop trailing records until the encoded message fits `max_size`.
    ///
    /// Additional records go first, then authority, then answers. TC is
    /// set only when an answer or authority record had to be dropped.
    /// Returns whether the message was truncated.
    pub fn fit_to(&mut self, max_size: usize) -> Result<bool, ParseError> {
        let mut writer = WireWriter::new(self.compress);
        self.write_header(&mut writer)?;
        for question in &self.questions {
            question.write(&mut writer)?;
        }

        let reserved = self.edns.as_ref().map(|e| e.wire_size()).unwrap_or(0);
        let budget = max_size.saturating_sub(reserved);

        let mut kept = 0;
        if writer.len() <= budget {
            for record in self.records() {
                record.write(&mut writer)?;
                if writer.len() > budget {
                    break;
                }
                kept += 1;
            }
        }

        let (answers, authorities, additional) = (
            self.answers.len(),
            self.authorities.len(),
            self.resources.len(),
        );
        if kept == answers + authorities + additional {
            return Ok(false);
        }

        let keep_answers = kept.min(answers);
        let keep_authorities = (kept - keep_answers).min(authorities);
        let keep_additional = kept - keep_answers - keep_authorities;

        self.answers.truncate(keep_answers);
        self.authorities.truncate(keep_authorities);
        self.resources.truncate(keep_additional);

        let truncated = keep_answers < answers || keep_authorities < authorities;
        if truncated {
            self.header.tc = true;
        }
        debug!(
            "Fitted message to {} bytes: kept {}/{} records, tc={}",
            max_size,
            kept,
            answers + authorities + additional,
            truncated
        );

        Ok(truncated)
    }

    /// Maximum UDP response size for the requestor, never more than this
    /// server advertises in its own OPT
    pub fn max_udp_payload_size(&self) -> u16 {
        self.edns
            .as_ref()
            .map(|edns| {
                edns.payload_size()
                    .clamp(edns::MIN_UDP_PAYLOAD, edns::MAX_UDP_PAYLOAD)
            })
            .unwrap_or(edns::MIN_UDP_PAYLOAD)
    }
}
