use std::net::{Ipv4Addr, Ipv6Addr};

use bitstream_io::{BitRead, BitReader, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, WireWriter, decode_name, encode_name},
    enums::{DNSResourceClass, DNSResourceType},
    name,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdlength: u16,
    /// Uncompressed RDATA
    pub rdata: Vec<u8>,
}

impl DNSResource {
    pub fn new(
        owner: &str,
        rtype: DNSResourceType,
        rclass: DNSResourceClass,
        ttl: u32,
        rdata: Vec<u8>,
    ) -> Self {
        Self {
            labels: name::to_labels(owner),
            rtype,
            rclass,
            ttl,
            rdlength: rdata.len() as u16,
            rdata,
        }
    }

    /// Lowercase FQDN of the owner
    pub fn owner(&self) -> String {
        name::from_labels(&self.labels)
    }

    /// Copy of this record under a different owner (wildcard synthesis)
    pub fn with_owner(&self, owner: &str) -> Self {
        Self {
            labels: name::to_labels(owner),
            ..self.clone()
        }
    }

    /// Upper bound of the encoded size; compression only shrinks it
    pub fn wire_size(&self) -> usize {
        let owner: usize = self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
        owner + 10 + self.rdata.len()
    }

    /// Identity of the record ignoring owner case and TTL
    pub fn same_data(&self, other: &DNSResource) -> bool {
        self.rtype == other.rtype
            && self.rclass == other.rclass
            && self.rdata == other.rdata
            && self.owner() == other.owner()
    }

    /// Domain name carried in the RDATA of NS, CNAME, PTR, MX and SRV records
    pub fn target_name(&self) -> Option<String> {
        let offset = match self.rtype {
            DNSResourceType::NS | DNSResourceType::CNAME | DNSResourceType::PTR => 0,
            DNSResourceType::MX => 2,
            DNSResourceType::SRV => 6,
            _ => return None,
        };
        decode_name(&self.rdata, offset, &self.rdata)
            .ok()
            .map(|(labels, _)| name::from_labels(&labels))
    }

    /// Serial number of an SOA record
    pub fn soa_serial(&self) -> Option<u32> {
        if self.rtype != DNSResourceType::SOA {
            return None;
        }
        let (_, after_mname) = decode_name(&self.rdata, 0, &self.rdata).ok()?;
        let (_, after_rname) = decode_name(&self.rdata, after_mname, &self.rdata).ok()?;
        let serial = self.rdata.get(after_rname..after_rname + 4)?;
        Some(u32::from_be_bytes([serial[0], serial[1], serial[2], serial[3]]))
    }

    /// SOA MINIMUM field, used as negative caching TTL
    pub fn soa_minimum(&self) -> Option<u32> {
        if self.rtype != DNSResourceType::SOA || self.rdata.len() < 4 {
            return None;
        }
        let tail = &self.rdata[self.rdata.len() - 4..];
        Some(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]))
    }

    /// Presentation form of the RDATA, for logs and tests
    pub fn rdata_text(&self) -> String {
        match self.rtype {
            DNSResourceType::A if self.rdata.len() == 4 => {
                Ipv4Addr::new(self.rdata[0], self.rdata[1], self.rdata[2], self.rdata[3])
                    .to_string()
            }
            DNSResourceType::AAAA if self.rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.rdata);
                Ipv6Addr::from(octets).to_string()
            }
            DNSResourceType::SOA => match self.soa_serial() {
                Some(serial) => format!("serial {}", serial),
                None => format!("{} bytes", self.rdata.len()),
            },
            _ => match self.target_name() {
                Some(target) => target,
                None => format!("{} bytes", self.rdata.len()),
            },
        }
    }

    /// Rewrite RDATA that may carry compressed names into standalone form
    fn expand_rdata(&mut self, packet: &[u8]) -> Result<(), ParseError> {
        let mut expanded = Vec::with_capacity(self.rdata.len());

        match self.rtype {
            DNSResourceType::NS | DNSResourceType::CNAME | DNSResourceType::PTR => {
                let (labels, _) = decode_name(&self.rdata, 0, packet)?;
                expanded.extend(encode_name(&name::from_labels(&labels))?);
            }
            DNSResourceType::MX => {
                let preference = self.rdata.get(0..2).ok_or(ParseError::InvalidRecord)?;
                expanded.extend_from_slice(preference);
                let (labels, _) = decode_name(&self.rdata, 2, packet)?;
                expanded.extend(encode_name(&name::from_labels(&labels))?);
            }
            DNSResourceType::SOA => {
                let (mname, pos) = decode_name(&self.rdata, 0, packet)?;
                let (rname, pos) = decode_name(&self.rdata, pos, packet)?;
                let counters = self
                    .rdata
                    .get(pos..pos + 20)
                    .ok_or(ParseError::InvalidRecord)?;
                expanded.extend(encode_name(&name::from_labels(&mname))?);
                expanded.extend(encode_name(&name::from_labels(&rname))?);
                expanded.extend_from_slice(counters);
            }
            _ => return Ok(()),
        }

        self.rdlength = expanded.len() as u16;
        self.rdata = expanded;
        Ok(())
    }
}

impl PacketComponent for DNSResource {
    fn write(&self, writer: &mut WireWriter) -> Result<(), ParseError> {
        if self.rdata.len() > u16::MAX as usize {
            return Err(ParseError::InvalidRecord);
        }
        writer.put_name(&self.labels)?;
        writer.put_u16(self.rtype.into());
        writer.put_u16(self.rclass.into());
        writer.put_u32(self.ttl);
        writer.put_u16(self.rdata.len() as u16);
        writer.put_slice(&self.rdata);
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError> {
        self.labels = self.read_labels(reader, packet)?;
        self.rtype = reader.read_var::<u16>(16)?.into();
        self.rclass = reader.read_var::<u16>(16)?.into();
        self.ttl = reader.read_var::<u32>(32)?;
        self.rdlength = reader.read_var::<u16>(16)?;
        let mut buf = vec![0_u8; self.rdlength as usize];
        reader.read_bytes(&mut buf)?;
        self.rdata = buf;
        self.expand_rdata(packet)?;

        Ok(())
    }
}
