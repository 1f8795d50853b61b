use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Result, ZoneError};
use crate::dns::common::encode_name;
use crate::dns::enums::{DNSResourceClass, DNSResourceType};
use crate::dns::name;
use crate::dns::resource::DNSResource;

/// A single resource record as read from a zone file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneRecord {
    /// Owner name, already qualified (`www.example.com.`)
    pub name: String,
    /// Time to live in seconds, `None` means the zone default
    pub ttl: Option<u32>,
    pub class: DNSResourceClass,
    pub rtype: DNSResourceType,
    /// Record data in presentation format
    pub rdata: String,
    /// Origin in effect where the record appeared, used for relative
    /// names inside the RDATA
    pub origin: String,
}

impl ZoneRecord {
    pub fn new(
        name: String,
        ttl: Option<u32>,
        class: DNSResourceClass,
        rtype: DNSResourceType,
        rdata: String,
        origin: String,
    ) -> Self {
        Self {
            name,
            ttl,
            class,
            rtype,
            rdata,
            origin,
        }
    }

    /// Convert to a wire-ready resource record
    pub fn to_dns_resource(&self, default_ttl: u32) -> Result<DNSResource> {
        if !name::is_valid_fqdn(&self.name) {
            return Err(ZoneError::InvalidDomainName(self.name.clone()));
        }

        let rdata = self.parse_rdata().map_err(|e| {
            ZoneError::InvalidRecord(format!("{} {}: {}", self.name, self.rtype.mnemonic(), e))
        })?;
        if rdata.len() > u16::MAX as usize {
            return Err(ZoneError::InvalidRecord(format!(
                "{} {}: RDATA too long",
                self.name,
                self.rtype.mnemonic()
            )));
        }

        Ok(DNSResource::new(
            &self.name,
            self.rtype,
            self.class,
            self.ttl.unwrap_or(default_ttl),
            rdata,
        ))
    }

    /// Parse rdata from text format to bytes
    fn parse_rdata(&self) -> std::result::Result<Vec<u8>, String> {
        let fields = split_rdata(&self.rdata)?;
        let field = |i: usize| -> std::result::Result<&str, String> {
            fields
                .get(i)
                .map(|f| f.as_str())
                .ok_or_else(|| format!("missing field {}", i + 1))
        };
        let expect_fields = |n: usize| -> std::result::Result<(), String> {
            if fields.len() == n {
                Ok(())
            } else {
                Err(format!("expected {} fields, got {}", n, fields.len()))
            }
        };

        let mut rdata = Vec::new();
        match self.rtype {
            DNSResourceType::A => {
                expect_fields(1)?;
                let addr: Ipv4Addr = field(0)?
                    .parse()
                    .map_err(|_| format!("invalid IPv4 address: {}", self.rdata))?;
                rdata.extend_from_slice(&addr.octets());
            }
            DNSResourceType::AAAA => {
                expect_fields(1)?;
                let addr: Ipv6Addr = field(0)?
                    .parse()
                    .map_err(|_| format!("invalid IPv6 address: {}", self.rdata))?;
                rdata.extend_from_slice(&addr.octets());
            }
            DNSResourceType::NS | DNSResourceType::CNAME | DNSResourceType::PTR => {
                expect_fields(1)?;
                rdata.extend(self.encode_domain_name(field(0)?)?);
            }
            DNSResourceType::SOA => {
                // mname rname serial refresh retry expire minimum
                expect_fields(7)?;
                rdata.extend(self.encode_domain_name(field(0)?)?);
                rdata.extend(self.encode_domain_name(field(1)?)?);
                for part in &fields[2..] {
                    let value = parse_soa_counter(part)?;
                    rdata.extend_from_slice(&value.to_be_bytes());
                }
            }
            DNSResourceType::MX => {
                expect_fields(2)?;
                let preference: u16 = field(0)?
                    .parse()
                    .map_err(|_| format!("invalid MX preference: {}", fields[0]))?;
                rdata.extend_from_slice(&preference.to_be_bytes());
                rdata.extend(self.encode_domain_name(field(1)?)?);
            }
            DNSResourceType::SRV => {
                // priority weight port target
                expect_fields(4)?;
                for part in &fields[..3] {
                    let value: u16 = part
                        .parse()
                        .map_err(|_| format!("invalid SRV field: {}", part))?;
                    rdata.extend_from_slice(&value.to_be_bytes());
                }
                rdata.extend(self.encode_domain_name(field(3)?)?);
            }
            DNSResourceType::TXT => {
                if fields.is_empty() {
                    return Err("TXT record requires at least one string".to_string());
                }
                for text in &fields {
                    // Strings longer than 255 octets are split
                    let bytes = text.as_bytes();
                    if bytes.is_empty() {
                        rdata.push(0);
                    }
                    for chunk in bytes.chunks(255) {
                        rdata.push(chunk.len() as u8);
                        rdata.extend_from_slice(chunk);
                    }
                }
            }
            DNSResourceType::CAA => {
                // flags tag value
                expect_fields(3)?;
                let flags: u8 = field(0)?
                    .parse()
                    .map_err(|_| format!("invalid CAA flags: {}", fields[0]))?;
                let tag = field(1)?;
                if tag.is_empty() || tag.len() > 255 {
                    return Err(format!("invalid CAA tag: {}", tag));
                }
                rdata.push(flags);
                rdata.push(tag.len() as u8);
                rdata.extend_from_slice(tag.as_bytes());
                rdata.extend_from_slice(field(2)?.as_bytes());
            }
            other => {
                return Err(format!("unsupported record type {}", other.mnemonic()));
            }
        }

        Ok(rdata)
    }

    /// Encode a possibly relative name found in the RDATA
    fn encode_domain_name(&self, target: &str) -> std::result::Result<Vec<u8>, String> {
        let qualified = qualify(target, &self.origin);
        if !name::is_valid_fqdn(&qualified) {
            return Err(format!("invalid domain name: {}", target));
        }
        encode_name(&qualified).map_err(|e| e.to_string())
    }
}

/// Qualify `name` against `origin`; `@` is the origin itself
pub fn qualify(name: &str, origin: &str) -> String {
    let name = name.trim();
    if name == "@" || name.is_empty() {
        name::fqdn(origin)
    } else if name.ends_with('.') {
        name::fqdn(name)
    } else if origin == "." {
        name::fqdn(name)
    } else {
        name::fqdn(&format!("{}.{}", name, origin))
    }
}

/// SOA timers accept the same unit suffixes as TTLs; the serial is numeric
fn parse_soa_counter(value: &str) -> std::result::Result<u32, String> {
    super::parser::parse_ttl(value).map_err(|_| format!("invalid SOA numeric value: {}", value))
}

/// Split presentation RDATA into fields, honouring quoted strings
fn split_rdata(rdata: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = rdata.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() || quoted {
                    fields.push(std::mem::take(&mut current));
                    quoted = false;
                }
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if !current.is_empty() || quoted {
        fields.push(current);
    }

    Ok(fields)
}
