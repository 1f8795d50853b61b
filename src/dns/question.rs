use bitstream_io::{BitRead, BitReader, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, WireWriter},
    enums::{DNSResourceClass, DNSResourceType},
    name,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    pub fn new(qname: &str, qtype: DNSResourceType, qclass: DNSResourceClass) -> Self {
        Self {
            labels: name::to_labels(qname),
            qtype,
            qclass,
        }
    }

    /// Lowercase FQDN of the question name
    pub fn qname(&self) -> String {
        name::from_labels(&self.labels)
    }
}

impl PacketComponent for DNSQuestion {
    fn write(&self, writer: &mut WireWriter) -> Result<(), ParseError> {
        writer.put_name(&self.labels)?;
        writer.put_u16(self.qtype.into());
        writer.put_u16(self.qclass.into());
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError> {
        let labels = self.read_labels(reader, packet)?;
        let qtype = reader.read_var::<u16>(16)?.into();
        let qclass = reader.read_var::<u16>(16)?.into();
        *self = DNSQuestion {
            labels,
            qtype,
            qclass,
        };
        Ok(())
    }
}
