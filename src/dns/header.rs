use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, WireWriter},
};

/// Size of the fixed message header in octets
pub const HEADER_SIZE: usize = 12;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DNSHeader {
    /// Header of a reply to `query`: id, opcode and RD are carried over
    pub fn reply_to(query: &DNSHeader) -> Self {
        Self {
            id: query.id,
            qr: true,
            opcode: query.opcode,
            rd: query.rd,
            ..Default::default()
        }
    }
}

impl PacketComponent for DNSHeader {
    fn write(&self, writer: &mut WireWriter) -> Result<(), ParseError> {
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(writer.buffer_mut());
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        _packet: &[u8],
    ) -> Result<(), ParseError> {
        self.id = reader.read_var::<u16>(16)?;
        self.qr = reader.read_var::<u8>(1)? == 1;
        self.opcode = reader.read_var::<u8>(4)?;
        self.aa = reader.read_var::<u8>(1)? == 1;
        self.tc = reader.read_var::<u8>(1)? == 1;
        self.rd = reader.read_var::<u8>(1)? == 1;
        self.ra = reader.read_var::<u8>(1)? == 1;
        self.z = reader.read_var::<u8>(3)?;
        self.rcode = reader.read_var::<u8>(4)?;
        self.qdcount = reader.read_var::<u16>(16)?;
        self.ancount = reader.read_var::<u16>(16)?;
        self.nscount = reader.read_var::<u16>(16)?;
        self.arcount = reader.read_var::<u16>(16)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let header = DNSHeader {
            id: 0xBEEF,
            qr: true,
            opcode: 4,
            aa: true,
            rcode: 3,
            qdcount: 1,
            ..Default::default()
        };

        let mut writer = WireWriter::new(false);
        header.write(&mut writer).unwrap();
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &[0xBE, 0xEF]);
        // QR=1, opcode=4, AA=1 -> 1010 0100
        assert_eq!(bytes[2], 0b1010_0100);
        assert_eq!(bytes[3], 0x03);
    }

    #[test]
    fn test_reply_to_copies_identity() {
        let query = DNSHeader {
            id: 7,
            rd: true,
            opcode: 0,
            ..Default::default()
        };
        let reply = DNSHeader::reply_to(&query);
        assert_eq!(reply.id, 7);
        assert!(reply.qr);
        assert!(reply.rd);
        assert!(!reply.aa);
    }
}
