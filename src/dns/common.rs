use std::collections::HashMap;

use bitstream_io::{BitRead, BitReader, Endianness};
use bytes::BufMut;

use super::{ParseError, name::MAX_LABEL_LENGTH, name::MAX_NAME_LENGTH};

/// Upper bound on compression pointers followed while decoding one name
const MAX_POINTER_JUMPS: usize = 64;

/// Highest offset a compression pointer can address
const MAX_POINTER_OFFSET: usize = 0x3FFF;

pub trait PacketComponent {
    fn write(&self, writer: &mut WireWriter) -> Result<(), ParseError>;

    /// Read the component; `packet` is the whole message so compression
    /// pointers can be followed.
    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<(), ParseError>;

    fn read_labels<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<Vec<String>, ParseError> {
        let mut labels = Vec::new();
        let mut wire_len = 1;

        loop {
            let label_len = reader.read_var::<u8>(8)?;
            if label_len == 0 {
                break;
            }

            if label_len & 0xC0 == 0xC0 {
                let low = reader.read_var::<u8>(8)?;
                let offset = (((label_len & 0x3F) as usize) << 8) | low as usize;
                let (tail, _) = decode_name(packet, offset, packet)?;
                for label in tail {
                    wire_len += label.len() + 1;
                    labels.push(label);
                }
                break;
            }

            if label_len & 0xC0 != 0 {
                return Err(ParseError::InvalidLabel);
            }

            let mut buf = vec![0; label_len as usize];
            reader.read_bytes(&mut buf)?;
            let label = String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?;
            wire_len += label.len() + 1;
            labels.push(label);
        }

        if wire_len > MAX_NAME_LENGTH {
            return Err(ParseError::InvalidLabel);
        }

        Ok(labels)
    }
}

/// Decode a possibly compressed name starting at `pos` in `data`.
///
/// Pointers are resolved against `packet`. Returns the labels and the
/// position in `data` just past the name.
pub fn decode_name(
    data: &[u8],
    mut pos: usize,
    packet: &[u8],
) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut source = data;
    let mut end = None;
    let mut jumps = 0;
    let mut wire_len = 1;

    loop {
        let len = *source.get(pos).ok_or(ParseError::InvalidLabel)? as usize;

        if len & 0xC0 == 0xC0 {
            let low = *source.get(pos + 1).ok_or(ParseError::InvalidLabel)? as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::InvalidLabel);
            }
            pos = ((len & 0x3F) << 8) | low;
            source = packet;
            continue;
        }

        if len & 0xC0 != 0 {
            return Err(ParseError::InvalidLabel);
        }

        if len == 0 {
            if end.is_none() {
                end = Some(pos + 1);
            }
            break;
        }

        let bytes = source
            .get(pos + 1..pos + 1 + len)
            .ok_or(ParseError::InvalidLabel)?;
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        wire_len += len + 1;
        if wire_len > MAX_NAME_LENGTH {
            return Err(ParseError::InvalidLabel);
        }
        labels.push(label);
        pos += 1 + len;
    }

    Ok((labels, end.unwrap_or(pos)))
}

/// Encode a name without compression, as stored inside RDATA
pub fn encode_name(name: &str) -> Result<Vec<u8>, ParseError> {
    let mut encoded = Vec::with_capacity(name.len() + 2);

    for label in name.trim_end_matches('.').split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > MAX_LABEL_LENGTH {
            return Err(ParseError::InvalidLabel);
        }
        encoded.push(label.len() as u8);
        encoded.extend_from_slice(label.as_bytes());
    }
    encoded.push(0);

    if encoded.len() > MAX_NAME_LENGTH {
        return Err(ParseError::InvalidLabel);
    }
    Ok(encoded)
}

/// Output buffer for one message, with optional name compression
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
    names: HashMap<String, u16>,
    compress: bool,
}

impl WireWriter {
    pub fn new(compress: bool) -> Self {
        Self {
            buf: Vec::with_capacity(512),
            names: HashMap::new(),
            compress,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    pub fn put_slice(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Write a name, replacing a previously written suffix with a pointer
    pub fn put_name(&mut self, labels: &[String]) -> Result<(), ParseError> {
        let labels: Vec<&String> = labels.iter().filter(|l| !l.is_empty()).collect();

        for i in 0..labels.len() {
            if self.compress {
                let suffix = labels[i..]
                    .iter()
                    .map(|l| l.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(".");

                if let Some(&offset) = self.names.get(&suffix) {
                    self.put_u16(0xC000 | offset);
                    return Ok(());
                }
                if self.buf.len() <= MAX_POINTER_OFFSET {
                    self.names.insert(suffix, self.buf.len() as u16);
                }
            }

            let label = labels[i];
            if label.len() > MAX_LABEL_LENGTH {
                return Err(ParseError::InvalidLabel);
            }
            self.put_u8(label.len() as u8);
            self.put_slice(label.as_bytes());
        }

        self.put_u8(0);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
