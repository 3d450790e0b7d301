//! Per-type field layouts of resource data.
//!
//! A descriptor lists, in wire order, the scalar or string fields that make up
//! the RDATA of a record type. Both the packet parser and the record cache are
//! driven by these tables instead of per-type code.

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::{
    ParseError,
    common::{labels_to_name, name_to_labels, read_name, write_name},
    enums::DNSResourceType,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    /// Domain name, possibly compressed on the wire
    Name,
    Ipv4,
    Ipv6,
    /// Length-prefixed character string
    CharString,
}

use FieldKind::*;

const ADDRESS: &[FieldKind] = &[Ipv4];
const ADDRESS6: &[FieldKind] = &[Ipv6];
const SINGLE_NAME: &[FieldKind] = &[Name];
const SOA: &[FieldKind] = &[Name, Name, U32, U32, U32, U32, U32];
const HINFO: &[FieldKind] = &[CharString, CharString];
const MX: &[FieldKind] = &[U16, Name];
const TXT: &[FieldKind] = &[CharString];
const SRV: &[FieldKind] = &[U16, U16, U16, Name];

/// Field layout for a record type, `None` when the type is not supported.
pub fn fields_for(rtype: DNSResourceType) -> Option<&'static [FieldKind]> {
    match rtype {
        DNSResourceType::A => Some(ADDRESS),
        DNSResourceType::NS
        | DNSResourceType::MD
        | DNSResourceType::MF
        | DNSResourceType::CNAME
        | DNSResourceType::PTR => Some(SINGLE_NAME),
        DNSResourceType::SOA => Some(SOA),
        DNSResourceType::HINFO => Some(HINFO),
        DNSResourceType::MX => Some(MX),
        DNSResourceType::TXT => Some(TXT),
        DNSResourceType::AAAA => Some(ADDRESS6),
        DNSResourceType::SRV => Some(SRV),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Name(String),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::U8(_) => U8,
            FieldValue::U16(_) => U16,
            FieldValue::U32(_) => U32,
            FieldValue::Name(_) => Name,
            FieldValue::Ipv4(_) => Ipv4,
            FieldValue::Ipv6(_) => Ipv6,
            FieldValue::Text(_) => CharString,
        }
    }

    /// Parse the printable form produced by `Display`.
    pub fn parse_text(kind: FieldKind, text: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidField(format!("{:?} from {:?}", kind, text));
        let value = match kind {
            U8 => FieldValue::U8(text.parse().map_err(|_| invalid())?),
            U16 => FieldValue::U16(text.parse().map_err(|_| invalid())?),
            U32 => FieldValue::U32(text.parse().map_err(|_| invalid())?),
            Name => FieldValue::Name(text.trim_end_matches('.').to_string()),
            Ipv4 => FieldValue::Ipv4(text.parse().map_err(|_| invalid())?),
            Ipv6 => FieldValue::Ipv6(text.parse().map_err(|_| invalid())?),
            CharString => {
                if text.len() > 255 {
                    return Err(invalid());
                }
                FieldValue::Text(text.to_string())
            }
        };
        Ok(value)
    }

    fn read(
        kind: FieldKind,
        reader: &mut BitReader<&[u8], BigEndian>,
        packet: &[u8],
    ) -> Result<Self, ParseError> {
        let value = match kind {
            U8 => FieldValue::U8(reader.read_var::<u8>(8)?),
            U16 => FieldValue::U16(reader.read_var::<u16>(16)?),
            U32 => FieldValue::U32(reader.read_var::<u32>(32)?),
            Name => FieldValue::Name(labels_to_name(&read_name(reader, packet)?)),
            Ipv4 => {
                let mut octets = [0u8; 4];
                reader.read_bytes(&mut octets)?;
                FieldValue::Ipv4(Ipv4Addr::from(octets))
            }
            Ipv6 => {
                let mut octets = [0u8; 16];
                reader.read_bytes(&mut octets)?;
                FieldValue::Ipv6(Ipv6Addr::from(octets))
            }
            CharString => {
                let len = reader.read_var::<u8>(8)?;
                let mut buf = vec![0u8; len as usize];
                reader.read_bytes(&mut buf)?;
                let text = String::from_utf8(buf).map_err(|_| {
                    ParseError::InvalidField("non UTF-8 character string".to_string())
                })?;
                FieldValue::Text(text)
            }
        };
        Ok(value)
    }

    pub(crate) fn write(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, BigEndian>,
    ) -> Result<(), ParseError> {
        match self {
            FieldValue::U8(v) => writer.write_var::<u8>(8, *v)?,
            FieldValue::U16(v) => writer.write_var::<u16>(16, *v)?,
            FieldValue::U32(v) => writer.write_var::<u32>(32, *v)?,
            FieldValue::Name(name) => write_name(writer, &name_to_labels(name))?,
            FieldValue::Ipv4(addr) => writer.write_bytes(&addr.octets())?,
            FieldValue::Ipv6(addr) => writer.write_bytes(&addr.octets())?,
            FieldValue::Text(text) => {
                let len = u8::try_from(text.len()).map_err(|_| {
                    ParseError::InvalidField("character string over 255 bytes".to_string())
                })?;
                writer.write_var::<u8>(8, len)?;
                writer.write_bytes(text.as_bytes())?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::U8(v) => write!(f, "{}", v),
            FieldValue::U16(v) => write!(f, "{}", v),
            FieldValue::U32(v) => write!(f, "{}", v),
            FieldValue::Name(name) => write!(f, "{}", name),
            FieldValue::Ipv4(addr) => write!(f, "{}", addr),
            FieldValue::Ipv6(addr) => write!(f, "{}", addr),
            FieldValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Decode RDATA into its fields. `packet` resolves compression pointers and
/// may be empty for self-contained data.
pub fn read_fields(
    kinds: &[FieldKind],
    rdata: &[u8],
    packet: &[u8],
) -> Result<Vec<FieldValue>, ParseError> {
    let mut reader = BitReader::<_, BigEndian>::new(rdata);
    let mut values = Vec::with_capacity(kinds.len());
    for kind in kinds {
        values.push(FieldValue::read(*kind, &mut reader, packet)?);
    }
    if reader.read_var::<u8>(8).is_ok() {
        return Err(ParseError::TrailingData);
    }
    Ok(values)
}

/// Encode fields as uncompressed RDATA.
pub fn write_fields(values: &[FieldValue]) -> Result<Vec<u8>, ParseError> {
    let mut buf = Vec::new();
    {
        let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);
        for value in values {
            value.write(&mut writer)?;
        }
    }
    Ok(buf)
}
