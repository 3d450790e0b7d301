use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Compression pointers followed before a name is rejected as looping.
const MAX_POINTER_HOPS: usize = 32;

/// Longest encoded domain name (RFC 1035 §2.3.4).
pub const MAX_NAME_LENGTH: usize = 255;

pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    /// Read the component; `packet` is the whole message, used to follow
    /// compression pointers.
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
        read_name(reader, packet)
    }

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        write_name(writer, labels)
    }
}

/// Read a possibly compressed name from the stream. The returned labels end
/// with an empty terminator label.
pub fn read_name<E: Endianness>(
    reader: &mut BitReader<&[u8], E>,
    packet: &[u8],
) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    let mut encoded_len = 1;
    loop {
        let label_len = reader.read_var::<u8>(8)?;
        if label_len == 0 {
            labels.push(String::new());
            break;
        }
        if label_len & 0xC0 == 0xC0 {
            let low = reader.read_var::<u8>(8)?;
            let target = (((label_len & 0x3F) as usize) << 8) | low as usize;
            let tail = read_name_at(packet, target, MAX_POINTER_HOPS)?;
            encoded_len += tail.iter().map(|l| l.len() + 1).sum::<usize>();
            labels.extend(tail);
            break;
        }
        if label_len & 0xC0 != 0 {
            return Err(ParseError::InvalidLabel);
        }
        let mut buf = vec![0; label_len as usize];
        reader.read_bytes(&mut buf)?;
        let label = String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?;
        encoded_len += label.len() + 1;
        labels.push(label);
    }

    if encoded_len > MAX_NAME_LENGTH {
        return Err(ParseError::NameTooLong);
    }
    Ok(labels)
}

/// Read a name starting at an absolute offset of the message.
fn read_name_at(packet: &[u8], mut offset: usize, hops: usize) -> Result<Vec<String>, ParseError> {
    let mut labels = Vec::new();
    loop {
        let label_len = *packet.get(offset).ok_or(ParseError::InvalidLabel)? as usize;
        if label_len == 0 {
            labels.push(String::new());
            return Ok(labels);
        }
        if label_len & 0xC0 == 0xC0 {
            if hops == 0 {
                return Err(ParseError::CompressionLoop);
            }
            let low = *packet.get(offset + 1).ok_or(ParseError::InvalidLabel)? as usize;
            let target = ((label_len & 0x3F) << 8) | low;
            labels.extend(read_name_at(packet, target, hops - 1)?);
            return Ok(labels);
        }
        if label_len & 0xC0 != 0 {
            return Err(ParseError::InvalidLabel);
        }
        let bytes = packet
            .get(offset + 1..offset + 1 + label_len)
            .ok_or(ParseError::InvalidLabel)?;
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        offset += 1 + label_len;
    }
}

/// Write labels uncompressed. A terminator is added when the labels lack one.
pub fn write_name<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    labels: &[String],
) -> Result<(), ParseError> {
    for label in labels.iter().filter(|l| !l.is_empty()) {
        if label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

/// Dotted text form of a label list, without the trailing dot.
pub fn labels_to_name(labels: &[String]) -> String {
    labels
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Label list (with terminator) for a dotted name; a trailing dot is allowed.
pub fn name_to_labels(name: &str) -> Vec<String> {
    let mut labels: Vec<String> = name
        .split('.')
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();
    labels.push(String::new());
    labels
}
