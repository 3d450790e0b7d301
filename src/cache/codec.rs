//! Stored record format.
//!
//! A blob is the index key followed by the printable form of each RDATA field:
//!
//! ```text
//! 0xFF name 0x01 type 0x01 class 0x00 (field 0x00)* 0x0A
//! ```
//!
//! Only the per-type field descriptor is needed to turn a blob back into a
//! wire-format resource record.

use crate::dns::{
    common::{name_to_labels, write_name},
    descriptor::{FieldValue, fields_for},
    enums::{DNSResourceClass, DNSResourceType},
    resource::DNSResource,
};
use crate::error::{CacheError, Result};
use bitstream_io::{BigEndian, BitWrite, BitWriter};

pub const BLOB_START: u8 = 0xFF;
pub const BLOB_END: u8 = 0x0A;
pub const SEPARATOR: u8 = 0x01;
pub const TOMBSTONE: u8 = 0xFD;

/// Largest blob accepted for storage.
pub const MAX_BLOB_LENGTH: usize = 1024;

/// A blob turned back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub name: String,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub fields: Vec<FieldValue>,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Index key of an RRset: `name 0x01 type 0x01 class 0x00`.
pub fn cache_key(name: &str, rtype: DNSResourceType, rclass: DNSResourceClass) -> Vec<u8> {
    let name = normalize(name);
    let mut key = Vec::with_capacity(name.len() + 14);
    key.extend_from_slice(name.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(u16::from(rtype).to_string().as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(u16::from(rclass).to_string().as_bytes());
    key.push(0);
    key
}

/// Encode a record as a blob.
pub fn encode(record: &DNSResource) -> Result<Vec<u8>> {
    let name = record.name();
    if name.bytes().any(|b| b == 0 || b == SEPARATOR) {
        return Err(CacheError::Unrepresentable(format!(
            "owner name {:?}",
            name
        )));
    }
    if fields_for(record.rtype).is_none() {
        return Err(CacheError::Unrepresentable(format!(
            "type {:?}",
            record.rtype
        )));
    }
    let fields = record
        .fields()
        .map_err(|e| CacheError::Unrepresentable(e.to_string()))?;
    encode_fields(&name, record.rtype, record.rclass, &fields)
}

pub fn encode_fields(
    name: &str,
    rtype: DNSResourceType,
    rclass: DNSResourceClass,
    fields: &[FieldValue],
) -> Result<Vec<u8>> {
    let mut blob = Vec::with_capacity(128);
    blob.push(BLOB_START);
    blob.extend_from_slice(&cache_key(name, rtype, rclass));
    for field in fields {
        let text = field.to_string();
        if text.bytes().any(|b| b == 0) {
            return Err(CacheError::Unrepresentable(format!(
                "{:?} field with NUL",
                field.kind()
            )));
        }
        blob.extend_from_slice(text.as_bytes());
        blob.push(0);
    }
    blob.push(BLOB_END);

    if blob.len() > MAX_BLOB_LENGTH {
        return Err(CacheError::RecordTooLarge {
            len: blob.len(),
            limit: MAX_BLOB_LENGTH,
        });
    }
    Ok(blob)
}

/// Split a stored blob into its parts; `offset` only labels errors.
pub fn decode(blob: &[u8], offset: usize) -> Result<StoredRecord> {
    let malformed = || CacheError::MalformedBlob(offset);

    let body = match blob {
        [BLOB_START, body @ .., BLOB_END] => body,
        _ => return Err(malformed()),
    };
    let mut parts = body.split(|b| *b == 0);

    let key = parts.next().ok_or_else(malformed)?;
    let mut key_parts = key.split(|b| *b == SEPARATOR);
    let (Some(name), Some(rtype), Some(rclass), None) = (
        key_parts.next(),
        key_parts.next(),
        key_parts.next(),
        key_parts.next(),
    ) else {
        return Err(malformed());
    };
    let number = |bytes: &[u8]| -> Result<u16> {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)
    };
    let name = String::from_utf8(name.to_vec()).map_err(|_| malformed())?;
    let rtype = DNSResourceType::from(number(rtype)?);
    let rclass = DNSResourceClass::from(number(rclass)?);

    let kinds = fields_for(rtype).ok_or_else(malformed)?;
    let mut fields = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let text = parts.next().ok_or_else(malformed)?;
        let text = std::str::from_utf8(text).map_err(|_| malformed())?;
        fields.push(FieldValue::parse_text(*kind, text).map_err(|_| malformed())?);
    }
    // every field is NUL terminated, so one empty remainder is left
    match (parts.next(), parts.next()) {
        (Some([]), None) => {}
        _ => return Err(malformed()),
    }

    Ok(StoredRecord {
        name,
        rtype,
        rclass,
        fields,
    })
}

impl StoredRecord {
    pub fn to_resource(&self, ttl: u32) -> Result<DNSResource> {
        DNSResource::from_fields(&self.name, self.rtype, self.rclass, ttl, &self.fields)
            .map_err(|e| CacheError::Unrepresentable(e.to_string()))
    }

    /// Append the wire form of this record with the given TTL to `out`.
    pub fn write_wire(&self, ttl: u32, out: &mut Vec<u8>) -> Result<()> {
        let wire_error = |e: crate::dns::ParseError| CacheError::Unrepresentable(e.to_string());

        let start = out.len();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut *out);
            write_name(&mut writer, &name_to_labels(&self.name)).map_err(wire_error)?;
            writer.write_var::<u16>(16, self.rtype.into())?;
            writer.write_var::<u16>(16, self.rclass.into())?;
            writer.write_var::<u32>(32, ttl)?;
            writer.write_var::<u16>(16, 0)?;
        }
        let rdata_start = out.len();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut *out);
            for field in &self.fields {
                field.write(&mut writer).map_err(wire_error)?;
            }
        }

        let len = out.len() - rdata_start;
        let Ok(rdlength) = u16::try_from(len) else {
            out.truncate(start);
            return Err(CacheError::RecordTooLarge {
                len,
                limit: u16::MAX as usize,
            });
        };
        out[rdata_start - 2..rdata_start].copy_from_slice(&rdlength.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::common::PacketComponent;
    use crate::dns::descriptor::FieldKind;
    use bitstream_io::BitReader;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn record(name: &str, rtype: DNSResourceType, fields: &[FieldValue]) -> DNSResource {
        DNSResource::from_fields(name, rtype, DNSResourceClass::IN, 300, fields).unwrap()
    }

    #[test]
    fn test_blob_layout() {
        let a = record(
            "Example.COM.",
            DNSResourceType::A,
            &[FieldValue::Ipv4(Ipv4Addr::new(192, 0, 2, 7))],
        );
        let blob = encode(&a).unwrap();
        assert_eq!(
            blob,
            b"\xFFexample.com\x011\x011\x00192.0.2.7\x00\x0A".to_vec()
        );
        assert_eq!(
            &blob[1..=cache_key("example.com", DNSResourceType::A, DNSResourceClass::IN).len()],
            cache_key("EXAMPLE.com.", DNSResourceType::A, DNSResourceClass::IN).as_slice()
        );
    }

    #[test]
    fn test_every_field_kind_survives_storage() {
        let cases = vec![
            record(
                "a.test",
                DNSResourceType::A,
                &[FieldValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1))],
            ),
            record(
                "a.test",
                DNSResourceType::AAAA,
                &[FieldValue::Ipv6(Ipv6Addr::LOCALHOST)],
            ),
            record(
                "a.test",
                DNSResourceType::MX,
                &[FieldValue::U16(65535), FieldValue::Name("mx.a.test".into())],
            ),
            record(
                "a.test",
                DNSResourceType::SOA,
                &[
                    FieldValue::Name("ns.a.test".into()),
                    FieldValue::Name("admin.a.test".into()),
                    FieldValue::U32(u32::MAX),
                    FieldValue::U32(7200),
                    FieldValue::U32(900),
                    FieldValue::U32(1_209_600),
                    FieldValue::U32(0),
                ],
            ),
            record(
                "a.test",
                DNSResourceType::TXT,
                &[FieldValue::Text("v=spf1 -all".into())],
            ),
            record(
                "a.test",
                DNSResourceType::HINFO,
                &[
                    FieldValue::Text("".into()),
                    FieldValue::Text("Linux".into()),
                ],
            ),
            record(
                "_sip._tcp.a.test",
                DNSResourceType::SRV,
                &[
                    FieldValue::U16(1),
                    FieldValue::U16(2),
                    FieldValue::U16(5060),
                    FieldValue::Name("sip.a.test".into()),
                ],
            ),
        ];

        for original in cases {
            let blob = encode(&original).unwrap();
            let stored = decode(&blob, 0).unwrap();
            assert_eq!(stored.to_resource(300).unwrap(), original);

            let mut wire = Vec::new();
            stored.write_wire(300, &mut wire).unwrap();
            let mut reader = BitReader::<_, BigEndian>::new(&wire[..]);
            let mut parsed = DNSResource::default();
            parsed.read(&mut reader, &wire).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_u8_field_text() {
        let stored = StoredRecord {
            name: "x.test".into(),
            rtype: DNSResourceType::A,
            rclass: DNSResourceClass::IN,
            fields: vec![FieldValue::U8(200)],
        };
        assert_eq!(
            FieldValue::parse_text(FieldKind::U8, &stored.fields[0].to_string()).unwrap(),
            FieldValue::U8(200)
        );
    }

    #[test]
    fn test_unrepresentable_and_oversized() {
        let nul = record(
            "a.test",
            DNSResourceType::TXT,
            &[FieldValue::Text("a\0b".into())],
        );
        assert!(matches!(encode(&nul), Err(CacheError::Unrepresentable(_))));

        let sep = record(
            "a\u{1}b.test",
            DNSResourceType::A,
            &[FieldValue::Ipv4(Ipv4Addr::LOCALHOST)],
        );
        assert!(matches!(encode(&sep), Err(CacheError::Unrepresentable(_))));

        let long = "x".repeat(255);
        let fields: Vec<_> = (0..5).map(|_| FieldValue::Text(long.clone())).collect();
        assert!(matches!(
            encode_fields(
                "a.test",
                DNSResourceType::TXT,
                DNSResourceClass::IN,
                &fields
            ),
            Err(CacheError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_damage() {
        let blob = encode(&record(
            "a.test",
            DNSResourceType::A,
            &[FieldValue::Ipv4(Ipv4Addr::LOCALHOST)],
        ))
        .unwrap();

        let mut tombstoned = blob.clone();
        tombstoned[0] = TOMBSTONE;
        assert!(matches!(
            decode(&tombstoned, 128),
            Err(CacheError::MalformedBlob(128))
        ));
        assert!(decode(&blob[..blob.len() - 1], 0).is_err());

        let mut extra = blob[..blob.len() - 1].to_vec();
        extra.extend_from_slice(b"1.2.3.4\0\x0A");
        assert!(decode(&extra, 0).is_err());
    }
}
