use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, labels_to_name, name_to_labels},
    descriptor::{FieldKind, FieldValue, fields_for, read_fields, write_fields},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdlength: u16,
    /// Resource data; names inside it are always stored uncompressed
    pub rdata: Vec<u8>,
}

impl DNSResource {
    /// Build a record from its decoded fields.
    pub fn from_fields(
        name: &str,
        rtype: DNSResourceType,
        rclass: DNSResourceClass,
        ttl: u32,
        fields: &[FieldValue],
    ) -> Result<Self, ParseError> {
        let rdata = write_fields(fields)?;
        let rdlength = u16::try_from(rdata.len()).map_err(|_| ParseError::TrailingData)?;
        Ok(Self {
            labels: name_to_labels(name),
            rtype,
            rclass,
            ttl,
            rdlength,
            rdata,
        })
    }

    pub fn name(&self) -> String {
        labels_to_name(&self.labels)
    }

    /// Decoded RDATA fields according to the type's descriptor.
    pub fn fields(&self) -> Result<Vec<FieldValue>, ParseError> {
        let kinds = fields_for(self.rtype)
            .ok_or_else(|| ParseError::Unsupported(format!("{:?}", self.rtype)))?;
        read_fields(kinds, &self.rdata, &[])
    }

    /// Rewrite RDATA holding compressed names into self-contained form.
    fn expand_names(&mut self, packet: &[u8]) {
        let Some(kinds) = fields_for(self.rtype) else {
            return;
        };
        if !kinds.contains(&FieldKind::Name) {
            return;
        }
        let expanded =
            read_fields(kinds, &self.rdata, packet).and_then(|values| write_fields(&values));
        if let Ok(rdata) = expanded {
            if let Ok(rdlength) = u16::try_from(rdata.len()) {
                self.rdata = rdata;
                self.rdlength = rdlength;
            }
        }
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, self.rdata.len() as u16)?;
        writer.write_bytes(&self.rdata)?;
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
        self.expand_names(packet);

        Ok(())
    }
}
