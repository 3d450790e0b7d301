use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{ParseError, common::PacketComponent};

/// Size of the fixed DNS message header.
pub const HEADER_LENGTH: usize = 12;

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
    /// The second header word: QR, OPCODE, AA, TC, RD, RA, Z and RCODE.
    pub fn flags(&self) -> u16 {
        (self.qr as u16) << 15
            | ((self.opcode & 0x0F) as u16) << 11
            | (self.aa as u16) << 10
            | (self.tc as u16) << 9
            | (self.rd as u16) << 8
            | (self.ra as u16) << 7
            | ((self.z & 0x07) as u16) << 4
            | (self.rcode & 0x0F) as u16
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.qr = flags & 0x8000 != 0;
        self.opcode = ((flags >> 11) & 0x0F) as u8;
        self.aa = flags & 0x0400 != 0;
        self.tc = flags & 0x0200 != 0;
        self.rd = flags & 0x0100 != 0;
        self.ra = flags & 0x0080 != 0;
        self.z = ((flags >> 4) & 0x07) as u8;
        self.rcode = (flags & 0x0F) as u8;
    }
}

impl PacketComponent for DNSHeader {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        for word in [
            self.id,
            self.flags(),
            self.qdcount,
            self.ancount,
            self.nscount,
            self.arcount,
        ] {
            writer.write_var::<u16>(16, word)?;
        }
        Ok(())
    }

    fn read<E: Endianness>(
        &mut self,
        reader: &mut BitReader<&[u8], E>,
        _packet: &[u8],
    ) -> Result<(), ParseError> {
        let mut words = [0u16; 6];
        for word in words.iter_mut() {
            *word = reader.read_var::<u16>(16)?;
        }
        let [id, flags, qdcount, ancount, nscount, arcount] = words;
        self.id = id;
        self.set_flags(flags);
        self.qdcount = qdcount;
        self.ancount = ancount;
        self.nscount = nscount;
        self.arcount = arcount;
        Ok(())
    }
}
