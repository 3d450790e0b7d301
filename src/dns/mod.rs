pub mod common;
pub mod descriptor;
pub mod enums;
pub mod header;
pub mod question;
pub mod resource;

use bitstream_io::{BigEndian, BitReader, BitWriter};
use common::PacketComponent;
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("DNS name too long")]
    NameTooLong,
    #[error("Compression pointer loop")]
    CompressionLoop,
    #[error("Invalid field: {0}")]
    InvalidField(String),
    #[error("Trailing bytes after resource data")]
    TrailingData,
    #[error("Unsupported record type: {0}")]
    Unsupported(String),
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::InvalidBitStream(e.to_string())
    }
}

impl DNSPacket {
    pub fn valid(&self) -> bool {
        if self.header.qdcount as usize != self.questions.len() {
            return false;
        }
        if self.header.ancount as usize != self.answers.len() {
            return false;
        }
        if self.header.nscount as usize != self.authorities.len() {
            return false;
        }
        if self.header.arcount as usize != self.resources.len() {
            return false;
        }

        for question in &self.questions {
            if question.labels.is_empty() {
                return false;
            }

            // DNS names can't exceed 255 octets
            let total_length: usize = question.labels.iter().map(|l| l.len() + 1).sum();
            if total_length > common::MAX_NAME_LENGTH {
                return false;
            }

            if question.labels.iter().any(|label| label.len() > 63) {
                return false;
            }
        }

        true
    }

    /// Build a single-question query.
    pub fn query(id: u16, question: DNSQuestion) -> Self {
        let mut packet = DNSPacket::default();
        packet.header.id = id;
        packet.header.rd = true;
        packet.header.qdcount = 1;
        packet.questions.push(question);
        packet
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        trace!("Parsing DNS packet, size: {} bytes", buf.len());
        if buf.len() < header::HEADER_LENGTH {
            return Err(ParseError::InvalidHeader);
        }
        let mut reader = BitReader::<_, BigEndian>::new(buf);
        let mut packet = DNSPacket::default();
        packet.header.read(&mut reader, buf)?;
        debug!(
            "Parsed DNS header: id={}, qr={}, opcode={}, questions={}, answers={}",
            packet.header.id,
            packet.header.qr,
            packet.header.opcode,
            packet.header.qdcount,
            packet.header.ancount
        );

        for _ in 0..packet.header.qdcount {
            let mut question = DNSQuestion::default();
            question.read(&mut reader, buf)?;
            packet.questions.push(question);
        }

        for _ in 0..packet.header.ancount {
            let mut answer = DNSResource::default();
            answer.read(&mut reader, buf)?;
            packet.answers.push(answer);
        }

        for _ in 0..packet.header.nscount {
            let mut authority = DNSResource::default();
            authority.read(&mut reader, buf)?;
            packet.authorities.push(authority);
        }

        for _ in 0..packet.header.arcount {
            let mut resource = DNSResource::default();
            resource.read(&mut reader, buf)?;
            packet.resources.push(resource);
        }

        Ok(packet)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::new();
        {
            let mut writer: BitWriter<&mut Vec<u8>, BigEndian> = BitWriter::new(&mut buf);

            let mut header = self.header.clone();
            header.qdcount = self.questions.len() as u16;
            header.ancount = self.answers.len() as u16;
            header.nscount = self.authorities.len() as u16;
            header.arcount = self.resources.len() as u16;
            header.write(&mut writer)?;

            for question in self.questions.iter() {
                question.write(&mut writer)?;
            }
            for answer in self.answers.iter() {
                answer.write(&mut writer)?;
            }
            for authority in self.authorities.iter() {
                authority.write(&mut writer)?;
            }
            for resource in self.resources.iter() {
                resource.write(&mut writer)?;
            }
        }

        Ok(buf)
    }

    /// Response skeleton for this query: same id and questions, no records.
    pub fn generate_response(&self) -> Self {
        let mut packet = DNSPacket {
            header: self.header.clone(),
            questions: self.questions.clone(),
            ..Default::default()
        };
        packet.header.qr = true;
        packet.header.ra = true;
        packet.header.ancount = 0;
        packet.header.nscount = 0;
        packet.header.arcount = 0;
        packet
    }
}
