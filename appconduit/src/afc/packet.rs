//! The AFC packet format: a 40-byte little-endian header, a small data
//! section, and an optional payload section.
//!
//! The data section is parsed eagerly (it carries status codes and file
//! handles); the payload is only read when the header says one is present,
//! i.e. when `entire_len` exceeds `this_len`.

use log::debug;

use crate::{ConduitError, DeviceConnection};

use super::opcode::AfcOpcode;

/// Literal ASCII magic fronting every packet.
pub const MAGIC: &[u8; 8] = b"CFA6LPAA";

#[derive(Clone, Debug)]
pub struct AfcHeader {
    /// Header + data + payload, in bytes.
    pub entire_len: u64,
    /// Header + data only.
    pub this_len: u64,
    /// Incremented per outbound packet; echoed values are not checked.
    pub packet_num: u64,
    pub operation: AfcOpcode,
}

#[derive(Clone, Debug)]
pub struct AfcPacket {
    pub header: AfcHeader,
    pub data: Vec<u8>,
    pub payload: Vec<u8>,
}

impl AfcHeader {
    pub const LEN: u64 = 40;

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN as usize);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.entire_len.to_le_bytes());
        buf.extend_from_slice(&self.this_len.to_le_bytes());
        buf.extend_from_slice(&self.packet_num.to_le_bytes());
        buf.extend_from_slice(&(self.operation as u64).to_le_bytes());
        buf
    }

    pub async fn read(conn: &mut DeviceConnection) -> Result<Self, ConduitError> {
        let bytes = conn.read_raw(Self::LEN as usize).await?;
        if &bytes[..8] != MAGIC {
            return Err(ConduitError::InvalidAfcMagic);
        }

        let mut words = bytes[8..].chunks_exact(8);
        let entire_len = u64::from_le_bytes(words.next().unwrap().try_into().unwrap());
        let this_len = u64::from_le_bytes(words.next().unwrap().try_into().unwrap());
        let packet_num = u64::from_le_bytes(words.next().unwrap().try_into().unwrap());
        let operation = u64::from_le_bytes(words.next().unwrap().try_into().unwrap());

        if this_len < Self::LEN || entire_len < this_len {
            return Err(ConduitError::UnexpectedResponse);
        }

        Ok(Self {
            entire_len,
            this_len,
            packet_num,
            operation: AfcOpcode::try_from(operation).map_err(ConduitError::UnknownAfcOpcode)?,
        })
    }
}

impl AfcPacket {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub async fn read(conn: &mut DeviceConnection) -> Result<Self, ConduitError> {
        let header = AfcHeader::read(conn).await?;
        debug!("afc header: {header:?}");

        let data = conn
            .read_raw((header.this_len - AfcHeader::LEN) as usize)
            .await?;
        let payload = if header.entire_len == header.this_len {
            Vec::new()
        } else {
            conn.read_raw((header.entire_len - header.this_len) as usize)
                .await?
        };

        Ok(Self {
            header,
            data,
            payload,
        })
    }
}
