//! AFC (Apple File Conduit) client: the file-transfer service used to stage
//! application archives on the device before installation.

use std::collections::HashMap;

use log::debug;

use crate::{ConduitError, DeviceConnection};

pub mod errors;
pub mod file;
pub mod opcode;
pub mod packet;

use errors::AfcError;
use file::FileHandle;
use opcode::{AfcFileMode, AfcOpcode};
use packet::{AfcHeader, AfcPacket};

/// Client for one AFC service stream.
#[derive(Debug)]
pub struct AfcClient {
    conn: DeviceConnection,
    packet_num: u64,
}

impl AfcClient {
    pub fn new(conn: DeviceConnection) -> Self {
        Self { conn, packet_num: 0 }
    }

    /// Stats a path. The result maps attribute names (`st_size`, `st_ifmt`,
    /// ...) to their string values.
    ///
    /// A missing path surfaces as [`AfcError::ObjectNotFound`], which callers
    /// use to decide whether a directory still has to be created.
    pub async fn get_file_info(
        &mut self,
        path: &str,
    ) -> Result<HashMap<String, String>, ConduitError> {
        let res = self
            .request(AfcOpcode::GetFileInfo, path.as_bytes().to_vec(), Vec::new())
            .await?;
        Ok(parse_pairs(&res.payload))
    }

    /// Creates a directory. Creating a directory that already exists is not
    /// an error on the device side.
    pub async fn make_dir(&mut self, path: &str) -> Result<(), ConduitError> {
        self.request(AfcOpcode::MakeDir, path.as_bytes().to_vec(), Vec::new())
            .await?;
        Ok(())
    }

    /// Opens a file, returning the handle the device assigned.
    pub async fn open(
        &mut self,
        path: &str,
        mode: AfcFileMode,
    ) -> Result<FileHandle<'_>, ConduitError> {
        let mut data = (mode as u64).to_le_bytes().to_vec();
        data.extend_from_slice(path.as_bytes());

        let packet = self.next_packet(AfcOpcode::FileOpen, data, Vec::new());
        self.conn.send_raw(&packet.serialize()).await?;

        let res = AfcPacket::read(&mut self.conn).await?;
        match res.header.operation {
            AfcOpcode::FileOpenResult => {
                if res.data.len() < 8 {
                    return Err(ConduitError::UnexpectedResponse);
                }
                let fd = u64::from_le_bytes(res.data[..8].try_into().unwrap());
                debug!("opened {path} as fd {fd}");
                Ok(FileHandle { client: self, fd })
            }
            AfcOpcode::Status => match status_code(&res)? {
                AfcError::Success => Err(ConduitError::UnexpectedResponse),
                e => Err(e.into()),
            },
            _ => Err(ConduitError::UnexpectedResponse),
        }
    }

    /// Opens `path`, writes all of `bytes`, and closes the file again. Not
    /// atomic: a failed write leaves a partial file behind, but the handle is
    /// closed on every path.
    pub async fn write_file(
        &mut self,
        path: &str,
        bytes: &[u8],
        mode: AfcFileMode,
    ) -> Result<(), ConduitError> {
        let mut file = self.open(path, mode).await?;
        let written = file.write(bytes).await;
        let closed = file.close().await;
        written?;
        closed
    }

    /// Sends one packet and reads its response. A `Status` response with a
    /// non-success code becomes an error; success statuses and data-bearing
    /// responses pass through.
    pub(crate) async fn request(
        &mut self,
        operation: AfcOpcode,
        data: Vec<u8>,
        payload: Vec<u8>,
    ) -> Result<AfcPacket, ConduitError> {
        let packet = self.next_packet(operation, data, payload);
        self.conn.send_raw(&packet.serialize()).await?;

        let res = AfcPacket::read(&mut self.conn).await?;
        if res.header.operation == AfcOpcode::Status {
            match status_code(&res)? {
                AfcError::Success => {}
                e => return Err(e.into()),
            }
        }
        Ok(res)
    }

    fn next_packet(&mut self, operation: AfcOpcode, data: Vec<u8>, payload: Vec<u8>) -> AfcPacket {
        self.packet_num += 1;
        let this_len = AfcHeader::LEN + data.len() as u64;
        AfcPacket {
            header: AfcHeader {
                entire_len: this_len + payload.len() as u64,
                this_len,
                packet_num: self.packet_num,
                operation,
            },
            data,
            payload,
        }
    }
}

fn status_code(packet: &AfcPacket) -> Result<AfcError, ConduitError> {
    if packet.data.len() < 8 {
        return Err(ConduitError::UnexpectedResponse);
    }
    let code = u64::from_le_bytes(packet.data[..8].try_into().unwrap());
    Ok(AfcError::from(code))
}

/// Splits a NUL-separated key/value payload into a map. A trailing key with
/// no value is dropped.
fn parse_pairs(payload: &[u8]) -> HashMap<String, String> {
    let parts: Vec<&[u8]> = payload
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .collect();
    parts
        .chunks_exact(2)
        .map(|pair| {
            (
                String::from_utf8_lossy(pair[0]).into_owned(),
                String::from_utf8_lossy(pair[1]).into_owned(),
            )
        })
        .collect()
}
