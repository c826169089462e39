//! Handles to files opened over AFC.

use crate::ConduitError;

use super::opcode::AfcOpcode;
use super::AfcClient;

/// Writes are split into chunks of this size.
const MAX_TRANSFER: usize = 64 * 1024;

/// An open file on the device.
///
/// The handle is only valid on the stream that opened it. [`close`] consumes
/// the handle, so a closed file cannot be written to; every successful open
/// must be paired with exactly one close, including on error paths.
///
/// [`close`]: FileHandle::close
#[derive(Debug)]
pub struct FileHandle<'a> {
    pub(super) client: &'a mut AfcClient,
    pub(super) fd: u64,
}

impl FileHandle<'_> {
    /// The device-assigned descriptor.
    pub fn descriptor(&self) -> u64 {
        self.fd
    }

    /// Appends bytes to the file, one `FileWrite` packet per chunk.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ConduitError> {
        for chunk in bytes.chunks(MAX_TRANSFER) {
            self.client
                .request(
                    AfcOpcode::FileWrite,
                    self.fd.to_le_bytes().to_vec(),
                    chunk.to_vec(),
                )
                .await?;
        }
        Ok(())
    }

    /// Closes the file on the device, consuming the handle.
    pub async fn close(self) -> Result<(), ConduitError> {
        self.client
            .request(
                AfcOpcode::FileClose,
                self.fd.to_le_bytes().to_vec(),
                Vec::new(),
            )
            .await?;
        Ok(())
    }
}
