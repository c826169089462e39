#![doc = include_str!("../README.md")]

pub mod afc;
pub mod bundle;
pub mod installation_proxy;
pub mod lockdown;
pub mod ops;
pub mod pair_record;
mod tls;
pub mod usbmuxd;

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pair_record::PairRecord;

/// Name this client identifies itself with in protocol messages.
pub const PROGRAM_NAME: &str = "appconduit";
/// Version string sent alongside [`PROGRAM_NAME`].
pub const CLIENT_VERSION: &str = "appconduit-0.1.0";

/// Everything a device communication socket must be able to do.
///
/// Unix sockets, TCP sockets and TLS-wrapped streams all qualify, which is
/// what lets a connection be upgraded to TLS without its users noticing.
pub trait ReadWrite: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + std::fmt::Debug> ReadWrite for T {}

/// A hijacked stream to the device, framed as 4-byte big-endian length
/// prefixes followed by XML property lists.
///
/// This is the framing spoken by lockdown and by the installation proxy. The
/// AFC client reuses the raw byte path and layers its own packet format on
/// top. After [`DeviceConnection::enable_tls`] every read and write goes
/// through the TLS layer; the framing itself is unchanged.
///
/// The label names the stream in log output, telling the control stream and
/// the per-service streams apart.
#[derive(Debug)]
pub struct DeviceConnection {
    socket: Option<Box<dyn ReadWrite>>,
    label: String,
}

impl DeviceConnection {
    pub fn new(socket: Box<dyn ReadWrite>, label: impl Into<String>) -> Self {
        Self {
            socket: Some(socket),
            label: label.into(),
        }
    }

    /// The label this stream was created with.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn socket(&mut self) -> Result<&mut Box<dyn ReadWrite>, ConduitError> {
        self.socket
            .as_mut()
            .ok_or(ConduitError::NoEstablishedConnection)
    }

    /// Sends one length-prefixed XML plist message.
    pub async fn send_message<T: Serialize>(&mut self, message: &T) -> Result<(), ConduitError> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, message)?;
        debug!("({}) >> {}", self.label, String::from_utf8_lossy(&body));

        let socket = self.socket()?;
        socket.write_all(&(body.len() as u32).to_be_bytes()).await?;
        socket.write_all(&body).await?;
        socket.flush().await?;
        Ok(())
    }

    /// Reads one message and deserializes it into `T`.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, ConduitError> {
        let body = self.read_frame().await?;
        Ok(plist::from_bytes(&body)?)
    }

    /// Reads one message as a plain plist dictionary.
    pub async fn read_plist(&mut self) -> Result<plist::Dictionary, ConduitError> {
        let body = self.read_frame().await?;
        Ok(plist::from_bytes(&body)?)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ConduitError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or(ConduitError::NoEstablishedConnection)?;
        let mut len = [0u8; 4];
        socket.read_exact(&mut len).await?;
        let len = u32::from_be_bytes(len);

        let mut body = vec![0; len as usize];
        socket.read_exact(&mut body).await?;
        debug!("({}) << {}", self.label, String::from_utf8_lossy(&body));
        Ok(body)
    }

    /// Writes raw bytes, bypassing the plist framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ConduitError> {
        let socket = self.socket()?;
        socket.write_all(bytes).await?;
        socket.flush().await?;
        Ok(())
    }

    /// Reads exactly `len` raw bytes.
    pub async fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, ConduitError> {
        let socket = self.socket()?;
        let mut buf = vec![0; len];
        socket.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Upgrades the connection to TLS in place using the pair record's root
    /// credentials. The device's certificate is not verified.
    pub async fn enable_tls(&mut self, record: &PairRecord) -> Result<(), ConduitError> {
        let socket = self
            .socket
            .take()
            .ok_or(ConduitError::NoEstablishedConnection)?;

        let config = tls::client_config(record)?;
        let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(config));
        let socket = connector
            .connect(
                rustls::pki_types::ServerName::try_from("Device").unwrap(),
                socket,
            )
            .await?;

        self.socket = Some(Box::new(socket));
        Ok(())
    }
}

/// Error type for every failure in the protocol stack.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConduitError {
    #[error("socket io failed")]
    Io(#[from] std::io::Error),
    #[error("plist serialization failed")]
    Plist(#[from] plist::Error),
    #[error("PEM parse failed")]
    Pem(#[from] rustls::pki_types::pem::Error),
    #[error("TLS error")]
    Tls(#[from] rustls::Error),
    #[error("archive error")]
    Zip(#[from] async_zip::error::ZipError),

    #[error("unexpected response from device")]
    UnexpectedResponse,
    #[error("no established connection")]
    NoEstablishedConnection,
    #[error("device not found")]
    DeviceNotFound,

    #[error("usbmuxd: bad command")]
    MuxBadCommand,
    #[error("usbmuxd: bad device")]
    MuxBadDevice,
    #[error("usbmuxd: connection refused")]
    MuxConnectionRefused,
    #[error("usbmuxd: bad version")]
    MuxBadVersion,
    #[error("usbmuxd: unknown reply code {0}")]
    MuxUnknownReply(u64),

    #[error("lockdown error: {0}")]
    Lockdown(String),
    #[error("service requested TLS, which is unsupported")]
    ServiceTlsUnsupported,

    #[error("afc error: {0}")]
    Afc(#[from] afc::errors::AfcError),
    #[error("unknown afc operation code {0:#x}")]
    UnknownAfcOpcode(u64),
    #[error("invalid afc magic")]
    InvalidAfcMagic,

    #[error("{command} failed: {status} (err: {error}, desc: {description})")]
    CommandFailed {
        command: &'static str,
        status: String,
        error: String,
        description: String,
    },
    #[error("unexpected command status `{0}`")]
    UnexpectedStatus(String),
    #[error("no installed application with bundle id `{0}`")]
    AppNotInstalled(String),

    #[error("no Info.plist found in the archive")]
    MissingInfoPlist,
    #[error("CFBundleIdentifier is missing or not a string")]
    MissingBundleIdentifier,
    #[error("archive entry name is not valid utf-8")]
    Utf8Error,
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Scripted-peer helpers shared by the protocol tests. Each test drives
    //! the real client against the far end of a `tokio::io::duplex` pair.

    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Reads one 4-byte big-endian length-prefixed plist frame.
    pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> plist::Dictionary {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        plist::from_bytes(&body).unwrap()
    }

    /// Writes one 4-byte big-endian length-prefixed XML plist frame.
    pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, value: &plist::Value) {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, value).unwrap();
        stream
            .write_all(&(body.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(&body).await.unwrap();
        stream.flush().await.unwrap();
    }
}
