//! Client for the host multiplexer daemon (usbmuxd).
//!
//! usbmuxd owns the physical connection to every attached device and
//! demultiplexes logical port connections to them. This module enumerates
//! devices, reads pair records, and connects to device ports, handing the raw
//! socket over to the next protocol layer once a connection is established.

use std::net::SocketAddr;
use std::str::FromStr;

use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::pair_record::PairRecord;
use crate::{ConduitError, DeviceConnection, ReadWrite, CLIENT_VERSION, PROGRAM_NAME};

mod des;
mod raw_packet;

pub use des::Device;
use raw_packet::MuxHeader;

/// Where the usbmuxd daemon is listening.
#[derive(Clone, Debug)]
pub enum UsbmuxdAddr {
    /// Unix domain socket path (Unix systems only).
    #[cfg(unix)]
    UnixSocket(String),
    /// TCP endpoint, for hosts where the daemon is proxied over TCP.
    TcpSocket(SocketAddr),
}

impl UsbmuxdAddr {
    /// Default daemon socket path.
    pub const SOCKET_FILE: &'static str = "/var/run/usbmuxd";

    /// Opens a fresh stream to the daemon. One connection serves one logical
    /// operation; callers open a new one per request sequence.
    pub async fn to_socket(&self) -> Result<Box<dyn ReadWrite>, ConduitError> {
        Ok(match self {
            #[cfg(unix)]
            Self::UnixSocket(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            Self::TcpSocket(addr) => Box::new(tokio::net::TcpStream::connect(addr).await?),
        })
    }

    /// Opens a new [`UsbmuxdConnection`] to the daemon.
    pub async fn connect(&self) -> Result<UsbmuxdConnection, ConduitError> {
        Ok(UsbmuxdConnection::new(self.to_socket().await?))
    }

    /// Reads `USBMUXD_SOCKET_ADDRESS` from the environment, falling back to
    /// the platform default. The variable holds either a Unix socket path or
    /// a `host:port` pair.
    pub fn from_env_var() -> Result<Self, std::net::AddrParseError> {
        Ok(match std::env::var("USBMUXD_SOCKET_ADDRESS") {
            Ok(var) => {
                #[cfg(unix)]
                if var.contains(':') {
                    Self::TcpSocket(SocketAddr::from_str(&var)?)
                } else {
                    Self::UnixSocket(var)
                }
                #[cfg(not(unix))]
                Self::TcpSocket(SocketAddr::from_str(&var)?)
            }
            Err(_) => Self::default(),
        })
    }
}

impl Default for UsbmuxdAddr {
    fn default() -> Self {
        #[cfg(unix)]
        {
            Self::UnixSocket(Self::SOCKET_FILE.to_string())
        }
        #[cfg(not(unix))]
        {
            Self::TcpSocket(SocketAddr::from(([127, 0, 0, 1], 27015)))
        }
    }
}

/// An open connection to usbmuxd.
///
/// Requests and responses are strictly pipelined; the tag is incremented
/// before every send (the first emitted tag is 1) but responses are not
/// matched against it.
pub struct UsbmuxdConnection {
    socket: Box<dyn ReadWrite>,
    tag: u32,
}

impl UsbmuxdConnection {
    pub fn new(socket: Box<dyn ReadWrite>) -> Self {
        Self { socket, tag: 0 }
    }

    /// Lists all attached devices, in the order the daemon reports them.
    pub async fn list_devices(&mut self) -> Result<Vec<Device>, ConduitError> {
        self.send(&des::ListDevicesRequest {
            message_type: "ListDevices",
            prog_name: PROGRAM_NAME,
            client_version_string: CLIENT_VERSION,
        })
        .await?;
        let res: des::ListDevicesResponse = self.receive().await?;
        Ok(res.device_list.into_iter().map(|d| d.properties).collect())
    }

    /// Finds an attached device by its serial number.
    pub async fn get_device(&mut self, udid: &str) -> Result<Device, ConduitError> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|d| d.serial_number == udid)
            .ok_or(ConduitError::DeviceNotFound)
    }

    /// Reads the pair record stored for a device's serial number. The record
    /// only exists if the host has already paired with the device.
    pub async fn read_pair_record(&mut self, udid: &str) -> Result<PairRecord, ConduitError> {
        debug!("reading pair record for {udid}");
        self.send(&des::ReadPairRecordRequest {
            message_type: "ReadPairRecord",
            prog_name: PROGRAM_NAME,
            client_version_string: CLIENT_VERSION,
            pair_record_id: udid.to_string(),
        })
        .await?;
        let res: des::ReadPairRecordResponse = self.receive().await?;
        PairRecord::from_bytes(&Into::<Vec<u8>>::into(res.pair_record_data))
    }

    /// Asks the daemon to connect this socket to a logical port on a device.
    ///
    /// On an OK reply the connection consumes itself and its socket becomes a
    /// raw pipe to the device; the returned [`DeviceConnection`] owns it from
    /// here on, labeled for log output. Non-OK reply codes are classified
    /// into the `Mux*` errors.
    pub async fn connect_to_device(
        mut self,
        device_id: u32,
        port: u16,
        label: impl Into<String>,
    ) -> Result<DeviceConnection, ConduitError> {
        debug!("connecting to device {device_id} port {port}");
        self.send(&des::ConnectRequest {
            message_type: "Connect",
            prog_name: PROGRAM_NAME,
            client_version_string: CLIENT_VERSION,
            device_id,
            port_number: network_order_port(port),
        })
        .await?;
        let res: des::ResultResponse = self.receive().await?;
        match res.number {
            0 => Ok(DeviceConnection::new(self.socket, label)),
            1 => Err(ConduitError::MuxBadCommand),
            2 => Err(ConduitError::MuxBadDevice),
            3 => Err(ConduitError::MuxConnectionRefused),
            6 => Err(ConduitError::MuxBadVersion),
            code => Err(ConduitError::MuxUnknownReply(code)),
        }
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ConduitError> {
        let mut body = Vec::new();
        plist::to_writer_xml(&mut body, message)?;
        debug!(">> {}", String::from_utf8_lossy(&body));

        self.tag += 1;
        let header = MuxHeader::for_payload(body.len(), self.tag);

        self.socket.write_all(&header.serialize()).await?;
        self.socket.write_all(&body).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn receive<T: DeserializeOwned>(&mut self) -> Result<T, ConduitError> {
        let mut buf = [0u8; MuxHeader::LEN];
        self.socket.read_exact(&mut buf).await?;
        let header = MuxHeader::parse(&buf);
        if (header.length as usize) < MuxHeader::LEN {
            return Err(ConduitError::UnexpectedResponse);
        }

        let mut body = vec![0; header.length as usize - MuxHeader::LEN];
        self.socket.read_exact(&mut body).await?;
        debug!("<< {}", String::from_utf8_lossy(&body));

        Ok(plist::from_bytes(&body)?)
    }
}

/// usbmuxd takes the port as a little-endian 16-bit field whose value is the
/// big-endian encoding of the logical port: write the port big-endian into
/// two bytes, then read those bytes back little-endian. 62078 goes on the
/// wire as 32498.
fn network_order_port(port: u16) -> u16 {
    u16::from_le_bytes(port.to_be_bytes())
}
