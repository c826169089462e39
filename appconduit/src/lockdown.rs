//! Lockdown: the device-control service behind logical port 62078.
//!
//! Lockdown is how services get started on the device. A session is opened
//! with the credentials from the pair record (upgrading the same socket to
//! TLS when the device demands it), the service is requested, and the device
//! answers with a dynamically assigned port. A fresh usbmuxd connection to
//! that port becomes the per-service stream; the control stream keeps going
//! for further spawns.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::afc::AfcClient;
use crate::installation_proxy::InstallationProxyClient;
use crate::pair_record::PairRecord;
use crate::usbmuxd::{Device, UsbmuxdAddr};
use crate::{ConduitError, DeviceConnection, PROGRAM_NAME};

/// Logical port of the lockdown service.
pub const LOCKDOWN_PORT: u16 = 62078;

/// Installation proxy service name.
pub const INSTALLATION_PROXY_SERVICE: &str = "com.apple.mobile.installation_proxy";
/// AFC (file transfer) service name.
pub const AFC_SERVICE: &str = "com.apple.afc";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionRequest {
    label: &'static str,
    protocol_version: &'static str,
    request: &'static str,
    #[serde(rename = "HostID")]
    host_id: String,
    #[serde(rename = "SystemBUID")]
    system_buid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionResponse {
    error: Option<String>,
    #[serde(rename = "EnableSessionSSL")]
    enable_session_ssl: Option<bool>,
    #[serde(rename = "SessionID")]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StopSessionRequest {
    label: &'static str,
    protocol_version: &'static str,
    request: &'static str,
    #[serde(rename = "SessionID")]
    session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StopSessionResponse {
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartServiceRequest {
    label: &'static str,
    protocol_version: &'static str,
    request: &'static str,
    service: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartServiceResponse {
    error: Option<String>,
    #[serde(rename = "EnableServiceSSL")]
    enable_service_ssl: Option<bool>,
    port: Option<u16>,
}

/// Client for the lockdown control stream of one device.
///
/// At most one session is active at a time; `session_id` is `Some` exactly
/// while a session is open.
pub struct LockdownClient {
    conn: DeviceConnection,
    addr: UsbmuxdAddr,
    device: Device,
    session_id: Option<String>,
}

impl LockdownClient {
    /// Connects to the device's lockdown port through usbmuxd.
    pub async fn connect(addr: &UsbmuxdAddr, device: &Device) -> Result<Self, ConduitError> {
        let mux = addr.connect().await?;
        let conn = mux
            .connect_to_device(device.device_id, LOCKDOWN_PORT, "lockdown")
            .await?;
        Ok(Self::new(conn, addr.clone(), device.clone()))
    }

    /// Wraps an already-hijacked control stream.
    pub fn new(conn: DeviceConnection, addr: UsbmuxdAddr, device: Device) -> Self {
        Self {
            conn,
            addr,
            device,
            session_id: None,
        }
    }

    /// Starts a session with the host credentials from `record`. Any session
    /// that is already open is stopped first. If the device asks for session
    /// SSL the control socket is upgraded in place before the session id is
    /// recorded.
    pub async fn start_session(&mut self, record: &PairRecord) -> Result<(), ConduitError> {
        debug!("starting lockdown session");
        if self.session_id.is_some() {
            self.stop_session().await?;
        }

        self.conn
            .send_message(&StartSessionRequest {
                label: PROGRAM_NAME,
                protocol_version: "2",
                request: "StartSession",
                host_id: record.host_id.clone(),
                system_buid: record.system_buid.clone(),
            })
            .await?;
        let res: StartSessionResponse = self.conn.receive().await?;

        if let Some(e) = res.error.filter(|e| !e.is_empty()) {
            return Err(ConduitError::Lockdown(e));
        }
        if res.enable_session_ssl.unwrap_or(false) {
            self.conn.enable_tls(record).await?;
        }

        match res.session_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.session_id = Some(id);
                Ok(())
            }
            None => Err(ConduitError::UnexpectedResponse),
        }
    }

    /// Stops the current session, if one is open.
    pub async fn stop_session(&mut self) -> Result<(), ConduitError> {
        let session_id = match self.session_id.take() {
            Some(id) => id,
            None => return Ok(()),
        };
        debug!("stopping lockdown session {session_id}");

        self.conn
            .send_message(&StopSessionRequest {
                label: PROGRAM_NAME,
                protocol_version: "2",
                request: "StopSession",
                session_id,
            })
            .await?;
        let res: StopSessionResponse = self.conn.receive().await?;
        if let Some(e) = res.error.filter(|e| !e.is_empty()) {
            return Err(ConduitError::Lockdown(e));
        }
        Ok(())
    }

    /// Spawns a named service and returns a fresh stream to it.
    ///
    /// This runs the whole dance: read the pair record, start a session,
    /// request the service, stop the session again, and open a new usbmuxd
    /// connection to the port the device assigned. If the device wants the
    /// service stream itself wrapped in TLS the spawn fails; only session SSL
    /// is supported.
    pub async fn start_service(
        &mut self,
        service: &str,
    ) -> Result<DeviceConnection, ConduitError> {
        debug!("starting service {service}");

        let mut mux = self.addr.connect().await?;
        let record = mux.read_pair_record(&self.device.serial_number).await?;

        self.start_session(&record).await?;

        let (port, service_ssl) = self.request_service(service).await?;
        if service_ssl {
            return Err(ConduitError::ServiceTlsUnsupported);
        }

        self.stop_session().await?;

        let mux = self.addr.connect().await?;
        mux.connect_to_device(self.device.device_id, port, service)
            .await
    }

    async fn request_service(&mut self, service: &str) -> Result<(u16, bool), ConduitError> {
        self.conn
            .send_message(&StartServiceRequest {
                label: PROGRAM_NAME,
                protocol_version: "2",
                request: "StartService",
                service: service.to_string(),
            })
            .await?;
        let res: StartServiceResponse = self.conn.receive().await?;

        if let Some(e) = res.error.filter(|e| !e.is_empty()) {
            return Err(ConduitError::Lockdown(e));
        }
        let port = res.port.ok_or(ConduitError::UnexpectedResponse)?;
        Ok((port, res.enable_service_ssl.unwrap_or(false)))
    }

    /// Spawns the AFC service.
    pub async fn afc(&mut self) -> Result<AfcClient, ConduitError> {
        Ok(AfcClient::new(self.start_service(AFC_SERVICE).await?))
    }

    /// Spawns the installation proxy service.
    pub async fn installation_proxy(&mut self) -> Result<InstallationProxyClient, ConduitError> {
        Ok(InstallationProxyClient::new(
            self.start_service(INSTALLATION_PROXY_SERVICE).await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use plist::Value;

    use super::*;
    use crate::test_util::{read_frame, write_frame};

    fn test_device() -> Device {
        let mut props = plist::Dictionary::new();
        props.insert("ConnectionType".into(), "USB".into());
        props.insert("DeviceID".into(), 3.into());
        props.insert("SerialNumber".into(), "serial-1".into());
        plist::from_value(&Value::Dictionary(props)).unwrap()
    }

    fn test_record() -> PairRecord {
        PairRecord {
            host_id: "host-id".into(),
            system_buid: "system-buid".into(),
            host_certificate: vec![],
            host_private_key: vec![],
            device_certificate: vec![],
            root_certificate: vec![],
            root_private_key: vec![],
        }
    }

    fn session_reply(id: &str) -> Value {
        let mut res = plist::Dictionary::new();
        res.insert("Request".into(), "StartSession".into());
        res.insert("SessionID".into(), id.into());
        res.insert("EnableSessionSSL".into(), false.into());
        Value::Dictionary(res)
    }

    #[tokio::test]
    async fn plaintext_session_records_id() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut lockdown = LockdownClient::new(
            DeviceConnection::new(Box::new(client), "lockdown"),
            UsbmuxdAddr::default(),
            test_device(),
        );

        let peer = tokio::spawn(async move {
            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Request").and_then(|v| v.as_string()),
                Some("StartSession")
            );
            assert_eq!(
                req.get("HostID").and_then(|v| v.as_string()),
                Some("host-id")
            );
            assert_eq!(
                req.get("SystemBUID").and_then(|v| v.as_string()),
                Some("system-buid")
            );
            write_frame(&mut server, &session_reply("session-1")).await;
        });

        lockdown.start_session(&test_record()).await.unwrap();
        assert_eq!(lockdown.session_id.as_deref(), Some("session-1"));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn second_session_stops_the_first() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut lockdown = LockdownClient::new(
            DeviceConnection::new(Box::new(client), "lockdown"),
            UsbmuxdAddr::default(),
            test_device(),
        );

        let peer = tokio::spawn(async move {
            let _ = read_frame(&mut server).await;
            write_frame(&mut server, &session_reply("session-1")).await;

            // a second start must be preceded by a StopSession of the first
            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Request").and_then(|v| v.as_string()),
                Some("StopSession")
            );
            assert_eq!(
                req.get("SessionID").and_then(|v| v.as_string()),
                Some("session-1")
            );
            let mut res = plist::Dictionary::new();
            res.insert("Request".into(), "StopSession".into());
            write_frame(&mut server, &Value::Dictionary(res)).await;

            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Request").and_then(|v| v.as_string()),
                Some("StartSession")
            );
            write_frame(&mut server, &session_reply("session-2")).await;
        });

        let record = test_record();
        lockdown.start_session(&record).await.unwrap();
        lockdown.start_session(&record).await.unwrap();
        assert_eq!(lockdown.session_id.as_deref(), Some("session-2"));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn session_error_is_surfaced() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut lockdown = LockdownClient::new(
            DeviceConnection::new(Box::new(client), "lockdown"),
            UsbmuxdAddr::default(),
            test_device(),
        );

        let peer = tokio::spawn(async move {
            let _ = read_frame(&mut server).await;
            let mut res = plist::Dictionary::new();
            res.insert("Request".into(), "StartSession".into());
            res.insert("Error".into(), "InvalidHostID".into());
            write_frame(&mut server, &Value::Dictionary(res)).await;
        });

        let err = lockdown.start_session(&test_record()).await.unwrap_err();
        assert!(matches!(err, ConduitError::Lockdown(e) if e == "InvalidHostID"));
        assert!(lockdown.session_id.is_none());
        peer.await.unwrap();
    }
}
