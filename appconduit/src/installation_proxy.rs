//! Installation proxy client: installs, removes and looks up applications.
//!
//! Install and uninstall are long-running on the device; the service streams
//! progress dictionaries until one carries `Status = Complete` or a non-empty
//! `Error`. Lookup answers in a single response.

use log::debug;
use serde::Serialize;

use crate::{ConduitError, DeviceConnection};

/// Attributes returned by [`InstallationProxyClient::lookup`] when the caller
/// does not request specific ones.
pub const DEFAULT_LOOKUP_ATTRIBUTES: [&str; 6] = [
    "CFBundleDisplayName",
    "CFBundleExecutable",
    "CFBundleName",
    "CFBundleVersion",
    "CFBundleShortVersionString",
    "CFBundleIdentifier",
];

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ClientOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    application_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_attributes: Option<Vec<String>>,
    #[serde(rename = "BundleIDs", skip_serializing_if = "Option::is_none")]
    bundle_ids: Option<Vec<String>>,
    #[serde(rename = "BundleID", skip_serializing_if = "Option::is_none")]
    bundle_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstallRequest {
    command: &'static str,
    client_options: ClientOptions,
    package_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UninstallRequest {
    command: &'static str,
    application_identifier: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LookupRequest {
    command: &'static str,
    client_options: ClientOptions,
}

/// Client for one installation proxy service stream.
pub struct InstallationProxyClient {
    conn: DeviceConnection,
}

impl InstallationProxyClient {
    pub fn new(conn: DeviceConnection) -> Self {
        Self { conn }
    }

    /// Installs the archive previously staged at `package_path` (a path
    /// inside the AFC jail), then drains progress responses until the device
    /// reports completion.
    pub async fn install(
        &mut self,
        bundle_id: &str,
        package_path: &str,
    ) -> Result<(), ConduitError> {
        self.conn
            .send_message(&InstallRequest {
                command: "Install",
                client_options: ClientOptions {
                    application_type: None,
                    return_attributes: None,
                    bundle_ids: None,
                    bundle_id: Some(bundle_id.to_string()),
                },
                package_path: package_path.to_string(),
            })
            .await?;
        self.drain_until_complete("install").await
    }

    /// Uninstalls an application by bundle identifier.
    pub async fn uninstall(&mut self, bundle_id: &str) -> Result<(), ConduitError> {
        self.conn
            .send_message(&UninstallRequest {
                command: "Uninstall",
                application_identifier: bundle_id.to_string(),
            })
            .await?;
        self.drain_until_complete("uninstall").await
    }

    /// Looks up one application's attributes. An empty `attributes` slice
    /// requests [`DEFAULT_LOOKUP_ATTRIBUTES`].
    pub async fn lookup(
        &mut self,
        bundle_id: &str,
        attributes: &[&str],
    ) -> Result<plist::Dictionary, ConduitError> {
        let attributes = if attributes.is_empty() {
            &DEFAULT_LOOKUP_ATTRIBUTES[..]
        } else {
            attributes
        };

        self.conn
            .send_message(&LookupRequest {
                command: "Lookup",
                client_options: ClientOptions {
                    application_type: Some("Any"),
                    return_attributes: Some(attributes.iter().map(|a| a.to_string()).collect()),
                    bundle_ids: Some(vec![bundle_id.to_string()]),
                    bundle_id: None,
                },
            })
            .await?;

        let mut res = self.conn.read_plist().await?;
        match res.remove("Status").and_then(|v| v.into_string()) {
            Some(status) if status == "Complete" => {}
            status => {
                return Err(ConduitError::UnexpectedStatus(status.unwrap_or_default()));
            }
        }

        let mut result = res
            .remove("LookupResult")
            .and_then(|v| v.into_dictionary())
            .ok_or(ConduitError::UnexpectedResponse)?;
        result
            .remove(bundle_id)
            .and_then(|v| v.into_dictionary())
            .ok_or_else(|| ConduitError::AppNotInstalled(bundle_id.to_string()))
    }

    /// Reads responses until a terminal one arrives. Intermediate responses
    /// are progress notifications and are only logged.
    async fn drain_until_complete(&mut self, command: &'static str) -> Result<(), ConduitError> {
        loop {
            let mut res = self.conn.read_plist().await?;
            let status = res
                .remove("Status")
                .and_then(|v| v.into_string())
                .unwrap_or_default();

            if let Some(error) = res
                .remove("Error")
                .and_then(|v| v.into_string())
                .filter(|e| !e.is_empty())
            {
                let description = res
                    .remove("ErrorDescription")
                    .and_then(|v| v.into_string())
                    .unwrap_or_default();
                return Err(ConduitError::CommandFailed {
                    command,
                    status,
                    error,
                    description,
                });
            }

            if status == "Complete" {
                return Ok(());
            }

            if let Some(percent) = res
                .get("PercentComplete")
                .and_then(|v| v.as_unsigned_integer())
            {
                debug!("{command} progress: {percent}% ({status})");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use plist::Value;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::test_util::{read_frame, write_frame};

    fn client_over(stream: DuplexStream) -> InstallationProxyClient {
        InstallationProxyClient::new(DeviceConnection::new(
            Box::new(stream),
            "com.apple.mobile.installation_proxy",
        ))
    }

    fn dict(entries: &[(&str, Value)]) -> Value {
        let mut d = plist::Dictionary::new();
        for (k, v) in entries {
            d.insert((*k).into(), v.clone());
        }
        Value::Dictionary(d)
    }

    #[tokio::test]
    async fn install_drains_progress_until_complete() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut proxy = client_over(client);

        let peer = tokio::spawn(async move {
            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Command").and_then(|v| v.as_string()),
                Some("Install")
            );
            assert_eq!(
                req.get("PackagePath").and_then(|v| v.as_string()),
                Some("PublicStaging/com.example.Hello.ipa")
            );
            let options = req
                .get("ClientOptions")
                .and_then(|v| v.as_dictionary())
                .unwrap();
            assert_eq!(
                options.get("BundleID").and_then(|v| v.as_string()),
                Some("com.example.Hello")
            );

            write_frame(
                &mut server,
                &dict(&[
                    ("PercentComplete", 30.into()),
                    ("Status", "CreatingStagingDirectory".into()),
                ]),
            )
            .await;
            write_frame(&mut server, &dict(&[("Status", "Complete".into())])).await;
        });

        proxy
            .install("com.example.Hello", "PublicStaging/com.example.Hello.ipa")
            .await
            .unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn install_error_carries_all_three_strings() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut proxy = client_over(client);

        let peer = tokio::spawn(async move {
            let _ = read_frame(&mut server).await;
            write_frame(
                &mut server,
                &dict(&[
                    ("Status", "Error".into()),
                    ("Error", "APIInternalError".into()),
                    ("ErrorDescription", "Could not install".into()),
                ]),
            )
            .await;
        });

        let err = proxy
            .install("com.example.Hello", "PublicStaging/com.example.Hello.ipa")
            .await
            .unwrap_err();
        peer.await.unwrap();

        let message = err.to_string();
        assert!(message.contains("Error"));
        assert!(message.contains("APIInternalError"));
        assert!(message.contains("Could not install"));
    }

    #[tokio::test]
    async fn uninstall_sends_one_request() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut proxy = client_over(client);

        let peer = tokio::spawn(async move {
            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Command").and_then(|v| v.as_string()),
                Some("Uninstall")
            );
            assert_eq!(
                req.get("ApplicationIdentifier").and_then(|v| v.as_string()),
                Some("com.example.Hello")
            );
            write_frame(
                &mut server,
                &dict(&[("Status", "RemovingApplication".into())]),
            )
            .await;
            write_frame(&mut server, &dict(&[("Status", "Complete".into())])).await;
        });

        proxy.uninstall("com.example.Hello").await.unwrap();
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn lookup_uses_default_attributes() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut proxy = client_over(client);

        let peer = tokio::spawn(async move {
            let req = read_frame(&mut server).await;
            assert_eq!(
                req.get("Command").and_then(|v| v.as_string()),
                Some("Lookup")
            );
            let options = req
                .get("ClientOptions")
                .and_then(|v| v.as_dictionary())
                .unwrap();
            assert_eq!(
                options.get("ApplicationType").and_then(|v| v.as_string()),
                Some("Any")
            );
            let attributes = options
                .get("ReturnAttributes")
                .and_then(|v| v.as_array())
                .unwrap();
            assert_eq!(attributes.len(), 6);
            assert_eq!(attributes[0].as_string(), Some("CFBundleDisplayName"));
            let bundle_ids = options
                .get("BundleIDs")
                .and_then(|v| v.as_array())
                .unwrap();
            assert_eq!(bundle_ids.len(), 1);
            assert_eq!(bundle_ids[0].as_string(), Some("com.example.Hello"));

            write_frame(
                &mut server,
                &dict(&[
                    ("Status", "Complete".into()),
                    (
                        "LookupResult",
                        dict(&[(
                            "com.example.Hello",
                            dict(&[("CFBundleVersion", "1.0".into())]),
                        )]),
                    ),
                ]),
            )
            .await;
        });

        let info = proxy.lookup("com.example.Hello", &[]).await.unwrap();
        peer.await.unwrap();
        assert_eq!(
            info.get("CFBundleVersion").and_then(|v| v.as_string()),
            Some("1.0")
        );
    }

    #[tokio::test]
    async fn lookup_of_unknown_bundle_fails() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut proxy = client_over(client);

        let peer = tokio::spawn(async move {
            let _ = read_frame(&mut server).await;
            write_frame(
                &mut server,
                &dict(&[
                    ("Status", "Complete".into()),
                    ("LookupResult", dict(&[])),
                ]),
            )
            .await;
        });

        let err = proxy.lookup("com.example.Gone", &[]).await.unwrap_err();
        peer.await.unwrap();
        assert!(matches!(err, ConduitError::AppNotInstalled(id) if id == "com.example.Gone"));
    }
}
