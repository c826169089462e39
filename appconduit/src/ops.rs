//! High-level operations: install, uninstall and look up applications.
//!
//! These compose the protocol stack end to end. Install stages the archive
//! under `PublicStaging` on the device's AFC root before handing the staged
//! path to the installation proxy.

use std::path::Path;

use log::{debug, warn};

use crate::afc::errors::AfcError;
use crate::afc::opcode::AfcFileMode;
use crate::afc::AfcClient;
use crate::bundle;
use crate::lockdown::LockdownClient;
use crate::usbmuxd::{Device, UsbmuxdAddr};
use crate::ConduitError;

/// Directory on the AFC root used as the drop zone for archives. Archives
/// staged here persist between operations and are overwritten by later
/// installs of the same bundle.
pub const STAGING_DIRECTORY: &str = "PublicStaging";

/// Installs the .ipa at `path` on the device.
pub async fn install(
    addr: &UsbmuxdAddr,
    device: &Device,
    path: impl AsRef<Path>,
) -> Result<(), ConduitError> {
    let path = path.as_ref();
    if let Err(e) = tokio::fs::metadata(path).await {
        warn!("no archive at {}. typo?", path.display());
        return Err(e.into());
    }

    let bundle_id = bundle::bundle_identifier(path).await?;
    debug!("installing {bundle_id}");
    let archive = tokio::fs::read(path).await?;

    let mut lockdown = LockdownClient::connect(addr, device).await?;

    let mut afc = lockdown.afc().await?;
    ensure_staging(&mut afc).await?;

    let package_path = format!("{STAGING_DIRECTORY}/{bundle_id}.ipa");
    afc.write_file(&package_path, &archive, AfcFileMode::Wr)
        .await?;

    let mut proxy = lockdown.installation_proxy().await?;
    proxy.install(&bundle_id, &package_path).await
}

/// Uninstalls an application by bundle identifier.
pub async fn uninstall(
    addr: &UsbmuxdAddr,
    device: &Device,
    bundle_id: &str,
) -> Result<(), ConduitError> {
    let mut lockdown = LockdownClient::connect(addr, device).await?;
    let mut proxy = lockdown.installation_proxy().await?;
    proxy.uninstall(bundle_id).await
}

/// Looks up an installed application's attributes.
pub async fn lookup(
    addr: &UsbmuxdAddr,
    device: &Device,
    bundle_id: &str,
    attributes: &[&str],
) -> Result<plist::Dictionary, ConduitError> {
    let mut lockdown = LockdownClient::connect(addr, device).await?;
    let mut proxy = lockdown.installation_proxy().await?;
    proxy.lookup(bundle_id, attributes).await
}

/// Creates the staging directory if it does not exist yet. Only the
/// object-not-found sentinel triggers creation; any other stat failure is
/// re-surfaced.
pub async fn ensure_staging(afc: &mut AfcClient) -> Result<(), ConduitError> {
    match afc.get_file_info(STAGING_DIRECTORY).await {
        Ok(info) => {
            debug!("staging directory present: {info:?}");
            Ok(())
        }
        Err(ConduitError::Afc(AfcError::ObjectNotFound)) => afc.make_dir(STAGING_DIRECTORY).await,
        Err(e) => Err(e),
    }
}
