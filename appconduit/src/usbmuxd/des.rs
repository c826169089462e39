//! Wire shapes of the usbmuxd messages this client exchanges.

use serde::{Deserialize, Serialize};

/// One attached device, as reported by `ListDevices`.
///
/// `connection_type` distinguishes locally-attached (`"USB"`) devices from
/// network-attached ones; the remaining hardware fields are carried through
/// untouched. The serial number doubles as the pair record identifier.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Device {
    #[serde(default)]
    pub connection_speed: Option<u64>,
    pub connection_type: String,
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    #[serde(rename = "LocationID", default)]
    pub location_id: Option<u64>,
    #[serde(rename = "ProductID", default)]
    pub product_id: Option<u64>,
    pub serial_number: String,
}

impl Device {
    /// Whether the device is attached over USB. Only these are selected for
    /// operations; network-attached devices are skipped.
    pub fn is_usb(&self) -> bool {
        self.connection_type == "USB"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ListDevicesRequest {
    pub message_type: &'static str,
    pub prog_name: &'static str,
    pub client_version_string: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ListDevicesResponse {
    pub device_list: Vec<DeviceListEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DeviceListEntry {
    #[allow(dead_code)]
    pub message_type: String,
    pub properties: Device,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ConnectRequest {
    pub message_type: &'static str,
    pub prog_name: &'static str,
    pub client_version_string: &'static str,
    #[serde(rename = "DeviceID")]
    pub device_id: u32,
    pub port_number: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ResultResponse {
    pub number: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ReadPairRecordRequest {
    pub message_type: &'static str,
    pub prog_name: &'static str,
    pub client_version_string: &'static str,
    #[serde(rename = "PairRecordID")]
    pub pair_record_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ReadPairRecordResponse {
    pub pair_record_data: plist::Data,
}
