//! The usbmuxd message framing: a fixed 16-byte little-endian header in
//! front of an XML property list payload.

/// Decoded form of the 16-byte header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MuxHeader {
    /// Total length of the message, header included.
    pub length: u32,
    /// Protocol version, always [`MuxHeader::XML_PLIST_VERSION`].
    pub version: u32,
    /// Message type, always [`MuxHeader::PLIST_MESSAGE`] for this client.
    pub request: u32,
    /// Incremented for every message sent so responses can be correlated.
    pub tag: u32,
}

impl MuxHeader {
    pub const LEN: usize = 16;

    /// The XML variant of the plist payload format.
    pub const XML_PLIST_VERSION: u32 = 1;
    /// "The payload is a property list."
    pub const PLIST_MESSAGE: u32 = 8;

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.request.to_le_bytes());
        buf[12..16].copy_from_slice(&self.tag.to_le_bytes());
        buf
    }

    pub fn parse(buf: &[u8; Self::LEN]) -> Self {
        Self {
            length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            request: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            tag: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }

    /// Builds the header for a payload of `payload_len` bytes.
    pub fn for_payload(payload_len: usize, tag: u32) -> Self {
        Self {
            length: (Self::LEN + payload_len) as u32,
            version: Self::XML_PLIST_VERSION,
            request: Self::PLIST_MESSAGE,
            tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MuxHeader::for_payload(284, 7);
        let parsed = MuxHeader::parse(&header.serialize());
        assert_eq!(header, parsed);
        assert_eq!(parsed.length, 300);
        assert_eq!(parsed.version, MuxHeader::XML_PLIST_VERSION);
        assert_eq!(parsed.request, MuxHeader::PLIST_MESSAGE);
        assert_eq!(parsed.tag, 7);
    }

    #[test]
    fn header_is_little_endian() {
        let bytes = MuxHeader::for_payload(0, 1).serialize();
        assert_eq!(&bytes[0..4], &[16, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[8, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
    }
}
