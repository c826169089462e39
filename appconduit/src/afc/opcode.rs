/// AFC operation codes used by this client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum AfcOpcode {
    Status = 0x01,
    Data = 0x02,
    WriteFile = 0x05,
    MakeDir = 0x09,
    GetFileInfo = 0x0A,
    FileOpen = 0x0D,
    FileOpenResult = 0x0E,
    FileWrite = 0x10,
    FileClose = 0x14,
}

impl TryFrom<u64> for AfcOpcode {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, u64> {
        match value {
            0x01 => Ok(Self::Status),
            0x02 => Ok(Self::Data),
            0x05 => Ok(Self::WriteFile),
            0x09 => Ok(Self::MakeDir),
            0x0A => Ok(Self::GetFileInfo),
            0x0D => Ok(Self::FileOpen),
            0x0E => Ok(Self::FileOpenResult),
            0x10 => Ok(Self::FileWrite),
            0x14 => Ok(Self::FileClose),
            other => Err(other),
        }
    }
}

/// Modes for [`crate::afc::AfcClient::open`], matching fopen semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum AfcFileMode {
    /// `r`, read only
    RdOnly = 0x01,
    /// `r+`, read/write, create
    Rw = 0x02,
    /// `w`, write only, create, truncate
    WrOnly = 0x03,
    /// `w+`, read/write, create, truncate
    Wr = 0x04,
    /// `a`, write only, create, append
    Append = 0x05,
    /// `a+`, read/write, create, append
    RdAppend = 0x06,
}
