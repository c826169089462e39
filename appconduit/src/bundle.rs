//! Reads application metadata out of .ipa archives.
//!
//! An .ipa is a zip container with the application bundle under
//! `Payload/<App>.app/`; the bundle identifier lives in that directory's
//! `Info.plist`.

use std::path::Path;

use async_zip::base::read::seek::ZipFileReader;
use futures::AsyncReadExt as _;
use tokio::io::{AsyncBufRead, AsyncSeek, BufReader};

use crate::ConduitError;

/// Extracts `CFBundleIdentifier` from the archive at `path`.
pub async fn bundle_identifier(path: impl AsRef<Path>) -> Result<String, ConduitError> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    bundle_identifier_from_reader(&mut reader).await
}

pub(crate) async fn bundle_identifier_from_reader<R>(reader: &mut R) -> Result<String, ConduitError>
where
    R: AsyncBufRead + AsyncSeek + Unpin,
{
    let mut archive = ZipFileReader::with_tokio(reader).await?;

    for index in 0..archive.file().entries().len() {
        let mut entry = archive.reader_with_entry(index).await?;
        let name = entry
            .entry()
            .filename()
            .as_str()
            .map_err(|_| ConduitError::Utf8Error)?
            .trim_end_matches('/')
            .to_string();

        if !is_bundle_info_plist(&name) {
            continue;
        }

        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).await?;
        let info: plist::Value = plist::from_bytes(&bytes)?;

        return info
            .as_dictionary()
            .and_then(|dict| dict.get("CFBundleIdentifier"))
            .and_then(|v| v.as_string())
            .map(str::to_string)
            .ok_or(ConduitError::MissingBundleIdentifier);
    }

    Err(ConduitError::MissingInfoPlist)
}

/// Matches `Payload/<App>.app/Info.plist` and nothing deeper; frameworks and
/// plugins nested inside the bundle carry their own Info.plist files.
fn is_bundle_info_plist(name: &str) -> bool {
    let mut segments = name.split('/');
    matches!(
        (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ),
        (Some("Payload"), Some(app), Some("Info.plist"), None) if app.ends_with(".app")
    )
}
