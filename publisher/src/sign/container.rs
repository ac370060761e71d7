//! Signature container encoding.
//!
//! A signature is wrapped as the only member of a tar stream, the stream's
//! end-of-archive blocks are dropped, and the result is gzip-compressed.
//! Prefixing that onto a complete gzip-compressed tar yields a stream that
//! tar readers see as one archive holding the signature followed by the
//! original members.

use flate2::{Compression, GzBuilder};
use pkgseal_common::SourceDateEpoch;
use std::io::{self, Write};
use tar::{EntryType, Header};

/// Size of a tar block.
const BLOCK_SIZE: usize = 512;

/// Returns the member name carrying a signature made with `key_name`.
#[must_use]
pub fn signature_member_name(key_name: &str) -> String {
    format!(".SIGN.RSA.{key_name}.pub")
}

/// Wraps `signature` into a terminator-less, gzip-compressed tar stream.
///
/// The member is owned by `root:root` with mode 0644; both its mtime and the
/// gzip header mtime are `epoch`.
///
/// # Errors
///
/// Returns an error when `epoch` does not fit the gzip header or the tar
/// header cannot be built.
pub fn signature_container(
    signature: &[u8],
    key_name: &str,
    epoch: SourceDateEpoch,
) -> io::Result<Vec<u8>> {
    let gzip_mtime = u32::try_from(epoch.seconds()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("epoch {epoch} does not fit a gzip header"),
        )
    })?;

    let mut header = Header::new_ustar();
    header.set_path(signature_member_name(key_name))?;
    header.set_entry_type(EntryType::Regular);
    header.set_size(signature.len() as u64);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(epoch.seconds());
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, signature)?;
    let mut archive = builder.into_inner()?;
    archive.truncate(BLOCK_SIZE + signature.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE);

    let mut encoder = GzBuilder::new()
        .mtime(gzip_mtime)
        .write(Vec::new(), Compression::best());
    encoder.write_all(&archive)?;
    encoder.finish()
}
