//! Per-archive assembly lock.
//!
//! The lock lives at `<archive>.lock` and is an OS advisory lock held on
//! that marker file, so a crashed holder releases it with its file
//! descriptors. Waiters poll at a fixed interval without a timeout. The
//! marker is removed while the lock is still held; a waiter that then locks
//! the unlinked inode notices the mismatch and starts over.

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::thread;
use std::time::Duration;

use crate::error::{PublishError, Result};

/// Interval between lock attempts while another assembler holds the lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exclusive lock over one target archive path, released on drop.
#[derive(Debug)]
pub struct ArchiveLock {
    path: Utf8PathBuf,
    file: File,
}

impl ArchiveLock {
    /// Returns the marker path for `archive`.
    #[must_use]
    pub fn lock_path(archive: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{archive}.lock"))
    }

    /// Blocks until the lock for `archive` is held, polling every `poll`.
    ///
    /// # Errors
    ///
    /// Returns an error when the marker cannot be created or locked for a
    /// reason other than contention.
    pub fn acquire(archive: &Utf8Path, poll: Duration) -> Result<Self> {
        let path = Self::lock_path(archive);
        let mut waiting = false;

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(PublishError::io_at(&path))?;

            match file.try_lock_exclusive() {
                Ok(()) if is_current(&file, &path).map_err(PublishError::io_at(&path))? => {
                    log::debug!("acquired {path}");
                    return Ok(Self { path, file });
                }
                Ok(()) => {}
                Err(err) if is_contended(&err) => {
                    if !waiting {
                        log::warn!("waiting for another build to finish {archive}");
                        waiting = true;
                    }
                    thread::sleep(poll);
                }
                Err(err) => return Err(PublishError::io_at(&path)(err)),
            }
        }
    }

    /// Returns the marker path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("failed to remove lock {}: {err}", self.path);
        }
        if let Err(err) = self.file.unlock() {
            log::debug!("failed to unlock {}: {err}", self.path);
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Checks that `file` is still the inode linked at `path`.
fn is_current(file: &File, path: &Utf8Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(held.dev() == linked.dev() && held.ino() == linked.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn archive_in(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(dir.path().join("foo-1.0-r0.apk")).expect("utf8 path")
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            ArchiveLock::lock_path(Utf8Path::new("/repo/main/x86_64/foo-1.0-r0.apk")),
            Utf8PathBuf::from("/repo/main/x86_64/foo-1.0-r0.apk.lock")
        );
    }

    #[test]
    fn marker_exists_only_while_held() {
        let dir = TempDir::new().expect("temp dir");
        let archive = archive_in(&dir);
        let marker = ArchiveLock::lock_path(&archive);

        let lock = ArchiveLock::acquire(&archive, Duration::from_millis(10)).expect("acquire");
        assert_eq!(lock.path(), marker);
        assert!(marker.exists());

        drop(lock);
        assert!(!marker.exists());
    }

    #[test]
    fn second_holder_waits_for_release() {
        let dir = TempDir::new().expect("temp dir");
        let archive = archive_in(&dir);
        let first = ArchiveLock::acquire(&archive, Duration::from_millis(10)).expect("acquire");

        let (tx, rx) = mpsc::channel();
        let waiter_archive = archive.clone();
        let waiter = thread::spawn(move || {
            let lock = ArchiveLock::acquire(&waiter_archive, Duration::from_millis(10))
                .expect("acquire after release");
            tx.send(Instant::now()).expect("send");
            drop(lock);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err(), "waiter must not proceed while held");
        let released = Instant::now();
        drop(first);

        let acquired = rx.recv().expect("waiter acquires");
        assert!(acquired >= released);
        waiter.join().expect("waiter thread");
        assert!(!ArchiveLock::lock_path(&archive).exists());
    }
}
