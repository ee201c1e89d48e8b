//! Build context archives.
//!
//! A build context is an uncompressed (or gzip-compressed) tar archive
//! whose root holds a file named exactly `Dockerfile`.

use std::fmt;
use std::io::{self, Read};
use std::path::{Component, Path};

use bytes::Bytes;
use dockhand_common::constants::DOCKERFILE_NAME;
use flate2::read::GzDecoder;
use tokio::io::{AsyncRead, AsyncReadExt};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

enum Source {
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// A readable build context handed to the resolver.
///
/// The context is consumed by the build that uses it.
pub struct BuildContext {
    source: Source,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Bytes(b) => f.debug_struct("BuildContext").field("len", &b.len()).finish(),
            Source::Reader(_) => f.debug_struct("BuildContext").field("reader", &"..").finish(),
        }
    }
}

impl BuildContext {
    /// Wraps an archive already held in memory.
    #[must_use]
    pub fn from_bytes(archive: impl Into<Bytes>) -> Self {
        Self {
            source: Source::Bytes(archive.into()),
        }
    }

    /// Wraps a reader producing the archive.
    #[must_use]
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            source: Source::Reader(Box::new(reader)),
        }
    }

    /// Opens an archive on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        tracing::debug!(path = %path.display(), "opened build context");
        Ok(Self::from_reader(file))
    }

    /// Packs a context holding only a `Dockerfile` with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be written.
    pub fn from_dockerfile(contents: &str) -> io::Result<Self> {
        Self::from_files(&[(DOCKERFILE_NAME, contents.as_bytes())])
    }

    /// Packs the given `(path, contents)` pairs into a context archive.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be appended.
    pub fn from_files(files: &[(&str, &[u8])]) -> io::Result<Self> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data)?;
        }
        Ok(Self::from_bytes(builder.into_inner()?))
    }

    /// Returns whether the context is known to hold no data.
    ///
    /// Reader-backed contexts are never known to be empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(&self.source, Source::Bytes(b) if b.is_empty())
    }

    /// Reads the whole archive.
    pub(crate) async fn into_bytes(self) -> io::Result<Bytes> {
        match self.source {
            Source::Bytes(b) => Ok(b),
            Source::Reader(mut reader) => {
                let mut buf = Vec::new();
                let _ = reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Returns whether `archive` holds a regular file named `Dockerfile` at
/// its root.
///
/// Gzip-compressed archives are decompressed while scanning.
///
/// # Errors
///
/// Returns an error if the archive is not a readable tar stream.
pub fn has_root_dockerfile(archive: &[u8]) -> io::Result<bool> {
    if archive.starts_with(&GZIP_MAGIC) {
        return scan_for_dockerfile(GzDecoder::new(archive));
    }
    scan_for_dockerfile(archive)
}

fn scan_for_dockerfile<R: Read>(reader: R) -> io::Result<bool> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?;
        let mut parts = path.components().filter(|c| !matches!(c, Component::CurDir));
        let is_root_dockerfile = parts
            .next()
            .is_some_and(|c| c.as_os_str() == DOCKERFILE_NAME)
            && parts.next().is_none();
        if is_root_dockerfile {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dockerfile_context_has_root_dockerfile() {
        let ctx = BuildContext::from_dockerfile("FROM scratch\n").expect("pack");
        let bytes = ctx.into_bytes().await.expect("read");
        assert!(has_root_dockerfile(&bytes).expect("inspect"));
    }

    #[tokio::test]
    async fn nested_dockerfile_does_not_count() {
        let ctx = BuildContext::from_files(&[("app/Dockerfile", b"FROM scratch\n")]).expect("pack");
        let bytes = ctx.into_bytes().await.expect("read");
        assert!(!has_root_dockerfile(&bytes).expect("inspect"));
    }

    #[tokio::test]
    async fn dockerfile_next_to_other_files_counts() {
        let ctx = BuildContext::from_files(&[
            ("./main.sh", b"echo hi\n"),
            ("./Dockerfile", b"FROM scratch\n"),
        ])
        .expect("pack");
        let bytes = ctx.into_bytes().await.expect("read");
        assert!(has_root_dockerfile(&bytes).expect("inspect"));
    }

    #[tokio::test]
    async fn open_reads_archive_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("context.tar");
        let packed = BuildContext::from_dockerfile("FROM scratch\n")
            .expect("pack")
            .into_bytes()
            .await
            .expect("read");
        std::fs::write(&path, &packed).expect("write");

        let ctx = BuildContext::open(&path).await.expect("open");
        assert_eq!(ctx.into_bytes().await.expect("read"), packed);
    }

    #[tokio::test]
    async fn gzip_archives_are_inspected() {
        use std::io::Write;

        let compress = |tar: &[u8]| {
            let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            gz.write_all(tar).expect("compress");
            gz.finish().expect("finish")
        };
        let with = BuildContext::from_dockerfile("FROM scratch\n").expect("pack");
        let without = BuildContext::from_files(&[("README", b"none")]).expect("pack");

        let with = compress(&with.into_bytes().await.expect("read"));
        let without = compress(&without.into_bytes().await.expect("read"));
        assert!(has_root_dockerfile(&with).expect("inspect"));
        assert!(!has_root_dockerfile(&without).expect("inspect"));
    }

    #[test]
    fn truncated_gzip_is_not_accepted() {
        assert!(!matches!(has_root_dockerfile(&[0x1f, 0x8b, 0x08, 0x00]), Ok(true)));
    }
}
