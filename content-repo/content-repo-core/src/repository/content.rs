//! Checksumming of incoming content.
//!
//! Incoming bytes are hashed while being spooled to a temporary file, so a
//! single pass yields both the checksum and a replayable copy for the
//! content store. The spool file is deleted when [`Spooled`] is dropped.

use ring::digest::{self, Context, SHA256};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Poll};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

/// SHA-256 of `bytes`, hex encoded.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(digest::digest(&SHA256, bytes))
}

/// Pass-through reader feeding everything it reads into a SHA-256 digest.
pub struct HashingReader<R> {
    inner: R,
    digest: Context,
    length: u64,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            digest: Context::new(&SHA256),
            length: 0,
        }
    }

    /// Bytes read so far and their hex encoded checksum.
    pub fn finish(self) -> (u64, String) {
        (self.length, hex::encode(self.digest.finish()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = &buf.filled()[before..];
        this.digest.update(read);
        this.length += read.len() as u64;
        Poll::Ready(Ok(()))
    }
}

pub struct Spooled {
    file: NamedTempFile,
    pub length: u64,
    pub checksum: String,
}

impl Spooled {
    /// A fresh reader over the spooled bytes.
    pub async fn open(&self) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(self.file.path()).await
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Drain `reader` into a temporary file in `dir` (or the system temp
/// directory), hashing on the way.
pub async fn spool<R>(reader: R, dir: Option<&Path>) -> io::Result<Spooled>
where
    R: AsyncRead + Unpin,
{
    let file = match dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    let mut out = tokio::fs::File::from_std(file.reopen()?);
    let mut hashing = HashingReader::new(reader);
    tokio::io::copy(&mut hashing, &mut out).await?;
    out.flush().await?;
    let (length, checksum) = hashing.finish();
    Ok(Spooled { file, length, checksum })
}
