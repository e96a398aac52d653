use std::collections::VecDeque;
use std::fs;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::RunaError;

/// Delivery target for serialized archive bytes. `close` finalizes and
/// publishes the archive; dropping a sink without closing it discards
/// whatever was written.
#[async_trait]
pub trait ArchiveSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RunaError>;
    async fn close(self) -> Result<(), RunaError>;
    async fn abort(self);
}

/// Writes the archive next to its final location and moves it into place
/// on close. The temporary file removes itself unless persisted, so an
/// abandoned download leaves nothing behind.
pub struct FileArchiveSink {
    file: tokio::fs::File,
    temp: NamedTempFile,
    final_path: Utf8PathBuf,
    bytes_written: u64,
}

impl FileArchiveSink {
    pub async fn create(dir: &Utf8Path, archive_name: &str) -> Result<Self, RunaError> {
        tokio::fs::create_dir_all(dir.as_std_path())
            .await
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".runa-ab")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;

        Ok(Self {
            file: tokio::fs::File::from_std(std_file),
            temp,
            final_path: dir.join(archive_name),
            bytes_written: 0,
        })
    }

    pub fn final_path(&self) -> &Utf8Path {
        &self.final_path
    }
}

#[async_trait]
impl ArchiveSink for FileArchiveSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), RunaError> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn close(self) -> Result<(), RunaError> {
        let Self {
            mut file,
            temp,
            final_path,
            bytes_written,
        } = self;
        file.flush()
            .await
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        file.sync_all()
            .await
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        drop(file);

        if final_path.as_std_path().exists() {
            fs::remove_file(final_path.as_std_path())
                .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        }
        temp.persist(final_path.as_std_path())
            .map_err(|err| RunaError::Filesystem(err.to_string()))?;
        tracing::info!(path = %final_path, bytes = bytes_written, "archive delivered");
        Ok(())
    }

    async fn abort(self) {
        tracing::debug!(path = %self.final_path, "discarding partial archive");
    }
}

/// In-memory staging buffer between the seekable zip writer and a
/// forward-only sink.
///
/// The zip format patches an entry's local header after its body is
/// written, so bytes can only leave the buffer once the writer is known
/// to be done with them. `freeze` marks such a boundary and cuts the
/// obsolete prefix into sink-sized chunks; writes below the committed
/// boundary are a protocol violation and fail hard.
#[derive(Debug)]
struct ChunkSpool {
    committed: u64,
    tail: Vec<u8>,
    pos: u64,
    chunks: VecDeque<Bytes>,
    chunk_size: usize,
}

impl ChunkSpool {
    fn new(chunk_size: usize) -> Self {
        Self {
            committed: 0,
            tail: Vec::new(),
            pos: 0,
            chunks: VecDeque::new(),
            chunk_size,
        }
    }

    fn end_position(&self) -> u64 {
        self.committed + self.tail.len() as u64
    }

    fn write_at_pos(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos < self.committed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "write at {} below committed archive offset {}",
                    self.pos, self.committed
                ),
            ));
        }
        let offset = (self.pos - self.committed) as usize;
        let end = offset + buf.len();
        if end > self.tail.len() {
            self.tail.resize(end, 0);
        }
        self.tail[offset..end].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek_to(&mut self, seek: SeekFrom) -> io::Result<u64> {
        let target = match seek {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.end_position().checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.pos = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before archive start",
            )),
        }
    }

    fn freeze(&mut self, upto: u64) -> Result<(), RunaError> {
        if upto < self.committed || upto > self.end_position() {
            return Err(RunaError::Archive(format!(
                "freeze boundary {upto} outside [{}, {}]",
                self.committed,
                self.end_position()
            )));
        }
        let released = (upto - self.committed) as usize;
        for piece in self.tail[..released].chunks(self.chunk_size) {
            self.chunks.push_back(Bytes::copy_from_slice(piece));
        }
        self.tail.drain(..released);
        self.committed = upto;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Bytes> {
        self.chunks.drain(..).collect()
    }
}

/// Cloneable handle over the spool. The zip writer owns one clone as its
/// `Write + Seek` target while the pipeline drains chunks through another.
#[derive(Debug, Clone)]
pub struct SpoolHandle {
    inner: Arc<Mutex<ChunkSpool>>,
}

impl SpoolHandle {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChunkSpool::new(chunk_size))),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, ChunkSpool>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("archive spool lock poisoned"))
    }

    pub fn end_position(&self) -> Result<u64, RunaError> {
        Ok(self
            .lock()
            .map_err(|err| RunaError::Archive(err.to_string()))?
            .end_position())
    }

    pub fn freeze(&self, upto: u64) -> Result<(), RunaError> {
        self.lock()
            .map_err(|err| RunaError::Archive(err.to_string()))?
            .freeze(upto)
    }

    pub fn take_chunks(&self) -> Result<Vec<Bytes>, RunaError> {
        Ok(self
            .lock()
            .map_err(|err| RunaError::Archive(err.to_string()))?
            .take_chunks())
    }
}

impl Write for SpoolHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write_at_pos(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SpoolHandle {
    fn seek(&mut self, seek: SeekFrom) -> io::Result<u64> {
        self.lock()?.seek_to(seek)
    }
}

/// Incremental zip serializer. Entries are appended one at a time; after
/// each `begin_entry` the previous entry's record is fully patched and
/// its bytes become drainable, which keeps memory bounded to roughly one
/// entry regardless of archive size.
pub struct ArchiveBuilder {
    writer: ZipWriter<SpoolHandle>,
    spool: SpoolHandle,
}

impl ArchiveBuilder {
    pub fn new(chunk_size: usize) -> Self {
        let spool = SpoolHandle::new(chunk_size);
        Self {
            writer: ZipWriter::new(spool.clone()),
            spool,
        }
    }

    /// Opens the next entry. Photo bodies are already compressed, so
    /// entries are stored rather than deflated, matching the delivered
    /// archive of the original viewer.
    pub fn begin_entry(&mut self, name: &str) -> Result<(), RunaError> {
        let boundary = self.spool.end_position()?;
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        self.writer
            .start_file(name, options)
            .map_err(|err| RunaError::Archive(err.to_string()))?;
        self.spool.freeze(boundary)?;
        Ok(())
    }

    pub fn write_entry_body(&mut self, body: &[u8]) -> Result<(), RunaError> {
        self.writer
            .write_all(body)
            .map_err(|err| RunaError::Archive(err.to_string()))?;
        Ok(())
    }

    /// Bytes that are final and ready for the sink.
    pub fn drain(&mut self) -> Result<Vec<Bytes>, RunaError> {
        self.spool.take_chunks()
    }

    /// Writes the central directory and releases every remaining byte.
    pub fn finish(mut self) -> Result<Vec<Bytes>, RunaError> {
        self.writer
            .finish()
            .map_err(|err| RunaError::Archive(err.to_string()))?;
        let end = self.spool.end_position()?;
        self.spool.freeze(end)?;
        self.spool.take_chunks()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::*;

    fn collect(chunks: impl IntoIterator<Item = Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn spool_releases_frozen_prefix_in_chunk_sized_pieces() {
        let mut spool = ChunkSpool::new(4);
        spool.write_at_pos(b"hello world").unwrap();
        spool.freeze(5).unwrap();

        let chunks = spool.take_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(&chunks[0][..], b"hell");
        assert_eq!(&chunks[1][..], b"o");
        assert_eq!(spool.end_position(), 11);
    }

    #[test]
    fn spool_rejects_write_below_committed() {
        let mut spool = ChunkSpool::new(8);
        spool.write_at_pos(b"abcdef").unwrap();
        spool.freeze(4).unwrap();

        spool.seek_to(SeekFrom::Start(2)).unwrap();
        let err = spool.write_at_pos(b"XY").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        spool.seek_to(SeekFrom::Start(4)).unwrap();
        spool.write_at_pos(b"EF").unwrap();
        assert_eq!(&spool.tail, b"EF");
    }

    #[test]
    fn spool_seek_arithmetic() {
        let mut spool = ChunkSpool::new(8);
        spool.write_at_pos(b"0123456789").unwrap();
        assert_eq!(spool.seek_to(SeekFrom::End(-2)).unwrap(), 8);
        assert_eq!(spool.seek_to(SeekFrom::Current(1)).unwrap(), 9);
        assert_eq!(spool.seek_to(SeekFrom::Start(3)).unwrap(), 3);
        assert!(spool.seek_to(SeekFrom::Current(-10)).is_err());
    }

    #[test]
    fn spool_freeze_bounds_checked() {
        let mut spool = ChunkSpool::new(8);
        spool.write_at_pos(b"abc").unwrap();
        spool.freeze(2).unwrap();
        assert!(spool.freeze(1).is_err());
        assert!(spool.freeze(9).is_err());
    }

    #[test]
    fn builder_output_is_a_readable_archive() {
        let mut builder = ArchiveBuilder::new(16);
        let mut assembled = Vec::new();

        builder.begin_entry("rome.jpg").unwrap();
        builder.write_entry_body(b"rome bytes").unwrap();
        assembled.extend(collect(builder.drain().unwrap()));

        builder.begin_entry("paris.jpg").unwrap();
        builder.write_entry_body(b"paris bytes, a few more of them").unwrap();
        assembled.extend(collect(builder.drain().unwrap()));

        assembled.extend(collect(builder.finish().unwrap()));

        let mut archive = ZipArchive::new(Cursor::new(assembled)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut body = String::new();
        archive
            .by_name("rome.jpg")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "rome bytes");

        body.clear();
        archive
            .by_name("paris.jpg")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "paris bytes, a few more of them");
    }

    #[test]
    fn builder_empty_archive_is_valid() {
        let builder = ArchiveBuilder::new(16);
        let assembled = collect(builder.finish().unwrap());
        let archive = ZipArchive::new(Cursor::new(assembled)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn builder_keeps_duplicate_entry_names() {
        let mut builder = ArchiveBuilder::new(16);
        builder.begin_entry("a.jpg").unwrap();
        builder.write_entry_body(b"first").unwrap();
        builder.begin_entry("a.jpg").unwrap();
        builder.write_entry_body(b"second").unwrap();
        let assembled = collect(builder.finish().unwrap());

        let archive = ZipArchive::new(Cursor::new(assembled)).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[tokio::test]
    async fn file_sink_close_persists_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        let mut sink = FileArchiveSink::create(dir_path, "download.zip").await.unwrap();
        sink.write(Bytes::from_static(b"payload")).await.unwrap();
        let final_path = sink.final_path().to_owned();
        sink.close().await.unwrap();

        assert_eq!(fs::read(final_path.as_std_path()).unwrap(), b"payload");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn file_sink_abort_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        let mut sink = FileArchiveSink::create(dir_path, "download.zip").await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort().await;

        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn file_sink_replaces_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(dir.path().join("download.zip"), b"old").unwrap();

        let mut sink = FileArchiveSink::create(dir_path, "download.zip").await.unwrap();
        sink.write(Bytes::from_static(b"new contents")).await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            fs::read(dir.path().join("download.zip")).unwrap(),
            b"new contents"
        );
    }
}
