//! Source objects and chunk partitioning

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Partition of an object into fixed-size chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(size: u64, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { size, chunk_size: chunk_size as u64 }
    }

    /// `ceil(size / chunk_size)`
    pub fn count(&self) -> u64 {
        self.size.div_ceil(self.chunk_size)
    }

    /// Byte range `(offset, len)` of chunk `index`
    pub fn range(&self, index: u64) -> (u64, usize) {
        let offset = index.saturating_mul(self.chunk_size).min(self.size);
        let len = self.chunk_size.min(self.size - offset);
        (offset, len as usize)
    }
}

/// Read-only object being uploaded
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Total size in bytes
    fn size(&self) -> u64;

    /// Read exactly `len` bytes at `offset`
    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

#[async_trait]
impl ChunkSource for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        use std::io::{Error, ErrorKind};

        let start = usize::try_from(offset)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "offset out of range"))?;
        self.get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::new(ErrorKind::UnexpectedEof, "read past end of object"))
    }
}

/// A file on disk, sized once at open
pub struct FileSource {
    file: Mutex<tokio::fs::File>,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.as_ref().display()),
            ));
        }
        Ok(Self { file: Mutex::new(file), size: meta.len() })
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::DEFAULT_CHUNK_SIZE;

    #[test]
    fn test_chunk_count() {
        assert_eq!(ChunkPlan::new(0, DEFAULT_CHUNK_SIZE).count(), 0);
        assert_eq!(ChunkPlan::new(1, DEFAULT_CHUNK_SIZE).count(), 1);
        assert_eq!(ChunkPlan::new(1_048_576, DEFAULT_CHUNK_SIZE).count(), 1);
        assert_eq!(ChunkPlan::new(1_048_577, DEFAULT_CHUNK_SIZE).count(), 2);
        assert_eq!(ChunkPlan::new(3_000_000, DEFAULT_CHUNK_SIZE).count(), 3);
    }

    #[test]
    fn test_chunk_sizes_for_3mb_object() {
        let plan = ChunkPlan::new(3_000_000, DEFAULT_CHUNK_SIZE);
        let sizes: Vec<usize> = (0..plan.count()).map(|i| plan.range(i).1).collect();
        assert_eq!(sizes, vec![1_048_576, 1_048_576, 902_848]);
        assert_eq!(plan.range(2).0, 2_097_152);
    }

    #[test]
    fn test_last_chunk_length_formula() {
        for (size, chunk) in [(10u64, 3usize), (9, 3), (1, 7), (100, 1), (4097, 4096)] {
            let plan = ChunkPlan::new(size, chunk);
            let count = plan.count();
            assert_eq!(plan.range(count - 1).1 as u64, size - (count - 1) * chunk as u64);
        }
    }

    #[tokio::test]
    async fn test_vec_source() {
        let source: Vec<u8> = (0u8..10).collect();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_at(3, 4).await.unwrap(), vec![3, 4, 5, 6]);
        assert!(source.read_at(8, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("object.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_at(6, 4).await.unwrap(), b"6789");
        assert_eq!(source.read_at(0, 2).await.unwrap(), b"01");

        assert!(FileSource::open(dir.path()).await.is_err());
    }
}
