//! 아티팩트와 청크 읽기
//!
//! - Artifact: 이름 + 바이트 소스 (파일 또는 메모리)
//! - ChunkReader: 시도마다 새로 여는 제한 크기 청크 스트림

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::{Error, Result};

/// 아티팩트 바이트 소스
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// 디스크 파일 (시도마다 다시 연다)
    File(PathBuf),

    /// 메모리 버퍼 (복제 비용 없음)
    Memory(Bytes),
}

/// 전송할 아티팩트
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    source: ArtifactSource,
}

impl Artifact {
    /// 파일 경로로 생성 (이름은 파일명)
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidName(path.display().to_string()))?;

        Ok(Self {
            name,
            source: ArtifactSource::File(path.to_path_buf()),
        })
    }

    /// 메모리 데이터로 생성
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            source: ArtifactSource::Memory(data.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ArtifactSource {
        &self.source
    }

    /// 알려진 크기 (파일은 열어봐야 알 수 있음)
    pub fn size_hint(&self) -> Option<u64> {
        match &self.source {
            ArtifactSource::Memory(data) => Some(data.len() as u64),
            ArtifactSource::File(_) => None,
        }
    }

    /// 새 독립 리더 생성
    pub async fn open(&self, chunk_size: usize) -> Result<ChunkReader> {
        let inner = match &self.source {
            ArtifactSource::File(path) => {
                let file = File::open(path)
                    .await
                    .map_err(|e| Error::storage(path, e))?;
                ReaderInner::File {
                    file,
                    path: path.clone(),
                }
            }
            ArtifactSource::Memory(data) => ReaderInner::Memory {
                data: data.clone(),
                offset: 0,
            },
        };

        Ok(ChunkReader {
            inner,
            chunk_size: chunk_size.max(1),
        })
    }
}

enum ReaderInner {
    File { file: File, path: PathBuf },
    Memory { data: Bytes, offset: usize },
}

/// 제한 크기 청크 리더
pub struct ChunkReader {
    inner: ReaderInner,
    chunk_size: usize,
}

impl ChunkReader {
    /// 다음 청크 (끝이면 None)
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.inner {
            ReaderInner::File { file, path } => {
                let mut buf = vec![0u8; self.chunk_size];
                let n = file.read(&mut buf).await.map_err(|e| Error::storage(&*path, e))?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            ReaderInner::Memory { data, offset } => {
                if *offset >= data.len() {
                    return Ok(None);
                }
                let end = (*offset + self.chunk_size).min(data.len());
                let chunk = data.slice(*offset..end);
                *offset = end;
                Ok(Some(chunk))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(reader: &mut ChunkReader) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_memory_chunking() {
        let data: Vec<u8> = (0..250u8).collect();
        let artifact = Artifact::from_bytes("data.bin", data.clone());

        let chunks = collect(&mut artifact.open(100).await.unwrap()).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 50);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_file_reopen_is_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let artifact = Artifact::from_path(&path).unwrap();
        assert_eq!(artifact.name(), "report.txt");
        assert_eq!(artifact.size_hint(), None);

        // 한 리더를 일부 소비해도 다른 리더는 처음부터 읽는다
        let mut first = artifact.open(3).await.unwrap();
        assert_eq!(first.next_chunk().await.unwrap().unwrap().as_ref(), b"abc");

        let second = collect(&mut artifact.open(3).await.unwrap()).await;
        assert_eq!(second.concat(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_missing_file_is_storage_error() {
        let artifact = Artifact::from_path("/nonexistent/qft/missing.bin").unwrap();
        match artifact.open(1024).await {
            Err(Error::Storage { .. }) => {}
            other => panic!("storage error expected, got {:?}", other.err()),
        }
    }
}
