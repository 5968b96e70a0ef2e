//! 아티팩트 싱크 (수신측 저장소)
//!
//! 완료 순서: fsync → 권한 적용 → 완료 신호.
//! 완료 신호를 받은 관찰자는 항상 내구성이 확보된 파일만 본다.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// 이름 충돌 시 시도할 최대 접미사
const MAX_SUFFIX: u32 = 10_000;

/// 완료된 아티팩트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedArtifact {
    /// 송신자가 요청한 이름
    pub name: String,

    /// 실제 저장 경로 (충돌 시 `name_N`)
    pub path: PathBuf,

    /// 총 바이트
    pub total_bytes: u64,
}

/// 다운로드 디렉터리
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    checkpoint_interval: u64,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, checkpoint_interval: u64) -> Self {
        Self {
            dir: dir.into(),
            checkpoint_interval,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 새 목적지 열기
    ///
    /// 기존 파일은 덮어쓰지 않고 첫 번째 빈 `name_N`을 고른다.
    pub async fn open(&self, name: &str) -> Result<SinkHandle> {
        let file_name = sanitize(name)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::storage(&self.dir, e))?;

        for suffix in 0..=MAX_SUFFIX {
            let path = self.dir.join(candidate(&file_name, suffix));
            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => {
                    if suffix > 0 {
                        info!("이름 충돌: {} -> {}", name, path.display());
                    }
                    debug!("싱크 열림: {}", path.display());
                    return Ok(SinkHandle {
                        name: name.to_string(),
                        path,
                        file: Some(file),
                        written: 0,
                        checkpoint_interval: self.checkpoint_interval,
                        next_checkpoint: self.checkpoint_interval,
                        finalized: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::storage(path, e)),
            }
        }

        Err(Error::storage(
            self.dir.join(&file_name),
            std::io::Error::new(ErrorKind::AlreadyExists, "사용 가능한 접미사 없음"),
        ))
    }
}

/// 경로 구성요소를 제거한 파일명
fn sanitize(name: &str) -> Result<String> {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(base.to_string())
}

/// `report.txt` -> `report_1.txt`, `notes` -> `notes_1`
fn candidate(file_name: &str, suffix: u32) -> String {
    if suffix == 0 {
        return file_name.to_string();
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    }
}

/// 열린 목적지
#[derive(Debug)]
pub struct SinkHandle {
    name: String,
    path: PathBuf,
    file: Option<File>,
    written: u64,
    checkpoint_interval: u64,
    next_checkpoint: u64,
    finalized: bool,
}

impl SinkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// 바이트 추가
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => {
                return Err(Error::AlreadyFinalized {
                    name: self.name.clone(),
                })
            }
        };

        file.write_all(bytes)
            .await
            .map_err(|e| Error::storage(&self.path, e))?;
        self.written += bytes.len() as u64;

        // 관찰용 체크포인트 (정확성과 무관)
        if self.checkpoint_interval > 0 && self.written >= self.next_checkpoint {
            file.sync_data()
                .await
                .map_err(|e| Error::storage(&self.path, e))?;
            self.next_checkpoint += self.checkpoint_interval;
            info!(
                "  {} -> {:.2} GB 수신",
                self.name,
                self.written as f64 / (1024.0 * 1024.0 * 1024.0)
            );
        }
        Ok(())
    }

    /// 완료 처리 (두 번째 호출은 쓰기 없이 에러)
    pub async fn finalize(&mut self) -> Result<CompletedArtifact> {
        let Some(mut file) = self.file.take() else {
            return Err(Error::AlreadyFinalized {
                name: self.name.clone(),
            });
        };

        file.flush().await.map_err(|e| Error::storage(&self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage(&self.path, e))?;
        drop(file);

        apply_public_permissions(&self.path).await?;
        self.finalized = true;

        Ok(CompletedArtifact {
            name: self.name.clone(),
            path: self.path.clone(),
            total_bytes: self.written,
        })
    }

    /// 미완료 목적지 삭제
    ///
    /// `finalize`가 중간에 실패해 파일 핸들이 이미 닫혔어도 경로는 지운다.
    pub async fn abort(mut self) {
        drop(self.file.take());
        if self.finalized {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path).await {
            warn!("미완료 파일 삭제 실패 {}: {}", self.path.display(), e);
        } else {
            debug!("미완료 파일 삭제: {}", self.path.display());
        }
    }
}

#[cfg(unix)]
async fn apply_public_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
        .await
        .map_err(|e| Error::storage(path, e))
}

#[cfg(not(unix))]
async fn apply_public_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
