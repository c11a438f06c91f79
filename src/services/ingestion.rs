//! 导入服务 - 业务能力层
//!
//! 只负责"把下载好的导出文件交给下游"，不关心文件是怎么来的

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// 导出文件的导入方
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// 导入一个已下载的导出文件；失败不会自动重试
    async fn ingest(&self, file: &Path) -> Result<()>;
}

/// 收件目录导入
///
/// 职责：
/// - 把导出文件移动到收件目录，由下游解析器接手
/// - 文件名加时间前缀，避免覆盖上一次的导出
pub struct InboxIngestor {
    inbox_dir: PathBuf,
}

impl InboxIngestor {
    pub fn new(inbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
        }
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }
}

#[async_trait]
impl Ingestor for InboxIngestor {
    async fn ingest(&self, file: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(file)
            .await
            .with_context(|| format!("导出文件不存在: {}", file.display()))?;
        if metadata.len() == 0 {
            bail!("导出文件为空: {}", file.display());
        }

        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .context("导出文件没有文件名")?;

        tokio::fs::create_dir_all(&self.inbox_dir).await?;
        let target = self.inbox_dir.join(format!(
            "{}_{}",
            chrono::Local::now().format("%Y%m%d%H%M%S"),
            file_name
        ));
        debug!("移动导出文件: {} -> {}", file.display(), target.display());

        // 跨文件系统时 rename 会失败，退回到复制 + 删除
        if tokio::fs::rename(file, &target).await.is_err() {
            tokio::fs::copy(file, &target)
                .await
                .with_context(|| format!("无法复制到收件目录: {}", target.display()))?;
            tokio::fs::remove_file(file).await?;
        }

        info!("📥 导出文件已放入收件目录: {}", target.display());
        Ok(())
    }
}
