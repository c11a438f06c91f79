//! 会话管理 - 业务能力层
//!
//! 唯一持有浏览器会话的模块：启动、恢复快照、保存快照、关闭。
//! 同一时刻最多一个存活的会话。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::browser::{BrowserBackend, SessionHandle};
use crate::error::{AppError, AppResult};
use crate::infrastructure::PageDriver;
use crate::models::{StatusUpdate, StorageState};
use crate::store::StatusStore;
use crate::utils::fs::{remove_if_exists, write_atomic};

pub struct SessionManager {
    backend: Arc<dyn BrowserBackend>,
    store: Arc<StatusStore>,
    storage_state_path: PathBuf,
    handle: Option<SessionHandle>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn BrowserBackend>,
        store: Arc<StatusStore>,
        storage_state_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            store,
            storage_state_path: storage_state_path.into(),
            handle: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn storage_state_path(&self) -> &Path {
        &self.storage_state_path
    }

    /// 启动浏览器会话；已初始化时直接返回
    ///
    /// 首次使用时安装浏览器；启动失败会强制重装一次再重试启动。
    pub async fn initialize(&mut self, headless: bool) -> AppResult<&dyn PageDriver> {
        if self.handle.is_none() {
            let handle = self.launch(headless).await?;
            self.handle = Some(handle);
        }
        self.page()
    }

    async fn launch(&self, headless: bool) -> AppResult<SessionHandle> {
        if !self.backend.is_installed() {
            self.install().await?;
        }

        let state = match StorageState::load(&self.storage_state_path) {
            Ok(Some(state)) => {
                info!("📂 加载会话快照: {}", self.storage_state_path.display());
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("⚠️ 会话快照无法读取，忽略: {}", e);
                None
            }
        };

        info!("🚀 初始化浏览器会话 (无头模式: {})", headless);
        match self.backend.launch(headless, state.as_ref()).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                warn!("⚠️ 浏览器启动失败: {}，重新安装后重试", e);
                self.install().await?;
                self.backend.launch(headless, state.as_ref()).await
            }
        }
    }

    async fn install(&self) -> AppResult<()> {
        info!("📦 安装浏览器依赖...");
        self.store.update(StatusUpdate {
            message: Some("Installing dependency (Chromium)...".to_string()),
            ..Default::default()
        })?;
        self.backend.install().await
    }

    /// 当前页面
    pub fn page(&self) -> AppResult<&dyn PageDriver> {
        self.handle
            .as_ref()
            .map(|handle| handle.page.as_ref())
            .ok_or(AppError::SessionNotInitialized)
    }

    /// 关闭页面和浏览器；未初始化时什么也不做
    pub async fn cleanup(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if let Err(e) = handle.page.close().await {
            debug!("关闭页面失败: {}", e);
        }
        handle.runtime.shutdown().await;
        info!("🧹 浏览器会话已清理");
    }

    /// 清理会话并删除快照文件，返回快照文件是否存在
    pub async fn clear_session(&mut self) -> AppResult<bool> {
        self.cleanup().await;
        let existed = remove_if_exists(&self.storage_state_path)?;
        if existed {
            info!("🗑️ 会话快照已删除");
        }
        Ok(existed)
    }

    /// 保存当前 cookies / localStorage（只在确认登录后调用）
    pub async fn save_context(&self) -> AppResult<()> {
        let state = self.page()?.storage_state().await?;
        let json = serde_json::to_vec_pretty(&state)?;
        write_atomic(&self.storage_state_path, &json)?;
        info!("💾 会话已保存: {}", self.storage_state_path.display());
        Ok(())
    }
}
