//! 浏览器后端
//!
//! 会话管理器通过 [`BrowserBackend`] 启动浏览器，拿到一个 [`SessionHandle`]。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, Page};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::browser::installer::BrowserInstaller;
use crate::browser::launcher::launch_browser;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{JsExecutor, PageDriver};
use crate::models::StorageState;

/// 一个存活的浏览器会话：页面 + 浏览器进程
pub struct SessionHandle {
    pub page: Box<dyn PageDriver>,
    pub runtime: Box<dyn BrowserRuntime>,
}

/// 浏览器进程的生命周期
#[async_trait]
pub trait BrowserRuntime: Send + Sync {
    /// 关闭浏览器并停止事件任务；可以重复调用
    async fn shutdown(&self);
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    fn is_installed(&self) -> bool;

    async fn install(&self) -> AppResult<()>;

    /// 启动浏览器并打开一个页面，有快照时先恢复 cookies 和 localStorage
    async fn launch(&self, headless: bool, state: Option<&StorageState>) -> AppResult<SessionHandle>;
}

/// chromiumoxide 实现
pub struct ChromiumBackend {
    installer: BrowserInstaller,
    page_load_timeout: Duration,
}

impl ChromiumBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            installer: BrowserInstaller::from_config(config),
            page_load_timeout: config.timings.page_load_timeout(),
        }
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBackend {
    fn is_installed(&self) -> bool {
        self.installer.locate().is_some()
    }

    async fn install(&self) -> AppResult<()> {
        self.installer.install().await
    }

    async fn launch(&self, headless: bool, state: Option<&StorageState>) -> AppResult<SessionHandle> {
        let executable = self
            .installer
            .locate()
            .ok_or_else(|| AppError::Launch("未找到浏览器可执行文件".to_string()))?;

        let (browser, handler) = launch_browser(&executable, headless).await?;

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                ChromiumRuntime::new(browser, handler).shutdown().await;
                return Err(AppError::Launch(format!("创建页面失败: {}", e)));
            }
        };

        if let Some(state) = state {
            if let Err(e) = restore_storage_state(&page, state).await {
                warn!("⚠️ 恢复会话快照失败，将重新登录: {}", e);
            }
        }

        Ok(SessionHandle {
            page: Box::new(JsExecutor::new(page, self.page_load_timeout)),
            runtime: Box::new(ChromiumRuntime::new(browser, handler)),
        })
    }
}

async fn restore_storage_state(page: &Page, state: &StorageState) -> AppResult<()> {
    let cookies: Vec<CookieParam> = state
        .cookies
        .iter()
        .map(|c| {
            let mut param = CookieParam::new(c.name.clone(), c.value.clone());
            param.domain = Some(c.domain.clone());
            param.path = Some(c.path.clone());
            param.secure = Some(c.secure);
            param.http_only = Some(c.http_only);
            param.same_site = c
                .same_site
                .as_deref()
                .and_then(|s| s.parse::<CookieSameSite>().ok());
            if c.expires > 0.0 {
                param.expires = Some(TimeSinceEpoch::new(c.expires));
            }
            param
        })
        .collect();

    if !cookies.is_empty() {
        debug!("🍪 恢复 {} 个 cookie", cookies.len());
        page.set_cookies(cookies).await?;
    }

    for origin in &state.origins {
        if origin.local_storage.is_empty() {
            continue;
        }
        let entries: Vec<(&str, &str)> = origin
            .local_storage
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        let script = format!(
            "if (location.origin === {}) {{ for (const [k, v] of {}) {{ window.localStorage.setItem(k, v); }} }}",
            serde_json::to_string(&origin.origin)?,
            serde_json::to_string(&entries)?
        );
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await?;
    }

    Ok(())
}

/// chromiumoxide 浏览器进程
pub struct ChromiumRuntime {
    inner: Mutex<Option<(Browser, JoinHandle<()>)>>,
}

impl ChromiumRuntime {
    fn new(browser: Browser, handler: JoinHandle<()>) -> Self {
        Self {
            inner: Mutex::new(Some((browser, handler))),
        }
    }
}

#[async_trait]
impl BrowserRuntime for ChromiumRuntime {
    async fn shutdown(&self) {
        let taken = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some((mut browser, handler)) = taken else {
            return;
        };

        if let Err(e) = browser.close().await {
            debug!("关闭浏览器失败: {}", e);
        }
        if let Err(e) = browser.wait().await {
            debug!("等待浏览器退出失败: {}", e);
        }
        handler.abort();
        debug!("🧹 浏览器已关闭");
    }
}
