//! 导出流程 - 流程层
//!
//! 核心职责：定义"一次导出"的完整处理流程
//!
//! 流程顺序：
//! 1. 导航到导出页面（途中遇到登录页则委托 [`AuthFlow`]）
//! 2. 点击"请求导出"按钮（尽力而为）
//! 3. 等待远端生成导出（有界轮询，可能持续数小时）
//! 4. 下载文件
//!
//! 除了"需要验证码"之外，任何故障都记录日志并转换为 `NoFile`，不会向上抛出。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::selectors::{DOWNLOAD_BUTTON, REQUEST_EXPORT_BUTTON};
use crate::infrastructure::PageDriver;
use crate::models::{
    AutomationStatus, Credentials, ExportResult, GenerationProgress, LoginOutcome, NoFileReason,
    PageKind, SiteUrls, StatusUpdate,
};
use crate::services::{AuthFlow, SessionManager};
use crate::store::StatusStore;
use crate::workflow::RunCtx;

/// 中止检查的最小粒度
const ABORT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// 导航结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Navigation {
    Reached,
    PasscodeRequired,
}

/// 等待导出生成的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Generation {
    Ready,
    TimedOut,
    Aborted,
}

/// 导出入口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportMode {
    RequestNew,
    DownloadExisting,
    /// 从持久化的轮询次数继续等待
    Resume { attempts_done: u32 },
}

/// 导出流程
///
/// - 编排完整的导出流程
/// - 不持有任何资源（page 属于会话管理器）
/// - 下载完成后不负责导入
pub struct ExportOrchestrator<'a> {
    session: &'a SessionManager,
    store: &'a StatusStore,
    config: &'a Config,
    credentials: &'a Credentials,
    abort: &'a AtomicBool,
    ctx: &'a RunCtx,
    site: SiteUrls,
}

impl<'a> ExportOrchestrator<'a> {
    pub fn new(
        session: &'a SessionManager,
        store: &'a StatusStore,
        config: &'a Config,
        credentials: &'a Credentials,
        abort: &'a AtomicBool,
        ctx: &'a RunCtx,
    ) -> Self {
        Self {
            session,
            store,
            config,
            credentials,
            abort,
            ctx,
            site: config.site(),
        }
    }

    /// 请求新的导出 → 等待生成 → 下载
    pub async fn request_new_export_and_download(&self, target_dir: &Path) -> ExportResult {
        self.run(target_dir, ExportMode::RequestNew).await
    }

    /// 直接下载已有的导出（不重新触发生成）
    pub async fn download_existing_export(&self, target_dir: &Path) -> ExportResult {
        self.run(target_dir, ExportMode::DownloadExisting).await
    }

    /// 重启后继续等待上一次请求的导出
    pub async fn resume_export_and_download(
        &self,
        target_dir: &Path,
        attempts_done: u32,
    ) -> ExportResult {
        self.run(target_dir, ExportMode::Resume { attempts_done }).await
    }

    async fn run(&self, target_dir: &Path, mode: ExportMode) -> ExportResult {
        info!("{} 📤 开始导出流程 ({:?})", self.ctx, mode);
        match self.try_run(target_dir, mode).await {
            Ok(result) => result,
            Err(e) => {
                error!("{} ❌ 导出流程失败: {}", self.ctx, e);
                ExportResult::NoFile(NoFileReason::Failed(e.to_string()))
            }
        }
    }

    async fn try_run(&self, target_dir: &Path, mode: ExportMode) -> AppResult<ExportResult> {
        if self.navigate().await? == Navigation::PasscodeRequired {
            return Ok(ExportResult::PasscodeRequired);
        }

        let start_attempt = match mode {
            ExportMode::RequestNew => {
                self.store
                    .update_status(AutomationStatus::RequestingExport, "Requesting export...")?;
                if self.click_request_button().await {
                    info!("{} ✓ 已请求导出，等待生成...", self.ctx);
                } else {
                    info!("{} 导出可能已在生成中或未找到按钮，继续等待", self.ctx);
                }
                Some(0)
            }
            ExportMode::Resume { attempts_done } => Some(attempts_done),
            ExportMode::DownloadExisting => None,
        };

        if let Some(start_attempt) = start_attempt {
            match self.wait_for_generation(start_attempt).await? {
                Generation::Ready => {}
                Generation::TimedOut => {
                    warn!("{} ⏰ 等待导出生成超时", self.ctx);
                    return Ok(ExportResult::NoFile(NoFileReason::GenerationTimedOut));
                }
                Generation::Aborted => {
                    warn!("{} 🛑 会话已被清除，停止等待", self.ctx);
                    return Ok(ExportResult::NoFile(NoFileReason::Aborted));
                }
            }
        }

        self.store
            .update_status(AutomationStatus::Downloading, "Downloading export...")?;
        match self.download(target_dir).await? {
            Some(path) => Ok(ExportResult::Downloaded(path)),
            None => Ok(ExportResult::NoFile(NoFileReason::DownloadUnavailable)),
        }
    }

    fn page(&self) -> AppResult<&'a dyn PageDriver> {
        self.session.page()
    }

    /// 导航到导出页面，途中处理登录重定向
    async fn navigate(&self) -> AppResult<Navigation> {
        let page = self.page()?;
        let timings = &self.config.timings;
        let export_url = self.site.export_url();

        info!("{} 🌐 导航到导出页面: {}", self.ctx, export_url);
        page.goto(&export_url).await?;

        for _ in 0..timings.navigation_attempts {
            page.wait_for_settle(timings.settle_timeout()).await;

            let url = page.current_url().await?;
            match self.site.classify(&url) {
                PageKind::Export => {
                    info!("{} ✓ 已到达导出页面", self.ctx);
                    return Ok(Navigation::Reached);
                }
                PageKind::Login => {
                    info!("{} 🔐 被重定向到登录页，开始登录...", self.ctx);
                    self.store
                        .update_status(AutomationStatus::LoggingIn, "Logging in...")?;
                    let auth = AuthFlow::new(self.session, self.credentials, self.config);
                    if auth.login().await? == LoginOutcome::AwaitingPasscode {
                        return Ok(Navigation::PasscodeRequired);
                    }
                    page.goto(&export_url).await?;
                }
                PageKind::Home => {
                    info!("{} 落在账户首页，重新导航到导出页面", self.ctx);
                    page.goto(&export_url).await?;
                }
                PageKind::Other => {}
            }

            sleep(timings.navigation_interval()).await;
        }

        let url = page.current_url().await?;
        if self.site.classify(&url) == PageKind::Export {
            return Ok(Navigation::Reached);
        }
        warn!("{} ⚠️ 无法到达导出页面，当前 URL: {}", self.ctx, url);
        Err(AppError::navigation(url, "export page not reached"))
    }

    /// 点击"请求导出"按钮，返回是否点击成功
    ///
    /// 按钮缺失、被禁用、点击失败都不是错误："已请求"和"刚请求"从这里往后看起来一样。
    async fn click_request_button(&self) -> bool {
        let page = match self.page() {
            Ok(page) => page,
            Err(_) => return false,
        };
        let timings = &self.config.timings;

        let Some(button) = REQUEST_EXPORT_BUTTON.wait_for(page, timings.element_wait()).await else {
            info!("{} 未找到请求导出按钮", self.ctx);
            return false;
        };

        // 等待前端渲染完成
        sleep(timings.hydration_delay()).await;

        if !self.is_clickable(page, button).await {
            info!("{} 请求导出按钮不可用（导出可能已在生成中）", self.ctx);
            return false;
        }

        info!("{} 🖱️ 点击请求导出按钮", self.ctx);
        if let Err(e) = page.click(button).await {
            error!("{} 点击请求导出按钮失败: {}", self.ctx, e);
            return false;
        }
        sleep(timings.post_click_delay()).await;
        true
    }

    async fn is_clickable(&self, page: &dyn PageDriver, selector: &str) -> bool {
        let disabled = page.attribute(selector, "disabled").await.ok().flatten().is_some();
        let aria_disabled = page
            .attribute(selector, "aria-disabled")
            .await
            .ok()
            .flatten()
            .is_some_and(|v| v == "true");
        !disabled && !aria_disabled
    }

    /// 请求按钮重新可用说明导出已生成
    async fn generation_ready(&self, page: &dyn PageDriver) -> bool {
        let Some(button) = REQUEST_EXPORT_BUTTON.find(page).await else {
            return false;
        };
        page.is_enabled(button).await.unwrap_or(false) && self.is_clickable(page, button).await
    }

    /// 有界轮询等待导出生成，每次轮询都把进度写入状态存储
    async fn wait_for_generation(&self, start_attempt: u32) -> AppResult<Generation> {
        let page = self.page()?;
        let timings = &self.config.timings;
        let max_retries = timings.generation_max_retries;
        let started_at = self
            .store
            .get()
            .generation_wait
            .map(|p| p.started_at)
            .filter(|_| start_attempt > 0)
            .unwrap_or_else(|| Local::now().naive_local());

        for attempt in start_attempt..max_retries {
            if self.aborted() {
                return Ok(Generation::Aborted);
            }

            if self.generation_ready(page).await {
                info!("{} ✅ 导出已生成", self.ctx);
                return Ok(Generation::Ready);
            }

            let progress = GenerationProgress {
                attempts: attempt + 1,
                started_at,
            };
            info!(
                "{} ⏳ 导出生成中... (第 {}/{} 次检查，{} 秒后重试)",
                self.ctx,
                attempt + 1,
                max_retries,
                timings.generation_poll_interval_secs
            );
            self.store.update(
                StatusUpdate::status(
                    AutomationStatus::WaitingForGeneration,
                    format!(
                        "Waiting for export generation (check {}/{})...",
                        attempt + 1,
                        max_retries
                    ),
                )
                .with_generation_wait(Some(progress)),
            )?;

            if self.abortable_sleep(timings.generation_poll_interval()).await {
                return Ok(Generation::Aborted);
            }

            page.reload().await?;
            page.wait_for_settle(timings.settle_timeout()).await;
        }

        if self.generation_ready(page).await {
            return Ok(Generation::Ready);
        }
        Ok(Generation::TimedOut)
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// 分段睡眠，期间检查中止标志；返回是否被中止
    async fn abortable_sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.aborted() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            sleep(remaining.min(ABORT_CHECK_INTERVAL)).await;
        }
    }

    /// 点击下载按钮并保存文件；没有按钮时返回 `None`
    async fn download(&self, target_dir: &Path) -> AppResult<Option<PathBuf>> {
        let page = self.page()?;
        let timings = &self.config.timings;

        let Some(button) = DOWNLOAD_BUTTON.wait_for(page, timings.download_button_wait()).await else {
            warn!("{} ⚠️ 未找到下载按钮", self.ctx);
            return Ok(None);
        };

        info!("{} ⬇️ 找到下载按钮，开始下载...", self.ctx);
        let path = page
            .download(button, target_dir, timings.download_timeout())
            .await?;
        info!("{} ✅ 已下载到: {}", self.ctx, path.display());
        Ok(Some(path))
    }
}
