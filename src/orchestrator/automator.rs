//! 自动化运行器 - 编排层
//!
//! ## 职责
//!
//! 本模块是调度器和调用方共同使用的唯一入口，负责运行的准入、会话资源和状态收尾。
//!
//! ## 核心功能
//!
//! 1. **准入控制**：进程内运行标志 + 状态存储的原子检查，重叠的运行直接拒绝（不排队）
//! 2. **资源管理**：独占持有 [`SessionManager`]，除了停在验证码等待之外每次运行结束都清理会话
//! 3. **向下委托**：导出交给 [`ExportOrchestrator`]，登录交给 [`AuthFlow`]
//! 4. **收尾**：下载成功后调用导入方，把结果写回状态存储
//!
//! ## 设计特点
//!
//! - **显式构造**：由 `main` 创建一个 `Arc<Automator>`，调度器和调用方共享
//! - **失败只经由状态存储可见**：运行本身不向上抛出错误

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::browser::BrowserBackend;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthState, AutomationStatus, ExportResult, LoginOutcome, NoFileReason, PasscodeOutcome,
    ScheduleTime, StatusRecord, StatusUpdate,
};
use crate::services::{AuthFlow, Ingestor, SessionManager};
use crate::store::{Admission, StatusStore};
use crate::utils::fs::remove_if_exists;
use crate::utils::{mask_email, truncate_text};
use crate::workflow::{ExportOrchestrator, RunCtx, RunKind};

/// 本次运行要做什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPlan {
    /// 请求新的导出 → 等待 → 下载 → 导入
    FullExport,
    /// 下载已有导出 → 导入
    DownloadExisting,
    /// 继续等待上一次请求的导出
    ResumeGeneration { attempts_done: u32 },
    /// 上一次停在验证码：会话仍在等待时保持不动，否则重新走完整流程
    ResumeLogin,
}

impl RunPlan {
    /// 根据挂起前的状态决定恢复方式
    fn resume_from(prior: &StatusRecord) -> Self {
        match prior.status {
            AutomationStatus::WaitingForGeneration => RunPlan::ResumeGeneration {
                attempts_done: prior.generation_wait.map(|p| p.attempts).unwrap_or(0),
            },
            _ => RunPlan::ResumeLogin,
        }
    }
}

/// 一次运行的结果（同时已写入状态存储）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 下载并导入成功
    Completed(PathBuf),
    /// 停在验证码，会话保持存活
    AwaitingPasscode,
    /// 没有产生文件
    NoFile(NoFileReason),
    IngestionFailed(String),
    /// 会话初始化等基础设施故障
    Failed(String),
    /// 自动运行已关闭
    Skipped,
}

/// 验证码通过后的后续动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasscodeFollowUp {
    /// 在后台继续完整流程
    Run,
    /// 在后台下载已有导出
    Download,
    /// 只验证登录，随后关闭会话
    Test,
    #[default]
    None,
}

/// 调用方可修改的设置
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub email: Option<String>,
    /// 空字符串清除密码
    pub password: Option<String>,
    pub schedule_time: Option<String>,
    pub is_active: Option<bool>,
    pub headless: Option<bool>,
}

/// 调度器使用的运行入口
#[async_trait]
pub trait ExportRunner: Send + Sync {
    /// 每日定时运行
    async fn run_scheduled(&self) -> AppResult<RunOutcome>;

    /// 恢复一个挂起的运行
    async fn run_resume(&self) -> AppResult<RunOutcome>;
}

/// 进程内运行标志，drop 时释放
struct ActiveGuard {
    flag: Arc<AtomicBool>,
}

impl ActiveGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// 已通过准入的运行
pub struct RunTicket {
    ctx: RunCtx,
    prior: StatusRecord,
    _guard: ActiveGuard,
}

impl RunTicket {
    pub fn ctx(&self) -> &RunCtx {
        &self.ctx
    }

    /// 准入前的状态记录
    pub fn prior(&self) -> &StatusRecord {
        &self.prior
    }
}

/// 自动化运行器
pub struct Automator {
    config: Config,
    store: Arc<StatusStore>,
    session: Mutex<SessionManager>,
    ingestor: Arc<dyn Ingestor>,
    active: Arc<AtomicBool>,
    abort: AtomicBool,
}

impl Automator {
    pub fn new(
        config: Config,
        store: Arc<StatusStore>,
        backend: Arc<dyn BrowserBackend>,
        ingestor: Arc<dyn Ingestor>,
    ) -> Self {
        let session = SessionManager::new(backend, store.clone(), config.storage_state_file());
        Self {
            config,
            store,
            session: Mutex::new(session),
            ingestor,
            active: Arc::new(AtomicBool::new(false)),
            abort: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<StatusStore> {
        &self.store
    }

    /// 当前是否有运行在进行
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    // ========== 运行 ==========

    /// 准入检查：先占进程内标志，再原子地检查并写入状态
    pub fn begin(
        &self,
        kind: RunKind,
        admission: Admission,
        message: &str,
    ) -> AppResult<RunTicket> {
        let guard = ActiveGuard::acquire(&self.active)
            .ok_or_else(|| AppError::Busy(self.store.get().status))?;
        let prior = self.store.try_begin(admission, message)?;

        let ctx = RunCtx::new(kind);
        info!("{} ▶️ 运行开始 ({})", ctx, message);
        Ok(RunTicket {
            ctx,
            prior,
            _guard: guard,
        })
    }

    /// 执行一次已准入的运行；结果同时写入状态存储
    pub async fn execute(&self, ticket: RunTicket, plan: RunPlan) -> RunOutcome {
        let ctx = ticket.ctx.clone();
        self.abort.store(false, Ordering::SeqCst);

        let mut session = self.session.lock().await;
        let record = self.store.get();
        let credentials = record.credentials();
        let was_live = session.is_initialized();

        let initialized = session.initialize(record.headless).await.map(|_| ());
        if let Err(e) = initialized {
            error!("{} ❌ 浏览器会话初始化失败: {}", ctx, e);
            self.set_status(AutomationStatus::Error, format!("Sync failed: {}", e));
            session.cleanup().await;
            return RunOutcome::Failed(e.to_string());
        }

        if plan == RunPlan::ResumeLogin && was_live {
            let auth = AuthFlow::new(&session, &credentials, &self.config);
            if let Ok(AuthState::PasscodeRequired) = auth.auth_state().await {
                info!("{} 📨 仍在等待验证码", ctx);
                self.set_status(AutomationStatus::AwaitingOtp, "Waiting for OTP...");
                return RunOutcome::AwaitingPasscode;
            }
        }

        let target_dir = self.config.download_dir();
        let result = {
            let orchestrator = ExportOrchestrator::new(
                &session,
                &self.store,
                &self.config,
                &credentials,
                &self.abort,
                &ctx,
            );
            match plan {
                RunPlan::FullExport | RunPlan::ResumeLogin => {
                    self.set_status(
                        AutomationStatus::RequestingExport,
                        "Requesting and waiting for export (this may take hours)...",
                    );
                    orchestrator.request_new_export_and_download(&target_dir).await
                }
                RunPlan::DownloadExisting => orchestrator.download_existing_export(&target_dir).await,
                RunPlan::ResumeGeneration { attempts_done } => {
                    orchestrator
                        .resume_export_and_download(&target_dir, attempts_done)
                        .await
                }
            }
        };

        let outcome = self.finish(&ctx, result).await;
        if outcome != RunOutcome::AwaitingPasscode {
            session.cleanup().await;
        }
        info!("{} ⏹️ 运行结束: {:?}", ctx, outcome);
        outcome
    }

    async fn finish(&self, ctx: &RunCtx, result: ExportResult) -> RunOutcome {
        match result {
            ExportResult::PasscodeRequired => {
                info!("{} 📨 需要验证码，会话保持等待", ctx);
                self.set_status(AutomationStatus::AwaitingOtp, "Waiting for OTP...");
                RunOutcome::AwaitingPasscode
            }
            ExportResult::Downloaded(path) => {
                self.update(
                    StatusUpdate::status(
                        AutomationStatus::Ingesting,
                        format!("Downloaded to {}. Ingesting...", path.display()),
                    )
                    .with_generation_wait(None),
                );
                match self.ingestor.ingest(&path).await {
                    Ok(()) => {
                        info!("{} ✅ 同步与导入完成", ctx);
                        self.update(
                            StatusUpdate::status(AutomationStatus::Idle, "Sync and ingestion complete!")
                                .with_last_run(Local::now().naive_local()),
                        );
                        RunOutcome::Completed(path)
                    }
                    Err(e) => {
                        error!("{} ❌ 导入失败: {:#}", ctx, e);
                        self.set_status(
                            AutomationStatus::Error,
                            format!("Ingestion Failed: {}", truncate_text(&format!("{:#}", e), 300)),
                        );
                        RunOutcome::IngestionFailed(e.to_string())
                    }
                }
            }
            ExportResult::NoFile(NoFileReason::Aborted) => {
                self.update(
                    StatusUpdate::status(AutomationStatus::Idle, "Session cleared.")
                        .with_generation_wait(None),
                );
                RunOutcome::NoFile(NoFileReason::Aborted)
            }
            ExportResult::NoFile(reason) => {
                warn!("{} ⚠️ 没有下载到文件: {}", ctx, reason);
                self.update(
                    StatusUpdate::status(
                        AutomationStatus::Error,
                        format!("Failed to download export: {}", truncate_text(&reason.to_string(), 300)),
                    )
                    .with_generation_wait(None),
                );
                RunOutcome::NoFile(reason)
            }
        }
    }

    /// 立即运行完整流程；`force` 忽略"自动运行已关闭"
    pub async fn run_now(&self, force: bool) -> AppResult<RunOutcome> {
        if !force && !self.store.get().is_active {
            info!("⏸️ 自动运行已关闭，跳过");
            return Ok(RunOutcome::Skipped);
        }
        let kind = if force { RunKind::Manual } else { RunKind::Scheduled };
        let ticket = self.begin(kind, Admission::Fresh, "Starting full sync...")?;
        Ok(self.execute(ticket, RunPlan::FullExport).await)
    }

    /// 在后台开始完整流程；已有运行时返回 Busy
    pub fn request_export(self: &Arc<Self>) -> AppResult<()> {
        let ticket = self.begin(RunKind::Manual, Admission::Fresh, "Starting full sync...")?;
        self.spawn_run(ticket, RunPlan::FullExport);
        Ok(())
    }

    /// 下载已有导出并导入
    pub async fn download_existing(&self) -> AppResult<RunOutcome> {
        let ticket = self.begin(
            RunKind::Manual,
            Admission::Fresh,
            "Checking for existing downloads...",
        )?;
        Ok(self.execute(ticket, RunPlan::DownloadExisting).await)
    }

    fn spawn_run(self: &Arc<Self>, ticket: RunTicket, plan: RunPlan) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(ticket, plan).await;
        });
    }

    // ========== 登录 ==========

    /// 用给定邮箱登录；出现验证码时会话保持存活
    pub async fn start_login(&self, email: &str) -> AppResult<LoginOutcome> {
        if !email.trim().is_empty() {
            self.store.update(StatusUpdate {
                email: Some(email.trim().to_string()),
                ..Default::default()
            })?;
        }
        info!("🔐 开始登录: {}", mask_email(email));
        self.interactive_login("Login successful").await
    }

    /// 用已保存的凭据测试登录
    pub async fn test_login(&self) -> AppResult<LoginOutcome> {
        info!("🔐 测试登录");
        self.interactive_login("Login Check Complete.").await
    }

    async fn interactive_login(&self, success_message: &str) -> AppResult<LoginOutcome> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| AppError::Busy(self.store.get().status))?;
        let ticket = self.begin(RunKind::Manual, Admission::Login, "Logging in...")?;

        let record = self.store.get();
        let credentials = record.credentials();

        let result = async {
            session.initialize(record.headless).await.map(|_| ())?;
            self.set_status(AutomationStatus::LoggingIn, "Logging in...");
            AuthFlow::new(&session, &credentials, &self.config).login().await
        }
        .await;

        match &result {
            Ok(LoginOutcome::AwaitingPasscode) => {
                self.set_status(AutomationStatus::AwaitingOtp, "Waiting for OTP...");
            }
            Ok(LoginOutcome::Authenticated) => {
                self.set_status(AutomationStatus::Idle, success_message);
                session.cleanup().await;
            }
            Err(e) => {
                if e.requires_caller_action() {
                    warn!("{} ⚠️ 登录需要调用方处理: {}", ticket.ctx(), e);
                } else {
                    error!("{} ❌ 登录失败: {}", ticket.ctx(), e);
                }
                self.set_status(AutomationStatus::Error, format!("Login Error: {}", e));
                session.cleanup().await;
            }
        }
        result
    }

    /// 提交验证码
    ///
    /// 验证码错误时状态保持在 AwaitingOTP，会话不关闭，可以重试。
    /// 通过后按 `follow_up` 继续（`Run` / `Download` 在后台运行）。
    pub async fn submit_passcode(
        self: &Arc<Self>,
        code: &str,
        follow_up: PasscodeFollowUp,
    ) -> AppResult<PasscodeOutcome> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| AppError::Busy(self.store.get().status))?;
        let guard = ActiveGuard::acquire(&self.active)
            .ok_or_else(|| AppError::Busy(self.store.get().status))?;

        let record = self.store.get();
        let credentials = record.credentials();
        let outcome = AuthFlow::new(&session, &credentials, &self.config)
            .submit_passcode(code)
            .await;

        match &outcome {
            PasscodeOutcome::Accepted => {
                self.set_status(AutomationStatus::Idle, outcome.message());
            }
            PasscodeOutcome::Invalid => {
                self.set_status(AutomationStatus::AwaitingOtp, outcome.message());
                return Ok(outcome);
            }
            PasscodeOutcome::UnknownState | PasscodeOutcome::Failed(_) => {
                self.set_status(AutomationStatus::Error, outcome.message());
                session.cleanup().await;
                return Ok(outcome);
            }
        }

        // 验证码通过：释放运行标志后再按后续动作准入
        drop(guard);
        let plan = match follow_up {
            PasscodeFollowUp::Run => Some((RunPlan::FullExport, "Starting full sync...")),
            PasscodeFollowUp::Download => {
                Some((RunPlan::DownloadExisting, "Checking for existing downloads..."))
            }
            PasscodeFollowUp::Test => {
                self.set_status(AutomationStatus::Idle, "Login Check Complete.");
                None
            }
            PasscodeFollowUp::None => None,
        };

        match plan {
            Some((plan, message)) => {
                let ticket = self.begin(RunKind::Manual, Admission::Fresh, message)?;
                // 会话保持存活，后台运行直接复用
                drop(session);
                self.spawn_run(ticket, plan);
            }
            None => session.cleanup().await,
        }
        Ok(outcome)
    }

    // ========== 查询与设置 ==========

    pub fn check_status(&self) -> StatusRecord {
        self.store.get()
    }

    /// 修改设置；计划时间必须是 HH:MM
    pub fn update_settings(&self, settings: SettingsUpdate) -> AppResult<StatusRecord> {
        let schedule = settings
            .schedule_time
            .as_deref()
            .map(str::parse::<ScheduleTime>)
            .transpose()?;

        let update = StatusUpdate {
            email: settings.email.map(|e| e.trim().to_string()),
            password: settings
                .password
                .map(|p| if p.is_empty() { None } else { Some(p) }),
            schedule_time: schedule.map(|s| s.to_string()),
            is_active: settings.is_active,
            headless: settings.headless,
            next_run: schedule.map(|s| s.next_run_after(Local::now().naive_local())),
            ..Default::default()
        };
        let record = self.store.update(update)?;
        info!("⚙️ 设置已保存 (计划时间 {}，自动运行 {})", record.schedule_time, record.is_active);
        Ok(record)
    }

    /// 清除会话和快照，返回快照文件是否存在
    ///
    /// 有运行持有会话时设置中止标志（生成等待会在下一次检查时停止），并直接删除快照文件。
    pub async fn clear_session(&self) -> AppResult<bool> {
        match self.session.try_lock() {
            Ok(mut session) => {
                let existed = session.clear_session().await?;
                self.update(
                    StatusUpdate::status(AutomationStatus::Idle, "Session cleared.")
                        .with_generation_wait(None),
                );
                Ok(existed)
            }
            Err(_) => {
                warn!("🛑 会话正被运行占用，发送中止信号");
                self.abort.store(true, Ordering::SeqCst);
                let existed = remove_if_exists(&self.config.storage_state_file())?;
                Ok(existed)
            }
        }
    }

    /// 进程退出前关闭空闲的会话
    pub async fn shutdown(&self) {
        self.abort.store(true, Ordering::SeqCst);
        match self.session.try_lock() {
            Ok(mut session) => session.cleanup().await,
            Err(_) => warn!("⚠️ 有运行正在进行，浏览器随进程退出"),
        }
    }

    // ========== 状态写入 ==========

    fn set_status(&self, status: AutomationStatus, message: impl Into<String>) {
        if let Err(e) = self.store.update_status(status, message) {
            error!("❌ 写入状态失败: {}", e);
        }
    }

    fn update(&self, update: StatusUpdate) {
        if let Err(e) = self.store.update(update) {
            error!("❌ 写入状态失败: {}", e);
        }
    }
}

#[async_trait]
impl ExportRunner for Automator {
    async fn run_scheduled(&self) -> AppResult<RunOutcome> {
        self.run_now(false).await
    }

    async fn run_resume(&self) -> AppResult<RunOutcome> {
        if !self.store.get().is_active {
            return Ok(RunOutcome::Skipped);
        }
        let ticket = self.begin(RunKind::Resume, Admission::Resume, "Polling for export status...")?;
        let plan = RunPlan::resume_from(ticket.prior());
        Ok(self.execute(ticket, plan).await)
    }
}
