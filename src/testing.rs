//! 测试替身
//!
//! - [`FakeSite`]：按脚本运行的远端站点（登录阶段、导出生成、下载）
//! - [`FakePage`]：静态页面，只显示显式指定的元素
//! - [`FakeBackend`]：不启动真实浏览器的后端，页面由 `FakeSite` 驱动
//! - [`Harness`]：临时目录 + 状态存储 + 已初始化的会话

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::browser::{BrowserBackend, BrowserRuntime, SessionHandle};
use crate::config::{Config, Timings};
use crate::error::{AppError, AppResult};
use crate::infrastructure::PageDriver;
use crate::models::{StorageState, StoredCookie};
use crate::services::{Ingestor, SessionManager};
use crate::store::StatusStore;

pub const BASE_URL: &str = "https://account.example.com";
pub const EXPORT_PATH: &str = "/data-export";
pub const CORRECT_PASSCODE: &str = "123456";

const EMAIL_FIELD: &str = "input[name='username']";
const SUBMIT: &str = "button[type='submit']";
const SEND_CODE: &str = "button[name='selectedId']";
const PASSCODE_FIELD: &str = "input[name='otp']";
const PASSWORD_FIELD: &str = "input[type='password']";
const REQUEST_BUTTON: &str = "[data-testid=\"pageSubtitle\"] + button";
const DOWNLOAD_BUTTON: &str = "button[aria-label='Download data']";

/// 零等待、小预算的配置
pub fn test_config(dir: &Path) -> Config {
    Config {
        base_url: BASE_URL.to_string(),
        export_path: EXPORT_PATH.to_string(),
        timings: Timings {
            navigation_attempts: 3,
            navigation_interval_ms: 0,
            page_load_timeout_ms: 0,
            settle_timeout_ms: 0,
            submit_delay_ms: 0,
            element_wait_ms: 0,
            download_button_wait_ms: 0,
            hydration_delay_ms: 0,
            post_click_delay_ms: 0,
            generation_max_retries: 3,
            generation_poll_interval_secs: 0,
            download_timeout_secs: 1,
            tick_interval_secs: 0,
            passcode_poll_minutes: 5,
        },
        ..Config::for_data_dir(dir)
    }
}

// ========== 站点 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginStage {
    Email,
    SendCode,
    Passcode,
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginKind {
    Passcode,
    Password,
}

#[derive(Debug)]
struct SiteState {
    url: String,
    logged_in: bool,
    login_kind: LoginKind,
    send_code_step: bool,
    email_field: bool,
    stage: LoginStage,
    invalid_code_shown: bool,
    export_reachable: bool,
    home_redirects: u32,
    /// 远端导出正在生成
    in_progress: bool,
    /// 生成中状态持续到第 n 次刷新
    generation_polls: u32,
    download_available: bool,
    fills: HashMap<String, String>,
    clicks: Vec<String>,
    reloads: usize,
    gotos: usize,
}

impl SiteState {
    fn new(logged_in: bool, login_kind: LoginKind) -> Self {
        Self {
            url: "about:blank".to_string(),
            logged_in,
            login_kind,
            send_code_step: false,
            email_field: true,
            stage: LoginStage::Email,
            invalid_code_shown: false,
            export_reachable: true,
            home_redirects: 0,
            in_progress: false,
            generation_polls: 0,
            download_available: true,
            fills: HashMap::new(),
            clicks: Vec::new(),
            reloads: 0,
            gotos: 0,
        }
    }

    fn home_url() -> String {
        format!("{}/", BASE_URL)
    }

    fn login_url() -> String {
        format!("{}/login", BASE_URL)
    }

    fn on_login_page(&self) -> bool {
        self.url.starts_with(&Self::login_url())
    }

    fn on_export_page(&self) -> bool {
        self.url.starts_with(&format!("{}{}", BASE_URL, EXPORT_PATH))
    }

    fn generating(&self) -> bool {
        self.in_progress && (self.reloads as u64) < u64::from(self.generation_polls)
    }

    fn show_login(&mut self) {
        self.url = Self::login_url();
        self.stage = LoginStage::Email;
        self.invalid_code_shown = false;
    }

    fn navigate(&mut self, url: &str) {
        self.gotos += 1;
        let target = url.trim_end_matches('/');

        if target.starts_with(&format!("{}{}", BASE_URL, EXPORT_PATH)) {
            if !self.logged_in {
                self.show_login();
                self.url = format!("{}?next={}", Self::login_url(), EXPORT_PATH);
            } else if self.home_redirects > 0 {
                self.home_redirects -= 1;
                self.url = Self::home_url();
            } else if !self.export_reachable {
                self.url = format!("{}/maintenance", BASE_URL);
            } else {
                self.url = url.to_string();
            }
        } else if target == BASE_URL || target.starts_with(&Self::login_url()) {
            if self.logged_in {
                self.url = Self::home_url();
            } else {
                self.show_login();
            }
        } else {
            self.url = url.to_string();
        }
    }

    fn visible(&self) -> HashSet<&'static str> {
        let mut visible = HashSet::new();
        if self.on_login_page() && !self.logged_in {
            match self.stage {
                LoginStage::Email => {
                    if self.email_field {
                        visible.insert(EMAIL_FIELD);
                    }
                    visible.insert(SUBMIT);
                }
                LoginStage::SendCode => {
                    visible.insert(SEND_CODE);
                }
                LoginStage::Passcode => {
                    visible.insert(PASSCODE_FIELD);
                    visible.insert(SUBMIT);
                }
                LoginStage::Password => {
                    visible.insert(PASSWORD_FIELD);
                    visible.insert(SUBMIT);
                }
            }
        } else if self.on_export_page() {
            visible.insert(REQUEST_BUTTON);
            if self.download_available {
                visible.insert(DOWNLOAD_BUTTON);
            }
        }
        visible
    }

    fn is_visible(&self, selector: &str) -> bool {
        self.visible().contains(selector)
    }

    fn require(&self, selector: &str) -> AppResult<()> {
        if self.is_visible(selector) {
            Ok(())
        } else {
            Err(AppError::element_not_found(selector))
        }
    }

    fn log_in(&mut self) {
        self.logged_in = true;
        self.invalid_code_shown = false;
        self.url = Self::home_url();
    }

    fn submit(&mut self) {
        match self.stage {
            LoginStage::Email => {
                if self.fills.get(EMAIL_FIELD).is_some_and(|v| !v.is_empty()) {
                    self.stage = match (self.login_kind, self.send_code_step) {
                        (LoginKind::Password, _) => LoginStage::Password,
                        (LoginKind::Passcode, true) => LoginStage::SendCode,
                        (LoginKind::Passcode, false) => LoginStage::Passcode,
                    };
                }
            }
            LoginStage::SendCode => {}
            LoginStage::Passcode => {
                if self.fills.get(PASSCODE_FIELD).map(String::as_str) == Some(CORRECT_PASSCODE) {
                    self.log_in();
                } else {
                    self.invalid_code_shown = true;
                }
            }
            LoginStage::Password => {
                if self.fills.get(PASSWORD_FIELD).is_some_and(|v| !v.is_empty()) {
                    self.log_in();
                }
            }
        }
    }

    fn click(&mut self, selector: &str) -> AppResult<()> {
        self.require(selector)?;
        self.clicks.push(selector.to_string());
        match selector {
            SUBMIT => self.submit(),
            SEND_CODE => self.stage = LoginStage::Passcode,
            REQUEST_BUTTON if !self.generating() => self.in_progress = true,
            _ => {}
        }
        Ok(())
    }
}

/// 按脚本运行的远端站点；克隆共享同一份状态
#[derive(Debug, Clone)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self::logged_in()
    }
}

impl FakeSite {
    fn with_state(state: SiteState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().unwrap()
    }

    fn configure(self, f: impl FnOnce(&mut SiteState)) -> Self {
        f(&mut self.state());
        self
    }

    /// 已登录，导出立即可用
    pub fn logged_in() -> Self {
        Self::with_state(SiteState::new(true, LoginKind::Passcode))
    }

    /// 未登录，提交邮箱后要求验证码
    pub fn passcode_login() -> Self {
        Self::with_state(SiteState::new(false, LoginKind::Passcode))
    }

    /// 未登录，提交邮箱后要求密码
    pub fn password_login() -> Self {
        Self::with_state(SiteState::new(false, LoginKind::Password))
    }

    pub fn with_send_code_step(self) -> Self {
        self.configure(|s| s.send_code_step = true)
    }

    pub fn without_email_field(self) -> Self {
        self.configure(|s| s.email_field = false)
    }

    /// 请求按钮保持禁用，直到第 `n` 次刷新
    pub fn generation_polls(self, n: u32) -> Self {
        self.configure(|s| s.generation_polls = n)
    }

    /// 导出在流程开始前就已在生成中
    pub fn request_button_disabled(self) -> Self {
        self.configure(|s| s.in_progress = true)
    }

    pub fn without_download(self) -> Self {
        self.configure(|s| s.download_available = false)
    }

    pub fn export_unreachable(self) -> Self {
        self.configure(|s| s.export_reachable = false)
    }

    /// 第一次访问导出页面时落在账户首页
    pub fn redirect_home_once(self) -> Self {
        self.configure(|s| s.home_redirects = 1)
    }

    pub fn filled(&self, selector: &str) -> Option<String> {
        self.state().fills.get(selector).cloned()
    }

    pub fn clicked(&self, selector: &str) -> bool {
        self.state().clicks.iter().any(|c| c == selector)
    }

    pub fn reloads(&self) -> usize {
        self.state().reloads
    }

    pub fn gotos(&self) -> usize {
        self.state().gotos
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().logged_in
    }

    pub fn current_url(&self) -> String {
        self.state().url.clone()
    }

    /// 新浏览器打开的页面从空白页开始
    fn open_page(&self) {
        let mut s = self.state();
        s.url = "about:blank".to_string();
        s.stage = LoginStage::Email;
        s.invalid_code_shown = false;
        s.fills.clear();
    }

    fn page(&self) -> SitePage {
        SitePage { site: self.clone() }
    }
}

/// 由 [`FakeSite`] 驱动的页面
struct SitePage {
    site: FakeSite,
}

#[async_trait]
impl PageDriver for SitePage {
    async fn goto(&self, url: &str) -> AppResult<()> {
        self.site.state().navigate(url);
        Ok(())
    }

    async fn current_url(&self) -> AppResult<String> {
        Ok(self.site.current_url())
    }

    async fn reload(&self) -> AppResult<()> {
        self.site.state().reloads += 1;
        Ok(())
    }

    async fn wait_for_settle(&self, _timeout: Duration) {}

    async fn is_visible(&self, selector: &str) -> AppResult<bool> {
        Ok(self.site.state().is_visible(selector))
    }

    async fn is_enabled(&self, selector: &str) -> AppResult<bool> {
        let s = self.site.state();
        Ok(s.is_visible(selector) && !(selector == REQUEST_BUTTON && s.generating()))
    }

    async fn attribute(&self, selector: &str, name: &str) -> AppResult<Option<String>> {
        let s = self.site.state();
        let disabled = selector == REQUEST_BUTTON && s.is_visible(selector) && s.generating();
        Ok((name == "disabled" && disabled).then(String::new))
    }

    async fn fill(&self, selector: &str, value: &str) -> AppResult<()> {
        let mut s = self.site.state();
        s.require(selector)?;
        s.fills.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> AppResult<()> {
        self.site.state().click(selector)
    }

    async fn press_enter(&self, selector: &str) -> AppResult<()> {
        let mut s = self.site.state();
        s.require(selector)?;
        s.submit();
        Ok(())
    }

    async fn text_visible(&self, text: &str) -> AppResult<bool> {
        let s = self.site.state();
        Ok(s.on_login_page() && s.invalid_code_shown && text == "Invalid code")
    }

    async fn download(
        &self,
        selector: &str,
        target_dir: &Path,
        _timeout: Duration,
    ) -> AppResult<PathBuf> {
        self.site.state().click(selector)?;
        std::fs::create_dir_all(target_dir)?;
        let path = target_dir.join("export.zip");
        std::fs::write(&path, b"PK\x03\x04 export")?;
        Ok(path)
    }

    async fn storage_state(&self) -> AppResult<StorageState> {
        let mut state = StorageState::default();
        if self.site.is_logged_in() {
            state.cookies.push(StoredCookie {
                name: "session".to_string(),
                value: "token".to_string(),
                domain: "account.example.com".to_string(),
                path: "/".to_string(),
                expires: -1.0,
                http_only: true,
                secure: true,
                same_site: Some("Lax".to_string()),
            });
        }
        Ok(state)
    }

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

// ========== 静态页面 ==========

/// 静态页面：只有 `show` / `show_text` 过的内容可见
#[derive(Debug)]
pub struct FakePage {
    url: String,
    visible: Mutex<HashSet<String>>,
    texts: Mutex<HashSet<String>>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            visible: Mutex::new(HashSet::new()),
            texts: Mutex::new(HashSet::new()),
        }
    }

    pub fn show(&self, selector: &str) {
        self.visible.lock().unwrap().insert(selector.to_string());
    }

    pub fn show_text(&self, text: &str) {
        self.texts.lock().unwrap().insert(text.to_string());
    }

    fn require(&self, selector: &str) -> AppResult<()> {
        if self.visible.lock().unwrap().contains(selector) {
            Ok(())
        } else {
            Err(AppError::element_not_found(selector))
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, _url: &str) -> AppResult<()> {
        Ok(())
    }

    async fn current_url(&self) -> AppResult<String> {
        Ok(self.url.clone())
    }

    async fn reload(&self) -> AppResult<()> {
        Ok(())
    }

    async fn wait_for_settle(&self, _timeout: Duration) {}

    async fn is_visible(&self, selector: &str) -> AppResult<bool> {
        Ok(self.visible.lock().unwrap().contains(selector))
    }

    async fn is_enabled(&self, selector: &str) -> AppResult<bool> {
        self.is_visible(selector).await
    }

    async fn attribute(&self, _selector: &str, _name: &str) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn fill(&self, selector: &str, _value: &str) -> AppResult<()> {
        self.require(selector)
    }

    async fn click(&self, selector: &str) -> AppResult<()> {
        self.require(selector)
    }

    async fn press_enter(&self, selector: &str) -> AppResult<()> {
        self.require(selector)
    }

    async fn text_visible(&self, text: &str) -> AppResult<bool> {
        Ok(self.texts.lock().unwrap().contains(text))
    }

    async fn download(
        &self,
        selector: &str,
        _target_dir: &Path,
        _timeout: Duration,
    ) -> AppResult<PathBuf> {
        self.require(selector)?;
        Err(AppError::Timeout("download".to_string()))
    }

    async fn storage_state(&self) -> AppResult<StorageState> {
        Ok(StorageState::default())
    }

    async fn close(&self) -> AppResult<()> {
        Ok(())
    }
}

// ========== 后端 ==========

/// 假浏览器后端，记录安装、启动和关闭次数
pub struct FakeBackend {
    site: FakeSite,
    installed: AtomicBool,
    failing_launches: AtomicU32,
    launches: AtomicUsize,
    installs: AtomicUsize,
    restored: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new(site: FakeSite) -> Self {
        Self {
            site,
            installed: AtomicBool::new(true),
            failing_launches: AtomicU32::new(0),
            launches: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
            restored: AtomicUsize::new(0),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn not_installed(self) -> Self {
        self.installed.store(false, Ordering::SeqCst);
        self
    }

    /// 前 `n` 次启动失败
    pub fn fail_launches(self, n: u32) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    pub fn site(&self) -> &FakeSite {
        &self.site
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn restored_states(&self) -> usize {
        self.restored.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    async fn install(&self) -> AppResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.installed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn launch(&self, _headless: bool, state: Option<&StorageState>) -> AppResult<SessionHandle> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(AppError::Launch("simulated launch failure".to_string()));
        }

        if state.is_some() {
            self.restored.fetch_add(1, Ordering::SeqCst);
        }
        self.site.open_page();
        Ok(SessionHandle {
            page: Box::new(self.site.page()),
            runtime: Box::new(FakeRuntime {
                shutdowns: self.shutdowns.clone(),
            }),
        })
    }
}

struct FakeRuntime {
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserRuntime for FakeRuntime {
    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ========== 导入 ==========

/// 记录收到的文件；`failing` 时每次导入都失败
#[derive(Default)]
pub struct RecordingIngestor {
    ingested: Mutex<Vec<PathBuf>>,
    failure: Option<String>,
}

impl RecordingIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            ingested: Mutex::new(Vec::new()),
            failure: Some(reason.to_string()),
        }
    }

    pub fn ingested(&self) -> Vec<PathBuf> {
        self.ingested.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ingestor for RecordingIngestor {
    async fn ingest(&self, file: &Path) -> anyhow::Result<()> {
        if let Some(reason) = &self.failure {
            anyhow::bail!("{}", reason);
        }
        self.ingested.lock().unwrap().push(file.to_path_buf());
        Ok(())
    }
}

// ========== 组合 ==========

/// 临时目录 + 状态存储 + 已初始化的会话
pub struct Harness {
    pub site: FakeSite,
    pub backend: Arc<FakeBackend>,
    pub store: Arc<StatusStore>,
    pub session: SessionManager,
    dir: TempDir,
}

impl Harness {
    pub async fn new(site: FakeSite) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let backend = Arc::new(FakeBackend::new(site.clone()));
        let store = Arc::new(StatusStore::open(config.status_file()).unwrap());
        let mut session =
            SessionManager::new(backend.clone(), store.clone(), config.storage_state_file());
        session.initialize(true).await.unwrap();

        Self {
            site,
            backend,
            store,
            session,
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}
