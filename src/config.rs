use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::SiteUrls;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 数据目录（状态文件、会话快照、浏览器、下载目录的默认位置）
    pub data_dir: PathBuf,
    /// 账户站点根地址
    pub base_url: String,
    /// 导出页面路径
    pub export_path: String,
    /// 状态文件
    pub status_file: Option<PathBuf>,
    /// 会话快照文件
    pub storage_state_file: Option<PathBuf>,
    /// 浏览器安装目录
    pub browser_dir: Option<PathBuf>,
    /// 导出文件下载目录
    pub download_dir: Option<PathBuf>,
    /// 下载完成后交给导入方的收件目录
    pub inbox_dir: Option<PathBuf>,
    /// 指定浏览器可执行文件（不指定则自动查找/安装）
    pub chrome_executable: Option<PathBuf>,
    /// 浏览器安装命令
    pub install_command: Vec<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub log_file: Option<PathBuf>,
    /// 各类等待与重试参数
    pub timings: Timings,
}

/// 等待与重试参数
///
/// 导出生成等待的默认预算是 30 次 × 5 分钟，约 2.5 小时。这只是对远端处理时间的估计，
/// 可以按需调大。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// 导航到导出页面的最大轮询次数
    pub navigation_attempts: u32,
    pub navigation_interval_ms: u64,
    /// goto 超时
    pub page_load_timeout_ms: u64,
    /// 等待页面稳定（网络空闲）的上限
    pub settle_timeout_ms: u64,
    /// 提交表单后的等待
    pub submit_delay_ms: u64,
    /// 等待元素出现的上限
    pub element_wait_ms: u64,
    /// 等待下载按钮出现的上限
    pub download_button_wait_ms: u64,
    /// 导出按钮渲染完成前的等待
    pub hydration_delay_ms: u64,
    /// 点击导出按钮后的等待
    pub post_click_delay_ms: u64,
    /// 导出生成的最大轮询次数
    pub generation_max_retries: u32,
    /// 导出生成的轮询间隔
    pub generation_poll_interval_secs: u64,
    /// 下载开始与完成的等待上限
    pub download_timeout_secs: u64,
    /// 调度循环间隔
    pub tick_interval_secs: u64,
    /// 等待状态下每隔多少分钟轮询一次
    pub passcode_poll_minutes: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation_attempts: 10,
            navigation_interval_ms: 1_000,
            page_load_timeout_ms: 60_000,
            settle_timeout_ms: 10_000,
            submit_delay_ms: 3_000,
            element_wait_ms: 5_000,
            download_button_wait_ms: 10_000,
            hydration_delay_ms: 5_000,
            post_click_delay_ms: 2_000,
            generation_max_retries: 30,
            generation_poll_interval_secs: 300,
            download_timeout_secs: 600,
            tick_interval_secs: 60,
            passcode_poll_minutes: 5,
        }
    }
}

impl Timings {
    pub fn navigation_interval(&self) -> Duration {
        Duration::from_millis(self.navigation_interval_ms)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    pub fn submit_delay(&self) -> Duration {
        Duration::from_millis(self.submit_delay_ms)
    }

    pub fn element_wait(&self) -> Duration {
        Duration::from_millis(self.element_wait_ms)
    }

    pub fn download_button_wait(&self) -> Duration {
        Duration::from_millis(self.download_button_wait_ms)
    }

    pub fn hydration_delay(&self) -> Duration {
        Duration::from_millis(self.hydration_delay_ms)
    }

    pub fn post_click_delay(&self) -> Duration {
        Duration::from_millis(self.post_click_delay_ms)
    }

    pub fn generation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.generation_poll_interval_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            base_url: "https://membership.ouraring.com".to_string(),
            export_path: "/data-export".to_string(),
            status_file: None,
            storage_state_file: None,
            browser_dir: None,
            download_dir: None,
            inbox_dir: None,
            chrome_executable: None,
            install_command: vec![
                "npx".to_string(),
                "playwright".to_string(),
                "install".to_string(),
                "chromium".to_string(),
            ],
            verbose_logging: false,
            log_file: None,
            timings: Timings::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("ring-export-sync"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl Config {
    /// 加载配置：可选的 TOML 文件 + 环境变量覆盖
    ///
    /// 配置文件路径取 `EXPORT_SYNC_CONFIG`，否则为 `<data_dir>/config.toml`，不存在时使用默认值。
    pub fn load() -> Result<Self> {
        let path = match std::env::var("EXPORT_SYNC_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => std::env::var("EXPORT_SYNC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir())
                .join("config.toml"),
        };

        let base = if path.exists() {
            Self::from_toml_file(&path)?
        } else {
            Self::default()
        };

        Ok(base.with_env_overrides())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("无法解析配置文件: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 以指定数据目录构造（其余路径都派生自它）
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    fn with_env_overrides(self) -> Self {
        let default = self;
        Self {
            data_dir: std::env::var("EXPORT_SYNC_DATA_DIR").map(PathBuf::from).unwrap_or(default.data_dir),
            base_url: std::env::var("EXPORT_SYNC_BASE_URL").unwrap_or(default.base_url),
            export_path: std::env::var("EXPORT_SYNC_EXPORT_PATH").unwrap_or(default.export_path),
            chrome_executable: std::env::var("EXPORT_SYNC_CHROME").ok().map(PathBuf::from).or(default.chrome_executable),
            install_command: std::env::var("EXPORT_SYNC_INSTALL_COMMAND")
                .ok()
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or(default.install_command),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            log_file: std::env::var("EXPORT_SYNC_LOG_FILE").ok().map(PathBuf::from).or(default.log_file),
            ..default
        }
    }

    pub fn site(&self) -> SiteUrls {
        SiteUrls::new(&self.base_url, &self.export_path)
    }

    pub fn status_file(&self) -> PathBuf {
        self.status_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("automation_status.json"))
    }

    pub fn storage_state_file(&self) -> PathBuf {
        self.storage_state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("session_state.json"))
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.browser_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("browsers"))
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("downloads"))
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.inbox_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("inbox"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("automation.log"))
    }
}
