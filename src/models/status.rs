//! 自动化状态记录
//!
//! 进程内唯一的状态记录，持久化在状态文件中。它是后台调度循环与调用方之间
//! 唯一的协调机制。

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 自动化状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AutomationStatus {
    #[default]
    Idle,
    Initializing,
    LoggingIn,
    #[serde(rename = "AwaitingOTP")]
    AwaitingOtp,
    RequestingExport,
    WaitingForGeneration,
    Downloading,
    Ingesting,
    Error,
}

impl AutomationStatus {
    /// 可以开始新任务的状态（Idle / Error）
    pub fn can_start(self) -> bool {
        matches!(self, AutomationStatus::Idle | AutomationStatus::Error)
    }

    /// 挂起等待中的状态（等待验证码 / 等待导出生成）
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            AutomationStatus::AwaitingOtp | AutomationStatus::WaitingForGeneration
        )
    }

    /// 正在执行中的状态：进程崩溃后留下这些状态说明任务已经丢失
    pub fn is_in_flight(self) -> bool {
        !self.can_start() && !self.is_waiting()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutomationStatus::Idle => "Idle",
            AutomationStatus::Initializing => "Initializing",
            AutomationStatus::LoggingIn => "LoggingIn",
            AutomationStatus::AwaitingOtp => "AwaitingOTP",
            AutomationStatus::RequestingExport => "RequestingExport",
            AutomationStatus::WaitingForGeneration => "WaitingForGeneration",
            AutomationStatus::Downloading => "Downloading",
            AutomationStatus::Ingesting => "Ingesting",
            AutomationStatus::Error => "Error",
        }
    }
}

impl fmt::Display for AutomationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 登录凭据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: None,
        }
    }

    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}

/// 导出生成等待的进度
///
/// 只有有界等待才带重试计数；重启后从这里恢复剩余预算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// 已完成的轮询次数
    pub attempts: u32,
    /// 开始等待的时间
    pub started_at: NaiveDateTime,
}

/// 持久化的状态记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// 每日执行时间 (HH:MM)
    pub schedule_time: String,
    pub is_active: bool,
    pub headless: bool,
    pub status: AutomationStatus,
    pub message: String,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    pub generation_wait: Option<GenerationProgress>,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: None,
            schedule_time: "11:00".to_string(),
            is_active: true,
            headless: true,
            status: AutomationStatus::Idle,
            message: String::new(),
            last_run: None,
            next_run: None,
            generation_wait: None,
        }
    }
}

impl StatusRecord {
    /// 取出本次运行使用的凭据
    pub fn credentials(&self) -> Credentials {
        Credentials {
            email: self.email.clone(),
            password: self.password.clone().filter(|p| !p.is_empty()),
        }
    }

    /// 合并部分更新：只修改出现的字段
    pub fn apply(&mut self, update: StatusUpdate) {
        if let Some(email) = update.email {
            self.email = email;
        }
        if let Some(password) = update.password {
            self.password = password;
        }
        if let Some(schedule_time) = update.schedule_time {
            self.schedule_time = schedule_time;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(headless) = update.headless {
            self.headless = headless;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(last_run) = update.last_run {
            self.last_run = Some(last_run);
        }
        if let Some(next_run) = update.next_run {
            self.next_run = Some(next_run);
        }
        if let Some(generation_wait) = update.generation_wait {
            self.generation_wait = generation_wait;
        }
    }
}

/// 状态记录的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub email: Option<String>,
    /// `Some(None)` 清除密码
    pub password: Option<Option<String>>,
    pub schedule_time: Option<String>,
    pub is_active: Option<bool>,
    pub headless: Option<bool>,
    pub status: Option<AutomationStatus>,
    pub message: Option<String>,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
    /// `Some(None)` 清除等待进度
    pub generation_wait: Option<Option<GenerationProgress>>,
}

impl StatusUpdate {
    /// 状态 + 消息
    pub fn status(status: AutomationStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_last_run(mut self, at: NaiveDateTime) -> Self {
        self.last_run = Some(at);
        self
    }

    pub fn with_next_run(mut self, at: NaiveDateTime) -> Self {
        self.next_run = Some(at);
        self
    }

    pub fn with_generation_wait(mut self, progress: Option<GenerationProgress>) -> Self {
        self.generation_wait = Some(progress);
        self
    }
}
