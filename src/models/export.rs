//! 登录与导出流程的结果类型

use std::fmt;
use std::path::PathBuf;

/// 登录状态查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authenticated,
    PasscodeRequired,
    Unauthenticated,
}

/// `login()` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// 已登录，会话已保存
    Authenticated,
    /// 需要验证码，调用方需在带外获取后调用 `submit_passcode`
    AwaitingPasscode,
}

/// `submit_passcode()` 的结果（从不返回 Err）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasscodeOutcome {
    Accepted,
    /// 远端提示验证码错误，可以重试
    Invalid,
    /// 提交后既没有登录成功也没有错误提示
    UnknownState,
    /// 基础设施故障（页面未初始化、找不到输入框等）
    Failed(String),
}

impl PasscodeOutcome {
    pub fn message(&self) -> String {
        match self {
            PasscodeOutcome::Accepted => "Login successful!".to_string(),
            PasscodeOutcome::Invalid => "Invalid OTP code.".to_string(),
            PasscodeOutcome::UnknownState => "Login failed (Unknown state).".to_string(),
            PasscodeOutcome::Failed(reason) => reason.clone(),
        }
    }
}

/// 导出流程结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    /// 已下载到本地的导出文件
    Downloaded(PathBuf),
    /// 流程中遇到验证码，需要调用方介入
    PasscodeRequired,
    /// 没有产生文件
    NoFile(NoFileReason),
}

/// 没有产生文件的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoFileReason {
    /// 导出生成等待超过重试预算
    GenerationTimedOut,
    /// 页面上没有下载按钮
    DownloadUnavailable,
    /// 等待期间会话被清除
    Aborted,
    /// 其他故障（已记录日志）
    Failed(String),
}

impl fmt::Display for NoFileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoFileReason::GenerationTimedOut => {
                f.write_str("timed out waiting for export generation")
            }
            NoFileReason::DownloadUnavailable => f.write_str("download button not found"),
            NoFileReason::Aborted => f.write_str("aborted because the session was cleared"),
            NoFileReason::Failed(reason) => write!(f, "{}", reason),
        }
    }
}
