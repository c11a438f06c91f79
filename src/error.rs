use thiserror::Error;

use crate::models::AutomationStatus;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 缺少必要的配置（邮箱、密码、计划时间格式等）
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 目标页面无法到达
    #[error("导航到 {url} 失败: {reason}")]
    Navigation { url: String, reason: String },

    /// 所有备选选择器都没有找到可见元素
    #[error("未找到页面元素: {element}")]
    ElementNotFound { element: String },

    /// 远端拒绝了验证码（可重试）
    #[error("验证码无效")]
    InvalidPasscode,

    /// 重试预算耗尽
    #[error("等待超时: {0}")]
    Timeout(String),

    /// 浏览器依赖安装失败
    #[error("浏览器安装失败: {0}")]
    Installation(String),

    /// 浏览器启动失败
    #[error("浏览器启动失败: {0}")]
    Launch(String),

    /// 会话尚未初始化
    #[error("浏览器会话未初始化")]
    SessionNotInitialized,

    /// 已有任务在运行
    #[error("自动化任务正在运行 (当前状态: {0})")]
    Busy(AutomationStatus),

    /// 状态存储读写失败
    #[error("状态存储错误 ({path}): {reason}")]
    Store { path: String, reason: String },

    /// CDP 调用失败
    #[error("浏览器错误: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建导航错误
    pub fn navigation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Navigation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// 创建元素未找到错误
    pub fn element_not_found(element: impl Into<String>) -> Self {
        AppError::ElementNotFound {
            element: element.into(),
        }
    }

    /// 创建状态存储错误
    pub fn store(path: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Store {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否需要调用方介入（而不是简单重试）
    pub fn requires_caller_action(&self) -> bool {
        matches!(self, AppError::InvalidPasscode | AppError::Configuration(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_names_status() {
        let err = AppError::Busy(AutomationStatus::WaitingForGeneration);
        assert!(err.to_string().contains("WaitingForGeneration"));
    }

    #[test]
    fn test_requires_caller_action() {
        assert!(AppError::InvalidPasscode.requires_caller_action());
        assert!(AppError::Configuration("no email".into()).requires_caller_action());
        assert!(!AppError::Timeout("generation".into()).requires_caller_action());
    }
}
