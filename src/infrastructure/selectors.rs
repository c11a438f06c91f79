//! 页面元素定位表
//!
//! 远端站点的标记随时可能变化，所有选择器集中在这里。每个逻辑元素是一个有序的
//! 候选列表，第一个可见的候选胜出；全部落空才是 `ElementNotFound`。

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::infrastructure::PageDriver;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 一个逻辑元素及其候选选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub name: &'static str,
    pub candidates: &'static [&'static str],
}

pub const EMAIL_INPUT: Locator = Locator {
    name: "email input",
    candidates: &["input[name='username']", "input[type='email']"],
};

pub const SUBMIT_BUTTON: Locator = Locator {
    name: "submit button",
    candidates: &["button[type='submit']", "#submit-button"],
};

/// 部分登录流程在验证码输入框之前会先出现"发送验证码"按钮
pub const SEND_CODE_BUTTON: Locator = Locator {
    name: "send code button",
    candidates: &["button[name='selectedId']"],
};

pub const PASSCODE_INPUT: Locator = Locator {
    name: "passcode input",
    candidates: &["input[name='otp']", "#otp-code"],
};

/// 提交验证码时额外接受的输入框变体
pub const PASSCODE_INPUT_ON_SUBMIT: Locator = Locator {
    name: "passcode input",
    candidates: &[
        "input[name='otp']",
        "#otp-code",
        "input[name='verification_code']",
    ],
};

pub const PASSWORD_INPUT: Locator = Locator {
    name: "password input",
    candidates: &["input[type='password']", "input[name='password']"],
};

pub const REQUEST_EXPORT_BUTTON: Locator = Locator {
    name: "request export button",
    candidates: &["[data-testid=\"pageSubtitle\"] + button", "main button"],
};

pub const DOWNLOAD_BUTTON: Locator = Locator {
    name: "download button",
    candidates: &["button[aria-label='Download data']"],
};

/// 验证码错误提示（英文 / 芬兰语）
pub const INVALID_CODE_TEXTS: &[&str] = &["Invalid code", "Virheellinen koodi"];

impl Locator {
    /// 第一个可见的候选；查询失败的候选视为不可见
    pub async fn find(&self, page: &dyn PageDriver) -> Option<&'static str> {
        for candidate in self.candidates {
            match page.is_visible(candidate).await {
                Ok(true) => return Some(*candidate),
                Ok(false) => {}
                Err(e) => debug!("查询 {} ({}) 失败: {}", self.name, candidate, e),
            }
        }
        None
    }

    pub async fn require(&self, page: &dyn PageDriver) -> AppResult<&'static str> {
        self.find(page)
            .await
            .ok_or_else(|| AppError::element_not_found(self.name))
    }

    /// 等待任一候选出现，至少检查一次
    pub async fn wait_for(&self, page: &dyn PageDriver, timeout: Duration) -> Option<&'static str> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.find(page).await {
                return Some(found);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    pub async fn is_visible(&self, page: &dyn PageDriver) -> bool {
        self.find(page).await.is_some()
    }
}

/// 页面上是否出现了验证码错误提示
pub async fn invalid_code_visible(page: &dyn PageDriver) -> bool {
    for text in INVALID_CODE_TEXTS {
        if let Ok(true) = page.text_visible(text).await {
            return true;
        }
    }
    false
}
