//! 登录流程 - 业务能力层
//!
//! 只负责"把会话带到已登录状态"，遇到验证码就停下交给调用方，
//! 不关心登录之后要做什么。

use tracing::{debug, error, info, warn};

use crate::config::{Config, Timings};
use crate::error::{AppError, AppResult};
use crate::infrastructure::selectors::{
    invalid_code_visible, EMAIL_INPUT, PASSCODE_INPUT, PASSCODE_INPUT_ON_SUBMIT, PASSWORD_INPUT,
    SEND_CODE_BUTTON, SUBMIT_BUTTON,
};
use crate::infrastructure::PageDriver;
use crate::models::{AuthState, Credentials, LoginOutcome, PageKind, PasscodeOutcome, SiteUrls};
use crate::services::SessionManager;
use crate::utils::mask_email;

/// 登录状态机的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStep {
    CheckLogin,
    SubmitEmail,
    SubmitPassword,
    Verify,
    AwaitPasscode,
    Done,
}

pub struct AuthFlow<'a> {
    session: &'a SessionManager,
    credentials: &'a Credentials,
    site: SiteUrls,
    timings: &'a Timings,
}

impl<'a> AuthFlow<'a> {
    pub fn new(session: &'a SessionManager, credentials: &'a Credentials, config: &'a Config) -> Self {
        Self {
            session,
            credentials,
            site: config.site(),
            timings: &config.timings,
        }
    }

    fn page(&self) -> AppResult<&'a dyn PageDriver> {
        self.session.page()
    }

    /// 执行登录
    ///
    /// 已登录时保存会话并返回 `Authenticated`；出现验证码输入框时返回
    /// `AwaitingPasscode`，此时会话必须保持存活。
    pub async fn login(&self) -> AppResult<LoginOutcome> {
        let mut step = AuthStep::CheckLogin;
        loop {
            debug!("🔐 登录步骤: {:?}", step);
            step = match step {
                AuthStep::CheckLogin => self.check_login().await?,
                AuthStep::SubmitEmail => self.submit_email().await?,
                AuthStep::SubmitPassword => self.submit_password().await?,
                AuthStep::Verify => self.verify().await?,
                AuthStep::AwaitPasscode => {
                    info!("📨 需要验证码，等待调用方提交");
                    return Ok(LoginOutcome::AwaitingPasscode);
                }
                AuthStep::Done => {
                    self.session.save_context().await?;
                    return Ok(LoginOutcome::Authenticated);
                }
            };
        }
    }

    async fn check_login(&self) -> AppResult<AuthStep> {
        let page = self.page()?;
        info!("🔍 检查登录状态...");

        let url = page.current_url().await?;
        if !self.site.is_on_site(&url) {
            page.goto(self.site.base_url()).await?;
        }
        page.wait_for_settle(self.timings.settle_timeout()).await;

        if self.is_authenticated().await? {
            info!("✓ 已经处于登录状态");
            return Ok(AuthStep::Done);
        }

        info!("未登录，开始登录流程");
        Ok(AuthStep::SubmitEmail)
    }

    async fn submit_email(&self) -> AppResult<AuthStep> {
        if !self.credentials.has_email() {
            return Err(AppError::Configuration(
                "Login required but no email configured.".to_string(),
            ));
        }

        let page = self.page()?;
        let url = page.current_url().await?;
        if self.site.classify(&url) != PageKind::Login {
            page.goto(&self.site.login_url()).await?;
            page.wait_for_settle(self.timings.settle_timeout()).await;
        }

        let email_input = EMAIL_INPUT.require(page).await?;
        info!("✍️ 填写邮箱: {}", mask_email(&self.credentials.email));
        page.fill(email_input, &self.credentials.email).await?;
        self.click_submit(email_input).await?;

        if self.check_passcode_screen().await? {
            return Ok(AuthStep::AwaitPasscode);
        }
        Ok(AuthStep::SubmitPassword)
    }

    /// 旧版密码登录（当前流程很少出现）
    async fn submit_password(&self) -> AppResult<AuthStep> {
        let page = self.page()?;
        if let Some(password_input) = PASSWORD_INPUT.find(page).await {
            let password = self.credentials.password.as_deref().ok_or_else(|| {
                AppError::Configuration("Password required but not configured.".to_string())
            })?;
            info!("✍️ 填写密码");
            page.fill(password_input, password).await?;
            page.press_enter(password_input).await?;
        }
        Ok(AuthStep::Verify)
    }

    async fn verify(&self) -> AppResult<AuthStep> {
        let page = self.page()?;
        page.wait_for_settle(self.timings.settle_timeout()).await;

        if self.is_authenticated().await? {
            info!("✅ 登录完成");
            return Ok(AuthStep::Done);
        }

        // 网络慢时验证码页面可能晚一步出现
        if self.check_passcode_screen().await? {
            return Ok(AuthStep::AwaitPasscode);
        }

        let url = page.current_url().await?;
        Err(AppError::navigation(url, "login failed or incomplete"))
    }

    /// 点击提交按钮，没有按钮时在 `fallback` 元素上按回车
    async fn click_submit(&self, fallback: &str) -> AppResult<()> {
        let page = self.page()?;
        match SUBMIT_BUTTON.find(page).await {
            Some(button) => page.click(button).await?,
            None => page.press_enter(fallback).await?,
        }
        tokio::time::sleep(self.timings.submit_delay()).await;
        Ok(())
    }

    /// 检查是否处于验证码页面
    ///
    /// 如果只有"发送验证码"按钮而没有输入框，先点击按钮。
    async fn check_passcode_screen(&self) -> AppResult<bool> {
        let page = self.page()?;

        if !PASSCODE_INPUT.is_visible(page).await {
            if let Some(send_code) = SEND_CODE_BUTTON.find(page).await {
                info!("📨 点击\"发送验证码\"按钮");
                page.click(send_code).await?;
                tokio::time::sleep(self.timings.submit_delay()).await;
            }
        }

        Ok(PASSCODE_INPUT.is_visible(page).await)
    }

    async fn is_authenticated(&self) -> AppResult<bool> {
        let url = self.page()?.current_url().await?;
        Ok(self.site.is_authenticated_url(&url))
    }

    /// 查询当前登录状态，不产生副作用
    pub async fn auth_state(&self) -> AppResult<AuthState> {
        if self.is_authenticated().await? {
            return Ok(AuthState::Authenticated);
        }
        let page = self.page()?;
        if PASSCODE_INPUT_ON_SUBMIT.is_visible(page).await || SEND_CODE_BUTTON.is_visible(page).await {
            return Ok(AuthState::PasscodeRequired);
        }
        Ok(AuthState::Unauthenticated)
    }

    /// 提交验证码，从不返回 Err
    pub async fn submit_passcode(&self, code: &str) -> PasscodeOutcome {
        match self.try_submit_passcode(code).await {
            Ok(outcome) => outcome,
            Err(AppError::InvalidPasscode) => {
                warn!("⚠️ 验证码无效");
                PasscodeOutcome::Invalid
            }
            Err(e) => {
                error!("❌ 提交验证码失败: {}", e);
                PasscodeOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_submit_passcode(&self, code: &str) -> AppResult<PasscodeOutcome> {
        let page = self.page()?;
        info!("🔑 提交验证码");

        let input = PASSCODE_INPUT_ON_SUBMIT.require(page).await?;
        page.fill(input, code.trim()).await?;
        self.click_submit(input).await?;
        page.wait_for_settle(self.timings.settle_timeout()).await;

        if self.is_authenticated().await? {
            info!("✅ 验证码正确，登录成功");
            self.session.save_context().await?;
            return Ok(PasscodeOutcome::Accepted);
        }

        if invalid_code_visible(page).await {
            return Err(AppError::InvalidPasscode);
        }

        warn!("⚠️ 提交验证码后状态未知: {}", page.current_url().await?);
        Ok(PasscodeOutcome::UnknownState)
    }
}
