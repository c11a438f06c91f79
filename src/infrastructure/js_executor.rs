//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，对外只暴露 [`PageDriver`] 能力

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::storage::GetCookiesParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::PageDriver;
use crate::models::{OriginStorage, StorageEntry, StorageState, StoredCookie};

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力与页面驱动能力
/// - 不认识登录流程 / 导出流程
pub struct JsExecutor {
    page: Page,
    page_load_timeout: Duration,
}

#[derive(Deserialize)]
struct LocalStorageDump {
    origin: String,
    entries: Vec<(String, String)>,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page, page_load_timeout: Duration) -> Self {
        Self {
            page,
            page_load_timeout,
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }
}

/// 把按 guid 保存的下载文件改名为建议的文件名，覆盖同名的旧文件
fn finalize_download(saved: &Path, target_dir: &Path, suggested: &str) -> AppResult<PathBuf> {
    if !saved.exists() {
        warn!("⚠️ 下载已完成但文件不存在: {}", saved.display());
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("下载文件不存在: {}", saved.display()),
        )));
    }

    let file_name = Path::new(suggested)
        .file_name()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "export.zip".into());
    let path = target_dir.join(file_name);

    if path != saved {
        if path.exists() {
            debug!("覆盖旧的下载文件: {}", path.display());
            std::fs::remove_file(&path)?;
        }
        std::fs::rename(saved, &path)?;
    }
    Ok(path)
}

/// 把字符串编码成 JS 字面量
fn js_str(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl PageDriver for JsExecutor {
    async fn goto(&self, url: &str) -> AppResult<()> {
        debug!("🌐 导航到: {}", url);
        match tokio::time::timeout(self.page_load_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::navigation(url, e.to_string())),
            Err(_) => Err(AppError::navigation(url, "页面加载超时")),
        }
    }

    async fn current_url(&self) -> AppResult<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn reload(&self) -> AppResult<()> {
        self.page.reload().await?;
        Ok(())
    }

    async fn wait_for_settle(&self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .is_err()
        {
            debug!("页面在 {:?} 内未稳定，继续", timeout);
        }
    }

    async fn is_visible(&self, selector: &str) -> AppResult<bool> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return style.visibility !== 'hidden' && style.display !== 'none'
                    && rect.width > 0 && rect.height > 0;
            }})()"#,
            sel = js_str(selector)
        );
        self.eval_as(js).await
    }

    async fn is_enabled(&self, selector: &str) -> AppResult<bool> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && !el.disabled; }})()",
            js_str(selector)
        );
        self.eval_as(js).await
    }

    async fn attribute(&self, selector: &str, name: &str) -> AppResult<Option<String>> {
        let js = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.getAttribute({}) : null; }})()",
            js_str(selector),
            js_str(name)
        );
        self.eval_as(js).await
    }

    async fn fill(&self, selector: &str, value: &str) -> AppResult<()> {
        // 用原生 setter 赋值，再派发事件，前端框架才能感知到输入
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                const setter = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value').set;
                setter.call(el, {val});
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_str(selector),
            val = js_str(value)
        );
        if self.eval_as::<bool>(js).await? {
            Ok(())
        } else {
            Err(AppError::element_not_found(selector))
        }
    }

    async fn click(&self, selector: &str) -> AppResult<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> AppResult<()> {
        self.page.find_element(selector).await?.press_key("Enter").await?;
        Ok(())
    }

    async fn text_visible(&self, text: &str) -> AppResult<bool> {
        let js = format!(
            "(() => !!document.body && document.body.innerText.includes({}))()",
            js_str(text)
        );
        self.eval_as(js).await
    }

    async fn download(
        &self,
        selector: &str,
        target_dir: &Path,
        timeout: Duration,
    ) -> AppResult<PathBuf> {
        std::fs::create_dir_all(target_dir)?;

        // allowAndName: 浏览器按 guid 保存文件，下载事件需要显式开启
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(target_dir.to_string_lossy().into_owned())
            .events_enabled(true)
            .build()
            .map_err(|e| AppError::navigation(selector, e))?;
        self.page.execute(params).await?;

        let mut will_begin = self.page.event_listener::<EventDownloadWillBegin>().await?;
        let mut progress = self.page.event_listener::<EventDownloadProgress>().await?;

        self.click(selector).await?;

        let started = tokio::time::timeout(timeout, will_begin.next())
            .await
            .map_err(|_| AppError::Timeout("等待下载开始".to_string()))?
            .ok_or_else(|| AppError::Timeout("下载事件流已关闭".to_string()))?;
        let guid = started.guid.clone();
        let file_name = started.suggested_filename.clone();
        debug!("⬇️ 下载开始: {} ({})", file_name, guid);

        let finished = tokio::time::timeout(timeout, async {
            while let Some(event) = progress.next().await {
                if event.guid != guid {
                    continue;
                }
                match event.state {
                    DownloadProgressState::Completed => return Ok(event.file_path.clone()),
                    DownloadProgressState::Canceled => {
                        return Err(AppError::navigation(file_name.clone(), "下载被取消"))
                    }
                    DownloadProgressState::InProgress => {}
                }
            }
            Err(AppError::Timeout("下载事件流已关闭".to_string()))
        })
        .await
        .map_err(|_| AppError::Timeout(format!("下载 {} 超时", file_name)))??;

        let saved = finished
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .unwrap_or_else(|| target_dir.join(&guid));
        finalize_download(&saved, target_dir, &file_name)
    }

    async fn storage_state(&self) -> AppResult<StorageState> {
        // Storage.getCookies 返回整个浏览器上下文的 cookie，不限于当前页面的域名
        let cookies = self
            .page
            .execute(GetCookiesParams::default())
            .await?
            .result
            .cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{:?}", s)),
            })
            .collect();

        let dump: LocalStorageDump = self
            .eval_as(
                "(() => ({ origin: location.origin, entries: Object.entries(window.localStorage || {}) }))()",
            )
            .await?;

        let origins = if dump.entries.is_empty() {
            Vec::new()
        } else {
            vec![OriginStorage {
                origin: dump.origin,
                local_storage: dump
                    .entries
                    .into_iter()
                    .map(|(name, value)| StorageEntry { name, value })
                    .collect(),
            }]
        };

        Ok(StorageState { cookies, origins })
    }

    async fn close(&self) -> AppResult<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
