//! 页面驱动能力 - 基础设施层
//!
//! 流程层只通过这个 trait 操作页面，不直接接触 chromiumoxide。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::StorageState;

/// 页面驱动
///
/// 选择器都是 CSS 选择器；找不到元素的查询返回 `false` / `None`，
/// 只有动作（fill / click / press_enter / download）在元素缺失时返回错误。
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> AppResult<()>;

    async fn current_url(&self) -> AppResult<String>;

    async fn reload(&self) -> AppResult<()>;

    /// 等待页面稳定，最多 `timeout`；超时不算错误
    async fn wait_for_settle(&self, timeout: Duration);

    async fn is_visible(&self, selector: &str) -> AppResult<bool>;

    /// 元素存在且没有 `disabled` 属性
    async fn is_enabled(&self, selector: &str) -> AppResult<bool>;

    async fn attribute(&self, selector: &str, name: &str) -> AppResult<Option<String>>;

    async fn fill(&self, selector: &str, value: &str) -> AppResult<()>;

    async fn click(&self, selector: &str) -> AppResult<()>;

    /// 在元素上按回车
    async fn press_enter(&self, selector: &str) -> AppResult<()>;

    /// 页面上是否有可见的文本
    async fn text_visible(&self, text: &str) -> AppResult<bool>;

    /// 点击元素并捕获触发的下载，以站点建议的文件名保存到 `target_dir`
    async fn download(
        &self,
        selector: &str,
        target_dir: &Path,
        timeout: Duration,
    ) -> AppResult<PathBuf>;

    /// 导出 cookies 和 localStorage
    async fn storage_state(&self) -> AppResult<StorageState>;

    async fn close(&self) -> AppResult<()>;
}
