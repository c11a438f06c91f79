//! 浏览器依赖的查找与安装

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 安装目录中可识别的可执行文件名
const BUNDLED_NAMES: &[&str] = &["chrome", "chrome.exe", "chromium", "headless_shell"];

/// 系统中的浏览器命令
const SYSTEM_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

#[derive(Debug, Clone)]
pub struct BrowserInstaller {
    configured: Option<PathBuf>,
    browser_dir: PathBuf,
    install_command: Vec<String>,
}

impl BrowserInstaller {
    pub fn new(
        configured: Option<PathBuf>,
        browser_dir: PathBuf,
        install_command: Vec<String>,
    ) -> Self {
        Self {
            configured,
            browser_dir,
            install_command,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.chrome_executable.clone(),
            config.browser_dir(),
            config.install_command.clone(),
        )
    }

    /// 查找浏览器：配置路径 → 安装目录 → 系统 PATH
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.configured {
            if path.is_file() {
                return Some(path.clone());
            }
            debug!("配置的浏览器路径不存在: {}", path.display());
        }

        if let Some(path) = find_bundled(&self.browser_dir) {
            return Some(path);
        }

        SYSTEM_NAMES.iter().find_map(|name| which::which(name).ok())
    }

    /// 运行安装命令，浏览器装到 `browser_dir`
    pub async fn install(&self) -> AppResult<()> {
        let (program, args) = self
            .install_command
            .split_first()
            .ok_or_else(|| AppError::Installation("安装命令为空".to_string()))?;

        std::fs::create_dir_all(&self.browser_dir)?;
        info!("📦 安装浏览器: {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .env("PLAYWRIGHT_BROWSERS_PATH", &self.browser_dir)
            .output()
            .await
            .map_err(|e| AppError::Installation(format!("无法执行 {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("❌ 浏览器安装失败 ({}): {}", output.status, stderr.trim());
            return Err(AppError::Installation(format!(
                "{} 退出码 {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        info!("✅ 浏览器安装完成");
        Ok(())
    }
}

fn find_bundled(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    WalkDir::new(dir)
        .max_depth(5)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| BUNDLED_NAMES.contains(&name))
        })
        .map(|entry| entry.into_path())
}
