use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// 初始化全局日志：控制台 + 日志文件
///
/// `RUST_LOG` 优先；否则默认 `info`，开启 `verbose_logging` 时为 `debug`。
/// 重复初始化（例如测试中）不会报错。
pub fn init(config: &Config) -> Result<()> {
    let log_file_path = config.log_file();
    init_log_file(&log_file_path)?;

    let file = OpenOptions::new().append(true).open(&log_file_path)?;

    let default_level = if config.verbose_logging { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("ring_export_sync={default_level},chromiumoxide=warn"))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init();

    Ok(())
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
///
/// 写入带日期的文件头；已有内容保留。
pub fn init_log_file(log_file_path: &Path) -> Result<()> {
    if let Some(parent) = log_file_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_header = format!(
        "{}\n数据导出同步日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    std::io::Write::write_all(&mut file, log_header.as_bytes())?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 数据导出自动同步");
    info!("🌐 站点: {}", config.base_url);
    info!("📁 数据目录: {}", config.data_dir.display());
    info!(
        "⏱️ 导出等待预算: {} 次 × {} 秒",
        config.timings.generation_max_retries, config.timings.generation_poll_interval_secs
    );
    info!("{}", "=".repeat(60));
}

/// 遮盖邮箱用于日志显示
///
/// `someone@example.com` → `s***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None if email.is_empty() => String::new(),
        None => "***".to_string(),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
