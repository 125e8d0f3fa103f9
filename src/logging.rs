//! 日志初始化模块.
//!
//! 库 crate 只通过 `log` 门面输出, 这里为命令行工具装配 tracing 订阅者,
//! `log` 记录经 tracing-log 桥接转发.
//!
//! 双输出 (统一级别):
//! - console: 彩色, 输出到 stderr
//! - file: 无色, 按天滚动
//!
//! 级别体系 (优先级: LIU_LOG 环境变量 > 命令行 > 默认):
//! - 默认:   info  (打开, 定位, 流结束等生命周期事件)
//! - `-v`:   debug (逐包/逐元素的决策)
//! - `-vv`:  trace (仅 liu 项目 crate, 第三方依赖保持 info)
//! - `-vvv`: trace (全局, 含第三方依赖)
//!
//! 日志文件输出到 `{directory}/{prefix}.{date}.log`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, Timelike};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 级别环境变量
pub const LOG_ENV: &str = "LIU_LOG";

/// 本项目所有 crate 的 target 前缀 (用于 -vv 级别的定向 trace)
const LIU_CRATE_TARGETS: &[&str] = &[
    "liu",
    "liu_core",
    "liu_format",
    "liu_pipeline",
    "liu_player",
    "liu_probe",
    "liu_play",
];

/// 日志选项
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// 日志文件前缀 (如 "liu-play")
    pub file_prefix: String,
    /// 日志目录, None 表示只输出到控制台
    pub directory: Option<PathBuf>,
    /// 0=info, 1=debug, 2=trace(liu), 3+=trace(all)
    pub verbosity: u8,
    /// 保留天数, 更早的日志文件在初始化时删除
    pub retention_days: i64,
}

impl LogOptions {
    pub fn new(file_prefix: &str, verbosity: u8) -> Self {
        Self {
            file_prefix: file_prefix.to_string(),
            directory: Some(PathBuf::from("logs")),
            verbosity,
            retention_days: 14,
        }
    }
}

fn build_liu_trace_filter() -> EnvFilter {
    let mut directives = LIU_CRATE_TARGETS
        .iter()
        .map(|t| format!("{t}=trace"))
        .collect::<Vec<_>>();
    directives.push("info".to_string());
    EnvFilter::new(directives.join(","))
}

/// 根据 verbosity 构建 EnvFilter
fn build_filter(verbosity: u8) -> EnvFilter {
    match verbosity {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        2 => build_liu_trace_filter(),
        _ => EnvFilter::new("trace"),
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| build_filter(verbosity))
}

/// 初始化日志系统, 只应调用一次
pub fn init(options: &LogOptions) -> Result<()> {
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(filter(options.verbosity));

    let file_layer = match &options.directory {
        Some(directory) => {
            fs::create_dir_all(directory)
                .with_context(|| format!("创建日志目录失败, path={}", directory.display()))?;
            let removed = cleanup_logs(directory, &options.file_prefix, options.retention_days)?;
            let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(&options.file_prefix)
                .filename_suffix("log")
                .build(directory)
                .context("创建日志文件失败")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD.set(guard).ok();
            if removed > 0 {
                eprintln!("已删除 {removed} 个过期日志文件");
            }
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(FileFormatter)
                    .with_filter(filter(options.verbosity)),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;
    Ok(())
}

/// 从 `{prefix}.{YYYY-MM-DD}.log` 中解析日期
fn parse_log_name(name: &str, prefix: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('.')?;
    let date = rest.strip_suffix(".log")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// 删除早于保留期的日志文件, 返回删除数量
fn cleanup_logs(directory: &Path, prefix: &str, retention_days: i64) -> Result<usize> {
    if retention_days <= 0 {
        return Ok(0);
    }
    let cutoff = Local::now().date_naive() - ChronoDuration::days(retention_days);
    let mut removed = 0;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        match parse_log_name(&name, prefix) {
            Some(date) if date < cutoff => {
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
            _ => {}
        }
    }
    Ok(removed)
}

/// Console 格式: 彩色, 带时间戳和 target
struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {}{:5}\x1b[0m {} > ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
            color,
            meta.level(),
            meta.target(),
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// File 格式: 无色, 时间戳 + 级别 + target + 消息
struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {:5} {} > ",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
            meta.level(),
            meta.target(),
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_解析日志文件名() {
        assert_eq!(
            parse_log_name("liu-play.2026-02-06.log", "liu-play"),
            NaiveDate::from_ymd_opt(2026, 2, 6)
        );
        assert_eq!(parse_log_name("liu-probe.2026-02-06.log", "liu-play"), None);
        assert_eq!(parse_log_name("liu-play.latest.log", "liu-play"), None);
        assert_eq!(parse_log_name("liu-play.2026-02-06.log.gz", "liu-play"), None);
    }

    #[test]
    fn test_清理过期日志() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().date_naive();
        let old = today - ChronoDuration::days(30);
        let keep = dir.path().join(format!("liu-play.{}.log", today.format("%Y-%m-%d")));
        let stale = dir.path().join(format!("liu-play.{}.log", old.format("%Y-%m-%d")));
        let other = dir.path().join("notes.txt");
        for path in [&keep, &stale, &other] {
            fs::write(path, b"x").unwrap();
        }

        assert_eq!(cleanup_logs(dir.path(), "liu-play", 14).unwrap(), 1);
        assert!(keep.exists());
        assert!(!stale.exists());
        assert!(other.exists());
        assert_eq!(cleanup_logs(dir.path(), "liu-play", 0).unwrap(), 0);
    }
}
