//! 日志订阅器安装。
//!
//! 库本身只通过 `tracing` 宏产出结构化事件；宿主进程若没有自己的订阅器，可调用
//! [`install_fmt_subscriber`] 安装一个 `fmt + EnvFilter` 组合。

use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::error::{Result, RxError};

/// 默认过滤指令：本 crate 输出 `info` 及以上。
pub const DEFAULT_DIRECTIVE: &str = "spark_wlan_rx=info";

/// 按 `RUST_LOG` 构造过滤器，未设置或解析失败时回落到 `fallback`。
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// 构造 `registry + EnvFilter + fmt` 订阅器，不做全局安装。
pub fn fmt_subscriber(fallback: &str) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(env_filter(fallback))
        .with(tracing_subscriber::fmt::layer().with_target(true))
}

/// 安装全局订阅器。已存在全局订阅器时返回 [`RxError::Logging`]。
pub fn install_fmt_subscriber(fallback: &str) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Err(RxError::Logging {
            reason: "a global subscriber is already installed".into(),
        });
    }
    tracing::subscriber::set_global_default(fmt_subscriber(fallback)).map_err(|err| {
        RxError::Logging {
            reason: err.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_subscriber_accepts_events() {
        // 全局订阅器由测试框架占用，这里只验证订阅器可构造并在作用域内生效。
        let hits = tracing::subscriber::with_default(fmt_subscriber(DEFAULT_DIRECTIVE), || {
            tracing::info!(target: "spark_wlan_rx", "logging smoke event");
            1
        });
        assert_eq!(hits, 1);
    }
}
