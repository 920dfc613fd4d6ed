use chrono::Utc;

/// 时钟抽象，便于在测试中控制“当前时间”
pub trait Clock: Send + Sync {
    /// 当前 UTC 毫秒时间戳
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
