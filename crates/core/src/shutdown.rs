use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 关闭阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    /// 停止接收新任务，管道在下一个分页边界退出
    Draining,
    /// 等待超时，尚未写入的数据段直接丢弃
    Abandoned,
}

/// 协作式停止信号
///
/// 管道在每次分页拉取前检查 [`is_draining`](Self::is_draining)，写入器在每次写入前检查
/// [`is_abandoned`](Self::is_abandoned)。信号从不中断正在进行中的拉取或写入。
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<ShutdownPhase>>,
    rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ShutdownPhase::Running);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.rx.borrow()
    }

    pub fn is_draining(&self) -> bool {
        self.phase() >= ShutdownPhase::Draining
    }

    pub fn is_abandoned(&self) -> bool {
        self.phase() == ShutdownPhase::Abandoned
    }

    /// 进入排空阶段，重复调用无副作用
    pub fn begin_drain(&self) {
        self.advance(ShutdownPhase::Draining);
    }

    /// 放弃仍在运行的任务
    pub fn abandon(&self) {
        self.advance(ShutdownPhase::Abandoned);
    }

    fn advance(&self, target: ShutdownPhase) {
        let changed = self.tx.send_if_modified(|phase| {
            if *phase < target {
                *phase = target;
                true
            } else {
                false
            }
        });
        if changed {
            match target {
                ShutdownPhase::Abandoned => warn!("停止超时，放弃剩余任务"),
                _ => info!(phase = ?target, "触发停止信号"),
            }
        } else {
            debug!(phase = ?target, "停止信号已处于该阶段");
        }
    }

    /// 等待进入排空阶段
    pub async fn drained(&self) {
        let mut rx = self.rx.clone();
        // 发送端随 ShutdownSignal 一起存活，wait_for 只会在阶段满足时返回
        let _ = rx.wait_for(|phase| *phase >= ShutdownPhase::Draining).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
