use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use chronoforge_core::models::{TaskExecutionRecord, TaskSpec};
use chronoforge_core::{
    Clock, MetricsCollector, SchedulerError, SchedulerResult, ShutdownSignal, StructuredLogger, TaskStatusListener,
    WorkerConfig,
};

use super::pipeline::TaskRunner;

const STOPPING_REASON: &str = "scheduler stopping";

/// 停止结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// 停止时正在运行、并在超时前结束的任务
    pub completed: Vec<String>,
    /// 超时后被强制放弃的任务
    pub abandoned: Vec<String>,
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    pending: RwLock<HashSet<String>>,
    running: RwLock<HashSet<String>>,
    /// 已接收但尚未结束（排队 + 运行）的任务数
    outstanding: watch::Sender<usize>,
    listener: Arc<dyn TaskStatusListener>,
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    metrics: MetricsCollector,
}

/// 有界工作池
///
/// 最多同时运行 `max_concurrent_tasks` 个任务，其余在有界队列中等待执行槽位。
/// 队列满时 [`dispatch`](WorkerPool::dispatch) 会等待，而不是丢弃任务。
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    queue_tx: Mutex<Option<mpsc::Sender<Arc<TaskSpec>>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Arc<TaskSpec>>>>,
}

impl WorkerPool {
    pub fn new(
        config: &WorkerConfig,
        runner: Arc<dyn TaskRunner>,
        listener: Arc<dyn TaskStatusListener>,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
        metrics: MetricsCollector,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
                pending: RwLock::new(HashSet::new()),
                running: RwLock::new(HashSet::new()),
                outstanding,
                listener,
                runner,
                clock,
                shutdown,
                metrics,
            }),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: Mutex::new(Some(rx)),
        }
    }

    /// 把任务放入执行队列
    ///
    /// 停止后或同名任务仍在排队/运行时拒绝。
    pub async fn dispatch(&self, spec: Arc<TaskSpec>) -> SchedulerResult<()> {
        if self.inner.shutdown.is_draining() {
            return Err(SchedulerError::InvalidState("工作池正在停止".to_string()));
        }
        self.ensure_started().await;

        let tx = self
            .queue_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| SchedulerError::InvalidState("工作池已关闭".to_string()))?;

        let name = spec.name.clone();
        if self.inner.running.read().await.contains(&name) || !self.inner.pending.write().await.insert(name.clone()) {
            return Err(SchedulerError::TaskRunning { name });
        }
        self.inner.outstanding.send_modify(|n| *n += 1);

        if tx.send(spec).await.is_err() {
            self.inner.pending.write().await.remove(&name);
            self.inner.finish_one();
            return Err(SchedulerError::InvalidState("工作池已关闭".to_string()));
        }
        debug!(task.name = %name, "任务进入执行队列");
        Ok(())
    }

    async fn ensure_started(&self) {
        if let Some(rx) = self.queue_rx.lock().await.take() {
            tokio::spawn(Arc::clone(&self.inner).queue_loop(rx));
        }
    }

    /// 当前正在运行的任务名，按字母序
    pub async fn running_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.running.read().await.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn available_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// 停止工作池
    ///
    /// 排队中的任务记为跳过；运行中的任务在 `timeout` 内自然结束，
    /// 超时后触发放弃信号并返回仍在运行的任务。
    pub async fn shutdown(&self, timeout: Duration) -> StopReport {
        let in_flight = self.running_tasks().await;
        info!(running = in_flight.len(), timeout_ms = timeout.as_millis() as u64, "开始停止工作池");

        self.inner.shutdown.begin_drain();
        self.queue_tx.lock().await.take();
        // 队列循环从未启动时，由这里负责清理
        if let Some(mut rx) = self.queue_rx.lock().await.take() {
            rx.close();
            while let Ok(spec) = rx.try_recv() {
                self.inner.skip(&spec).await;
            }
        }

        let mut idle = self.inner.outstanding.subscribe();
        let drained = tokio::time::timeout(timeout, idle.wait_for(|n| *n == 0))
            .await
            .is_ok();
        let abandoned = if drained {
            Vec::new()
        } else {
            self.inner.shutdown.abandon();
            let names = self.running_tasks().await;
            for name in &names {
                StructuredLogger::log_task_abandoned(name, timeout.as_millis() as u64);
            }
            names
        };

        let completed = in_flight.into_iter().filter(|n| !abandoned.contains(n)).collect();
        StopReport { completed, abandoned }
    }
}

impl PoolInner {
    async fn queue_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Arc<TaskSpec>>) {
        loop {
            let spec = tokio::select! {
                biased;
                _ = self.shutdown.drained() => break,
                job = rx.recv() => match job {
                    Some(spec) => spec,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.drained() => {
                    self.skip(&spec).await;
                    break;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.skip(&spec).await;
                        break;
                    }
                },
            };
            Arc::clone(&self).launch(spec, permit);
        }

        rx.close();
        while let Some(spec) = rx.recv().await {
            self.skip(&spec).await;
        }
        debug!("工作池队列循环退出");
    }

    fn launch(self: Arc<Self>, spec: Arc<TaskSpec>, permit: OwnedSemaphorePermit) {
        tokio::spawn(async move {
            let _permit = permit;
            let name = spec.name.clone();

            self.running.write().await.insert(name.clone());
            self.pending.write().await.remove(&name);

            if !self.listener.on_started(&name).await {
                debug!(task.name = %name, "任务已不可执行，放弃本次运行");
                self.running.write().await.remove(&name);
                self.finish_one();
                return;
            }
            self.metrics.set_running_tasks(self.running.read().await.len());

            let started_at_ms = self.clock.now_ms();
            let runner = Arc::clone(&self.runner);
            let shutdown = self.shutdown.clone();
            let run_spec = Arc::clone(&spec);
            let record = match tokio::spawn(async move { runner.run(run_spec, &shutdown).await }).await {
                Ok(record) => record,
                Err(e) => {
                    error!(task.name = %name, error = %e, "任务执行异常退出");
                    TaskExecutionRecord::failed(name.as_str(), started_at_ms, format!("任务执行异常: {e}"))
                }
            };

            self.running.write().await.remove(&name);
            self.metrics.set_running_tasks(self.running.read().await.len());
            self.listener.on_completed(record).await;
            self.finish_one();
        });
    }

    async fn skip(&self, spec: &TaskSpec) {
        warn!(task.name = %spec.name, "调度器停止，排队任务未执行");
        self.pending.write().await.remove(&spec.name);
        self.listener.on_skipped(&spec.name, STOPPING_REASON).await;
        self.finish_one();
    }

    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}
