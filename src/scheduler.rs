use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use chronoforge_core::models::{RunResult, TaskExecutionRecord, TaskSpec, TaskState};
use chronoforge_core::{
    Clock, MetricsCollector, PluginKind, PluginRegistry, SchedulerConfig, SchedulerError, SchedulerResult,
    ShutdownSignal, StructuredLogger, SystemClock, TaskStatusListener,
};
use chronoforge_dispatcher::{StateListener, TaskEntry, TaskTable, TickOutcome, TimeSlotScheduler};
use chronoforge_worker::{FetchPipeline, StopReport, WorkerPool};

/// 单个任务的状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatusReport {
    pub name: String,
    pub state: TaskState,
    pub next_fire_ms: Option<i64>,
    pub last_result: Option<RunResult>,
    pub run_count: u64,
    /// 最近的执行记录，最新的在前
    pub recent_runs: Vec<TaskExecutionRecord>,
}

impl TaskStatusReport {
    fn from_entry(entry: &TaskEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            state: entry.state(),
            next_fire_ms: entry.next_fire_ms,
            last_result: entry.last_result(),
            run_count: entry.run_count(),
            recent_runs: entry.recent_runs(),
        }
    }
}

enum Lifecycle {
    Created,
    Started(JoinHandle<()>),
    Stopped,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: PluginRegistry,
    table: Arc<RwLock<TaskTable>>,
    time_slots: TimeSlotScheduler,
    pool: WorkerPool,
    listener: StateListener,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    metrics: MetricsCollector,
}

/// 调度器门面
///
/// 持有任务表、时间槽调度器和工作池。`start()` 启动 tick 循环，`stop()` 协作式停止，
/// 调度器只能启动一次。
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, registry: PluginRegistry) -> SchedulerResult<Self> {
        Self::with_clock(config, registry, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SchedulerConfig,
        registry: PluginRegistry,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let metrics = MetricsCollector::new(config.observability.metrics_enabled);
        let shutdown = ShutdownSignal::new();
        let table = Arc::new(RwLock::new(TaskTable::new(config.dispatcher.history_capacity)));
        let listener = StateListener::new(Arc::clone(&table), Arc::clone(&clock), metrics.clone());

        let pipeline = FetchPipeline::new(
            registry.clone(),
            config.pipeline.clone(),
            config.retry.clone(),
            Arc::clone(&clock),
            metrics.clone(),
        );
        let pool = WorkerPool::new(
            &config.worker,
            Arc::new(pipeline),
            Arc::new(listener.clone()) as Arc<dyn TaskStatusListener>,
            Arc::clone(&clock),
            shutdown.clone(),
            metrics.clone(),
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                time_slots: TimeSlotScheduler::new(config.dispatcher.tick_interval_ms),
                config,
                registry,
                table,
                pool,
                listener,
                clock,
                shutdown,
                metrics,
            }),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// 注册任务
    ///
    /// 同步校验任务定义并解析两个插件，配置错误和未知插件都在这里返回。
    pub async fn add_task(&self, spec: TaskSpec) -> SchedulerResult<()> {
        self.ensure_not_stopped().await?;
        self.inner.check_task(&spec).await?;

        let now_ms = self.inner.clock.now_ms();
        let (data_source, storage, symbols) =
            (spec.data_source.name.clone(), spec.storage.name.clone(), spec.symbols.len());
        let name = spec.name.clone();
        let next_fire = spec.time_slot.next_fire_after(now_ms);

        let mut table = self.inner.table.write().await;
        table.insert(spec)?;
        if let Some(entry) = table.get_mut(&name) {
            entry.next_fire_ms = next_fire;
        }
        StructuredLogger::log_task_registered(&name, &data_source, &storage, symbols);
        Ok(())
    }

    /// 替换已注册任务的定义，保留执行历史；排队或运行中的任务拒绝替换
    pub async fn replace_task(&self, spec: TaskSpec) -> SchedulerResult<()> {
        self.ensure_not_stopped().await?;
        self.inner.check_task(&spec).await?;

        let now_ms = self.inner.clock.now_ms();
        let name = spec.name.clone();
        let next_fire = spec.time_slot.next_fire_after(now_ms);

        let mut table = self.inner.table.write().await;
        table.replace(spec)?;
        if let Some(entry) = table.get_mut(&name) {
            entry.next_fire_ms = next_fire;
        }
        info!(event = "task_replaced", task.name = %name, "任务定义已替换");
        Ok(())
    }

    /// 删除任务；运行中的任务拒绝删除，排队中的任务不会再被执行
    pub async fn remove_task(&self, name: &str) -> SchedulerResult<()> {
        self.inner.table.write().await.remove(name)?;
        StructuredLogger::log_task_removed(name);
        Ok(())
    }

    /// 查询任务状态；`None` 返回全部任务，按名称排序
    pub async fn get_status(&self, name: Option<&str>) -> SchedulerResult<Vec<TaskStatusReport>> {
        let table = self.inner.table.read().await;
        match name {
            Some(name) => table
                .get(name)
                .map(|entry| vec![TaskStatusReport::from_entry(entry)])
                .ok_or_else(|| SchedulerError::TaskNotFound {
                    name: name.to_string(),
                }),
            None => Ok(table.iter().map(TaskStatusReport::from_entry).collect()),
        }
    }

    pub async fn list_plugins(&self, kind: PluginKind) -> Vec<String> {
        self.inner.registry.list_plugins(kind).await
    }

    pub async fn running_tasks(&self) -> Vec<String> {
        self.inner.pool.running_tasks().await
    }

    /// 以当前时钟时间立即评估一次 tick
    pub async fn tick(&self) -> SchedulerResult<TickOutcome> {
        self.ensure_not_stopped().await?;
        Ok(self.inner.tick().await)
    }

    /// 启动 tick 循环；重复启动只记录警告
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Started(_) => {
                warn!("调度器已经在运行");
                Ok(())
            }
            Lifecycle::Stopped => Err(SchedulerError::InvalidState(
                "调度器已停止，不能再次启动".to_string(),
            )),
            Lifecycle::Created => {
                let inner = Arc::clone(&self.inner);
                *lifecycle = Lifecycle::Started(tokio::spawn(inner.run_loop()));
                info!(
                    tick_interval_ms = self.inner.config.dispatcher.tick_interval_ms,
                    max_concurrent_tasks = self.inner.config.worker.max_concurrent_tasks,
                    "调度器已启动"
                );
                Ok(())
            }
        }
    }

    /// 停止调度器
    ///
    /// 不再触发新任务，排队中的任务记为跳过，等待运行中的任务结束；
    /// 超过 `worker.shutdown_timeout_ms` 仍未结束的任务被强制放弃并标记为失败。
    pub async fn stop(&self) -> SchedulerResult<StopReport> {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        if matches!(previous, Lifecycle::Stopped) {
            warn!("调度器已经停止");
            return Ok(StopReport::default());
        }

        info!("开始停止调度器");
        self.inner.shutdown.begin_drain();
        if let Lifecycle::Started(handle) = previous {
            if let Err(e) = handle.await {
                warn!(error = %e, "调度循环异常退出");
            }
        }

        let report = self
            .inner
            .pool
            .shutdown(self.inner.config.worker.shutdown_timeout())
            .await;
        for name in &report.abandoned {
            self.inner.listener.mark_abandoned(name).await;
        }
        self.inner.registry.close_all().await;

        info!(
            completed = report.completed.len(),
            abandoned = report.abandoned.len(),
            "调度器已停止"
        );
        Ok(report)
    }

    async fn ensure_not_stopped(&self) -> SchedulerResult<()> {
        match *self.lifecycle.lock().await {
            Lifecycle::Stopped => Err(SchedulerError::InvalidState("调度器已停止".to_string())),
            _ => Ok(()),
        }
    }
}

impl SchedulerInner {
    async fn check_task(&self, spec: &TaskSpec) -> SchedulerResult<()> {
        spec.validate()?;
        self.registry.data_source(&spec.data_source).await?;
        self.registry.storage(&spec.storage).await?;
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.dispatcher.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.drained() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        info!("调度循环已退出");
    }

    async fn tick(&self) -> TickOutcome {
        let now_ms = self.clock.now_ms();
        let (outcome, due) = {
            let mut table = self.table.write().await;
            let outcome = self.time_slots.collect_due(&mut table, now_ms);
            let due: Vec<(i64, Arc<TaskSpec>)> = outcome
                .due
                .iter()
                .filter_map(|d| table.get(&d.name).map(|e| (d.due_at_ms, Arc::clone(e.spec()))))
                .collect();
            (outcome, due)
        };

        for _ in &outcome.skipped {
            self.metrics.record_task_skip();
        }
        for (due_at_ms, spec) in due {
            let name = spec.name.clone();
            match self.pool.dispatch(spec).await {
                Ok(()) => StructuredLogger::log_task_dispatched(&name, due_at_ms),
                Err(e) => self.listener.on_skipped(&name, &e.to_string()).await,
            }
        }
        outcome
    }
}
