//! 插件注册表
//!
//! 维护 插件名 → 工厂 的映射，并按 (名称, 规范化配置) 缓存实例，
//! 使多个任务、多次运行共享同一连接。每个存储实例附带一把独占写锁，
//! 保证对同一存储实例的 save 调用串行执行。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::PluginSpec;
use crate::traits::{DataSource, Storage};

pub type DataSourceFactory = Arc<dyn Fn(&Value) -> SchedulerResult<Arc<dyn DataSource>> + Send + Sync>;
pub type StorageFactory = Arc<dyn Fn(&Value) -> SchedulerResult<Arc<dyn Storage>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    DataSource,
    Storage,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::DataSource => f.write_str("data_source"),
            PluginKind::Storage => f.write_str("storage"),
        }
    }
}

/// 实例缓存键：插件名 + 规范化后的配置 JSON
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginKey {
    pub name: String,
    pub config: String,
}

impl PluginKey {
    pub fn from_spec(spec: &PluginSpec) -> Self {
        // serde_json 的 Map 默认按键排序，序列化结果即规范形式
        Self {
            name: spec.name.clone(),
            config: spec.config.to_string(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.config)
    }
}

/// 存储实例及其独占写锁
#[derive(Clone)]
pub struct StorageHandle {
    pub key: PluginKey,
    pub storage: Arc<dyn Storage>,
    pub write_lock: Arc<Mutex<()>>,
}

impl StorageHandle {
    /// 两个句柄是否指向同一存储实例
    pub fn same_instance(&self, other: &StorageHandle) -> bool {
        Arc::ptr_eq(&self.write_lock, &other.write_lock)
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle").field("key", &self.key).finish()
    }
}

#[derive(Default)]
struct RegistryState {
    data_source_factories: HashMap<String, DataSourceFactory>,
    storage_factories: HashMap<String, StorageFactory>,
    data_sources: BTreeMap<PluginKey, Arc<dyn DataSource>>,
    storages: BTreeMap<PluginKey, StorageHandle>,
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_data_source<F>(&self, name: &str, factory: F) -> SchedulerResult<()>
    where
        F: Fn(&Value) -> SchedulerResult<Arc<dyn DataSource>> + Send + Sync + 'static,
    {
        let name = checked_name(name)?;
        let mut state = self.inner.write().await;
        if state.data_source_factories.contains_key(&name) {
            return Err(SchedulerError::config(format!("数据源插件已注册: {name}")));
        }
        state.data_source_factories.insert(name.clone(), Arc::new(factory));
        info!(plugin.kind = "data_source", plugin.name = %name, "注册数据源插件");
        Ok(())
    }

    pub async fn register_storage<F>(&self, name: &str, factory: F) -> SchedulerResult<()>
    where
        F: Fn(&Value) -> SchedulerResult<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        let name = checked_name(name)?;
        let mut state = self.inner.write().await;
        if state.storage_factories.contains_key(&name) {
            return Err(SchedulerError::config(format!("存储插件已注册: {name}")));
        }
        state.storage_factories.insert(name.clone(), Arc::new(factory));
        info!(plugin.kind = "storage", plugin.name = %name, "注册存储插件");
        Ok(())
    }

    pub async fn contains(&self, kind: PluginKind, name: &str) -> bool {
        let state = self.inner.read().await;
        match kind {
            PluginKind::DataSource => state.data_source_factories.contains_key(name),
            PluginKind::Storage => state.storage_factories.contains_key(name),
        }
    }

    /// 已注册的插件名，按字母序
    pub async fn list_plugins(&self, kind: PluginKind) -> Vec<String> {
        let state = self.inner.read().await;
        let mut names: Vec<String> = match kind {
            PluginKind::DataSource => state.data_source_factories.keys().cloned().collect(),
            PluginKind::Storage => state.storage_factories.keys().cloned().collect(),
        };
        names.sort();
        names
    }

    /// 获取或创建数据源实例
    pub async fn data_source(&self, spec: &PluginSpec) -> SchedulerResult<Arc<dyn DataSource>> {
        let key = PluginKey::from_spec(spec);
        if let Some(instance) = self.inner.read().await.data_sources.get(&key) {
            return Ok(Arc::clone(instance));
        }

        let mut state = self.inner.write().await;
        if let Some(instance) = state.data_sources.get(&key) {
            return Ok(Arc::clone(instance));
        }
        let factory = state
            .data_source_factories
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| SchedulerError::plugin_not_found(PluginKind::DataSource.to_string(), &spec.name))?;
        let instance = factory(&spec.config)?;
        state.data_sources.insert(key.clone(), Arc::clone(&instance));
        debug!(plugin.kind = "data_source", plugin.key = %key, "创建数据源实例");
        Ok(instance)
    }

    /// 获取或创建存储实例
    pub async fn storage(&self, spec: &PluginSpec) -> SchedulerResult<StorageHandle> {
        let key = PluginKey::from_spec(spec);
        if let Some(handle) = self.inner.read().await.storages.get(&key) {
            return Ok(handle.clone());
        }

        let mut state = self.inner.write().await;
        if let Some(handle) = state.storages.get(&key) {
            return Ok(handle.clone());
        }
        let factory = state
            .storage_factories
            .get(&spec.name)
            .cloned()
            .ok_or_else(|| SchedulerError::plugin_not_found(PluginKind::Storage.to_string(), &spec.name))?;
        let handle = StorageHandle {
            key: key.clone(),
            storage: factory(&spec.config)?,
            write_lock: Arc::new(Mutex::new(())),
        };
        state.storages.insert(key.clone(), handle.clone());
        debug!(plugin.kind = "storage", plugin.key = %key, "创建存储实例");
        Ok(handle)
    }

    /// 关闭所有缓存的数据源连接并清空实例缓存
    pub async fn close_all(&self) {
        let data_sources: Vec<(PluginKey, Arc<dyn DataSource>)> = {
            let mut state = self.inner.write().await;
            state.storages.clear();
            std::mem::take(&mut state.data_sources).into_iter().collect()
        };

        for (key, source) in data_sources {
            if let Err(e) = source.close_all_connections().await {
                warn!(plugin.key = %key, error = %e, "关闭数据源连接失败");
            }
        }
    }

    pub async fn cached_instances(&self) -> usize {
        let state = self.inner.read().await;
        state.data_sources.len() + state.storages.len()
    }
}

fn checked_name(name: &str) -> SchedulerResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchedulerError::config("插件名称不能为空"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coverage, DataSegment, Row, Timeframe};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSource {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DataSource for NullSource {
        fn name(&self) -> &str {
            "null"
        }

        async fn fetch(&self, _: &str, _: Timeframe, _: i64, _: Option<i64>) -> SchedulerResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn close_all_connections(&self) -> SchedulerResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NullStorage;

    #[async_trait]
    impl Storage for NullStorage {
        fn name(&self) -> &str {
            "null"
        }

        async fn save(&self, _: &str, _: &DataSegment, _: Option<&str>) -> SchedulerResult<()> {
            Ok(())
        }

        async fn load(&self, _: &str, _: Option<&str>) -> SchedulerResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn exists(&self, _: &str, _: Option<&str>) -> SchedulerResult<Coverage> {
            Ok(Coverage::new())
        }
    }

    async fn registry_with_counters() -> (PluginRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let registry = PluginRegistry::new();
        let created = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let (c, d) = (Arc::clone(&created), Arc::clone(&closed));
        registry
            .register_data_source("null", move |config| {
                if config.get("fail").is_some() {
                    return Err(SchedulerError::config("bad config"));
                }
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(NullSource { closed: Arc::clone(&d) }) as Arc<dyn DataSource>)
            })
            .await
            .unwrap();
        registry
            .register_storage("null", |_| Ok(Arc::new(NullStorage) as Arc<dyn Storage>))
            .await
            .unwrap();
        (registry, created, closed)
    }

    #[tokio::test]
    async fn test_instances_cached_by_name_and_config() {
        let (registry, created, _) = registry_with_counters().await;

        // 键顺序不同的同一配置视为同一实例
        let a = PluginSpec::with_config("null", json!({"a": 1, "b": 2}));
        let b = PluginSpec::with_config("null", json!({"b": 2, "a": 1}));
        let c = PluginSpec::with_config("null", json!({"a": 2}));

        let first = registry.data_source(&a).await.unwrap();
        let second = registry.data_source(&b).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        registry.data_source(&c).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);

        let s1 = registry.storage(&PluginSpec::new("null")).await.unwrap();
        let s2 = registry.storage(&PluginSpec::new("null")).await.unwrap();
        let s3 = registry
            .storage(&PluginSpec::with_config("null", json!({"root": "/x"})))
            .await
            .unwrap();
        assert!(s1.same_instance(&s2));
        assert!(!s1.same_instance(&s3));
    }

    #[tokio::test]
    async fn test_unknown_plugin_and_bad_config() {
        let (registry, _, _) = registry_with_counters().await;

        let err = registry.data_source(&PluginSpec::new("missing")).await.err().unwrap();
        assert!(matches!(err, SchedulerError::PluginNotFound { .. }));

        let err = registry.storage(&PluginSpec::new("missing")).await.err().unwrap();
        assert_eq!(
            err,
            SchedulerError::PluginNotFound {
                kind: "storage".to_string(),
                name: "missing".to_string()
            }
        );

        let bad = PluginSpec::with_config("null", json!({"fail": true}));
        assert!(matches!(
            registry.data_source(&bad).await,
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_registration_rejected() {
        let (registry, _, _) = registry_with_counters().await;

        let dup = registry
            .register_storage("null", |_| Ok(Arc::new(NullStorage) as Arc<dyn Storage>))
            .await;
        assert!(dup.is_err());

        let empty = registry
            .register_storage("  ", |_| Ok(Arc::new(NullStorage) as Arc<dyn Storage>))
            .await;
        assert!(empty.is_err());

        assert_eq!(registry.list_plugins(PluginKind::DataSource).await, vec!["null"]);
        assert!(registry.contains(PluginKind::Storage, "null").await);
    }

    #[tokio::test]
    async fn test_close_all_closes_cached_sources() {
        let (registry, _, closed) = registry_with_counters().await;
        registry.data_source(&PluginSpec::new("null")).await.unwrap();
        registry.storage(&PluginSpec::new("null")).await.unwrap();
        assert_eq!(registry.cached_instances().await, 2);

        registry.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.cached_instances().await, 0);

        // 重复关闭是安全的
        registry.close_all().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
