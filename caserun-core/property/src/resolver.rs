//! 属性解析器

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{PropertyCache, ResolutionKey, ResolvedProperty};
use crate::definition::{select_definition, source_prefix, PropertyDefinition, PropertyNature};
use crate::source::{FetchError, PropertyDefinitionStore, PropertySource, SourceRequest};
use crate::{PropertyError, Result};

/// 属性链默认最大深度
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 10;

/// 一次解析请求
#[derive(Debug, Clone, Copy)]
pub struct PropertyRequest<'a> {
    pub test: &'a str,
    pub testcase: &'a str,
    pub country: &'a str,
    pub property: &'a str,
    pub args: &'a [String],
}

impl<'a> PropertyRequest<'a> {
    pub fn new(test: &'a str, testcase: &'a str, country: &'a str, property: &'a str) -> Self {
        Self {
            test,
            testcase,
            country,
            property,
            args: &[],
        }
    }

    pub fn with_args(mut self, args: &'a [String]) -> Self {
        self.args = args;
        self
    }

    fn key(&self) -> ResolutionKey {
        ResolutionKey {
            test: self.test.to_string(),
            testcase: self.testcase.to_string(),
            country: self.country.to_string(),
            property: self.property.to_string(),
            args: self.args.to_vec(),
        }
    }

    fn child(&self, property: &'a str) -> Self {
        Self {
            property,
            args: &[],
            ..*self
        }
    }
}

/// 单次取值的结果
enum Attempt {
    Done(String, Vec<String>),
    Retry(String),
    Fail(PropertyError),
}

/// 属性解析器
///
/// 多个执行共享同一个实例 (通过 `Arc`)。
pub struct PropertyResolver {
    definitions: Arc<dyn PropertyDefinitionStore>,

    /// 外部数据源 (按取值方式注册)
    sources: HashMap<PropertyNature, Arc<dyn PropertySource>>,

    cache: PropertyCache,

    /// 重命名代数: 选择定义和写入缓存时持有读锁，重命名持有写锁；
    /// 取值与重试期间不持有
    rename_generation: RwLock<u64>,

    max_chain_depth: usize,
}

impl PropertyResolver {
    pub fn new(definitions: Arc<dyn PropertyDefinitionStore>) -> Self {
        Self {
            definitions,
            sources: HashMap::new(),
            cache: PropertyCache::new(),
            rename_generation: RwLock::new(0),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }

    /// 注册外部数据源
    pub fn with_source(mut self, nature: PropertyNature, source: Arc<dyn PropertySource>) -> Self {
        self.sources.insert(nature, source);
        self
    }

    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    pub fn cache(&self) -> &PropertyCache {
        &self.cache
    }

    /// 解析属性值
    pub async fn resolve(
        &self,
        request: PropertyRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedProperty> {
        let mut chain = Vec::new();
        self.resolve_inner(request, &mut chain, cancel).await
    }

    /// 列出在 (test, testcase, country) 下可解析的属性名
    pub async fn defined_properties(
        &self,
        test: &str,
        testcase: &str,
        country: &str,
    ) -> Result<Vec<String>> {
        let definitions = self.definitions.property_definitions(test, testcase).await?;
        let mut names: Vec<String> = definitions
            .into_iter()
            .filter(|d| d.test == test && d.testcase == testcase)
            .filter(|d| d.country == country || d.is_wildcard())
            .map(|d| d.property)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// 批量重命名测试数据库引用
    ///
    /// 改写所有 value1 == old 的测试数据库属性，并使经过 old 的缓存失效。
    /// 与定义选择和缓存写入互斥，解析方不会看到改写一半的状态；
    /// 重命名前开始的取值结果不再写入缓存。
    pub async fn rename_property(&self, old: &str, new: &str) -> Result<usize> {
        let mut generation = self.rename_generation.write().await;

        let rewritten = self.definitions.rename_data_lib(old, new).await?;
        *generation += 1;
        let invalidated = self
            .cache
            .invalidate_prefix(&source_prefix(PropertyNature::DataLib, old))
            .await;

        info!(
            "属性重命名 {} -> {}: 改写 {} 个定义, 失效 {} 个缓存条目",
            old, new, rewritten, invalidated
        );
        Ok(rewritten)
    }

    fn resolve_inner<'a>(
        &'a self,
        request: PropertyRequest<'a>,
        chain: &'a mut Vec<String>,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ResolvedProperty>> + Send + 'a>> {
        Box::pin(async move {
            let key = request.key();

            if chain.iter().any(|p| p == request.property) {
                return Err(PropertyError::InvalidDefinition(format!(
                    "属性循环引用: {} -> {}",
                    chain.join(" -> "),
                    request.property
                )));
            }
            if chain.len() >= self.max_chain_depth {
                return Err(PropertyError::InvalidDefinition(format!(
                    "属性链超过最大深度 {}: {}",
                    self.max_chain_depth,
                    chain.join(" -> ")
                )));
            }

            if let Some(cached) = self.cache.get(&key).await {
                debug!("属性缓存命中: {}", key);
                return Ok(cached);
            }

            let (mut definition, mut generation) = self.select(request).await?;

            // 外部数据源: 同一键只有一个调用方取值，其余等待并复用结果。
            // 属性链不持有槽位锁，嵌套解析不会互相等待。
            let mut slot = None;
            if definition.nature.is_external() {
                let mut guard = self.cache.lock(&key).await;
                if let Some(cached) = guard.fresh() {
                    debug!("属性缓存命中 (等待取值后): {}", key);
                    return Ok(cached);
                }
                if *self.rename_generation.read().await != generation {
                    (definition, generation) = self.select(request).await?;
                }
                slot = Some(guard);
            }

            chain.push(request.property.to_string());
            let result = self
                .fetch_with_retry(&definition, request, chain, cancel)
                .await;
            chain.pop();
            let resolved = result?;

            let mut slot = match slot {
                Some(slot) => slot,
                None => self.cache.lock(&key).await,
            };
            let current = self.rename_generation.read().await;
            if *current == generation {
                slot.store(
                    resolved.clone(),
                    Duration::from_secs(definition.cache_expire),
                );
            } else {
                debug!("属性 {} 取值期间发生重命名，结果不写入缓存", key);
            }

            Ok(resolved)
        })
    }

    /// 选择定义，同时返回当前重命名代数
    async fn select(&self, request: PropertyRequest<'_>) -> Result<(PropertyDefinition, u64)> {
        let generation = self.rename_generation.read().await;
        let definitions = self
            .definitions
            .property_definitions(request.test, request.testcase)
            .await?;
        let definition = select_definition(
            &definitions,
            request.test,
            request.testcase,
            request.country,
            request.property,
        )
        .cloned()
        .ok_or_else(|| PropertyError::NotFound {
            test: request.test.to_string(),
            testcase: request.testcase.to_string(),
            country: request.country.to_string(),
            property: request.property.to_string(),
        })?;
        Ok((definition, *generation))
    }

    async fn fetch_with_retry(
        &self,
        definition: &PropertyDefinition,
        request: PropertyRequest<'_>,
        chain: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedProperty> {
        let max_attempts = definition.retry_nb.saturating_add(1);
        let period = Duration::from_millis(definition.retry_period);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(PropertyError::Cancelled(request.property.to_string()));
            }

            match self.fetch_once(definition, request, chain, cancel).await {
                Attempt::Done(value, sources) => {
                    debug!(
                        "属性 {} 解析成功 (第 {} 次尝试)",
                        request.property, attempt
                    );
                    return Ok(ResolvedProperty::new(request.property, value, attempt)
                        .with_sources(sources)
                        .with_cache_expire(definition.cache_expire));
                }
                Attempt::Fail(PropertyError::ResolutionFailed {
                    property, reason, ..
                }) => {
                    return Err(PropertyError::ResolutionFailed {
                        property,
                        attempts: attempt,
                        reason,
                    });
                }
                Attempt::Fail(e) => return Err(e),
                Attempt::Retry(reason) if attempt < max_attempts => {
                    warn!(
                        "属性 {} 取值失败 (第 {}/{} 次): {}, {}ms 后重试",
                        request.property,
                        attempt,
                        max_attempts,
                        reason,
                        period.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(PropertyError::Cancelled(request.property.to_string()));
                        }
                        _ = tokio::time::sleep(period) => {}
                    }
                    attempt += 1;
                }
                Attempt::Retry(reason) => {
                    return Err(PropertyError::ResolutionFailed {
                        property: request.property.to_string(),
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
    }

    async fn fetch_once(
        &self,
        definition: &PropertyDefinition,
        request: PropertyRequest<'_>,
        chain: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> Attempt {
        let own_source = definition.source_prefix();

        match definition.nature {
            PropertyNature::Static => Attempt::Done(
                truncate(&definition.value1, definition.length),
                vec![own_source],
            ),
            PropertyNature::Property => {
                let child = request.child(definition.value1.as_str());
                match self.resolve_inner(child, chain, cancel).await {
                    Ok(resolved) => {
                        let mut sources = resolved.sources;
                        sources.push(own_source);
                        Attempt::Done(truncate(&resolved.value, definition.length), sources)
                    }
                    Err(e) => Attempt::Fail(e),
                }
            }
            nature => {
                let Some(source) = self.sources.get(&nature) else {
                    return Attempt::Fail(PropertyError::InvalidDefinition(format!(
                        "属性 {} 的数据源类型 {} 未注册",
                        definition.property,
                        nature.as_str()
                    )));
                };

                let source_request = SourceRequest {
                    definition,
                    country: request.country,
                    args: request.args,
                };

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => {
                        return Attempt::Fail(PropertyError::Cancelled(request.property.to_string()));
                    }
                    fetched = source.fetch(source_request) => fetched,
                };

                match fetched {
                    Ok(mut rows) => {
                        if definition.row_limit > 0 {
                            rows.truncate(definition.row_limit);
                        }
                        match rows.into_iter().next() {
                            Some(value) => Attempt::Done(
                                truncate(&value, definition.length),
                                vec![own_source],
                            ),
                            None => Attempt::Fail(PropertyError::ResolutionFailed {
                                property: definition.property.clone(),
                                attempts: 1,
                                reason: "数据源未返回任何数据".to_string(),
                            }),
                        }
                    }
                    Err(FetchError::Transient(reason)) => Attempt::Retry(reason),
                    Err(FetchError::Permanent(reason)) => {
                        Attempt::Fail(PropertyError::ResolutionFailed {
                            property: definition.property.clone(),
                            attempts: 1,
                            reason,
                        })
                    }
                }
            }
        }
    }
}

fn truncate(value: &str, length: usize) -> String {
    if length == 0 {
        value.to_string()
    } else {
        value.chars().take(length).collect()
    }
}
