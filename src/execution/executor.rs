//! Query lifecycle orchestration
//!
//! A submitted query runs on its own task: render, fingerprint, cache lookup,
//! then join (or start) the single backend computation for its fingerprint.
//! The computation normalizes the driver output and populates the cache
//! before it leaves the in-flight registry.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{join_all, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::inflight::{InFlight, Participation};
use super::payload::{QueryHandle, QueryPayload, StatusReport, WarmUpTarget, WarmedEntry};
use super::query::{Query, QueryStatus};
use super::request::{QueryRequest, SqlRequest, SubmitOptions};
use super::store::QueryStore;
use crate::backend::{Backend, BackendError, BackendRequest, CancelSignal, ProgressReporter};
use crate::cache::{CacheError, CacheKeyComputer, CachedPayload, Fingerprint, MemoryResultCache, ResultCache};
use crate::config::CoreConfig;
use crate::data::NormalizedResult;
use crate::engine::{EngineError, EngineSpec, EngineSpecRegistry};
use crate::normalize::ResultNormalizer;
use crate::query::{
    check_statement, is_read_only, strip_comments, Database, Datasource, DatasourceCatalog,
    DatasourceRef, QueryObject, RenderContext, RenderError, RenderedQuery, SqlError,
};
use crate::template::{TemplateError, TemplateProcessor, TemplateValue};

/// Errors returned to the caller of an executor operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("The datasource associated with this chart no longer exists")]
    DatasourceNotFound(DatasourceRef),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Query {0} not found")]
    QueryNotFound(Uuid),
}

/// Why a query did not succeed; recorded on the Query, never returned
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Query exceeded the {} seconds timeout.", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("Query was cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct Computed {
    result: Arc<NormalizedResult>,
}

type Outcome = Arc<Result<Computed, ExecutionError>>;

struct Delivered {
    result: Arc<NormalizedResult>,
    cached: bool,
}

enum Job {
    Object {
        object: QueryObject,
        datasource: Arc<Datasource>,
    },
    Sql(SqlRequest),
}

pub struct ExecutorBuilder {
    catalog: Arc<dyn DatasourceCatalog>,
    registry: Arc<EngineSpecRegistry>,
    backends: DashMap<String, Arc<dyn Backend>>,
    cache: Option<Arc<dyn ResultCache>>,
    templates: TemplateProcessor,
    config: CoreConfig,
}

impl ExecutorBuilder {
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<EngineSpecRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Backend serving every database whose engine is `engine_id`
    pub fn with_backend(self, engine_id: &str, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(engine_id.to_string(), backend);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_templates(mut self, templates: TemplateProcessor) -> Self {
        self.templates = templates;
        self
    }

    pub fn build(self) -> QueryExecutor {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryResultCache::new(self.config.cache_max_entries)));
        let retention = self.config.query_retention();
        QueryExecutor {
            inner: Arc::new(Inner {
                catalog: self.catalog,
                registry: self.registry,
                backends: self.backends,
                cache,
                keys: CacheKeyComputer::new(&self.config),
                templates: self.templates,
                config: self.config,
                store: QueryStore::with_retention(retention),
                inflight: Arc::new(InFlight::new()),
            }),
        }
    }
}

/// Runs queries against registered backends; cheap to clone
#[derive(Clone)]
pub struct QueryExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Arc<dyn DatasourceCatalog>,
    registry: Arc<EngineSpecRegistry>,
    backends: DashMap<String, Arc<dyn Backend>>,
    cache: Arc<dyn ResultCache>,
    keys: CacheKeyComputer,
    templates: TemplateProcessor,
    config: CoreConfig,
    store: QueryStore,
    inflight: Arc<InFlight<Outcome>>,
}

impl QueryExecutor {
    pub fn builder(catalog: Arc<dyn DatasourceCatalog>) -> ExecutorBuilder {
        ExecutorBuilder {
            catalog,
            registry: Arc::new(EngineSpecRegistry::new()),
            backends: DashMap::new(),
            cache: None,
            templates: TemplateProcessor::new(),
            config: CoreConfig::default(),
        }
    }

    /// Submit a structured query; fails fast when its datasource is gone
    pub fn submit(&self, object: QueryObject, options: SubmitOptions) -> Result<QueryHandle, ExecutorError> {
        let datasource = self
            .inner
            .catalog
            .datasource(&object.datasource)
            .ok_or(ExecutorError::DatasourceNotFound(object.datasource))?;
        let database = self
            .inner
            .catalog
            .database(datasource.database_id)
            .ok_or_else(|| ExecutorError::DatabaseNotFound(datasource.database_id.to_string()))?;

        let request = QueryRequest::Object(Box::new(object.clone()));
        Ok(self.launch(request, Job::Object { object, datasource }, database, options))
    }

    /// Submit ad-hoc SQL against a database by name
    pub fn submit_sql(&self, request: SqlRequest, options: SubmitOptions) -> Result<QueryHandle, ExecutorError> {
        let database = self
            .inner
            .catalog
            .database_by_name(&request.database)
            .ok_or_else(|| ExecutorError::DatabaseNotFound(request.database.clone()))?;

        Ok(self.launch(QueryRequest::Sql(request.clone()), Job::Sql(request), database, options))
    }

    fn launch(&self, request: QueryRequest, job: Job, database: Arc<Database>, options: SubmitOptions) -> QueryHandle {
        let query = Query::new(options.client_id.clone());
        let id = query.id;
        let cancel = CancelSignal::new();
        self.inner.store.insert(query, request, cancel.clone());
        debug!(query_id = %id, database = %database.name, "Query submitted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(id, job, database, options, cancel).await });

        QueryHandle {
            id,
            status: QueryStatus::Pending,
        }
    }

    pub fn poll(&self, id: Uuid) -> Result<StatusReport, ExecutorError> {
        self.inner
            .store
            .snapshot(&id)
            .map(|q| StatusReport::from(&q))
            .ok_or(ExecutorError::QueryNotFound(id))
    }

    /// Cancel a pending or running query; a terminal query keeps its status
    pub fn cancel(&self, id: Uuid) -> Result<QueryStatus, ExecutorError> {
        let store = &self.inner.store;
        let current = store.snapshot(&id).ok_or(ExecutorError::QueryNotFound(id))?;
        if current.status.is_terminal() {
            return Ok(current.status);
        }

        // Taken before the transition; terminal records drop their signal
        let signal = store.cancel_signal(&id);
        let cancelled = store.update(&id, |q| {
            if q.transition(QueryStatus::Cancelled).is_err() {
                return false;
            }
            q.error = Some(ExecutionError::Cancelled.to_string());
            true
        });
        if cancelled {
            info!(query_id = %id, "Query cancelled");
            if let Some(signal) = signal {
                signal.cancel();
            }
        }
        Ok(store.snapshot(&id).map_or(current.status, |q| q.status))
    }

    pub fn fetch(&self, id: Uuid) -> Result<QueryPayload, ExecutorError> {
        let query = self
            .inner
            .store
            .snapshot(&id)
            .ok_or(ExecutorError::QueryNotFound(id))?;
        Ok(QueryPayload::new(&query, self.inner.store.result(&id)))
    }

    /// Resolves once the query is terminal
    pub async fn wait(&self, id: Uuid) -> Result<QueryPayload, ExecutorError> {
        let mut rx = self
            .inner
            .store
            .subscribe(&id)
            .ok_or(ExecutorError::QueryNotFound(id))?;
        rx.wait_for(|q| q.status.is_terminal())
            .await
            .map_err(|_| ExecutorError::QueryNotFound(id))?;
        self.fetch(id)
    }

    pub async fn execute(&self, object: QueryObject, options: SubmitOptions) -> Result<QueryPayload, ExecutorError> {
        let handle = self.submit(object, options)?;
        self.wait(handle.id).await
    }

    pub async fn execute_sql(&self, request: SqlRequest, options: SubmitOptions) -> Result<QueryPayload, ExecutorError> {
        let handle = self.submit_sql(request, options)?;
        self.wait(handle.id).await
    }

    pub fn find_by_client_id(&self, client_id: &str) -> Option<Query> {
        self.inner.store.find_by_client_id(client_id)
    }

    /// Populate the cache for each target and report what was warmed
    pub async fn warm_up(&self, targets: &[WarmUpTarget]) -> Result<Vec<WarmedEntry>, ExecutorError> {
        let mut jobs: Vec<(Option<Arc<Datasource>>, QueryHandle)> = Vec::new();
        for target in targets {
            match target {
                WarmUpTarget::Query(id) => {
                    let request = self
                        .inner
                        .store
                        .request(id)
                        .ok_or(ExecutorError::QueryNotFound(*id))?;
                    match request.as_ref() {
                        QueryRequest::Object(object) => {
                            let datasource = self.inner.catalog.datasource(&object.datasource);
                            jobs.push((datasource, self.submit((**object).clone(), SubmitOptions::new())?));
                        }
                        QueryRequest::Sql(sql) => {
                            jobs.push((None, self.submit_sql(sql.clone(), SubmitOptions::new())?));
                        }
                    }
                }
                WarmUpTarget::Dataset { database, table } => {
                    for datasource in self.inner.catalog.datasources_on_table(database, table) {
                        let handle = self.submit(default_query(&datasource), SubmitOptions::new())?;
                        jobs.push((Some(datasource), handle));
                    }
                }
            }
        }

        let payloads = join_all(jobs.iter().map(|(_, handle)| self.wait(handle.id))).await;
        jobs.into_iter()
            .zip(payloads)
            .map(|((datasource, _), payload)| {
                let payload = payload?;
                Ok(WarmedEntry {
                    datasource_id: datasource.as_ref().map(|ds| ds.id),
                    datasource_name: datasource.as_ref().map(|ds| ds.name.clone()),
                    cache_key: payload.cache_key,
                    status: payload.status,
                })
            })
            .collect()
    }

    /// Computations currently running against a backend
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }
}

/// All metrics, no grouping
pub fn default_query(datasource: &Datasource) -> QueryObject {
    let metrics: Vec<String> = if datasource.metrics.is_empty() {
        vec!["count".to_string()]
    } else {
        datasource.metrics.iter().map(|m| m.name.clone()).collect()
    };
    QueryObject::new(datasource.reference()).with_metrics(metrics)
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        id: Uuid,
        job: Job,
        database: Arc<Database>,
        options: SubmitOptions,
        cancel: CancelSignal,
    ) {
        let timeout = options.timeout.unwrap_or_else(|| self.config.query_timeout());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
            outcome = tokio::time::timeout(timeout, Arc::clone(&self).drive(id, job, database, &options)) => {
                outcome.unwrap_or_else(|_| Err(ExecutionError::TimedOut(timeout)))
            }
        };
        self.complete(id, outcome);
    }

    async fn drive(
        self: Arc<Self>,
        id: Uuid,
        job: Job,
        database: Arc<Database>,
        options: &SubmitOptions,
    ) -> Result<Delivered, ExecutionError> {
        let spec = self.registry.resolve(&database.backend)?;
        let (rendered, ttl) = self.render(&job, &database, &spec, options)?;
        let key = self.keys.compute(&rendered)?;
        self.store.update(&id, |q| {
            q.sql = Some(rendered.sql.clone());
            q.cache_key = Some(key.clone());
            true
        });

        if !options.force {
            if let Some(result) = self.cache_lookup(&key).await {
                debug!(query_id = %id, cache_key = %key, "Served from cache");
                return Ok(Delivered { result, cached: true });
            }
        }

        let joined = {
            let inner = Arc::clone(&self);
            let task_key = key.clone();
            let sql = rendered.sql.clone();
            self.inflight.join(&key, id, move |cancel, generation| {
                let task = tokio::spawn(inner.compute(task_key, generation, sql, database, spec, ttl, cancel));
                async move {
                    task.await.unwrap_or_else(|e| {
                        Arc::new(Err(ExecutionError::Backend(BackendError::Execution(e.to_string()))))
                    })
                }
                .boxed()
            })
        };
        let _participation = Participation {
            inflight: Arc::clone(&self.inflight),
            key: key.clone(),
            generation: joined.generation,
            participant: id,
        };
        if !joined.leader {
            debug!(query_id = %id, cache_key = %key, "Joined in-flight computation");
        }
        if joined.dispatched {
            self.mark_running(id, None);
        }

        let outcome = joined.future.await;
        match outcome.as_ref() {
            Ok(computed) => Ok(Delivered {
                result: Arc::clone(&computed.result),
                cached: false,
            }),
            Err(e) => Err(e.clone()),
        }
    }

    fn render(
        &self,
        job: &Job,
        database: &Database,
        spec: &EngineSpec,
        options: &SubmitOptions,
    ) -> Result<(RenderedQuery, Duration), ExecutionError> {
        match job {
            Job::Object { object, datasource } => {
                let ctx = RenderContext {
                    datasource,
                    spec,
                    templates: &self.templates,
                    template_context: &options.template_context,
                    now: options
                        .template_context
                        .now
                        .unwrap_or_else(|| Utc::now().naive_utc()),
                    default_row_limit: self.config.row_limit,
                    sql_max_row: self.config.sql_max_row,
                };
                let rendered = object.render(&ctx)?;
                let ttl = datasource
                    .cache_timeout
                    .or(database.cache_timeout)
                    .unwrap_or_else(|| self.config.cache_ttl());
                Ok((rendered, ttl))
            }
            Job::Sql(request) => {
                let mut context = options.template_context.clone();
                for (name, value) in &request.template_params {
                    context
                        .bindings
                        .entry(name.clone())
                        .or_insert_with(|| TemplateValue::from_json(value));
                }
                let sql = self.templates.process(&request.sql, &context)?;

                let dialect = spec.sql_dialect();
                let sql = strip_comments(&sql, dialect.as_ref())?;
                check_statement(&sql, dialect.as_ref(), database.allow_dml)?;
                let limit = self.config.sql_max_row;
                let sql = if is_read_only(&sql, dialect.as_ref()) {
                    spec.apply_row_limit(&sql, limit)
                } else {
                    sql
                };

                let rendered = RenderedQuery::from_sql(format!("{}__database", database.id), spec.id.clone(), sql, Some(limit));
                let ttl = database.cache_timeout.unwrap_or_else(|| self.config.cache_ttl());
                Ok((rendered, ttl))
            }
        }
    }

    async fn cache_lookup(&self, key: &Fingerprint) -> Option<Arc<NormalizedResult>> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };
        match CachedPayload::decode(&entry.value) {
            Ok(payload) => Some(Arc::new(payload.result)),
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn cache_store(&self, key: &Fingerprint, result: &NormalizedResult, sql: String, ttl: Duration) {
        let payload = CachedPayload {
            result: result.clone(),
            sql,
        };
        let stored = match payload.encode() {
            Ok(bytes) => self.cache.set(key, bytes, Some(ttl)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!(cache_key = %key, error = %e, "Cache store failed");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn compute(
        self: Arc<Self>,
        key: Fingerprint,
        generation: u64,
        sql: String,
        database: Arc<Database>,
        spec: Arc<EngineSpec>,
        ttl: Duration,
        cancel: CancelSignal,
    ) -> Outcome {
        let result = self
            .dispatch(&key, generation, sql.clone(), database, &spec, &cancel)
            .await;
        if let Ok(computed) = &result {
            self.cache_store(&key, &computed.result, sql, ttl).await;
        }
        self.inflight.finish(&key, generation);
        Arc::new(result)
    }

    async fn dispatch(
        self: &Arc<Self>,
        key: &Fingerprint,
        generation: u64,
        sql: String,
        database: Arc<Database>,
        spec: &EngineSpec,
        cancel: &CancelSignal,
    ) -> Result<Computed, ExecutionError> {
        let backend = self
            .backends
            .get(&spec.id)
            .map(|b| Arc::clone(&b))
            .ok_or_else(|| BackendError::Connection(format!("no backend registered for engine '{}'", spec.id)))?;
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let handle = Uuid::new_v4().to_string();
        for participant in self.inflight.mark_dispatched(key, generation) {
            self.mark_running(participant, Some(&handle));
        }

        let progress = {
            let inner = Arc::clone(self);
            let key = key.clone();
            ProgressReporter::new(move |percent, rows| {
                for participant in inner.inflight.participants(&key, generation) {
                    inner.store.update(&participant, |q| {
                        if q.status != QueryStatus::Running {
                            return false;
                        }
                        q.progress = percent;
                        q.rows = rows;
                        true
                    });
                }
            })
        };

        info!(engine = %spec.id, database = %database.name, handle = %handle, "Dispatching query");
        let request = BackendRequest {
            database,
            sql,
            tracking_handle: handle.clone(),
            cancel: cancel.clone(),
        };
        let raw = tokio::select! {
            raw = backend.execute(request, progress) => raw.map_err(|e| match e {
                BackendError::Cancelled => ExecutionError::Cancelled,
                other => ExecutionError::Backend(other),
            })?,
            _ = cancel.cancelled() => {
                if let Err(e) = backend.cancel(&handle).await {
                    warn!(handle = %handle, error = %e, "Backend cancel failed");
                }
                return Err(ExecutionError::Cancelled);
            }
        };

        let result = ResultNormalizer::new(spec).normalize(&raw.rows, &raw.columns);
        Ok(Computed {
            result: Arc::new(result),
        })
    }

    fn mark_running(&self, id: Uuid, handle: Option<&str>) {
        self.store.update(&id, |q| {
            if q.transition(QueryStatus::Running).is_err() {
                return false;
            }
            if let Some(handle) = handle {
                q.tracking_handle = Some(handle.to_string());
            }
            true
        });
    }

    fn complete(&self, id: Uuid, outcome: Result<Delivered, ExecutionError>) {
        match outcome {
            Ok(delivered) => {
                let rows = delivered.result.row_count();
                self.store.set_result(id, Arc::clone(&delivered.result));
                let applied = self.store.update(&id, |q| {
                    if q.transition(QueryStatus::Success).is_err() {
                        return false;
                    }
                    q.rows = rows;
                    q.is_cached = delivered.cached;
                    true
                });
                if applied {
                    info!(query_id = %id, rows, cached = delivered.cached, "Query succeeded");
                } else {
                    debug!(query_id = %id, "Result arrived after the query was finalized");
                }
            }
            Err(error) => {
                let status = match &error {
                    ExecutionError::Cancelled => QueryStatus::Cancelled,
                    ExecutionError::TimedOut(_) => QueryStatus::TimedOut,
                    _ => QueryStatus::Failed,
                };
                let message = error.to_string();
                let applied = self.store.update(&id, |q| {
                    if q.transition(status).is_err() {
                        return false;
                    }
                    q.error = Some(message.clone());
                    true
                });
                if applied && status == QueryStatus::Failed {
                    warn!(query_id = %id, error = %message, "Query failed");
                } else if applied {
                    info!(query_id = %id, status = %status, "Query stopped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryStore};
    use crate::data::value::parse_naive_timestamp;
    use crate::data::{DataType, Value};
    use crate::query::{ColumnDef, Filter, FilterOp, StaticCatalog};
    use crate::template::TemplateContext;

    fn birth_names() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "birth_names",
                vec![
                    ("ds".into(), DataType::Timestamp),
                    ("gender".into(), DataType::Varchar),
                    ("name".into(), DataType::Varchar),
                    ("num".into(), DataType::Bigint),
                ],
            )
            .unwrap();
        let rows = [
            ("2017-01-01 00:00:00", "girl", "Jennifer", 10),
            ("2016-12-31 00:00:00", "girl", "Amy", 5),
            ("2017-01-02 00:00:00", "boy", "Aaron", 20),
        ];
        for (ds, gender, name, num) in rows {
            store
                .insert(
                    "birth_names",
                    vec![
                        Value::Timestamp(parse_naive_timestamp(ds).unwrap()),
                        Value::String(gender.into()),
                        Value::String(name.into()),
                        Value::Int64(num),
                    ],
                )
                .unwrap();
        }
        store
    }

    struct Fixture {
        executor: QueryExecutor,
        backend: Arc<MemoryBackend>,
    }

    fn fixture_with(backend: MemoryBackend) -> Fixture {
        fixture_with_cache(backend, None)
    }

    fn fixture_with_cache(backend: MemoryBackend, cache: Option<Arc<dyn ResultCache>>) -> Fixture {
        let catalog = StaticCatalog::new();
        catalog.add_database(Database::new(1, "examples", "memory", "memory://examples"));
        catalog.add_datasource(
            Datasource::new(3, 1, "birth_names")
                .with_columns(vec![
                    ColumnDef::temporal("ds"),
                    ColumnDef::new("gender"),
                    ColumnDef::new("name"),
                    ColumnDef::new("num"),
                ])
                .with_main_dttm_col("ds"),
        );
        let backend = Arc::new(backend.with_store("examples", birth_names()));
        let mut builder =
            QueryExecutor::builder(Arc::new(catalog)).with_backend("memory", Arc::clone(&backend) as Arc<dyn Backend>);
        if let Some(cache) = cache {
            builder = builder.with_cache(cache);
        }
        Fixture {
            executor: builder.build(),
            backend,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryBackend::new())
    }

    fn jennifer_query() -> QueryObject {
        QueryObject::new(DatasourceRef::table(3))
            .with_granularity("ds")
            .with_groupby(["name"])
            .with_metrics(["count"])
            .with_time_range("2017-01-01 : 2017-01-02")
    }

    #[tokio::test]
    async fn test_end_to_end_groupby_count() {
        let f = fixture();
        let payload = f.executor.execute(jennifer_query(), SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Success);
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.data[0]["name"], "Jennifer");
        assert_eq!(payload.data[0]["count"], 1);
        assert!(!payload.no_data);
        assert!(!payload.is_cached);
        assert!(payload.query.unwrap().contains("GROUP BY"));
    }

    #[tokio::test]
    async fn test_filter_excluding_everything_is_no_data() {
        let f = fixture();
        let object = jennifer_query().with_filter(Filter::new("name", FilterOp::Eq, serde_json::json!("nobody")));
        let payload = f.executor.execute(object, SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Success);
        assert!(payload.no_data);
        assert!(payload.data.is_empty());
        assert_eq!(payload.error.as_deref(), Some("No data"));
    }

    #[tokio::test]
    async fn test_unknown_groupby_column_fails() {
        let f = fixture();
        let object = jennifer_query().with_groupby(["nope"]);
        let payload = f.executor.execute(object, SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Failed);
        assert!(payload.error.unwrap().contains("nope"));
        assert_eq!(f.backend.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_datasource_fails_fast() {
        let f = fixture();
        let err = f
            .executor
            .submit(QueryObject::new(DatasourceRef::table(99)), SubmitOptions::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "The datasource associated with this chart no longer exists");
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_dispatch() {
        let f = fixture_with(MemoryBackend::new().with_latency(Duration::from_millis(100)));

        let first = f.executor.submit(jennifer_query(), SubmitOptions::new()).unwrap();
        let second = f.executor.submit(jennifer_query(), SubmitOptions::new()).unwrap();
        let (a, b) = tokio::join!(f.executor.wait(first.id), f.executor.wait(second.id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.status, QueryStatus::Success);
        assert_eq!(b.status, QueryStatus::Success);
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(f.backend.dispatch_count(), 1);
        assert_eq!(f.executor.inflight_count(), 0);

        let later = f.executor.execute(jennifer_query(), SubmitOptions::new()).await.unwrap();
        assert!(later.is_cached);
        assert_eq!(later.data, a.data);
        assert_eq!(f.backend.dispatch_count(), 1);

        let forced = f
            .executor
            .execute(jennifer_query(), SubmitOptions::new().with_force(true))
            .await
            .unwrap();
        assert!(!forced.is_cached);
        assert_eq!(f.backend.dispatch_count(), 2);
    }

    #[tokio::test]
    async fn test_templated_sql() {
        let f = fixture();
        let request = SqlRequest::new("examples", "SELECT '{{ datetime(2017, 1, 1).isoformat() }}' as test");
        let payload = f.executor.execute_sql(request, SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Success);
        assert_eq!(payload.data[0]["test"], "2017-01-01T00:00:00");
    }

    #[tokio::test]
    async fn test_sql_template_params_and_context() {
        let f = fixture();
        let request = SqlRequest::new("examples", "SELECT name FROM birth_names WHERE gender = '{{ gender }}'")
            .with_template_param("gender", serde_json::json!("boy"));
        let payload = f.executor.execute_sql(request, SubmitOptions::new()).await.unwrap();
        assert_eq!(payload.data[0]["name"], "Aaron");

        let request = SqlRequest::new("examples", "SELECT name FROM birth_names WHERE gender = '{{ gender }}'")
            .with_template_param("gender", serde_json::json!("boy"));
        let options = SubmitOptions::new().with_template_context(TemplateContext::new().with_binding("gender", "girl"));
        let payload = f.executor.execute_sql(request, options).await.unwrap();
        assert_eq!(payload.data.len(), 2);
    }

    #[tokio::test]
    async fn test_sql_limit_with_offset() {
        let f = fixture();
        let request = SqlRequest::new("examples", "SELECT name FROM birth_names ORDER BY name LIMIT 2 OFFSET 1");
        let payload = f.executor.execute_sql(request, SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Success);
        assert_eq!(payload.data.len(), 2);
        assert_eq!(payload.data[0]["name"], "Amy");
        assert_eq!(payload.data[1]["name"], "Jennifer");
        assert!(!payload.query.unwrap().contains("LIMIT 2 OFFSET 1 LIMIT"));
    }

    struct UnavailableCache;

    #[async_trait::async_trait]
    impl ResultCache for UnavailableCache {
        async fn get(&self, _key: &Fingerprint) -> Result<Option<crate::cache::CacheEntry>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn set(&self, _key: &Fingerprint, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }

        async fn invalidate(&self, _key: &Fingerprint) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_cache_falls_through_to_backend() {
        let f = fixture_with_cache(MemoryBackend::new(), Some(Arc::new(UnavailableCache)));
        let payload = f.executor.execute(jennifer_query(), SubmitOptions::new()).await.unwrap();

        assert_eq!(payload.status, QueryStatus::Success);
        assert_eq!(payload.data[0]["name"], "Jennifer");
        assert!(!payload.is_cached);
        assert_eq!(f.backend.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_dml_is_rejected() {
        let f = fixture();
        let payload = f
            .executor
            .execute_sql(SqlRequest::new("examples", "DELETE FROM birth_names"), SubmitOptions::new())
            .await
            .unwrap();

        assert_eq!(payload.status, QueryStatus::Failed);
        assert_eq!(
            payload.error.as_deref(),
            Some("Only SELECT statements are allowed against this database")
        );
    }

    #[tokio::test]
    async fn test_cancel_running_query() {
        let f = fixture_with(MemoryBackend::new().with_latency(Duration::from_secs(5)));
        let handle = f.executor.submit(jennifer_query(), SubmitOptions::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.executor.cancel(handle.id).unwrap(), QueryStatus::Cancelled);
        let payload = tokio::time::timeout(Duration::from_secs(1), f.executor.wait(handle.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.status, QueryStatus::Cancelled);
        assert_eq!(payload.error.as_deref(), Some("Query was cancelled"));
        assert_eq!(f.executor.cancel(handle.id).unwrap(), QueryStatus::Cancelled);

        // the abandoned computation is torn down
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.executor.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelling_a_finished_query_is_a_noop() {
        let f = fixture();
        let payload = f.executor.execute(jennifer_query(), SubmitOptions::new()).await.unwrap();
        assert_eq!(f.executor.cancel(payload.query_id).unwrap(), QueryStatus::Success);
        assert_eq!(f.executor.poll(payload.query_id).unwrap().status, QueryStatus::Success);
    }

    #[tokio::test]
    async fn test_timeout() {
        let f = fixture_with(MemoryBackend::new().with_latency(Duration::from_secs(5)));
        let options = SubmitOptions::new().with_timeout(Duration::from_millis(50));
        let payload = f.executor.execute(jennifer_query(), options).await.unwrap();

        assert_eq!(payload.status, QueryStatus::TimedOut);
        assert!(payload.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_find_by_client_id_and_poll() {
        let f = fixture();
        let options = SubmitOptions::new().with_client_id("sqllab-42");
        let handle = f
            .executor
            .submit_sql(SqlRequest::new("examples", "SELECT name FROM birth_names"), options)
            .unwrap();
        assert_eq!(handle.status, QueryStatus::Pending);

        f.executor.wait(handle.id).await.unwrap();
        let query = f.executor.find_by_client_id("sqllab-42").unwrap();
        assert_eq!(query.id, handle.id);
        let report = f.executor.poll(handle.id).unwrap();
        assert_eq!(report.rows_so_far, 3);
        assert_eq!(report.progress, 100);
    }

    #[tokio::test]
    async fn test_warm_up_dataset_then_hit_cache() {
        let f = fixture();
        let target = WarmUpTarget::Dataset {
            database: "examples".into(),
            table: "birth_names".into(),
        };
        let warmed = f.executor.warm_up(&[target]).await.unwrap();

        assert_eq!(warmed.len(), 1);
        assert_eq!(warmed[0].datasource_id, Some(3));
        assert_eq!(warmed[0].status, QueryStatus::Success);
        assert!(warmed[0].cache_key.is_some());

        let object = QueryObject::new(DatasourceRef::table(3)).with_metrics(["count"]);
        let payload = f.executor.execute(object, SubmitOptions::new()).await.unwrap();
        assert!(payload.is_cached);
        assert_eq!(payload.cache_key, warmed[0].cache_key);
    }

    #[tokio::test]
    async fn test_warm_up_previous_query() {
        let f = fixture();
        let first = f.executor.execute(jennifer_query(), SubmitOptions::new()).await.unwrap();
        let warmed = f.executor.warm_up(&[WarmUpTarget::Query(first.query_id)]).await.unwrap();

        assert_eq!(warmed[0].cache_key, first.cache_key);
        assert_eq!(f.backend.dispatch_count(), 1);
        assert!(matches!(
            f.executor.warm_up(&[WarmUpTarget::Query(Uuid::new_v4())]).await,
            Err(ExecutorError::QueryNotFound(_))
        ));
    }
}
