//! Result cache wrapper
//!
//! Agents with `cache: true` are wrapped in a [`CachedRunnable`]. Results are
//! stored through the collaborators under `(project id, agent id, cache key)`.
//!
//! Lookups are best effort: a failing cache read or write is logged and the
//! run continues uncached. Two concurrent misses for the same key both call
//! the inner agent.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::context::{CacheScope, ExecutionContext};
use crate::definition::RunnableDefinition;
use crate::delta::DeltaMerger;
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};

/// Stable key for a definition and input
///
/// Covers the whole definition, so editing a prompt invalidates old entries.
pub fn cache_key(def: &RunnableDefinition, input: &Output) -> String {
    let sorted: BTreeMap<&String, &Value> = input.iter().collect();
    let payload = json!({
        "agent": def,
        "input": sorted,
    });
    format!("{:016x}", xxh3_64(payload.to_string().as_bytes()))
}

pub struct CachedRunnable {
    inner: Arc<dyn Runnable>,
}

impl CachedRunnable {
    pub fn new(inner: Arc<dyn Runnable>) -> Self {
        Self { inner }
    }
}

fn scope(def: &RunnableDefinition, ctx: &ExecutionContext) -> CacheScope {
    CacheScope {
        project_id: ctx.project_id().to_string(),
        agent_id: def.id.clone(),
    }
}

async fn write_back(
    ctx: &ExecutionContext,
    scope: &CacheScope,
    key: &str,
    input: &Output,
    output: &Output,
) {
    if let Err(err) = ctx.collaborators().set_cache(scope, key, input, output).await {
        warn!(agent = %scope.agent_id, error = %err, "Cache write failed");
    }
}

#[async_trait]
impl Runnable for CachedRunnable {
    fn definition(&self) -> &RunnableDefinition {
        self.inner.definition()
    }

    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let def = self.definition();
        let scope = scope(def, ctx);
        let key = cache_key(def, &input);

        match ctx.collaborators().query_cache(&scope, &key).await {
            Ok(Some(output)) => {
                debug!(agent = %def.id, cache_key = %key, "Cache hit");
                ctx.event_log().emit(EventKind::CacheHit {
                    agent_id: def.id.as_str().into(),
                    cache_key: key,
                });
                return Ok(RunOutput::for_options(output, options));
            }
            Ok(None) => {}
            Err(err) => warn!(agent = %def.id, error = %err, "Cache read failed"),
        }

        match self.inner.run(input.clone(), options, ctx).await? {
            RunOutput::Complete(output) => {
                write_back(ctx, &scope, &key, &input, &output).await;
                Ok(RunOutput::Complete(output))
            }
            RunOutput::Stream(mut deltas) => {
                let ctx = ctx.clone();
                let stream = async_stream::stream! {
                    let mut merger = DeltaMerger::new();
                    while let Some(item) = deltas.next().await {
                        match item {
                            Ok(delta) => {
                                merger.apply(&delta);
                                yield Ok(delta);
                            }
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                    write_back(&ctx, &scope, &key, &input, &merger.into_output()).await;
                };
                Ok(RunOutput::Stream(stream.boxed()))
            }
        }
    }
}
