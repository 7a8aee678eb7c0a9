//! Incremental template renderer
//!
//! Mustache-style templates whose lookups may be asynchronous:
//!
//! | Syntax                      | Meaning                                   |
//! |-----------------------------|-------------------------------------------|
//! | `{{name}}`, `{{a.b.0}}`     | interpolate a value (raw, no escaping)    |
//! | `{{{name}}}`, `{{& name}}`  | same, kept for Mustache compatibility     |
//! | `{{#name}}…{{/name}}`       | section: iterate, descend or show if truthy |
//! | `{{^name}}…{{/name}}`       | inverted section                          |
//! | `{{! note }}`               | comment                                   |
//!
//! A name registered as a [`Resolver`] is not looked up in the data. Its
//! section body is first rendered synchronously (resolvers count as missing)
//! and `name + body` becomes the task key; identical keys share one task.
//! Pending tasks run on a bounded queue and every settle triggers a full
//! re-render, so [`render_stream`] yields progressively complete renderings.
//! The stream ends once all tasks have settled, or with the first task error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::AigneError;

/// Resolver tasks running at once, unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 8;

pub type PendingValue = BoxFuture<'static, Result<Option<Value>, AigneError>>;

pub type RenderStream = BoxStream<'static, Result<String, AigneError>>;

// ═══════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Variable(String),
    Section {
        name: String,
        inverted: bool,
        body: Vec<Node>,
    },
}

/// A parsed template, cheap to clone
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Arc<Vec<Node>>,
}

fn parse_error(position: usize, details: impl Into<String>) -> AigneError {
    AigneError::TemplateParse {
        position,
        details: details.into(),
    }
}

struct Frame {
    name: String,
    inverted: bool,
    start: usize,
    parent: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, AigneError> {
        let mut stack: Vec<Frame> = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let mut pos = 0;

        while let Some(offset) = source[pos..].find("{{") {
            let open = pos + offset;
            if open > pos {
                current.push(Node::Text(source[pos..open].to_string()));
            }

            if source[open..].starts_with("{{{") {
                let close = source[open + 3..]
                    .find("}}}")
                    .map(|i| open + 3 + i)
                    .ok_or_else(|| parse_error(open, "unclosed '{{{'"))?;
                let name = source[open + 3..close].trim();
                if name.is_empty() {
                    return Err(parse_error(open, "empty tag"));
                }
                current.push(Node::Variable(name.to_string()));
                pos = close + 3;
                continue;
            }

            let close = source[open + 2..]
                .find("}}")
                .map(|i| open + 2 + i)
                .ok_or_else(|| parse_error(open, "unclosed '{{'"))?;
            let tag = source[open + 2..close].trim();
            pos = close + 2;

            let (sigil, name) = match tag.chars().next() {
                Some(c @ ('#' | '^' | '/' | '!' | '&')) => (Some(c), tag[1..].trim()),
                _ => (None, tag),
            };

            match sigil {
                Some('!') => {}
                Some(c @ ('#' | '^')) => {
                    if name.is_empty() {
                        return Err(parse_error(open, "section without a name"));
                    }
                    stack.push(Frame {
                        name: name.to_string(),
                        inverted: c == '^',
                        start: open,
                        parent: std::mem::take(&mut current),
                    });
                }
                Some('/') => {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| parse_error(open, format!("unexpected closing tag '{}'", name)))?;
                    if frame.name != name {
                        return Err(parse_error(
                            open,
                            format!("section '{}' closed by '{}'", frame.name, name),
                        ));
                    }
                    let body = std::mem::replace(&mut current, frame.parent);
                    current.push(Node::Section {
                        name: frame.name,
                        inverted: frame.inverted,
                        body,
                    });
                }
                _ => {
                    if name.is_empty() {
                        return Err(parse_error(open, "empty tag"));
                    }
                    current.push(Node::Variable(name.to_string()));
                }
            }
        }

        if pos < source.len() {
            current.push(Node::Text(source[pos..].to_string()));
        }

        if let Some(frame) = stack.pop() {
            return Err(parse_error(
                frame.start,
                format!("unclosed section '{}'", frame.name),
            ));
        }

        Ok(Self {
            nodes: Arc::new(current),
        })
    }

    /// Synchronous rendering against plain data, without resolvers
    pub fn render_plain(&self, data: &Value) -> String {
        let resolvers = HashMap::new();
        let mut out = String::new();
        let mut stack = vec![data];
        // Plain mode never touches tasks, so it cannot fail
        let _ = Renderer::plain(&resolvers).render(&self.nodes, &mut stack, &mut out);
        out
    }

    pub fn render_stream(&self, ctx: RenderContext) -> RenderStream {
        let driver = Driver::new(Arc::clone(&self.nodes), ctx);
        stream::unfold(driver, |mut driver| async move {
            let rendering = driver.next_rendering().await?;
            Some((rendering, driver))
        })
        .boxed()
    }
}

// ═══════════════════════════════════════════
// RESOLVERS
// ═══════════════════════════════════════════

/// Outcome of invoking a resolver
pub enum Resolution {
    /// Available now; `None` renders empty
    Ready(Option<Value>),
    /// Settles later; the slot renders empty until then
    Pending(PendingValue),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Resolution::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Asynchronous lookup bound to a tag name
pub trait Resolver: Send + Sync {
    /// Called once per distinct rendered body
    fn resolve(&self, input: &str) -> Resolution;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Resolution + Send + Sync,
{
    fn resolve(&self, input: &str) -> Resolution {
        self(input)
    }
}

/// Data, resolvers and concurrency for one render call
#[derive(Clone)]
pub struct RenderContext {
    data: Value,
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    concurrency: usize,
}

impl RenderContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            resolvers: HashMap::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_resolver(mut self, name: impl Into<String>, resolver: impl Resolver + 'static) -> Self {
        self.resolvers.insert(name.into(), Arc::new(resolver));
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("data", &self.data)
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

// ═══════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════

enum TaskState {
    Pending,
    Settled(Option<Value>),
    Failed(AigneError),
}

/// One rendering pass. Without a task map, resolver slots render empty.
struct Renderer<'a> {
    resolvers: &'a HashMap<String, Arc<dyn Resolver>>,
    tasks: Option<&'a mut HashMap<String, TaskState>>,
    spawned: Vec<(String, PendingValue)>,
}

impl<'a> Renderer<'a> {
    fn plain(resolvers: &'a HashMap<String, Arc<dyn Resolver>>) -> Self {
        Self {
            resolvers,
            tasks: None,
            spawned: Vec::new(),
        }
    }

    /// Err carries the key of a failed task
    fn render<'v>(
        &mut self,
        nodes: &[Node],
        stack: &mut Vec<&'v Value>,
        out: &mut String,
    ) -> Result<(), String> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Variable(name) => {
                    if self.resolvers.contains_key(name) {
                        self.slot(name, "", out)?;
                    } else if let Some(value) = lookup(stack, name) {
                        write_value(out, value);
                    }
                }
                Node::Section {
                    name,
                    inverted,
                    body,
                } => {
                    if self.resolvers.contains_key(name) {
                        if !inverted {
                            let mut input = String::new();
                            Renderer::plain(self.resolvers).render(body, stack, &mut input)?;
                            self.slot(name, &input, out)?;
                        }
                        continue;
                    }

                    let value = lookup(stack, name).filter(|v| is_truthy(v));
                    match (value, *inverted) {
                        (None, true) => self.render(body, stack, out)?,
                        (None, false) | (Some(_), true) => {}
                        (Some(value), false) => match value {
                            Value::Array(items) => {
                                for item in items {
                                    stack.push(item);
                                    let rendered = self.render(body, stack, out);
                                    stack.pop();
                                    rendered?;
                                }
                            }
                            Value::Object(_) => {
                                stack.push(value);
                                let rendered = self.render(body, stack, out);
                                stack.pop();
                                rendered?;
                            }
                            _ => self.render(body, stack, out)?,
                        },
                    }
                }
            }
        }
        Ok(())
    }

    fn slot(&mut self, name: &str, input: &str, out: &mut String) -> Result<(), String> {
        let Some(tasks) = self.tasks.as_deref_mut() else {
            return Ok(());
        };
        let key = format!("{}\u{0}{}", name, input);

        match tasks.get(&key) {
            Some(TaskState::Settled(value)) => {
                if let Some(value) = value {
                    write_value(out, value);
                }
            }
            Some(TaskState::Pending) => {}
            Some(TaskState::Failed(_)) => return Err(key),
            None => {
                let Some(resolver) = self.resolvers.get(name) else {
                    return Ok(());
                };
                match resolver.resolve(input) {
                    Resolution::Ready(value) => {
                        if let Some(value) = &value {
                            write_value(out, value);
                        }
                        tasks.insert(key, TaskState::Settled(value));
                    }
                    Resolution::Pending(future) => {
                        tasks.insert(key.clone(), TaskState::Pending);
                        self.spawned.push((key, future));
                    }
                }
            }
        }
        Ok(())
    }
}

fn lookup<'v>(stack: &[&'v Value], name: &str) -> Option<&'v Value> {
    if name == "." {
        return stack.last().copied();
    }
    let mut parts = name.split('.');
    let first = parts.next()?;
    let base = stack.iter().rev().find_map(|ctx| child(ctx, first))?;
    parts.try_fold(base, |value, part| child(value, part))
}

fn child<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

// ═══════════════════════════════════════════
// DRIVER
// ═══════════════════════════════════════════

type Settled = BoxFuture<'static, (String, Result<Option<Value>, AigneError>)>;

struct Driver {
    nodes: Arc<Vec<Node>>,
    data: Value,
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    tasks: HashMap<String, TaskState>,
    inflight: FuturesUnordered<Settled>,
    permits: Arc<Semaphore>,
    started: bool,
    finished: bool,
}

impl Driver {
    fn new(nodes: Arc<Vec<Node>>, ctx: RenderContext) -> Self {
        Self {
            nodes,
            data: ctx.data,
            resolvers: ctx.resolvers,
            tasks: HashMap::new(),
            inflight: FuturesUnordered::new(),
            permits: Arc::new(Semaphore::new(ctx.concurrency)),
            started: false,
            finished: false,
        }
    }

    async fn next_rendering(&mut self) -> Option<Result<String, AigneError>> {
        if self.finished {
            return None;
        }
        if self.started {
            let (key, result) = self.inflight.next().await?;
            let state = match result {
                Ok(value) => TaskState::Settled(value),
                Err(err) => TaskState::Failed(err),
            };
            self.tasks.insert(key, state);
        }
        self.started = true;

        let rendering = self.pass();
        if rendering.is_err() {
            self.finished = true;
        }
        Some(rendering)
    }

    fn pass(&mut self) -> Result<String, AigneError> {
        let mut renderer = Renderer {
            resolvers: &self.resolvers,
            tasks: Some(&mut self.tasks),
            spawned: Vec::new(),
        };
        let mut out = String::new();
        let mut stack = vec![&self.data];
        let rendered = renderer.render(&self.nodes, &mut stack, &mut out);
        let spawned = renderer.spawned;

        for (key, future) in spawned {
            let permits = Arc::clone(&self.permits);
            self.inflight.push(Box::pin(async move {
                let _permit = permits.acquire_owned().await;
                (key, future.await)
            }));
        }

        match rendered {
            Ok(()) => Ok(out),
            Err(key) => match self.tasks.remove(&key) {
                Some(TaskState::Failed(err)) => Err(err),
                _ => Err(AigneError::Stream {
                    message: format!("render task '{}' failed", key.replace('\u{0}', ":")),
                }),
            },
        }
    }
}

/// Parse and start an incremental render
pub fn render_stream(template: &str, ctx: RenderContext) -> Result<RenderStream, AigneError> {
    Ok(Template::parse(template)?.render_stream(ctx))
}

/// Render to completion and return the final rendering
pub async fn render(template: &str, ctx: RenderContext) -> Result<String, AigneError> {
    let mut renderings = render_stream(template, ctx)?;
    let mut last = String::new();
    while let Some(rendering) = renderings.next().await {
        last = rendering?;
    }
    Ok(last)
}
