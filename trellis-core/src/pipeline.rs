//! Ordered pipe chains
//!
//! A [`Pipeline`] sends a subject through a list of pipes and finally into a
//! destination. Pipes are folded right-to-left around the destination, so each
//! pipe receives the rest of the chain as its `next` continuation and may
//! short-circuit by returning without calling it.
//!
//! ```
//! use trellis_core::{Container, Pipeline, pipeline::{Next, pipe_fn}};
//!
//! # tokio_test::block_on(async {
//! let container = Container::new();
//! let result = Pipeline::<u32, u32>::new(container)
//!     .send(1)
//!     .through(vec![pipe_fn(|n: u32, next: Next<u32, u32>| async move { next(n + 1).await })])
//!     .then(|n| async move { Ok(n * 10) })
//!     .await?;
//! assert_eq!(result, 20);
//! # Ok::<(), trellis_core::Error>(())
//! # }).unwrap();
//! ```
//!
//! Named pipes (`"throttle:60,1"`) are resolved through the container only when
//! the chain reaches them. Errors are never caught here.

use crate::logging::{debug, trace};
use crate::{Container, Error};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used for continuations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The remainder of the chain, handed to each pipe
pub type Next<T, R> = Box<dyn FnOnce(T) -> BoxFuture<'static, Result<R, Error>> + Send>;

/// One stage of a pipeline
#[async_trait]
pub trait Pipe<T, R>: Send + Sync
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Process the subject; call `next` to continue down the chain
    async fn handle(&self, subject: T, next: Next<T, R>, parameters: &[String]) -> Result<R, Error>;

    /// Dispatch by method name. Only `handle` exists unless a pipe overrides this.
    async fn invoke(
        &self,
        method: &str,
        subject: T,
        next: Next<T, R>,
        parameters: &[String],
    ) -> Result<R, Error> {
        match method {
            "handle" => self.handle(subject, next, parameters).await,
            other => Err(Error::BindingResolution(format!(
                "Method [{}] does not exist on pipe",
                other
            ))),
        }
    }

    /// Runs after the result has been delivered
    async fn terminate(&self, _subject: &T, _result: &R) -> Result<(), Error> {
        Ok(())
    }
}

/// A pipe reference: a container identifier with static parameters, or an inline pipe
pub enum PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    Named {
        identifier: String,
        parameters: Vec<String>,
    },
    Inline(Arc<dyn Pipe<T, R>>),
}

impl<T, R> Clone for PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        match self {
            PipeRef::Named {
                identifier,
                parameters,
            } => PipeRef::Named {
                identifier: identifier.clone(),
                parameters: parameters.clone(),
            },
            PipeRef::Inline(pipe) => PipeRef::Inline(pipe.clone()),
        }
    }
}

impl<T, R> std::fmt::Debug for PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.spec() {
            Some(spec) => write!(f, "Named({})", spec),
            None => f.write_str("Inline"),
        }
    }
}

impl<T, R> PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Parse `"name"` or `"name:param1,param2"`
    pub fn named(spec: &str) -> Self {
        let (identifier, parameters) = match spec.split_once(':') {
            Some((identifier, raw)) => (
                identifier.trim(),
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            None => (spec.trim(), Vec::new()),
        };
        PipeRef::Named {
            identifier: identifier.to_string(),
            parameters,
        }
    }

    pub fn inline<P: Pipe<T, R> + 'static>(pipe: P) -> Self {
        PipeRef::Inline(Arc::new(pipe))
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            PipeRef::Named { identifier, .. } => Some(identifier),
            PipeRef::Inline(_) => None,
        }
    }

    pub fn parameters(&self) -> &[String] {
        match self {
            PipeRef::Named { parameters, .. } => parameters,
            PipeRef::Inline(_) => &[],
        }
    }

    /// Resolve to a callable pipe, consulting the container for named pipes
    pub fn resolve(&self, container: &Container) -> Result<Arc<dyn Pipe<T, R>>, Error> {
        match self {
            PipeRef::Named { identifier, .. } => container
                .make_as::<Arc<dyn Pipe<T, R>>>(identifier)
                .map(|pipe| (*pipe).clone()),
            PipeRef::Inline(pipe) => Ok(pipe.clone()),
        }
    }

    /// `"name:p1,p2"` for named pipes, `None` for inline ones
    pub fn spec(&self) -> Option<String> {
        match self {
            PipeRef::Named {
                identifier,
                parameters,
            } if parameters.is_empty() => Some(identifier.clone()),
            PipeRef::Named {
                identifier,
                parameters,
            } => Some(format!("{}:{}", identifier, parameters.join(","))),
            PipeRef::Inline(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, PipeRef::Inline(_))
    }
}

impl<T, R> PartialEq for PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PipeRef::Inline(a), PipeRef::Inline(b)) => Arc::ptr_eq(a, b),
            (a, b) => a.spec().is_some() && a.spec() == b.spec(),
        }
    }
}

impl<T, R> From<&str> for PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn from(spec: &str) -> Self {
        PipeRef::named(spec)
    }
}

impl<T, R> From<String> for PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn from(spec: String) -> Self {
        PipeRef::named(&spec)
    }
}

struct FnPipe<F>(F);

#[async_trait]
impl<T, R, F, Fut> Pipe<T, R> for FnPipe<F>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: Fn(T, Next<T, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    async fn handle(&self, subject: T, next: Next<T, R>, _parameters: &[String]) -> Result<R, Error> {
        (self.0)(subject, next).await
    }
}

/// Turn an async closure into an inline pipe
pub fn pipe_fn<T, R, F, Fut>(f: F) -> PipeRef<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: Fn(T, Next<T, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
{
    PipeRef::Inline(Arc::new(FnPipe(f)))
}

/// Builder for one run of a pipe chain
pub struct Pipeline<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    container: Container,
    subject: Option<T>,
    pipes: Vec<PipeRef<T, R>>,
    method: String,
}

impl<T, R> Pipeline<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(container: Container) -> Self {
        Self {
            container,
            subject: None,
            pipes: Vec::new(),
            method: "handle".to_string(),
        }
    }

    pub fn send(mut self, subject: T) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Replace the pipe list
    pub fn through(mut self, pipes: Vec<PipeRef<T, R>>) -> Self {
        self.pipes = pipes;
        self
    }

    /// Append one pipe
    pub fn pipe(mut self, pipe: impl Into<PipeRef<T, R>>) -> Self {
        self.pipes.push(pipe.into());
        self
    }

    /// Method invoked on each pipe, `handle` by default
    pub fn via(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Run the chain, ending in `destination`
    pub async fn then<F, Fut>(self, destination: F) -> Result<R, Error>
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
    {
        let subject = self
            .subject
            .ok_or_else(|| Error::Internal("Pipeline has no subject to send".to_string()))?;

        debug!(
            pipe_count = self.pipes.len(),
            method = %self.method,
            "Sending subject through pipeline"
        );

        let method: Arc<str> = Arc::from(self.method);
        let mut next: Next<T, R> = Box::new(move |subject| {
            trace!("Pipeline reached destination");
            Box::pin(destination(subject))
        });

        for (index, pipe) in self.pipes.into_iter().enumerate().rev() {
            let container = self.container.clone();
            let method = method.clone();
            let inner = next;
            next = Box::new(move |subject| {
                Box::pin(async move {
                    trace!(pipe_index = index, pipe = ?pipe, "Entering pipe");
                    let resolved = pipe.resolve(&container)?;
                    resolved
                        .invoke(&method, subject, inner, pipe.parameters())
                        .await
                })
            });
        }

        next(subject).await
    }
}
