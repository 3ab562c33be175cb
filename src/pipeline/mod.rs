//! Purpose: Deliver a call through an ordered chain of policies to a transport.
//! Exports: `Pipeline`, `Policy`, `Transport`, `Next`, `BoxFuture`, and the context types.
//! Role: Cross-cutting request handling (headers, auth, telemetry) ahead of the network.
//! Invariants: The policy list is immutable; each stage receives the remaining slice by value.
//! Invariants: A policy continues the call only by running `Next`; not running it short-circuits.
//! Invariants: There is no shared cursor, so one pipeline serves concurrent calls.
use crate::core::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod context;
mod header;
pub mod http;
pub mod mock;

pub use context::{
    BodyStream, CallContext, CancelSignal, Content, Header, HeaderLookup, RequestState,
    ResponseState, ServiceMethod,
};
pub use header::HeaderPolicy;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of the forward pass.
pub trait Policy: Send + Sync {
    fn process<'a>(
        &'a self,
        context: &'a mut dyn CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Terminal stage: owns the context type and performs the exchange.
pub trait Transport: Send + Sync {
    fn create_context(&self, cancel: CancelSignal) -> Box<dyn CallContext>;

    fn process<'a>(&'a self, context: &'a mut dyn CallContext) -> BoxFuture<'a, Result<(), Error>>;
}

/// The unexecuted remainder of a pipeline.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Policies left before the transport runs.
    pub fn remaining(&self) -> usize {
        self.policies.len()
    }

    /// Continues the call. The context is only reborrowed, so the caller can
    /// inspect the response once the returned future completes.
    pub fn run<'c>(self, context: &'c mut dyn CallContext) -> BoxFuture<'c, Result<(), Error>>
    where
        'a: 'c,
    {
        match self.policies.split_first() {
            Some((policy, rest)) => policy.process(
                context,
                Next {
                    policies: rest,
                    transport: self.transport,
                },
            ),
            None => self.transport.process(context),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>, policies: Vec<Arc<dyn Policy>>) -> Self {
        Self {
            policies: policies.into(),
            transport,
        }
    }

    pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
        PipelineBuilder {
            transport,
            policies: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn create_context(&self, cancel: CancelSignal) -> Box<dyn CallContext> {
        self.transport.create_context(cancel)
    }

    /// Runs the context through every policy and then the transport.
    pub async fn process(&self, context: &mut dyn CallContext) -> Result<(), Error> {
        context.cancellation().check()?;
        tracing::debug!(call = %context, policies = self.policies.len(), "dispatching call");
        let next = Next {
            policies: &self.policies[..],
            transport: &*self.transport,
        };
        let result = next.run(context).await;
        match &result {
            Ok(()) => tracing::debug!(call = %context, status = ?context.status(), "call completed"),
            Err(err) => tracing::debug!(call = %context, error = %err, "call failed"),
        }
        result
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policies.len())
            .finish_non_exhaustive()
    }
}

pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    policies: Vec<Arc<dyn Policy>>,
}

impl PipelineBuilder {
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline::new(self.transport, self.policies)
    }
}
