//! Purpose: Lock request pipeline ordering, short-circuit, and reuse semantics.
//! Exports: Integration tests only (no runtime exports).
//! Role: Drive the pipeline with recording policies over the mock transport.
//! Invariants: Policies run in list order; a policy observes the response after awaiting `Next::run`.
//! Invariants: A policy that does not run `Next` keeps the call off the transport.

use kvconfig::api::ErrorKind;
use kvconfig::core::error::Error;
use kvconfig::pipeline::mock::{MockResponse, MockTransport};
use kvconfig::pipeline::{
    BoxFuture, CallContext, CancelSignal, Header, HeaderPolicy, Next, Pipeline, Policy,
    ServiceMethod, Transport,
};
use std::sync::{Arc, Mutex};
use url::Url;

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: &'static str,
    journal: Journal,
}

impl Policy for Recorder {
    fn process<'a>(
        &'a self,
        context: &'a mut dyn CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.journal
                .lock()
                .expect("journal")
                .push(format!("{}>{}", self.name, next.remaining()));
            let result = next.run(&mut *context).await;
            self.journal
                .lock()
                .expect("journal")
                .push(format!("{}<{:?}", self.name, context.status()));
            result
        })
    }
}

struct ShortCircuit;

impl Policy for ShortCircuit {
    fn process<'a>(
        &'a self,
        _context: &'a mut dyn CallContext,
        _next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}

fn request_url() -> Url {
    Url::parse("http://localhost/kv/app").expect("url")
}

#[tokio::test]
async fn policies_run_in_order_and_observe_the_response() {
    let journal: Journal = Arc::default();
    let transport = Arc::new(MockTransport::new(&[200]));
    let pipeline = Pipeline::builder(transport.clone())
        .policy(Recorder {
            name: "first",
            journal: journal.clone(),
        })
        .policy(Recorder {
            name: "second",
            journal: journal.clone(),
        })
        .build();
    assert_eq!(pipeline.len(), 2);

    let mut context = pipeline.create_context(CancelSignal::new());
    context.set_request_line(ServiceMethod::Get, request_url());
    pipeline.process(&mut *context).await.expect("process");

    let journal = journal.lock().expect("journal").clone();
    assert_eq!(
        journal,
        vec!["first>1", "second>0", "second<Some(200)", "first<Some(200)"]
    );
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn short_circuit_keeps_the_call_off_the_transport() {
    let journal: Journal = Arc::default();
    let transport = Arc::new(MockTransport::new(&[200]));
    let pipeline = Pipeline::builder(transport.clone())
        .policy(ShortCircuit)
        .policy(Recorder {
            name: "after",
            journal: journal.clone(),
        })
        .build();

    let mut context = pipeline.create_context(CancelSignal::new());
    context.set_request_line(ServiceMethod::Get, request_url());
    pipeline.process(&mut *context).await.expect("process");

    assert_eq!(context.status(), None);
    assert!(transport.requests().is_empty());
    assert!(journal.lock().expect("journal").is_empty());
}

#[tokio::test]
async fn header_policies_stamp_in_order() {
    let transport = Arc::new(MockTransport::new(&[204]));
    let pipeline = Pipeline::builder(transport.clone())
        .policy(HeaderPolicy::user_agent("kvconfig", "0.1.0"))
        .policy(HeaderPolicy::new(Header::bearer("secret")))
        .build();

    let mut context = pipeline.create_context(CancelSignal::new());
    context.set_request_line(ServiceMethod::Delete, request_url());
    pipeline.process(&mut *context).await.expect("process");

    let requests = transport.requests();
    let names: Vec<&[u8]> = requests[0].headers.iter().map(Header::name).collect();
    assert_eq!(names, vec![b"User-Agent".as_slice(), b"Authorization".as_slice()]);
    assert_eq!(
        requests[0].header(b"Authorization"),
        Some(b"Bearer secret".as_slice())
    );
    assert_eq!(requests[0].method, Some(ServiceMethod::Delete));
}

#[tokio::test]
async fn one_pipeline_serves_concurrent_calls() {
    let transport = Arc::new(MockTransport::with_responses(vec![
        MockResponse::new(200).with_body("[]"),
    ]));
    let pipeline = Pipeline::builder(transport.clone())
        .policy(HeaderPolicy::new(Header::new("x-call", "1")))
        .build();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let mut context = pipeline.create_context(CancelSignal::new());
                let url = Url::parse(&format!("http://localhost/kv/key{i}")).expect("url");
                context.set_request_line(ServiceMethod::Get, url);
                pipeline.process(&mut *context).await.expect("process");
                context.status()
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.expect("join"), Some(200));
    }

    let requests = transport.requests();
    assert_eq!(requests.len(), 16);
    for request in &requests {
        let stamped = request
            .headers
            .iter()
            .filter(|header| header.name() == b"x-call")
            .count();
        assert_eq!(stamped, 1);
    }
}

#[tokio::test]
async fn foreign_context_is_rejected_by_the_transport() {
    let other = MockTransport::new(&[200]);
    let http = kvconfig::pipeline::http::HttpTransport::new();
    let mut context = http.create_context(CancelSignal::new());
    context.set_request_line(ServiceMethod::Get, request_url());
    let err = other.process(&mut *context).await.expect_err("foreign");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(other.requests().is_empty());
}

#[tokio::test]
async fn cancellation_before_dispatch_skips_policies() {
    let journal: Journal = Arc::default();
    let transport = Arc::new(MockTransport::new(&[200]));
    let pipeline = Pipeline::builder(transport.clone())
        .policy(Recorder {
            name: "only",
            journal: journal.clone(),
        })
        .build();

    let cancel = CancelSignal::new();
    let mut context = pipeline.create_context(cancel.clone());
    context.set_request_line(ServiceMethod::Get, request_url());
    cancel.cancel();
    let err = pipeline.process(&mut *context).await.expect_err("cancelled");
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(journal.lock().expect("journal").is_empty());
    assert!(transport.requests().is_empty());
}
