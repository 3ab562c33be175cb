// Policy that stamps one fixed header on every call (user agent, auth).
use super::{BoxFuture, CallContext, Header, Next, Policy};
use crate::core::error::Error;

#[derive(Clone, Debug)]
pub struct HeaderPolicy {
    header: Header,
}

impl HeaderPolicy {
    pub fn new(header: Header) -> Self {
        Self { header }
    }

    pub fn user_agent(component: &str, version: &str) -> Self {
        Self::new(Header::user_agent(component, version))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl Policy for HeaderPolicy {
    fn process<'a>(
        &'a self,
        context: &'a mut dyn CallContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            context.add_header(self.header.clone());
            next.run(context).await
        })
    }
}
