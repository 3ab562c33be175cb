//! Purpose: Configuration client operations on top of the request pipeline.
//! Exports: `ConfigurationClient`, `ClientOptions`, `ListOptions`.
//! Role: Builds calls (`/kv` routes), runs them through the pipeline, decodes the responses.
//! Invariants: Every call carries `Accept: application/json` and the caller's cancel signal.
//! Invariants: A pipeline that finished without a status is treated as an incomplete call.
//! Invariants: Non-2xx statuses become errors carrying the status; bodies are not decoded.
#![allow(clippy::result_large_err)]

use super::read::{DEFAULT_MAX_DOCUMENT_BYTES, parse_batch, parse_setting};
use crate::core::buffer::{BufferPool, DEFAULT_BUFFER_SIZE};
use crate::core::error::{Error, ErrorKind, error_kind_from_status};
use crate::core::setting::{ConfigurationSetting, SettingBatch};
use crate::pipeline::{CallContext, CancelSignal, Content, Header, Pipeline, ServiceMethod};
use url::Url;

type ApiResult<T> = Result<T, Error>;

const JSON_MEDIA_TYPE: &str = "application/json";

#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Initial size of pooled decode/encode buffers.
    pub buffer_size: usize,
    /// Largest response document accepted before failing with `TooLarge`.
    pub max_document_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

/// Filters and cursor for listing settings.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListOptions {
    pub key: Option<String>,
    pub label: Option<String>,
    pub after: Option<u64>,
}

impl ListOptions {
    pub fn after(mut self, after: u64) -> Self {
        self.after = Some(after);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ConfigurationClient {
    base_url: Url,
    pipeline: Pipeline,
    pool: BufferPool,
    options: ClientOptions,
}

impl ConfigurationClient {
    pub fn new(base_url: impl Into<String>, pipeline: Pipeline) -> ApiResult<Self> {
        let options = ClientOptions::default();
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            pipeline,
            pool: BufferPool::shared().clone(),
            options,
        })
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        if options.buffer_size != self.pool.buffer_size() {
            self.pool = BufferPool::new(options.buffer_size);
        }
        self.options = options;
        self
    }

    /// Rents decode/encode buffers from `pool` instead of the shared one.
    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.options.buffer_size = pool.buffer_size();
        self.pool = pool;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn get_setting(
        &self,
        key: &str,
        label: Option<&str>,
        cancel: &CancelSignal,
    ) -> ApiResult<ConfigurationSetting> {
        let url = self.setting_url(key, label)?;
        let mut context = self.start(ServiceMethod::Get, url, cancel);
        self.dispatch(&mut *context).await?;
        parse_setting(&mut *context, &self.pool, self.options.max_document_bytes).await
    }

    /// Stores `value` and `content_type` of the setting and returns what the service kept.
    pub async fn set_setting(
        &self,
        setting: &ConfigurationSetting,
        cancel: &CancelSignal,
    ) -> ApiResult<ConfigurationSetting> {
        let url = self.setting_url(&setting.key, setting.label.as_deref())?;
        let content = Content::from_setting(setting, &self.pool)?;
        let mut context = self.start(ServiceMethod::Put, url, cancel);
        context.add_header(Header::new(Header::CONTENT_TYPE, JSON_MEDIA_TYPE));
        context.set_content(content);
        self.dispatch(&mut *context).await?;
        parse_setting(&mut *context, &self.pool, self.options.max_document_bytes).await
    }

    pub async fn delete_setting(
        &self,
        key: &str,
        label: Option<&str>,
        cancel: &CancelSignal,
    ) -> ApiResult<()> {
        let url = self.setting_url(key, label)?;
        let mut context = self.start(ServiceMethod::Delete, url, cancel);
        self.dispatch(&mut *context).await
    }

    /// Fetches one page; pass the returned continuation as `after` for the next one.
    pub async fn list_settings(
        &self,
        options: &ListOptions,
        cancel: &CancelSignal,
    ) -> ApiResult<SettingBatch> {
        let mut url = build_url(&self.base_url, &["kv"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(key) = &options.key {
                pairs.append_pair("key", key);
            }
            if let Some(label) = &options.label {
                pairs.append_pair("label", label);
            }
            if let Some(after) = options.after {
                pairs.append_pair("after", &after.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut context = self.start(ServiceMethod::Get, url, cancel);
        self.dispatch(&mut *context).await?;
        parse_batch(&mut *context, &self.pool, self.options.max_document_bytes).await
    }

    fn start(&self, method: ServiceMethod, url: Url, cancel: &CancelSignal) -> Box<dyn CallContext> {
        let mut context = self.pipeline.create_context(cancel.clone());
        context.set_request_line(method, url);
        context.add_header(Header::new(Header::ACCEPT, JSON_MEDIA_TYPE));
        context
    }

    async fn dispatch(&self, context: &mut dyn CallContext) -> ApiResult<()> {
        self.pipeline.process(context).await?;
        let Some(status) = context.status() else {
            return Err(Error::new(ErrorKind::Internal)
                .with_message("call did not complete")
                .with_hint("A policy ended the call without forwarding it to the transport."));
        };
        if (200..300).contains(&status) {
            return Ok(());
        }
        tracing::warn!(call = %context, status, "service returned an error status");
        Err(Error::new(error_kind_from_status(status))
            .with_message(format!("service returned status {status}"))
            .with_status(status))
    }

    fn setting_url(&self, key: &str, label: Option<&str>) -> ApiResult<Url> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("setting key must not be empty"));
        }
        let mut url = build_url(&self.base_url, &["kv", key])?;
        if let Some(label) = label {
            url.query_pairs_mut().append_pair("label", label);
        }
        Ok(url)
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid endpoint url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("endpoint url must use http or https scheme")
        );
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

// Appends percent-encoded segments to the endpoint path.
fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("endpoint url cannot be a base")
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}
