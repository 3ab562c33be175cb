//! Purpose: `kvconfig` CLI entry point for the configuration service client.
//! Role: Binary crate root; parses args, runs one client call, emits JSON on stdout.
//! Invariants: Successful commands print exactly one JSON document on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Ctrl-C cancels the in-flight call instead of killing the process mid-write.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand, ValueHint};
use kvconfig::api::{
    ConfigurationClient, ConfigurationSetting, Error, ErrorKind, ListOptions, SettingBatch,
    to_exit_code,
};
use kvconfig::pipeline::{CancelSignal, Header, HeaderPolicy, Pipeline, http::HttpTransport};
use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `kvconfig --help`."));
            }
        },
    };

    init_tracing();
    let client = build_client(&cli)?;
    let command = cli.command;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;

    let output = runtime.block_on(async move {
        let cancel = CancelSignal::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received; cancelling call");
                    cancel.cancel();
                }
            })
        };
        let output = dispatch(&client, command, &cancel).await;
        interrupt.abort();
        output
    })?;

    emit_json(&output);
    Ok(RunOutcome::ok())
}

#[derive(Parser)]
#[command(
    name = "kvconfig",
    version,
    about = "Read and write settings in a key-value configuration service",
    long_about = None,
    after_help = r#"EXAMPLES
  $ kvconfig --endpoint https://config.example get app/color
  $ kvconfig --endpoint https://config.example set app/color blue --label prod
  $ kvconfig --endpoint https://config.example list --key 'app/*' --all
  $ kvconfig --endpoint https://config.example delete app/color --label prod

Set RUST_LOG=debug to trace each call on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(long, env = "KVCONFIG_ENDPOINT", help = "Service base URL (http or https)", value_hint = ValueHint::Url)]
    endpoint: String,
    #[arg(long, env = "KVCONFIG_TOKEN", hide_env_values = true, help = "Bearer token sent on every call")]
    token: Option<String>,
    #[arg(long, help = "PEM file with the CA certificates to trust", value_hint = ValueHint::FilePath)]
    tls_ca_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Fetch one setting")]
    Get {
        key: String,
        #[arg(long)]
        label: Option<String>,
    },
    #[command(about = "Create or replace a setting's value")]
    Set {
        key: String,
        value: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, help = "Media type stored alongside the value")]
        content_type: Option<String>,
    },
    #[command(about = "Delete one setting")]
    Delete {
        key: String,
        #[arg(long)]
        label: Option<String>,
    },
    #[command(about = "List settings, one page at a time")]
    List {
        #[arg(long, help = "Key filter; `*` is a wildcard")]
        key: Option<String>,
        #[arg(long, help = "Label filter; `*` is a wildcard")]
        label: Option<String>,
        #[arg(long, help = "Continuation cursor returned by a previous page")]
        after: Option<u64>,
        #[arg(long, help = "Follow continuations until the last page")]
        all: bool,
    },
}

fn build_client(cli: &Cli) -> Result<ConfigurationClient, Error> {
    let mut transport = HttpTransport::new();
    if let Some(path) = &cli.tls_ca_file {
        transport = transport.with_tls_ca_file(path)?;
    }
    let mut builder = Pipeline::builder(Arc::new(transport))
        .policy(HeaderPolicy::user_agent("kvconfig", env!("CARGO_PKG_VERSION")));
    if let Some(token) = &cli.token {
        builder = builder.policy(HeaderPolicy::new(Header::bearer(token)));
    }
    ConfigurationClient::new(cli.endpoint.clone(), builder.build())
}

async fn dispatch(
    client: &ConfigurationClient,
    command: Command,
    cancel: &CancelSignal,
) -> Result<Value, Error> {
    match command {
        Command::Get { key, label } => {
            let setting = client.get_setting(&key, label.as_deref(), cancel).await?;
            Ok(setting_json(&setting))
        }
        Command::Set {
            key,
            value,
            label,
            content_type,
        } => {
            let mut setting = ConfigurationSetting::new(key, value);
            setting.label = label;
            setting.content_type = content_type;
            let stored = client.set_setting(&setting, cancel).await?;
            Ok(setting_json(&stored))
        }
        Command::Delete { key, label } => {
            client.delete_setting(&key, label.as_deref(), cancel).await?;
            Ok(json!({ "deleted": { "key": key, "label": label } }))
        }
        Command::List {
            key,
            label,
            after,
            all,
        } => {
            let options = ListOptions { key, label, after };
            let batch = if all {
                list_all(client, options, cancel).await?
            } else {
                client.list_settings(&options, cancel).await?
            };
            Ok(batch_json(&batch))
        }
    }
}

/// Follows continuations until a page has none. Cursors must strictly increase.
async fn list_all(
    client: &ConfigurationClient,
    mut options: ListOptions,
    cancel: &CancelSignal,
) -> Result<SettingBatch, Error> {
    let mut settings = Vec::new();
    loop {
        let page = client.list_settings(&options, cancel).await?;
        let next = page.continuation();
        tracing::debug!(settings = page.len(), ?next, "received page");
        settings.extend(page.into_settings());
        let Some(cursor) = next else {
            return Ok(SettingBatch::new(settings, None));
        };
        if let Some(previous) = options.after.filter(|previous| cursor <= *previous) {
            tracing::warn!(previous, cursor, "continuation cursor did not advance");
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!(
                    "service returned continuation {cursor} after requesting {previous}"
                ))
                .with_hint("Retry without --all and page manually with --after."));
        }
        options = options.after(cursor);
    }
}

fn setting_json(setting: &ConfigurationSetting) -> Value {
    let last_modified = setting
        .last_modified
        .and_then(|ts| ts.format(&Rfc3339).ok());
    json!({
        "key": setting.key,
        "label": setting.label,
        "value": setting.value,
        "content_type": setting.content_type,
        "etag": setting.etag,
        "locked": setting.locked,
        "last_modified": last_modified,
    })
}

fn batch_json(batch: &SettingBatch) -> Value {
    let settings: Vec<Value> = batch.settings().iter().map(setting_json).collect();
    json!({
        "settings": settings,
        "continuation": batch.continuation(),
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_json(value: &Value) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Conflict => "conflict".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Decode => "malformed response document".to_string(),
        ErrorKind::Format => "unexpected value in response document".to_string(),
        ErrorKind::Capacity => "buffer too small".to_string(),
        ErrorKind::TooLarge => "response too large".to_string(),
        ErrorKind::Cancelled => "cancelled".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = std::error::Error::source(err);
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(field) = err.field() {
        inner.insert("field".to_string(), json!(field));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if let Some(status) = err.status() {
        inner.insert("status".to_string(), json!(status));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(status) = err.status() {
        lines.push(format!("status: {status}"));
    }
    if let (Some(field), Some(offset)) = (err.field(), err.offset()) {
        lines.push(format!("at: field `{field}`, byte {offset}"));
    } else if let Some(offset) = err.offset() {
        lines.push(format!("at: byte {offset}"));
    }
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{Command, batch_json, dispatch, error_json, setting_json};
    use kvconfig::api::{ConfigurationClient, ConfigurationSetting, Error, ErrorKind, SettingBatch};
    use kvconfig::pipeline::mock::{MockResponse, MockTransport};
    use kvconfig::pipeline::{CancelSignal, Pipeline};
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::datetime;

    fn mock_client(responses: Vec<MockResponse>) -> (ConfigurationClient, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::with_responses(responses));
        let pipeline = Pipeline::builder(transport.clone()).build();
        let client = ConfigurationClient::new("http://config.test", pipeline).expect("client");
        (client, transport)
    }

    fn list_all_command() -> Command {
        Command::List {
            key: None,
            label: None,
            after: None,
            all: true,
        }
    }

    #[tokio::test]
    async fn list_all_follows_continuations_to_the_last_page() {
        let (client, transport) = mock_client(vec![
            MockResponse::new(200)
                .with_header("Link", r#"</kv?after=5>;rel="next""#)
                .with_body(r#"[{"key":"a"},{"key":"b"}]"#),
            MockResponse::new(200).with_body(r#"[{"key":"c"}]"#),
        ]);
        let output = dispatch(&client, list_all_command(), &CancelSignal::new())
            .await
            .expect("list");
        assert_eq!(output["settings"].as_array().map(Vec::len), Some(3));
        assert!(output["continuation"].is_null());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        let second = requests[1].url.as_ref().expect("url");
        assert_eq!(second.query(), Some("after=5"));
    }

    #[tokio::test]
    async fn list_all_stops_when_the_cursor_repeats() {
        let (client, transport) = mock_client(vec![
            MockResponse::new(200)
                .with_header("Link", r#"</kv?after=5>;rel="next""#)
                .with_body(r#"[{"key":"a"}]"#),
        ]);
        let err = dispatch(&client, list_all_command(), &CancelSignal::new())
            .await
            .expect_err("repeated cursor");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn list_all_rejects_a_cursor_that_moves_backwards() {
        let (client, transport) = mock_client(vec![
            MockResponse::new(200)
                .with_header("Link", r#"</kv?after=3>;rel="next""#)
                .with_body("[]"),
        ]);
        let command = Command::List {
            key: None,
            label: None,
            after: Some(9),
            all: true,
        };
        let err = dispatch(&client, command, &CancelSignal::new())
            .await
            .expect_err("backwards cursor");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn setting_json_formats_timestamps_as_rfc3339() {
        let mut setting = ConfigurationSetting::new("app/color", "blue").with_label("prod");
        setting.locked = true;
        setting.last_modified = Some(datetime!(2024-05-01 12:30:00 UTC));
        let value = setting_json(&setting);
        assert_eq!(value["key"], "app/color");
        assert_eq!(value["label"], "prod");
        assert_eq!(value["locked"], true);
        assert_eq!(value["last_modified"], "2024-05-01T12:30:00Z");
        assert!(value["etag"].is_null());
    }

    #[test]
    fn batch_json_carries_continuation() {
        let batch = SettingBatch::new(vec![ConfigurationSetting::new("a", "1")], Some(5));
        let value = batch_json(&batch);
        assert_eq!(value["settings"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["continuation"], 5);
    }

    #[test]
    fn error_json_includes_decode_context() {
        let err = Error::new(ErrorKind::Format)
            .with_message("expected a boolean")
            .with_field("locked")
            .with_offset(17);
        assert_eq!(
            error_json(&err),
            json!({
                "error": {
                    "kind": "Format",
                    "message": "expected a boolean",
                    "field": "locked",
                    "offset": 17,
                }
            })
        );
    }
}
