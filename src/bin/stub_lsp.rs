//! stub-lsp - scripted language server speaking LSP over stdio
//!
//! Understands just enough of the protocol to exercise a client:
//!
//! | method | behaviour |
//! |--------|-----------|
//! | `initialize` | capabilities `{hoverProvider: true}` (see `--hang-initialize`, `--reject-initialize`) |
//! | `textDocument/hover` | plaintext hover naming the document |
//! | `textDocument/didOpen` | publishes empty diagnostics for the document |
//! | `stub/echo` | returns its params |
//! | `stub/pid` | returns the process id |
//! | `stub/sleep` | replies after `params.ms`, never without it |
//! | `stub/burst` | emits `params.count` `stub/tick` notifications, then replies |
//! | `stub/crash` | exits with code 3 without replying |
//! | `stub/error` | replies with a JSON-RPC error |
//! | `stub/garbage` | writes two malformed frames, then replies |
//! | `stub/askClient` | sends `workspace/configuration`, reports the answer as `stub/clientReplied` |
//! | `shutdown` / `exit` | standard lifecycle (see `--ignore-exit`) |

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lsp_registry::infra::lsp::transport::{FrameDecoder, encode_frame};

#[derive(Parser, Debug)]
#[command(name = "stub-lsp", version, about = "Scripted LSP server for tests")]
struct Args {
    /// Never answer `initialize`
    #[arg(long)]
    hang_initialize: bool,

    /// Answer `initialize` with an error
    #[arg(long)]
    reject_initialize: bool,

    /// Keep running after `exit` and stdin EOF until killed
    #[arg(long)]
    ignore_exit: bool,

    /// Accepted for command-line compatibility with real servers
    #[arg(long)]
    stdio: bool,
}

#[derive(Clone)]
struct Output(Arc<Mutex<io::Stdout>>);

impl Output {
    fn raw(&self, bytes: &[u8]) {
        let mut stdout = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if stdout.write_all(bytes).and_then(|()| stdout.flush()).is_err() {
            // client went away
            std::process::exit(1);
        }
    }

    fn send(&self, message: &Value) {
        self.raw(&encode_frame(&message.to_string()));
    }

    fn reply(&self, id: &Value, result: Value) {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }));
    }

    fn reply_error(&self, id: &Value, code: i32, message: &str, data: Option<Value>) {
        let mut error = json!({ "code": code, "message": message });
        if let Some(data) = data {
            error["data"] = data;
        }
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "error": error }));
    }

    fn notify(&self, method: &str, params: Value) {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params }));
    }
}

struct Stub {
    args: Args,
    out: Output,
    shutdown_requested: bool,
    next_ask: u64,
}

impl Stub {
    fn handle(&mut self, body: &[u8]) {
        let message: Value = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("unparseable message: {}", e);
                return;
            }
        };

        let id = message.get("id").cloned().filter(|id| !id.is_null());
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        match (message.get("method").and_then(Value::as_str), id) {
            (Some(method), Some(id)) => self.on_request(method, id, params),
            (Some(method), None) => self.on_notification(method, params),
            (None, Some(id)) => self.on_response(id, &message),
            (None, None) => tracing::warn!("message without id or method"),
        }
    }

    fn on_request(&mut self, method: &str, id: Value, params: Value) {
        tracing::debug!("request {}: {}", id, method);
        let out = &self.out;
        match method {
            "initialize" => {
                if self.args.hang_initialize {
                    return;
                }
                if self.args.reject_initialize {
                    out.reply_error(&id, -32603, "initialization rejected", None);
                    return;
                }
                out.reply(
                    &id,
                    json!({
                        "capabilities": { "hoverProvider": true, "textDocumentSync": 1 },
                        "serverInfo": { "name": "stub-lsp", "version": env!("CARGO_PKG_VERSION") },
                    }),
                );
            }
            "shutdown" => {
                self.shutdown_requested = true;
                out.reply(&id, Value::Null);
            }
            "textDocument/hover" => {
                let uri = params
                    .pointer("/textDocument/uri")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                out.reply(
                    &id,
                    json!({ "contents": { "kind": "plaintext", "value": format!("stub hover for {}", uri) } }),
                );
            }
            "stub/echo" => out.reply(&id, params),
            "stub/pid" => out.reply(&id, json!(std::process::id())),
            "stub/sleep" => {
                let Some(ms) = params.get("ms").and_then(Value::as_u64) else {
                    // never answered
                    return;
                };
                let out = out.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(ms));
                    out.reply(&id, json!({ "slept": ms }));
                });
            }
            "stub/burst" => {
                let count = params.get("count").and_then(Value::as_u64).unwrap_or(0);
                for n in 0..count {
                    out.notify("stub/tick", json!({ "n": n }));
                }
                out.reply(&id, json!(count));
            }
            "stub/crash" => {
                tracing::info!("crashing on request");
                std::process::exit(3);
            }
            "stub/error" => out.reply_error(&id, -32042, "stub failure", Some(params)),
            "stub/garbage" => {
                out.raw(b"Content-Length: nope\r\n\r\n");
                out.raw(&encode_frame("{ this is not json"));
                out.reply(&id, json!("ok"));
            }
            "stub/askClient" => {
                self.next_ask += 1;
                let ask_id = format!("ask-{}", self.next_ask);
                out.send(&json!({
                    "jsonrpc": "2.0",
                    "id": ask_id,
                    "method": "workspace/configuration",
                    "params": { "items": [{ "section": "stub" }, { "section": "other" }] },
                }));
                out.reply(&id, json!(ask_id));
            }
            other => out.reply_error(&id, -32601, &format!("Method not found: {}", other), None),
        }
    }

    fn on_notification(&mut self, method: &str, params: Value) {
        tracing::debug!("notification: {}", method);
        match method {
            "exit" => {
                if self.args.ignore_exit {
                    tracing::info!("ignoring exit");
                    return;
                }
                std::process::exit(if self.shutdown_requested { 0 } else { 1 });
            }
            "textDocument/didOpen" => {
                let uri = params
                    .pointer("/textDocument/uri")
                    .cloned()
                    .unwrap_or(Value::Null);
                self.out.notify(
                    "textDocument/publishDiagnostics",
                    json!({ "uri": uri, "diagnostics": [] }),
                );
            }
            _ => {}
        }
    }

    fn on_response(&mut self, id: Value, message: &Value) {
        self.out.notify(
            "stub/clientReplied",
            json!({
                "id": id,
                "result": message.get("result").cloned().unwrap_or(Value::Null),
                "error": message.get("error").cloned().unwrap_or(Value::Null),
            }),
        );
    }
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("STUB_LSP_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
    tracing::debug!("stub-lsp starting (stdio: {})", args.stdio);

    let mut stub = Stub {
        args,
        out: Output(Arc::new(Mutex::new(io::stdout()))),
        shutdown_requested: false,
        next_ask: 0,
    };

    let mut stdin = io::stdin().lock();
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];

    loop {
        loop {
            match decoder.decode() {
                Ok(Some(body)) => stub.handle(&body),
                Ok(None) => break,
                Err(e) => tracing::warn!("dropped frame: {}", e),
            }
        }

        match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => decoder.extend(&chunk[..n]),
            Err(e) => {
                tracing::warn!("stdin error: {}", e);
                break;
            }
        }
    }

    if stub.args.ignore_exit {
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
    std::process::exit(if stub.shutdown_requested { 0 } else { 1 });
}
