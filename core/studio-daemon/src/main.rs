//! Studio reminder daemon entrypoint.
//!
//! A small single-writer service: a Unix socket listener with strict request
//! validation in front of the reminder engine. Trigger entry points, inbound
//! messages and admin transitions all arrive here as newline-delimited JSON.

use chrono::Utc;
use fs_err as fs;
use serde::Serialize;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::Value;
use studio_core::config::state_dir;
use studio_core::{EngineError, ReminderKind, StudioConfig, StudioEngine};
use studio_protocol::{
    parse_reactivate, parse_session_query, parse_transition, parse_trigger, ErrorInfo, Method,
    Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod whatsapp;

use whatsapp::WhatsAppTransport;

const SOCKET_NAME: &str = "daemon.sock";
const SOCKET_ENV: &str = "STUDIO_DAEMON_SOCKET";
const DEBUG_ENV: &str = "STUDIO_DEBUG_LOG";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let config = match StudioConfig::load(None).and_then(|config| {
        config.with_env_overrides(|key| env::var(key).ok())
    }) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load studio config");
            std::process::exit(1);
        }
    };

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let access_token = env::var(&config.transport.access_token_env).ok();
    let transport = Arc::new(WhatsAppTransport::new(&config.transport, access_token));
    let engine = match StudioEngine::from_config(&config, transport) {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            error!(error = %err, "Failed to initialize reminder engine");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        environment = config.environment.as_str(),
        "Studio daemon started"
    );

    if config.schedule.next_hour_poll_secs > 0 {
        spawn_next_hour_poller(Arc::clone(&engine), config.schedule.next_hour_poll_secs);
    }

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                thread::spawn(|| handle_connection(stream, engine));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

/// Built-in `next_hour` trigger. Overlap with externally fired runs is
/// harmless; the ledger dedups.
fn spawn_next_hour_poller(engine: Arc<StudioEngine>, interval_secs: u64) {
    info!(interval_secs, "next_hour poller enabled");
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(interval_secs));
        if let Err(err) = engine.run_trigger(ReminderKind::NextHour, Utc::now()) {
            warn!(error = %err, "Periodic next_hour run failed");
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(state_dir().map_err(String::from)?.join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, engine: Arc<StudioEngine>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &engine);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, engine: &StudioEngine) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "environment": engine.environment().as_str(),
            }),
        ),
        Method::RunTrigger => {
            let params = match require_params(&request) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let parsed = match parse_trigger(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let now = parsed.invoked_at().unwrap_or_else(Utc::now);
            respond(request.id, engine.run_trigger(parsed.kind, now))
        }
        Method::InboundMessage => handle_inbound(request, engine),
        Method::Transition => {
            let params = match require_params(&request) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let parsed = match parse_transition(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            respond(
                request.id,
                engine.transition(
                    &parsed.session_id,
                    parsed.event,
                    parsed.actor,
                    parsed.reason.as_deref(),
                    Utc::now(),
                ),
            )
        }
        Method::Reactivate => {
            let params = match require_params(&request) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let parsed = match parse_reactivate(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            respond(
                request.id,
                engine.reactivate(
                    &parsed.session_id,
                    parsed.actor,
                    parsed.reason.as_deref(),
                    Utc::now(),
                ),
            )
        }
        Method::GetSession => {
            let params = match require_params(&request) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let parsed = match parse_session_query(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match engine.session(&parsed.session_id) {
                Ok(Some(record)) => respond(request.id, Ok(record)),
                Ok(None) => engine_error(
                    request.id,
                    EngineError::SessionNotFound(parsed.session_id),
                ),
                Err(err) => engine_error(request.id, err),
            }
        }
        Method::GetReminders => {
            let params = match require_params(&request) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let parsed = match parse_session_query(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            respond(request.id, engine.reminders(&parsed.session_id))
        }
    }
}

/// Inbound webhooks always get `ok: true`; a malformed or failed message is
/// logged and reported as not acted upon so the platform does not retry.
fn handle_inbound(request: Request, engine: &StudioEngine) -> Response {
    let payload = request.params.unwrap_or(Value::Null);
    match engine.handle_inbound(&payload, Utc::now()) {
        Ok(outcome) => {
            let mut data = serde_json::to_value(&outcome).unwrap_or_else(|_| serde_json::json!({}));
            data["acted"] = Value::Bool(outcome.acted());
            Response::ok(request.id, data)
        }
        Err(EngineError::MalformedInboundPayload(details)) => {
            warn!(details = %details, "Malformed inbound payload ignored");
            Response::ok(
                request.id,
                serde_json::json!({ "acted": false, "outcome": "malformed" }),
            )
        }
        Err(err) => {
            error!(error = %err, "Inbound message could not be applied");
            Response::ok(
                request.id,
                serde_json::json!({ "acted": false, "outcome": "error", "code": err.code() }),
            )
        }
    }
}

fn require_params(request: &Request) -> Result<Value, ErrorInfo> {
    request
        .params
        .clone()
        .ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))
}

fn respond<T: Serialize>(id: Option<String>, result: studio_core::Result<T>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => engine_error(id, err),
    }
}

fn engine_error(id: Option<String>, err: EngineError) -> Response {
    Response::error(id, err.code(), err.to_string())
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
