//! Provisioning HTTP server.
//!
//! Serves the setup page, the device-info and set-wifi APIs, and a
//! catch-all that bounces connectivity probes to the portal. Uses
//! `tiny_http`, which works on both host and ESP32 (via std::net).
//!
//! Routing is done by [`handle`], a plain function over [`PortalRequest`],
//! so every route can be tested without a socket.

use super::form::WifiForm;
use super::redirect::{classify, redirect_page, RedirectStrategy};
use crate::config::device::{AP_IP, DEVICE_NAME};
use crate::kv::{KvStore, StoreError};
use crate::status::{StatusBits, StatusFlags};
use crate::wifi::CredentialStore;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Request, Response, Server};

/// Standard HTTP port.
pub const HTTP_PORT: u16 = 80;

/// Largest accepted request body.
pub const MAX_BODY_LEN: usize = 512;

/// Stack size for the server thread.
const HTTP_STACK_SIZE: usize = 8192;

const SETUP_PAGE: &str = include_str!("page.html");

const NO_STORE: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Where provisioned credentials go.
pub trait CredentialSink: Send + Sync {
    fn save_credentials(&self, ssid: &str, password: &str) -> Result<(), StoreError>;
}

impl<S: KvStore> CredentialSink for CredentialStore<S> {
    fn save_credentials(&self, ssid: &str, password: &str) -> Result<(), StoreError> {
        self.save(ssid, password)
    }
}

/// Everything the request handler needs.
pub struct PortalContext {
    pub credentials: Arc<dyn CredentialSink>,
    pub flags: Arc<StatusFlags>,
    pub device_name: String,
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
}

impl PortalContext {
    /// Context for the access point at [`AP_IP`].
    pub fn new(credentials: Arc<dyn CredentialSink>, flags: Arc<StatusFlags>, mac: [u8; 6]) -> Self {
        Self {
            credentials,
            flags,
            device_name: DEVICE_NAME.to_string(),
            mac,
            ip: AP_IP,
        }
    }

    fn portal_url(&self) -> String {
        format!("http://{}/", self.ip)
    }
}

/// Format a MAC as `AA:BB:CC:DD:EE:FF`.
pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// The parts of a request the router looks at.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub method: Method,
    pub url: String,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    /// `None` when the body exceeded [`MAX_BODY_LEN`].
    pub body: Option<Vec<u8>>,
}

impl PortalRequest {
    /// Convenience constructor for a bodiless GET.
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            host: None,
            user_agent: None,
            body: Some(Vec::new()),
        }
    }

    fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("")
    }
}

/// A fully rendered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl PortalResponse {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
        Self::new(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(body)
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Serialize)]
struct DeviceInfo<'a> {
    status: &'static str,
    device_name: &'a str,
    mac: String,
    ip: String,
}

#[derive(Serialize)]
struct ApiResult {
    status: &'static str,
    message: String,
}

impl ApiResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok",
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

/// Route one request.
pub fn handle(ctx: &PortalContext, request: &PortalRequest) -> PortalResponse {
    match (&request.method, request.path()) {
        (Method::Get, "/") => PortalResponse::new(200)
            .header("Content-Type", "text/html; charset=utf-8")
            .header("Cache-Control", "no-store")
            .body(SETUP_PAGE),
        (Method::Get, "/api/device-info") => PortalResponse::json(
            200,
            &DeviceInfo {
                status: "ok",
                device_name: &ctx.device_name,
                mac: format_mac(ctx.mac),
                ip: ctx.ip.to_string(),
            },
        ),
        (Method::Post, "/api/set-wifi") => set_wifi(ctx, request),
        (Method::Get, _) => captive_redirect(ctx, request),
        _ => PortalResponse::new(405)
            .header("Allow", "GET")
            .body("Method Not Allowed"),
    }
}

fn set_wifi(ctx: &PortalContext, request: &PortalRequest) -> PortalResponse {
    let body = match &request.body {
        None => {
            return PortalResponse::json(400, &ApiResult::error("request body too large"));
        }
        Some(body) if body.is_empty() => {
            return PortalResponse::json(400, &ApiResult::error("empty request body"));
        }
        Some(body) => String::from_utf8_lossy(body),
    };

    let form = match WifiForm::parse(&body) {
        Ok(form) => form,
        Err(e) => return PortalResponse::json(400, &ApiResult::error(e.to_string())),
    };

    info!(
        "Received Wi-Fi configuration, SSID: {}, password length: {}",
        form.ssid,
        form.password.len()
    );

    match ctx.credentials.save_credentials(&form.ssid, &form.password) {
        Ok(()) => {
            ctx.flags.set(StatusBits::CONFIG_SAVED);
            PortalResponse::json(
                200,
                &ApiResult::ok("Configuration saved, the device will restart and connect"),
            )
        }
        Err(e) => {
            warn!("Failed to save credentials: {}", e);
            PortalResponse::json(
                200,
                &ApiResult::error(format!("Failed to save configuration: {}", e)),
            )
        }
    }
}

fn captive_redirect(ctx: &PortalContext, request: &PortalRequest) -> PortalResponse {
    let strategy = classify(request.host.as_deref(), request.user_agent.as_deref());
    info!(
        "Captive request {} (host {:?}) -> {:?}",
        request.url, request.host, strategy
    );

    let target = ctx.portal_url();
    let response = match strategy {
        RedirectStrategy::Found => PortalResponse::new(302).header("Location", target),
        page => PortalResponse::new(200)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(redirect_page(page, &target).unwrap_or_default()),
    };

    response
        .header("Cache-Control", NO_STORE)
        .header("Pragma", "no-cache")
        .header("Expires", "0")
        .header("Connection", "close")
}

/// Errors starting the portal server.
#[derive(Debug)]
pub enum PortalError {
    /// The listening socket could not be bound.
    Bind(String),
    /// Thread or socket failure.
    Io(io::Error),
}

impl From<io::Error> for PortalError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(msg) => write!(f, "failed to bind portal server: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for PortalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Provisioning HTTP server.
///
/// Runs in a background thread. Drop it to stop the server.
pub struct PortalServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
}

impl PortalServer {
    /// Start serving on `bind_addr`.
    pub fn start(bind_addr: SocketAddr, ctx: Arc<PortalContext>) -> Result<Self, PortalError> {
        let server = Server::http(bind_addr).map_err(|e| PortalError::Bind(e.to_string()))?;
        let local_addr = server.server_addr().to_ip();

        info!("Portal server listening on http://{}/", bind_addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("portal-http".into())
            .stack_size(HTTP_STACK_SIZE)
            .spawn(move || Self::run_server(server, ctx, shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            local_addr,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn run_server(server: Server, ctx: Arc<PortalContext>, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Portal server shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => Self::serve(&ctx, request),
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    fn serve(ctx: &PortalContext, mut request: Request) {
        let header = |name: &'static str| {
            request
                .headers()
                .iter()
                .find(|h| h.field.equiv(name))
                .map(|h| h.value.as_str().to_string())
        };
        let host = header("Host");
        let user_agent = header("User-Agent");

        let mut buf = Vec::new();
        let limit = MAX_BODY_LEN as u64 + 1;
        let body = match request.as_reader().take(limit).read_to_end(&mut buf) {
            Ok(_) if buf.len() <= MAX_BODY_LEN => Some(buf),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                Some(Vec::new())
            }
        };

        let portal_request = PortalRequest {
            method: request.method().clone(),
            url: request.url().to_string(),
            host,
            user_agent,
            body,
        };
        let rendered = handle(ctx, &portal_request);

        let mut response = Response::from_data(rendered.body).with_status_code(rendered.status);
        for (name, value) in &rendered.headers {
            match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                Ok(h) => response.add_header(h),
                Err(()) => warn!("Skipping invalid header {}", name),
            }
        }

        if let Err(e) = request.respond(response) {
            warn!("Failed to send response: {}", e);
        }
    }

    /// Stop the server.
    ///
    /// Note: May take up to 100ms due to polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PortalServer {
    fn drop(&mut self) {
        self.stop();
    }
}
