//! Captive provisioning portal.
//!
//! While the access point is up, [`DnsResponder`] resolves every name to the
//! device and [`PortalServer`] serves the setup page and credential API.
//!
//! # Components
//!
//! - [`dns`] - catch-all DNS responder
//! - [`http`] - setup page, APIs and captive redirects
//! - [`redirect`] - per-vendor redirect heuristics
//! - [`form`] - form body decoding

pub mod dns;
pub mod form;
pub mod http;
pub mod redirect;

pub use dns::{DnsError, DnsQuery, DnsResponder, DNS_PORT, MAX_UDP_MESSAGE};
pub use form::{url_decode, FormError, WifiForm};
pub use http::{
    format_mac, handle, CredentialSink, PortalContext, PortalError, PortalRequest, PortalResponse,
    PortalServer, HTTP_PORT, MAX_BODY_LEN,
};
pub use redirect::{classify, redirect_page, RedirectStrategy};

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// DNS responder and HTTP server running together.
pub struct CaptivePortal {
    dns: DnsResponder,
    http: PortalServer,
}

impl CaptivePortal {
    /// Start both services on all interfaces.
    pub fn start(
        ctx: Arc<PortalContext>,
        dns_port: u16,
        http_port: u16,
    ) -> Result<Self, PortalError> {
        let ip = ctx.ip;
        let any = Ipv4Addr::UNSPECIFIED;
        let http = PortalServer::start(SocketAddr::from((any, http_port)), ctx)?;
        let dns = DnsResponder::start(SocketAddr::from((any, dns_port)), ip)?;
        Ok(Self { dns, http })
    }

    /// Stop both services.
    pub fn stop(&mut self) {
        self.dns.stop();
        self.http.stop();
    }
}
