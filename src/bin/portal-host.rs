//! Run the provisioning portal on a development machine.
//!
//! Serves the setup page and the captive DNS responder backed by a
//! [`FileStore`], so the provisioning flow can be exercised with a browser
//! without flashing a device. Exits once credentials have been saved.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portal-host -- --http-port 8080 --dns-port 5353
//! ```

#![cfg(not(target_os = "espidf"))]

use audio_link_esp32::persistence_host::FileStore;
use audio_link_esp32::portal::{CaptivePortal, PortalContext, DNS_PORT, HTTP_PORT};
use audio_link_esp32::wifi::CredentialStore;
use audio_link_esp32::{StatusBits, StatusFlags};
use log::{error, info};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

/// Locally administered MAC reported by the host portal.
const HOST_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0xA1, 0xB2, 0xC3];

struct Options {
    dns_port: u16,
    http_port: u16,
    store: Option<PathBuf>,
}

fn usage(program: &str) -> ! {
    println!("Usage:");
    println!("  {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  --dns-port <PORT>   DNS responder port (default {})", DNS_PORT);
    println!("  --http-port <PORT>  HTTP server port (default {})", HTTP_PORT);
    println!("  --store <DIR>       credential directory (default ~/.audio-link-esp32)");
    exit(0);
}

fn port_value(flag: &str, value: Option<&String>) -> u16 {
    match value.map(|v| v.parse::<u16>()) {
        Some(Ok(port)) => port,
        _ => {
            eprintln!("Error: {} expects a port number", flag);
            exit(2);
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .and_then(|s| s.split('/').next_back())
        .unwrap_or("portal-host")
        .to_string();

    let mut options = Options {
        dns_port: DNS_PORT,
        http_port: HTTP_PORT,
        store: None,
    };
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dns-port" => options.dns_port = port_value(arg, iter.next()),
            "--http-port" => options.http_port = port_value(arg, iter.next()),
            "--store" => match iter.next() {
                Some(dir) => options.store = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("Error: --store expects a directory");
                    exit(2);
                }
            },
            "-h" | "--help" => usage(&program),
            other => {
                eprintln!("Error: unknown argument '{}'", other);
                usage(&program);
            }
        }
    }
    options
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let options = parse_args();

    let backend = match &options.store {
        Some(dir) => FileStore::open(dir),
        None => FileStore::open_default(),
    };
    let backend = match backend {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open credential store: {}", e);
            exit(1);
        }
    };
    info!("Credentials stored in {}", backend.dir().display());

    let flags = Arc::new(StatusFlags::new());
    let credentials = Arc::new(CredentialStore::new(backend));
    let mut ctx = PortalContext::new(credentials.clone(), flags.clone(), HOST_MAC);
    ctx.ip = Ipv4Addr::LOCALHOST;

    let mut portal = match CaptivePortal::start(Arc::new(ctx), options.dns_port, options.http_port)
    {
        Ok(portal) => portal,
        Err(e) => {
            error!("Failed to start portal: {}", e);
            error!("Ports below 1024 usually need elevated privileges; try --http-port 8080 --dns-port 5353");
            exit(1);
        }
    };

    info!(
        "Portal running at http://localhost:{}/ (DNS on port {})",
        options.http_port, options.dns_port
    );

    while !flags
        .wait_any(StatusBits::CONFIG_SAVED, Duration::from_secs(1))
        .contains(StatusBits::CONFIG_SAVED)
    {}

    match credentials.has_valid() {
        Some(credential) => info!("Saved credentials for SSID '{}'", credential.ssid()),
        None => error!("Save reported but credentials do not read back"),
    }
    // Let the browser receive its response before shutting down.
    std::thread::sleep(Duration::from_secs(1));
    portal.stop();
}
