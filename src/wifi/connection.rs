//! ESP-IDF Wi-Fi driver.
//!
//! Wraps [`EspWifi`] for station and access-point mode and forwards system
//! event loop notifications to the [`NetworkModeManager`](super::NetworkModeManager).

use super::ap::AccessPointConfig;
use super::manager::{
    DisconnectReason, StationEvent, StationEventSink, StationInfo, WifiDriver, WifiError,
};
use crate::config::NetworkCredential;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::ipv4::Ipv4Addr as EspIpv4Addr;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent,
};
use log::{debug, info};
use std::net::Ipv4Addr;

/// Wi-Fi driver backed by ESP-IDF.
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    ssid: Option<String>,
}

impl EspWifiDriver {
    /// Create the driver. The NVS partition lets ESP-IDF cache calibration data.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, WifiError> {
        let wifi = EspWifi::new(modem, sysloop, Some(nvs))?;
        Ok(Self { wifi, ssid: None })
    }
}

impl WifiDriver for EspWifiDriver {
    fn start_station(&mut self, credential: &NetworkCredential) -> Result<(), WifiError> {
        let auth_method = if credential.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let config = Configuration::Client(ClientConfiguration {
            ssid: credential
                .ssid()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: credential
                .password()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });

        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi.set_configuration(&config)?;
        self.wifi.start()?;
        self.ssid = Some(credential.ssid().to_string());
        Ok(())
    }

    fn connect(&mut self) -> Result<(), WifiError> {
        self.wifi.connect()?;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        let auth_method = if config.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let ap = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            channel: config.channel,
            auth_method,
            max_connections: config.max_connections,
            ..Default::default()
        });

        self.wifi.set_configuration(&ap)?;
        self.wifi.start()?;
        self.ssid = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WifiError> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        Ok(())
    }

    fn mac_address(&self) -> Result<[u8; 6], WifiError> {
        Ok(self.wifi.ap_netif().get_mac()?)
    }

    fn station_info(&self) -> Option<StationInfo> {
        let ip_info = self.wifi.sta_netif().get_ip_info().ok()?;
        let ip: EspIpv4Addr = ip_info.ip;
        Some(StationInfo {
            ip: Ipv4Addr::from(ip.octets()),
            ssid: self.ssid.clone()?,
        })
    }
}

/// Keeps the event loop subscriptions alive.
pub struct EventSubscriptions {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

/// Forward Wi-Fi and IP events from the system event loop into `sink`.
pub fn subscribe_station_events(
    sysloop: &EspSystemEventLoop,
    sink: StationEventSink,
) -> Result<EventSubscriptions, WifiError> {
    let wifi_sink = sink.clone();
    let wifi = sysloop.subscribe::<WifiEvent, _>(move |event| {
        let forwarded = match event {
            WifiEvent::StaStarted => Some(StationEvent::Started),
            WifiEvent::StaDisconnected(info) => Some(StationEvent::Disconnected(
                DisconnectReason::from_code(info.reason() as u16),
            )),
            _ => None,
        };
        if let Some(event) = forwarded {
            let _ = wifi_sink.send(event);
        }
    })?;

    let ip = sysloop.subscribe::<IpEvent, _>(move |event| match event {
        IpEvent::DhcpIpAssigned(assignment) => {
            let ip = assignment.ip();
            let _ = sink.send(StationEvent::GotIp(Ipv4Addr::from(ip.octets())));
        }
        IpEvent::DhcpIpDeassigned(_) => {
            let _ = sink.send(StationEvent::LostIp);
        }
        _ => {}
    })?;

    info!("Subscribed to Wi-Fi and IP events");
    debug!("Station events are forwarded to the mode manager");
    Ok(EventSubscriptions { _wifi: wifi, _ip: ip })
}
