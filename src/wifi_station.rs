use std::net::Ipv4Addr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{error, info, warn};

use crate::collaborators::{AccessPoint, WifiAuth, WifiCollaborator};

const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// [`WifiCollaborator`] over the ESP-IDF station interface.
///
/// Both operations run on the command worker thread and block until the
/// radio is done, so replies over BLE reflect the real outcome.
pub struct WifiStation {
    wifi: StdMutex<BlockingWifi<EspWifi<'static>>>,
}

impl WifiStation {
    pub fn new(
        modem: impl Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, EspError> {
        let wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        let wifi = BlockingWifi::wrap(wifi, sys_loop)?;
        info!("Wi-Fi station initialized");
        Ok(Self {
            wifi: StdMutex::new(wifi),
        })
    }

    /// STA mode with an empty client configuration is enough for scanning.
    fn ensure_started(wifi: &mut BlockingWifi<EspWifi<'static>>) -> Result<()> {
        if !wifi.is_started()? {
            wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))
                .context("Wi-Fi configuration failed")?;
            wifi.start().context("Wi-Fi start failed")?;
        }
        Ok(())
    }

    fn join(
        wifi: &mut BlockingWifi<EspWifi<'static>>,
        ssid: &str,
        password: &str,
    ) -> Result<Ipv4Addr> {
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow!("SSID longer than 32 bytes"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("password longer than 64 bytes"))?,
            channel: None,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        if wifi.is_connected().unwrap_or(false) {
            let _ = wifi.disconnect();
        }
        wifi.set_configuration(&config)
            .context("Wi-Fi configuration failed")?;
        if !wifi.is_started()? {
            wifi.start().context("Wi-Fi start failed")?;
        }

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::try_join(wifi) {
                Ok(ip) => return Ok(ip),
                Err(err) => {
                    warn!(
                        "Connection attempt {} of {} failed: {}",
                        attempt, CONNECT_ATTEMPTS, err
                    );
                    let _ = wifi.disconnect();
                    if attempt < CONNECT_ATTEMPTS {
                        std::thread::sleep(RETRY_PAUSE);
                    }
                }
            }
        }
        bail!("all {} connection attempts failed", CONNECT_ATTEMPTS)
    }

    fn try_join(wifi: &mut BlockingWifi<EspWifi<'static>>) -> Result<Ipv4Addr, EspError> {
        wifi.connect()?;
        wifi.wait_netif_up()?;
        Ok(wifi.wifi().sta_netif().get_ip_info()?.ip)
    }
}

impl WifiCollaborator for WifiStation {
    fn scan(&self) -> Result<Vec<AccessPoint>> {
        let mut wifi = self.wifi.lock().unwrap_or_else(|e| e.into_inner());
        Self::ensure_started(&mut wifi)?;
        let found = wifi.scan().context("Wi-Fi scan failed")?;
        info!("Found {} networks", found.len());
        Ok(found
            .into_iter()
            .map(|ap| AccessPoint {
                ssid: ap.ssid.to_string(),
                mac: ap.bssid,
                rssi: ap.signal_strength,
                auth: map_auth(ap.auth_method),
            })
            .collect())
    }

    /// The registration token travels with the credentials for the
    /// application layer; the join itself does not use it.
    fn connect(&self, ssid: &str, password: &str, _token: &str, is_production: bool) -> bool {
        info!("Joining '{}' (production: {})", ssid, is_production);
        let mut wifi = self.wifi.lock().unwrap_or_else(|e| e.into_inner());
        match Self::join(&mut wifi, ssid, password) {
            Ok(ip) => {
                info!("✅ Station got IP {}", ip);
                true
            }
            Err(err) => {
                error!("Wi-Fi join failed: {:#}", err);
                false
            }
        }
    }
}

fn map_auth(auth: Option<AuthMethod>) -> WifiAuth {
    match auth.unwrap_or(AuthMethod::None) {
        AuthMethod::None => WifiAuth::Open,
        AuthMethod::WEP => WifiAuth::Wep,
        AuthMethod::WPA => WifiAuth::Wpa,
        AuthMethod::WPA2Personal => WifiAuth::Wpa2,
        AuthMethod::WPAWPA2Personal => WifiAuth::WpaWpa2,
        AuthMethod::WPA2Enterprise => WifiAuth::Wpa2Enterprise,
        AuthMethod::WPA3Personal => WifiAuth::Wpa3,
        AuthMethod::WPA2WPA3Personal => WifiAuth::Wpa2Wpa3,
        AuthMethod::WAPIPersonal => WifiAuth::Wapi,
    }
}
