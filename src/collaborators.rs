use anyhow::Result;

/// Authentication mode of a scanned access point, reduced to the strings
/// the companion app renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiAuth {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2,
    Wpa2Enterprise,
    Wpa3,
    Wpa2Wpa3,
    Wapi,
}

impl WifiAuth {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiAuth::Open => "Open",
            WifiAuth::Wep => "WEP",
            WifiAuth::Wpa => "WPA",
            WifiAuth::Wpa2 => "WPA2",
            WifiAuth::WpaWpa2 => "WPA/WPA2",
            WifiAuth::Wpa2Enterprise => "WPA2-Enterprise",
            WifiAuth::Wpa3 => "WPA3",
            WifiAuth::Wpa2Wpa3 => "WPA2/WPA3",
            WifiAuth::Wapi => "WAPI",
        }
    }
}

/// One access point from a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    pub mac: [u8; 6],
    pub rssi: i8,
    pub auth: WifiAuth,
}

impl AccessPoint {
    /// Colon-separated uppercase MAC, the format the scan response uses.
    pub fn mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.mac[0], self.mac[1], self.mac[2], self.mac[3], self.mac[4], self.mac[5]
        )
    }
}

/// One measured value, e.g. ("temperature_c", 21.4).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Readings from one physical or synthesized sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Short sensor identifier, e.g. "sht45".
    pub sensor: String,
    pub measurements: Vec<Measurement>,
    /// True when the values were synthesized rather than measured.
    pub synthetic: bool,
}

/// Snapshot of every sensor at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub timestamp_ms: u64,
    pub readings: Vec<SensorReading>,
}

/// Wi-Fi primitives the dispatcher drives. The device implementation brings
/// the station interface up lazily so a scan works before provisioning.
pub trait WifiCollaborator: Send + Sync {
    fn scan(&self) -> Result<Vec<AccessPoint>>;

    /// Blocking connect attempt; returns whether an IP-bearing link came up.
    fn connect(&self, ssid: &str, password: &str, token: &str, is_production: bool) -> bool;
}

/// Source of the most recent sensor snapshot.
pub trait SensorCollaborator: Send + Sync {
    fn latest_snapshot(&self) -> SensorSnapshot;
}

/// Receiver for device-command payloads forwarded verbatim off the channel.
pub trait DeviceCommandHandler: Send + Sync {
    fn handle(&self, raw_json: &str) -> Result<()>;
}
