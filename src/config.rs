// ─── Paso 3: Módulo Config — Configuración en tiempo de compilación ───
//
// Credenciales WiFi, endpoint de telemetría e intervalo de envío se fijan
// al compilar (variables de entorno leídas con option_env!). Todo vive en
// un solo struct inmutable que se pasa explícitamente al arranque.
//
// Los secretos (password WiFi, API key) se borran de memoria al dropearse
// gracias a Zeroize/ZeroizeOnDrop.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ─── Límites del driver WiFi ───

/// Capacidad del SSID en `ClientConfiguration` (heapless::String<32>).
pub const SSID_MAX_LEN: usize = 32;
/// Capacidad del password en `ClientConfiguration` (heapless::String<64>).
pub const PASSWORD_MAX_LEN: usize = 64;
/// WPA2 exige al menos 8 caracteres.
pub const PASSWORD_MIN_LEN: usize = 8;

// ─── Defaults ───

pub const DEFAULT_WIFI_SSID: &str = "teste";
pub const DEFAULT_WIFI_PASS: &str = "12345678";
pub const DEFAULT_TELEMETRY_URL: &str = "http://api.thingspeak.com/update";
pub const DEFAULT_TELEMETRY_API_KEY: &str = "YOUR_WRITE_API_KEY";
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

// ─── Nombres de las variables de entorno ───

pub const ENV_WIFI_SSID: &str = "WIFI_SSID";
pub const ENV_WIFI_PASS: &str = "WIFI_PASS";
pub const ENV_TELEMETRY_URL: &str = "TELEMETRY_URL";
pub const ENV_TELEMETRY_API_KEY: &str = "TELEMETRY_API_KEY";
pub const ENV_TELEMETRY_INTERVAL_MS: &str = "TELEMETRY_INTERVAL_MS";

// ─── Credenciales WiFi ───

/// SSID + password de la red a la que se conecta la estación.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiCredentials {
    ssid: String,
    password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Red abierta (sin password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Verifica que las credenciales entren en los buffers del driver.
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() {
            bail!("WiFi SSID not configured");
        }

        // Misma conversión que hace el driver con `try_into()`
        if heapless::String::<SSID_MAX_LEN>::try_from(self.ssid.as_str()).is_err() {
            bail!(
                "WiFi SSID too long: {} bytes (max {})",
                self.ssid.len(),
                SSID_MAX_LEN
            );
        }

        if self.is_open() {
            return Ok(());
        }

        if heapless::String::<PASSWORD_MAX_LEN>::try_from(self.password.as_str()).is_err() {
            bail!("WiFi password too long (max {} bytes)", PASSWORD_MAX_LEN);
        }

        if self.password.len() < PASSWORD_MIN_LEN {
            bail!(
                "WiFi password too short (min {} bytes for WPA2)",
                PASSWORD_MIN_LEN
            );
        }

        Ok(())
    }
}

// Nunca loguear el password, solo su longitud
impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .finish()
    }
}

// ─── Endpoint de telemetría ───

/// Destino de los reportes: URL, API key de escritura e intervalo.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TelemetryEndpoint {
    #[zeroize(skip)]
    url: String,
    api_key: String,
    #[zeroize(skip)]
    interval: Duration,
}

impl TelemetryEndpoint {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, interval: Duration) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            interval,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            bail!("Telemetry URL must be http:// or https://, got '{}'", self.url);
        }

        if self.api_key.is_empty() {
            bail!("Telemetry API key not configured");
        }

        // La key va sin codificar en el body del formulario
        if !self.api_key.bytes().all(is_unreserved) {
            bail!("Telemetry API key contains reserved characters (allowed: A-Z a-z 0-9 - _ . ~)");
        }

        if self.interval.is_zero() {
            bail!("Telemetry interval must be greater than zero");
        }

        Ok(())
    }
}

/// Caracteres que no necesitan codificarse en un formulario URL-encoded.
fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

impl fmt::Debug for TelemetryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEndpoint")
            .field("url", &self.url)
            .field("api_key_len", &self.api_key.len())
            .field("interval", &self.interval)
            .finish()
    }
}

// ─── Config completa ───

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub wifi: WifiCredentials,
    pub telemetry: TelemetryEndpoint,
}

impl Config {
    /// Arma y valida la configuración.
    pub fn new(wifi: WifiCredentials, telemetry: TelemetryEndpoint) -> Result<Self> {
        wifi.validate()?;
        telemetry.validate()?;
        Ok(Self { wifi, telemetry })
    }

    /// Configuración horneada en el binario al compilar.
    pub fn from_build_env() -> Result<Self> {
        Self::from_lookup(|key| match key {
            ENV_WIFI_SSID => option_env!("WIFI_SSID"),
            ENV_WIFI_PASS => option_env!("WIFI_PASS"),
            ENV_TELEMETRY_URL => option_env!("TELEMETRY_URL"),
            ENV_TELEMETRY_API_KEY => option_env!("TELEMETRY_API_KEY"),
            ENV_TELEMETRY_INTERVAL_MS => option_env!("TELEMETRY_INTERVAL_MS"),
            _ => None,
        })
    }

    /// Arma la configuración a partir de una función de lookup. Las claves
    /// ausentes toman el valor default.
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Result<Self> {
        let interval_ms = match lookup(ENV_TELEMETRY_INTERVAL_MS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid {ENV_TELEMETRY_INTERVAL_MS}: '{raw}'"))?,
            None => DEFAULT_INTERVAL_MS,
        };

        let wifi = WifiCredentials::new(
            lookup(ENV_WIFI_SSID).unwrap_or(DEFAULT_WIFI_SSID),
            lookup(ENV_WIFI_PASS).unwrap_or(DEFAULT_WIFI_PASS),
        );

        let telemetry = TelemetryEndpoint::new(
            lookup(ENV_TELEMETRY_URL).unwrap_or(DEFAULT_TELEMETRY_URL),
            lookup(ENV_TELEMETRY_API_KEY).unwrap_or(DEFAULT_TELEMETRY_API_KEY),
            Duration::from_millis(interval_ms),
        );

        Self::new(wifi, telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<&'a str> {
        move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(|_| None).unwrap();

        assert_eq!(config.wifi.ssid(), DEFAULT_WIFI_SSID);
        assert_eq!(config.wifi.password(), DEFAULT_WIFI_PASS);
        assert_eq!(config.telemetry.url(), DEFAULT_TELEMETRY_URL);
        assert_eq!(config.telemetry.api_key(), DEFAULT_TELEMETRY_API_KEY);
        assert_eq!(config.telemetry.interval(), Duration::from_millis(10_000));
    }

    #[test]
    fn overrides_are_applied() {
        let pairs = [
            (ENV_WIFI_SSID, "casa"),
            (ENV_WIFI_PASS, "supersecreto"),
            (ENV_TELEMETRY_API_KEY, "ABC123"),
            (ENV_TELEMETRY_INTERVAL_MS, "15000"),
        ];
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.wifi.ssid(), "casa");
        assert_eq!(config.telemetry.api_key(), "ABC123");
        assert_eq!(config.telemetry.interval(), Duration::from_secs(15));
    }

    #[test]
    fn rejects_bad_interval() {
        let pairs = [(ENV_TELEMETRY_INTERVAL_MS, "diez")];
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());

        let pairs = [(ENV_TELEMETRY_INTERVAL_MS, "0")];
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn rejects_bad_wifi_credentials() {
        assert!(WifiCredentials::new("", "12345678").validate().is_err());
        assert!(WifiCredentials::new("a".repeat(33), "12345678").validate().is_err());
        assert!(WifiCredentials::new("red", "corta").validate().is_err());
        assert!(WifiCredentials::new("red", "p".repeat(65)).validate().is_err());

        assert!(WifiCredentials::new("a".repeat(32), "p".repeat(64)).validate().is_ok());
        // Red abierta
        assert!(WifiCredentials::new("cafe", "").validate().is_ok());
    }

    #[test]
    fn rejects_bad_endpoint() {
        let interval = Duration::from_secs(10);
        assert!(TelemetryEndpoint::new("ftp://x", "KEY", interval).validate().is_err());
        assert!(TelemetryEndpoint::new("http://x", "", interval).validate().is_err());
        assert!(TelemetryEndpoint::new("http://x", "KEY", Duration::ZERO).validate().is_err());
        assert!(TelemetryEndpoint::new("https://x", "KEY", interval).validate().is_ok());
    }

    #[test]
    fn rejects_api_key_with_reserved_characters() {
        let interval = Duration::from_secs(10);

        for key in ["AB+C/D=", "a b", "k&field1=9", "clave%20"] {
            assert!(
                TelemetryEndpoint::new("http://x", key, interval).validate().is_err(),
                "key {key:?} should be rejected"
            );
        }

        assert!(TelemetryEndpoint::new("http://x", "W2OPZCBARZ69YF99", interval)
            .validate()
            .is_ok());
        assert!(TelemetryEndpoint::new("http://x", "k-_.~", interval).validate().is_ok());

        let pairs = [(ENV_TELEMETRY_API_KEY, "AB+C/D=")];
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = WifiCredentials::new("casa", "supersecreto");
        let endpoint = TelemetryEndpoint::new("http://x", "W2OPZCBARZ", Duration::from_secs(1));

        let rendered = format!("{creds:?} {endpoint:?}");
        assert!(!rendered.contains("supersecreto"));
        assert!(!rendered.contains("W2OPZCBARZ"));
        assert!(rendered.contains("casa"));
    }
}
