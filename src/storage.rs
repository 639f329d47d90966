// ─── Paso 3: Módulo Storage — Inicialización de NVS ───
//
// NVS (Non-Volatile Storage) es la "flash persistente" del ESP32.
// El driver WiFi guarda ahí su calibración y la última configuración,
// así que tiene que estar inicializada antes de levantar la red.
//
// Si la partición está llena o fue escrita por otra versión de ESP-IDF,
// se borra y se reintenta una sola vez. Cualquier otro error es fatal.

use anyhow::{Context, Result};
use log::{info, warn};
use std::fmt;

/// Resultado de `nvs_flash_init` clasificado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// ESP_ERR_NVS_NO_FREE_PAGES
    NoFreePages,
    /// ESP_ERR_NVS_NEW_VERSION_FOUND
    NewVersionFound,
    /// Cualquier otro código `esp_err_t`.
    Other(i32),
}

impl FlashError {
    /// Los dos casos que se arreglan borrando la partición.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoFreePages | Self::NewVersionFound)
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreePages => write!(f, "NVS partition has no free pages"),
            Self::NewVersionFound => write!(f, "NVS partition written by a newer format"),
            Self::Other(code) => write!(f, "NVS error (esp_err_t {code})"),
        }
    }
}

impl std::error::Error for FlashError {}

/// Operaciones mínimas sobre la flash que necesita el arranque.
pub trait FlashStorage {
    fn init_flash(&mut self) -> Result<(), FlashError>;
    fn erase_flash(&mut self) -> Result<(), FlashError>;
}

/// Inicializa NVS; si el error es recuperable borra y reintenta una vez.
pub fn init_with_recovery<F: FlashStorage + ?Sized>(flash: &mut F) -> Result<()> {
    match flash.init_flash() {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => {
            warn!("{e}, erasing NVS partition...");
            flash.erase_flash().context("Failed to erase NVS partition")?;
            flash
                .init_flash()
                .context("NVS init failed again after erase")?;
        }
        Err(e) => return Err(e).context("Failed to initialize NVS"),
    }

    info!("NVS initialized");
    Ok(())
}

// ─── Implementación real: nvs_flash_* de ESP-IDF ───

#[cfg(target_os = "espidf")]
pub use self::nvs::EspFlash;

#[cfg(target_os = "espidf")]
mod nvs {
    use super::{FlashError, FlashStorage};
    use esp_idf_svc::sys::{
        nvs_flash_erase, nvs_flash_init, ESP_ERR_NVS_NEW_VERSION_FOUND, ESP_ERR_NVS_NO_FREE_PAGES,
        ESP_OK,
    };

    /// Partición NVS default.
    #[derive(Debug, Default)]
    pub struct EspFlash;

    fn classify(code: i32) -> Result<(), FlashError> {
        match code {
            c if c == ESP_OK as i32 => Ok(()),
            c if c == ESP_ERR_NVS_NO_FREE_PAGES as i32 => Err(FlashError::NoFreePages),
            c if c == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 => Err(FlashError::NewVersionFound),
            c => Err(FlashError::Other(c)),
        }
    }

    impl FlashStorage for EspFlash {
        fn init_flash(&mut self) -> Result<(), FlashError> {
            classify(unsafe { nvs_flash_init() })
        }

        fn erase_flash(&mut self) -> Result<(), FlashError> {
            classify(unsafe { nvs_flash_erase() })
        }
    }
}
