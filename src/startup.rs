// ─── Paso 3: Módulo Startup — Secuencia de arranque ───
//
// Orden fijo, una sola vez al bootear:
//   1. NVS (con borrado + reintento si hace falta)
//   2. GPIO del sensor + ISR
//   3. WiFi station
//   4. Tarea de telemetría en background
//
// Cualquier error en estos pasos es fatal: se propaga hasta main().

use anyhow::{Context, Result};
use log::info;

use crate::config::{Config, WifiCredentials};
use crate::pulse_counter::PulseCounter;
use crate::storage::{self, FlashStorage};
use crate::telemetry::{Reporter, Transport};

/// Todo lo que el arranque necesita del hardware.
///
/// En el chip lo implementa `board::EspPlatform`; en los tests, un mock.
pub trait Platform: FlashStorage {
    /// Mantiene vivo el pin con la ISR.
    type PulseInput;
    /// Mantiene viva la estación WiFi y sus suscripciones.
    type Network;
    type Transport: Transport + Send + 'static;
    /// Handle de la tarea de telemetría.
    type Task;

    fn attach_pulse_input(&mut self, counter: &'static PulseCounter) -> Result<Self::PulseInput>;

    fn start_network(&mut self, credentials: WifiCredentials) -> Result<Self::Network>;

    fn transport(&mut self) -> Self::Transport;

    fn spawn_reporter(&mut self, reporter: Reporter<Self::Transport>) -> Result<Self::Task>;
}

/// Recursos vivos del dispositivo. Dropear esto apaga el pin y el WiFi.
pub struct Device<P: Platform> {
    pub pulse_input: P::PulseInput,
    pub network: P::Network,
    pub reporter: P::Task,
}

/// Corre la secuencia de arranque y devuelve los recursos vivos.
/// No se queda en loop: el trabajo continuo lo hacen la ISR, los
/// callbacks de WiFi y la tarea de telemetría.
pub fn boot<P: Platform>(
    platform: &mut P,
    config: Config,
    counter: &'static PulseCounter,
) -> Result<Device<P>> {
    let Config { wifi, telemetry } = config;

    // ─── 1. Storage ───

    storage::init_with_recovery(platform)?;

    // ─── 2. Sensor ───

    let pulse_input = platform
        .attach_pulse_input(counter)
        .context("Failed to set up pulse input")?;

    // ─── 3. WiFi ───

    let network = platform
        .start_network(wifi)
        .context("Failed to start WiFi")?;

    // ─── 4. Telemetría ───

    let interval = telemetry.interval();
    let transport = platform.transport();
    let reporter = platform
        .spawn_reporter(Reporter::new(counter, telemetry, transport))
        .context("Failed to launch telemetry reporter")?;

    info!(
        "Startup complete, reporting every {} ms",
        interval.as_millis()
    );

    Ok(Device {
        pulse_input,
        network,
        reporter,
    })
}
