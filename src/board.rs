// ─── Paso 3: Módulo Board — El ESP32 real detrás de `Platform` ───
//
// Junta los periféricos que usa el arranque (pin del sensor, modem,
// event loop) y los entrega una sola vez a cada módulo.

use anyhow::{anyhow, Result};
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use std::thread::JoinHandle;

use crate::config::WifiCredentials;
use crate::pulse_counter::{PulseCounter, PulseInput};
use crate::startup::Platform;
use crate::storage::{EspFlash, FlashError, FlashStorage};
use crate::telemetry::{self, EspHttpTransport, Reporter};
use crate::wifi::{self, Station};

pub struct EspPlatform {
    flash: EspFlash,
    pulse_pin: Option<AnyIOPin>,
    modem: Option<Modem>,
    sysloop: EspSystemEventLoop,
}

impl EspPlatform {
    pub fn new(pulse_pin: AnyIOPin, modem: Modem, sysloop: EspSystemEventLoop) -> Self {
        Self {
            flash: EspFlash,
            pulse_pin: Some(pulse_pin),
            modem: Some(modem),
            sysloop,
        }
    }
}

impl FlashStorage for EspPlatform {
    fn init_flash(&mut self) -> Result<(), FlashError> {
        self.flash.init_flash()
    }

    fn erase_flash(&mut self) -> Result<(), FlashError> {
        self.flash.erase_flash()
    }
}

impl Platform for EspPlatform {
    type PulseInput = PulseInput;
    type Network = Station;
    type Transport = EspHttpTransport;
    type Task = JoinHandle<()>;

    fn attach_pulse_input(&mut self, counter: &'static PulseCounter) -> Result<PulseInput> {
        let pin = self
            .pulse_pin
            .take()
            .ok_or_else(|| anyhow!("Pulse pin already in use"))?;
        PulseInput::attach(pin, counter)
    }

    fn start_network(&mut self, credentials: WifiCredentials) -> Result<Station> {
        let modem = self
            .modem
            .take()
            .ok_or_else(|| anyhow!("Modem already in use"))?;

        // NVS ya está inicializada: take() solo obtiene el handle
        let nvs = EspDefaultNvsPartition::take()?;

        wifi::start(credentials, modem, self.sysloop.clone(), nvs)
    }

    fn transport(&mut self) -> EspHttpTransport {
        EspHttpTransport
    }

    fn spawn_reporter(&mut self, reporter: Reporter<EspHttpTransport>) -> Result<JoinHandle<()>> {
        telemetry::spawn(reporter)
    }
}
