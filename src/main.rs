// ─── Paso 3: Pulse Telemetry — Contar pulsos y reportarlos por WiFi ───
//
// El ESP32 ya sabe conectarse a WiFi (paso 2). Ahora cuenta los pulsos de
// un sensor en GPIO4 (flanco de subida, por interrupción) y cada 10 s
// manda la cuenta acumulada a ThingSpeak con un POST.
//
// Módulos nuevos: pulse_counter, telemetry, storage, startup, board

#[cfg(target_os = "espidf")]
mod firmware {
    use esp_idf_hal::gpio::IOPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;

    #[allow(unused_imports)]
    use esp_idf_svc::sys as _;

    use log::{error, info};
    use std::time::Duration;

    use pulse_telemetry::board::EspPlatform;
    use pulse_telemetry::config::Config;
    use pulse_telemetry::pulse_counter::PulseCounter;
    use pulse_telemetry::startup::{self, Device};

    /// Contador global: la ISR necesita una referencia 'static.
    static PULSES: PulseCounter = PulseCounter::new();

    // ─── Punto de entrada ───
    //
    // Patrón main() → run(): main() no retorna Result, así que no puede usar ?.
    // Delegamos el arranque a run() que sí retorna Result.
    // Si run() falla, logueamos el error, esperamos 10s y reiniciamos el chip.

    pub fn main() {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("paso-03-pulse-telemetry");

        match run() {
            Ok(device) => {
                info!("WiFi link state: {:?}", device.network.state());

                // La tarea de telemetría no termina nunca. Esperarla mantiene
                // vivos el pin, el WiFi y las suscripciones (RAII).
                let Device {
                    pulse_input,
                    network,
                    reporter,
                } = device;

                if reporter.join().is_err() {
                    error!("Telemetry task panicked");
                }

                drop((pulse_input, network));
                restart();
            }
            Err(e) => {
                error!("Error fatal: {:?}", e);
                restart();
            }
        }
    }

    fn run() -> anyhow::Result<Device<EspPlatform>> {
        let config = Config::from_build_env()?;
        info!("Config: {:?}", config);

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;

        // Sensor en GPIO4
        let mut platform = EspPlatform::new(
            peripherals.pins.gpio4.downgrade(),
            peripherals.modem,
            sysloop,
        );

        startup::boot(&mut platform, config, &PULSES)
    }

    fn restart() {
        error!("Reiniciando en 10 segundos...");
        std::thread::sleep(Duration::from_secs(10));
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }
}

#[cfg(target_os = "espidf")]
fn main() {
    firmware::main();
}

// En el host solo existe la librería (para los tests).
#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("paso-03-pulse-telemetry runs on ESP-IDF targets only; use `cargo test` on the host");
}
