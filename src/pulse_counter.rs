// ─── Paso 3: Módulo Pulse Counter — Conteo de flancos por interrupción ───
//
// El sensor (KY-025 o similar) genera un pulso por evento. Cada flanco de
// subida dispara una interrupción que suma 1 a un contador atómico.
// La tarea de telemetría lo lee y lo resetea en una sola operación.

use std::sync::atomic::{AtomicU32, Ordering};

/// Contador de pulsos compartido entre la ISR (escritor) y el reporter
/// (lector/reseteador).
///
/// La ISR solo hace `fetch_add`, el reporter hace `swap(0)`: un flanco que
/// llega entre la lectura y el reset nunca se pierde.
#[derive(Debug, Default)]
pub struct PulseCounter {
    count: AtomicU32,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Registra un flanco. Seguro en contexto de interrupción: no bloquea
    /// ni aloca.
    #[inline]
    pub fn record_edge(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Devuelve lo acumulado y deja el contador en cero.
    pub fn take(&self) -> u32 {
        self.count.swap(0, Ordering::Relaxed)
    }

    /// Valor actual sin resetear.
    pub fn peek(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

// ─── Lado hardware: GPIO + ISR ───

#[cfg(target_os = "espidf")]
pub use self::isr::PulseInput;

#[cfg(target_os = "espidf")]
mod isr {
    use super::PulseCounter;
    use anyhow::{Context, Result};
    use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
    use esp_idf_svc::sys::{
        esp, gpio_install_isr_service, gpio_intr_enable, gpio_isr_handler_add,
        ESP_ERR_INVALID_STATE,
    };
    use log::info;

    /// Pin de entrada con la ISR enganchada.
    ///
    /// Mientras exista, el pin queda configurado. Si se dropea, el
    /// PinDriver resetea el pin y se dejan de contar flancos (RAII).
    pub struct PulseInput {
        _driver: PinDriver<'static, AnyIOPin, Input>,
    }

    impl PulseInput {
        /// Configura el pin (input, pull-down, flanco de subida) e instala
        /// la ISR que alimenta a `counter`.
        pub fn attach(pin: AnyIOPin, counter: &'static PulseCounter) -> Result<Self> {
            let mut driver = PinDriver::input(pin)?;

            // Pull-down: sin señal el pin lee 0, el pulso del sensor lo sube
            driver.set_pull(Pull::Down)?;
            driver.set_interrupt_type(InterruptType::PosEdge)?;

            let pin_num = driver.pin();

            // El servicio de ISR es global: si ya estaba instalado, ESP-IDF
            // devuelve ESP_ERR_INVALID_STATE y lo aceptamos.
            match esp!(unsafe { gpio_install_isr_service(0) }) {
                Ok(()) => {}
                Err(e) if e.code() == ESP_ERR_INVALID_STATE as i32 => {}
                Err(e) => return Err(e).context("Failed to install GPIO ISR service"),
            }

            // El contador es 'static, así que el puntero vive tanto como la ISR
            esp!(unsafe {
                gpio_isr_handler_add(
                    pin_num,
                    Some(on_rising_edge),
                    counter as *const PulseCounter as *mut core::ffi::c_void,
                )
            })
            .context("Failed to attach pulse ISR handler")?;

            esp!(unsafe { gpio_intr_enable(pin_num) }).context("Failed to enable GPIO interrupt")?;

            info!("Pulse input configured on GPIO{}", pin_num);

            Ok(Self { _driver: driver })
        }
    }

    /// Corre en contexto de interrupción: solo suma 1.
    unsafe extern "C" fn on_rising_edge(arg: *mut core::ffi::c_void) {
        let counter = &*(arg as *const PulseCounter);
        counter.record_edge();
    }
}
