// ─── Paso 3: Módulo Telemetry — Reporte periódico por HTTP ───
//
// Cada intervalo:
//   1. Toma (lee + resetea) el contador de pulsos
//   2. Arma el body `api_key=<KEY>&field1=<N>` (form URL-encoded)
//   3. Hace un POST al endpoint (ThingSpeak /update por default)
//   4. Loguea el resultado y duerme hasta el próximo ciclo
//
// Un envío fallido no se reintenta: ese intervalo se pierde.

use anyhow::Result;
use log::{error, info, warn};
use std::thread;

use crate::config::TelemetryEndpoint;
use crate::pulse_counter::PulseCounter;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Nombre de la tarea FreeRTOS del reporter (null-terminated para ESP-IDF).
pub const REPORTER_TASK_NAME: &[u8] = b"monitor-count\0";
/// Stack de la tarea: el cliente HTTP necesita más que los 4 KB de C.
pub const REPORTER_STACK_SIZE: usize = 8192;
pub const REPORTER_PRIORITY: u8 = 10;

// ─── Payload ───

/// Arma el body del POST: `api_key=<KEY>&field1=<count>`.
///
/// La key va tal cual: `TelemetryEndpoint::validate` ya rechazó las que
/// tienen caracteres reservados.
pub fn build_payload(api_key: &str, count: u32) -> String {
    format!("api_key={api_key}&field1={count}")
}

// ─── Transporte ───

/// Respuesta HTTP mínima: status + primeros bytes del body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Un POST de formulario. Cada llamada usa un cliente nuevo y lo libera
/// al terminar, salga bien o mal.
pub trait Transport {
    fn post_form(&mut self, url: &str, body: &str) -> Result<TransportResponse>;
}

/// Cómo terminó un ciclo de reporte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 2xx con entry id de ThingSpeak.
    Accepted { status: u16, entry: String },
    /// 2xx pero ThingSpeak respondió `0`: no guardó el dato (rate limit).
    Rejected { status: u16 },
    /// Status fuera de 2xx.
    HttpError { status: u16 },
    /// No hubo respuesta (sin WiFi, DNS, timeout...).
    TransportError(String),
}

impl Delivery {
    fn classify(result: Result<TransportResponse>) -> Self {
        match result {
            Ok(response) if !(200..300).contains(&response.status) => Self::HttpError {
                status: response.status,
            },
            Ok(response) => {
                let entry = response.body.trim();
                if entry == "0" {
                    Self::Rejected {
                        status: response.status,
                    }
                } else {
                    Self::Accepted {
                        status: response.status,
                        entry: entry.to_string(),
                    }
                }
            }
            Err(e) => Self::TransportError(format!("{e:#}")),
        }
    }

    fn log(&self) {
        match self {
            Self::Accepted { status, entry } => {
                info!("Data sent successfully (HTTP {}, entry '{}')", status, entry)
            }
            Self::Rejected { status } => {
                warn!("Endpoint rejected the update (HTTP {}, entry 0)", status)
            }
            Self::HttpError { status } => error!("Error sending data: HTTP {}", status),
            Self::TransportError(e) => error!("Error sending data: {}", e),
        }
    }
}

/// Resumen de un ciclo (para logs y tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub count: u32,
    pub delivery: Delivery,
}

// ─── Reporter ───

/// Loop de telemetría: drena el contador y lo manda cada `interval`.
pub struct Reporter<T> {
    counter: &'static PulseCounter,
    endpoint: TelemetryEndpoint,
    transport: T,
}

impl<T: Transport> Reporter<T> {
    pub fn new(counter: &'static PulseCounter, endpoint: TelemetryEndpoint, transport: T) -> Self {
        Self {
            counter,
            endpoint,
            transport,
        }
    }

    /// Un ciclo completo: take → log → POST → log del resultado.
    pub fn run_cycle(&mut self) -> CycleReport {
        let count = self.counter.take();

        info!(
            "Accumulated count in {} ms: {}",
            self.endpoint.interval().as_millis(),
            count
        );

        let body = build_payload(self.endpoint.api_key(), count);
        let delivery = Delivery::classify(self.transport.post_form(self.endpoint.url(), &body));
        delivery.log();

        CycleReport { count, delivery }
    }

    /// Nunca retorna. La espera se mide desde que terminó el POST.
    pub fn run(mut self) -> ! {
        info!("Telemetry reporter running, endpoint {}", self.endpoint.url());
        loop {
            self.run_cycle();
            thread::sleep(self.endpoint.interval());
        }
    }
}

// ─── Lado hardware: cliente HTTP de ESP-IDF + tarea FreeRTOS ───

#[cfg(target_os = "espidf")]
pub use self::esp::{spawn, EspHttpTransport};

#[cfg(target_os = "espidf")]
mod esp {
    use super::{
        Reporter, Transport, TransportResponse, FORM_CONTENT_TYPE, REPORTER_PRIORITY,
        REPORTER_STACK_SIZE, REPORTER_TASK_NAME,
    };
    use anyhow::{Context, Result};
    use embedded_svc::http::client::Client;
    use embedded_svc::io::{Read, Write};
    use log::warn;
    use esp_idf_hal::task::thread::ThreadSpawnConfiguration;
    use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
    use std::thread::JoinHandle;

    /// Bytes del body de respuesta que leemos (el entry id de ThingSpeak).
    const RESPONSE_PREVIEW_LEN: usize = 64;

    /// POST con `EspHttpConnection`, un cliente por request.
    #[derive(Debug, Default)]
    pub struct EspHttpTransport;

    impl Transport for EspHttpTransport {
        fn post_form(&mut self, url: &str, body: &str) -> Result<TransportResponse> {
            // Timeout default del cliente de ESP-IDF
            let mut client = Client::wrap(EspHttpConnection::new(&HttpConfig::default())?);

            let content_length = body.len().to_string();
            let headers = [
                ("Content-Type", FORM_CONTENT_TYPE),
                ("Content-Length", content_length.as_str()),
            ];

            let mut request = client.post(url, &headers)?;
            request.write_all(body.as_bytes())?;
            request.flush()?;

            let mut response = request.submit()?;
            let status = response.status();

            // El POST ya se completó: si falla la lectura, el envío igual cuenta
            let mut buf = [0u8; RESPONSE_PREVIEW_LEN];
            let body = match response.read(&mut buf) {
                Ok(len) => String::from_utf8_lossy(&buf[..len]).into_owned(),
                Err(e) => {
                    warn!("Failed to read response body: {:?}", e);
                    String::new()
                }
            };

            // client se dropea acá: esp_http_client_cleanup()
            Ok(TransportResponse { status, body })
        }
    }

    /// Lanza el reporter en su propia tarea FreeRTOS (nombre, stack y
    /// prioridad fijos).
    pub fn spawn<T>(reporter: Reporter<T>) -> Result<JoinHandle<()>>
    where
        T: Transport + Send + 'static,
    {
        ThreadSpawnConfiguration {
            name: Some(REPORTER_TASK_NAME),
            stack_size: REPORTER_STACK_SIZE,
            priority: REPORTER_PRIORITY,
            ..Default::default()
        }
        .set()
        .context("Failed to set reporter task configuration")?;

        let handle = std::thread::Builder::new()
            .stack_size(REPORTER_STACK_SIZE)
            .spawn(move || {
                reporter.run();
            })
            .context("Failed to spawn reporter task");

        // Volver al default para los threads que vengan después
        ThreadSpawnConfiguration::default().set()?;

        handle
    }
}
