//! Arranque completo contra una plataforma falsa: orden de los pasos,
//! recuperación de NVS y el escenario de punta a punta de la telemetría.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulse_telemetry::config::{Config, TelemetryEndpoint, WifiCredentials};
use pulse_telemetry::pulse_counter::PulseCounter;
use pulse_telemetry::startup::{boot, Platform};
use pulse_telemetry::storage::{FlashError, FlashStorage};
use pulse_telemetry::telemetry::{Delivery, Reporter, Transport, TransportResponse};

const API_KEY: &str = "W2OPZCBARZ69YF99";
const URL: &str = "http://api.thingspeak.com/update";

type Log = Arc<Mutex<Vec<String>>>;

/// Transporte compartido con el test: registra los bodies enviados.
#[derive(Clone)]
struct SharedTransport {
    bodies: Log,
    online: Arc<Mutex<bool>>,
}

impl Transport for SharedTransport {
    fn post_form(&mut self, url: &str, body: &str) -> Result<TransportResponse> {
        assert_eq!(url, URL);
        self.bodies.lock().unwrap().push(body.to_string());

        if !*self.online.lock().unwrap() {
            bail!("ESP_ERR_HTTP_CONNECT");
        }

        Ok(TransportResponse {
            status: 200,
            body: "17".to_string(),
        })
    }
}

struct MockPlatform {
    calls: Vec<&'static str>,
    init_results: Vec<Result<(), FlashError>>,
    fail_pulse_input: bool,
    transport: SharedTransport,
    ssid_seen: Option<String>,
}

impl MockPlatform {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            init_results: Vec::new(),
            fail_pulse_input: false,
            transport: SharedTransport {
                bodies: Arc::new(Mutex::new(Vec::new())),
                online: Arc::new(Mutex::new(true)),
            },
            ssid_seen: None,
        }
    }
}

impl FlashStorage for MockPlatform {
    fn init_flash(&mut self) -> Result<(), FlashError> {
        self.calls.push("init_flash");
        if self.init_results.is_empty() {
            Ok(())
        } else {
            self.init_results.remove(0)
        }
    }

    fn erase_flash(&mut self) -> Result<(), FlashError> {
        self.calls.push("erase_flash");
        Ok(())
    }
}

impl Platform for MockPlatform {
    type PulseInput = ();
    type Network = ();
    type Transport = SharedTransport;
    // El reporter queda en manos del test para correr ciclos a mano
    type Task = Reporter<SharedTransport>;

    fn attach_pulse_input(&mut self, _counter: &'static PulseCounter) -> Result<()> {
        self.calls.push("attach_pulse_input");
        if self.fail_pulse_input {
            bail!("ESP_ERR_NO_MEM");
        }
        Ok(())
    }

    fn start_network(&mut self, credentials: WifiCredentials) -> Result<()> {
        self.calls.push("start_network");
        self.ssid_seen = Some(credentials.ssid().to_string());
        Ok(())
    }

    fn transport(&mut self) -> SharedTransport {
        self.transport.clone()
    }

    fn spawn_reporter(
        &mut self,
        reporter: Reporter<SharedTransport>,
    ) -> Result<Reporter<SharedTransport>> {
        self.calls.push("spawn_reporter");
        Ok(reporter)
    }
}

fn config() -> Config {
    Config::new(
        WifiCredentials::new("teste", "12345678"),
        TelemetryEndpoint::new(URL, API_KEY, Duration::from_millis(10_000)),
    )
    .unwrap()
}

fn leaked_counter() -> &'static PulseCounter {
    Box::leak(Box::new(PulseCounter::new()))
}

#[test]
fn boot_runs_steps_in_order() {
    let mut platform = MockPlatform::new();

    boot(&mut platform, config(), leaked_counter()).unwrap();

    assert_eq!(
        platform.calls,
        ["init_flash", "attach_pulse_input", "start_network", "spawn_reporter"]
    );
    assert_eq!(platform.ssid_seen.as_deref(), Some("teste"));
}

#[test]
fn boot_recovers_full_nvs_once() {
    let mut platform = MockPlatform::new();
    platform.init_results = vec![Err(FlashError::NoFreePages), Ok(())];

    boot(&mut platform, config(), leaked_counter()).unwrap();

    assert_eq!(
        &platform.calls[..3],
        ["init_flash", "erase_flash", "init_flash"]
    );
}

#[test]
fn boot_stops_on_second_nvs_failure() {
    let mut platform = MockPlatform::new();
    platform.init_results = vec![
        Err(FlashError::NewVersionFound),
        Err(FlashError::NewVersionFound),
    ];

    assert!(boot(&mut platform, config(), leaked_counter()).is_err());
    assert_eq!(platform.calls, ["init_flash", "erase_flash", "init_flash"]);
}

#[test]
fn boot_stops_when_pulse_input_fails() {
    let mut platform = MockPlatform::new();
    platform.fail_pulse_input = true;

    assert!(boot(&mut platform, config(), leaked_counter()).is_err());
    assert_eq!(platform.calls, ["init_flash", "attach_pulse_input"]);
}

#[test]
fn three_edges_then_an_empty_window() {
    let counter = leaked_counter();
    let mut platform = MockPlatform::new();
    let bodies = platform.transport.bodies.clone();

    let device = boot(&mut platform, config(), counter).unwrap();
    let mut reporter = device.reporter;

    // Primera ventana: 3 flancos
    counter.record_edge();
    counter.record_edge();
    counter.record_edge();

    let report = reporter.run_cycle();
    assert_eq!(report.count, 3);
    assert_eq!(counter.peek(), 0);

    // Segunda ventana: nada
    let report = reporter.run_cycle();
    assert_eq!(report.count, 0);

    assert_eq!(
        *bodies.lock().unwrap(),
        [
            format!("api_key={API_KEY}&field1=3"),
            format!("api_key={API_KEY}&field1=0"),
        ]
    );
}

#[test]
fn offline_cycles_keep_reporting_without_backlog() {
    let counter = leaked_counter();
    let mut platform = MockPlatform::new();
    let bodies = platform.transport.bodies.clone();
    let online = platform.transport.online.clone();

    let mut reporter = boot(&mut platform, config(), counter).unwrap().reporter;

    *online.lock().unwrap() = false;
    for _ in 0..5 {
        counter.record_edge();
    }
    let report = reporter.run_cycle();
    assert!(matches!(report.delivery, Delivery::TransportError(_)));
    assert_eq!(counter.peek(), 0);

    // Al volver la red solo se manda lo nuevo
    *online.lock().unwrap() = true;
    counter.record_edge();
    let report = reporter.run_cycle();
    assert_eq!(report.count, 1);
    assert!(matches!(report.delivery, Delivery::Accepted { .. }));

    assert_eq!(
        bodies.lock().unwrap().last().map(String::as_str),
        Some(format!("api_key={API_KEY}&field1=1").as_str())
    );
}
