//! Contador de pulsos (sensor KY-025 o similar) con reporte periódico a
//! ThingSpeak por WiFi.
//!
//! La lógica (contador, máquina de estados WiFi, payload, arranque) compila
//! y se testea en el host. Lo que toca ESP-IDF vive detrás de
//! `cfg(target_os = "espidf")`.

pub mod config;
pub mod pulse_counter;
pub mod startup;
pub mod storage;
pub mod telemetry;
pub mod wifi;

#[cfg(target_os = "espidf")]
pub mod board;
