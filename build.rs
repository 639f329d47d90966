/// Build script para proyectos ESP-IDF.
///
/// `embuild::espidf::sysenv::output()` hace todo el trabajo pesado:
/// 1. Detecta o descarga el ESP-IDF SDK (framework C de Espressif)
/// 2. Configura las variables de entorno para el cross-compiler
/// 3. Genera los bindings de C → Rust
/// 4. Compila el SDK de C y lo linkea con tu código Rust
///
/// En el host (tests) no hay SDK: solo registramos las variables de
/// configuración que lee `option_env!` en `config.rs`.
const CONFIG_VARS: [&str; 5] = [
    "WIFI_SSID",
    "WIFI_PASS",
    "TELEMETRY_URL",
    "TELEMETRY_API_KEY",
    "TELEMETRY_INTERVAL_MS",
];

fn main() {
    for var in CONFIG_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
