// ─── Paso 3: Módulo WiFi — Station + reconexión por eventos ───
//
// A diferencia del paso 2 (connect() bloqueante), acá la conexión la
// manejan los eventos del sistema:
//
//   StaStarted      → pedir conexión
//   StaDisconnected → pedir conexión de nuevo (siempre, sin backoff)
//   DhcpIpAssigned  → conectado, loguear la IP
//
// La lógica de estados (`Link`) no toca el radio directamente: recibe un
// `StationControl` para poder testearla en el host.

use anyhow::Result;
use log::{info, warn};
use std::net::Ipv4Addr;

/// Estado de la conexión de la estación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Initialized,
    Connecting,
    Connected(Ipv4Addr),
}

/// Eventos del stack de red que le interesan al link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StaStarted,
    StaDisconnected,
    GotIp(Ipv4Addr),
}

/// Lo único que el link le pide al driver: "conectate".
pub trait StationControl {
    fn connect(&mut self) -> Result<()>;
}

/// Máquina de estados de la conexión WiFi.
pub struct Link<C> {
    state: LinkState,
    control: C,
}

impl<C: StationControl> Link<C> {
    pub fn new(control: C) -> Self {
        Self {
            state: LinkState::Uninitialized,
            control,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Driver creado y configurado, todavía sin arrancar.
    pub fn mark_initialized(&mut self) {
        self.state = LinkState::Initialized;
    }

    pub fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StaStarted => {
                info!("WiFi station started, connecting...");
                self.request_connect();
            }
            LinkEvent::StaDisconnected => {
                info!("WiFi disconnected, reconnecting...");
                self.request_connect();
            }
            LinkEvent::GotIp(ip) => {
                info!("WiFi connected! IP: {}", ip);
                self.state = LinkState::Connected(ip);
            }
        }
    }

    // Sin backoff ni límite de intentos: si el driver rechaza el pedido,
    // el próximo StaDisconnected vuelve a intentar.
    fn request_connect(&mut self) {
        self.state = LinkState::Connecting;
        if let Err(e) = self.control.connect() {
            warn!("WiFi connect request failed: {:?}", e);
        }
    }
}

// ─── Lado hardware: EspWifi + suscripciones al event loop ───

#[cfg(target_os = "espidf")]
pub use self::station::{start, EspStation, Station};

#[cfg(target_os = "espidf")]
mod station {
    use super::{Link, LinkEvent, StationControl};
    use crate::config::WifiCredentials;
    use anyhow::{Context, Result};
    use esp_idf_svc::{
        eventloop::{EspSubscription, EspSystemEventLoop, System},
        hal::modem::Modem,
        netif::IpEvent,
        nvs::EspDefaultNvsPartition,
        sys::{esp, esp_wifi_connect},
        wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
    };
    use log::{error, info};
    use std::sync::{Arc, Mutex};

    /// Pide la conexión directo al driver de ESP-IDF. Es lo que hace
    /// `EspWifi::connect()`, pero sin necesitar el driver dentro del callback.
    pub struct EspStation;

    impl StationControl for EspStation {
        fn connect(&mut self) -> Result<()> {
            esp!(unsafe { esp_wifi_connect() })?;
            Ok(())
        }
    }

    /// Driver WiFi + suscripciones vivas.
    ///
    /// IMPORTANTE: mientras este struct exista, la estación sigue conectada
    /// y reconectando. Si se dropea, se pierde todo (RAII).
    pub struct Station {
        _wifi: Box<EspWifi<'static>>,
        _wifi_events: EspSubscription<'static, System>,
        _ip_events: EspSubscription<'static, System>,
        link: Arc<Mutex<Link<EspStation>>>,
    }

    impl Station {
        pub fn state(&self) -> super::LinkState {
            match self.link.lock() {
                Ok(link) => link.state(),
                Err(poisoned) => poisoned.into_inner().state(),
            }
        }
    }

    /// Levanta la estación WiFi y registra los handlers de eventos.
    ///
    /// No espera a tener IP: la conexión avanza sola por eventos.
    pub fn start(
        credentials: WifiCredentials,
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Station> {
        credentials.validate()?;

        let auth_method = if credentials.is_open() {
            info!("WiFi password empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        // ─── Crear driver WiFi ───

        // EspWifi::new() inicializa netif + driver y toma ownership del modem.
        // Con NVS el driver persiste su calibración en flash.
        let mut wifi = Box::new(
            EspWifi::new(modem, sysloop.clone(), Some(nvs)).context("Failed to init WiFi driver")?,
        );

        // Modo station + credenciales
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid()
                .try_into()
                .map_err(|_| anyhow::anyhow!("WiFi SSID too long"))?,
            password: credentials
                .password()
                .try_into()
                .map_err(|_| anyhow::anyhow!("WiFi password too long"))?,
            auth_method,
            ..Default::default()
        }))
        .context("Failed to configure WiFi station")?;

        info!("WiFi configured for '{}'", credentials.ssid());

        // Las credenciales ya están copiadas en el driver: zeroizar las nuestras
        drop(credentials);

        // ─── Máquina de estados compartida entre los dos callbacks ───

        let mut link = Link::new(EspStation);
        link.mark_initialized();
        let link = Arc::new(Mutex::new(link));

        let wifi_events = {
            let link = link.clone();
            sysloop.subscribe::<WifiEvent, _>(move |event| {
                let event = match event {
                    WifiEvent::StaStarted { .. } => LinkEvent::StaStarted,
                    WifiEvent::StaDisconnected { .. } => LinkEvent::StaDisconnected,
                    _ => return,
                };
                dispatch(&link, event);
            })?
        };

        let ip_events = {
            let link = link.clone();
            sysloop.subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    dispatch(&link, LinkEvent::GotIp(assignment.ip()));
                }
            })?
        };

        // start() dispara StaStarted → el callback pide la conexión
        info!("Starting WiFi...");
        wifi.start().context("Failed to start WiFi")?;

        info!("WiFi initialization complete");

        Ok(Station {
            _wifi: wifi,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
            link,
        })
    }

    fn dispatch(link: &Mutex<Link<EspStation>>, event: LinkEvent) {
        match link.lock() {
            Ok(mut link) => link.handle(event),
            Err(e) => error!("WiFi link state poisoned: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Control falso: cuenta los pedidos de conexión y puede fallar.
    #[derive(Default)]
    struct RecordingControl {
        connects: usize,
        fail: bool,
    }

    impl StationControl for RecordingControl {
        fn connect(&mut self) -> Result<()> {
            self.connects += 1;
            if self.fail {
                anyhow::bail!("ESP_ERR_WIFI_CONN");
            }
            Ok(())
        }
    }

    #[test]
    fn start_event_requests_connection() {
        let mut link = Link::new(RecordingControl::default());
        assert_eq!(link.state(), LinkState::Uninitialized);

        link.mark_initialized();
        assert_eq!(link.state(), LinkState::Initialized);

        link.handle(LinkEvent::StaStarted);
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.control.connects, 1);
    }

    #[test]
    fn got_ip_marks_connected() {
        let mut link = Link::new(RecordingControl::default());
        link.handle(LinkEvent::StaStarted);

        let ip = Ipv4Addr::new(192, 168, 1, 42);
        link.handle(LinkEvent::GotIp(ip));

        assert_eq!(link.state(), LinkState::Connected(ip));
        assert_eq!(link.control.connects, 1);
    }

    #[test]
    fn every_disconnect_triggers_a_reconnect() {
        let mut link = Link::new(RecordingControl::default());
        link.handle(LinkEvent::StaStarted);
        link.handle(LinkEvent::GotIp(Ipv4Addr::new(10, 0, 0, 7)));

        for attempt in 1..=20 {
            link.handle(LinkEvent::StaDisconnected);
            assert_eq!(link.state(), LinkState::Connecting);
            assert_eq!(link.control.connects, 1 + attempt);
        }
    }

    #[test]
    fn disconnect_before_start_still_reconnects() {
        let mut link = Link::new(RecordingControl::default());

        link.handle(LinkEvent::StaDisconnected);

        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.control.connects, 1);
    }

    #[test]
    fn rejected_connect_does_not_stop_retries() {
        let mut link = Link::new(RecordingControl {
            fail: true,
            ..Default::default()
        });

        link.handle(LinkEvent::StaStarted);
        link.handle(LinkEvent::StaDisconnected);
        link.handle(LinkEvent::StaDisconnected);

        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.control.connects, 3);
    }
}
