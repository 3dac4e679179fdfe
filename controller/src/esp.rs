use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    mqtt::client::{EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::AnyOutputPin,
        ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution, LEDC},
        modem::Modem,
        prelude::*,
    },
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{
        EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration,
    },
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use cloudlight_common::{
    config::{NetworkConfig, PwmHardwareConfig},
    control::IDLE_SLICE,
    weather::{parse_coverage, MAX_WEATHER_BODY_BYTES},
    Actuator, ClockSource, ClockSourceKind, CollaboratorError, Collaborators, ControlLoop,
    CoverageSample, Display, DisplayFrame, DutyValue, EnvironmentFetcher, FanoutSink,
    InfluxConfig, LightingStatus, RuntimeConfig, TelemetrySample, TelemetrySink, TimeOfDay,
    WeatherQuery, STATUS_OFFLINE, STATUS_ONLINE, TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

const NVS_NAMESPACE: &str = "cloudlight";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const HTTP_CHUNK_SIZE: usize = 512;
// Covers MQTT publishes and LEDC writes, which have no configured timeout.
const WATCHDOG_MARGIN_MS: u64 = 15_000;
const SNTP_SYNC_WAIT_MS: u64 = 20_000;
const SNTP_POLL_MS: u64 = 250;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const WIFI_FAILURE_RESTART_MS: u64 = 10_000;
// SNTP has not run yet while the RTC still reports the epoch.
const MIN_SYNCED_YEAR: i32 = 2024;

#[derive(Clone, Default)]
struct SharedState {
    status: Arc<Mutex<StatusSnapshot>>,
    mqtt_connected: Arc<AtomicBool>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct StatusSnapshot {
    lighting: Option<LightingStatus>,
    display: Option<DisplayFrame>,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    #[serde(rename = "wifiConnected")]
    wifi_connected: bool,
    #[serde(rename = "mqttConnected")]
    mqtt_connected: bool,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.apply_overrides(build_time_override);
    runtime.lighting.pwm.sanitize();
    runtime
        .validate()
        .context("refusing to start with invalid configuration")?;
    let timezone = runtime.timezone()?;

    info!(
        "config loaded: ssid=`{}`, mqtt=`{}:{}`, window {:02}:00-{:02}:00 {}",
        runtime.network.wifi_ssid,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
        runtime.lighting.window.start_hour,
        runtime.lighting.window.end_hour,
        timezone,
    );

    let Peripherals { modem, ledc, .. } = Peripherals::take()?;
    let mut lamp = init_lamp(ledc, &runtime.lighting.pwm).context("PWM setup failed")?;
    lamp.write(DutyValue::OFF);
    info!(
        "lamp PWM on GPIO{} channel {} @ {}Hz, {}-bit",
        runtime.lighting.pwm.pin,
        runtime.lighting.pwm.channel,
        runtime.lighting.pwm.frequency_hz,
        runtime.lighting.pwm.resolution_bits,
    );

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => wifi,
        Err(err) => {
            warn!(
                "wifi unavailable ({err:#}); restarting in {}s",
                WIFI_FAILURE_RESTART_MS / 1000
            );
            thread::sleep(Duration::from_millis(WIFI_FAILURE_RESTART_MS));
            unsafe { esp_idf_svc::sys::esp_restart() };
        }
    };
    disable_wifi_power_save();

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");
    if runtime.clock.source == ClockSourceKind::System {
        wait_for_time_sync(Duration::from_millis(SNTP_SYNC_WAIT_MS));
    }

    let watchdog_ms = runtime
        .worst_case_tick_ms()
        .saturating_add(IDLE_SLICE.as_millis() as u64)
        .saturating_add(WATCHDOG_MARGIN_MS);
    init_watchdog(u32::try_from(watchdog_ms).unwrap_or(u32::MAX))?;
    info!("task watchdog armed at {watchdog_ms}ms");

    let state = SharedState::default();

    let mut telemetry = FanoutSink::new();
    if let Some(influx) = &runtime.telemetry.influx {
        telemetry.push(Box::new(InfluxSink::new(
            influx,
            &runtime.telemetry.measurement,
            runtime.telemetry.request_timeout_ms,
        )));
    }
    if runtime.telemetry.mqtt_state {
        let (mqtt_client, mqtt_conn) =
            create_mqtt_client(&runtime.network, &runtime.telemetry.device_tag)?;
        let mqtt_client = Arc::new(Mutex::new(mqtt_client));
        spawn_mqtt_receiver(state.clone(), mqtt_conn, mqtt_client.clone());
        telemetry.push(Box::new(MqttStateSink {
            client: mqtt_client,
        }));
    }
    if telemetry.is_empty() {
        warn!("no telemetry sink configured");
    }

    let server = create_http_server(state.clone(), runtime.redacted())?;

    spawn_control_loop(&runtime, timezone, lamp, telemetry, state)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn build_time_override(key: &str) -> Option<String> {
    let value = match key {
        "OWM_API_KEY" => option_env!("OWM_API_KEY"),
        "WIFI_SSID" => option_env!("WIFI_SSID"),
        "WIFI_PASS" => option_env!("WIFI_PASS"),
        "MQTT_HOST" => option_env!("MQTT_HOST"),
        "MQTT_PORT" => option_env!("MQTT_PORT"),
        "MQTT_USER" => option_env!("MQTT_USER"),
        "MQTT_PASS" => option_env!("MQTT_PASS"),
        "INFLUX_URL" => option_env!("INFLUX_URL"),
        "INFLUX_TOKEN" => option_env!("INFLUX_TOKEN"),
        "INFLUX_ORG" => option_env!("INFLUX_ORG"),
        "INFLUX_BUCKET" => option_env!("INFLUX_BUCKET"),
        _ => None,
    };
    value.filter(|value| !value.is_empty()).map(str::to_string)
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

fn spawn_control_loop(
    runtime: &RuntimeConfig,
    timezone: Tz,
    lamp: LedcLamp,
    telemetry: FanoutSink,
    state: SharedState,
) -> anyhow::Result<()> {
    let runtime = runtime.clone();
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(16 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let clock = match runtime.clock.source {
                ClockSourceKind::System => EspClock::Sntp(SntpClock { timezone }),
                ClockSourceKind::WorldTimeApi => EspClock::WorldTime(WorldTimeClock {
                    url: runtime.clock.world_time_url.clone(),
                    timeout_ms: runtime.weather.request_timeout_ms,
                }),
            };

            let mut control = ControlLoop::new(
                &runtime,
                Collaborators {
                    clock,
                    fetcher: HttpWeatherFetcher,
                    actuator: lamp,
                    telemetry,
                    display: StatusDisplay {
                        state: state.clone(),
                    },
                },
            );

            info!("weather source {}", runtime.weather.redacted_url());
            let _ = control.bootstrap();
            feed_watchdog();

            let period = Duration::from_millis(runtime.lighting.tick_period_ms);
            control.run(
                period,
                |_, engine| {
                    feed_watchdog();
                    let mut snapshot = state.lock();
                    snapshot.lighting = Some(engine.status());
                    snapshot.time_synced = is_time_synced();
                    snapshot.wifi_connected = is_wifi_station_connected();
                    snapshot.mqtt_connected = state.mqtt_connected.load(Ordering::Relaxed);
                    true
                },
                || {
                    feed_watchdog();
                    true
                },
            );
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

fn init_lamp(ledc: LEDC, pwm: &PwmHardwareConfig) -> anyhow::Result<LedcLamp> {
    let resolution = match pwm.resolution_bits {
        1 => Resolution::Bits1,
        2 => Resolution::Bits2,
        3 => Resolution::Bits3,
        4 => Resolution::Bits4,
        5 => Resolution::Bits5,
        6 => Resolution::Bits6,
        7 => Resolution::Bits7,
        8 => Resolution::Bits8,
        9 => Resolution::Bits9,
        10 => Resolution::Bits10,
        11 => Resolution::Bits11,
        12 => Resolution::Bits12,
        13 => Resolution::Bits13,
        14 => Resolution::Bits14,
        bits => return Err(anyhow!("unsupported PWM resolution {bits}")),
    };

    let timer = LedcTimerDriver::new(
        ledc.timer0,
        &TimerConfig::default()
            .frequency(pwm.frequency_hz.Hz().into())
            .resolution(resolution),
    )?;
    let pin = unsafe { AnyOutputPin::new(pwm.pin) };

    let driver = match pwm.channel {
        0 => LedcDriver::new(ledc.channel0, timer, pin)?,
        1 => LedcDriver::new(ledc.channel1, timer, pin)?,
        2 => LedcDriver::new(ledc.channel2, timer, pin)?,
        3 => LedcDriver::new(ledc.channel3, timer, pin)?,
        4 => LedcDriver::new(ledc.channel4, timer, pin)?,
        5 => LedcDriver::new(ledc.channel5, timer, pin)?,
        6 => LedcDriver::new(ledc.channel6, timer, pin)?,
        7 => LedcDriver::new(ledc.channel7, timer, pin)?,
        channel => return Err(anyhow!("unsupported LEDC channel {channel}")),
    };

    Ok(LedcLamp {
        max_duty: driver.get_max_duty(),
        driver,
    })
}

struct LedcLamp {
    driver: LedcDriver<'static>,
    max_duty: u32,
}

impl Actuator for LedcLamp {
    fn write(&mut self, duty: DutyValue) {
        let raw = duty.raw().min(self.max_duty);
        if let Err(err) = self.driver.set_duty(raw) {
            warn!("failed to set lamp duty {raw}: {err}");
        }
    }
}

enum EspClock {
    Sntp(SntpClock),
    WorldTime(WorldTimeClock),
}

impl ClockSource for EspClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        match self {
            Self::Sntp(clock) => clock.now(),
            Self::WorldTime(clock) => clock.now(),
        }
    }
}

struct SntpClock {
    timezone: Tz,
}

impl ClockSource for SntpClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        let local = Utc::now().with_timezone(&self.timezone);
        if !is_time_synced() {
            return Err(CollaboratorError::ClockNotSynced);
        }
        Ok(TimeOfDay::from_timelike(&local))
    }
}

struct WorldTimeClock {
    url: String,
    timeout_ms: u64,
}

impl ClockSource for WorldTimeClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        let body = http_get(&self.url, self.timeout_ms)?;
        TimeOfDay::from_world_time_json(&body)
    }
}

struct HttpWeatherFetcher;

impl EnvironmentFetcher for HttpWeatherFetcher {
    fn fetch(&mut self, query: &WeatherQuery) -> Result<CoverageSample, CollaboratorError> {
        let body = http_get(&query.request_url(), query.request_timeout_ms)?;
        parse_coverage(&body)
    }
}

struct InfluxSink {
    write_url: String,
    authorization: String,
    measurement: String,
    timeout_ms: u64,
}

impl InfluxSink {
    fn new(influx: &InfluxConfig, measurement: &str, timeout_ms: u64) -> Self {
        Self {
            write_url: influx.write_url(),
            authorization: format!("Token {}", influx.token),
            measurement: measurement.to_string(),
            timeout_ms,
        }
    }
}

impl TelemetrySink for InfluxSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        let body = sample.to_line_protocol(&self.measurement);
        let length = body.len().to_string();
        let headers = [
            ("Authorization", self.authorization.as_str()),
            ("Content-Type", "text/plain; charset=utf-8"),
            ("Content-Length", length.as_str()),
        ];

        let mut client = http_client(self.timeout_ms)?;
        let mut request = client
            .request(Method::Post, &self.write_url, &headers)
            .map_err(transport_error)?;
        request
            .write_all(body.as_bytes())
            .map_err(transport_error)?;
        request.flush().map_err(transport_error)?;
        let response = request.submit().map_err(transport_error)?;

        let status = response.status();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(CollaboratorError::Status(status))
        }
    }
}

struct MqttStateSink {
    client: Arc<Mutex<EspMqttClient<'static>>>,
}

impl TelemetrySink for MqttStateSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        let payload = serde_json::to_vec(sample)
            .map_err(|err| CollaboratorError::Decode(err.to_string()))?;
        let mut client = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        client
            .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, &payload)
            .map(|_| ())
            .map_err(transport_error)
    }
}

struct StatusDisplay {
    state: SharedState,
}

impl Display for StatusDisplay {
    fn render(&mut self, frame: &DisplayFrame) {
        let coverage = frame
            .coverage_percent
            .map(|pct| format!("{pct}%"))
            .unwrap_or_else(|| "--".to_string());
        info!(
            "Time:{} PWM:{} LEDs:{}",
            frame.current_time, frame.duty, coverage
        );
        self.state.lock().display = Some(frame.clone());
    }
}

fn transport_error<E: core::fmt::Debug>(err: E) -> CollaboratorError {
    CollaboratorError::Transport(format!("{err:?}"))
}

fn http_client(timeout_ms: u64) -> Result<HttpClient<EspHttpConnection>, CollaboratorError> {
    let conf = HttpClientConfiguration {
        timeout: Some(Duration::from_millis(timeout_ms)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let connection = EspHttpConnection::new(&conf).map_err(transport_error)?;
    Ok(HttpClient::wrap(connection))
}

/// GETs `url`, reading at most one byte past the weather body limit so
/// oversized responses still fail decoding.
fn http_get(url: &str, timeout_ms: u64) -> Result<Vec<u8>, CollaboratorError> {
    let mut client = http_client(timeout_ms)?;
    let request = client
        .request(Method::Get, url, &[])
        .map_err(transport_error)?;
    let mut response = request.submit().map_err(transport_error)?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(CollaboratorError::Status(status));
    }

    let mut body = Vec::new();
    let mut chunk = [0_u8; HTTP_CHUNK_SIZE];
    while body.len() <= MAX_WEATHER_BODY_BYTES {
        let read = response.read(&mut chunk).map_err(transport_error)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    Ok(body)
}

fn create_http_server(
    state: SharedState,
    config_view: RuntimeConfig,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let snapshot = state.lock().clone();
            write_json(req, &snapshot)
        })?;
    }

    server.fn_handler("/api/config", Method::Get, move |req| {
        write_json(req, &config_view)
    })?;

    Ok(server)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi ssid not configured"));
    }

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(wifi);
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    let _ = wifi.stop();
    Err(anyhow!(
        "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; last error: {last_err:?}"
    ))
}

fn create_mqtt_client(
    network: &NetworkConfig,
    device_tag: &str,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);
    let client_id = format!("cloudlight-{}", device_tag.to_lowercase());

    let conf = MqttClientConfiguration {
        client_id: Some(client_id.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        lwt: Some(LwtConfiguration {
            topic: TOPIC_CONTROLLER_STATUS,
            payload: STATUS_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(
    state: SharedState,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) {
    let spawned = thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(6 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        state.mqtt_connected.store(true, Ordering::Relaxed);
                        let mut client = mqtt.lock().unwrap_or_else(|p| p.into_inner());
                        if let Err(err) = client.publish(
                            TOPIC_CONTROLLER_STATUS,
                            QoS::AtLeastOnce,
                            true,
                            STATUS_ONLINE.as_bytes(),
                        ) {
                            warn!("failed to publish online status: {err:?}");
                        }
                    }
                    EventPayload::Disconnected => {
                        state.mqtt_connected.store(false, Ordering::Relaxed);
                    }
                    _ => {}
                },
                Err(err) => {
                    state.mqtt_connected.store(false, Ordering::Relaxed);
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        });

    if let Err(err) = spawned {
        warn!("failed to spawn mqtt receiver thread: {err}");
    }
}

fn is_time_synced() -> bool {
    Utc::now().year() >= MIN_SYNCED_YEAR
}

/// Gives SNTP a bounded head start so the first tick can already apply the
/// activation window.
fn wait_for_time_sync(limit: Duration) {
    let started = Instant::now();
    while !is_time_synced() {
        if started.elapsed() >= limit {
            warn!(
                "time not synchronized after {}s; lamp stays off until it is",
                limit.as_secs()
            );
            return;
        }
        thread::sleep(Duration::from_millis(SNTP_POLL_MS));
    }
    info!("time synchronized");
}

fn init_watchdog(timeout_ms: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms,
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let mut rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        // Already started by the IDF; apply our timeout instead.
        rc = unsafe { esp_idf_svc::sys::esp_task_wdt_reconfigure(&config) };
    }
    if rc == esp_idf_svc::sys::ESP_OK {
        return Ok(());
    }
    Err(anyhow!("task watchdog setup failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}
