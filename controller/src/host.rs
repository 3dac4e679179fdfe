use std::{
    future::Future,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use reqwest::blocking::Client as HttpClient;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use cloudlight_common::{
    weather::parse_coverage, Actuator, ClockSource, ClockSourceKind, CollaboratorError,
    Collaborators, ControlLoop, CoverageSample, Display, DisplayFrame, DutyValue,
    EnvironmentFetcher, FanoutSink, InfluxConfig, LightingEngine, LightingStatus, RuntimeConfig,
    TelemetrySample, TelemetrySink, TickOutcome, TimeOfDay, WeatherQuery,
    STATUS_OFFLINE, STATUS_ONLINE, TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

const DEFAULT_CONFIG_PATH: &str = "./cloudlight.json";
const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Clone)]
struct AppState {
    status: StatusBoard,
    config: Arc<RuntimeConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Latest control-loop state, shared with the status API.
#[derive(Debug, Clone, Default, Serialize)]
struct StatusSnapshot {
    lighting: Option<LightingStatus>,
    display: Option<DisplayFrame>,
    #[serde(rename = "clockAvailable")]
    clock_available: bool,
    #[serde(rename = "updatedEpoch")]
    updated_epoch: Option<i64>,
}

#[derive(Clone, Default)]
struct StatusBoard(Arc<Mutex<StatusSnapshot>>);

impl StatusBoard {
    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    fn record_tick(&self, outcome: &TickOutcome, engine: &LightingEngine) {
        let mut snapshot = self.lock();
        snapshot.lighting = Some(engine.status());
        snapshot.clock_available = matches!(outcome, TickOutcome::Completed(_));
        snapshot.updated_epoch = Some(Utc::now().timestamp());
    }

    fn record_frame(&self, frame: &DisplayFrame) {
        self.lock().display = Some(frame.clone());
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config().await?;
    runtime
        .validate()
        .context("refusing to start with invalid configuration")?;
    let timezone = runtime.timezone()?;

    info!(
        "activation window {:02}:00-{:02}:00 {}, tick {}ms, duty {}-{}",
        runtime.lighting.window.start_hour,
        runtime.lighting.window.end_hour,
        timezone,
        runtime.lighting.tick_period_ms,
        runtime.lighting.duty.low,
        runtime.lighting.duty.high,
    );

    let mqtt = if runtime.telemetry.mqtt_state {
        Some(connect_mqtt(&runtime).await?)
    } else {
        None
    };

    let status = StatusBoard::default();
    let stop = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                stop.store(true, Ordering::Relaxed);
                let _ = shutdown_tx.send(true);
            }
        });
    }

    let control = {
        let runtime = runtime.clone();
        let mqtt = mqtt.clone();
        let status = status.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || {
            run_control_loop(&runtime, timezone, mqtt, status, stop)
        })
    };

    let app_state = AppState {
        status,
        config: Arc::new(runtime),
    };
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/config", get(handle_get_config))
        .fallback(handle_not_found)
        .with_state(app_state);

    let port = std::env::var("CLOUDLIGHT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status API listening on http://{addr}");
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
            })
            .await
    };

    supervise(control, server, &stop).await?;

    if let Some(mqtt) = mqtt {
        if let Err(err) = mqtt
            .publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, STATUS_OFFLINE)
            .await
        {
            warn!("failed to publish offline status: {err}");
        }
    }

    Ok(())
}

/// Waits for the status server and the control loop together. The control
/// loop ending before a shutdown was requested is an error, reported as soon
/// as it happens.
async fn supervise<S>(
    mut control: JoinHandle<anyhow::Result<()>>,
    server: S,
    stop: &AtomicBool,
) -> anyhow::Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(server);

    tokio::select! {
        served = &mut server => {
            served.context("status server failed")?;
            control.await.context("control loop task panicked")??;
        }
        joined = &mut control => {
            joined.context("control loop task panicked")??;
            if !stop.load(Ordering::Relaxed) {
                anyhow::bail!("control loop exited before shutdown was requested");
            }
            server.await.context("status server failed")?;
        }
    }

    Ok(())
}

/// Builds the blocking collaborators and runs the loop on the current
/// (blocking) thread until `stop` is raised. reqwest's blocking clients must
/// be created off the async runtime, so construction happens here and any
/// failure surfaces through [`supervise`].
fn run_control_loop(
    runtime: &RuntimeConfig,
    timezone: Tz,
    mqtt: Option<AsyncClient>,
    status: StatusBoard,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let clock = match runtime.clock.source {
        ClockSourceKind::System => HostClock::System(SystemClock { timezone }),
        ClockSourceKind::WorldTimeApi => HostClock::WorldTime(WorldTimeClock {
            client: build_http_client(runtime.weather.request_timeout_ms)?,
            url: runtime.clock.world_time_url.clone(),
        }),
    };

    let mut telemetry = FanoutSink::new();
    if let Some(influx) = &runtime.telemetry.influx {
        telemetry.push(Box::new(InfluxSink::new(
            influx,
            &runtime.telemetry.measurement,
            build_http_client(runtime.telemetry.request_timeout_ms)?,
        )));
    }
    if let Some(client) = mqtt {
        telemetry.push(Box::new(MqttStateSink { client }));
    }
    if telemetry.is_empty() {
        warn!("no telemetry sink configured; samples are only logged");
        telemetry.push(Box::new(LogSink));
    }

    let mut control = ControlLoop::new(
        runtime,
        Collaborators {
            clock,
            fetcher: HttpWeatherFetcher {
                client: build_http_client(runtime.weather.request_timeout_ms)?,
            },
            actuator: LoggingActuator::default(),
            telemetry,
            display: StatusDisplay {
                board: status.clone(),
            },
        },
    );

    info!("weather source {}", runtime.weather.redacted_url());
    let _ = control.bootstrap();

    let period = Duration::from_millis(runtime.lighting.tick_period_ms);
    control.run(
        period,
        |outcome, engine| {
            status.record_tick(outcome, engine);
            !stop.load(Ordering::Relaxed)
        },
        || !stop.load(Ordering::Relaxed),
    );

    info!("control loop stopped");
    Ok(())
}

async fn connect_mqtt(runtime: &RuntimeConfig) -> anyhow::Result<AsyncClient> {
    let network = &runtime.network;
    let client_id = format!("cloudlight-{}", runtime.telemetry.device_tag.to_lowercase());
    let mut mqtt_options = MqttOptions::new(client_id, network.mqtt_host.clone(), network.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_STATUS,
        STATUS_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, STATUS_ONLINE)
        .await
        .context("failed to queue controller online status")?;
    spawn_mqtt_loop(eventloop);

    Ok(mqtt)
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status.snapshot())
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.redacted())
}

async fn handle_not_found() -> impl IntoResponse {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("CLOUDLIGHT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut runtime = match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no config at {}; using defaults", path.display());
            RuntimeConfig::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    runtime.apply_overrides(|key| std::env::var(key).ok());
    runtime.lighting.pwm.sanitize();
    Ok(runtime)
}

fn build_http_client(timeout_ms: u64) -> anyhow::Result<HttpClient> {
    HttpClient::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("failed to create HTTP client")
}

fn request_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Transport(err.to_string())
    }
}

fn get_body(client: &HttpClient, url: &str) -> Result<Vec<u8>, CollaboratorError> {
    let response = client.get(url).send().map_err(request_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(CollaboratorError::Status(status.as_u16()));
    }
    Ok(response.bytes().map_err(request_error)?.to_vec())
}

enum HostClock {
    System(SystemClock),
    WorldTime(WorldTimeClock),
}

impl ClockSource for HostClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        match self {
            Self::System(clock) => clock.now(),
            Self::WorldTime(clock) => clock.now(),
        }
    }
}

struct SystemClock {
    timezone: Tz,
}

impl ClockSource for SystemClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        let local = Utc::now().with_timezone(&self.timezone);
        Ok(TimeOfDay::from_timelike(&local))
    }
}

struct WorldTimeClock {
    client: HttpClient,
    url: String,
}

impl ClockSource for WorldTimeClock {
    fn now(&mut self) -> Result<TimeOfDay, CollaboratorError> {
        let body = get_body(&self.client, &self.url)?;
        TimeOfDay::from_world_time_json(&body)
    }
}

struct HttpWeatherFetcher {
    client: HttpClient,
}

impl EnvironmentFetcher for HttpWeatherFetcher {
    fn fetch(&mut self, query: &WeatherQuery) -> Result<CoverageSample, CollaboratorError> {
        let body = get_body(&self.client, &query.request_url())?;
        parse_coverage(&body)
    }
}

struct InfluxSink {
    client: HttpClient,
    write_url: String,
    token: String,
    measurement: String,
}

impl InfluxSink {
    fn new(influx: &InfluxConfig, measurement: &str, client: HttpClient) -> Self {
        Self {
            client,
            write_url: influx.write_url(),
            token: influx.token.clone(),
            measurement: measurement.to_string(),
        }
    }
}

impl TelemetrySink for InfluxSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .post(&self.write_url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(sample.to_line_protocol(&self.measurement))
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Status(status.as_u16()))
        }
    }
}

struct MqttStateSink {
    client: AsyncClient,
}

impl TelemetrySink for MqttStateSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        let body = serde_json::to_vec(sample)
            .map_err(|err| CollaboratorError::Decode(err.to_string()))?;
        self.client
            .try_publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
            .map_err(|err| CollaboratorError::Transport(err.to_string()))
    }
}

struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, sample: &TelemetrySample) -> Result<(), CollaboratorError> {
        debug!("telemetry sample: {sample:?}");
        Ok(())
    }
}

/// Host builds have no PWM peripheral; duty changes go to the log.
#[derive(Default)]
struct LoggingActuator {
    last: Option<DutyValue>,
}

impl Actuator for LoggingActuator {
    fn write(&mut self, duty: DutyValue) {
        if self.last != Some(duty) {
            info!("lamp duty -> {}", duty.raw());
        }
        self.last = Some(duty);
    }
}

struct StatusDisplay {
    board: StatusBoard,
}

impl Display for StatusDisplay {
    fn render(&mut self, frame: &DisplayFrame) {
        let coverage = frame
            .coverage_percent
            .map(|pct| format!("{pct}%"))
            .unwrap_or_else(|| "--".to_string());
        debug!(
            "Time:{} PWM:{} LEDs:{}",
            frame.current_time, frame.duty, coverage
        );
        self.board.record_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use cloudlight_common::{GateDecision, LightingConfig, TickReport};

    use super::*;

    #[test]
    fn status_board_tracks_latest_tick_and_frame() {
        let board = StatusBoard::default();
        let engine = LightingEngine::new(&LightingConfig::default());

        board.record_tick(&TickOutcome::ClockUnavailable, &engine);
        assert!(!board.snapshot().clock_available);

        let report = TickReport {
            time: TimeOfDay::new(9, 15).unwrap(),
            decision: GateDecision::Idle,
            fetch: None,
            commanded: Some(DutyValue::OFF),
            published: true,
        };
        board.record_tick(&TickOutcome::Completed(report), &engine);
        StatusDisplay {
            board: board.clone(),
        }
        .render(&DisplayFrame {
            current_time: "09:15".to_string(),
            duty: 0,
            coverage_percent: None,
        });

        let snapshot = board.snapshot();
        assert!(snapshot.clock_available);
        assert!(snapshot.updated_epoch.is_some());
        assert_eq!(snapshot.lighting.unwrap().window_start_hour, 8);
        assert_eq!(snapshot.display.unwrap().current_time, "09:15");
    }

    #[test]
    fn system_clock_reads_configured_zone() {
        let mut clock = SystemClock {
            timezone: "Asia/Tokyo".parse().unwrap(),
        };
        let now = clock.now().unwrap();
        assert!(now.hour < 24 && now.minute < 60);
    }

    #[test]
    fn logging_actuator_remembers_last_duty() {
        let mut actuator = LoggingActuator::default();
        actuator.write(DutyValue::new(132));
        actuator.write(DutyValue::new(132));
        assert_eq!(actuator.last, Some(DutyValue::new(132)));
    }

    fn stop_flag(stopping: bool) -> AtomicBool {
        AtomicBool::new(stopping)
    }

    #[tokio::test]
    async fn startup_failure_in_control_loop_is_reported_while_serving() {
        let control = tokio::task::spawn_blocking(|| -> anyhow::Result<()> {
            anyhow::bail!("failed to create HTTP client")
        });

        let result = supervise(control, std::future::pending(), &stop_flag(false)).await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to create HTTP client"));
    }

    #[tokio::test]
    async fn control_loop_returning_without_shutdown_is_an_error() {
        let control = tokio::task::spawn_blocking(|| Ok(()));

        let result = supervise(control, std::future::pending(), &stop_flag(false)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn control_loop_panic_is_an_error() {
        let control = tokio::task::spawn_blocking(|| -> anyhow::Result<()> {
            panic!("lamp driver exploded")
        });

        let result = supervise(control, std::future::pending(), &stop_flag(false)).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn requested_shutdown_waits_for_both_tasks() {
        let control = tokio::task::spawn_blocking(|| Ok(()));

        let result = supervise(control, std::future::ready(Ok(())), &stop_flag(true)).await;

        assert!(result.is_ok());
    }
}
