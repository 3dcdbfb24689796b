//! The UDB role: an acoustic release that executes requested operations.
//!
//! Register writes from the controller arrive as `ST` frames. Writing
//! `RSTATE_REQ` starts the matching operation on a background task, which
//! reports progress through `RSTATE_RPT` and announces every batch of
//! changed registers with a single `RM` frame.

use crate::clock::Clock;
use crate::config::{DeviceConfig, LinkConfig};
use crate::engine::{ProtocolEngine, Role};
use crate::error::{EmulatorError, EmulatorResult};
use crate::history::HistoryDirection;
use crate::state::{report, Operation};
use crate::telemetry::{SensorOverrides, SensorReadings};
use crate::transport::Transport;
use chrono::Local;
use dss_metrics::metric_defs;
use dss_protocol::{Frame, Message, Request, Response};
use dss_registers::{catalog, DataType, RegisterDef, RegisterResult, RegisterTable, RegisterValue};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: i64 = 12345;
const DEFAULT_SERIAL: i64 = 67890;
const DEFAULT_FIRMWARE: i64 = 0x0123;
const DEFAULT_ACP: i64 = 101;
const DEFAULT_THRESHOLD_DB: i64 = 45;
const DIVISORS: [i64; 4] = [100, 10, 100, 1];
const LEGENDS: [&str; 4] = ["Battery V", "Temp C", "Depth m", "Status"];
const STATUS_ARMED: i64 = 1;
const STATUS_RELEASED: i64 = 0;

// ============================================================================
// State
// ============================================================================

struct DeviceInner {
    registers: RegisterTable,
    sensors: SensorReadings,
    rng: ChaCha8Rng,
    firmware: Vec<String>,
    simulate_failures: bool,
    failure_rate: f64,
}

#[derive(Default)]
struct DeviceTasks {
    operation: Option<JoinHandle<()>>,
    ranging: Option<JoinHandle<()>>,
    misc: Vec<JoinHandle<()>>,
}

/// Snapshot of the device for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// Last requested operation, if the code is known.
    pub operation: Option<Operation>,
    /// Current `RSTATE_RPT`.
    pub reported: i64,
    /// `RR_CTR`.
    pub attempts: i64,
    /// `RR_MISS`.
    pub misses: i64,
    /// Current sensor readings.
    pub sensors: SensorReadings,
    /// Firmware lines loaded since the last reboot.
    pub firmware_lines: usize,
    /// Whether failures are simulated.
    pub simulate_failures: bool,
    /// Failure probability when simulated.
    pub failure_rate: f64,
    /// Whether the continuous ranging loop is running.
    pub ranging: bool,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operation = self.operation.map_or("unknown", Operation::name);
        writeln!(f, "operation:   {}", operation)?;
        writeln!(f, "report:      {:#04x}", self.reported)?;
        writeln!(f, "attempts:    {} ({} missed)", self.attempts, self.misses)?;
        writeln!(
            f,
            "sensors:     range {} cm, battery {:.2} V, temp {:.1} C, depth {} cm, noise {} dB",
            self.sensors.range,
            self.sensors.battery as f64 / 100.0,
            self.sensors.temperature as f64 / 10.0,
            self.sensors.depth,
            self.sensors.noise
        )?;
        writeln!(f, "firmware:    {} lines buffered", self.firmware_lines)?;
        write!(
            f,
            "failures:    {}",
            if self.simulate_failures {
                format!("simulated at {:.0}%", self.failure_rate * 100.0)
            } else {
                "off".to_string()
            }
        )?;
        if self.ranging {
            write!(f, "\nranging:     continuous")?;
        }
        Ok(())
    }
}

// ============================================================================
// Device
// ============================================================================

/// The device role.
pub struct Device {
    engine: ProtocolEngine,
    config: DeviceConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<DeviceInner>,
    tasks: Mutex<DeviceTasks>,
}

impl Device {
    /// Create a device sending through `transport`.
    pub fn new(
        config: DeviceConfig,
        link: &LinkConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> EmulatorResult<Arc<Self>> {
        check_probability("failure_rate", config.failure_rate)?;
        check_probability("load_fault_rate", config.load_fault_rate)?;
        check_probability("detection.quick_id_quiet", config.detection.quick_id_quiet)?;
        check_probability("detection.quick_id_noisy", config.detection.quick_id_noisy)?;
        check_probability("detection.full_id_quiet", config.detection.full_id_quiet)?;
        check_probability("detection.full_id_noisy", config.detection.full_id_noisy)?;

        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let sensors = SensorReadings::random(&mut rng);
        let registers = initial_registers(&sensors)?;

        let engine = ProtocolEngine::new(&link.device_id, &link.controller_id, "device", transport);
        info!(
            "{}: ready (model {}, serial {})",
            engine.self_id(),
            DEFAULT_MODEL,
            DEFAULT_SERIAL
        );

        Ok(Arc::new(Device {
            engine,
            inner: Mutex::new(DeviceInner {
                registers,
                sensors,
                rng,
                firmware: Vec::new(),
                simulate_failures: config.simulate_failures,
                failure_rate: config.failure_rate,
            }),
            config,
            clock,
            tasks: Mutex::new(DeviceTasks::default()),
        }))
    }

    /// The device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Turn failure simulation on or off. The rate is clamped to `0..=1`.
    pub fn set_simulate_failures(&self, enabled: bool, rate: f64) {
        let mut inner = self.inner.lock();
        inner.simulate_failures = enabled;
        inner.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    }

    /// Inject sensor values and announce the resulting register changes.
    pub fn set_custom_sensor_values(&self, overrides: &SensorOverrides) -> EmulatorResult<()> {
        self.with_registers(|inner| {
            inner.sensors.apply_overrides(overrides);
            let sensors = inner.sensors;
            sensors.publish(&mut inner.registers)?;
            inner.registers.update(&catalog::AR_NOISE_DB, sensors.noise)
        })?;
        self.flush()
    }

    /// Current sensor readings.
    pub fn sensor_values(&self) -> SensorReadings {
        self.inner.lock().sensors
    }

    /// Value of one register.
    pub fn register_value(&self, name: impl AsRef<str>) -> EmulatorResult<RegisterValue> {
        Ok(self.inner.lock().registers.get(name)?.clone())
    }

    /// Firmware lines loaded since the last reboot.
    pub fn firmware_lines(&self) -> Vec<String> {
        self.inner.lock().firmware.clone()
    }

    /// Discard loaded firmware lines.
    pub fn clear_firmware(&self) {
        self.inner.lock().firmware.clear();
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> DeviceStatus {
        let ranging = self
            .tasks
            .lock()
            .ranging
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        let inner = self.inner.lock();
        let int = |def: &RegisterDef| inner.registers.get_int(def).unwrap_or_default();
        DeviceStatus {
            operation: Operation::from_code(int(&catalog::RSTATE_REQ)),
            reported: int(&catalog::RSTATE_RPT),
            attempts: int(&catalog::RR_CTR),
            misses: int(&catalog::RR_MISS),
            sensors: inner.sensors,
            firmware_lines: inner.firmware.len(),
            simulate_failures: inner.simulate_failures,
            failure_rate: inner.failure_rate,
            ranging,
        }
    }

    /// Write loaded firmware lines to a new file in the firmware directory.
    ///
    /// Returns `None` when nothing was loaded. On failure the lines are kept.
    pub fn persist_firmware(&self) -> EmulatorResult<Option<PathBuf>> {
        let lines = std::mem::take(&mut self.inner.lock().firmware);
        if lines.is_empty() {
            return Ok(None);
        }
        match self.write_firmware(&lines) {
            Ok(path) => {
                info!(
                    "{}: saved {} firmware lines to {}",
                    self.engine.self_id(),
                    lines.len(),
                    path.display()
                );
                Ok(Some(path))
            }
            Err(err) => {
                let mut inner = self.inner.lock();
                let newer = std::mem::replace(&mut inner.firmware, lines);
                inner.firmware.extend(newer);
                Err(err)
            }
        }
    }

    fn write_firmware(&self, lines: &[String]) -> EmulatorResult<PathBuf> {
        let dir = &self.config.firmware_dir;
        std::fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = dir.join(format!("firmware_{}.bin", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = dir.join(format!("firmware_{}_{}.bin", stamp, suffix));
            suffix += 1;
        }
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Abort every background task.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks
            .operation
            .take()
            .into_iter()
            .chain(tasks.ranging.take())
            .chain(tasks.misc.drain(..))
        {
            task.abort();
        }
        debug!("{}: shut down", self.engine.self_id());
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn with_registers<T>(
        &self,
        f: impl FnOnce(&mut DeviceInner) -> RegisterResult<T>,
    ) -> EmulatorResult<T> {
        Ok(f(&mut self.inner.lock())?)
    }

    fn report(&self, code: i64) -> EmulatorResult<()> {
        self.with_registers(|inner| inner.registers.update(&catalog::RSTATE_RPT, code))
    }

    /// Send one `RM` for everything changed since the last flush.
    fn flush(&self) -> EmulatorResult<()> {
        let Some(bitmap) = self.inner.lock().registers.take_changes() else {
            return Ok(());
        };
        let labels = self.engine.labels().to_labels();
        dss_metrics::metrics::counter!(metric_defs::CHANGE_NOTIFICATIONS.name, &labels)
            .increment(1);
        dss_metrics::metrics::histogram!(metric_defs::CHANGED_REGISTERS.name, &labels)
            .record(bitmap.count_ones() as f64);
        debug!("{}: registers changed {:#x}", self.engine.self_id(), bitmap);
        self.engine.send_request(&Request::RegisterMap { bitmap })?;
        Ok(())
    }

    fn failed(&self) -> bool {
        let mut inner = self.inner.lock();
        let rate = inner.failure_rate;
        inner.simulate_failures && inner.rng.gen::<f64>() < rate
    }

    async fn pause(&self, ms: u64) {
        self.clock.sleep(Duration::from_millis(ms)).await;
    }

    fn resolved(&self, operation: Operation, outcome: &'static str) {
        info!("{}: {} {}", self.engine.self_id(), operation, outcome);
        let labels = self.engine.labels().with(&[
            ("operation", operation.name().to_string()),
            ("outcome", outcome.to_string()),
        ]);
        dss_metrics::metrics::counter!(metric_defs::OPERATIONS_RESOLVED.name, &labels).increment(1);
    }

    fn stop_ranging(&self) {
        if let Some(task) = self.tasks.lock().ranging.take() {
            task.abort();
            debug!("{}: continuous ranging stopped", self.engine.self_id());
        }
    }

    fn spawn_misc(&self, handle: &Handle, future: impl std::future::Future<Output = ()> + Send + 'static) {
        let task = handle.spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.misc.retain(|task| !task.is_finished());
        tasks.misc.push(task);
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    fn start_operation(self: &Arc<Self>, operation: Operation) -> EmulatorResult<()> {
        let handle = Handle::try_current().map_err(|_| {
            EmulatorError::Config("operations need a running tokio runtime".to_string())
        })?;
        let device = Arc::clone(self);
        let task = handle.spawn(async move { device.run_operation(operation).await });
        if let Some(previous) = self.tasks.lock().operation.replace(task) {
            if !previous.is_finished() {
                debug!("{}: superseding running operation", self.engine.self_id());
            }
            previous.abort();
        }
        Ok(())
    }

    /// Execute one operation to completion.
    ///
    /// Writes made in the same step share one `RM`, but an operation flushes
    /// once per step rather than once overall: the `*_PENDING` report goes
    /// out before the simulated delay and the result after it, so the
    /// controller can follow each intermediate state.
    async fn run_operation(self: Arc<Self>, operation: Operation) {
        self.engine
            .history()
            .record(HistoryDirection::Marker, format!("operation {}", operation));
        info!("{}: starting {}", self.engine.self_id(), operation);
        let result = match operation {
            Operation::Idle => self.idle().await,
            Operation::Init => self.initialize().await,
            Operation::Connect => self.connect().await,
            Operation::SingleRange => self.single_range().await,
            Operation::ContinuousRange => self.continuous_range().await,
            Operation::Trigger => self.trigger().await,
            Operation::Broadcast => self.broadcast().await,
            Operation::QuickId => self.quick_id().await,
            Operation::FullId => self.full_id().await,
            Operation::NoiseTest => self.noise_test().await,
            Operation::Reboot => self.reboot().await,
        };
        if let Err(err) = result {
            warn!("{}: {} aborted: {}", self.engine.self_id(), operation, err);
        }
    }

    fn enter(&self, operation: Operation) -> EmulatorResult<()> {
        self.with_registers(|inner| {
            inner
                .registers
                .update(&catalog::RSTATE_MAP, 1i64 << operation.map_bit())
        })
    }

    async fn idle(&self) -> EmulatorResult<()> {
        self.stop_ranging();
        self.enter(Operation::Idle)?;
        self.with_registers(|inner| {
            for def in [&catalog::MODEL, &catalog::SN, &catalog::FIRMWARE] {
                inner.registers.dispatch_change(def)?;
            }
            Ok(())
        })?;
        self.flush()?;
        self.pause(self.config.timings.idle_ms).await;
        self.report(report::IDLE_ACK)?;
        self.resolved(Operation::Idle, "ok");
        self.flush()
    }

    async fn initialize(&self) -> EmulatorResult<()> {
        self.enter(Operation::Init)?;
        self.report(report::INIT_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.init_ms).await;

        if self.failed() {
            self.with_registers(|inner| {
                inner.registers.update(&catalog::SELFTEST, 1)?;
                inner.registers.update(&catalog::RSTATE_RPT, report::INIT_FAIL)
            })?;
            self.resolved(Operation::Init, "fail");
        } else {
            self.with_registers(|inner| {
                let table = &mut inner.registers;
                table.update(&catalog::SELFTEST, 0)?;
                for ((div, lgd, _), (divisor, legend)) in catalog::TELEMETRY_SLOTS
                    .iter()
                    .zip(DIVISORS.into_iter().zip(LEGENDS))
                {
                    table.update(div, divisor)?;
                    table.update(lgd, legend)?;
                }
                for def in [
                    &catalog::AR_ACP,
                    &catalog::RSTATE_MAP,
                    &catalog::RR_MAP,
                    &catalog::AR_THOLD_DB,
                ] {
                    table.dispatch_change(def)?;
                }
                table.update(&catalog::RSTATE_RPT, report::INIT_OK)
            })?;
            self.resolved(Operation::Init, "ok");
        }
        self.flush()
    }

    async fn connect(&self) -> EmulatorResult<()> {
        let timings = &self.config.timings;
        self.enter(Operation::Connect)?;
        self.report(report::CON_ID1)?;
        self.flush()?;
        self.pause(timings.connect_step_ms).await;

        self.report(report::CON_ID2)?;
        self.flush()?;
        self.pause(timings.connect_step_ms).await;
        if self.failed() {
            debug!("{}: connect retry", self.engine.self_id());
            self.pause(timings.connect_retry_ms).await;
        }

        self.report(report::CON_OK)?;
        self.resolved(Operation::Connect, "ok");
        self.flush()
    }

    async fn single_range(&self) -> EmulatorResult<()> {
        self.enter(Operation::SingleRange)?;
        self.report(report::RNG_SINGLE_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.single_range_ms).await;

        if self.failed() {
            self.with_registers(|inner| {
                increment(&mut inner.registers, &catalog::RR_MISS)?;
                inner.registers.update(&catalog::RSTATE_RPT, report::RNG_SINGLE_FAIL)
            })?;
            self.resolved(Operation::SingleRange, "fail");
        } else {
            self.with_registers(|inner| {
                let DeviceInner {
                    registers,
                    sensors,
                    rng,
                    ..
                } = inner;
                sensors.drift(rng);
                publish_ranging(registers, sensors)?;
                increment(registers, &catalog::RR_CTR)?;
                registers.update(&catalog::RR_MISS, 0)?;
                registers.update(&catalog::RSTATE_RPT, report::RNG_SINGLE_OK)
            })?;
            self.resolved(Operation::SingleRange, "ok");
        }
        self.flush()
    }

    async fn continuous_range(self: &Arc<Self>) -> EmulatorResult<()> {
        self.enter(Operation::ContinuousRange)?;
        self.report(report::RNG_CONT_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.continuous_start_ms).await;

        if self.failed() {
            self.with_registers(|inner| {
                increment(&mut inner.registers, &catalog::RR_MISS)?;
                inner.registers.update(&catalog::RSTATE_RPT, report::RNG_CONT_FAIL)
            })?;
            self.resolved(Operation::ContinuousRange, "fail");
            return self.flush();
        }

        self.with_registers(|inner| {
            let DeviceInner {
                registers,
                sensors,
                rng,
                ..
            } = inner;
            sensors.drift(rng);
            publish_ranging(registers, sensors)?;
            registers.update(&catalog::RR_MISS, 0)?;
            registers.update(&catalog::RSTATE_RPT, report::RNG_CONT_OK)
        })?;
        self.resolved(Operation::ContinuousRange, "ok");

        let device = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Err(err) = device.ranging_loop().await {
                warn!("{}: continuous ranging failed: {}", device.engine.self_id(), err);
            }
        });
        if let Some(previous) = self.tasks.lock().ranging.replace(task) {
            previous.abort();
        }
        self.flush()
    }

    /// Publish fresh ranging telemetry every period while `RSTATE_RPT`
    /// still reports continuous ranging.
    async fn ranging_loop(&self) -> EmulatorResult<()> {
        loop {
            self.pause(self.config.timings.continuous_period_ms).await;
            let ranging = self
                .with_registers(|inner| inner.registers.get_int(&catalog::RSTATE_RPT))?
                == report::RNG_CONT_OK;
            if !ranging {
                debug!("{}: leaving continuous ranging", self.engine.self_id());
                return Ok(());
            }
            self.with_registers(|inner| {
                let DeviceInner {
                    registers,
                    sensors,
                    rng,
                    ..
                } = inner;
                sensors.drift(rng);
                publish_ranging(registers, sensors)?;
                increment(registers, &catalog::RR_CTR).map(|_| ())
            })?;
            self.flush()?;
        }
    }

    async fn trigger(&self) -> EmulatorResult<()> {
        let timings = &self.config.timings;
        self.stop_ranging();
        self.enter(Operation::Trigger)?;
        self.report(report::AT_ARM_PENDING)?;
        self.flush()?;
        self.pause(timings.arm_ms).await;

        if self.failed() {
            self.record_miss(report::AT_ARM_FAIL)?;
            self.resolved(Operation::Trigger, "arm failed");
            return self.flush();
        }
        self.report(report::AT_ARM_OK)?;
        self.flush()?;
        self.pause(timings.trigger_delay_ms).await;

        self.report(report::AT_TRG_PENDING)?;
        self.flush()?;
        self.pause(timings.trigger_ms).await;

        if self.failed() {
            self.record_miss(report::AT_TRG_FAIL)?;
            self.resolved(Operation::Trigger, "fail");
        } else {
            self.with_registers(|inner| {
                inner.registers.update(&catalog::RR4_VAL, STATUS_RELEASED)?;
                inner.registers.update(&catalog::RSTATE_RPT, report::AT_TRG_OK)
            })?;
            self.resolved(Operation::Trigger, "released");
        }
        self.flush()
    }

    async fn broadcast(&self) -> EmulatorResult<()> {
        self.enter(Operation::Broadcast)?;
        self.report(report::BCR_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.broadcast_ms).await;

        self.with_registers(|inner| {
            increment(&mut inner.registers, &catalog::RR_CTR)?;
            inner.registers.update(&catalog::RSTATE_RPT, report::BCR_OK)
        })?;
        self.resolved(Operation::Broadcast, "ok");
        self.flush()
    }

    fn detection_probability(&self, quiet: f64, noisy: f64) -> EmulatorResult<f64> {
        self.with_registers(|inner| {
            let threshold = inner.registers.get_int(&catalog::AR_THOLD_DB)?;
            Ok(if inner.sensors.noise < threshold {
                quiet
            } else {
                noisy
            })
        })
    }

    async fn quick_id(&self) -> EmulatorResult<()> {
        let detection = &self.config.detection;
        self.enter(Operation::QuickId)?;
        self.report(report::PI_QID_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.quick_id_ms).await;

        let probability =
            self.detection_probability(detection.quick_id_quiet, detection.quick_id_noisy)?;
        let detected = self.with_registers(|inner| {
            if inner.rng.gen::<f64>() >= probability {
                return Ok(false);
            }
            let id: i64 = inner.rng.gen_range(100..=999);
            let range = inner.sensors.range;
            let table = &mut inner.registers;
            table.update(&catalog::PUBLIC_QID, id)?;
            table.update(&catalog::RRR_VAL, range)?;
            increment(table, &catalog::RR_CTR)?;
            table.update(&catalog::RR_MISS, 0)?;
            table.update(&catalog::RSTATE_RPT, report::PI_QID_DETECT)?;
            Ok(true)
        })?;

        if detected {
            self.resolved(Operation::QuickId, "detect");
        } else {
            self.record_miss(report::PI_QID_NODETECT)?;
            self.resolved(Operation::QuickId, "no detect");
        }
        self.flush()
    }

    async fn full_id(&self) -> EmulatorResult<()> {
        let detection = &self.config.detection;
        self.enter(Operation::FullId)?;
        self.report(report::PI_ID_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.full_id_ms).await;

        let probability =
            self.detection_probability(detection.full_id_quiet, detection.full_id_noisy)?;
        let detected = self.with_registers(|inner| {
            if inner.rng.gen::<f64>() >= probability {
                return Ok(false);
            }
            let id: i64 = inner.rng.gen_range(10000..=99999);
            let table = &mut inner.registers;
            table.update(&catalog::PUBLIC_ID, id)?;
            increment(table, &catalog::RR_CTR)?;
            table.update(&catalog::RR_MISS, 0)?;
            table.update(&catalog::RSTATE_RPT, report::PI_ID_DETECT)?;
            Ok(true)
        })?;

        if detected {
            self.resolved(Operation::FullId, "detect");
        } else {
            self.with_registers(|inner| increment(&mut inner.registers, &catalog::RR_CTR))?;
            self.record_miss(report::PI_ID_NODETECT)?;
            self.resolved(Operation::FullId, "no detect");
        }
        self.flush()
    }

    async fn noise_test(&self) -> EmulatorResult<()> {
        self.enter(Operation::NoiseTest)?;
        self.report(report::NT_PENDING)?;
        self.flush()?;
        self.pause(self.config.timings.noise_test_ms).await;

        self.with_registers(|inner| {
            let noise = inner.rng.gen_range(15..=80);
            inner.sensors.noise = noise;
            let table = &mut inner.registers;
            table.update(&catalog::AR_NOISE_DB, noise)?;
            increment(table, &catalog::RR_CTR)?;
            table.update(&catalog::RSTATE_RPT, report::NT_OK)
        })?;
        self.resolved(Operation::NoiseTest, "ok");
        self.flush()
    }

    async fn reboot(&self) -> EmulatorResult<()> {
        self.stop_ranging();
        self.enter(Operation::Reboot)?;
        if let Err(err) = self.persist_firmware() {
            warn!("{}: could not save firmware: {}", self.engine.self_id(), err);
        }
        self.report(report::RB_ACK)?;
        self.flush()?;
        self.pause(self.config.timings.reboot_ms).await;

        self.with_registers(|inner| inner.registers.set(&catalog::RSTATE_REQ, Operation::Idle.code()))?;
        self.resolved(Operation::Reboot, "ok");
        self.idle().await
    }

    fn record_miss(&self, code: i64) -> EmulatorResult<()> {
        self.with_registers(|inner| {
            increment(&mut inner.registers, &catalog::RR_MISS)?;
            inner.registers.update(&catalog::RSTATE_RPT, code)
        })
    }

    // ------------------------------------------------------------------------
    // Request handlers
    // ------------------------------------------------------------------------

    fn refuse(&self, id: &str, err: EmulatorError) -> EmulatorResult<()> {
        self.engine.respond(id, &Response::No)?;
        Err(err)
    }

    fn handle_get(&self, id: &str, name: String) -> EmulatorResult<()> {
        let value = self.inner.lock().registers.value_string(&name);
        match value {
            Ok(value) => self
                .engine
                .respond(id, &Response::RegisterValue { name, value }),
            Err(err) => self.refuse(id, err.into()),
        }
    }

    fn handle_set(self: &Arc<Self>, id: &str, name: String, value: String) -> EmulatorResult<()> {
        let outcome = {
            let mut inner = self.inner.lock();
            write_from_controller(&mut inner.registers, &name, &value)
        };
        match outcome {
            Ok(Write::Refused) => {
                warn!(
                    "{}: {} is not writable by the controller",
                    self.engine.self_id(),
                    name
                );
                self.engine.respond(id, &Response::No)
            }
            Ok(Write::Stored) => self.engine.respond(id, &Response::Ok),
            Ok(Write::Operation(operation)) => {
                self.engine.respond(id, &Response::Ok)?;
                self.start_operation(operation)
            }
            Err(err) => self.refuse(id, err),
        }
    }

    fn handle_set_protected(
        &self,
        id: &str,
        password: &str,
        name: &str,
        value: &str,
    ) -> EmulatorResult<()> {
        if password != self.config.password {
            warn!("{}: protected write to {} refused", self.engine.self_id(), name);
            return self.engine.respond(id, &Response::No);
        }
        let written = self.inner.lock().registers.set_value_string(name, value);
        match written {
            Ok(()) => self.engine.respond(id, &Response::Ok),
            Err(err) => self.refuse(id, err.into()),
        }
    }

    fn handle_set_identity(&self, id: &str, password: &str, serial: &str) -> EmulatorResult<()> {
        if password != self.config.password {
            warn!("{}: identity change refused", self.engine.self_id());
            return self.engine.respond(id, &Response::No);
        }
        let written = self
            .inner
            .lock()
            .registers
            .set_value_string(&catalog::SN, serial);
        match written {
            Ok(()) => {
                info!("{}: serial number set to {}", self.engine.self_id(), serial);
                self.engine.respond(id, &Response::Ok)
            }
            Err(err) => self.refuse(id, err.into()),
        }
    }

    fn handle_factory_test(self: &Arc<Self>, id: &str) -> EmulatorResult<()> {
        let handle = Handle::try_current().map_err(|_| {
            EmulatorError::Config("factory test needs a running tokio runtime".to_string())
        })?;
        let device = Arc::clone(self);
        let id = id.to_string();
        self.spawn_misc(&handle, async move {
            device.pause(device.config.timings.factory_test_ms).await;
            let passed = device.with_registers(|inner| inner.registers.set(&catalog::SELFTEST, 0));
            let sent = passed.and_then(|()| device.engine.respond(&id, &Response::Ok));
            if let Err(err) = sent {
                warn!("{}: factory test: {}", device.engine.self_id(), err);
            }
        });
        Ok(())
    }

    fn handle_load(&self, id: &str, line: &str) -> EmulatorResult<()> {
        let accepted = {
            let mut inner = self.inner.lock();
            let rate = self.config.load_fault_rate;
            if rate > 0.0 && inner.rng.gen::<f64>() < rate {
                false
            } else {
                inner.firmware.push(line.trim().to_string());
                true
            }
        };
        if accepted {
            self.engine.respond(id, &Response::Ack)
        } else {
            debug!("{}: simulated load fault", self.engine.self_id());
            self.engine.respond(id, &Response::Nak)
        }
    }

    fn handle_reboot_request(&self, id: &str) -> EmulatorResult<()> {
        match self.persist_firmware() {
            Ok(_) => self.engine.respond(id, &Response::Ok),
            Err(err) => self.refuse(id, err),
        }
    }
}

impl Role for Device {
    fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) -> EmulatorResult<()> {
        let request = match Message::from_frame(&frame)? {
            Message::Request(request) => request,
            Message::Response(response) => {
                return Err(EmulatorError::Protocol(format!(
                    "unexpected {} from {}",
                    response.opcode(),
                    frame.source
                )))
            }
        };
        let id = frame.id.as_str();
        match request {
            Request::GetRegister { name } => self.handle_get(id, name),
            Request::SetRegister { name, value } => self.handle_set(id, name, value),
            Request::SetProtected {
                password,
                name,
                value,
            } => self.handle_set_protected(id, &password, &name, &value),
            Request::GetIdentity => {
                let serial = self.inner.lock().registers.value_string(&catalog::SN)?;
                self.engine.respond(id, &Response::Identity { serial })
            }
            Request::SetIdentity { password, serial } => {
                self.handle_set_identity(id, &password, &serial)
            }
            Request::FactoryTest => self.handle_factory_test(id),
            Request::LoadLine { line } => self.handle_load(id, &line),
            Request::Reboot => self.handle_reboot_request(id),
            Request::RegisterMap { .. } => Err(EmulatorError::Protocol(
                "register map notifications only flow from the device".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("engine", &self.engine)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// Register helpers
// ============================================================================

enum Write {
    Stored,
    Refused,
    Operation(Operation),
}

fn write_from_controller(table: &mut RegisterTable, name: &str, value: &str) -> EmulatorResult<Write> {
    if !table.lookup(name)?.direction().controller_writable() {
        return Ok(Write::Refused);
    }
    if name == catalog::RSTATE_REQ.name {
        let operation = RegisterValue::parse(DataType::Integer, value)
            .and_then(|v| v.as_i64())
            .and_then(Operation::from_code)
            .ok_or_else(|| {
                EmulatorError::Protocol(format!("unknown operation request {:?}", value))
            })?;
        table.set(name, operation.code())?;
        return Ok(Write::Operation(operation));
    }
    table.set_value_string(name, value)?;
    Ok(Write::Stored)
}

fn increment(table: &mut RegisterTable, def: &RegisterDef) -> RegisterResult<i64> {
    let next = table.get_int(def)? + 1;
    table.update(def, next)?;
    Ok(next)
}

fn publish_ranging(table: &mut RegisterTable, sensors: &SensorReadings) -> RegisterResult<()> {
    sensors.publish(table)?;
    table.dispatch_change(&catalog::RR4_VAL)
}

fn initial_registers(sensors: &SensorReadings) -> RegisterResult<RegisterTable> {
    let mut table = RegisterTable::standard();
    table.set(&catalog::MODEL, DEFAULT_MODEL)?;
    table.set(&catalog::SN, DEFAULT_SERIAL)?;
    table.set(&catalog::FIRMWARE, DEFAULT_FIRMWARE)?;
    table.set(&catalog::SELFTEST, 0)?;
    table.set(&catalog::AR_ACP, DEFAULT_ACP)?;
    table.set(&catalog::AR_THOLD_DB, DEFAULT_THRESHOLD_DB)?;
    table.set(&catalog::AR_NOISE_DB, sensors.noise)?;
    for ((div, lgd, _), (divisor, legend)) in catalog::TELEMETRY_SLOTS
        .iter()
        .zip(DIVISORS.into_iter().zip(LEGENDS))
    {
        table.set(div, divisor)?;
        table.set(lgd, legend)?;
    }
    table.set(&catalog::RRR_VAL, sensors.range)?;
    table.set(&catalog::RR1_VAL, sensors.battery)?;
    table.set(&catalog::RR2_VAL, sensors.temperature)?;
    table.set(&catalog::RR3_VAL, sensors.depth)?;
    table.set(&catalog::RR4_VAL, STATUS_ARMED)?;
    Ok(table)
}

fn check_probability(name: &str, value: f64) -> EmulatorResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EmulatorError::Config(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_registers() {
        let sensors = SensorReadings {
            range: 2000,
            battery: 1300,
            temperature: 150,
            depth: 800,
            noise: 30,
        };
        let table = initial_registers(&sensors).unwrap();
        assert_eq!(table.get_int(&catalog::FIRMWARE).unwrap(), 0x0123);
        assert_eq!(table.get_int(&catalog::RR2_DIV).unwrap(), 10);
        assert_eq!(table.get_text(&catalog::RR3_LGD).unwrap(), "Depth m");
        assert_eq!(table.get_int(&catalog::AR_NOISE_DB).unwrap(), 30);
        assert_eq!(table.change_map(), 0);
    }

    #[test]
    fn test_controller_write_rules() {
        let mut table = RegisterTable::standard();
        assert!(matches!(
            write_from_controller(&mut table, "PIN_ID", "4321"),
            Ok(Write::Stored)
        ));
        assert_eq!(table.get_int("PIN_ID").unwrap(), 4321);
        assert!(matches!(
            write_from_controller(&mut table, "RSTATE_RPT", "1"),
            Ok(Write::Refused)
        ));
        assert!(matches!(
            write_from_controller(&mut table, "RSTATE_REQ", "0x30"),
            Ok(Write::Operation(Operation::SingleRange))
        ));
        assert!(matches!(
            write_from_controller(&mut table, "RSTATE_REQ", "0x35"),
            Err(EmulatorError::Protocol(_))
        ));
        assert!(matches!(
            write_from_controller(&mut table, "NOPE", "1"),
            Err(EmulatorError::Register(_))
        ));
        // Writes from the controller are not echoed back as changes.
        assert_eq!(table.change_map(), 0);
    }

    #[test]
    fn test_probability_bounds() {
        assert!(check_probability("rate", 0.0).is_ok());
        assert!(check_probability("rate", 1.0).is_ok());
        assert!(check_probability("rate", 1.5).is_err());
        assert!(check_probability("rate", f64::NAN).is_err());
    }
}
