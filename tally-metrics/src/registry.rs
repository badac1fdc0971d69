use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::bucket::{BucketAggregator, SWEEP_INTERVAL, Sweeper};
use crate::counter::Counter;
use crate::event::{Event, EventType, EventValue, now_millis};
use crate::gauge::{Gauge, GaugeMode, GaugeRunner, Meter};
use crate::indexer::CollisionIndexer;
use crate::key::{MetricKey, Tags, merge_tags};
use crate::listener::{Listener, same_listener};
use crate::reservoir::{
    Reservoir, ReservoirConfig, ReservoirConfigError, ReservoirFlush, ReservoirWorker,
};
use crate::scheduler::Scheduler;
use crate::timer::{Timer, TimerMode};

/// Separates the components of a metric name.
pub const SEPARATOR: char = '.';

/// Name of the metric that carries alerts, appended to the registry prefix.
pub const ALERTS_METRIC: &str = "alerts";

/// Tag carrying the name of an alert.
pub const ALERT_NAME_TAG: &str = "alertName";

/// Default tag for the host name.
pub const HOST_TAG: &str = "host";

/// Default tag for the datacenter.
pub const DATACENTER_TAG: &str = "datacenter";

/// Value of events and alerts emitted without an explicit value.
pub const DEFAULT_EVENT_VALUE: i64 = 1;

/// An error returned when configuring a [`Registry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A component of the metric prefix is empty or contains the separator.
    #[error("invalid {field} {value:?}: must be non-empty and must not contain '.'")]
    InvalidIdentity {
        /// The name of the invalid component.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
    /// A schedule interval is zero.
    #[error("invalid schedule for {name}: interval must be greater than zero")]
    InvalidInterval {
        /// The metric that was being scheduled.
        name: String,
    },
    /// Reservoirs were reconfigured after the first one was created.
    #[error("reservoirs are already in use and can no longer be reconfigured")]
    ReservoirInUse,
    /// The reservoir configuration is invalid.
    #[error("invalid reservoir configuration")]
    InvalidReservoir(#[from] ReservoirConfigError),
    /// A background thread could not be started.
    #[error("failed to start background worker")]
    Spawn(#[from] io::Error),
}

fn validate_component(field: &'static str, value: &str) -> Result<(), RegistryError> {
    if value.is_empty() || value.contains(SEPARATOR) {
        return Err(RegistryError::InvalidIdentity {
            field,
            value: value.to_owned(),
        });
    }
    Ok(())
}

/// Configures and creates a [`Registry`].
///
/// # Example
///
/// ```
/// use tally_metrics::RegistryBuilder;
///
/// let registry = RegistryBuilder::new("shop", "checkout", "prod")
///     .host("web1")
///     .tag("team", "payments")
///     .build()
///     .unwrap();
///
/// assert_eq!(registry.prefix(), "shop.checkout.prod.");
/// ```
#[derive(Clone, Debug)]
pub struct RegistryBuilder {
    namespace: String,
    application: String,
    app_type: String,
    tags: Tags,
    use_start_time: bool,
    timer_mode: TimerMode,
    bucket_window: Option<Duration>,
    reservoir: ReservoirConfig,
}

impl RegistryBuilder {
    /// Creates a builder for the prefix `namespace.application.app_type.`.
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        app_type: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            app_type: app_type.into(),
            tags: Tags::new(),
            use_start_time: false,
            timer_mode: TimerMode::Raw,
            bucket_window: None,
            reservoir: ReservoirConfig::default(),
        }
    }

    /// Sets the `host` default tag. The value is lower-cased.
    pub fn host(self, host: impl AsRef<str>) -> Self {
        self.tag(HOST_TAG, host.as_ref().to_lowercase())
    }

    /// Sets the `datacenter` default tag. The value is lower-cased.
    pub fn datacenter(self, datacenter: impl AsRef<str>) -> Self {
        self.tag(DATACENTER_TAG, datacenter.as_ref().to_lowercase())
    }

    /// Adds a default tag to every event of the registry.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds several default tags.
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Timestamps timer events at the start of the measurement instead of the end.
    ///
    /// Defaults to `false`.
    pub fn use_start_time(mut self, use_start_time: bool) -> Self {
        self.use_start_time = use_start_time;
        self
    }

    /// Sets the default [`TimerMode`] of timers. Defaults to [`TimerMode::Raw`].
    pub fn timer_mode(mut self, mode: TimerMode) -> Self {
        self.timer_mode = mode;
        self
    }

    /// Aggregates timers, events and alerts into windows of the given size.
    ///
    /// Windows shorter than one second are raised to one second. Counters and gauges are always
    /// dispatched directly.
    pub fn bucket_window(mut self, window: Duration) -> Self {
        self.bucket_window = Some(window);
        self
    }

    /// Sets the configuration of percentile reservoirs.
    pub fn reservoir(mut self, config: ReservoirConfig) -> Self {
        self.reservoir = config;
        self
    }

    /// Returns the lower-cased metric prefix, including the trailing separator.
    pub fn prefix(&self) -> Result<String, RegistryError> {
        validate_component("namespace", &self.namespace)?;
        validate_component("application", &self.application)?;
        validate_component("app_type", &self.app_type)?;

        let prefix = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}",
            self.namespace, self.application, self.app_type
        );
        Ok(prefix.to_lowercase())
    }

    /// Returns the key under which a registry of this configuration is shared.
    ///
    /// The key consists of the prefix and the default tags.
    pub fn identity(&self) -> Result<MetricKey, RegistryError> {
        Ok(MetricKey::new(self.prefix()?, self.tags.clone()))
    }

    /// Validates the configuration and creates the registry.
    ///
    /// Background threads are started lazily on first use.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let prefix = self.prefix()?;
        self.reservoir.validate()?;

        let inner = Arc::new_cyclic(|me| RegistryInner {
            me: me.clone(),
            prefix,
            tags: self.tags,
            use_start_time: self.use_start_time,
            timer_mode: self.timer_mode,
            listeners: ArcSwap::from_pointee(Vec::new()),
            listeners_lock: Mutex::new(()),
            indexing: AtomicBool::new(false),
            indexer: CollisionIndexer::default(),
            counters: papaya::HashMap::new(),
            gauges: papaya::HashMap::new(),
            meters: papaya::HashMap::new(),
            reservoirs: papaya::HashMap::new(),
            reservoir_settings: Mutex::new(ReservoirSettings {
                config: Arc::new(self.reservoir),
                frozen: false,
            }),
            buckets: self.bucket_window.map(BucketAggregator::new),
            sweeper_running: AtomicBool::new(false),
            background: Mutex::new(Background::default()),
        });

        tally_log::debug!("created metric registry {}", inner.prefix);
        Ok(Registry { inner })
    }
}

struct ReservoirSettings {
    config: Arc<ReservoirConfig>,
    frozen: bool,
}

/// A scheduled gauge or meter.
///
/// Schedules outlive the scheduler. They are spawned again whenever the scheduler restarts.
#[derive(Clone)]
struct Schedule {
    name: String,
    tags: Tags,
    gauge: Arc<dyn Gauge>,
    mode: GaugeMode,
    period: Duration,
}

impl Schedule {
    fn runner(&self) -> GaugeRunner {
        GaugeRunner::new(
            self.name.clone(),
            self.tags.clone(),
            Arc::clone(&self.gauge),
            self.mode,
        )
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("mode", &self.mode)
            .field("period", &self.period)
            .finish()
    }
}

/// Lazily started background machinery.
#[derive(Debug, Default)]
struct Background {
    scheduler: Option<Scheduler>,
    schedules: Vec<Schedule>,
    reservoir_worker: Option<ReservoirWorker>,
    sweeper: Option<Sweeper>,
}

pub(crate) struct RegistryInner {
    me: Weak<RegistryInner>,
    prefix: String,
    tags: Tags,
    use_start_time: bool,
    timer_mode: TimerMode,

    listeners: ArcSwap<Vec<Arc<dyn Listener>>>,
    /// Serializes listener updates and background shutdown.
    listeners_lock: Mutex<()>,
    indexing: AtomicBool,
    indexer: CollisionIndexer,

    counters: papaya::HashMap<MetricKey, Counter>,
    gauges: papaya::HashMap<MetricKey, Arc<dyn Gauge>>,
    meters: papaya::HashMap<MetricKey, Meter>,
    reservoirs: papaya::HashMap<MetricKey, Arc<Reservoir>>,
    reservoir_settings: Mutex<ReservoirSettings>,
    buckets: Option<BucketAggregator>,

    sweeper_running: AtomicBool,
    background: Mutex<Background>,
}

impl RegistryInner {
    fn prefixed(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn merged_tags(&self, metric: &Tags, custom: &Tags) -> Tags {
        merge_tags([&self.tags, metric, custom])
    }

    /// Routes an event into the bucket aggregator or dispatches it directly.
    pub(crate) fn emit(&self, event: Event, force_index: bool) {
        if let Some(buckets) = &self.buckets {
            if matches!(event.ty, EventType::Timer | EventType::Event | EventType::Alert) {
                self.ensure_sweeper();
                for flushed in buckets.add(&event, now_millis()) {
                    self.dispatch(flushed, false);
                }
                return;
            }
        }

        self.dispatch(event, force_index);
    }

    /// Calls every listener in registration order on the current thread.
    fn dispatch(&self, mut event: Event, force_index: bool) {
        if force_index || self.indexing.load(Ordering::Relaxed) {
            self.indexer.stamp(&mut event);
        }

        for listener in self.listeners.load().iter() {
            listener.on_event(&event);
        }
    }

    fn sample(&self, key: MetricKey, value: EventValue) {
        let reservoirs = self.reservoirs.pin();
        let reservoir = match reservoirs.get(&key) {
            Some(reservoir) => reservoir,
            None => {
                let config = self.freeze_reservoir_config();
                reservoirs.get_or_insert_with(key.clone(), || Arc::new(Reservoir::new(key, config)))
            }
        };

        if let Some(flush) = reservoir.update(value) {
            self.submit_flush(flush);
        }
    }

    fn freeze_reservoir_config(&self) -> Arc<ReservoirConfig> {
        let mut settings = self.reservoir_settings.lock();
        settings.frozen = true;
        Arc::clone(&settings.config)
    }

    fn submit_flush(&self, flush: ReservoirFlush) {
        let mut background = self.background.lock();
        let worker = match background.reservoir_worker.take() {
            Some(worker) => worker,
            None => {
                let me = self.me.clone();
                let spawned = ReservoirWorker::spawn("tally-reservoir".to_owned(), move |events| {
                    if let Some(inner) = me.upgrade() {
                        for event in events {
                            inner.dispatch(event, false);
                        }
                    }
                });
                match spawned {
                    Ok(worker) => worker,
                    Err(error) => {
                        tally_log::error!(
                            "failed to start reservoir worker: {}",
                            tally_log::LogError(&error)
                        );
                        return;
                    }
                }
            }
        };

        background.reservoir_worker.insert(worker).submit(flush);
    }

    fn ensure_sweeper(&self) {
        if self.sweeper_running.load(Ordering::Acquire) {
            return;
        }

        let mut background = self.background.lock();
        if background.sweeper.is_some() {
            return;
        }

        let me = self.me.clone();
        let spawned = Sweeper::spawn("tally-sweeper".to_owned(), SWEEP_INTERVAL, move || {
            let Some(inner) = me.upgrade() else {
                return false;
            };
            inner.sweep_buckets();
            true
        });

        match spawned {
            Ok(sweeper) => {
                background.sweeper = Some(sweeper);
                self.sweeper_running.store(true, Ordering::Release);
            }
            Err(error) => {
                tally_log::error!(
                    "failed to start bucket sweeper: {}",
                    tally_log::LogError(&error)
                );
            }
        }
    }

    fn sweep_buckets(&self) {
        if let Some(buckets) = &self.buckets {
            for event in buckets.flush_expired(now_millis()) {
                self.dispatch(event, false);
            }
        }
    }

    fn spawn_schedule(&self, scheduler: &Scheduler, schedule: &Schedule) {
        let mut runner = schedule.runner();
        let me = self.me.clone();
        scheduler.spawn_periodic(Duration::ZERO, schedule.period, move || {
            if let Some(inner) = me.upgrade() {
                if let Some(event) = runner.tick(now_millis()) {
                    inner.emit(event, false);
                }
            }
        });
    }

    /// Creates a scheduler running all `schedules`.
    fn start_scheduler(&self, schedules: &[Schedule]) -> Result<Scheduler, RegistryError> {
        let scheduler = Scheduler::new("tally-scheduler")?;
        for schedule in schedules {
            self.spawn_schedule(&scheduler, schedule);
        }
        Ok(scheduler)
    }

    /// Records `schedule` and starts polling it, starting the scheduler if needed.
    fn add_schedule(&self, schedule: Schedule) -> Result<(), RegistryError> {
        let mut guard = self.background.lock();
        let background = &mut *guard;

        let scheduler = match background.scheduler.take() {
            Some(scheduler) => scheduler,
            // Schedules stopped by an earlier shutdown resume along with the new one.
            None => self.start_scheduler(&background.schedules)?,
        };
        self.spawn_schedule(&scheduler, &schedule);
        background.scheduler = Some(scheduler);
        background.schedules.push(schedule);
        Ok(())
    }

    /// Restarts the scheduler for all known schedules after a shutdown.
    fn resume_schedules(&self) {
        let mut guard = self.background.lock();
        let background = &mut *guard;
        if background.scheduler.is_some() || background.schedules.is_empty() {
            return;
        }

        match self.start_scheduler(&background.schedules) {
            Ok(scheduler) => {
                background.scheduler = Some(scheduler);
                tally_log::debug!(
                    "resumed {} scheduled gauges of {}",
                    background.schedules.len(),
                    self.prefix
                );
            }
            Err(error) => {
                tally_log::error!(
                    "failed to resume scheduled gauges: {}",
                    tally_log::LogError(&error)
                );
            }
        }
    }

    fn update_listeners(&self, listeners: Vec<Arc<dyn Listener>>) {
        let indexing = listeners.iter().any(|l| l.requires_indexing());
        self.indexing.store(indexing, Ordering::Relaxed);
        self.listeners.store(Arc::new(listeners));
    }

    /// Stops the scheduler and background workers. They restart on next use.
    ///
    /// Scheduled gauges and meters stay registered and resume with the next listener.
    fn shutdown_background(&self) {
        let stopped = {
            let mut background = self.background.lock();
            (
                background.scheduler.take(),
                background.reservoir_worker.take(),
                background.sweeper.take(),
            )
        };
        self.sweeper_running.store(false, Ordering::Release);
        drop(stopped);
        tally_log::debug!("stopped background workers of {}", self.prefix);
    }
}

/// The central factory for metrics.
///
/// A registry owns a name prefix and default tags, caches counters, gauges, meters and
/// reservoirs, and dispatches every event to its [`Listener`]s. Handles are cheap to clone and
/// share all state.
///
/// Background threads for scheduled gauges, reservoir computation and bucket sweeping are started
/// on demand. They are stopped when the last listener is removed, and when the last handle is
/// dropped. Scheduled gauges and meters resume as soon as a listener is added again.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// The lower-cased metric prefix, including the trailing separator.
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// The default tags attached to every event.
    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    /// The key under which this registry is shared in [`Registries`](crate::Registries).
    pub fn identity(&self) -> MetricKey {
        MetricKey::new(self.inner.prefix.clone(), self.inner.tags.clone())
    }

    /// Returns `true` if timers are timestamped at their start.
    pub fn uses_start_time(&self) -> bool {
        self.inner.use_start_time
    }

    /// Returns `true` if both handles refer to the same registry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the counter for `name`, creating it on first use.
    pub fn counter(&self, name: &str) -> Counter {
        self.counter_with_tags(name, Tags::new())
    }

    /// Returns the counter for `name` and `tags`, creating it on first use.
    ///
    /// Concurrent first calls for the same key all receive the same counter.
    pub fn counter_with_tags(&self, name: &str, tags: Tags) -> Counter {
        let key = MetricKey::new(name, tags);
        let counters = self.inner.counters.pin();
        if let Some(counter) = counters.get(&key) {
            return counter.clone();
        }

        let merged = self.inner.merged_tags(key.tags(), &Tags::new());
        let name = self.inner.prefixed(key.name());
        let registry = self.inner.me.clone();
        counters
            .get_or_insert_with(key, || Counter::new(name, merged, registry))
            .clone()
    }

    /// Starts a timer for `name`.
    pub fn timer(&self, name: &str) -> Timer {
        self.timer_with_tags(name, Tags::new())
    }

    /// Starts a timer for `name` with additional tags.
    pub fn timer_with_tags(&self, name: &str, tags: Tags) -> Timer {
        Timer::start(self.clone(), name.to_owned(), tags, self.inner.timer_mode)
    }

    pub(crate) fn record_timer(
        &self,
        name: &str,
        tags: &Tags,
        start_millis: u64,
        duration: u64,
        mode: TimerMode,
    ) {
        let inner = &self.inner;
        let timestamp = if inner.use_start_time {
            start_millis
        } else {
            start_millis + duration
        };

        let name = inner.prefixed(name);
        let tags = inner.merged_tags(tags, &Tags::new());
        match mode {
            TimerMode::Raw | TimerMode::Indexed => {
                let event = Event::new(name, tags, timestamp, duration, EventType::Timer);
                inner.emit(event, mode == TimerMode::Indexed);
            }
            TimerMode::Percentile => inner.sample(MetricKey::new(name, tags), duration.into()),
        }
    }

    /// Emits an ad-hoc event with the value [`DEFAULT_EVENT_VALUE`].
    pub fn event(&self, name: &str) {
        self.event_with_tags(name, DEFAULT_EVENT_VALUE, Tags::new());
    }

    /// Emits an ad-hoc event with a value.
    pub fn event_value(&self, name: &str, value: impl Into<EventValue>) {
        self.event_with_tags(name, value, Tags::new());
    }

    /// Emits an ad-hoc event with additional tags.
    pub fn event_with_tags(&self, name: &str, value: impl Into<EventValue>, tags: Tags) {
        let inner = &self.inner;
        let event = Event::new(
            inner.prefixed(name),
            inner.merged_tags(&tags, &Tags::new()),
            now_millis(),
            value,
            EventType::Event,
        );
        inner.emit(event, false);
    }

    /// Emits an alert.
    ///
    /// Alerts of all names share the metric `<prefix>alerts` and are told apart by the
    /// `alertName` tag. The alert carries the value [`DEFAULT_EVENT_VALUE`].
    pub fn alert(&self, name: &str) {
        self.alert_with_tags(name, DEFAULT_EVENT_VALUE, Tags::new());
    }

    /// Emits an alert with a value.
    pub fn alert_value(&self, name: &str, value: impl Into<EventValue>) {
        self.alert_with_tags(name, value, Tags::new());
    }

    /// Emits an alert with additional tags.
    pub fn alert_with_tags(&self, name: &str, value: impl Into<EventValue>, tags: Tags) {
        let inner = &self.inner;
        let alert_tag = crate::tags! { ALERT_NAME_TAG => name };
        let event = Event::new(
            inner.prefixed(ALERTS_METRIC),
            inner.merged_tags(&tags, &alert_tag),
            now_millis(),
            value,
            EventType::Alert,
        );
        inner.emit(event, false);
    }

    /// Feeds a sample into the percentile reservoir of `name` and `tags`.
    ///
    /// Whenever the reservoir fills up, its percentiles and statistics are computed in the
    /// background and emitted as `<name>.p<N>`, `<name>.min` and so on.
    pub fn sample(&self, name: &str, value: impl Into<EventValue>, tags: Tags) {
        let inner = &self.inner;
        let key = MetricKey::new(inner.prefixed(name), inner.merged_tags(&tags, &Tags::new()));
        inner.sample(key, value.into());
    }

    /// Replaces the reservoir configuration.
    ///
    /// Fails once any reservoir has been created, or if the configuration is invalid. Nothing is
    /// changed on failure.
    pub fn configure_reservoirs(&self, config: ReservoirConfig) -> Result<(), RegistryError> {
        config.validate()?;

        let mut settings = self.inner.reservoir_settings.lock();
        if settings.frozen {
            return Err(RegistryError::ReservoirInUse);
        }
        settings.config = Arc::new(config);
        Ok(())
    }

    /// Polls `gauge` every `interval` and emits its value.
    ///
    /// Scheduling a gauge for a name and tags that are already scheduled does nothing.
    pub fn schedule_gauge<G: Gauge>(
        &self,
        name: &str,
        interval: Duration,
        gauge: G,
        tags: Tags,
    ) -> Result<(), RegistryError> {
        check_interval(name, interval)?;
        self.schedule_runner(name, tags, Arc::new(gauge), GaugeMode::Direct, interval)
    }

    /// Polls `gauge` every `collect` interval and emits the maximum once per `report` interval.
    ///
    /// Scheduling a gauge for a name and tags that are already scheduled does nothing.
    pub fn schedule_max_gauge<G: Gauge>(
        &self,
        name: &str,
        collect: Duration,
        report: Duration,
        gauge: G,
        tags: Tags,
    ) -> Result<(), RegistryError> {
        check_interval(name, collect)?;
        check_interval(name, report)?;
        let mode = GaugeMode::max_windowed(collect, report);
        self.schedule_runner(name, tags, Arc::new(gauge), mode, collect)
    }

    fn schedule_runner(
        &self,
        name: &str,
        tags: Tags,
        gauge: Arc<dyn Gauge>,
        mode: GaugeMode,
        period: Duration,
    ) -> Result<(), RegistryError> {
        let inner = &self.inner;
        let key = MetricKey::new(name, tags);
        let gauges = inner.gauges.pin();
        if gauges.contains_key(&key) {
            return Ok(());
        }

        if gauges.try_insert(key.clone(), Arc::clone(&gauge)).is_err() {
            // Scheduled concurrently.
            return Ok(());
        }

        let schedule = Schedule {
            name: inner.prefixed(name),
            tags: inner.merged_tags(key.tags(), &Tags::new()),
            gauge,
            mode,
            period,
        };
        inner.add_schedule(schedule).inspect_err(|_| {
            gauges.remove(&key);
        })
    }

    /// Returns the meter for `name` and `tags`, emitting its rate every `interval`.
    ///
    /// Repeated calls with the same name and tags return the already scheduled meter.
    pub fn schedule_meter(
        &self,
        name: &str,
        interval: Duration,
        tags: Tags,
    ) -> Result<Meter, RegistryError> {
        check_interval(name, interval)?;

        let inner = &self.inner;
        let key = MetricKey::new(name, tags);
        let meters = inner.meters.pin();
        if let Some(meter) = meters.get(&key) {
            return Ok(meter.clone());
        }

        let meter = match meters.try_insert(key.clone(), Meter::new()) {
            Ok(inserted) => inserted.clone(),
            Err(occupied) => return Ok(occupied.current.clone()),
        };

        let schedule = Schedule {
            name: inner.prefixed(name),
            tags: inner.merged_tags(key.tags(), &Tags::new()),
            gauge: Arc::new(meter.clone()),
            mode: GaugeMode::Direct,
            period: interval,
        };
        match inner.add_schedule(schedule) {
            Ok(()) => Ok(meter),
            Err(error) => {
                meters.remove(&key);
                Err(error)
            }
        }
    }

    /// Registers a listener. Adding the same listener twice has no effect.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        let inner = &self.inner;
        let _guard = inner.listeners_lock.lock();

        let current = inner.listeners.load_full();
        if current.iter().any(|l| same_listener(l, &listener)) {
            return;
        }

        let mut listeners = Vec::clone(&current);
        listeners.push(listener);
        inner.update_listeners(listeners);
        inner.resume_schedules();
    }

    /// Unregisters a listener, stopping it first if `stop` is set.
    ///
    /// When the last listener is removed, background workers are shut down. Returns `false` if
    /// the listener was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>, stop: bool) -> bool {
        let inner = &self.inner;
        let removed = {
            let _guard = inner.listeners_lock.lock();
            let mut listeners = Vec::clone(&inner.listeners.load_full());
            let Some(position) = listeners.iter().position(|l| same_listener(l, listener)) else {
                return false;
            };

            let removed = listeners.remove(position);
            let now_empty = listeners.is_empty();
            inner.update_listeners(listeners);
            if now_empty {
                inner.shutdown_background();
            }
            removed
        };

        if stop {
            removed.stop();
        }
        true
    }

    /// Stops and unregisters all listeners and shuts down background workers.
    pub fn remove_all_listeners(&self) {
        let inner = &self.inner;
        let removed = {
            let _guard = inner.listeners_lock.lock();
            let removed = inner.listeners.swap(Arc::new(Vec::new()));
            inner.indexing.store(false, Ordering::Relaxed);
            inner.shutdown_background();
            removed
        };

        for listener in removed.iter() {
            listener.stop();
        }
    }

    /// The currently registered listeners in registration order.
    pub fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        Vec::clone(&self.inner.listeners.load())
    }
}

fn check_interval(name: &str, interval: Duration) -> Result<(), RegistryError> {
    if interval.is_zero() {
        return Err(RegistryError::InvalidInterval {
            name: name.to_owned(),
        });
    }
    Ok(())
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("prefix", &self.inner.prefix)
            .field("tags", &self.inner.tags)
            .field("listeners", &self.inner.listeners.load().len())
            .finish()
    }
}
