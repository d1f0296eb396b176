use crate::progress::engine::EngineLog;
use crate::runtime::telemetry;
use crate::transport::options::{TransportOptions, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::transport::signing::SigningMode;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_V5_URL: &str = "http://v5.mersenne.org/v5server/";
pub const DEFAULT_SITE_URL: &str = "https://www.mersenne.org/";
pub const DEFAULT_WORK_FILE: &str = "worktodo.ini";
pub const DEFAULT_RESULTS_FILE: &str = "results.txt";
pub const DEFAULT_STATE_FILE: &str = "local.json";
pub const DEFAULT_USERNAME: &str = "ANONYMOUS";
/// Smallest available first-time LL.
pub const DEFAULT_WORK_PREFERENCE: u32 = 100;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_DAYS_OF_WORK: f64 = 3.0;
const DEFAULT_MAX_EXPONENTS: usize = 15;
const DEFAULT_CPU_HOURS: f64 = 24.0;
const DEFAULT_ROLLING_AVERAGE: f64 = 1000.0;
const DEFAULT_MANUAL_MAX_ATTEMPTS: usize = 1;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const MIN_POLL_INTERVAL_SECS: u64 = 60 * 60;
const MAX_DAYS_OF_WORK: f64 = 180.0;
const MAX_COMPUTER_NAME_LEN: usize = 20;
const MAX_CPU_FEATURES_LEN: usize = 64;
const CPU_BRAND_LEN: std::ops::RangeInclusive<usize> = 8..=64;

/// Work preferences that ask for Lucas-Lehmer tests.
pub const LL_WORK_PREFERENCES: [u32; 4] = [100, 101, 102, 104];

/// Hardware description sent with `uc`. Probing the machine is the caller's
/// job; this only carries the answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerInfo {
    pub cpu_brand: String,
    pub cpu_features: String,
    pub frequency_mhz: u32,
    pub memory_mib: u64,
    pub cores: u32,
    pub hyperthreads: u32,
    pub l1_kib: u32,
    pub l2_kib: u32,
    pub l3_kib: Option<u32>,
    pub computer_name: Option<String>,
    /// Stable machine identifier mixed into the hardware GUID.
    pub machine_id: String,
    /// Overrides the derived hardware GUID.
    pub hardware_guid: Option<String>,
    /// Platform part of the application string, e.g. `Linux64`.
    pub platform: String,
}

impl Default for ComputerInfo {
    fn default() -> Self {
        Self {
            cpu_brand: "Unknown CPU".to_owned(),
            cpu_features: String::new(),
            frequency_mhz: 1000,
            memory_mib: 1024,
            cores: 1,
            hyperthreads: 1,
            l1_kib: 8,
            l2_kib: 512,
            l3_kib: None,
            computer_name: None,
            machine_id: String::new(),
            hardware_guid: None,
            platform: format!(
                "{}{}",
                capitalized(std::env::consts::OS),
                if cfg!(target_pointer_width = "64") { "64" } else { "" }
            ),
        }
    }
}

fn capitalized(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Runtime configuration for the agent.
///
/// All instances must be constructed via [`AgentConfig::builder`] or [`AgentConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    v5_url: String,
    site_url: String,
    worker_dirs: Vec<PathBuf>,
    work_file: String,
    results_file: String,
    state_file: PathBuf,
    archive_dir: Option<PathBuf>,
    engine: EngineLog,
    username: String,
    password: Option<String>,
    work_preference: u32,
    min_exponent: Option<u64>,
    max_exponent: Option<u64>,
    days_of_work: f64,
    num_cache: usize,
    max_exponents: usize,
    cpu_hours: f64,
    rolling_average: f64,
    poll_interval: Duration,
    request_timeout: Duration,
    max_attempts: usize,
    manual_max_attempts: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    signing_mode: SigningMode,
    tests_saved: Option<f64>,
    pm1_multiplier: Option<f64>,
    silent_victory: bool,
    no_report_100m: bool,
    proof_uploads: bool,
    stage2_timeout: Option<Duration>,
    metrics_interval: Duration,
    computer: ComputerInfo,
}

pub struct AgentConfigParams {
    pub v5_url: String,
    pub site_url: String,
    pub worker_dirs: Vec<PathBuf>,
    pub work_file: String,
    pub results_file: String,
    pub state_file: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub engine: EngineLog,
    pub username: String,
    pub password: Option<String>,
    pub work_preference: u32,
    pub min_exponent: Option<u64>,
    pub max_exponent: Option<u64>,
    pub days_of_work: f64,
    pub num_cache: usize,
    pub max_exponents: usize,
    pub cpu_hours: f64,
    pub rolling_average: f64,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub manual_max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub signing_mode: SigningMode,
    pub tests_saved: Option<f64>,
    pub pm1_multiplier: Option<f64>,
    pub silent_victory: bool,
    pub no_report_100m: bool,
    pub proof_uploads: bool,
    pub stage2_timeout: Option<Duration>,
    pub metrics_interval: Duration,
    pub computer: ComputerInfo,
}

impl AgentConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: AgentConfigParams) -> Result<Self> {
        let AgentConfigParams {
            v5_url,
            site_url,
            worker_dirs,
            work_file,
            results_file,
            state_file,
            archive_dir,
            engine,
            username,
            password,
            work_preference,
            min_exponent,
            max_exponent,
            days_of_work,
            num_cache,
            max_exponents,
            cpu_hours,
            rolling_average,
            poll_interval,
            request_timeout,
            max_attempts,
            manual_max_attempts,
            initial_backoff,
            max_backoff,
            signing_mode,
            tests_saved,
            pm1_multiplier,
            silent_victory,
            no_report_100m,
            proof_uploads,
            stage2_timeout,
            metrics_interval,
            computer,
        } = params;

        let config = Self {
            v5_url: trimmed_string(v5_url),
            site_url: trimmed_string(site_url),
            worker_dirs,
            work_file: trimmed_string(work_file),
            results_file: trimmed_string(results_file),
            state_file,
            archive_dir,
            engine,
            username: trimmed_string(username),
            password: password.map(trimmed_string).filter(|p| !p.is_empty()),
            work_preference,
            min_exponent,
            max_exponent,
            days_of_work,
            num_cache,
            max_exponents,
            cpu_hours,
            rolling_average,
            poll_interval,
            request_timeout,
            max_attempts,
            manual_max_attempts,
            initial_backoff,
            max_backoff,
            signing_mode,
            tests_saved,
            pm1_multiplier,
            silent_victory,
            no_report_100m,
            proof_uploads,
            stage2_timeout,
            metrics_interval,
            computer,
        };

        config.validate()?;
        Ok(config)
    }

    /// PrimeNet v5 API endpoint.
    pub fn v5_url(&self) -> &str {
        &self.v5_url
    }

    /// Website base used for manual mode, exponent reports and proof uploads.
    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// One directory per worker; the index is the worker (`c`) number.
    pub fn worker_dirs(&self) -> &[PathBuf] {
        &self.worker_dirs
    }

    pub fn work_file(&self) -> &str {
        &self.work_file
    }

    pub fn results_file(&self) -> &str {
        &self.results_file
    }

    pub fn state_file(&self) -> &PathBuf {
        &self.state_file
    }

    /// Where uploaded proofs are moved, relative to the worker directory.
    /// `None` deletes them instead.
    pub fn archive_dir(&self) -> Option<&PathBuf> {
        self.archive_dir.as_ref()
    }

    pub fn engine(&self) -> &EngineLog {
        &self.engine
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Website password. Its presence switches the agent to manual mode.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_manual_mode(&self) -> bool {
        self.password.is_some()
    }

    pub fn work_preference(&self) -> u32 {
        self.work_preference
    }

    /// Whether granted first-time PRP tests should be run as LL tests.
    pub fn prefers_lucas_lehmer(&self) -> bool {
        LL_WORK_PREFERENCES.contains(&self.work_preference)
    }

    pub fn min_exponent(&self) -> Option<u64> {
        self.min_exponent
    }

    pub fn max_exponent(&self) -> Option<u64> {
        self.max_exponent
    }

    /// Days of work to keep queued.
    pub fn days_of_work(&self) -> f64 {
        self.days_of_work
    }

    /// Extra assignments to keep queued beyond the one in progress.
    pub fn num_cache(&self) -> usize {
        self.num_cache
    }

    pub fn max_exponents(&self) -> usize {
        self.max_exponents
    }

    /// Hours per day the engine runs.
    pub fn cpu_hours(&self) -> f64 {
        self.cpu_hours
    }

    pub fn rolling_average(&self) -> f64 {
        self.rolling_average
    }

    /// Time between cycles. Zero runs a single cycle.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Attempts for website (manual mode) calls.
    pub fn manual_max_attempts(&self) -> usize {
        self.manual_max_attempts
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn signing_mode(&self) -> SigningMode {
        self.signing_mode
    }

    /// Forces P-1 before primality tests, or overrides the server's
    /// tests-saved value.
    pub fn tests_saved(&self) -> Option<f64> {
        self.tests_saved
    }

    /// Redo P-1 when the existing B2 is below this multiple of the
    /// balanced recommendation.
    pub fn pm1_multiplier(&self) -> Option<f64> {
        self.pm1_multiplier
    }

    pub fn silent_victory(&self) -> bool {
        self.silent_victory
    }

    pub fn no_report_100m(&self) -> bool {
        self.no_report_100m
    }

    pub fn proof_uploads(&self) -> bool {
        self.proof_uploads
    }

    /// Fixed stage 2 duration reported for engines whose stage 2 progress
    /// cannot be extrapolated.
    pub fn stage2_timeout(&self) -> Option<Duration> {
        self.stage2_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn computer(&self) -> &ComputerInfo {
        &self.computer
    }

    /// The subset of settings the v5 client consumes.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: self.request_timeout,
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            signing_mode: self.signing_mode,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.v5_url, "v5_url")?;
        validate_url(&self.site_url, "site_url")?;
        ensure_not_empty(&self.username, "username")?;
        ensure_not_empty(&self.work_file, "work_file")?;
        ensure_not_empty(&self.results_file, "results_file")?;

        if self.worker_dirs.is_empty() {
            bail!("worker_dirs must name at least one directory");
        }

        if !(0.0..=MAX_DAYS_OF_WORK).contains(&self.days_of_work) {
            bail!("days_of_work must be between 0 and {MAX_DAYS_OF_WORK}");
        }

        if !(1.0..=24.0).contains(&self.cpu_hours) {
            bail!("cpu_hours must be between 1 and 24");
        }

        if self.rolling_average <= 0.0 {
            bail!("rolling_average must be greater than 0");
        }

        if !self.poll_interval.is_zero()
            && self.poll_interval < Duration::from_secs(MIN_POLL_INTERVAL_SECS)
        {
            bail!("poll_interval must be 0 (run once) or at least one hour");
        }

        if self.max_exponents == 0 {
            bail!("max_exponents must be greater than 0");
        }

        if self.manual_max_attempts == 0 {
            bail!("manual_max_attempts must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if let (Some(min), Some(max)) = (self.min_exponent, self.max_exponent) {
            if min > max {
                bail!("min_exponent ({min}) must not exceed max_exponent ({max})");
            }
        }

        if let Some(multiplier) = self.pm1_multiplier {
            if multiplier <= 0.0 {
                bail!("pm1_multiplier must be greater than 0");
            }
        }

        let brand_len = self.computer.cpu_brand.chars().count();
        if !CPU_BRAND_LEN.contains(&brand_len) {
            bail!(
                "cpu_brand must be between {} and {} characters",
                CPU_BRAND_LEN.start(),
                CPU_BRAND_LEN.end()
            );
        }

        if self.computer.cpu_features.chars().count() > MAX_CPU_FEATURES_LEN {
            bail!("cpu_features must be at most {MAX_CPU_FEATURES_LEN} characters");
        }

        if let Some(name) = &self.computer.computer_name {
            if name.chars().count() > MAX_COMPUTER_NAME_LEN {
                bail!("computer_name must be at most {MAX_COMPUTER_NAME_LEN} characters");
            }
        }

        self.transport_options().validate()?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct AgentConfigBuilder {
    v5_url: Option<String>,
    site_url: Option<String>,
    worker_dirs: Option<Vec<PathBuf>>,
    work_file: Option<String>,
    results_file: Option<String>,
    state_file: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
    engine: Option<EngineLog>,
    username: Option<String>,
    password: Option<String>,
    work_preference: Option<u32>,
    min_exponent: Option<u64>,
    max_exponent: Option<u64>,
    days_of_work: Option<f64>,
    num_cache: Option<usize>,
    max_exponents: Option<usize>,
    cpu_hours: Option<f64>,
    rolling_average: Option<f64>,
    poll_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    max_attempts: Option<usize>,
    manual_max_attempts: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    signing_mode: Option<SigningMode>,
    tests_saved: Option<f64>,
    pm1_multiplier: Option<f64>,
    silent_victory: bool,
    no_report_100m: bool,
    proof_uploads: Option<bool>,
    stage2_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    computer: Option<ComputerInfo>,
}

impl AgentConfigBuilder {
    pub fn v5_url(mut self, url: impl Into<String>) -> Self {
        self.v5_url = Some(url.into());
        self
    }

    pub fn site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    pub fn worker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worker_dirs.get_or_insert_with(Vec::new).push(dir.into());
        self
    }

    pub fn worker_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.worker_dirs = Some(dirs.into_iter().collect());
        self
    }

    pub fn work_file(mut self, name: impl Into<String>) -> Self {
        self.work_file = Some(name.into());
        self
    }

    pub fn results_file(mut self, name: impl Into<String>) -> Self {
        self.results_file = Some(name.into());
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn engine(mut self, engine: EngineLog) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn work_preference(mut self, preference: u32) -> Self {
        self.work_preference = Some(preference);
        self
    }

    pub fn exponent_range(mut self, min: Option<u64>, max: Option<u64>) -> Self {
        self.min_exponent = min;
        self.max_exponent = max;
        self
    }

    pub fn days_of_work(mut self, days: f64) -> Self {
        self.days_of_work = Some(days);
        self
    }

    pub fn num_cache(mut self, count: usize) -> Self {
        self.num_cache = Some(count);
        self
    }

    pub fn max_exponents(mut self, count: usize) -> Self {
        self.max_exponents = Some(count);
        self
    }

    pub fn cpu_hours(mut self, hours: f64) -> Self {
        self.cpu_hours = Some(hours);
        self
    }

    pub fn rolling_average(mut self, average: f64) -> Self {
        self.rolling_average = Some(average);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn manual_max_attempts(mut self, attempts: usize) -> Self {
        self.manual_max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = Some(initial);
        self.max_backoff = Some(max);
        self
    }

    pub fn signing_mode(mut self, mode: SigningMode) -> Self {
        self.signing_mode = Some(mode);
        self
    }

    pub fn tests_saved(mut self, tests_saved: f64) -> Self {
        self.tests_saved = Some(tests_saved);
        self
    }

    pub fn pm1_multiplier(mut self, multiplier: f64) -> Self {
        self.pm1_multiplier = Some(multiplier);
        self
    }

    pub fn silent_victory(mut self, silent: bool) -> Self {
        self.silent_victory = silent;
        self
    }

    pub fn no_report_100m(mut self, skip: bool) -> Self {
        self.no_report_100m = skip;
        self
    }

    pub fn proof_uploads(mut self, enabled: bool) -> Self {
        self.proof_uploads = Some(enabled);
        self
    }

    pub fn stage2_timeout(mut self, timeout: Duration) -> Self {
        self.stage2_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn computer(mut self, computer: ComputerInfo) -> Self {
        self.computer = Some(computer);
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        let params = AgentConfigParams {
            v5_url: self.v5_url.unwrap_or_else(|| DEFAULT_V5_URL.to_owned()),
            site_url: self.site_url.unwrap_or_else(|| DEFAULT_SITE_URL.to_owned()),
            worker_dirs: self.worker_dirs.context("worker_dirs is required")?,
            work_file: self
                .work_file
                .unwrap_or_else(|| DEFAULT_WORK_FILE.to_owned()),
            results_file: self
                .results_file
                .unwrap_or_else(|| DEFAULT_RESULTS_FILE.to_owned()),
            state_file: self
                .state_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            archive_dir: self.archive_dir,
            engine: self.engine.unwrap_or(EngineLog::Mlucas),
            username: self
                .username
                .unwrap_or_else(|| DEFAULT_USERNAME.to_owned()),
            password: self.password,
            work_preference: self.work_preference.unwrap_or(DEFAULT_WORK_PREFERENCE),
            min_exponent: self.min_exponent,
            max_exponent: self.max_exponent,
            days_of_work: self.days_of_work.unwrap_or(DEFAULT_DAYS_OF_WORK),
            num_cache: self.num_cache.unwrap_or(0),
            max_exponents: self.max_exponents.unwrap_or(DEFAULT_MAX_EXPONENTS),
            cpu_hours: self.cpu_hours.unwrap_or(DEFAULT_CPU_HOURS),
            rolling_average: self.rolling_average.unwrap_or(DEFAULT_ROLLING_AVERAGE),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            manual_max_attempts: self
                .manual_max_attempts
                .unwrap_or(DEFAULT_MANUAL_MAX_ATTEMPTS),
            initial_backoff: self
                .initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS)),
            max_backoff: self
                .max_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_MAX_BACKOFF_MS)),
            signing_mode: self.signing_mode.unwrap_or_default(),
            tests_saved: self.tests_saved,
            pm1_multiplier: self.pm1_multiplier,
            silent_victory: self.silent_victory,
            no_report_100m: self.no_report_100m,
            proof_uploads: self.proof_uploads.unwrap_or(true),
            stage2_timeout: self.stage2_timeout,
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            computer: self.computer.unwrap_or_default(),
        };

        AgentConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_builder() -> AgentConfigBuilder {
        AgentConfig::builder()
            .worker_dir("/tmp/worker0")
            .computer(ComputerInfo {
                cpu_brand: "Example CPU @ 3.00GHz".into(),
                ..ComputerInfo::default()
            })
    }

    #[test]
    fn builder_applies_defaults() {
        let config = base_builder().build().expect("config should build");
        assert_eq!(config.v5_url(), DEFAULT_V5_URL);
        assert_eq!(config.site_url(), DEFAULT_SITE_URL);
        assert_eq!(config.work_file(), "worktodo.ini");
        assert_eq!(config.results_file(), "results.txt");
        assert_eq!(config.username(), "ANONYMOUS");
        assert_eq!(config.days_of_work(), 3.0);
        assert_eq!(config.max_exponents(), 15);
        assert_eq!(config.max_attempts(), 5);
        assert_eq!(config.manual_max_attempts(), 1);
        assert_eq!(config.request_timeout(), Duration::from_secs(180));
        assert_eq!(config.poll_interval(), Duration::from_secs(3600));
        assert_eq!(config.metrics_interval(), telemetry::DEFAULT_METRICS_INTERVAL);
        assert!(config.proof_uploads());
        assert!(!config.is_manual_mode());
        assert!(config.prefers_lucas_lehmer());
        assert_eq!(config.engine(), &EngineLog::Mlucas);
    }

    #[test]
    fn blank_password_keeps_v5_mode() {
        let config = base_builder().password("   ").build().expect("builds");
        assert!(!config.is_manual_mode());
        let config = base_builder().password("hunter2").build().expect("builds");
        assert_eq!(config.password(), Some("hunter2"));
    }

    #[test]
    fn prp_preference_keeps_prp() {
        let config = base_builder().work_preference(150).build().expect("builds");
        assert!(!config.prefers_lucas_lehmer());
    }

    #[test]
    fn worker_dirs_are_required() {
        let err = AgentConfig::builder().build().unwrap_err();
        assert!(format!("{err}").contains("worker_dirs"));

        let err = AgentConfig::builder()
            .worker_dirs(Vec::new())
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("at least one"));
    }

    #[test]
    fn validation_catches_invalid_values() {
        let cases: Vec<(AgentConfigBuilder, &str)> = vec![
            (base_builder().v5_url("ftp://invalid"), "v5_url"),
            (base_builder().days_of_work(181.0), "days_of_work"),
            (base_builder().cpu_hours(0.5), "cpu_hours"),
            (base_builder().rolling_average(0.0), "rolling_average"),
            (base_builder().poll_interval(Duration::from_secs(60)), "poll_interval"),
            (base_builder().max_attempts(0), "max_attempts"),
            (base_builder().manual_max_attempts(0), "manual_max_attempts"),
            (base_builder().request_timeout(Duration::ZERO), "request_timeout"),
            (base_builder().exponent_range(Some(10), Some(5)), "min_exponent"),
            (
                base_builder().computer(ComputerInfo {
                    cpu_brand: "short".into(),
                    ..ComputerInfo::default()
                }),
                "cpu_brand",
            ),
            (
                base_builder().computer(ComputerInfo {
                    cpu_brand: "Example CPU @ 3.00GHz".into(),
                    computer_name: Some("a-very-long-computer-name".into()),
                    ..ComputerInfo::default()
                }),
                "computer_name",
            ),
        ];

        for (builder, field) in cases {
            let err = builder.build().unwrap_err();
            assert!(
                format!("{err}").contains(field),
                "error should mention {field}: {err}"
            );
        }
    }

    #[test]
    fn zero_poll_interval_means_run_once() {
        let config = base_builder()
            .poll_interval(Duration::ZERO)
            .build()
            .expect("builds");
        assert!(config.poll_interval().is_zero());
    }

    #[test]
    fn transport_options_mirror_config() {
        let config = base_builder()
            .max_attempts(3)
            .backoff(Duration::from_millis(5), Duration::from_millis(20))
            .signing_mode(SigningMode::UntrustedClient)
            .build()
            .expect("builds");
        let options = config.transport_options();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.initial_backoff, Duration::from_millis(5));
        assert_eq!(options.signing_mode, SigningMode::UntrustedClient);
    }

    #[test]
    fn direct_constructor_runs_validation() {
        let base = base_builder().build().expect("builds");
        let err = AgentConfig::new(AgentConfigParams {
            v5_url: base.v5_url().to_owned(),
            site_url: base.site_url().to_owned(),
            worker_dirs: base.worker_dirs().to_vec(),
            work_file: base.work_file().to_owned(),
            results_file: base.results_file().to_owned(),
            state_file: base.state_file().clone(),
            archive_dir: None,
            engine: EngineLog::GpuOwl,
            username: String::new(),
            password: None,
            work_preference: 150,
            min_exponent: None,
            max_exponent: None,
            days_of_work: 3.0,
            num_cache: 0,
            max_exponents: 15,
            cpu_hours: 24.0,
            rolling_average: 1000.0,
            poll_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(180),
            max_attempts: 5,
            manual_max_attempts: 1,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            signing_mode: SigningMode::Signed,
            tests_saved: None,
            pm1_multiplier: None,
            silent_victory: false,
            no_report_100m: false,
            proof_uploads: true,
            stage2_timeout: None,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            computer: base.computer().clone(),
        })
        .unwrap_err();

        assert!(format!("{err}").contains("username"));
    }
}
