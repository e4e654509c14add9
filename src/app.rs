//! Core application runner for `continuity-listener`.
//!
//! This module is decoupled from CLI parsing and process exit codes so it can
//! be tested deterministically with an injected scanner and output streams.

use crate::alias::Alias;
use crate::output::{OutputFormatter, StatusLineFormatter};
use crate::registry::DeviceRegistry;
use crate::scanner::{Backend, Observation, ObservationResult, ScanError};
use crate::throttle::Throttle;
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// How often liveness deadlines and the TTL are checked.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Specify human-readable name for a device address.
    /// Format: --alias DE:AD:BE:EF:00:00=Reception
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, print malformed reports and debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Throttle status lines per device to at most one per interval.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub throttle: Option<Duration>,

    /// Stop scanning after this long
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub duration: Option<Duration>,

    /// Forget devices not heard from for this long
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub ttl: Option<Duration>,

    /// Print every device's advertisement history as delimited text on exit
    #[arg(long)]
    pub dump: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Future returned by [`Scanner::start_scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend, verbose: bool) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend, verbose: bool) -> ScanFuture<'_> {
        Box::pin(async move { crate::scanner::start_scan(backend, verbose).await })
    }
}

/// Wall-clock time derived from the runtime clock, anchored once at startup.
#[derive(Debug, Clone, Copy)]
struct Clock {
    wall: SystemTime,
    start: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            wall: SystemTime::now(),
            start: Instant::now(),
        }
    }

    fn at(&self, instant: Instant) -> SystemTime {
        self.wall + instant.saturating_duration_since(self.start)
    }
}

/// Per-run state threaded through the loop.
struct Listener<'a> {
    registry: DeviceRegistry,
    formatter: StatusLineFormatter,
    throttle: Option<Throttle>,
    verbose: bool,
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
}

impl Listener<'_> {
    fn on_observation(&mut self, observation: Observation) -> io::Result<()> {
        let received_at = observation.received_at;
        match self.registry.ingest(observation) {
            Ok(device) => {
                let should_emit = self
                    .throttle
                    .as_mut()
                    .is_none_or(|t| t.should_emit(device.id(), received_at));
                if should_emit {
                    let line = self.formatter.format(&device.snapshot());
                    writeln!(self.out, "{line}")?;
                }
            }
            Err(e) => {
                log::warn!("dropping observation: {e}");
                if self.verbose {
                    writeln!(self.err, "{e}")?;
                }
            }
        }
        Ok(())
    }

    /// Fire due liveness deadlines and evict stale devices. Devices that went
    /// inactive get a status line regardless of the throttle.
    fn on_tick(&mut self, now: SystemTime) -> io::Result<()> {
        for id in self.registry.expire(now) {
            log::debug!("{id} went inactive");
            if let Some(device) = self.registry.get(&id) {
                let line = self.formatter.format(&device.snapshot());
                writeln!(self.out, "{line}")?;
            }
        }
        for id in self.registry.evict_stale(now) {
            if let Some(throttle) = self.throttle.as_mut() {
                throttle.forget(&id);
            }
        }
        Ok(())
    }

    fn dump(&mut self) -> io::Result<()> {
        for device in self.registry.devices() {
            match device.display_name() {
                Some(name) => writeln!(self.out, "# {} {name}", device.id())?,
                None => writeln!(self.out, "# {}", device.id())?,
            }
            write!(self.out, "{}", device.to_delimited_text())?;
        }
        Ok(())
    }
}

/// Run the core processing loop, writing status lines to `out` and verbose errors to `err`.
///
/// - Every observation is ingested; a status line for its device follows unless throttled.
/// - Report errors are written to `err` only when `options.verbose` is true.
/// - Liveness and TTL are checked every [`TICK_INTERVAL`]; a device going
///   inactive gets a status line of its own.
/// - The loop ends when the scanner closes its channel or `options.duration` elapses.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let mut listener = Listener {
        registry: DeviceRegistry::new(crate::alias::to_map(&options.aliases), options.ttl),
        formatter: StatusLineFormatter::new(),
        throttle: options.throttle.map(Throttle::new),
        verbose: options.verbose,
        out,
        err,
    };

    let clock = Clock::start();
    let mut observations = scanner.start_scan(options.backend, options.verbose).await?;

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let duration = options.duration;
    let stop = async move {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            received = observations.recv() => match received {
                Some(Ok(observation)) => listener.on_observation(observation)?,
                Some(Err(report_err)) => {
                    if listener.verbose {
                        writeln!(listener.err, "{report_err}")?;
                    }
                }
                None => break,
            },
            instant = tick.tick() => listener.on_tick(clock.at(instant))?,
            _ = &mut stop => {
                log::info!("scan duration elapsed");
                break;
            }
        }
    }

    if options.dump {
        listener.dump()?;
    }
    listener.out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::AdvertisementData;
    use crate::mac_address::{AddressKind, DeviceAddress, MacAddress};
    use crate::scanner::ReportError;
    use crate::test_utils::apple_advertisement;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeScanner {
        results: Mutex<Vec<ObservationResult>>,
        keep_open: bool,
    }

    impl FakeScanner {
        fn new(results: Vec<ObservationResult>) -> Self {
            Self {
                results: Mutex::new(results),
                keep_open: false,
            }
        }

        /// A scanner whose channel never closes after the given results.
        fn endless(results: Vec<ObservationResult>) -> Self {
            Self {
                keep_open: true,
                ..Self::new(results)
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(&self, _backend: Backend, _verbose: bool) -> ScanFuture<'_> {
            let results = self.results.lock().unwrap().clone();
            let keep_open = self.keep_open;
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<ObservationResult>(results.len().max(1));
                tokio::spawn(async move {
                    for r in results {
                        let _ = tx.send(r).await;
                    }
                    if keep_open {
                        tx.closed().await;
                    }
                });
                Ok(rx)
            })
        }
    }

    /// Sends each advertisement at its offset from the start of the scan,
    /// stamped on the same clock the run loop ticks with. Never closes.
    struct ScheduledScanner {
        schedule: Vec<(Duration, AdvertisementData)>,
    }

    impl Scanner for ScheduledScanner {
        fn start_scan(&self, _backend: Backend, _verbose: bool) -> ScanFuture<'_> {
            let schedule = self.schedule.clone();
            Box::pin(async move {
                let (tx, rx) = mpsc::channel::<ObservationResult>(1);
                let clock = Clock::start();
                tokio::spawn(async move {
                    for (offset, data) in schedule {
                        let at = clock.start + offset;
                        tokio::time::sleep_until(at).await;
                        let observation = Observation {
                            data,
                            received_at: clock.at(at),
                        };
                        if tx.send(Ok(observation)).await.is_err() {
                            return;
                        }
                    }
                    tx.closed().await;
                });
                Ok(rx)
            })
        }
    }

    struct FailingScanner;

    impl Scanner for FailingScanner {
        fn start_scan(&self, _backend: Backend, _verbose: bool) -> ScanFuture<'_> {
            Box::pin(async { Err(ScanError::Bluetooth("no adapter".to_string())) })
        }
    }

    fn options() -> Options {
        Options {
            aliases: vec![],
            verbose: false,
            throttle: None,
            duration: None,
            ttl: None,
            dump: false,
            backend: Backend::Bluer,
        }
    }

    fn observation(code: u8, rssi: f64) -> ObservationResult {
        Ok(Observation::now(apple_advertisement(code, Some(rssi))))
    }

    async fn run(options: Options, scanner: &dyn Scanner) -> (String, String) {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        run_with_io(options, scanner, &mut out, &mut err)
            .await
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[tokio::test]
    async fn run_writes_status_lines_to_out() {
        let scanner = FakeScanner::new(vec![observation(0x1A, -61.0)]);
        let (out, err) = run(options(), &scanner).await;

        assert!(err.is_empty());
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("AA:BB:CC:DD:EE:FF "));
        assert!(out.contains("os=\"iOS 13\""));
        assert!(out.contains("wifi=false"));
        assert!(out.contains("rssi=-61"));
        assert!(out.ends_with('\n'));
    }

    #[tokio::test]
    async fn run_applies_throttle() {
        let scanner = FakeScanner::new(vec![observation(0x1E, -60.0), observation(0x1E, -62.0)]);
        let options = Options {
            throttle: Some(Duration::from_secs(3600)),
            ..options()
        };

        let (out, _) = run(options, &scanner).await;
        assert_eq!(out.lines().count(), 1);
    }

    #[tokio::test]
    async fn run_applies_aliases() {
        let scanner = FakeScanner::new(vec![observation(0x1E, -60.0)]);
        let options = Options {
            aliases: vec![crate::alias::parse_alias("AA:BB:CC:DD:EE:FF=Reception").unwrap()],
            ..options()
        };

        let (out, _) = run(options, &scanner).await;
        assert!(out.contains("name=\"Reception\""));
    }

    #[tokio::test]
    async fn run_prints_report_errors_only_when_verbose() {
        let scanner = FakeScanner::new(vec![Err(ReportError::Truncated("3 bytes".to_string()))]);

        let (out, err) = run(options(), &scanner).await;
        assert!(out.is_empty());
        assert!(err.is_empty());

        let verbose = Options {
            verbose: true,
            ..options()
        };
        let (out, err) = run(verbose, &scanner).await;
        assert!(out.is_empty());
        assert!(err.contains("Truncated report: 3 bytes"));
    }

    #[tokio::test]
    async fn run_reports_observations_without_address() {
        let mut data = apple_advertisement(0x1E, None);
        data.address = None;
        let scanner = FakeScanner::new(vec![Ok(Observation::now(data))]);
        let verbose = Options {
            verbose: true,
            ..options()
        };

        let (out, err) = run(verbose, &scanner).await;
        assert!(out.is_empty());
        assert!(err.contains("address"));
    }

    #[tokio::test]
    async fn run_dumps_histories_on_exit() {
        let mut other = apple_advertisement(0x09, Some(-80.0));
        other.address = Some(DeviceAddress::new(
            MacAddress([1, 2, 3, 4, 5, 6]),
            AddressKind::Public,
        ));
        let scanner = FakeScanner::new(vec![
            observation(0x1E, -60.0),
            observation(0x1E, -61.0),
            Ok(Observation::now(other)),
        ]);
        let options = Options {
            dump: true,
            throttle: Some(Duration::from_secs(3600)),
            ..options()
        };

        let (out, _) = run(options, &scanner).await;
        let dump: Vec<&str> = out.lines().skip(2).collect();
        assert_eq!(dump.len(), 6);
        assert_eq!(dump[0], "# 01:02:03:04:05:06");
        assert_eq!(dump[1], "manufacturerData;tlv;description");
        assert!(dump[2].starts_with("4c0010051709aabbcc;"));
        assert_eq!(dump[3], "# AA:BB:CC:DD:EE:FF");
        assert_eq!(dump[4], "manufacturerData;tlv;description");
        assert!(dump[5].starts_with("4c001005171eaabbcc;"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_duration() {
        let scanner = FakeScanner::endless(vec![observation(0x1E, -60.0)]);
        let options = Options {
            duration: Some(Duration::from_secs(5)),
            ..options()
        };

        let (out, _) = run(options, &scanner).await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("active=true"));
        assert!(lines[1].contains("active=false"));
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_inactive_and_forgets_evicted_devices() {
        let scanner = ScheduledScanner {
            schedule: vec![
                (Duration::ZERO, apple_advertisement(0x1E, Some(-60.0))),
                (Duration::from_secs(3), apple_advertisement(0x1E, Some(-61.0))),
                (Duration::from_secs(10), apple_advertisement(0x1E, Some(-62.0))),
            ],
        };
        let options = Options {
            throttle: Some(Duration::from_secs(3600)),
            ttl: Some(Duration::from_secs(5)),
            duration: Some(Duration::from_millis(10_500)),
            ..options()
        };

        let (out, _) = run(options, &scanner).await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4, "{out}");

        // First sighting, then its window lapses.
        assert!(lines[0].contains("active=true") && lines[0].contains("rssi=-60"));
        assert!(lines[1].contains("active=false") && lines[1].contains("rssi=-60"));
        // The repeat at 3s is throttled; only its lapse is reported.
        assert!(lines[2].contains("active=false") && lines[2].contains("rssi=-61"));
        // Evicted after 5s of silence, so the throttle lets it through again.
        assert!(lines[3].contains("active=true") && lines[3].contains("rssi=-62"));
        assert!(lines[3].contains("ads=1"));
    }

    #[test]
    fn run_fails_when_scanner_cannot_start() {
        let mut out = Vec::<u8>::new();
        let mut err = Vec::<u8>::new();
        let result = tokio_test::block_on(run_with_io(
            options(),
            &FailingScanner,
            &mut out,
            &mut err,
        ));

        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
        assert!(out.is_empty());
    }

    #[test]
    fn options_parse_from_command_line() {
        let options = Options::try_parse_from([
            "continuity-listener",
            "--alias",
            "AA:BB:CC:DD:EE:FF=Desk",
            "--throttle",
            "500ms",
            "--ttl",
            "5m",
            "--dump",
            "-v",
        ])
        .unwrap();

        assert_eq!(options.aliases.len(), 1);
        assert_eq!(options.throttle, Some(Duration::from_millis(500)));
        assert_eq!(options.ttl, Some(Duration::from_secs(300)));
        assert_eq!(options.duration, None);
        assert!(options.dump);
        assert!(options.verbose);
        assert!(Options::try_parse_from(["continuity-listener", "--alias", "nope"]).is_err());
    }
}
