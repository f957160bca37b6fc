//! wicket simulates a take-a-ticket queue.  N worker threads each hold a pre-assigned ticket
//! number, announce themselves in a per-run output file, and block at the [TicketWindow] until the
//! manager calls their number.  The manager calls every ticket in increasing order and the
//! orchestrator joins every worker before declaring the run complete.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use guacamole::combinators::uniform;
use guacamole::Guacamole;
use indicio::{clue, value, ERROR, INFO};
use utf8path::Path;

pub mod window;

pub use window::TicketWindow;

//////////////////////////////////////////// biometrics ////////////////////////////////////////////

static RUNS: biometrics::Counter = biometrics::Counter::new("wicket.runs");
static USER_MISMATCH: biometrics::Counter = biometrics::Counter::new("wicket.user_mismatch");
static LEDGER_APPEND: biometrics::Counter = biometrics::Counter::new("wicket.ledger.append");
static WORKER_SPAWNED: biometrics::Counter = biometrics::Counter::new("wicket.worker.spawn");
static WORKER_FINISHED: biometrics::Counter = biometrics::Counter::new("wicket.worker.finish");
static WORKER_FAILED: biometrics::Counter = biometrics::Counter::new("wicket.worker.fail");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&RUNS);
    collector.register_counter(&USER_MISMATCH);
    collector.register_counter(&LEDGER_APPEND);
    collector.register_counter(&WORKER_SPAWNED);
    collector.register_counter(&WORKER_FINISHED);
    collector.register_counter(&WORKER_FAILED);
    window::register_biometrics(collector);
}

////////////////////////////////////////////// indicio /////////////////////////////////////////////

pub static COLLECTOR: indicio::Collector = indicio::Collector::new();

/////////////////////////////////////////////// Error //////////////////////////////////////////////

/// The wicket error type.
#[derive(Debug)]
pub enum Error {
    /// The configured user does not match the stored credential.
    UserMismatch { user: String },
    /// An I/O error from creating the ledger or spawning workers.
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

////////////////////////////////////////////// Ledger //////////////////////////////////////////////

/// The per-run output file, named `output-<part_id>.txt`.  Workers append one line when they
/// retrieve their ticket and one line when they complete.  Appends reopen the file so concurrent
/// workers never share a handle or a buffer.
#[derive(Clone, Debug)]
pub struct Ledger {
    path: Path<'static>,
}

impl Ledger {
    /// Create the ledger for `part_id` under `dir`, truncating output from any previous run.
    pub fn create(dir: &Path<'_>, part_id: &str) -> Result<Self, std::io::Error> {
        let path = dir.join(format!("output-{}.txt", part_id)).into_owned();
        std::fs::File::create(path.into_std())?;
        Ok(Self { path })
    }

    /// The path to the output file.
    pub fn path(&self) -> &Path<'static> {
        &self.path
    }

    /// Record that `ticket` was retrieved and its worker started.
    pub fn started(&self, ticket: u64) -> Result<(), std::io::Error> {
        self.append(&format!("Thread retrieved ticket number: {} started", ticket))
    }

    /// Record that `ticket`'s worker completed.
    pub fn completed(&self, ticket: u64) -> Result<(), std::io::Error> {
        self.append(&format!("Thread with ticket number: {} completed", ticket))
    }

    fn append(&self, line: &str) -> Result<(), std::io::Error> {
        LEDGER_APPEND.click();
        let mut output = OpenOptions::new().append(true).open(self.path.into_std())?;
        writeln!(output, "{}", line)
    }
}

/////////////////////////////////////////// identity gate //////////////////////////////////////////

/// Compare the configured user against the stored credential file.  The file holds one username;
/// surrounding whitespace is ignored.
pub fn user_matches(user: &str, credentials: &Path<'_>) -> Result<bool, std::io::Error> {
    let stored = std::fs::read_to_string(credentials.into_std())?;
    Ok(stored.trim() == user)
}

///////////////////////////////////////// SimulationOptions ////////////////////////////////////////

/// Options for one simulation run.
#[derive(Clone, Debug, Eq, PartialEq, arrrg_derive::CommandLine)]
pub struct SimulationOptions {
    #[arrrg(optional, "Number of worker threads to draw tickets.")]
    pub threads: u64,
    #[arrrg(optional, "Identifier for this run; names the output file.")]
    pub part_id: String,
    #[arrrg(optional, "The user turning in this run; must match the credential file contents.")]
    pub user: String,
    #[arrrg(optional, "Path to the credential file.")]
    pub user_file: String,
    #[arrrg(optional, "Directory in which to write the output file.")]
    pub output_dir: String,
    #[arrrg(optional, "Seed for the arrival-jitter and pacing random streams.")]
    pub seed: u64,
    #[arrrg(optional, "Length of one simulated time unit in milliseconds.")]
    pub tick_ms: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            part_id: "test".to_string(),
            user: String::new(),
            user_file: ".user".to_string(),
            output_dir: ".".to_string(),
            seed: 0,
            tick_ms: 1000,
        }
    }
}

impl From<&SimulationOptions> for indicio::Value {
    fn from(options: &SimulationOptions) -> Self {
        value!({
            threads: options.threads,
            part_id: options.part_id.as_str(),
            user: options.user.as_str(),
            user_file: options.user_file.as_str(),
            output_dir: options.output_dir.as_str(),
            seed: options.seed,
            tick_ms: options.tick_ms,
        })
    }
}

//////////////////////////////////////////// RunContext ////////////////////////////////////////////

/// The read-only state shared by the manager and every worker for the duration of one run.
pub struct RunContext {
    /// Total number of tickets issued.  The manager calls every ticket in `[0, total)`.
    pub total: u64,
    /// The shared counter and its condition variable.
    pub window: TicketWindow,
    /// The output file for this run.
    pub ledger: Ledger,
    /// Base seed for the random streams.  The manager paces with `seed`; worker `t` jitters with
    /// `seed + 1 + t`.
    pub seed: u64,
    /// Length of one simulated time unit.
    pub tick: Duration,
}

////////////////////////////////////////////// worker //////////////////////////////////////////////

/// One worker's walk through the queue: record the start line, idle through an arrival jitter of
/// 0-10 ticks, wait for the ticket to be called, record completion.  The start line is written
/// before anything can block.  A ledger error is fatal to this worker alone.
pub fn participate(ctx: &RunContext, ticket: u64) -> Result<(), Error> {
    ctx.ledger.started(ticket)?;
    let mut jitter = Guacamole::new(ctx.seed.wrapping_add(1).wrapping_add(ticket));
    let delay = uniform(0u64, 11u64)(&mut jitter);
    std::thread::sleep(ctx.tick * delay as u32);
    ctx.window.wait_for(ticket);
    ctx.ledger.completed(ticket)?;
    Ok(())
}

////////////////////////////////////////////// manager /////////////////////////////////////////////

/// Call every ticket in increasing order.  Each iteration idles 1-3 ticks, logs the call, then
/// broadcasts and advances the counter.  One final broadcast follows the loop so the highest
/// ticket observes the last advance no matter how wakeups interleave.
pub fn call_tickets(ctx: &RunContext) {
    let mut pacing = Guacamole::new(ctx.seed);
    let mut next = ctx.window.serving();
    while next < ctx.total {
        let delay = uniform(1u64, 4u64)(&mut pacing);
        std::thread::sleep(ctx.tick * delay as u32);
        clue!(COLLECTOR, INFO, {
            calling: next,
        });
        next = ctx.window.call_next() + 1;
    }
    ctx.window.wake_all();
    clue!(COLLECTOR, INFO, {
        all_tickets_called: ctx.total,
    });
}

//////////////////////////////////////////// Simulation ////////////////////////////////////////////

/// One complete run: the identity gate, the ledger, N workers, the manager, and the join barrier.
pub struct Simulation {
    options: SimulationOptions,
}

impl Simulation {
    /// Create a new simulation from `options`.
    pub fn new(options: SimulationOptions) -> Self {
        clue!(COLLECTOR, INFO, {
            options: indicio::Value::from(&options),
        });
        Self { options }
    }

    /// Run the simulation to completion.  Errs when the identity gate rejects the configured user
    /// or the run cannot be set up.  Individual worker failures are logged, not branched on.
    pub fn run(&self) -> Result<(), Error> {
        RUNS.click();
        let credentials = Path::from(self.options.user_file.as_str());
        let user_ok = match user_matches(&self.options.user, &credentials) {
            Ok(user_ok) => user_ok,
            Err(err) => {
                clue!(COLLECTOR, ERROR, {
                    credentials_unreadable: format!("{:?}", err),
                });
                false
            }
        };
        if !user_ok {
            USER_MISMATCH.click();
            clue!(COLLECTOR, ERROR, {
                user_mismatch: self.options.user.as_str(),
            });
            return Err(Error::UserMismatch {
                user: self.options.user.clone(),
            });
        }
        let output_dir = Path::from(self.options.output_dir.as_str());
        let ledger = Ledger::create(&output_dir, &self.options.part_id)?;
        let ctx = Arc::new(RunContext {
            total: self.options.threads,
            window: TicketWindow::new(),
            ledger,
            seed: self.options.seed,
            tick: Duration::from_millis(self.options.tick_ms),
        });
        let mut workers = Vec::with_capacity(ctx.total as usize);
        for ticket in 0..ctx.total {
            WORKER_SPAWNED.click();
            clue!(COLLECTOR, INFO, {
                spawn: ticket,
            });
            let ctx_p = Arc::clone(&ctx);
            workers.push(std::thread::Builder::new().spawn(move || participate(&ctx_p, ticket))?);
        }
        call_tickets(&ctx);
        for (ticket, worker) in workers.into_iter().enumerate() {
            match worker.join() {
                Ok(Ok(())) => {
                    WORKER_FINISHED.click();
                }
                Ok(Err(err)) => {
                    WORKER_FAILED.click();
                    clue!(COLLECTOR, ERROR, {
                        worker: ticket as u64,
                        error: format!("{:?}", err),
                    });
                }
                Err(_) => {
                    WORKER_FAILED.click();
                    clue!(COLLECTOR, ERROR, {
                        worker: ticket as u64,
                        panicked: true,
                    });
                }
            }
        }
        clue!(COLLECTOR, INFO, {
            joined: ctx.total,
        });
        Ok(())
    }
}

/////////////////////////////////////////////// tests //////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("wicket-unit-{}", name));
        std::fs::create_dir_all(&dir).expect("scratch dir should create");
        dir
    }

    #[test]
    fn user_matches_trims_the_credential() {
        let dir = scratch("user-matches");
        let credentials = dir.join(".user");
        std::fs::write(&credentials, "tester\n").expect(".user should write");
        let credentials = Path::from(credentials.to_str().expect("path should be unicode"));
        assert!(user_matches("tester", &credentials).expect("gate should read"));
        assert!(!user_matches("impostor", &credentials).expect("gate should read"));
    }

    #[test]
    fn user_matches_errs_on_missing_credentials() {
        let dir = scratch("user-missing");
        let credentials = dir.join(".user-missing");
        let credentials = Path::from(credentials.to_str().expect("path should be unicode"));
        assert!(user_matches("tester", &credentials).is_err());
    }

    #[test]
    fn ledger_appends_in_worker_order() {
        let dir = scratch("ledger");
        let dir = Path::from(dir.to_str().expect("path should be unicode"));
        let ledger = Ledger::create(&dir, "unit").expect("ledger should create");
        ledger.started(7).expect("started should append");
        ledger.completed(7).expect("completed should append");
        let contents =
            std::fs::read_to_string(ledger.path().into_std()).expect("output should read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            vec![
                "Thread retrieved ticket number: 7 started",
                "Thread with ticket number: 7 completed",
            ],
            lines
        );
    }

    #[test]
    fn ledger_create_truncates() {
        let dir = scratch("ledger-truncate");
        let dir = Path::from(dir.to_str().expect("path should be unicode"));
        let ledger = Ledger::create(&dir, "truncate").expect("ledger should create");
        ledger.started(0).expect("started should append");
        let ledger = Ledger::create(&dir, "truncate").expect("ledger should recreate");
        let contents =
            std::fs::read_to_string(ledger.path().into_std()).expect("output should read");
        assert!(contents.is_empty());
    }
}
