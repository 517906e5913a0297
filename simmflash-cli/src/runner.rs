//! Drives a [`Programmer`] from the CLI.
//!
//! The engine is non-blocking: the runner owns the channels, the port
//! watcher, the progress bar and the deadlines, and pumps host events into
//! the engine until it reports a terminal event.

use anyhow::{Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use simmflash::device::watch::PortWatcher;
use simmflash::{
    HostEvent, NativeTransport, Phase, Programmer, ProgrammerEvent, SimmConfig, StartStatus,
    VerifyMode, pin_name,
};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::{CliError, use_fancy_output, was_interrupted};

/// How often the loop wakes up to check deadlines and Ctrl-C.
const TICK: Duration = Duration::from_millis(50);

/// How long to wait for the port watcher to find a board.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the board gets to confirm a cancel request.
const CANCEL_GRACE: Duration = Duration::from_secs(3);

/// Default inactivity deadline. Erasing a large SIMM is silent for a while.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings resolved from the command line and the config file.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Explicit port, if any.
    pub port: Option<String>,
    /// SIMM geometry.
    pub simm: SimmConfig,
    /// Verify mode for writes.
    pub verify: VerifyMode,
    /// Inactivity deadline.
    pub timeout: Duration,
    /// Suppress progress output.
    pub quiet: bool,
}

/// What an operation ended with.
#[derive(Debug)]
pub(crate) struct Outcome {
    /// The terminal event.
    pub event: ProgrammerEvent,
    /// Shorted pin pairs reported by the electrical test.
    pub shorts: Vec<(u8, u8)>,
}

/// Programmer plus everything needed to pump it.
pub(crate) struct Runner {
    programmer: Programmer<NativeTransport>,
    host_rx: Receiver<HostEvent>,
    events: Receiver<ProgrammerEvent>,
    _watcher: PortWatcher,
    timeout: Duration,
    quiet: bool,
}

impl Runner {
    /// Set up the engine and find the board.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let (host_tx, host_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();

        let mut programmer = Programmer::new(NativeTransport::new(host_tx.clone()), event_tx);
        programmer.configure_simm(settings.simm);
        programmer.set_verify_mode(settings.verify);
        // The watcher also follows the board across bootloader reboots.
        let watcher = programmer.begin_port_watch(host_tx)?;

        let mut runner = Self {
            programmer,
            host_rx,
            events,
            _watcher: watcher,
            timeout: settings.timeout,
            quiet: settings.quiet,
        };

        if let Some(port) = &settings.port {
            debug!("Using port {port}");
            runner.programmer.set_port_name(port.clone());
        } else {
            runner.wait_for_board()?;
        }
        Ok(runner)
    }

    fn wait_for_board(&mut self) -> Result<()> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        while !self.programmer.presence().is_present() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(CliError::DeviceNotFound(
                    "No programmer board found. Connect it or pass --port".to_string(),
                )
                .into());
            }
            match self.host_rx.recv_timeout(left.min(TICK)) {
                Ok(event) => self.programmer.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => bail!("Port watcher stopped"),
            }
        }
        if let Some(port) = self.programmer.presence().port_name() {
            info!("Found programmer on {port}");
        }
        // Drop the BoardConnected notice.
        for event in self.events.try_iter() {
            debug!("{event:?}");
        }
        Ok(())
    }

    /// The engine, to start an operation.
    pub fn programmer(&mut self) -> &mut Programmer<NativeTransport> {
        &mut self.programmer
    }

    /// Pump events until the running operation ends.
    pub fn run(&mut self) -> Result<Outcome> {
        let pb = self.progress_bar();
        let mut shorts = Vec::new();
        let mut last_activity = Instant::now();
        let mut cancel_sent: Option<Instant> = None;

        loop {
            for event in self.events.try_iter() {
                match event {
                    ProgrammerEvent::TotalLength(phase, total) => {
                        pb.reset();
                        pb.set_length(u64::from(total));
                        pb.set_message(phase_name(phase));
                    },
                    ProgrammerEvent::CompletionLength(_, done) => pb.set_position(u64::from(done)),
                    ProgrammerEvent::ElectricalTestFailLocation(a, b) => {
                        pb.suspend(|| {
                            if !self.quiet {
                                eprintln!(
                                    "  {} {} shorted to {}",
                                    style("✗").red(),
                                    pin_name(a),
                                    pin_name(b)
                                );
                            }
                        });
                        shorts.push((a, b));
                    },
                    event if event.is_terminal() => {
                        pb.finish_and_clear();
                        return Ok(Outcome { event, shorts });
                    },
                    event => status_message(&pb, event),
                }
            }

            if !self.programmer.is_busy() {
                pb.finish_and_clear();
                bail!("Operation ended without a result");
            }

            if was_interrupted() {
                match cancel_sent {
                    None => {
                        pb.set_message("cancelling");
                        self.programmer.request_cancel();
                        cancel_sent = Some(Instant::now());
                    },
                    Some(at) if at.elapsed() > CANCEL_GRACE => {
                        pb.abandon();
                        return Err(CliError::Cancelled("Interrupted".to_string()).into());
                    },
                    Some(_) => {},
                }
            }

            match self.host_rx.recv_timeout(TICK) {
                Ok(event) => {
                    last_activity = Instant::now();
                    self.programmer.handle_event(event);
                },
                Err(RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() > self.timeout {
                        warn!("No response from the programmer for {:?}", self.timeout);
                        self.programmer.handle_timeout();
                    }
                },
                Err(RecvTimeoutError::Disconnected) => {
                    pb.abandon();
                    bail!("Host event channel closed");
                },
            }
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        if self.quiet || !use_fancy_output() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Write => "writing",
        Phase::Read => "reading",
        Phase::Verify => "verifying",
        Phase::FirmwareFlash => "flashing firmware",
    }
}

/// Show a non-terminal status on the bar, or log it when there is none.
fn status_message(pb: &ProgressBar, event: ProgrammerEvent) {
    let message = match event {
        ProgrammerEvent::Start(StartStatus::Initializing) => {
            "switching programmer mode".to_string()
        },
        ProgrammerEvent::Start(StartStatus::Initialized) => {
            debug!("Programmer ready");
            return;
        },
        ProgrammerEvent::Write(status) => status.to_string(),
        ProgrammerEvent::Read(status) => status.to_string(),
        ProgrammerEvent::Identification(status) => status.to_string(),
        ProgrammerEvent::ElectricalTest(status) => status.to_string(),
        ProgrammerEvent::FirmwareFlash(status) => status.to_string(),
        other => {
            debug!("{other:?}");
            return;
        },
    };
    if pb.is_hidden() {
        info!("{message}");
    } else {
        pb.set_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simmflash::WriteStatus;

    #[test]
    fn test_phase_names() {
        assert_eq!(phase_name(Phase::Write), "writing");
        assert_eq!(phase_name(Phase::Verify), "verifying");
        assert_eq!(phase_name(Phase::FirmwareFlash), "flashing firmware");
    }

    #[test]
    fn test_status_message_updates_bar() {
        let pb = ProgressBar::new(10);
        status_message(&pb, ProgrammerEvent::Write(WriteStatus::Erasing));
        if !pb.is_hidden() {
            assert_eq!(pb.message(), "erasing");
        }
    }
}
