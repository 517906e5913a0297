//! Background port watcher.
//!
//! Polls the serial port list and reports programmer boards appearing and
//! disappearing as [`HostEvent::Attached`] / [`HostEvent::Detached`]. A new
//! port is only reported once it has been present for the platform settle
//! time, so the engine never opens a port the OS is still setting up.
//! Boards already present at the first scan are reported immediately.

use {
    crate::{
        device::{UsbId, detect_ports},
        error::Result,
        host::{HostEvent, UsbPortEvent},
    },
    log::{debug, trace},
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
            mpsc::Sender,
        },
        thread::{self, JoinHandle},
        time::{Duration, Instant},
    },
};

/// How long a new port must stay present before it is reported.
#[cfg(target_os = "linux")]
pub const SETTLE_DELAY: Duration = Duration::from_millis(250);
/// How long a new port must stay present before it is reported.
#[cfg(not(target_os = "linux"))]
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default interval between port scans.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns successive port scans into attach/detach events.
#[derive(Debug)]
pub struct ScanTracker {
    ids: Vec<UsbId>,
    settle: Duration,
    reported: HashMap<String, UsbId>,
    pending: HashMap<String, (UsbId, Instant)>,
    primed: bool,
}

impl ScanTracker {
    /// Track ports matching `ids`.
    pub fn new(ids: Vec<UsbId>, settle: Duration) -> Self {
        Self {
            ids,
            settle,
            reported: HashMap::new(),
            pending: HashMap::new(),
            primed: false,
        }
    }

    /// Feed one scan taken at `now`; returns the events it produces.
    pub fn update(&mut self, now: Instant, scan: &[(String, UsbId)]) -> Vec<HostEvent> {
        let mut events = Vec::new();
        let present: HashMap<&str, UsbId> = scan
            .iter()
            .filter(|(_, id)| self.ids.contains(id))
            .map(|(name, id)| (name.as_str(), *id))
            .collect();

        let gone: Vec<String> = self
            .reported
            .keys()
            .filter(|name| !present.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            if let Some(id) = self.reported.remove(&name) {
                debug!("Programmer removed: {name}");
                events.push(HostEvent::Detached(UsbPortEvent::new(id.vid, id.pid, name)));
            }
        }
        self.pending
            .retain(|name, _| present.contains_key(name.as_str()));

        for (name, id) in &present {
            if self.reported.contains_key(*name) {
                continue;
            }
            let settled = if self.primed {
                let first_seen = self
                    .pending
                    .entry((*name).to_string())
                    .or_insert((*id, now))
                    .1;
                now.duration_since(first_seen) >= self.settle
            } else {
                true
            };
            if settled {
                self.pending.remove(*name);
                self.reported.insert((*name).to_string(), *id);
                debug!("Programmer attached: {name}");
                events.push(HostEvent::Attached(UsbPortEvent::new(id.vid, id.pid, *name)));
            } else {
                trace!("Waiting for {name} to settle");
            }
        }

        self.primed = true;
        events
    }
}

/// Handle to the polling thread; dropping it stops the thread.
pub struct PortWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PortWatcher {
    /// Start watching for programmer boards with the given IDs.
    pub fn spawn(ids: Vec<UsbId>, interval: Duration, events: Sender<HostEvent>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("simmflash-watch".to_string())
            .spawn(move || {
                let mut tracker = ScanTracker::new(ids, SETTLE_DELAY);
                while !thread_stop.load(Ordering::Acquire) {
                    let scan: Vec<(String, UsbId)> = detect_ports()
                        .into_iter()
                        .filter_map(|p| p.usb_id().map(|id| (p.name, id)))
                        .collect();
                    for event in tracker.update(Instant::now(), &scan) {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    thread::sleep(interval);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for PortWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: UsbId = UsbId::new(0x16D0, 0x06AA);
    const OTHER: UsbId = UsbId::new(0x1A86, 0x7523);

    fn scan(entries: &[(&str, UsbId)]) -> Vec<(String, UsbId)> {
        entries.iter().map(|(n, id)| ((*n).to_string(), *id)).collect()
    }

    #[test]
    fn test_initial_scan_reports_immediately() {
        let mut tracker = ScanTracker::new(vec![BOARD], Duration::from_millis(500));
        let t0 = Instant::now();
        let events = tracker.update(t0, &scan(&[("/dev/ttyACM0", BOARD), ("/dev/ttyUSB0", OTHER)]));
        assert_eq!(
            events,
            vec![HostEvent::Attached(UsbPortEvent::new(0x16D0, 0x06AA, "/dev/ttyACM0"))]
        );
        assert!(tracker.update(t0, &scan(&[("/dev/ttyACM0", BOARD)])).is_empty());
    }

    #[test]
    fn test_arrival_waits_for_settle() {
        let mut tracker = ScanTracker::new(vec![BOARD], Duration::from_millis(500));
        let t0 = Instant::now();
        assert!(tracker.update(t0, &[]).is_empty());

        let present = scan(&[("/dev/ttyACM1", BOARD)]);
        assert!(tracker.update(t0 + Duration::from_millis(100), &present).is_empty());
        assert!(tracker.update(t0 + Duration::from_millis(400), &present).is_empty());
        let events = tracker.update(t0 + Duration::from_millis(600), &present);
        assert_eq!(
            events,
            vec![HostEvent::Attached(UsbPortEvent::new(0x16D0, 0x06AA, "/dev/ttyACM1"))]
        );
    }

    #[test]
    fn test_removal_is_immediate() {
        let mut tracker = ScanTracker::new(vec![BOARD], Duration::from_millis(500));
        let t0 = Instant::now();
        tracker.update(t0, &scan(&[("/dev/ttyACM0", BOARD)]));
        let events = tracker.update(t0 + Duration::from_millis(10), &[]);
        assert_eq!(
            events,
            vec![HostEvent::Detached(UsbPortEvent::new(0x16D0, 0x06AA, "/dev/ttyACM0"))]
        );
    }

    #[test]
    fn test_blip_shorter_than_settle_is_ignored() {
        let mut tracker = ScanTracker::new(vec![BOARD], Duration::from_millis(500));
        let t0 = Instant::now();
        tracker.update(t0, &[]);
        tracker.update(t0 + Duration::from_millis(100), &scan(&[("/dev/ttyACM0", BOARD)]));
        assert!(tracker.update(t0 + Duration::from_millis(200), &[]).is_empty());
        assert!(
            tracker
                .update(t0 + Duration::from_millis(900), &[])
                .is_empty()
        );
    }
}
