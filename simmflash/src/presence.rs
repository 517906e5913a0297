//! Tracks whether a programmer board is attached and on which port.

use crate::device::{UsbId, programmer_ids};
use crate::host::UsbPortEvent;

/// Whether the board has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceState {
    /// No attach or detach observed yet.
    #[default]
    Unknown,
    /// The board went away.
    Absent,
    /// The board is attached on [`DevicePresence::port_name`].
    Present,
}

/// Board presence as seen through attach/detach events.
#[derive(Debug, Clone)]
pub struct DevicePresence {
    ids: Vec<UsbId>,
    port_name: Option<String>,
    state: PresenceState,
}

impl Default for DevicePresence {
    fn default() -> Self {
        Self::new(programmer_ids())
    }
}

impl DevicePresence {
    /// Track boards with the given USB IDs.
    pub fn new(ids: Vec<UsbId>) -> Self {
        Self {
            ids,
            port_name: None,
            state: PresenceState::Unknown,
        }
    }

    /// Whether the event comes from a programmer board.
    pub fn matches(&self, event: &UsbPortEvent) -> bool {
        self.ids.contains(&UsbId::new(event.vid, event.pid))
    }

    /// Record an arrival. Returns `true` if it was a programmer board.
    pub fn attach(&mut self, event: &UsbPortEvent) -> bool {
        if !self.matches(event) {
            return false;
        }
        self.port_name = Some(event.port_name.clone());
        self.state = PresenceState::Present;
        true
    }

    /// Record a removal. Returns `true` if the tracked board went away.
    pub fn detach(&mut self, event: &UsbPortEvent) -> bool {
        if !self.matches(event) || self.state != PresenceState::Present {
            return false;
        }
        if self
            .port_name
            .as_deref()
            .is_some_and(|name| name != event.port_name)
        {
            return false;
        }
        self.port_name = None;
        self.state = PresenceState::Absent;
        true
    }

    /// Use an explicitly named port and consider the board present.
    pub fn set_port_override(&mut self, port_name: impl Into<String>) {
        self.port_name = Some(port_name.into());
        self.state = PresenceState::Present;
    }

    /// USB IDs this tracker matches.
    pub fn ids(&self) -> &[UsbId] {
        &self.ids
    }

    /// Port the board was last seen on.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Current state.
    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// Whether the board is attached.
    pub fn is_present(&self) -> bool {
        self.state == PresenceState::Present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(port: &str) -> UsbPortEvent {
        UsbPortEvent::new(0x16D0, 0x06AA, port)
    }

    #[test]
    fn test_attach_and_detach() {
        let mut presence = DevicePresence::default();
        assert_eq!(presence.state(), PresenceState::Unknown);

        assert!(presence.attach(&board("/dev/ttyACM0")));
        assert!(presence.is_present());
        assert_eq!(presence.port_name(), Some("/dev/ttyACM0"));

        assert!(presence.detach(&board("/dev/ttyACM0")));
        assert_eq!(presence.state(), PresenceState::Absent);
        assert_eq!(presence.port_name(), None);
    }

    #[test]
    fn test_ignores_other_devices() {
        let mut presence = DevicePresence::default();
        assert!(!presence.attach(&UsbPortEvent::new(0x1A86, 0x7523, "/dev/ttyUSB0")));
        assert_eq!(presence.state(), PresenceState::Unknown);
    }

    #[test]
    fn test_detach_requires_present() {
        let mut presence = DevicePresence::default();
        assert!(!presence.detach(&board("/dev/ttyACM0")));

        presence.attach(&board("/dev/ttyACM0"));
        assert!(!presence.detach(&board("/dev/ttyACM1")));
        assert!(presence.is_present());
    }

    #[test]
    fn test_legacy_ids_match() {
        let mut presence = DevicePresence::default();
        assert!(presence.attach(&UsbPortEvent::new(0x03EB, 0x204B, "COM4")));
        assert_eq!(presence.port_name(), Some("COM4"));
    }

    #[test]
    fn test_port_override() {
        let mut presence = DevicePresence::default();
        presence.set_port_override("/dev/ttyACM7");
        assert!(presence.is_present());
        assert_eq!(presence.port_name(), Some("/dev/ttyACM7"));
    }
}
