//! Native serial transport using the `serialport` crate.
//!
//! Opening the port spawns a reader thread on a cloned handle. The thread
//! forwards every received burst as [`HostEvent::Data`] and reports a failed
//! read as [`HostEvent::PortError`]. Closing stops and joins the thread before
//! the port is dropped.

use {
    crate::{
        error::{Error, Result},
        host::HostEvent,
        port::{SerialConfig, Transport},
    },
    log::{debug, trace, warn},
    std::{
        io::{ErrorKind, Read, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
            mpsc::Sender,
        },
        thread::{self, JoinHandle},
    },
};

/// Size of the reader thread's receive buffer.
const READ_BUFFER_SIZE: usize = 4096;

struct Reader {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Serial transport backed by a native serial port.
pub struct NativeTransport {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    reader: Option<Reader>,
    events: Sender<HostEvent>,
}

impl NativeTransport {
    /// Create a closed transport that will deliver received bytes to `events`.
    pub fn new(events: Sender<HostEvent>) -> Self {
        Self::with_config(SerialConfig::default(), events)
    }

    /// Create a closed transport with an explicit configuration.
    pub fn with_config(config: SerialConfig, events: Sender<HostEvent>) -> Self {
        Self {
            config,
            port: None,
            name: String::new(),
            reader: None,
            events,
        }
    }

    /// Name of the open port (empty when closed).
    pub fn name(&self) -> &str {
        &self.name
    }

    fn spawn_reader(&self, mut port: Box<dyn serialport::SerialPort>) -> Result<Reader> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let events = self.events.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name("simmflash-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                while !thread_stop.load(Ordering::Acquire) {
                    match port.read(&mut buf) {
                        Ok(0) => {},
                        Ok(n) => {
                            trace!("<- {n} bytes from {name}");
                            if events.send(HostEvent::Data(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        },
                        Err(e) if e.kind() == ErrorKind::TimedOut => {},
                        Err(e) if e.kind() == ErrorKind::Interrupted => {},
                        Err(e) => {
                            if !thread_stop.load(Ordering::Acquire) {
                                warn!("Read from {name} failed: {e}");
                                let _ = events.send(HostEvent::PortError(e.to_string()));
                            }
                            break;
                        },
                    }
                }
                debug!("Reader thread for {name} exiting");
            })?;

        Ok(Reader { stop, handle })
    }
}

impl Transport for NativeTransport {
    fn open(&mut self, port_name: &str) -> Result<()> {
        self.close();

        debug!("Opening {port_name}");
        let port = serialport::new(port_name, self.config.baud_rate)
            .timeout(self.config.read_timeout)
            .open()?;
        let reader_port = port.try_clone()?;

        self.name = port_name.to_string();
        self.reader = Some(self.spawn_reader(reader_port)?);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Release);
            if reader.handle.join().is_err() {
                warn!("Reader thread for {} panicked", self.name);
            }
        }
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        self.name.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::PortClosed)?;
        trace!("-> {} bytes", buf.len());
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }
}

impl Drop for NativeTransport {
    fn drop(&mut self) {
        self.close();
    }
}
