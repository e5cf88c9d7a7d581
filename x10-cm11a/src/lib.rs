//! Driver for the CM11A-family serial transceivers: a single RS-232 (or
//! USB-serial) link carrying 4800 8N1 bytes, where commands are
//! acknowledged by a checksum handshake rather than by listening for
//! line-level echo. Unlike the TashTenHat driver, this one never touches
//! raw half-cycle bits — the interface firmware does that encoding itself.
//!
//! The interface also polls the host asynchronously: a `0x5A` byte means
//! "I have received powerline traffic for you to collect", and `0xA5`
//! means "set my clock". Either can arrive in the middle of a send, which
//! is what [`x10_proto::X10Error::InterruptedByPoll`] models — the current
//! send is abandoned, the poll is serviced, and the send is retried.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};
use serialport::SerialPort;

use x10_proto::event::{code_to_house_letter, code_to_unit_number, house_letter_to_code, unit_number_to_code};
use x10_proto::{Controller, Event, Function, Interface, PendingTracker, Result, X10Error};

/// Checksum retries before a send is abandoned as unrecoverable.
pub const MAX_CHECKSUM_FAILURES: u32 = 5;
/// Total send attempts (checksum retries plus poll interruptions) before
/// giving up on an event entirely.
pub const MAX_FAILURES: u32 = 10;
/// How long to wait for the interface to answer a checksum or ready byte.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Serial read timeout used while polling for an unsolicited byte.
pub const SERIAL_TIMEOUT: Duration = Duration::from_millis(250);
/// How long to wait between servicing one poll and resuming transmission.
pub const POLL_WAIT_TIME: Duration = Duration::from_millis(1500);
/// Delay after opening the port before the interface is assumed ready.
pub const RESET_DELAY: Duration = Duration::from_secs(1);

const POLL_DATA_READY: u8 = 0x5A;
const POLL_TIME_REQUEST: u8 = 0xA5;
const REQUEST_DATA_TRANSFER: u8 = 0xC3;
const ACK: u8 = 0x00;
const READY: u8 = 0x55;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode one event as the byte packet this driver sends on the wire.
/// Address and Function packets are two bytes (flag, house/key); RelativeDim
/// folds its step count into the high 5 bits of the flag byte itself rather
/// than carrying a separate byte; Extended Code carries the unit/data/cmd
/// fields after the function byte.
fn encode_command(event: &Event) -> Result<Vec<u8>> {
    const ADDRESS_FLAG: u8 = 0x04;
    const FUNCTION_FLAG: u8 = 0x06;
    const EXTENDED_FLAG: u8 = 0x07;

    Ok(match *event {
        Event::Address { house, unit } => vec![ADDRESS_FLAG, (house << 4) | unit],
        Event::Function { house, function } => {
            vec![FUNCTION_FLAG, (house << 4) | function.code()]
        }
        Event::RelativeDim { house, dim } => {
            let function = if dim < 0.0 { Function::Dim } else { Function::Bright };
            let steps = (x10_proto::event::RELATIVE_DIM_STEPS as f64 * dim.abs()).round() as u8;
            vec![
                FUNCTION_FLAG | (steps & 0x1F) << 3,
                (house << 4) | function.code(),
            ]
        }
        Event::AbsoluteDim { dim } => {
            let level = (dim * 31.0).round() as u8;
            let function = if level & 0x10 != 0 {
                Function::PresetDim1
            } else {
                Function::PresetDim0
            };
            vec![FUNCTION_FLAG, (level & 0xF) << 4 | function.code()]
        }
        Event::ExtendedCode {
            house,
            unit,
            data_byte,
            cmd_byte,
        } => vec![
            EXTENDED_FLAG,
            (house << 4) | unit,
            data_byte,
            cmd_byte,
        ],
    })
}

/// Decode one address or function byte pair read back from an interface
/// poll transfer. `is_function` comes from the transfer's per-byte bitmap.
fn decode_polled_byte(house_unit: u8, is_function: bool) -> Event {
    let house = house_unit >> 4;
    let key = house_unit & 0xF;
    if is_function {
        Event::Function {
            house,
            function: Function::from_code(key),
        }
    } else {
        Event::Address { house, unit: key }
    }
}

struct Session<S> {
    port: S,
    /// Where a successfully handshaken event is enqueued as a local echo.
    events_in: Sender<Event>,
}

impl<S: Read + Write> Session<S> {
    fn read_byte(&mut self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];
        loop {
            match self.port.read(&mut buf) {
                Ok(1) => return Some(buf[0]),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("serial read error: {e}");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    /// Attempt one full checksum handshake for `packet`. Returns
    /// `Err(InterruptedByPoll)` if the interface emitted a poll byte
    /// instead of a checksum echo, so the caller can service it and retry.
    fn try_send(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        let expected = checksum(packet);
        match self.read_byte(READY_TIMEOUT) {
            Some(POLL_DATA_READY) => Err(X10Error::InterruptedByPoll(POLL_DATA_READY)),
            Some(POLL_TIME_REQUEST) => Err(X10Error::InterruptedByPoll(POLL_TIME_REQUEST)),
            Some(echoed) if echoed == expected => {
                self.port.write_all(&[ACK])?;
                match self.read_byte(READY_TIMEOUT) {
                    Some(READY) => Ok(()),
                    Some(other) => Err(X10Error::ProtocolViolation(format!(
                        "expected ready byte 0x{READY:02X}, got 0x{other:02X}"
                    ))),
                    None => Err(X10Error::ProtocolViolation(
                        "interface did not confirm ready after ack".into(),
                    )),
                }
            }
            Some(bad) => Err(X10Error::ProtocolViolation(format!(
                "checksum mismatch: expected 0x{expected:02X}, got 0x{bad:02X}"
            ))),
            None => Err(X10Error::ProtocolViolation(
                "no checksum response from interface".into(),
            )),
        }
    }

    fn send_with_handshake(&mut self, event: &Event, tracker: &PendingTracker) -> Result<()> {
        let packet = encode_command(event)?;
        tracker.begin(*event);
        let mut checksum_failures = 0u32;
        for _ in 0..MAX_FAILURES {
            match self.try_send(&packet) {
                Ok(()) => {
                    tracker.complete();
                    let _ = self.events_in.send(*event);
                    return Ok(());
                }
                Err(X10Error::InterruptedByPoll(token)) => {
                    debug!("send interrupted by poll byte 0x{token:02X}, servicing it");
                    self.service_poll(token, None);
                    std::thread::sleep(POLL_WAIT_TIME);
                }
                Err(X10Error::ProtocolViolation(msg)) => {
                    checksum_failures += 1;
                    warn!("checksum handshake failed ({checksum_failures}/{MAX_CHECKSUM_FAILURES}): {msg}");
                    if checksum_failures >= MAX_CHECKSUM_FAILURES {
                        tracker.complete();
                        return Err(X10Error::ChecksumExhausted(event.to_string()));
                    }
                }
                Err(other) => {
                    tracker.complete();
                    return Err(other);
                }
            }
        }
        tracker.complete();
        Err(X10Error::ChecksumExhausted(event.to_string()))
    }

    /// Service an unsolicited poll byte seen outside of a send attempt
    /// (`token` was just read from the port). For a data-ready poll, the
    /// decoded events are pushed to `out` individually if given. For a
    /// time-request poll, this driver simply acknowledges it; setting the
    /// interface's real-time clock is outside this crate's scope.
    fn service_poll(&mut self, token: u8, out: Option<&Sender<Event>>) {
        match token {
            POLL_DATA_READY => {
                if let Err(e) = self.drain_data_transfer(out) {
                    warn!("failed draining polled data transfer: {e}");
                }
            }
            POLL_TIME_REQUEST => {
                debug!("interface requested a clock set; acknowledging without one");
                let _ = self.port.write_all(&[ACK]);
            }
            other => warn!("unrecognized poll byte 0x{other:02X}"),
        }
    }

    fn drain_data_transfer(&mut self, out: Option<&Sender<Event>>) -> Result<()> {
        self.port.write_all(&[REQUEST_DATA_TRANSFER])?;
        let count = self
            .read_byte(READY_TIMEOUT)
            .ok_or_else(|| X10Error::ProtocolViolation("no byte count in data transfer".into()))?;
        let mask = self
            .read_byte(READY_TIMEOUT)
            .ok_or_else(|| X10Error::ProtocolViolation("no function bitmap in data transfer".into()))?;
        let mut events = Vec::with_capacity(count as usize);
        for i in 0..count {
            let byte = self
                .read_byte(READY_TIMEOUT)
                .ok_or_else(|| X10Error::ProtocolViolation("data transfer truncated".into()))?;
            let is_function = mask & (1 << i) != 0;
            events.push(decode_polled_byte(byte, is_function));
        }
        if !events.is_empty() {
            info!("received {} event(s) from interface poll", events.len());
            if let Some(out) = out {
                for event in events {
                    let _ = out.send(event);
                }
            }
        }
        Ok(())
    }
}

fn run<S: Read + Write>(mut port: S, handles: x10_proto::facade::InterfaceHandles) {
    std::thread::sleep(RESET_DELAY);
    let tracker = PendingTracker::new();
    let mut session = Session {
        port: &mut port,
        events_in: handles.events_in.clone(),
    };
    while !handles.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        match handles.event_batches_out.recv_timeout(SERIAL_TIMEOUT) {
            Ok(batch) => {
                for event in batch {
                    if let Err(e) = session.send_with_handshake(&event, &tracker) {
                        warn!("giving up sending {event}: {e}");
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if let Some(byte) = session.read_byte(Duration::from_millis(1)) {
                    session.service_poll(byte, Some(&handles.events_in));
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Configuration needed to open a CM11A-family interface.
pub struct Cm11aConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for Cm11aConfig {
    fn default() -> Self {
        Cm11aConfig {
            port: String::new(),
            baud_rate: 4800,
        }
    }
}

/// Open the serial port named in `config` and return a running interface.
pub fn open(config: Cm11aConfig) -> Result<Interface> {
    if config.port.is_empty() {
        return Err(X10Error::Config("cm11a interface requires a serial port path".into()));
    }
    let port = serialport::new(&config.port, config.baud_rate)
        .timeout(SERIAL_TIMEOUT)
        .open()
        .map_err(|e| X10Error::Config(format!("failed to open {}: {e}", config.port)))?;
    Ok(spawn(port))
}

fn spawn<S: Read + Write + Send + 'static>(port: S) -> Interface {
    let mut controller = Controller::new();
    let (events_in_tx, events_in_rx) = unbounded();
    let (batches_tx, batches_rx) = unbounded();
    let shutdown = controller.shutdown_flag();
    let handles = x10_proto::facade::InterfaceHandles {
        events_in: events_in_tx,
        event_batches_out: batches_rx,
        shutdown,
    };
    controller.spawn("cm11a-session", move || run(port, handles));
    controller.build(events_in_rx, batches_tx)
}

/// Helper re-exported for callers building house/unit pairs without
/// depending on `x10-proto` directly.
pub fn address_event(house_letter: char, unit_number: u8) -> Result<Event> {
    Ok(Event::Address {
        house: house_letter_to_code(house_letter)?,
        unit: unit_number_to_code(unit_number)?,
    })
}

pub fn describe_address(event: &Event) -> Option<(char, u8)> {
    match *event {
        Event::Address { house, unit } => Some((code_to_house_letter(house), code_to_unit_number(unit))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// A full-duplex in-memory mock of a serial port: bytes written by the
    /// driver land in `written`, and `to_read` feeds the driver's reads.
    #[derive(Clone)]
    struct MockPort {
        to_read: Arc<Mutex<VecDeque<u8>>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl MockPort {
        fn new(scripted_reads: &[u8]) -> Self {
            MockPort {
                to_read: Arc::new(Mutex::new(scripted_reads.iter().copied().collect())),
                written: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn push_reads(&self, bytes: &[u8]) {
            self.to_read.lock().unwrap().extend(bytes.iter().copied());
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut queue = self.to_read.lock().unwrap();
            match queue.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                }
                None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session<S>(port: S) -> (Session<S>, crossbeam_channel::Receiver<Event>) {
        let (tx, rx) = unbounded();
        (Session { port, events_in: tx }, rx)
    }

    #[test]
    fn encodes_address_and_function_as_two_byte_packets() {
        let event = Event::Address { house: 0x6, unit: 0xE };
        assert_eq!(encode_command(&event).unwrap(), vec![0x04, 0x6E]);

        let event = Event::Function {
            house: 0x6,
            function: Function::On,
        };
        assert_eq!(encode_command(&event).unwrap(), vec![0x06, 0x62]);
    }

    #[test]
    fn encodes_relative_dim_with_the_step_count_in_the_flag_byte() {
        let event = Event::RelativeDim { house: 0x6, dim: -1.0 };
        // steps = round(22 * 1.0) = 22 = 0x16; flag = 0x06 | (0x16 & 0x1F) << 3
        assert_eq!(encode_command(&event).unwrap(), vec![0x06 | (22 << 3), 0x64]);

        let event = Event::RelativeDim { house: 0x6, dim: 0.5 };
        // steps = round(22 * 0.5) = 11 = 0x0B
        assert_eq!(encode_command(&event).unwrap(), vec![0x06 | (11 << 3), 0x65]);
    }

    #[test]
    fn clean_handshake_succeeds_on_first_try() {
        let packet = encode_command(&Event::Function {
            house: 0x6,
            function: Function::On,
        })
        .unwrap();
        let expected_checksum = checksum(&packet);
        let port = MockPort::new(&[expected_checksum, READY]);
        let (mut session, echoed) = session(port.clone());
        let tracker = PendingTracker::new();
        let event = Event::Function {
            house: 0x6,
            function: Function::On,
        };
        session.send_with_handshake(&event, &tracker).unwrap();
        assert_eq!(&port.written.lock().unwrap()[..], &[0x06, 0x62, ACK]);
        assert_eq!(echoed.try_recv().unwrap(), event);
    }

    #[test]
    fn bad_checksum_is_retried_until_it_succeeds() {
        let packet = encode_command(&Event::Function {
            house: 0x6,
            function: Function::Off,
        })
        .unwrap();
        let expected_checksum = checksum(&packet);
        let port = MockPort::new(&[0xFF, expected_checksum, READY]);
        let (mut session, _echoed) = session(port);
        let tracker = PendingTracker::new();
        session
            .send_with_handshake(
                &Event::Function {
                    house: 0x6,
                    function: Function::Off,
                },
                &tracker,
            )
            .unwrap();
    }

    #[test]
    fn exhausting_checksum_retries_gives_up() {
        let port = MockPort::new(&[0xFF; 20]);
        let (mut session, echoed) = session(port);
        let tracker = PendingTracker::new();
        let result = session.send_with_handshake(
            &Event::Function {
                house: 0x6,
                function: Function::Off,
            },
            &tracker,
        );
        assert!(matches!(result, Err(X10Error::ChecksumExhausted(_))));
        assert!(echoed.try_recv().is_err(), "a failed send must not be locally echoed");
    }

    #[test]
    fn data_ready_poll_interrupts_then_send_resumes() {
        let packet = encode_command(&Event::Function {
            house: 0x6,
            function: Function::On,
        })
        .unwrap();
        let expected_checksum = checksum(&packet);
        // First attempt is interrupted by a data-ready poll; the driver
        // services it (count=1, mask=0 meaning an address byte), then
        // retries the send and gets a clean handshake.
        let port = MockPort::new(&[POLL_DATA_READY, 1, 0x00, 0x6E, expected_checksum, READY]);
        let (mut session, _echoed) = session(port);
        let tracker = PendingTracker::new();
        session
            .send_with_handshake(
                &Event::Function {
                    house: 0x6,
                    function: Function::On,
                },
                &tracker,
            )
            .unwrap();
    }

    #[test]
    fn decode_polled_byte_distinguishes_address_from_function() {
        assert_eq!(
            decode_polled_byte(0x62, true),
            Event::Function {
                house: 0x6,
                function: Function::On
            }
        );
        assert_eq!(
            decode_polled_byte(0x6E, false),
            Event::Address { house: 0x6, unit: 0xE }
        );
    }
}
