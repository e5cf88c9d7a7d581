//! Driver for the TashTenHat family of I2C-attached transceivers: PL513,
//! TW523/PSC05, and the two XTB-523 firmware modes. Unlike the CM11A
//! driver, these transceivers are dumb line-level modems — this crate does
//! the half-cycle bit encoding itself (via [`x10_proto::codec`]) and, where
//! the transceiver echoes what it transmitted, confirms the send by
//! matching the echo bit-for-bit with [`x10_proto::matcher::BitStreamMatcher`].
//!
//! All four variants share one I2C wire format: an outbound packet is the
//! half-cycle bits, MSB-first and left-justified into bytes, followed by a
//! single `0x00` terminator byte so the firmware can tell meaningful bits
//! from the zero-padding of the last byte. Inbound polling reads one byte
//! at a time; a `0x00` read identical to the previous read means the bus is
//! idle and is coalesced rather than re-fed as eight more zero bits, or a
//! sufficiently chatty idle line would eventually exhaust memory.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use std::collections::HashMap;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};

use x10_proto::codec::{encode_event, pack_bits};
use x10_proto::dimacc::{tw523_dim_func, xtb_normal_dim_func, DimAccumulator};
use x10_proto::echo::{predicted_echo_frame_and_qty, Family};
use x10_proto::event::Function;
use x10_proto::facade::InterfaceHandles;
use x10_proto::frame::FrameProcessor;
use x10_proto::matcher::BitStreamMatcher;
use x10_proto::{Controller, Event, Interface, PendingTracker, Result, X10Error};

/// The fixed I2C address every TashTenHat variant answers on.
pub const I2C_BASE_ADDR: u16 = 0x58;

/// `I2C_SLAVE`: tell the bus driver which device address subsequent
/// `read`/`write` calls on the file descriptor should target. This is one
/// of the Linux ioctls predating the `_IO`-family encoding, so it's a bare
/// request number rather than one built from type/nr/size.
const IOCTL_I2C_TARGET: u64 = 0x0703;

nix::ioctl_write_int_bad!(i2c_set_slave, IOCTL_I2C_TARGET);

/// Consecutive send failures (echo timeout or mismatch) before giving up.
pub const MAX_FAILURES: u32 = 5;
/// How long to wait for an echo to fully match before declaring a timeout.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the reader thread blocks on the outbound queue between polls.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(250);
/// Interframe gap length in half-cycles; shared with the frame processor's
/// own zero-run cap so segmenting agrees between transmit and receive.
pub const INTERFRAME_ZEROES: usize = x10_proto::matcher::ZERO_RUN_CAP;

/// Which of the four TashTenHat personalities this interface speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Fire-and-forget: no echo is ever produced, so sends are never
    /// confirmed beyond the I2C write succeeding.
    Pl513,
    Tw523Psc05,
    Xtb523Normal,
    Xtb523AllBits,
}

impl Variant {
    fn family(self) -> Option<Family> {
        match self {
            Variant::Pl513 => None,
            Variant::Tw523Psc05 => Some(Family::Tw523Psc05),
            Variant::Xtb523Normal => Some(Family::Xtb523Normal),
            Variant::Xtb523AllBits => Some(Family::Xtb523AllBits),
        }
    }

    fn all_bits_mode(self) -> bool {
        matches!(self, Variant::Xtb523AllBits)
    }

    /// The raw-repeat-count to dim-step relationship this variant's
    /// firmware implies for a held Dim/Bright pulse train, or `None` when
    /// the variant has no dim-accumulation behavior of its own (PL513
    /// passes events straight through; all-bits mode reports every
    /// transmitted repeat uncollapsed, so there's nothing to coalesce).
    fn dim_func(self) -> Option<fn(u32) -> i32> {
        match self {
            Variant::Pl513 | Variant::Xtb523AllBits => None,
            Variant::Tw523Psc05 => Some(tw523_dim_func),
            Variant::Xtb523Normal => Some(xtb_normal_dim_func),
        }
    }
}

/// Configuration needed to open a TashTenHat interface.
pub struct TashTenHatConfig {
    pub i2c_device: String,
    pub variant: Variant,
}

/// A minimal I2C byte transport; implemented for the real device file and
/// for an in-memory mock in tests.
trait I2cBus: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
    /// Read one byte if one is available within `timeout`; `None` means the
    /// bus had nothing new (treated the same as an idle `0x00`).
    fn read_byte(&mut self, timeout: Duration) -> Option<u8>;
}

struct DeviceBus {
    file: File,
}

impl DeviceBus {
    fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| X10Error::Config(format!("failed to open {path}: {e}")))?;
        unsafe {
            i2c_set_slave(file.as_raw_fd(), I2C_BASE_ADDR as i32)
                .map_err(|e| X10Error::Config(format!("I2C_SLAVE ioctl failed: {e}")))?;
        }
        Ok(DeviceBus { file })
    }
}

impl I2cBus for DeviceBus {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 1];
        loop {
            match self.file.read(&mut buf) {
                Ok(1) => return Some(buf[0]),
                Ok(_) => return None,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    warn!("I2C read error: {e}");
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }
}

/// Pack `bits` MSB-first/left-justified and append the `0x00` terminator.
fn frame_to_wire_bytes(bits: &[bool]) -> Vec<u8> {
    let mut out = pack_bits(bits);
    out.push(0x00);
    out
}

struct Session<B> {
    bus: B,
    variant: Variant,
    /// Where a successfully transmitted event is enqueued as a local echo.
    /// PL513 has no hardware echo at all, so this is the only way its own
    /// transmits ever appear on `events_in`; the echo-confirmed variants
    /// enqueue here too once the matcher confirms the line agrees.
    events_in: Sender<Event>,
}

impl<B: I2cBus> Session<B> {
    fn send_event(&mut self, event: &Event, tracker: &PendingTracker) -> Result<()> {
        tracker.begin(*event);
        let bits = encode_event(event);
        let result = match self.variant.family() {
            None => self.send_unconfirmed(&bits),
            Some(family) => self.send_with_echo(event, &bits, family),
        };
        tracker.complete();
        if result.is_ok() {
            let _ = self.events_in.send(*event);
        }
        result
    }

    fn send_unconfirmed(&mut self, bits: &[bool]) -> Result<()> {
        self.bus.write_all(&frame_to_wire_bytes(bits))
    }

    fn send_with_echo(&mut self, event: &Event, bits: &[bool], family: Family) -> Result<()> {
        let (echo_frame, echo_qty) = predicted_echo_frame_and_qty(event, family);
        let mut expected = Vec::with_capacity(echo_frame.len() * echo_qty as usize);
        for _ in 0..echo_qty {
            expected.extend_from_slice(&echo_frame);
        }

        let mut last_failure = None;
        for attempt in 1..=MAX_FAILURES {
            let matcher = BitStreamMatcher::new();
            matcher.expect(&expected);
            self.bus.write_all(&frame_to_wire_bytes(bits))?;

            let deadline = Instant::now() + ECHO_TIMEOUT;
            let mut previous_byte = None;
            let matched = loop {
                if Instant::now() >= deadline {
                    break false;
                }
                match self.bus.read_byte(Duration::from_millis(100)) {
                    Some(0x00) if previous_byte == Some(0x00) => continue,
                    Some(byte) => {
                        previous_byte = Some(byte);
                        matcher.feed_byte(byte, 8);
                        if matcher.wait(Duration::from_millis(0)) {
                            break true;
                        }
                    }
                    None => continue,
                }
            };

            if matched {
                return Ok(());
            }
            last_failure = Some(format!(
                "attempt {attempt}/{MAX_FAILURES}: echo did not match for {event}"
            ));
            warn!("{}", last_failure.as_ref().unwrap());
        }
        Err(X10Error::EchoTimeout(
            last_failure.unwrap_or_else(|| event.to_string()),
        ))
    }
}

/// Look up (or lazily create) the house's accumulator, wired to forward its
/// coalesced `RelativeDim` output onto `events_in`.
fn accumulator_for<'a>(
    accumulators: &'a mut HashMap<u8, DimAccumulator>,
    house: u8,
    events_in: &Sender<Event>,
    dim_func: fn(u32) -> i32,
) -> &'a DimAccumulator {
    accumulators.entry(house).or_insert_with(|| {
        let sink = events_in.clone();
        DimAccumulator::new(house, move |event| { let _ = sink.send(event); }, dim_func)
    })
}

fn reader_loop<B: I2cBus>(
    mut bus: B,
    handles: InterfaceHandles,
    mut frame_processor: FrameProcessor,
    dim_func: Option<fn(u32) -> i32>,
) {
    let mut previous_byte = None;
    let mut accumulators: HashMap<u8, DimAccumulator> = HashMap::new();
    while !handles.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        match bus.read_byte(QUEUE_TIMEOUT) {
            Some(0x00) if previous_byte == Some(0x00) => {}
            Some(byte) => {
                previous_byte = Some(byte);
                let decoded = (0..8).filter_map(|i| frame_processor.feed_bit(byte & (0x80 >> i) != 0));
                for (event, repeats) in decoded {
                    match (dim_func, event) {
                        (Some(dim_func), Event::Function { house, function: Function::Dim }) => {
                            accumulator_for(&mut accumulators, house, &handles.events_in, dim_func)
                                .pulse(false, repeats);
                        }
                        (Some(dim_func), Event::Function { house, function: Function::Bright }) => {
                            accumulator_for(&mut accumulators, house, &handles.events_in, dim_func)
                                .pulse(true, repeats);
                        }
                        _ => {
                            debug!("decoded event from the line: {event}");
                            let _ = handles.events_in.send(event);
                        }
                    }
                }
            }
            None => {}
        }
    }
}

fn run<B: I2cBus + 'static>(bus: B, variant: Variant, handles: InterfaceHandles) {
    info!("tashtenhat session starting for {variant:?}");
    let tracker = PendingTracker::new();
    let mut session = Session {
        bus,
        variant,
        events_in: handles.events_in.clone(),
    };
    while !handles.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        match handles.event_batches_out.recv_timeout(QUEUE_TIMEOUT) {
            Ok(batch) => {
                for event in batch {
                    if let Err(e) = session.send_event(&event, &tracker) {
                        warn!("giving up sending {event}: {e}");
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Open the I2C device named in `config` and return a running interface.
///
/// The transmit and receive sides of the bus are driven by separate
/// threads sharing one open file descriptor's underlying device, since the
/// Linux I2C character device serializes `read`/`write` calls per `open`.
pub fn open(config: TashTenHatConfig) -> Result<Interface> {
    let tx_bus = DeviceBus::open(&config.i2c_device)?;
    let rx_bus = DeviceBus::open(&config.i2c_device)?;
    Ok(spawn(tx_bus, rx_bus, config.variant))
}

fn spawn<B: I2cBus + 'static>(tx_bus: B, rx_bus: B, variant: Variant) -> Interface {
    let mut controller = Controller::new();
    // events_in_tx is the driver-side sender both worker threads push
    // decoded/locally-echoed events through; events_in_rx is the caller-
    // facing receiving end `Interface::get` reads from.
    let (events_in_tx, events_in_rx) = unbounded();
    // batches_tx is the caller-facing sender `Interface::put_batch` writes
    // through; batches_rx is the driver-side receiver the tx thread drains.
    let (batches_tx, batches_rx) = unbounded();
    let shutdown = controller.shutdown_flag();

    let tx_handles = InterfaceHandles {
        events_in: events_in_tx.clone(),
        event_batches_out: batches_rx,
        shutdown: shutdown.clone(),
    };
    controller.spawn("tashtenhat-tx", move || run(tx_bus, variant, tx_handles));

    let rx_handles = InterfaceHandles {
        events_in: events_in_tx,
        event_batches_out: crossbeam_channel::never(),
        shutdown,
    };
    let frame_processor = FrameProcessor::new(variant.all_bits_mode());
    let dim_func = variant.dim_func();
    controller.spawn("tashtenhat-rx", move || {
        reader_loop(rx_bus, rx_handles, frame_processor, dim_func)
    });

    controller.build(events_in_rx, batches_tx)
}
