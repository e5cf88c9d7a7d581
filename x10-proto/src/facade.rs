//! The interface facade (component C9): the queue-based contract every
//! driver crate exposes to an application, regardless of whether the
//! transceiver underneath is a CM11A on a serial port or a TashTenHat on
//! I2C.
//!
//! An [`Interface`] hands the caller two queues — `events_in`, inbound
//! decoded events consumed one at a time with [`Interface::get`], and
//! `event_batches_out`, outbound batches submitted atomically with
//! [`Interface::put_batch`] — while the driver's own threads run on the
//! other ends of those same two queues, reachable only through
//! [`InterfaceHandles`]. [`Controller`] is the builder a driver's
//! constructor uses to spin those threads up and hand back a ready
//! `Interface`. [`Interface::controller`] is the unrelated, caller-facing
//! per-house command builder from the specification's facade section.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{Result, X10Error};
use crate::event::{house_letter_to_code, unit_number_to_code, Event, Function};

/// The driver-facing halves of an interface's queues, and the shutdown flag
/// every driver thread must poll so [`Interface::join`] doesn't hang.
///
/// A driver's reader thread pushes decoded (or locally-echoed) events onto
/// `events_in`; a driver's transmit thread pulls atomic batches to send off
/// `event_batches_out`.
pub struct InterfaceHandles {
    pub events_in: Sender<Event>,
    pub event_batches_out: Receiver<Vec<Event>>,
    pub shutdown: Arc<AtomicBool>,
}

/// Tracks the event a transmit loop currently has in flight, so status
/// queries and logging can report what's outstanding instead of just
/// "busy". Not a retry queue: a driver that fails to confirm an event
/// is responsible for deciding whether to retry it.
#[derive(Default)]
pub struct PendingTracker {
    current: Mutex<Option<Event>>,
}

impl PendingTracker {
    pub fn new() -> Self {
        PendingTracker {
            current: Mutex::new(None),
        }
    }

    pub fn begin(&self, event: Event) {
        *self.current.lock().unwrap() = Some(event);
    }

    pub fn complete(&self) {
        *self.current.lock().unwrap() = None;
    }

    pub fn current(&self) -> Option<Event> {
        *self.current.lock().unwrap()
    }
}

/// Builder a driver constructor uses to spawn its worker threads and
/// produce the [`Interface`] handed back to the caller.
pub struct Controller {
    threads: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            threads: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn a named worker thread. Panics propagate to the caller of
    /// [`Interface::join`] rather than being swallowed, since a crashed
    /// driver thread means the interface is no longer servicing the line.
    pub fn spawn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .expect("failed to spawn interface worker thread");
        self.threads.push(handle);
    }

    /// Finish building: wire the caller-facing queue ends, stash the
    /// shutdown flag, and return the `Interface`. `events_in` is the
    /// receiving end of the inbound queue the driver's reader thread feeds;
    /// `event_batches_out` is the sending end of the outbound queue the
    /// driver's transmit thread drains.
    pub fn build(self, events_in: Receiver<Event>, event_batches_out: Sender<Vec<Event>>) -> Interface {
        Interface {
            events_in,
            event_batches_out,
            shutdown: self.shutdown,
            threads: Mutex::new(self.threads),
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection to a transceiver. Cloning is not supported — an
/// `Interface` owns the one set of queues and worker threads backing a
/// single physical transceiver; share an `Arc<Interface>` if multiple
/// callers need access.
pub struct Interface {
    events_in: Receiver<Event>,
    event_batches_out: Sender<Vec<Event>>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Interface {
    /// Block for up to `timeout` for the next inbound decoded event.
    pub fn get(&self, timeout: Duration) -> Option<Event> {
        self.events_in.recv_timeout(timeout).ok()
    }

    /// Drain every inbound event currently queued without blocking.
    pub fn drain(&self) -> Vec<Event> {
        self.events_in.try_iter().collect()
    }

    /// Submit a batch of events for transmission as one atomic unit: the
    /// driver's transmit thread sends every event in `batch` contiguously,
    /// with no other submitted batch interleaved on the wire.
    pub fn put_batch(&self, batch: Vec<Event>) -> Result<()> {
        self.event_batches_out
            .send(batch)
            .map_err(|_| X10Error::ShuttingDown)
    }

    /// Submit a single event as a one-element batch.
    pub fn put(&self, event: Event) -> Result<()> {
        self.put_batch(vec![event])
    }

    /// A builder that accumulates a batch of events for `house_letter` and
    /// submits them atomically via [`Interface::put_batch`] when a
    /// convenience method is called.
    pub fn controller(&self, house_letter: char) -> Result<HouseController<'_>> {
        Ok(HouseController {
            interface: self,
            house: house_letter_to_code(house_letter)?,
        })
    }

    /// Signal every worker thread to stop at its next check.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Request shutdown and block until every worker thread has exited.
    pub fn join(&self) {
        self.request_shutdown();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let name = handle.thread().name().unwrap_or("interface-worker").to_string();
            if let Err(panic) = handle.join() {
                log::error!("worker thread {name} panicked: {panic:?}");
            }
        }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.request_shutdown();
    }
}

/// Per-house command builder from the specification's facade section
/// (§4.8): each method addresses `unit` (where applicable) and applies a
/// function in one atomic outbound batch.
pub struct HouseController<'a> {
    interface: &'a Interface,
    house: u8,
}

impl<'a> HouseController<'a> {
    fn addressed(&self, unit: u8, function: Function) -> Result<()> {
        let unit = unit_number_to_code(unit)?;
        self.interface.put_batch(vec![
            Event::Address { house: self.house, unit },
            Event::Function { house: self.house, function },
        ])
    }

    pub fn on(&self, unit: u8) -> Result<()> {
        self.addressed(unit, Function::On)
    }

    pub fn off(&self, unit: u8) -> Result<()> {
        self.addressed(unit, Function::Off)
    }

    pub fn dim(&self, unit: u8) -> Result<()> {
        self.addressed(unit, Function::Dim)
    }

    pub fn bright(&self, unit: u8) -> Result<()> {
        self.addressed(unit, Function::Bright)
    }

    /// `amount` is a signed fraction in -1.0..=1.0: negative dims, positive
    /// brightens, matching [`Event::RelativeDim`].
    pub fn rel_dim(&self, unit: u8, amount: f64) -> Result<()> {
        let unit = unit_number_to_code(unit)?;
        self.interface.put_batch(vec![
            Event::Address { house: self.house, unit },
            Event::RelativeDim {
                house: self.house,
                dim: amount,
            },
        ])
    }

    /// `level` is a fraction in 0.0..=1.0, matching [`Event::AbsoluteDim`].
    pub fn abs_dim(&self, unit: u8, level: f64) -> Result<()> {
        let unit = unit_number_to_code(unit)?;
        self.interface.put_batch(vec![
            Event::Address { house: self.house, unit },
            Event::AbsoluteDim { dim: level },
        ])
    }

    pub fn ext_code(&self, unit: u8, data_byte: u8, cmd_byte: u8) -> Result<()> {
        let unit = unit_number_to_code(unit)?;
        self.interface.put_batch(vec![Event::ExtendedCode {
            house: self.house,
            unit,
            data_byte,
            cmd_byte,
        }])
    }

    pub fn all_off(&self) -> Result<()> {
        self.interface.put_batch(vec![Event::Function {
            house: self.house,
            function: Function::AllOff,
        }])
    }

    pub fn all_lights_on(&self) -> Result<()> {
        self.interface.put_batch(vec![Event::Function {
            house: self.house,
            function: Function::AllLightsOn,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn send_and_receive_round_trip_through_a_loopback_worker() {
        let mut controller = Controller::new();
        let (events_in_tx, events_in_rx) = unbounded();
        let (batches_tx, batches_rx) = unbounded();
        let shutdown = controller.shutdown_flag();

        controller.spawn("loopback", move || {
            while !shutdown.load(Ordering::SeqCst) {
                if let Ok(batch) = batches_rx.recv_timeout(Duration::from_millis(50)) {
                    for event in batch {
                        let _ = events_in_tx.send(event);
                    }
                }
            }
        });

        let iface = controller.build(events_in_rx, batches_tx);
        iface
            .put_batch(vec![Event::Function {
                house: 0,
                function: Function::On,
            }])
            .unwrap();
        let event = iface.get(Duration::from_secs(1)).unwrap();
        assert!(matches!(event, Event::Function { function: Function::On, .. }));
        iface.join();
    }

    #[test]
    fn put_batch_after_shutdown_reports_error() {
        let controller = Controller::new();
        let (events_in_tx, events_in_rx) = unbounded();
        let (batches_tx, batches_rx) = unbounded();
        drop(events_in_tx);
        drop(batches_rx);
        let iface = controller.build(events_in_rx, batches_tx);
        let result = iface.put_batch(vec![Event::Function {
            house: 0,
            function: Function::Off,
        }]);
        assert!(matches!(result, Err(X10Error::ShuttingDown)));
    }

    #[test]
    fn pending_tracker_reports_in_flight_event() {
        let tracker = PendingTracker::new();
        assert!(tracker.current().is_none());
        let event = Event::Address { house: 0, unit: 0 };
        tracker.begin(event);
        assert_eq!(tracker.current(), Some(event));
        tracker.complete();
        assert!(tracker.current().is_none());
    }

    #[test]
    fn house_controller_batches_address_and_function_atomically() {
        let mut controller = Controller::new();
        let (events_in_tx, events_in_rx) = unbounded();
        let (batches_tx, batches_rx) = unbounded();
        let shutdown = controller.shutdown_flag();

        controller.spawn("loopback", move || {
            while !shutdown.load(Ordering::SeqCst) {
                if let Ok(batch) = batches_rx.recv_timeout(Duration::from_millis(50)) {
                    assert_eq!(batch.len(), 2, "on() must submit address+function as one batch");
                    for event in batch {
                        let _ = events_in_tx.send(event);
                    }
                }
            }
        });

        let iface = controller.build(events_in_rx, batches_tx);
        iface.controller('A').unwrap().on(1).unwrap();
        let first = iface.get(Duration::from_secs(1)).unwrap();
        assert!(matches!(first, Event::Address { .. }));
        let second = iface.get(Duration::from_secs(1)).unwrap();
        assert!(matches!(second, Event::Function { function: Function::On, .. }));
        iface.join();
    }
}
