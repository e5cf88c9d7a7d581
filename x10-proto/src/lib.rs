//! Host-side building blocks for the X10 powerline protocol: the event
//! model, the line-bit codec, echo prediction, the bit-stream matcher, the
//! dim accumulator, the frame processor, and the queue-based interface
//! facade that driver crates (`x10-cm11a`, `x10-tashtenhat`) build on.
//!
//! This crate has no opinion about *how* bits reach the powerline — no
//! serial port, no I2C bus. It only knows how to turn [`event::Event`]
//! values into half-cycle bit patterns and back, and how to coordinate the
//! concurrency that makes a transmit-and-confirm cycle safe to run
//! alongside a continuous line reader.

pub mod codec;
pub mod dimacc;
pub mod echo;
pub mod error;
pub mod event;
pub mod facade;
pub mod frame;
pub mod matcher;

pub use error::{Result, X10Error};
pub use event::{Event, Function};
pub use facade::{Controller, Interface, InterfaceHandles, PendingTracker};
