//! Echo prediction (component C3): what a transceiver family is expected to
//! put back on the line after a transmit, derived from the transmitted
//! frame and repeat count.
//!
//! TW523/PSC05 and the XTB-523 in its default configuration both echo a
//! single copy of a standard (Address/Function/AbsoluteDim) frame, echo a
//! collapsed count of repeats for a `RelativeDim` pulse train, and echo
//! only the base 22-bit frame of an Extended Code command (never its
//! 40-bit tail) — TW523 twice, XTB-523-normal once. The XTB-523 in its
//! "all bits" mode instead reproduces the transmitted stream bit-for-bit,
//! repeats and all. `predicted_echo_frame_and_qty` is the single source of
//! truth other modules consult instead of re-deriving this table.

use crate::codec::frame_and_repeat_count;
use crate::event::Event;

/// The echo behavior of the transceiver wired to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// TW523, PSC05, and similar two-wire transceivers.
    Tw523Psc05,
    /// XTB-523 in its default (collapsing) configuration.
    Xtb523Normal,
    /// XTB-523 configured to echo every half-cycle bit it hears, uncollapsed.
    Xtb523AllBits,
}

/// A standard frame's length in half-cycles: 4-bit preamble, house nibble,
/// key nibble, D16 bit.
const BASE_FRAME_LEN: usize = 22;

/// Returns the frame and repeat count a transceiver of `family` is expected
/// to echo back after `event` was transmitted.
///
/// For `Xtb523AllBits`, the echo is bit-for-bit identical to the transmitted
/// stream (so the frame/qty pair here reproduces the transmit-side one
/// exactly); the caller is responsible for not collapsing repeats when
/// matching against it.
pub fn predicted_echo_frame_and_qty(event: &Event, family: Family) -> (Vec<bool>, u32) {
    let (frame, tx_qty) = frame_and_repeat_count(event);
    match family {
        Family::Xtb523AllBits => (frame, tx_qty),
        Family::Tw523Psc05 => match *event {
            Event::RelativeDim { .. } => (frame, (tx_qty + 2) / 3),
            Event::ExtendedCode { .. } => (base_frame(&frame), 2),
            _ => (frame, 1),
        },
        Family::Xtb523Normal => match *event {
            Event::RelativeDim { .. } => (frame, (tx_qty + 1) / 2),
            Event::ExtendedCode { .. } => (base_frame(&frame), 1),
            _ => (frame, 1),
        },
    }
}

/// An Extended Code frame echoes only its leading 22-bit standard frame;
/// the unit/data/cmd tail is never echoed back by either family.
fn base_frame(frame: &[bool]) -> Vec<bool> {
    frame[..BASE_FRAME_LEN].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Function;

    #[test]
    fn standard_events_echo_a_single_copy() {
        let event = Event::Function {
            house: 0,
            function: Function::On,
        };
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Tw523Psc05).1, 1);
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Xtb523Normal).1, 1);

        let event = Event::Address { house: 0, unit: 0 };
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Tw523Psc05).1, 1);

        let event = Event::AbsoluteDim { dim: 0.5 };
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Xtb523Normal).1, 1);
    }

    #[test]
    fn relative_dim_echo_collapses_per_family_formula() {
        let event = Event::RelativeDim {
            house: 0,
            dim: 1.0,
        };
        // N = 22 transmitted repeats.
        let (_, qty) = predicted_echo_frame_and_qty(&event, Family::Tw523Psc05);
        assert_eq!(qty, 8); // floor((22+2)/3)
        let (_, qty) = predicted_echo_frame_and_qty(&event, Family::Xtb523Normal);
        assert_eq!(qty, 11); // floor((22+1)/2)
    }

    #[test]
    fn relative_dim_zero_repeats_echo_zero_copies() {
        let event = Event::RelativeDim { house: 0, dim: 0.0 };
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Tw523Psc05).1, 0);
        assert_eq!(predicted_echo_frame_and_qty(&event, Family::Xtb523Normal).1, 0);
    }

    #[test]
    fn extended_code_echo_is_truncated_to_the_base_frame() {
        let event = Event::ExtendedCode {
            house: 0,
            unit: 0,
            data_byte: 0xAB,
            cmd_byte: 0x12,
        };
        let (echo, qty) = predicted_echo_frame_and_qty(&event, Family::Tw523Psc05);
        assert_eq!(echo.len(), BASE_FRAME_LEN);
        assert_eq!(qty, 2);

        let (echo, qty) = predicted_echo_frame_and_qty(&event, Family::Xtb523Normal);
        assert_eq!(echo.len(), BASE_FRAME_LEN);
        assert_eq!(qty, 1);
    }

    #[test]
    fn all_bits_family_echoes_every_transmitted_repeat_uncollapsed() {
        let dim_event = Event::RelativeDim {
            house: 0,
            dim: 1.0,
        };
        let (_, qty) = predicted_echo_frame_and_qty(&dim_event, Family::Xtb523AllBits);
        assert_eq!(qty, 22);

        let ext_event = Event::ExtendedCode {
            house: 0,
            unit: 0,
            data_byte: 0,
            cmd_byte: 0,
        };
        let (echo, qty) = predicted_echo_frame_and_qty(&ext_event, Family::Xtb523AllBits);
        assert_eq!(qty, 2);
        assert!(echo.len() > BASE_FRAME_LEN, "all-bits mode must not truncate the frame");
    }
}
