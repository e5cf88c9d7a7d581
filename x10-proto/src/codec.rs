//! The line-bit codec (component C2): conversion between events and the
//! half-cycle bit pattern carried on the powerline.
//!
//! A half-cycle bit is one AC zero-crossing pulse; `true` is a mark, `false`
//! a space. A logical one is the half-cycle pair `10`, a logical zero is
//! `01`. The preamble `1110` is four raw half-cycle bits, not two logical
//! bits, and is matched directly.

use std::collections::VecDeque;

use crate::event::{Event, Function, RELATIVE_DIM_STEPS};

/// The four raw half-cycle bits that open every frame.
pub const PREAMBLE: [bool; 4] = [true, true, true, false];

/// The six zero half-cycles inserted between distinct events of a batch.
pub const INTERFRAME_GAP_LEN: usize = 6;

fn logical_bit(b: bool) -> [bool; 2] {
    if b {
        [true, false]
    } else {
        [false, true]
    }
}

fn push_logical_bit(out: &mut Vec<bool>, b: bool) {
    out.extend_from_slice(&logical_bit(b));
}

fn push_nibble(out: &mut Vec<bool>, nibble: u8) {
    for shift in (0..4).rev() {
        push_logical_bit(out, (nibble >> shift) & 1 != 0);
    }
}

/// Decode one logical bit from a half-cycle pair. `None` if the pair is
/// neither `10` nor `01` (a corrupted or nonsensical transmission).
pub fn decode_logical_bit(hi: bool, lo: bool) -> Option<bool> {
    match (hi, lo) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

pub fn pop_logical_bit(bits: &mut VecDeque<bool>) -> Option<bool> {
    let hi = bits.pop_front()?;
    let lo = bits.pop_front()?;
    decode_logical_bit(hi, lo)
}

pub fn pop_nibble(bits: &mut VecDeque<bool>) -> Option<u8> {
    let mut value = 0u8;
    for _ in 0..4 {
        let bit = pop_logical_bit(bits)?;
        value = (value << 1) | (bit as u8);
    }
    Some(value)
}

/// Build the single 22-half-cycle frame `1110 | house | key | d16` that
/// underlies every standard (non-extended) event.
fn standard_frame(house: u8, key: u8, d16: bool) -> Vec<bool> {
    let mut out = Vec::with_capacity(22);
    out.extend_from_slice(&PREAMBLE);
    push_nibble(&mut out, house);
    push_nibble(&mut out, key);
    push_logical_bit(&mut out, d16);
    out
}

/// The 22-bit frame an Address event transmits (D16=0, key=unit).
pub fn address_frame(house: u8, unit: u8) -> Vec<bool> {
    standard_frame(house, unit, false)
}

/// The 22-bit frame a Function event transmits (D16=1, key=function).
pub fn function_frame(house: u8, function: Function) -> Vec<bool> {
    standard_frame(house, function.code(), true)
}

/// The full 62-bit frame an ExtendedCode event transmits: the standard
/// 22-bit Ext-Code function frame followed by 40 more half-cycles of unit,
/// data, and command nibbles.
pub fn extended_code_frame(house: u8, unit: u8, data_byte: u8, cmd_byte: u8) -> Vec<bool> {
    let mut out = function_frame(house, Function::ExtCode);
    push_nibble(&mut out, unit);
    push_nibble(&mut out, data_byte >> 4);
    push_nibble(&mut out, data_byte & 0xF);
    push_nibble(&mut out, cmd_byte >> 4);
    push_nibble(&mut out, cmd_byte & 0xF);
    out
}

/// Returns the single-copy frame for `event`, together with the number of
/// times it is repeated back-to-back (the "doublet quantity" for most event
/// kinds, or the dim-repeat count for `RelativeDim`).
///
/// This is the transmit-side repeat count; `x10_proto::echo` derives the
/// device-specific *echo* repeat count from it.
pub fn frame_and_repeat_count(event: &Event) -> (Vec<bool>, u32) {
    match *event {
        Event::Address { house, unit } => (address_frame(house, unit), 2),
        Event::Function { house, function } => (function_frame(house, function), 2),
        Event::RelativeDim { house, dim } => {
            let function = if dim < 0.0 {
                Function::Dim
            } else {
                Function::Bright
            };
            let frame = function_frame(house, function);
            let qty = (RELATIVE_DIM_STEPS as f64 * dim.abs()).round() as u32;
            (frame, qty)
        }
        Event::AbsoluteDim { dim } => {
            let level = (dim * 31.0).round() as u8;
            let function = if level & 0x10 != 0 {
                Function::PresetDim1
            } else {
                Function::PresetDim0
            };
            (standard_frame(level & 0xF, function.code(), true), 2)
        }
        Event::ExtendedCode {
            house,
            unit,
            data_byte,
            cmd_byte,
        } => (extended_code_frame(house, unit, data_byte, cmd_byte), 2),
    }
}

/// The full repeated bit stream an event transmits (frame repeated its
/// doublet/dim-repeat count, contiguous with no internal gap).
pub fn encode_event(event: &Event) -> Vec<bool> {
    let (frame, qty) = frame_and_repeat_count(event);
    let mut out = Vec::with_capacity(frame.len() * qty as usize);
    for _ in 0..qty {
        out.extend_from_slice(&frame);
    }
    out
}

/// The bit stream a whole batch transmits: each event's repeated frame,
/// joined with six zero half-cycles between distinct events.
pub fn encode_batch(events: &[Event]) -> Vec<bool> {
    let mut out = Vec::new();
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            out.extend(std::iter::repeat(false).take(INTERFRAME_GAP_LEN));
        }
        out.extend(encode_event(event));
    }
    out
}

/// Pack a half-cycle bit string into bytes, left-justified and MSB-first; the
/// final byte is zero-padded if the bit count isn't a multiple of eight.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

/// Unpack `bit_len` half-cycle bits (MSB-first) from packed bytes.
pub fn unpack_bits(bytes: &[u8], bit_len: usize) -> Vec<bool> {
    (0..bit_len)
        .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{code_to_house_letter, house_letter_to_code, unit_number_to_code};

    #[test]
    fn pack_unpack_round_trip() {
        for len in 0..40 {
            let bits: Vec<bool> = (0..len).map(|i| i % 3 == 0).collect();
            let packed = pack_bits(&bits);
            let unpacked = unpack_bits(&packed, bits.len());
            assert_eq!(bits, unpacked);
        }
    }

    #[test]
    fn address_frame_matches_doublet_shape() {
        let house = house_letter_to_code('C').unwrap();
        let unit = unit_number_to_code(5).unwrap();
        let event = Event::Address { house, unit };
        let (frame, qty) = frame_and_repeat_count(&event);
        assert_eq!(qty, 2);
        assert_eq!(frame.len(), 22);
        assert_eq!(&frame[0..4], &PREAMBLE);
        // D16 = 0 (address)
        assert_eq!(decode_logical_bit(frame[20], frame[21]), Some(false));
        assert_eq!(code_to_house_letter(house), 'C');
    }

    #[test]
    fn absolute_dim_boundaries() {
        let (frame_zero, qty) = frame_and_repeat_count(&Event::AbsoluteDim { dim: 0.0 });
        assert_eq!(qty, 2);
        let mut deque: VecDeque<bool> = frame_zero.iter().skip(4).copied().collect();
        assert_eq!(pop_nibble(&mut deque), Some(0));
        assert_eq!(pop_nibble(&mut deque), Some(Function::PresetDim0.code()));

        let (frame_one, _) = frame_and_repeat_count(&Event::AbsoluteDim { dim: 1.0 });
        let mut deque: VecDeque<bool> = frame_one.iter().skip(4).copied().collect();
        assert_eq!(pop_nibble(&mut deque), Some(0xF));
        assert_eq!(pop_nibble(&mut deque), Some(Function::PresetDim1.code()));
    }

    #[test]
    fn relative_dim_full_scale_has_22_contiguous_frames_no_gap() {
        let (frame, qty) = frame_and_repeat_count(&Event::RelativeDim {
            house: 0,
            dim: 1.0,
        });
        assert_eq!(qty, 22);
        let stream = encode_event(&Event::RelativeDim {
            house: 0,
            dim: 1.0,
        });
        assert_eq!(stream.len(), frame.len() * 22);
    }

    #[test]
    fn relative_dim_zero_is_a_no_op_on_the_wire() {
        let (_, qty) = frame_and_repeat_count(&Event::RelativeDim { house: 0, dim: 0.0 });
        assert_eq!(qty, 0);
        assert!(encode_event(&Event::RelativeDim { house: 0, dim: 0.0 }).is_empty());
    }

    #[test]
    fn batch_join_uses_six_zero_gap() {
        let events = [
            Event::Address {
                house: 0,
                unit: 0,
            },
            Event::Function {
                house: 0,
                function: Function::On,
            },
        ];
        let batch = encode_batch(&events);
        let first_len = encode_event(&events[0]).len();
        assert_eq!(&batch[first_len..first_len + 6], &[false; 6]);
    }
}
