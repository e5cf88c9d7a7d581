//! The frame processor (component C6): turns a stream of half-cycle bits
//! observed on the line into decoded events.
//!
//! Bits accumulate until a run of [`matcher::ZERO_RUN_CAP`] consecutive
//! zeros closes the current segment (the interframe gap). Each segment is
//! then decoded: find the preamble, pull the house/key/D16 fields, and for
//! an Extended Code function, the extra unit/data/cmd fields. A segment
//! may contain the same frame repeated back-to-back (a doublet, or — for a
//! held-down Dim/Bright pulse — more); the repeat count is returned
//! alongside the decoded event so a caller can route Dim/Bright pulses to
//! a [`crate::dimacc::DimAccumulator`] without the processor needing to
//! know about accumulation itself.
//!
//! A segment that doesn't start with a preamble, or that decodes to a
//! nibble pair that isn't a clean `10`/`01` half-cycle, is discarded with a
//! warning rather than treated as an event — a corrupted frame must not be
//! allowed to masquerade as a real command.

use log::warn;

use crate::codec::{decode_logical_bit, PREAMBLE};
use crate::event::{Event, Function};
use crate::matcher::ZERO_RUN_CAP;

/// Decodes one standard 22-half-cycle frame's house/key/D16 fields from the
/// logical bits immediately following the preamble. Returns `None` if any
/// half-cycle pair is not a clean logical bit — a corrupted frame, never a
/// panic.
fn decode_fields(bits: &[bool]) -> Option<(u8, u8, bool)> {
    if bits.len() < 18 {
        return None;
    }
    let mut cursor = bits.iter();
    let mut take_bit = || -> Option<bool> {
        let hi = *cursor.next()?;
        let lo = *cursor.next()?;
        decode_logical_bit(hi, lo)
    };
    let mut nibble = |c: &mut dyn FnMut() -> Option<bool>| -> Option<u8> {
        let mut value = 0u8;
        for _ in 0..4 {
            value = (value << 1) | (c()? as u8);
        }
        Some(value)
    };
    let house = nibble(&mut take_bit)?;
    let key = nibble(&mut take_bit)?;
    let d16 = take_bit()?;
    Some((house, key, d16))
}

fn find_preamble(bits: &[bool]) -> Option<usize> {
    bits.windows(PREAMBLE.len()).position(|w| w == PREAMBLE)
}

/// One decoded event together with how many times its frame repeated
/// contiguously within the segment (the doublet count, or — for a held
/// Dim/Bright pulse encoded in a single burst — the dim-step count).
pub type Decoded = (Event, u32);

/// Stateful accumulator that turns fed half-cycle bits into decoded events.
pub struct FrameProcessor {
    /// When true, every half-cycle bit the transceiver saw is echoed back
    /// uncollapsed, so repeated frames appear as distinct, separately
    /// preambled copies rather than one frame the caller is told to treat
    /// as repeated. Segment decoding counts preamble occurrences directly
    /// in this mode instead of dividing the segment into fixed-size chunks.
    all_bits_mode: bool,
    buffer: Vec<bool>,
    zero_run: usize,
}

impl FrameProcessor {
    pub fn new(all_bits_mode: bool) -> Self {
        FrameProcessor {
            all_bits_mode,
            buffer: Vec::new(),
            zero_run: 0,
        }
    }

    /// Feed one half-cycle bit. Returns a decoded event once a completed
    /// gap closes a segment; most calls return `None`.
    pub fn feed_bit(&mut self, bit: bool) -> Option<Decoded> {
        self.buffer.push(bit);
        if bit {
            self.zero_run = 0;
            None
        } else {
            self.zero_run += 1;
            if self.zero_run >= ZERO_RUN_CAP {
                let gap_start = self.buffer.len() - self.zero_run;
                let segment: Vec<bool> = self.buffer[..gap_start].to_vec();
                self.buffer.clear();
                self.zero_run = 0;
                if segment.is_empty() {
                    return None;
                }
                return self.decode_segment(&segment);
            }
            None
        }
    }

    pub fn feed_bits<I: IntoIterator<Item = bool>>(&mut self, bits: I) -> Vec<Decoded> {
        bits.into_iter().filter_map(|b| self.feed_bit(b)).collect()
    }

    fn decode_segment(&self, segment: &[bool]) -> Option<Decoded> {
        let start = find_preamble(segment)?;
        let fields_start = start + PREAMBLE.len();
        let (house, key, d16) = decode_fields(&segment[fields_start..])?;

        if d16 && Function::from_code(key) == Function::ExtCode {
            return self.decode_extended(segment, fields_start + 18, house);
        }

        let frame_len = fields_start + 18 - start;
        let repeats = if self.all_bits_mode {
            count_preambles(&segment[start..])
        } else {
            count_contiguous_repeats(segment, start, frame_len)
        };

        let event = if d16 {
            Event::Function {
                house,
                function: Function::from_code(key),
            }
        } else {
            Event::Address { house, unit: key }
        };
        Some((event, repeats))
    }

    fn decode_extended(&self, segment: &[bool], tail_start: usize, house: u8) -> Option<Decoded> {
        if segment.len() < tail_start + 40 {
            warn!("extended code frame truncated before its tail fields arrived");
            return None;
        }
        let tail = &segment[tail_start..tail_start + 40];
        let unit = decode_nibble_chunk(&tail[0..8])?;
        let data_hi = decode_nibble_chunk(&tail[8..16])?;
        let data_lo = decode_nibble_chunk(&tail[16..24])?;
        let cmd_hi = decode_nibble_chunk(&tail[24..32])?;
        let cmd_lo = decode_nibble_chunk(&tail[32..40])?;
        let event = Event::ExtendedCode {
            house,
            unit,
            data_byte: (data_hi << 4) | data_lo,
            cmd_byte: (cmd_hi << 4) | cmd_lo,
        };
        Some((event, 1))
    }
}

fn decode_nibble_chunk(bits: &[bool]) -> Option<u8> {
    let mut cursor = bits.iter();
    let mut value = 0u8;
    for _ in 0..4 {
        let hi = *cursor.next()?;
        let lo = *cursor.next()?;
        let bit = decode_logical_bit(hi, lo)?;
        value = (value << 1) | (bit as u8);
    }
    Some(value)
}

fn count_contiguous_repeats(segment: &[bool], start: usize, frame_len: usize) -> u32 {
    let frame = &segment[start..(start + frame_len).min(segment.len())];
    if frame.len() < frame_len {
        return 1;
    }
    let mut count = 1u32;
    let mut offset = start + frame_len;
    while offset + frame_len <= segment.len() && &segment[offset..offset + frame_len] == frame {
        count += 1;
        offset += frame_len;
    }
    count
}

/// Non-overlapping count of preamble occurrences in an all-bits-mode
/// segment; a trailing preamble with no frame behind it (the transceiver
/// cut off mid-copy at the gap boundary) doesn't count as a repeat.
fn count_preambles(segment: &[bool]) -> u32 {
    let mut count = 0u32;
    let mut offset = 0;
    while offset + PREAMBLE.len() <= segment.len() {
        if segment[offset..offset + PREAMBLE.len()] == PREAMBLE {
            count += 1;
            offset += PREAMBLE.len();
        } else {
            offset += 1;
        }
    }
    count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{address_frame, extended_code_frame, function_frame};

    fn feed_all(fp: &mut FrameProcessor, bits: &[bool]) -> Vec<Decoded> {
        let mut out = fp.feed_bits(bits.iter().copied());
        out.extend(fp.feed_bits(std::iter::repeat(false).take(ZERO_RUN_CAP)));
        out
    }

    #[test]
    fn decodes_a_single_address_doublet() {
        let mut fp = FrameProcessor::new(false);
        let frame = address_frame(0x6, 0xE);
        let mut stream = frame.clone();
        stream.extend(frame);
        let decoded = feed_all(&mut fp, &stream);
        assert_eq!(decoded.len(), 1);
        assert_eq!(
            decoded[0],
            (Event::Address { house: 0x6, unit: 0xE }, 2)
        );
    }

    #[test]
    fn decodes_function_frame() {
        let mut fp = FrameProcessor::new(false);
        let frame = function_frame(0x6, Function::On);
        let mut stream = frame.clone();
        stream.extend(frame);
        let decoded = feed_all(&mut fp, &stream);
        assert_eq!(
            decoded[0],
            (
                Event::Function {
                    house: 0x6,
                    function: Function::On
                },
                2
            )
        );
    }

    #[test]
    fn decodes_extended_code_frame() {
        let mut fp = FrameProcessor::new(false);
        let frame = extended_code_frame(0x6, 0xE, 0xAB, 0x12);
        let decoded = feed_all(&mut fp, &frame);
        assert_eq!(
            decoded[0],
            (
                Event::ExtendedCode {
                    house: 0x6,
                    unit: 0xE,
                    data_byte: 0xAB,
                    cmd_byte: 0x12,
                },
                1
            )
        );
    }

    #[test]
    fn garbled_segment_is_discarded_not_panicked() {
        let mut fp = FrameProcessor::new(false);
        let garbage = [true, true, false, false, true, false, true, true];
        let decoded = feed_all(&mut fp, &garbage);
        assert!(decoded.is_empty());
    }

    #[test]
    fn counts_repeated_dim_pulses_within_one_segment() {
        let mut fp = FrameProcessor::new(false);
        let frame = function_frame(0x6, Function::Bright);
        let mut stream = Vec::new();
        for _ in 0..5 {
            stream.extend(frame.clone());
        }
        let decoded = feed_all(&mut fp, &stream);
        assert_eq!(
            decoded[0],
            (
                Event::Function {
                    house: 0x6,
                    function: Function::Bright
                },
                5
            )
        );
    }

    #[test]
    fn all_bits_mode_counts_preambles_directly() {
        let mut fp = FrameProcessor::new(true);
        let frame = function_frame(0x6, Function::Dim);
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend(frame.clone());
        }
        let decoded = feed_all(&mut fp, &stream);
        assert_eq!(decoded[0].1, 3);
    }
}
