//! The X10 event model (component C1): house/unit encoding, function codes,
//! and the five event variants.

use crate::error::{Result, X10Error};

/// Encoded house/unit values, in order A=0..P=15 (equivalently 1=0..16=15).
///
/// Every wire representation uses these encoded nibbles; house letters and
/// unit numbers exist only at API boundaries (`house_letter_to_code`,
/// `code_to_house_letter`, and the unit equivalents).
pub const X10_CODES: [u8; 16] = [
    0x6, 0xE, 0x2, 0xA, 0x1, 0x9, 0x5, 0xD, 0x7, 0xF, 0x3, 0xB, 0x0, 0x8, 0x4, 0xC,
];

/// Number of relative-dim steps separating 0% from 100% dim.
pub const RELATIVE_DIM_STEPS: u32 = 22;

pub fn house_letter_to_code(letter: char) -> Result<u8> {
    let letter = letter.to_ascii_uppercase();
    if !('A'..='P').contains(&letter) {
        return Err(X10Error::Config(format!("invalid house letter '{letter}'")));
    }
    Ok(X10_CODES[(letter as u8 - b'A') as usize])
}

pub fn code_to_house_letter(code: u8) -> char {
    let index = X10_CODES
        .iter()
        .position(|&c| c == code & 0xF)
        .expect("house code is always one of the 16 encoded nibbles");
    (b'A' + index as u8) as char
}

pub fn unit_number_to_code(number: u8) -> Result<u8> {
    if !(1..=16).contains(&number) {
        return Err(X10Error::Config(format!(
            "unit number must be between 1 and 16, inclusive, got {number}"
        )));
    }
    Ok(X10_CODES[(number - 1) as usize])
}

pub fn code_to_unit_number(code: u8) -> u8 {
    let index = X10_CODES
        .iter()
        .position(|&c| c == code & 0xF)
        .expect("unit code is always one of the 16 encoded nibbles");
    index as u8 + 1
}

/// One of the sixteen X10 function codes (4 bits on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Function {
    AllOff = 0x0,
    AllLightsOn = 0x1,
    On = 0x2,
    Off = 0x3,
    Dim = 0x4,
    Bright = 0x5,
    AllLightsOff = 0x6,
    ExtCode = 0x7,
    HailReq = 0x8,
    HailAck = 0x9,
    PresetDim0 = 0xA,
    PresetDim1 = 0xB,
    ExtData = 0xC,
    StatusOn = 0xD,
    StatusOff = 0xE,
    StatusReq = 0xF,
}

impl Function {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Every nibble value 0x0..=0xF maps to a function, so this never fails.
    pub fn from_code(code: u8) -> Function {
        match code & 0xF {
            0x0 => Function::AllOff,
            0x1 => Function::AllLightsOn,
            0x2 => Function::On,
            0x3 => Function::Off,
            0x4 => Function::Dim,
            0x5 => Function::Bright,
            0x6 => Function::AllLightsOff,
            0x7 => Function::ExtCode,
            0x8 => Function::HailReq,
            0x9 => Function::HailAck,
            0xA => Function::PresetDim0,
            0xB => Function::PresetDim1,
            0xC => Function::ExtData,
            0xD => Function::StatusOn,
            0xE => Function::StatusOff,
            _ => Function::StatusReq,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::AllOff => "All Off",
            Function::AllLightsOn => "All Lights On",
            Function::On => "On",
            Function::Off => "Off",
            Function::Dim => "Dim",
            Function::Bright => "Bright",
            Function::AllLightsOff => "All Lights Off",
            Function::ExtCode => "Extended Code",
            Function::HailReq => "Hail Request",
            Function::HailAck => "Hail Acknowledgement",
            Function::PresetDim0 => "Preset Dim 0",
            Function::PresetDim1 => "Preset Dim 1",
            Function::ExtData => "Extended Data",
            Function::StatusOn => "Status is On",
            Function::StatusOff => "Status is Off",
            Function::StatusReq => "Status Request",
        }
    }
}

/// An X10 event, as produced by a codec/frame processor or as submitted by a
/// caller for transmission. Events are plain values: created once, handed to
/// a queue, consumed by at most one reader, and discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Addresses a unit for the function(s) that follow.
    Address { house: u8, unit: u8 },
    /// Applies a function to the currently addressed unit(s) on a house.
    Function { house: u8, function: Function },
    /// Adjusts dim level by a relative amount; sign gives direction, -1..=1.
    RelativeDim { house: u8, dim: f64 },
    /// Sets an absolute preset dim level, 0..=1.
    AbsoluteDim { dim: f64 },
    /// An extended-code packet with 24 extra bits of payload.
    ExtendedCode {
        house: u8,
        unit: u8,
        data_byte: u8,
        cmd_byte: u8,
    },
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Event::Address { house, unit } => write!(
                f,
                "<Address: house {} (0x{:X}), unit {} (0x{:X})>",
                code_to_house_letter(house),
                house,
                code_to_unit_number(unit),
                unit
            ),
            Event::Function { house, function } => write!(
                f,
                "<Function: {} (0x{:X}) at house {} (0x{:X})>",
                function.name(),
                function.code(),
                code_to_house_letter(house),
                house
            ),
            Event::RelativeDim { house, dim } => write!(
                f,
                "<RelativeDim: {}% at house {} (0x{:X})>",
                (dim * 100.0) as i32,
                code_to_house_letter(house),
                house
            ),
            Event::AbsoluteDim { dim } => {
                write!(f, "<AbsoluteDim: {}%>", (dim * 100.0) as i32)
            }
            Event::ExtendedCode {
                house,
                unit,
                data_byte,
                cmd_byte,
            } => write!(
                f,
                "<ExtendedCode: house {} (0x{:X}), unit {} (0x{:X}), data 0x{:02X}, cmd 0x{:02X}>",
                code_to_house_letter(house),
                house,
                code_to_unit_number(unit),
                unit,
                data_byte,
                cmd_byte
            ),
        }
    }
}
