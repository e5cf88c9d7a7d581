//! Parses the textual command language accepted from the FIFO and, at
//! startup, from schedule entries in the config file: `<house><unit>
//! <ACTION> [arg]`, e.g. `A1 ON`, `A DIM 40`, `P16 PRESET 75`.
//!
//! A command expands to one or two events — an `Address` (omitted when the
//! action applies to the whole house, like `ALL_OFF`) followed by the
//! `Function`/`RelativeDim`/`AbsoluteDim` it names.

use x10_proto::event::{house_letter_to_code, unit_number_to_code};
use x10_proto::{Event, Function, Result, X10Error};

/// One or more events produced by parsing a single command line.
pub fn parse_command(line: &str) -> Result<Vec<Event>> {
    let mut parts = line.split_whitespace();
    let target = parts
        .next()
        .ok_or_else(|| X10Error::ProtocolViolation("empty command".into()))?;
    let action = parts
        .next()
        .ok_or_else(|| X10Error::ProtocolViolation(format!("command '{line}' is missing an action")))?
        .to_ascii_uppercase();
    let arg = parts.next();

    let (house_letter, unit_number) = split_target(target)?;
    let house = house_letter_to_code(house_letter)?;

    let mut events = Vec::new();
    if let Some(unit_number) = unit_number {
        events.push(Event::Address {
            house,
            unit: unit_number_to_code(unit_number)?,
        });
    }

    events.push(match action.as_str() {
        "ON" => Event::Function { house, function: Function::On },
        "OFF" => Event::Function { house, function: Function::Off },
        "ALL_OFF" => Event::Function { house, function: Function::AllOff },
        "ALL_LIGHTS_ON" => Event::Function { house, function: Function::AllLightsOn },
        "ALL_LIGHTS_OFF" => Event::Function { house, function: Function::AllLightsOff },
        "HAIL_REQUEST" => Event::Function { house, function: Function::HailReq },
        "STATUS_REQUEST" => Event::Function { house, function: Function::StatusReq },
        "DIM" => Event::RelativeDim { house, dim: -parse_percent(arg, line)? },
        "BRIGHT" => Event::RelativeDim { house, dim: parse_percent(arg, line)? },
        "PRESET" => Event::AbsoluteDim { dim: parse_percent(arg, line)? },
        other => {
            return Err(X10Error::ProtocolViolation(format!(
                "unrecognized action '{other}' in command '{line}'"
            )))
        }
    });

    Ok(events)
}

fn split_target(target: &str) -> Result<(char, Option<u8>)> {
    let mut chars = target.chars();
    let house_letter = chars
        .next()
        .ok_or_else(|| X10Error::ProtocolViolation("command target is empty".into()))?;
    let rest: String = chars.collect();
    if rest.is_empty() {
        return Ok((house_letter, None));
    }
    let unit_number: u8 = rest
        .parse()
        .map_err(|_| X10Error::ProtocolViolation(format!("invalid unit number in '{target}'")))?;
    Ok((house_letter, Some(unit_number)))
}

fn parse_percent(arg: Option<&str>, line: &str) -> Result<f64> {
    let arg = arg.ok_or_else(|| X10Error::ProtocolViolation(format!("command '{line}' is missing its percentage argument")))?;
    let value: f64 = arg
        .parse()
        .map_err(|_| X10Error::ProtocolViolation(format!("'{arg}' is not a number in command '{line}'")))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(X10Error::ProtocolViolation(format!(
            "percentage {value} out of range 0..=100 in command '{line}'"
        )));
    }
    Ok(value / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressed_on_command_produces_address_then_function() {
        let events = parse_command("A1 ON").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Address { .. }));
        assert!(matches!(
            events[1],
            Event::Function {
                function: Function::On,
                ..
            }
        ));
    }

    #[test]
    fn house_wide_command_has_no_address_event() {
        let events = parse_command("A ALL_OFF").unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Event::Function {
                function: Function::AllOff,
                ..
            }
        ));
    }

    #[test]
    fn dim_command_is_negative_relative_dim() {
        let events = parse_command("C5 DIM 50").unwrap();
        match events[1] {
            Event::RelativeDim { dim, .. } => assert!((dim + 0.5).abs() < 1e-9),
            _ => panic!("expected RelativeDim"),
        }
    }

    #[test]
    fn preset_out_of_range_is_rejected() {
        assert!(parse_command("A1 PRESET 150").is_err());
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(parse_command("A1 FROBNICATE").is_err());
    }
}
