//! Configuration loading (component of the ambient stack): an INI file
//! supplies the durable configuration — interfaces, device aliases, the
//! schedule, the FIFO path — and command-line flags layer overrides on
//! top of it for the handful of things worth tweaking per invocation.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveTime;
use ini::Ini;

use x10_proto::event::house_letter_to_code;
use x10_proto::{Result, X10Error};

use crate::cli::Cli;

/// Which driver crate backs an `[interface]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverKind {
    Cm11a,
    TashTenHat,
}

#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub name: String,
    pub driver: DriverKind,
    pub device: String,
    pub baud_rate: u32,
    pub variant: Option<String>,
}

/// When a schedule entry fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    Fixed(NaiveTime),
    /// Minutes offset from sunrise (negative is before).
    Sunrise(i64),
    /// Minutes offset from sunset (negative is before).
    Sunset(i64),
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub trigger: Trigger,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

pub struct AppConfig {
    pub interfaces: Vec<InterfaceConfig>,
    pub aliases: HashMap<String, (char, u8)>,
    pub schedule: Vec<ScheduleEntry>,
    pub location: Option<Location>,
    pub fifo_path: Option<PathBuf>,
    pub log_level: String,
}

impl AppConfig {
    pub fn load(cli: &Cli) -> Result<AppConfig> {
        let ini = Ini::load_from_file(&cli.config)
            .map_err(|e| X10Error::Config(format!("failed to read {}: {e}", cli.config.display())))?;

        let mut interfaces = Vec::new();
        let mut aliases = HashMap::new();
        let mut schedule = Vec::new();
        let mut location = None;
        let mut fifo_path = ini
            .get_from(Some("daemon"), "fifo")
            .map(PathBuf::from);
        let mut log_level = ini
            .get_from(Some("daemon"), "log_level")
            .unwrap_or("info")
            .to_string();

        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };
            if let Some(name) = section.strip_prefix("interface.") {
                interfaces.push(parse_interface(name, props)?);
            } else if section == "aliases" {
                for (key, value) in props.iter() {
                    aliases.insert(key.to_string(), parse_alias(value)?);
                }
            } else if section == "schedule" {
                for (key, value) in props.iter() {
                    schedule.push(parse_schedule_entry(key, value)?);
                }
            } else if section == "location" {
                let latitude = parse_required_f64(props, "latitude")?;
                let longitude = parse_required_f64(props, "longitude")?;
                location = Some(Location { latitude, longitude });
            }
        }

        if let Some(path) = &cli.fifo {
            fifo_path = Some(path.clone());
        }
        if let Some(level) = &cli.log_level {
            log_level = level.clone();
        }

        if interfaces.is_empty() {
            return Err(X10Error::Config("no [interface.*] sections configured".into()));
        }

        Ok(AppConfig {
            interfaces,
            aliases,
            schedule,
            location,
            fifo_path,
            log_level,
        })
    }
}

fn parse_interface(name: &str, props: &ini::Properties) -> Result<InterfaceConfig> {
    let driver = match props.get("driver") {
        Some("cm11a") => DriverKind::Cm11a,
        Some("tashtenhat") => DriverKind::TashTenHat,
        Some(other) => {
            return Err(X10Error::Config(format!(
                "interface '{name}' has unknown driver '{other}'"
            )))
        }
        None => return Err(X10Error::Config(format!("interface '{name}' is missing a driver"))),
    };
    let device = props
        .get("device")
        .ok_or_else(|| X10Error::Config(format!("interface '{name}' is missing a device path")))?
        .to_string();
    let baud_rate = props
        .get("baud_rate")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| X10Error::Config(format!("interface '{name}' has a non-numeric baud_rate")))?
        .unwrap_or(4800);
    let variant = props.get("variant").map(str::to_string);
    Ok(InterfaceConfig {
        name: name.to_string(),
        driver,
        device,
        baud_rate,
        variant,
    })
}

fn parse_alias(value: &str) -> Result<(char, u8)> {
    let mut chars = value.chars();
    let house = chars
        .next()
        .ok_or_else(|| X10Error::Config(format!("alias target '{value}' is empty")))?;
    house_letter_to_code(house)?;
    let rest: String = chars.collect();
    let unit: u8 = rest
        .parse()
        .map_err(|_| X10Error::Config(format!("alias target '{value}' has no unit number")))?;
    Ok((house, unit))
}

fn parse_schedule_entry(key: &str, command: &str) -> Result<ScheduleEntry> {
    let trigger = if let Some(offset) = key.strip_prefix("sunrise") {
        Trigger::Sunrise(parse_offset(offset)?)
    } else if let Some(offset) = key.strip_prefix("sunset") {
        Trigger::Sunset(parse_offset(offset)?)
    } else {
        let time = NaiveTime::parse_from_str(key, "%H:%M")
            .map_err(|_| X10Error::Config(format!("invalid schedule time '{key}'")))?;
        Trigger::Fixed(time)
    };
    Ok(ScheduleEntry {
        trigger,
        command: command.to_string(),
    })
}

fn parse_offset(suffix: &str) -> Result<i64> {
    if suffix.is_empty() {
        return Ok(0);
    }
    suffix
        .parse()
        .map_err(|_| X10Error::Config(format!("invalid schedule offset '{suffix}'")))
}

fn parse_required_f64(props: &ini::Properties, key: &str) -> Result<f64> {
    props
        .get(key)
        .ok_or_else(|| X10Error::Config(format!("[location] is missing '{key}'")))?
        .parse()
        .map_err(|_| X10Error::Config(format!("[location] '{key}' is not a number")))
}
