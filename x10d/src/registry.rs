//! Interface registry: turns an `[interface.*]` config section into a live
//! [`x10_proto::Interface`] by dispatching on its configured driver, the
//! one place in the daemon that needs to know both driver crates exist.

use std::collections::HashMap;

use x10_proto::{Interface, Result, X10Error};

use crate::config::{DriverKind, InterfaceConfig};

pub fn open_all(configs: &[InterfaceConfig]) -> Result<HashMap<String, Interface>> {
    let mut interfaces = HashMap::with_capacity(configs.len());
    for config in configs {
        log::info!("opening interface '{}' ({:?} on {})", config.name, config.driver, config.device);
        let interface = open_one(config)?;
        interfaces.insert(config.name.clone(), interface);
    }
    Ok(interfaces)
}

fn open_one(config: &InterfaceConfig) -> Result<Interface> {
    match config.driver {
        DriverKind::Cm11a => x10_cm11a::open(x10_cm11a::Cm11aConfig {
            port: config.device.clone(),
            baud_rate: config.baud_rate,
        }),
        DriverKind::TashTenHat => {
            let variant = parse_variant(config.variant.as_deref(), &config.name)?;
            x10_tashtenhat::open(x10_tashtenhat::TashTenHatConfig {
                i2c_device: config.device.clone(),
                variant,
            })
        }
    }
}

fn parse_variant(variant: Option<&str>, interface_name: &str) -> Result<x10_tashtenhat::Variant> {
    match variant {
        Some("pl513") => Ok(x10_tashtenhat::Variant::Pl513),
        Some("tw523") | Some("psc05") => Ok(x10_tashtenhat::Variant::Tw523Psc05),
        Some("xtb523") => Ok(x10_tashtenhat::Variant::Xtb523Normal),
        Some("xtb523_all_bits") => Ok(x10_tashtenhat::Variant::Xtb523AllBits),
        Some(other) => Err(X10Error::Config(format!(
            "interface '{interface_name}' has unknown tashtenhat variant '{other}'"
        ))),
        None => Err(X10Error::Config(format!(
            "interface '{interface_name}' uses the tashtenhat driver but specifies no variant"
        ))),
    }
}
