//! Sunrise/sunset and fixed-time scheduler: turns `[schedule]` entries
//! into commands submitted at the right moment, computing solar times
//! fresh every day rather than baking in a fixed sunrise/sunset pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Timelike};
use log::{debug, warn};

use crate::config::{Location, ScheduleEntry, Trigger};

/// How often the scheduler wakes up to check whether anything is due;
/// coarse enough to be cheap, fine enough that a minute-granularity
/// schedule entry fires within the minute.
const POLL_INTERVAL: Duration = Duration::from_secs(20);

fn sunrise_sunset_local(location: &Location, date: DateTime<Local>) -> (DateTime<Local>, DateTime<Local>) {
    let (sunrise_ms, sunset_ms) = sun::sunrise_sunset(
        location.latitude,
        location.longitude,
        date.year(),
        date.month(),
        date.day(),
    );
    (
        Local.timestamp_millis_opt(sunrise_ms).unwrap(),
        Local.timestamp_millis_opt(sunset_ms).unwrap(),
    )
}

fn occurrence_today(
    entry: &ScheduleEntry,
    location: Option<&Location>,
    today: DateTime<Local>,
) -> Option<DateTime<Local>> {
    match entry.trigger {
        Trigger::Fixed(time) => today.with_time(time).single(),
        Trigger::Sunrise(offset) => {
            let location = location?;
            let (sunrise, _) = sunrise_sunset_local(location, today);
            Some(sunrise + chrono::Duration::minutes(offset))
        }
        Trigger::Sunset(offset) => {
            let location = location?;
            let (_, sunset) = sunrise_sunset_local(location, today);
            Some(sunset + chrono::Duration::minutes(offset))
        }
    }
}

trait WithTime {
    fn with_time(&self, time: NaiveTime) -> chrono::LocalResult<DateTime<Local>>;
}

impl WithTime for DateTime<Local> {
    fn with_time(&self, time: NaiveTime) -> chrono::LocalResult<DateTime<Local>> {
        Local.from_local_datetime(&self.date_naive().and_time(time))
    }
}

pub struct EventScheduler {
    entries: Vec<ScheduleEntry>,
    location: Option<Location>,
}

impl EventScheduler {
    pub fn new(entries: Vec<ScheduleEntry>, location: Option<Location>) -> Self {
        EventScheduler { entries, location }
    }

    /// Run until `shutdown` is set, invoking `on_due(command)` for every
    /// schedule entry as it comes due. Each entry fires at most once per
    /// day; a minute already passed when the daemon starts is skipped
    /// until its next occurrence rather than firing immediately.
    pub fn run(&self, shutdown: Arc<AtomicBool>, on_due: impl Fn(&str)) {
        let mut fired_today: Vec<bool> = vec![false; self.entries.len()];
        let mut current_day = Local::now().date_naive();

        while !shutdown.load(Ordering::SeqCst) {
            let now = Local::now();
            if now.date_naive() != current_day {
                current_day = now.date_naive();
                fired_today.iter_mut().for_each(|f| *f = false);
            }

            for (i, entry) in self.entries.iter().enumerate() {
                if fired_today[i] {
                    continue;
                }
                match occurrence_today(entry, self.location.as_ref(), now) {
                    Some(when) if when <= now => {
                        debug!("schedule entry '{}' due at {}", entry.command, when);
                        on_due(&entry.command);
                        fired_today[i] = true;
                    }
                    Some(_) => {}
                    None => {
                        warn!(
                            "schedule entry '{}' needs a [location] section but none is configured",
                            entry.command
                        );
                        fired_today[i] = true;
                    }
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_trigger_resolves_to_todays_date_at_that_time() {
        let entry = ScheduleEntry {
            trigger: Trigger::Fixed(NaiveTime::from_hms_opt(7, 30, 0).unwrap()),
            command: "A1 ON".into(),
        };
        let now = Local::now();
        let when = occurrence_today(&entry, None, now).unwrap();
        assert_eq!(when.hour(), 7);
        assert_eq!(when.minute(), 30);
        assert_eq!(when.date_naive(), now.date_naive());
    }

    #[test]
    fn solar_trigger_without_location_resolves_to_none() {
        let entry = ScheduleEntry {
            trigger: Trigger::Sunset(-30),
            command: "A1 ON".into(),
        };
        assert!(occurrence_today(&entry, None, Local::now()).is_none());
    }
}
