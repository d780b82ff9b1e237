// src/config.rs
use chrono::{NaiveDate, Weekday};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::allocation_service::RangeContiguity;
use crate::calendar::{HolidayCalendar, WeekendPolicy};
use crate::errors::ConfigError;
use crate::utilization::{DEFAULT_HOURS_PER_FTE_DAY, MAX_HOURS_PER_DAY};

const ENV_PREFIX: &str = "CAPACITY_";

/// Engine settings read from `CAPACITY_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CapacityConfig {
    #[serde(default = "default_hours_per_fte_day")]
    pub hours_per_fte_day: Decimal,
    /// Comma-separated weekday names, e.g. `Fri,Sat`.
    #[serde(default = "default_non_working_days")]
    pub non_working_days: String,
    /// Comma-separated ISO dates.
    #[serde(default)]
    pub holidays: String,
    #[serde(default = "default_expand_concurrency")]
    pub expand_concurrency: usize,
    /// `working` or `calendar`.
    #[serde(default = "default_range_contiguity")]
    pub range_contiguity: String,
    /// Tracing filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log")]
    pub log: String,
}

fn default_hours_per_fte_day() -> Decimal {
    DEFAULT_HOURS_PER_FTE_DAY
}

fn default_non_working_days() -> String {
    "Sat,Sun".to_string()
}

fn default_expand_concurrency() -> usize {
    1
}

fn default_range_contiguity() -> String {
    "working".to_string()
}

fn default_log() -> String {
    "info".to_string()
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            hours_per_fte_day: default_hours_per_fte_day(),
            non_working_days: default_non_working_days(),
            holidays: String::new(),
            expand_concurrency: default_expand_concurrency(),
            range_contiguity: default_range_contiguity(),
            log: default_log(),
        }
    }
}

impl CapacityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let config: CapacityConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: CapacityConfig = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hours_per_fte_day <= Decimal::ZERO || self.hours_per_fte_day > MAX_HOURS_PER_DAY {
            return Err(ConfigError::InvalidValue {
                key: "CAPACITY_HOURS_PER_FTE_DAY".into(),
                message: format!(
                    "must be above 0 and at most {}, got {}",
                    MAX_HOURS_PER_DAY, self.hours_per_fte_day
                ),
            });
        }
        if self.expand_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CAPACITY_EXPAND_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }
        self.working_day_policy()?;
        self.contiguity()?;
        Ok(())
    }

    pub fn working_day_policy(&self) -> Result<HolidayCalendar, ConfigError> {
        let weekly = WeekendPolicy::new(parse_weekdays(&self.non_working_days)?);
        Ok(HolidayCalendar::new(weekly).with_holidays(parse_holidays(&self.holidays)?))
    }

    pub fn contiguity(&self) -> Result<RangeContiguity, ConfigError> {
        match self.range_contiguity.trim().to_ascii_lowercase().as_str() {
            "working" | "working_days" => Ok(RangeContiguity::WorkingDays),
            "calendar" | "calendar_days" => Ok(RangeContiguity::CalendarDays),
            other => Err(ConfigError::InvalidValue {
                key: "CAPACITY_RANGE_CONTIGUITY".into(),
                message: format!("expected `working` or `calendar`, got `{}`", other),
            }),
        }
    }
}

/// Parses `Sat,Sun` style lists. Blank entries are ignored.
pub fn parse_weekdays(list: &str) -> Result<Vec<Weekday>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Weekday>()
                .map_err(|_| ConfigError::InvalidWeekday(name.to_string()))
        })
        .collect()
}

pub fn parse_holidays(list: &str) -> Result<Vec<NaiveDate>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|date| !date.is_empty())
        .map(|date| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| ConfigError::InvalidHoliday(date.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod config_tests {
    use super::*;
    use crate::calendar::WorkingDayPolicy;
    use rust_decimal_macros::dec;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = CapacityConfig::from_vars(Vec::new()).unwrap();
        assert_eq!(config, CapacityConfig::default());
        assert_eq!(config.hours_per_fte_day, dec!(8));
        assert_eq!(config.contiguity().unwrap(), RangeContiguity::WorkingDays);

        let policy = config.working_day_policy().unwrap();
        assert!(policy.is_working_day(d("2024-01-05")));
        assert!(!policy.is_working_day(d("2024-01-06")));
    }

    #[test]
    fn custom_weekend_and_holidays() {
        let config = CapacityConfig::from_vars(vars(&[
            ("CAPACITY_NON_WORKING_DAYS", "Fri, Sat"),
            ("CAPACITY_HOLIDAYS", "2024-01-01,2024-12-25"),
            ("CAPACITY_HOURS_PER_FTE_DAY", "7.5"),
            ("CAPACITY_EXPAND_CONCURRENCY", "4"),
            ("CAPACITY_RANGE_CONTIGUITY", "calendar"),
        ]))
        .unwrap();

        assert_eq!(config.hours_per_fte_day, dec!(7.5));
        assert_eq!(config.expand_concurrency, 4);
        assert_eq!(config.contiguity().unwrap(), RangeContiguity::CalendarDays);

        let policy = config.working_day_policy().unwrap();
        // 2024-01-05 is a Friday, 2024-01-07 a Sunday
        assert!(!policy.is_working_day(d("2024-01-05")));
        assert!(policy.is_working_day(d("2024-01-07")));
        assert!(!policy.is_working_day(d("2024-01-01")));
    }

    #[test]
    fn weekday_names_accept_full_and_short_forms() {
        let days = parse_weekdays("monday,Tue, ,SUN").unwrap();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Tue, Weekday::Sun]);
        assert!(parse_weekdays("").unwrap().is_empty());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            parse_weekdays("Sat,Caturday"),
            Err(ConfigError::InvalidWeekday(name)) if name == "Caturday"
        ));
        assert!(matches!(
            parse_holidays("2024-13-01"),
            Err(ConfigError::InvalidHoliday(_))
        ));
        assert!(matches!(
            CapacityConfig::from_vars(vars(&[("CAPACITY_EXPAND_CONCURRENCY", "0")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CapacityConfig::from_vars(vars(&[("CAPACITY_HOURS_PER_FTE_DAY", "0")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CapacityConfig::from_vars(vars(&[("CAPACITY_HOURS_PER_FTE_DAY", "25")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            CapacityConfig::from_vars(vars(&[("CAPACITY_RANGE_CONTIGUITY", "weekly")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
