// cqgbridge/src/historical_range.rs
//
// Turns a relative lookback ("last 2 months of hourly bars") into the absolute
// start time the backend expects.

use crate::base::BridgeError;
use chrono::Utc;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;

pub const MILLIS_IN_DAY: i64 = 86_400_000;
pub const MILLIS_IN_HOUR: i64 = 3_600_000;
pub const MILLIS_IN_MINUTE: i64 = 60_000;

// Calendar approximation used for lookbacks.
pub const DAYS_IN_MONTH: i64 = 31;
pub const DAYS_IN_YEAR: i64 = 365;
pub const HOURS_IN_DAY: i64 = 24;
pub const MINUTES_IN_HOUR: i64 = 60;

/// Bar granularity. Discriminants are the backend's bar-unit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum BarUnit {
  Daily = 6,
  Hourly = 7,
  Minutely = 8,
}

impl BarUnit {
  pub fn interval_ms(self) -> i64 {
    match self {
      BarUnit::Daily => MILLIS_IN_DAY,
      BarUnit::Hourly => MILLIS_IN_HOUR,
      BarUnit::Minutely => MILLIS_IN_MINUTE,
    }
  }

  /// Bars of this unit in one period.
  fn bars_per(self, period: Period) -> i64 {
    let days = match period {
      Period::Day => 1,
      Period::Month => DAYS_IN_MONTH,
      Period::Year => DAYS_IN_YEAR,
    };
    match self {
      BarUnit::Daily => days,
      BarUnit::Hourly => days * HOURS_IN_DAY,
      BarUnit::Minutely => days * HOURS_IN_DAY * MINUTES_IN_HOUR,
    }
  }

  pub fn from_wire(code: u32) -> Result<Self, BridgeError> {
    BarUnit::try_from(code)
      .map_err(|_| BridgeError::InvalidArgument(format!("Unknown bar unit code {}", code)))
  }

  pub fn wire_code(self) -> u32 {
    self.into()
  }
}

impl FromStr for BarUnit {
  type Err = BridgeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "daily" => Ok(BarUnit::Daily),
      "hourly" => Ok(BarUnit::Hourly),
      "minutely" => Ok(BarUnit::Minutely),
      _ => Err(BridgeError::InvalidArgument(format!("Unknown bar type '{}'", s))),
    }
  }
}

impl fmt::Display for BarUnit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BarUnit::Daily => "daily",
      BarUnit::Hourly => "hourly",
      BarUnit::Minutely => "minutely",
    };
    write!(f, "{}", s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
  Day,
  Month,
  Year,
}

impl FromStr for Period {
  type Err = BridgeError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "day" => Ok(Period::Day),
      "month" => Ok(Period::Month),
      "year" => Ok(Period::Year),
      _ => Err(BridgeError::InvalidArgument(format!("Unknown period '{}'", s))),
    }
  }
}

/// Absolute bar window handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarWindow {
  pub bar_unit: BarUnit,
  pub bar_count: i64,
  pub interval_ms: i64,
  /// Backend-relative: already shifted by the session base time.
  pub from_utc_ms: i64,
}

/// Computes the window for `count` periods of `unit` bars ending at `now_utc_ms`.
///
/// `base_time_offset_ms` is the epoch-millisecond value of the session base time;
/// the backend measures `from_utc_time` relative to it.
pub fn compute_bar_window(
  unit: BarUnit,
  period: &str,
  count: i64,
  now_utc_ms: i64,
  base_time_offset_ms: i64,
) -> Result<BarWindow, BridgeError> {
  if count <= 0 {
    return Err(BridgeError::InvalidArgument(format!("count must be positive, got {}", count)));
  }
  let period = period.parse::<Period>()?;
  let interval_ms = unit.interval_ms();
  let bar_count = count.checked_mul(unit.bars_per(period))
    .ok_or_else(|| BridgeError::InvalidArgument(format!("count {} too large", count)))?;
  let span_ms = bar_count.checked_mul(interval_ms)
    .ok_or_else(|| BridgeError::InvalidArgument(format!("count {} too large", count)))?;
  let from_utc_ms = now_utc_ms.checked_sub(base_time_offset_ms)
    .and_then(|relative| relative.checked_sub(span_ms))
    .ok_or_else(|| BridgeError::InvalidArgument(format!("count {} reaches before the representable range", count)))?;

  Ok(BarWindow {
    bar_unit: unit,
    bar_count,
    interval_ms,
    from_utc_ms,
  })
}

/// Same as [`compute_bar_window`], anchored at the current wall clock.
pub fn bar_window_from_now(
  unit: BarUnit,
  period: &str,
  count: i64,
  base_time_offset_ms: i64,
) -> Result<BarWindow, BridgeError> {
  compute_bar_window(unit, period, count, Utc::now().timestamp_millis(), base_time_offset_ms)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bar_counts_follow_multiplier_chain() {
    let cases = [
      (BarUnit::Daily, "day", 1),
      (BarUnit::Daily, "month", 31),
      (BarUnit::Daily, "year", 365),
      (BarUnit::Hourly, "day", 24),
      (BarUnit::Hourly, "month", 744),
      (BarUnit::Hourly, "year", 8_760),
      (BarUnit::Minutely, "day", 1_440),
      (BarUnit::Minutely, "month", 44_640),
      (BarUnit::Minutely, "year", 525_600),
    ];
    for (unit, period, per_count) in cases {
      let w = compute_bar_window(unit, period, 1, 0, 0).unwrap();
      assert_eq!(w.bar_count, per_count, "{} {}", unit, period);
      assert_eq!(w.interval_ms, unit.interval_ms());
    }
  }

  #[test]
  fn two_months_of_hourly_bars() {
    let now = 1_704_067_200_000 + 10 * MILLIS_IN_DAY;
    let base = 1_704_067_200_000;
    let w = compute_bar_window(BarUnit::Hourly, "month", 2, now, base).unwrap();
    assert_eq!(w.bar_count, 1488);
    assert_eq!(w.interval_ms, 3_600_000);
    assert_eq!(w.from_utc_ms, now - base - 1488 * 3_600_000);
    assert_eq!(w.bar_unit, BarUnit::Hourly);
  }

  #[test]
  fn rejects_non_positive_count() {
    assert!(matches!(compute_bar_window(BarUnit::Daily, "day", 0, 0, 0), Err(BridgeError::InvalidArgument(_))));
    assert!(matches!(compute_bar_window(BarUnit::Daily, "day", -3, 0, 0), Err(BridgeError::InvalidArgument(_))));
  }

  #[test]
  fn rejects_unknown_period_and_unit() {
    assert!(matches!(compute_bar_window(BarUnit::Daily, "week", 1, 0, 0), Err(BridgeError::InvalidArgument(_))));
    assert!(matches!("weekly".parse::<BarUnit>(), Err(BridgeError::InvalidArgument(_))));
    assert!(matches!(BarUnit::from_wire(5), Err(BridgeError::InvalidArgument(_))));
  }

  #[test]
  fn rejects_overflowing_count() {
    assert!(compute_bar_window(BarUnit::Minutely, "year", i64::MAX / 2, 0, 0).is_err());
  }

  #[test]
  fn rejects_window_starting_before_i64_range() {
    // The span fits; shifting by the base time does not.
    let err = compute_bar_window(BarUnit::Daily, "day", 1, 0, i64::MAX).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgument(_)));
  }

  #[test]
  fn wire_codes() {
    assert_eq!(BarUnit::Daily.wire_code(), 6);
    assert_eq!(BarUnit::from_wire(7).unwrap(), BarUnit::Hourly);
    assert_eq!(BarUnit::from_wire(8).unwrap(), BarUnit::Minutely);
  }
}
