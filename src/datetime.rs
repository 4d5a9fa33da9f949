//! Module containing functionality related to BSON DateTimes.
//! For more information, see the documentation for the [`DateTime`] type.

use std::{
    fmt::{self, Display},
    time::{Duration, SystemTime},
};

use time::format_description::well_known::Rfc3339;

use crate::error::{Error, Result};

/// Struct representing a BSON datetime.
/// Note: BSON datetimes have millisecond precision.
///
/// The wire value is a signed 64-bit count of milliseconds since the Unix epoch and is kept
/// exactly as read. Conversions to and from calendar types clamp to the range
/// [`DateTime::MIN_REPRESENTABLE`] ..= [`DateTime::MAX_REPRESENTABLE`], which covers years 1
/// through 9999.
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dt = mongo_core::DateTime::parse_rfc3339_str("1998-02-12T00:01:00.023Z")?;
/// assert_eq!(dt.timestamp_millis(), 887241660023);
/// # Ok(())
/// # }
/// ```
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Copy, Clone, Default)]
pub struct DateTime(i64);

impl crate::DateTime {
    /// The latest instant a calendar conversion can produce, 9999-12-31T23:59:59.999Z.
    pub const MAX_REPRESENTABLE: Self = Self::from_millis(253_402_300_799_999);

    /// The earliest instant a calendar conversion can produce, 0001-01-01T00:00:00Z.
    pub const MIN_REPRESENTABLE: Self = Self::from_millis(-62_135_596_800_000);

    /// The Unix epoch.
    pub const UNIX_EPOCH: Self = Self::from_millis(0);

    /// Makes a new [`DateTime`] from the number of non-leap milliseconds since
    /// January 1, 1970 0:00:00 UTC (aka "UNIX timestamp").
    pub const fn from_millis(date: i64) -> Self {
        Self(date)
    }

    /// Returns a [`DateTime`] which corresponds to the current date and time.
    pub fn now() -> DateTime {
        Self::from_system_time(SystemTime::now())
    }

    /// Whether this value lies inside the range calendar conversions can express.
    pub fn is_representable(self) -> bool {
        self >= Self::MIN_REPRESENTABLE && self <= Self::MAX_REPRESENTABLE
    }

    fn clamp_representable(millis: i128) -> Self {
        if millis > Self::MAX_REPRESENTABLE.0 as i128 {
            Self::MAX_REPRESENTABLE
        } else if millis < Self::MIN_REPRESENTABLE.0 as i128 {
            Self::MIN_REPRESENTABLE
        } else {
            Self(millis as i64)
        }
    }

    /// Convert the given [`time::OffsetDateTime`] into a [`DateTime`], truncating it to
    /// millisecond precision.
    ///
    /// Instants outside the representable range are clamped to
    /// [`DateTime::MIN_REPRESENTABLE`] or [`DateTime::MAX_REPRESENTABLE`].
    pub fn from_time(dt: time::OffsetDateTime) -> Self {
        Self::clamp_representable(dt.unix_timestamp_nanos() / 1_000_000)
    }

    /// Convert this [`DateTime`] to a [`time::OffsetDateTime`], clamping out-of-range values.
    pub fn to_time(self) -> time::OffsetDateTime {
        let clamped = Self::clamp_representable(self.0 as i128);
        time::OffsetDateTime::UNIX_EPOCH + time::Duration::milliseconds(clamped.0)
    }

    fn to_time_opt(self) -> Option<time::OffsetDateTime> {
        if !self.is_representable() {
            return None;
        }
        time::OffsetDateTime::UNIX_EPOCH.checked_add(time::Duration::milliseconds(self.0))
    }

    /// Convert the given [`std::time::SystemTime`] to a [`DateTime`].
    ///
    /// If the provided time is outside the representable range, either
    /// [`DateTime::MAX_REPRESENTABLE`] or [`DateTime::MIN_REPRESENTABLE`] will be returned,
    /// whichever is closer.
    pub fn from_system_time(st: SystemTime) -> Self {
        match st.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => Self::clamp_representable(d.as_millis().min(i128::MAX as u128) as i128),
            // handle SystemTime from before the Unix Epoch
            Err(e) => {
                let millis = e.duration().as_millis().min(i128::MAX as u128) as i128;
                Self::clamp_representable(-millis)
            }
        }
    }

    /// Convert this [`DateTime`] to a [`std::time::SystemTime`], clamping out-of-range values.
    pub fn to_system_time(self) -> SystemTime {
        let clamped = Self::clamp_representable(self.0 as i128);
        if clamped.0 >= 0 {
            SystemTime::UNIX_EPOCH + Duration::from_millis(clamped.0 as u64)
        } else {
            SystemTime::UNIX_EPOCH - Duration::from_millis(clamped.0.unsigned_abs())
        }
    }

    /// Returns the number of non-leap-milliseconds since January 1, 1970 UTC.
    pub const fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// Adds `millis` milliseconds to the [`DateTime`] saturating at the `i64` bounds.
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self::from_millis(self.0.saturating_add(millis))
    }

    /// Convert this [`DateTime`] to an RFC 3339 formatted string.
    pub fn try_to_rfc3339_string(self) -> Result<String> {
        self.to_time().format(&Rfc3339).map_err(Error::datetime)
    }

    /// Convert the given RFC 3339 formatted string to a [`DateTime`], truncating it to millisecond
    /// precision.
    pub fn parse_rfc3339_str(s: impl AsRef<str>) -> Result<Self> {
        let odt = time::OffsetDateTime::parse(s.as_ref(), &Rfc3339).map_err(Error::datetime)?;
        Ok(Self::from_time(odt))
    }

    /// Returns the time elapsed since `earlier`, or `None` if the given `DateTime` is later than
    /// this one.
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        if earlier.0 > self.0 {
            return None;
        }
        Some(Duration::from_millis(self.0.abs_diff(earlier.0)))
    }
}

impl fmt::Debug for crate::DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tup = f.debug_tuple("DateTime");
        match self.to_time_opt() {
            Some(dt) => tup.field(&dt),
            _ => tup.field(&self.0),
        };
        tup.finish()
    }
}

impl Display for crate::DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_time_opt() {
            Some(dt) => Display::fmt(&dt, f),
            _ => Display::fmt(&self.0, f),
        }
    }
}

impl From<SystemTime> for crate::DateTime {
    fn from(st: SystemTime) -> Self {
        Self::from_system_time(st)
    }
}

impl From<crate::DateTime> for SystemTime {
    fn from(dt: crate::DateTime) -> Self {
        dt.to_system_time()
    }
}

impl From<crate::DateTime> for time::OffsetDateTime {
    fn from(bson_dt: DateTime) -> Self {
        bson_dt.to_time()
    }
}

impl From<time::OffsetDateTime> for crate::DateTime {
    fn from(x: time::OffsetDateTime) -> Self {
        Self::from_time(x)
    }
}
