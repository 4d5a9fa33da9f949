use crate::spec::ElementType;

/// Per-member options that shape how a value is written and read.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct SerializationOptions {
    /// The wire type to write instead of the type's natural representation.
    pub representation: Option<ElementType>,

    /// Accept numeric conversions that do not fit the target type. Integers wrap modulo the
    /// width of the target; doubles saturate.
    pub allow_overflow: bool,

    /// Accept numeric conversions that drop a fractional part or lose precision.
    pub allow_truncation: bool,

    /// Keep repeated element names when reading documents.
    pub allow_duplicate_names: bool,

    /// Options applied to the items of an array or the values of a map.
    pub item_options: Option<Box<SerializationOptions>>,
}

impl SerializationOptions {
    pub fn representation(mut self, representation: ElementType) -> Self {
        self.representation = Some(representation);
        self
    }

    pub fn allow_overflow(mut self, allow: bool) -> Self {
        self.allow_overflow = allow;
        self
    }

    pub fn allow_truncation(mut self, allow: bool) -> Self {
        self.allow_truncation = allow;
        self
    }

    pub fn allow_duplicate_names(mut self, allow: bool) -> Self {
        self.allow_duplicate_names = allow;
        self
    }

    pub fn item_options(mut self, options: SerializationOptions) -> Self {
        self.item_options = Some(Box::new(options));
        self
    }

    /// The options for items of a collection, falling back to the defaults.
    pub(crate) fn items(&self) -> SerializationOptions {
        match &self.item_options {
            Some(options) => (**options).clone(),
            None => SerializationOptions {
                allow_duplicate_names: self.allow_duplicate_names,
                ..Default::default()
            },
        }
    }
}

/// Checked numeric conversions honouring `allow_overflow` and `allow_truncation`.
pub(crate) mod convert {
    use super::SerializationOptions;
    use crate::error::{Error, Result};

    pub(crate) fn i64_to_i32(value: i64, options: &SerializationOptions) -> Result<i32> {
        if options.allow_overflow {
            return Ok(value as i32);
        }
        i32::try_from(value).map_err(|_| Error::overflow(value, "Int32"))
    }

    pub(crate) fn u32_to_i32(value: u32, options: &SerializationOptions) -> Result<i32> {
        if options.allow_overflow {
            return Ok(value as i32);
        }
        i32::try_from(value).map_err(|_| Error::overflow(value, "Int32"))
    }

    pub(crate) fn i64_to_u32(value: i64, options: &SerializationOptions) -> Result<u32> {
        if options.allow_overflow {
            return Ok(value as u32);
        }
        u32::try_from(value).map_err(|_| Error::overflow(value, "UInt32"))
    }

    pub(crate) fn u64_to_i64(value: u64, options: &SerializationOptions) -> Result<i64> {
        if options.allow_overflow {
            return Ok(value as i64);
        }
        i64::try_from(value).map_err(|_| Error::overflow(value, "Int64"))
    }

    pub(crate) fn i64_to_u64(value: i64, options: &SerializationOptions) -> Result<u64> {
        if options.allow_overflow {
            return Ok(value as u64);
        }
        u64::try_from(value).map_err(|_| Error::overflow(value, "UInt64"))
    }

    fn check_fraction(value: f64, options: &SerializationOptions) -> Result<()> {
        if value.fract() != 0.0 && !options.allow_truncation {
            return Err(Error::serialization(format!(
                "{value} cannot be converted to an integer without truncation"
            )));
        }
        Ok(())
    }

    pub(crate) fn f64_to_i64(value: f64, options: &SerializationOptions) -> Result<i64> {
        check_fraction(value, options)?;
        // 2^63 is exactly representable; every double below it fits
        let in_range = value >= -9_223_372_036_854_775_808.0 && value < 9_223_372_036_854_775_808.0;
        if !in_range && !options.allow_overflow {
            return Err(Error::overflow(value, "Int64"));
        }
        Ok(value as i64)
    }

    pub(crate) fn f64_to_i32(value: f64, options: &SerializationOptions) -> Result<i32> {
        check_fraction(value, options)?;
        let in_range = value >= i32::MIN as f64 && value <= i32::MAX as f64;
        if !in_range && !options.allow_overflow {
            return Err(Error::overflow(value, "Int32"));
        }
        Ok(value as i32)
    }

    pub(crate) fn i64_to_f64(value: i64, options: &SerializationOptions) -> Result<f64> {
        let converted = value as f64;
        if !options.allow_truncation && f64_to_i64(converted, &Default::default()).ok() != Some(value)
        {
            return Err(Error::serialization(format!(
                "{value} cannot be represented exactly as a Double"
            )));
        }
        Ok(converted)
    }
}
