//! Field values carried by proposed and persisted records
use chrono::{DateTime, TimeZone, Utc};
use minicbor::{Decode, Encode};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::violation::Violation;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for TimeStamp<Utc> {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "timestamp is outside the nanosecond range",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A single type-coerced field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Decimal(Decimal),
    Integer(i64),
    Text(String),
    Bool(bool),
    Timestamp(TimeStamp<Utc>),
}

impl FieldValue {
    fn kind(&self) -> u8 {
        match self {
            FieldValue::Decimal(_) => 0,
            FieldValue::Integer(_) => 1,
            FieldValue::Text(_) => 2,
            FieldValue::Bool(_) => 3,
            FieldValue::Timestamp(_) => 4,
        }
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }
}
impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}
impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}
impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}
impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}
impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value.into())
    }
}
impl From<TimeStamp<Utc>> for FieldValue {
    fn from(value: TimeStamp<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

// encoded as a two element array: [kind, value]
impl<C> minicbor::Encode<C> for FieldValue {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(2)?.u8(self.kind())?;
        match self {
            FieldValue::Decimal(v) => e.bytes(&v.serialize())?.ok(),
            FieldValue::Integer(v) => e.i64(*v)?.ok(),
            FieldValue::Text(v) => e.str(v)?.ok(),
            FieldValue::Bool(v) => e.bool(*v)?.ok(),
            FieldValue::Timestamp(v) => v.encode(e, ctx),
        }
    }
}

impl<'b, C> minicbor::Decode<'b, C> for FieldValue {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        if d.array()? != Some(2) {
            return Err(minicbor::decode::Error::message(
                "field value must be a [kind, value] pair",
            ));
        }
        match d.u8()? {
            0 => {
                let raw: [u8; 16] = d.bytes()?.try_into().map_err(|_| {
                    minicbor::decode::Error::message("decimal must be 16 bytes")
                })?;
                Ok(FieldValue::Decimal(Decimal::deserialize(raw)))
            }
            1 => Ok(FieldValue::Integer(d.i64()?)),
            2 => Ok(FieldValue::Text(d.str()?.to_owned())),
            3 => Ok(FieldValue::Bool(d.bool()?)),
            4 => Ok(FieldValue::Timestamp(TimeStamp::decode(d, ctx)?)),
            other => Err(minicbor::decode::Error::message(format!(
                "unknown field value kind {other}"
            ))),
        }
    }
}

/// A present field holding a value of the wrong type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} must be {expected}")]
pub struct TypeMismatch {
    pub field: String,
    pub expected: &'static str,
}

impl From<TypeMismatch> for Violation {
    fn from(value: TypeMismatch) -> Self {
        Violation::new(value.field, format!("must be {}", value.expected))
    }
}

/// Named field values. A missing key means the field was not provided,
/// which is different from any value it could hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }
    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(name.to_owned(), value.into())
    }
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
    /// Overlays `other` on top of `self`, replacing values present in both.
    pub fn merge(&mut self, other: &Fields) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Integers are widened to decimals.
    pub fn decimal(&self, name: &str) -> Result<Option<Decimal>, TypeMismatch> {
        match self.0.get(name) {
            None => Ok(None),
            Some(FieldValue::Decimal(v)) => Ok(Some(*v)),
            Some(FieldValue::Integer(v)) => Ok(Some(Decimal::from(*v))),
            Some(_) => Err(self.mismatch(name, "a number")),
        }
    }
    pub fn timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>, TypeMismatch> {
        match self.0.get(name) {
            None => Ok(None),
            Some(FieldValue::Timestamp(v)) => Ok(Some(v.to_datetime_utc())),
            Some(_) => Err(self.mismatch(name, "a timestamp")),
        }
    }
    pub fn text(&self, name: &str) -> Result<Option<&str>, TypeMismatch> {
        match self.0.get(name) {
            None => Ok(None),
            Some(FieldValue::Text(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.mismatch(name, "text")),
        }
    }
    /// The record status, when one is set and is text.
    pub fn status(&self) -> Option<&str> {
        self.text("status").ok().flatten()
    }

    fn mismatch(&self, name: &str, expected: &'static str) -> TypeMismatch {
        TypeMismatch {
            field: name.to_owned(),
            expected,
        }
    }
}

impl<C> minicbor::Encode<C> for Fields {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.map(self.0.len() as u64)?;
        for (name, value) in &self.0 {
            e.str(name)?;
            value.encode(e, ctx)?;
        }
        Ok(())
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Fields {
    fn decode(d: &mut minicbor::Decoder<'b>, ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        let len = d
            .map()?
            .ok_or_else(|| minicbor::decode::Error::message("field map must have a definite length"))?;
        let mut fields = BTreeMap::new();
        for _ in 0..len {
            let name = d.str()?.to_owned();
            let value = FieldValue::decode(d, ctx)?;
            fields.insert(name, value);
        }
        Ok(Fields(fields))
    }
}
