//! The metadata reply model: a public, connection-agnostic `Field`/`Reply`
//! pair plus pure parsers for the three blob shapes a dbserver render-menu
//! response carries (spec.md §1/§4.11).
//!
//! Grounded on `metadata::encoding::{Field, Message}` in the teacher crate:
//! same five-tag wire encoding (`U8`/`U16`/`U32`/`Blob`/`String`), widened
//! from `pub(super)` to `pub` and from "the teacher's own dbserver client"
//! to "any caller's dbserver client" (spec.md §1 commits to exposing the
//! shape without this crate dialing out over TCP or touching NFS itself).
//! The `Message`/menu-item-type machinery that only serves the out-of-scope
//! query client stays behind in the teacher's untouched reference copy.

mod beatgrid;
mod cuelist;
mod waveform;

pub use beatgrid::BeatGrid;
pub use cuelist::{CueEntry, CueList};
pub use waveform::WaveformPreview;

use std::convert::TryInto;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use nom::{
    branch::alt,
    bytes::streaming::{tag, take},
    number::streaming::{be_u16, be_u32, be_u8},
    IResult,
};

use crate::error::{PdjError, Result};

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum FieldType {
    U8 = 0x0f,
    U16 = 0x10,
    U32 = 0x11,
    Blob = 0x14,
    String = 0x26,
}

/// One typed, tagged argument of a dbserver reply (spec.md §4.11).
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    U8(u8),
    U16(u16),
    U32(u32),
    Blob(Vec<u8>),
    String(String),
}

impl Field {
    pub fn encode(&self, mut w: impl Write) -> Result<()> {
        match self {
            Self::U8(val) => {
                w.write_u8(FieldType::U8 as u8)?;
                w.write_u8(*val)?;
            }
            Self::U16(val) => {
                w.write_u8(FieldType::U16 as u8)?;
                w.write_u16::<BigEndian>(*val)?;
            }
            Self::U32(val) => {
                w.write_u8(FieldType::U32 as u8)?;
                w.write_u32::<BigEndian>(*val)?;
            }
            Self::Blob(val) => {
                w.write_u8(FieldType::Blob as u8)?;
                w.write_u32::<BigEndian>(val.len() as u32)?;
                w.write_all(val)?;
            }
            Self::String(val) => {
                let utf: Vec<u16> = val.encode_utf16().collect();
                w.write_u8(FieldType::String as u8)?;
                w.write_u32::<BigEndian>(utf.len() as u32)?;
                for point in utf {
                    w.write_u16::<BigEndian>(point)?;
                }
            }
        }
        Ok(())
    }

    pub fn parse(i: &[u8]) -> IResult<&[u8], Field> {
        alt((
            Self::parse_u8,
            Self::parse_u16,
            Self::parse_u32,
            Self::parse_blob,
            Self::parse_string,
        ))(i)
    }

    fn parse_u8(i: &[u8]) -> IResult<&[u8], Field> {
        let (i, _) = tag(&[FieldType::U8 as u8])(i)?;
        let (i, val) = be_u8(i)?;
        Ok((i, Field::U8(val)))
    }

    fn parse_u16(i: &[u8]) -> IResult<&[u8], Field> {
        let (i, _) = tag(&[FieldType::U16 as u8])(i)?;
        let (i, val) = be_u16(i)?;
        Ok((i, Field::U16(val)))
    }

    fn parse_u32(i: &[u8]) -> IResult<&[u8], Field> {
        let (i, _) = tag(&[FieldType::U32 as u8])(i)?;
        let (i, val) = be_u32(i)?;
        Ok((i, Field::U32(val)))
    }

    fn parse_blob(i: &[u8]) -> IResult<&[u8], Field> {
        let (i, _) = tag(&[FieldType::Blob as u8])(i)?;
        let (i, len) = be_u32(i)?;
        let (i, data) = take(len as usize)(i)?;
        Ok((i, Field::Blob(data.to_vec())))
    }

    fn parse_string(i: &[u8]) -> IResult<&[u8], Field> {
        let (i, _) = tag(&[FieldType::String as u8])(i)?;
        let (i, num_points) = be_u32(i)?;
        let mut data = Vec::with_capacity(num_points as usize);
        let data_i = i;
        let mut i = i;
        for _ in 0..num_points {
            let (i1, val) = be_u16(i)?;
            data.push(val);
            i = i1;
        }

        match String::from_utf16(&data) {
            Ok(s) => Ok((i, Field::String(s.trim_end_matches('\0').into()))),
            Err(_) => Err(nom::Err::Error(nom::error::Error::new(
                data_i,
                nom::error::ErrorKind::Tag,
            ))),
        }
    }
}

/// An ordered sequence of typed fields: the shape of one dbserver reply
/// (spec.md §1/§4.11), decoded by a caller's own TCP client and handed here
/// for interpretation. This crate never dials out to build one itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    fields: Vec<Field>,
}

impl Reply {
    pub fn new() -> Reply {
        Reply { fields: Vec::new() }
    }

    pub fn with_field(mut self, field: Field) -> Reply {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Parse every field in `data` in sequence, stopping at the first byte
    /// that doesn't start a recognized field.
    pub fn parse(data: &[u8]) -> Reply {
        let mut fields = Vec::new();
        let mut i = data;
        while let Ok((rest, field)) = Field::parse(i) {
            fields.push(field);
            i = rest;
        }
        Reply { fields }
    }

    pub fn arg_u32(&self, idx: usize) -> Result<u32> {
        match self.fields.get(idx) {
            Some(Field::U32(val)) => Ok(*val),
            Some(_) => Err(PdjError::UnexpectedMediaType(idx as u8)),
            None => Err(PdjError::UnexpectedSlot(idx as u8)),
        }
    }

    pub fn arg_string(&self, idx: usize) -> Result<&str> {
        match self.fields.get(idx) {
            Some(Field::String(val)) => Ok(val),
            Some(_) => Err(PdjError::UnexpectedMediaType(idx as u8)),
            None => Err(PdjError::UnexpectedSlot(idx as u8)),
        }
    }

    pub fn arg_blob(&self, idx: usize) -> Result<&[u8]> {
        match self.fields.get(idx) {
            Some(Field::Blob(val)) => Ok(val),
            Some(_) => Err(PdjError::UnexpectedMediaType(idx as u8)),
            None => Err(PdjError::UnexpectedSlot(idx as u8)),
        }
    }
}

fn le_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_round_trips_mixed_fields() {
        let reply = Reply::new()
            .with_field(Field::U32(42))
            .with_field(Field::String("Track Title".to_string()))
            .with_field(Field::Blob(vec![1, 2, 3]));

        let mut bytes = Vec::new();
        for field in reply.fields() {
            field.encode(&mut bytes).unwrap();
        }

        let parsed = Reply::parse(&bytes);
        assert_eq!(parsed.arg_u32(0).unwrap(), 42);
        assert_eq!(parsed.arg_string(1).unwrap(), "Track Title");
        assert_eq!(parsed.arg_blob(2).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn missing_or_mistyped_arg_is_an_error() {
        let reply = Reply::new().with_field(Field::U32(1));
        let mut bytes = Vec::new();
        reply.fields()[0].encode(&mut bytes).unwrap();
        let parsed = Reply::parse(&bytes);

        assert!(matches!(parsed.arg_string(0), Err(PdjError::UnexpectedMediaType(_))));
        assert!(matches!(parsed.arg_u32(1), Err(PdjError::UnexpectedSlot(_))));
    }
}
