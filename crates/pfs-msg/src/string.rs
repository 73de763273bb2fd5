//! [`PfsString`] type: a length-prefixed UTF-8 string for wire messages.

use std::fmt;
use std::io::{Read, Seek, Write};
use std::ops::Deref;

use binrw::prelude::*;
use binrw::Endian;

/// A UTF-8 string encoded as a little-endian `u16` byte length followed by
/// the raw bytes. File names on the wire use this form everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PfsString(String);

impl PfsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl BinRead for PfsString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<Self> {
        let len = u16::read_options(reader, endian, ())?;
        let mut bytes = vec![0u8; len as usize];
        let pos = reader.stream_position()?;
        reader.read_exact(&mut bytes)?;
        let string = String::from_utf8(bytes).map_err(|_| binrw::Error::AssertFail {
            pos,
            message: "string is not valid UTF-8".into(),
        })?;
        Ok(PfsString(string))
    }
}

impl BinWrite for PfsString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        let pos = writer.stream_position()?;
        let len: u16 = self
            .0
            .len()
            .try_into()
            .map_err(|_| binrw::Error::AssertFail {
                pos,
                message: "string longer than u16::MAX bytes".into(),
            })?;
        len.write_options(writer, endian, ())?;
        writer.write_all(self.0.as_bytes())?;
        Ok(())
    }
}

impl Deref for PfsString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for PfsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PfsString {
    fn from(value: &str) -> Self {
        PfsString(value.to_string())
    }
}

impl From<String> for PfsString {
    fn from(value: String) -> Self {
        PfsString(value)
    }
}

impl From<PfsString> for String {
    fn from(value: PfsString) -> Self {
        value.0
    }
}

impl PartialEq<&str> for PfsString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
