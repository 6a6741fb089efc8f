//! Encoding for intermediate key/value records.
//!
//! Records are written one JSON object per line. JSON values are
//! self-delimiting, so any encoding error or short write leaves a
//! prefix of complete records rather than a torn one; the atomic
//! writer in [`crate::output`] makes sure readers never see even that.

use std::io::{Read, Write};

use anyhow::Result;

use crate::KeyValue;

/// Write `records` to `writer`, one JSON object per line.
pub fn write_records<W: Write>(writer: &mut W, records: &[KeyValue]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Read every record out of `reader`.
///
/// The empty stream decodes to no records; a map task that emitted
/// nothing for a bucket still writes a (valid, empty) file.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<KeyValue>> {
    let mut records = Vec::new();
    for record in serde_json::Deserializer::from_reader(reader).into_iter::<KeyValue>() {
        records.push(record?);
    }
    Ok(records)
}
