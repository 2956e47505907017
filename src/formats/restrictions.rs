//! `<prefix>.osrm.restrictions`: turn restrictions.
//!
//! Layout: build stamp, `u32 count`, then per record `{u32 from_node,
//! u32 via_node, u32 to_node, u8 flags (bit0 = only-turn), 3 pad bytes}`.
//! A stamp from a different build is warned about but not fatal; the
//! records are consumed anyway.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::warn;

use crate::error::{PrepareError, Result};
use crate::formats::stamp::BuildStamp;
use crate::graph::TurnRestriction;

const RECORD_LEN: usize = 16;

pub struct RestrictionsFile;

impl RestrictionsFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<TurnRestriction>> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PrepareError::input(path, format!("cannot open: {e}")))?;
        let mut reader = BufReader::new(file);

        let stamp = BuildStamp::read_from(&mut reader)
            .map_err(|_| PrepareError::input(path, "truncated build stamp"))?;
        if !BuildStamp::current().test_prepare(&stamp) {
            warn!(
                "{} was prepared with a different build; reprocess to get rid of this warning",
                path.display()
            );
        }

        let mut buf = [0u8; 4];
        reader
            .read_exact(&mut buf)
            .map_err(|_| PrepareError::input(path, "truncated restriction count"))?;
        let count = u32::from_le_bytes(buf);

        let mut restrictions = Vec::with_capacity(count as usize);
        for i in 0..count {
            let mut record = [0u8; RECORD_LEN];
            reader
                .read_exact(&mut record)
                .map_err(|_| PrepareError::input(path, format!("truncated restriction {i}")))?;
            restrictions.push(TurnRestriction {
                from_node: u32::from_le_bytes(record[0..4].try_into().unwrap()),
                via_node: u32::from_le_bytes(record[4..8].try_into().unwrap()),
                to_node: u32::from_le_bytes(record[8..12].try_into().unwrap()),
                only: record[12] & 0b1 != 0,
            });
        }
        Ok(restrictions)
    }

    pub fn write<P: AsRef<Path>>(path: P, restrictions: &[TurnRestriction]) -> Result<()> {
        Self::write_stamped(path, restrictions, &BuildStamp::current())
    }

    /// Writer taking an explicit stamp, so tests can fabricate skew.
    pub fn write_stamped<P: AsRef<Path>>(
        path: P,
        restrictions: &[TurnRestriction],
        stamp: &BuildStamp,
    ) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        stamp.write_to(&mut writer)?;
        writer.write_all(&(restrictions.len() as u32).to_le_bytes())?;
        for restriction in restrictions {
            let mut record = [0u8; RECORD_LEN];
            record[0..4].copy_from_slice(&restriction.from_node.to_le_bytes());
            record[4..8].copy_from_slice(&restriction.via_node.to_le_bytes());
            record[8..12].copy_from_slice(&restriction.to_node.to_le_bytes());
            record[12] = restriction.only as u8;
            writer.write_all(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn roundtrip() {
        let tmp = NamedTempFile::new().unwrap();
        let restrictions = vec![
            TurnRestriction { from_node: 0, via_node: 1, to_node: 2, only: false },
            TurnRestriction { from_node: 3, via_node: 1, to_node: 0, only: true },
        ];
        RestrictionsFile::write(tmp.path(), &restrictions).unwrap();
        assert_eq!(RestrictionsFile::read(tmp.path()).unwrap(), restrictions);
    }

    #[test]
    fn stale_stamp_is_tolerated() {
        let tmp = NamedTempFile::new().unwrap();
        let mut stamp = BuildStamp::current();
        stamp.version_major += 1;
        let restrictions = vec![TurnRestriction { from_node: 0, via_node: 1, to_node: 2, only: false }];
        RestrictionsFile::write_stamped(tmp.path(), &restrictions, &stamp).unwrap();
        // Warn-and-continue: the records still come back.
        assert_eq!(RestrictionsFile::read(tmp.path()).unwrap(), restrictions);
    }
}
