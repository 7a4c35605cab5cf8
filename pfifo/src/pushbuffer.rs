// SPDX-FileCopyrightText: 2025 pfifo contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pushbuffer capture files: a flat stream of little-endian 32-bit words.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::Path;

/// Load a pushbuffer capture from disk.
pub fn load(path: &Path) -> Result<Vec<u32>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read pushbuffer: {}", path.display()))?;
    parse_words(&data).with_context(|| format!("Invalid pushbuffer: {}", path.display()))
}

/// Split raw bytes into words.
pub fn parse_words(data: &[u8]) -> Result<Vec<u32>> {
    if data.is_empty() {
        bail!("pushbuffer is empty");
    }
    if data.len() % 4 != 0 {
        bail!("pushbuffer size {} is not a multiple of 4", data.len());
    }

    let mut cur = Cursor::new(data);
    let mut words = Vec::with_capacity(data.len() / 4);
    for _ in 0..data.len() / 4 {
        words.push(cur.read_u32::<LittleEndian>()?);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_words() {
        let words = parse_words(&[0x78, 0x56, 0x34, 0x12, 0x01, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(words, vec![0x1234_5678, 1]);
    }

    #[test]
    fn test_parse_rejects_partial_word() {
        assert!(parse_words(&[1, 2, 3]).is_err());
        assert!(parse_words(&[]).is_err());
    }
}
