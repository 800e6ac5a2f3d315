//! Payload encoding and file naming for the cold store.
//!
//! Payloads are `bincode` compressed with gzip and written through a
//! temporary file plus rename so readers never observe a partial write.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::tiling::TileKey;

/// Extension of in-progress writes.
pub(super) const TEMP_EXTENSION: &str = "tmp";
pub(super) const GEOMETRY_EXTENSION: &str = "geo";
pub(super) const TILE_EXTENSION: &str = "tile";

/// Serialize and gzip a value.
pub(super) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let raw = bincode::serialize(value).map_err(|e| e.to_string())?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    encoder.write_all(&raw).map_err(|e| e.to_string())?;
    encoder.finish().map_err(|e| e.to_string())
}

/// Gunzip and deserialize a value.
pub(super) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    let mut raw = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| format!("decompression failed: {}", e))?;
    bincode::deserialize(&raw).map_err(|e| format!("decode failed: {}", e))
}

/// Write `bytes` to `path` atomically.
pub(super) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension(TEMP_EXTENSION);
    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    std::fs::rename(&temp_path, path)
}

/// File name for a geometry: the SHA-256 of its id.
///
/// Airspace ids come from the remote source and may contain characters that
/// are not valid in file names.
pub(super) fn geometry_file_name(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    format!("{:x}.{}", hasher.finalize(), GEOMETRY_EXTENSION)
}

pub(super) fn tile_file_name(key: &TileKey) -> String {
    format!(
        "{}_{}_{}.{}",
        key.step_micro, key.lat_index, key.lon_index, TILE_EXTENSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::TileMetadata;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn key() -> TileKey {
        TileKey {
            step_micro: 500_000,
            lat_index: 92,
            lon_index: -3,
        }
    }

    #[test]
    fn test_encode_decode() {
        let tile = TileMetadata::new(key(), BTreeSet::from(["LSZH".to_string()]), 42);
        let bytes = encode(&tile).unwrap();
        let decoded: TileMetadata = decode(&bytes).unwrap();
        assert_eq!(decoded, tile);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<TileMetadata>(b"not gzip at all").is_err());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.tile");
        write_atomic(&path, b"payload").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert!(!path.with_extension(TEMP_EXTENSION).exists());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(tile_file_name(&key()), "500000_92_-3.tile");
        let name = geometry_file_name("ED/R 123");
        assert!(name.ends_with(".geo"));
        assert_eq!(name.len(), 64 + 4);
        assert_eq!(name, geometry_file_name("ED/R 123"));
    }
}
