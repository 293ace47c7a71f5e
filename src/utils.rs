//! Object naming, chunk hashes and formatting helpers

/// Object holding the persisted volume descriptor
pub const DESCRIPTOR_OBJECT: &str = "VolumeDataLayout.json";

/// Object holding the written-chunk summary of every layer
pub const LAYER_STATUS_OBJECT: &str = "LayerStatus.json";

/// CRC32 (IEEE, reflected) of `data`
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(u32::MAX, |crc, &byte| {
        (0..8).fold(crc ^ byte as u32, |crc, _| {
            let mask = (crc & 1).wrapping_neg();
            (crc >> 1) ^ (0xEDB8_8320 & mask)
        })
    })
}

/// Hash recorded for a written chunk. Never zero, zero marks an unwritten chunk.
pub fn chunk_hash(serialized: &[u8]) -> u64 {
    ((serialized.len() as u64) << 32) | crc32(serialized) as u64 | (1 << 63)
}

/// Byte count with a binary unit, for log lines
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Object path of a chunk
pub fn chunk_url(layer_name: &str, chunk: i64) -> String {
    format!("{}/{}", layer_name, chunk)
}

/// Object path of a chunk metadata page
pub fn chunk_metadata_url(layer_name: &str, page: i64) -> String {
    format!("{}/ChunkMetadata/{}", layer_name, page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_chunk_hash_is_never_zero() {
        assert_ne!(chunk_hash(&[]), 0);
        assert_ne!(chunk_hash(b"chunk"), chunk_hash(b"chunk!"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 << 30), "3.00 GB");
    }

    #[test]
    fn test_object_paths() {
        assert_eq!(chunk_url("Dimensions_012LOD0", 42), "Dimensions_012LOD0/42");
        assert_eq!(
            chunk_metadata_url("Dimensions_012LOD0", 3),
            "Dimensions_012LOD0/ChunkMetadata/3"
        );
    }
}
