//! Gzip detection and decoding for compressed response bodies and
//! `.xml.gz` sitemaps.

use std::io::Read;

use flate2::read::GzDecoder;

/// True iff the buffer starts with the gzip magic bytes `0x1f 0x8b`.
pub fn is_gzipped(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Decompress a gzip buffer into text. Returns an empty string on any
/// decode failure or non-UTF-8 content.
pub fn decompress_gzip(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = String::new();
    match decoder.read_to_string(&mut out) {
        Ok(_) => out,
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detects_magic_bytes() {
        assert!(is_gzipped(&gzip("hello")));
        assert!(!is_gzipped(b"hello"));
        assert!(!is_gzipped(b""));
        assert!(!is_gzipped(&[0x1f]));
    }

    #[test]
    fn round_trips() {
        assert_eq!(decompress_gzip(&gzip("sitemap body")), "sitemap body");
    }

    #[test]
    fn garbage_decodes_to_empty() {
        assert_eq!(decompress_gzip(b"definitely not gzip"), "");
        assert_eq!(decompress_gzip(b""), "");
    }
}
