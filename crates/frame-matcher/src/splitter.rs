//! Splits a decoder's raw output stream into complete image records.
//!
//! ffmpeg writes images back to back on stdout with no framing, so record
//! boundaries come from the container itself: JPEG start/end-of-image markers
//! or the PNG signature and IEND chunk. Only the unconsumed tail is kept
//! between reads, so memory stays bounded by one partial record.

use serde::{Deserialize, Serialize};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
/// IEND chunk type followed by its fixed CRC
const PNG_IEND: [u8; 8] = [b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82];

/// Image container the decoder is asked to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    /// ffmpeg encoder name for image2pipe output
    pub fn codec(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "mjpeg",
            ImageFormat::Png => "png",
        }
    }

    fn start_marker(&self) -> &'static [u8] {
        match self {
            ImageFormat::Jpeg => &JPEG_SOI,
            ImageFormat::Png => &PNG_SIGNATURE,
        }
    }

    fn end_marker(&self) -> &'static [u8] {
        match self {
            ImageFormat::Jpeg => &JPEG_EOI,
            ImageFormat::Png => &PNG_IEND,
        }
    }
}

/// Incremental record splitter
#[derive(Debug)]
pub struct RecordSplitter {
    format: ImageFormat,
    buffer: Vec<u8>,
    /// Bytes already scanned for an end marker in the current record
    scanned: usize,
}

impl RecordSplitter {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Feed one chunk of output; returns every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut records = Vec::new();

        loop {
            let start = self.format.start_marker();
            let end = self.format.end_marker();

            // Drop anything before the next start marker
            match find(&self.buffer, start, 0) {
                Some(0) => {}
                Some(pos) => {
                    self.buffer.drain(..pos);
                    self.scanned = 0;
                }
                None => {
                    // Keep a possible marker prefix that straddles chunks
                    let keep = start.len() - 1;
                    if self.buffer.len() > keep {
                        let cut = self.buffer.len() - keep;
                        self.buffer.drain(..cut);
                    }
                    self.scanned = 0;
                    break;
                }
            }

            let search_from = self.scanned.max(start.len());
            match find(&self.buffer, end, search_from) {
                Some(pos) => {
                    let record_end = pos + end.len();
                    records.push(self.buffer.drain(..record_end).collect());
                    self.scanned = 0;
                }
                None => {
                    // Resume later just before a possible split end marker
                    self.scanned = self.buffer.len().saturating_sub(end.len() - 1);
                    break;
                }
            }
        }

        records
    }

    /// Bytes held for an incomplete record
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut record = JPEG_SOI.to_vec();
        record.extend_from_slice(payload);
        record.extend_from_slice(&JPEG_EOI);
        record
    }

    fn png(payload: &[u8]) -> Vec<u8> {
        let mut record = PNG_SIGNATURE.to_vec();
        record.extend_from_slice(payload);
        record.extend_from_slice(&[0, 0, 0, 0]);
        record.extend_from_slice(&PNG_IEND);
        record
    }

    #[test]
    fn test_splits_back_to_back_records() {
        let mut stream = jpeg(b"first");
        stream.extend(jpeg(b"second"));

        let mut splitter = RecordSplitter::new(ImageFormat::Jpeg);
        let records = splitter.push(&stream);
        assert_eq!(records, vec![jpeg(b"first"), jpeg(b"second")]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_records_crossing_chunk_boundaries() {
        let mut stream = jpeg(b"alpha-payload");
        stream.extend(jpeg(b"beta"));
        stream.extend(jpeg(b"gamma-longer-payload"));

        // Every possible chunk size, including ones that split markers
        for size in 1..stream.len() {
            let mut splitter = RecordSplitter::new(ImageFormat::Jpeg);
            let records: Vec<_> = stream
                .chunks(size)
                .flat_map(|c| splitter.push(c))
                .collect();
            assert_eq!(records.len(), 3, "chunk size {}", size);
            assert_eq!(records[1], jpeg(b"beta"));
            assert_eq!(splitter.pending(), 0);
        }
    }

    #[test]
    fn test_partial_record_is_held() {
        let record = jpeg(b"payload");
        let mut splitter = RecordSplitter::new(ImageFormat::Jpeg);

        assert!(splitter.push(&record[..5]).is_empty());
        assert_eq!(splitter.pending(), 5);
        assert_eq!(splitter.push(&record[5..]), vec![record]);
    }

    #[test]
    fn test_garbage_between_records_is_dropped() {
        let mut stream = b"noise".to_vec();
        stream.extend(jpeg(b"one"));
        stream.extend_from_slice(b"\x00\x01junk");
        stream.extend(jpeg(b"two"));

        let mut splitter = RecordSplitter::new(ImageFormat::Jpeg);
        assert_eq!(splitter.push(&stream), vec![jpeg(b"one"), jpeg(b"two")]);
    }

    #[test]
    fn test_png_records() {
        let mut stream = png(b"IHDR....IDAT....");
        stream.extend(png(b"IHDR2"));

        let mut splitter = RecordSplitter::new(ImageFormat::Png);
        let records: Vec<_> = stream.chunks(7).flat_map(|c| splitter.push(c)).collect();
        assert_eq!(records, vec![png(b"IHDR....IDAT...."), png(b"IHDR2")]);
    }
}
