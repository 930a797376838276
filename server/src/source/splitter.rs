use bytes::BytesMut;

const SOI: &[u8] = &[0xFF, 0xD8];
const EOI: &[u8] = &[0xFF, 0xD9];

/// Parse state for a concatenated-JPEG byte stream (ffmpeg `image2pipe`).
enum ParseState {
    /// Looking for the start-of-image marker.
    SeekingStart,
    /// Inside an image, looking for the end-of-image marker.
    CollectingImage,
}

/// Carves complete JPEG images out of an arbitrarily chunked byte stream.
///
/// Entropy-coded JPEG data never contains a bare `FF D9` (0xFF is stuffed as
/// `FF 00`), so the first EOI after an SOI ends the image.
pub struct JpegSplitter {
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` from which to resume the EOI search.
    scan_from: usize,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingStart,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete image, if one has been buffered.
    pub fn next_image(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingStart => {
                    if let Some(pos) = find_subsequence(&self.buffer, SOI) {
                        let _ = self.buffer.split_to(pos);
                        self.scan_from = SOI.len();
                        self.state = ParseState::CollectingImage;
                    } else {
                        // Keep a trailing 0xFF in case the marker spans chunks
                        let keep = usize::from(self.buffer.last() == Some(&0xFF));
                        let drop_len = self.buffer.len() - keep;
                        let _ = self.buffer.split_to(drop_len);
                        return None;
                    }
                }
                ParseState::CollectingImage => {
                    if let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], EOI) {
                        let end = self.scan_from + pos + EOI.len();
                        let image = self.buffer.split_to(end).to_vec();
                        self.state = ParseState::SeekingStart;
                        self.scan_from = 0;
                        return Some(image);
                    }
                    self.scan_from = self.buffer.len().saturating_sub(1).max(SOI.len());
                    return None;
                }
            }
        }
    }

    /// Bytes held back waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
