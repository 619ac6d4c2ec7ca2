//! Decoder for the compressed blocks holding battle background graphics,
//! arrangements and palettes.
//!
//! A block is a sequence of commands ended by a 0xFF byte. Each command starts
//! with a control byte `cccl_llll` (type `c`, length `l + 1`), or, when the type
//! bits are all set, a two-byte form `111c_ccll llll_llll` with a 10-bit length.
//! Types 4 and above are followed by a big-endian absolute offset into the
//! output produced so far.
//!
//! The same walk drives both decoding and the size-only dry run, so the two can
//! never disagree on how a stream is parsed.

use thiserror::Error;

use super::reverse_bits::reverse_bits;

pub const TERMINATOR: u8 = 0xFF;

const BLOCK_TYPE_RAW: u8 = 0;
const BLOCK_TYPE_BYTE_RLE: u8 = 1;
const BLOCK_TYPE_WORD_RLE: u8 = 2;
const BLOCK_TYPE_INCREMENTING: u8 = 3;
const BLOCK_TYPE_COPY: u8 = 4;
const BLOCK_TYPE_COPY_REVERSED_BITS: u8 = 5;
// Only known from observed data; reproduced as-is.
const BLOCK_TYPE_COPY_BACKWARD: u8 = 6;
const BLOCK_TYPE_EXTENDED: u8 = 7;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecompressErrorKind {
    /// A length byte or back-reference runs past the end of the input.
    #[error("malformed command")]
    MalformedStream,
    /// A command would write past the end of the output buffer.
    #[error("output overflow")]
    OutputOverflow,
    /// A word run would write past the end of the output buffer.
    #[error("word run overflows output")]
    RunOverflow,
    /// A back-reference (or the window copied through it) lies outside the output buffer.
    #[error("back-reference out of range")]
    BackReferenceOutOfRange,
    #[error("unsupported command type 7")]
    UnsupportedOpcode,
    /// The input ended before the terminator.
    #[error("unexpected end of data")]
    Truncated,
}

impl DecompressErrorKind {
    /// Stable negative code for this failure, as reported by [`compressed_size_code`].
    pub fn code(self) -> isize {
        match self {
            DecompressErrorKind::MalformedStream => -1,
            DecompressErrorKind::OutputOverflow => -2,
            DecompressErrorKind::RunOverflow => -3,
            DecompressErrorKind::BackReferenceOutOfRange => -4,
            DecompressErrorKind::UnsupportedOpcode => -5,
            DecompressErrorKind::Truncated => -6,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} after reading {consumed} bytes of compressed data")]
pub struct DecompressError {
    pub kind: DecompressErrorKind,
    /// Input bytes consumed up to and including the byte where the failure was detected.
    pub consumed: usize,
}

impl DecompressError {
    pub fn code(&self) -> isize {
        self.kind.code()
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockSize {
    /// Number of output bytes produced.
    pub decoded: usize,
    /// Number of input bytes read, including the terminator.
    pub consumed: usize,
}

/// Destination for the effects of each command. Positions are absolute
/// offsets into the output and are bounds-checked before any call.
trait Sink {
    fn capacity(&self) -> usize;
    fn raw(&mut self, pos: usize, bytes: &[u8]);
    fn fill(&mut self, pos: usize, value: u8, size: usize);
    fn fill_word(&mut self, pos: usize, word: [u8; 2], size: usize);
    fn incrementing(&mut self, pos: usize, first: u8, size: usize);
    fn copy(&mut self, pos: usize, src: usize, size: usize);
    fn copy_reversed_bits(&mut self, pos: usize, src: usize, size: usize);
    fn copy_backward(&mut self, pos: usize, src: usize, size: usize);
}

struct BufferSink<'a> {
    out: &'a mut [u8],
}

impl Sink for BufferSink<'_> {
    fn capacity(&self) -> usize {
        self.out.len()
    }

    fn raw(&mut self, pos: usize, bytes: &[u8]) {
        self.out[pos..(pos + bytes.len())].copy_from_slice(bytes);
    }

    fn fill(&mut self, pos: usize, value: u8, size: usize) {
        self.out[pos..(pos + size)].fill(value);
    }

    fn fill_word(&mut self, pos: usize, word: [u8; 2], size: usize) {
        for i in 0..size {
            self.out[pos + 2 * i] = word[0];
            self.out[pos + 2 * i + 1] = word[1];
        }
    }

    fn incrementing(&mut self, pos: usize, first: u8, size: usize) {
        let mut b = first;
        for i in 0..size {
            self.out[pos + i] = b;
            b = b.wrapping_add(1);
        }
    }

    // The copies below walk byte by byte: source and destination may overlap,
    // in which case bytes written earlier in the same command are read back.
    fn copy(&mut self, pos: usize, src: usize, size: usize) {
        for i in 0..size {
            self.out[pos + i] = self.out[src + i];
        }
    }

    fn copy_reversed_bits(&mut self, pos: usize, src: usize, size: usize) {
        for i in 0..size {
            self.out[pos + i] = reverse_bits(self.out[src + i]);
        }
    }

    fn copy_backward(&mut self, pos: usize, src: usize, size: usize) {
        for i in 0..size {
            self.out[pos + i] = self.out[src - i];
        }
    }
}

/// Tracks nothing but positions; the output has no upper bound.
struct DryRun;

impl Sink for DryRun {
    fn capacity(&self) -> usize {
        usize::MAX
    }
    fn raw(&mut self, _pos: usize, _bytes: &[u8]) {}
    fn fill(&mut self, _pos: usize, _value: u8, _size: usize) {}
    fn fill_word(&mut self, _pos: usize, _word: [u8; 2], _size: usize) {}
    fn incrementing(&mut self, _pos: usize, _first: u8, _size: usize) {}
    fn copy(&mut self, _pos: usize, _src: usize, _size: usize) {}
    fn copy_reversed_bits(&mut self, _pos: usize, _src: usize, _size: usize) {}
    fn copy_backward(&mut self, _pos: usize, _src: usize, _size: usize) {}
}

fn run<S: Sink>(data: &[u8], start: usize, sink: &mut S) -> Result<BlockSize, DecompressError> {
    use DecompressErrorKind::*;

    let capacity = sink.capacity();
    let fail = |kind: DecompressErrorKind, pos: usize| DecompressError {
        kind,
        consumed: pos - start + 1,
    };
    let mut pos = start;
    let mut out_pos: usize = 0;
    loop {
        let Some(&byte) = data.get(pos) else {
            return Err(fail(Truncated, pos));
        };
        if byte == TERMINATOR {
            return Ok(BlockSize {
                decoded: out_pos,
                consumed: pos - start + 1,
            });
        }

        let mut block_type = byte >> 5;
        let size: usize;
        if block_type != BLOCK_TYPE_EXTENDED {
            size = (byte & 0x1F) as usize + 1;
        } else {
            let Some(&low) = data.get(pos + 1) else {
                return Err(fail(MalformedStream, pos));
            };
            size = (((byte & 3) as usize) << 8 | low as usize) + 1;
            block_type = (byte >> 2) & 7;
            pos += 1;
        }
        let out_end = match out_pos.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => return Err(fail(OutputOverflow, pos)),
        };
        pos += 1;

        let mut src = 0;
        if block_type >= BLOCK_TYPE_COPY {
            let (Some(&hi), Some(&lo)) = (data.get(pos), data.get(pos + 1)) else {
                return Err(fail(MalformedStream, pos));
            };
            src = (hi as usize) << 8 | lo as usize;
            if src >= capacity {
                return Err(fail(BackReferenceOutOfRange, pos));
            }
            pos += 2;
        }

        match block_type {
            BLOCK_TYPE_RAW => {
                let Some(bytes) = data.get(pos..(pos + size)) else {
                    return Err(fail(Truncated, pos));
                };
                sink.raw(out_pos, bytes);
                out_pos = out_end;
                pos += size;
            }
            BLOCK_TYPE_BYTE_RLE => {
                let Some(&value) = data.get(pos) else {
                    return Err(fail(Truncated, pos));
                };
                sink.fill(out_pos, value, size);
                out_pos = out_end;
                pos += 1;
            }
            BLOCK_TYPE_WORD_RLE => {
                let word_end = out_pos.saturating_add(2 * size);
                if word_end > capacity {
                    return Err(fail(RunOverflow, pos));
                }
                let Some(word) = data.get(pos..(pos + 2)) else {
                    return Err(fail(Truncated, pos));
                };
                sink.fill_word(out_pos, [word[0], word[1]], size);
                out_pos = word_end;
                pos += 2;
            }
            BLOCK_TYPE_INCREMENTING => {
                let Some(&first) = data.get(pos) else {
                    return Err(fail(Truncated, pos));
                };
                sink.incrementing(out_pos, first, size);
                out_pos = out_end;
                pos += 1;
            }
            BLOCK_TYPE_COPY | BLOCK_TYPE_COPY_REVERSED_BITS => {
                if src + size > capacity {
                    return Err(fail(BackReferenceOutOfRange, pos));
                }
                if block_type == BLOCK_TYPE_COPY {
                    sink.copy(out_pos, src, size);
                } else {
                    sink.copy_reversed_bits(out_pos, src, size);
                }
                out_pos = out_end;
            }
            BLOCK_TYPE_COPY_BACKWARD => {
                if src + 1 < size {
                    return Err(fail(BackReferenceOutOfRange, pos));
                }
                sink.copy_backward(out_pos, src, size);
                out_pos = out_end;
            }
            _ => {
                return Err(fail(UnsupportedOpcode, pos));
            }
        }
    }
}

/// Decompresses the block starting at `start` into `output`, whose length is
/// the capacity. The buffer is never resized; only the first `decoded` bytes
/// of it are meaningful on success.
pub fn decompress(
    data: &[u8],
    start: usize,
    output: &mut [u8],
) -> Result<BlockSize, DecompressError> {
    run(data, start, &mut BufferSink { out: output })
}

/// Decompresses into a freshly zeroed buffer of `capacity` bytes and returns
/// the decoded bytes together with the number of input bytes consumed.
pub fn decompress_to_vec(
    data: &[u8],
    start: usize,
    capacity: usize,
) -> Result<(Vec<u8>, usize), DecompressError> {
    let mut out = vec![0; capacity];
    let size = decompress(data, start, &mut out)?;
    out.truncate(size.decoded);
    Ok((out, size.consumed))
}

/// Walks the block without producing output.
pub fn measure(data: &[u8], start: usize) -> Result<BlockSize, DecompressError> {
    run(data, start, &mut DryRun)
}

/// Size of the block once decompressed. Use [`measure`] for the number of
/// compressed bytes it occupies.
pub fn get_compressed_size(data: &[u8], start: usize) -> Result<usize, DecompressError> {
    measure(data, start).map(|size| size.decoded)
}

/// [`get_compressed_size`] folded into a single integer: the decoded size on
/// success, or the negative code of the failure.
pub fn compressed_size_code(data: &[u8], start: usize) -> isize {
    match get_compressed_size(data, start) {
        Ok(size) => size as isize,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn encode_header(size: usize, block_type: u8, out: &mut Vec<u8>) {
        assert!(size >= 1);
        assert!(size <= 1024);
        let size1 = size - 1;
        if size1 <= 31 && block_type != BLOCK_TYPE_EXTENDED {
            out.push(size1 as u8 | (block_type << 5));
        } else {
            out.push(0xE0 | (block_type << 2) | ((size1 >> 8) as u8));
            out.push((size1 & 0xFF) as u8);
        }
    }

    fn err(kind: DecompressErrorKind, consumed: usize) -> DecompressError {
        DecompressError { kind, consumed }
    }

    #[test]
    fn test_raw_copy() {
        let data = [0x02, 0x02, 0x41, 0x42, 0xFF];
        let (out, consumed) = decompress_to_vec(&data, 0, 16).unwrap();
        assert_eq!(out, vec![0x02, 0x41, 0x42]);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_raw_copy_swallows_terminator() {
        // The three payload bytes include the 0xFF, so no terminator remains.
        let data = [0x02, 0x41, 0x42, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 16),
            Err(err(DecompressErrorKind::Truncated, 5))
        );
    }

    #[test]
    fn test_empty_block() {
        let data = [0xFF];
        assert_eq!(decompress_to_vec(&data, 0, 0), Ok((vec![], 1)));
        assert_eq!(
            measure(&data, 0),
            Ok(BlockSize {
                decoded: 0,
                consumed: 1
            })
        );
    }

    #[test]
    fn test_byte_run() {
        let data = [0x23, 0xAA, 0xFF];
        let (out, consumed) = decompress_to_vec(&data, 0, 16).unwrap();
        assert_eq!(out, vec![0xAA; 4]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_word_run() {
        let data = [0x41, 0x12, 0x34, 0xFF];
        let (out, consumed) = decompress_to_vec(&data, 0, 16).unwrap();
        assert_eq!(out, vec![0x12, 0x34, 0x12, 0x34]);
        assert_eq!(consumed, 4);
        assert_eq!(get_compressed_size(&data, 0), Ok(4));
    }

    #[test]
    fn test_incrementing_wraps() {
        let data = [0x63, 0xFE, 0xFF];
        let (out, _) = decompress_to_vec(&data, 0, 16).unwrap();
        assert_eq!(out, vec![0xFE, 0xFF, 0x00, 0x01]);
    }

    #[test]
    fn test_extended_header() {
        let mut data = vec![];
        encode_header(300, BLOCK_TYPE_BYTE_RLE, &mut data);
        data.push(0x55);
        data.push(TERMINATOR);
        assert_eq!(data[..2], [0xE5u8, 0x2B]);
        let (out, consumed) = decompress_to_vec(&data, 0, 1024).unwrap();
        assert_eq!(out, vec![0x55; 300]);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn test_copy_overlapping_seed() {
        // One seed byte, then a copy that keeps reading what it just wrote.
        let data = [0x00, 0xAB, 0x84, 0x00, 0x00, 0xFF];
        let (out, consumed) = decompress_to_vec(&data, 0, 64).unwrap();
        assert_eq!(out, vec![0xAB; 6]);
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_copy_overlapping_pattern() {
        let data = [0x01, 0x01, 0x02, 0x85, 0x00, 0x00, 0xFF];
        let (out, _) = decompress_to_vec(&data, 0, 64).unwrap();
        assert_eq!(out, vec![1, 2, 1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn test_copy_reversed_bits() {
        let data = [0x01, 0x01, 0x0F, 0xA1, 0x00, 0x00, 0xFF];
        let (out, _) = decompress_to_vec(&data, 0, 64).unwrap();
        assert_eq!(out, vec![0x01, 0x0F, 0x80, 0xF0]);
    }

    #[test]
    fn test_copy_backward() {
        let data = [0x02, 1, 2, 3, 0xC2, 0x00, 0x02, 0xFF];
        let (out, _) = decompress_to_vec(&data, 0, 64).unwrap();
        assert_eq!(out, vec![1, 2, 3, 3, 2, 1]);
    }

    #[test]
    fn test_copy_backward_longest() {
        // 1024 bytes of ramp, then the longest possible command mirrors all of it.
        let mut data = vec![];
        for _ in 0..4 {
            encode_header(256, BLOCK_TYPE_INCREMENTING, &mut data);
            data.push(0x00);
        }
        encode_header(1024, BLOCK_TYPE_COPY_BACKWARD, &mut data);
        data.extend([0x03, 0xFF]);
        data.push(TERMINATOR);
        assert_eq!(data[12..14], [0xFBu8, 0xFF]);

        let (out, consumed) = decompress_to_vec(&data, 0, 2048).unwrap();
        assert_eq!(consumed, data.len());
        assert_eq!(out.len(), 2048);
        let ramp: Vec<u8> = (0..1024).map(|i| i as u8).collect();
        assert_eq!(out[..1024], ramp[..]);
        assert!(out[1024..].iter().eq(ramp.iter().rev()));
        assert_eq!(get_compressed_size(&data, 0), Ok(2048));
    }

    #[test]
    fn test_copy_backward_underflow() {
        let data = [0x01, 1, 2, 0xC2, 0x00, 0x01, 0xFF];
        let expected = err(DecompressErrorKind::BackReferenceOutOfRange, 7);
        assert_eq!(decompress_to_vec(&data, 0, 64), Err(expected));
        assert_eq!(measure(&data, 0), Err(expected));
        assert_eq!(expected.consumed(), 7);
        assert_eq!(expected.code(), -4);
    }

    #[test]
    fn test_copy_ahead_of_output_reads_buffer() {
        // Reading past the write cursor sees whatever the caller's buffer holds.
        let data = [0x81, 0x00, 0x04, 0xFF];
        let mut out = [0, 0, 0, 0, 7, 8];
        let size = decompress(&data, 0, &mut out).unwrap();
        assert_eq!(size.decoded, 2);
        assert_eq!(out[..2], [7u8, 8]);
    }

    #[test]
    fn test_start_offset() {
        let data = [0x12, 0x34, 0x20, 0x99, 0xFF, 0x00];
        let (out, consumed) = decompress_to_vec(&data, 2, 16).unwrap();
        assert_eq!(out, vec![0x99]);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_output_overflow() {
        let data = [0x03, 1, 2, 3, 4, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 2),
            Err(err(DecompressErrorKind::OutputOverflow, 1))
        );

        // Consumed points just past the control byte of the offending command.
        let data = [0x00, 0x11, 0x21, 0x22, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 2),
            Err(err(DecompressErrorKind::OutputOverflow, 3))
        );
        assert_eq!(get_compressed_size(&data, 0), Ok(3));
    }

    #[test]
    fn test_word_run_overflow() {
        let data = [0x41, 1, 2, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 3),
            Err(err(DecompressErrorKind::RunOverflow, 2))
        );
        assert!(decompress_to_vec(&data, 0, 4).is_ok());
    }

    #[test]
    fn test_back_reference_out_of_range() {
        let data = [0x80, 0x00, 0x10, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 16),
            Err(err(DecompressErrorKind::BackReferenceOutOfRange, 2))
        );

        // Reference is inside the buffer but the copied window is not.
        let data = [0x00, 0xAA, 0x82, 0x00, 0x02, 0xFF];
        assert_eq!(
            decompress_to_vec(&data, 0, 4),
            Err(err(DecompressErrorKind::BackReferenceOutOfRange, 6))
        );
    }

    #[test]
    fn test_unsupported_opcode() {
        let data = [0xFC, 0x00, 0x00, 0x00, 0xFF];
        let expected = err(DecompressErrorKind::UnsupportedOpcode, 5);
        assert_eq!(decompress_to_vec(&data, 0, 16), Err(expected));
        assert_eq!(measure(&data, 0), Err(expected));
        assert_eq!(compressed_size_code(&data, 0), -5);
    }

    #[test]
    fn test_truncated() {
        let data = [0x00, 0x11];
        let expected = err(DecompressErrorKind::Truncated, 3);
        assert_eq!(decompress_to_vec(&data, 0, 16), Err(expected));
        assert_eq!(measure(&data, 0), Err(expected));

        let data = [0x05, 1, 2];
        assert_eq!(
            decompress_to_vec(&data, 0, 16),
            Err(err(DecompressErrorKind::Truncated, 2))
        );

        assert_eq!(
            decompress_to_vec(&[], 0, 16),
            Err(err(DecompressErrorKind::Truncated, 1))
        );
    }

    #[test]
    fn test_malformed() {
        assert_eq!(
            decompress_to_vec(&[0xE0], 0, 16),
            Err(err(DecompressErrorKind::MalformedStream, 1))
        );
        assert_eq!(
            decompress_to_vec(&[0x80, 0x00], 0, 16),
            Err(err(DecompressErrorKind::MalformedStream, 2))
        );
        assert_eq!(compressed_size_code(&[0x80, 0x00], 0), -1);
    }

    #[test]
    fn test_codes_distinct() {
        let kinds = [
            DecompressErrorKind::MalformedStream,
            DecompressErrorKind::OutputOverflow,
            DecompressErrorKind::RunOverflow,
            DecompressErrorKind::BackReferenceOutOfRange,
            DecompressErrorKind::UnsupportedOpcode,
            DecompressErrorKind::Truncated,
        ];
        let mut codes: Vec<isize> = kinds.iter().map(|k| k.code()).collect();
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    // Builds a stream of valid commands, tracking the output length so that
    // back-references always stay inside what has been written.
    fn random_stream(rng: &mut rand::rngs::StdRng, max_output: usize) -> Vec<u8> {
        let mut out = vec![];
        let mut out_len = 0;
        while out_len < max_output {
            let block_type: u8 = if out_len == 0 {
                rng.gen_range(0..4)
            } else {
                rng.gen_range(0..7)
            };
            let max_size = if block_type == BLOCK_TYPE_COPY_BACKWARD {
                out_len.min(1024)
            } else {
                80
            };
            let size = rng.gen_range(1..=max_size);
            encode_header(size, block_type, &mut out);
            match block_type {
                BLOCK_TYPE_RAW => {
                    for _ in 0..size {
                        out.push(rng.gen());
                    }
                }
                BLOCK_TYPE_BYTE_RLE | BLOCK_TYPE_INCREMENTING => out.push(rng.gen()),
                BLOCK_TYPE_WORD_RLE => {
                    out.push(rng.gen());
                    out.push(rng.gen());
                }
                BLOCK_TYPE_COPY | BLOCK_TYPE_COPY_REVERSED_BITS => {
                    let src: usize = rng.gen_range(0..out_len);
                    out.push((src >> 8) as u8);
                    out.push((src & 0xFF) as u8);
                }
                _ => {
                    let src: usize = rng.gen_range((size - 1)..out_len);
                    out.push((src >> 8) as u8);
                    out.push((src & 0xFF) as u8);
                }
            }
            out_len += if block_type == BLOCK_TYPE_WORD_RLE {
                2 * size
            } else {
                size
            };
        }
        out.push(TERMINATOR);
        out
    }

    #[test]
    fn test_random_streams_agree_with_dry_run() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        for _ in 0..200 {
            let data = random_stream(&mut rng, 2000);
            let capacity = 0x10000;
            let mut out1 = vec![0; capacity];
            let mut out2 = vec![0; capacity];
            let size1 = decompress(&data, 0, &mut out1).unwrap();
            let size2 = decompress(&data, 0, &mut out2).unwrap();
            assert_eq!(size1, size2);
            assert_eq!(out1, out2);
            assert_eq!(size1.consumed, data.len());
            assert_eq!(measure(&data, 0), Ok(size1));
            assert_eq!(get_compressed_size(&data, 0), Ok(size1.decoded));
        }
    }

    #[test]
    fn test_random_garbage_never_panics() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(12345);
        for _ in 0..500 {
            let len = rng.gen_range(0..64);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let capacity = rng.gen_range(0..512);
            let decoded = decompress_to_vec(&data, 0, capacity);
            let measured = measure(&data, 0);
            if let Ok((out, consumed)) = decoded {
                let measured = measured.unwrap();
                assert_eq!(measured.decoded, out.len());
                assert_eq!(measured.consumed, consumed);
            }
        }
    }
}
