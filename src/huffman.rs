//! HPACK static Huffman coding (RFC 7541 Appendix B), shared by QPACK.
//!
//! The encoder feeds codes through a 40-bit shift register (codes are at
//! most 30 bits long) and pads the tail with ones. The decoder is a
//! table-driven state machine consuming one nibble at a time: each
//! `(state, nibble)` cell yields the next state, an optional output symbol
//! and the `ACCEPTED`/`FAIL` flags. The state table is derived once from the
//! code list at first use.
//!
//! Decoding is resumable at three points: before a byte, before the high
//! nibble when the destination filled up, and between the two nibbles of a
//! byte. Source bytes only count as consumed once both nibbles are done, so
//! a caller that grows its destination re-presents the same byte.

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// `(code, bit_length)` for symbols 0-255 plus EOS at 256.
const ENCODE_TABLE: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

const FLAG_ACCEPTED: u8 = 0x01;
const FLAG_SYM: u8 = 0x02;
const FLAG_FAIL: u8 = 0x04;

#[derive(Clone, Copy, Default)]
struct DecodeEl {
    state: u16,
    flags: u8,
    sym: u8,
}

/// Code trie used only while building the nibble table. A child slot is
/// either absent, an internal node index, or a leaf carrying a symbol.
#[derive(Clone, Copy, PartialEq)]
enum Child {
    None,
    Node(u16),
    Leaf(u8),
}

struct Trie {
    children: Vec<[Child; 2]>,
    /// Depth of each node along the pure-ones path from the root, when the
    /// node lies on it. Padding is valid only on that path, up to 7 bits.
    ones_depth: Vec<Option<u8>>,
}

impl Trie {
    fn build() -> Self {
        let mut trie = Trie {
            children: vec![[Child::None; 2]],
            ones_depth: vec![Some(0)],
        };
        for (sym, &(code, bits)) in ENCODE_TABLE[..256].iter().enumerate() {
            let mut node = 0usize;
            for pos in (1..bits).rev() {
                let bit = ((code >> pos) & 1) as usize;
                node = match trie.children[node][bit] {
                    Child::Node(n) => n as usize,
                    Child::None => {
                        let n = trie.children.len() as u16;
                        trie.children.push([Child::None; 2]);
                        // Pure-ones paths are reached exclusively through
                        // 1-branches from ones-path nodes.
                        let depth = match (bit, trie.ones_depth[node]) {
                            (1, Some(d)) => Some(d + 1),
                            _ => None,
                        };
                        trie.ones_depth.push(depth);
                        trie.children[node][bit] = Child::Node(n);
                        n as usize
                    }
                    Child::Leaf(_) => unreachable!("prefix-free code"),
                };
            }
            let last = (code & 1) as usize;
            trie.children[node][last] = Child::Leaf(sym as u8);
        }
        trie
    }

    fn padding_ok(&self, node: u16) -> bool {
        matches!(self.ones_depth[node as usize], Some(d) if d <= 7)
    }
}

/// `DECODE_TABLE[state][nibble]`, state 0 is the trie root.
static DECODE_TABLE: Lazy<Vec<[DecodeEl; 16]>> = Lazy::new(|| {
    let trie = Trie::build();
    let fail = DecodeEl { state: 0, flags: FLAG_FAIL, sym: 0 };
    let mut table = vec![[DecodeEl::default(); 16]; trie.children.len()];
    for state in 0..trie.children.len() as u16 {
        for nibble in 0..16u8 {
            let mut node = state;
            let mut el = DecodeEl::default();
            let mut dead = false;
            for pos in (0..4).rev() {
                let bit = ((nibble >> pos) & 1) as usize;
                match trie.children[node as usize][bit] {
                    Child::Node(n) => node = n,
                    Child::Leaf(sym) => {
                        // At most one symbol fits in four bits: the
                        // shortest code is five bits long.
                        el.flags |= FLAG_SYM;
                        el.sym = sym;
                        node = 0;
                    }
                    Child::None => {
                        dead = true;
                        break;
                    }
                }
            }
            table[state as usize][nibble as usize] = if dead {
                fail
            } else {
                el.state = node;
                if trie.padding_ok(node) {
                    el.flags |= FLAG_ACCEPTED;
                }
                el
            };
        }
    }
    table
});

/// Encoded length of `input` in bytes.
pub fn encoded_size(input: &[u8]) -> usize {
    let bits: usize = input
        .iter()
        .map(|&b| ENCODE_TABLE[b as usize].1 as usize)
        .sum();
    (bits + 7) / 8
}

/// Encodes `input` into `dst`, which must hold [`encoded_size`] bytes.
/// Returns the number of bytes written.
pub fn encode(input: &[u8], dst: &mut [u8]) -> usize {
    let mut bits: u64 = 0;
    let mut bits_left: u32 = 40;
    let mut pos = 0;

    for &b in input {
        let (code, len) = ENCODE_TABLE[b as usize];
        bits |= (code as u64) << (bits_left - len as u32);
        bits_left -= len as u32;
        while bits_left <= 32 {
            dst[pos] = (bits >> 32) as u8;
            pos += 1;
            bits <<= 8;
            bits_left += 8;
        }
    }

    if bits_left != 40 {
        bits |= (1u64 << bits_left) - 1;
        dst[pos] = (bits >> 32) as u8;
        pos += 1;
    }
    pos
}

/// Why a [`HuffmanDecoder::decode`] call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffStatus {
    /// `final` input fully decoded and the string ended on a valid boundary.
    Done,
    /// Source exhausted; feed the next chunk.
    EndSrc,
    /// Destination exhausted; grow it and call again with the same source.
    EndDst,
}

/// Result of one decode step: status plus consumed/produced counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HuffResult {
    pub status: HuffStatus,
    pub n_src: usize,
    pub n_dst: usize,
}

/// Resumable Huffman decoder for one string.
#[derive(Debug, Default, Clone)]
pub struct HuffmanDecoder {
    resume: u8,
    state: u16,
    eos: bool,
}

impl HuffmanDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    fn step(&mut self, nibble: u8, dst: &mut [u8], di: &mut usize) -> Result<()> {
        let el = DECODE_TABLE[self.state as usize][nibble as usize];
        if el.flags & FLAG_FAIL != 0 {
            return Err(Error::HuffmanError);
        }
        if el.flags & FLAG_SYM != 0 {
            dst[*di] = el.sym;
            *di += 1;
        }
        self.state = el.state;
        self.eos = el.flags & FLAG_ACCEPTED != 0;
        Ok(())
    }

    /// Decodes from `src` into `dst`. `final_` marks the last chunk of the
    /// encoded string; only then is the padding validated.
    pub fn decode(&mut self, src: &[u8], dst: &mut [u8], final_: bool) -> Result<HuffResult> {
        let mut si = 0;
        let mut di = 0;
        // 1: start of byte, 2: high nibble pending (dst was full),
        // 3: high nibble done, low nibble pending.
        let mut phase = match self.resume {
            0 => {
                self.state = 0;
                self.eos = true;
                1
            }
            p => p,
        };

        while si < src.len() {
            if phase == 1 {
                if di == dst.len() {
                    self.resume = 2;
                    return Ok(HuffResult { status: HuffStatus::EndDst, n_src: si, n_dst: di });
                }
                phase = 2;
            }
            if phase == 2 {
                self.step(src[si] >> 4, dst, &mut di)?;
                if di == dst.len() {
                    self.resume = 3;
                    return Ok(HuffResult { status: HuffStatus::EndDst, n_src: si, n_dst: di });
                }
                phase = 3;
            }
            self.step(src[si] & 0x0f, dst, &mut di)?;
            si += 1;
            phase = 1;
        }

        if final_ {
            if self.eos {
                Ok(HuffResult { status: HuffStatus::Done, n_src: si, n_dst: di })
            } else {
                Err(Error::HuffmanError)
            }
        } else {
            self.resume = 1;
            Ok(HuffResult { status: HuffStatus::EndSrc, n_src: si, n_dst: di })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_vec(input: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; encoded_size(input)];
        let n = encode(input, &mut out);
        assert_eq!(n, out.len());
        out
    }

    fn decode_vec(src: &[u8]) -> Result<Vec<u8>> {
        let mut dec = HuffmanDecoder::new();
        let mut out = vec![0u8; src.len() * 2 + 4];
        loop {
            let r = dec.decode(src, &mut out, true)?;
            match r.status {
                HuffStatus::Done => {
                    out.truncate(r.n_dst);
                    return Ok(out);
                }
                HuffStatus::EndDst => {
                    let len = out.len();
                    out.resize(len * 2, 0);
                    // Restart from scratch for this simple helper.
                    dec.reset();
                }
                HuffStatus::EndSrc => unreachable!(),
            }
        }
    }

    #[test]
    fn test_rfc_example_www() {
        // RFC 7541 Appendix C.4.1.
        let enc = encode_vec(b"www.example.com");
        assert_eq!(
            enc,
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );
        assert_eq!(decode_vec(&enc).unwrap(), b"www.example.com");
    }

    #[test]
    fn test_round_trip_all_bytes() {
        let input: Vec<u8> = (0u8..=255).collect();
        let enc = encode_vec(&input);
        assert_eq!(decode_vec(&enc).unwrap(), input);
    }

    #[test]
    fn test_empty() {
        assert_eq!(encoded_size(b""), 0);
        assert_eq!(decode_vec(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_chunked_equals_oneshot() {
        let input = b"no-cache, no-store, must-revalidate; custom=\"x/y\"";
        let enc = encode_vec(input);
        for chunk in 1..=5usize {
            let mut dec = HuffmanDecoder::new();
            let mut out = vec![0u8; input.len() + 8];
            let mut di = 0;
            let mut fed = 0;
            while fed < enc.len() {
                let hi = (fed + chunk).min(enc.len());
                let final_ = hi == enc.len();
                let r = dec.decode(&enc[fed..hi], &mut out[di..], final_).unwrap();
                di += r.n_dst;
                fed += r.n_src;
                match r.status {
                    HuffStatus::Done => assert!(final_),
                    HuffStatus::EndSrc => assert!(!final_),
                    HuffStatus::EndDst => panic!("destination sized for full output"),
                }
            }
            assert_eq!(&out[..di], input);
        }
    }

    #[test]
    fn test_end_dst_then_grow() {
        let input = b"destination starts too small";
        let enc = encode_vec(input);
        let mut dec = HuffmanDecoder::new();
        let mut out = vec![0u8; 4];
        let mut di = 0;
        let mut fed = 0;
        loop {
            let r = dec.decode(&enc[fed..], &mut out[di..], true).unwrap();
            di += r.n_dst;
            fed += r.n_src;
            match r.status {
                HuffStatus::Done => break,
                HuffStatus::EndDst => out.resize(out.len() * 2, 0),
                HuffStatus::EndSrc => panic!("full source was provided"),
            }
        }
        assert_eq!(&out[..di], input);
    }

    #[test]
    fn test_bad_padding() {
        // 'a' is 5 bits (00011); pad the rest of the byte with zeros
        // instead of ones.
        let mut dec = HuffmanDecoder::new();
        let mut out = [0u8; 8];
        assert!(dec.decode(&[0b0001_1000], &mut out, true).is_err());
    }

    #[test]
    fn test_overlong_padding() {
        // A full byte of ones is valid EOS padding only up to 7 bits.
        let mut dec = HuffmanDecoder::new();
        let mut out = [0u8; 8];
        assert!(dec.decode(&[0xff, 0xff], &mut out, true).is_err());
    }

    #[test]
    fn test_five_bit_symbols_pack() {
        // '0' (00000) then '1' (00001): 10 bits, six 1-padding bits.
        let enc = encode_vec(b"01");
        assert_eq!(enc.len(), 2);
        assert_eq!(decode_vec(&enc).unwrap(), b"01");
    }
}
