//! ## DMS Track Codec
//!
//! The seven track compression modes of the Amiga DiskMasher archiver.
//! All modes funnel through a per-session context: a 16 KiB text ring that
//! persists between tracks (unless a track's header flags say otherwise),
//! the QUICK mode's small ring, the DEEP mode's adaptive Huffman tree, and
//! the HEAVY modes' transmitted Huffman trees.
//!
//! Mode pipelines (innermost stage first):
//!
//! | code | name   | pipeline |
//! |------|--------|----------|
//! | 0    | NOCOMP | identity |
//! | 1    | SIMPLE | RLE |
//! | 2    | QUICK  | LZ, 256 byte window, then RLE |
//! | 3    | MEDIUM | LZ, 16K window, then RLE |
//! | 4    | DEEP   | LZ with adaptive Huffman, then RLE |
//! | 5    | HEAVY1 | LZ with transmitted Huffman trees, 8K window |
//! | 6    | HEAVY2 | as HEAVY1 with a 16K window |
//!
//! HEAVY tracks run the extra RLE stage only when flag bit 2 is set.
//! Flag bit 0 clear resets the rings before the track; flag bit 1 set
//! makes the HEAVY modes re-read their trees (and DEEP restart its
//! adaptive tree) at the start of the track.

use crate::bits::{BitReaderMsb,BitWriterMsb};
use super::lzhuf::{AdaptiveHuffmanCoder,AdaptiveHuffmanDecoder,NUM_SYMBOLS};
use super::{rle,Error};

/// DMS tracks never unpack beyond this
pub const TRACK_MAX: usize = 32000;
/// text ring size, the largest window any mode uses
pub const TEXT_SIZE: usize = 16384;

pub const MODE_NOCOMP: u8 = 0;
pub const MODE_SIMPLE: u8 = 1;
pub const MODE_QUICK: u8 = 2;
pub const MODE_MEDIUM: u8 = 3;
pub const MODE_DEEP: u8 = 4;
pub const MODE_HEAVY1: u8 = 5;
pub const MODE_HEAVY2: u8 = 6;

/// track flag bit 0: ring state persists from the previous track
pub const FLAG_RING_PERSIST: u8 = 0x01;
/// track flag bit 1: HEAVY trees (and the DEEP tree) restart on this track
pub const FLAG_FRESH_TREES: u8 = 0x02;
/// track flag bit 2: HEAVY output passes through the RLE stage
pub const FLAG_HEAVY_RLE: u8 = 0x04;

const QUICK_SIZE: usize = 256;
const QUICK_MIN: usize = 2;
const QUICK_MAX: usize = 5;
const LZ_MIN: usize = 3;
const LZ_MAX: usize = 66;
const MEDIUM_MASK: usize = 0x3fff;
const HEAVY1_MASK: usize = 0x1fff;
const HEAVY2_MASK: usize = 0x3fff;
/// literal/length alphabet for the HEAVY modes
const HEAVY_NC: usize = 256 + (LZ_MAX - LZ_MIN + 1);
/// distance alphabets: d codes 0..=13 reach 8K, 0..=14 reach 16K
const HEAVY1_NPT: usize = 14;
const HEAVY2_NPT: usize = 15;
/// transmitted code lengths fit in 5 bits
const TREE_LEN_BITS: u8 = 5;
const MAX_CODE_LEN: usize = 32;

/// Canonical Huffman decode table built from transmitted code lengths.
/// Decoding walks one bit at a time and is bounded to `MAX_CODE_LEN`;
/// anything deeper is a corrupt tree.
struct CanonicalTree {
    counts: [u16;MAX_CODE_LEN+1],
    symbols: Vec<u16>
}

impl CanonicalTree {
    fn from_lengths(lengths: &[u8]) -> Result<Option<Self>,Error> {
        let mut counts = [0u16;MAX_CODE_LEN+1];
        let mut pairs: Vec<(u8,u16)> = Vec::new();
        for (sym, len) in lengths.iter().enumerate() {
            if *len as usize > MAX_CODE_LEN {
                return Err(Error::BadHuffmanTree);
            }
            if *len > 0 {
                counts[*len as usize] += 1;
                pairs.push((*len, sym as u16));
            }
        }
        if pairs.is_empty() {
            return Ok(None);
        }
        // Kraft sum must not oversubscribe the code space
        let mut kraft: u64 = 0;
        for len in 1..=MAX_CODE_LEN {
            kraft += (counts[len] as u64) << (MAX_CODE_LEN - len);
        }
        if kraft > 1u64 << MAX_CODE_LEN {
            return Err(Error::BadHuffmanTree);
        }
        pairs.sort();
        Ok(Some(Self {
            counts,
            symbols: pairs.iter().map(|p| p.1).collect()
        }))
    }
    fn decode(&self, rdr: &mut BitReaderMsb) -> Result<u16,Error> {
        let mut code: u32 = 0;
        let mut first: u32 = 0;
        let mut index: usize = 0;
        for len in 1..=MAX_CODE_LEN {
            code |= rdr.get_bit()? as u32;
            let count = self.counts[len] as u32;
            if code < first + count {
                return Ok(self.symbols[index + (code - first) as usize]);
            }
            index += count as usize;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(Error::BadHuffmanTree)
    }
}

/// Code lengths for the given frequencies; zero for unused symbols, and a
/// lone symbol gets length 1 so the canonical code is well formed.
fn huffman_lengths(freq: &[u32]) -> Vec<u8> {
    let n = freq.len();
    let mut lengths = vec![0u8; n];
    let live: Vec<usize> = (0..n).filter(|i| freq[*i] > 0).collect();
    if live.is_empty() {
        return lengths;
    }
    if live.len() == 1 {
        lengths[live[0]] = 1;
        return lengths;
    }
    // simple two-smallest merge over a node arena
    let mut weight: Vec<u64> = live.iter().map(|i| freq[*i] as u64).collect();
    let mut parent: Vec<usize> = vec![usize::MAX; live.len()];
    let mut alive: Vec<usize> = (0..live.len()).collect();
    while alive.len() > 1 {
        alive.sort_by_key(|i| weight[*i]);
        let a = alive[0];
        let b = alive[1];
        let node = weight.len();
        weight.push(weight[a] + weight[b]);
        parent.push(usize::MAX);
        parent[a] = node;
        parent[b] = node;
        alive.remove(0);
        alive.remove(0);
        alive.push(node);
    }
    for (k, sym) in live.iter().enumerate() {
        let mut depth = 0u8;
        let mut node = k;
        while parent[node] != usize::MAX {
            depth += 1;
            node = parent[node];
        }
        lengths[*sym] = depth;
    }
    lengths
}

/// Canonical codes matching `CanonicalTree::from_lengths` ordering.
fn canonical_codes(lengths: &[u8]) -> Vec<(u16,u8)> {
    let mut counts = [0u32;MAX_CODE_LEN+1];
    for len in lengths {
        if *len > 0 {
            counts[*len as usize] += 1;
        }
    }
    let mut next = [0u32;MAX_CODE_LEN+1];
    let mut code: u32 = 0;
    for len in 1..=MAX_CODE_LEN {
        next[len] = code;
        code = (code + counts[len]) << 1;
    }
    let mut pairs: Vec<(u8,u16)> = Vec::new();
    for (sym, len) in lengths.iter().enumerate() {
        if *len > 0 {
            pairs.push((*len, sym as u16));
        }
    }
    pairs.sort();
    let mut ans = vec![(0u16,0u8); lengths.len()];
    for (len, sym) in pairs {
        ans[sym as usize] = (next[len as usize] as u16, len);
        next[len as usize] += 1;
    }
    ans
}

/// DEEP mode state: the adaptive tree and its own dictionary survive from
/// track to track until a fresh-trees flag arrives.
struct DeepState {
    decoder: AdaptiveHuffmanDecoder,
    ring: Vec<u8>,
    pos: usize
}

impl DeepState {
    fn new() -> Self {
        Self {
            decoder: AdaptiveHuffmanDecoder::create(NUM_SYMBOLS),
            ring: vec![0; super::lzhuf::WINDOW],
            pos: 0
        }
    }
}

/// HEAVY mode state: trees persist until re-read.
struct HeavyState {
    literal: Option<CanonicalTree>,
    distance: Option<CanonicalTree>
}

/// All the state one decode session carries between tracks.
pub struct DmsContext {
    text: Vec<u8>,
    text_loc: usize,
    quick: [u8;QUICK_SIZE],
    quick_loc: usize,
    deep: Option<DeepState>,
    heavy: HeavyState
}

impl DmsContext {
    pub fn new() -> Self {
        Self {
            text: vec![0; TEXT_SIZE],
            text_loc: 0,
            quick: [0;QUICK_SIZE],
            quick_loc: 0,
            deep: None,
            heavy: HeavyState {
                literal: None,
                distance: None
            }
        }
    }
    fn reset_rings(&mut self) {
        self.text.fill(0);
        self.text_loc = 0;
        self.quick.fill(0);
        self.quick_loc = 0;
    }
    fn push_text(&mut self, mask: usize, byte: u8) {
        self.text[self.text_loc & mask] = byte;
        self.text_loc = self.text_loc.wrapping_add(1);
    }
    fn text_behind(&self, mask: usize, dist: usize) -> u8 {
        self.text[self.text_loc.wrapping_sub(dist) & mask]
    }

    fn unpack_quick(&mut self, src: &[u8], limit: usize) -> Result<Vec<u8>,Error> {
        let mut rdr = BitReaderMsb::new(src);
        let mut ans: Vec<u8> = Vec::new();
        while ans.len() < limit {
            if rdr.get_bit()? == 1 {
                let byte = rdr.get(8)? as u8;
                ans.push(byte);
                self.quick[self.quick_loc % QUICK_SIZE] = byte;
                self.quick_loc = self.quick_loc.wrapping_add(1);
            } else {
                let len = rdr.get(2)? as usize + QUICK_MIN;
                let dist = rdr.get(8)? as usize + 1;
                if ans.len() + len > limit {
                    return Err(Error::OutputFull);
                }
                for _k in 0..len {
                    let byte = self.quick[self.quick_loc.wrapping_sub(dist) % QUICK_SIZE];
                    ans.push(byte);
                    self.quick[self.quick_loc % QUICK_SIZE] = byte;
                    self.quick_loc = self.quick_loc.wrapping_add(1);
                }
            }
        }
        Ok(ans)
    }

    fn unpack_medium(&mut self, src: &[u8], limit: usize) -> Result<Vec<u8>,Error> {
        let mut rdr = BitReaderMsb::new(src);
        let mut ans: Vec<u8> = Vec::new();
        while ans.len() < limit {
            if rdr.get_bit()? == 1 {
                let byte = rdr.get(8)? as u8;
                ans.push(byte);
                self.push_text(MEDIUM_MASK, byte);
            } else {
                let len = rdr.get(6)? as usize + LZ_MIN;
                let dist = rdr.get(14)? as usize + 1;
                if ans.len() + len > limit {
                    return Err(Error::OutputFull);
                }
                for _k in 0..len {
                    let byte = self.text_behind(MEDIUM_MASK, dist);
                    ans.push(byte);
                    self.push_text(MEDIUM_MASK, byte);
                }
            }
        }
        Ok(ans)
    }

    fn unpack_deep(&mut self, src: &[u8], limit: usize, fresh: bool) -> Result<Vec<u8>,Error> {
        if fresh || self.deep.is_none() {
            self.deep = Some(DeepState::new());
        }
        let state = self.deep.as_mut().unwrap();
        let mut rdr = BitReaderMsb::new(src);
        let mut ans: Vec<u8> = Vec::new();
        let window = state.ring.len();
        while ans.len() < limit {
            let c = state.decoder.decode_char(&mut rdr)?;
            if c < 256 {
                ans.push(c as u8);
                state.ring[state.pos] = c as u8;
                state.pos = (state.pos + 1) % window;
            } else {
                let dist = state.decoder.decode_position(&mut rdr)? as usize + 1;
                let len = c as usize + super::lzhuf::THRESHOLD - 255;
                if ans.len() + len > limit {
                    return Err(Error::OutputFull);
                }
                for _k in 0..len {
                    let byte = state.ring[(state.pos + window - dist) % window];
                    ans.push(byte);
                    state.ring[state.pos] = byte;
                    state.pos = (state.pos + 1) % window;
                }
            }
        }
        Ok(ans)
    }

    fn read_heavy_trees(&mut self, rdr: &mut BitReaderMsb, npt: usize) -> Result<(),Error> {
        let mut lit_lengths = vec![0u8; HEAVY_NC];
        let n = rdr.get(9)? as usize;
        if n > HEAVY_NC {
            return Err(Error::BadHuffmanTree);
        }
        for i in 0..n {
            lit_lengths[i] = rdr.get(TREE_LEN_BITS)? as u8;
        }
        let mut dist_lengths = vec![0u8; npt];
        let n = rdr.get(5)? as usize;
        if n > npt {
            return Err(Error::BadHuffmanTree);
        }
        for i in 0..n {
            dist_lengths[i] = rdr.get(TREE_LEN_BITS)? as u8;
        }
        self.heavy.literal = CanonicalTree::from_lengths(&lit_lengths)?;
        self.heavy.distance = CanonicalTree::from_lengths(&dist_lengths)?;
        Ok(())
    }

    fn unpack_heavy(&mut self, src: &[u8], limit: usize, mask: usize, npt: usize, fresh: bool) -> Result<Vec<u8>,Error> {
        let mut rdr = BitReaderMsb::new(src);
        if fresh {
            self.read_heavy_trees(&mut rdr, npt)?;
        }
        let mut ans: Vec<u8> = Vec::new();
        while ans.len() < limit {
            let c = match &self.heavy.literal {
                Some(tree) => tree.decode(&mut rdr)?,
                None => return Err(Error::BadHuffmanTree)
            };
            if c < 256 {
                ans.push(c as u8);
                self.push_text(mask, c as u8);
            } else {
                let len = c as usize - 256 + LZ_MIN;
                let d = match &self.heavy.distance {
                    Some(tree) => tree.decode(&mut rdr)?,
                    None => return Err(Error::BadHuffmanTree)
                };
                let off = match d {
                    0 => 0,
                    d => (1usize << (d - 1)) + rdr.get(d as u8 - 1)? as usize
                };
                if ans.len() + len > limit {
                    return Err(Error::OutputFull);
                }
                for _k in 0..len {
                    let byte = self.text_behind(mask, off + 1);
                    ans.push(byte);
                    self.push_text(mask, byte);
                }
            }
        }
        Ok(ans)
    }

    /// Unpack one track record.  `inter_len` is the length after the LZ
    /// stage (the header's second packed length), `unpacked_len` the final
    /// track length.
    pub fn unpack_track(&mut self, cmode: u8, flags: u8, src: &[u8], inter_len: usize, unpacked_len: usize) -> Result<Vec<u8>,Error> {
        if unpacked_len > TRACK_MAX || inter_len > TRACK_MAX {
            return Err(Error::OutputFull);
        }
        if flags & FLAG_RING_PERSIST == 0 {
            self.reset_rings();
        }
        let fresh = flags & FLAG_FRESH_TREES > 0;
        let ans = match cmode {
            MODE_NOCOMP => {
                if src.len() < unpacked_len {
                    return Err(Error::UnexpectedEof);
                }
                src[0..unpacked_len].to_vec()
            },
            MODE_SIMPLE => rle::unpack(src, unpacked_len)?,
            MODE_QUICK => {
                let mid = self.unpack_quick(src, inter_len)?;
                rle::unpack(&mid, unpacked_len)?
            },
            MODE_MEDIUM => {
                let mid = self.unpack_medium(src, inter_len)?;
                rle::unpack(&mid, unpacked_len)?
            },
            MODE_DEEP => {
                let mid = self.unpack_deep(src, inter_len, fresh)?;
                rle::unpack(&mid, unpacked_len)?
            },
            MODE_HEAVY1 | MODE_HEAVY2 => {
                let (mask, npt) = match cmode {
                    MODE_HEAVY1 => (HEAVY1_MASK, HEAVY1_NPT),
                    _ => (HEAVY2_MASK, HEAVY2_NPT)
                };
                let mid_len = match flags & FLAG_HEAVY_RLE {
                    0 => unpacked_len,
                    _ => inter_len
                };
                let mid = self.unpack_heavy(src, mid_len, mask, npt, fresh)?;
                match flags & FLAG_HEAVY_RLE {
                    0 => mid,
                    _ => rle::unpack(&mid, unpacked_len)?
                }
            },
            _ => return Err(Error::BadCompressionMode)
        };
        if ans.len() != unpacked_len {
            return Err(Error::UnexpectedEof);
        }
        Ok(ans)
    }
}

/// Longest match in the last `window` bytes of `out`, lengths in
/// `[min_len,max_len]`; overlap with the run being encoded is allowed.
fn find_match(out: &[u8], src: &[u8], ptr: usize, window: usize, min_len: usize, max_len: usize) -> (usize, usize) {
    let avail = usize::min(max_len, src.len() - ptr);
    let mut best_len = 0;
    let mut best_dist = 0;
    if avail < min_len {
        return (0, 0);
    }
    let deepest = usize::min(window, out.len());
    for dist in 1..=deepest {
        let mut len = 0;
        while len < avail {
            let probe = match len < dist {
                true => out[out.len() - dist + len],
                false => src[ptr + len - dist]
            };
            if probe != src[ptr + len] {
                break;
            }
            len += 1;
        }
        if len > best_len {
            best_len = len;
            best_dist = dist;
            if len == avail {
                break;
            }
        }
    }
    (best_dist, best_len)
}

fn pack_quick(src: &[u8]) -> Vec<u8> {
    let mut wtr = BitWriterMsb::new();
    let mut out: Vec<u8> = Vec::new();
    let mut ptr = 0;
    while ptr < src.len() {
        let (dist, len) = find_match(&out, src, ptr, QUICK_SIZE, QUICK_MIN, QUICK_MAX);
        if len >= QUICK_MIN {
            wtr.put(1, 0);
            wtr.put(2, (len - QUICK_MIN) as u16);
            wtr.put(8, (dist - 1) as u16);
            for k in 0..len {
                out.push(src[ptr + k]);
            }
            ptr += len;
        } else {
            wtr.put(1, 1);
            wtr.put(8, src[ptr] as u16);
            out.push(src[ptr]);
            ptr += 1;
        }
    }
    wtr.finish()
}

fn pack_medium(src: &[u8]) -> Vec<u8> {
    let mut wtr = BitWriterMsb::new();
    let mut out: Vec<u8> = Vec::new();
    let mut ptr = 0;
    while ptr < src.len() {
        let (dist, len) = find_match(&out, src, ptr, MEDIUM_MASK + 1, LZ_MIN, LZ_MAX);
        if len >= LZ_MIN {
            wtr.put(1, 0);
            wtr.put(6, (len - LZ_MIN) as u16);
            wtr.put(14, (dist - 1) as u16);
            for k in 0..len {
                out.push(src[ptr + k]);
            }
            ptr += len;
        } else {
            wtr.put(1, 1);
            wtr.put(8, src[ptr] as u16);
            out.push(src[ptr]);
            ptr += 1;
        }
    }
    wtr.finish()
}

fn pack_deep(src: &[u8]) -> Vec<u8> {
    let mut huff = AdaptiveHuffmanCoder::create(NUM_SYMBOLS);
    let mut wtr = BitWriterMsb::new();
    let mut out: Vec<u8> = Vec::new();
    let window = super::lzhuf::WINDOW;
    let max_len = super::lzhuf::LOOKAHEAD;
    let mut ptr = 0;
    while ptr < src.len() {
        let (dist, len) = find_match(&out, src, ptr, window, LZ_MIN, max_len);
        if len >= LZ_MIN {
            huff.encode_char((255 - super::lzhuf::THRESHOLD + len) as u16, &mut wtr);
            huff.encode_position((dist - 1) as u16, &mut wtr);
            for k in 0..len {
                out.push(src[ptr + k]);
            }
            ptr += len;
        } else {
            huff.encode_char(src[ptr] as u16, &mut wtr);
            out.push(src[ptr]);
            ptr += 1;
        }
    }
    wtr.finish()
}

enum HeavyToken {
    Literal(u8),
    Match{len: usize, dist: usize}
}

fn pack_heavy(src: &[u8], mask: usize, npt: usize) -> Vec<u8> {
    // first pass: tokenize and count symbol frequencies
    let mut tokens: Vec<HeavyToken> = Vec::new();
    let mut lit_freq = vec![0u32; HEAVY_NC];
    let mut dist_freq = vec![0u32; npt];
    let mut out: Vec<u8> = Vec::new();
    let mut ptr = 0;
    while ptr < src.len() {
        let (dist, len) = find_match(&out, src, ptr, mask + 1, LZ_MIN, LZ_MAX);
        if len >= LZ_MIN {
            lit_freq[256 + len - LZ_MIN] += 1;
            let off = dist - 1;
            let d = match off {
                0 => 0,
                _ => 64 - (off as u64).leading_zeros() as usize
            };
            dist_freq[d] += 1;
            tokens.push(HeavyToken::Match{len, dist});
            for k in 0..len {
                out.push(src[ptr + k]);
            }
            ptr += len;
        } else {
            lit_freq[src[ptr] as usize] += 1;
            tokens.push(HeavyToken::Literal(src[ptr]));
            out.push(src[ptr]);
            ptr += 1;
        }
    }
    // second pass: build trees and emit
    let lit_lengths = huffman_lengths(&lit_freq);
    let dist_lengths = huffman_lengths(&dist_freq);
    let lit_codes = canonical_codes(&lit_lengths);
    let dist_codes = canonical_codes(&dist_lengths);
    let mut wtr = BitWriterMsb::new();
    let lit_n = match lit_lengths.iter().rposition(|l| *l > 0) {
        Some(i) => i + 1,
        None => 0
    };
    wtr.put(9, lit_n as u16);
    for i in 0..lit_n {
        wtr.put(TREE_LEN_BITS, lit_lengths[i] as u16);
    }
    let dist_n = match dist_lengths.iter().rposition(|l| *l > 0) {
        Some(i) => i + 1,
        None => 0
    };
    wtr.put(5, dist_n as u16);
    for i in 0..dist_n {
        wtr.put(TREE_LEN_BITS, dist_lengths[i] as u16);
    }
    for token in tokens {
        match token {
            HeavyToken::Literal(byte) => {
                let (code, bits) = lit_codes[byte as usize];
                wtr.put(bits, code);
            },
            HeavyToken::Match{len, dist} => {
                let (code, bits) = lit_codes[256 + len - LZ_MIN];
                wtr.put(bits, code);
                let off = dist - 1;
                let d = match off {
                    0 => 0,
                    _ => 64 - (off as u64).leading_zeros() as usize
                };
                let (dcode, dbits) = dist_codes[d];
                wtr.put(dbits, dcode);
                if d > 0 {
                    wtr.put(d as u8 - 1, (off - (1 << (d - 1))) as u16);
                }
            }
        }
    }
    wtr.finish()
}

/// Pack one track.  Returns `(packed, inter_len)` where `inter_len` is the
/// length after the RLE stage (equal to the input length for modes without
/// one).  The returned flags always reset the rings and carry fresh trees,
/// which keeps the encoder stateless per track.
pub fn pack_track(cmode: u8, dat: &[u8]) -> Result<(Vec<u8>, usize, u8),Error> {
    if dat.len() > TRACK_MAX {
        return Err(Error::OutputFull);
    }
    let fresh = FLAG_FRESH_TREES;
    match cmode {
        MODE_NOCOMP => Ok((dat.to_vec(), dat.len(), fresh)),
        MODE_SIMPLE => Ok((rle::pack(dat), dat.len(), fresh)),
        MODE_QUICK => {
            let mid = rle::pack(dat);
            Ok((pack_quick(&mid), mid.len(), fresh))
        },
        MODE_MEDIUM => {
            let mid = rle::pack(dat);
            Ok((pack_medium(&mid), mid.len(), fresh))
        },
        MODE_DEEP => {
            let mid = rle::pack(dat);
            Ok((pack_deep(&mid), mid.len(), fresh))
        },
        MODE_HEAVY1 => {
            let mid = rle::pack(dat);
            Ok((pack_heavy(&mid, HEAVY1_MASK, HEAVY1_NPT), mid.len(), fresh | FLAG_HEAVY_RLE))
        },
        MODE_HEAVY2 => {
            let mid = rle::pack(dat);
            Ok((pack_heavy(&mid, HEAVY2_MASK, HEAVY2_NPT), mid.len(), fresh | FLAG_HEAVY_RLE))
        },
        _ => Err(Error::BadCompressionMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track(len: usize, seed: u8) -> Vec<u8> {
        let mut dat = vec![0u8; len];
        for i in 0..len {
            dat[i] = match i % 97 {
                0..=40 => seed,
                41..=60 => (i & 0xff) as u8,
                _ => seed.wrapping_add((i / 97) as u8)
            };
        }
        dat
    }

    fn round_trip(cmode: u8) {
        let dat = sample_track(11264, 0x37);
        let (packed, inter, flags) = pack_track(cmode, &dat).unwrap();
        let mut ctx = DmsContext::new();
        let back = ctx.unpack_track(cmode, flags, &packed, inter, dat.len()).unwrap();
        assert_eq!(back, dat);
    }

    #[test]
    fn nocomp_round_trip() {
        round_trip(MODE_NOCOMP);
    }

    #[test]
    fn simple_round_trip() {
        round_trip(MODE_SIMPLE);
    }

    #[test]
    fn quick_round_trip() {
        round_trip(MODE_QUICK);
    }

    #[test]
    fn medium_round_trip() {
        round_trip(MODE_MEDIUM);
    }

    #[test]
    fn deep_round_trip() {
        round_trip(MODE_DEEP);
    }

    #[test]
    fn heavy1_round_trip() {
        round_trip(MODE_HEAVY1);
    }

    #[test]
    fn heavy2_round_trip() {
        round_trip(MODE_HEAVY2);
    }

    #[test]
    fn multi_track_session() {
        // several tracks through one context, mixing modes
        let mut ctx = DmsContext::new();
        for t in 0..5u8 {
            let dat = sample_track(5632, t.wrapping_mul(37));
            let cmode = [MODE_SIMPLE,MODE_QUICK,MODE_MEDIUM,MODE_HEAVY1,MODE_DEEP][t as usize];
            let (packed, inter, flags) = pack_track(cmode, &dat).unwrap();
            let back = ctx.unpack_track(cmode, flags, &packed, inter, dat.len()).unwrap();
            assert_eq!(back, dat);
        }
    }

    #[test]
    fn bad_mode_refused() {
        let mut ctx = DmsContext::new();
        assert!(matches!(ctx.unpack_track(7, 0, &[0;8], 8, 8), Err(Error::BadCompressionMode)));
    }

    #[test]
    fn oversize_track_refused() {
        let mut ctx = DmsContext::new();
        assert!(matches!(ctx.unpack_track(MODE_NOCOMP, 0, &[0;8], 8, 50000), Err(Error::OutputFull)));
    }
}
