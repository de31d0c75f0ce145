//! QPACK encoder.
//!
//! One encoder serves one connection. Per header block the caller brackets
//! `encode` calls with `start_header`/`end_header`; each `encode` emits into
//! two caller-provided buffers (encoder stream, header block) and either
//! commits a whole representation or reports which buffer was too small
//! without touching any state.
//!
//! Per field the choice of representation is a fixed program selected by
//! five facts: whether a table match exists, in which table, whether the
//! value matched too, whether inserting is allowed, and whether referencing
//! unacknowledged entries (risking head-of-line blocking) is allowed.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::enc_table::{EncTable, Evictable};
use crate::error::{Error, Result};
use crate::field::entry_cost;
use crate::huffman;
use crate::integer::{self, IntDecoder, IntStatus};
use crate::static_table;
use crate::{MAX_ABS_ID, MAX_DYN_TABLE_SIZE, MAX_RISKED_STREAMS_LIMIT};

/// Writes a length-prefixed string after the pattern bits in `dst[0]`,
/// Huffman-coded when that is shorter. The `H` flag lands at
/// `1 << prefix_bits`; bits above it are preserved.
fn enc_str(dst: &mut [u8], prefix_bits: u8, s: &[u8]) -> Option<usize> {
    if dst.is_empty() {
        return None;
    }
    let clear = !(((1u16 << (prefix_bits + 1)) - 1) as u8);
    let huff_len = huffman::encoded_size(s);

    if huff_len < s.len() {
        let len_size = integer::val2len(huff_len as u64, prefix_bits);
        if len_size + huff_len > dst.len() {
            return None;
        }
        dst[0] = (dst[0] & clear) | (1 << prefix_bits);
        let _ = integer::encode(dst, huff_len as u64, prefix_bits);
        huffman::encode(s, &mut dst[len_size..]);
        Some(len_size + huff_len)
    } else {
        let len_size = integer::val2len(s.len() as u64, prefix_bits);
        if len_size + s.len() > dst.len() {
            return None;
        }
        dst[0] &= clear;
        let _ = integer::encode(dst, s.len() as u64, prefix_bits);
        dst[len_size..len_size + s.len()].copy_from_slice(s);
        Some(len_size + s.len())
    }
}

/// Where a search hit, if anywhere.
#[derive(Debug, Clone, Copy)]
enum Found {
    None,
    Static { index: u64, value_matched: bool },
    Dynamic { abs_id: u64, value_matched: bool },
}

#[derive(Clone, Copy, PartialEq)]
enum EncAction {
    None,
    InsNameRef,
    InsLit,
}

#[derive(Clone, Copy, PartialEq)]
enum HeaAction {
    IndexedNew,
    IndexedStat,
    IndexedDyn,
    Lit,
    LitWithNameStat,
    LitWithNameDyn,
    LitWithNameNew,
}

#[derive(Clone, Copy)]
struct Program {
    enc: EncAction,
    hea: HeaAction,
    insert: bool,
    ref_found: bool,
    ref_new: bool,
}

const fn prog(
    enc: EncAction,
    hea: HeaAction,
    insert: bool,
    ref_found: bool,
    ref_new: bool,
) -> Program {
    Program { enc, hea, insert, ref_found, ref_new }
}

/// The encode decision matrix. Each row is
/// (found?, table, value matched?, may index?, may risk?) → program.
fn select_program(found: Found, index: bool, risk: bool) -> Program {
    use EncAction as E;
    use HeaAction as H;
    match (found, index, risk) {
        (Found::None, false, _) => prog(E::None, H::Lit, false, false, false),
        (Found::None, true, false) => prog(E::InsLit, H::Lit, true, false, false),
        (Found::None, true, true) => prog(E::InsLit, H::IndexedNew, true, false, true),
        (Found::Static { value_matched: false, .. }, false, _) => {
            prog(E::None, H::LitWithNameStat, false, false, false)
        }
        (Found::Static { value_matched: false, .. }, true, false) => {
            prog(E::InsNameRef, H::LitWithNameStat, true, false, false)
        }
        (Found::Static { value_matched: false, .. }, true, true) => {
            prog(E::InsNameRef, H::IndexedNew, true, false, true)
        }
        (Found::Static { value_matched: true, .. }, _, _) => {
            prog(E::None, H::IndexedStat, false, false, false)
        }
        (Found::Dynamic { value_matched: false, .. }, false, _) => {
            prog(E::None, H::LitWithNameDyn, false, true, false)
        }
        (Found::Dynamic { value_matched: false, .. }, true, _) => {
            prog(E::InsNameRef, H::LitWithNameNew, true, true, true)
        }
        (Found::Dynamic { value_matched: true, .. }, _, _) => {
            prog(E::None, H::IndexedDyn, false, true, false)
        }
    }
}

/// State for one header block being encoded.
struct CurrentHeader {
    stream_id: u64,
    seqno: u32,
    /// Insert count when the block began; every relative reference in the
    /// block is computed against it.
    base: u64,
    n_risked: u64,
    others_at_risk: bool,
    min_ref: u64,
    max_ref: u64,
    use_dynamic_table: bool,
    /// Entries at or below this ID are earmarked for eviction and must not
    /// be referenced by this block.
    search_cutoff: u64,
    refs: SmallVec<[u64; 8]>,
}

/// A block whose acknowledgment is outstanding.
struct HeaderInfo {
    stream_id: u64,
    seqno: u32,
    max_ref: u64,
    at_risk: bool,
    refs: SmallVec<[u64; 8]>,
}

#[derive(Clone, Copy)]
enum DecInst {
    HeaderAck,
    InsertCountIncrement,
    StreamCancel,
}

/// Resumable decoder-stream parse state.
struct DecStreamState {
    inst: Option<DecInst>,
    int: IntDecoder,
}

pub struct Encoder {
    table: EncTable,
    /// Modulus base for the wire Required Insert Count; fixed by the
    /// initial table size the peer advertised.
    max_entries: u64,
    max_risked_streams: usize,
    max_acked_id: u64,
    streams_at_risk: usize,
    hinfos: Vec<HeaderInfo>,
    cur: Option<CurrentHeader>,
    dec_stream: DecStreamState,
}

impl Encoder {
    /// Creates an encoder for a connection whose decoder advertised
    /// `max_table_size` and `max_risked_streams`.
    pub fn new(max_table_size: usize, max_risked_streams: usize) -> Result<Self> {
        if max_table_size > MAX_DYN_TABLE_SIZE {
            return Err(Error::InvalidArgument("max_table_size above limit"));
        }
        if max_risked_streams > MAX_RISKED_STREAMS_LIMIT {
            return Err(Error::InvalidArgument("max_risked_streams above limit"));
        }
        Ok(Self {
            table: EncTable::new(max_table_size),
            max_entries: (max_table_size / 32) as u64,
            max_risked_streams,
            max_acked_id: 0,
            streams_at_risk: 0,
            hinfos: Vec::new(),
            cur: None,
            dec_stream: DecStreamState { inst: None, int: IntDecoder::new() },
        })
    }

    /// Shrinks (or restores) the dynamic table capacity, evicting to fit.
    /// Signalling the change to the peer is the caller's affair.
    pub fn set_max_capacity(&mut self, capacity: usize) {
        self.table.set_capacity(capacity);
    }

    pub fn ins_count(&self) -> u64 {
        self.table.ins_count()
    }

    pub fn dyn_table_size(&self) -> usize {
        self.table.size()
    }

    pub fn max_acked_id(&self) -> u64 {
        self.max_acked_id
    }

    pub fn streams_at_risk(&self) -> usize {
        self.streams_at_risk
    }

    /// Opens a header block. Only one may be open at a time; `seqno` orders
    /// blocks within one stream.
    pub fn start_header(&mut self, stream_id: u64, seqno: u32) -> Result<()> {
        if self.cur.is_some() {
            return Err(Error::HeaderBlockInProgress);
        }
        let others_at_risk = seqno > 0
            && self
                .hinfos
                .iter()
                .any(|h| h.stream_id == stream_id && h.at_risk);
        self.cur = Some(CurrentHeader {
            stream_id,
            seqno,
            base: self.table.ins_count(),
            n_risked: 0,
            others_at_risk,
            min_ref: 0,
            max_ref: 0,
            use_dynamic_table: true,
            search_cutoff: 0,
            refs: SmallVec::new(),
        });
        Ok(())
    }

    /// Smallest absolute ID any in-flight block (including the open one)
    /// references; entries below it are eviction candidates.
    fn min_referenced(&self) -> u64 {
        let mut min = u64::MAX;
        if let Some(cur) = &self.cur {
            if cur.min_ref != 0 {
                min = cur.min_ref;
            }
        }
        for h in &self.hinfos {
            for &id in &h.refs {
                if id < min {
                    min = id;
                }
            }
        }
        min
    }

    fn find(&self, name: &[u8], value: &[u8], risk: bool, cutoff: u64) -> Found {
        let st = static_table::find(name, value);
        let cur = self.cur.as_ref().expect("open header block");
        if !cur.use_dynamic_table {
            return match st {
                Some(m) => Found::Static { index: m.index, value_matched: m.value_matched },
                None => Found::None,
            };
        }

        if let Some(m) = st {
            if m.value_matched {
                return Found::Static { index: m.index, value_matched: true };
            }
        }
        if let Some(id) =
            self.table
                .search_nameval(name, value, risk, self.max_acked_id, cutoff)
        {
            return Found::Dynamic { abs_id: id, value_matched: true };
        }
        if let Some(m) = st {
            return Found::Static { index: m.index, value_matched: false };
        }
        if let Some(id) = self.table.search_name(name, risk, self.max_acked_id, cutoff) {
            return Found::Dynamic { abs_id: id, value_matched: false };
        }
        Found::None
    }

    /// Encodes one field. On success returns the number of bytes written to
    /// the encoder-stream and header-block buffers. `no_index` keeps the
    /// field out of the dynamic table and sets the never-index bit on
    /// literals.
    ///
    /// Nothing is emitted or mutated when a buffer is too small; retry the
    /// same field with more room.
    pub fn encode(
        &mut self,
        enc_buf: &mut [u8],
        hea_buf: &mut [u8],
        name: &[u8],
        value: &[u8],
        no_index: bool,
    ) -> Result<(usize, usize)> {
        if self.cur.is_none() {
            return Err(Error::NoHeaderBlock);
        }
        // Every representation needs at least one header byte.
        if hea_buf.is_empty() {
            return Err(Error::HeaderBufferFull);
        }

        let min_referenced = self.min_referenced();
        let cur = self.cur.as_mut().expect("checked above");

        let mut index = !no_index
            && cur.use_dynamic_table
            && self.table.ins_count() < MAX_ABS_ID;
        if index {
            match self
                .table
                .evictable_for(entry_cost(name.len(), value.len()), min_referenced)
            {
                Evictable::No => index = false,
                Evictable::Fits => {}
                Evictable::AfterEvicting(id) => cur.search_cutoff = id,
            }
        }

        let risk = cur.n_risked > 0
            || cur.others_at_risk
            || self.streams_at_risk < self.max_risked_streams;

        let cutoff = cur.search_cutoff;
        let found = self.find(name, value, risk, cutoff);
        let prog = select_program(found, index, risk);
        let cur = self.cur.as_mut().expect("checked above");

        // Encoder-stream emission.
        let enc_sz = match prog.enc {
            EncAction::None => 0,
            EncAction::InsNameRef => {
                if enc_buf.is_empty() {
                    return Err(Error::EncoderBufferFull);
                }
                let (pattern, id) = match found {
                    Found::Static { index, .. } => (0x80 | 0x40, index),
                    Found::Dynamic { abs_id, .. } => (0x80, self.table.ins_count() - abs_id),
                    Found::None => unreachable!("name reference without a match"),
                };
                enc_buf[0] = pattern;
                let mut n = integer::encode(enc_buf, id, 6).ok_or(Error::EncoderBufferFull)?;
                n += enc_str(&mut enc_buf[n..], 7, value).ok_or(Error::EncoderBufferFull)?;
                n
            }
            EncAction::InsLit => {
                if enc_buf.is_empty() {
                    return Err(Error::EncoderBufferFull);
                }
                enc_buf[0] = 0x40;
                let mut n = enc_str(enc_buf, 5, name).ok_or(Error::EncoderBufferFull)?;
                n += enc_str(&mut enc_buf[n..], 7, value).ok_or(Error::EncoderBufferFull)?;
                n
            }
        };

        // Header-block emission.
        let hea_sz = match prog.hea {
            HeaAction::IndexedStat => {
                let Found::Static { index, .. } = found else { unreachable!() };
                hea_buf[0] = 0x80 | 0x40;
                integer::encode(hea_buf, index, 6).ok_or(Error::HeaderBufferFull)?
            }
            HeaAction::IndexedNew | HeaAction::IndexedDyn => {
                let id = match prog.hea {
                    HeaAction::IndexedNew => self.table.ins_count() + 1,
                    _ => match found {
                        Found::Dynamic { abs_id, .. } => abs_id,
                        _ => unreachable!(),
                    },
                };
                if id > cur.base {
                    // Post-base index.
                    hea_buf[0] = 0x10;
                    integer::encode(hea_buf, id - cur.base - 1, 4)
                        .ok_or(Error::HeaderBufferFull)?
                } else {
                    hea_buf[0] = 0x80;
                    integer::encode(hea_buf, cur.base - id, 6).ok_or(Error::HeaderBufferFull)?
                }
            }
            HeaAction::Lit => {
                hea_buf[0] = 0x20 | ((no_index as u8) << 4);
                let mut n = enc_str(hea_buf, 3, name).ok_or(Error::HeaderBufferFull)?;
                n += enc_str(&mut hea_buf[n..], 7, value).ok_or(Error::HeaderBufferFull)?;
                n
            }
            HeaAction::LitWithNameStat => {
                let Found::Static { index, .. } = found else { unreachable!() };
                hea_buf[0] = 0x40 | ((no_index as u8) << 5) | 0x10;
                let mut n = integer::encode(hea_buf, index, 4).ok_or(Error::HeaderBufferFull)?;
                n += enc_str(&mut hea_buf[n..], 7, value).ok_or(Error::HeaderBufferFull)?;
                n
            }
            HeaAction::LitWithNameDyn | HeaAction::LitWithNameNew => {
                let id = match prog.hea {
                    HeaAction::LitWithNameNew => self.table.ins_count() + 1,
                    _ => match found {
                        Found::Dynamic { abs_id, .. } => abs_id,
                        _ => unreachable!(),
                    },
                };
                let mut n = if id > cur.base {
                    // Post-base name reference.
                    hea_buf[0] = (no_index as u8) << 3;
                    integer::encode(hea_buf, id - cur.base - 1, 3)
                        .ok_or(Error::HeaderBufferFull)?
                } else {
                    hea_buf[0] = 0x40 | ((no_index as u8) << 5);
                    integer::encode(hea_buf, cur.base - id, 4).ok_or(Error::HeaderBufferFull)?
                };
                n += enc_str(&mut hea_buf[n..], 7, value).ok_or(Error::HeaderBufferFull)?;
                n
            }
        };

        // All emission succeeded; now commit table and reference state.
        if prog.insert {
            let abs_id = self.table.push(name, value);
            trace!(abs_id, stream_id = cur.stream_id, "inserted while encoding");
            if prog.ref_new {
                self.table.inc_ref(abs_id);
                cur.refs.push(abs_id);
                debug_assert!(abs_id > cur.max_ref);
                cur.max_ref = abs_id;
                cur.n_risked += 1;
                if cur.min_ref == 0 || cur.min_ref > abs_id {
                    cur.min_ref = abs_id;
                }
            }
        }

        if prog.ref_found {
            let Found::Dynamic { abs_id, .. } = found else {
                unreachable!("found-reference flag implies a dynamic match")
            };
            self.table.inc_ref(abs_id);
            cur.refs.push(abs_id);
            cur.n_risked += (abs_id > self.max_acked_id) as u64;
            if cur.min_ref == 0 || cur.min_ref > abs_id {
                cur.min_ref = abs_id;
            }
            if cur.max_ref < abs_id {
                cur.max_ref = abs_id;
            }
        }

        Ok((enc_sz, hea_sz))
    }

    /// Closes the block and writes its prefix: the Required Insert Count
    /// (modulo-encoded) and the signed Base delta, or the two-byte zero
    /// prefix when nothing dynamic was referenced. Returns the number of
    /// bytes written; on `HeaderBufferFull` the block stays open.
    pub fn end_header(&mut self, buf: &mut [u8]) -> Result<usize> {
        let cur = self.cur.as_ref().ok_or(Error::NoHeaderBlock)?;

        let written = if cur.max_ref != 0 {
            debug_assert!(self.max_entries > 0);
            let encoded_ric = cur.max_ref % (2 * self.max_entries) + 1;
            if buf.is_empty() {
                return Err(Error::HeaderBufferFull);
            }
            buf[0] = 0;
            let mut n =
                integer::encode(buf, encoded_ric, 8).ok_or(Error::HeaderBufferFull)?;
            if n >= buf.len() {
                return Err(Error::HeaderBufferFull);
            }
            let (sign, delta) = if cur.base >= cur.max_ref {
                (0u8, cur.base - cur.max_ref)
            } else {
                (1u8, cur.max_ref - cur.base - 1)
            };
            buf[n] = sign << 7;
            n += integer::encode(&mut buf[n..], delta, 7).ok_or(Error::HeaderBufferFull)?;
            n
        } else {
            if buf.len() < 2 {
                return Err(Error::HeaderBufferFull);
            }
            buf[0] = 0;
            buf[1] = 0;
            2
        };

        let cur = self.cur.take().expect("checked above");
        if cur.max_ref != 0 {
            debug!(
                stream_id = cur.stream_id,
                seqno = cur.seqno,
                max_ref = cur.max_ref,
                at_risk = cur.n_risked > 0,
                "header block closed"
            );
            self.hinfos.push(HeaderInfo {
                stream_id: cur.stream_id,
                seqno: cur.seqno,
                max_ref: cur.max_ref,
                at_risk: cur.max_ref > self.max_acked_id,
                refs: cur.refs,
            });
            self.refresh_risk();
        }
        Ok(written)
    }

    /// Re-derives per-block risk flags and the at-risk stream count after
    /// `max_acked_id` moved or blocks were added/removed.
    fn refresh_risk(&mut self) {
        let mut streams: SmallVec<[u64; 8]> = SmallVec::new();
        for h in &mut self.hinfos {
            h.at_risk = h.max_ref > self.max_acked_id;
            if h.at_risk && !streams.contains(&h.stream_id) {
                streams.push(h.stream_id);
            }
        }
        self.streams_at_risk = streams.len();
    }

    /// Consumes decoder-stream bytes: header acknowledgments, insert count
    /// increments and stream cancellations. Resumable at any byte.
    pub fn decoder_stream_in(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let inst = match self.dec_stream.inst {
                Some(inst) => inst,
                None => {
                    let b = buf[0];
                    let inst = if b & 0x80 != 0 {
                        DecInst::HeaderAck
                    } else if b & 0xc0 == 0x40 {
                        DecInst::StreamCancel
                    } else {
                        DecInst::InsertCountIncrement
                    };
                    self.dec_stream.inst = Some(inst);
                    self.dec_stream.int.reset();
                    inst
                }
            };
            let prefix_bits = match inst {
                DecInst::HeaderAck => 7,
                _ => 6,
            };
            let (st, used) = self.dec_stream.int.decode(buf, prefix_bits)?;
            buf = &buf[used..];
            let IntStatus::Done(value) = st else { return Ok(()) };
            self.dec_stream.inst = None;
            match inst {
                DecInst::HeaderAck => self.process_header_ack(value)?,
                DecInst::InsertCountIncrement => self.process_insert_count_increment(value)?,
                DecInst::StreamCancel => self.process_stream_cancel(value),
            }
        }
        Ok(())
    }

    /// Acknowledges the oldest pending block on `stream_id`: raises the
    /// known received count to its largest reference and releases its
    /// entry references.
    fn process_header_ack(&mut self, stream_id: u64) -> Result<()> {
        let idx = self
            .hinfos
            .iter()
            .position(|h| h.stream_id == stream_id)
            .ok_or(Error::DecoderStreamError("acknowledgment for unknown block"))?;
        let h = self.hinfos.remove(idx);
        debug!(stream_id, seqno = h.seqno, max_ref = h.max_ref, "header block acknowledged");
        if h.max_ref > self.max_acked_id {
            self.max_acked_id = h.max_ref;
        }
        for &id in &h.refs {
            self.table.dec_ref(id);
        }
        self.refresh_risk();
        Ok(())
    }

    /// The decoder has processed `increment` more insertions.
    fn process_insert_count_increment(&mut self, increment: u64) -> Result<()> {
        if increment == 0 {
            return Err(Error::DecoderStreamError("zero insert count increment"));
        }
        let new = self
            .max_acked_id
            .checked_add(increment)
            .filter(|&n| n <= self.table.ins_count())
            .ok_or(Error::DecoderStreamError("insert count increment too large"))?;
        self.max_acked_id = new;
        self.refresh_risk();
        Ok(())
    }

    /// The peer cancelled `stream_id`: every pending block on it releases
    /// its references and leaves ack tracking.
    fn process_stream_cancel(&mut self, stream_id: u64) {
        let mut i = 0;
        while i < self.hinfos.len() {
            if self.hinfos[i].stream_id == stream_id {
                let h = self.hinfos.remove(i);
                debug!(stream_id, seqno = h.seqno, "pending block cancelled");
                for &id in &h.refs {
                    self.table.dec_ref(id);
                }
            } else {
                i += 1;
            }
        }
        self.refresh_risk();
    }

    #[cfg(test)]
    fn entry_ref_count(&self, abs_id: u64) -> u32 {
        self.table.get(abs_id).map(|e| e.ref_count).unwrap_or(0)
    }
}
