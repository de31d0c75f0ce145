//! Incremental parser for one header block.
//!
//! A block has two phases. The prefix carries the Required Insert Count
//! (modulo-encoded) and the signed Base; as soon as the RIC is known the
//! block either proceeds or reports itself blocked, leaving the rest of its
//! bytes in the transport. The data phase is a run of field line
//! representations, each resumable at any byte.

use bytes::Bytes;

use crate::dec_table::DecTable;
use crate::enc_stream::StringReader;
use crate::error::{Error, Result};
use crate::field::{Header, HeaderList};
use crate::integer::{IntDecoder, IntStatus, UINT64_ENC_SZ};
use crate::static_table;

/// Why parsing stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// All representations parsed; the header list is complete.
    Done,
    /// The block needs insertions the table has not seen.
    Blocked,
    /// More block bytes are needed.
    Need,
}

enum Phase {
    PrefixRic { int: IntDecoder },
    PrefixBase { sign: Option<bool>, int: IntDecoder },
    Data(DataState),
}

enum DataState {
    NextInst,
    IhfIdx { is_static: bool, int: IntDecoder },
    IpbiIdx { int: IntDecoder },
    LfinrIdx { is_static: bool, never: bool, int: IntDecoder },
    LfonrNameLen { never: bool, is_huffman: bool, int: IntDecoder },
    LfonrName { never: bool, name: StringReader },
    LfonrValLenBegin { never: bool, name: Vec<u8> },
    LfonrValLen { never: bool, name: Vec<u8>, is_huffman: bool, int: IntDecoder },
    LfonrVal { never: bool, name: Vec<u8>, value: StringReader },
    LfpbnrIdx { never: bool, int: IntDecoder },
    // Shared tail for both name-reference literal forms: the name is
    // resolved, the value string follows.
    RefValLenBegin { never: bool, name: Bytes },
    RefValLen { never: bool, name: Bytes, is_huffman: bool, int: IntDecoder },
    RefVal { never: bool, name: Bytes, value: StringReader },
}

pub(crate) struct HeaderBlockCtx {
    pub stream: u64,
    /// Bytes of the block not yet handed to the parser.
    pub size_left: usize,
    pub largest_ref: u64,
    pub base: u64,
    pub have_largest_ref: bool,
    /// Set while the block sits in the blocked-streams heap.
    pub blocked: bool,
    lr_nread: usize,
    headers: Vec<Header>,
    phase: Phase,
}

impl HeaderBlockCtx {
    pub fn new(stream: u64, block_size: usize) -> Self {
        Self {
            stream,
            size_left: block_size,
            largest_ref: 0,
            base: 0,
            have_largest_ref: false,
            blocked: false,
            lr_nread: 0,
            headers: Vec::new(),
            phase: Phase::PrefixRic { int: IntDecoder::new() },
        }
    }

    /// How much the driver may read from the transport right now. The
    /// Required Insert Count is taken a byte at a time: if it declares the
    /// block blocked, every remaining byte must stay buffered in the
    /// transport.
    pub fn max_to_read(&self) -> usize {
        if self.have_largest_ref {
            self.size_left
        } else {
            1
        }
    }

    pub fn take_headers(&mut self) -> HeaderList {
        HeaderList { headers: std::mem::take(&mut self.headers) }
    }

    /// RFC 9204 Section 4.5.1.1 Required Insert Count reconstruction.
    fn decode_ric(&self, encoded: u64, table: &DecTable) -> Result<u64> {
        if encoded == 0 {
            return Ok(0);
        }
        let full_range = 2 * table.max_entries();
        if full_range == 0 || encoded > full_range {
            return Err(Error::InvalidRequiredInsertCount);
        }
        let max_value = table.ins_count() + table.max_entries();
        let max_wrapped = (max_value / full_range) * full_range;
        let mut ric = max_wrapped + encoded - 1;
        if ric > max_value {
            if ric <= full_range {
                return Err(Error::InvalidRequiredInsertCount);
            }
            ric -= full_range;
        }
        if ric == 0 {
            return Err(Error::InvalidRequiredInsertCount);
        }
        Ok(ric)
    }

    /// Feeds block bytes. The caller has already accounted them against
    /// `size_left`. Consumes the whole buffer unless it suspends or fails.
    pub fn parse(&mut self, mut buf: &[u8], table: &DecTable) -> Result<ReadStatus> {
        loop {
            match &mut self.phase {
                Phase::PrefixRic { int } => {
                    let (st, used) = int.decode(buf, 8)?;
                    buf = &buf[used..];
                    match st {
                        IntStatus::Done(encoded) => {
                            self.largest_ref = self.decode_ric(encoded, table)?;
                            self.have_largest_ref = true;
                            self.phase = Phase::PrefixBase { sign: None, int: IntDecoder::new() };
                            if self.largest_ref > table.ins_count() {
                                return Ok(ReadStatus::Blocked);
                            }
                        }
                        IntStatus::Need => {
                            self.lr_nread += used;
                            if self.lr_nread >= UINT64_ENC_SZ as usize {
                                return Err(Error::IntegerOverflow);
                            }
                            break;
                        }
                    }
                }
                Phase::PrefixBase { sign, int } => {
                    if sign.is_none() {
                        let Some(&b) = buf.first() else { break };
                        *sign = Some(b & 0x80 != 0);
                    }
                    let (st, used) = int.decode(buf, 7)?;
                    buf = &buf[used..];
                    let IntStatus::Done(delta) = st else { break };
                    self.base = if sign.expect("sign read") {
                        if delta >= self.largest_ref {
                            return Err(Error::DecompressionFailed("base underflow"));
                        }
                        self.largest_ref - delta - 1
                    } else {
                        self.largest_ref + delta
                    };
                    self.phase = Phase::Data(DataState::NextInst);
                }
                Phase::Data(state) => match state {
                    DataState::NextInst => {
                        let Some(&b) = buf.first() else { break };
                        *state = if b & 0x80 != 0 {
                            DataState::IhfIdx { is_static: b & 0x40 != 0, int: IntDecoder::new() }
                        } else if b & 0x40 != 0 {
                            DataState::LfinrIdx {
                                is_static: b & 0x10 != 0,
                                never: b & 0x20 != 0,
                                int: IntDecoder::new(),
                            }
                        } else if b & 0x20 != 0 {
                            DataState::LfonrNameLen {
                                never: b & 0x10 != 0,
                                is_huffman: b & 0x08 != 0,
                                int: IntDecoder::new(),
                            }
                        } else if b & 0x10 != 0 {
                            DataState::IpbiIdx { int: IntDecoder::new() }
                        } else {
                            DataState::LfpbnrIdx { never: b & 0x08 != 0, int: IntDecoder::new() }
                        };
                    }
                    DataState::IhfIdx { is_static, int } => {
                        let (st, used) = int.decode(buf, 6)?;
                        buf = &buf[used..];
                        let IntStatus::Done(idx) = st else { break };
                        let header = if *is_static {
                            let e = static_table::get(idx)
                                .ok_or(Error::InvalidStaticIndex(idx))?;
                            Header {
                                name: Bytes::from_static(e.name),
                                value: Bytes::from_static(e.value),
                                never_index: false,
                            }
                        } else {
                            let abs = rel_to_abs(self.base, idx)?;
                            if abs > self.largest_ref {
                                return Err(Error::InvalidDynamicIndex(idx));
                            }
                            let e = table
                                .get_abs(abs)
                                .ok_or(Error::InvalidDynamicIndex(idx))?;
                            Header {
                                name: e.name.clone(),
                                value: e.value.clone(),
                                never_index: false,
                            }
                        };
                        self.headers.push(header);
                        self.phase = Phase::Data(DataState::NextInst);
                    }
                    DataState::IpbiIdx { int } => {
                        let (st, used) = int.decode(buf, 4)?;
                        buf = &buf[used..];
                        let IntStatus::Done(idx) = st else { break };
                        let abs = post_base_to_abs(self.base, self.largest_ref, idx)?;
                        let e = table
                            .get_abs(abs)
                            .ok_or(Error::InvalidDynamicIndex(idx))?;
                        self.headers.push(Header {
                            name: e.name.clone(),
                            value: e.value.clone(),
                            never_index: false,
                        });
                        self.phase = Phase::Data(DataState::NextInst);
                    }
                    DataState::LfinrIdx { is_static, never, int } => {
                        let (st, used) = int.decode(buf, 4)?;
                        buf = &buf[used..];
                        let IntStatus::Done(idx) = st else { break };
                        let name = if *is_static {
                            let e = static_table::get(idx)
                                .ok_or(Error::InvalidStaticIndex(idx))?;
                            Bytes::from_static(e.name)
                        } else {
                            let abs = rel_to_abs(self.base, idx)?;
                            table
                                .get_abs(abs)
                                .ok_or(Error::InvalidDynamicIndex(idx))?
                                .name
                                .clone()
                        };
                        self.phase =
                            Phase::Data(DataState::RefValLenBegin { never: *never, name });
                    }
                    DataState::LfpbnrIdx { never, int } => {
                        let (st, used) = int.decode(buf, 3)?;
                        buf = &buf[used..];
                        let IntStatus::Done(idx) = st else { break };
                        let abs = post_base_to_abs(self.base, self.largest_ref, idx)?;
                        let name = table
                            .get_abs(abs)
                            .ok_or(Error::InvalidDynamicIndex(idx))?
                            .name
                            .clone();
                        self.phase =
                            Phase::Data(DataState::RefValLenBegin { never: *never, name });
                    }
                    DataState::RefValLenBegin { never, name } => {
                        let Some(&b) = buf.first() else { break };
                        *state = DataState::RefValLen {
                            never: *never,
                            name: std::mem::take(name),
                            is_huffman: b & 0x80 != 0,
                            int: IntDecoder::new(),
                        };
                    }
                    DataState::RefValLen { never, name, is_huffman, int } => {
                        let (st, used) = int.decode(buf, 7)?;
                        buf = &buf[used..];
                        let IntStatus::Done(len) = st else { break };
                        let len = len as usize;
                        *state = DataState::RefVal {
                            never: *never,
                            name: std::mem::take(name),
                            value: StringReader::new(*is_huffman, len, len + len / 2),
                        };
                    }
                    DataState::RefVal { value, .. } => {
                        let (used, done) = value.feed(buf)?;
                        buf = &buf[used..];
                        if !done {
                            break;
                        }
                        let Phase::Data(DataState::RefVal { never, name, value }) =
                            std::mem::replace(&mut self.phase, Phase::Data(DataState::NextInst))
                        else {
                            unreachable!()
                        };
                        self.headers.push(Header {
                            name,
                            value: value.finish().into(),
                            never_index: never,
                        });
                    }
                    DataState::LfonrNameLen { never, is_huffman, int } => {
                        let (st, used) = int.decode(buf, 3)?;
                        buf = &buf[used..];
                        let IntStatus::Done(len) = st else { break };
                        let len = len as usize;
                        *state = DataState::LfonrName {
                            never: *never,
                            name: StringReader::new(*is_huffman, len, len * 2),
                        };
                    }
                    DataState::LfonrName { name, .. } => {
                        let (used, done) = name.feed(buf)?;
                        buf = &buf[used..];
                        if !done {
                            break;
                        }
                        let Phase::Data(DataState::LfonrName { never, name }) =
                            std::mem::replace(&mut self.phase, Phase::Data(DataState::NextInst))
                        else {
                            unreachable!()
                        };
                        self.phase = Phase::Data(DataState::LfonrValLenBegin {
                            never,
                            name: name.finish(),
                        });
                    }
                    DataState::LfonrValLenBegin { never, name } => {
                        let Some(&b) = buf.first() else { break };
                        *state = DataState::LfonrValLen {
                            never: *never,
                            name: std::mem::take(name),
                            is_huffman: b & 0x80 != 0,
                            int: IntDecoder::new(),
                        };
                    }
                    DataState::LfonrValLen { never, name, is_huffman, int } => {
                        let (st, used) = int.decode(buf, 7)?;
                        buf = &buf[used..];
                        let IntStatus::Done(len) = st else { break };
                        let len = len as usize;
                        *state = DataState::LfonrVal {
                            never: *never,
                            name: std::mem::take(name),
                            value: StringReader::new(*is_huffman, len, len + len / 2),
                        };
                    }
                    DataState::LfonrVal { value, .. } => {
                        let (used, done) = value.feed(buf)?;
                        buf = &buf[used..];
                        if !done {
                            break;
                        }
                        let Phase::Data(DataState::LfonrVal { never, name, value }) =
                            std::mem::replace(&mut self.phase, Phase::Data(DataState::NextInst))
                        else {
                            unreachable!()
                        };
                        self.headers.push(Header {
                            name: name.into(),
                            value: value.finish().into(),
                            never_index: never,
                        });
                    }
                },
            }
        }

        match &self.phase {
            Phase::Data(DataState::NextInst) if self.size_left == 0 => Ok(ReadStatus::Done),
            _ if self.size_left == 0 => Err(Error::UnexpectedEof),
            _ => Ok(ReadStatus::Need),
        }
    }
}

/// Resolves a pre-base relative reference to an absolute ID.
fn rel_to_abs(base: u64, rel: u64) -> Result<u64> {
    if rel >= base {
        return Err(Error::InvalidDynamicIndex(rel));
    }
    Ok(base - rel)
}

/// Resolves a post-base reference, bounded by the Required Insert Count.
fn post_base_to_abs(base: u64, largest_ref: u64, idx: u64) -> Result<u64> {
    let abs = base + idx + 1;
    if abs > largest_ref {
        return Err(Error::InvalidDynamicIndex(idx));
    }
    Ok(abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec_table::DecEntry;
    use crate::integer;

    fn feed_whole(ctx: &mut HeaderBlockCtx, wire: &[u8], table: &DecTable) -> Result<ReadStatus> {
        ctx.size_left -= wire.len();
        ctx.parse(wire, table)
    }

    #[test]
    fn test_static_only_block() {
        let table = DecTable::new(0);
        // Zero prefix, then indexed static 2, 4, 7.
        let wire = [0x00, 0x00, 0xc2, 0xc4, 0xc7];
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        let list = ctx.take_headers();
        let got: Vec<_> = list
            .iter()
            .map(|h| (h.name.as_ref().to_vec(), h.value.as_ref().to_vec()))
            .collect();
        assert_eq!(
            got,
            vec![
                (b":method".to_vec(), b"GET".to_vec()),
                (b":path".to_vec(), b"/".to_vec()),
                (b":scheme".to_vec(), b"https".to_vec()),
            ]
        );
    }

    #[test]
    fn test_literal_with_literal_name() {
        let table = DecTable::new(0);
        // 001N H=0, name len 4 "test", value len 5 "value".
        let mut wire = vec![0x00, 0x00, 0x24];
        wire.extend_from_slice(b"test");
        wire.push(0x05);
        wire.extend_from_slice(b"value");
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        let list = ctx.take_headers();
        assert_eq!(&list.headers[0].name[..], b"test");
        assert_eq!(&list.headers[0].value[..], b"value");
        assert!(!list.headers[0].never_index);
    }

    #[test]
    fn test_never_index_bit() {
        let table = DecTable::new(0);
        // 0x20 | 0x10 (never) | len 3, "key", plain value "v".
        let mut wire = vec![0x00, 0x00, 0x33];
        wire.extend_from_slice(b"key");
        wire.push(0x01);
        wire.push(b'v');
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        assert!(ctx.take_headers().headers[0].never_index);
    }

    fn table_with(entries: &[(&str, &str)], cap: usize) -> DecTable {
        let mut t = DecTable::new(cap);
        for (n, v) in entries {
            t.push(DecEntry {
                name: Bytes::copy_from_slice(n.as_bytes()),
                value: Bytes::copy_from_slice(v.as_bytes()),
            });
        }
        t
    }

    /// Wire prefix for a raw `ric` and `base` given the table's bound.
    fn prefix(ric: u64, base: u64, table: &DecTable) -> Vec<u8> {
        let mut out = vec![0u8; 20];
        let encoded = if ric == 0 { 0 } else { ric % (2 * table.max_entries()) + 1 };
        let mut n = integer::encode(&mut out, encoded, 8).unwrap();
        if base >= ric {
            let used = integer::encode(&mut out[n..], base - ric, 7).unwrap();
            n += used;
        } else {
            out[n] = 0x80;
            let used = integer::encode(&mut out[n..], ric - base - 1, 7).unwrap();
            n += used;
        }
        out.truncate(n);
        out
    }

    #[test]
    fn test_indexed_dynamic_pre_base() {
        let table = table_with(&[("x-a", "1"), ("x-b", "2")], 4096);
        // base = 2, reference abs 2 (rel 0) and abs 1 (rel 1).
        let mut wire = prefix(2, 2, &table);
        wire.push(0x80);
        wire.push(0x81);
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        let list = ctx.take_headers();
        assert_eq!(&list.headers[0].name[..], b"x-b");
        assert_eq!(&list.headers[1].name[..], b"x-a");
    }

    #[test]
    fn test_indexed_post_base() {
        let table = table_with(&[("x-a", "1"), ("x-b", "2")], 4096);
        // base = 1; abs 2 is post-base index 0.
        let mut wire = prefix(2, 1, &table);
        wire.push(0x10);
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        assert_eq!(&ctx.take_headers().headers[0].name[..], b"x-b");
    }

    #[test]
    fn test_post_base_beyond_ric_rejected() {
        let table = table_with(&[("x-a", "1"), ("x-b", "2")], 4096);
        // RIC = 1 but post-base index 0 with base 1 references abs 2.
        let mut wire = prefix(1, 1, &table);
        wire.push(0x10);
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert!(feed_whole(&mut ctx, &wire, &table).is_err());
    }

    #[test]
    fn test_literal_with_name_refs() {
        let table = table_with(&[("x-a", "1")], 4096);
        let mut wire = prefix(1, 1, &table);
        // Static name ref: 01 N=0 T=1, index 4 (:path), value "/x".
        wire.push(0x50 | 0x04);
        wire.push(0x02);
        wire.extend_from_slice(b"/x");
        // Dynamic name ref: 01 N=0 T=0, rel 0 → abs 1, value "9".
        wire.push(0x40);
        wire.push(0x01);
        wire.push(b'9');
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(feed_whole(&mut ctx, &wire, &table).unwrap(), ReadStatus::Done);
        let list = ctx.take_headers();
        assert_eq!(&list.headers[0].name[..], b":path");
        assert_eq!(&list.headers[0].value[..], b"/x");
        assert_eq!(&list.headers[1].name[..], b"x-a");
        assert_eq!(&list.headers[1].value[..], b"9");
    }

    #[test]
    fn test_blocked_then_resume() {
        let mut table = table_with(&[], 4096);
        // RIC 1 against an empty table: blocked right after the first byte.
        // Base 0, so the reference is post-base index 0.
        let wire = prefix(1, 0, &table);
        let full = [&wire[..], &[0x10u8]].concat();
        let mut ctx = HeaderBlockCtx::new(0, full.len());

        ctx.size_left -= 1;
        assert_eq!(ctx.parse(&full[..1], &table).unwrap(), ReadStatus::Blocked);
        assert!(ctx.have_largest_ref);
        assert_eq!(ctx.largest_ref, 1);

        table.push(DecEntry {
            name: Bytes::from_static(b"x-late"),
            value: Bytes::from_static(b"v"),
        });
        ctx.size_left -= full.len() - 1;
        assert_eq!(ctx.parse(&full[1..], &table).unwrap(), ReadStatus::Done);
        assert_eq!(&ctx.take_headers().headers[0].name[..], b"x-late");
    }

    #[test]
    fn test_truncated_block_is_error() {
        let table = DecTable::new(0);
        // Declares a 4-byte literal name but the block ends first.
        let wire = [0x00, 0x00, 0x24, b't'];
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert_eq!(
            feed_whole(&mut ctx, &wire, &table),
            Err(Error::UnexpectedEof)
        );
    }

    #[test]
    fn test_ric_zero_with_dynamic_ref_rejected() {
        let table = table_with(&[("x-a", "1")], 4096);
        // RIC encoded 0 but a pre-base reference follows: base is 0, any
        // relative index underflows.
        let wire = [0x00, 0x00, 0x80];
        let mut ctx = HeaderBlockCtx::new(0, wire.len());
        assert!(feed_whole(&mut ctx, &wire, &table).is_err());
    }
}
