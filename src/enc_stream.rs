//! Incremental parser for the four encoder-stream instructions.
//!
//! The encoder stream is one unbounded byte stream; instruction boundaries
//! never align with transport reads, so every state carries its own integer
//! and Huffman continuation state plus the entry being assembled. Feeding
//! bytes either consumes all of them (possibly suspending mid-instruction)
//! or fails fatally.

use bytes::Bytes;
use tracing::debug;

use crate::dec_table::{DecEntry, DecTable};
use crate::error::{Error, Result};
use crate::huffman::{HuffStatus, HuffmanDecoder};
use crate::integer::{IntDecoder, IntStatus};
use crate::static_table;

/// One string literal in flight: length-prefixed, Huffman or plain.
#[derive(Debug)]
pub(crate) struct StringReader {
    huffman: Option<HuffmanDecoder>,
    wire_len: usize,
    nread: usize,
    out: Vec<u8>,
    out_len: usize,
}

impl StringReader {
    /// `cap` is the speculative output allocation; Huffman output is larger
    /// than its input, plain output is exactly `wire_len`.
    pub fn new(is_huffman: bool, wire_len: usize, cap: usize) -> Self {
        Self {
            huffman: is_huffman.then(HuffmanDecoder::new),
            wire_len,
            nread: 0,
            out: vec![0; cap.max(wire_len)],
            out_len: 0,
        }
    }

    /// Consumes up to this string's remaining wire bytes from `buf`.
    /// Returns `(consumed, complete)`.
    pub fn feed(&mut self, buf: &[u8]) -> Result<(usize, bool)> {
        let budget = self.wire_len - self.nread;
        let take = budget.min(buf.len());

        match &mut self.huffman {
            Some(huff) => {
                // Whether this call's slice reaches the end of the string;
                // fixed before the loop, the counters move inside it.
                let final_ = self.nread + take == self.wire_len;
                let mut used = 0;
                loop {
                    let r = huff.decode(&buf[used..take], &mut self.out[self.out_len..], final_)?;
                    used += r.n_src;
                    self.nread += r.n_src;
                    self.out_len += r.n_dst;
                    match r.status {
                        HuffStatus::Done => return Ok((used, true)),
                        HuffStatus::EndSrc => return Ok((used, false)),
                        HuffStatus::EndDst => {
                            let grown = (self.out.len() * 2).max(8);
                            self.out.resize(grown, 0);
                        }
                    }
                }
            }
            None => {
                self.out[self.out_len..self.out_len + take].copy_from_slice(&buf[..take]);
                self.out_len += take;
                self.nread += take;
                Ok((take, self.out_len == self.wire_len))
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.truncate(self.out_len);
        self.out
    }
}

enum State {
    NextInst,
    WinrNameIdx { is_static: bool, int: IntDecoder },
    WinrValLenBegin { name: Bytes },
    WinrValLen { name: Bytes, is_huffman: bool, int: IntDecoder },
    WinrValue { name: Bytes, value: StringReader },
    WonrNameLen { is_huffman: bool, int: IntDecoder },
    WonrName { name: StringReader },
    WonrValLenBegin { name: Vec<u8> },
    WonrValLen { name: Vec<u8>, is_huffman: bool, int: IntDecoder },
    WonrValue { name: Vec<u8>, value: StringReader },
    DupIdx { int: IntDecoder },
    TbszVal { int: IntDecoder },
}

pub(crate) struct EncStreamParser {
    state: State,
}

impl EncStreamParser {
    pub fn new() -> Self {
        Self { state: State::NextInst }
    }

    /// Feeds encoder-stream bytes, applying completed instructions to
    /// `table`. Returns the number of entries inserted.
    pub fn feed(&mut self, mut buf: &[u8], table: &mut DecTable) -> Result<u64> {
        let mut inserted = 0;

        loop {
            match &mut self.state {
                State::NextInst => {
                    let Some(&b) = buf.first() else { break };
                    self.state = if b & 0x80 != 0 {
                        State::WinrNameIdx { is_static: b & 0x40 != 0, int: IntDecoder::new() }
                    } else if b & 0x40 != 0 {
                        State::WonrNameLen { is_huffman: b & 0x20 != 0, int: IntDecoder::new() }
                    } else if b & 0x20 != 0 {
                        State::TbszVal { int: IntDecoder::new() }
                    } else {
                        State::DupIdx { int: IntDecoder::new() }
                    };
                }
                State::WinrNameIdx { is_static, int } => {
                    let (st, used) = int.decode(buf, 6)?;
                    buf = &buf[used..];
                    let IntStatus::Done(idx) = st else { break };
                    let name = if *is_static {
                        let e = static_table::get(idx)
                            .ok_or(Error::InvalidStaticIndex(idx))?;
                        Bytes::from_static(e.name)
                    } else {
                        table
                            .get_rel(idx)
                            .ok_or(Error::InvalidDynamicIndex(idx))?
                            .name
                            .clone()
                    };
                    self.state = State::WinrValLenBegin { name };
                }
                State::WinrValLenBegin { name } => {
                    let Some(&b) = buf.first() else { break };
                    self.state = State::WinrValLen {
                        name: std::mem::take(name),
                        is_huffman: b & 0x80 != 0,
                        int: IntDecoder::new(),
                    };
                }
                State::WinrValLen { name, is_huffman, int } => {
                    let (st, used) = int.decode(buf, 7)?;
                    buf = &buf[used..];
                    let IntStatus::Done(len) = st else { break };
                    let len = len as usize;
                    self.state = State::WinrValue {
                        name: std::mem::take(name),
                        value: StringReader::new(*is_huffman, len, len + len / 4),
                    };
                }
                State::WinrValue { value, .. } => {
                    let (used, done) = value.feed(buf)?;
                    buf = &buf[used..];
                    if !done {
                        break;
                    }
                    let State::WinrValue { name, value } =
                        std::mem::replace(&mut self.state, State::NextInst)
                    else {
                        unreachable!()
                    };
                    table.push(DecEntry { name, value: value.finish().into() });
                    inserted += 1;
                }
                State::WonrNameLen { is_huffman, int } => {
                    let (st, used) = int.decode(buf, 5)?;
                    buf = &buf[used..];
                    let IntStatus::Done(len) = st else { break };
                    let len = len as usize;
                    self.state = State::WonrName {
                        name: StringReader::new(*is_huffman, len, len * 2),
                    };
                }
                State::WonrName { name } => {
                    let (used, done) = name.feed(buf)?;
                    buf = &buf[used..];
                    if !done {
                        break;
                    }
                    let State::WonrName { name } =
                        std::mem::replace(&mut self.state, State::NextInst)
                    else {
                        unreachable!()
                    };
                    self.state = State::WonrValLenBegin { name: name.finish() };
                }
                State::WonrValLenBegin { name } => {
                    let Some(&b) = buf.first() else { break };
                    self.state = State::WonrValLen {
                        name: std::mem::take(name),
                        is_huffman: b & 0x80 != 0,
                        int: IntDecoder::new(),
                    };
                }
                State::WonrValLen { name, is_huffman, int } => {
                    let (st, used) = int.decode(buf, 7)?;
                    buf = &buf[used..];
                    let IntStatus::Done(len) = st else { break };
                    let len = len as usize;
                    self.state = State::WonrValue {
                        name: std::mem::take(name),
                        value: StringReader::new(*is_huffman, len, len + len / 4),
                    };
                }
                State::WonrValue { value, .. } => {
                    let (used, done) = value.feed(buf)?;
                    buf = &buf[used..];
                    if !done {
                        break;
                    }
                    let State::WonrValue { name, value } =
                        std::mem::replace(&mut self.state, State::NextInst)
                    else {
                        unreachable!()
                    };
                    table.push(DecEntry { name: name.into(), value: value.finish().into() });
                    inserted += 1;
                }
                State::DupIdx { int } => {
                    let (st, used) = int.decode(buf, 5)?;
                    buf = &buf[used..];
                    let IntStatus::Done(idx) = st else { break };
                    let entry = table
                        .get_rel(idx)
                        .ok_or(Error::InvalidDynamicIndex(idx))?
                        .clone();
                    table.push(entry);
                    inserted += 1;
                    self.state = State::NextInst;
                }
                State::TbszVal { int } => {
                    let (st, used) = int.decode(buf, 5)?;
                    buf = &buf[used..];
                    let IntStatus::Done(cap) = st else { break };
                    debug!(capacity = cap, "set dynamic table capacity");
                    table.set_capacity(cap)?;
                    self.state = State::NextInst;
                }
            }
        }

        Ok(inserted)
    }
}
