//! QPACK decoder.
//!
//! The decoder pulls header-block bytes through the host's read callback
//! rather than being handed whole blocks: a block that turns out to be
//! blocked must leave its remaining bytes in the transport so stream flow
//! control keeps working. Encoder-stream bytes are pushed in as they
//! arrive; each batch that inserts entries wakes every block whose
//! Required Insert Count is now satisfied.

use hashbrown::HashMap;
use tracing::debug;

use crate::blocked::BlockedStreams;
use crate::dec_table::DecTable;
use crate::enc_stream::EncStreamParser;
use crate::error::{Error, Result};
use crate::field::HeaderList;
use crate::header_block::{HeaderBlockCtx, ReadStatus};
use crate::integer;

/// Host-side stream plumbing the decoder drives.
///
/// The decoder never touches sockets; it asks for block bytes, toggles
/// read interest, queues decoder-stream output and hands off finished
/// header lists.
pub trait DecoderHooks {
    /// Copies up to `buf.len()` available bytes of `stream`'s header block
    /// into `buf`. `Ok(0)` means no data is available yet.
    fn read_header_block(&mut self, stream: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Enables or disables read-readiness notification for `stream`.
    fn wantread_header_block(&mut self, stream: u64, enabled: bool);

    /// Queues bytes onto the decoder-to-encoder stream.
    fn write_decoder_stream(&mut self, bytes: &[u8]);

    /// Delivers a decoded block; the list is the receiver's now.
    fn header_block_done(&mut self, stream: u64, headers: HeaderList);
}

pub struct Decoder<H> {
    hooks: H,
    table: DecTable,
    enc_parser: EncStreamParser,
    blocked: BlockedStreams,
    read_ctxs: HashMap<u64, HeaderBlockCtx>,
    scratch: Vec<u8>,
}

impl<H: DecoderHooks> Decoder<H> {
    pub fn new(max_table_size: usize, max_risked_streams: usize, hooks: H) -> Self {
        Self {
            hooks,
            table: DecTable::new(max_table_size),
            enc_parser: EncStreamParser::new(),
            blocked: BlockedStreams::new(max_risked_streams),
            read_ctxs: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn ins_count(&self) -> u64 {
        self.table.ins_count()
    }

    pub fn dyn_table_size(&self) -> usize {
        self.table.size()
    }

    pub fn set_max_capacity(&mut self, capacity: usize) {
        self.table.set_max_capacity(capacity);
    }

    /// Feeds encoder-stream bytes. Insertions wake blocked blocks (via the
    /// `wantread` hook) and are acknowledged with an Insert Count Increment.
    pub fn enc_stream_in(&mut self, buf: &[u8]) -> Result<()> {
        let inserted = self.enc_parser.feed(buf, &mut self.table)?;
        if inserted == 0 {
            return Ok(());
        }

        while let Some(stream) = self.blocked.pop_ready(self.table.ins_count()) {
            debug!(stream, "blocked header block woken");
            if let Some(ctx) = self.read_ctxs.get_mut(&stream) {
                ctx.blocked = false;
            }
            self.hooks.wantread_header_block(stream, true);
        }

        self.emit_instruction(0x00, 6, inserted);
        Ok(())
    }

    /// Begins reading a header block of `block_size` bytes on `stream`.
    /// If all bytes are already available the block completes synchronously.
    pub fn header_in(&mut self, stream: u64, block_size: usize) -> Result<()> {
        let ctx = HeaderBlockCtx::new(stream, block_size);
        self.resume(ctx)
    }

    /// Continues a block after the host signalled data became readable.
    pub fn header_read(&mut self, stream: u64) -> Result<()> {
        let ctx = self.read_ctxs.remove(&stream).ok_or(Error::UnknownStream)?;
        self.resume(ctx)
    }

    /// The host abandoned `stream`; tell the encoder so it can release the
    /// stream's table references.
    pub fn cancel_stream(&mut self, stream: u64) {
        self.read_ctxs.remove(&stream);
        self.blocked.remove(stream);
        self.emit_instruction(0x40, 6, stream);
    }

    fn resume(&mut self, mut ctx: HeaderBlockCtx) -> Result<()> {
        let stream = ctx.stream;
        match self.drive(&mut ctx)? {
            ReadStatus::Done => {
                self.finish(ctx);
                Ok(())
            }
            ReadStatus::Need => {
                self.read_ctxs.insert(stream, ctx);
                self.hooks.wantread_header_block(stream, true);
                Ok(())
            }
            ReadStatus::Blocked => {
                self.blocked.insert(ctx.largest_ref, stream)?;
                debug!(stream, required = ctx.largest_ref, "header block blocked");
                ctx.blocked = true;
                self.read_ctxs.insert(stream, ctx);
                self.hooks.wantread_header_block(stream, false);
                Ok(())
            }
        }
    }

    /// Pulls bytes through the read hook until the block completes,
    /// blocks, or the transport runs dry.
    fn drive(&mut self, ctx: &mut HeaderBlockCtx) -> Result<ReadStatus> {
        while ctx.size_left > 0 {
            let want = ctx.max_to_read();
            if self.scratch.len() < want {
                self.scratch.resize(want, 0);
            }
            let got = self
                .hooks
                .read_header_block(ctx.stream, &mut self.scratch[..want])
                .map_err(|_| Error::ReadError)?;
            if got == 0 {
                return Ok(ReadStatus::Need);
            }
            ctx.size_left -= got;
            match ctx.parse(&self.scratch[..got], &self.table)? {
                ReadStatus::Need => {}
                st => return Ok(st),
            }
        }
        Ok(ReadStatus::Done)
    }

    fn finish(&mut self, mut ctx: HeaderBlockCtx) {
        let headers = ctx.take_headers();
        debug!(
            stream = ctx.stream,
            fields = headers.len(),
            required = ctx.largest_ref,
            "header block decoded"
        );
        // Blocks that referenced the dynamic table get a Section
        // Acknowledgment; purely static or literal blocks need none.
        if ctx.largest_ref > 0 {
            self.emit_instruction(0x80, 7, ctx.stream);
        }
        self.hooks.header_block_done(ctx.stream, headers);
    }

    fn emit_instruction(&mut self, pattern: u8, prefix_bits: u8, value: u64) {
        let mut buf = [0u8; 12];
        buf[0] = pattern;
        let n = integer::encode(&mut buf, value, prefix_bits).expect("12 bytes fit any integer");
        self.hooks.write_decoder_stream(&buf[..n]);
    }
}
