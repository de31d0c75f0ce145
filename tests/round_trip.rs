//! End-to-end encoder/decoder round trips over an in-memory host.
//!
//! The host hands header-block bytes to the decoder through the read
//! callback in configurable chunk sizes, records read-interest toggles,
//! collects decoder-stream output and delivered header lists. Tests pump
//! the decoder-stream bytes back into the encoder to close the loop.

use std::collections::HashMap;

use quix_qpack::{Decoder, DecoderHooks, Encoder, Error, HeaderList};

#[derive(Default)]
struct Host {
    /// Undelivered header-block bytes per stream.
    blocks: HashMap<u64, Vec<u8>>,
    /// Serve at most this many bytes per read; 0 = unlimited.
    chunk: usize,
    wantread: HashMap<u64, bool>,
    dec_stream: Vec<u8>,
    done: Vec<(u64, HeaderList)>,
}

impl DecoderHooks for Host {
    fn read_header_block(&mut self, stream: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(data) = self.blocks.get_mut(&stream) else {
            return Ok(0);
        };
        let mut n = data.len().min(buf.len());
        if self.chunk > 0 {
            n = n.min(self.chunk);
        }
        buf[..n].copy_from_slice(&data[..n]);
        data.drain(..n);
        Ok(n)
    }

    fn wantread_header_block(&mut self, stream: u64, enabled: bool) {
        self.wantread.insert(stream, enabled);
    }

    fn write_decoder_stream(&mut self, bytes: &[u8]) {
        self.dec_stream.extend_from_slice(bytes);
    }

    fn header_block_done(&mut self, stream: u64, headers: HeaderList) {
        self.done.push((stream, headers));
    }
}

fn new_pair(cap: usize, risked: usize) -> (Encoder, Decoder<Host>) {
    let enc = Encoder::new(cap, risked).unwrap();
    let dec = Decoder::new(cap, risked, Host::default());
    (enc, dec)
}

/// Encodes one block; returns (encoder-stream bytes, prefixed block bytes).
fn encode_block(
    enc: &mut Encoder,
    stream: u64,
    seqno: u32,
    headers: &[(&[u8], &[u8])],
) -> (Vec<u8>, Vec<u8>) {
    let mut enc_out = Vec::new();
    let mut reps = Vec::new();
    enc.start_header(stream, seqno).unwrap();
    for &(name, value) in headers {
        let mut enc_buf = vec![0u8; 2048];
        let mut hea_buf = vec![0u8; 2048];
        let (e, h) = enc.encode(&mut enc_buf, &mut hea_buf, name, value, false).unwrap();
        enc_out.extend_from_slice(&enc_buf[..e]);
        reps.extend_from_slice(&hea_buf[..h]);
    }
    let mut prefix = vec![0u8; 64];
    let n = enc.end_header(&mut prefix).unwrap();
    prefix.truncate(n);
    prefix.extend_from_slice(&reps);
    (enc_out, prefix)
}

fn deliver_block(dec: &mut Decoder<Host>, stream: u64, block: &[u8]) {
    dec.hooks_mut().blocks.entry(stream).or_default().extend_from_slice(block);
    dec.header_in(stream, block.len()).unwrap();
}

fn pump_decoder_stream(dec: &mut Decoder<Host>, enc: &mut Encoder) {
    let bytes = std::mem::take(&mut dec.hooks_mut().dec_stream);
    enc.decoder_stream_in(&bytes).unwrap();
}

fn names_values(list: &HeaderList) -> Vec<(Vec<u8>, Vec<u8>)> {
    list.iter()
        .map(|h| (h.name.to_vec(), h.value.to_vec()))
        .collect()
}

#[test]
fn static_only_wire_bytes() {
    let (mut enc, mut dec) = new_pair(0, 0);
    let headers: &[(&[u8], &[u8])] =
        &[(b":method", b"GET"), (b":path", b"/"), (b":scheme", b"https")];
    let (enc_out, block) = encode_block(&mut enc, 0, 0, headers);

    assert!(enc_out.is_empty());
    assert_eq!(block, vec![0x00, 0x00, 0xc2, 0xc4, 0xc7]);

    deliver_block(&mut dec, 0, &block);
    let (stream, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(stream, 0);
    assert_eq!(
        names_values(&list),
        vec![
            (b":method".to_vec(), b"GET".to_vec()),
            (b":path".to_vec(), b"/".to_vec()),
            (b":scheme".to_vec(), b"https".to_vec()),
        ]
    );
    // Nothing referenced the dynamic table, so no acknowledgment either.
    assert!(dec.hooks().dec_stream.is_empty());
}

#[test]
fn single_insert_blocks_then_completes() {
    let (mut enc, mut dec) = new_pair(4096, 16);
    let (enc_out, block) = encode_block(&mut enc, 0, 0, &[(b"x-custom", b"v")]);
    assert!(!enc_out.is_empty());
    // RIC raw 1 encodes as 2; base 0 sits one below it; post-base index 0.
    assert_eq!(block, vec![0x02, 0x80, 0x10]);

    // Block bytes arrive before the encoder stream: the block must report
    // itself blocked and read interest must be off.
    deliver_block(&mut dec, 0, &block);
    assert!(dec.hooks_mut().done.is_empty());
    assert_eq!(dec.hooks_mut().wantread.get(&0), Some(&false));

    // The insert arrives; the stream wakes and completes.
    dec.enc_stream_in(&enc_out).unwrap();
    assert_eq!(dec.hooks_mut().wantread.get(&0), Some(&true));
    dec.header_read(0).unwrap();
    let (_, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(names_values(&list), vec![(b"x-custom".to_vec(), b"v".to_vec())]);

    // Insert Count Increment plus Section Acknowledgment flow back.
    pump_decoder_stream(&mut dec, &mut enc);
    assert_eq!(enc.max_acked_id(), 1);
    assert_eq!(enc.streams_at_risk(), 0);
}

#[test]
fn eviction_under_pressure() {
    let (mut enc, mut dec) = new_pair(64, 16);

    let (e1, b1) = encode_block(&mut enc, 0, 0, &[(b"x-a", b"111111111111111")]);
    dec.enc_stream_in(&e1).unwrap();
    deliver_block(&mut dec, 0, &b1);
    pump_decoder_stream(&mut dec, &mut enc);

    let (e2, b2) = encode_block(&mut enc, 4, 0, &[(b"x-b", b"222222222222222")]);
    dec.enc_stream_in(&e2).unwrap();
    deliver_block(&mut dec, 4, &b2);
    pump_decoder_stream(&mut dec, &mut enc);

    // The second 50-byte insert evicted the first on both sides.
    assert_eq!(enc.ins_count(), 2);
    assert_eq!(enc.dyn_table_size(), 50);
    assert_eq!(dec.ins_count(), 2);
    assert_eq!(dec.dyn_table_size(), 50);

    let lists: Vec<_> = dec.hooks_mut().done.drain(..).collect();
    assert_eq!(names_values(&lists[0].1), vec![(b"x-a".to_vec(), b"111111111111111".to_vec())]);
    assert_eq!(names_values(&lists[1].1), vec![(b"x-b".to_vec(), b"222222222222222".to_vec())]);
}

#[test]
fn blocked_until_fifth_insert() {
    let (mut enc, mut dec) = new_pair(4096, 1);
    let headers: Vec<(Vec<u8>, Vec<u8>)> = (0..5)
        .map(|i| (format!("x-head-{i}").into_bytes(), format!("value-{i}").into_bytes()))
        .collect();
    let borrowed: Vec<(&[u8], &[u8])> =
        headers.iter().map(|(n, v)| (n.as_slice(), v.as_slice())).collect();
    let (enc_out, block) = encode_block(&mut enc, 8, 0, &borrowed);

    deliver_block(&mut dec, 8, &block);
    assert!(dec.hooks_mut().done.is_empty());

    // Deliver the encoder stream one byte at a time; the block must wake
    // only once all five insertions are in.
    for (i, b) in enc_out.iter().enumerate() {
        dec.enc_stream_in(std::slice::from_ref(b)).unwrap();
        if i + 1 < enc_out.len() {
            assert!(dec.hooks_mut().done.is_empty());
        }
        if dec.hooks_mut().wantread.get(&8) == Some(&true) {
            dec.header_read(8).unwrap();
            dec.hooks_mut().wantread.insert(8, false);
        }
    }
    assert_eq!(dec.ins_count(), 5);
    let (_, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(
        names_values(&list),
        headers.iter().map(|(n, v)| (n.clone(), v.clone())).collect::<Vec<_>>()
    );
}

#[test]
fn second_blocked_stream_exceeds_budget() {
    // The encoder may risk freely, the decoder tolerates one blocked stream.
    let mut enc = Encoder::new(4096, 16).unwrap();
    let mut dec = Decoder::new(4096, 1, Host::default());

    let (enc_out, b1) = encode_block(&mut enc, 0, 0, &[(b"x-a", b"1")]);
    // Same field again: a dynamic match referencing the unacked entry.
    let (e2, b2) = encode_block(&mut enc, 4, 0, &[(b"x-a", b"1")]);
    assert!(e2.is_empty());

    deliver_block(&mut dec, 0, &b1);
    // One blocked stream is allowed, the second exceeds the budget.
    dec.hooks_mut().blocks.entry(4).or_default().extend_from_slice(&b2);
    assert_eq!(dec.header_in(4, b2.len()), Err(Error::BlockedStreamLimitExceeded));

    dec.enc_stream_in(&enc_out).unwrap();
    dec.header_read(0).unwrap();
    assert_eq!(dec.hooks_mut().done.len(), 1);
}

#[test]
fn multi_byte_post_base_index() {
    let (mut enc, mut dec) = new_pair(16384, 32);
    // 20 fresh fields in one block: every one is inserted and referenced
    // post-base, so the last post-base indices overflow the 4-bit prefix.
    let headers: Vec<(Vec<u8>, Vec<u8>)> = (0..20)
        .map(|i| (format!("x-header-{i:02}").into_bytes(), format!("val-{i:02}").into_bytes()))
        .collect();
    let borrowed: Vec<(&[u8], &[u8])> =
        headers.iter().map(|(n, v)| (n.as_slice(), v.as_slice())).collect();
    let (enc_out, block) = encode_block(&mut enc, 0, 0, &borrowed);

    // A saturated 4-bit post-base prefix (0x1f) with a continuation byte
    // must appear for indices ≥ 15.
    let body = &block[2..];
    assert!(body.windows(2).any(|w| w[0] == 0x1f && w[1] >= 0x01));

    dec.enc_stream_in(&enc_out).unwrap();
    deliver_block(&mut dec, 0, &block);
    let (_, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(
        names_values(&list),
        headers.iter().map(|(n, v)| (n.clone(), v.clone())).collect::<Vec<_>>()
    );
}

#[test]
fn cancel_during_pending_ack() {
    let (mut enc, mut dec) = new_pair(4096, 16);
    let (enc_out, block) = encode_block(
        &mut enc,
        7,
        0,
        &[(b"x-a", b"1"), (b"x-b", b"2"), (b"x-c", b"3")],
    );
    assert_eq!(enc.streams_at_risk(), 1);

    // The decoder abandons stream 7 before ever reading the block.
    dec.enc_stream_in(&enc_out).unwrap();
    dec.cancel_stream(7);
    let _ = block;

    pump_decoder_stream(&mut dec, &mut enc);
    // The increments still advanced the known received count, and the
    // cancellation released the block's references.
    assert_eq!(enc.max_acked_id(), 3);
    assert_eq!(enc.streams_at_risk(), 0);

    // With no outstanding references the entries are evictable again: a
    // fourth insert under pressure succeeds.
    enc.set_max_capacity(41);
    enc.start_header(11, 0).unwrap();
    let mut enc_buf = vec![0u8; 256];
    let mut hea_buf = vec![0u8; 256];
    enc.encode(&mut enc_buf, &mut hea_buf, b"x-d", b"4", false).unwrap();
    enc.end_header(&mut [0u8; 16]).unwrap();
    assert_eq!(enc.ins_count(), 4);
}

#[test]
fn trickle_delivery_one_byte_reads() {
    let (mut enc, mut dec) = new_pair(4096, 16);
    dec.hooks_mut().chunk = 1;

    let headers: &[(&[u8], &[u8])] = &[
        (b":method", b"POST"),
        (b":path", b"/submit/form?q=1"),
        (b"content-type", b"application/json"),
        (b"x-session-tag", b"0123456789abcdef0123456789abcdef"),
        (b"cookie", b"k=v; theme=dark"),
    ];
    let (enc_out, block) = encode_block(&mut enc, 0, 0, headers);

    for b in &enc_out {
        dec.enc_stream_in(std::slice::from_ref(b)).unwrap();
    }
    dec.hooks_mut().blocks.entry(0).or_default().extend_from_slice(&block);
    dec.header_in(0, block.len()).unwrap();
    // One-byte reads cannot finish synchronously; keep feeding while the
    // decoder asks for more.
    let mut guard = 0;
    while dec.hooks_mut().done.is_empty() {
        assert_eq!(dec.hooks_mut().wantread.get(&0), Some(&true));
        dec.header_read(0).unwrap();
        guard += 1;
        assert!(guard < 10_000, "no progress");
    }
    let (_, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(
        names_values(&list),
        headers.iter().map(|&(n, v)| (n.to_vec(), v.to_vec())).collect::<Vec<_>>()
    );
}

#[test]
fn many_blocks_reuse_dynamic_table() {
    let (mut enc, mut dec) = new_pair(4096, 16);

    for round in 0..4u32 {
        for stream in [0u64, 4, 8] {
            let value = format!("session-{stream}");
            let headers: Vec<(&[u8], &[u8])> = vec![
                (b":method", b"GET"),
                (b"x-tenant", b"acme"),
                (b"x-session", value.as_bytes()),
            ];
            let (enc_out, block) = encode_block(&mut enc, stream, round, &headers);
            dec.enc_stream_in(&enc_out).unwrap();
            deliver_block(&mut dec, stream, &block);
            pump_decoder_stream(&mut dec, &mut enc);

            let (s, list) = dec.hooks_mut().done.pop().unwrap();
            assert_eq!(s, stream);
            assert_eq!(
                names_values(&list),
                vec![
                    (b":method".to_vec(), b"GET".to_vec()),
                    (b"x-tenant".to_vec(), b"acme".to_vec()),
                    (b"x-session".to_vec(), value.clone().into_bytes()),
                ]
            );
        }
    }

    // Four distinct values plus the shared tenant entry; everything acked.
    assert_eq!(enc.ins_count(), dec.ins_count());
    assert_eq!(enc.max_acked_id(), enc.ins_count());
    assert_eq!(enc.streams_at_risk(), 0);
}

#[test]
fn capacity_instruction_shrinks_decoder_table() {
    let (mut enc, mut dec) = new_pair(4096, 16);
    let (enc_out, block) = encode_block(&mut enc, 0, 0, &[(b"x-a", b"11111111")]);
    dec.enc_stream_in(&enc_out).unwrap();
    deliver_block(&mut dec, 0, &block);
    assert_eq!(dec.dyn_table_size(), 41);

    // Set Dynamic Table Capacity 0 evicts everything; no insertion, so no
    // Insert Count Increment is produced for it.
    let before = dec.hooks_mut().dec_stream.len();
    dec.enc_stream_in(&[0x20]).unwrap();
    assert_eq!(dec.dyn_table_size(), 0);
    assert_eq!(dec.hooks_mut().dec_stream.len(), before);

    // Raising it above the configured maximum is a connection error.
    assert!(dec.enc_stream_in(&[0x3f, 0xe1, 0x3f]).is_err());
}

#[test]
fn never_index_survives_round_trip() {
    let (mut enc, mut dec) = new_pair(4096, 16);
    enc.start_header(0, 0).unwrap();
    let mut enc_buf = vec![0u8; 256];
    let mut hea_buf = vec![0u8; 256];
    let (e, h) = enc
        .encode(&mut enc_buf, &mut hea_buf, b"authorization", b"bearer tok", true)
        .unwrap();
    assert_eq!(e, 0);
    let mut block = vec![0u8; 64];
    let n = enc.end_header(&mut block).unwrap();
    block.truncate(n);
    block.extend_from_slice(&hea_buf[..h]);

    deliver_block(&mut dec, 0, &block);
    let (_, list) = dec.hooks_mut().done.pop().unwrap();
    assert_eq!(&list.headers[0].name[..], b"authorization");
    assert_eq!(&list.headers[0].value[..], b"bearer tok");
    assert!(list.headers[0].never_index);
}
