//! Frame reassembly across arbitrary chunk boundaries.
//!
//! Covers the literal delivery scenarios (exact chunk, split header, split
//! payload, multiple frames per chunk, zero-length header) and the chunking
//! invariance property: any partition of a wire byte stream yields the same
//! frame sequence.

use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;
use sealframe::{
    FrameDecoder, FrameEncoder, HEADER_LEN, Pipeline, RegistryBuilder,
    registry::MessageRegistry,
};

#[derive(Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
struct Ping {
    seq: u32,
}

fn registry() -> MessageRegistry { RegistryBuilder::new().register::<Ping>().build() }

/// Wire bytes for one message through an identity pipeline.
fn wire_frame(registry: &MessageRegistry, pipeline: &Pipeline, seq: u32) -> Vec<u8> {
    let plaintext = registry.serialize(&Ping { seq }).expect("serialize");
    let sealed = pipeline.outbound(&plaintext).expect("outbound pipeline");
    FrameEncoder::default().encode(&sealed).expect("frame").to_vec()
}

/// Decode every frame in `chunks`, then lift each through the pipeline and
/// registry into `Ping` sequence numbers.
fn decode_pings(
    registry: &MessageRegistry,
    pipeline: &Pipeline,
    chunks: &[&[u8]],
) -> Vec<u32> {
    let mut decoder = FrameDecoder::new(1024);
    let mut seqs = Vec::new();
    for chunk in chunks {
        for payload in decoder.decode_chunk(chunk).expect("decode chunk") {
            let plaintext = pipeline.inbound(&payload).expect("inbound pipeline");
            let message = registry.deserialize(&plaintext).expect("deserialize");
            seqs.push(message.downcast_ref::<Ping>().expect("ping expected").seq);
        }
    }
    seqs
}

#[rstest]
fn exact_chunk_delivers_one_message() {
    let registry = registry();
    let pipeline = Pipeline::identity();
    let frame = wire_frame(&registry, &pipeline, 1);

    assert_eq!(decode_pings(&registry, &pipeline, &[frame.as_slice()]), vec![1]);
}

#[rstest]
fn header_split_across_chunks_is_held() {
    let registry = registry();
    let pipeline = Pipeline::identity();
    let frame = wire_frame(&registry, &pipeline, 1);

    let seqs = decode_pings(&registry, &pipeline, &[&frame[..2], &frame[2..]]);
    assert_eq!(seqs, vec![1]);
}

#[rstest]
fn payload_delivered_byte_by_byte() {
    let mut decoder = FrameDecoder::new(1024);
    let payload = vec![0xA7u8; 100];
    let frame = FrameEncoder::default().encode(&payload).expect("frame");

    let mut emitted = Vec::new();
    for (index, byte) in frame.iter().enumerate() {
        emitted.extend(decoder.decode_chunk(&[*byte]).expect("decode byte"));
        if index >= HEADER_LEN && index + 1 < frame.len() {
            assert_eq!(decoder.buffered(), index + 1 - HEADER_LEN);
        }
    }
    assert_eq!(emitted, vec![Bytes::from(payload)]);
}

#[rstest]
fn two_frames_in_one_chunk_arrive_in_order() {
    let registry = registry();
    let pipeline = Pipeline::identity();
    let mut stream = wire_frame(&registry, &pipeline, 1);
    stream.extend(wire_frame(&registry, &pipeline, 2));

    assert_eq!(decode_pings(&registry, &pipeline, &[stream.as_slice()]), vec![1, 2]);
}

#[rstest]
fn zero_length_header_fails_without_poisoning_the_decoder() {
    let registry = registry();
    let pipeline = Pipeline::identity();
    let mut decoder = FrameDecoder::new(1024);

    decoder
        .decode_chunk(&[0x00, 0x00, 0x00])
        .expect_err("zero header must fail");
    decoder.reset();

    let frame = wire_frame(&registry, &pipeline, 7);
    let payloads = decoder.decode_chunk(&frame).expect("next chunk decodes");
    assert_eq!(payloads.len(), 1);
}

proptest! {
    /// Invariant 1: every partition of the stream produces the same frames.
    #[test]
    fn any_partition_yields_the_same_frames(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..8),
        raw_cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let encoder = FrameEncoder::default();
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend_from_slice(&encoder.encode(payload).expect("encode"));
        }

        let mut cuts: Vec<usize> = raw_cuts
            .iter()
            .map(|cut| cut % (stream.len() + 1))
            .collect();
        cuts.push(0);
        cuts.push(stream.len());
        cuts.sort_unstable();
        cuts.dedup();

        let mut decoder = FrameDecoder::new(1024);
        let mut frames = Vec::new();
        for window in cuts.windows(2) {
            let chunk = &stream[window[0]..window[1]];
            frames.extend(decoder.decode_chunk(chunk).expect("decode chunk"));
        }

        let expected: Vec<Bytes> = payloads.iter().cloned().map(Bytes::from).collect();
        prop_assert_eq!(frames, expected);
        prop_assert!(decoder.is_idle());
    }
}
