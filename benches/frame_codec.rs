//! Frame codec and channel throughput benchmarks.
//!
//! - Codec: encode and decode at several payload sizes
//! - Channel: one data frame through an open channel over the in-memory
//!   transport
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tokio_util::codec::{Decoder, Encoder};

use winksock::protocol::{OpCode, OpenFlag, ResolveFlag};
use winksock::{
    ChannelEvent, ChannelEvents, ChannelMode, Client, ContentType, DeliveryPriority, Frame,
    FrameCodec, MemoryRemote, MemoryTransport, Pointer,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[0, 64, 1024, 16 * 1024, winksock::protocol::PAYLOAD_MAX_SIZE];

fn data_frame(size: usize) -> Frame {
    Frame::new(
        Pointer::new(7),
        OpCode::Data,
        DeliveryPriority::Guaranteed as u8,
        ContentType::Binary,
        Some(Bytes::from(vec![0xA5; size])),
    )
}

// ============================================================================
// Benchmark: Codec
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in PAYLOAD_SIZES {
        let frame = data_frame(size);
        group.throughput(Throughput::Bytes(frame.wire_size() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            let mut codec = FrameCodec::new();
            let mut dst = BytesMut::with_capacity(frame.wire_size());
            b.iter(|| {
                dst.clear();
                codec.encode(frame.clone(), &mut dst).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for &size in PAYLOAD_SIZES {
        let mut encoded = BytesMut::new();
        FrameCodec::new()
            .encode(data_frame(size), &mut encoded)
            .unwrap();
        let encoded = encoded.freeze();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            let mut codec = FrameCodec::new();
            b.iter(|| {
                let mut src = BytesMut::from(&encoded[..]);
                codec.decode(&mut src).unwrap().unwrap()
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Channel Send
// ============================================================================

async fn open_channel(
    client: &Client,
    transport: &MemoryTransport,
) -> (winksock::Channel, ChannelEvents, MemoryRemote) {
    let (channel, mut events) = client.channel();
    channel
        .connect("bench:7010/stream", ChannelMode::READ_WRITE)
        .unwrap();

    let mut remote = transport.accept().await.unwrap();
    let resolve = remote.recv().await.unwrap();
    remote.send(Frame::new(
        Pointer::new(7),
        OpCode::Resolve,
        ResolveFlag::Success as u8,
        ContentType::Utf8,
        resolve.into_payload(),
    ));
    remote.recv().await.unwrap();
    remote.send(Frame::new(
        Pointer::new(7),
        OpCode::Open,
        OpenFlag::Success as u8,
        ContentType::Utf8,
        None,
    ));

    match events.recv().await {
        Some(ChannelEvent::Open(_)) => (channel, events, remote),
        other => panic!("channel did not open: {other:?}"),
    }
}

fn bench_channel_send(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("channel_send");

    for &size in &[64usize, 1024] {
        let transport = MemoryTransport::new();
        let client = Client::builder()
            .transport(transport.clone())
            .build()
            .unwrap();
        let (channel, _events, remote) = rt.block_on(open_channel(&client, &transport));
        let remote = tokio::sync::Mutex::new(remote);
        let payload = Bytes::from(vec![0x5A; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                channel.send(payload.clone()).unwrap();
                remote.lock().await.recv().await.unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_channel_send);
criterion_main!(benches);
