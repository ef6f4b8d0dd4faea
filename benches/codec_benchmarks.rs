use std::hint::black_box;

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mxbus::{
    network::wire::{decode, encode, FieldWriter, FrameDecoder, DEFAULT_MAX_FRAME_LEN},
    ComponentId, Envelope, Field, FieldKind, Frame, MessageTypeId,
};

fn sample_fields() -> Vec<Field> {
    vec![
        Field::U32(42),
        Field::I64(-7),
        Field::F64(3.5),
        Field::Str("sensor/temperature".into()),
        Field::U8(1),
        Field::Str("ok".into()),
    ]
}

fn bench_encode_fields(c: &mut Criterion) {
    let fields = sample_fields();
    c.bench_function("encode fields", |b| {
        b.iter(|| black_box(encode(black_box(&fields))))
    });

    c.bench_function("field writer", |b| {
        b.iter(|| {
            let mut w = FieldWriter::with_capacity(64);
            w.put_u32(42).put_i64(-7).put_f64(3.5);
            w.put_str("sensor/temperature");
            black_box(w.finish())
        })
    });
}

fn bench_decode_fields(c: &mut Criterion) {
    let fields = sample_fields();
    let kinds: Vec<FieldKind> = fields.iter().map(Field::kind).collect();
    let encoded = encode(&fields);
    c.bench_function("decode fields", |b| {
        b.iter(|| black_box(decode(black_box(&encoded), &kinds).unwrap()))
    });
}

fn deliver(len: usize) -> Frame {
    Frame::Deliver {
        source: ComponentId(3),
        envelope: Envelope::new(MessageTypeId(9), 1, Bytes::from(vec![7u8; len])),
    }
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame encode");
    for len in [16usize, 1024, 64 * 1024] {
        let frame = deliver(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &frame, |b, frame| {
            let mut buf = BytesMut::with_capacity(len + 32);
            b.iter(|| {
                buf.clear();
                frame.encode(&mut buf);
                black_box(buf.len())
            })
        });
    }
    group.finish();
}

fn bench_stream_decode(c: &mut Criterion) {
    let mut wire = BytesMut::new();
    for i in 0..256u32 {
        deliver(64).encode(&mut wire);
        Frame::NotifyNewSubscriber {
            msg_type: MessageTypeId(i),
            id: ComponentId(i),
            name: format!("component-{i}"),
        }
        .encode(&mut wire);
    }
    let wire = wire.freeze();
    let decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);

    let mut group = c.benchmark_group("stream decode");
    group.throughput(Throughput::Bytes(wire.len() as u64));
    for chunk in [wire.len(), 4096, 512] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(chunk);
                let mut frames = 0usize;
                for piece in wire.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                        black_box(&frame);
                        frames += 1;
                    }
                }
                assert_eq!(frames, 512);
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_fields,
    bench_decode_fields,
    bench_frame_encode,
    bench_stream_decode
);
criterion_main!(benches);
