use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use slowwave::narration::split_segments;
use slowwave::tts::frame::{Frame, ServerMessage, event};
use std::hint::black_box;

const PARAGRAPH: &str = "夜色慢慢落下来，远处的山只剩下一条柔和的轮廓。\
火车沿着河谷缓缓前行，车窗外偶尔掠过几盏昏黄的灯。\
风从林间穿过，带来松针和泥土的气味！\
你可以把呼吸放慢一些，再慢一些。\n";

fn story(paragraphs: usize) -> String {
    PARAGRAPH.repeat(paragraphs)
}

fn audio_frame(len: usize) -> Vec<u8> {
    Frame {
        header: [0x11, 0xB4, 0x00, 0x00],
        event: event::AUDIO_RESPONSE,
        session_id: Some("3f1c0a52-9a57-4f0e-8d1e-2b7c4c1d9e10".to_string()),
        payload: vec![0x2A; len],
    }
    .encode()
}

fn segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_segments");
    for paragraphs in [1, 40, 400] {
        let text = story(paragraphs);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(paragraphs), &text, |b, text| {
            b.iter(|| split_segments(black_box(text), black_box(300)));
        });
    }
    group.finish();
}

fn frame_coding(c: &mut Criterion) {
    let payload = br#"{"event":200,"req_params":{"text":"夜色慢慢落下来。"}}"#.to_vec();
    c.bench_function("encode_task_request", |b| {
        b.iter(|| {
            Frame::task_request(black_box("session-id"), black_box(payload.clone())).encode()
        });
    });

    let mut group = c.benchmark_group("classify_audio");
    for len in [960, 9600] {
        let data = audio_frame(len);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &data, |b, data| {
            b.iter(|| match ServerMessage::classify(black_box(data)) {
                Ok(Some(ServerMessage::Audio(pcm))) => pcm.len(),
                _ => 0,
            });
        });
    }
    group.finish();
}

criterion_group!(benches, segmentation, frame_coding);
criterion_main!(benches);
