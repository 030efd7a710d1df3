use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rdv_common::message::Message;

fn sdp_body() -> String {
    let mut body = String::from("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\n");
    for i in 0..24 {
        body.push_str(&format!("a=candidate:{i} 1 udp 2122260223 192.168.1.{i} 54609 typ host\r\n"));
    }
    body
}

fn bench_parse_offer(c: &mut Criterion) {
    let raw = Message::new("bob", "offer").with_body(sdp_body()).serialize();

    c.bench_function("parse_offer", |b| {
        b.iter(|| black_box(Message::parse(&raw).unwrap()));
    });
}

fn bench_serialize_offer(c: &mut Criterion) {
    let msg = Message::new("bob", "offer").with_body(sdp_body());

    c.bench_function("serialize_offer", |b| {
        b.iter(|| black_box(msg.serialize()));
    });
}

fn bench_parse_candidate(c: &mut Criterion) {
    let raw = "bob candidate audio\ncandidate:1 1 UDP 2122252543 10.0.0.2 50000 typ host";

    c.bench_function("parse_candidate", |b| {
        b.iter(|| black_box(Message::parse(raw).unwrap()));
    });
}

fn bench_readdress_and_serialize(c: &mut Criterion) {
    let raw = Message::new("bob", "answer").with_body(sdp_body()).serialize();

    c.bench_function("relay_hot_path", |b| {
        b.iter(|| {
            let msg = Message::parse(&raw).unwrap();
            black_box(msg.readdress("alice").serialize())
        });
    });
}

fn bench_not_found(c: &mut Criterion) {
    c.bench_function("not_found_serialize", |b| {
        b.iter(|| black_box(Message::not_found("nobody").serialize()));
    });
}

criterion_group!(
    benches,
    bench_parse_offer,
    bench_serialize_offer,
    bench_parse_candidate,
    bench_readdress_and_serialize,
    bench_not_found,
);
criterion_main!(benches);
