use criterion::{criterion_group, criterion_main, Criterion};
use liftoff_game::broadcast::Broadcaster;
use liftoff_game::protocol::{ClientEvent, PlayerSummary, ServerEvent};
use std::hint::black_box;
use uuid::Uuid;

fn bench_server_event_encode(c: &mut Criterion) {
    let event = ServerEvent::PlayerMoved {
        id: Uuid::new_v4(),
        x: 412.5,
        y: 96.0,
        animation: Some("run".to_string()),
    };

    c.bench_function("player_moved_encode", |b| {
        b.iter(|| black_box(black_box(&event).encode().unwrap()))
    });
}

fn bench_client_event_decode(c: &mut Criterion) {
    let frame = r#"{"event":"playerMove","data":{"x":412.5,"y":96.0,"animation":"run"}}"#;

    c.bench_function("player_move_decode", |b| {
        b.iter(|| black_box(ClientEvent::decode(black_box(frame)).unwrap()))
    });
}

fn bench_roster_encode(c: &mut Criterion) {
    let roster = ServerEvent::Players(
        (0..100)
            .map(|i| PlayerSummary {
                id: format!("player-{i}"),
                name: format!("Player {i}"),
            })
            .collect(),
    );

    c.bench_function("roster_encode_100_players", |b| {
        b.iter(|| black_box(black_box(&roster).encode().unwrap()))
    });
}

fn bench_fan_out_100_connections(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("countdown_fan_out_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broadcaster = Broadcaster::new(1024);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    receivers.push(broadcaster.attach(Uuid::new_v4()).await);
                }

                let count = broadcaster.send_all(&ServerEvent::Countdown { n: black_box(3) }).await;
                black_box(count);
            });
        })
    });
}

fn bench_relay_1000_moves(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("relay_1000_moves_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let broadcaster = Broadcaster::new(2048);
                let sender = Uuid::new_v4();

                let mut receivers = vec![broadcaster.attach(sender).await];
                for _ in 0..99 {
                    receivers.push(broadcaster.attach(Uuid::new_v4()).await);
                }

                for i in 0..1000u32 {
                    let event = ServerEvent::PlayerMoved {
                        id: sender,
                        x: f64::from(i),
                        y: 0.0,
                        animation: None,
                    };
                    broadcaster.send_all_except(&sender, black_box(&event)).await;
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_server_event_encode,
    bench_client_event_decode,
    bench_roster_encode,
    bench_fan_out_100_connections,
    bench_relay_1000_moves,
);
criterion_main!(benches);
