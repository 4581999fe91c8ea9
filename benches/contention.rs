use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use roomledger::model::ReservationRequest;
use roomledger::{Ledger, LedgerError};

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

fn night(offset: u64) -> NaiveDate {
    base_date() + Days::new(offset)
}

fn open_ledger(name: &str) -> Arc<Ledger> {
    let dir = std::env::temp_dir().join(format!("roomledger_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let ledger = Ledger::builder(dir.join(format!("{name}.wal")))
        .open()
        .expect("open ledger");
    Arc::new(ledger)
}

async fn setup_rooms(ledger: &Ledger, n: usize) -> Vec<Ulid> {
    let property = Ulid::new();
    let mut rooms = Vec::with_capacity(n);
    for i in 0..n {
        let id = Ulid::new();
        ledger
            .register_room(id, property, Some(format!("{}", 100 + i)), true)
            .await
            .expect("register room");
        rooms.push(id);
    }
    rooms
}

fn request(room_id: Ulid, check_in: NaiveDate, nights: u64) -> ReservationRequest {
    ReservationRequest::new(room_id, Ulid::new(), check_in, check_in + Days::new(nights), Decimal::ONE_HUNDRED)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let ledger = open_ledger("sequential");
    let room = setup_rooms(&ledger, 1).await[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n as u64 {
        let t = Instant::now();
        ledger
            .create_reservation(request(room, night(i), 1))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_independent_rooms() {
    let ledger = open_ledger("independent");
    let rooms = setup_rooms(&ledger, 50).await;
    let n_per_room = 100u64;

    let start = Instant::now();
    let mut handles = Vec::new();
    for &room in &rooms {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_room {
                ledger
                    .create_reservation(request(room, night(j * 2), 2))
                    .await
                    .expect("independent booking");
            }
        }));
    }
    for h in handles {
        h.await.expect("task");
    }

    let elapsed = start.elapsed();
    let total = rooms.len() as u64 * n_per_room;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} rooms x {n_per_room} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        rooms.len(),
        elapsed.as_secs_f64()
    );
}

async fn phase3_same_room_contention() {
    let ledger = open_ledger("contention");
    let room = setup_rooms(&ledger, 1).await[0];
    let rounds = 100u64;
    let contenders = 32;

    let mut latencies = Vec::new();
    let mut wins = 0usize;
    let mut conflicts = 0usize;
    let start = Instant::now();
    for round in 0..rounds {
        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    let t = Instant::now();
                    let result = ledger.create_reservation(request(room, night(round * 3), 2)).await;
                    (result, t.elapsed())
                })
            })
            .collect();
        let mut round_wins = 0;
        for h in handles {
            let (result, latency) = h.await.expect("task");
            latencies.push(latency);
            match result {
                Ok(_) => round_wins += 1,
                Err(LedgerError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(round_wins, 1, "round {round} admitted {round_wins} overlapping bookings");
        wins += round_wins;
    }

    let elapsed = start.elapsed();
    println!(
        "  {rounds} rounds x {contenders} contenders in {:.2}s: {wins} booked, {conflicts} conflicts",
        elapsed.as_secs_f64()
    );
    print_latency("create latency under contention", &mut latencies);
}

async fn phase4_read_under_load() {
    let ledger = open_ledger("read_under_load");
    let rooms = setup_rooms(&ledger, 10).await;

    let writer = {
        let ledger = ledger.clone();
        let rooms = rooms.clone();
        tokio::spawn(async move {
            for j in 0..500u64 {
                let room = rooms[(j as usize) % rooms.len()];
                let _ = ledger.create_reservation(request(room, night(j), 1)).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(2000);
    for i in 0..2000u64 {
        let room = rooms[(i as usize) % rooms.len()];
        let t = Instant::now();
        ledger
            .check_availability(room, night(i % 500), night(i % 500 + 3))
            .await
            .expect("availability");
        latencies.push(t.elapsed());
    }
    writer.await.expect("writer");
    print_latency("availability latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== roomledger contention benchmark ===\n");

    println!("[phase 1] sequential write throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent writes, one room per task");
    phase2_independent_rooms().await;

    println!("\n[phase 3] overlapping writes on a single room");
    phase3_same_room_contention().await;

    println!("\n[phase 4] availability latency under write load");
    phase4_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
