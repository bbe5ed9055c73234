//! End-to-end: raw events in the store → windowed fetch → minute
//! aggregation → Graphite line protocol on a real socket.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

use speedlog::aggregate::StatValue;
use speedlog::export::scheduler::collect_cycle;
use speedlog::export::{metric_path, GraphiteExporter};
use speedlog::store::{Event, EventStore, MemoryStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 5).unwrap()
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("webshop").unwrap();
    for (ms, offset_secs) in [(100.0, 0), (300.0, 10)] {
        store
            .add_event(Event {
                project_id: project.id,
                metric_name: "login".into(),
                metric_time: t0() + Duration::seconds(offset_secs),
                duration_ms: ms,
            })
            .unwrap();
    }
    store
}

#[tokio::test]
async fn two_events_become_one_point_and_three_wire_lines() {
    let store = seeded_store();

    // One scheduler window covering both events.
    let from = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
    let points = collect_cycle(store.as_ref(), Duration::minutes(1), from, from + Duration::minutes(1));

    assert_eq!(points.len(), 1);
    let point = &points[0].point;
    assert_eq!(points[0].project_title, "webshop");
    assert_eq!(point.metric_name, "login");
    assert_eq!(point.median_duration_ms, StatValue::Integer(200));
    assert_eq!(point.min_duration_ms, StatValue::Integer(100));
    assert_eq!(point.max_duration_ms, StatValue::Integer(300));
    assert_eq!(point.sample_count, 2);

    // Ship it over a real socket and check the wire bytes.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let exporter = GraphiteExporter::new(
        addr.to_string(),
        StdDuration::from_secs(1),
        StdDuration::from_secs(1),
    );

    let send = tokio::spawn(async move {
        exporter.send(&points, metric_path).await;
    });

    let (mut sock, _) = listener.accept().await.unwrap();
    let mut payload = String::new();
    sock.read_to_string(&mut payload).await.unwrap();
    send.await.unwrap();

    let lines: Vec<&str> = payload.split("\r\n\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 3);

    let expect = [
        ("speedlog.tests.webshop.login.median", "200"),
        ("speedlog.tests.webshop.login.max", "300"),
        ("speedlog.tests.webshop.login.min", "100"),
    ];
    for (line, (path, value)) in lines.iter().zip(expect) {
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields.len(), 3, "line {line:?}");
        assert_eq!(fields[0], path);
        assert_eq!(fields[1], value);
        assert!(fields[2].parse::<i64>().is_ok());
    }
}

#[tokio::test]
async fn on_demand_query_is_independent_of_the_export_window() {
    let store = seeded_store();
    let project = store.add_project("other").unwrap();
    store
        .add_event(Event {
            project_id: project.id,
            metric_name: "login".into(),
            metric_time: t0(),
            duration_ms: 999.0,
        })
        .unwrap();

    // Caller-supplied arbitrary range, exact-match filters.
    let events = store
        .query(project.id, "login", t0() - Duration::hours(1), t0() + Duration::hours(1))
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].duration_ms, 999.0);
}
