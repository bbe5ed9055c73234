use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{ExportPoint, Stat};
use crate::config::ExportConfig;

/// Writes aggregated points to a Graphite-style collector.
///
/// Each `send` call is one export cycle: a fresh TCP connection, three
/// lines per point (median, max, min), then the connection is dropped.
/// Failures are logged and isolated; a bad line does not stop the rest
/// of the cycle, a failed connect drops the cycle without queueing
/// anything for the next one.
pub struct GraphiteExporter {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl GraphiteExporter {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            write_timeout,
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(
            config.collector_addr.clone(),
            config.connect_timeout,
            config.write_timeout,
        )
    }

    /// Ships one cycle's worth of points, mapping each statistic to a
    /// metric path via `mapper`. Never fails; everything that can go
    /// wrong is logged and skipped.
    pub async fn send<F>(&self, points: &[ExportPoint], mapper: F)
    where
        F: Fn(&str, &str, Stat) -> String,
    {
        if points.is_empty() {
            return;
        }

        let mut conn = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(addr = %self.addr, error = %e, "connect to collector failed, dropping cycle");
                return;
            }
            Err(_) => {
                warn!(addr = %self.addr, "connect to collector timed out, dropping cycle");
                return;
            }
        };

        // One stamp per cycle: the collector dates every line at send time.
        let stamp = Utc::now().timestamp();
        self.write_cycle(&mut conn, points, &mapper, stamp).await;
        // conn drops here, closing the socket on every exit path
    }

    /// Writes every statistic line of the cycle. A failed or timed-out
    /// line is logged and the loop keeps going; one bad write never
    /// costs the remaining points.
    async fn write_cycle<W, F>(&self, conn: &mut W, points: &[ExportPoint], mapper: &F, stamp: i64)
    where
        W: AsyncWrite + Unpin,
        F: Fn(&str, &str, Stat) -> String,
    {
        for point in points {
            for (stat, value) in point.stats() {
                let path = mapper(&point.project_title, &point.point.metric_name, stat);
                let line = render_line(&path, value, stamp);
                match timeout(self.write_timeout, conn.write_all(line.as_bytes())).await {
                    Ok(Ok(())) => debug!(%path, bytes = line.len(), "wrote statistic"),
                    Ok(Err(e)) => warn!(%path, error = %e, "write to collector failed"),
                    Err(_) => warn!(%path, "write to collector timed out"),
                }
            }
        }
    }
}

/// Wire format: `<path> <value> <epochSeconds>\r\n\r\n`, value rendered
/// as an integer or decimal literal depending on its tag.
fn render_line(path: &str, value: crate::aggregate::StatValue, stamp: i64) -> String {
    format!("{path} {value} {stamp}\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregatedPoint, StatValue};
    use chrono::TimeZone;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn point(metric: &str, median: f64, min: f64, max: f64) -> ExportPoint {
        ExportPoint {
            project_title: "webshop".into(),
            point: AggregatedPoint {
                metric_name: metric.into(),
                bucket_start: Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
                median_duration_ms: StatValue::from_ms(median),
                min_duration_ms: StatValue::from_ms(min),
                max_duration_ms: StatValue::from_ms(max),
                sample_count: 2,
            },
        }
    }

    #[test]
    fn line_rendering() {
        assert_eq!(
            render_line("speedlog.tests.webshop.login.median", StatValue::Integer(200), 1_700_000_000),
            "speedlog.tests.webshop.login.median 200 1700000000\r\n\r\n"
        );
        assert_eq!(
            render_line("a.b", StatValue::Decimal(12.5), 7),
            "a.b 12.5 7\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn cycle_writes_three_lines_per_point_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let exporter = GraphiteExporter::new(
            addr.to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let points = vec![point("login", 200.0, 100.0, 300.0), point("search", 12.5, 10.0, 15.0)];

        let send = tokio::spawn(async move {
            exporter.send(&points, super::super::metric_path).await;
        });

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut payload = String::new();
        sock.read_to_string(&mut payload).await.unwrap();
        send.await.unwrap();

        let lines: Vec<&str> = payload
            .split("\r\n\r\n")
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(lines.len(), 6);

        let fields: Vec<Vec<&str>> = lines.iter().map(|l| l.split(' ').collect()).collect();
        assert_eq!(fields[0][0], "speedlog.tests.webshop.login.median");
        assert_eq!(fields[0][1], "200");
        assert_eq!(fields[1][0], "speedlog.tests.webshop.login.max");
        assert_eq!(fields[1][1], "300");
        assert_eq!(fields[2][0], "speedlog.tests.webshop.login.min");
        assert_eq!(fields[2][1], "100");
        assert_eq!(fields[3][0], "speedlog.tests.webshop.search.median");
        assert_eq!(fields[3][1], "12.5");

        // every line carries the same per-cycle epoch stamp
        let stamps: Vec<&str> = fields.iter().map(|f| f[2]).collect();
        assert!(stamps.iter().all(|s| *s == stamps[0]));
        assert!(stamps[0].parse::<i64>().is_ok());
    }

    /// Accepts every write except a chosen range of calls, which fail
    /// with a broken pipe. One call per statistic line.
    struct FlakyWriter {
        written: Vec<u8>,
        calls: usize,
        failing: std::ops::Range<usize>,
    }

    impl FlakyWriter {
        fn failing(failing: std::ops::Range<usize>) -> Self {
            Self {
                written: Vec::new(),
                calls: 0,
                failing,
            }
        }
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let this = self.get_mut();
            let call = this.calls;
            this.calls += 1;
            if this.failing.contains(&call) {
                Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
            } else {
                this.written.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_failure_on_one_point_does_not_stop_the_next() {
        let exporter = GraphiteExporter::new(
            "127.0.0.1:9".to_string(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let points = vec![
            point("login", 200.0, 100.0, 300.0),
            point("search", 20.0, 10.0, 30.0),
            point("checkout", 2.0, 1.0, 3.0),
        ];

        // the second point's three lines (calls 3, 4, 5) all fail
        let mut writer = FlakyWriter::failing(3..6);
        exporter
            .write_cycle(&mut writer, &points, &super::super::metric_path, 1_700_000_000)
            .await;

        // every line was attempted, including after the failures
        assert_eq!(writer.calls, 9);

        let payload = String::from_utf8(writer.written).unwrap();
        assert!(payload.contains("speedlog.tests.webshop.login.median 200 "));
        assert!(payload.contains("speedlog.tests.webshop.login.min 100 "));
        assert!(!payload.contains(".search."));
        assert!(payload.contains("speedlog.tests.webshop.checkout.median 2 "));
        assert!(payload.contains("speedlog.tests.webshop.checkout.min 1 "));
    }

    #[tokio::test]
    async fn refused_connection_is_survived() {
        // grab a port that nothing is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let exporter = GraphiteExporter::new(
            addr.to_string(),
            Duration::from_millis(500),
            Duration::from_millis(500),
        );
        // must log and return, not panic or hang
        exporter
            .send(&[point("login", 1.0, 1.0, 1.0)], super::super::metric_path)
            .await;
    }

    #[tokio::test]
    async fn empty_cycle_never_dials() {
        let exporter = GraphiteExporter::new(
            "127.0.0.1:9".to_string(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        exporter.send(&[], super::super::metric_path).await;
    }
}
