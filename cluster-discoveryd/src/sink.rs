use std::io::Write;
use shared::types::MembershipChange;

/// Receives membership transitions. Called with the membership lock held,
/// so implementations must not block: a stalled sink stalls the receive
/// loops and the keepalive sweep with it.
pub trait MembershipSink: Send + Sync {
    fn new_member(&self, address: &str);
    fn remove_member(&self, address: &str);
}

/// Logs each transition and queues it for `write_reports`, which writes
/// it to the cluster manager off the membership lock.
pub struct ReportingSink {
    tx: flume::Sender<MembershipChange>,
}

impl ReportingSink {
    pub fn new() -> (Self, flume::Receiver<MembershipChange>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    fn report(&self, change: MembershipChange) {
        if self.tx.send(change).is_err() {
            tracing::warn!("Membership report writer has stopped");
        }
    }
}

impl MembershipSink for ReportingSink {
    fn new_member(&self, address: &str) {
        tracing::info!("New member added: {}", address);
        self.report(MembershipChange::added(address));
    }

    fn remove_member(&self, address: &str) {
        tracing::info!("Member left: {}", address);
        self.report(MembershipChange::removed(address));
    }
}

/// Write each queued change to `out` as one JSON line, until every
/// `ReportingSink` is dropped. Blocks; run it on a blocking thread.
pub fn write_reports<W: Write>(rx: flume::Receiver<MembershipChange>, mut out: W) {
    for change in rx.iter() {
        let line = match serde_json::to_string(&change) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode membership change: {}", e);
                continue;
            }
        };
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::error!("Error announcing cluster neighbor {}: {}", change.address, e);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use parking_lot::Mutex;
    use super::*;

    /// Records every transition in order
    #[derive(Default)]
    pub struct RecordingSink {
        changes: Mutex<Vec<MembershipChange>>,
    }

    impl RecordingSink {
        pub fn changes(&self) -> Vec<MembershipChange> {
            self.changes.lock().clone()
        }

        pub fn count(&self, change: &MembershipChange) -> usize {
            self.changes.lock().iter().filter(|c| *c == change).count()
        }
    }

    impl MembershipSink for RecordingSink {
        fn new_member(&self, address: &str) {
            self.changes.lock().push(MembershipChange::added(address));
        }

        fn remove_member(&self, address: &str) {
            self.changes.lock().push(MembershipChange::removed(address));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_are_queued_without_writing() {
        let (sink, rx) = ReportingSink::new();
        sink.new_member("10.0.0.1");
        sink.remove_member("10.0.0.1");

        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![
            MembershipChange::added("10.0.0.1"),
            MembershipChange::removed("10.0.0.1"),
        ]);
    }

    #[test]
    fn test_writer_emits_json_lines_in_order_and_stops_with_sink() {
        let (sink, rx) = ReportingSink::new();
        sink.new_member("10.0.0.1");
        sink.new_member("fd00::7");
        sink.remove_member("10.0.0.1");
        drop(sink);

        let mut out = Vec::new();
        write_reports(rx, &mut out);

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![
            serde_json::json!({"address": "10.0.0.1", "added": true}),
            serde_json::json!({"address": "fd00::7", "added": true}),
            serde_json::json!({"address": "10.0.0.1", "added": false}),
        ]);
    }

    #[test]
    fn test_report_after_writer_stopped_is_dropped() {
        let (sink, rx) = ReportingSink::new();
        drop(rx);
        sink.new_member("10.0.0.1");
    }
}
