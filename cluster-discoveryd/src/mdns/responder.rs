use std::sync::Arc;
use std::time::Duration;
use hickory_proto::op::Message;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use shared::protocol::{ADDRESS_TTL, RECORD_TTL};
use crate::mdns::records::{same_name, ServiceRecords};
use crate::mdns::transport::Multicaster;

const PROBE_COUNT: usize = 3;
const PROBE_JITTER_MS: u64 = 250;
const ANNOUNCE_COUNT: usize = 3;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Idle,
    Probing,
    Announcing,
    Serving,
    ShuttingDown,
    Stopped,
}

/// mDNS responder for one advertised service.
///
/// Probing only sends; a conflicting holder of the name is not detected
/// and the instance is never renamed.
pub struct Responder {
    records: ServiceRecords,
    multicaster: Arc<dyn Multicaster>,
    state: Mutex<ResponderState>,
    cancel: CancellationToken,
}

impl Responder {
    pub fn new(records: ServiceRecords, multicaster: Arc<dyn Multicaster>, cancel: CancellationToken) -> Self {
        Self {
            records,
            multicaster,
            state: Mutex::new(ResponderState::Idle),
            cancel,
        }
    }

    pub fn state(&self) -> ResponderState {
        *self.state.lock()
    }

    pub fn records(&self) -> &ServiceRecords {
        &self.records
    }

    /// Move from `from` to `to`; false if the responder is elsewhere
    fn transition(&self, from: ResponderState, to: ResponderState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        tracing::debug!("Responder {:?} -> {:?}", *state, to);
        *state = to;
        true
    }

    /// Sleep unless cancelled; false when cancelled
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Probe for the instance name, then announce the full record set.
    /// Ends in `Serving` unless shutdown interrupts it.
    pub async fn probe_and_announce(&self) {
        if !self.transition(ResponderState::Idle, ResponderState::Probing) {
            return;
        }

        let probe = self.records.probe(RECORD_TTL);
        for _ in 0..PROBE_COUNT {
            self.multicaster.multicast(&probe).await;
            let jitter = rand::thread_rng().gen_range(0..PROBE_JITTER_MS);
            if !self.pause(Duration::from_millis(jitter)).await {
                return;
            }
        }

        if !self.transition(ResponderState::Probing, ResponderState::Announcing) {
            return;
        }

        let announcement = self.records.lookup_answers(RECORD_TTL, ADDRESS_TTL);
        for _ in 0..ANNOUNCE_COUNT {
            if self.state() != ResponderState::Announcing {
                return;
            }
            self.multicaster.multicast(&announcement).await;
            if !self.pause(ANNOUNCE_INTERVAL).await {
                return;
            }
        }

        if self.transition(ResponderState::Announcing, ResponderState::Serving) {
            tracing::info!("Serving {}", self.records.instance_name());
        }
    }

    /// Compose the replies for an inbound message. Only plain questions are
    /// answered: anything carrying answers or authority records is dropped,
    /// and nothing is answered before the name has been probed.
    pub fn answer(&self, query: &Message) -> Vec<Message> {
        if !matches!(self.state(), ResponderState::Announcing | ResponderState::Serving) {
            return Vec::new();
        }
        if !query.answers().is_empty() || !query.name_servers().is_empty() {
            return Vec::new();
        }

        query
            .queries()
            .iter()
            .filter_map(|question| {
                if same_name(question.name(), self.records.service_name()) {
                    Some(self.records.browsing_answers(RECORD_TTL))
                } else if same_name(question.name(), self.records.instance_name()) {
                    Some(self.records.lookup_answers(RECORD_TTL, ADDRESS_TTL))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Answer an inbound message by multicast
    pub async fn handle_query(&self, query: &Message) {
        for reply in self.answer(query) {
            self.multicaster.multicast(&reply).await;
        }
    }

    /// Send the goodbye and stop. Only the first call has any effect.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, ResponderState::ShuttingDown | ResponderState::Stopped) {
                return;
            }
            *state = ResponderState::ShuttingDown;
        }

        tracing::info!("Unregistering {}", self.records.instance_name());
        self.multicaster.multicast(&self.records.goodbye()).await;

        *self.state.lock() = ResponderState::Stopped;
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::{Name, RecordType};
    use shared::types::ServiceEntry;
    use crate::mdns::records;
    use crate::mdns::transport::testing::RecordingMulticaster;

    fn responder() -> (Arc<Responder>, Arc<RecordingMulticaster>) {
        let mut entry = ServiceEntry::new("node1", "_docker._cluster", "local");
        entry.host_name = "node1.".to_string();
        entry.port = 9999;
        entry.addr_ipv4 = Some(Ipv4Addr::new(10, 0, 0, 1));
        entry.ttl = RECORD_TTL;

        let multicaster = Arc::new(RecordingMulticaster::default());
        let responder = Responder::new(
            ServiceRecords::new(entry).unwrap(),
            multicaster.clone(),
            CancellationToken::new(),
        );
        (Arc::new(responder), multicaster)
    }

    fn question(name: &str, record_type: RecordType) -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), record_type));
        msg
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_then_announce() {
        let (responder, multicaster) = responder();
        assert_eq!(responder.state(), ResponderState::Idle);

        responder.probe_and_announce().await;
        assert_eq!(responder.state(), ResponderState::Serving);

        let sent = multicaster.sent();
        assert_eq!(sent.len(), PROBE_COUNT + ANNOUNCE_COUNT);
        assert!(sent[..PROBE_COUNT].iter().all(|m| m.message_type() == MessageType::Query));
        assert!(sent[PROBE_COUNT..].iter().all(|m| m.message_type() == MessageType::Response));
        assert!(sent[PROBE_COUNT..].iter().all(|m| m.answers().len() == 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_answers_before_probing_completes() {
        let (responder, _multicaster) = responder();
        let query = question("_docker._cluster.local.", RecordType::PTR);
        assert!(responder.answer(&query).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_browse_and_lookup() {
        let (responder, _multicaster) = responder();
        responder.probe_and_announce().await;

        let browse = responder.answer(&question("_docker._cluster.local.", RecordType::PTR));
        assert_eq!(browse.len(), 1);
        assert_eq!(browse[0].answers()[0].record_type(), RecordType::PTR);
        assert_eq!(browse[0].answers()[0].ttl(), RECORD_TTL);

        let lookup = responder.answer(&question("NODE1._docker._cluster.local.", RecordType::SRV));
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup[0].additionals()[0].ttl(), ADDRESS_TTL);

        assert!(responder.answer(&question("_http._tcp.local.", RecordType::PTR)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_messages_with_answers_or_authority() {
        let (responder, _multicaster) = responder();
        responder.probe_and_announce().await;

        // another node's probe carries authority records
        let probe = responder.records().probe(RECORD_TTL);
        assert!(responder.answer(&probe).is_empty());

        let mut with_answer = question("_docker._cluster.local.", RecordType::PTR);
        with_answer.add_answer(responder.records().browsing_answers(RECORD_TTL).answers()[0].clone());
        assert!(responder.answer(&with_answer).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_query_multicasts_each_answer() {
        let (responder, multicaster) = responder();
        responder.probe_and_announce().await;
        multicaster.take();

        let mut query = question("_docker._cluster.local.", RecordType::PTR);
        query.add_query(Query::query(
            Name::from_ascii("node1._docker._cluster.local.").unwrap(),
            RecordType::SRV,
        ));
        responder.handle_query(&query).await;
        assert_eq!(multicaster.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let (responder, multicaster) = responder();
        responder.probe_and_announce().await;
        multicaster.take();

        responder.shutdown().await;
        responder.shutdown().await;

        assert_eq!(responder.state(), ResponderState::Stopped);
        let sent = multicaster.sent();
        assert_eq!(sent.len(), 1);
        let goodbye = records::parse_entries(&sent[0], "_docker._cluster", "local").unwrap();
        assert_eq!(goodbye[0].ttl, 0);
        assert!(responder.answer(&question("_docker._cluster.local.", RecordType::PTR)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_announcing() {
        let (responder, multicaster) = responder();
        let task = {
            let responder = responder.clone();
            tokio::spawn(async move { responder.probe_and_announce().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(responder.state(), ResponderState::Announcing);
        responder.shutdown().await;
        task.await.unwrap();

        assert_eq!(responder.state(), ResponderState::Stopped);
        let last = multicaster.sent().pop().unwrap();
        assert!(last.answers().iter().all(|r| r.ttl() == 0));
    }
}
