use std::net::SocketAddr;
use std::sync::Arc;
use hickory_proto::op::{Message, MessageType};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::types::ServiceEntry;
use crate::cache::membership::MembershipCache;
use crate::cache_manager;
use crate::config::Config;
use crate::error::Result;
use crate::local::LocalAddresses;
use crate::mdns::advertise;
use crate::mdns::browser::{self, Resolver};
use crate::mdns::records::ServiceRecords;
use crate::mdns::responder::Responder;
use crate::mdns::transport::{Family, Multicaster, Transport};
use crate::seed;
use crate::sink::MembershipSink;

const MAX_PACKET_SIZE: usize = 65536;

/// Protocol state of one node: its responder, resolver and membership view.
pub struct Node {
    pub responder: Arc<Responder>,
    pub resolver: Arc<Resolver>,
    pub cache: Arc<MembershipCache>,
    pub local: Arc<LocalAddresses>,
}

impl Node {
    /// Returns the node and the receiving end of its lookup queue
    pub fn new(
        entry: ServiceEntry,
        mut local: LocalAddresses,
        multicaster: Arc<dyn Multicaster>,
        sink: Arc<dyn MembershipSink>,
        cancel: CancellationToken,
    ) -> Result<(Self, flume::Receiver<ServiceEntry>)> {
        local.include_entry(&entry);
        let local = Arc::new(local);
        let cache = Arc::new(MembershipCache::new(sink));

        let (resolver, lookup_rx) = Resolver::new(
            &entry.service,
            &entry.domain,
            cache.clone(),
            local.clone(),
            multicaster.clone(),
        );
        let responder = Responder::new(ServiceRecords::new(entry)?, multicaster, cancel);

        let node = Self {
            responder: Arc::new(responder),
            resolver: Arc::new(resolver),
            cache,
            local,
        };
        Ok((node, lookup_rx))
    }

    /// Dispatch one datagram: queries go to the responder, responses to the
    /// resolver. Undecodable packets are logged and dropped.
    pub async fn handle_packet(&self, packet: &[u8], from: SocketAddr) {
        let msg = match Message::from_vec(packet) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Failed to unpack packet from {}: {}", from, e);
                return;
            }
        };

        match msg.message_type() {
            MessageType::Query => self.responder.handle_query(&msg).await,
            MessageType::Response => self.resolver.handle_response(&msg),
        }
    }
}

/// A running discovery session: every task of one node, torn down together.
pub struct MembershipSession {
    node: Arc<Node>,
    transport: Arc<Transport>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MembershipSession {
    /// Validate configuration, bind the sockets and start every task.
    pub async fn start(config: &Config, sink: Arc<dyn MembershipSink>) -> Result<Self> {
        config.membership.validate()?;
        let peers = seed::parse_static_peers(&config.discovery.static_peers)?;
        let entry = advertise::build_entry(&config.discovery).await?;
        let transport = Arc::new(Transport::bind(config.discovery.interface())?);

        let cancel = CancellationToken::new();
        let (node, lookup_rx) = Node::new(
            entry,
            LocalAddresses::discover(),
            transport.clone(),
            sink.clone(),
            cancel.clone(),
        )?;
        let node = Arc::new(node);
        tracing::info!(
            "Registering {} on {:?}",
            node.responder.records().instance_name(),
            transport.families()
        );

        let mut tasks = Vec::new();
        for family in transport.families() {
            if let Some(socket) = transport.socket(family) {
                tasks.push(tokio::spawn(receive_loop(socket, family, node.clone(), cancel.clone())));
            }
        }

        let responder = node.responder.clone();
        tasks.push(tokio::spawn(async move { responder.probe_and_announce().await }));

        tasks.push(tokio::spawn(browser::run_lookups(
            node.resolver.clone(),
            lookup_rx,
            config.membership.lookup_holdoff(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(browser::run_browser(
            node.resolver.clone(),
            config.membership.browse_interval(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(cache_manager::run(
            node.cache.clone(),
            config.membership.sweep_interval(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(seed::run(
            peers,
            node.local.clone(),
            sink,
            config.membership.seed_delay(),
            cancel.clone(),
        )));

        Ok(Self { node, transport, cancel, tasks })
    }

    pub fn members(&self) -> Vec<String> {
        self.node.cache.members()
    }

    /// Send the goodbye, stop every task and release the sockets.
    pub async fn shutdown(self) {
        self.node.responder.shutdown().await;
        self.cancel.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Session task failed: {}", e);
            }
        }

        self.transport.close();
        tracing::info!("Membership session stopped with {} live member(s)", self.node.cache.len());
    }
}

/// Read datagrams from one socket until cancelled. A bad packet or a failed
/// read never ends the loop.
async fn receive_loop(socket: Arc<UdpSocket>, family: Family, node: Arc<Node>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok((n, from)) => node.handle_packet(&buf[..n], from).await,
                Err(e) => tracing::debug!("{} receive error: {}", family, e),
            },
            _ = cancel.cancelled() => {
                tracing::debug!("{} receive loop shutting down", family);
                break;
            }
        }
    }
}
