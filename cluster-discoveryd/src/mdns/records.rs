//! Resource-record composition for the advertised service, and the reverse:
//! folding received answers back into service entries.

use hickory_proto::error::ProtoResult;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::{A, AAAA, PTR, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use shared::protocol::GOODBYE_TTL;
use shared::types::{trim_dot, ServiceEntry};

/// The DNS names and records of one advertised service
#[derive(Debug, Clone)]
pub struct ServiceRecords {
    entry: ServiceEntry,
    service: Name,
    instance: Name,
    host: Name,
    meta: Name,
}

impl ServiceRecords {
    pub fn new(entry: ServiceEntry) -> ProtoResult<Self> {
        let service = Name::from_ascii(entry.service_name())?;
        let instance = instance_name(&entry.instance, &service)?;
        let host = Name::from_ascii(format!("{}.", trim_dot(&entry.host_name)))?;
        let meta = Name::from_ascii(entry.service_type_name())?;

        Ok(Self { entry, service, instance, host, meta })
    }

    pub fn service_name(&self) -> &Name {
        &self.service
    }

    pub fn instance_name(&self) -> &Name {
        &self.instance
    }

    fn ptr(&self, ttl: u32) -> Record {
        Record::from_rdata(self.service.clone(), ttl, RData::PTR(PTR(self.instance.clone())))
    }

    fn meta_ptr(&self, ttl: u32) -> Record {
        Record::from_rdata(self.meta.clone(), ttl, RData::PTR(PTR(self.service.clone())))
    }

    fn srv(&self, ttl: u32) -> Record {
        Record::from_rdata(
            self.instance.clone(),
            ttl,
            RData::SRV(SRV::new(0, 0, self.entry.port, self.host.clone())),
        )
    }

    fn txt(&self, ttl: u32) -> Record {
        // an empty TXT record still carries one empty string on the wire
        let text = if self.entry.text.is_empty() {
            vec![String::new()]
        } else {
            self.entry.text.clone()
        };
        Record::from_rdata(self.instance.clone(), ttl, RData::TXT(TXT::new(text)))
    }

    fn addresses(&self, ttl: u32) -> Vec<Record> {
        let mut records = Vec::new();
        if let Some(v4) = self.entry.addr_ipv4 {
            records.push(Record::from_rdata(self.host.clone(), ttl, RData::A(A(v4))));
        }
        if let Some(v6) = self.entry.addr_ipv6 {
            records.push(Record::from_rdata(self.host.clone(), ttl, RData::AAAA(AAAA(v6))));
        }
        records
    }

    /// Answer to a browse: PTR to the instance, with SRV, TXT and addresses
    /// as additional records
    pub fn browsing_answers(&self, ttl: u32) -> Message {
        let mut msg = response();
        msg.add_answer(self.ptr(ttl));
        msg.add_additional(self.srv(ttl));
        msg.add_additional(self.txt(ttl));
        for record in self.addresses(ttl) {
            msg.add_additional(record);
        }
        msg
    }

    /// Answer to a lookup of the instance name. Also used for announcements.
    pub fn lookup_answers(&self, ttl: u32, address_ttl: u32) -> Message {
        let mut msg = response();
        msg.add_answer(self.srv(ttl));
        msg.add_answer(self.txt(ttl));
        msg.add_answer(self.ptr(ttl));
        msg.add_answer(self.meta_ptr(ttl));
        for record in self.addresses(address_ttl) {
            msg.add_additional(record);
        }
        msg
    }

    /// Every record withdrawn
    pub fn goodbye(&self) -> Message {
        self.lookup_answers(GOODBYE_TTL, GOODBYE_TTL)
    }

    /// Probe asking for existing holders of the instance name, carrying the
    /// records we intend to claim in the authority section
    pub fn probe(&self, ttl: u32) -> Message {
        let mut msg = query();
        msg.add_query(Query::query(self.instance.clone(), RecordType::PTR));
        msg.add_name_server(self.srv(ttl));
        msg.add_name_server(self.txt(ttl));
        msg
    }
}

fn instance_name(instance: &str, service: &Name) -> ProtoResult<Name> {
    let mut name = Name::from_labels(std::iter::once(instance.as_bytes()))?.append_domain(service)?;
    name.set_fqdn(true);
    Ok(name)
}

/// Case-insensitive name comparison, ignoring the trailing root label
pub fn same_name(a: &Name, b: &Name) -> bool {
    trim_dot(&a.to_ascii()).eq_ignore_ascii_case(trim_dot(&b.to_ascii()))
}

fn service_name(service: &str, domain: &str) -> ProtoResult<Name> {
    Name::from_ascii(format!("{}.{}.", trim_dot(service), trim_dot(domain)))
}

fn response() -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_authoritative(true);
    msg
}

fn query() -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(false);
    msg
}

/// Browse for every instance of `service` in `domain`
pub fn browse_query(service: &str, domain: &str) -> ProtoResult<Message> {
    let mut msg = query();
    msg.add_query(Query::query(service_name(service, domain)?, RecordType::PTR));
    Ok(msg)
}

/// Ask for the SRV and TXT records of one instance
pub fn lookup_query(instance: &str, service: &str, domain: &str) -> ProtoResult<Message> {
    let name = instance_name(instance, &service_name(service, domain)?)?;
    let mut msg = query();
    msg.add_query(Query::query(name.clone(), RecordType::SRV));
    msg.add_query(Query::query(name, RecordType::TXT));
    Ok(msg)
}

/// Fold the answer and additional sections of `msg` into one entry per
/// instance of `service`. Entries without an A/AAAA record for their host
/// come back unresolved. The entry TTL is the lowest TTL of its PTR, SRV and
/// TXT records.
pub fn parse_entries(msg: &Message, service: &str, domain: &str) -> ProtoResult<Vec<ServiceEntry>> {
    let service_name = service_name(service, domain)?;
    let records: Vec<&Record> = msg.answers().iter().chain(msg.additionals()).collect();

    let mut entries: Vec<ServiceEntry> = Vec::new();
    for record in &records {
        let (instance, ttl) = match record.data() {
            Some(RData::PTR(ptr)) if same_name(record.name(), &service_name) => (&ptr.0, record.ttl()),
            Some(RData::SRV(_)) | Some(RData::TXT(_)) => (record.name(), record.ttl()),
            _ => continue,
        };
        let Some(entry) = entry_for(&mut entries, instance, &service_name, service, domain) else {
            continue;
        };

        entry.ttl = entry.ttl.min(ttl);
        match record.data() {
            Some(RData::SRV(srv)) => {
                entry.host_name = srv.target().to_ascii();
                entry.port = srv.port();
            }
            Some(RData::TXT(txt)) => {
                entry.text = txt
                    .txt_data()
                    .iter()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    for record in &records {
        let host = trim_dot(&record.name().to_ascii()).to_string();
        for entry in entries.iter_mut().filter(|e| trim_dot(&e.host_name).eq_ignore_ascii_case(&host)) {
            match record.data() {
                Some(RData::A(a)) => entry.addr_ipv4 = Some(a.0),
                Some(RData::AAAA(aaaa)) => entry.addr_ipv6 = Some(aaaa.0),
                _ => {}
            }
        }
    }

    Ok(entries)
}

/// Find or create the entry for `instance`, if it belongs to `service_name`
fn entry_for<'a>(
    entries: &'a mut Vec<ServiceEntry>,
    instance: &Name,
    service_name: &Name,
    service: &str,
    domain: &str,
) -> Option<&'a mut ServiceEntry> {
    if instance.num_labels() != service_name.num_labels() + 1 || !same_name(&instance.base_name(), service_name) {
        return None;
    }
    let label = String::from_utf8_lossy(instance.iter().next()?).into_owned();

    let pos = match entries.iter().position(|e| e.instance == label) {
        Some(pos) => pos,
        None => {
            let mut entry = ServiceEntry::new(&label, service, domain);
            entry.ttl = u32::MAX;
            entries.push(entry);
            entries.len() - 1
        }
    };
    entries.get_mut(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use hickory_proto::serialize::binary::BinEncodable;
    use shared::protocol::{ADDRESS_TTL, RECORD_TTL};

    fn test_entry() -> ServiceEntry {
        let mut entry = ServiceEntry::new("node1", "_docker._cluster", "local");
        entry.host_name = "node1.".to_string();
        entry.port = 9999;
        entry.text = vec!["txtv=1".to_string(), "app=test".to_string()];
        entry.addr_ipv4 = Some(Ipv4Addr::new(10, 0, 0, 1));
        entry
    }

    fn types(records: &[Record]) -> Vec<RecordType> {
        records.iter().map(|r| r.record_type()).collect()
    }

    fn wire(msg: &Message) -> Message {
        Message::from_vec(&msg.to_vec().unwrap()).unwrap()
    }

    #[test]
    fn test_names() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        assert_eq!(records.service_name().to_ascii(), "_docker._cluster.local.");
        assert_eq!(records.instance_name().to_ascii(), "node1._docker._cluster.local.");
    }

    #[test]
    fn test_browsing_answers() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        let msg = records.browsing_answers(RECORD_TTL);

        assert_eq!(msg.message_type(), MessageType::Response);
        assert_eq!(types(msg.answers()), vec![RecordType::PTR]);
        assert_eq!(types(msg.additionals()), vec![RecordType::SRV, RecordType::TXT, RecordType::A]);
        assert!(msg.answers().iter().chain(msg.additionals()).all(|r| r.ttl() == RECORD_TTL));
    }

    #[test]
    fn test_lookup_answers_ttls() {
        let mut entry = test_entry();
        entry.addr_ipv6 = Some("fd00::1".parse().unwrap());
        let records = ServiceRecords::new(entry).unwrap();
        let msg = records.lookup_answers(RECORD_TTL, ADDRESS_TTL);

        assert_eq!(
            types(msg.answers()),
            vec![RecordType::SRV, RecordType::TXT, RecordType::PTR, RecordType::PTR]
        );
        assert!(msg.answers().iter().all(|r| r.ttl() == RECORD_TTL));
        assert_eq!(types(msg.additionals()), vec![RecordType::A, RecordType::AAAA]);
        assert!(msg.additionals().iter().all(|r| r.ttl() == ADDRESS_TTL));

        let meta = &msg.answers()[3];
        assert_eq!(meta.name().to_ascii(), "_services._dns-sd._udp.local.");
    }

    #[test]
    fn test_goodbye_withdraws_every_record() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        let msg = records.goodbye();
        assert!(msg.answers().iter().chain(msg.additionals()).all(|r| r.ttl() == 0));
    }

    #[test]
    fn test_probe_is_query_with_authority() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        let msg = records.probe(RECORD_TTL);

        assert_eq!(msg.message_type(), MessageType::Query);
        assert!(!msg.recursion_desired());
        assert_eq!(msg.queries().len(), 1);
        assert_eq!(msg.queries()[0].name(), records.instance_name());
        assert_eq!(msg.queries()[0].query_type(), RecordType::PTR);
        assert!(msg.answers().is_empty());
        assert_eq!(types(msg.name_servers()), vec![RecordType::SRV, RecordType::TXT]);
    }

    #[test]
    fn test_parse_browsing_answer_is_resolved() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        let msg = wire(&records.browsing_answers(RECORD_TTL));

        let entries = parse_entries(&msg, "_docker._cluster", "local").unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.instance, "node1");
        assert_eq!(entry.host_name, "node1.");
        assert_eq!(entry.port, 9999);
        assert_eq!(entry.text, vec!["txtv=1", "app=test"]);
        assert_eq!(entry.addr_ipv4, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(entry.ttl, RECORD_TTL);
    }

    #[test]
    fn test_parse_goodbye_has_zero_ttl() {
        let records = ServiceRecords::new(test_entry()).unwrap();
        let entries = parse_entries(&wire(&records.goodbye()), "_docker._cluster", "local").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ttl, 0);
        assert!(entries[0].is_resolved());
    }

    #[test]
    fn test_parse_ptr_only_is_unresolved() {
        let service = Name::from_ascii("_docker._cluster.local.").unwrap();
        let instance = Name::from_ascii("node2._docker._cluster.local.").unwrap();
        let mut msg = response();
        msg.add_answer(Record::from_rdata(service, RECORD_TTL, RData::PTR(PTR(instance))));

        let entries = parse_entries(&wire(&msg), "_docker._cluster", "local").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instance, "node2");
        assert!(!entries[0].is_resolved());
        assert_eq!(entries[0].port, 0);
    }

    #[test]
    fn test_parse_ignores_other_services() {
        let mut entry = test_entry();
        entry.service = "_http._tcp".to_string();
        let records = ServiceRecords::new(entry).unwrap();

        let entries = parse_entries(&wire(&records.browsing_answers(RECORD_TTL)), "_docker._cluster", "local").unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_lookup_query_names_instance() {
        let msg = lookup_query("node2", "_docker._cluster", "local").unwrap();
        assert_eq!(msg.queries().len(), 2);
        assert!(msg.queries().iter().all(|q| q.name().to_ascii() == "node2._docker._cluster.local."));
        assert!(msg.answers().is_empty());
    }
}
