//! Query resolution against the live network document.
//!
//! [`NetworkAuthority::resolve`] matches a query against the current
//! snapshot:
//!
//! - `AAAA <label>` answers with the record's addresses, minus localized
//!   addresses outside the instance subnet.
//! - `A <label>` for a label we only hold AAAA records for answers NXDOMAIN,
//!   so IPv6-preferring clients move straight on to AAAA.
//! - `PTR <reverse key>` answers with the label owning that address.
//!
//! Anything else is left to [`NetworkAuthority::delegate`], which hands the
//! raw query to the upstream resolver.

use hickory_proto::op::{Edns, Header, Message, Query, ResponseCode};
use hickory_proto::rr::rdata::{AAAA, PTR};
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use ipnetwork::Ipv6Network;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::DnsConfig;
use crate::diff::Diff;
use crate::error::DnsError;
use crate::metrics::{self, DelegationResult, QueryResult, Timer};
use crate::model::Doc;
use crate::state::{DnsState, Snapshot};
use crate::upstream::Upstream;

/// Answers queries from the network document, delegating the rest upstream.
pub struct NetworkAuthority {
    state: DnsState,
    instance_subnet: Option<Ipv6Network>,
    upstream: Option<Upstream>,
}

impl NetworkAuthority {
    /// Create an authority over `state`.
    pub fn new(
        state: DnsState,
        instance_subnet: Option<Ipv6Network>,
        upstream: Option<Upstream>,
    ) -> Self {
        Self {
            state,
            instance_subnet,
            upstream,
        }
    }

    /// Create an authority from configuration, discovering the upstream
    /// resolver from the host when none is configured.
    pub fn from_config(config: &DnsConfig, state: DnsState) -> Self {
        let upstream = match config.upstream {
            Some(addr) => Some(Upstream::new(addr, config.delegation_timeout())),
            None => match Upstream::discover(config.listen_addr, config.delegation_timeout()) {
                Ok(upstream) => Some(upstream),
                Err(e) => {
                    warn!("No upstream resolver, unmatched queries will go unanswered: {}", e);
                    None
                }
            },
        };

        Self::new(state, config.instance_subnet, upstream)
    }

    /// The live state.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// The upstream resolver, if any.
    pub fn upstream(&self) -> Option<&Upstream> {
        self.upstream.as_ref()
    }

    /// Replace the whole document.
    pub fn update(&self, doc: Doc) -> Arc<Snapshot> {
        self.state.update(doc)
    }

    /// Apply a diff to the current document.
    pub fn apply(&self, diff: &Diff) -> Arc<Snapshot> {
        self.state.apply(diff)
    }

    fn is_local(&self, addr: &Ipv6Addr) -> bool {
        self.instance_subnet
            .is_some_and(|subnet| subnet.contains(*addr))
    }

    /// Answer `query` from the current document, or `None` if it does not
    /// match anything we serve.
    pub fn resolve(&self, query: &Message) -> Option<Message> {
        let [question] = query.queries() else {
            trace!(count = query.queries().len(), "not a single-question query");
            return None;
        };
        if question.query_class() != DNSClass::IN {
            return None;
        }

        let snapshot = self.state.snapshot();
        let name = question.name().to_string();

        match question.query_type() {
            RecordType::AAAA => self.resolve_aaaa(&snapshot, query, question, &name),
            RecordType::A => {
                if snapshot.has_label(&name) {
                    debug!(name = %name, "A lookup for AAAA-only name: NXDOMAIN");
                    Some(response(query, ResponseCode::NXDomain, Vec::new()))
                } else {
                    None
                }
            }
            RecordType::PTR => {
                let owner = snapshot.lookup_reverse(&name)?;
                let target = match owner.dns_name() {
                    Ok(target) => target,
                    Err(e) => {
                        debug!(label = %owner.label, "PTR target is not a valid name: {}", e);
                        return None;
                    }
                };
                debug!(name = %name, target = %target, "PTR lookup");
                let record = in_record(question, owner.ttl(), RData::PTR(PTR(target)));
                Some(response(query, ResponseCode::NoError, vec![record]))
            }
            rtype => {
                trace!(name = %name, rtype = ?rtype, "unsupported record type");
                None
            }
        }
    }

    fn resolve_aaaa(
        &self,
        snapshot: &Snapshot,
        query: &Message,
        question: &Query,
        name: &str,
    ) -> Option<Message> {
        let mut answers = Vec::new();
        let mut dropped = 0;

        for record in snapshot.lookup_forward(name) {
            for addr in &record.addrs {
                if !record.localize || self.is_local(addr) {
                    answers.push(in_record(
                        question,
                        record.ttl(),
                        RData::AAAA(AAAA::from(*addr)),
                    ));
                } else {
                    dropped += 1;
                }
            }
        }
        metrics::record_localized_dropped(dropped);

        if answers.is_empty() {
            debug!(name = %name, dropped, "AAAA lookup: no records to return");
            return None;
        }

        debug!(name = %name, count = answers.len(), "AAAA lookup: returning records");
        metrics::record_aaaa_addrs_returned(answers.len());
        Some(response(query, ResponseCode::NoError, answers))
    }

    /// Forward `query` to the upstream resolver.
    ///
    /// Failures are logged and reported as `None`; they never escape the
    /// query that caused them.
    pub async fn delegate(&self, query: &Message) -> Option<Message> {
        let Some(upstream) = &self.upstream else {
            metrics::record_delegation(DelegationResult::Unavailable);
            return None;
        };

        match upstream.exchange(query).await {
            Ok(response) => {
                metrics::record_delegation(DelegationResult::Ok);
                Some(response)
            }
            Err(DnsError::Timeout(addr)) => {
                warn!(upstream = %addr, id = query.id(), "upstream delegation timed out");
                metrics::record_delegation(DelegationResult::Timeout);
                None
            }
            Err(e) => {
                warn!(
                    upstream = %upstream.addr(),
                    id = query.id(),
                    "upstream delegation failed: {}",
                    e
                );
                metrics::record_delegation(DelegationResult::Error);
                None
            }
        }
    }

    /// Resolve locally, falling back to the upstream resolver.
    pub async fn answer(&self, query: &Message) -> Option<Message> {
        let timer = Timer::start();
        let rtype = query
            .queries()
            .first()
            .map(|q| format!("{:?}", q.query_type()))
            .unwrap_or_else(|| "none".to_string());

        if let Some(response) = self.resolve(query) {
            let result = if response.response_code() == ResponseCode::NXDomain {
                QueryResult::NxDomain
            } else {
                QueryResult::Answered
            };
            metrics::record_query(&rtype, result, timer.elapsed());
            return Some(response);
        }

        let response = self.delegate(query).await;
        let result = if response.is_some() {
            QueryResult::Delegated
        } else {
            QueryResult::Unanswered
        };
        metrics::record_query(&rtype, result, timer.elapsed());
        response
    }
}

fn in_record(question: &Query, ttl: u32, rdata: RData) -> Record {
    let mut record = Record::from_rdata(question.name().clone(), ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}

fn response(query: &Message, code: ResponseCode, answers: Vec<Record>) -> Message {
    let mut header = Header::response_from_request(query.header());
    header.set_authoritative(true);
    header.set_recursion_available(true);
    header.set_response_code(code);

    let mut message = Message::new();
    message.set_header(header);
    message.add_queries(query.queries().iter().cloned());
    message.add_answers(answers);
    if let Some(requested) = query.extensions() {
        message.set_edns(echo_edns(requested));
    }
    message
}

/// OPT record for a reply: the client's payload size (at least 512) and
/// EDNS version.
pub fn echo_edns(requested: &Edns) -> Edns {
    let mut edns = Edns::new();
    edns.set_max_payload(requested.max_payload().max(512));
    edns.set_version(requested.version());
    edns
}
