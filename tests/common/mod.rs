//! Shared test infrastructure for query handling integration tests.

#![allow(dead_code)]

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tokio::net::UdpSocket;

use netstate_dns::{DnsRecord, DnsState, Doc, NetworkAuthority, QueryHandler, Upstream};

// --- Constants ---

pub const INSTANCE_SUBNET: &str = "fc75:0:9fb2::/48";
pub const UPSTREAM_A: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 80);

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `QueryHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format bytes.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes, or `None` if nothing was sent.
    pub fn captured(&self) -> Option<Message> {
        let buf = self.buf.lock().unwrap();
        if buf.is_empty() {
            return None;
        }
        Some(Message::from_vec(&buf).expect("failed to parse captured DNS response"))
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(io::Error::other)?;
        Ok(info)
    }
}

// --- Document builders ---

/// The document from the `foo.bar` scenario.
pub fn foo_bar_doc() -> Doc {
    Doc {
        dns: vec![DnsRecord::parse("foo.bar", &["::1", "fc75::9fb2:0:804"], false).unwrap()],
        ..Default::default()
    }
}

pub fn doc_with(records: Vec<DnsRecord>) -> Doc {
    Doc {
        dns: records,
        ..Default::default()
    }
}

// --- Handler construction ---

pub fn build_authority(doc: Doc, upstream: Option<SocketAddr>) -> Arc<NetworkAuthority> {
    Arc::new(NetworkAuthority::new(
        DnsState::with_doc(doc),
        Some(INSTANCE_SUBNET.parse().unwrap()),
        upstream.map(|addr| Upstream::new(addr, Duration::from_millis(500))),
    ))
}

pub fn build_handler(authority: &Arc<NetworkAuthority>) -> QueryHandler {
    QueryHandler::new(Arc::clone(authority))
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_query_bytes_with_edns(name, record_type, id, None)
}

/// Build wire-format bytes for a DNS query, advertising `max_payload` via
/// an OPT record when given.
pub fn build_query_bytes_with_edns(
    name: &str,
    record_type: RecordType,
    id: u16,
    max_payload: Option<u16>,
) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    if let Some(max_payload) = max_payload {
        let mut edns = Edns::new();
        edns.set_max_payload(max_payload);
        msg.set_edns(edns);
    }
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` from a client address.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    request_from_bytes(&build_query_bytes(name, record_type, id))
}

fn request_from_bytes(bytes: &[u8]) -> Request {
    let msg = parse_message_request(bytes);
    Request::new(msg, "[fc75:0:9fb2::99]:40000".parse().unwrap(), Protocol::Udp)
}

/// Run a query through the handler. `None` means no reply was sent.
pub async fn execute_query(
    handler: &QueryHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Option<Message> {
    let request = build_request(name, record_type, id);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.captured()
}

/// Like [`execute_query`], with the query advertising EDNS.
pub async fn execute_edns_query(
    handler: &QueryHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
    max_payload: u16,
) -> Option<Message> {
    let bytes = build_query_bytes_with_edns(name, record_type, id, Some(max_payload));
    let request = request_from_bytes(&bytes);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.captured()
}

// --- Fake upstream ---

/// A UDP resolver answering every query with one A record.
pub struct FakeUpstream {
    pub addr: SocketAddr,
    pub seen: Arc<Mutex<Vec<Message>>>,
}

impl FakeUpstream {
    pub async fn spawn() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("failed to bind fake upstream");
        let addr = socket.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(request) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let reply = answer_with_a(&request);
                log.lock().unwrap().push(request);
                let _ = socket.send_to(&reply, src).await;
            }
        });

        Self { addr, seen }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn answer_with_a(request: &Message) -> Vec<u8> {
    let mut reply = request.clone();
    reply.set_message_type(MessageType::Response);
    reply.set_recursion_available(true);
    reply.set_response_code(ResponseCode::NoError);
    if let Some(query) = request.queries().first() {
        reply.add_answer(Record::from_rdata(
            query.name().clone(),
            300,
            RData::A(A::from(UPSTREAM_A)),
        ));
    }
    reply.to_vec().unwrap()
}

// --- Response helpers ---

/// Extract AAAA addresses from a response.
pub fn extract_aaaa_ips(msg: &Message) -> Vec<Ipv6Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::AAAA(aaaa) => Some(Ipv6Addr::from(*aaaa)),
            _ => None,
        })
        .collect()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert response is successful with exactly the expected IPs.
pub fn assert_aaaa_response(msg: &Message, expected_ips: &[Ipv6Addr]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_aaaa_ips(msg);
    actual.sort();
    let mut expected: Vec<Ipv6Addr> = expected_ips.to_vec();
    expected.sort();
    assert_eq!(
        actual, expected,
        "AAAA records mismatch.\nactual:   {:?}\nexpected: {:?}",
        actual, expected
    );
}
