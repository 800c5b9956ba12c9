//! Fingerprinting sessions against a simulated peer

use lmp_fingerprint::address::{BluetoothDeviceAddress, ConnectionHandle};
use lmp_fingerprint::config::{Config, ProbeKind, ProbeSet, RetryLimits};
use lmp_fingerprint::errors::ErrorCode;
use lmp_fingerprint::filter::HeaderFilter;
use lmp_fingerprint::log_parse::{parse_line, Record};
use lmp_fingerprint::pdu::request::RequestKind;
use lmp_fingerprint::report::{self, MemorySink};
use lmp_fingerprint::session::SessionState;
use lmp_fingerprint::{Error, Event, Fingerprinter, Transmit};
use quickcheck_macros::quickcheck;
use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const PREFIX: &str = "BTC_2THPRINT:";

/// The most transmit opportunities a simulated session is given
const OPPORTUNITIES: usize = 1024;

fn init_logging() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

fn handle() -> ConnectionHandle {
    ConnectionHandle::try_from(0x0042).unwrap()
}

/// Wrap an LMP body with the baseband and ACL headers
fn lmp(body: &[u8]) -> Vec<u8> {
    let mut pdu = vec![0x99, 0x03];

    pdu.extend_from_slice(&((body.len() as u16) << 3 | 0x7).to_le_bytes());

    pdu.extend_from_slice(body);

    pdu
}

fn features_res(features: [u8; 8]) -> Vec<u8> {
    let mut body = vec![40 << 1];

    body.extend_from_slice(&features);

    lmp(&body)
}

fn features_res_ext(page: u8, max_page: u8, features: [u8; 8]) -> Vec<u8> {
    let mut body = vec![127 << 1, 4, page, max_page];

    body.extend_from_slice(&features);

    lmp(&body)
}

fn not_accepted(opcode: u8, error: u8) -> Vec<u8> {
    lmp(&[4 << 1, opcode, error])
}

/// A peer answering LMP requests
#[derive(Clone)]
struct Peer {
    features: [u8; 8],
    /// The answer to an `LMP_features_req` with every bit set
    probe_features: Option<[u8; 8]>,
    /// Extended pages from page 1
    pages: Vec<[u8; 8]>,
    /// Values of pages beyond the last page
    leaked: Vec<(u8, [u8; 8])>,
    name: Vec<u8>,
    version: Option<(u8, u16, u16)>,
    accepts_weak_key: bool,
}

impl Default for Peer {
    fn default() -> Self {
        Peer {
            features: [0xBF, 0xFE, 0xCF, 0xFE, 0xDB, 0xFF, 0x7B, 0x87],
            probe_features: None,
            pages: vec![[0x0F, 0, 0, 0, 0, 0, 0, 0], [0x0F, 0x03, 0, 0, 0, 0, 0, 0]],
            leaked: Vec::new(),
            name: b"Galaxy Buds2 Pro (4A2F)".to_vec(),
            version: Some((11, 0x0075, 0x1234)),
            accepts_weak_key: false,
        }
    }
}

impl Peer {
    fn answer(&self, request: &[u8]) -> Option<Vec<u8>> {
        match request[4] >> 1 {
            39 if request[5..13].iter().all(|b| *b == 0xff) => {
                Some(features_res(self.probe_features.unwrap_or(self.features)))
            }
            39 => Some(features_res(self.features)),
            127 => match request[5] {
                3 => {
                    let page = request[6];

                    let max_page = self.pages.len() as u8;

                    let features = match page {
                        0 => self.features,
                        p if p <= max_page => self.pages[p as usize - 1],
                        p => self
                            .leaked
                            .iter()
                            .find(|(leaked, _)| *leaked == p)
                            .map_or([0; 8], |(_, value)| *value),
                    };

                    Some(features_res_ext(page, max_page, features))
                }
                33 => Some(lmp(&[127 << 1, 34])),
                _ => None,
            },
            1 => {
                let offset = request[5] as usize;

                let mut fragment = [0u8; 14];

                let available = self.name.get(offset..).unwrap_or_default();

                let len = available.len().min(14);

                fragment[..len].copy_from_slice(&available[..len]);

                let mut body = vec![2 << 1, offset as u8, self.name.len() as u8];

                body.extend_from_slice(&fragment);

                Some(lmp(&body))
            }
            37 => self.version.map(|(version, company_id, subversion)| {
                let c = company_id.to_le_bytes();

                let s = subversion.to_le_bytes();

                lmp(&[38 << 1, version, c[0], c[1], s[0], s[1]])
            }),
            16 if self.accepts_weak_key => Some(lmp(&[3 << 1, 16])),
            16 => Some(not_accepted(16, 0x25)),
            19 => Some(not_accepted(19, 0x21)),
            _ => None,
        }
    }
}

type TestFingerprinter = Fingerprinter<HeaderFilter, MemorySink>;

fn fingerprinter(config: Config) -> TestFingerprinter {
    init_logging();

    Fingerprinter::new(HeaderFilter::new(), MemorySink::new(), config).unwrap()
}

/// Run a session until nothing is sent and every answer was delivered
///
/// An answer is delivered `latency` transmit opportunities after its request was sent.
fn run(fingerprinter: &mut TestFingerprinter, peer: &Peer, latency: usize) -> Vec<Event> {
    let mut in_flight = VecDeque::new();

    let mut events = Vec::new();

    for _ in 0..OPPORTUNITIES {
        let sent = match fingerprinter.next_request(handle(), Instant::now()).unwrap() {
            Some(request) => {
                in_flight.extend(peer.answer(&request));

                true
            }
            None => false,
        };

        if in_flight.len() > latency || !sent {
            match in_flight.pop_front() {
                Some(answer) => events.extend(fingerprinter.receive(handle(), &answer).unwrap()),
                None if !sent => break,
                None => (),
            }
        }
    }

    events
}

fn count(sink: &MemorySink, pattern: &str) -> usize {
    sink.lines().iter().filter(|line| line.contains(pattern)).count()
}

#[test]
fn complete_fingerprint() {
    let mut fingerprinter = fingerprinter(Config::default());

    let address = BluetoothDeviceAddress(rand::thread_rng().gen());

    fingerprinter.start_session(handle(), Some(address)).unwrap();

    let peer = Peer::default();

    let events = run(&mut fingerprinter, &peer, 0);

    assert_eq!(vec![Event::Complete], events);

    let session = fingerprinter.session(handle()).unwrap();

    assert_eq!(SessionState::Complete, session.state());

    assert_eq!(peer.name.as_slice(), session.device_name().unwrap().as_bytes());

    assert_eq!(Some(2), session.feature_pages().max_page());

    assert_eq!(2, session.feature_pages().table().len());

    assert_eq!(2, session.counter().sent(RequestKind::Name));

    assert_eq!(1, session.counter().sent(RequestKind::Version));

    let sink = fingerprinter.sink();

    assert_eq!(1, count(sink, report::ALL_RESPONSES_RECEIVED));

    assert!(sink.contains(&format!("{} {}", report::LOG_ENTRY, address)));

    assert!(sink.contains("LMP_OP_0x02 Galaxy Buds2 Pro (4A2F)"));

    assert!(sink.contains("LMP_OP_0x26 0x0B 0x75 0x00 0x34 0x12"));

    assert!(sink.contains("LMP_OP_0x7F 0x04 0x02 0x02 0x0F 0x03 0x00"));

    // nothing is sent once the fingerprint is complete
    assert_eq!(None, fingerprinter.next_request(handle(), Instant::now()).unwrap());

    fingerprinter.disconnected(handle()).unwrap();

    assert_eq!(0, count(fingerprinter.sink(), report::FINGERPRINT_INCOMPLETE));

    assert!(fingerprinter.session(handle()).is_none());
}

#[test]
fn every_record_is_readable() {
    let config = Config {
        probes: ProbeSet::all(),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    run(&mut fingerprinter, &Peer::default(), 8);

    fingerprinter.disconnected(handle()).unwrap();

    let records = fingerprinter
        .sink()
        .lines()
        .iter()
        .map(|line| parse_line(line, PREFIX).unwrap())
        .collect::<Vec<_>>();

    assert_eq!(Some(&Record::NewRun), records.first());

    assert!(records.contains(&Record::Complete));

    assert!(records.contains(&Record::Version {
        version: 11,
        company_id: 0x0075,
        subversion: 0x1234
    }));
}

#[test]
fn page_beyond_declared_maximum_is_discarded() {
    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        pages: vec![[0x01, 0, 0, 0, 0, 0, 0, 0]],
        ..Default::default()
    };

    run(&mut fingerprinter, &peer, 0);

    // an answer to a request sent before the maximum was known
    fingerprinter
        .receive(handle(), &features_res_ext(2, 1, [0xFF; 8]))
        .unwrap();

    let session = fingerprinter.session(handle()).unwrap();

    assert_eq!(Some(1), session.feature_pages().max_page());

    assert_eq!(None, session.feature_pages().table().get(2));

    assert_eq!(1, session.counter().sent(RequestKind::FeaturesExt));

    assert!(!fingerprinter.sink().contains("LMP_OP_0x7F 0x04 0x02"));
}

fn consistency_check(probe_features: [u8; 8]) -> MemorySink {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::MalformedFeatures),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        features: 0xAABBCCDDEEFF0011u64.to_be_bytes(),
        probe_features: Some(probe_features),
        ..Default::default()
    };

    run(&mut fingerprinter, &peer, 4);

    assert_eq!(
        1,
        fingerprinter
            .session(handle())
            .unwrap()
            .counter()
            .received(RequestKind::MalformedFeatures)
    );

    fingerprinter.into_sink()
}

#[test]
fn features_response_independent_of_the_request() {
    let sink = consistency_check(0xAABBCCDDEEFF0011u64.to_be_bytes());

    assert_eq!(1, count(&sink, report::REQUEST_INDEPENDENT));

    assert_eq!(0, count(&sink, report::REQUEST_DEPENDENT));
}

#[test]
fn features_response_dependent_on_the_request() {
    let sink = consistency_check([0xFF; 8]);

    assert_eq!(1, count(&sink, report::REQUEST_DEPENDENT));

    assert!(sink.contains(
        "BASELINE 0xAA 0xBB 0xCC 0xDD 0xEE 0xFF 0x00 0x11 PROBE 0xFF 0xFF 0xFF 0xFF 0xFF 0xFF 0xFF 0xFF"
    ));
}

#[test]
fn weak_encryption_key() {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::EncryptionKeySize),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        accepts_weak_key: true,
        ..Default::default()
    };

    let events = run(&mut fingerprinter, &peer, 4);

    assert!(events.contains(&Event::WeakKeyAccepted));

    assert!(fingerprinter.session(handle()).unwrap().weak_key_accepted());

    fingerprinter.disconnected(handle()).unwrap();

    let sink = fingerprinter.sink();

    assert_eq!(1, count(sink, "BEGINNING EXPERIMENTAL CHECKS: encryption key size"));

    assert_eq!(1, count(sink, report::WEAK_KEY_ACCEPTED));

    assert_eq!(1, count(sink, report::WEAK_KEY_TEARDOWN));
}

#[test]
fn rejected_weak_encryption_key() {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::EncryptionKeySize),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let events = run(&mut fingerprinter, &Peer::default(), 4);

    assert!(events.contains(&Event::Rejected {
        kind: Some(RequestKind::EncryptionKeySize),
        error: ErrorCode::EncryptionModeNotAcceptable
    }));

    fingerprinter.stop_session(handle()).unwrap();

    assert!(fingerprinter.sink().contains("LMP_OP_0x04 0x10 0x25"));

    assert_eq!(0, count(fingerprinter.sink(), "KNOB"));
}

#[test]
fn info_leak_is_confirmed_by_a_requery() {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::ExtendedFeaturesOverRead),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let now = Instant::now();

    // features, page 1, name, and version without any answer
    for _ in 0..4 {
        fingerprinter.next_request(handle(), now).unwrap().unwrap();
    }

    fingerprinter.requery_feature_page(handle(), 5).unwrap();

    let requery = fingerprinter.next_request(handle(), now).unwrap().unwrap();

    assert_eq!([0xfeu8, 3, 5], requery[4..7]);

    fingerprinter
        .receive(handle(), &features_res_ext(1, 1, [0; 8]))
        .unwrap();

    let leak = [0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0];

    let first = fingerprinter.receive(handle(), &features_res_ext(5, 1, leak)).unwrap();

    let second = fingerprinter.receive(handle(), &features_res_ext(5, 1, leak)).unwrap();

    match (first.as_slice(), second.as_slice()) {
        ([Event::InfoLeak(first)], [Event::InfoLeak(second)]) => {
            assert_eq!(0xDEADBEEF, first.value);

            assert_eq!(0, first.confirmations);

            assert_eq!(1, second.confirmations);

            assert_eq!(0, second.mismatches);
        }
        _ => panic!("expected two info leak events, got {:?} and {:?}", first, second),
    }

    assert!(fingerprinter.sink().contains(
        "POSSIBLE INFO LEAK: EXT PAGE 0x05 = 0x00000000DEADBEEF CONFIRMATIONS 1 MISMATCHES 0"
    ));
}

#[test]
fn over_read_walks_every_page() {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::ExtendedFeaturesOverRead),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        leaked: vec![(200, [0x01, 0, 0, 0, 0, 0, 0, 0])],
        ..Default::default()
    };

    let events = run(&mut fingerprinter, &peer, 0);

    let session = fingerprinter.session(handle()).unwrap();

    assert_eq!(255, session.counter().sent(RequestKind::FeaturesExt));

    assert!(session.feature_pages().leaks().contains(200));

    assert_eq!(1, session.feature_pages().leaks().len());

    assert!(events.contains(&Event::Complete));
}

#[test]
fn leak_is_requeried_after_completion() {
    let config = Config {
        probes: ProbeSet::new().with(ProbeKind::ExtendedFeaturesOverRead),
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        leaked: vec![(5, [0xEF, 0xBE, 0xAD, 0xDE, 0, 0, 0, 0])],
        ..Default::default()
    };

    let events = run(&mut fingerprinter, &peer, 0);

    assert!(events.contains(&Event::Complete));

    assert_eq!(
        SessionState::Complete,
        fingerprinter.session(handle()).unwrap().state()
    );

    fingerprinter.requery_feature_page(handle(), 5).unwrap();

    let requery = fingerprinter.next_request(handle(), Instant::now()).unwrap().unwrap();

    assert_eq!([0xfeu8, 3, 5], requery[4..7]);

    let answer = peer.answer(&requery).unwrap();

    match fingerprinter.receive(handle(), &answer).unwrap().as_slice() {
        [Event::InfoLeak(confidence)] => {
            assert_eq!(5, confidence.page);

            assert_eq!(1, confidence.confirmations);
        }
        other => panic!("expected an info leak event, got {:?}", other),
    }

    // only the queued page is sent
    assert_eq!(None, fingerprinter.next_request(handle(), Instant::now()).unwrap());

    assert!(fingerprinter
        .sink()
        .contains("POSSIBLE INFO LEAK: EXT PAGE 0x05 = 0x00000000DEADBEEF CONFIRMATIONS 1 MISMATCHES 0"));
}

#[test]
fn version_retries_are_bounded() {
    let config = Config {
        retry: RetryLimits {
            version_requests: 3,
            ..Default::default()
        },
        version_backoff: Duration::ZERO,
        ..Default::default()
    };

    let mut fingerprinter = fingerprinter(config);

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        version: None,
        ..Default::default()
    };

    let exhausted = (0..OPPORTUNITIES).find_map(|_| match fingerprinter.next_request(handle(), Instant::now()) {
        Ok(Some(request)) => {
            if let Some(answer) = peer.answer(&request) {
                fingerprinter.receive(handle(), &answer).unwrap();
            }

            None
        }
        Ok(None) => panic!("session went silent before the retries were exhausted"),
        Err(e) => Some(e),
    });

    match exhausted {
        Some(Error::RetriesExhausted(e)) => {
            assert_eq!(RequestKind::Version, e.kind);

            assert_eq!(3, e.limit);
        }
        other => panic!("expected exhausted retries, got {:?}", other),
    }

    assert_eq!(None, fingerprinter.next_request(handle(), Instant::now()).unwrap());

    assert_eq!(
        SessionState::Stalled,
        fingerprinter.session(handle()).unwrap().state()
    );

    assert!(matches!(
        fingerprinter.requery_feature_page(handle(), 1),
        Err(Error::SessionStalled(_))
    ));

    fingerprinter.disconnected(handle()).unwrap();

    assert_eq!(1, count(fingerprinter.sink(), report::FINGERPRINT_INCOMPLETE));
}

#[test]
fn version_requests_wait_for_the_backoff() {
    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let start = Instant::now();

    let kinds = (0..5)
        .map(|_| fingerprinter.next_request(handle(), start).unwrap().map(|pdu| pdu[4] >> 1))
        .collect::<Vec<_>>();

    assert_eq!(vec![Some(39), Some(127), Some(1), Some(37), None], kinds);

    let later = start + Duration::from_secs(1);

    assert_eq!(Some(37), fingerprinter.next_request(handle(), later).unwrap().map(|pdu| pdu[4] >> 1));
}

#[test]
fn transmit_schedules_one_pdu() {
    #[derive(Default)]
    struct Radio(Vec<(Vec<u8>, u8)>);

    impl Transmit for Radio {
        fn schedule(&mut self, pdu: &[u8], repeat: u8) {
            self.0.push((pdu.to_vec(), repeat))
        }
    }

    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let mut radio = Radio::default();

    assert!(fingerprinter.transmit_next(handle(), Instant::now(), &mut radio).unwrap());

    assert_eq!(1, radio.0.len());

    assert_eq!(1, radio.0[0].1);

    assert_eq!(39, radio.0[0].0[4] >> 1);
}

#[test]
fn unknown_session() {
    let mut fingerprinter = fingerprinter(Config::default());

    let unknown = ConnectionHandle::try_from(7).unwrap();

    assert!(matches!(
        fingerprinter.receive(unknown, &features_res([0; 8])),
        Err(Error::UnknownSession(h)) if h == unknown
    ));

    assert!(matches!(
        fingerprinter.next_request(unknown, Instant::now()),
        Err(Error::UnknownSession(_))
    ));

    assert!(matches!(fingerprinter.disconnected(unknown), Err(Error::UnknownSession(_))));

    fingerprinter.start_session(unknown, None).unwrap();

    assert!(matches!(
        fingerprinter.start_session(unknown, None),
        Err(Error::SessionExists(_))
    ));
}

#[test]
fn undersized_pdu_is_dropped() {
    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let mut truncated = features_res([0xAA; 8]);

    truncated.truncate(9);

    assert!(matches!(fingerprinter.receive(handle(), &truncated), Err(Error::Pdu(_))));

    let session = fingerprinter.session(handle()).unwrap();

    assert_eq!(None, session.features());

    assert_eq!(0, session.counter().received(RequestKind::Features));

    assert_eq!(1, fingerprinter.sink().lines().len());
}

#[test]
fn stopped_session_is_incomplete() {
    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    fingerprinter.next_request(handle(), Instant::now()).unwrap();

    let session = fingerprinter.stop_session(handle()).unwrap();

    assert_eq!(1, session.counter().sent(RequestKind::Features));

    assert_eq!(1, count(fingerprinter.sink(), report::FINGERPRINT_INCOMPLETE));
}

#[test]
fn longest_name_is_reassembled() {
    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        name: (0..255u32).map(|i| b'A' + (i % 26) as u8).collect(),
        ..Default::default()
    };

    let events = run(&mut fingerprinter, &peer, 2);

    assert_eq!(vec![Event::Complete], events);

    let session = fingerprinter.session(handle()).unwrap();

    assert_eq!(Some(peer.name.as_slice()), session.device_name().map(|name| name.as_bytes()));

    // one request per 14 byte fragment
    assert_eq!(19, session.counter().sent(RequestKind::Name));
}

#[quickcheck]
fn any_name_is_reassembled(name: Vec<u8>, latency: u8) -> bool {
    let name = name.into_iter().take(255).collect::<Vec<_>>();

    let mut fingerprinter = fingerprinter(Config::default());

    fingerprinter.start_session(handle(), None).unwrap();

    let peer = Peer {
        name: name.clone(),
        ..Default::default()
    };

    run(&mut fingerprinter, &peer, latency as usize % 4);

    fingerprinter
        .session(handle())
        .and_then(|session| session.device_name())
        .map_or(false, |device_name| device_name.as_bytes() == name.as_slice())
}
