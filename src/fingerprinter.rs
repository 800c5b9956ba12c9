//! The fingerprinter
//!
//! [`Fingerprinter`] is the entry point of this crate. The host hands it every inbound PDU of a
//! connection with [`receive`](Fingerprinter::receive) and asks it for the next PDU to send at
//! every transmit opportunity with [`next_request`](Fingerprinter::next_request) (or
//! [`transmit_next`](Fingerprinter::transmit_next)). Everything learned about a peer is written as
//! records to the report sink.
//!
//! ```
//! # use lmp_fingerprint::address::ConnectionHandle;
//! # use lmp_fingerprint::config::Config;
//! # use lmp_fingerprint::filter::HeaderFilter;
//! # use lmp_fingerprint::fingerprinter::Fingerprinter;
//! # use lmp_fingerprint::report::MemorySink;
//! # use std::time::Instant;
//! let mut fingerprinter = Fingerprinter::new(HeaderFilter::new(), MemorySink::new(), Config::default()).unwrap();
//!
//! let handle = ConnectionHandle::try_from(0x1).unwrap();
//!
//! fingerprinter.start_session(handle, None).unwrap();
//!
//! // the first request is always an `LMP_features_req`
//! let pdu = fingerprinter.next_request(handle, Instant::now()).unwrap().unwrap();
//!
//! assert_eq!(39, pdu[4] >> 1);
//! ```

use crate::address::{BluetoothDeviceAddress, ConnectionHandle};
use crate::classifier::ResponseClassifier;
use crate::config::Config;
use crate::filter::PacketFilter;
use crate::report::{Finding, ReportSink, Reporter};
use crate::session::{Event, Session, SessionState};
use crate::Error;
use std::collections::HashMap;
use std::time::Instant;

/// The transmit side of the host
///
/// The fingerprinter never sends anything itself. The host implements `Transmit` to put a PDU
/// into the next transmit opportunity of the connection.
pub trait Transmit {
    /// Schedule `pdu` to be transmitted `repeat` times
    fn schedule(&mut self, pdu: &[u8], repeat: u8);
}

impl<T: Transmit + ?Sized> Transmit for &mut T {
    fn schedule(&mut self, pdu: &[u8], repeat: u8) {
        (**self).schedule(pdu, repeat)
    }
}

/// LMP fingerprinter
///
/// A fingerprinter has a session for every connection given to
/// [`start_session`](Fingerprinter::start_session). Sessions end with either
/// [`disconnected`](Fingerprinter::disconnected) or [`stop_session`](Fingerprinter::stop_session).
pub struct Fingerprinter<F: PacketFilter, S: ReportSink> {
    config: Config,
    filter: F,
    classifier: ResponseClassifier<F::Id>,
    reporter: Reporter<S>,
    sessions: HashMap<ConnectionHandle, Session>,
}

impl<F: PacketFilter, S: ReportSink> Fingerprinter<F, S> {
    /// Create a new `Fingerprinter`
    ///
    /// The response predicates are registered with `filter` and the start of a new run is
    /// recorded to `sink`.
    pub fn new(mut filter: F, sink: S, config: Config) -> Result<Self, Error> {
        let classifier = ResponseClassifier::new(&mut filter);

        let mut reporter = Reporter::new(sink, config.log_prefix.clone());

        reporter.record(&Finding::NewRun)?;

        log::info!("(LMP) fingerprinting with experimental probes: {}", config.probes);

        Ok(Fingerprinter {
            config,
            filter,
            classifier,
            reporter,
            sessions: HashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &S {
        self.reporter.sink()
    }

    /// Stop fingerprinting and return the sink
    pub fn into_sink(self) -> S {
        self.reporter.into_sink()
    }

    pub fn session(&self, handle: ConnectionHandle) -> Option<&Session> {
        self.sessions.get(&handle)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> + '_ {
        self.sessions.values()
    }

    fn session_mut(&mut self, handle: ConnectionHandle) -> Result<&mut Session, Error> {
        self.sessions.get_mut(&handle).ok_or(Error::UnknownSession(handle))
    }

    fn record_all<I>(&mut self, findings: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = Finding>,
    {
        findings
            .into_iter()
            .try_for_each(|finding| self.reporter.record(&finding))
            .map_err(Error::from)
    }

    /// Start fingerprinting the peer of a new connection
    ///
    /// The address is the peer's address if the host knows it. Nothing is started if the log entry
    /// could not be recorded.
    pub fn start_session(
        &mut self,
        handle: ConnectionHandle,
        address: Option<BluetoothDeviceAddress>,
    ) -> Result<(), Error> {
        if self.sessions.contains_key(&handle) {
            return Err(Error::SessionExists(handle));
        }

        if let Some(address) = address {
            self.reporter.record(&Finding::LogEntry { address })?;
        }

        log::info!("(LMP) starting session {}", handle);

        self.sessions.insert(handle, Session::new(handle, address, &self.config));

        Ok(())
    }

    /// Get the next PDU to send to the peer
    ///
    /// `None` is returned when there is nothing to send at this transmit opportunity, either
    /// because the fingerprint is complete or because another `LMP_version_req` is not due yet.
    ///
    /// # Error
    /// An [`Error::RetriesExhausted`] is returned once when a retry limit is reached. The session
    /// is recorded as incomplete and no further request is ever returned for it.
    pub fn next_request(&mut self, handle: ConnectionHandle, now: Instant) -> Result<Option<Vec<u8>>, Error> {
        match self.session_mut(handle)?.next_request(now) {
            Ok(scheduled) => {
                self.record_all(scheduled.findings)?;

                Ok(scheduled.request.map(|request| request.to_bytes()))
            }
            Err(e) => {
                self.reporter.record(&Finding::Incomplete)?;

                Err(e.into())
            }
        }
    }

    /// Schedule the next PDU with the transmitter
    ///
    /// The output is `true` if a PDU was scheduled.
    pub fn transmit_next<T>(&mut self, handle: ConnectionHandle, now: Instant, mut transmit: T) -> Result<bool, Error>
    where
        T: Transmit,
    {
        match self.next_request(handle, now)? {
            Some(pdu) => {
                transmit.schedule(&pdu, 1);

                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Process an inbound PDU
    ///
    /// # Error
    /// A PDU that matched a predicate but is too short for its fields is dropped and an error is
    /// returned. The session is left unchanged.
    pub fn receive(&mut self, handle: ConnectionHandle, raw: &[u8]) -> Result<Vec<Event>, Error> {
        if !self.sessions.contains_key(&handle) {
            return Err(Error::UnknownSession(handle));
        }

        let response = self.classifier.classify(&self.filter, raw).map_err(|e| {
            log::warn!("(LMP) dropped PDU from {}: {}", handle, e);

            Error::from(e)
        })?;

        log::trace!("(LMP) {} sent {:?}", handle, response);

        let update = self.session_mut(handle)?.process(response).map_err(|e| {
            log::warn!("(LMP) dropped name fragment from {}: {}", handle, e);

            Error::from(e)
        })?;

        self.record_all(update.findings)?;

        Ok(update.events)
    }

    /// Request an extended features page again
    ///
    /// The page is requested at the next transmit opportunity that is not used by the mandatory
    /// requests. Re-queries are still sent after the fingerprint is complete.
    ///
    /// # Error
    /// A stalled session never sends another request, so [`Error::SessionStalled`] is returned
    /// and nothing is queued.
    pub fn requery_feature_page(&mut self, handle: ConnectionHandle, page: u8) -> Result<(), Error> {
        let session = self.session_mut(handle)?;

        if session.state() == SessionState::Stalled {
            return Err(Error::SessionStalled(handle));
        }

        session.requery(page);

        Ok(())
    }

    fn end(&mut self, handle: ConnectionHandle, disconnected: bool) -> Result<Session, Error> {
        let session = self.sessions.remove(&handle).ok_or(Error::UnknownSession(handle))?;

        log::info!("(LMP) session {} ended ({:?})", handle, session.state());

        self.record_all(session.closing_findings(disconnected))?;

        Ok(session)
    }

    /// The connection to the peer went down
    ///
    /// The session is removed and returned.
    pub fn disconnected(&mut self, handle: ConnectionHandle) -> Result<Session, Error> {
        self.end(handle, true)
    }

    /// Stop fingerprinting the peer
    ///
    /// The session is removed and returned. The connection itself is left alone.
    pub fn stop_session(&mut self, handle: ConnectionHandle) -> Result<Session, Error> {
        self.end(handle, false)
    }
}
