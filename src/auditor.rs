//! Request dependent response detection
//!
//! A peer is expected to answer `LMP_features_req` with its own features no matter what the
//! requester claims to support. The [`ConsistencyAuditor`] keeps the answer to a well formed request
//! as a baseline and compares the answer to a deliberately malformed request against it.

/// The verdict of comparing a probe response to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// The response does not depend on the features declared by the requester
    Independent,
    /// The response differs depending on the features declared by the requester
    Dependent { baseline: [u8; 8], probe: [u8; 8] },
}

/// Auditor of `LMP_features_res` consistency
#[derive(Debug, Clone, Default)]
pub struct ConsistencyAuditor {
    baseline: Option<[u8; 8]>,
    held_probe: Option<[u8; 8]>,
}

impl ConsistencyAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> Option<[u8; 8]> {
        self.baseline
    }

    /// Process the response to a well formed `LMP_features_req`
    ///
    /// Only the first legitimate response becomes the baseline. If a probe response arrived before
    /// it, the comparison is made now.
    pub fn legitimate(&mut self, features: [u8; 8]) -> Option<Consistency> {
        if self.baseline.is_some() {
            return None;
        }

        self.baseline = Some(features);

        self.held_probe
            .take()
            .map(|probe| Self::compare(features, probe))
    }

    /// Process the response to a malformed `LMP_features_req`
    ///
    /// The response is held when there is no baseline yet.
    pub fn probe(&mut self, features: [u8; 8]) -> Option<Consistency> {
        match self.baseline {
            Some(baseline) => Some(Self::compare(baseline, features)),
            None => {
                log::debug!("(LMP) holding malformed features response until the baseline arrives");

                self.held_probe = Some(features);

                None
            }
        }
    }

    fn compare(baseline: [u8; 8], probe: [u8; 8]) -> Consistency {
        if baseline == probe {
            Consistency::Independent
        } else {
            Consistency::Dependent { baseline, probe }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE: [u8; 8] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

    #[test]
    fn equal_probe_is_independent() {
        let mut auditor = ConsistencyAuditor::new();

        assert_eq!(None, auditor.legitimate(BASELINE));

        assert_eq!(Some(Consistency::Independent), auditor.probe(BASELINE));
    }

    #[test]
    fn different_probe_is_dependent() {
        let mut auditor = ConsistencyAuditor::new();

        auditor.legitimate(BASELINE);

        let probe = [0xFF; 8];

        assert_eq!(
            Some(Consistency::Dependent {
                baseline: BASELINE,
                probe
            }),
            auditor.probe(probe)
        );
    }

    #[test]
    fn baseline_is_kept_on_repeats() {
        let mut auditor = ConsistencyAuditor::new();

        auditor.legitimate(BASELINE);

        assert_eq!(None, auditor.legitimate([0; 8]));

        assert_eq!(Some(BASELINE), auditor.baseline());
    }

    #[test]
    fn probe_before_baseline_is_held() {
        let mut auditor = ConsistencyAuditor::new();

        assert_eq!(None, auditor.probe(BASELINE));

        assert_eq!(Some(Consistency::Independent), auditor.legitimate(BASELINE));

        // the held probe was consumed
        assert_eq!(None, auditor.legitimate(BASELINE));
    }
}
