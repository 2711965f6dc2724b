use serde::{Deserialize, Serialize};
use time::Duration;

/// Validity limits applied when creating and when validating IACA and document signer
/// certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CertificatePolicy {
    pub iaca_max_age_years: u32,
    pub document_signer_max_age_days: u32,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self {
            iaca_max_age_years: 20,
            document_signer_max_age_days: 457,
        }
    }
}

impl CertificatePolicy {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Longest validity period of an IACA certificate, counting leap days.
    pub fn iaca_max_validity(&self) -> Duration {
        let years = i64::from(self.iaca_max_age_years);
        Duration::days(365 * years + years / 4 + 1)
    }

    pub fn document_signer_max_validity(&self) -> Duration {
        Duration::days(i64::from(self.document_signer_max_age_days))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let policy = CertificatePolicy::from_json(r#"{"iaca_max_age_years": 5}"#).unwrap();
        assert_eq!(policy.iaca_max_age_years, 5);
        assert_eq!(policy.document_signer_max_age_days, 457);
        assert!(CertificatePolicy::from_json(r#"{"unknown": 1}"#).is_err());
    }

    #[test]
    fn max_validity() {
        let policy = CertificatePolicy::default();
        assert_eq!(policy.document_signer_max_validity(), Duration::days(457));
        assert!(policy.iaca_max_validity() >= Duration::days(20 * 365 + 5));
    }
}
