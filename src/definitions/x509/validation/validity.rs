use time::OffsetDateTime;
use x509_cert::Certificate;

use super::{invalid, Error};
use crate::definitions::x509::util::{not_after, not_before};

/// Check certificate validity period against a specific time.
pub fn check_validity_period_at(certificate: &Certificate, at: OffsetDateTime) -> Result<(), Error> {
    if not_after(certificate) < at {
        return Err(invalid(certificate, "expired"));
    }
    if not_before(certificate) > at {
        return Err(invalid(certificate, "not yet valid"));
    }
    Ok(())
}

/// Whether the validity period of `inner` lies within that of `outer`.
pub fn is_within(inner: &Certificate, outer: &Certificate) -> bool {
    not_before(inner) >= not_before(outer) && not_after(inner) <= not_after(outer)
}
