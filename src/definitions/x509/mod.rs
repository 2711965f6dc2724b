pub mod policy;
pub mod util;
pub mod validation;
pub mod x5chain;

pub use policy::CertificatePolicy;
pub use validation::{verify_chain, ChainPolicy, ValidationRuleset};
pub use x5chain::{Builder, CertificateWithDer, X5Chain};
