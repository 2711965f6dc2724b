//! Issuer side: IACA and document signer certificates, and signing mdocs.
pub mod certificates;
pub mod mdoc;

pub use mdoc::{Builder, Error, Mdoc, Namespaces, PreparedMdoc};
