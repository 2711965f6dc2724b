//! ISO/IEC 18013-5 mobile documents (mDoc / mDL).
//!
//! - [definitions]: the CBOR structures exchanged by issuer, holder and reader, with the
//!   certificate profile in [definitions::x509] and session encryption in
//!   [definitions::session].
//! - [issuance]: IACA and document signer certificates, and signing mdocs.
//! - [presentation]: the holder and reader sides of a presentation session, and verification
//!   of what the holder presents.
//!
//! [cbor], [cose] and [crypto] are the primitives the rest is built on.
pub mod cbor;
pub mod cose;
pub mod crypto;
pub mod definitions;
pub mod issuance;
pub mod presentation;
