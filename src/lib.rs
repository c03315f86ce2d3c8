//! # Gatehouse (password login & cookie sessions)
//!
//! `gatehouse` verifies a username/password pair against a credential store and
//! hands out a bounded-lifetime session so later requests prove identity without
//! resending the password.
//!
//! ## Flow
//!
//! - **Register:** the password is hashed with Argon2 (salt embedded in the PHC
//!   string) and stored next to the username. Usernames are unique.
//! - **Login:** the stored hash is verified, an HMAC-SHA256 signed identity token is
//!   minted for the username and stored in a server-side session record. The client
//!   only ever sees the opaque session id in an `HttpOnly` cookie.
//! - **Logout:** the token is removed from the session, the record is dropped and the
//!   cookie is expired. Logout is idempotent.
//!
//! Login answers `401` for both unknown usernames and wrong passwords so the
//! endpoint cannot be used to enumerate accounts.
//!
//! ## Token revocation
//!
//! Logout invalidates the session, not the token. A token copied out of storage
//! stays valid until its own `exp`.

pub mod cli;
pub mod gatehouse;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
