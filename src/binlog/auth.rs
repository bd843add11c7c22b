//! MySQL `mysql_native_password` authentication.
//!
//! Grounded on `myyrakle-mysql-binlog-rs`'s `src/auth.rs`, unchanged apart from the
//! error-type adaptation.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

pub mod capabilities {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const MULTI_STATEMENTS: u32 = 1 << 16;
    pub const MULTI_RESULTS: u32 = 1 << 17;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`, empty for
/// an empty password.
pub fn create_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn create_handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();

    let mut caps = capabilities::LONG_PASSWORD
        | capabilities::LONG_FLAG
        | capabilities::PROTOCOL_41
        | capabilities::SECURE_CONNECTION
        | capabilities::MULTI_STATEMENTS
        | capabilities::MULTI_RESULTS
        | capabilities::PLUGIN_AUTH;

    if database.is_some() {
        caps |= capabilities::CONNECT_WITH_DB;
    }

    buffer.write_u32::<LittleEndian>(caps)?;
    buffer.write_u32::<LittleEndian>(0)?; // max packet size, 0 = default
    buffer.write_u8(collation)?;
    buffer.write_all(&[0u8; 23])?; // reserved

    buffer.write_all(username.as_bytes())?;
    buffer.write_u8(0)?;

    let auth_response = create_auth_response(password, scramble);
    buffer.write_u8(auth_response.len() as u8)?;
    buffer.write_all(&auth_response)?;

    if let Some(db) = database {
        buffer.write_all(db.as_bytes())?;
        buffer.write_u8(0)?;
    }

    buffer.write_all(b"mysql_native_password")?;
    buffer.write_u8(0)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_yields_empty_response() {
        assert!(create_auth_response("", &[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn auth_response_is_a_sha1_digest() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let response = create_auth_response("password", &scramble);
        assert_eq!(response.len(), 20);
    }

    #[test]
    fn handshake_response_includes_username_and_database() {
        let scramble = vec![0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let packet =
            create_handshake_response("root", "password", Some("testdb"), &scramble, 33).unwrap();
        assert!(packet.len() > 50);
    }
}
