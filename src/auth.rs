//! Authentication mechanisms.
//!
//! Each mechanism supplies the initial `AuthenticateStart` content and, when
//! the server answers with a challenge, the continuation payload. The session
//! owns exactly one mechanism object at a time and may swap it for the single
//! automatic fallback attempt.

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

const SCRAMBLE_LENGTH: usize = 20;

/// One authentication mechanism.
pub trait Mechanism {
    /// Mechanism name as sent on the wire.
    fn name(&self) -> &'static str;

    /// `auth_data` for `AuthenticateStart`.
    fn initial_data(&self) -> Vec<u8>;

    /// `initial_response` for `AuthenticateStart`; usually empty.
    fn initial_response(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Continuation payload computed from the server challenge.
    fn continue_data(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// SASL PLAIN: `authzid \0 authcid \0 password`, sent in the clear.
///
/// Only sound over a secured transport.
pub struct Plain {
    data: Vec<u8>,
}

impl Plain {
    pub fn new(user: &str, password: Option<&str>) -> Self {
        let mut data = Vec::new();
        data.push(0); // empty authzid
        data.extend_from_slice(user.as_bytes());
        data.push(0);
        if let Some(password) = password {
            data.extend_from_slice(password.as_bytes());
        }
        Self { data }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_data(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn continue_data(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Protocol(
            "unexpected authentication continuation for PLAIN".into(),
        ))
    }
}

/// MYSQL41 challenge/response: the server sends a 20-byte scramble and the
/// client answers with `schema \0 user \0 '*' hex(scramble-hash)`.
pub struct Mysql41 {
    user: String,
    password: Option<String>,
    schema: String,
}

impl Mysql41 {
    pub fn new(user: &str, password: Option<&str>, schema: Option<&str>) -> Self {
        Self {
            user: user.to_owned(),
            password: password.map(str::to_owned),
            schema: schema.unwrap_or("").to_owned(),
        }
    }
}

impl Mechanism for Mysql41 {
    fn name(&self) -> &'static str {
        "MYSQL41"
    }

    fn initial_data(&self) -> Vec<u8> {
        Vec::new()
    }

    fn continue_data(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.extend_from_slice(self.schema.as_bytes());
        data.push(0);
        data.extend_from_slice(self.user.as_bytes());
        data.push(0);
        if let Some(password) = self.password.as_deref()
            && !password.is_empty()
        {
            let hash = scramble(challenge, password)?;
            data.push(b'*');
            for byte in hash {
                data.extend_from_slice(hex_byte(byte).as_slice());
            }
        }
        Ok(data)
    }
}

/// `SHA1(scramble + SHA1(SHA1(password))) XOR SHA1(password)`.
fn scramble(scramble_data: &[u8], password: &str) -> Result<[u8; SCRAMBLE_LENGTH]> {
    if scramble_data.len() != SCRAMBLE_LENGTH {
        return Err(Error::Auth(format!(
            "invalid scramble length {} from server",
            scramble_data.len()
        )));
    }

    let stage1: [u8; SCRAMBLE_LENGTH] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; SCRAMBLE_LENGTH] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(scramble_data);
    hasher.update(stage2);
    let mut result: [u8; SCRAMBLE_LENGTH] = hasher.finalize().into();

    for (r, s) in result.iter_mut().zip(stage1.iter()) {
        *r ^= s;
    }
    Ok(result)
}

fn hex_byte(b: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[usize::from(b >> 4)], DIGITS[usize::from(b & 0x0F)]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_initial_data_layout() {
        let plain = Plain::new("user", Some("pass"));
        assert_eq!(plain.initial_data(), b"\0user\0pass");
        assert!(plain.initial_response().is_empty());
    }

    #[test]
    fn plain_rejects_continuation() {
        let mut plain = Plain::new("user", None);
        assert!(plain.continue_data(b"challenge").is_err());
    }

    #[test]
    fn mysql41_response_shape() {
        let mut mech = Mysql41::new("user", Some("pass"), Some("db"));
        let challenge = [0x5Au8; SCRAMBLE_LENGTH];
        let data = mech.continue_data(&challenge).unwrap();

        // schema \0 user \0 '*' + 40 hex chars
        let mut parts = data.splitn(3, |&b| b == 0);
        assert_eq!(parts.next().unwrap(), b"db");
        assert_eq!(parts.next().unwrap(), b"user");
        let hash = parts.next().unwrap();
        assert_eq!(hash.len(), 1 + 2 * SCRAMBLE_LENGTH);
        assert_eq!(hash[0], b'*');
        assert!(hash[1..].iter().all(u8::is_ascii_hexdigit));
    }

    #[test]
    fn mysql41_empty_password_sends_no_hash() {
        let mut mech = Mysql41::new("anon", None, None);
        let data = mech.continue_data(&[0u8; SCRAMBLE_LENGTH]).unwrap();
        assert_eq!(data, b"\0anon\0");
    }

    #[test]
    fn mysql41_rejects_bad_scramble() {
        let mut mech = Mysql41::new("u", Some("p"), None);
        assert!(mech.continue_data(&[0u8; 8]).is_err());
    }

    #[test]
    fn scramble_is_deterministic_and_password_sensitive() {
        let challenge = [7u8; SCRAMBLE_LENGTH];
        let a = scramble(&challenge, "secret").unwrap();
        let b = scramble(&challenge, "secret").unwrap();
        let c = scramble(&challenge, "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
