//! Process-wide identity shared by every transport call.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::transport::signing::SigningMode;

/// Machine identifier, signing mode, salt source, and website login flag.
///
/// Built once at startup and handed to the clients that need it.
#[derive(Debug)]
pub struct Session {
    guid: RwLock<Option<String>>,
    signing_mode: SigningMode,
    salt_source: Mutex<StdRng>,
    logged_in: AtomicBool,
}

impl Session {
    pub fn new(guid: Option<String>, signing_mode: SigningMode) -> Self {
        Self::with_rng(guid, signing_mode, StdRng::from_entropy())
    }

    /// Session whose salts are reproducible.
    pub fn with_seed(guid: Option<String>, signing_mode: SigningMode, seed: u64) -> Self {
        Self::with_rng(guid, signing_mode, StdRng::seed_from_u64(seed))
    }

    fn with_rng(guid: Option<String>, signing_mode: SigningMode, rng: StdRng) -> Self {
        Self {
            guid: RwLock::new(guid.filter(|g| !g.is_empty())),
            signing_mode,
            salt_source: Mutex::new(rng),
            logged_in: AtomicBool::new(false),
        }
    }

    pub fn guid(&self) -> Option<String> {
        match self.guid.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_guid(&self, guid: impl Into<String>) {
        let guid = guid.into();
        match self.guid.write() {
            Ok(mut guard) => *guard = Some(guid),
            Err(poisoned) => *poisoned.into_inner() = Some(guid),
        }
    }

    pub fn signing_mode(&self) -> SigningMode {
        self.signing_mode
    }

    pub fn next_salt(&self) -> u16 {
        match self.salt_source.lock() {
            Ok(mut rng) => rng.gen(),
            Err(poisoned) => poisoned.into_inner().gen(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::Release);
    }
}

/// Fresh 32-character lowercase hex machine identifier.
pub fn new_guid() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_guid_counts_as_unregistered() {
        let session = Session::new(Some(String::new()), SigningMode::Signed);
        assert!(session.guid().is_none());
        session.set_guid("abc");
        assert_eq!(session.guid().as_deref(), Some("abc"));
    }

    #[test]
    fn seeded_sessions_repeat_salts() {
        let a = Session::with_seed(None, SigningMode::Signed, 9);
        let b = Session::with_seed(None, SigningMode::Signed, 9);
        let first: Vec<u16> = (0..4).map(|_| a.next_salt()).collect();
        let second: Vec<u16> = (0..4).map(|_| b.next_salt()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn generated_guids_are_hex() {
        let guid = new_guid();
        assert_eq!(guid.len(), 32);
        assert!(guid.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(guid, new_guid());
    }
}
