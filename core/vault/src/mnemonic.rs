//! BIP-39 seed phrase helpers.
//!
//! The vault treats seeds as opaque bytes; these helpers exist so callers
//! can mint a fresh phrase and sanity-check one before sealing it.

use bip39::Mnemonic;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use seedlock_common::{Error, Result};

/// Word counts accepted by BIP-39.
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Generate a fresh mnemonic phrase from OS entropy.
///
/// # Errors
/// - Returns error for a word count outside [`VALID_WORD_COUNTS`]
pub fn generate(word_count: usize) -> Result<Zeroizing<String>> {
    if !VALID_WORD_COUNTS.contains(&word_count) {
        return Err(Error::InvalidInput(format!(
            "Invalid word count {}: must be one of {:?}",
            word_count, VALID_WORD_COUNTS
        )));
    }

    // 11 bits per word, of which 1/33 is checksum: 12 words = 16 bytes of
    // entropy, 24 words = 32.
    let entropy_len = word_count * 4 / 3;
    let mut entropy = vec![0u8; entropy_len];
    rand::rngs::OsRng.fill_bytes(&mut entropy);

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| Error::Crypto(format!("Mnemonic generation failed: {}", e)))?;
    entropy.zeroize();

    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Check that a phrase is well-formed BIP-39 (wordlist and checksum).
///
/// # Errors
/// - Returns error for unknown words, bad word counts or checksum failures
pub fn validate(phrase: &str) -> Result<()> {
    Mnemonic::parse_normalized(phrase)
        .map(|_| ())
        .map_err(|e| Error::InvalidInput(format!("Invalid mnemonic: {}", e)))
}
