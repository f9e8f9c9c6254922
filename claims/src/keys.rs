use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ClaimError;

/// The secret list holds exactly this many ordered words. The order encodes
/// the chapter sequence of the source material, so verification is
/// positional, never set-based.
pub const SECRET_WORD_COUNT: usize = 12;

/// The configured secret word list, normalized once at load. Zeroized on
/// drop so the words do not linger in memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretWords {
    words: Vec<String>,
}

impl SecretWords {
    /// Parses a comma-separated word list from configuration.
    pub fn from_csv(raw: &str) -> Result<Self, ClaimError> {
        let words: Vec<String> = raw
            .split(',')
            .map(normalize_word)
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() != SECRET_WORD_COUNT {
            return Err(ClaimError::Config(
                "secret word list must contain exactly 12 words",
            ));
        }
        Ok(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Positional comparison of a submission against the secret list.
    ///
    /// Every position is compared regardless of earlier mismatches, so the
    /// result carries no partial-credit signal and response timing does not
    /// leak the index of the first wrong word.
    pub fn verify(&self, submitted: &[String]) -> Result<bool, ClaimError> {
        if submitted.len() != self.words.len() {
            return Err(ClaimError::InvalidInput("expected exactly 12 keys"));
        }
        let mut all_match = true;
        for (word, expected) in submitted.iter().zip(self.words.iter()) {
            all_match &= normalize_word(word) == *expected;
        }
        Ok(all_match)
    }
}

fn normalize_word(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CSV: &str = "aurora,beacon,cipher,dawn,ember,falcon,glacier,harbor,ignite,jasper,krypton,lumen";

    fn words() -> Vec<String> {
        CSV.split(',').map(str::to_string).collect()
    }

    #[test]
    fn accepts_exact_match() {
        let secret = SecretWords::from_csv(CSV).unwrap();
        assert!(secret.verify(&words()).unwrap());
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        let secret = SecretWords::from_csv(CSV).unwrap();
        let noisy: Vec<String> = words().iter().map(|w| format!("  {} ", w.to_uppercase())).collect();
        assert!(secret.verify(&noisy).unwrap());
    }

    #[test]
    fn order_matters() {
        let secret = SecretWords::from_csv(CSV).unwrap();
        let mut swapped = words();
        swapped.swap(0, 11);
        assert!(!secret.verify(&swapped).unwrap());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let secret = SecretWords::from_csv(CSV).unwrap();
        let short: Vec<String> = words()[..11].to_vec();
        assert!(matches!(
            secret.verify(&short),
            Err(ClaimError::InvalidInput(_))
        ));
    }

    #[test]
    fn short_configuration_is_rejected() {
        assert!(matches!(
            SecretWords::from_csv("one,two,three"),
            Err(ClaimError::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn any_single_wrong_position_fails(index in 0usize..SECRET_WORD_COUNT, wrong in "[a-z]{1,16}") {
            let secret = SecretWords::from_csv(CSV).unwrap();
            let mut submission = words();
            prop_assume!(wrong != submission[index]);
            submission[index] = wrong;
            prop_assert!(!secret.verify(&submission).unwrap());
        }
    }
}
