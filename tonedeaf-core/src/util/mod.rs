mod id;

pub use id::*;

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Returns a random alphanumeric string drawn from the operating system's CSPRNG
pub fn random_string(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::random_string;

    #[test]
    fn random_strings_have_the_requested_length() {
        let value = random_string(16);

        assert_eq!(value.len(), 16);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(value, random_string(16));
    }
}
