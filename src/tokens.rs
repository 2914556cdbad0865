use rand::Rng;

/// Length of hook tokens and API token ids, in hex characters.
pub const TOKEN_LENGTH: usize = 40;
const TOKEN_BYTES: usize = TOKEN_LENGTH / 2;

/// Generates a random token of [`TOKEN_LENGTH`] lowercase hex characters.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }
}
