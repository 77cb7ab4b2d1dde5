use rand::Rng;

pub const SHARE_ID_LEN: usize = 10;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Random URL-safe share identifier (64^10 possibilities).
pub fn generate_share_id() -> String {
    let mut rng = rand::rng();
    (0..SHARE_ID_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn share_id_has_fixed_length_and_url_safe_chars() {
        for _ in 0..100 {
            let id = generate_share_id();
            assert_eq!(id.len(), SHARE_ID_LEN);
            assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn share_ids_do_not_repeat_in_practice() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_share_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
