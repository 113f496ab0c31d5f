use async_trait::async_trait;
use rand::Rng;

use crate::{Error, Result};

/// Lowercase ASCII letters and digits.
pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
/// Draws before [`PathGenerator::generate_unique_path`] gives up.
pub const MAX_PATH_ATTEMPTS: usize = 100;
/// Longest feed path accepted on lookup.
pub const MAX_PATH_LENGTH: usize = 64;

fn is_url_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Whether `path` can name a stored feed at all. Independent of the length
/// and alphabet settings: feeds created under earlier settings must stay
/// reachable.
pub fn is_plausible_path(path: &str) -> bool {
    !path.is_empty() && path.len() <= MAX_PATH_LENGTH && path.chars().all(is_url_safe_char)
}

/// Answers whether a feed path is already in use.
#[async_trait]
pub trait PathLookup: Send + Sync {
    async fn path_taken(&self, path: &str) -> Result<bool>;
}

/// Draws random fixed-length feed paths.
#[derive(Debug, Clone)]
pub struct PathGenerator {
    length: usize,
    alphabet: Vec<char>,
}

impl PathGenerator {
    /// Paths of `length` characters drawn from `alphabet`, which must be
    /// non-empty and URL safe (`[A-Za-z0-9_-]`).
    pub fn with_alphabet(length: usize, alphabet: &str) -> Result<Self> {
        let mut chars: Vec<char> = alphabet.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        if length == 0 || length > MAX_PATH_LENGTH || chars.is_empty() {
            return Err(Error::Config(format!(
                "Feed paths need a length between 1 and {MAX_PATH_LENGTH} and a non-empty alphabet (length {length}, alphabet '{alphabet}')"
            )));
        }
        if !chars.iter().copied().all(is_url_safe_char) {
            return Err(Error::Config(format!(
                "Feed path alphabet must be URL safe: '{alphabet}'"
            )));
        }
        Ok(Self {
            length,
            alphabet: chars,
        })
    }

    /// One random draw, possibly taken already.
    pub fn candidate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }

    /// Returns a path not yet taken, giving up after [`MAX_PATH_ATTEMPTS`]
    /// draws. Running out means the path space is too small for the number
    /// of feeds.
    pub async fn generate_unique_path(&self, taken: &dyn PathLookup) -> Result<String> {
        for _ in 0..MAX_PATH_ATTEMPTS {
            let path = self.candidate();
            if !taken.path_taken(&path).await? {
                return Ok(path);
            }
        }

        tracing::error!(
            "Failed to generate a unique path after {} attempts",
            MAX_PATH_ATTEMPTS
        );
        Err(Error::PathSpaceExhausted {
            attempts: MAX_PATH_ATTEMPTS,
        })
    }
}
