//! Secret masking for output streams.

use parking_lot::RwLock;
use std::borrow::Cow;

/// Default replacement for masked secrets.
pub const MASK: &str = "***";

/// A shared set of secrets replaced in every masked write.
#[derive(Debug)]
pub struct SecretStore {
    placeholder: Vec<u8>,
    secrets: RwLock<Vec<Vec<u8>>>,
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore {
    /// Creates an empty store using [`MASK`] as placeholder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            placeholder: MASK.as_bytes().to_vec(),
            secrets: RwLock::new(Vec::new()),
        }
    }

    /// Registers a secret. Empty values are ignored.
    pub fn add(&self, secret: impl AsRef<str>) {
        let secret = secret.as_ref().as_bytes();
        if secret.is_empty() {
            return;
        }

        let mut secrets = self.secrets.write();
        if secrets.iter().any(|s| s == secret) {
            return;
        }
        secrets.push(secret.to_vec());
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }

    /// Registers several secrets.
    pub fn extend<I, S>(&self, secrets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for secret in secrets {
            self.add(secret);
        }
    }

    /// Number of registered secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    /// Returns whether no secret is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }

    /// Replaces every registered secret in `buf`.
    #[must_use]
    pub fn mask<'a>(&self, buf: &'a [u8]) -> Cow<'a, [u8]> {
        let secrets = self.secrets.read();
        let mut out = Cow::Borrowed(buf);

        for secret in secrets.iter() {
            if find(&out, secret).is_some() {
                out = Cow::Owned(replace_all(&out, secret, &self.placeholder));
            }
        }

        out
    }

    /// Masks the part of `buf` that a following write cannot complete into
    /// a secret. Returns the masked part and the raw tail held back for the
    /// next write.
    ///
    /// The tail is the longest suffix that starts a secret, widened so that
    /// it never cuts through a complete secret.
    #[must_use]
    pub fn mask_partial(&self, buf: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let secrets = self.secrets.read();
        let mut split = buf.len() - held_prefix(&secrets, buf);

        while let Some(start) = secrets
            .iter()
            .flat_map(|secret| {
                occurrences(buf, secret).map(move |start| (start, start + secret.len()))
            })
            .filter(|&(start, end)| start < split && split < end)
            .map(|(start, _)| start)
            .min()
        {
            split = start;
        }
        drop(secrets);

        let (ready, held) = buf.split_at(split);
        (self.mask(ready).into_owned(), held.to_vec())
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of a secret.
fn held_prefix(secrets: &[Vec<u8>], buf: &[u8]) -> usize {
    secrets
        .iter()
        .flat_map(|secret| {
            (1..secret.len().min(buf.len() + 1)).filter(move |&n| buf.ends_with(&secret[..n]))
        })
        .max()
        .unwrap_or(0)
}

fn occurrences<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(start, _)| start)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;

    while let Some(pos) = find(rest, needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }

    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_all_occurrences() {
        let store = SecretStore::new();
        store.add("s3cret");

        let masked = store.mask(b"a s3cret and s3cret again");
        assert_eq!(&*masked, b"a *** and *** again");
    }

    #[test]
    fn test_untouched_without_match() {
        let store = SecretStore::new();
        store.add("token");
        assert!(matches!(store.mask(b"nothing here"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_partial_holds_secret_prefix() {
        let store = SecretStore::new();
        store.add("hunter2");

        let (ready, held) = store.mask_partial(b"pw=hun");
        assert_eq!(ready, b"pw=");
        assert_eq!(held, b"hun");

        let (ready, held) = store.mask_partial(b"hunter2\n");
        assert_eq!(ready, b"***\n");
        assert!(held.is_empty());
    }

    #[test]
    fn test_partial_never_splits_a_secret() {
        let store = SecretStore::new();
        store.extend(["abc", "cdx"]);

        let (ready, held) = store.mask_partial(b"zabcd");
        assert_eq!(ready, b"z");
        assert_eq!(held, b"abcd");
        assert_eq!(&*store.mask(&[held, b"y".to_vec()].concat()), b"***dy");
    }

    #[test]
    fn test_longest_secret_first() {
        let store = SecretStore::new();
        store.extend(["abc", "abcdef", ""]);
        assert_eq!(store.len(), 2);
        assert_eq!(&*store.mask(b"xabcdefx"), b"x***x");
    }
}
