//! Defines the Command Catalog — an immutable mapping from command
//! token to [`Descriptor`], resolved once at startup from a declarative
//! JSON source and never mutated afterward.

mod loader;

use std::collections::{HashMap, HashSet};

pub use loader::{load_default, load_from_path, CatalogLoadError};

/// Immutable, declarative record describing how one command token is
/// dispatched and how its reply is shaped.
///
/// See spec.md §3 ("Command Descriptor") for field semantics.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Descriptor {
    pub key: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub sends_ok: bool,
    #[serde(default)]
    pub modal: bool,
    #[serde(default = "default_time_ms")]
    pub time_ms: u64,
    #[serde(default)]
    pub instant: bool,
    #[serde(default)]
    pub eot_terminated: bool,
    #[serde(default)]
    pub debug_output_only: bool,
}

fn default_time_ms() -> u64 {
    100
}

/// Returns true if `key` looks like a G-code or M-code token (`G0`,
/// `m104`, `G90.1`, ...): a leading `G`/`M` letter followed only by
/// digits and dots. These tokens are matched case-insensitively;
/// every other command (console/host) is matched verbatim.
fn is_gm_shaped(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.eq_ignore_ascii_case(&'g') || c.eq_ignore_ascii_case(&'m') => {
            let rest = chars.as_str();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
        }
        _ => false,
    }
}

/// Normalizes a lookup token per spec.md §4.1: G-/M-codes are
/// uppercased before matching; everything else is matched verbatim.
fn normalize(token: &str) -> String {
    if is_gm_shaped(token) {
        token.to_ascii_uppercase()
    } else {
        token.to_string()
    }
}

/// Read-only, immutable mapping from command token to [`Descriptor`].
///
/// Constructed once from an external declarative source (see
/// [`load_default`]/[`load_from_path`]); never mutated at runtime.
#[derive(Debug, Clone)]
pub struct Catalog {
    descriptors: HashMap<String, Descriptor>,
    instant_prefixes: HashSet<String>,
}

impl Catalog {
    /// Builds a catalog from a flat list of descriptors. G-/M-code
    /// keys are stored uppercased so lookups normalize symmetrically.
    pub fn from_descriptors(descriptors: Vec<Descriptor>) -> Self {
        let mut map = HashMap::with_capacity(descriptors.len());
        let mut instant_prefixes = HashSet::new();
        for descriptor in descriptors {
            let stored_key = normalize(&descriptor.key);
            if descriptor.instant {
                instant_prefixes.insert(stored_key.clone());
            }
            map.insert(stored_key, descriptor);
        }
        Self { descriptors: map, instant_prefixes }
    }

    /// Resolves `token` to its [`Descriptor`], applying the
    /// G-/M-code-uppercasing normalization rule.
    pub fn lookup(&self, token: &str) -> Option<&Descriptor> {
        self.descriptors.get(&normalize(token))
    }

    /// The set of every key whose descriptor has `instant = true`.
    /// Used by the [`crate::framer::Framer`] to detect early matches.
    pub fn instant_prefixes(&self) -> &HashSet<String> {
        &self.instant_prefixes
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
