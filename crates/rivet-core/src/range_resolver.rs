//! Candidate-version lookup for version ranges.

use crate::store::{CacheStore, PackageStore};
use rivet_schema::{RangeError, RecipeReference, Version, VersionRange};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves ranged references against the versions known to the cache
/// and the remotes.
///
/// The cache is consulted first. Remotes are only queried when nothing in
/// the cache satisfies the range or when `update` is requested, in which
/// case the union of all candidates is considered. Results are memoized
/// per `(reference, range)` for the lifetime of the resolver.
#[derive(Debug)]
pub struct RangeResolver {
    cache: Arc<dyn CacheStore>,
    remotes: Vec<Arc<dyn PackageStore>>,
    update: bool,
    memo: HashMap<String, RecipeReference>,
}

impl RangeResolver {
    /// Resolver over a cache and remotes in priority order.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remotes: Vec<Arc<dyn PackageStore>>,
        update: bool,
    ) -> Self {
        Self {
            cache,
            remotes,
            update,
            memo: HashMap::new(),
        }
    }

    fn candidates<S: PackageStore + ?Sized>(store: &S, reference: &RecipeReference) -> Vec<Version> {
        match store.references(&reference.name) {
            Ok(refs) => refs
                .into_iter()
                .filter(|r| r.user == reference.user && r.channel == reference.channel)
                .map(|r| r.version)
                .collect(),
            Err(e) => {
                tracing::warn!("Listing '{}' in '{}' failed: {e}", reference.name, store.name());
                Vec::new()
            }
        }
    }

    /// Resolve `reference` (whose version is a range) to a concrete
    /// revision-less reference.
    ///
    /// # Errors
    ///
    /// [`RangeError::Malformed`] for strict ranges that do not parse, and
    /// [`RangeError::NoMatch`] when no known version satisfies the range.
    pub fn resolve(&mut self, reference: &RecipeReference) -> Result<RecipeReference, RangeError> {
        let range = VersionRange::parse(reference.version.as_str())?;
        self.resolve_range(reference, &range)
    }

    /// Resolve with an explicit (e.g. intersected) range.
    ///
    /// # Errors
    ///
    /// [`RangeError::NoMatch`] when no known version satisfies the range.
    pub fn resolve_range(
        &mut self,
        reference: &RecipeReference,
        range: &VersionRange,
    ) -> Result<RecipeReference, RangeError> {
        let memo_key = format!("{}|{range}", reference.key());
        if let Some(found) = self.memo.get(&memo_key) {
            return Ok(found.clone());
        }

        let mut candidates = Self::candidates(self.cache.as_ref(), reference);
        let local = range.best_match(&candidates).cloned();

        let selected = if local.is_some() && !self.update {
            local
        } else {
            for remote in &self.remotes {
                candidates.extend(Self::candidates(remote.as_ref(), reference));
            }
            range.best_match(&candidates).cloned()
        };

        let Some(version) = selected else {
            return Err(RangeError::NoMatch {
                name: reference.key().to_string(),
                range: range.to_string(),
            });
        };

        let mut resolved = reference.without_revision();
        resolved.version = version;
        tracing::debug!("Version range '{}' resolved to {resolved}", reference.version);
        self.memo.insert(memo_key, resolved.clone());
        Ok(resolved)
    }
}
