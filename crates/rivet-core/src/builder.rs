//! Graph expansion.
//!
//! The graph is expanded breadth first, one depth level at a time, so that
//! requirements closer to the root are always seen before deeper ones and,
//! within a level, in declaration order. Per requirement:
//!
//! 1. overrides registered for the identity replace the requested reference,
//! 2. a node of the same identity already present in the resolution scope
//!    is reused (diamond), or the conflict is settled by [`ConflictPolicy`],
//! 3. otherwise a new node is created from, in order: a platform
//!    requirement, an editable, a lockfile pin, or the best version of a
//!    range, and its recipe revision is fetched from the cache or a remote.
//!
//! Conflict, missing and loop errors are recorded on the graph and stop the
//! expansion; range, lockfile and recipe errors are returned.

use crate::config::ConflictPolicy;
use crate::error::Result;
use crate::graph::{DepsGraph, Edge, GraphError, Node, NodeId, OverrideRecord, RecipeKind, Scope};
use crate::range_resolver::RangeResolver;
use crate::recipe::{Configuration, Recipe, RecipeManifest};
use crate::requirement::{Requirement, RequirementKind};
use crate::session::Session;
use crate::store::PackageStore;
use rivet_schema::{Context, Lockfile, PackageKey, RangeError, RecipeReference};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Maximum number of expansions restarted because an override showed up
/// after the node it targets was created.
const MAX_OVERRIDE_RESTARTS: usize = 32;

/// Where the graph starts.
#[derive(Debug, Clone)]
pub enum GraphRoot {
    /// A consumer recipe (e.g. the project being built).
    Consumer(Arc<dyn Recipe>),
    /// Command line requirements under a virtual root.
    Requires {
        /// Host requirements.
        requires: Vec<RecipeReference>,
        /// Tool requirements.
        tool_requires: Vec<RecipeReference>,
    },
}

/// Knobs of one expansion.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions<'a> {
    /// Look for newer versions and revisions in remotes even when the cache has a match.
    pub update: bool,
    /// Lockfile consulted before range resolution.
    pub lockfile: Option<&'a Lockfile>,
    /// Tolerate requirements the lockfile does not pin.
    pub lockfile_partial: bool,
}

/// Expands a [`GraphRoot`] into a [`DepsGraph`].
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    session: &'a Session,
    options: GraphOptions<'a>,
}

#[derive(Debug, Clone)]
struct OverrideEntry {
    reference: RecipeReference,
    depth: usize,
}

type OverrideKey = (Context, PackageKey);

impl<'a> GraphBuilder<'a> {
    /// Builder bound to a session.
    pub fn new(session: &'a Session, options: GraphOptions<'a>) -> Self {
        Self { session, options }
    }

    /// Expand the graph.
    ///
    /// # Errors
    ///
    /// Returns range, lockfile, store and recipe errors. Conflicts, missing
    /// recipes and loops are recorded in [`DepsGraph::error`] instead.
    pub fn load_graph(&self, root: &GraphRoot) -> Result<DepsGraph> {
        let mut seeded: HashMap<OverrideKey, OverrideEntry> = HashMap::new();
        let mut restarts = 0;
        loop {
            let mut expansion = Expansion::new(self, seeded.clone());
            expansion.expand(root)?;

            if expansion.late_overrides.is_empty() || expansion.graph.error.is_some() {
                return Ok(expansion.graph);
            }
            if restarts == MAX_OVERRIDE_RESTARTS {
                tracing::warn!("Overrides did not settle after {restarts} restarts");
                return Ok(expansion.graph);
            }
            restarts += 1;
            for (key, entry) in expansion.late_overrides {
                tracing::debug!("Restarting expansion to apply override {}", entry.reference);
                match seeded.get(&key) {
                    Some(existing) if existing.depth <= entry.depth => {}
                    _ => {
                        seeded.insert(key, entry);
                    }
                }
            }
        }
    }
}

/// Whether `candidate` satisfies what `requested` asks for.
fn accepts(requested: &RecipeReference, candidate: &RecipeReference) -> bool {
    if requested.key() != candidate.key() {
        return false;
    }
    match requested.version_range() {
        Some(Ok(range)) => range.contains(&candidate.version),
        Some(Err(_)) => false,
        None => {
            requested.version.value_eq(&candidate.version)
                && (requested.revision.is_none() || requested.revision == candidate.revision)
        }
    }
}

/// The stored revision matching `reference`'s revision, with its timestamp.
fn exact_revision<S: PackageStore + ?Sized>(
    store: &S,
    reference: &RecipeReference,
) -> std::result::Result<Option<RecipeReference>, crate::store::StoreError> {
    Ok(store
        .recipe_revisions(reference)?
        .into_iter()
        .find(|r| r.revision == reference.revision))
}

struct Pending {
    requirer: NodeId,
    requirement: Requirement,
}

enum Step {
    Created(NodeId),
    Linked,
    Stop,
}

struct Expansion<'b, 'a> {
    builder: &'b GraphBuilder<'a>,
    resolver: RangeResolver,
    graph: DepsGraph,
    root_requirements: Vec<Requirement>,
    scopes: HashMap<(Scope, PackageKey), NodeId>,
    overrides: HashMap<OverrideKey, OverrideEntry>,
    late_overrides: Vec<(OverrideKey, OverrideEntry)>,
}

impl<'b, 'a> Expansion<'b, 'a> {
    fn new(builder: &'b GraphBuilder<'a>, seeded: HashMap<OverrideKey, OverrideEntry>) -> Self {
        let session = builder.session;
        Self {
            builder,
            resolver: RangeResolver::new(
                session.cache.clone(),
                session.remotes.clone(),
                builder.options.update,
            ),
            graph: DepsGraph::new(),
            root_requirements: Vec::new(),
            scopes: HashMap::new(),
            overrides: seeded,
            late_overrides: Vec::new(),
        }
    }

    fn session(&self) -> &'a Session {
        self.builder.session
    }

    fn expand(&mut self, root: &GraphRoot) -> Result<()> {
        let root_id = self.create_root(root);
        let mut level = vec![root_id];

        while !level.is_empty() {
            let mut pending = Vec::new();
            for id in &level {
                for requirement in self.requirements_of(*id) {
                    pending.push(Pending {
                        requirer: *id,
                        requirement,
                    });
                }
            }

            for item in pending.iter().filter(|p| p.requirement.is_override) {
                self.register_override(item);
            }

            let mut next = Vec::new();
            for (index, item) in pending.iter().enumerate() {
                if item.requirement.is_override {
                    continue;
                }
                match self.resolve_requirement(item, &pending[index + 1..])? {
                    Step::Created(id) => next.push(id),
                    Step::Linked => {}
                    Step::Stop => return Ok(()),
                }
            }
            level = next;
        }
        Ok(())
    }

    fn create_root(&mut self, root: &GraphRoot) -> NodeId {
        let scope = Scope {
            context: Context::Host,
            owner: None,
        };
        match root {
            GraphRoot::Consumer(recipe) => {
                let mut node = Node::new(NodeId(0), RecipeKind::Consumer, Context::Host, scope);
                let reference = RecipeReference::new(recipe.name(), recipe.version());
                node.config = self.configure(recipe.as_ref(), &reference, Context::Host, None, true);
                self.root_requirements = recipe
                    .requirements(&node.config)
                    .into_iter()
                    .map(Requirement::direct)
                    .collect();
                node.reference = Some(reference);
                node.recipe = Some(recipe.clone());
                node.recipe_origin = Some("consumer".to_string());
                self.graph.add_node(node)
            }
            GraphRoot::Requires {
                requires,
                tool_requires,
            } => {
                self.root_requirements = requires
                    .iter()
                    .map(|r| Requirement::new(r.clone()).direct())
                    .chain(tool_requires.iter().map(|r| Requirement::tool(r.clone()).direct()))
                    .collect();
                self.graph
                    .add_node(Node::new(NodeId(0), RecipeKind::Virtual, Context::Host, scope))
            }
        }
    }

    fn requirements_of(&self, id: NodeId) -> Vec<Requirement> {
        let node = self.graph.node(id);
        if node.is_root() {
            return self.root_requirements.clone();
        }
        match (&node.recipe, node.kind) {
            (Some(recipe), RecipeKind::Regular | RecipeKind::Editable) => recipe.requirements(&node.config),
            _ => Vec::new(),
        }
    }

    /// Settings filtered to the declared ones, then option defaults,
    /// requirer options and profile options, then `configure()`.
    fn configure(
        &self,
        recipe: &dyn Recipe,
        reference: &RecipeReference,
        context: Context,
        requirement: Option<&Requirement>,
        is_consumer: bool,
    ) -> Configuration {
        let profile = self.session().config.profile(context);
        let declared_settings = recipe.settings();
        let declared_options = recipe.options();

        let mut config = Configuration {
            settings: profile
                .settings
                .iter()
                .filter(|(name, _)| declared_settings.contains(name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            options: declared_options
                .iter()
                .map(|(name, decl)| (name.clone(), decl.default.clone()))
                .collect(),
        };

        let requested = requirement.map(|r| r.options.clone()).unwrap_or_default();
        let profiled = profile.options_for(Some(reference), is_consumer);
        for (name, value) in requested.into_iter().chain(profiled) {
            if declared_options.contains_key(&name) {
                config.options.insert(name, value);
            } else {
                tracing::debug!("{reference}: ignoring undeclared option '{name}'");
            }
        }

        recipe.configure(&mut config);
        config
    }

    fn child_scope(requirer: &Node, requirement: &Requirement) -> Scope {
        let context = requirement.context(requirer.context);
        if requirement.is_isolated() {
            Scope {
                context,
                owner: Some(requirer.id),
            }
        } else if context == requirer.context {
            requirer.scope
        } else {
            Scope {
                context,
                owner: None,
            }
        }
    }

    fn register_override(&mut self, item: &Pending) {
        let requirer = self.graph.node(item.requirer);
        let context = item.requirement.context(requirer.context);
        let reference = item.requirement.reference.clone();
        let key = (context, reference.key());
        let depth = requirer.depth + 1;

        if self
            .overrides
            .get(&key)
            .is_some_and(|existing| existing.depth <= depth)
        {
            return;
        }
        tracing::debug!("{}: override {reference}", requirer.label());
        let entry = OverrideEntry { reference, depth };

        let stale = self.scopes.iter().any(|((scope, k), id)| {
            scope.context == context
                && *k == key.1
                && self
                    .graph
                    .node(*id)
                    .reference
                    .as_ref()
                    .is_some_and(|existing| !accepts(&entry.reference, existing))
        });
        if stale {
            self.late_overrides.push((key.clone(), entry.clone()));
        }
        self.overrides.insert(key, entry);
    }

    /// Chain from an ancestor with the same identity down to the requirer.
    fn find_loop(&self, requirer: NodeId, key: &PackageKey, context: Context) -> Option<Vec<String>> {
        let matches = |id: NodeId| {
            let node = self.graph.node(id);
            node.context == context && node.reference.as_ref().is_some_and(|r| r.key() == *key)
        };

        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([requirer]);
        let mut found = None;
        while let Some(id) = queue.pop_front() {
            if matches(id) {
                found = Some(id);
                break;
            }
            for dependant in &self.graph.node(id).dependants {
                if *dependant != requirer && !parent.contains_key(dependant) {
                    parent.insert(*dependant, id);
                    queue.push_back(*dependant);
                }
            }
        }

        let mut current = found?;
        let mut path = vec![self.graph.node(current).label()];
        while let Some(next) = parent.get(&current) {
            path.push(self.graph.node(*next).label());
            current = *next;
        }
        Some(path)
    }

    fn resolve_requirement(&mut self, item: &Pending, rest: &[Pending]) -> Result<Step> {
        let requirement = &item.requirement;
        let requirer = self.graph.node(item.requirer);
        let context = requirement.context(requirer.context);
        let scope = Self::child_scope(requirer, requirement);
        let key = requirement.reference.key();
        let depth = requirer.depth + 1;
        let requirer_label = requirer.label();

        let mut requested = requirement.reference.clone();
        if let Some(entry) = self.overrides.get(&(context, key.clone())) {
            requested = entry.reference.clone();
        }

        if let Some(path) = self.find_loop(item.requirer, &key, context) {
            let mut path = path;
            path.push(requested.to_string());
            self.graph.error = Some(GraphError::Loop { path });
            return Ok(Step::Stop);
        }

        if let Some(existing) = self.scopes.get(&(scope, key.clone())).copied() {
            return Ok(self.link_existing(item, existing, &requested, depth));
        }

        let session = self.session();
        let profile = session.config.profile(context);

        if let Some(platform) = profile.platform_for(&requested) {
            let mut node = Node::new(NodeId(0), RecipeKind::Platform, context, scope);
            node.reference = Some(platform.clone());
            node.recipe_origin = Some("platform".to_string());
            let id = self.add_child(item, node, depth, &requested);
            return Ok(Step::Created(id));
        }

        let mut kind = RecipeKind::Regular;
        if let Some(editable) = session.config.editable_for(&requested) {
            kind = RecipeKind::Editable;
            requested = editable.clone();
        } else if let Some(lockfile) = self.builder.options.lockfile {
            if let Some(pinned) =
                lockfile.pin_for(&requested, context, self.builder.options.lockfile_partial)?
            {
                tracing::debug!("{requested} pinned by lockfile to {}", pinned.reference);
                requested = pinned.reference.clone();
            }
        }

        if requested.is_range() {
            requested = self.resolve_range(&requested, scope, rest)?;
        }

        let Some((rref, manifest, origin)) = self.fetch_recipe(&requested)? else {
            self.graph.error = Some(GraphError::Missing {
                reference: requested.to_string(),
                requirer: requirer_label,
            });
            return Ok(Step::Stop);
        };

        let recipe = session.loader.load(manifest)?;
        let mut node = Node::new(NodeId(0), kind, context, scope);
        node.config = self.configure(recipe.as_ref(), &rref, context, Some(requirement), false);
        node.recipe = Some(recipe);
        node.recipe_origin = Some(origin.clone());
        node.reference = Some(rref.clone());
        session.reporter.resolved(&rref, context, &origin);

        let id = self.add_child(item, node, depth, &rref);
        Ok(Step::Created(id))
    }

    /// Intersect with same-identity range requirements pending at this
    /// level, falling back to the single range if the intersection is empty.
    fn resolve_range(
        &mut self,
        requested: &RecipeReference,
        scope: Scope,
        rest: &[Pending],
    ) -> Result<RecipeReference> {
        let Some(own) = requested.version_range().transpose()? else {
            return Ok(requested.clone());
        };
        let key = requested.key();
        let mut combined = own.clone();
        let mut intersected = false;
        for other in rest {
            if other.requirement.is_override
                || other.requirement.reference.key() != key
                || Self::child_scope(self.graph.node(other.requirer), &other.requirement) != scope
            {
                continue;
            }
            if let Some(Ok(range)) = other.requirement.reference.version_range() {
                combined = combined.intersection(&range);
                intersected = true;
            }
        }

        if intersected {
            match self.resolver.resolve_range(requested, &combined) {
                Ok(resolved) => return Ok(resolved),
                Err(RangeError::NoMatch { .. }) => {
                    tracing::debug!("No version of {key} satisfies every pending range");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.resolver.resolve_range(requested, &own)?)
    }

    fn link_existing(
        &mut self,
        item: &Pending,
        existing: NodeId,
        requested: &RecipeReference,
        depth: usize,
    ) -> Step {
        let node = self.graph.node(existing);
        let Some(existing_ref) = node.reference.clone() else {
            return Step::Linked;
        };
        let requirement = &item.requirement;

        let satisfied = accepts(requested, &existing_ref);
        if !satisfied
            && self.builder.session.config.resolver.conflict_policy == ConflictPolicy::Strict
            && node.depth == depth
        {
            self.graph.error = Some(GraphError::Conflict {
                requirer: self.graph.node(item.requirer).label(),
                required: requested.to_string(),
                existing: existing_ref.to_string(),
            });
            return Step::Stop;
        }
        if !satisfied {
            tracing::warn!(
                "{}: requirement {} overridden by {existing_ref}",
                self.graph.node(item.requirer).label(),
                requirement.reference
            );
        }

        let overridden = (!accepts(&requirement.reference, &existing_ref))
            .then(|| requirement.reference.clone());
        self.link(item.requirer, existing, requirement, overridden, &existing_ref);
        Step::Linked
    }

    fn add_child(
        &mut self,
        item: &Pending,
        mut node: Node,
        depth: usize,
        resolved: &RecipeReference,
    ) -> NodeId {
        let requirer = self.graph.node(item.requirer);
        let requirement = &item.requirement;
        node.depth = depth;
        node.test = requirer.test || requirement.kind == RequirementKind::Test;
        node.private = requirer.private || requirement.private;
        let scope = node.scope;

        let id = self.graph.add_node(node);
        self.scopes.insert((scope, requirement.reference.key()), id);

        let overridden =
            (!accepts(&requirement.reference, resolved)).then(|| requirement.reference.clone());
        self.link(item.requirer, id, requirement, overridden, resolved);
        id
    }

    fn link(
        &mut self,
        src: NodeId,
        dst: NodeId,
        requirement: &Requirement,
        overridden: Option<RecipeReference>,
        resolved: &RecipeReference,
    ) {
        if let Some(requested) = &overridden {
            self.graph.overrides.push(OverrideRecord {
                requirer: src,
                requested: requested.clone(),
                resolved: resolved.clone(),
            });
        }
        self.graph.add_edge(
            src,
            Edge {
                dst,
                requirement: requirement.clone(),
                overridden,
            },
        );
    }

    /// Locate the recipe revision for a concrete reference.
    ///
    /// Without an explicit revision the cache's latest is used; remotes are
    /// consulted when the cache has nothing, or with `update` for a newer one.
    /// Recipes fetched from remotes are stored in the cache.
    fn fetch_recipe(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<(RecipeReference, RecipeManifest, String)>> {
        let session = self.session();
        let cache = session.cache.as_ref();
        let update = self.builder.options.update;

        let local = match &reference.revision {
            Some(_) => exact_revision(cache, reference)?,
            None => cache.latest_recipe_revision(reference)?,
        };

        if let Some(local) = &local {
            let newer_remote = if update && reference.revision.is_none() {
                self.newest_remote(reference, local.timestamp)
            } else {
                None
            };
            if newer_remote.is_none() {
                if let Some(manifest) = cache.read_recipe(local)? {
                    return Ok(Some((local.clone(), manifest, "cache".to_string())));
                }
            }
        }

        for remote in &session.remotes {
            let found = match &reference.revision {
                Some(_) => exact_revision(remote.as_ref(), reference),
                None => remote.latest_recipe_revision(reference),
            };
            let rref = match found {
                Ok(Some(rref)) => rref,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Remote '{}' failed for {reference}: {e}", remote.name());
                    continue;
                }
            };
            if update && local.as_ref().is_some_and(|l| l.timestamp >= rref.timestamp) {
                continue;
            }
            let Some(manifest) = remote.read_recipe(&rref)? else {
                continue;
            };
            cache.write_recipe(&rref, &manifest)?;
            return Ok(Some((rref, manifest, remote.name().to_string())));
        }

        // Update found nothing newer after all
        if let Some(local) = local {
            if let Some(manifest) = cache.read_recipe(&local)? {
                return Ok(Some((local, manifest, "cache".to_string())));
            }
        }
        Ok(None)
    }

    fn newest_remote(&self, reference: &RecipeReference, than: Option<i64>) -> Option<String> {
        self.session().remotes.iter().find_map(|remote| {
            let latest = remote.latest_recipe_revision(reference).ok().flatten()?;
            (latest.timestamp > than).then(|| remote.name().to_string())
        })
    }
}
