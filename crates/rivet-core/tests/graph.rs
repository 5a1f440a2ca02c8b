mod common;

use common::{World, consumer, r, requires};
use rivet_core::builder::{GraphOptions, GraphRoot};
use rivet_core::config::ConflictPolicy;
use rivet_core::recipe::{RecipeManifest, RequireSpec};
use rivet_core::store::PackageStore;
use rivet_core::{Error, GraphError, RecipeKind};
use rivet_schema::{Context, LockNode, Lockfile, RangeError};
use std::collections::BTreeMap;

fn override_of(reference: &str) -> RequireSpec {
    RequireSpec::Detailed {
        reference: reference.to_string(),
        private: false,
        is_override: true,
        options: BTreeMap::new(),
        when: BTreeMap::new(),
        package_id_mode: None,
    }
}

fn private(reference: &str) -> RequireSpec {
    RequireSpec::Detailed {
        reference: reference.to_string(),
        private: true,
        is_override: false,
        options: BTreeMap::new(),
        when: BTreeMap::new(),
        package_id_mode: None,
    }
}

#[test]
fn siblings_share_one_dependency_node() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    world.export(RecipeManifest::new("c", "1.0").requires("a/1.0"));

    let session = world.session();
    let graph = session
        .load_graph(&requires(&["b/1.0", "c/1.0"]), GraphOptions::default())
        .unwrap();

    assert!(graph.error.is_none());
    let packages: Vec<_> = graph.nodes().iter().filter(|n| !n.is_root()).collect();
    assert_eq!(packages.len(), 3);

    let a = graph.find("a");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].dependants.len(), 2);
    for name in ["b", "c"] {
        let node = graph.find(name)[0];
        assert_eq!(node.dependencies[0].dst, a[0].id);
        assert!(node.dependencies[0].overridden.is_none());
    }
    assert!(graph.overrides.is_empty());
}

#[test]
fn explicit_override_wins_and_marks_the_edge() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("a", "2.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    world.export(RecipeManifest::new("c", "1.0").requires("a/2.0"));

    let root = consumer(
        RecipeManifest::new("d", "1.0")
            .requires("b/1.0")
            .requires("c/1.0")
            .require_spec(override_of("a/1.0")),
    );
    let graph = world
        .session()
        .load_graph(&root, GraphOptions::default())
        .unwrap();

    assert!(graph.error.is_none());
    let a = graph.find("a");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].reference.as_ref().unwrap().version, "1.0");

    let c = graph.find("c")[0];
    assert_eq!(c.dependencies[0].dst, a[0].id);
    assert_eq!(c.dependencies[0].overridden, Some(r("a/2.0")));
    let b = graph.find("b")[0];
    assert!(b.dependencies[0].overridden.is_none());

    assert_eq!(graph.overrides.len(), 1);
    assert_eq!(graph.overrides[0].requirer, c.id);
}

#[test]
fn override_found_late_restarts_expansion() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("a", "2.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    world.export(RecipeManifest::new("d", "1.0").require_spec(override_of("a/2.0")));
    world.export(RecipeManifest::new("c", "1.0").requires("d/1.0"));

    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "c/1.0"]), GraphOptions::default())
        .unwrap();

    assert!(graph.error.is_none());
    let a = graph.find("a");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].reference.as_ref().unwrap().version, "2.0");
    assert_eq!(
        graph.find("b")[0].dependencies[0].overridden,
        Some(r("a/1.0"))
    );
}

#[test]
fn nearest_requirement_wins_without_override() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("a", "2.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    world.export(RecipeManifest::new("c", "1.0").requires("a/2.0"));

    // Direct requirement at depth 1 beats b's at depth 2.
    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "a/2.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    let a = graph.find("a");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].reference.as_ref().unwrap().version, "2.0");

    // Same depth: first declared wins.
    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "c/1.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    assert_eq!(graph.find("a")[0].reference.as_ref().unwrap().version, "1.0");
    assert_eq!(
        graph.find("c")[0].dependencies[0].overridden,
        Some(r("a/2.0"))
    );
}

#[test]
fn strict_policy_reports_same_depth_conflicts() {
    let mut world = World::new();
    world.config.resolver.conflict_policy = ConflictPolicy::Strict;
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("a", "2.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    world.export(RecipeManifest::new("c", "1.0").requires("a/2.0"));

    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "c/1.0"]), GraphOptions::default())
        .unwrap();
    match &graph.error {
        Some(GraphError::Conflict {
            requirer,
            required,
            existing,
        }) => {
            assert!(requirer.starts_with("c/1.0"));
            assert_eq!(required, "a/2.0");
            assert!(existing.starts_with("a/1.0"));
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(graph.report_graph_error().is_err());
    assert_eq!(graph.to_json()["error"]["type"], "conflict");
}

#[test]
fn range_picks_greatest_satisfying_version() {
    let world = World::new();
    for v in ["0.5", "1.0", "1.1", "2.0"] {
        world.export(RecipeManifest::new("pkg", v));
    }
    let graph = world
        .session()
        .load_graph(&requires(&["pkg/[>=0.1,<2.0]"]), GraphOptions::default())
        .unwrap();
    let pkg = graph.find("pkg")[0].reference.clone().unwrap();
    assert_eq!(pkg.version, "1.1");
    assert!(pkg.revision.is_some());
}

#[test]
fn sibling_ranges_are_intersected() {
    let world = World::new();
    for v in ["1.0", "1.5", "2.0"] {
        world.export(RecipeManifest::new("a", v));
    }
    world.export(RecipeManifest::new("b", "1.0").requires("a/[>=1.0]"));
    world.export(RecipeManifest::new("c", "1.0").requires("a/[<2.0]"));

    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "c/1.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    let a = graph.find("a");
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].reference.as_ref().unwrap().version, "1.5");
    assert!(graph.overrides.is_empty());
}

#[test]
fn unsatisfiable_range_is_fatal() {
    let world = World::new();
    world.export(RecipeManifest::new("pkg", "1.0"));
    let err = world
        .session()
        .load_graph(&requires(&["pkg/[>=5]"]), GraphOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Range(RangeError::NoMatch { .. })));
}

#[test]
fn missing_recipe_is_recorded_on_the_graph() {
    let world = World::new();
    world.export(RecipeManifest::new("b", "1.0").requires("nothere/1.0"));
    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0"]), GraphOptions::default())
        .unwrap();
    match graph.error {
        Some(GraphError::Missing {
            ref reference,
            ref requirer,
        }) => {
            assert_eq!(reference, "nothere/1.0");
            assert!(requirer.starts_with("b/1.0"));
        }
        ref other => panic!("expected missing, got {other:?}"),
    }
    assert_eq!(graph.find("b").len(), 1);
}

#[test]
fn loops_are_detected() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0").requires("b/1.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    let graph = world
        .session()
        .load_graph(&requires(&["a/1.0"]), GraphOptions::default())
        .unwrap();
    match &graph.error {
        Some(GraphError::Loop { path }) => {
            assert_eq!(path.len(), 3);
            assert!(path[0].starts_with("a/1.0"));
            assert!(path[1].starts_with("b/1.0"));
            assert_eq!(path[2], "a/1.0");
        }
        other => panic!("expected loop, got {other:?}"),
    }
}

#[test]
fn private_requirements_resolve_in_their_own_scope() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("a", "2.0"));
    world.export(RecipeManifest::new("b", "1.0").require_spec(private("a/1.0")));

    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0", "a/2.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    let mut versions: Vec<String> = graph
        .find("a")
        .iter()
        .map(|n| n.reference.as_ref().unwrap().version.to_string())
        .collect();
    versions.sort();
    assert_eq!(versions, vec!["1.0", "2.0"]);
    assert!(graph.overrides.is_empty());
    let private_a = graph
        .find("a")
        .into_iter()
        .find(|n| n.private)
        .unwrap();
    assert_eq!(private_a.reference.as_ref().unwrap().version, "1.0");
}

#[test]
fn test_requirements_resolve_in_their_own_scope() {
    let world = World::new();
    world.export(RecipeManifest::new("gtest", "1.0"));
    world.export(RecipeManifest::new("gtest", "2.0"));
    world.export(RecipeManifest::new("lib", "1.0").test_requires("gtest/1.0"));

    let graph = world
        .session()
        .load_graph(&requires(&["lib/1.0", "gtest/2.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    assert!(graph.overrides.is_empty());

    let gtest = graph.find("gtest");
    assert_eq!(gtest.len(), 2);
    let (tested, regular): (Vec<_>, Vec<_>) = gtest.into_iter().partition(|n| n.test);
    assert_eq!(tested.len(), 1);
    assert_eq!(tested[0].reference.as_ref().unwrap().version, "1.0");
    assert_eq!(regular[0].reference.as_ref().unwrap().version, "2.0");
    assert_eq!(tested[0].context, Context::Host);

    let lib = graph.find("lib")[0];
    assert_eq!(lib.dependencies.len(), 1);
    assert_eq!(lib.dependencies[0].dst, tested[0].id);
}

#[test]
fn tool_requirements_live_in_the_build_context() {
    let world = World::new();
    world.export(RecipeManifest::new("zlib", "1.3"));
    world.export(RecipeManifest::new("cmake", "3.28").requires("zlib/1.3"));
    world.export(RecipeManifest::new("app", "1.0").requires("zlib/1.3").tool_requires("cmake/3.28"));

    let graph = world
        .session()
        .load_graph(&requires(&["app/1.0"]), GraphOptions::default())
        .unwrap();
    assert!(graph.error.is_none());
    let zlib = graph.find("zlib");
    assert_eq!(zlib.len(), 2, "host and build zlib are separate nodes");
    assert!(zlib.iter().any(|n| n.context == Context::Host));
    assert!(zlib.iter().any(|n| n.context == Context::Build));
    assert_eq!(graph.find("cmake")[0].context, Context::Build);
}

#[test]
fn recipes_are_fetched_from_remotes_into_the_cache() {
    let world = World::new();
    let published = world.publish(RecipeManifest::new("zlib", "1.3"));
    let graph = world
        .session()
        .load_graph(&requires(&["zlib/[>=1]"]), GraphOptions::default())
        .unwrap();
    let node = graph.find("zlib")[0];
    assert_eq!(node.recipe_origin.as_deref(), Some("central"));
    assert_eq!(node.reference.as_ref(), Some(&published));
    assert!(world.cache.read_recipe(&published).unwrap().is_some());
}

#[test]
fn update_prefers_newer_remote_revisions() {
    let world = World::new();
    let old = world.export(RecipeManifest::new("zlib", "1.3"));
    let newer = world.publish(RecipeManifest::new("zlib", "1.3").with_option("shared", "False"));

    let session = world.session();
    let offline = session
        .load_graph(&requires(&["zlib/1.3"]), GraphOptions::default())
        .unwrap();
    assert_eq!(offline.find("zlib")[0].reference.as_ref(), Some(&old));

    let options = GraphOptions {
        update: true,
        ..GraphOptions::default()
    };
    let updated = session.load_graph(&requires(&["zlib/1.3"]), options).unwrap();
    assert_eq!(updated.find("zlib")[0].reference.as_ref(), Some(&newer));
}

#[test]
fn platform_and_editable_nodes() {
    let mut world = World::new();
    world.config.host.platform_requires = vec![r("openssl/3.0.2")];
    world.config.editables = vec![r("mylib/1.0")];
    world.export(RecipeManifest::new("mylib", "1.0"));

    let graph = world
        .session()
        .load_graph(
            &requires(&["openssl/[>=3 <4]", "mylib/1.0"]),
            GraphOptions::default(),
        )
        .unwrap();
    assert!(graph.error.is_none());
    let openssl = graph.find("openssl")[0];
    assert_eq!(openssl.kind, RecipeKind::Platform);
    assert!(openssl.recipe.is_none());
    assert_eq!(graph.find("mylib")[0].kind, RecipeKind::Editable);
}

#[test]
fn options_flow_from_profile_and_requirer() {
    let mut world = World::new();
    world
        .config
        .host
        .options
        .insert("zlib/*:shared".to_string(), "True".to_string());
    world.export(
        RecipeManifest::new("zlib", "1.3")
            .with_option("shared", "False")
            .with_option("fPIC", "True"),
    );
    world.export(
        RecipeManifest::new("app", "1.0")
            .with_settings(&["os"])
            .require_spec(RequireSpec::Detailed {
                reference: "zlib/1.3".to_string(),
                private: false,
                is_override: false,
                options: BTreeMap::from([("fPIC".to_string(), "False".to_string())]),
                when: BTreeMap::new(),
                package_id_mode: None,
            }),
    );
    world
        .config
        .host
        .settings
        .insert("os".to_string(), "Linux".to_string());

    let graph = world
        .session()
        .load_graph(&requires(&["app/1.0"]), GraphOptions::default())
        .unwrap();
    let zlib = graph.find("zlib")[0];
    assert_eq!(zlib.config.value("shared"), Some("True"));
    assert_eq!(zlib.config.value("fPIC"), Some("False"));
    assert!(zlib.config.settings.is_empty(), "zlib declares no settings");
    assert_eq!(graph.find("app")[0].config.value("os"), Some("Linux"));
}

#[test]
fn lockfile_pins_ranges() {
    let world = World::new();
    let old = world.export(RecipeManifest::new("pkg", "1.0"));
    world.export(RecipeManifest::new("pkg", "1.1"));

    let mut lockfile = Lockfile::new();
    lockfile.insert(LockNode::new(old.clone(), Context::Host));
    let options = GraphOptions {
        lockfile: Some(&lockfile),
        ..GraphOptions::default()
    };
    let graph = world
        .session()
        .load_graph(&requires(&["pkg/[>=1.0]"]), options)
        .unwrap();
    assert_eq!(graph.find("pkg")[0].reference.as_ref(), Some(&old));
}

#[test]
fn strict_lockfile_rejects_unpinned_requirements() {
    let world = World::new();
    world.export(RecipeManifest::new("pkg", "1.0"));
    world.export(RecipeManifest::new("other", "1.0"));

    let mut lockfile = Lockfile::new();
    lockfile.add([r("pkg/1.0")], Context::Host);

    let strict = GraphOptions {
        lockfile: Some(&lockfile),
        ..GraphOptions::default()
    };
    let session = world.session();
    let err = session
        .load_graph(&requires(&["pkg/1.0", "other/1.0"]), strict)
        .unwrap_err();
    assert!(matches!(err, Error::LockfileStrict(ref e) if e.reference == "other/1.0"));

    let partial = GraphOptions {
        lockfile_partial: true,
        ..strict
    };
    let graph = session
        .load_graph(&requires(&["pkg/1.0", "other/1.0"]), partial)
        .unwrap();
    assert!(graph.error.is_none());
    assert_eq!(graph.len(), 3);
}

#[test]
fn graph_json_includes_nodes_and_edges() {
    let world = World::new();
    world.export(RecipeManifest::new("a", "1.0"));
    world.export(RecipeManifest::new("b", "1.0").requires("a/1.0"));
    let graph = world
        .session()
        .load_graph(&requires(&["b/1.0"]), GraphOptions::default())
        .unwrap();
    let json = graph.to_json();
    assert_eq!(json["nodes"][0]["kind"], "virtual");
    assert_eq!(json["nodes"][1]["dependencies"][0]["dst"], 2);
    assert!(json["error"].is_null());

    let again = world
        .session()
        .load_graph(&GraphRoot::Requires {
            requires: vec![r("b/1.0")],
            tool_requires: Vec::new(),
        }, GraphOptions::default())
        .unwrap();
    assert_eq!(again.to_json(), json);
}
