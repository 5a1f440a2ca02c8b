use rivet_schema::Lockfile;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temporary RIVET_HOME plus a work directory for manifests and lockfiles
struct TestContext {
    temp_dir: TempDir,
    rivet_home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let rivet_home = temp_dir.path().join(".rivet");
        std::fs::create_dir_all(&rivet_home).expect("failed to create rivet home");
        Self {
            temp_dir,
            rivet_home,
        }
    }

    /// Same as `new`, with a `central` remote configured.
    fn with_remote() -> Self {
        let ctx = Self::new();
        let remote = ctx.path("central.json");
        let config = format!(
            "[[remotes]]\nname = \"central\"\npath = {:?}\n",
            remote.display().to_string()
        );
        std::fs::write(ctx.rivet_home.join("config.toml"), config).expect("failed to write config");
        ctx
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    fn rivet(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_rivet"))
            .args(args)
            .current_dir(self.temp_dir.path())
            .env("HOME", self.temp_dir.path())
            .env("RIVET_HOME", &self.rivet_home)
            .env_remove("RIVET_CONFIG")
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run rivet")
    }

    fn ok(&self, args: &[&str]) -> String {
        let output = self.rivet(args);
        assert!(
            output.status.success(),
            "rivet {args:?} failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn fails(&self, args: &[&str]) -> String {
        let output = self.rivet(args);
        assert!(!output.status.success(), "rivet {args:?} unexpectedly succeeded");
        String::from_utf8_lossy(&output.stderr).into_owned()
    }

    fn manifest(&self, file: &str, manifest: &Value) -> PathBuf {
        let path = self.path(file);
        std::fs::write(&path, manifest.to_string()).expect("failed to write manifest");
        path
    }

    /// Write a manifest and export it to the cache (or a remote).
    fn export(&self, manifest: &Value, remote: Option<&str>) {
        let file = format!(
            "{}-{}.json",
            manifest["name"].as_str().unwrap(),
            manifest["version"].as_str().unwrap()
        );
        let path = self.manifest(&file, manifest);
        let path = path.to_str().unwrap();
        match remote {
            Some(remote) => self.ok(&["export", path, "--remote", remote]),
            None => self.ok(&["export", path]),
        };
    }
}

fn json_out(stdout: &str) -> Value {
    serde_json::from_str(stdout).expect("stdout is not JSON")
}

fn node_refs(graph: &Value) -> Vec<String> {
    graph["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["ref"].as_str().map(ToString::to_string))
        .collect()
}

fn lockfile(path: &Path) -> Lockfile {
    Lockfile::load(path).expect("invalid lockfile")
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let stdout = ctx.ok(&["--help"]);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("install"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    ctx.ok(&["--version"]);
}

#[test]
fn test_install_builds_missing_binaries() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    ctx.export(
        &json!({"name": "openssl", "version": "3.0", "requires": ["zlib/[>=1.0 <2]"]}),
        None,
    );
    let app = ctx.manifest(
        "app.json",
        &json!({"name": "app", "version": "0.1", "requires": ["openssl/3.0"]}),
    );
    let app = app.to_str().unwrap();

    let stderr = ctx.fails(&["install", app]);
    assert!(stderr.contains("--build=missing"), "{stderr}");

    let out = ctx.ok(&["install", app, "--build", "missing", "--format", "json"]);
    let doc = json_out(&out);
    assert_eq!(doc["summary"]["built"], 2);

    // Second run finds both binaries in the cache
    let out = ctx.ok(&["install", app, "--format", "json"]);
    let doc = json_out(&out);
    assert_eq!(doc["summary"]["built"], 0);
    let statuses: Vec<&str> = doc["graph"]["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["ref"].is_string())
        .map(|n| n["binary"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"Cache"), "{statuses:?}");
}

#[test]
fn test_graph_info_json() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    ctx.export(&json!({"name": "cmake", "version": "3.28"}), None);

    let out = ctx.ok(&[
        "graph",
        "info",
        "--requires",
        "zlib/1.0",
        "--tool-requires",
        "cmake/3.28",
        "--format",
        "json",
    ]);
    let graph = json_out(&out);
    assert_eq!(graph["nodes"][0]["kind"], "virtual");
    let refs = node_refs(&graph);
    assert!(refs.iter().any(|r| r.starts_with("zlib/1.0#")), "{refs:?}");
    assert!(refs.iter().any(|r| r.starts_with("cmake/3.28#")), "{refs:?}");
    assert!(graph["error"].is_null());
}

#[test]
fn test_graph_info_text_and_missing_recipe() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);

    let out = ctx.ok(&["graph", "info", "--requires", "zlib/1.0"]);
    assert!(out.contains("zlib/1.0"));
    assert!(out.contains("Missing"));

    let stderr = ctx.fails(&["graph", "info", "--requires", "nosuch/1.0"]);
    assert!(stderr.contains("nosuch/1.0"), "{stderr}");
}

#[test]
fn test_nothing_to_resolve() {
    let ctx = TestContext::new();
    let stderr = ctx.fails(&["graph", "info"]);
    assert!(stderr.contains("Nothing to resolve"), "{stderr}");
}

#[test]
fn test_lockfile_pins_ranges() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    ctx.ok(&["lock", "create", "--requires", "zlib/[>=1.0 <2]"]);

    let lock_path = ctx.path("rivet.lock");
    let locked = lockfile(&lock_path);
    assert!(locked.nodes().contains_key("zlib/1.0"), "{:?}", locked.nodes().keys());

    ctx.export(&json!({"name": "zlib", "version": "1.1"}), None);

    let unlocked = json_out(&ctx.ok(&[
        "graph", "info", "--requires", "zlib/[>=1.0 <2]", "--format", "json",
    ]));
    assert!(node_refs(&unlocked).iter().any(|r| r.starts_with("zlib/1.1#")));

    let pinned = json_out(&ctx.ok(&[
        "graph",
        "info",
        "--requires",
        "zlib/[>=1.0 <2]",
        "--lockfile",
        "rivet.lock",
        "--format",
        "json",
    ]));
    assert!(node_refs(&pinned).iter().any(|r| r.starts_with("zlib/1.0#")));
}

#[test]
fn test_install_writes_lockfile() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    ctx.ok(&[
        "install",
        "--requires",
        "zlib/1.0",
        "--build",
        "missing",
        "--lockfile-out",
        "out.lock",
    ]);
    let locked = lockfile(&ctx.path("out.lock"));
    let node = &locked.nodes()["zlib/1.0"];
    assert!(node.package_id.is_some());
    assert!(node.prev.is_some());
}

#[test]
fn test_missing_lockfile_is_an_error() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    let stderr = ctx.fails(&[
        "graph", "info", "--requires", "zlib/1.0", "--lockfile", "absent.lock",
    ]);
    assert!(stderr.contains("does not exist"), "{stderr}");
}

#[test]
fn test_lock_add_and_merge() {
    let ctx = TestContext::new();
    ctx.ok(&["lock", "add", "--requires", "zlib/1.2", "--lockfile", "a.lock"]);
    ctx.ok(&["lock", "add", "--build-requires", "cmake/3.28", "--lockfile", "b.lock"]);
    ctx.ok(&["lock", "merge", "a.lock", "b.lock", "--out", "merged.lock"]);

    let merged = lockfile(&ctx.path("merged.lock"));
    assert_eq!(merged.len(), 2);
    assert!(merged.nodes().contains_key("zlib/1.2"));
    assert!(merged.nodes().contains_key("build:cmake/3.28"));
}

#[test]
fn test_build_order_and_merge() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    ctx.export(
        &json!({"name": "openssl", "version": "3.0", "requires": ["zlib/1.0"]}),
        None,
    );

    let out = ctx.ok(&[
        "graph",
        "build-order",
        "--requires",
        "openssl/3.0",
        "--build",
        "missing",
    ]);
    let order = json_out(&out);
    let levels = order.as_array().unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0][0]["binary"], "Build");
    assert!(levels[0][0]["ref"].as_str().unwrap().starts_with("zlib/1.0#"));
    assert!(levels[1][0]["ref"].as_str().unwrap().starts_with("openssl/3.0#"));

    std::fs::write(ctx.path("a.json"), &out).unwrap();
    std::fs::write(ctx.path("b.json"), &out).unwrap();
    let merged = json_out(&ctx.ok(&["graph", "build-order-merge", "a.json", "b.json"]));
    assert_eq!(merged, order);
}

#[test]
fn test_remote_export_install_and_list() {
    let ctx = TestContext::with_remote();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), Some("central"));

    let listed = json_out(&ctx.ok(&["list", "-r", "central", "--format", "json"]));
    assert!(listed["central"]["zlib/1.0"]["revisions"].is_object());

    let cache = json_out(&ctx.ok(&["list", "--format", "json"]));
    assert!(cache["cache"]["zlib/1.0"].is_null());

    ctx.ok(&["install", "--requires", "zlib/1.0", "--build", "missing"]);

    // The recipe was fetched into the cache by the install
    let cache = json_out(&ctx.ok(&["list", "--format", "json"]));
    assert!(cache["cache"]["zlib/1.0"].is_object());

    let text = ctx.ok(&["list", "zlib/*", "--all-remotes"]);
    assert!(text.contains("zlib/1.0"));
}

#[test]
fn test_unknown_remote_is_an_error() {
    let ctx = TestContext::new();
    let manifest = ctx.manifest("zlib.json", &json!({"name": "zlib", "version": "1.0"}));
    let stderr = ctx.fails(&["export", manifest.to_str().unwrap(), "--remote", "nowhere"]);
    assert!(stderr.contains("nowhere"), "{stderr}");
}

#[test]
fn test_create_builds_the_exported_recipe() {
    let ctx = TestContext::new();
    ctx.export(&json!({"name": "zlib", "version": "1.0"}), None);
    let openssl = ctx.manifest(
        "openssl.json",
        &json!({"name": "openssl", "version": "3.0", "requires": ["zlib/1.0"]}),
    );
    let openssl = openssl.to_str().unwrap();

    // zlib has no binary and the dependencies are not built by default
    let stderr = ctx.fails(&["create", openssl]);
    assert!(stderr.contains("zlib/1.0"), "{stderr}");

    let out = ctx.ok(&["create", openssl, "--build", "missing"]);
    assert!(out.trim().starts_with("openssl/3.0#"), "{out}");

    // Rebuilt even though a binary now exists
    ctx.ok(&["create", openssl]);
    let doc = json_out(&ctx.ok(&["install", "--requires", "openssl/3.0", "--format", "json"]));
    assert_eq!(doc["summary"]["built"], 0);
}
