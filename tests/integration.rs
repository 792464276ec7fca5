use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sous_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sous");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let recipes_dir = root.join("recipes");
    fs::create_dir_all(recipes_dir.join("mains")).unwrap();
    fs::create_dir_all(recipes_dir.join("soups")).unwrap();

    fs::write(
        recipes_dir.join("mains/braised-pork.md"),
        "# Braised Pork\n\n## Ingredients\n\n- 500g pork belly\n- 30g rock sugar\n- 2 tbsp light soy sauce\n\n## Steps\n\n1. Blanch the pork belly.\n2. Melt the rock sugar until amber.\n3. Simmer covered for one hour until tender.\n",
    )
    .unwrap();
    fs::write(
        recipes_dir.join("mains/egg-fried-rice.md"),
        "# Egg Fried Rice\n\n## Ingredients\n\n- 2 bowls cold cooked rice\n- 3 eggs\n\n## Steps\n\n1. Scramble the eggs until just set.\n2. Fry the rice over high heat.\n",
    )
    .unwrap();
    fs::write(
        recipes_dir.join("soups/tomato-soup.txt"),
        "Tomato Soup\n\nPeel and dice four ripe tomatoes. Cook down with stock for twenty minutes and season.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[corpus]
root = "{}/recipes"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []

[db]
path = "{}/data/sous.sqlite"

[chunking]
max_chars = 400
overlap_chars = 60

[retrieval]
k = 5
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("sous.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sous(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sous_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sous binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sous(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_sous(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_sous(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_ingests_corpus() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    let (stdout, stderr, success) = run_sous(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents seen:      3"));
    assert!(stdout.contains("updated:             3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_idempotent_skips_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (stdout, _, success) = run_sous(&config_path, &["sync"]);
    assert!(success, "second sync failed");
    assert!(stdout.contains("unchanged:           3"));
    assert!(stdout.contains("updated:             0"));
}

#[test]
fn test_sync_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_sous(&config_path, &["sync", "--dry-run"]);
    assert!(success, "dry-run failed");
    assert!(stdout.contains("documents found: 3"));

    // No database should have been created
    let db_path = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("data/sous.sqlite");
    assert!(!db_path.exists(), "dry-run must not create the database");
}

#[test]
fn test_sync_picks_up_edits() {
    let (tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    fs::write(
        tmp.path().join("recipes/soups/tomato-soup.txt"),
        "Tomato Soup\n\nRoast the tomatoes first for a deeper flavor, then simmer with stock.\n",
    )
    .unwrap();

    let (stdout, _, success) = run_sous(&config_path, &["sync"]);
    assert!(success, "resync failed");
    assert!(stdout.contains("updated:             1"));
    assert!(stdout.contains("unchanged:           2"));
}

#[test]
fn test_sync_prunes_deleted_recipes() {
    let (tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    fs::remove_file(tmp.path().join("recipes/soups/tomato-soup.txt")).unwrap();

    let (stdout, _, success) = run_sous(&config_path, &["sync"]);
    assert!(success, "resync failed");
    assert!(stdout.contains("pruned:              1"));

    let (stdout, _, _) = run_sous(&config_path, &["search", "tomato", "--mode", "keyword"]);
    assert!(stdout.contains("No results."), "pruned recipe still searchable");
}

#[test]
fn test_keyword_search_finds_recipe_step() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (stdout, stderr, success) =
        run_sous(&config_path, &["search", "simmer", "--mode", "keyword"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("braised-pork"), "expected braised pork hit: {}", stdout);
}

#[test]
fn test_search_category_filter_limits_results() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    // "simmer" hits mains, "stock" hits soups
    let (stdout, _, success) =
        run_sous(&config_path, &["search", "simmer stock", "--mode", "keyword"]);
    assert!(success);
    assert!(stdout.contains("braised-pork"));
    assert!(stdout.contains("tomato-soup"));

    let (stdout, stderr, success) = run_sous(
        &config_path,
        &["search", "simmer stock", "--mode", "keyword", "--category", "soups"],
    );
    assert!(success, "filtered search failed: stderr={}", stderr);
    assert!(stdout.contains("tomato-soup"));
    assert!(!stdout.contains("braised-pork"), "category filter leaked: {}", stdout);
}

#[test]
fn test_search_no_match_prints_no_results() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (stdout, _, success) =
        run_sous(&config_path, &["search", "zanzibar", "--mode", "keyword"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_semantic_search_requires_provider() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (_, stderr, success) =
        run_sous(&config_path, &["search", "pork", "--mode", "semantic"]);
    assert!(!success, "semantic search without a provider must fail");
    assert!(stderr.contains("requires embeddings"), "stderr: {}", stderr);
}

#[test]
fn test_get_by_relative_path() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (stdout, stderr, success) =
        run_sous(&config_path, &["get", "mains/braised-pork.md"]);
    assert!(success, "get failed: stderr={}", stderr);
    assert!(stdout.contains("braised-pork"));
    assert!(stdout.contains("category: mains"));
    assert!(stdout.contains("rock sugar"));
}

#[test]
fn test_get_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (_, stderr, success) = run_sous(&config_path, &["get", "no-such-recipe"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_embed_pending_requires_provider() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    let (_, stderr, success) = run_sous(&config_path, &["embed", "pending"]);
    assert!(!success, "embed without a provider must fail");
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_ask_requires_llm_provider() {
    let (_tmp, config_path) = setup_test_env();

    run_sous(&config_path, &["init"]);
    run_sous(&config_path, &["sync"]);

    let (_, stderr, success) = run_sous(&config_path, &["ask", "how do I braise pork?"]);
    assert!(!success, "ask without an LLM must fail");
    assert!(stderr.contains("requires an LLM"), "stderr: {}", stderr);
}

#[test]
fn test_ask_empty_corpus_fails_with_diagnostic() {
    let (tmp, config_path) = setup_test_env();

    // Empty the corpus and point the LLM at a provider so init gets as
    // far as the corpus scan.
    fs::remove_dir_all(tmp.path().join("recipes/mains")).unwrap();
    fs::remove_dir_all(tmp.path().join("recipes/soups")).unwrap();

    let mut config = fs::read_to_string(&config_path).unwrap();
    config.push_str("\n[llm]\nprovider = \"ollama\"\nmodel = \"llama3\"\n");
    fs::write(&config_path, config).unwrap();

    let (_, stderr, success) = run_sous(&config_path, &["ask", "anything?"]);
    assert!(!success, "ask on an empty corpus must fail");
    assert!(stderr.contains("no readable documents"), "stderr: {}", stderr);

    // The corpus scan runs before any database work, so nothing is written
    assert!(
        !tmp.path().join("data/sous.sqlite").exists(),
        "empty-corpus failure must not write an index"
    );
}

#[test]
fn test_missing_corpus_root_fails() {
    let (tmp, config_path) = setup_test_env();

    fs::remove_dir_all(tmp.path().join("recipes")).unwrap();

    let (_, stderr, success) = run_sous(&config_path, &["sync"]);
    assert!(!success, "sync with a missing corpus root must fail");
    assert!(!stderr.is_empty());
}

#[test]
fn test_bad_config_rejected() {
    let (tmp, config_path) = setup_test_env();

    let config = format!(
        "[corpus]\nroot = \"{}/recipes\"\n\n[db]\npath = \"{}/data/sous.sqlite\"\n\n[retrieval]\nhybrid_alpha = 3.0\n",
        tmp.path().display(),
        tmp.path().display()
    );
    fs::write(&config_path, config).unwrap();

    let (_, stderr, success) = run_sous(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("hybrid_alpha"), "stderr: {}", stderr);
}
