use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use codestat::history::FileTypeChangeKind;
use codestat::{
    AnalysisError, AnalysisOptions, AnalysisRequest, Analyzer, CachePolicy, Comparison,
    MilestoneKind,
};

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent directory");
    }
    fs::write(path, contents).expect("failed to write test file");
}

fn js_request(root: &Path) -> AnalysisRequest {
    AnalysisRequest::new(root, ["js"], Vec::<String>::new())
}

fn lines(count: usize) -> String {
    (0..count).map(|i| format!("let v{} = {};\n", i, i)).collect()
}

fn uncached() -> AnalysisOptions {
    AnalysisOptions {
        use_cache: false,
        ..AnalysisOptions::default()
    }
}

#[tokio::test]
async fn single_js_file_counts_each_line_kind() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("a.js"), "// hello\n\nlet x = 1;\n");

    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let output = analyzer
        .analyze(&js_request(project.path()), &AnalysisOptions::default())
        .await
        .expect("analysis failed");
    let result = output.result;

    assert_eq!(result.total_files, 1);
    assert_eq!(result.total_lines, 3);
    assert_eq!(result.code_lines, 1);
    assert_eq!(result.comment_lines, 1);
    assert_eq!(result.blank_lines, 1);
    assert_eq!(result.by_file_type["js"].total_lines, 3);
    assert_eq!(result.largest_files[0].path, "a.js");
    assert!(!output.meta.from_cache);
}

#[tokio::test]
async fn growth_between_runs_is_reported() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = js_request(project.path());

    write_file(&project.path().join("app.js"), &lines(100));
    let first = analyzer.analyze(&request, &uncached()).await.expect("first run");
    assert_eq!(first.meta.comparison, Some(Comparison::NoPrevious));

    write_file(&project.path().join("app.js"), &lines(150));
    let second = analyzer.analyze(&request, &uncached()).await.expect("second run");

    let Some(Comparison::Changed(delta)) = &second.meta.comparison else {
        panic!("expected a comparison, got {:?}", second.meta.comparison);
    };
    assert_eq!(delta.changes.total_lines, 50);
    assert_eq!(delta.percentage_changes.total_lines.as_deref(), Some("50.0"));
    assert_eq!(delta.changes.total_files, 0);
    assert_eq!(delta.file_type_changes["js"].kind, FileTypeChangeKind::Changed);
}

#[tokio::test]
async fn oversized_file_is_only_counted_as_skipped() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("small.js"), "let a = 1;\n");
    write_file(&project.path().join("huge.js"), &lines(200));

    let options = AnalysisOptions {
        max_file_size: 100,
        ..uncached()
    };
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let result = analyzer
        .analyze(&js_request(project.path()), &options)
        .await
        .expect("analysis failed")
        .result;

    assert_eq!(result.total_files, 1);
    assert_eq!(result.total_lines, 1);
    assert_eq!(result.skipped_files.too_large, 1);
    assert!(result.largest_files.iter().all(|f| f.path != "huge.js"));
}

#[tokio::test]
async fn repeated_run_is_served_from_cache() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("src/main.js"), &lines(5));
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = js_request(project.path());
    let options = AnalysisOptions::default();

    let first = analyzer.analyze(&request, &options).await.expect("first run");
    let second = analyzer.analyze(&request, &options).await.expect("second run");

    assert!(!first.meta.from_cache);
    assert!(second.meta.from_cache);
    assert_eq!(first.result, second.result);
    assert!(second.meta.comparison.is_none());

    let stats = second.meta.user_stats.expect("stats tracked");
    assert_eq!(stats.analyses_completed, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.total_lines_analyzed, 5);
    assert_eq!(analyzer.history().entries().len(), 1);
}

#[tokio::test]
async fn extension_order_does_not_split_the_cache() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("a.js"), "let a;\n");
    write_file(&project.path().join("b.py"), "b = 1\n");
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let options = AnalysisOptions::default();

    let forward = AnalysisRequest::new(project.path(), ["js", "py"], Vec::<String>::new());
    let backward = AnalysisRequest::new(project.path(), ["py", "js"], Vec::<String>::new());
    analyzer.analyze(&forward, &options).await.expect("first run");
    let second = analyzer.analyze(&backward, &options).await.expect("second run");
    assert!(second.meta.from_cache);
    assert_eq!(second.result.total_files, 2);
}

#[tokio::test]
async fn tree_changes_invalidate_the_cache() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = js_request(project.path());
    let options = AnalysisOptions::default();
    write_file(&project.path().join("a.js"), &lines(3));
    write_file(&project.path().join("b.js"), &lines(4));

    let first = analyzer.analyze(&request, &options).await.expect("run");
    assert!(!first.meta.from_cache);

    // Modified file.
    let file = fs::OpenOptions::new()
        .append(true)
        .open(project.path().join("a.js"))
        .expect("open a.js");
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .expect("set mtime");
    let modified = analyzer.analyze(&request, &options).await.expect("run");
    assert!(!modified.meta.from_cache);

    // Added file.
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_file(&project.path().join("c.js"), &lines(1));
    let file = fs::OpenOptions::new()
        .append(true)
        .open(project.path().join("c.js"))
        .expect("open c.js");
    file.set_modified(SystemTime::now() + Duration::from_secs(120))
        .expect("set mtime");
    let added = analyzer.analyze(&request, &options).await.expect("run");
    assert!(!added.meta.from_cache);
    assert_eq!(added.result.total_files, 3);

    let unchanged = analyzer.analyze(&request, &options).await.expect("run");
    assert!(unchanged.meta.from_cache);
}

#[tokio::test]
async fn removed_file_invalidates_the_cache() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = js_request(project.path());
    let options = AnalysisOptions::default();
    write_file(&project.path().join("keep.js"), &lines(2));
    write_file(&project.path().join("gone.js"), &lines(2));

    analyzer.analyze(&request, &options).await.expect("run");
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::remove_file(project.path().join("gone.js")).expect("remove file");

    let after = analyzer.analyze(&request, &options).await.expect("run");
    assert!(!after.meta.from_cache);
    assert_eq!(after.result.total_files, 1);
}

#[tokio::test]
async fn expired_entries_are_recomputed() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("a.js"), &lines(2));
    let policy = CachePolicy {
        ttl: Duration::ZERO,
        ..CachePolicy::default()
    };
    let analyzer = Analyzer::with_cache_policy(state.path(), policy).expect("analyzer");
    let request = js_request(project.path());
    let options = AnalysisOptions::default();

    analyzer.analyze(&request, &options).await.expect("run");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = analyzer.analyze(&request, &options).await.expect("run");
    assert!(!second.meta.from_cache);
    assert_eq!(second.meta.user_stats.expect("stats").analyses_completed, 2);
}

#[tokio::test]
async fn deep_branch_is_cut_while_siblings_are_counted() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("root.js"), &lines(1));
    write_file(&project.path().join("a/b/ok.js"), &lines(1));
    write_file(&project.path().join("a/b/c/deep.js"), &lines(1));
    write_file(&project.path().join("side/side.js"), &lines(1));

    let options = AnalysisOptions {
        max_recursion_depth: 2,
        ..uncached()
    };
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let output = analyzer
        .analyze(&js_request(project.path()), &options)
        .await
        .expect("analysis failed");

    assert_eq!(output.result.total_files, 3);
    assert!(output
        .result
        .largest_files
        .iter()
        .all(|f| !f.path.contains("deep.js")));
    let deep = output.meta.warnings.iter().any(|warning| {
        matches!(warning, AnalysisError::RecursionDepthExceeded { path } if path.ends_with("a/b/c"))
    });
    assert!(deep, "warnings: {:?}", output.meta.warnings);
}

#[tokio::test]
async fn milestones_fire_once_across_runs() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    for i in 0..10 {
        write_file(&project.path().join(format!("m{}.js", i)), &lines(100));
    }
    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = js_request(project.path());

    let first = analyzer.analyze(&request, &uncached()).await.expect("run");
    let reached: Vec<(MilestoneKind, u64)> = first
        .meta
        .milestones
        .iter()
        .map(|m| (m.kind, m.threshold))
        .collect();
    assert!(reached.contains(&(MilestoneKind::LinesAnalyzed, 1_000)));
    assert!(reached.contains(&(MilestoneKind::FilesAnalyzed, 10)));
    assert!(reached.contains(&(MilestoneKind::ProjectsAnalyzed, 1)));

    let second = analyzer.analyze(&request, &uncached()).await.expect("run");
    assert!(
        second.meta.milestones.is_empty(),
        "milestones repeated: {:?}",
        second.meta.milestones
    );
    let stats = second.meta.user_stats.expect("stats");
    assert_eq!(stats.total_projects_analyzed, 1);
    assert_eq!(stats.milestones.len(), reached.len());
}

#[tokio::test]
async fn binary_files_are_skipped_by_extension_and_content() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    fs::write(project.path().join("photo.png"), "text in disguise\n").expect("write png");
    fs::write(project.path().join("blob.dat"), [b'a', 0, b'b', b'\n']).expect("write dat");
    write_file(&project.path().join("notes.txt"), "one\ntwo\n");

    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = AnalysisRequest::new(project.path(), Vec::<String>::new(), Vec::<String>::new());
    let result = analyzer
        .analyze(&request, &uncached())
        .await
        .expect("analysis failed")
        .result;

    assert_eq!(result.total_files, 1);
    assert_eq!(result.skipped_files.binary, 2);
    assert_eq!(result.by_file_type["txt"].total_lines, 2);
}

#[tokio::test]
async fn hidden_entries_and_ignore_patterns_are_filtered() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("app.js"), &lines(1));
    write_file(&project.path().join(".cache/tmp.js"), &lines(1));
    write_file(&project.path().join("node_modules/dep/index.js"), &lines(1));

    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let request = AnalysisRequest::new(project.path(), ["js"], ["node_modules"]);
    let default_run = analyzer
        .analyze(&request, &uncached())
        .await
        .expect("analysis failed");
    assert_eq!(default_run.result.total_files, 1);

    let options = AnalysisOptions {
        show_hidden: true,
        ..uncached()
    };
    let hidden_run = analyzer.analyze(&request, &options).await.expect("analysis failed");
    assert_eq!(hidden_run.result.total_files, 2);
}

#[tokio::test]
async fn disabled_stats_leave_state_untouched() {
    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    write_file(&project.path().join("a.js"), &lines(3));
    let options = AnalysisOptions {
        use_cache: false,
        track_stats: false,
        ..AnalysisOptions::default()
    };

    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let output = analyzer
        .analyze(&js_request(project.path()), &options)
        .await
        .expect("analysis failed");
    assert!(output.meta.user_stats.is_none());
    assert!(output.meta.comparison.is_none());
    assert_eq!(analyzer.stats().current().analyses_completed, 0);
    assert!(analyzer.history().entries().is_empty());
    assert_eq!(analyzer.cache().stats().total_entries, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_entries_are_counted_as_access_denied() {
    use std::os::unix::fs::PermissionsExt;

    let project = TempDir::new().expect("failed to create temp dir");
    let state = TempDir::new().expect("failed to create temp dir");
    let secret = project.path().join("secret.js");
    let locked = project.path().join("locked");
    write_file(&project.path().join("ok.js"), "let ok = 1;\n");
    write_file(&secret, "let hidden = 2;\n");
    write_file(&locked.join("inner.js"), "let inner = 3;\n");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).expect("chmod file");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod dir");

    // Privileged users read through mode bits.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore");
        return;
    }

    let analyzer = Analyzer::new(state.path()).expect("analyzer");
    let output = analyzer.analyze(&js_request(project.path()), &uncached()).await;

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore dir");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).expect("restore file");

    let output = output.expect("analysis failed");
    let locked_canonical = fs::canonicalize(project.path())
        .expect("canonical root")
        .join("locked");
    assert_eq!(output.result.total_files, 1);
    assert_eq!(output.result.skipped_files.access_denied, 2);
    assert_eq!(output.result.skipped_files.other, 0);
    assert!(
        output.meta.warnings.contains(&AnalysisError::AccessDenied {
            path: locked_canonical
        }),
        "warnings: {:?}",
        output.meta.warnings
    );
}
