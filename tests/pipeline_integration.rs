//! Service pipeline integration tests
//!
//! A service is fetched from a fake hosted repository, built by a fake
//! container runtime that leaves pom files in the tool cache, and its
//! dependencies are served by a mock Maven repository.

mod support;

use fleetpack::archive;
use fleetpack::checksum;
use fleetpack::config::MirrorConfig;
use fleetpack::pipeline::{Orchestrator, ServiceOutcome, SkipReason, Stage};
use fleetpack::progress::NoOpHandler;
use fleetpack::report;
use fleetpack::results::Bucket;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use support::{harness, pom, project, source_archive, FakeRepository, FakeRuntime};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LIB_LISTING: &str = r#"<html><body>
<a href="../">../</a>
<a href="lib-1.0.jar">lib-1.0.jar</a>
<a href="lib-1.0-sources.jar">lib-1.0-sources.jar</a>
</body></html>"#;

fn resolved_poms() -> Vec<(&'static str, String)> {
    vec![
        ("com.foo/lib/1.0/a1/lib-1.0.pom", pom("com.foo", "lib", "1.0")),
        (
            "sx.microservices/payments/2.0/b2/payments-2.0.pom",
            pom("sx.microservices", "payments", "2.0"),
        ),
        (
            "org.gone/missing/0.1/c3/missing-0.1.pom",
            pom("org.gone", "missing", "0.1"),
        ),
    ]
}

fn runtime_with_poms() -> Arc<FakeRuntime> {
    let poms = resolved_poms();
    let borrowed: Vec<(&str, &str)> = poms.iter().map(|(p, c)| (*p, c.as_str())).collect();
    FakeRuntime::resolving(&borrowed)
}

fn repository() -> FakeRepository {
    FakeRepository::default()
        .with_archive(1, source_archive("billing-master", true))
        .with_archive(2, b"payments sources".to_vec())
        .with_tags(2, &["v2.1", "v2.0"])
}

async fn maven_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maven/com/foo/lib/1.0/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LIB_LISTING))
        .mount(&server)
        .await;
    for file in ["lib-1.0.jar", "lib-1.0-sources.jar"] {
        Mock::given(method("GET"))
            .and(path(format!("/maven/com/foo/lib/1.0/{}", file)))
            .respond_with(ResponseTemplate::new(200).set_body_string(file))
            .expect(1)
            .mount(&server)
            .await;
    }
    server
}

fn assert_no_leftovers(output: &Path, service: &str) {
    assert!(!output.join(service).exists());
    assert!(!output.join(format!("{}.tar.gz", service)).exists());
    assert!(!output.join(format!(".{}.src.tar.gz", service)).exists());
}

#[tokio::test]
async fn test_service_packaged_end_to_end() {
    let server = maven_server().await;
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out");
    let repository = Arc::new(repository());

    let h = harness(
        &output,
        repository.clone(),
        runtime_with_poms(),
        vec![project(1, "billing"), project(2, "payments")],
        &server.uri(),
    );

    let outcome = h.processor.process("billing").await;
    let archive_path = output.join("billing.tar.gz");
    assert_eq!(
        outcome,
        ServiceOutcome::Done {
            archive: archive_path.clone(),
            uploaded: false,
            dependency_errors: 0,
        }
    );
    assert!(checksum::sidecar_path(&archive_path).is_file());
    assert!(!output.join("billing").exists());
    assert!(!output.join(".billing.src.tar.gz").exists());

    assert_eq!(
        repository.fetched(),
        vec![(1, "master".to_string()), (2, "v2.0".to_string())]
    );

    let snapshot = h.results.snapshot();
    assert_eq!(snapshot.entries(Bucket::Known, "billing").len(), 3);
    assert_eq!(
        snapshot.entries(Bucket::Unknown, "billing"),
        ["org.gone:missing:0.1"]
    );
    assert!(snapshot.entries(Bucket::WithoutSource, "billing").is_empty());

    let unpacked = tmp.path().join("unpacked");
    archive::unpack_file(&archive_path, &unpacked).unwrap();
    let root = unpacked.join("billing");
    assert_eq!(
        fs::read(root.join("billing.tar.gz")).unwrap(),
        repository.archives[&1]
    );

    let areas = tmp.path().join("areas");
    for area in [
        "deps_sources",
        "docker_images",
        "gradle_dependencies",
        "gradle_configs",
    ] {
        archive::unpack_file(&root.join(format!("{}.tar.gz", area)), &areas).unwrap();
    }
    let lib = areas.join("deps_sources/com.foo/lib/1.0");
    assert_eq!(
        fs::read_to_string(lib.join("lib-1.0-sources.jar")).unwrap(),
        "lib-1.0-sources.jar"
    );
    assert!(lib.join("lib-1.0.jar.hash").is_file());
    assert_eq!(
        fs::read_to_string(areas.join("deps_sources/sx.microservices/payments/2.0/payments.tar.gz"))
            .unwrap(),
        "payments sources"
    );
    assert!(areas
        .join("docker_images/gradle_7_4_2_jdk11.tar")
        .is_file());
    assert!(areas.join("gradle_configs/build.gradle").is_file());
    assert!(areas
        .join("gradle_dependencies/caches/modules-2/files-2.1/com.foo/lib/1.0/a1/lib-1.0.pom")
        .is_file());
}

#[tokio::test]
async fn test_missing_descriptor_leaves_nothing_behind() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out");
    let repository =
        FakeRepository::default().with_archive(1, source_archive("billing-master", false));
    let runtime = runtime_with_poms();

    let h = harness(
        &output,
        Arc::new(repository),
        runtime.clone(),
        vec![project(1, "billing")],
        "http://127.0.0.1:9",
    );

    let outcome = h.processor.process("billing").await;
    match outcome {
        ServiceOutcome::Failed { stage, error } => {
            assert_eq!(stage, Stage::Building);
            assert!(error.contains("Dockerfile"), "{}", error);
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    assert_eq!(runtime.runs.load(Ordering::SeqCst), 0);
    assert_no_leftovers(&output, "billing");
    assert!(h.results.snapshot().known.get("billing").is_none());
}

#[tokio::test]
async fn test_failed_build_is_cleaned_up() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out");
    let runtime = FakeRuntime::failing(1);

    let h = harness(
        &output,
        Arc::new(repository()),
        runtime.clone(),
        vec![project(1, "billing")],
        "http://127.0.0.1:9",
    );

    let outcome = h.processor.process("billing").await;
    assert!(matches!(
        outcome,
        ServiceOutcome::Failed {
            stage: Stage::Building,
            ..
        }
    ));
    assert_eq!(runtime.runs.load(Ordering::SeqCst), 1);
    assert_no_leftovers(&output, "billing");
    assert!(h.results.snapshot().known.is_empty());
}

#[tokio::test]
async fn test_unknown_project_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let repository = Arc::new(repository());
    let h = harness(
        tmp.path(),
        repository.clone(),
        runtime_with_poms(),
        vec![project(1, "billing")],
        "http://127.0.0.1:9",
    );

    let outcome = h.processor.process("ghost").await;
    assert_eq!(
        outcome,
        ServiceOutcome::Skipped {
            reason: SkipReason::UnknownProject
        }
    );
    assert!(repository.fetched().is_empty());
    assert_eq!(h.results.snapshot().unknown_projects, vec!["ghost"]);
}

#[tokio::test]
async fn test_run_skips_existing_archives_and_writes_report() {
    let server = maven_server().await;
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("out");
    fs::create_dir_all(&output).unwrap();
    fs::write(output.join("legacy.tar.gz"), b"previous run").unwrap();

    let repository = Arc::new(repository());
    let h = harness(
        &output,
        repository.clone(),
        runtime_with_poms(),
        vec![project(1, "billing"), project(2, "payments")],
        &server.uri(),
    );

    let mut config = MirrorConfig::from_json(
        r#"{
            "gitlab_api_host": "https://git.local/api/v4",
            "output_dir": "out",
            "service_list": ["billing", "ghost", "billing", "legacy"],
            "group_id": "1",
            "deps_group_id": "2",
            "branch": "master",
            "archive_format": "tar.gz",
            "maven_url": "unused",
            "plugins_url": "unused",
            "max_parallelism": 2
        }"#,
    )
    .unwrap();
    config.output_dir = output.clone();

    let orchestrator = Orchestrator::new(config, h.processor, h.results.clone())
        .with_progress(Arc::new(NoOpHandler));
    let summary = orchestrator.run().await;

    assert_eq!(summary.processed(), vec!["billing"]);
    assert_eq!(summary.skipped(), vec!["ghost", "legacy"]);
    assert!(summary.is_success());
    assert_eq!(
        summary.services["legacy"],
        ServiceOutcome::Skipped {
            reason: SkipReason::ArchiveExists
        }
    );
    assert_eq!(fs::read(output.join("legacy.tar.gz")).unwrap(), b"previous run");
    assert_eq!(
        repository
            .fetched()
            .iter()
            .filter(|(id, _)| *id == 1)
            .count(),
        1
    );

    let snapshot = orchestrator.results().snapshot();
    let files = report::write_reports(&output, "report.txt", &snapshot, &summary).unwrap();
    let text = fs::read_to_string(files.text).unwrap();
    assert!(text.starts_with("Processed services:\n\nbilling\n"));
    assert!(text.contains("Projects not found:\n\nghost\n"));
    assert!(text.contains("billing/org.gone:missing:0.1\n"));
    assert!(files.json.is_file());
}
