//! End-to-end build scenarios against the recording engine.

use deploy_builder::builder::{Archive, BuildOptions, BuildSource};
use deploy_builder::cli::BuilderConfig;
use deploy_builder::container::{CommitSpec, EngineCall, MemoryEngine, SharedBuffer};
use deploy_builder::limiter::{LimitConfig, LimitMode, SharedLimiter};
use deploy_builder::{BuildError, BuildSystem, OutputSink};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use test_tag::tag;

const MANIFEST: &str = "\
hooks:
  build:
    - echo a
    - echo b
healthcheck:
  path: /healthcheck
";

fn config() -> BuilderConfig {
    let mut config = BuilderConfig::default();
    config.deploy.registry = Some("registry.example.com".to_string());
    config
        .apps
        .insert("web".to_string(), "registry.example.com/app-web:v1".to_string());
    config
}

fn tar_gz_archive() -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        let content = b"web: ./server\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "Procfile", &content[..])
            .unwrap();
        builder.finish().unwrap();
    }
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

/// Every created container was removed exactly once.
fn assert_all_removed_once(engine: &MemoryEngine) {
    let created = engine
        .calls()
        .iter()
        .filter(|call| matches!(call, EngineCall::Create(_)))
        .count();
    let removed = engine.removed();
    let unique: HashSet<_> = removed.iter().collect();
    assert_eq!(removed.len(), created, "removals: {:?}", removed);
    assert_eq!(unique.len(), removed.len(), "duplicate removal: {:?}", removed);
}

#[tokio::test]
#[tag(integration)]
async fn test_image_with_build_hooks() {
    let engine = Arc::new(
        MemoryEngine::new()
            .with_output("Procfile", "web: ./server\nworker: ./work\n")
            .with_output("tsuru.yml", MANIFEST)
            .with_output("echo a", "a\nb\n"),
    );
    let system = BuildSystem::new(config(), engine.clone()).unwrap();
    let buffer = SharedBuffer::default();

    let image = system
        .build(
            "web",
            BuildOptions::new(BuildSource::Image("registry.example.com/app-web:v1".to_string())),
            &OutputSink::new(buffer.clone()),
        )
        .await
        .unwrap();
    assert_eq!(image, "registry.example.com/app-web:latest");

    // Procfile, manifest, hooks
    assert_eq!(
        engine.commands()[2],
        "echo a && echo b",
        "hook command: {:?}",
        engine.commands()
    );
    assert_eq!(
        engine.commits(),
        vec![CommitSpec {
            container: "container-3".to_string(),
            repository: "registry.example.com/app-web".to_string(),
            tag: "v1".to_string(),
        }]
    );
    assert_all_removed_once(&engine);

    let output = buffer.to_string_lossy();
    let markers = [
        "---- Getting process from image ----",
        "---- Getting tsuru.yaml from image ----",
        "---- Running build hooks ----",
        " ---> Running \"echo a && echo b\"",
    ];
    let positions: Vec<usize> = markers.iter().map(|m| output.find(m).unwrap()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", output);
    assert!(output.contains("\"healthcheck\":{\"path\":\"/healthcheck\"}"));
    assert!(output.contains("Process \"worker\" found"));
}

#[tokio::test]
#[tag(integration)]
async fn test_uploaded_archive_build() {
    let engine = Arc::new(MemoryEngine::new().with_output("tsuru.yml", MANIFEST));
    let system = BuildSystem::new(config(), engine.clone()).unwrap();
    let archive = tar_gz_archive();
    let size = archive.len();

    let options = BuildOptions::from_fields(
        Some(Archive::from_bytes("source.tar.gz", archive)),
        false,
        None,
        Some("ignored:image".to_string()),
    )
    .with_tag("v2");
    let image = system
        .build("web", options, &OutputSink::discard())
        .await
        .unwrap();
    assert_eq!(image, "registry.example.com/app-web:latest");

    let calls = engine.calls();
    let upload = calls
        .iter()
        .find_map(|call| match call {
            EngineCall::Upload { path, size, .. } => Some((path.clone(), *size)),
            _ => None,
        })
        .unwrap();
    assert_eq!(upload.0, "/home/application");
    // Wrapped in a tar stream with its own header and padding
    assert!(upload.1 > size);

    let commits = engine.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].repository, "registry.example.com/app-web");
    assert_eq!(commits[0].tag, "v2");
    // Hooks commit over the deployed image reference
    assert_eq!(commits[1].repository, "registry.example.com/app-web");
    assert_eq!(commits[1].tag, "v2");

    let images: Vec<String> = engine.created().into_iter().map(|s| s.image).collect();
    assert_eq!(images[0], "tsuru/scratch:latest");
    assert!(images[1..]
        .iter()
        .all(|i| i == "registry.example.com/app-web:v2"));
    assert_all_removed_once(&engine);
}

#[tokio::test]
#[tag(integration)]
async fn test_rebuild_uses_previous_archive() {
    let engine = Arc::new(
        MemoryEngine::new().with_file("/home/application/archive.tar.gz", vec![0u8; 2048]),
    );
    let system = BuildSystem::new(config(), engine.clone()).unwrap();

    system
        .build(
            "web",
            BuildOptions::new(BuildSource::Rebuild),
            &OutputSink::discard(),
        )
        .await
        .unwrap();

    let calls = engine.calls();
    assert!(matches!(
        &calls[0],
        EngineCall::Create(spec) if spec.image == "registry.example.com/app-web:v1" && spec.cmd.is_none()
    ));
    assert!(calls.iter().any(|call| matches!(
        call,
        EngineCall::Upload { size: 2048, .. }
    )));
    assert_all_removed_once(&engine);
}

#[tokio::test]
#[tag(integration)]
async fn test_rebuild_unknown_app() {
    let engine = Arc::new(MemoryEngine::new());
    let system = BuildSystem::new(config(), engine.clone()).unwrap();

    let err = system
        .build(
            "api",
            BuildOptions::new(BuildSource::Rebuild),
            &OutputSink::discard(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "App api image not found");
    assert!(engine.calls().is_empty());
}

#[tokio::test]
#[tag(integration)]
async fn test_no_source_and_dockerfile_errors() {
    let engine = Arc::new(MemoryEngine::new());
    let system = BuildSystem::new(config(), engine.clone()).unwrap();

    let err = system
        .build("web", BuildOptions::default(), &OutputSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::NoValidSource));

    let err = system
        .build(
            "web",
            BuildOptions::new(BuildSource::Rebuild).from_dockerfile(),
            &OutputSink::discard(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Unsupported(_)));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
#[tag(integration)]
async fn test_concurrent_builds_share_global_limit() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryEngine::new());
    let mut config = config();
    config.limit = LimitConfig {
        mode: LimitMode::Global,
        actions_per_host: 1,
        shared_dir: dir.path().to_path_buf(),
        poll_interval_ms: 5,
        ..Default::default()
    };
    let system = Arc::new(BuildSystem::new(config, engine.clone()).unwrap());

    let mut handles = Vec::new();
    for i in 0..4 {
        let system = system.clone();
        handles.push(tokio::spawn(async move {
            system
                .build(
                    "web",
                    BuildOptions::new(BuildSource::Image(format!("img-{}", i))),
                    &OutputSink::discard(),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Two metadata containers per build
    assert_eq!(engine.created().len(), 8);
    let limiter = SharedLimiter::new(dir.path().to_path_buf(), 1);
    assert_eq!(limiter.in_use("memory://").unwrap(), 0);
    assert_all_removed_once(&engine);
}
