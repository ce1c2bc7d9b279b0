/// Serialize raw artifacts: timing logs (.log) into per-cycle JSON, resource records (.txt) into
/// per-group JSON.  Cycles that already have a serialized artifact are skipped, so the command can
/// be rerun after every capture.  The raw artifacts are kept.
use crate::Source;

use anyhow::Result;
use evalutils::{ArtifactKind, EvalConfig, Origin, TestConfiguration};
use evallog::{
    find_artifacts, serialize_cycle_log, serialize_resource_records, transform_resmon_record,
    transform_timing_log, ArtifactClass,
};
use std::path::Path;

pub fn transform_artifacts(source: &Source) -> Result<()> {
    let (converted, skipped) =
        transform_dir(&source.data_path, &source.config, &source.eval_config)?;
    tracing::info!(
        "{}: {converted} artifacts transformed, {skipped} already serialized",
        source.config
    );
    Ok(())
}

/// Returns the number of artifacts transformed and the number skipped.

fn transform_dir(
    dir: &Path,
    config: &TestConfiguration,
    eval_config: &EvalConfig,
) -> Result<(usize, usize)> {
    let mut converted = 0;
    let mut skipped = 0;

    for a in find_artifacts(dir, config, ArtifactClass::Timing)? {
        if a.kind.is_serialized() {
            skipped += 1;
            continue;
        }
        let log = transform_timing_log(config.protocol, &a.file_name, &a.read_text()?)?;
        let target = dir.join(config.artifact_name(ArtifactKind::TimingJson, a.cycle_id));
        std::fs::write(&target, serialize_cycle_log(&log)?)?;
        tracing::debug!("{} -> {}", a.file_name, target.display());
        converted += 1;
    }

    for origin in [Origin::Sp, Origin::Idp] {
        for a in find_artifacts(dir, config, ArtifactClass::Resmon(origin))? {
            if a.kind.is_serialized() {
                skipped += 1;
                continue;
            }
            let records = transform_resmon_record(origin, eval_config, &a.file_name, &a.read_text()?)?;
            let target = dir.join(config.artifact_name(ArtifactKind::ResmonJson(origin), a.cycle_id));
            std::fs::write(&target, serialize_resource_records(&records)?)?;
            tracing::debug!("{} -> {}", a.file_name, target.display());
            converted += 1;
        }
    }

    Ok((converted, skipped))
}

#[test]
fn test_transform_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let d = tmp.path();
    for name in [
        "oidc-eval-60-2-1.log",
        "oidc-eval-60-2-2.log",
        "oidc-eval-60-2-sp-resmon-1.txt",
        "oidc-eval-60-2-idp-resmon-1.txt",
    ] {
        std::fs::copy(format!("../tests/evallog/{name}"), d.join(name)).unwrap();
    }
    std::fs::write(d.join("README"), "not an artifact").unwrap();

    let config = TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap();
    let eval_config = EvalConfig::default();
    assert!(transform_dir(d, &config, &eval_config).unwrap() == (4, 0));
    assert!(d.join("oidc-eval-60-2-2.json").is_file());
    assert!(d.join("oidc-eval-60-2-idp-resmon-1.json").is_file());
    let first = std::fs::read_to_string(d.join("oidc-eval-60-2-1.json")).unwrap();

    // Rerunning finds everything serialized and rewrites nothing.
    assert!(transform_dir(d, &config, &eval_config).unwrap() == (0, 4));
    assert!(std::fs::read_to_string(d.join("oidc-eval-60-2-1.json")).unwrap() == first);
    assert!(d.join("oidc-eval-60-2-1.log").is_file());
}
