use crate::Source;

use anyhow::Result;
use evallog::{
    aggregate_timing, aggregate_user_time, find_artifacts, Aggregate, ArtifactClass,
    UserTimeAggregate,
};
use std::path::PathBuf;

/// Build the timing aggregate from the timing artifacts in the data directory.

pub fn build_timing(source: &Source) -> Result<Aggregate> {
    let artifacts = find_artifacts(&source.data_path, &source.config, ArtifactClass::Timing)?;
    if artifacts.is_empty() {
        tracing::warn!("{}: no timing artifacts found", source.config);
    }
    Ok(aggregate_timing(source.config, &artifacts)?)
}

pub fn build_user_time(source: &Source) -> Result<UserTimeAggregate> {
    let artifacts = find_artifacts(&source.data_path, &source.config, ArtifactClass::UserTime)?;
    if artifacts.is_empty() {
        tracing::warn!("{}: no user-time artifacts found", source.config);
    }
    Ok(aggregate_user_time(
        source.config,
        &source.eval_config.allowed_outcomes,
        &artifacts,
    )?)
}

/// Write `<prefix>-aggregate.json` and `<prefix>-user-time-aggregate.json`.  Neither name matches
/// the cycle artifact grammar, so the output can go into the artifact directory itself.

pub fn write_aggregates(source: &Source, output: &Option<String>) -> Result<()> {
    let dir = match output {
        Some(o) => PathBuf::from(o),
        None => source.data_path.clone(),
    };
    let timing = build_timing(source)?;
    let path = dir.join(source.config.aggregate_name());
    std::fs::write(&path, timing.to_json()?)?;
    tracing::info!("Wrote {}", path.display());

    let user_time = build_user_time(source)?;
    let path = dir.join(source.config.user_time_aggregate_name());
    std::fs::write(&path, user_time.to_json()?)?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
fn fixture_source(d: &std::path::Path, names: &[&str]) -> Source {
    for name in names {
        std::fs::copy(format!("../tests/evallog/{name}"), d.join(name)).unwrap();
    }
    Source {
        config: evalutils::TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap(),
        eval_config: evalutils::EvalConfig::default(),
        data_path: d.to_path_buf(),
    }
}

#[test]
fn test_write_aggregates_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let source = fixture_source(tmp.path(), &["oidc-eval-60-2-1.log", "oidc-eval-60-2-2.log"]);
    write_aggregates(&source, &None).unwrap();
    let path = tmp.path().join("oidc-eval-60-2-aggregate.json");
    let first = std::fs::read(&path).unwrap();

    // The aggregate itself is not picked up as an artifact on the second run.
    write_aggregates(&source, &None).unwrap();
    assert!(std::fs::read(&path).unwrap() == first);

    let agg = Aggregate::from_json("a", &String::from_utf8(first).unwrap()).unwrap();
    assert!(agg.number_of_cycles == 2);
    let ut = std::fs::read_to_string(tmp.path().join("oidc-eval-60-2-user-time-aggregate.json"))
        .unwrap();
    let ut = UserTimeAggregate::from_json("u", &ut).unwrap();
    assert!(ut.number_of_cycles == 0 && ut.data.len() == 2);
}
