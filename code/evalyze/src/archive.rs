/// Move the artifacts of one configuration out of the artifact directory and into a fresh storage
/// directory next to them, so that the next evaluation run of the same configuration starts
/// numbering its cycles from 1 again.
///
/// Layout of the storage directory:
///
///   analyze_evalstorage_<prefix>-<N>/
///     <prefix>-<id>.log, <prefix>-<id>.json, <prefix>-user-time-<id>.json, aggregates
///     sp-resmon-data/<prefix>-sp-resmon-<id>.{txt,json}
///     idp-resmon-data/<prefix>-idp-resmon-<id>.{txt,json}
use crate::Source;

use anyhow::{bail, Result};
use evalutils::{Origin, TestConfiguration};
use evallog::find_all_artifacts;
use std::fs;
use std::path::{Path, PathBuf};

fn resmon_dir_name(origin: Origin) -> String {
    format!("{origin}-resmon-data")
}

pub fn archive_artifacts(source: &Source, dry_run: bool) -> Result<()> {
    let (storage, moves) = plan_archive(&source.data_path, &source.config)?;
    if moves.is_empty() {
        bail!("No artifacts for {} in {}", source.config, source.data_path.display());
    }
    if dry_run {
        for (from, to) in &moves {
            println!("{} -> {}", from.display(), to.display());
        }
        return Ok(());
    }
    execute_archive(&storage, &moves)?;
    tracing::info!(
        "{}: moved {} files to {}",
        source.config,
        moves.len(),
        storage.display()
    );
    Ok(())
}

/// The storage directory to create and the (from, to) pairs of the files to move into it.
///
/// N is one more than the number of storage directories already present for the configuration,
/// bumped past any directory of that name that already exists.

type Moves = Vec<(PathBuf, PathBuf)>;

fn plan_archive(dir: &Path, config: &TestConfiguration) -> Result<(PathBuf, Moves)> {
    let mut existing = 0;
    let stem = format!("analyze_evalstorage_{}-", config.prefix());
    for entry in fs::read_dir(dir)?.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(n) = name.strip_prefix(&stem) {
                if !n.is_empty() && n.bytes().all(|c| c.is_ascii_digit()) {
                    existing += 1;
                }
            }
        }
    }
    let mut n = existing + 1;
    while dir.join(config.storage_dir_name(n)).exists() {
        n += 1;
    }
    let storage = dir.join(config.storage_dir_name(n));

    let mut moves = vec![];
    for a in find_all_artifacts(dir, config)? {
        let target = match a.kind.origin() {
            Some(origin) => storage.join(resmon_dir_name(origin)).join(&a.file_name),
            None => storage.join(&a.file_name),
        };
        moves.push((a.path, target));
    }
    for name in [config.aggregate_name(), config.user_time_aggregate_name()] {
        let path = dir.join(&name);
        if path.is_file() {
            moves.push((path, storage.join(name)));
        }
    }
    Ok((storage, moves))
}

fn execute_archive(storage: &Path, moves: &[(PathBuf, PathBuf)]) -> Result<()> {
    fs::create_dir(storage)?;
    for origin in [Origin::Sp, Origin::Idp] {
        fs::create_dir(storage.join(resmon_dir_name(origin)))?;
    }
    for (from, to) in moves {
        tracing::debug!("{} -> {}", from.display(), to.display());
        fs::rename(from, to)?;
    }
    Ok(())
}

#[test]
fn test_archive() {
    let tmp = tempfile::tempdir().unwrap();
    let d = tmp.path();
    for name in [
        "oidc-eval-60-2-1.log",
        "oidc-eval-60-2-sp-resmon-1.txt",
        "oidc-eval-60-2-idp-resmon-1.txt",
    ] {
        fs::copy(format!("../tests/evallog/{name}"), d.join(name)).unwrap();
    }
    fs::write(d.join("oidc-eval-60-2-aggregate.json"), "{}").unwrap();
    fs::write(d.join("oidc-eval-60-20-1.log"), "").unwrap();
    fs::write(d.join("notes.txt"), "").unwrap();
    fs::create_dir(d.join("analyze_evalstorage_oidc-eval-60-2-1")).unwrap();
    fs::create_dir(d.join("analyze_evalstorage_oidc-eval-60-20-1")).unwrap();

    let config = TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap();
    let (storage, moves) = plan_archive(d, &config).unwrap();
    assert!(storage == d.join("analyze_evalstorage_oidc-eval-60-2-2"));
    assert!(moves.len() == 4);
    execute_archive(&storage, &moves).unwrap();

    assert!(storage.join("oidc-eval-60-2-1.log").is_file());
    assert!(storage.join("oidc-eval-60-2-aggregate.json").is_file());
    assert!(storage.join("sp-resmon-data/oidc-eval-60-2-sp-resmon-1.txt").is_file());
    assert!(storage.join("idp-resmon-data/oidc-eval-60-2-idp-resmon-1.txt").is_file());
    assert!(!d.join("oidc-eval-60-2-1.log").exists());
    // Other configurations and unrelated files stay.
    assert!(d.join("oidc-eval-60-20-1.log").is_file());
    assert!(d.join("notes.txt").is_file());

    let (_, moves) = plan_archive(d, &config).unwrap();
    assert!(moves.is_empty());
}
