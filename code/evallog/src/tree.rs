/// Find the artifacts of one evaluation series in an artifact directory.
///
/// The directory is shared with other series and with files that have nothing to do with the
/// evaluation at all, so every name is filtered through the series' `ArtifactMatcher`.  Artifacts
/// are returned in numeric cycle-id order, which is the order the capture side created them in.
/// That is not necessarily the order the cycles ran in, and nothing downstream assumes it is.
use crate::error::{Error, Result};

use evalutils::{ArtifactKind, ArtifactMatcher, Origin, TestConfiguration};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which artifacts to look for.  Timing and resource artifacts exist in a raw and a serialized
/// form; when both exist for a cycle the serialized one is chosen.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactClass {
    Timing,
    UserTime,
    Resmon(Origin),
}

impl ArtifactClass {
    fn admits(&self, kind: ArtifactKind) -> bool {
        match (self, kind) {
            (ArtifactClass::Timing, ArtifactKind::TimingLog | ArtifactKind::TimingJson) => true,
            (ArtifactClass::UserTime, ArtifactKind::UserTime) => true,
            (ArtifactClass::Resmon(o), ArtifactKind::ResmonRaw(k) | ArtifactKind::ResmonJson(k)) => {
                *o == k
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: ArtifactKind,
    pub cycle_id: u32,
}

impl Artifact {
    pub fn read_text(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))
    }
}

/// Return the artifacts of `class` for `config` found directly in `dir`, sorted by cycle id, at
/// most one per cycle id.

pub fn find_artifacts(
    dir: &Path,
    config: &TestConfiguration,
    class: ArtifactClass,
) -> Result<Vec<Artifact>> {
    let matcher = ArtifactMatcher::new(config)?;
    let mut found = BTreeMap::<u32, Artifact>::new();
    for artifact in scan_dir(dir, &matcher)? {
        if !class.admits(artifact.kind) {
            continue;
        }
        match found.get(&artifact.cycle_id) {
            Some(prev) if prev.kind.is_serialized() => {}
            _ => {
                found.insert(artifact.cycle_id, artifact);
            }
        }
    }
    Ok(found.into_values().collect())
}

/// Return every cycle artifact for `config` in `dir`, of all kinds and forms, sorted by name.

pub fn find_all_artifacts(dir: &Path, config: &TestConfiguration) -> Result<Vec<Artifact>> {
    let matcher = ArtifactMatcher::new(config)?;
    let mut all = scan_dir(dir, &matcher)?;
    all.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(all)
}

fn scan_dir(dir: &Path, matcher: &ArtifactMatcher) -> Result<Vec<Artifact>> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "Not a viable artifact directory: {}",
            dir.display()
        )));
    }
    let mut artifacts = vec![];
    let rd = dir.read_dir().map_err(|e| Error::io(dir, e))?;
    for entry in rd {
        // Bad directory entries are ignored.  As in the read_dir documentation, forward progress is
        // assumed despite the error.
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Non-UTF8 names can't match the grammar.
        let file_name = match entry.file_name().to_str() {
            Some(s) => s.to_string(),
            None => continue,
        };
        if let Some((kind, cycle_id)) = matcher.classify(&file_name) {
            artifacts.push(Artifact {
                path,
                file_name,
                kind,
                cycle_id,
            });
        }
    }
    Ok(artifacts)
}

#[cfg(test)]
fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), "").unwrap();
}

#[test]
fn test_find_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let d = tmp.path();
    for name in [
        "oidc-eval-60-2-2.log",
        "oidc-eval-60-2-10.log",
        "oidc-eval-60-2-1.log",
        "oidc-eval-60-2-1.json",
        "oidc-eval-60-2-aggregate.json",
        "oidc-eval-60-2-user-time-1.json",
        "oidc-eval-60-2-user-time-2.json",
        "oidc-eval-60-20-3.json",
        "saml-eval-60-2-4.json",
        "oidc-eval-60-2-sp-resmon-1.txt",
        "oidc-eval-60-2-idp-resmon-1.json",
        "notes.txt",
    ] {
        touch(d, name);
    }
    std::fs::create_dir(d.join("oidc-eval-60-2-5.json")).unwrap();

    let conf = TestConfiguration::new(evalutils::Protocol::Oidc, 60, 2).unwrap();
    let timing = find_artifacts(d, &conf, ArtifactClass::Timing).unwrap();
    let names = timing.iter().map(|a| a.file_name.as_str()).collect::<Vec<&str>>();
    assert!(names == vec!["oidc-eval-60-2-1.json", "oidc-eval-60-2-2.log", "oidc-eval-60-2-10.log"]);
    assert!(timing[2].cycle_id == 10);
    assert!(timing[1].kind == ArtifactKind::TimingLog);

    let ut = find_artifacts(d, &conf, ArtifactClass::UserTime).unwrap();
    assert!(ut.len() == 2);

    let sp = find_artifacts(d, &conf, ArtifactClass::Resmon(Origin::Sp)).unwrap();
    assert!(sp.len() == 1 && sp[0].kind == ArtifactKind::ResmonRaw(Origin::Sp));

    let all = find_all_artifacts(d, &conf).unwrap();
    assert!(all.len() == 8);

    assert!(find_artifacts(&d.join("nowhere"), &conf, ArtifactClass::Timing).is_err());
}
