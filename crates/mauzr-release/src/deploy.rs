//! MicroPython unit deployment.
//!
//! A unit is named `<suit>-<agent>[-<instance>]`. Its settings live under
//! that key in one of the YAML `mauzr.conf` files; they are written as a
//! Python literal to `config.py` next to the unit's main module and both are
//! uploaded with ampy. The CA bundle is staged as `cert/ca.pem` alongside.

use crate::docker::Invocation;
use mauzr_types::error::{ReleaseError, ReleaseResult};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Serial port used when none is given.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// `<suit>-<agent>[-<instance>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitId(Vec<String>);

impl UnitId {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for UnitId {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split('-').map(String::from).collect();
        if !(2..=3).contains(&parts.len()) || parts.iter().any(String::is_empty) {
            return Err(ReleaseError::Config(format!(
                "Invalid unit id '{s}', expected <suit>-<agent>[-<instance>]"
            )));
        }
        Ok(Self(parts))
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("-"))
    }
}

/// Options for deploying one unit.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub id: UnitId,
    /// Main module of the unit, uploaded as `main.py`.
    pub module: PathBuf,
    pub port: String,
    /// YAML files searched for the unit, first match wins.
    pub config_files: Vec<PathBuf>,
}

/// Config files searched for unit settings, in priority order.
pub fn unit_config_candidates(workdir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![workdir.join(".mauzr.conf")];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("mauzr.conf"));
    }
    candidates.push(PathBuf::from("/etc/mauzr.conf"));
    candidates.push(PathBuf::from("/run/secrets/mauzr.conf"));
    candidates.extend(conf_dir_files(Path::new("/etc/mauzr.d")));
    candidates
}

/// `*.conf` files of a drop-in directory, sorted by name.
fn conf_dir_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();
    files
}

/// Find the settings of `id`. Unreadable files are skipped; the first file
/// with an entry for the unit is used, and the entry gains an `id` list.
pub fn read_unit_config(files: &[PathBuf], id: &UnitId) -> ReleaseResult<(PathBuf, Mapping)> {
    let key = Value::String(id.to_string());
    for file in files {
        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = %file.display(), error = %e, "Unit config not readable");
                continue;
            }
        };
        let doc: Value = serde_yaml::from_str(&text)
            .map_err(|e| ReleaseError::Config(format!("{}: {e}", file.display())))?;
        let Some(entry) = doc.as_mapping().and_then(|m| m.get(&key)) else {
            debug!(path = %file.display(), unit = %id, "No entry for unit");
            continue;
        };

        let mut unit = match entry {
            Value::Mapping(m) => m.clone(),
            Value::Null => Mapping::new(),
            _ => {
                return Err(ReleaseError::Config(format!(
                    "{}: entry for {id} must be a mapping",
                    file.display()
                )))
            }
        };
        if unit.is_empty() {
            return Err(ReleaseError::Config(format!(
                "{}: entry for {id} is empty",
                file.display()
            )));
        }
        unit.insert(
            Value::String("id".into()),
            Value::Sequence(id.parts().iter().cloned().map(Value::String).collect()),
        );
        return Ok((file.clone(), unit));
    }
    Err(ReleaseError::Config(format!("No config found for unit {id}")))
}

/// Render a YAML value as a Python literal, as `config.py` is evaluated by
/// the unit on boot.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".into(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            (None, None, Some(f)) if f.is_nan() => "float('nan')".into(),
            (None, None, Some(f)) if f.is_infinite() => {
                if f > 0.0 {
                    "float('inf')".into()
                } else {
                    "float('-inf')".into()
                }
            }
            (None, None, Some(f)) => format!("{f:?}"),
            _ => n.to_string(),
        },
        Value::String(s) => python_str(s),
        Value::Sequence(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_literal(k), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::Tagged(tagged) => python_literal(&tagged.value),
    }
}

fn python_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Files prepared for upload.
#[derive(Debug, Clone)]
pub struct StagedUnit {
    pub dir: PathBuf,
    pub main: PathBuf,
    pub config: PathBuf,
    pub cert: PathBuf,
}

fn copy(from: &Path, to: &Path) -> ReleaseResult<()> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| ReleaseError::Config(format!("Cannot copy {}: {e}", from.display())))
}

/// Recreate `dir` with `main.py`, `config.py` and `cert/ca.pem`.
pub fn stage_unit(
    dir: &Path,
    unit: &Mapping,
    module: &Path,
    ca_cert: &Path,
) -> ReleaseResult<StagedUnit> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::create_dir_all(dir.join("cert"))?;

    let staged = StagedUnit {
        dir: dir.to_path_buf(),
        main: dir.join("main.py"),
        config: dir.join("config.py"),
        cert: dir.join("cert").join("ca.pem"),
    };
    std::fs::write(&staged.config, python_literal(&Value::Mapping(unit.clone())))?;
    copy(module, &staged.main)?;
    copy(ca_cert, &staged.cert)?;
    Ok(staged)
}

/// ampy uploads of the main module and its config, in that order.
pub fn upload_plan(ampy: &str, port: &str, staged: &StagedUnit) -> Vec<Invocation> {
    [(&staged.main, "main.py"), (&staged.config, "config.py")]
        .into_iter()
        .map(|(local, remote)| {
            Invocation::new(ampy).args([
                "-p".to_string(),
                port.to_string(),
                "put".to_string(),
                local.display().to_string(),
                remote.to_string(),
            ])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_unit_id() {
        let id: UnitId = "home-light-kitchen".parse().unwrap();
        assert_eq!(id.parts(), ["home", "light", "kitchen"]);
        assert_eq!(id.to_string(), "home-light-kitchen");
        assert!("home-light".parse::<UnitId>().is_ok());
        assert!("home".parse::<UnitId>().is_err());
        assert!("home--light".parse::<UnitId>().is_err());
        assert!("a-b-c-d".parse::<UnitId>().is_err());
    }

    #[test]
    fn test_python_literal() {
        let value = yaml(
            "name: \"it's\"\nport: 1883\nratio: 0.5\nretain: true\nhost: ~\ntopics: [a, b]\n",
        );
        assert_eq!(
            python_literal(&value),
            "{'name': 'it\\'s', 'port': 1883, 'ratio': 0.5, 'retain': True, 'host': None, 'topics': ['a', 'b']}"
        );
        assert_eq!(python_literal(&yaml("\"a\\\\b\\nc\"")), "'a\\\\b\\nc'");
        assert_eq!(python_literal(&yaml("-3")), "-3");
        assert_eq!(python_literal(&yaml(".inf")), "float('inf')");
        assert_eq!(python_literal(&yaml("{}")), "{}");
    }

    #[test]
    fn test_first_file_with_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.conf");
        let b = dir.path().join("b.conf");
        let c = dir.path().join("c.conf");
        std::fs::write(&a, "home-door:\n  pin: 4\n").unwrap();
        std::fs::write(&b, "home-light:\n  pin: 5\n").unwrap();
        std::fs::write(&c, "home-light:\n  pin: 6\n").unwrap();
        let files = vec![dir.path().join("missing.conf"), a, b.clone(), c];

        let id: UnitId = "home-light".parse().unwrap();
        let (source, unit) = read_unit_config(&files, &id).unwrap();
        assert_eq!(source, b);
        assert_eq!(
            python_literal(&Value::Mapping(unit)),
            "{'pin': 5, 'id': ['home', 'light']}"
        );
    }

    #[test]
    fn test_missing_or_empty_unit_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mauzr.conf");
        std::fs::write(&file, "home-light:\n").unwrap();
        let files = vec![file];

        let empty = read_unit_config(&files, &"home-light".parse().unwrap()).unwrap_err();
        assert!(matches!(empty, ReleaseError::Config(ref m) if m.contains("empty")));

        let absent = read_unit_config(&files, &"home-door".parse().unwrap()).unwrap_err();
        assert!(matches!(absent, ReleaseError::Config(ref m) if m.contains("No config found")));
    }

    #[test]
    fn test_broken_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mauzr.conf");
        std::fs::write(&file, "home-light: [unclosed\n").unwrap();
        assert!(read_unit_config(&[file], &"home-light".parse().unwrap()).is_err());
    }

    #[test]
    fn test_conf_dir_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20-b.conf", "10-a.conf", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files = conf_dir_files(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("10-a.conf"), dir.path().join("20-b.conf")]
        );
        assert!(conf_dir_files(&dir.path().join("absent")).is_empty());
    }

    #[test]
    fn test_candidates_start_in_workdir() {
        let candidates = unit_config_candidates(Path::new("/srv/mauzr"));
        assert_eq!(candidates[0], Path::new("/srv/mauzr/.mauzr.conf"));
        assert!(candidates.contains(&PathBuf::from("/etc/mauzr.conf")));
        assert!(candidates.contains(&PathBuf::from("/run/secrets/mauzr.conf")));
    }

    #[test]
    fn test_stage_and_upload() {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("light.py");
        let cert = dir.path().join("ca.pem");
        std::fs::write(&module, "import mauzr\n").unwrap();
        std::fs::write(&cert, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let build = dir.path().join("build/home-light");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("stale.py"), "").unwrap();

        let unit: Mapping = serde_yaml::from_str("pin: 5").unwrap();
        let staged = stage_unit(&build, &unit, &module, &cert).unwrap();

        assert!(!build.join("stale.py").exists());
        assert_eq!(std::fs::read_to_string(&staged.main).unwrap(), "import mauzr\n");
        assert_eq!(std::fs::read_to_string(&staged.config).unwrap(), "{'pin': 5}");
        assert!(staged.cert.is_file());

        let plan = upload_plan("ampy", "/dev/ttyUSB1", &staged);
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan[0].args,
            vec![
                "-p".to_string(),
                "/dev/ttyUSB1".to_string(),
                "put".to_string(),
                staged.main.display().to_string(),
                "main.py".to_string(),
            ]
        );
        assert_eq!(plan[1].args[4], "config.py");
    }

    #[test]
    fn test_stage_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage_unit(
            &dir.path().join("build"),
            &Mapping::new(),
            &dir.path().join("nope.py"),
            &dir.path().join("ca.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, ReleaseError::Config(ref m) if m.contains("nope.py")));
    }
}
