//! One-shot migration of the legacy store layout (§4.1, §6): a main file
//! plus its `-wal`/`-shm` journal companions, renamed atomically into the
//! current location only when nothing already occupies it. Conservative by
//! design — if the destination exists, the legacy files are left untouched
//! rather than risking a clobber.

use std::path::Path;

/// Companion suffixes that travel with a SQLite main file.
const COMPANION_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// If `current` does not yet exist and a legacy file is present, rename the
/// legacy main file and its companions into place. Best-effort: failures are
/// logged and otherwise ignored, since a missing legacy file is the common
/// case (nothing to migrate) rather than an error.
pub fn migrate_legacy_layout(current: &Path) {
    if current.exists() {
        return;
    }
    let Some(legacy) = legacy_path() else {
        return;
    };
    if !legacy.exists() {
        return;
    }

    if let Err(err) = std::fs::rename(&legacy, current) {
        tracing::warn!(
            error = %err,
            from = %legacy.display(),
            to = %current.display(),
            "legacy store migration failed; leaving legacy file in place"
        );
        return;
    }

    for suffix in COMPANION_SUFFIXES {
        let legacy_companion = companion_path(&legacy, suffix);
        if !legacy_companion.exists() {
            continue;
        }
        let current_companion = companion_path(current, suffix);
        if current_companion.exists() {
            continue;
        }
        if let Err(err) = std::fs::rename(&legacy_companion, &current_companion) {
            tracing::warn!(
                error = %err,
                from = %legacy_companion.display(),
                "legacy companion migration failed"
            );
        }
    }

    tracing::info!(to = %current.display(), "migrated legacy store layout");
}

fn legacy_path() -> Option<std::path::PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".codemem").join("codemem.sqlite"))
}

fn companion_path(main: &Path, suffix: &str) -> std::path::PathBuf {
    let mut os = main.as_os_str().to_owned();
    os.push(suffix);
    std::path::PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_when_current_already_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let current = tmp.path().join("codemem.db");
        std::fs::write(&current, b"x").unwrap();
        migrate_legacy_layout(&current);
        assert_eq!(std::fs::read(&current).unwrap(), b"x");
    }

    #[test]
    fn no_op_when_no_legacy_file_present() {
        let tmp = tempfile::tempdir().unwrap();
        let current = tmp.path().join("codemem.db");
        migrate_legacy_layout(&current);
        assert!(!current.exists());
    }
}
