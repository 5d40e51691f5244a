use std::{
    fs::{self, Permissions},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tempfile::{Builder, NamedTempFile};

use crate::{error::InstallerError, model::RenderedFile, ui};

/// Writes every file into `dir`, all or nothing.
///
/// Each file is first staged as a hidden temp file in the same directory;
/// only once all of them are fully on disk are they renamed into place. A
/// failure before that point leaves the destination untouched (dropped
/// temp files delete themselves).
pub fn install(files: &[RenderedFile], dir: &Path) -> Result<Vec<PathBuf>, InstallerError> {
    fs::create_dir_all(dir)?;

    let pb = ui::spinner(format!("Writing configuration to {}…", dir.display()));
    let result = stage(files, dir).and_then(|staged| {
        staged
            .into_iter()
            .map(|(tmp, dest)| -> Result<PathBuf, InstallerError> {
                tmp.persist(&dest).map_err(|e| InstallerError::Io(e.error))?;
                log::info!("Wrote {}", dest.display());
                Ok(dest)
            })
            .collect::<Result<Vec<_>, InstallerError>>()
    });

    match result {
        Ok(written) => {
            ui::done_spinner(pb, &format!("{} file(s) written to {}.", written.len(), dir.display()));
            Ok(written)
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e)
        }
    }
}

fn stage(files: &[RenderedFile], dir: &Path) -> Result<Vec<(NamedTempFile, PathBuf)>, InstallerError> {
    files
        .iter()
        .map(|file| -> Result<(NamedTempFile, PathBuf), InstallerError> {
            let dest = dir.join(file.name);
            if dest.file_name().map(|n| n.len()) != Some(file.name.len()) || dest.is_dir() {
                return Err(InstallerError::Io(io::Error::other(format!(
                    "cannot write {}: not a plain file in {}",
                    file.name,
                    dir.display()
                ))));
            }

            let mut tmp = Builder::new().prefix(".nixos-infect-").tempfile_in(dir)?;
            tmp.write_all(file.contents.as_bytes())?;
            tmp.as_file().set_permissions(Permissions::from_mode(0o644))?;
            tmp.as_file().sync_all()?;
            Ok((tmp, dest))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files() -> Vec<RenderedFile> {
        vec![
            RenderedFile {
                name: "networking.nix",
                contents: "{ lib, ... }: { }\n".into(),
            },
            RenderedFile {
                name: "swap.nix",
                contents: "{ ... }: { zramSwap.enable = true; }\n".into(),
            },
        ]
    }

    #[test]
    fn writes_files_and_leaves_no_temp_behind() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nixos");

        let written = install(&files(), &target).unwrap();
        assert_eq!(written, vec![target.join("networking.nix"), target.join("swap.nix")]);
        assert_eq!(
            fs::read_to_string(target.join("swap.nix")).unwrap(),
            "{ ... }: { zramSwap.enable = true; }\n"
        );

        let names: Vec<_> = fs::read_dir(&target)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.starts_with(".nixos-infect-")));

        let mode = fs::metadata(target.join("networking.nix")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("swap.nix"), "old").unwrap();

        install(&files(), dir.path()).unwrap();
        assert!(fs::read_to_string(dir.path().join("swap.nix")).unwrap().contains("zramSwap"));
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn failure_while_staging_changes_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("networking.nix"), "old").unwrap();
        // The second file cannot be staged: its destination is a directory.
        fs::create_dir(dir.path().join("swap.nix")).unwrap();

        assert!(install(&files(), dir.path()).is_err());
        assert_eq!(fs::read_to_string(dir.path().join("networking.nix")).unwrap(), "old");
        assert!(dir.path().join("swap.nix").is_dir());
        assert_eq!(entries(dir.path()), ["networking.nix", "swap.nix"]);
    }

    #[test]
    fn nested_file_name_is_refused_before_anything_is_written() {
        let dir = TempDir::new().unwrap();
        let mut files = files();
        files[1].name = "sub/swap.nix";

        assert!(install(&files, dir.path()).is_err());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn unwritable_destination_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        // A regular file where the directory should be.
        let blocker = dir.path().join("nixos");
        fs::write(&blocker, "").unwrap();

        assert!(install(&files(), &blocker).is_err());
        assert_eq!(fs::read_to_string(&blocker).unwrap(), "");
    }
}
