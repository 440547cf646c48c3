//! Repository discovery.

use std::path::{Path, PathBuf};

use git2::Repository;
use thiserror::Error;

/// The watched repository: worktree root plus metadata directory.
#[derive(Debug, Clone)]
pub struct Repo {
    /// Absolute, canonical worktree root.
    pub worktree: PathBuf,
    /// Absolute, canonical metadata directory.
    pub gitdir: PathBuf,
    /// 2 when the metadata directory lives outside the worktree cone.
    pub nr_paths_watching: usize,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepoError {
    #[error("not inside a git repository: {0}")]
    Discover(#[source] git2::Error),

    #[error("bare repos are not supported: '{0}'")]
    Bare(String),

    #[error("could not resolve {}: {source}", .path.display())]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Locate the repository containing `dir`.
///
/// The daemon creates and deletes cookie files inside the metadata
/// directory. When `<worktree>/.git` is not itself a directory the metadata
/// lives outside the worktree cone and a second watch root is needed to see
/// those cookie events.
pub fn discover(dir: &Path) -> Result<Repo, RepoError> {
    let repo = Repository::discover(dir).map_err(RepoError::Discover)?;
    let Some(workdir) = repo.workdir() else {
        return Err(RepoError::Bare(repo.path().display().to_string()));
    };

    let worktree = canonicalize(workdir)?;
    let dot_git = worktree.join(".git");
    if dot_git.is_dir() {
        Ok(Repo {
            gitdir: canonicalize(&dot_git)?,
            worktree,
            nr_paths_watching: 1,
        })
    } else {
        Ok(Repo {
            gitdir: canonicalize(repo.path())?,
            worktree,
            nr_paths_watching: 2,
        })
    }
}

impl Repo {
    /// The second watch root, when one is needed.
    pub fn external_gitdir(&self) -> Option<&Path> {
        (self.nr_paths_watching > 1).then_some(self.gitdir.as_path())
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf, RepoError> {
    std::fs::canonicalize(path).map_err(|source| RepoError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Minimal on-disk layout git recognises as a metadata directory.
    fn scaffold_gitdir(dir: &Path) {
        fs::create_dir_all(dir.join("objects")).expect("objects");
        fs::create_dir_all(dir.join("refs")).expect("refs");
        fs::write(dir.join("HEAD"), "ref: refs/heads/main\n").expect("HEAD");
    }

    #[test]
    fn discovers_a_worktree_with_an_embedded_gitdir() {
        let dir = tempfile::tempdir().expect("tempdir");
        scaffold_gitdir(&dir.path().join(".git"));

        let repo = discover(dir.path()).expect("discover");
        assert_eq!(repo.nr_paths_watching, 1);
        assert!(repo.external_gitdir().is_none());
        assert!(repo.gitdir.starts_with(&repo.worktree));
    }

    #[test]
    fn discovers_from_a_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        scaffold_gitdir(&dir.path().join(".git"));
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).expect("nested dirs");

        let repo = discover(&nested).expect("discover");
        assert_eq!(
            repo.worktree,
            fs::canonicalize(dir.path()).expect("canonical root")
        );
    }

    #[test]
    fn gitfile_worktrees_need_a_second_watch_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let meta = dir.path().join("meta.git");
        scaffold_gitdir(&meta);
        let worktree = dir.path().join("wt");
        fs::create_dir_all(&worktree).expect("worktree");
        fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", meta.display()),
        )
        .expect(".git file");

        let repo = discover(&worktree).expect("discover");
        assert_eq!(repo.nr_paths_watching, 2);
        assert_eq!(
            repo.external_gitdir().expect("external gitdir"),
            fs::canonicalize(&meta).expect("canonical meta")
        );
    }

    #[test]
    fn bare_repositories_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        scaffold_gitdir(dir.path());
        fs::write(dir.path().join("config"), "[core]\n\tbare = true\n").expect("config");

        assert!(matches!(discover(dir.path()), Err(RepoError::Bare(_))));
    }

    #[test]
    fn outside_any_repository_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let isolated = dir.path().join("empty");
        fs::create_dir_all(&isolated).expect("empty dir");
        assert!(matches!(discover(&isolated), Err(RepoError::Discover(_))));
    }
}
