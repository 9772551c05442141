use std::{
    fs::{File, create_dir, rename},
    path::{MAIN_SEPARATOR_STR, Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::debug;
use rustix::fs::{FlockOperation, Mode, chmod, flock};

pub fn mkdir_p<P: AsRef<Path>>(path: P, mode: Mode) -> Result<()> {
    let p = path.as_ref();
    let p_str = p
        .to_str()
        .ok_or_else(|| anyhow!("path {:?} is not valid UTF-8", p))?;
    for dir in descending_dirs(p_str) {
        match create_dir(&dir) {
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(e) => return Err(anyhow!("unable to create directory {}: {}", dir, e)),
            Ok(_) => {
                debug!("Created directory: {}", &dir);
                chmod(&dir, mode)
                    .map_err(|e| anyhow!("unable to change mode of {}: {}", dir, e))?;
            }
        }
    }
    Ok(())
}

// Given a path, return a list of it and its parents in descending order.
// For example, "/a/b/c", returns the Vector ["/a", "/a/b", "/a/b/c"].
fn descending_dirs(path: &str) -> Vec<String> {
    let dirs = path.split("/").collect::<Vec<&str>>();
    (1..=dirs.len())
        .map(|i| dirs[..i].join("/"))
        .filter(|s| !s.is_empty())
        .collect()
}

// The behavior of Path::join is surprising, as it does not actually join paths
// when the path argument is absolute, rather it returns the absolute one. This
// version joins the paths as expected, which is what rendering below a target
// root needs.
pub trait JoinRelative {
    fn join_relative<P: AsRef<Path>>(&self, path: P) -> PathBuf;
}

impl JoinRelative for Path {
    fn join_relative<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let p = path.as_ref();
        match p.strip_prefix(MAIN_SEPARATOR_STR) {
            Ok(relative) => Path::join(self, relative),
            Err(_) => Path::join(self, p),
        }
    }
}

fn parent_dir(p: &Path) -> Result<&Path> {
    if p.is_absolute() {
        return Ok(p.parent().unwrap_or(Path::new("/")));
    }
    p.parent()
        .map(|d| {
            if d.as_os_str().is_empty() {
                Path::new(".")
            } else {
                d
            }
        })
        .ok_or_else(|| anyhow!("invalid path {}", p.display()))
}

/// Replace the file at `path` by writing a sibling temporary file, syncing it,
/// and renaming it over the destination. Readers never see a partial file.
pub fn atomic_write<P: AsRef<Path>>(
    path: P,
    write: impl FnOnce(&File) -> Result<()>,
) -> Result<()> {
    let p = path.as_ref();
    let p_str = p.to_string_lossy();

    let dir_name = parent_dir(p)?;
    let file_name = p
        .file_name()
        .ok_or_else(|| anyhow!("invalid path {}", p_str))?;
    let file_name_tmp = dir_name.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    {
        let f = File::create(&file_name_tmp)
            .context(format!("unable to create {}", file_name_tmp.display()))?;
        write(&f).context(format!("unable to write {}", p_str))?;
        f.sync_all().context(format!("unable to sync {}", p_str))?;
    }

    rename(&file_name_tmp, p).context(format!(
        "unable to rename {} to {}",
        file_name_tmp.to_string_lossy(),
        p_str
    ))?;
    let dir_name_str = dir_name.to_string_lossy();
    let dir = File::open(dir_name).context(format!("unable to open directory {}", dir_name_str))?;
    dir.sync_all()
        .context(format!("unable to sync directory {}", dir_name_str))
}

/// An exclusive advisory lock held on `<path>.lock` until dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    _file: File,
}

impl LockFile {
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let lock_path = PathBuf::from(format!("{}.lock", p.display()));
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context(format!("unable to open {}", lock_path.display()))?;
        debug!("Waiting for lock {}", lock_path.display());
        flock(&file, FlockOperation::LockExclusive)
            .map_err(|e| anyhow!("unable to lock {}: {}", lock_path.display(), e))?;
        Ok(Self {
            path: lock_path,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
