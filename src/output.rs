//! Output file naming and the four sinks a session writes to.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::{ProfileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Cpu,
    Block,
    Trace,
    Heap,
}

impl ProfileKind {
    /// Fixed order in which sinks are opened and closed.
    pub const ALL: [ProfileKind; 4] = [
        ProfileKind::Cpu,
        ProfileKind::Block,
        ProfileKind::Trace,
        ProfileKind::Heap,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            ProfileKind::Cpu => "cpu.pprof",
            ProfileKind::Block => "block.prof",
            ProfileKind::Trace => "trace.out",
            ProfileKind::Heap => "heap.prof",
        }
    }

    fn index(self) -> usize {
        match self {
            ProfileKind::Cpu => 0,
            ProfileKind::Block => 1,
            ProfileKind::Trace => 2,
            ProfileKind::Heap => 3,
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileKind::Cpu => "cpu",
            ProfileKind::Block => "block",
            ProfileKind::Trace => "trace",
            ProfileKind::Heap => "heap",
        };
        f.write_str(name)
    }
}

/// Label used when a session is started with an empty name. Two calls within
/// the same nanosecond return the same label.
pub fn default_label(prefix: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{prefix}-{nanos}")
}

/// The label of a session and the paths of its four profile files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    label: String,
    paths: [PathBuf; 4],
}

impl OutputFiles {
    pub fn new(dir: &Path, label: &str) -> Self {
        let paths = ProfileKind::ALL.map(|kind| dir.join(format!("{label}.{}", kind.suffix())));
        Self {
            label: label.to_string(),
            paths,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self, kind: ProfileKind) -> &Path {
        &self.paths[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProfileKind, &Path)> {
        ProfileKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.path(kind)))
    }

    /// Suggested commands for inspecting each file.
    pub fn commands(&self) -> Vec<String> {
        self.iter()
            .map(|(kind, path)| {
                let path = path.display();
                match kind {
                    ProfileKind::Cpu => format!("pprof -http=:8080 {path}"),
                    ProfileKind::Block => format!("cat {path}"),
                    ProfileKind::Trace => {
                        format!("load {path} in https://ui.perfetto.dev or chrome://tracing")
                    }
                    ProfileKind::Heap => format!("cat {path}"),
                }
            })
            .collect()
    }
}

/// The four open profile files. Dropping a `Sinks` closes whatever is open.
#[derive(Debug)]
pub(crate) struct Sinks {
    files: [File; 4],
}

impl Sinks {
    /// Creates (or truncates) all four files. If any of them fails, the ones
    /// already created are closed and removed again.
    pub(crate) fn create(outputs: &OutputFiles) -> Result<Self> {
        let mut created = Vec::with_capacity(4);
        let mut open = |kind: ProfileKind| -> Result<File> {
            let path = outputs.path(kind);
            let file = File::create(path).map_err(|source| ProfileError::Create {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!(%kind, path = %path.display(), "created profile sink");
            created.push(path);
            Ok(file)
        };

        // elements are evaluated in order; an error drops the files opened so far
        let result = (|| -> Result<[File; 4]> {
            Ok([
                open(ProfileKind::Cpu)?,
                open(ProfileKind::Block)?,
                open(ProfileKind::Trace)?,
                open(ProfileKind::Heap)?,
            ])
        })();

        match result {
            Ok(files) => Ok(Self { files }),
            Err(err) => {
                for path in created {
                    remove_quietly(path);
                }
                Err(err)
            }
        }
    }

    pub(crate) fn get(&self, kind: ProfileKind) -> &File {
        &self.files[kind.index()]
    }

    pub(crate) fn get_mut(&mut self, kind: ProfileKind) -> &mut File {
        &mut self.files[kind.index()]
    }

    /// Syncs and closes every sink in the fixed order. All sinks are released
    /// even when one fails; the first failure is returned.
    pub(crate) fn close(self, outputs: &OutputFiles) -> Result<()> {
        let mut first_err = None;
        for (kind, file) in ProfileKind::ALL.into_iter().zip(self.files) {
            let path = outputs.path(kind);
            match file.sync_all() {
                Ok(()) => tracing::debug!(%kind, path = %path.display(), "closed profile sink"),
                Err(source) => {
                    tracing::warn!(%kind, path = %path.display(), error = %source, "failed to close profile sink");
                    first_err.get_or_insert(ProfileError::Close {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Closes the sinks and deletes the files, used when a start is rolled back.
    pub(crate) fn discard(self, outputs: &OutputFiles) {
        drop(self);
        for (_, path) in outputs.iter() {
            remove_quietly(path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove profile file");
    }
}
