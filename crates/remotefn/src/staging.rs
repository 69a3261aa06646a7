//! Local staging of invocation artifacts.
//!
//! A [`StagingArea`] belongs to one wrapped function and lives as long as it
//! does. Every call then carves out its own [`CallStage`] subdirectory, so
//! concurrent calls never share artifact paths. Both are removed when dropped,
//! whichever way the call ends.

use std::path::{Path, PathBuf};

use remotefn_core::CallId;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::Result;
use crate::unit::InvocationUnit;

/// File name of the downloaded result inside a call stage.
pub const OUTPUT_FILE: &str = "out";

/// Private directory owned by one wrapped function.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh staging directory under the system temp dir.
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("remotefn-{}-", label))
            .tempdir()?;
        debug!(path = %dir.path().display(), "Created staging area");
        Ok(Self { dir })
    }

    /// Create the staging directory under `parent` instead.
    pub fn new_in(parent: impl AsRef<Path>, label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("remotefn-{}-", label))
            .tempdir_in(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve a call-unique subdirectory.
    pub async fn begin_call(&self) -> Result<CallStage> {
        let call_id = CallId::generate();
        let dir = self.dir.path().join(call_id.dir_name());
        tokio::fs::create_dir(&dir).await?;
        debug!(call_id = %call_id, "Reserved call stage");
        Ok(CallStage { call_id, dir })
    }

    /// Remove the staging directory, reporting any failure.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(path = %path.display(), "Removed staging area");
        Ok(())
    }
}

/// One call's private slice of the staging area.
#[derive(Debug)]
pub struct CallStage {
    call_id: CallId,
    dir: PathBuf,
}

impl CallStage {
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<stage>/<handler>`
    pub fn callable_path(&self, handler: &str) -> PathBuf {
        self.dir.join(handler)
    }

    /// `<stage>/arg<i>`
    pub fn arg_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("arg{}", index))
    }

    /// `<stage>/out`
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }

    /// Write the unit's blobs. Staging twice overwrites the same files.
    pub async fn stage(&self, unit: &InvocationUnit) -> Result<StagedUnit> {
        let callable = self.callable_path(unit.handler());
        tokio::fs::write(&callable, unit.callable_blob()).await?;

        let mut args = Vec::with_capacity(unit.arg_count());
        for (i, blob) in unit.argument_blobs().iter().enumerate() {
            let path = self.arg_path(i);
            tokio::fs::write(&path, blob).await?;
            args.push(path);
        }

        debug!(
            call_id = %self.call_id,
            handler = %unit.handler(),
            arg_count = args.len(),
            "Staged invocation unit"
        );

        Ok(StagedUnit {
            callable,
            args,
            output: self.output_path(),
        })
    }
}

impl Drop for CallStage {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                call_id = %self.call_id,
                error = %e,
                "Failed to remove call stage"
            ),
        }
    }
}

/// Paths of a staged unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedUnit {
    pub callable: PathBuf,
    pub args: Vec<PathBuf>,
    /// Where the result is expected to land.
    pub output: PathBuf,
}
