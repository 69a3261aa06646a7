//! Worker-side entry point.
//!
//! A worker receives the callable blob and argument blobs at fixed paths,
//! runs the entry point program with those paths, and leaves the JSON result
//! at the fixed output path for the caller to download.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::callable::{self, Registry};
use crate::codec;
use crate::error::Result;

/// Entry point program installed in the execution image.
pub const RUNNER_PROGRAM: &str = "/golem/bin/remotefn-runner";

/// Where the callable blob is placed on the worker.
pub const REMOTE_FUNC_PATH: &str = "/golem/input/func";

/// Where the result is written on the worker.
pub const REMOTE_OUTPUT_PATH: &str = "/golem/output/out";

/// Where argument `index` is placed on the worker.
pub fn remote_arg_path(index: usize) -> String {
    format!("/golem/input/arg{}", index)
}

/// Run the callable at `func` with the arguments at `args`, writing the
/// result to `output`.
pub async fn execute(
    namespace: Arc<Registry>,
    func: &Path,
    args: &[PathBuf],
    output: &Path,
) -> Result<Value> {
    let blob = tokio::fs::read(func).await?;
    let callable = callable::deserialize(&blob, namespace)?;
    debug!(target_handler = %callable.target(), "Loaded callable");

    let mut values = Vec::with_capacity(args.len());
    for path in args {
        let bytes = tokio::fs::read(path).await?;
        values.push(codec::decode(&bytes)?);
    }

    let result = callable.invoke(values)?;

    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, codec::encode(&result)?).await?;
    info!(
        target_handler = %callable.target(),
        output = %output.display(),
        "Wrote result"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Handler;
    use crate::error::InvocationError;
    use serde_json::json;

    fn namespace() -> Arc<Registry> {
        Arc::new(
            Registry::new()
                .with_handler(Handler::typed("concat", 2, |(a, b): (String, String)| a + &b))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let func = dir.path().join("func");
        let handler = namespace().get("concat").unwrap().clone();
        tokio::fs::write(&func, callable::serialize(&handler).unwrap())
            .await
            .unwrap();
        let mut args = Vec::new();
        for (i, v) in ["foo", "bar"].iter().enumerate() {
            let path = dir.path().join(format!("arg{}", i));
            tokio::fs::write(&path, codec::encode(v).unwrap()).await.unwrap();
            args.push(path);
        }
        let output = dir.path().join("output").join("out");

        let result = execute(namespace(), &func, &args, &output).await.unwrap();
        assert_eq!(result, json!("foobar"));

        let written = tokio::fs::read(&output).await.unwrap();
        assert_eq!(codec::decode(&written).unwrap(), json!("foobar"));
    }

    #[tokio::test]
    async fn test_missing_argument_file() {
        let dir = tempfile::tempdir().unwrap();
        let func = dir.path().join("func");
        let handler = namespace().get("concat").unwrap().clone();
        tokio::fs::write(&func, callable::serialize(&handler).unwrap())
            .await
            .unwrap();

        let err = execute(
            namespace(),
            &func,
            &[dir.path().join("arg0")],
            &dir.path().join("out"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InvocationError::Staging(_)));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_remote_layout() {
        assert_eq!(remote_arg_path(0), "/golem/input/arg0");
        assert_eq!(remote_arg_path(11), "/golem/input/arg11");
    }
}
