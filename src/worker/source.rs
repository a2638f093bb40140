//! Routine source cache for single-trial mode.
//!
//! A worker started once per trial would otherwise fetch the same source
//! from the store on every invocation. The first invocation writes the
//! fetched source next to the worker; later ones read it back.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::routine::RoutineSource;
use crate::Result;

/// Read a cached source. `Ok(None)` when no cache file exists yet.
pub async fn read_cached(path: &Path) -> Result<Option<RoutineSource>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(RoutineSource::new(text))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persist `source` for the next invocation (temp file, then rename).
pub async fn write_cache(path: &Path, source: &RoutineSource) -> Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    tokio::fs::write(&staging, source.as_str()).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_cache_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cached = read_cached(&dir.path().join("absent.rtn")).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routine.rtn");
        let source = RoutineSource::new("fn r(t) { return 1; }");

        write_cache(&path, &source).await.unwrap();
        assert_eq!(read_cached(&path).await.unwrap(), Some(source));
    }

    #[tokio::test]
    async fn test_unreadable_cache_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        assert!(read_cached(dir.path()).await.is_err());
    }
}
