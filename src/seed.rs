/*
 *  seed.rs
 *
 *  SignPlay - exhibit display controller
 *  (c) 2020-26 Stuart Hunter
 *
 *  Seed content - push bundled images the cloud doesn't have yet
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::remote::RemoteClient;

/// Outcome of one seeding pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<String>,
    /// Local files the remote already had
    pub already_present: usize,
    pub synced: bool,
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Local files whose name the remote store doesn't hold.
pub fn files_to_upload(local: &[PathBuf], remote: &[String]) -> Vec<PathBuf> {
    let remote: HashSet<&str> = remote.iter().map(String::as_str).collect();
    local
        .iter()
        .filter(|p| file_name(p).is_some_and(|n| !remote.contains(n.as_str())))
        .cloned()
        .collect()
}

/// Regular files directly inside `dir`, sorted by name.
pub async fn list_seed_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => files.push(entry.path()),
            Ok(_) => debug!("seed: skipping non-file {}", entry.path().display()),
            Err(e) => warn!("seed: cannot stat {}: {}", entry.path().display(), e),
        }
    }
    files.sort();
    Ok(files)
}

/// Uploads whatever is missing remotely, all at once, then asks for a
/// content sync. A failed upload is reported and does not stop the rest.
pub async fn upload_seed_content(remote: Arc<dyn RemoteClient>, dir: &Path) -> SeedReport {
    let mut report = SeedReport::default();

    let remote_files = match remote.remote_files().await {
        Ok(files) => files,
        Err(e) => {
            warn!("seed: cannot list remote content, skipping upload: {}", e);
            return report;
        }
    };

    let local = match list_seed_files(dir).await {
        Ok(files) => files,
        Err(e) => {
            warn!("seed: cannot read {}: {}", dir.display(), e);
            Vec::new()
        }
    };

    let pending = files_to_upload(&local, &remote_files);
    report.already_present = local.len() - pending.len();

    let mut uploads = JoinSet::new();
    for path in pending {
        let remote = Arc::clone(&remote);
        uploads.spawn(async move {
            let name = file_name(&path).unwrap_or_default();
            let result = remote.upload_file(&path).await;
            (name, result)
        });
    }

    while let Some(joined) = uploads.join_next().await {
        match joined {
            Ok((name, Ok(()))) => {
                debug!("seed: uploaded {}", name);
                report.uploaded.push(name);
            }
            Ok((name, Err(e))) => {
                warn!("seed: upload of {} failed: {}", name, e);
                report.failed.push(name);
            }
            Err(e) => warn!("seed: upload task died: {}", e),
        }
    }
    report.uploaded.sort();
    report.failed.sort();

    match remote.sync_content().await {
        Ok(()) => report.synced = true,
        Err(e) => warn!("seed: content sync failed: {}", e),
    }

    info!(
        "seed: {} uploaded, {} failed, {} already present",
        report.uploaded.len(),
        report.failed.len(),
        report.already_present
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_to_upload() {
        let local = vec![PathBuf::from("/seed/a.png"), PathBuf::from("/seed/b.png")];
        let remote = vec!["a.png".to_string()];
        assert_eq!(files_to_upload(&local, &remote), vec![PathBuf::from("/seed/b.png")]);
        assert!(files_to_upload(&local, &["a.png".into(), "b.png".into()]).is_empty());
        assert_eq!(files_to_upload(&local, &[]).len(), 2);
    }

    #[tokio::test]
    async fn test_list_seed_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"b").unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_seed_files(dir.path()).await.unwrap();
        let names: Vec<String> = files.iter().filter_map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
