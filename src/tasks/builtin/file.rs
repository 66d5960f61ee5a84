//! File tasks: send a file from the host, save attachments onto it.
//!
//! Every path is confined to the configured file roots. Relative paths are
//! tried against each root in turn; a path that does not exist as given is
//! searched for by file name below the roots.

use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::command::ParsedCommand;
use crate::error::TaskError;
use crate::mail::{IncomingMessage, OutgoingAttachment, OutgoingMessage};
use crate::tasks::builtin::subject;
use crate::tasks::task::{TaskContext, TaskHandler};

/// Normalize a path lexically (resolve `.` and `..` without touching the filesystem).
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Canonical form of `path`, following the nearest existing ancestor when
/// the path itself does not exist yet.
fn canonical(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    let normalized = normalize_lexical(&absolute);

    let mut ancestor = normalized.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(real) = ancestor.canonicalize() {
            return tail.into_iter().rev().fold(real, |acc, part| acc.join(part));
        }
        match (ancestor.file_name(), ancestor.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                ancestor = parent;
            }
            _ => return normalized.clone(),
        }
    }
}

/// Resolve `path_str` inside one of `roots`.
fn confine(path_str: &str, roots: &[PathBuf]) -> Result<PathBuf, TaskError> {
    let path = Path::new(path_str.trim());
    let candidates: Vec<PathBuf> = if path.is_absolute() {
        vec![path.to_path_buf()]
    } else {
        roots.iter().map(|r| r.join(path)).collect()
    };
    let chosen = candidates
        .iter()
        .find(|c| c.exists())
        .or_else(|| candidates.first())
        .ok_or_else(|| TaskError::NotPermitted {
            path: path_str.to_string(),
        })?;

    let resolved = canonical(chosen);
    if roots.iter().any(|root| resolved.starts_with(canonical(root))) {
        Ok(resolved)
    } else {
        Err(TaskError::NotPermitted {
            path: path_str.to_string(),
        })
    }
}

/// Find an existing file or directory for `path_str`.
fn locate(path_str: &str, roots: &[PathBuf], depth: usize) -> Result<PathBuf, TaskError> {
    let confined = confine(path_str, roots)?;
    if confined.exists() {
        return Ok(confined);
    }

    let wanted = Path::new(path_str.trim())
        .file_name()
        .ok_or_else(|| TaskError::NotFound {
            what: path_str.to_string(),
        })?;
    for root in roots {
        let found = WalkDir::new(root)
            .max_depth(depth)
            .into_iter()
            .filter_map(Result::ok)
            .find(|entry| entry.file_name() == wanted);
        if let Some(entry) = found {
            tracing::debug!(wanted = %path_str, found = %entry.path().display(), "Located by name");
            return confine(&entry.path().to_string_lossy(), roots);
        }
    }
    Err(TaskError::NotFound {
        what: path_str.to_string(),
    })
}

/// Zip a directory tree in memory.
fn zip_dir(dir: &Path) -> Result<Vec<u8>, TaskError> {
    let zip_err = |e: zip::result::ZipError| TaskError::ExecutionFailed(format!("Zip error: {e}"));

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| TaskError::ExecutionFailed(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| TaskError::ExecutionFailed(e.to_string()))?;
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options).map_err(zip_err)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(zip_err)?;
            let data = std::fs::read(entry.path())?;
            zip.write_all(&data)?;
        }
    }
    Ok(zip.finish().map_err(zip_err)?.into_inner())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}

// ── Read ────────────────────────────────────────────────────────────

/// `read [path]`: reply with the file attached.
pub struct ReadFileTask;

#[async_trait]
impl TaskHandler for ReadFileTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        let Some(requested) = cmd.first_arg() else {
            return Ok(OutgoingMessage::reply_to(
                msg,
                subject("READ", "Main Menu"),
                "Usage: read [path]\nThe path may be relative to a file root or just a file name.",
            ));
        };

        let roots = ctx.config.file_roots.clone();
        let depth = ctx.config.search_depth;
        let requested_owned = requested.to_string();
        let attachment = tokio::task::spawn_blocking(move || -> Result<_, TaskError> {
            let path = locate(&requested_owned, &roots, depth)?;
            if path.is_dir() {
                let data = zip_dir(&path)?;
                Ok((
                    path.clone(),
                    OutgoingAttachment::Bytes {
                        filename: format!("{}.zip", display_name(&path)),
                        data,
                    },
                ))
            } else {
                Ok((path.clone(), OutgoingAttachment::Path(path)))
            }
        })
        .await
        .map_err(|e| TaskError::ExecutionFailed(format!("File worker failed: {e}")))??;

        let (path, attachment) = attachment;
        tracing::info!(path = %path.display(), sender = %msg.sender(), "Sending file");
        Ok(OutgoingMessage::reply_to(
            msg,
            subject("READ", "Completed"),
            format!("Attached {}", path.display()),
        )
        .with_attachment(attachment))
    }
}

// ── Write ───────────────────────────────────────────────────────────

/// `write [dir]` + attachments: save every attachment into `dir`.
pub struct WriteFileTask;

#[async_trait]
impl TaskHandler for WriteFileTask {
    async fn run(
        &self,
        ctx: &TaskContext<'_>,
        msg: &IncomingMessage,
        cmd: &ParsedCommand,
    ) -> Result<OutgoingMessage, TaskError> {
        if msg.attachments().is_empty() {
            return Ok(OutgoingMessage::reply_to(
                msg,
                subject("WRITE", "Main Menu"),
                format!(
                    "Usage: write [dir] with files attached.\nWithout [dir] files go to {}.",
                    ctx.config.inbox_dir.display()
                ),
            ));
        }

        let target = cmd
            .first_arg()
            .map(str::to_string)
            .unwrap_or_else(|| ctx.config.inbox_dir.to_string_lossy().to_string());
        let dir = confine(&target, &ctx.config.file_roots)?;
        if dir.exists() && !dir.is_dir() {
            return Err(TaskError::invalid(
                "write",
                format!("{} is not a directory", dir.display()),
            ));
        }
        tokio::fs::create_dir_all(&dir).await?;

        let mut saved = Vec::new();
        for attachment in msg.attachments() {
            let Some(name) = Path::new(&attachment.filename).file_name() else {
                tracing::warn!(filename = %attachment.filename, "Skipping attachment without a file name");
                continue;
            };
            let path = dir.join(name);
            tokio::fs::write(&path, &attachment.content).await?;
            saved.push(path.display().to_string());
        }

        tracing::info!(dir = %dir.display(), count = saved.len(), "Saved attachments");
        Ok(OutgoingMessage::reply_to(
            msg,
            subject("WRITE", "Completed"),
            format!("Saved {} file(s):\n{}", saved.len(), saved.join("\n")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tasks::builtin::testing::{Fixture, message};
    use std::io::Read;

    fn config_for(root: &Path) -> EngineConfig {
        EngineConfig {
            file_roots: vec![root.to_path_buf()],
            inbox_dir: root.join("inbox"),
            ..EngineConfig::default()
        }
    }

    // ── confine / locate ────────────────────────────────────────────

    #[test]
    fn normalize_removes_dots() {
        assert_eq!(
            normalize_lexical(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn traversal_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let err = confine("../../etc/passwd", &roots).unwrap_err();
        assert!(matches!(err, TaskError::NotPermitted { .. }));
    }

    #[test]
    fn absolute_path_outside_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("x.txt"), "x").unwrap();
        let roots = vec![root.path().to_path_buf()];
        let err = confine(&other.path().join("x.txt").to_string_lossy(), &roots).unwrap_err();
        assert!(matches!(err, TaskError::NotPermitted { .. }));
    }

    #[test]
    fn nonexistent_path_inside_root_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let path = confine("new/sub/dir", &roots).unwrap();
        assert!(path.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn locate_searches_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/notes.txt"), "hi").unwrap();
        let roots = vec![dir.path().to_path_buf()];

        let found = locate("notes.txt", &roots, 6).unwrap();
        assert!(found.ends_with("a/b/notes.txt"));
        assert!(matches!(
            locate("notes.txt", &roots, 1),
            Err(TaskError::NotFound { .. })
        ));
    }

    // ── read ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_attaches_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.csv"), "a,b").unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;

        let reply = fx
            .run(&ReadFileTask, &message("read [report.csv]"))
            .await
            .unwrap();
        assert_eq!(reply.subject, "READ: Completed");
        match &reply.attachments[..] {
            [OutgoingAttachment::Path(p)] => assert!(p.ends_with("report.csv")),
            other => panic!("unexpected attachments: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_zips_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("logs/old")).unwrap();
        std::fs::write(dir.path().join("logs/today.log"), "today").unwrap();
        std::fs::write(dir.path().join("logs/old/y.log"), "yesterday").unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;

        let reply = fx.run(&ReadFileTask, &message("read [logs]")).await.unwrap();
        let [OutgoingAttachment::Bytes { filename, data }] = &reply.attachments[..] else {
            panic!("expected an in-memory zip");
        };
        assert_eq!(filename, "logs.zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(data.clone())).unwrap();
        let mut content = String::new();
        archive
            .by_name("old/y.log")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "yesterday");
    }

    #[tokio::test]
    async fn read_without_path_is_usage() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = fx.run(&ReadFileTask, &message("read")).await.unwrap();
        assert_eq!(reply.subject, "READ: Main Menu");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;
        let err = fx
            .run(&ReadFileTask, &message("read [nope.txt]"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    // ── write ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_saves_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;
        let msg = message("write [uploads]")
            .with_attachment("../../evil.sh", b"echo".to_vec())
            .with_attachment("data.bin", b"\x00\x01".to_vec());

        let reply = fx.run(&WriteFileTask, &msg).await.unwrap();
        assert_eq!(reply.subject, "WRITE: Completed");
        assert_eq!(
            std::fs::read(dir.path().join("uploads/evil.sh")).unwrap(),
            b"echo"
        );
        assert!(dir.path().join("uploads/data.bin").exists());
    }

    #[tokio::test]
    async fn write_defaults_to_inbox() {
        let dir = tempfile::tempdir().unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;
        let msg = message("write").with_attachment("a.txt", b"a".to_vec());

        fx.run(&WriteFileTask, &msg).await.unwrap();
        assert!(dir.path().join("inbox/a.txt").exists());
    }

    #[tokio::test]
    async fn write_outside_roots_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fx = Fixture::new(config_for(dir.path())).await;
        let msg = message("write [../escape]").with_attachment("a.txt", b"a".to_vec());

        let err = fx.run(&WriteFileTask, &msg).await.unwrap_err();
        assert!(matches!(err, TaskError::NotPermitted { .. }));
    }

    #[tokio::test]
    async fn write_without_attachments_is_usage() {
        let fx = Fixture::new(EngineConfig::default()).await;
        let reply = fx.run(&WriteFileTask, &message("write [x]")).await.unwrap();
        assert_eq!(reply.subject, "WRITE: Main Menu");
    }
}
