//! External-command store
//!
//! Delegates blob transfer to user-supplied shell commands (ssh, rclone,
//! anything that reads stdin or writes stdout), with `{hash}` in the command
//! line replaced by the hex digest. Put feeds the blob on stdin; get expects
//! it on stdout; the optional ls command prints `<hex digest> <size>` lines.

use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::checksum::Digest;
use crate::error::{Error, Result};

use super::{LsEntry, Store};

/// A store shelling out for every operation
pub struct CommandStore {
    put_cmd: String,
    get_cmd: String,
    ls_cmd: Option<String>,
}

impl CommandStore {
    pub fn new(put_cmd: impl Into<String>, get_cmd: impl Into<String>) -> Self {
        Self {
            put_cmd: put_cmd.into(),
            get_cmd: get_cmd.into(),
            ls_cmd: None,
        }
    }

    pub fn with_ls(mut self, ls_cmd: impl Into<String>) -> Self {
        self.ls_cmd = Some(ls_cmd.into());
        self
    }

    fn render(template: &str, hash: &Digest) -> String {
        template.replace("{hash}", &hash.to_hex())
    }

    fn command(line: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }

    fn check_status(line: &str, output: &std::process::Output) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        Err(Error::CommandFailed {
            command: line.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl Store for CommandStore {
    async fn put(&self, hash: &Digest, data: Bytes) -> Result<()> {
        let line = Self::render(&self.put_cmd, hash);
        let mut child = Self::command(&line)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&data).await?;
        }
        let output = child.wait_with_output().await?;
        Self::check_status(&line, &output)
    }

    async fn get(&self, hash: &Digest) -> Result<Bytes> {
        let line = Self::render(&self.get_cmd, hash);
        let output = Self::command(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Self::check_status(&line, &output)?;
        Ok(Bytes::from(output.stdout))
    }

    async fn ls(&self) -> Result<Vec<LsEntry>> {
        let Some(line) = &self.ls_cmd else {
            return Ok(Vec::new());
        };
        let output = Self::command(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Self::check_status(line, &output)?;

        let text = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        for raw in text.lines() {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let mut fields = raw.split_whitespace();
            let (Some(hash), Some(size)) = (fields.next(), fields.next()) else {
                return Err(Error::Config(format!("bad ls line from `{}`: {}", line, raw)));
            };
            let hash = Digest::from_hex(hash)?;
            let size: u64 = size
                .parse()
                .map_err(|e| Error::Config(format!("bad ls size from `{}`: {}", line, e)))?;
            entries.push(LsEntry { hash, size });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_reads_stdout() {
        let store = CommandStore::new("true", "printf 'blob for {hash}'");
        let hash = Digest::sum(b"x");
        let data = store.get(&hash).await.unwrap();
        assert_eq!(
            data.as_ref(),
            format!("blob for {}", hash.to_hex()).as_bytes()
        );
    }

    #[tokio::test]
    async fn test_put_feeds_stdin() {
        let store = CommandStore::new("test \"$(cat)\" = payload", "false");
        store
            .put(&Digest::sum(b"x"), Bytes::from_static(b"payload"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_command_failed() {
        let store = CommandStore::new("true", "echo broken >&2; exit 3");
        let err = store.get(&Digest::sum(b"x")).await.unwrap_err();
        match err {
            Error::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ls_parses_digest_size_lines() {
        let hash = Digest::sum(b"listed");
        let store = CommandStore::new("true", "false")
            .with_ls(format!("printf '{} 42\\n'", hash.to_hex()));
        assert_eq!(store.ls().await.unwrap(), vec![LsEntry { hash, size: 42 }]);
    }

    #[tokio::test]
    async fn test_no_ls_command_means_empty_listing() {
        let store = CommandStore::new("true", "false");
        assert!(store.ls().await.unwrap().is_empty());
    }
}
