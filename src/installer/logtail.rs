// file: src/installer/logtail.rs
// version: 1.0.0
// guid: 2b9e6d1a-8c4f-4a73-9e25-6d1c3f8b7a04

//! Following installer logs over a remote shell

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::network::RemoteShell;
use crate::{AutoinstallError, Result};

/// Lines fetched per read
pub const CHUNK_LINES: usize = 100;

/// Where log lines are read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    File(String),
    /// Journal of a systemd unit
    Journal(String),
}

/// Offset tracking reader of a remote log
#[derive(Debug, Clone)]
pub struct LogTail {
    source: LogSource,
    /// Next line to read, 1-based as `tail -n +N` expects
    offset: usize,
    command_timeout: Duration,
}

impl LogTail {
    pub fn file(path: impl Into<String>, command_timeout: Duration) -> Self {
        Self::new(LogSource::File(path.into()), command_timeout)
    }

    pub fn journal(unit: impl Into<String>, command_timeout: Duration) -> Self {
        Self::new(LogSource::Journal(unit.into()), command_timeout)
    }

    fn new(source: LogSource, command_timeout: Duration) -> Self {
        Self {
            source,
            offset: 1,
            command_timeout,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_command(&self) -> String {
        match &self.source {
            LogSource::File(path) => {
                format!("tail -n +{} {} | head -n {}", self.offset, path, CHUNK_LINES)
            }
            LogSource::Journal(unit) => format!(
                "journalctl -u {} --no-pager | tail -n +{} | head -n {}",
                unit, self.offset, CHUNK_LINES
            ),
        }
    }

    /// Read the next chunk of lines, empty when nothing new is available
    pub async fn read_chunk(&mut self, shell: &mut dyn RemoteShell) -> Result<Vec<String>> {
        let (ret, out) = shell.run(&self.read_command(), self.command_timeout).await?;
        if ret != 0 {
            return Ok(Vec::new());
        }
        let out = out.trim_end_matches('\n');
        if out.is_empty() {
            return Ok(Vec::new());
        }
        let lines: Vec<String> = out.split('\n').map(str::to_string).collect();
        self.offset += lines.len();
        Ok(lines)
    }

    /// Read and log everything currently available
    pub async fn drain(&mut self, shell: &mut dyn RemoteShell) -> Result<()> {
        loop {
            let lines = self.read_chunk(shell).await?;
            if lines.is_empty() {
                return Ok(());
            }
            info!("{}", lines.join("\n"));
            if lines.len() < CHUNK_LINES {
                return Ok(());
            }
        }
    }

    /// Follow the log until `inspect` reports completion or `deadline` passes
    ///
    /// `inspect` sees each chunk as one text block and returns `Ok(true)`
    /// once the installation is done. Returns `false` on deadline expiry.
    pub async fn follow<F>(
        &mut self,
        shell: &mut dyn RemoteShell,
        deadline: Instant,
        poll: Duration,
        mut inspect: F,
    ) -> Result<bool>
    where
        F: FnMut(&str) -> Result<bool> + Send,
    {
        while Instant::now() <= deadline {
            let lines = self.read_chunk(shell).await?;
            if lines.is_empty() {
                tokio::time::sleep(poll).await;
                continue;
            }
            let text = lines.join("\n");
            info!("{}", text);
            if inspect(&text)? {
                return Ok(true);
            }
            if lines.len() < CHUNK_LINES {
                tokio::time::sleep(poll).await;
            }
        }
        Ok(false)
    }
}

/// Wait until `path` exists on the target
pub async fn wait_for_file(
    shell: &mut dyn RemoteShell,
    path: &str,
    budget: Duration,
    poll: Duration,
    command_timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + budget;
    let command = format!("[ -f \"{}\" ]", path);
    loop {
        let (ret, _) = shell.run(&command, command_timeout).await?;
        if ret == 0 {
            return Ok(());
        }
        if Instant::now() + poll > deadline {
            return Err(AutoinstallError::timeout(
                "Timed out while waiting for installation logfile",
            ));
        }
        tokio::time::sleep(poll).await;
    }
}
