//! kwatch render: turns a `DiffRecord` into a header plus unified diff on a
//! shared output sink.
//!
//! Three backends are supported:
//! - `System`: stage both texts in scratch files and run `colordiff` (when
//!   colour is on and it is installed) or `diff -ruwN`
//! - `Command`: the same staging, handed to an operator-chosen program
//! - `Builtin`: in-process unified diff, no external program needed

#![forbid(unsafe_code)]

mod builtin;

use std::io::Write;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kwatch_core::{DiffRecord, WatchError};
use metrics::{counter, histogram};
use tempfile::NamedTempFile;
use tracing::debug;

pub use builtin::unified_diff;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("diff tool `{0}` is not available")]
    ToolUnavailable(String),
    #[error("diff tool `{tool}` failed ({status}): {stderr}")]
    ToolFailed { tool: String, status: String, stderr: String },
    #[error("writing diff output")]
    Io(#[from] std::io::Error),
}

impl From<RenderError> for WatchError {
    fn from(e: RenderError) -> Self {
        WatchError::Render(e.to_string())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Decide whether to colour, given whether the sink is a terminal.
    pub fn enabled(self, is_terminal: bool) -> bool {
        match self {
            ColorMode::Auto => is_terminal,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ColorMode::Auto),
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            other => Err(format!("invalid color mode `{other}` (expect auto, always or never)")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub enum DiffTool {
    #[default]
    System,
    Builtin,
    /// Program plus leading arguments; the old and new file paths are appended.
    Command(String),
}

impl FromStr for DiffTool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("empty diff tool".to_string()),
            "system" => Ok(DiffTool::System),
            "builtin" => Ok(DiffTool::Builtin),
            cmd => Ok(DiffTool::Command(cmd.to_string())),
        }
    }
}

/// Append-only destination shared by every session. Each diff block is
/// written under one lock acquisition.
#[derive(Clone)]
pub struct DiffSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl DiffSink {
    pub fn new(w: impl Write + Send + 'static) -> Self {
        Self { inner: Arc::new(Mutex::new(Box::new(w))) }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn write_block(&self, block: &[u8]) -> std::io::Result<()> {
        let mut w = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        w.write_all(block)?;
        w.flush()
    }

    /// `write_block` on the blocking pool, so a stalled stdout reader parks a
    /// blocking thread instead of a runtime worker.
    pub async fn write_block_blocking(&self, block: Vec<u8>) -> std::io::Result<()> {
        let sink = self.clone();
        tokio::task::spawn_blocking(move || sink.write_block(&block))
            .await
            .map_err(std::io::Error::other)?
    }
}

/// In-memory sink, handy for tests and for capturing output.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct DiffRenderer {
    tool: DiffTool,
    color: bool,
    sink: DiffSink,
}

impl DiffRenderer {
    pub fn new(tool: DiffTool, color: bool, sink: DiffSink) -> Self {
        Self { tool, color, sink }
    }

    pub fn tool(&self) -> &DiffTool { &self.tool }
    pub fn color(&self) -> bool { self.color }

    /// Render one record as a single contiguous block. Nothing is written when
    /// the diff itself cannot be produced.
    pub async fn render(&self, rec: &DiffRecord) -> Result<(), RenderError> {
        let started = Instant::now();
        let body = match self.body(rec).await {
            Ok(b) => b,
            Err(e) => {
                counter!("kwatch_render_errors_total", 1u64);
                return Err(e);
            }
        };
        let mut block = header(rec).into_bytes();
        block.extend_from_slice(&body);
        if !block.ends_with(b"\n") {
            block.push(b'\n');
        }
        self.sink.write_block_blocking(block).await?;
        histogram!("kwatch_render_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("kwatch_diffs_rendered_total", 1u64);
        Ok(())
    }

    async fn body(&self, rec: &DiffRecord) -> Result<Vec<u8>, RenderError> {
        let old_label = format!("old/{}", rec.target.label());
        let new_label = format!("new/{}", rec.target.label());
        match &self.tool {
            DiffTool::Builtin => {
                Ok(unified_diff(&rec.previous_text, &rec.current_text, &old_label, &new_label, self.color).into_bytes())
            }
            DiffTool::System => {
                let (old, new) = stage_pair(rec)?;
                let args = [
                    "-ruwN".to_string(),
                    path_arg(&old),
                    "--label".to_string(),
                    old_label,
                    path_arg(&new),
                    "--label".to_string(),
                    new_label,
                ];
                if self.color {
                    match run_tool("colordiff", &args).await {
                        Err(RenderError::ToolUnavailable(_)) => {
                            debug!("colordiff not installed; falling back to plain diff");
                        }
                        other => return other,
                    }
                }
                run_tool("diff", &args).await
            }
            DiffTool::Command(cmd) => {
                let mut words = cmd.split_whitespace();
                let program = words.next().ok_or_else(|| RenderError::ToolUnavailable(cmd.clone()))?;
                let (old, new) = stage_pair(rec)?;
                let mut args: Vec<String> = words.map(str::to_string).collect();
                args.push(path_arg(&old));
                args.push(path_arg(&new));
                run_tool(program, &args).await
            }
        }
    }
}

/// `# Resource: kubectl get <resource> -oyaml [-n <ns>] <name> @ <time>`
pub fn header(rec: &DiffRecord) -> String {
    let ts = rec.timestamp.format("%Y-%m-%d %H:%M:%S%.3f %:z");
    let t = &rec.target;
    if t.cluster_scoped() {
        format!("# Resource: kubectl get {} -oyaml {} @ {}\n", t.resource, t.name, ts)
    } else {
        format!("# Resource: kubectl get {} -oyaml -n {} {} @ {}\n", t.resource, t.namespace, t.name, ts)
    }
}

/// Scratch copies of both texts, removed when the handles drop (including
/// on every error path).
fn stage_pair(rec: &DiffRecord) -> Result<(NamedTempFile, NamedTempFile), RenderError> {
    let prefix = format!("{}.yaml-", rec.target.file_stem());
    Ok((stage(&prefix, &rec.previous_text)?, stage(&prefix, &rec.current_text)?))
}

fn path_arg(f: &NamedTempFile) -> String {
    f.path().to_string_lossy().into_owned()
}

fn stage(prefix: &str, text: &str) -> Result<NamedTempFile, RenderError> {
    let mut f = tempfile::Builder::new().prefix(prefix).tempfile()?;
    f.write_all(text.as_bytes())?;
    f.flush()?;
    Ok(f)
}

/// Run a diff program; exit status 0 (same) and 1 (different) both count as
/// success. Stdout and stderr are returned together.
async fn run_tool(program: &str, args: &[String]) -> Result<Vec<u8>, RenderError> {
    let out = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RenderError::ToolUnavailable(program.to_string()),
            _ => RenderError::Io(e),
        })?;
    match out.status.code() {
        Some(0) | Some(1) => {
            let mut buf = out.stdout;
            buf.extend_from_slice(&out.stderr);
            Ok(buf)
        }
        code => Err(RenderError::ToolFailed {
            tool: program.to_string(),
            status: code.map(|c| format!("exit status {c}")).unwrap_or_else(|| "terminated by signal".to_string()),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        }),
    }
}
