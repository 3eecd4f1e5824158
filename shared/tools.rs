// ========================================================================================
//
//                  Scoped invocation of external compression/indexing tools
//
// ========================================================================================
//
// Block compression and range indexing are delegated to `bgzip` and `tabix`. Each call
// is a single blocking subprocess whose stderr is captured and attached to the error on
// failure. There are no retries: the tools are idempotent and a failed run is re-run by
// the caller.

use log::{debug, info};
use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

/// Largest coordinate a TBI index can address (2^29 - 1). Beyond this, CSI is required.
pub const TBI_MAX_COORDINATE: u64 = (1 << 29) - 1;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} is not installed. Please install it first and make sure it is in your PATH.")]
    NotFound { tool: String },
    #[error("Failed to launch {tool}: {source}")]
    Launch {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} failed ({status}). Diagnostic output:\n{stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
}

/// Which flavour of range index to build next to a compressed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFlavor {
    Tbi,
    Csi,
}

impl IndexFlavor {
    /// Picks TBI unless a coordinate exceeds what TBI can address.
    pub fn for_max_coordinate(max_coordinate: u64) -> Self {
        if max_coordinate > TBI_MAX_COORDINATE {
            IndexFlavor::Csi
        } else {
            IndexFlavor::Tbi
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            IndexFlavor::Tbi => "tbi",
            IndexFlavor::Csi => "csi",
        }
    }
}

/// Column layout handed to `tabix`. Columns are 1-based, as on the tabix command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub seq_column: usize,
    pub begin_column: usize,
    pub end_column: usize,
    pub skip_lines: usize,
    pub flavor: IndexFlavor,
}

impl IndexSpec {
    /// Chromosome in column 1, a single position in column 2.
    pub fn point(skip_lines: usize, flavor: IndexFlavor) -> Self {
        Self {
            seq_column: 1,
            begin_column: 2,
            end_column: 2,
            skip_lines,
            flavor,
        }
    }
}

/// Locates an executable on `PATH`.
pub fn find_tool(tool: &str) -> Result<PathBuf, ToolError> {
    let not_found = || ToolError::NotFound {
        tool: tool.to_string(),
    };
    let path_var = env::var_os("PATH").ok_or_else(not_found)?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

/// Runs `tool` with `args`, capturing stdout and stderr. A non-zero exit becomes
/// `ToolError::Failed` carrying the tool's stderr.
pub fn run_tool<I, S>(tool: &str, args: I) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = find_tool(tool)?;
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!("Running {} {:?}", program.display(), args);

    let output = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Launch {
            tool: tool.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Compresses `path` in place with `bgzip -f`, returning the `.gz` path.
pub fn bgzip(path: &Path) -> Result<PathBuf, ToolError> {
    info!("Compressing {} with bgzip", path.display());
    run_tool("bgzip", [OsStr::new("-f"), path.as_os_str()])?;
    let mut compressed = path.as_os_str().to_os_string();
    compressed.push(".gz");
    Ok(PathBuf::from(compressed))
}

/// Builds a range index for a block-compressed file with `tabix -f`.
pub fn tabix_index(path: &Path, spec: &IndexSpec) -> Result<PathBuf, ToolError> {
    info!("Indexing {} with tabix", path.display());
    let mut args: Vec<OsString> = vec!["-f".into()];
    if spec.flavor == IndexFlavor::Csi {
        args.push("-C".into());
    }
    if spec.skip_lines > 0 {
        args.push("-S".into());
        args.push(spec.skip_lines.to_string().into());
    }
    args.push("-s".into());
    args.push(spec.seq_column.to_string().into());
    args.push("-b".into());
    args.push(spec.begin_column.to_string().into());
    args.push("-e".into());
    args.push(spec.end_column.to_string().into());
    args.push(path.as_os_str().to_os_string());
    run_tool("tabix", args)?;

    let mut index = path.as_os_str().to_os_string();
    index.push(".");
    index.push(spec.flavor.extension());
    Ok(PathBuf::from(index))
}

/// Compresses then indexes a position-sorted text file, returning the compressed path.
pub fn compress_and_index(path: &Path, spec: &IndexSpec) -> Result<PathBuf, ToolError> {
    let compressed = bgzip(path)?;
    tabix_index(&compressed, spec)?;
    Ok(compressed)
}
