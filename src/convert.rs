// src/convert.rs - recoveryOS virtual disk images via qemu-img

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Release {
    pub name: &'static str,
    /// A board whose latest recovery image is this release.
    pub board_id: &'static str,
}

pub static RELEASES: [Release; 7] = [
    Release { name: "Catalina", board_id: "Mac-6F01561E16C75D06" },
    Release { name: "Big Sur", board_id: "Mac-2BD1B31983FE1663" },
    Release { name: "Monterey", board_id: "Mac-A5C67F76ED83108C" },
    Release { name: "Ventura", board_id: "Mac-B4831CEBD52A0C4C" },
    Release { name: "Sonoma", board_id: "Mac-827FAC58A8FDFA22" },
    Release { name: "Sequoia", board_id: "Mac-7BA5B2D9E42DDD94" },
    Release { name: "Tahoe", board_id: "Mac-CFF7D910A743CAAF" },
];

impl Release {
    /// "Big Sur" -> "bigsur"
    pub fn basename(&self) -> String {
        self.name.replace(' ', "").to_lowercase()
    }
}

/// Look a release up by name, basename, or 1-based catalog number.
pub fn find_release(key: &str) -> Result<&'static Release> {
    let wanted = key.trim().replace(' ', "").to_lowercase();
    if let Ok(n) = wanted.parse::<usize>() {
        if let Some(release) = n.checked_sub(1).and_then(|i| RELEASES.get(i)) {
            return Ok(release);
        }
    }
    RELEASES
        .iter()
        .find(|r| r.basename() == wanted)
        .ok_or_else(|| Error::UnknownRelease(key.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Vmdk,
    Qcow2,
    Vhdx,
    Raw,
}

impl DiskFormat {
    pub const ALL: [DiskFormat; 4] = [Self::Vmdk, Self::Qcow2, Self::Vhdx, Self::Raw];

    /// qemu-img format name, also the file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            DiskFormat::Vmdk => "vmdk",
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Vhdx => "vhdx",
            DiskFormat::Raw => "raw",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `--format` on the command line: one format or every one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FormatChoice {
    Vmdk,
    Qcow2,
    Vhdx,
    Raw,
    All,
}

impl FormatChoice {
    pub fn formats(self) -> Vec<DiskFormat> {
        match self {
            FormatChoice::Vmdk => vec![DiskFormat::Vmdk],
            FormatChoice::Qcow2 => vec![DiskFormat::Qcow2],
            FormatChoice::Vhdx => vec![DiskFormat::Vhdx],
            FormatChoice::Raw => vec![DiskFormat::Raw],
            FormatChoice::All => DiskFormat::ALL.to_vec(),
        }
    }
}

pub trait Converter {
    fn convert(&self, format: DiskFormat, input: &Path, output: &Path) -> Result<()>;
}

/// The external `qemu-img` tool.
#[derive(Debug, Clone)]
pub struct QemuImg {
    program: PathBuf,
}

impl QemuImg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(format: DiskFormat, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "convert".into(),
            "-f".into(),
            "dmg".into(),
            "-O".into(),
            format.as_str().into(),
            input.display().to_string(),
            output.display().to_string(),
            "-p".into(),
        ]
    }
}

impl Converter for QemuImg {
    fn convert(&self, format: DiskFormat, input: &Path, output: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(Self::args(format, input, output))
            .status()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Error::ConverterMissing(self.program.clone()),
                _ => Error::Io(e),
            })?;
        if !status.success() {
            return Err(Error::ConversionFailed(format!(
                "{} to {format}: {status}",
                self.program.display()
            )));
        }
        Ok(())
    }
}

/// Convert `input` (a .dmg) into each format next to it. Every format is
/// attempted; with more than one, failures come back as one error.
pub fn convert_all(
    converter: &dyn Converter,
    input: &Path,
    formats: &[DiskFormat],
) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    let mut failures = Vec::new();

    for &format in formats {
        let output = input.with_extension(format.as_str());
        info!("converting to {format}");
        match converter.convert(format, input, &output) {
            Ok(()) => {
                info!("created {format} disk: {}", output.display());
                created.push(output);
            }
            Err(e) if formats.len() == 1 => return Err(e),
            Err(e) => {
                warn!("{format} conversion failed: {e}");
                failures.push(e.to_string());
            }
        }
    }

    if !failures.is_empty() {
        return Err(Error::ConversionFailed(format!(
            "some conversions failed:\n{}",
            failures.join("\n")
        )));
    }
    Ok(created)
}
