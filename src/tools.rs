//! # Optimizer Tool Registry
//!
//! Every external optimizer is described by a `ToolDescriptor`: which formats it
//! accepts, whether it handles multi-frame images, how it takes its input and
//! output paths, and the exact argument template.
//!
//! | Tool          | Input            | Output | Convention   |
//! |---------------|------------------|--------|--------------|
//! | gifsicle      | GIF              | GIF    | in place     |
//! | optipng       | PNG/GIF/PNM/TIFF | PNG    | input→output |
//! | advpng        | PNG              | PNG    | in place     |
//! | pngout        | PNG/GIF          | PNG    | input→output |
//! | mozjpeg       | JPEG             | JPEG   | input→output |
//! | jpegrescan    | JPEG             | JPEG   | input→output |
//! | jpegtran_prog | JPEG             | JPEG   | input→output |
//! | jpegtran      | JPEG             | JPEG   | input→output |
//!
//! `REGISTRY` order is the execution order: the lossless chain runs every
//! applicable entry, the lossy chain stops at the first success.

use crate::classifier::{FileFormat, FormatFamily};
use crate::config::Config;
use crate::os_args;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    Gifsicle,
    Optipng,
    Advpng,
    Pngout,
    Mozjpeg,
    Jpegrescan,
    JpegtranProg,
    Jpegtran,
}

impl ToolId {
    pub fn name(&self) -> &'static str {
        match self {
            ToolId::Gifsicle => "gifsicle",
            ToolId::Optipng => "optipng",
            ToolId::Advpng => "advpng",
            ToolId::Pngout => "pngout",
            ToolId::Mozjpeg => "mozjpeg",
            ToolId::Jpegrescan => "jpegrescan",
            ToolId::JpegtranProg => "jpegtran_prog",
            ToolId::Jpegtran => "jpegtran",
        }
    }

    pub fn descriptor(&self) -> &'static ToolDescriptor {
        REGISTRY
            .iter()
            .find(|tool| tool.id == *self)
            .unwrap_or(&REGISTRY[0])
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a tool is pointed at its files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Rewrites its single path argument; the runner seeds the output with a copy
    InPlace,
    /// Reads the input path and writes a separate output path
    InputOutput,
}

/// Frame handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePolicy {
    /// Would corrupt animations
    SingleFrameOnly,
    /// Understands every frame
    FrameAware,
}

#[derive(Debug)]
pub struct ToolDescriptor {
    pub id: ToolId,
    /// Executable looked up by the resolver
    pub program: &'static str,
    pub family: FormatFamily,
    pub inputs: &'static [FileFormat],
    pub sequence: SequencePolicy,
    pub convention: Convention,
    /// None keeps the input format
    pub output: Option<FileFormat>,
}

pub static REGISTRY: &[ToolDescriptor] = &[
    ToolDescriptor {
        id: ToolId::Gifsicle,
        program: "gifsicle",
        family: FormatFamily::Lossless,
        inputs: &[FileFormat::Gif],
        sequence: SequencePolicy::FrameAware,
        convention: Convention::InPlace,
        output: None,
    },
    ToolDescriptor {
        id: ToolId::Optipng,
        program: "optipng",
        family: FormatFamily::Lossless,
        inputs: &[FileFormat::Png, FileFormat::Gif, FileFormat::Pnm, FileFormat::Tiff],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: Some(FileFormat::Png),
    },
    ToolDescriptor {
        id: ToolId::Advpng,
        program: "advpng",
        family: FormatFamily::Lossless,
        inputs: &[FileFormat::Png],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InPlace,
        output: None,
    },
    ToolDescriptor {
        id: ToolId::Pngout,
        program: "pngout",
        family: FormatFamily::Lossless,
        inputs: &[FileFormat::Png, FileFormat::Gif],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: Some(FileFormat::Png),
    },
    ToolDescriptor {
        id: ToolId::Mozjpeg,
        program: "mozjpeg",
        family: FormatFamily::Lossy,
        inputs: &[FileFormat::Jpeg],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: None,
    },
    ToolDescriptor {
        id: ToolId::Jpegrescan,
        program: "jpegrescan",
        family: FormatFamily::Lossy,
        inputs: &[FileFormat::Jpeg],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: None,
    },
    ToolDescriptor {
        id: ToolId::JpegtranProg,
        program: "jpegtran",
        family: FormatFamily::Lossy,
        inputs: &[FileFormat::Jpeg],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: None,
    },
    ToolDescriptor {
        id: ToolId::Jpegtran,
        program: "jpegtran",
        family: FormatFamily::Lossy,
        inputs: &[FileFormat::Jpeg],
        sequence: SequencePolicy::SingleFrameOnly,
        convention: Convention::InputOutput,
        output: None,
    },
];

impl ToolDescriptor {
    /// Can this tool work on a file of this format and frame count?
    pub fn accepts(&self, format: FileFormat, sequenced: bool) -> bool {
        if !self.inputs.contains(&format) {
            return false;
        }
        !(sequenced && self.sequence == SequencePolicy::SingleFrameOnly)
    }

    pub fn output_format(&self, input: FileFormat) -> FileFormat {
        self.output.unwrap_or(input)
    }

    pub fn converts(&self, input: FileFormat) -> bool {
        self.output_format(input) != input
    }

    /// Build the argument vector (without the program name).
    ///
    /// For `InPlace` tools `input` is ignored: the output path already holds
    /// a copy of the input when the tool starts.
    pub fn args(&self, input: &Path, output: &Path, config: &Config) -> Vec<OsString> {
        let copy = if config.destroy_metadata { "none" } else { "all" };
        match self.id {
            ToolId::Gifsicle => os_args!["--optimize=3", "--batch", output],
            ToolId::Optipng => {
                let mut args = os_args!["-o6", "-fix", "-force", "-quiet"];
                if config.destroy_metadata {
                    args.extend(os_args!["-strip", "all"]);
                } else {
                    args.extend(os_args!["-preserve"]);
                }
                args.extend(os_args!["-out", output, input]);
                args
            }
            ToolId::Advpng => os_args!["-z", "-4", "-f", output],
            ToolId::Pngout => os_args!["-q", "-force", "-y", input, output],
            ToolId::Mozjpeg => os_args![
                "-optimize",
                "-progressive",
                "-copy",
                copy,
                "-outfile",
                output,
                input
            ],
            ToolId::Jpegrescan => {
                let mut args = Vec::new();
                if config.destroy_metadata {
                    args.extend(os_args!["-s"]);
                }
                if config.jpegrescan_multithread {
                    args.extend(os_args!["-t"]);
                }
                args.extend(os_args![input, output]);
                args
            }
            ToolId::JpegtranProg => os_args![
                "-copy",
                copy,
                "-optimize",
                "-progressive",
                "-outfile",
                output,
                input
            ],
            ToolId::Jpegtran => os_args!["-copy", copy, "-optimize", "-outfile", output, input],
        }
    }
}

/// Enabled tools of a family, in execution order
pub fn enabled_tools(config: &Config, family: FormatFamily) -> Vec<&'static ToolDescriptor> {
    REGISTRY
        .iter()
        .filter(|tool| tool.family == family)
        .filter(|tool| config.tools.is_enabled(tool.id))
        .collect()
}
